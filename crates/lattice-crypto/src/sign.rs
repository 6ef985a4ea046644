// Copyright 2026 The Lattice Project Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Ed25519 signing and verification over canonical JSON.

use serde_json::Value;
use vodozemac::{base64_decode, base64_encode, Ed25519PublicKey, Ed25519SecretKey, Ed25519Signature};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{
    canonical_json::canonical_json,
    error::{DecodeError, SignatureError},
};

/// The length of an Ed25519 seed in bytes.
pub const SEED_LENGTH: usize = 32;

/// An Ed25519 signing key backed by a 32-byte seed.
///
/// The seed is zeroized when the key is dropped. There is no way to free the
/// key material manually, dropping the value is the only way to get rid of it.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SigningKey {
    seed: Box<[u8; SEED_LENGTH]>,
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey").field("public_key", &self.public_key_base64()).finish()
    }
}

impl SigningKey {
    /// Create a new random signing key.
    pub fn generate() -> Self {
        use rand::{thread_rng, RngCore};

        let mut seed = Box::new([0u8; SEED_LENGTH]);
        thread_rng().fill_bytes(seed.as_mut_slice());

        Self { seed }
    }

    /// Restore a signing key from its 32-byte seed.
    pub fn from_seed(seed: Box<[u8; SEED_LENGTH]>) -> Self {
        Self { seed }
    }

    /// Restore a signing key from the unpadded base64 encoding of its seed.
    pub fn from_base64(seed: &str) -> Result<Self, DecodeError> {
        let mut decoded = base64_decode(seed)?;

        if decoded.len() != SEED_LENGTH {
            let length = decoded.len();
            decoded.zeroize();

            Err(DecodeError::Length(SEED_LENGTH, length))
        } else {
            let mut seed = Box::new([0u8; SEED_LENGTH]);
            seed.copy_from_slice(&decoded);
            decoded.zeroize();

            Ok(Self { seed })
        }
    }

    /// Export the seed as unpadded base64.
    pub fn to_base64(&self) -> String {
        base64_encode(self.seed.as_slice())
    }

    fn secret_key(&self) -> Ed25519SecretKey {
        Ed25519SecretKey::from_slice(&self.seed)
    }

    /// The public half of this key.
    pub fn public_key(&self) -> Ed25519PublicKey {
        self.secret_key().public_key()
    }

    /// The public half of this key as an unpadded base64 string, the form it
    /// takes in key maps and signature map key ids.
    pub fn public_key_base64(&self) -> String {
        self.public_key().to_base64()
    }

    /// Sign the given message.
    pub fn sign(&self, message: &[u8]) -> Ed25519Signature {
        self.secret_key().sign(message)
    }

    /// Sign the canonical form of the given JSON object.
    ///
    /// The `signatures` and `unsigned` fields are stripped before the object
    /// is canonicalized, they never take part in the signed payload.
    pub fn sign_json(&self, value: &Value) -> Result<Ed25519Signature, SignatureError> {
        let canonical = to_signable(value)?;
        Ok(self.sign(canonical.as_bytes()))
    }
}

/// Strip the unsigned parts of a JSON object and canonicalize the rest.
fn to_signable(value: &Value) -> Result<String, SignatureError> {
    let mut value = value.clone();

    let object = value.as_object_mut().ok_or(SignatureError::NotAnObject)?;
    object.remove("signatures");
    object.remove("unsigned");

    Ok(canonical_json(&value)?)
}

/// Check an Ed25519 signature over a raw message.
///
/// A key that fails to decode yields [`SignatureError::InvalidKey`], a
/// signature that decodes but doesn't match yields
/// [`SignatureError::VerificationError`].
pub fn verify_signature(
    public_key: &str,
    signature: &str,
    message: &[u8],
) -> Result<(), SignatureError> {
    let public_key = Ed25519PublicKey::from_base64(public_key)?;
    let signature =
        Ed25519Signature::from_base64(signature).map_err(|_| SignatureError::InvalidSignature)?;

    Ok(public_key.verify(message, &signature)?)
}

/// Check an Ed25519 signature over the canonical form of a JSON object.
pub fn verify_json_signature(
    public_key: &str,
    signature: &str,
    value: &Value,
) -> Result<(), SignatureError> {
    let canonical = to_signable(value)?;
    verify_signature(public_key, signature, canonical.as_bytes())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    #[test]
    fn sign_and_verify_json() {
        let key = SigningKey::generate();

        let value = json!({
            "user_id": "@alice:localhost",
            "usage": ["master"],
            "keys": { "ed25519:abc": "abc" },
        });

        let signature = key.sign_json(&value).unwrap();

        verify_json_signature(&key.public_key_base64(), &signature.to_base64(), &value).unwrap();
    }

    #[test]
    fn signature_ignores_signatures_and_unsigned() {
        let key = SigningKey::generate();

        let value = json!({ "user_id": "@alice:localhost" });
        let signature = key.sign_json(&value).unwrap();

        let decorated = json!({
            "user_id": "@alice:localhost",
            "signatures": { "@alice:localhost": { "ed25519:abc": "sig" } },
            "unsigned": { "age": 1 },
        });

        verify_json_signature(&key.public_key_base64(), &signature.to_base64(), &decorated)
            .unwrap();
    }

    #[test]
    fn tampered_payload_fails() {
        let key = SigningKey::generate();

        let value = json!({ "user_id": "@alice:localhost" });
        let signature = key.sign_json(&value).unwrap();

        let tampered = json!({ "user_id": "@mallory:localhost" });

        assert_matches!(
            verify_json_signature(&key.public_key_base64(), &signature.to_base64(), &tampered),
            Err(SignatureError::VerificationError(_))
        );
    }

    #[test]
    fn malformed_key_is_distinguished() {
        let key = SigningKey::generate();
        let value = json!({ "a": 1 });
        let signature = key.sign_json(&value).unwrap().to_base64();

        assert_matches!(
            verify_json_signature("not a key", &signature, &value),
            Err(SignatureError::InvalidKey(_))
        );
        assert_matches!(
            verify_json_signature(&key.public_key_base64(), "not a signature", &value),
            Err(SignatureError::InvalidSignature)
        );
    }

    #[test]
    fn seed_round_trips_through_base64() {
        let key = SigningKey::generate();
        let restored = SigningKey::from_base64(&key.to_base64()).unwrap();

        assert_eq!(key.public_key_base64(), restored.public_key_base64());
    }
}
