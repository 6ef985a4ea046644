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

//! Cross-signing key types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::ids::{OwnedKeyId, OwnedUserId, ED25519};

/// A map from the user that created a signature to the signatures themselves,
/// keyed by the id of the key that created them.
pub type SignatureMap = BTreeMap<OwnedUserId, BTreeMap<OwnedKeyId, String>>;

/// The purpose of a cross-signing key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyUsage {
    /// The root of a user's cross-signing identity.
    Master,
    /// Signs the user's own devices.
    SelfSigning,
    /// Signs other users' master keys.
    UserSigning,
}

/// A single public cross-signing key, as uploaded to and downloaded from the
/// server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossSigningKey {
    /// The user the key belongs to.
    pub user_id: OwnedUserId,

    /// What the key is used for. Exactly one usage in practice.
    pub usage: Vec<KeyUsage>,

    /// The public key material, keyed by `ed25519:<unpadded base64 key>`.
    /// Exactly one entry in practice.
    pub keys: BTreeMap<OwnedKeyId, String>,

    /// Signatures that were created over this key.
    #[serde(default, skip_serializing_if = "SignatureMap::is_empty")]
    pub signatures: SignatureMap,
}

impl CrossSigningKey {
    /// Create a new cross-signing key from its public key material.
    pub fn new(user_id: OwnedUserId, usage: KeyUsage, public_key: &str) -> Self {
        let keys =
            BTreeMap::from([(OwnedKeyId::from_parts(ED25519, public_key), public_key.to_owned())]);

        Self { user_id, usage: vec![usage], keys, signatures: Default::default() }
    }

    /// The unpadded base64 encoding of the public key, if the key map isn't
    /// empty.
    pub fn first_key(&self) -> Option<&str> {
        self.keys.values().next().map(|k| k.as_str())
    }

    /// The id of the public key, of the form `ed25519:<unpadded base64 key>`.
    pub fn key_id(&self) -> Option<&OwnedKeyId> {
        self.keys.keys().next()
    }

    /// The JSON form of this key that signatures are created over, without
    /// the signatures themselves.
    pub fn signable_json(&self) -> Value {
        json!({
            "user_id": self.user_id,
            "usage": self.usage,
            "keys": self.keys,
        })
    }

    /// Look up a signature created by the given user and key.
    pub fn signature_by(&self, user_id: &OwnedUserId, key_id: &OwnedKeyId) -> Option<&str> {
        self.signatures.get(user_id).and_then(|m| m.get(key_id)).map(|s| s.as_str())
    }

    /// Add a signature created by the given user and key.
    pub fn add_signature(&mut self, user_id: OwnedUserId, key_id: OwnedKeyId, signature: String) {
        self.signatures.entry(user_id).or_default().insert(key_id, signature);
    }
}

/// The trust we have in a user's cross-signing identity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserTrustLevel {
    /// Did we verify the identity through the cross-signing chain.
    pub cross_signing_verified: bool,
    /// Did the local user manually mark the identity as verified.
    pub locally_verified: bool,
}

impl UserTrustLevel {
    /// Is the identity verified through either path.
    pub fn is_verified(&self) -> bool {
        self.cross_signing_verified || self.locally_verified
    }
}

/// A user's public cross-signing identity, the key triple plus our local
/// trust in it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    /// The user this identity belongs to.
    pub user_id: OwnedUserId,

    /// The root key of the identity.
    pub master_key: Option<CrossSigningKey>,

    /// The key signing the user's devices.
    pub self_signing_key: Option<CrossSigningKey>,

    /// The key signing other users' master keys. Only tracked for the local
    /// user, other users never share theirs.
    pub user_signing_key: Option<CrossSigningKey>,

    /// Our local trust in this identity.
    #[serde(default)]
    pub trust: UserTrustLevel,
}

impl UserIdentity {
    /// Create an identity with no keys and no trust.
    pub fn empty(user_id: OwnedUserId) -> Self {
        Self {
            user_id,
            master_key: None,
            self_signing_key: None,
            user_signing_key: None,
            trust: Default::default(),
        }
    }

    /// Is this identity verified through either path.
    pub fn is_verified(&self) -> bool {
        self.trust.is_verified()
    }
}

/// The private seeds of a user's cross-signing key triple, as unpadded base64
/// strings.
///
/// Zeroized on drop. Holding a seed that regenerates the matching public key
/// is itself proof that the identity is ours.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct PrivateCrossSigningKeys {
    /// The seed of the master key.
    pub master_key: Option<String>,
    /// The seed of the self-signing key.
    pub self_signing_key: Option<String>,
    /// The seed of the user-signing key.
    pub user_signing_key: Option<String>,
}

impl std::fmt::Debug for PrivateCrossSigningKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateCrossSigningKeys")
            .field("master_key", &self.master_key.as_ref().map(|_| "..."))
            .field("self_signing_key", &self.self_signing_key.as_ref().map(|_| "..."))
            .field("user_signing_key", &self.user_signing_key.as_ref().map(|_| "..."))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialization_round_trip() {
        let json = serde_json::json!({
            "user_id": "@alice:localhost",
            "usage": ["master"],
            "keys": { "ed25519:abcdefg": "abcdefg" },
            "signatures": {
                "@alice:localhost": { "ed25519:DEVICEID": "signature" }
            }
        });

        let key: CrossSigningKey = serde_json::from_value(json.clone()).unwrap();

        assert_eq!(key.usage, vec![KeyUsage::Master]);
        assert_eq!(key.first_key(), Some("abcdefg"));
        assert_eq!(
            key.signature_by(&"@alice:localhost".into(), &"ed25519:DEVICEID".into()),
            Some("signature")
        );
        assert_eq!(serde_json::to_value(&key).unwrap(), json);
    }

    #[test]
    fn signable_json_has_no_signatures() {
        let mut key = CrossSigningKey::new("@alice:localhost".into(), KeyUsage::Master, "abc");
        key.add_signature("@alice:localhost".into(), "ed25519:DEVICEID".into(), "sig".to_owned());

        let signable = key.signable_json();
        assert!(signable.get("signatures").is_none());
        assert!(signable.get("keys").is_some());
    }
}
