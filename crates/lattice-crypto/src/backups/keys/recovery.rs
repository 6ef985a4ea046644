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

//! The backup recovery key.

use std::io::{Cursor, Read};

use rand::{thread_rng, RngCore};
use vodozemac::{
    base64_decode, base64_encode,
    pk_encryption::{Message, PkDecryption},
    Curve25519PublicKey, Curve25519SecretKey,
};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{DecodeError, DecryptionError};

/// The private seed of a key backup.
///
/// Users carry this around in its base58 form: a two byte prefix, the 32 seed
/// bytes, and a parity byte, shown in groups of four characters. The seed is
/// zeroized on drop; exporting it is only possible through the encoding
/// methods.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct BackupRecoveryKey {
    key: Box<[u8; BackupRecoveryKey::KEY_SIZE]>,
}

impl std::fmt::Debug for BackupRecoveryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupRecoveryKey").finish_non_exhaustive()
    }
}

impl std::fmt::Display for BackupRecoveryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let string = Zeroizing::new(self.to_base58());

        let string = Zeroizing::new(
            string
                .chars()
                .collect::<Vec<char>>()
                .chunks(Self::DISPLAY_CHUNK_SIZE)
                .map(|c| c.iter().collect::<String>())
                .collect::<Vec<_>>()
                .join(" "),
        );

        write!(f, "{}", string.as_str())
    }
}

impl TryFrom<String> for BackupRecoveryKey {
    type Error = DecodeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_base58(&value)
    }
}

impl BackupRecoveryKey {
    /// The seed size in bytes.
    pub const KEY_SIZE: usize = 32;
    const PREFIX: [u8; 2] = [0x8b, 0x01];
    const PREFIX_PARITY: u8 = Self::PREFIX[0] ^ Self::PREFIX[1];
    const DISPLAY_CHUNK_SIZE: usize = 4;

    fn parity_byte(bytes: &[u8]) -> u8 {
        bytes.iter().fold(Self::PREFIX_PARITY, |acc, x| acc ^ x)
    }

    /// Generate a new random recovery key.
    pub fn new() -> Self {
        let mut key = Box::new([0u8; Self::KEY_SIZE]);
        thread_rng().fill_bytes(key.as_mut_slice());

        Self { key }
    }

    /// Restore a recovery key from raw seed bytes.
    pub fn from_bytes(key: &[u8; Self::KEY_SIZE]) -> Self {
        Self { key: Box::new(*key) }
    }

    /// Restore a recovery key from its unpadded base64 form, the form used
    /// for storage and key gossip.
    pub fn from_base64(key: &str) -> Result<Self, DecodeError> {
        let mut decoded = base64_decode(key)?;

        if decoded.len() != Self::KEY_SIZE {
            let length = decoded.len();
            decoded.zeroize();

            Err(DecodeError::Length(Self::KEY_SIZE, length))
        } else {
            let mut key = Box::new([0u8; Self::KEY_SIZE]);
            key.copy_from_slice(&decoded);
            decoded.zeroize();

            Ok(Self { key })
        }
    }

    /// Restore a recovery key from its user-facing base58 form.
    ///
    /// Whitespace is ignored, the prefix and the parity byte must validate.
    /// A failure here is an input-validation failure, the value never reached
    /// any cryptographic operation.
    pub fn from_base58(value: &str) -> Result<Self, DecodeError> {
        // Remove any whitespace the user might have copied along.
        let value: String = value.chars().filter(|c| !c.is_whitespace()).collect();

        let decoded = bs58::decode(value).with_alphabet(bs58::Alphabet::BITCOIN).into_vec()?;
        let mut decoded = Cursor::new(decoded);

        let mut prefix = [0u8; 2];
        let mut key = Box::new([0u8; Self::KEY_SIZE]);
        let mut expected_parity = [0u8; 1];

        decoded.read_exact(&mut prefix)?;
        decoded.read_exact(key.as_mut_slice())?;
        decoded.read_exact(&mut expected_parity)?;

        let expected_parity = expected_parity[0];
        let parity = Self::parity_byte(key.as_slice());

        let _ = Zeroizing::new(decoded.into_inner());

        if prefix != Self::PREFIX {
            Err(DecodeError::Prefix(Self::PREFIX, prefix))
        } else if expected_parity != parity {
            Err(DecodeError::Parity(expected_parity, parity))
        } else {
            Ok(Self { key })
        }
    }

    /// Export the seed as unpadded base64.
    pub fn to_base64(&self) -> String {
        base64_encode(self.key.as_slice())
    }

    /// Export the key in its user-facing base58 form.
    pub fn to_base58(&self) -> String {
        let bytes = Zeroizing::new(
            [
                Self::PREFIX.as_ref(),
                self.key.as_slice(),
                [Self::parity_byte(self.key.as_slice())].as_ref(),
            ]
            .concat(),
        );

        bs58::encode(bytes.as_slice()).with_alphabet(bs58::Alphabet::BITCOIN).into_string()
    }

    /// The Curve25519 public key this seed decrypts for.
    ///
    /// Comparing this against a backup's declared public key is how a wrong
    /// passphrase or recovery key is detected.
    pub fn public_key(&self) -> Curve25519PublicKey {
        let secret = Curve25519SecretKey::from_slice(&self.key);
        Curve25519PublicKey::from(&secret)
    }

    /// Access to the raw seed, for the symmetric backup variant's key
    /// expansion.
    pub(crate) fn as_bytes(&self) -> &[u8; Self::KEY_SIZE] {
        &self.key
    }

    /// Decrypt a record that was encrypted under our public key with the
    /// ephemeral-key Diffie-Hellman construction.
    pub(crate) fn decrypt_v1(
        &self,
        ephemeral_key: &str,
        mac: &str,
        ciphertext: &str,
    ) -> Result<Vec<u8>, DecryptionError> {
        let message = Message {
            ciphertext: base64_decode(ciphertext)?,
            mac: base64_decode(mac)?,
            ephemeral_key: Curve25519PublicKey::from_base64(ephemeral_key)?,
        };

        let pk = PkDecryption::from_key(Curve25519SecretKey::from_slice(&self.key));

        pk.decrypt(&message).map_err(|e| DecryptionError::Decryption(e.to_string()))
    }
}
