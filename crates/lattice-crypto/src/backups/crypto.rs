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

//! Per-record encryption for backed up room keys.
//!
//! Two wire variants exist. The asymmetric one encrypts each record under the
//! backup's Curve25519 public key with an ephemeral-key Diffie-Hellman
//! construction, so records can be written without holding the private seed.
//! The symmetric one expands the seed with HKDF into an AES-256-CTR key and an
//! HMAC-SHA256 key and encrypt-then-MACs the record directly.

use std::collections::BTreeMap;

use aes::{
    cipher::{Iv, Key, KeyIvInit, StreamCipher},
    Aes256,
};
use ctr::Ctr128BE;
use hkdf::Hkdf;
use hmac::{digest::MacError, Hmac, Mac};
use rand::{thread_rng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use vodozemac::{base64_decode, base64_encode, pk_encryption::PkEncryption, Curve25519PublicKey};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use super::keys::BackupRecoveryKey;
use crate::{error::DecryptionError, store::RoomKeyExport, types::OwnedRoomId};

type Aes256Ctr = Ctr128BE<Aes256>;
type Aes256Key = Key<Aes256Ctr>;
type Aes256Iv = Iv<Aes256Ctr>;
type HmacSha256 = Hmac<Sha256>;

const IV_SIZE: usize = 16;
const MAC_SIZE: usize = 32;

/// The algorithm the exported room keys themselves use.
pub const MEGOLM_BACKUP_ALGORITHM: &str = "m.megolm.v1.aes-sha2";

/// The plaintext payload of a single backup record.
///
/// This is [`RoomKeyExport`] minus the fields the backup transports outside
/// the encrypted blob, the room id and the message index.
#[derive(Debug, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct BackedUpSessionData {
    /// The algorithm of the exported session key.
    #[zeroize(skip)]
    pub algorithm: String,

    /// The Curve25519 key of the device that created the session.
    #[zeroize(skip)]
    pub sender_key: String,

    /// Keys the original sender claimed to own.
    #[zeroize(skip)]
    pub sender_claimed_keys: BTreeMap<String, String>,

    /// The chain of Curve25519 keys the session was forwarded through.
    #[zeroize(skip)]
    pub forwarding_curve25519_key_chain: Vec<String>,

    /// The exported session key.
    pub session_key: String,
}

impl From<&RoomKeyExport> for BackedUpSessionData {
    fn from(export: &RoomKeyExport) -> Self {
        Self {
            algorithm: MEGOLM_BACKUP_ALGORITHM.to_owned(),
            sender_key: export.sender_key.clone(),
            sender_claimed_keys: export.sender_claimed_keys.clone(),
            forwarding_curve25519_key_chain: export.forwarding_curve25519_key_chain.clone(),
            session_key: export.session_key.clone(),
        }
    }
}

impl BackedUpSessionData {
    /// Rebuild a full room key export out of the decrypted payload and the
    /// record metadata that travels outside of it.
    pub fn into_export(
        self,
        room_id: OwnedRoomId,
        session_id: String,
        first_known_index: u64,
        sender_verified: bool,
    ) -> RoomKeyExport {
        RoomKeyExport {
            room_id,
            session_id,
            sender_key: self.sender_key.clone(),
            session_key: self.session_key.clone(),
            sender_claimed_keys: self.sender_claimed_keys.clone(),
            forwarding_curve25519_key_chain: self.forwarding_curve25519_key_chain.clone(),
            first_known_index,
            sender_verified,
        }
    }
}

/// The encrypted form of a single backup record, one variant per backup
/// algorithm. All binary fields are unpadded base64.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EncryptedSessionData {
    /// The ephemeral-key Diffie-Hellman variant.
    CurveAesSha2 {
        /// The ephemeral Curve25519 key of this record.
        ephemeral: String,
        /// The encrypted payload.
        ciphertext: String,
        /// The authentication tag.
        mac: String,
    },
    /// The symmetric AES-256-CTR + HMAC-SHA256 variant.
    AesHmacSha2 {
        /// The initialization vector of this record.
        iv: String,
        /// The encrypted payload.
        ciphertext: String,
        /// The authentication tag over the ciphertext.
        mac: String,
    },
}

/// Encrypt a room key export under a backup's Curve25519 public key.
pub fn encrypt_session(
    backup_key: Curve25519PublicKey,
    export: &RoomKeyExport,
) -> EncryptedSessionData {
    let session_data = BackedUpSessionData::from(export);
    let payload = Zeroizing::new(
        serde_json::to_vec(&session_data).expect("A session export can always be serialized"),
    );

    let message = PkEncryption::from_key(backup_key).encrypt(&payload);

    EncryptedSessionData::CurveAesSha2 {
        ephemeral: message.ephemeral_key.to_base64(),
        ciphertext: base64_encode(&message.ciphertext),
        mac: base64_encode(&message.mac),
    }
}

/// Encrypt a room key export with keys expanded from the backup seed itself.
pub fn encrypt_session_symmetric(
    recovery_key: &BackupRecoveryKey,
    export: &RoomKeyExport,
) -> EncryptedSessionData {
    let session_data = BackedUpSessionData::from(export);
    let mut payload = Zeroizing::new(
        serde_json::to_vec(&session_data).expect("A session export can always be serialized"),
    );

    let key = SymmetricBackupKey::expand(recovery_key, &export.session_id);
    let (iv, mac) = key.encrypt_in_place(&mut payload);

    EncryptedSessionData::AesHmacSha2 {
        iv: base64_encode(iv),
        ciphertext: base64_encode(payload.as_slice()),
        mac: base64_encode(mac),
    }
}

/// Decrypt a backup record with the backup's private seed.
///
/// Fails with [`DecryptionError::Decode`] for malformed records and with one
/// of the cryptographic variants when the record is well-formed but the seed
/// doesn't fit. Restore flows skip past either kind record-by-record.
pub fn decrypt_session(
    recovery_key: &BackupRecoveryKey,
    session_id: &str,
    data: &EncryptedSessionData,
) -> Result<BackedUpSessionData, DecryptionError> {
    let payload = match data {
        EncryptedSessionData::CurveAesSha2 { ephemeral, ciphertext, mac } => {
            Zeroizing::new(recovery_key.decrypt_v1(ephemeral, mac, ciphertext)?)
        }
        EncryptedSessionData::AesHmacSha2 { iv, ciphertext, mac } => {
            let iv = base64_decode(iv)?;
            let iv: [u8; IV_SIZE] =
                iv.try_into().map_err(|_| DecryptionError::Decryption("invalid IV".to_owned()))?;
            let mac = base64_decode(mac)?;
            let mut ciphertext = Zeroizing::new(base64_decode(ciphertext)?);

            let key = SymmetricBackupKey::expand(recovery_key, session_id);
            key.decrypt_in_place(&mut ciphertext, &iv, &mac).map_err(|_| DecryptionError::Mac)?;

            ciphertext
        }
    };

    Ok(serde_json::from_slice(&payload)?)
}

/// AES-256-CTR and HMAC-SHA256 keys expanded from the backup seed for one
/// record.
struct SymmetricBackupKey {
    aes_key: Box<[u8; 32]>,
    mac_key: Box<[u8; 32]>,
}

impl Drop for SymmetricBackupKey {
    fn drop(&mut self) {
        self.aes_key.zeroize();
        self.mac_key.zeroize();
    }
}

impl SymmetricBackupKey {
    /// HKDF-SHA256 expansion of the seed, keyed by the session id so every
    /// record gets its own pair of keys.
    fn expand(recovery_key: &BackupRecoveryKey, session_id: &str) -> Self {
        let mut expanded = Zeroizing::new([0u8; 64]);

        let hkdf: Hkdf<Sha256> = Hkdf::new(None, recovery_key.as_bytes());
        hkdf.expand(session_id.as_bytes(), expanded.as_mut_slice())
            .expect("We should be able to expand the backup seed into two keys");

        let mut aes_key = Box::new([0u8; 32]);
        let mut mac_key = Box::new([0u8; 32]);

        aes_key.copy_from_slice(&expanded[0..32]);
        mac_key.copy_from_slice(&expanded[32..64]);

        Self { aes_key, mac_key }
    }

    fn mac(&self, ciphertext: &[u8]) -> [u8; MAC_SIZE] {
        let mut hmac = HmacSha256::new_from_slice(self.mac_key.as_slice())
            .expect("HMAC should accept a key of any length");
        hmac.update(ciphertext);

        hmac.finalize().into_bytes().into()
    }

    fn encrypt_in_place(&self, payload: &mut [u8]) -> ([u8; IV_SIZE], [u8; MAC_SIZE]) {
        let mut iv = [0u8; IV_SIZE];
        thread_rng().fill_bytes(&mut iv);
        // Clear bit 63 of the IV so the CTR counter can't wrap.
        iv[8] &= 0x7f;

        let mut cipher = Aes256Ctr::new(
            Aes256Key::from_slice(self.aes_key.as_slice()),
            Aes256Iv::from_slice(&iv),
        );
        cipher.apply_keystream(payload);

        (iv, self.mac(payload))
    }

    fn decrypt_in_place(
        &self,
        ciphertext: &mut [u8],
        iv: &[u8; IV_SIZE],
        mac: &[u8],
    ) -> Result<(), MacError> {
        let mut hmac = HmacSha256::new_from_slice(self.mac_key.as_slice())
            .expect("HMAC should accept a key of any length");
        hmac.update(ciphertext);
        hmac.verify_slice(mac)?;

        let mut cipher = Aes256Ctr::new(
            Aes256Key::from_slice(self.aes_key.as_slice()),
            Aes256Iv::from_slice(iv.as_slice()),
        );
        cipher.apply_keystream(ciphertext);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn export() -> RoomKeyExport {
        RoomKeyExport {
            room_id: "!room:localhost".into(),
            session_id: "session_id_1".to_owned(),
            sender_key: "sender_curve_key".to_owned(),
            session_key: "the megolm session key".to_owned(),
            sender_claimed_keys: BTreeMap::from([(
                "ed25519".to_owned(),
                "sender_ed_key".to_owned(),
            )]),
            forwarding_curve25519_key_chain: vec![],
            first_known_index: 2,
            sender_verified: true,
        }
    }

    #[test]
    fn asymmetric_record_round_trips() {
        let key = BackupRecoveryKey::new();
        let export = export();

        let encrypted = encrypt_session(key.public_key(), &export);
        let decrypted = decrypt_session(&key, &export.session_id, &encrypted).unwrap();

        let restored = decrypted.into_export(
            export.room_id.clone(),
            export.session_id.clone(),
            export.first_known_index,
            export.sender_verified,
        );

        assert_eq!(restored, export);
    }

    #[test]
    fn symmetric_record_round_trips() {
        let key = BackupRecoveryKey::new();
        let export = export();

        let encrypted = encrypt_session_symmetric(&key, &export);
        assert_matches!(&encrypted, EncryptedSessionData::AesHmacSha2 { .. });

        let decrypted = decrypt_session(&key, &export.session_id, &encrypted).unwrap();
        assert_eq!(decrypted.session_key, export.session_key);
    }

    #[test]
    fn wrong_seed_is_a_decryption_failure_not_a_decode_failure() {
        let key = BackupRecoveryKey::new();
        let wrong = BackupRecoveryKey::new();
        let export = export();

        let asymmetric = encrypt_session(key.public_key(), &export);
        assert_matches!(
            decrypt_session(&wrong, &export.session_id, &asymmetric),
            Err(DecryptionError::Decryption(_))
        );

        let symmetric = encrypt_session_symmetric(&key, &export);
        assert_matches!(
            decrypt_session(&wrong, &export.session_id, &symmetric),
            Err(DecryptionError::Mac)
        );
    }

    #[test]
    fn corrupted_record_is_rejected() {
        let key = BackupRecoveryKey::new();
        let export = export();

        let EncryptedSessionData::CurveAesSha2 { ephemeral, ciphertext, mac } =
            encrypt_session(key.public_key(), &export)
        else {
            panic!("the asymmetric encryption should produce an asymmetric record");
        };

        let garbled = EncryptedSessionData::CurveAesSha2 {
            ephemeral,
            ciphertext: "$not base64$".to_owned(),
            mac,
        };

        assert_matches!(
            decrypt_session(&key, &export.session_id, &garbled),
            Err(DecryptionError::Decode(_))
        );
    }

    #[test]
    fn symmetric_keys_differ_per_session() {
        let key = BackupRecoveryKey::new();

        let first = SymmetricBackupKey::expand(&key, "session_a");
        let second = SymmetricBackupKey::expand(&key, "session_b");

        assert_ne!(first.aes_key, second.aes_key);
        assert_ne!(first.mac_key, second.mac_key);
    }
}
