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

//! The wire types of the key backup endpoints and the network seam the
//! [`BackupMachine`](super::BackupMachine) drives them through.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::crypto::EncryptedSessionData;
use crate::{
    error::RemoteError,
    types::{OwnedRoomId, SignatureMap},
};

/// The auth data of a backup version, the part of the version that gets
/// signed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackupAuthData {
    /// The Curve25519 public key records are encrypted under, unpadded
    /// base64.
    pub public_key: String,

    /// The salt the seed was derived with, present only for
    /// passphrase-protected backups. Unpadded base64 of the raw salt bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key_salt: Option<String>,

    /// The PBKDF2 iteration count, present only for passphrase-protected
    /// backups.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key_iterations: Option<u32>,

    /// Signatures over the auth data, by the creating device and ideally by
    /// the user's cross-signing identity.
    #[serde(default)]
    pub signatures: SignatureMap,
}

/// The algorithm of a backup version, carrying its auth data.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "algorithm", content = "auth_data")]
pub enum BackupAlgorithm {
    /// Per-record asymmetric encryption under the backup public key.
    #[serde(rename = "m.backup.v1.curve25519-aes-sha2")]
    CurveAesSha2(BackupAuthData),

    /// Per-record symmetric encryption with keys expanded from the seed.
    #[serde(rename = "m.backup.v1.aes-hmac-sha2")]
    AesHmacSha2(BackupAuthData),
}

impl BackupAlgorithm {
    /// The auth data, independent of the variant.
    pub fn auth_data(&self) -> &BackupAuthData {
        match self {
            BackupAlgorithm::CurveAesSha2(data) | BackupAlgorithm::AesHmacSha2(data) => data,
        }
    }
}

/// A server-side backup version.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackupVersion {
    /// The opaque, server-assigned version string.
    pub version: String,

    /// The algorithm and auth data of the version.
    #[serde(flatten)]
    pub algorithm: BackupAlgorithm,

    /// How many keys the server holds for this version.
    #[serde(default)]
    pub count: u64,
}

/// A single backed up room key as the server stores it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KeyBackupData {
    /// The first message index the contained key can decrypt.
    pub first_message_index: u64,

    /// Through how many devices the key was forwarded before it was backed
    /// up.
    pub forwarded_count: u64,

    /// Was the device the key came from verified at backup time.
    pub is_verified: bool,

    /// The encrypted room key record.
    pub session_data: EncryptedSessionData,
}

/// All backed up keys of a single room, keyed by session id.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RoomKeyBackup {
    /// The individual records.
    pub sessions: BTreeMap<String, KeyBackupData>,
}

/// The full payload of a key upload or download, keyed by room id.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct KeysBackupData {
    /// The per-room records.
    pub rooms: BTreeMap<OwnedRoomId, RoomKeyBackup>,
}

/// The outcome of uploading a batch of room keys.
#[derive(Debug)]
pub enum UploadOutcome {
    /// The server accepted the batch.
    Stored,
    /// The version we uploaded against is no longer the current one.
    WrongVersion,
}

/// The network seam towards the key backup endpoints of the homeserver.
///
/// The [`BackupMachine`](super::BackupMachine) is generic over this so tests
/// can script the server side.
#[async_trait]
pub trait BackupRemote: Send + Sync + std::fmt::Debug {
    /// Fetch the currently active backup version, if any exists.
    async fn get_current_version(&self) -> Result<Option<BackupVersion>, RemoteError>;

    /// Create a new backup version and return its server-assigned version
    /// string.
    async fn create_version(&self, algorithm: BackupAlgorithm) -> Result<String, RemoteError>;

    /// Upload a batch of room keys against the given version.
    async fn upload_room_keys(
        &self,
        version: &str,
        keys: KeysBackupData,
    ) -> Result<UploadOutcome, RemoteError>;

    /// Download all room keys of the given version.
    async fn download_room_keys(&self, version: &str) -> Result<KeysBackupData, RemoteError>;

    /// Delete the given backup version on the server.
    async fn delete_version(&self, version: &str) -> Result<(), RemoteError>;
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn backup_version_serialization_matches_the_wire_format() {
        let json = json!({
            "version": "1",
            "algorithm": "m.backup.v1.curve25519-aes-sha2",
            "auth_data": {
                "public_key": "abcdefg",
                "signatures": {},
            },
            "count": 42,
        });

        let version: BackupVersion = serde_json::from_value(json.clone()).unwrap();

        assert_eq!(version.version, "1");
        assert_eq!(version.count, 42);
        assert_eq!(version.algorithm.auth_data().public_key, "abcdefg");

        let round_tripped = serde_json::to_value(&version).unwrap();
        assert_eq!(round_tripped, json);
    }

    #[test]
    fn passphrase_fields_are_omitted_when_absent() {
        let data = BackupAuthData {
            public_key: "key".to_owned(),
            private_key_salt: None,
            private_key_iterations: None,
            signatures: SignatureMap::new(),
        };

        let value = serde_json::to_value(&data).unwrap();

        assert!(value.get("private_key_salt").is_none());
        assert!(value.get("private_key_iterations").is_none());
    }
}
