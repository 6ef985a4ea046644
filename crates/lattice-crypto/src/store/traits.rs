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

use std::{fmt, sync::Arc};

use async_trait::async_trait;

use super::{RoomKeyCounts, RoomKeyExport, RoomSummary};
use crate::{
    backups::{keys::BackupRecoveryKey, BackupVersion},
    error::CryptoStoreError,
    types::{
        DeviceInfo, DeviceTrustLevel, OwnedDeviceId, OwnedRoomId, OwnedUserId,
        PrivateCrossSigningKeys, RoomTrustLevel, UserIdentity,
    },
};

type Result<T, E = CryptoStoreError> = std::result::Result<T, E>;

/// The storage the trust and backup machinery runs on.
///
/// Writes are last-write-wins per user, device or room. A user identity is
/// written as a whole, so the master/self-signing/user-signing triple is
/// always updated atomically relative to a concurrent reader.
#[async_trait]
pub trait CryptoStore: fmt::Debug + Send + Sync {
    /// Load the cross-signing identity of the given user.
    async fn get_user_identity(&self, user_id: &OwnedUserId) -> Result<Option<UserIdentity>>;

    /// Save a user's cross-signing identity, replacing any previous one.
    async fn save_user_identity(&self, identity: UserIdentity) -> Result<()>;

    /// All users we hold a cross-signing identity or devices for.
    async fn known_users(&self) -> Result<Vec<OwnedUserId>>;

    /// All devices we know about for the given user.
    async fn get_user_devices(&self, user_id: &OwnedUserId) -> Result<Vec<DeviceInfo>>;

    /// A single device of the given user.
    async fn get_device(
        &self,
        user_id: &OwnedUserId,
        device_id: &OwnedDeviceId,
    ) -> Result<Option<DeviceInfo>>;

    /// Save a device, replacing any previous record of it.
    async fn save_device(&self, device: DeviceInfo) -> Result<()>;

    /// Update only the trust flags of a device.
    async fn set_device_trust(
        &self,
        user_id: &OwnedUserId,
        device_id: &OwnedDeviceId,
        trust: DeviceTrustLevel,
    ) -> Result<()>;

    /// Load the local user's private cross-signing seeds.
    async fn private_cross_signing_keys(&self) -> Result<Option<PrivateCrossSigningKeys>>;

    /// Store the local user's private cross-signing seeds.
    async fn save_private_cross_signing_keys(&self, keys: PrivateCrossSigningKeys) -> Result<()>;

    /// Load the summary of a single room.
    async fn get_room_summary(&self, room_id: &OwnedRoomId) -> Result<Option<RoomSummary>>;

    /// Save a room summary, replacing any previous one.
    async fn save_room_summary(&self, summary: RoomSummary) -> Result<()>;

    /// Summaries of every room we track.
    async fn get_room_summaries(&self) -> Result<Vec<RoomSummary>>;

    /// Update only the denormalized trust level of a room.
    async fn set_room_trust_level(
        &self,
        room_id: &OwnedRoomId,
        trust_level: RoomTrustLevel,
    ) -> Result<()>;

    /// The locally cached copy of the active backup version, carrying the
    /// algorithm new uploads have to use.
    async fn backup_version(&self) -> Result<Option<BackupVersion>>;

    /// Update the locally cached backup version.
    async fn save_backup_version(&self, version: Option<&BackupVersion>) -> Result<()>;

    /// Load the saved backup recovery key, if any.
    async fn recovery_key(&self) -> Result<Option<BackupRecoveryKey>>;

    /// Save the backup recovery key.
    async fn save_recovery_key(&self, key: Option<&BackupRecoveryKey>) -> Result<()>;

    /// Import room keys into the store, skipping keys we already have a copy
    /// of with an equal or lower first known index. Returns how many keys
    /// were actually added.
    async fn save_room_keys(&self, keys: Vec<RoomKeyExport>) -> Result<usize>;

    /// Room keys that haven't been uploaded to the backup yet, at most
    /// `limit` of them.
    async fn room_keys_to_backup(&self, limit: usize) -> Result<Vec<RoomKeyExport>>;

    /// Mark the given sessions as uploaded to the backup.
    async fn mark_room_keys_as_backed_up(
        &self,
        sessions: &[(OwnedRoomId, String)],
    ) -> Result<()>;

    /// Mark every room key as not backed up, used when the active backup
    /// version changes.
    async fn reset_backup_state(&self) -> Result<()>;

    /// How many room keys exist and how many of them are backed up.
    async fn room_key_counts(&self) -> Result<RoomKeyCounts>;
}

/// A type-erased [`CryptoStore`].
pub type DynCryptoStore = dyn CryptoStore;

/// A type that can be type-erased into `Arc<dyn CryptoStore>`.
pub trait IntoCryptoStore {
    #[doc(hidden)]
    fn into_crypto_store(self) -> Arc<DynCryptoStore>;
}

impl<T> IntoCryptoStore for T
where
    T: CryptoStore + 'static,
{
    fn into_crypto_store(self) -> Arc<DynCryptoStore> {
        Arc::new(self)
    }
}

impl<T> IntoCryptoStore for Arc<T>
where
    T: CryptoStore + 'static,
{
    fn into_crypto_store(self) -> Arc<DynCryptoStore> {
        self
    }
}

impl IntoCryptoStore for Arc<DynCryptoStore> {
    fn into_crypto_store(self) -> Arc<DynCryptoStore> {
        self
    }
}
