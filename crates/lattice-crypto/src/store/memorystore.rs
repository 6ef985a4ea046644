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

use std::{
    collections::BTreeMap,
    sync::RwLock as StdRwLock,
};

use async_trait::async_trait;

use super::{
    traits::CryptoStore, RoomKeyCounts, RoomKeyExport, RoomSummary,
};
use crate::{
    backups::{keys::BackupRecoveryKey, BackupVersion},
    error::CryptoStoreError,
    types::{
        DeviceInfo, DeviceTrustLevel, OwnedDeviceId, OwnedRoomId, OwnedUserId,
        PrivateCrossSigningKeys, RoomTrustLevel, UserIdentity,
    },
};

type Result<T, E = CryptoStoreError> = std::result::Result<T, E>;

/// An in-memory [`CryptoStore`], mostly useful for testing and as a reference
/// for persistent implementations.
#[derive(Debug, Default)]
pub struct MemoryStore {
    identities: StdRwLock<BTreeMap<OwnedUserId, UserIdentity>>,
    devices: StdRwLock<BTreeMap<OwnedUserId, BTreeMap<OwnedDeviceId, DeviceInfo>>>,
    private_keys: StdRwLock<Option<PrivateCrossSigningKeys>>,
    rooms: StdRwLock<BTreeMap<OwnedRoomId, RoomSummary>>,
    backup_version: StdRwLock<Option<BackupVersion>>,
    recovery_key: StdRwLock<Option<String>>,
    room_keys: StdRwLock<BTreeMap<(OwnedRoomId, String), BackedRoomKey>>,
}

#[derive(Debug)]
struct BackedRoomKey {
    export: RoomKeyExport,
    backed_up: bool,
}

impl MemoryStore {
    /// Create a new, empty store.
    pub fn new() -> Self {
        Default::default()
    }
}

#[async_trait]
impl CryptoStore for MemoryStore {
    async fn get_user_identity(&self, user_id: &OwnedUserId) -> Result<Option<UserIdentity>> {
        Ok(self.identities.read().unwrap().get(user_id).cloned())
    }

    async fn save_user_identity(&self, identity: UserIdentity) -> Result<()> {
        self.identities.write().unwrap().insert(identity.user_id.clone(), identity);
        Ok(())
    }

    async fn known_users(&self) -> Result<Vec<OwnedUserId>> {
        let mut users: Vec<_> = self.identities.read().unwrap().keys().cloned().collect();

        for user in self.devices.read().unwrap().keys() {
            if !users.contains(user) {
                users.push(user.clone());
            }
        }

        Ok(users)
    }

    async fn get_user_devices(&self, user_id: &OwnedUserId) -> Result<Vec<DeviceInfo>> {
        Ok(self
            .devices
            .read()
            .unwrap()
            .get(user_id)
            .map(|d| d.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn get_device(
        &self,
        user_id: &OwnedUserId,
        device_id: &OwnedDeviceId,
    ) -> Result<Option<DeviceInfo>> {
        Ok(self
            .devices
            .read()
            .unwrap()
            .get(user_id)
            .and_then(|d| d.get(device_id))
            .cloned())
    }

    async fn save_device(&self, device: DeviceInfo) -> Result<()> {
        self.devices
            .write()
            .unwrap()
            .entry(device.user_id.clone())
            .or_default()
            .insert(device.device_id.clone(), device);
        Ok(())
    }

    async fn set_device_trust(
        &self,
        user_id: &OwnedUserId,
        device_id: &OwnedDeviceId,
        trust: DeviceTrustLevel,
    ) -> Result<()> {
        if let Some(device) =
            self.devices.write().unwrap().get_mut(user_id).and_then(|d| d.get_mut(device_id))
        {
            device.trust = trust;
        }

        Ok(())
    }

    async fn private_cross_signing_keys(&self) -> Result<Option<PrivateCrossSigningKeys>> {
        Ok(self.private_keys.read().unwrap().clone())
    }

    async fn save_private_cross_signing_keys(
        &self,
        keys: PrivateCrossSigningKeys,
    ) -> Result<()> {
        *self.private_keys.write().unwrap() = Some(keys);
        Ok(())
    }

    async fn get_room_summary(&self, room_id: &OwnedRoomId) -> Result<Option<RoomSummary>> {
        Ok(self.rooms.read().unwrap().get(room_id).cloned())
    }

    async fn save_room_summary(&self, summary: RoomSummary) -> Result<()> {
        self.rooms.write().unwrap().insert(summary.room_id.clone(), summary);
        Ok(())
    }

    async fn get_room_summaries(&self) -> Result<Vec<RoomSummary>> {
        Ok(self.rooms.read().unwrap().values().cloned().collect())
    }

    async fn set_room_trust_level(
        &self,
        room_id: &OwnedRoomId,
        trust_level: RoomTrustLevel,
    ) -> Result<()> {
        if let Some(room) = self.rooms.write().unwrap().get_mut(room_id) {
            room.trust_level = trust_level;
        }

        Ok(())
    }

    async fn backup_version(&self) -> Result<Option<BackupVersion>> {
        Ok(self.backup_version.read().unwrap().clone())
    }

    async fn save_backup_version(&self, version: Option<&BackupVersion>) -> Result<()> {
        *self.backup_version.write().unwrap() = version.cloned();
        Ok(())
    }

    async fn recovery_key(&self) -> Result<Option<BackupRecoveryKey>> {
        Ok(self
            .recovery_key
            .read()
            .unwrap()
            .as_deref()
            // The stored value is the key's own base64 export, it always
            // decodes back.
            .and_then(|k| BackupRecoveryKey::from_base64(k).ok()))
    }

    async fn save_recovery_key(&self, key: Option<&BackupRecoveryKey>) -> Result<()> {
        *self.recovery_key.write().unwrap() = key.map(|k| k.to_base64());
        Ok(())
    }

    async fn save_room_keys(&self, keys: Vec<RoomKeyExport>) -> Result<usize> {
        let mut room_keys = self.room_keys.write().unwrap();
        let mut imported = 0;

        for export in keys {
            let id = (export.room_id.clone(), export.session_id.clone());

            match room_keys.get(&id) {
                // Keep the copy that can decrypt more history.
                Some(existing) if existing.export.first_known_index <= export.first_known_index => {}
                _ => {
                    room_keys.insert(id, BackedRoomKey { export, backed_up: false });
                    imported += 1;
                }
            }
        }

        Ok(imported)
    }

    async fn room_keys_to_backup(&self, limit: usize) -> Result<Vec<RoomKeyExport>> {
        Ok(self
            .room_keys
            .read()
            .unwrap()
            .values()
            .filter(|k| !k.backed_up)
            .take(limit)
            .map(|k| k.export.clone())
            .collect())
    }

    async fn mark_room_keys_as_backed_up(
        &self,
        sessions: &[(OwnedRoomId, String)],
    ) -> Result<()> {
        let mut room_keys = self.room_keys.write().unwrap();

        for id in sessions {
            if let Some(key) = room_keys.get_mut(id) {
                key.backed_up = true;
            }
        }

        Ok(())
    }

    async fn reset_backup_state(&self) -> Result<()> {
        for key in self.room_keys.write().unwrap().values_mut() {
            key.backed_up = false;
        }

        Ok(())
    }

    async fn room_key_counts(&self) -> Result<RoomKeyCounts> {
        let room_keys = self.room_keys.read().unwrap();

        Ok(RoomKeyCounts {
            total: room_keys.len(),
            backed_up: room_keys.values().filter(|k| k.backed_up).count(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn export(room_id: &str, session_id: &str, index: u64) -> RoomKeyExport {
        RoomKeyExport {
            room_id: room_id.into(),
            session_id: session_id.to_owned(),
            sender_key: "sender".to_owned(),
            session_key: "secret".to_owned(),
            sender_claimed_keys: Default::default(),
            forwarding_curve25519_key_chain: Default::default(),
            first_known_index: index,
            sender_verified: false,
        }
    }

    #[tokio::test]
    async fn room_key_import_keeps_the_older_copy() {
        let store = MemoryStore::new();

        assert_eq!(store.save_room_keys(vec![export("!a:b", "s1", 5)]).await.unwrap(), 1);
        // A later ratchet state of the same session is not an upgrade.
        assert_eq!(store.save_room_keys(vec![export("!a:b", "s1", 10)]).await.unwrap(), 0);
        // An earlier one is.
        assert_eq!(store.save_room_keys(vec![export("!a:b", "s1", 0)]).await.unwrap(), 1);

        let counts = store.room_key_counts().await.unwrap();
        assert_eq!(counts, RoomKeyCounts { total: 1, backed_up: 0 });
    }

    #[tokio::test]
    async fn backup_markers() {
        let store = MemoryStore::new();
        store
            .save_room_keys(vec![export("!a:b", "s1", 0), export("!a:b", "s2", 0)])
            .await
            .unwrap();

        let pending = store.room_keys_to_backup(10).await.unwrap();
        assert_eq!(pending.len(), 2);

        store
            .mark_room_keys_as_backed_up(&[("!a:b".into(), "s1".to_owned())])
            .await
            .unwrap();

        assert_eq!(store.room_keys_to_backup(10).await.unwrap().len(), 1);
        assert_eq!(
            store.room_key_counts().await.unwrap(),
            RoomKeyCounts { total: 2, backed_up: 1 }
        );

        store.reset_backup_state().await.unwrap();
        assert_eq!(store.room_keys_to_backup(10).await.unwrap().len(), 2);
    }
}
