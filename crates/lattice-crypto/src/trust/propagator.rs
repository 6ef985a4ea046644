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

//! Background propagation of trust changes.
//!
//! Whenever the local user's cross-signing identity or some users' devices
//! change, every piece of derived trust downstream of the change has to be
//! recomputed: other users' identities, their devices, and the shields of the
//! rooms those users are in. This runs as a single background worker over a
//! coalescing pending set, so bursts of device-list updates collapse into one
//! recomputation pass.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Arc, Mutex as StdMutex},
};

use tokio::sync::Notify;
use tracing::{debug, instrument, trace, warn};

use crate::{
    error::CryptoStoreError,
    store::{DynCryptoStore, RoomSummary},
    trust::{engine, room::compute_room_trust},
    types::{DeviceInfo, DeviceTrustLevel, OwnedUserId, UserIdentity},
};

/// The background worker recomputing derived trust state.
///
/// Scheduling the same users repeatedly while a pass is in flight is cheap,
/// the pending sets are unioned and picked up by the next pass. Dropping the
/// updater stops the worker.
#[derive(Debug)]
pub struct TrustUpdater {
    inner: Arc<UpdaterInner>,
    task: tokio::task::JoinHandle<()>,
}

#[derive(Debug)]
struct UpdaterInner {
    store: Arc<DynCryptoStore>,
    my_user_id: OwnedUserId,
    pending: StdMutex<BTreeSet<OwnedUserId>>,
    notify: Notify,
}

impl Drop for TrustUpdater {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl TrustUpdater {
    /// Create the updater and spawn its worker task.
    pub fn new(store: Arc<DynCryptoStore>, my_user_id: OwnedUserId) -> Self {
        let inner = Arc::new(UpdaterInner {
            store,
            my_user_id,
            pending: Default::default(),
            notify: Notify::new(),
        });

        let task = tokio::spawn(listen(inner.clone()));

        Self { inner, task }
    }

    /// Queue a set of users whose trust state needs recomputing.
    pub fn schedule(&self, users: impl IntoIterator<Item = OwnedUserId>) {
        self.inner
            .pending
            .lock()
            .expect("the pending set shouldn't be poisoned")
            .extend(users);
        self.inner.notify.notify_one();
    }

    /// Drain the pending set and recompute now, instead of waiting for the
    /// worker. Processing is idempotent, racing the worker is harmless.
    pub async fn process_pending(&self) -> Result<(), CryptoStoreError> {
        while let Some(users) = self.inner.take_pending() {
            self.inner.update_trust(users).await?;
        }

        Ok(())
    }
}

async fn listen(inner: Arc<UpdaterInner>) {
    loop {
        inner.notify.notified().await;

        while let Some(users) = inner.take_pending() {
            if let Err(error) = inner.update_trust(users).await {
                warn!(?error, "Couldn't recompute the trust state");
            }
        }
    }
}

impl UpdaterInner {
    fn take_pending(&self) -> Option<BTreeSet<OwnedUserId>> {
        let mut pending =
            self.pending.lock().expect("the pending set shouldn't be poisoned");

        if pending.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut *pending))
        }
    }

    #[instrument(skip(self), fields(user_count = users.len()))]
    async fn update_trust(
        &self,
        mut users: BTreeSet<OwnedUserId>,
    ) -> Result<(), CryptoStoreError> {
        // A change to our own root keys invalidates everyone's derived
        // trust, so the self check runs first and the pass expands to every
        // known user.
        if users.contains(&self.my_user_id) {
            self.update_self_trust().await?;
            users.extend(self.store.known_users().await?);
        }

        let my_identity = self.store.get_user_identity(&self.my_user_id).await?;

        for user_id in &users {
            if user_id != &self.my_user_id {
                self.update_user_trust(my_identity.as_ref(), user_id).await?;
            }

            self.update_device_trust(my_identity.as_ref(), user_id).await?;
        }

        self.update_room_trust(my_identity.as_ref(), &users).await?;

        Ok(())
    }

    async fn update_self_trust(&self) -> Result<(), CryptoStoreError> {
        let Some(mut identity) = self.store.get_user_identity(&self.my_user_id).await? else {
            return Ok(());
        };

        let own_devices = self.store.get_user_devices(&self.my_user_id).await?;
        let private_keys = self.store.private_cross_signing_keys().await?;

        let result = engine::check_self_trust(&identity, &own_devices, private_keys.as_ref());
        let verified = result.is_success();

        if identity.trust.cross_signing_verified != verified {
            debug!(verified, "Our own cross-signing trust changed");
            identity.trust.cross_signing_verified = verified;
            self.store.save_user_identity(identity).await?;
        }

        Ok(())
    }

    async fn update_user_trust(
        &self,
        my_identity: Option<&UserIdentity>,
        user_id: &OwnedUserId,
    ) -> Result<(), CryptoStoreError> {
        let Some(mut identity) = self.store.get_user_identity(user_id).await? else {
            return Ok(());
        };

        let verified = my_identity
            .is_some_and(|me| engine::check_other_user_trust(me, &identity).is_success());

        if identity.trust.cross_signing_verified != verified {
            debug!(%user_id, verified, "A user's cross-signing trust changed");
            identity.trust.cross_signing_verified = verified;
            self.store.save_user_identity(identity).await?;
        }

        Ok(())
    }

    async fn update_device_trust(
        &self,
        my_identity: Option<&UserIdentity>,
        user_id: &OwnedUserId,
    ) -> Result<(), CryptoStoreError> {
        let owner_identity = self.store.get_user_identity(user_id).await?;

        for device in self.store.get_user_devices(user_id).await? {
            let new_trust = derived_device_trust(my_identity, owner_identity.as_ref(), &device);

            if new_trust != device.trust {
                trace!(%user_id, device_id = %device.device_id, ?new_trust, "A device's trust changed");
                self.store.set_device_trust(user_id, &device.device_id, new_trust).await?;
            }
        }

        Ok(())
    }

    async fn update_room_trust(
        &self,
        my_identity: Option<&UserIdentity>,
        users: &BTreeSet<OwnedUserId>,
    ) -> Result<(), CryptoStoreError> {
        let cross_signing_enabled = my_identity.is_some_and(|i| i.master_key.is_some());

        for summary in self.store.get_room_summaries().await? {
            if !summary.members.iter().any(|m| users.contains(m)) {
                continue;
            }

            // One broken room must not poison the rest of the batch.
            if let Err(error) = self.update_single_room(cross_signing_enabled, &summary).await {
                warn!(room_id = %summary.room_id, ?error, "Couldn't update the room's trust level");
            }
        }

        Ok(())
    }

    async fn update_single_room(
        &self,
        cross_signing_enabled: bool,
        summary: &RoomSummary,
    ) -> Result<(), CryptoStoreError> {
        let mut identities: BTreeMap<OwnedUserId, UserIdentity> = Default::default();
        let mut devices: BTreeMap<OwnedUserId, Vec<DeviceInfo>> = Default::default();

        for member in &summary.members {
            if let Some(identity) = self.store.get_user_identity(member).await? {
                identities.insert(member.clone(), identity);
            }
            devices.insert(member.clone(), self.store.get_user_devices(member).await?);
        }

        let trust_level = compute_room_trust(
            &self.my_user_id,
            cross_signing_enabled,
            summary.is_direct,
            &summary.members,
            &identities,
            &devices,
        );

        if trust_level != summary.trust_level {
            debug!(room_id = %summary.room_id, ?trust_level, "A room's trust level changed");
            self.store.set_room_trust_level(&summary.room_id, trust_level).await?;
        }

        Ok(())
    }
}

fn derived_device_trust(
    my_identity: Option<&UserIdentity>,
    owner_identity: Option<&UserIdentity>,
    device: &DeviceInfo,
) -> DeviceTrustLevel {
    match my_identity {
        Some(my_identity) => engine::check_device_trust(my_identity, owner_identity, device)
            .trust_level()
            .unwrap_or(DeviceTrustLevel {
                cross_signing_verified: false,
                locally_verified: device.trust.locally_verified,
            }),
        None => DeviceTrustLevel {
            cross_signing_verified: false,
            locally_verified: device.trust.locally_verified,
        },
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::{
        backups::{keys::BackupRecoveryKey, BackupVersion},
        store::{
            CryptoStore, IntoCryptoStore, MemoryStore, RoomKeyCounts, RoomKeyExport, RoomSummary,
        },
        testing::{signed_device, IdentityFixture},
        types::{
            OwnedDeviceId, OwnedRoomId, PrivateCrossSigningKeys, RoomTrustLevel, UserTrustLevel,
        },
    };

    /// A store wrapper counting trust writes.
    #[derive(Debug)]
    struct CountingStore {
        inner: MemoryStore,
        trust_writes: AtomicUsize,
    }

    impl CountingStore {
        fn new() -> Self {
            Self { inner: MemoryStore::new(), trust_writes: AtomicUsize::new(0) }
        }

        fn trust_writes(&self) -> usize {
            self.trust_writes.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CryptoStore for CountingStore {
        async fn get_user_identity(
            &self,
            user_id: &OwnedUserId,
        ) -> Result<Option<UserIdentity>, CryptoStoreError> {
            self.inner.get_user_identity(user_id).await
        }

        async fn save_user_identity(
            &self,
            identity: UserIdentity,
        ) -> Result<(), CryptoStoreError> {
            self.trust_writes.fetch_add(1, Ordering::SeqCst);
            self.inner.save_user_identity(identity).await
        }

        async fn known_users(&self) -> Result<Vec<OwnedUserId>, CryptoStoreError> {
            self.inner.known_users().await
        }

        async fn get_user_devices(
            &self,
            user_id: &OwnedUserId,
        ) -> Result<Vec<DeviceInfo>, CryptoStoreError> {
            self.inner.get_user_devices(user_id).await
        }

        async fn get_device(
            &self,
            user_id: &OwnedUserId,
            device_id: &OwnedDeviceId,
        ) -> Result<Option<DeviceInfo>, CryptoStoreError> {
            self.inner.get_device(user_id, device_id).await
        }

        async fn save_device(&self, device: DeviceInfo) -> Result<(), CryptoStoreError> {
            self.inner.save_device(device).await
        }

        async fn set_device_trust(
            &self,
            user_id: &OwnedUserId,
            device_id: &OwnedDeviceId,
            trust: DeviceTrustLevel,
        ) -> Result<(), CryptoStoreError> {
            self.trust_writes.fetch_add(1, Ordering::SeqCst);
            self.inner.set_device_trust(user_id, device_id, trust).await
        }

        async fn private_cross_signing_keys(
            &self,
        ) -> Result<Option<PrivateCrossSigningKeys>, CryptoStoreError> {
            self.inner.private_cross_signing_keys().await
        }

        async fn save_private_cross_signing_keys(
            &self,
            keys: PrivateCrossSigningKeys,
        ) -> Result<(), CryptoStoreError> {
            self.inner.save_private_cross_signing_keys(keys).await
        }

        async fn get_room_summary(
            &self,
            room_id: &OwnedRoomId,
        ) -> Result<Option<RoomSummary>, CryptoStoreError> {
            self.inner.get_room_summary(room_id).await
        }

        async fn save_room_summary(&self, summary: RoomSummary) -> Result<(), CryptoStoreError> {
            self.inner.save_room_summary(summary).await
        }

        async fn get_room_summaries(&self) -> Result<Vec<RoomSummary>, CryptoStoreError> {
            self.inner.get_room_summaries().await
        }

        async fn set_room_trust_level(
            &self,
            room_id: &OwnedRoomId,
            trust_level: RoomTrustLevel,
        ) -> Result<(), CryptoStoreError> {
            self.trust_writes.fetch_add(1, Ordering::SeqCst);
            self.inner.set_room_trust_level(room_id, trust_level).await
        }

        async fn backup_version(&self) -> Result<Option<BackupVersion>, CryptoStoreError> {
            self.inner.backup_version().await
        }

        async fn save_backup_version(
            &self,
            version: Option<&BackupVersion>,
        ) -> Result<(), CryptoStoreError> {
            self.inner.save_backup_version(version).await
        }

        async fn recovery_key(&self) -> Result<Option<BackupRecoveryKey>, CryptoStoreError> {
            self.inner.recovery_key().await
        }

        async fn save_recovery_key(
            &self,
            key: Option<&BackupRecoveryKey>,
        ) -> Result<(), CryptoStoreError> {
            self.inner.save_recovery_key(key).await
        }

        async fn save_room_keys(
            &self,
            keys: Vec<RoomKeyExport>,
        ) -> Result<usize, CryptoStoreError> {
            self.inner.save_room_keys(keys).await
        }

        async fn room_keys_to_backup(
            &self,
            limit: usize,
        ) -> Result<Vec<RoomKeyExport>, CryptoStoreError> {
            self.inner.room_keys_to_backup(limit).await
        }

        async fn mark_room_keys_as_backed_up(
            &self,
            sessions: &[(OwnedRoomId, String)],
        ) -> Result<(), CryptoStoreError> {
            self.inner.mark_room_keys_as_backed_up(sessions).await
        }

        async fn reset_backup_state(&self) -> Result<(), CryptoStoreError> {
            self.inner.reset_backup_state().await
        }

        async fn room_key_counts(&self) -> Result<RoomKeyCounts, CryptoStoreError> {
            self.inner.room_key_counts().await
        }
    }

    async fn seed_store(store: &dyn CryptoStore) {
        let alice = IdentityFixture::new("@alice:localhost");
        let mut bob = IdentityFixture::new("@bob:localhost");
        alice.sign_user(&mut bob);

        let (bob_device, _) = signed_device(&bob, "BOBPHONE");
        let (alice_device, _) = signed_device(&alice, "ALICEPHONE");

        store.save_user_identity(alice.identity.clone()).await.unwrap();
        store.save_user_identity(bob.identity.clone()).await.unwrap();
        store.save_private_cross_signing_keys(alice.private_keys()).await.unwrap();
        store.save_device(alice_device).await.unwrap();
        store.save_device(bob_device).await.unwrap();

        store
            .save_room_summary(RoomSummary {
                room_id: "!room:localhost".into(),
                is_direct: true,
                members: vec!["@alice:localhost".into(), "@bob:localhost".into()],
                trust_level: RoomTrustLevel::Default,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn a_self_trust_change_fans_out_to_everything() {
        let store = MemoryStore::new().into_crypto_store();
        seed_store(store.as_ref()).await;

        let updater = TrustUpdater::new(store.clone(), "@alice:localhost".into());
        updater.schedule(["@alice:localhost".into()]);
        updater.process_pending().await.unwrap();

        let alice = store.get_user_identity(&"@alice:localhost".into()).await.unwrap().unwrap();
        assert_eq!(
            alice.trust,
            UserTrustLevel { cross_signing_verified: true, locally_verified: false }
        );

        let bob = store.get_user_identity(&"@bob:localhost".into()).await.unwrap().unwrap();
        assert!(bob.trust.cross_signing_verified);

        let bob_device = store
            .get_device(&"@bob:localhost".into(), &"BOBPHONE".into())
            .await
            .unwrap()
            .unwrap();
        assert!(bob_device.trust.cross_signing_verified);

        let room =
            store.get_room_summary(&"!room:localhost".into()).await.unwrap().unwrap();
        assert_eq!(room.trust_level, RoomTrustLevel::Trusted);
    }

    #[tokio::test]
    async fn reruns_do_not_write_again() {
        let store = CountingStore::new();
        seed_store(&store).await;
        let store = Arc::new(store);

        let updater =
            TrustUpdater::new(store.clone().into_crypto_store(), "@alice:localhost".into());

        updater.schedule(["@alice:localhost".into()]);
        updater.process_pending().await.unwrap();

        let writes_after_first_pass = store.trust_writes();
        assert!(writes_after_first_pass > 0);

        // Same input, nothing changed, nothing to persist.
        updater.schedule(["@alice:localhost".into()]);
        updater.process_pending().await.unwrap();

        assert_eq!(store.trust_writes(), writes_after_first_pass);
    }

    #[tokio::test]
    async fn device_updates_only_touch_the_affected_users() {
        let store = MemoryStore::new().into_crypto_store();
        seed_store(store.as_ref()).await;

        let updater = TrustUpdater::new(store.clone(), "@alice:localhost".into());

        // Establish the baseline.
        updater.schedule(["@alice:localhost".into()]);
        updater.process_pending().await.unwrap();

        // Bob logs in a new, unsigned device.
        let bob = IdentityFixture::new("@bob:localhost");
        let (mut rogue, _) = signed_device(&bob, "BOBROGUE");
        rogue.signatures.clear();
        store.save_device(rogue).await.unwrap();

        updater.schedule(["@bob:localhost".into()]);
        updater.process_pending().await.unwrap();

        let room =
            store.get_room_summary(&"!room:localhost".into()).await.unwrap().unwrap();
        assert_eq!(room.trust_level, RoomTrustLevel::Warning);
    }
}
