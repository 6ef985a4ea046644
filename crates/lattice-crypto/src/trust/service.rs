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

//! The caller-facing cross-signing service.
//!
//! Wraps the pure trust engine with store access and the mutating flows:
//! signing another user's master key, signing one of our own devices, and
//! marking key material as manually verified. Every mutation schedules the
//! [`TrustUpdater`] so derived trust catches up in the background.

use std::sync::Arc;

use tracing::{info, instrument};

use crate::{
    error::TrustError,
    sign::SigningKey,
    store::DynCryptoStore,
    trust::{engine, TrustUpdater},
    types::{
        DeviceTrustResult, OwnedDeviceId, OwnedKeyId, OwnedRoomId, OwnedUserId, RoomTrustLevel,
        UserTrustResult, ED25519,
    },
};

/// The entry point for everything cross-signing.
#[derive(Debug)]
pub struct CrossSigningService {
    store: Arc<DynCryptoStore>,
    my_user_id: OwnedUserId,
    updater: TrustUpdater,
}

impl CrossSigningService {
    /// Create the service and its background trust updater.
    pub fn new(store: Arc<DynCryptoStore>, my_user_id: OwnedUserId) -> Self {
        let updater = TrustUpdater::new(store.clone(), my_user_id.clone());

        Self { store, my_user_id, updater }
    }

    /// The id of the local user.
    pub fn user_id(&self) -> &OwnedUserId {
        &self.my_user_id
    }

    /// Check the trust in our own cross-signing identity.
    pub async fn check_self_trust(&self) -> Result<UserTrustResult, TrustError> {
        let Some(identity) = self.store.get_user_identity(&self.my_user_id).await? else {
            return Ok(UserTrustResult::CrossSigningNotConfigured(self.my_user_id.clone()));
        };

        let own_devices = self.store.get_user_devices(&self.my_user_id).await?;
        let private_keys = self.store.private_cross_signing_keys().await?;

        Ok(engine::check_self_trust(&identity, &own_devices, private_keys.as_ref()))
    }

    /// Check the trust in another user's identity.
    pub async fn check_user_trust(
        &self,
        user_id: &OwnedUserId,
    ) -> Result<UserTrustResult, TrustError> {
        if user_id == &self.my_user_id {
            return self.check_self_trust().await;
        }

        let Some(my_identity) = self.store.get_user_identity(&self.my_user_id).await? else {
            return Ok(UserTrustResult::CrossSigningNotConfigured(self.my_user_id.clone()));
        };
        let Some(other_identity) = self.store.get_user_identity(user_id).await? else {
            return Ok(UserTrustResult::UnknownCrossSigningInfo(user_id.clone()));
        };

        Ok(engine::check_other_user_trust(&my_identity, &other_identity))
    }

    /// Check the trust in a single device.
    pub async fn check_device_trust(
        &self,
        user_id: &OwnedUserId,
        device_id: &OwnedDeviceId,
    ) -> Result<DeviceTrustResult, TrustError> {
        let Some(device) = self.store.get_device(user_id, device_id).await? else {
            return Err(TrustError::UnknownDevice(user_id.clone(), device_id.clone()));
        };

        let Some(my_identity) = self.store.get_user_identity(&self.my_user_id).await? else {
            return Ok(DeviceTrustResult::CrossSigningNotConfigured(self.my_user_id.clone()));
        };

        let owner_identity = self.store.get_user_identity(user_id).await?;

        Ok(engine::check_device_trust(&my_identity, owner_identity.as_ref(), &device))
    }

    /// Sign another user's master key with our user-signing key, marking the
    /// user as verified.
    #[instrument(skip(self))]
    pub async fn trust_user(&self, user_id: &OwnedUserId) -> Result<(), TrustError> {
        let user_signing = self.user_signing_key().await?;

        let Some(mut identity) = self.store.get_user_identity(user_id).await? else {
            return Err(TrustError::UnknownIdentity(user_id.clone()));
        };
        let Some(master) = &mut identity.master_key else {
            return Err(TrustError::UnknownIdentity(user_id.clone()));
        };

        let signature = user_signing.sign_json(&master.signable_json())?;
        master.add_signature(
            self.my_user_id.clone(),
            OwnedKeyId::from_parts(ED25519, &user_signing.public_key_base64()),
            signature.to_base64(),
        );

        info!(%user_id, "Signed a user's master key with our user-signing key");
        self.store.save_user_identity(identity).await?;

        self.updater.schedule([user_id.clone()]);

        Ok(())
    }

    /// Sign one of our own devices with our self-signing key and mark it as
    /// locally verified.
    #[instrument(skip(self))]
    pub async fn trust_device(&self, device_id: &OwnedDeviceId) -> Result<(), TrustError> {
        let self_signing = self.self_signing_key().await?;

        let Some(mut device) = self.store.get_device(&self.my_user_id, device_id).await? else {
            return Err(TrustError::UnknownDevice(self.my_user_id.clone(), device_id.clone()));
        };

        let signature = self_signing.sign_json(&device.signable_json())?;
        device.add_signature(
            self.my_user_id.clone(),
            OwnedKeyId::from_parts(ED25519, &self_signing.public_key_base64()),
            signature.to_base64(),
        );
        device.trust.locally_verified = true;

        info!(%device_id, "Signed one of our own devices with our self-signing key");
        self.store.save_device(device).await?;

        self.updater.schedule([self.my_user_id.clone()]);

        Ok(())
    }

    /// Mark our own master key as manually verified.
    pub async fn mark_my_master_key_as_trusted(&self) -> Result<(), TrustError> {
        let Some(mut identity) = self.store.get_user_identity(&self.my_user_id).await? else {
            return Err(TrustError::UnknownIdentity(self.my_user_id.clone()));
        };

        identity.trust.locally_verified = true;
        self.store.save_user_identity(identity).await?;

        self.updater.schedule([self.my_user_id.clone()]);

        Ok(())
    }

    /// Check whether the private seeds in the store regenerate our published
    /// public keys, and mark the identity as verified if the master seed
    /// does.
    ///
    /// This is the flow behind importing cross-signing keys from secret
    /// storage or another device.
    pub async fn check_trust_from_private_keys(&self) -> Result<UserTrustResult, TrustError> {
        let Some(mut identity) = self.store.get_user_identity(&self.my_user_id).await? else {
            return Ok(UserTrustResult::CrossSigningNotConfigured(self.my_user_id.clone()));
        };

        let Some(private_keys) = self.store.private_cross_signing_keys().await? else {
            return Ok(UserTrustResult::KeysNotTrusted(Box::new(identity)));
        };

        let master_public_key = identity.master_key.as_ref().and_then(|k| k.first_key());

        let matches = match (private_keys.master_key.as_deref(), master_public_key) {
            (Some(seed), Some(public_key)) => SigningKey::from_base64(seed)
                .is_ok_and(|key| key.public_key_base64() == public_key),
            _ => false,
        };

        if !matches {
            return Ok(UserTrustResult::KeysNotTrusted(Box::new(identity)));
        }

        if !identity.trust.locally_verified {
            info!("The master seed matches our published master key, marking it as verified");
            identity.trust.locally_verified = true;
            self.store.save_user_identity(identity).await?;
            self.updater.schedule([self.my_user_id.clone()]);
        }

        Ok(UserTrustResult::Success)
    }

    /// Tell the service that the given users' device lists or cross-signing
    /// keys changed. Derived trust is recomputed in the background.
    pub fn on_users_updated(&self, users: impl IntoIterator<Item = OwnedUserId>) {
        self.updater.schedule(users);
    }

    /// Wait for all currently scheduled trust recomputation to finish.
    pub async fn flush_trust_updates(&self) -> Result<(), TrustError> {
        Ok(self.updater.process_pending().await?)
    }

    /// The denormalized trust level of a room.
    pub async fn room_trust_level(
        &self,
        room_id: &OwnedRoomId,
    ) -> Result<RoomTrustLevel, TrustError> {
        Ok(self
            .store
            .get_room_summary(room_id)
            .await?
            .map(|s| s.trust_level)
            .unwrap_or_default())
    }

    async fn user_signing_key(&self) -> Result<SigningKey, TrustError> {
        let seed = self
            .store
            .private_cross_signing_keys()
            .await?
            .and_then(|keys| keys.user_signing_key.clone())
            .ok_or(TrustError::Signature(crate::error::SignatureError::MissingSigningKey))?;

        Ok(SigningKey::from_base64(&seed)
            .map_err(|_| crate::error::SignatureError::MissingSigningKey)?)
    }

    async fn self_signing_key(&self) -> Result<SigningKey, TrustError> {
        let seed = self
            .store
            .private_cross_signing_keys()
            .await?
            .and_then(|keys| keys.self_signing_key.clone())
            .ok_or(TrustError::Signature(crate::error::SignatureError::MissingSigningKey))?;

        Ok(SigningKey::from_base64(&seed)
            .map_err(|_| crate::error::SignatureError::MissingSigningKey)?)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::{
        error::TrustError,
        store::{CryptoStore, IntoCryptoStore, MemoryStore},
        testing::{signed_device, IdentityFixture},
        types::DeviceTrustLevel,
    };

    async fn service_with_alice() -> (CrossSigningService, IdentityFixture) {
        let store = MemoryStore::new().into_crypto_store();
        let alice = IdentityFixture::new("@alice:localhost");

        store.save_user_identity(alice.identity.clone()).await.unwrap();
        store.save_private_cross_signing_keys(alice.private_keys()).await.unwrap();

        let service = CrossSigningService::new(store, "@alice:localhost".into());

        (service, alice)
    }

    #[tokio::test]
    async fn trusting_a_user_creates_a_verifiable_signature() {
        let (service, _alice) = service_with_alice().await;
        service.mark_my_master_key_as_trusted().await.unwrap();

        let bob = IdentityFixture::new("@bob:localhost");
        service.store.save_user_identity(bob.identity.clone()).await.unwrap();

        assert_matches!(
            service.check_user_trust(&"@bob:localhost".into()).await.unwrap(),
            UserTrustResult::KeyNotSigned(_)
        );

        service.trust_user(&"@bob:localhost".into()).await.unwrap();
        service.flush_trust_updates().await.unwrap();

        assert!(service.check_user_trust(&"@bob:localhost".into()).await.unwrap().is_success());

        let bob_identity = service
            .store
            .get_user_identity(&"@bob:localhost".into())
            .await
            .unwrap()
            .unwrap();
        assert!(bob_identity.trust.cross_signing_verified);
    }

    #[tokio::test]
    async fn trusting_an_own_device_signs_it() {
        let (service, alice) = service_with_alice().await;
        service.mark_my_master_key_as_trusted().await.unwrap();

        let (mut device, _) = signed_device(&alice, "ALICETABLET");
        device.signatures.clear();
        service.store.save_device(device).await.unwrap();

        service.trust_device(&"ALICETABLET".into()).await.unwrap();
        service.flush_trust_updates().await.unwrap();

        let result = service
            .check_device_trust(&"@alice:localhost".into(), &"ALICETABLET".into())
            .await
            .unwrap();
        assert_matches!(
            result,
            DeviceTrustResult::Success(DeviceTrustLevel { cross_signing_verified: true, .. })
        );
    }

    #[tokio::test]
    async fn trust_user_without_private_keys_fails() {
        let store = MemoryStore::new().into_crypto_store();
        let service = CrossSigningService::new(store, "@alice:localhost".into());

        assert_matches!(
            service.trust_user(&"@bob:localhost".into()).await,
            Err(TrustError::Signature(_))
        );
    }

    #[tokio::test]
    async fn private_key_check_marks_our_identity() {
        let (service, _alice) = service_with_alice().await;

        assert!(service.check_trust_from_private_keys().await.unwrap().is_success());

        let identity = service
            .store
            .get_user_identity(&"@alice:localhost".into())
            .await
            .unwrap()
            .unwrap();
        assert!(identity.trust.locally_verified);
    }
}
