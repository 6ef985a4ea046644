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

//! Helpers to build complete, really-signed identities and devices for
//! tests.

use std::collections::BTreeMap;

use crate::{
    sign::SigningKey,
    types::{
        CrossSigningKey, DeviceInfo, KeyUsage, OwnedKeyId, PrivateCrossSigningKeys, UserIdentity,
        ED25519,
    },
};

/// A user identity together with the private halves of its key triple.
#[derive(Debug)]
pub struct IdentityFixture {
    /// The public identity, with valid master signatures on both subkeys.
    pub identity: UserIdentity,
    /// The private master key.
    pub master: SigningKey,
    /// The private self-signing key.
    pub self_signing: SigningKey,
    /// The private user-signing key.
    pub user_signing: SigningKey,
}

impl IdentityFixture {
    /// Create a fresh identity for the given user, with no trust flags set.
    pub fn new(user_id: &str) -> Self {
        let master = SigningKey::generate();
        let self_signing = SigningKey::generate();
        let user_signing = SigningKey::generate();

        let master_key =
            CrossSigningKey::new(user_id.into(), KeyUsage::Master, &master.public_key_base64());

        let mut self_signing_key = CrossSigningKey::new(
            user_id.into(),
            KeyUsage::SelfSigning,
            &self_signing.public_key_base64(),
        );
        let mut user_signing_key = CrossSigningKey::new(
            user_id.into(),
            KeyUsage::UserSigning,
            &user_signing.public_key_base64(),
        );

        let master_key_id = OwnedKeyId::from_parts(ED25519, &master.public_key_base64());

        for subkey in [&mut self_signing_key, &mut user_signing_key] {
            let signature = master
                .sign_json(&subkey.signable_json())
                .expect("a signable subkey serializes");
            subkey.add_signature(user_id.into(), master_key_id.clone(), signature.to_base64());
        }

        let identity = UserIdentity {
            user_id: user_id.into(),
            master_key: Some(master_key),
            self_signing_key: Some(self_signing_key),
            user_signing_key: Some(user_signing_key),
            trust: Default::default(),
        };

        Self { identity, master, self_signing, user_signing }
    }

    /// The private key triple, as it would sit in the store.
    pub fn private_keys(&self) -> PrivateCrossSigningKeys {
        PrivateCrossSigningKeys {
            master_key: Some(self.master.to_base64()),
            self_signing_key: Some(self.self_signing.to_base64()),
            user_signing_key: Some(self.user_signing.to_base64()),
        }
    }

    /// Sign another user's master key with our user-signing key, the way
    /// verifying that user would.
    pub fn sign_user(&self, other: &mut IdentityFixture) {
        let other_master =
            other.identity.master_key.as_mut().expect("the fixture has a master key");

        let signature = self
            .user_signing
            .sign_json(&other_master.signable_json())
            .expect("a signable master key serializes");

        other_master.add_signature(
            self.identity.user_id.clone(),
            OwnedKeyId::from_parts(ED25519, &self.user_signing.public_key_base64()),
            signature.to_base64(),
        );
    }

    /// Sign a device with our self-signing key.
    pub fn sign_device(&self, device: &mut DeviceInfo) {
        let signature = self
            .self_signing
            .sign_json(&device.signable_json())
            .expect("a signable device serializes");

        device.add_signature(
            self.identity.user_id.clone(),
            OwnedKeyId::from_parts(ED25519, &self.self_signing.public_key_base64()),
            signature.to_base64(),
        );
    }
}

/// A device with a real Ed25519 identity key and no signatures.
pub fn unsigned_device(user_id: &str, device_id: &str) -> DeviceInfo {
    let (device, _) = device_with_key(user_id, device_id);
    device
}

/// A device with a real Ed25519 identity key, self-signed by the owner's
/// self-signing key. Also returns the device's private signing key.
pub fn signed_device(owner: &IdentityFixture, device_id: &str) -> (DeviceInfo, SigningKey) {
    let (mut device, key) = device_with_key(owner.identity.user_id.as_str(), device_id);
    owner.sign_device(&mut device);

    (device, key)
}

fn device_with_key(user_id: &str, device_id: &str) -> (DeviceInfo, SigningKey) {
    let key = SigningKey::generate();

    let keys = BTreeMap::from([(
        OwnedKeyId::from_parts(ED25519, device_id),
        key.public_key_base64(),
    )]);

    let device = DeviceInfo {
        user_id: user_id.into(),
        device_id: device_id.into(),
        algorithms: vec!["m.olm.v1.curve25519-aes-sha2".to_owned()],
        keys,
        signatures: Default::default(),
        trust: Default::default(),
        display_name: None,
    };

    (device, key)
}
