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

//! Device key types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{
    cross_signing::SignatureMap,
    ids::{OwnedDeviceId, OwnedKeyId, OwnedUserId, ED25519},
};

/// The trust we have in a single device.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceTrustLevel {
    /// Is the device signed by its owner's self-signing key, with the owner's
    /// identity itself trusted.
    pub cross_signing_verified: bool,
    /// Did the local user manually verify this device.
    pub locally_verified: bool,
}

impl DeviceTrustLevel {
    /// A trust level with both flags set to false.
    pub fn untrusted() -> Self {
        Default::default()
    }

    /// Is the device verified through either path.
    pub fn is_verified(&self) -> bool {
        self.cross_signing_verified || self.locally_verified
    }
}

/// The public key material and trust state of a single device.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// The user the device belongs to.
    pub user_id: OwnedUserId,

    /// The id of the device.
    pub device_id: OwnedDeviceId,

    /// The encryption algorithms the device supports.
    #[serde(default)]
    pub algorithms: Vec<String>,

    /// The device's public keys, keyed by `<algorithm>:<device id>`.
    pub keys: BTreeMap<OwnedKeyId, String>,

    /// Signatures over the device's key material.
    #[serde(default, skip_serializing_if = "SignatureMap::is_empty")]
    pub signatures: SignatureMap,

    /// Our local trust in the device. Not part of the signed payload.
    #[serde(default)]
    pub trust: DeviceTrustLevel,

    /// A user-chosen name for the device.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl DeviceInfo {
    /// The device's Ed25519 identity key, if it advertises one.
    pub fn fingerprint(&self) -> Option<&str> {
        let key_id = OwnedKeyId::from_parts(ED25519, self.device_id.as_str());
        self.keys.get(&key_id).map(|k| k.as_str())
    }

    /// The JSON form of the device that signatures are created over.
    ///
    /// Trust flags and display name are local bookkeeping and are not part of
    /// the signed payload.
    pub fn signable_json(&self) -> Value {
        json!({
            "user_id": self.user_id,
            "device_id": self.device_id,
            "algorithms": self.algorithms,
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

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn device() -> DeviceInfo {
        serde_json::from_value(json!({
            "user_id": "@alice:localhost",
            "device_id": "LVWOVGOXME",
            "algorithms": ["m.olm.v1.curve25519-aes-sha2", "m.megolm.v1.aes-sha2"],
            "keys": {
                "curve25519:LVWOVGOXME": "KMfWKUhnDW1D11hNzATs/Ax1FQRsJxKCWzq6NyyWmhs",
                "ed25519:LVWOVGOXME": "k+NC3L7CBD6fBUSWm9XE75yfeb8t6nNfZSnOMwqqhoo"
            }
        }))
        .unwrap()
    }

    #[test]
    fn fingerprint_is_the_ed25519_key() {
        assert_eq!(device().fingerprint(), Some("k+NC3L7CBD6fBUSWm9XE75yfeb8t6nNfZSnOMwqqhoo"));
    }

    #[test]
    fn signable_json_excludes_local_state() {
        let mut device = device();
        device.trust.locally_verified = true;
        device.display_name = Some("phone".to_owned());

        let signable = device.signable_json();

        assert!(signable.get("trust").is_none());
        assert!(signable.get("display_name").is_none());
        assert!(signable.get("keys").is_some());
    }
}
