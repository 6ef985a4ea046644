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

//! The cross-signing trust engine.
//!
//! Pure signature-chain checks, no I/O and no mutation. Callers are
//! responsible for persisting the results. The chain being checked:
//!
//! ```text
//!               ┌────────────┐  signs   ┌──────────────────┐
//!               │ Master key ├─────────►│ Self-signing key │──signs──► own devices
//!               └─────┬──────┘          └──────────────────┘
//!                     │ signs
//!                     ▼
//!               ┌──────────────────┐  signs   ┌─────────────────────┐
//!               │ User-signing key ├─────────►│ other users' Master │
//!               └──────────────────┘          └─────────────────────┘
//! ```
//!
//! The master key itself is trusted if we hold its private seed, if the user
//! marked it as verified, or if one of our own locally verified devices
//! signed it.

use tracing::trace;

use crate::{
    sign::{verify_json_signature, SigningKey},
    types::{
        CrossSigningKey, DeviceInfo, DeviceTrustLevel, DeviceTrustResult, OwnedKeyId,
        PrivateCrossSigningKeys, UserIdentity, UserTrustResult, ED25519,
    },
};

/// Check the trust in the local user's own cross-signing identity.
///
/// The master key is trusted if any of three independent sources vouches for
/// it; the user-signing and self-signing keys must then each carry a valid
/// master-key signature over their canonical signable form.
pub fn check_self_trust(
    identity: &UserIdentity,
    own_devices: &[DeviceInfo],
    private_keys: Option<&PrivateCrossSigningKeys>,
) -> UserTrustResult {
    let Some(master) = &identity.master_key else {
        return UserTrustResult::CrossSigningNotConfigured(identity.user_id.clone());
    };

    let master_trusted = identity.trust.locally_verified
        || private_seed_matches(private_keys.and_then(|k| k.master_key.as_deref()), master)
        || signed_by_verified_device(master, own_devices);

    if !master_trusted {
        return UserTrustResult::KeysNotTrusted(Box::new(identity.clone()));
    }

    for subkey in [&identity.user_signing_key, &identity.self_signing_key] {
        let Some(subkey) = subkey else {
            return UserTrustResult::CrossSigningNotConfigured(identity.user_id.clone());
        };

        if let Err(failure) = check_master_signature(master, subkey) {
            return failure;
        }
    }

    UserTrustResult::Success
}

/// Check whether another user's identity is trusted by the local user.
///
/// The only cross-user trust edge is the local user-signing key's signature
/// on the other user's master key. The other user's self-signing and device
/// keys are never inspected here.
pub fn check_other_user_trust(
    my_identity: &UserIdentity,
    other_identity: &UserIdentity,
) -> UserTrustResult {
    if !my_identity.is_verified() {
        return UserTrustResult::KeysNotTrusted(Box::new(my_identity.clone()));
    }

    let Some(user_signing) = &my_identity.user_signing_key else {
        return UserTrustResult::CrossSigningNotConfigured(my_identity.user_id.clone());
    };
    let (Some(user_signing_key), Some(key_id)) = (user_signing.first_key(), user_signing.key_id())
    else {
        return UserTrustResult::CrossSigningNotConfigured(my_identity.user_id.clone());
    };

    let Some(other_master) = &other_identity.master_key else {
        return UserTrustResult::UnknownCrossSigningInfo(other_identity.user_id.clone());
    };

    let Some(signature) = other_master.signature_by(&my_identity.user_id, key_id) else {
        return UserTrustResult::KeyNotSigned(Box::new(other_master.clone()));
    };

    match verify_json_signature(user_signing_key, signature, &other_master.signable_json()) {
        Ok(()) => UserTrustResult::Success,
        Err(_) => UserTrustResult::InvalidSignature {
            key: Box::new(other_master.clone()),
            signature: signature.to_owned(),
        },
    }
}

/// Check the trust in a single device.
///
/// The device must carry a valid signature by its owner's self-signing key
/// and both identities in the chain must themselves be trusted. A device
/// that fails only because cross-signing data is absent keeps a standing
/// local verification (`locally_verified` stays authoritative); a signature
/// that is present but *invalid* fails outright, local flag or not.
pub fn check_device_trust(
    my_identity: &UserIdentity,
    owner_identity: Option<&UserIdentity>,
    device: &DeviceInfo,
) -> DeviceTrustResult {
    if !my_identity.is_verified() {
        return legacy_fallback(
            device,
            DeviceTrustResult::KeysNotTrusted(Box::new(my_identity.clone())),
        );
    }

    let Some(owner) = owner_identity else {
        return legacy_fallback(
            device,
            DeviceTrustResult::CrossSigningNotConfigured(device.user_id.clone()),
        );
    };

    let Some(self_signing_key) =
        owner.self_signing_key.as_ref().and_then(|key| key.first_key())
    else {
        return legacy_fallback(
            device,
            DeviceTrustResult::CrossSigningNotConfigured(owner.user_id.clone()),
        );
    };

    if !owner.is_verified() {
        return legacy_fallback(device, DeviceTrustResult::KeysNotTrusted(Box::new(owner.clone())));
    }

    let expected_key = OwnedKeyId::from_parts(ED25519, self_signing_key);

    let Some(signature) = device.signature_by(&device.user_id, &expected_key) else {
        return legacy_fallback(
            device,
            DeviceTrustResult::MissingDeviceSignature {
                device_id: device.device_id.clone(),
                expected_key,
            },
        );
    };

    match verify_json_signature(self_signing_key, signature, &device.signable_json()) {
        Ok(()) => DeviceTrustResult::Success(DeviceTrustLevel {
            cross_signing_verified: true,
            locally_verified: device.trust.locally_verified,
        }),
        // An invalid signature is worse than a missing one, a standing local
        // verification does not paper over it.
        Err(_) => DeviceTrustResult::InvalidDeviceSignature {
            device_id: device.device_id.clone(),
            signature: signature.to_owned(),
        },
    }
}

/// A standing manual verification keeps a device usable when cross-signing
/// can't vouch for it.
fn legacy_fallback(device: &DeviceInfo, failure: DeviceTrustResult) -> DeviceTrustResult {
    if device.trust.locally_verified {
        DeviceTrustResult::Success(DeviceTrustLevel {
            cross_signing_verified: false,
            locally_verified: true,
        })
    } else {
        failure
    }
}

fn private_seed_matches(seed: Option<&str>, master: &CrossSigningKey) -> bool {
    let Some(seed) = seed else { return false };
    let Ok(key) = SigningKey::from_base64(seed) else { return false };

    Some(key.public_key_base64().as_str()) == master.first_key()
}

fn signed_by_verified_device(master: &CrossSigningKey, own_devices: &[DeviceInfo]) -> bool {
    let Some(signatures) = master.signatures.get(&master.user_id) else { return false };

    for (key_id, signature) in signatures {
        if key_id.algorithm() != ED25519 {
            continue;
        }

        let Some(device) =
            own_devices.iter().find(|d| d.device_id.as_str() == key_id.key_name())
        else {
            continue;
        };

        if !device.trust.locally_verified {
            continue;
        }

        let Some(fingerprint) = device.fingerprint() else { continue };

        if verify_json_signature(fingerprint, signature, &master.signable_json()).is_ok() {
            trace!(device_id = %device.device_id, "Master key is signed by a verified device");
            return true;
        }
    }

    false
}

fn check_master_signature(
    master: &CrossSigningKey,
    subkey: &CrossSigningKey,
) -> Result<(), UserTrustResult> {
    let (Some(master_key), Some(key_id)) = (master.first_key(), master.key_id()) else {
        return Err(UserTrustResult::CrossSigningNotConfigured(master.user_id.clone()));
    };

    let Some(signature) = subkey.signature_by(&subkey.user_id, key_id) else {
        return Err(UserTrustResult::KeyNotSigned(Box::new(subkey.clone())));
    };

    verify_json_signature(master_key, signature, &subkey.signable_json()).map_err(|_| {
        UserTrustResult::InvalidSignature {
            key: Box::new(subkey.clone()),
            signature: signature.to_owned(),
        }
    })
}
