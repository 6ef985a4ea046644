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

//! Trust check outcomes.
//!
//! A failed trust check is not an error, it is a first-class value the caller
//! renders ("not verified", "not signed", "signature invalid"). These enums
//! are the complete set of outcomes the trust engine can produce.

use serde::{Deserialize, Serialize};

use super::{
    cross_signing::{CrossSigningKey, UserIdentity},
    device::DeviceTrustLevel,
    ids::{OwnedDeviceId, OwnedKeyId, OwnedUserId},
};

/// The outcome of checking the trust in a user's cross-signing identity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UserTrustResult {
    /// The identity is trusted.
    Success,

    /// The user has no usable cross-signing keys.
    CrossSigningNotConfigured(OwnedUserId),

    /// The identity exists but no independent source of trust was found for
    /// its master key.
    KeysNotTrusted(Box<UserIdentity>),

    /// The key is missing the signature that would link it into the trust
    /// chain.
    KeyNotSigned(Box<CrossSigningKey>),

    /// The key carries the expected signature but the signature doesn't
    /// verify.
    InvalidSignature {
        /// The key the bad signature was found on.
        key: Box<CrossSigningKey>,
        /// The base64 encoded signature that failed.
        signature: String,
    },

    /// We don't know anything about the cross-signing identity of the user.
    UnknownCrossSigningInfo(OwnedUserId),
}

impl UserTrustResult {
    /// Did the check succeed.
    pub fn is_success(&self) -> bool {
        matches!(self, UserTrustResult::Success)
    }
}

/// The outcome of checking the trust in a single device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeviceTrustResult {
    /// The device is trusted, with the given trust level.
    Success(DeviceTrustLevel),

    /// The device owner has no usable cross-signing keys and the device has
    /// no standing local verification.
    CrossSigningNotConfigured(OwnedUserId),

    /// The device owner's identity exists but isn't trusted.
    KeysNotTrusted(Box<UserIdentity>),

    /// One of the keys in the chain is missing its linking signature.
    KeyNotSigned(Box<CrossSigningKey>),

    /// One of the keys in the chain carries an invalid signature.
    InvalidSignature {
        /// The key the bad signature was found on.
        key: Box<CrossSigningKey>,
        /// The base64 encoded signature that failed.
        signature: String,
    },

    /// We don't know anything about the cross-signing identity of the device
    /// owner.
    UnknownCrossSigningInfo(OwnedUserId),

    /// The device isn't signed by its owner's self-signing key.
    MissingDeviceSignature {
        /// The device that is missing the signature.
        device_id: OwnedDeviceId,
        /// The id of the self-signing key that was expected to have signed
        /// the device.
        expected_key: OwnedKeyId,
    },

    /// The device carries a self-signing signature that doesn't verify.
    InvalidDeviceSignature {
        /// The device carrying the bad signature.
        device_id: OwnedDeviceId,
        /// The base64 encoded signature that failed.
        signature: String,
    },
}

impl DeviceTrustResult {
    /// Did the check succeed.
    pub fn is_success(&self) -> bool {
        matches!(self, DeviceTrustResult::Success(_))
    }

    /// The trust level the check produced, if it succeeded.
    pub fn trust_level(&self) -> Option<DeviceTrustLevel> {
        match self {
            DeviceTrustResult::Success(level) => Some(*level),
            _ => None,
        }
    }
}

/// The aggregated trust level of a room, the "shield" a client renders next
/// to the room name.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomTrustLevel {
    /// Nobody in the room is trusted yet, or a considered member isn't.
    #[default]
    Default,
    /// A trusted member has a device that isn't verified.
    Warning,
    /// Every considered member is trusted and all their devices are verified.
    Trusted,
}
