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

//! The data types describing users, devices, keys and trust.

mod cross_signing;
mod device;
mod ids;
mod trust;

pub use cross_signing::{
    CrossSigningKey, KeyUsage, PrivateCrossSigningKeys, SignatureMap, UserIdentity,
    UserTrustLevel,
};
pub use device::{DeviceInfo, DeviceTrustLevel};
pub use ids::{OwnedDeviceId, OwnedKeyId, OwnedRoomId, OwnedUserId, ED25519};
pub use trust::{DeviceTrustResult, RoomTrustLevel, UserTrustResult};
