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

//! Room trust aggregation, the "shield" computation.

use std::collections::BTreeMap;

use crate::types::{DeviceInfo, OwnedUserId, RoomTrustLevel, UserIdentity};

/// Aggregate the trust state of a room's members into a single trust level.
///
/// For direct or two-member rooms only the *other* side is considered, a
/// user's trust in themselves carries no information about the conversation.
/// With zero trusted members the room stays at `Default`. A trusted member
/// with an unverified device drags the room to `Warning`. Only a room where
/// every considered member is trusted and every one of their devices is
/// verified reaches `Trusted`.
///
/// When the local user has no cross-signing identity at all, the per-device
/// check falls back to manual verification flags.
pub fn compute_room_trust(
    my_user_id: &OwnedUserId,
    cross_signing_enabled: bool,
    is_direct: bool,
    members: &[OwnedUserId],
    identities: &BTreeMap<OwnedUserId, UserIdentity>,
    devices: &BTreeMap<OwnedUserId, Vec<DeviceInfo>>,
) -> RoomTrustLevel {
    let considered: Vec<&OwnedUserId> = if is_direct || members.len() <= 2 {
        members.iter().filter(|m| *m != my_user_id).collect()
    } else {
        members.iter().collect()
    };

    let trusted: Vec<&OwnedUserId> = considered
        .iter()
        .copied()
        .filter(|user| identities.get(*user).is_some_and(|i| i.is_verified()))
        .collect();

    if trusted.is_empty() {
        return RoomTrustLevel::Default;
    }

    let mut trusted_members_devices =
        trusted.iter().filter_map(|user| devices.get(*user)).flatten();

    let has_unverified_device = if cross_signing_enabled {
        trusted_members_devices.any(|d| !d.trust.cross_signing_verified)
    } else {
        trusted_members_devices.any(|d| !d.trust.is_verified())
    };

    if has_unverified_device {
        RoomTrustLevel::Warning
    } else if trusted.len() == considered.len() {
        RoomTrustLevel::Trusted
    } else {
        RoomTrustLevel::Default
    }
}
