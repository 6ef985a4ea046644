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

//! Storage abstraction for key material, trust state and room key records.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::types::{OwnedRoomId, OwnedUserId, RoomTrustLevel};

mod memorystore;
mod traits;

pub use memorystore::MemoryStore;
pub use traits::{CryptoStore, DynCryptoStore, IntoCryptoStore};

/// The room membership and trust data the crate needs about a single room.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSummary {
    /// The id of the room.
    pub room_id: OwnedRoomId,

    /// Is this a direct 1:1-style room.
    pub is_direct: bool,

    /// The active members of the room, including the local user.
    pub members: Vec<OwnedUserId>,

    /// The denormalized trust level of the room.
    #[serde(default)]
    pub trust_level: RoomTrustLevel,
}

/// How many room keys exist locally and how many of them made it into the
/// backup.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomKeyCounts {
    /// The total number of room keys in the store.
    pub total: usize,
    /// How many of them have been backed up.
    pub backed_up: usize,
}

/// An exported room key, the plaintext a backup record protects.
///
/// The session key is the actual decryption secret and is zeroized when the
/// export is dropped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct RoomKeyExport {
    /// The room the key decrypts messages in.
    #[zeroize(skip)]
    pub room_id: OwnedRoomId,

    /// The id of the session the key belongs to.
    #[zeroize(skip)]
    pub session_id: String,

    /// The Curve25519 key of the device that created the session.
    #[zeroize(skip)]
    pub sender_key: String,

    /// The exported session key itself.
    pub session_key: String,

    /// Keys the original sender claimed to own, typically their Ed25519 key.
    #[zeroize(skip)]
    pub sender_claimed_keys: BTreeMap<String, String>,

    /// The chain of Curve25519 keys the session was forwarded through, empty
    /// for directly received sessions.
    #[zeroize(skip)]
    pub forwarding_curve25519_key_chain: Vec<String>,

    /// The first message index the key can decrypt.
    #[zeroize(skip)]
    pub first_known_index: u64,

    /// Was the sending device verified when the session was received.
    #[zeroize(skip)]
    pub sender_verified: bool,
}
