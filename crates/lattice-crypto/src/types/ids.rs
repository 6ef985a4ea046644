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

//! Owned identifier types for users, devices, rooms and signing keys.
//!
//! These are plain validated-by-convention strings. The federation protocol
//! guarantees their shape on the wire, so the types here only give us
//! type-level separation between the different id namespaces.

use std::{borrow::Borrow, fmt};

use serde::{Deserialize, Serialize};

macro_rules! owned_identifier {
    ($(#[doc = $doc:literal] $name:ident),* $(,)?) => {
        $(
            #[doc = $doc]
            #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
            #[serde(transparent)]
            pub struct $name(Box<str>);

            impl $name {
                /// The id as a plain string slice.
                pub fn as_str(&self) -> &str {
                    &self.0
                }
            }

            impl From<&str> for $name {
                fn from(value: &str) -> Self {
                    Self(value.into())
                }
            }

            impl From<String> for $name {
                fn from(value: String) -> Self {
                    Self(value.into())
                }
            }

            impl AsRef<str> for $name {
                fn as_ref(&self) -> &str {
                    &self.0
                }
            }

            impl Borrow<str> for $name {
                fn borrow(&self) -> &str {
                    &self.0
                }
            }

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str(&self.0)
                }
            }
        )*
    };
}

owned_identifier! {
    #[doc = "The id of a user on the federation, e.g. `@alice:example.org`."]
    OwnedUserId,
    #[doc = "The id of one of a user's devices."]
    OwnedDeviceId,
    #[doc = "The id of a room."]
    OwnedRoomId,
}

/// The id of a signing key, of the form `<algorithm>:<key name>`.
///
/// The key name is either a device id or the unpadded base64 encoding of the
/// public key itself, depending on who created the signature.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnedKeyId(Box<str>);

/// The algorithm name every signing key in this crate uses.
pub const ED25519: &str = "ed25519";

impl OwnedKeyId {
    /// Build a key id out of its algorithm and key name.
    pub fn from_parts(algorithm: &str, key_name: &str) -> Self {
        Self(format!("{algorithm}:{key_name}").into())
    }

    /// The id as a plain string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The algorithm part of the id, everything up to the first colon.
    pub fn algorithm(&self) -> &str {
        self.0.split_once(':').map(|(a, _)| a).unwrap_or(&self.0)
    }

    /// The name part of the id, everything after the first colon.
    pub fn key_name(&self) -> &str {
        self.0.split_once(':').map(|(_, n)| n).unwrap_or("")
    }
}

impl From<&str> for OwnedKeyId {
    fn from(value: &str) -> Self {
        Self(value.into())
    }
}

impl From<String> for OwnedKeyId {
    fn from(value: String) -> Self {
        Self(value.into())
    }
}

impl AsRef<str> for OwnedKeyId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for OwnedKeyId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnedKeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
