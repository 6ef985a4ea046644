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

//! The trust and key backup core of a Lattice client.
//!
//! Two largely independent halves live here.
//!
//! The trust half maintains the cross-signing web: the
//! [`CrossSigningService`](trust::CrossSigningService) signs and checks
//! identities and devices, and a background
//! [`TrustUpdater`](trust::TrustUpdater) propagates every key or device
//! change into persisted per-user, per-device and per-room trust state.
//!
//! The backup half is the [`BackupMachine`](backups::BackupMachine), which
//! drives server-side room key backups: creating a version protected by a
//! recovery key or passphrase, uploading room keys in batches, and restoring
//! them on a new login.
//!
//! Both halves run on a pluggable [`CryptoStore`](store::CryptoStore); an
//! in-memory implementation is provided for tests and short-lived sessions.

#![warn(missing_docs, missing_debug_implementations)]

pub mod backups;
pub mod canonical_json;
pub mod error;
mod observable;
pub mod sign;
pub mod store;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod trust;
pub mod types;

pub use backups::{BackupMachine, BackupState};
pub use store::CryptoStore;
pub use trust::CrossSigningService;
