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

//! Cross-signing trust: the pure trust engine, the room-level aggregation,
//! the background propagation of trust changes, and the service tying them
//! together.

pub mod engine;
mod propagator;
mod room;
mod service;

pub use propagator::TrustUpdater;
pub use room::compute_room_trust;
pub use service::CrossSigningService;
