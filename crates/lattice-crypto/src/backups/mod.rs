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

//! Server-side room key backups.
//!
//! The [`BackupMachine`] drives the whole lifecycle of a backup: checking
//! what the server has, creating a version, streaming local room keys up in
//! batches, and restoring keys with a recovery key or passphrase. Its state
//! is a small finite state machine with an explicit transition table; any
//! observed transition outside the table is reported to a diagnostics channel
//! instead of being silently accepted.

pub mod crypto;
pub mod keys;
mod remote;

use std::sync::Arc;

use futures_core::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    error::{BackupError, CryptoStoreError, RemoteError},
    observable::ChannelObservable,
    sign::{verify_json_signature, SigningKey},
    store::{DynCryptoStore, RoomKeyCounts, RoomKeyExport},
    types::{OwnedDeviceId, OwnedKeyId, OwnedUserId, ED25519},
};

use self::{
    crypto::{decrypt_session, encrypt_session, encrypt_session_symmetric},
    keys::{
        passphrase::{self, PBKDF_ITERATIONS},
        BackupRecoveryKey,
    },
};

pub use remote::{
    BackupAlgorithm, BackupAuthData, BackupRemote, BackupVersion, KeyBackupData, KeysBackupData,
    RoomKeyBackup, UploadOutcome,
};

/// How many room keys a single upload request carries at most.
const BACKUP_BATCH_SIZE: usize = 100;

/// The state of the local backup controller.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackupState {
    /// Nothing is known yet about the backup, a server check is needed.
    #[default]
    Unknown,
    /// A request asking the server for the current version is in flight.
    CheckingOnServer,
    /// The server has no backup, or we deliberately forgot ours.
    Disabled,
    /// A new backup version is being created on the server.
    Enabling,
    /// A backup is active and all known room keys have been uploaded.
    ReadyToBackUp,
    /// Keys are waiting to be uploaded, an upload pass is about to start.
    WillBackUp,
    /// An upload pass is running.
    BackingUp,
    /// The server has a backup but we can't verify that it is ours or made
    /// by a device we trust.
    NotTrusted,
    /// The version we uploaded against is no longer the server's current
    /// one.
    WrongVersion,
}

impl BackupState {
    /// Is `from -> to` an expected transition.
    ///
    /// The table is exhaustive on purpose, an unexpected transition has
    /// historically been a reliable symptom of a logic bug in the flows that
    /// drive the machine.
    fn transition_allowed(from: BackupState, to: BackupState) -> bool {
        use BackupState::*;

        matches!(
            (from, to),
            (Unknown, CheckingOnServer)
                | (CheckingOnServer, Disabled)
                | (CheckingOnServer, NotTrusted)
                | (CheckingOnServer, ReadyToBackUp)
                | (CheckingOnServer, Unknown)
                | (CheckingOnServer, WrongVersion)
                | (Disabled, Enabling)
                | (Enabling, Disabled)
                | (Enabling, ReadyToBackUp)
                | (NotTrusted, CheckingOnServer)
                | (NotTrusted, ReadyToBackUp)
                | (ReadyToBackUp, WillBackUp)
                | (ReadyToBackUp, BackingUp)
                | (ReadyToBackUp, ReadyToBackUp)
                | (WillBackUp, BackingUp)
                | (WillBackUp, ReadyToBackUp)
                | (WillBackUp, Unknown)
                | (BackingUp, ReadyToBackUp)
                | (BackingUp, WrongVersion)
                | (WrongVersion, CheckingOnServer)
        )
    }
}

/// A state transition that isn't part of the expected transition table.
///
/// Emitted on the diagnostics channel; the transition is still applied so the
/// machine never wedges.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IllegalStateTransition {
    /// The state the machine was in.
    pub from: BackupState,
    /// The state it was moved to.
    pub to: BackupState,
}

/// How far a backup version's signatures take us.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum SignatureState {
    /// No signature by any of our keys or devices is present.
    Missing,
    /// A signature exists but doesn't verify.
    Invalid,
    /// A signature verifies but the signing device or identity isn't
    /// verified itself.
    ValidButNotTrusted,
    /// A signature by a verified device or identity verifies, or we hold the
    /// private seed of the backup.
    ValidAndTrusted,
}

impl SignatureState {
    /// Is this state good enough to upload keys against the version.
    pub fn trusted(self) -> bool {
        self == SignatureState::ValidAndTrusted
    }
}

/// The result of restoring room keys from a backup.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RoomKeyImportResult {
    /// How many records the backup contained.
    pub total: usize,
    /// How many of them were decrypted and newly added to the store.
    pub imported: usize,
}

/// A recovery key together with the signed auth data of the version it
/// belongs to, the output of [`BackupMachine::prepare_backup_version`].
#[derive(Debug)]
pub struct PreparedBackupVersion {
    /// The freshly generated or derived recovery key.
    pub recovery_key: BackupRecoveryKey,
    /// The algorithm and signed auth data to create the version with.
    pub algorithm: BackupAlgorithm,
}

/// A callback reporting `(done, total)` progress of a passphrase derivation.
pub type ProgressCallback = Box<dyn FnMut(u32, u32) + Send>;

/// A callback receiving the room key counts after every uploaded batch.
pub type UploadProgressCallback = Box<dyn FnMut(RoomKeyCounts) + Send>;

/// The controller for server-side room key backups.
#[derive(Debug)]
pub struct BackupMachine {
    store: Arc<DynCryptoStore>,
    remote: Arc<dyn BackupRemote>,
    user_id: OwnedUserId,
    device_id: OwnedDeviceId,
    device_signing_key: Arc<SigningKey>,
    state: ChannelObservable<BackupState>,
    diagnostics: broadcast::Sender<IllegalStateTransition>,
    /// Serializes the flows so two upload or check passes can't interleave.
    ops: Mutex<()>,
}

impl BackupMachine {
    /// Create a new backup machine in the [`BackupState::Unknown`] state.
    ///
    /// `device_signing_key` is the Ed25519 key of this device, used to sign
    /// the auth data of newly created backup versions.
    pub fn new(
        store: Arc<DynCryptoStore>,
        remote: Arc<dyn BackupRemote>,
        user_id: OwnedUserId,
        device_id: OwnedDeviceId,
        device_signing_key: Arc<SigningKey>,
    ) -> Self {
        Self {
            store,
            remote,
            user_id,
            device_id,
            device_signing_key,
            state: ChannelObservable::new(BackupState::Unknown),
            diagnostics: broadcast::Sender::new(16),
            ops: Mutex::new(()),
        }
    }

    /// The current state of the machine.
    pub fn state(&self) -> BackupState {
        self.state.get()
    }

    /// Subscribe to state updates. The stream yields the current state
    /// immediately, then every change after it.
    pub fn state_stream(
        &self,
    ) -> impl Stream<Item = Result<BackupState, BroadcastStreamRecvError>> {
        self.state.subscribe()
    }

    /// Subscribe to reports of state transitions outside the expected
    /// transition table.
    pub fn diagnostics(&self) -> broadcast::Receiver<IllegalStateTransition> {
        self.diagnostics.subscribe()
    }

    /// Do we have an active backup version.
    pub async fn is_enabled(&self) -> Result<bool, CryptoStoreError> {
        Ok(self.store.backup_version().await?.is_some())
    }

    /// How many room keys exist locally and how many of them are backed up.
    pub async fn room_key_counts(&self) -> Result<RoomKeyCounts, CryptoStoreError> {
        self.store.room_key_counts().await
    }

    fn set_state(&self, to: BackupState) {
        let from = self.state.get();

        if !BackupState::transition_allowed(from, to) {
            error!(?from, ?to, "Unexpected backup state transition");
            let _ = self.diagnostics.send(IllegalStateTransition { from, to });
        } else {
            debug!(?from, ?to, "Backup state transition");
        }

        self.state.set(to);
    }

    /// Ask the server for the current backup version and settle into the
    /// matching state.
    ///
    /// With no server-side backup we end up [`BackupState::Disabled`]. A
    /// version we can't verify lands in [`BackupState::NotTrusted`]. A
    /// trusted version that doesn't match our local pointer moves us to
    /// [`BackupState::WrongVersion`] and forgets the stale pointer, so the
    /// next check adopts the server's version. A trusted, matching version
    /// is adopted and we end up [`BackupState::ReadyToBackUp`].
    #[instrument(skip(self))]
    pub async fn check_and_start(&self) -> Result<BackupState, BackupError> {
        let _guard = self.ops.lock().await;

        let previous = self.state.get();
        self.set_state(BackupState::CheckingOnServer);

        let version = match self.remote.get_current_version().await {
            Ok(version) => version,
            Err(e) => {
                // The check didn't tell us anything, go back to where we
                // were.
                self.set_state(previous);
                return Err(e.into());
            }
        };

        let Some(version) = version else {
            info!("The server has no key backup");
            self.set_state(BackupState::Disabled);
            return Ok(BackupState::Disabled);
        };

        let signature_state = self.verify_backup(&version).await?;

        if !signature_state.trusted() {
            warn!(
                version = %version.version,
                ?signature_state,
                "The server-side backup can't be trusted"
            );
            self.set_state(BackupState::NotTrusted);
            return Ok(BackupState::NotTrusted);
        }

        let local = self.store.backup_version().await?;

        let state = match local {
            Some(local) if local.version != version.version => {
                info!(
                    local = %local.version,
                    remote = %version.version,
                    "The server-side backup version changed underneath us"
                );
                self.store.save_backup_version(None).await?;
                self.store.reset_backup_state().await?;
                BackupState::WrongVersion
            }
            _ => {
                self.store.save_backup_version(Some(&version)).await?;
                BackupState::ReadyToBackUp
            }
        };

        self.set_state(state);

        Ok(state)
    }

    /// Generate the key material and signed auth data for a new backup
    /// version.
    ///
    /// With a passphrase the seed is derived with PBKDF2 off the async
    /// runtime, reporting progress through the callback; otherwise a random
    /// recovery key is generated. The auth data is signed by this device.
    pub async fn prepare_backup_version(
        &self,
        passphrase: Option<String>,
        progress: Option<ProgressCallback>,
    ) -> Result<PreparedBackupVersion, BackupError> {
        let (recovery_key, salt_and_iterations) = if let Some(passphrase) = passphrase {
            let salt = passphrase::generate_salt();

            let key = tokio::task::spawn_blocking(move || {
                if let Some(mut progress) = progress {
                    passphrase::derive_with_progress(
                        &passphrase,
                        &salt,
                        PBKDF_ITERATIONS,
                        &mut progress,
                    )
                } else {
                    passphrase::derive(&passphrase, &salt, PBKDF_ITERATIONS)
                }
            })
            .await
            .expect("The passphrase derivation task shouldn't panic");

            (key, Some((vodozemac::base64_encode(salt), PBKDF_ITERATIONS)))
        } else {
            (BackupRecoveryKey::new(), None)
        };

        let mut auth_data = BackupAuthData {
            public_key: recovery_key.public_key().to_base64(),
            private_key_salt: salt_and_iterations.as_ref().map(|(salt, _)| salt.clone()),
            private_key_iterations: salt_and_iterations.map(|(_, iterations)| iterations),
            signatures: Default::default(),
        };

        let value = serde_json::to_value(&auth_data).map_err(CryptoStoreError::Json)?;
        let signature = self.device_signing_key.sign_json(&value)?;

        auth_data.signatures.entry(self.user_id.clone()).or_default().insert(
            OwnedKeyId::from_parts(ED25519, self.device_id.as_str()),
            signature.to_base64(),
        );

        Ok(PreparedBackupVersion {
            recovery_key,
            algorithm: BackupAlgorithm::CurveAesSha2(auth_data),
        })
    }

    /// Create a new backup version on the server.
    ///
    /// On success the recovery key is saved, every local room key is marked
    /// as needing backup, and the machine ends up
    /// [`BackupState::ReadyToBackUp`].
    #[instrument(skip(self, prepared))]
    pub async fn create_backup_version(
        &self,
        prepared: PreparedBackupVersion,
    ) -> Result<String, BackupError> {
        let _guard = self.ops.lock().await;

        self.set_state(BackupState::Enabling);

        let algorithm = prepared.algorithm.clone();

        let version = match self.remote.create_version(prepared.algorithm).await {
            Ok(version) => version,
            Err(e) => {
                self.set_state(BackupState::Disabled);
                return Err(e.into());
            }
        };

        self.store.save_recovery_key(Some(&prepared.recovery_key)).await?;
        self.store
            .save_backup_version(Some(&BackupVersion {
                version: version.clone(),
                algorithm,
                count: 0,
            }))
            .await?;
        self.store.reset_backup_state().await?;

        info!(%version, "Created a new key backup version");
        self.set_state(BackupState::ReadyToBackUp);

        Ok(version)
    }

    /// Upload every room key that isn't backed up yet, in batches.
    ///
    /// Records are encrypted with the variant the adopted backup version
    /// declares. The progress callback, if any, receives the store's room
    /// key counts after every successfully uploaded batch.
    ///
    /// Ends in [`BackupState::ReadyToBackUp`] once the store has nothing
    /// left to upload. A version mismatch reported by the server moves the
    /// machine to [`BackupState::WrongVersion`], forgets the stale pointer
    /// and returns [`BackupError::WrongVersion`]; the caller is expected to
    /// run [`check_and_start`](Self::check_and_start) again.
    #[instrument(skip(self, progress))]
    pub async fn backup_room_keys(
        &self,
        mut progress: Option<UploadProgressCallback>,
    ) -> Result<(), BackupError> {
        let _guard = self.ops.lock().await;

        let version = self.store.backup_version().await?.ok_or(BackupError::MissingVersion)?;
        let recovery_key =
            self.store.recovery_key().await?.ok_or(BackupError::MissingVersion)?;
        let backup_key = recovery_key.public_key();

        self.set_state(BackupState::WillBackUp);

        loop {
            let chunk = self.store.room_keys_to_backup(BACKUP_BATCH_SIZE).await?;

            if chunk.is_empty() {
                break;
            }

            if self.state.get() != BackupState::BackingUp {
                self.set_state(BackupState::BackingUp);
            }

            let mut request = KeysBackupData::default();
            let mut uploaded = Vec::with_capacity(chunk.len());

            for export in &chunk {
                let session_data = match &version.algorithm {
                    BackupAlgorithm::CurveAesSha2(_) => encrypt_session(backup_key, export),
                    BackupAlgorithm::AesHmacSha2(_) => {
                        encrypt_session_symmetric(&recovery_key, export)
                    }
                };

                let record = KeyBackupData {
                    first_message_index: export.first_known_index,
                    forwarded_count: export.forwarding_curve25519_key_chain.len() as u64,
                    is_verified: export.sender_verified,
                    session_data,
                };

                uploaded.push((export.room_id.clone(), export.session_id.clone()));
                request
                    .rooms
                    .entry(export.room_id.clone())
                    .or_default()
                    .sessions
                    .insert(export.session_id.clone(), record);
            }

            match self.remote.upload_room_keys(&version.version, request).await {
                Ok(UploadOutcome::Stored) => {
                    debug!(count = uploaded.len(), "Uploaded a batch of room keys");
                    self.store.mark_room_keys_as_backed_up(&uploaded).await?;

                    if let Some(progress) = progress.as_mut() {
                        progress(self.store.room_key_counts().await?);
                    }
                }
                Ok(UploadOutcome::WrongVersion) => {
                    warn!(
                        version = %version.version,
                        "The backup version was rotated while we were uploading"
                    );
                    self.store.save_backup_version(None).await?;
                    self.store.reset_backup_state().await?;
                    self.set_state(BackupState::WrongVersion);

                    return Err(BackupError::WrongVersion);
                }
                Err(e) => {
                    self.set_state(BackupState::ReadyToBackUp);
                    return Err(e.into());
                }
            }
        }

        self.set_state(BackupState::ReadyToBackUp);

        Ok(())
    }

    /// Restore room keys from a backup using a recovery key.
    ///
    /// `version` selects the backup version to restore, typically an older
    /// one that is still on the server; without it the server's current
    /// version is used.
    ///
    /// The key must regenerate the backup's declared public key, otherwise
    /// [`BackupError::InvalidRecoveryKey`] is returned before anything is
    /// downloaded. Individual records that fail to decrypt are skipped and
    /// counted, a single bad record never aborts the whole restore.
    #[instrument(skip(self, recovery_key, version))]
    pub async fn restore_with_recovery_key(
        &self,
        recovery_key: &BackupRecoveryKey,
        version: Option<&BackupVersion>,
    ) -> Result<RoomKeyImportResult, BackupError> {
        let _guard = self.ops.lock().await;

        let version = match version {
            Some(version) => version.clone(),
            None => {
                self.remote.get_current_version().await?.ok_or(BackupError::MissingVersion)?
            }
        };

        self.restore(recovery_key, &version).await
    }

    /// Restore room keys from a backup using the passphrase the backup was
    /// created with. Without an explicit `version` the server's current one
    /// is used.
    ///
    /// Fails with [`BackupError::InvalidRecoveryKey`] both for a wrong
    /// passphrase and for a backup that was never passphrase-protected.
    pub async fn restore_with_passphrase(
        &self,
        passphrase: String,
        version: Option<&BackupVersion>,
        progress: Option<ProgressCallback>,
    ) -> Result<RoomKeyImportResult, BackupError> {
        let _guard = self.ops.lock().await;

        let version = match version {
            Some(version) => version.clone(),
            None => {
                self.remote.get_current_version().await?.ok_or(BackupError::MissingVersion)?
            }
        };

        let auth_data = version.algorithm.auth_data();

        let (Some(salt), Some(iterations)) =
            (auth_data.private_key_salt.clone(), auth_data.private_key_iterations)
        else {
            return Err(BackupError::InvalidRecoveryKey);
        };

        let salt = vodozemac::base64_decode(&salt).map_err(|_| BackupError::InvalidRecoveryKey)?;

        let recovery_key = tokio::task::spawn_blocking(move || {
            if let Some(mut progress) = progress {
                passphrase::derive_with_progress(&passphrase, &salt, iterations, &mut progress)
            } else {
                passphrase::derive(&passphrase, &salt, iterations)
            }
        })
        .await
        .expect("The passphrase derivation task shouldn't panic");

        self.restore(&recovery_key, &version).await
    }

    async fn restore(
        &self,
        recovery_key: &BackupRecoveryKey,
        version: &BackupVersion,
    ) -> Result<RoomKeyImportResult, BackupError> {
        let auth_data = version.algorithm.auth_data();

        if recovery_key.public_key().to_base64() != auth_data.public_key {
            return Err(BackupError::InvalidRecoveryKey);
        }

        let downloaded = self.remote.download_room_keys(&version.version).await?;

        let mut total = 0;
        let mut exports = Vec::new();
        let mut backed_up = Vec::new();

        for (room_id, room) in downloaded.rooms {
            for (session_id, record) in room.sessions {
                total += 1;

                match decrypt_session(recovery_key, &session_id, &record.session_data) {
                    Ok(session_data) => {
                        backed_up.push((room_id.clone(), session_id.clone()));
                        exports.push(session_data.into_export(
                            room_id.clone(),
                            session_id,
                            record.first_message_index,
                            record.is_verified,
                        ));
                    }
                    Err(e) => {
                        warn!(
                            %room_id,
                            session_id,
                            "Failed to decrypt a backed up room key: {e}"
                        );
                    }
                }
            }
        }

        let imported = self.store.save_room_keys(exports).await?;

        // The restored keys are in the backup already, no need to upload
        // them back.
        self.store.mark_room_keys_as_backed_up(&backed_up).await?;

        self.store.save_recovery_key(Some(recovery_key)).await?;
        self.store.save_backup_version(Some(version)).await?;

        // Decrypting the backup proves it is ours, even if its signatures
        // didn't.
        if self.state.get() == BackupState::NotTrusted {
            self.set_state(BackupState::ReadyToBackUp);
        }

        info!(total, imported, "Restored room keys from the backup");

        Ok(RoomKeyImportResult { total, imported })
    }

    /// Delete the current backup version on the server and forget all local
    /// backup state.
    ///
    /// The machine falls back to [`BackupState::Unknown`]; run
    /// [`check_and_start`](Self::check_and_start) afterwards to settle into
    /// [`BackupState::Disabled`].
    #[instrument(skip(self))]
    pub async fn delete_backup(&self) -> Result<(), BackupError> {
        let _guard = self.ops.lock().await;

        let version = self.store.backup_version().await?.ok_or(BackupError::MissingVersion)?;

        self.remote.delete_version(&version.version).await?;
        self.forget().await?;

        Ok(())
    }

    /// Forget the local backup state without touching the server.
    pub async fn disable_backup(&self) -> Result<(), BackupError> {
        let _guard = self.ops.lock().await;
        self.forget().await
    }

    async fn forget(&self) -> Result<(), BackupError> {
        self.store.save_backup_version(None).await?;
        self.store.save_recovery_key(None).await?;
        self.store.reset_backup_state().await?;

        self.state.set(BackupState::Unknown);

        Ok(())
    }

    /// How far the signatures on a backup version take us.
    ///
    /// A saved recovery key that regenerates the version's public key counts
    /// as full trust on its own. Otherwise the auth data needs a valid
    /// signature by one of our verified devices or by our verified
    /// cross-signing identity.
    pub async fn verify_backup(
        &self,
        version: &BackupVersion,
    ) -> Result<SignatureState, BackupError> {
        let auth_data = version.algorithm.auth_data();

        if let Some(saved) = self.store.recovery_key().await? {
            if saved.public_key().to_base64() == auth_data.public_key {
                return Ok(SignatureState::ValidAndTrusted);
            }
        }

        let value = serde_json::to_value(auth_data).map_err(CryptoStoreError::Json)?;

        let Some(signatures) = auth_data.signatures.get(&self.user_id) else {
            return Ok(SignatureState::Missing);
        };

        let identity = self.store.get_user_identity(&self.user_id).await?;

        let mut result = SignatureState::Missing;

        for (key_id, signature) in signatures {
            if key_id.algorithm() != ED25519 {
                continue;
            }

            let name = key_id.key_name();
            if name.is_empty() {
                continue;
            }

            let state = if let Some(device) =
                self.store.get_device(&self.user_id, &name.into()).await?
            {
                Self::check_signature(device.fingerprint(), signature, &value, || {
                    device.trust.is_verified()
                })
            } else if let Some(identity) = &identity {
                let master_key = identity.master_key.as_ref().and_then(|k| k.first_key());

                if master_key == Some(name) {
                    Self::check_signature(master_key, signature, &value, || identity.is_verified())
                } else {
                    SignatureState::Missing
                }
            } else {
                SignatureState::Missing
            };

            result = result.max(state);
        }

        Ok(result)
    }

    fn check_signature(
        public_key: Option<&str>,
        signature: &str,
        auth_data: &serde_json::Value,
        is_trusted: impl FnOnce() -> bool,
    ) -> SignatureState {
        let Some(public_key) = public_key else {
            return SignatureState::Missing;
        };

        match verify_json_signature(public_key, signature, auth_data) {
            Ok(()) if is_trusted() => SignatureState::ValidAndTrusted,
            Ok(()) => SignatureState::ValidButNotTrusted,
            Err(_) => SignatureState::Invalid,
        }
    }
}
