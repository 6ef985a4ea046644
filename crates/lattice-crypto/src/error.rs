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

//! Error types used across the crate.

use thiserror::Error;

use crate::{
    canonical_json::CanonicalJsonError,
    types::{OwnedDeviceId, OwnedUserId},
};

/// Error representing a failure while signing a JSON object or checking a
/// signature on one.
#[derive(Debug, Error)]
pub enum SignatureError {
    /// The signature uses an unsupported algorithm, only Ed25519 signatures
    /// are checked.
    #[error("the signature is using an unsupported algorithm")]
    UnsupportedAlgorithm,

    /// The private part of the signing key that should create a signature is
    /// missing.
    #[error("the signing key is missing from the object that signed the message")]
    MissingSigningKey,

    /// The user id of the signing key differs from the user id that provided
    /// the signature.
    #[error("the user id of the signing key differs from the user id that provided the signature")]
    UserIdMismatch,

    /// The provided JSON value isn't a valid JSON object.
    #[error("the provided JSON value isn't an object")]
    NotAnObject,

    /// The signed JSON object doesn't contain the expected signature.
    #[error("the provided JSON object doesn't contain the expected signature")]
    NoSignatureFound,

    /// The signature couldn't be verified.
    #[error(transparent)]
    VerificationError(#[from] vodozemac::SignatureError),

    /// The public key isn't a valid Ed25519 key.
    #[error(transparent)]
    InvalidKey(#[from] vodozemac::KeyError),

    /// The signature could not be decoded.
    #[error("the given signature is not valid and can't be decoded")]
    InvalidSignature,

    /// The object that should be signed or verified couldn't be put into
    /// canonical form.
    #[error(transparent)]
    JsonError(#[from] CanonicalJsonError),
}

/// Error describing a failure to decode a recovery key or other base58/base64
/// encoded key material.
///
/// These are input-validation failures, a value rejected here was never fed
/// into any cryptographic operation.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The decoded recovery key has an invalid prefix.
    #[error("the decoded recovery key has an invalid prefix: expected {0:?}, got {1:?}")]
    Prefix([u8; 2], [u8; 2]),

    /// The parity byte of the recovery key doesn't match the expected value.
    #[error("the parity byte of the recovery key doesn't match: expected {0:?}, got {1:?}")]
    Parity(u8, u8),

    /// The decoded key material has an invalid length.
    #[error("the decoded key has an invalid length: expected {0}, got {1}")]
    Length(usize, usize),

    /// The key wasn't valid base58.
    #[error(transparent)]
    Base58(#[from] bs58::decode::Error),

    /// The key wasn't valid base64.
    #[error(transparent)]
    Base64(#[from] vodozemac::Base64DecodeError),

    /// The decoded key was too short to contain all its parts.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Error for a failure to decrypt a single backed-up room key record.
///
/// `Decode` means the record itself was malformed, while `Mac` and
/// `Decryption` mean the record was well-formed but the key material didn't
/// fit. Restoring continues past either kind on a per-record basis.
#[derive(Debug, Error)]
pub enum DecryptionError {
    /// A part of the encrypted record couldn't be base64-decoded.
    #[error(transparent)]
    Decode(#[from] vodozemac::Base64DecodeError),

    /// One of the keys embedded in the record was malformed.
    #[error(transparent)]
    InvalidKey(#[from] vodozemac::KeyError),

    /// The authentication tag of the record didn't match.
    #[error("the MAC of the encrypted record doesn't match")]
    Mac,

    /// The ciphertext couldn't be decrypted with the given key material.
    #[error("the record couldn't be decrypted: {0}")]
    Decryption(String),

    /// The decrypted payload wasn't a valid room key export.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Error for failed store operations.
#[derive(Debug, Error)]
pub enum CryptoStoreError {
    /// An object failed to (de)serialize on its way in or out of the store.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// The underlying storage backend reported a failure.
    #[error("the store failed to perform the operation: {0}")]
    Backend(String),
}

/// Error when signing or verifying trust relations through the
/// [`CrossSigningService`](crate::trust::CrossSigningService).
#[derive(Debug, Error)]
pub enum TrustError {
    /// We don't have any cross-signing keys for the given user.
    #[error("the cross-signing keys for user {0} are unknown")]
    UnknownIdentity(OwnedUserId),

    /// We don't know about the given device.
    #[error("the device {1} of user {0} is unknown")]
    UnknownDevice(OwnedUserId, OwnedDeviceId),

    /// Creating or checking a signature failed.
    #[error(transparent)]
    Signature(#[from] SignatureError),

    /// The store ran into an error.
    #[error(transparent)]
    Store(#[from] CryptoStoreError),
}

/// Error for the key backup flows.
#[derive(Debug, Error)]
pub enum BackupError {
    /// No backup version exists, either locally or on the server.
    #[error("no key backup version is active")]
    MissingVersion,

    /// The recovery key or passphrase doesn't decrypt the backup.
    ///
    /// Deliberately carries no further detail, a wrong passphrase and a wrong
    /// recovery key are indistinguishable to the caller.
    #[error("the backup could not be decrypted with the given recovery key")]
    InvalidRecoveryKey,

    /// The server's backup version no longer matches ours.
    #[error("the backup version is out of date, a re-check against the server is needed")]
    WrongVersion,

    /// The recovery key couldn't be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Signing the backup auth data failed.
    #[error(transparent)]
    Signature(#[from] SignatureError),

    /// The store ran into an error.
    #[error(transparent)]
    Store(#[from] CryptoStoreError),

    /// Talking to the server failed.
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

/// Error returned by the [`BackupRemote`](crate::backups::BackupRemote)
/// network client.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// A transport-level failure, the request may be retried.
    #[error("network failure while talking to the backup endpoint: {0}")]
    Network(String),

    /// The server understood the request but refused it.
    #[error("the server rejected the request: {0}")]
    Rejected(String),
}
