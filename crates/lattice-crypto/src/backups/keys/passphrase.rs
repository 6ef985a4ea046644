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

//! PBKDF2 derivation of a backup seed from a user-chosen passphrase.

use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2;
use rand::{thread_rng, RngCore};
use sha2::Sha512;
use zeroize::Zeroize;

use super::recovery::BackupRecoveryKey;

/// The default PBKDF2 iteration count for newly created backups.
pub const PBKDF_ITERATIONS: u32 = 500_000;

/// The size of the random salt in bytes.
pub const SALT_SIZE: usize = 32;

/// Generate a fresh random salt for a new passphrase-protected backup.
pub fn generate_salt() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    thread_rng().fill_bytes(&mut salt);

    salt
}

/// Derive the backup seed from a passphrase and salt.
///
/// This runs PBKDF2-HMAC-SHA512 for the full iteration count in one go, use
/// [`derive_with_progress`] when the caller wants progress reporting.
pub fn derive(passphrase: &str, salt: &[u8], iterations: u32) -> BackupRecoveryKey {
    let mut key = [0u8; BackupRecoveryKey::KEY_SIZE];

    pbkdf2::<Hmac<Sha512>>(passphrase.as_bytes(), salt, iterations, &mut key)
        .expect("We should be able to expand a passphrase of any length");

    let recovery_key = BackupRecoveryKey::from_bytes(&key);
    key.zeroize();

    recovery_key
}

/// Derive the backup seed from a passphrase and salt while reporting progress.
///
/// The callback receives `(done, total)` with `total` fixed at 100 and `done`
/// climbing monotonically from 0 to 100, each value exactly once. The work is
/// the same PBKDF2-HMAC-SHA512 chain as [`derive`], unrolled so we can peek at
/// the iteration counter.
pub fn derive_with_progress(
    passphrase: &str,
    salt: &[u8],
    iterations: u32,
    mut progress: impl FnMut(u32, u32),
) -> BackupRecoveryKey {
    const TOTAL: u32 = 100;

    progress(0, TOTAL);

    // PBKDF2 with a single output block: U_1 = PRF(P, S || INT(1)),
    // U_i = PRF(P, U_{i-1}), and the key is the XOR of all U_i. SHA-512
    // produces 64 bytes so one block covers our 32 byte seed.
    let prf = Hmac::<Sha512>::new_from_slice(passphrase.as_bytes())
        .expect("HMAC should accept a key of any length");

    let mut block = prf.clone();
    block.update(salt);
    block.update(&1u32.to_be_bytes());

    let mut u = block.finalize().into_bytes();
    let mut output = u;

    let mut reported = 0u32;

    for i in 1..iterations {
        let mut round = prf.clone();
        round.update(&u);
        u = round.finalize().into_bytes();

        for (out, byte) in output.iter_mut().zip(u.iter()) {
            *out ^= byte;
        }

        let percent = ((i + 1) as u64 * u64::from(TOTAL) / u64::from(iterations)) as u32;

        while reported < percent {
            reported += 1;
            progress(reported, TOTAL);
        }
    }

    while reported < TOTAL {
        reported += 1;
        progress(reported, TOTAL);
    }

    let mut key = [0u8; BackupRecoveryKey::KEY_SIZE];
    key.copy_from_slice(&output[..BackupRecoveryKey::KEY_SIZE]);

    let recovery_key = BackupRecoveryKey::from_bytes(&key);

    key.zeroize();
    u.as_mut_slice().zeroize();
    output.as_mut_slice().zeroize();

    recovery_key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_deterministic() {
        let salt = [1u8; SALT_SIZE];

        let first = derive("it's a secret to everybody", &salt, 10);
        let second = derive("it's a secret to everybody", &salt, 10);

        assert_eq!(first.to_base64(), second.to_base64());

        let different = derive("it's a secret to everybody", &[2u8; SALT_SIZE], 10);
        assert_ne!(first.to_base64(), different.to_base64());
    }

    #[test]
    fn derivation_matches_the_known_answer() {
        // PBKDF2-HMAC-SHA512("It's a secret to everybody", salt, 5000, 32),
        // cross-checked against Python's hashlib.pbkdf2_hmac.
        let salt = b"SALTYGOODNESSSALTYGOODNESSSALTYG";
        let expected = "NH83LqgvpTmzJma41jC9hFJYgbB4Z/3uSMCayLkeDgA";

        let key = derive("It's a secret to everybody", salt, 5_000);
        assert_eq!(key.to_base64(), expected);

        let chunked =
            derive_with_progress("It's a secret to everybody", salt, 5_000, |_, _| {});
        assert_eq!(chunked.to_base64(), expected);
    }

    #[test]
    fn progress_variant_matches_the_plain_one() {
        let salt = generate_salt();

        let plain = derive("password", &salt, 1_000);
        let with_progress = derive_with_progress("password", &salt, 1_000, |_, _| {});

        assert_eq!(plain.to_base64(), with_progress.to_base64());
    }

    #[test]
    fn progress_is_reported_exactly_once_per_percent() {
        let salt = [7u8; SALT_SIZE];
        let mut seen = Vec::new();

        derive_with_progress("password", &salt, 333, |done, total| {
            assert_eq!(total, 100);
            seen.push(done);
        });

        let expected: Vec<u32> = (0..=100).collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn single_iteration_still_reports_the_full_range() {
        let salt = [9u8; SALT_SIZE];
        let mut count = 0;

        let with_progress = derive_with_progress("pin", &salt, 1, |_, _| count += 1);
        let plain = derive("pin", &salt, 1);

        assert_eq!(count, 101);
        assert_eq!(plain.to_base64(), with_progress.to_base64());
    }
}
