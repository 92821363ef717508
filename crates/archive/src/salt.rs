//! Deterministic one-shot salt source.

use parking_lot::Mutex;
use rand::rngs::OsRng;
use rand::RngCore;

use crate::crypto::SALT_LEN;
use crate::error::ArchiveError;

/// A salt source that yields exactly one 16-byte salt, then refuses.
///
/// Fresh uploads use [`OneShotSalt::random`]; resumed uploads replay the
/// salt persisted in the session record via [`OneShotSalt::fixed`], so
/// re-encrypting a prefix of the source reproduces the original
/// ciphertext. The single-use and length guards exist because a second
/// draw or an unexpected length means the container layer is no longer
/// doing what the resume protocol assumes - better to fail the upload
/// than to quietly emit different bytes.
pub struct OneShotSalt {
    salt: [u8; SALT_LEN],
    used: Mutex<bool>,
}

impl OneShotSalt {
    /// Source yielding a fresh cryptographically random salt.
    pub fn random() -> Self {
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        Self::fixed(salt)
    }

    /// Source yielding exactly the given salt.
    pub fn fixed(salt: [u8; SALT_LEN]) -> Self {
        Self {
            salt,
            used: Mutex::new(false),
        }
    }

    /// Draw the salt. Fails on any length other than [`SALT_LEN`] and on
    /// every draw after the first.
    pub fn take(&self, len: usize) -> Result<[u8; SALT_LEN], ArchiveError> {
        if len != SALT_LEN {
            return Err(ArchiveError::SaltLength {
                requested: len,
                expected: SALT_LEN,
            });
        }
        let mut used = self.used.lock();
        if *used {
            return Err(ArchiveError::SaltExhausted);
        }
        *used = true;
        Ok(self.salt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_salt_yields_value() {
        let salt: [u8; SALT_LEN] = [7u8; SALT_LEN];
        let source: OneShotSalt = OneShotSalt::fixed(salt);
        assert_eq!(source.take(SALT_LEN).unwrap(), salt);
    }

    #[test]
    fn test_second_draw_refused() {
        let source: OneShotSalt = OneShotSalt::fixed([1u8; SALT_LEN]);
        source.take(SALT_LEN).unwrap();
        assert!(matches!(
            source.take(SALT_LEN),
            Err(ArchiveError::SaltExhausted)
        ));
    }

    #[test]
    fn test_wrong_length_refused() {
        let source: OneShotSalt = OneShotSalt::fixed([1u8; SALT_LEN]);
        assert!(matches!(
            source.take(8),
            Err(ArchiveError::SaltLength {
                requested: 8,
                expected: SALT_LEN
            })
        ));
        // A bad-length request does not consume the salt.
        assert!(source.take(SALT_LEN).is_ok());
    }

    #[test]
    fn test_random_salts_differ() {
        let a: [u8; SALT_LEN] = OneShotSalt::random().take(SALT_LEN).unwrap();
        let b: [u8; SALT_LEN] = OneShotSalt::random().take(SALT_LEN).unwrap();
        assert_ne!(a, b);
    }
}
