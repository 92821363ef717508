//! AE-2 entry encryption primitives.
//!
//! The zip AES scheme (AE-2): PBKDF2-HMAC-SHA1 over the password and
//! salt derives the AES key, the HMAC key, and a two-byte password
//! verifier; data is encrypted with AES-256 in CTR mode over a
//! little-endian counter starting at 1; the ciphertext is authenticated
//! with HMAC-SHA1 truncated to ten bytes.

use aes::cipher::{KeyIvInit, StreamCipher};
use aes::Aes256;
use ctr::Ctr128LE;
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use sha1::Sha1;

/// AES-256 salt length.
pub const SALT_LEN: usize = 16;
/// Password verifier length stored after the salt.
pub const VERIFIER_LEN: usize = 2;
/// Truncated HMAC-SHA1 authentication code length.
pub const AUTH_CODE_LEN: usize = 10;

const KEY_LEN: usize = 32;
const PBKDF2_ROUNDS: u32 = 1000;

type ZipCtr = Ctr128LE<Aes256>;
type HmacSha1 = Hmac<Sha1>;

/// Streaming cipher state for one archive entry.
pub struct EntryCipher {
    ctr: ZipCtr,
    mac: HmacSha1,
    verifier: [u8; VERIFIER_LEN],
}

impl EntryCipher {
    /// Derive the entry keys from a password and salt.
    pub fn new(password: &str, salt: &[u8; SALT_LEN]) -> Self {
        let mut derived = [0u8; KEY_LEN + KEY_LEN + VERIFIER_LEN];
        pbkdf2_hmac::<Sha1>(password.as_bytes(), salt, PBKDF2_ROUNDS, &mut derived);

        let mut enc_key = [0u8; KEY_LEN];
        enc_key.copy_from_slice(&derived[..KEY_LEN]);
        // The counter block is little-endian and starts at 1.
        let iv: [u8; 16] = 1u128.to_le_bytes();

        let mac: HmacSha1 = HmacSha1::new_from_slice(&derived[KEY_LEN..KEY_LEN * 2])
            .expect("HMAC accepts any key length");

        let mut verifier = [0u8; VERIFIER_LEN];
        verifier.copy_from_slice(&derived[KEY_LEN * 2..]);

        Self {
            ctr: ZipCtr::new(&enc_key.into(), &iv.into()),
            mac,
            verifier,
        }
    }

    /// Two-byte password verifier, stored in clear after the salt.
    pub fn verifier(&self) -> [u8; VERIFIER_LEN] {
        self.verifier
    }

    /// Encrypt a buffer in place, folding the ciphertext into the
    /// authentication state. Callers must feed data strictly in stream
    /// order.
    pub fn encrypt_in_place(&mut self, buf: &mut [u8]) {
        self.ctr.apply_keystream(buf);
        self.mac.update(buf);
    }

    /// Finish the entry and return the truncated authentication code.
    pub fn auth_code(self) -> [u8; AUTH_CODE_LEN] {
        let digest = self.mac.finalize().into_bytes();
        let mut code = [0u8; AUTH_CODE_LEN];
        code.copy_from_slice(&digest[..AUTH_CODE_LEN]);
        code
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SALT: [u8; SALT_LEN] = [
        0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e, 0x0f,
        0x10,
    ];

    #[test]
    fn test_same_inputs_same_keystream() {
        let mut a: Vec<u8> = b"deterministic ciphertext please".to_vec();
        let mut b: Vec<u8> = a.clone();

        let mut cipher_a: EntryCipher = EntryCipher::new("pw", &SALT);
        let mut cipher_b: EntryCipher = EntryCipher::new("pw", &SALT);
        cipher_a.encrypt_in_place(&mut a);
        cipher_b.encrypt_in_place(&mut b);

        assert_eq!(a, b);
        assert_eq!(cipher_a.auth_code(), cipher_b.auth_code());
    }

    #[test]
    fn test_different_salt_different_ciphertext() {
        let mut a: Vec<u8> = b"some plaintext data".to_vec();
        let mut b: Vec<u8> = a.clone();

        EntryCipher::new("pw", &SALT).encrypt_in_place(&mut a);
        EntryCipher::new("pw", &[0xff; SALT_LEN]).encrypt_in_place(&mut b);

        assert_ne!(a, b);
    }

    #[test]
    fn test_ctr_round_trip() {
        let plaintext: Vec<u8> = (0..10_000).map(|i| (i % 256) as u8).collect();
        let mut buf: Vec<u8> = plaintext.clone();

        EntryCipher::new("secret", &SALT).encrypt_in_place(&mut buf);
        assert_ne!(buf, plaintext);

        // CTR is symmetric: applying the keystream again decrypts.
        EntryCipher::new("secret", &SALT).encrypt_in_place(&mut buf);
        assert_eq!(buf, plaintext);
    }

    #[test]
    fn test_split_feeding_matches_whole() {
        let plaintext: Vec<u8> = (0..5_000).map(|i| (i % 251) as u8).collect();

        let mut whole: Vec<u8> = plaintext.clone();
        let mut whole_cipher: EntryCipher = EntryCipher::new("pw", &SALT);
        whole_cipher.encrypt_in_place(&mut whole);

        let mut split: Vec<u8> = plaintext;
        let mut split_cipher: EntryCipher = EntryCipher::new("pw", &SALT);
        for piece in split.chunks_mut(317) {
            split_cipher.encrypt_in_place(piece);
        }

        assert_eq!(whole, split);
        assert_eq!(whole_cipher.auth_code(), split_cipher.auth_code());
    }

    #[test]
    fn test_verifier_depends_on_password_and_salt() {
        let v1: [u8; VERIFIER_LEN] = EntryCipher::new("pw", &SALT).verifier();
        let v2: [u8; VERIFIER_LEN] = EntryCipher::new("pw", &SALT).verifier();
        let v3: [u8; VERIFIER_LEN] = EntryCipher::new("other", &SALT).verifier();
        assert_eq!(v1, v2);
        assert_ne!(v1, v3);
    }
}
