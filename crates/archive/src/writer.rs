//! Streaming single-entry container writer.
//!
//! Layout produced (all integers little-endian):
//!
//! ```text
//! ┌──────────────────────────────┐ offset 0
//! │ local file header            │   Zip64 + AES extra fields
//! ├──────────────────────────────┤
//! │ salt ∥ verifier ∥ ciphertext │   written incrementally
//! │ ∥ auth code                  │
//! ├──────────────────────────────┤
//! │ data descriptor (64-bit)     │
//! ├──────────────────────────────┤
//! │ central directory entry      │
//! │ zip64 end of central dir     │
//! │ zip64 locator ∥ end of dir   │
//! └──────────────────────────────┘
//! ```
//!
//! Sizes are not known up front, so the local header defers them to the
//! data descriptor (general-purpose bit 3) and the central directory
//! carries the real values in its Zip64 extra field.

use std::io::Write;

use chrono::{DateTime, Datelike, Timelike, Utc};

use crate::crypto::{EntryCipher, AUTH_CODE_LEN, SALT_LEN, VERIFIER_LEN};
use crate::error::ArchiveError;
use crate::salt::OneShotSalt;

const LOCAL_HEADER_SIG: u32 = 0x0403_4b50;
const DATA_DESCRIPTOR_SIG: u32 = 0x0807_4b50;
const CENTRAL_HEADER_SIG: u32 = 0x0201_4b50;
const ZIP64_EOCD_SIG: u32 = 0x0606_4b50;
const ZIP64_LOCATOR_SIG: u32 = 0x0706_4b50;
const EOCD_SIG: u32 = 0x0605_4b50;

/// Zip64 support.
const VERSION_NEEDED: u16 = 45;
/// bit 0 encrypted, bit 3 data descriptor, bit 11 UTF-8 names.
const FLAGS: u16 = 0x0809;
/// AES encryption marker method.
const METHOD_AES: u16 = 99;

const ZIP64_EXTRA_TAG: u16 = 0x0001;
const AES_EXTRA_TAG: u16 = 0x9901;
/// AE-2: no CRC of the plaintext is recorded.
const AES_VENDOR_VERSION: u16 = 2;
const AES_STRENGTH_256: u8 = 3;
/// Actual method inside the AES wrapper: stored.
const METHOD_STORE: u16 = 0;

/// Entry data is encrypted through a bounded scratch buffer so arbitrarily
/// large writes never double the pipeline's memory footprint.
const ENCRYPT_SCRATCH: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Created,
    Streaming,
}

/// Writer for a single-entry encrypted container.
///
/// Call order is `begin` once, `write` any number of times, `finish`
/// once; anything else fails with [`ArchiveError::Sequence`].
pub struct ContainerWriter {
    entry_name: String,
    dos_time: u16,
    dos_date: u16,
    salt: [u8; SALT_LEN],
    cipher: Option<EntryCipher>,
    plaintext_len: u64,
    /// Container bytes emitted so far.
    position: u64,
    scratch: Vec<u8>,
    phase: Phase,
}

impl ContainerWriter {
    /// Prepare a writer for one entry.
    ///
    /// # Arguments
    /// * `entry_name` - Name stored in the archive (forward-slash form)
    /// * `modified` - Entry modification timestamp
    /// * `password` - Encryption password
    /// * `salt_source` - One-shot salt source, drawn exactly once here
    pub fn new(
        entry_name: impl Into<String>,
        modified: DateTime<Utc>,
        password: &str,
        salt_source: &OneShotSalt,
    ) -> Result<Self, ArchiveError> {
        let salt: [u8; SALT_LEN] = salt_source.take(SALT_LEN)?;
        let (dos_time, dos_date) = dos_datetime(&modified);
        Ok(Self {
            entry_name: entry_name.into(),
            dos_time,
            dos_date,
            salt,
            cipher: Some(EntryCipher::new(password, &salt)),
            plaintext_len: 0,
            position: 0,
            scratch: Vec::with_capacity(ENCRYPT_SCRATCH),
            phase: Phase::Created,
        })
    }

    /// The salt this container encrypts under.
    pub fn salt(&self) -> [u8; SALT_LEN] {
        self.salt
    }

    /// Write the local header, salt, and password verifier.
    pub fn begin<W: Write>(&mut self, out: &mut W) -> Result<(), ArchiveError> {
        if self.phase != Phase::Created {
            return Err(ArchiveError::Sequence("begin called twice"));
        }
        let name: &[u8] = self.entry_name.as_bytes();

        put_u32(out, LOCAL_HEADER_SIG)?;
        put_u16(out, VERSION_NEEDED)?;
        put_u16(out, FLAGS)?;
        put_u16(out, METHOD_AES)?;
        put_u16(out, self.dos_time)?;
        put_u16(out, self.dos_date)?;
        put_u32(out, 0)?; // crc: AE-2 leaves it zero
        put_u32(out, u32::MAX)?; // sizes deferred to the descriptor
        put_u32(out, u32::MAX)?;
        put_u16(out, name.len() as u16)?;
        put_u16(out, (local_zip64_extra_len() + aes_extra_len()) as u16)?;
        out.write_all(name)?;

        // Zip64 extra: sizes unknown while streaming, zeros here.
        put_u16(out, ZIP64_EXTRA_TAG)?;
        put_u16(out, 16)?;
        put_u64(out, 0)?;
        put_u64(out, 0)?;
        write_aes_extra(out)?;

        out.write_all(&self.salt)?;
        let verifier: [u8; VERIFIER_LEN] = match &self.cipher {
            Some(cipher) => cipher.verifier(),
            None => return Err(ArchiveError::Sequence("cipher missing")),
        };
        out.write_all(&verifier)?;

        self.position = local_header_len(name.len()) as u64 + (SALT_LEN + VERIFIER_LEN) as u64;
        self.phase = Phase::Streaming;
        Ok(())
    }

    /// Encrypt and write one run of plaintext.
    pub fn write<W: Write>(&mut self, out: &mut W, plaintext: &[u8]) -> Result<(), ArchiveError> {
        if self.phase != Phase::Streaming {
            return Err(ArchiveError::Sequence("write outside begin..finish"));
        }
        let cipher: &mut EntryCipher = match &mut self.cipher {
            Some(cipher) => cipher,
            None => return Err(ArchiveError::Sequence("cipher missing")),
        };
        for piece in plaintext.chunks(ENCRYPT_SCRATCH) {
            self.scratch.clear();
            self.scratch.extend_from_slice(piece);
            cipher.encrypt_in_place(&mut self.scratch);
            out.write_all(&self.scratch)?;
        }
        self.plaintext_len += plaintext.len() as u64;
        self.position += plaintext.len() as u64;
        Ok(())
    }

    /// Write the authentication code, data descriptor, and central
    /// directory, completing the container.
    pub fn finish<W: Write>(mut self, out: &mut W) -> Result<(), ArchiveError> {
        if self.phase != Phase::Streaming {
            return Err(ArchiveError::Sequence("finish before begin"));
        }
        let cipher: EntryCipher = match self.cipher.take() {
            Some(cipher) => cipher,
            None => return Err(ArchiveError::Sequence("cipher missing")),
        };
        out.write_all(&cipher.auth_code())?;
        self.position += AUTH_CODE_LEN as u64;

        let compressed: u64 =
            (SALT_LEN + VERIFIER_LEN + AUTH_CODE_LEN) as u64 + self.plaintext_len;
        let uncompressed: u64 = self.plaintext_len;

        // 64-bit data descriptor (the local header used a Zip64 extra).
        put_u32(out, DATA_DESCRIPTOR_SIG)?;
        put_u32(out, 0)?; // crc
        put_u64(out, compressed)?;
        put_u64(out, uncompressed)?;
        self.position += 24;

        let cd_offset: u64 = self.position;
        let name: &[u8] = self.entry_name.as_bytes();

        put_u32(out, CENTRAL_HEADER_SIG)?;
        put_u16(out, VERSION_NEEDED)?; // version made by
        put_u16(out, VERSION_NEEDED)?;
        put_u16(out, FLAGS)?;
        put_u16(out, METHOD_AES)?;
        put_u16(out, self.dos_time)?;
        put_u16(out, self.dos_date)?;
        put_u32(out, 0)?; // crc
        put_u32(out, u32::MAX)?;
        put_u32(out, u32::MAX)?;
        put_u16(out, name.len() as u16)?;
        put_u16(out, (central_zip64_extra_len() + aes_extra_len()) as u16)?;
        put_u16(out, 0)?; // comment
        put_u16(out, 0)?; // disk number start
        put_u16(out, 0)?; // internal attributes
        put_u32(out, 0)?; // external attributes
        put_u32(out, u32::MAX)?; // local header offset, in Zip64 extra
        out.write_all(name)?;

        put_u16(out, ZIP64_EXTRA_TAG)?;
        put_u16(out, 24)?;
        put_u64(out, uncompressed)?;
        put_u64(out, compressed)?;
        put_u64(out, 0)?; // local header offset
        write_aes_extra(out)?;

        let cd_size: u64 = central_header_len(name.len()) as u64;

        // Zip64 end of central directory record.
        let zip64_eocd_offset: u64 = cd_offset + cd_size;
        put_u32(out, ZIP64_EOCD_SIG)?;
        put_u64(out, 44)?; // remaining record size
        put_u16(out, VERSION_NEEDED)?;
        put_u16(out, VERSION_NEEDED)?;
        put_u32(out, 0)?; // this disk
        put_u32(out, 0)?; // central directory disk
        put_u64(out, 1)?; // entries on this disk
        put_u64(out, 1)?; // entries total
        put_u64(out, cd_size)?;
        put_u64(out, cd_offset)?;

        // Zip64 locator.
        put_u32(out, ZIP64_LOCATOR_SIG)?;
        put_u32(out, 0)?;
        put_u64(out, zip64_eocd_offset)?;
        put_u32(out, 1)?; // total disks

        // Classic end of central directory.
        put_u32(out, EOCD_SIG)?;
        put_u16(out, 0)?;
        put_u16(out, 0)?;
        put_u16(out, 1)?;
        put_u16(out, 1)?;
        put_u32(out, u32::MAX)?;
        put_u32(out, u32::MAX)?;
        put_u16(out, 0)?;

        Ok(())
    }
}

// ============================================================================
// Layout helpers
// ============================================================================

fn local_zip64_extra_len() -> usize {
    4 + 16
}

fn central_zip64_extra_len() -> usize {
    4 + 24
}

fn aes_extra_len() -> usize {
    4 + 7
}

/// Fixed local header length for a given name length.
fn local_header_len(name_len: usize) -> usize {
    30 + name_len + local_zip64_extra_len() + aes_extra_len()
}

fn central_header_len(name_len: usize) -> usize {
    46 + name_len + central_zip64_extra_len() + aes_extra_len()
}

fn write_aes_extra<W: Write>(out: &mut W) -> Result<(), ArchiveError> {
    put_u16(out, AES_EXTRA_TAG)?;
    put_u16(out, 7)?;
    put_u16(out, AES_VENDOR_VERSION)?;
    out.write_all(b"AE")?;
    out.write_all(&[AES_STRENGTH_256])?;
    put_u16(out, METHOD_STORE)?;
    Ok(())
}

/// Convert a timestamp to MS-DOS time and date words.
fn dos_datetime(ts: &DateTime<Utc>) -> (u16, u16) {
    let year: i32 = ts.year().clamp(1980, 2107);
    let date: u16 = (((year - 1980) as u16) << 9) | ((ts.month() as u16) << 5) | ts.day() as u16;
    let time: u16 =
        ((ts.hour() as u16) << 11) | ((ts.minute() as u16) << 5) | (ts.second() as u16 / 2);
    (time, date)
}

fn put_u16<W: Write>(out: &mut W, v: u16) -> Result<(), ArchiveError> {
    out.write_all(&v.to_le_bytes())?;
    Ok(())
}

fn put_u32<W: Write>(out: &mut W, v: u32) -> Result<(), ArchiveError> {
    out.write_all(&v.to_le_bytes())?;
    Ok(())
}

fn put_u64<W: Write>(out: &mut W, v: u64) -> Result<(), ArchiveError> {
    out.write_all(&v.to_le_bytes())?;
    Ok(())
}
