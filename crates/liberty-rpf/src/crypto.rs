//! Archive ciphers.
//!
//! The TOC is AES-256 in ECB mode applied 16 times; the 16-fold
//! repetition is part of the archive format and must be kept exactly for
//! byte compatibility. Entry bodies flagged as encrypted take a single
//! AES-256-ECB pass with the same key. Every block is transformed
//! independently, so a TOC buffer can be decrypted from any 16-byte
//! boundary of the TOC.
//!
//! A key that is missing or shorter than 32 bytes turns every operation
//! into a no-op; the ciphertext is passed through unchanged.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use aes::Aes256;
use cipher::generic_array::GenericArray;
use cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use log::{debug, info};

/// Cipher block size.
pub const BLOCK_SIZE: usize = 16;

/// Key length in bytes.
pub const KEY_SIZE: usize = 32;

/// Number of times each block is run through the cipher.
pub const CIPHER_ROUNDS: usize = 16;

/// File name looked up by [`RpfKey::locate`].
pub const KEY_FILE_NAME: &str = "aes_key.bin";

/// A raw 32-byte archive key.
#[derive(Clone, PartialEq, Eq)]
pub struct RpfKey([u8; KEY_SIZE]);

impl RpfKey {
    /// Build a key from a raw blob. Returns `None` unless the blob holds
    /// at least 32 bytes; extra bytes are ignored.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; KEY_SIZE] = bytes.get(..KEY_SIZE)?.try_into().ok()?;
        Some(Self(bytes))
    }

    /// Raw key bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    /// Load a key file. The file must contain at least 32 bytes.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Option<Self> {
        let mut file = File::open(path).ok()?;
        let mut buf = Vec::with_capacity(KEY_SIZE);
        file.by_ref()
            .take(KEY_SIZE as u64)
            .read_to_end(&mut buf)
            .ok()?;
        Self::from_slice(&buf)
    }

    /// Search `dirs` in order for [`KEY_FILE_NAME`].
    ///
    /// Absence is not an error: the archive pipeline runs without
    /// decryption.
    pub fn locate<P: AsRef<Path>>(dirs: &[P]) -> Option<Self> {
        for dir in dirs {
            let candidate = dir.as_ref().join(KEY_FILE_NAME);
            if let Some(key) = Self::from_file(&candidate) {
                info!("Loaded archive key from {}", candidate.display());
                return Some(key);
            }
        }

        debug!("No archive key found; decryption disabled");
        None
    }

    /// Directories searched when no explicit list is configured.
    pub fn default_search_dirs() -> Vec<PathBuf> {
        vec![PathBuf::from("."), PathBuf::from(".."), PathBuf::from("game")]
    }
}

impl std::fmt::Debug for RpfKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RpfKey(..)")
    }
}

/// Decrypt `buffer` in place.
///
/// `toc_relative_offset` is the position of `buffer[0]` relative to the
/// start of the TOC. Leading bytes that precede the first full block
/// boundary are left untouched, as is any trailing partial block.
pub fn decrypt_toc_block(key: &[u8], buffer: &mut [u8], toc_relative_offset: u64) {
    let Some(cipher) = cipher_for(key) else {
        return;
    };

    for_each_block(buffer, toc_relative_offset, |block| {
        let block = GenericArray::from_mut_slice(block);
        for _ in 0..CIPHER_ROUNDS {
            cipher.decrypt_block(block);
        }
    });
}

/// Inverse of [`decrypt_toc_block`], used when writing archives.
pub fn encrypt_toc_block(key: &[u8], buffer: &mut [u8], toc_relative_offset: u64) {
    let Some(cipher) = cipher_for(key) else {
        return;
    };

    for_each_block(buffer, toc_relative_offset, |block| {
        let block = GenericArray::from_mut_slice(block);
        for _ in 0..CIPHER_ROUNDS {
            cipher.encrypt_block(block);
        }
    });
}

/// Decrypt an entry body in place: one AES-256-ECB pass over every
/// complete block. A trailing partial block is left as stored.
pub fn decrypt_body(key: &[u8], buffer: &mut [u8]) {
    let Some(cipher) = cipher_for(key) else {
        return;
    };

    for block in buffer.chunks_exact_mut(BLOCK_SIZE) {
        cipher.decrypt_block(GenericArray::from_mut_slice(block));
    }
}

/// Inverse of [`decrypt_body`].
pub fn encrypt_body(key: &[u8], buffer: &mut [u8]) {
    let Some(cipher) = cipher_for(key) else {
        return;
    };

    for block in buffer.chunks_exact_mut(BLOCK_SIZE) {
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
    }
}

fn cipher_for(key: &[u8]) -> Option<Aes256> {
    if key.len() < KEY_SIZE {
        debug!("Archive key unavailable ({} bytes); passing data through", key.len());
        return None;
    }
    Aes256::new_from_slice(&key[..KEY_SIZE]).ok()
}

fn for_each_block<F: FnMut(&mut [u8])>(buffer: &mut [u8], toc_relative_offset: u64, mut f: F) {
    let misalignment = (toc_relative_offset % BLOCK_SIZE as u64) as usize;
    let skip = (BLOCK_SIZE - misalignment) % BLOCK_SIZE;
    if skip >= buffer.len() {
        return;
    }

    for block in buffer[skip..].chunks_exact_mut(BLOCK_SIZE) {
        f(block);
    }
}
