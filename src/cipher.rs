//! Payload decoding: plain JSON, or base64 + AES-ECB ciphertext wrapping JSON.
//!
//! Decrypted text is tolerated to carry padding or garbage around the object:
//! everything outside the first `{` and the first `}` is discarded. Objects
//! containing nested braces are cut at the first closing brace.

use aes::cipher::{generic_array::GenericArray, BlockDecrypt, KeyInit};
use aes::{Aes128, Aes192, Aes256};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::fmt;

use crate::constants::{AES_BLOCK_SIZE, DEFAULT_KEY_SIZE};
use crate::error::CipherError;
use crate::types::DecodedRecord;

#[derive(Clone)]
enum BlockCipher {
    Aes128(Aes128),
    Aes192(Aes192),
    Aes256(Aes256),
}

/// Symmetric key used to decrypt incoming payloads in ECB mode.
#[derive(Clone)]
pub struct CipherContext {
    cipher: BlockCipher,
    key_size: usize,
}

impl CipherContext {
    /// Build a context from `key`, keeping exactly its first `key_size` bytes.
    pub fn new(key: &str, key_size: usize) -> Result<Self, CipherError> {
        let material = key.as_bytes();
        if !matches!(key_size, 16 | 24 | 32) {
            return Err(CipherError::UnsupportedKeySize(key_size));
        }
        if material.len() < key_size {
            return Err(CipherError::Key {
                expected: key_size,
                actual: material.len(),
            });
        }
        let truncated = &material[..key_size];
        let cipher = match key_size {
            16 => BlockCipher::Aes128(Aes128::new(GenericArray::from_slice(truncated))),
            24 => BlockCipher::Aes192(Aes192::new(GenericArray::from_slice(truncated))),
            _ => BlockCipher::Aes256(Aes256::new(GenericArray::from_slice(truncated))),
        };
        Ok(Self { cipher, key_size })
    }

    pub fn with_default_size(key: &str) -> Result<Self, CipherError> {
        Self::new(key, DEFAULT_KEY_SIZE)
    }

    pub fn key_size(&self) -> usize {
        self.key_size
    }

    /// Decrypt block-aligned ciphertext, each block independently.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CipherError> {
        if ciphertext.len() % AES_BLOCK_SIZE != 0 {
            return Err(CipherError::BlockAlignment(ciphertext.len()));
        }
        let mut buf = ciphertext.to_vec();
        for chunk in buf.chunks_exact_mut(AES_BLOCK_SIZE) {
            let block = GenericArray::from_mut_slice(chunk);
            match &self.cipher {
                BlockCipher::Aes128(c) => c.decrypt_block(block),
                BlockCipher::Aes192(c) => c.decrypt_block(block),
                BlockCipher::Aes256(c) => c.decrypt_block(block),
            }
        }
        Ok(buf)
    }
}

impl fmt::Debug for CipherContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherContext")
            .field("key_size", &self.key_size)
            .field("key", &"<redacted>")
            .finish()
    }
}

/// Decode one raw message into a record.
pub fn decode(raw: &str, cipher: Option<&CipherContext>) -> Result<DecodedRecord, CipherError> {
    let value: serde_json::Value = match cipher {
        None => serde_json::from_str(raw)?,
        Some(ctx) => {
            let ciphertext = STANDARD.decode(raw.trim())?;
            let plaintext = ctx.decrypt(&ciphertext)?;
            let json = extract_json(&plaintext)?;
            serde_json::from_str(&json)?
        }
    };

    match value {
        serde_json::Value::Object(map) => Ok(map),
        _ => Err(CipherError::NotAnObject),
    }
}

/// Slice the JSON object out of decrypted text.
///
/// Surrounding whitespace is stripped, tabs are removed, and the span from the
/// first `{` to the first `}` is kept. A `}` that precedes the first `{` yields
/// an empty span, which then fails to parse.
fn extract_json(plaintext: &[u8]) -> Result<String, CipherError> {
    if !plaintext.is_ascii() {
        return Err(CipherError::Encoding);
    }
    let text = std::str::from_utf8(plaintext).map_err(|_| CipherError::Encoding)?;
    let cleaned: String = text
        .trim_matches(is_strip_char)
        .chars()
        .filter(|c| *c != '\t')
        .collect();

    let start = cleaned.find('{').ok_or(CipherError::Format)?;
    let end = cleaned.find('}').ok_or(CipherError::Format)?;
    if end < start {
        return Ok(String::new());
    }
    Ok(cleaned[start..=end].trim_matches(is_strip_char).to_string())
}

fn is_strip_char(c: char) -> bool {
    c.is_ascii_whitespace() || c == '\x0b' || ('\x1c'..='\x1f').contains(&c)
}
