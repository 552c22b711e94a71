//! Session token cipher
//!
//! Encrypts a short ordered list of key/value pairs into a hex string that can be
//! embedded in a request cookie, and decrypts such strings back into pairs.
//!
//! Wire format (before encryption):
//!
//! ```text
//! md5(payload) || payload || NUL padding to a 16-byte boundary
//! payload = k1 \0 v1 \0 k2 \0 v2 ...
//! ```
//!
//! The plaintext is encrypted with AES-256-CBC using a fixed key and IV taken from a
//! single shared secret: bytes `0..32` are the key, bytes `32..48` the IV.
//!
//! The digest is a plain MD5, not a keyed MAC. Existing token consumers depend on
//! this layout, so it is kept as is.

use aes::cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use thiserror::Error;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Length of the embedded MD5 digest
pub const DIGEST_LEN: usize = 16;

/// AES block size; the plaintext is NUL-padded to a multiple of it
pub const BLOCK_LEN: usize = 16;

/// Number of secret bytes used as the AES-256 key
pub const KEY_LEN: usize = 32;

/// Number of secret bytes used as the CBC initialization vector
pub const IV_LEN: usize = 16;

const TOKEN_DELIMITER: u8 = 0;

/// Errors produced by [`TokenCipher`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CipherError {
    #[error("Cipher secret must be at least {required} bytes, got {actual}")]
    InvalidSecret { required: usize, actual: usize },

    #[error("Token is not valid hex: {0}")]
    InvalidHex(String),

    #[error("Token ciphertext length {0} is not a positive multiple of {BLOCK_LEN}")]
    InvalidLength(usize),

    #[error("Token integrity check failed: digest mismatch")]
    Integrity,

    #[error("Token has {count} fields; cannot pair an odd number into keys and values")]
    MalformedToken { count: usize },

    #[error("Token field {0:?} contains a NUL byte")]
    EmbeddedNul(String),

    #[error("Token field is not valid UTF-8")]
    InvalidUtf8,

    #[error("Last token value for key {0:?} is empty and would be lost as padding")]
    EmptyTrailingValue(String),
}

/// Symmetric cipher for key/value session tokens
#[derive(Clone)]
pub struct TokenCipher {
    key: [u8; KEY_LEN],
    iv: [u8; IV_LEN],
}

impl std::fmt::Debug for TokenCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCipher").finish_non_exhaustive()
    }
}

impl TokenCipher {
    /// Build a cipher from the shared secret.
    ///
    /// Bytes beyond the first 48 are ignored.
    pub fn new(secret: &str) -> Result<Self, CipherError> {
        let bytes = secret.as_bytes();
        let required = KEY_LEN + IV_LEN;
        if bytes.len() < required {
            return Err(CipherError::InvalidSecret {
                required,
                actual: bytes.len(),
            });
        }

        let mut key = [0u8; KEY_LEN];
        let mut iv = [0u8; IV_LEN];
        key.copy_from_slice(&bytes[..KEY_LEN]);
        iv.copy_from_slice(&bytes[KEY_LEN..required]);

        Ok(Self { key, iv })
    }

    /// Encrypt ordered key/value pairs into a lowercase hex string
    pub fn encrypt(&self, pairs: &[(String, String)]) -> Result<String, CipherError> {
        let payload = flatten(pairs)?;

        let mut plaintext = Vec::with_capacity(DIGEST_LEN + payload.len() + BLOCK_LEN);
        plaintext.extend_from_slice(&md5::compute(&payload).0);
        plaintext.extend_from_slice(&payload);

        Ok(hex::encode(self.seal(plaintext)))
    }

    /// Decrypt a hex token back into its ordered key/value pairs
    pub fn decrypt(&self, token: &str) -> Result<Vec<(String, String)>, CipherError> {
        let ciphertext =
            hex::decode(token.trim()).map_err(|e| CipherError::InvalidHex(e.to_string()))?;
        if ciphertext.is_empty() || ciphertext.len() % BLOCK_LEN != 0 {
            return Err(CipherError::InvalidLength(ciphertext.len()));
        }

        let plaintext = Aes256CbcDec::new(&self.key.into(), &self.iv.into())
            .decrypt_padded_vec_mut::<NoPadding>(&ciphertext)
            .map_err(|_| CipherError::InvalidLength(ciphertext.len()))?;

        let (digest, body) = plaintext.split_at(DIGEST_LEN);
        let end = body
            .iter()
            .rposition(|b| *b != TOKEN_DELIMITER)
            .map_or(0, |i| i + 1);
        let payload = &body[..end];

        if md5::compute(payload).0 != digest {
            return Err(CipherError::Integrity);
        }

        unflatten(payload)
    }

    /// Pad and encrypt a prepared plaintext (digest already prepended)
    fn seal(&self, mut plaintext: Vec<u8>) -> Vec<u8> {
        let remainder = plaintext.len() % BLOCK_LEN;
        if remainder != 0 {
            plaintext.resize(plaintext.len() + BLOCK_LEN - remainder, TOKEN_DELIMITER);
        }

        Aes256CbcEnc::new(&self.key.into(), &self.iv.into())
            .encrypt_padded_vec_mut::<NoPadding>(&plaintext)
    }
}

fn flatten(pairs: &[(String, String)]) -> Result<Vec<u8>, CipherError> {
    // Trailing NULs are stripped as padding on decrypt.
    if let Some((key, value)) = pairs.last() {
        if value.is_empty() {
            return Err(CipherError::EmptyTrailingValue(key.clone()));
        }
    }

    let mut payload = Vec::new();
    for (index, field) in pairs.iter().flat_map(|(k, v)| [k, v]).enumerate() {
        if field.as_bytes().contains(&TOKEN_DELIMITER) {
            return Err(CipherError::EmbeddedNul(field.clone()));
        }
        if index > 0 {
            payload.push(TOKEN_DELIMITER);
        }
        payload.extend_from_slice(field.as_bytes());
    }
    Ok(payload)
}

fn unflatten(payload: &[u8]) -> Result<Vec<(String, String)>, CipherError> {
    if payload.is_empty() {
        return Ok(Vec::new());
    }

    let tokens = payload
        .split(|b| *b == TOKEN_DELIMITER)
        .map(|t| String::from_utf8(t.to_vec()).map_err(|_| CipherError::InvalidUtf8))
        .collect::<Result<Vec<_>, _>>()?;

    if tokens.len() % 2 != 0 {
        return Err(CipherError::MalformedToken {
            count: tokens.len(),
        });
    }

    let mut iter = tokens.into_iter();
    let mut pairs = Vec::new();
    while let (Some(k), Some(v)) = (iter.next(), iter.next()) {
        pairs.push((k, v));
    }
    Ok(pairs)
}
