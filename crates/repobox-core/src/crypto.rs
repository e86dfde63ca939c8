//! AES-256-GCM decryption of stored provider credentials. Ciphertext is
//! three base64 parts joined by `:` — `iv:tag:ciphertext` — matching the
//! format the credential store hands back from `git_provider:*` hashes.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::CryptoError;

pub const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Decrypts a `iv:tag:ciphertext` record. Tampering any byte of any part
/// surfaces as [`CryptoError::AuthenticationFailure`], never a panic.
pub fn decrypt(ciphertext: &str, key: &[u8; KEY_LEN]) -> Result<String, CryptoError> {
    let parts: Vec<&str> = ciphertext.split(':').collect();
    let [iv_part, tag_part, ct_part] = parts[..] else {
        return Err(CryptoError::MalformedInput);
    };

    let iv = STANDARD
        .decode(iv_part)
        .map_err(|_| CryptoError::MalformedInput)?;
    let tag = STANDARD
        .decode(tag_part)
        .map_err(|_| CryptoError::MalformedInput)?;
    let ct = STANDARD
        .decode(ct_part)
        .map_err(|_| CryptoError::MalformedInput)?;

    if iv.len() != NONCE_LEN || tag.len() != TAG_LEN {
        return Err(CryptoError::MalformedInput);
    }

    let mut sealed = Vec::with_capacity(ct.len() + tag.len());
    sealed.extend_from_slice(&ct);
    sealed.extend_from_slice(&tag);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Nonce::from_slice(&iv);
    let plaintext = cipher
        .decrypt(nonce, sealed.as_ref())
        .map_err(|_| CryptoError::AuthenticationFailure)?;

    String::from_utf8(plaintext).map_err(|_| CryptoError::AuthenticationFailure)
}

/// Encrypts `plaintext` into the same three-part format `decrypt` reads.
/// Used by tests to build fixtures; the runtime handler path only ever
/// decrypts values the store already holds.
pub fn encrypt(plaintext: &str, key: &[u8; KEY_LEN], iv: &[u8; NONCE_LEN]) -> String {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Nonce::from_slice(iv);
    // `encrypt` appends the 16-byte tag to the end of the ciphertext; the
    // wire format wants them as independent base64 parts, so split it
    // back apart here.
    let mut sealed = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .expect("AES-256-GCM encryption with a valid key/nonce cannot fail");
    let tag = sealed.split_off(sealed.len() - TAG_LEN);
    let ciphertext = sealed;
    format!(
        "{}:{}:{}",
        STANDARD.encode(iv),
        STANDARD.encode(&tag),
        STANDARD.encode(&ciphertext)
    )
}

/// Parses `ENCRYPTION_KEY` as hex, then base64, then raw bytes — first
/// successful 32-byte decode wins. A startup-fatal shape per 4.A/6.5.
pub fn parse_key(raw: &str) -> Result<[u8; KEY_LEN], CryptoError> {
    if let Ok(bytes) = hex::decode(raw) {
        if let Ok(key) = bytes.try_into() {
            return Ok(key);
        }
    }
    if let Ok(bytes) = STANDARD.decode(raw) {
        if let Ok(key) = bytes.try_into() {
            return Ok(key);
        }
    }
    if raw.len() == KEY_LEN {
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(raw.as_bytes());
        return Ok(key);
    }
    Err(CryptoError::KeyMisconfigured(format!(
        "expected a {KEY_LEN}-byte key as hex, base64, or raw bytes, got {} chars",
        raw.len()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> [u8; KEY_LEN] {
        [7u8; KEY_LEN]
    }

    fn test_iv() -> [u8; NONCE_LEN] {
        [3u8; NONCE_LEN]
    }

    #[test]
    fn round_trip() {
        let key = test_key();
        let iv = test_iv();
        let ciphertext = encrypt("super-secret-token", &key, &iv);
        let plaintext = decrypt(&ciphertext, &key).expect("decrypt");
        assert_eq!(plaintext, "super-secret-token");
    }

    #[test]
    fn tampered_tag_fails_auth() {
        let key = test_key();
        let iv = test_iv();
        let ciphertext = encrypt("hello world", &key, &iv);
        let parts: Vec<&str> = ciphertext.split(':').collect();
        let mut tag = STANDARD.decode(parts[1]).unwrap();
        tag[0] ^= 0xFF;
        let tampered = format!("{}:{}:{}", parts[0], STANDARD.encode(tag), parts[2]);
        let err = decrypt(&tampered, &key).unwrap_err();
        assert!(matches!(err, CryptoError::AuthenticationFailure));
    }

    #[test]
    fn tampered_ciphertext_fails_auth() {
        let key = test_key();
        let iv = test_iv();
        let ciphertext = encrypt("hello world", &key, &iv);
        let parts: Vec<&str> = ciphertext.split(':').collect();
        let mut ct = STANDARD.decode(parts[2]).unwrap();
        ct[0] ^= 0xFF;
        let tampered = format!("{}:{}:{}", parts[0], parts[1], STANDARD.encode(ct));
        let err = decrypt(&tampered, &key).unwrap_err();
        assert!(matches!(err, CryptoError::AuthenticationFailure));
    }

    #[test]
    fn wrong_part_count_is_malformed() {
        let err = decrypt("onlyonepart", &test_key()).unwrap_err();
        assert!(matches!(err, CryptoError::MalformedInput));
    }

    #[test]
    fn parse_key_accepts_hex() {
        let hex_key = "07".repeat(KEY_LEN);
        let key = parse_key(&hex_key).expect("parse");
        assert_eq!(key, [7u8; KEY_LEN]);
    }

    #[test]
    fn parse_key_accepts_base64() {
        let b64_key = STANDARD.encode([9u8; KEY_LEN]);
        let key = parse_key(&b64_key).expect("parse");
        assert_eq!(key, [9u8; KEY_LEN]);
    }

    #[test]
    fn parse_key_rejects_wrong_length() {
        let err = parse_key("too-short").unwrap_err();
        assert!(matches!(err, CryptoError::KeyMisconfigured(_)));
    }
}
