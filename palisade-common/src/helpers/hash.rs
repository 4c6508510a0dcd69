use data_encoding::{BASE64URL_NOPAD, HEXLOWER};
use rand::Rng;
use sha2::{Digest, Sha256};

use crate::helpers::rng::get_crypto_rng;
use crate::Secret;

pub const API_KEY_PREFIX: &str = "rl_";

/// Hex-lowercase SHA-256 digest of an API key plaintext. Only the
/// fingerprint is ever persisted.
pub fn key_fingerprint(plaintext: &str) -> String {
    HEXLOWER.encode(&Sha256::digest(plaintext.as_bytes()))
}

/// Generates a new API key plaintext: the `rl_` prefix followed by a
/// URL-safe token carrying 192 bits of entropy (32 characters).
pub fn generate_api_key() -> Secret<String> {
    let bytes = get_crypto_rng().gen::<[u8; 24]>();
    Secret::new(format!(
        "{}{}",
        API_KEY_PREFIX,
        BASE64URL_NOPAD.encode(&bytes)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_hex_lowercase() {
        let fp = key_fingerprint("rl_test");
        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_fingerprint_is_stable() {
        assert_eq!(key_fingerprint("rl_abc"), key_fingerprint("rl_abc"));
        assert_ne!(key_fingerprint("rl_abc"), key_fingerprint("rl_abd"));
    }

    #[test]
    fn test_generated_keys_have_prefix_and_length() {
        let key = generate_api_key();
        let plaintext = key.expose_secret();
        assert!(plaintext.starts_with(API_KEY_PREFIX));
        assert!(plaintext.len() >= API_KEY_PREFIX.len() + 24);
    }

    #[test]
    fn test_generated_keys_are_unique() {
        let a = generate_api_key();
        let b = generate_api_key();
        assert_ne!(a.expose_secret(), b.expose_secret());
    }
}
