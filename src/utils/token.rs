use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

/// Opaque tokens handed to clients (refresh, password reset). 256 bits of
/// CSPRNG output, hex encoded. Only the SHA-256 digest is ever persisted,
/// which keeps the stored value fixed-width and uniquely indexable.
pub struct TokenService;

impl TokenService {
    pub fn generate_token() -> String {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        hex::encode(bytes)
    }

    pub fn hash_token(token: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        hex::encode(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_unique_and_hex() {
        let first = TokenService::generate_token();
        let second = TokenService::generate_token();

        assert_ne!(first, second);
        assert_eq!(first.len(), 64);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn digest_is_deterministic_and_fixed_width() {
        let token = TokenService::generate_token();
        let digest = TokenService::hash_token(&token);

        assert_eq!(digest, TokenService::hash_token(&token));
        assert_eq!(digest.len(), 64);
        assert_ne!(digest, token);
    }

    #[test]
    fn known_digest() {
        // sha256("abc")
        assert_eq!(
            TokenService::hash_token("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
