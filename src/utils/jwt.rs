use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, TokenData, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::model::UserRole;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,  // Subject (user ID)
    pub email: String,
    pub role: String,
    pub jti: String,  // Token id, recorded on the session row
    pub exp: i64,     // Expiration time
    pub iat: i64,     // Issued at
}

impl Claims {
    pub fn user_id(&self) -> Result<Uuid, uuid::Error> {
        Uuid::parse_str(&self.sub)
    }

    pub fn token_id(&self) -> Result<Uuid, uuid::Error> {
        Uuid::parse_str(&self.jti)
    }
}

#[derive(Clone)]
pub struct JwtKeys {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_token_expiry: Duration,
}

impl JwtKeys {
    pub fn new(config: &crate::config::JwtConfig) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(config.secret.as_ref()),
            decoding_key: DecodingKey::from_secret(config.secret.as_ref()),
            access_token_expiry: Duration::seconds(config.access_token_expiry as i64),
        }
    }

    /// Issue an access token; the returned jti must be stored on the session.
    pub fn generate_access_token(
        &self,
        user_id: Uuid,
        email: &str,
        role: UserRole,
    ) -> Result<(String, Uuid), jsonwebtoken::errors::Error> {
        let now = Utc::now();
        let jti = Uuid::new_v4();
        let claims = Claims {
            sub: user_id.to_string(),
            email: email.to_string(),
            role: role.as_str().to_string(),
            jti: jti.to_string(),
            exp: (now + self.access_token_expiry).timestamp(),
            iat: now.timestamp(),
        };

        let token = encode(&Header::default(), &claims, &self.encoding_key)?;
        Ok((token, jti))
    }

    pub fn verify_access_token(
        &self,
        token: &str,
    ) -> Result<TokenData<Claims>, jsonwebtoken::errors::Error> {
        decode::<Claims>(token, &self.decoding_key, &Validation::default())
    }

    pub fn access_token_expiry_secs(&self) -> u64 {
        self.access_token_expiry.num_seconds() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JwtConfig;

    fn keys() -> JwtKeys {
        JwtKeys::new(&JwtConfig {
            secret: "unit-test-secret".to_string(),
            access_token_expiry: 3600,
            refresh_token_expiry: 604800,
        })
    }

    #[test]
    fn access_token_round_trip() {
        let keys = keys();
        let user_id = Uuid::new_v4();
        let (token, jti) = keys
            .generate_access_token(user_id, "worker@example.com", UserRole::Manager)
            .unwrap();

        let data = keys.verify_access_token(&token).unwrap();
        assert_eq!(data.claims.user_id().unwrap(), user_id);
        assert_eq!(data.claims.token_id().unwrap(), jti);
        assert_eq!(data.claims.role, "manager");
        assert_eq!(data.claims.exp - data.claims.iat, 3600);
    }

    #[test]
    fn every_token_gets_a_fresh_jti() {
        let keys = keys();
        let user_id = Uuid::new_v4();
        let (_, first) = keys
            .generate_access_token(user_id, "worker@example.com", UserRole::Employee)
            .unwrap();
        let (_, second) = keys
            .generate_access_token(user_id, "worker@example.com", UserRole::Employee)
            .unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn rejects_wrong_secret() {
        let keys = keys();
        let other = JwtKeys::new(&JwtConfig {
            secret: "a-different-secret".to_string(),
            access_token_expiry: 3600,
            refresh_token_expiry: 604800,
        });

        let (token, _) = keys
            .generate_access_token(Uuid::new_v4(), "worker@example.com", UserRole::Hr)
            .unwrap();
        assert!(other.verify_access_token(&token).is_err());
    }

    #[test]
    fn rejects_tampered_payload() {
        let keys = keys();
        let (token, _) = keys
            .generate_access_token(Uuid::new_v4(), "worker@example.com", UserRole::Employee)
            .unwrap();

        let mut parts: Vec<String> = token.split('.').map(|s| s.to_string()).collect();
        parts[1] = parts[1].chars().rev().collect();
        assert!(keys.verify_access_token(&parts.join(".")).is_err());
    }
}
