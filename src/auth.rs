use actix_web::{http::header::HeaderValue, HttpRequest};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::schemas::UserId;

type HmacSha256 = Hmac<Sha256>;

const BEARER: &str = "Bearer ";

/// Issues and checks session tokens of the form `<uid>.<issued-at>.<signature>`.
///
/// The signature is an HMAC-SHA256 over `<uid>.<issued-at>` keyed with the
/// SHA-256 digest of the configured secret.
#[derive(Clone)]
pub struct TokenSigner {
    key: Vec<u8>,
    ttl: Duration,
}

impl TokenSigner {
    pub fn new(secret: &str, ttl: Duration) -> Self {
        let mut sha256_hasher = Sha256::new();
        sha256_hasher.update(secret.as_bytes());
        Self {
            key: sha256_hasher.finalize().to_vec(),
            ttl,
        }
    }

    pub fn issue(&self, uid: &str, now: DateTime<Utc>) -> Option<String> {
        let payload = format!("{}.{}", uid, now.timestamp());
        let mac = self.mac(&payload)?;
        Some(format!("{}.{}", payload, hex::encode(mac.finalize().into_bytes())))
    }

    /// Returns the token's user when the signature matches and it hasn't expired.
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Option<UserId> {
        let (payload, signature) = token.rsplit_once('.')?;
        let (uid, issued_at) = payload.split_once('.')?;
        let signature = hex::decode(signature).ok()?;
        self.mac(payload)?.verify_slice(&signature).ok()?;

        let issued_at = DateTime::from_timestamp(issued_at.parse().ok()?, 0)?;
        if uid.is_empty() || now - issued_at > self.ttl {
            return None;
        }
        Some(uid.to_string())
    }

    fn mac(&self, payload: &str) -> Option<HmacSha256> {
        let mut hmac_hasher = HmacSha256::new_from_slice(&self.key).ok()?;
        hmac_hasher.update(payload.as_bytes());
        Some(hmac_hasher)
    }
}

/// The session token carried in the `Authorization: Bearer` header, if any.
pub fn bearer_token(request: &HttpRequest) -> Option<&str> {
    request
        .headers()
        .get(actix_web::http::header::AUTHORIZATION)
        .map(HeaderValue::to_str)?
        .ok()?
        .strip_prefix(BEARER)
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

pub fn new_salt() -> String {
    let mut salt = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt);
    hex::encode(salt)
}

pub fn hash_password(salt: &str, password: &str) -> Option<String> {
    let mut hmac_hasher = HmacSha256::new_from_slice(salt.as_bytes()).ok()?;
    hmac_hasher.update(password.as_bytes());
    Some(hex::encode(hmac_hasher.finalize().into_bytes()))
}

pub fn verify_password(salt: &str, password: &str, expected_hash: &str) -> bool {
    let Ok(expected) = hex::decode(expected_hash) else {
        return false;
    };
    let Ok(mut hmac_hasher) = HmacSha256::new_from_slice(salt.as_bytes()) else {
        return false;
    };
    hmac_hasher.update(password.as_bytes());
    hmac_hasher.verify_slice(&expected).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    fn signer() -> TokenSigner {
        TokenSigner::new("test-secret", Duration::hours(1))
    }

    #[test]
    fn issued_tokens_verify() {
        let now = Utc::now();
        let token = signer().issue("user-1", now).unwrap();
        assert_eq!(signer().verify(&token, now), Some("user-1".to_string()));
    }

    #[test]
    fn tampered_or_foreign_tokens_are_rejected() {
        let now = Utc::now();
        let token = signer().issue("user-1", now).unwrap();
        let forged = token.replacen("user-1", "user-2", 1);
        assert_eq!(signer().verify(&forged, now), None);

        let other = TokenSigner::new("another-secret", Duration::hours(1));
        assert_eq!(other.verify(&token, now), None);
        assert_eq!(signer().verify("garbage", now), None);
    }

    #[test]
    fn tokens_expire() {
        let issued = Utc::now() - Duration::hours(2);
        let token = signer().issue("user-1", issued).unwrap();
        assert_eq!(signer().verify(&token, Utc::now()), None);
    }

    #[test]
    fn bearer_header_is_extracted() {
        let request = TestRequest::default()
            .insert_header(("Authorization", "Bearer abc.1.ff"))
            .to_http_request();
        assert_eq!(bearer_token(&request), Some("abc.1.ff"));

        let request = TestRequest::default()
            .insert_header(("Authorization", "Basic xyz"))
            .to_http_request();
        assert_eq!(bearer_token(&request), None);
        assert_eq!(bearer_token(&TestRequest::default().to_http_request()), None);
    }

    #[test]
    fn passwords_check_against_salted_hash() {
        let salt = new_salt();
        let hash = hash_password(&salt, "hunter22").unwrap();
        assert!(verify_password(&salt, "hunter22", &hash));
        assert!(!verify_password(&salt, "hunter23", &hash));
        assert!(!verify_password(&new_salt(), "hunter22", &hash));
    }
}
