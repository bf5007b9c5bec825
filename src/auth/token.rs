// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Access and refresh bearer tokens.
//!
//! Tokens are HS256 JWTs carrying `{sub, jti, iat, exp, type}`. The access and
//! refresh token minted by one login share a `jti`, which is also the session
//! key. Refresh tokens also carry a random `nonce`, so two refresh tokens
//! issued in the same second for one session never coincide. The algorithm is pinned: the header is inspected before any signature
//! work and anything other than `HS256` is refused.
//!
//! Expiry is checked here against the caller's clock rather than inside
//! `jsonwebtoken`, so session logic and tests share one notion of "now".

use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Domain separator for the refresh-token hash key.
const REFRESH_HASH_CONTEXT: &[u8] = b"estate-guard/refresh-token-hash/v1";

/// Token discriminator carried in the `type` claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

/// JWT claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// User ID
    pub sub: String,
    /// Token pair / session identifier
    pub jti: String,
    /// Issued at (Unix seconds)
    pub iat: i64,
    /// Expires at (Unix seconds)
    pub exp: i64,
    #[serde(rename = "type")]
    pub token_type: TokenType,
    /// Random per-token value, refresh tokens only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    /// Bad signature, or a header asserting an algorithm other than HS256
    #[error("token signature is invalid")]
    InvalidSignature,

    #[error("token has expired")]
    Expired,

    #[error("token claims are malformed")]
    MalformedClaims,

    #[error("expected a {expected:?} token")]
    WrongType { expected: TokenType },

    #[error("token signing failed: {0}")]
    Signing(String),
}

/// Both halves of a freshly minted token pair.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub access_claims: TokenClaims,
    pub refresh_token: String,
    pub refresh_claims: TokenClaims,
}

#[derive(Deserialize)]
struct RawHeader {
    alg: String,
}

/// Signs, parses and hashes bearer tokens. Secrets are fixed at construction.
#[derive(Clone)]
pub struct TokenCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    refresh_hash_key: Vec<u8>,
}

impl TokenCodec {
    pub fn new(signing_secret: &[u8]) -> Result<Self, TokenError> {
        // Separate key for refresh hashes, derived from the signing secret
        let mut mac = HmacSha256::new_from_slice(signing_secret)
            .map_err(|e| TokenError::Signing(e.to_string()))?;
        mac.update(REFRESH_HASH_CONTEXT);
        let refresh_hash_key = mac.finalize().into_bytes().to_vec();

        Ok(Self {
            encoding: EncodingKey::from_secret(signing_secret),
            decoding: DecodingKey::from_secret(signing_secret),
            refresh_hash_key,
        })
    }

    /// Sign one token.
    pub fn issue(
        &self,
        user_id: &str,
        jti: &str,
        token_type: TokenType,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<(String, TokenClaims), TokenError> {
        let claims = TokenClaims {
            sub: user_id.to_string(),
            jti: jti.to_string(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
            token_type,
            nonce: (token_type == TokenType::Refresh).then(|| Uuid::new_v4().simple().to_string()),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| TokenError::Signing(e.to_string()))?;
        Ok((token, claims))
    }

    /// Sign an access and a refresh token sharing `jti`.
    pub fn issue_pair(
        &self,
        user_id: &str,
        jti: &str,
        access_ttl: Duration,
        refresh_ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<TokenPair, TokenError> {
        let (access_token, access_claims) =
            self.issue(user_id, jti, TokenType::Access, access_ttl, now)?;
        let (refresh_token, refresh_claims) =
            self.issue(user_id, jti, TokenType::Refresh, refresh_ttl, now)?;
        Ok(TokenPair {
            access_token,
            access_claims,
            refresh_token,
            refresh_claims,
        })
    }

    /// Verify signature, expiry and type, in that order.
    pub fn parse(
        &self,
        token: &str,
        expected: TokenType,
        now: DateTime<Utc>,
    ) -> Result<TokenClaims, TokenError> {
        check_algorithm(token)?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_aud = false;

        let claims = decode::<TokenClaims>(token, &self.decoding, &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature
                | ErrorKind::InvalidAlgorithm
                | ErrorKind::InvalidAlgorithmName => TokenError::InvalidSignature,
                _ => TokenError::MalformedClaims,
            })?
            .claims;

        if claims.sub.is_empty() || claims.jti.is_empty() {
            return Err(TokenError::MalformedClaims);
        }
        if now.timestamp() >= claims.exp {
            return Err(TokenError::Expired);
        }
        if claims.token_type != expected {
            return Err(TokenError::WrongType { expected });
        }
        Ok(claims)
    }

    /// Keyed hash of a refresh token, as stored on the session row.
    pub fn refresh_hash(&self, refresh_token: &str) -> Result<String, TokenError> {
        let mut mac = HmacSha256::new_from_slice(&self.refresh_hash_key)
            .map_err(|e| TokenError::Signing(e.to_string()))?;
        mac.update(refresh_token.as_bytes());
        Ok(Base64UrlUnpadded::encode_string(&mac.finalize().into_bytes()))
    }
}

/// Refuse any header whose `alg` is not exactly `HS256`.
fn check_algorithm(token: &str) -> Result<(), TokenError> {
    let header_segment = token.split('.').next().unwrap_or_default();
    let bytes = Base64UrlUnpadded::decode_vec(header_segment)
        .map_err(|_| TokenError::MalformedClaims)?;
    let header: RawHeader =
        serde_json::from_slice(&bytes).map_err(|_| TokenError::MalformedClaims)?;
    if header.alg != "HS256" {
        return Err(TokenError::InvalidSignature);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    fn codec() -> TokenCodec {
        TokenCodec::new(SECRET).unwrap()
    }

    fn forge(header: &str, claims: &serde_json::Value, signature: &[u8]) -> String {
        format!(
            "{}.{}.{}",
            URL_SAFE_NO_PAD.encode(header),
            URL_SAFE_NO_PAD.encode(claims.to_string()),
            URL_SAFE_NO_PAD.encode(signature)
        )
    }

    #[test]
    fn issued_pair_shares_jti_and_parses_by_type() {
        let now = Utc::now();
        let pair = codec()
            .issue_pair("user-1", "jti-1", Duration::minutes(15), Duration::days(7), now)
            .unwrap();

        let access = codec().parse(&pair.access_token, TokenType::Access, now).unwrap();
        let refresh = codec().parse(&pair.refresh_token, TokenType::Refresh, now).unwrap();
        assert_eq!(access.jti, "jti-1");
        assert_eq!(refresh.jti, access.jti);
        assert_eq!(access.sub, "user-1");
        assert_eq!(access.exp, (now + Duration::minutes(15)).timestamp());
    }

    #[test]
    fn wrong_type_is_rejected() {
        let now = Utc::now();
        let pair = codec()
            .issue_pair("u", "j", Duration::minutes(15), Duration::days(7), now)
            .unwrap();
        assert_eq!(
            codec().parse(&pair.refresh_token, TokenType::Access, now),
            Err(TokenError::WrongType {
                expected: TokenType::Access
            })
        );
    }

    #[test]
    fn expiry_is_checked_against_the_supplied_clock() {
        let now = Utc::now();
        let (token, _) = codec()
            .issue("u", "j", TokenType::Access, Duration::minutes(15), now)
            .unwrap();

        assert!(codec()
            .parse(&token, TokenType::Access, now + Duration::minutes(14))
            .is_ok());
        assert_eq!(
            codec().parse(&token, TokenType::Access, now + Duration::minutes(15)),
            Err(TokenError::Expired)
        );
    }

    #[test]
    fn other_secret_is_an_invalid_signature() {
        let now = Utc::now();
        let (token, _) = codec()
            .issue("u", "j", TokenType::Access, Duration::minutes(15), now)
            .unwrap();
        let other = TokenCodec::new(b"ffffffffffffffffffffffffffffffff").unwrap();
        assert_eq!(
            other.parse(&token, TokenType::Access, now),
            Err(TokenError::InvalidSignature)
        );
    }

    #[test]
    fn none_algorithm_is_refused() {
        let now = Utc::now();
        let claims = serde_json::json!({
            "sub": "u", "jti": "j", "iat": now.timestamp(),
            "exp": now.timestamp() + 600, "type": "access"
        });
        let token = forge(r#"{"alg":"none","typ":"JWT"}"#, &claims, b"");
        assert_eq!(
            codec().parse(&token, TokenType::Access, now),
            Err(TokenError::InvalidSignature)
        );
    }

    #[test]
    fn hs512_signed_with_the_same_secret_is_refused() {
        let now = Utc::now();
        let claims = TokenClaims {
            sub: "u".to_string(),
            jti: "j".to_string(),
            iat: now.timestamp(),
            exp: now.timestamp() + 600,
            token_type: TokenType::Access,
            nonce: None,
        };
        let token = encode(
            &Header::new(Algorithm::HS512),
            &claims,
            &EncodingKey::from_secret(SECRET),
        )
        .unwrap();
        assert_eq!(
            codec().parse(&token, TokenType::Access, now),
            Err(TokenError::InvalidSignature)
        );
    }

    #[test]
    fn garbage_and_missing_claims_are_malformed() {
        let now = Utc::now();
        assert_eq!(
            codec().parse("not-a-token", TokenType::Access, now),
            Err(TokenError::MalformedClaims)
        );

        // Correctly signed, but `type` is unknown
        let mut mac = HmacSha256::new_from_slice(SECRET).unwrap();
        let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(
            serde_json::json!({
                "sub": "u", "jti": "j", "iat": 0, "exp": now.timestamp() + 600, "type": "id"
            })
            .to_string(),
        );
        mac.update(format!("{header}.{payload}").as_bytes());
        let sig = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        let token = format!("{header}.{payload}.{sig}");
        assert_eq!(
            codec().parse(&token, TokenType::Access, now),
            Err(TokenError::MalformedClaims)
        );
    }

    #[test]
    fn refresh_tokens_issued_in_the_same_instant_differ() {
        let now = Utc::now();
        let (first, first_claims) = codec()
            .issue("u", "j", TokenType::Refresh, Duration::days(7), now)
            .unwrap();
        let (second, _) = codec()
            .issue("u", "j", TokenType::Refresh, Duration::days(7), now)
            .unwrap();
        assert_ne!(first, second);
        assert_ne!(codec().refresh_hash(&first).unwrap(), codec().refresh_hash(&second).unwrap());
        assert!(first_claims.nonce.is_some());

        let (_, access_claims) = codec()
            .issue("u", "j", TokenType::Access, Duration::minutes(15), now)
            .unwrap();
        assert!(access_claims.nonce.is_none());
    }

    #[test]
    fn refresh_hash_is_keyed_and_stable() {
        let a = codec().refresh_hash("token").unwrap();
        assert_eq!(a, codec().refresh_hash("token").unwrap());
        assert_ne!(a, codec().refresh_hash("token2").unwrap());

        let other = TokenCodec::new(b"ffffffffffffffffffffffffffffffff").unwrap();
        assert_ne!(a, other.refresh_hash("token").unwrap());
    }
}
