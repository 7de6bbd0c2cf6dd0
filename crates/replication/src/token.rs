//! Signed capability tokens.
//!
//! Three token families share one HS256 signer:
//! - content tokens gate read access to a bounded set of content blobs; they
//!   carry no expiry (the capability itself is the boundary),
//! - satellite tokens authorize one tenant's seed request, time-boxed,
//! - seed access tokens are short-lived bearers for downloading a seed blob.

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use edumesh_core::{ContentId, TenantId, UserId};

pub const CONTENT_PREFIX: &str = "CONTENT_IDS";
pub const SATELLITE_PREFIX: &str = "SATELLITE";
pub const PUBLIC_SUBJECT: &str = "PUBLIC";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("token invalid")]
    Invalid,
    #[error("token expired")]
    Expired,
    #[error("token prefix mismatch")]
    WrongPrefix,
    #[error("token subject not permitted for this caller")]
    Forbidden,
    #[error("token carries no content ids")]
    Empty,
}

#[derive(Debug, Serialize, Deserialize)]
struct ContentClaims {
    pfx: String,
    /// `PUBLIC` or a specific user id.
    sub: String,
    ids: Vec<ContentId>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SatelliteClaims {
    pfx: String,
    tenant: TenantId,
    exp: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct AccessClaims {
    sub: String,
    exp: i64,
}

/// HS256 signer/verifier shared by hub and satellite (same secret per pair).
#[derive(Clone)]
pub struct TokenSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl TokenSigner {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
        }
    }

    /// Sign a content token. `subject = None` signs for `PUBLIC`.
    /// Zero TTL by design: content capability tokens do not expire.
    pub fn sign_content_ids(
        &self,
        subject: Option<UserId>,
        ids: &[ContentId],
    ) -> Result<String, TokenError> {
        let claims = ContentClaims {
            pfx: CONTENT_PREFIX.to_string(),
            sub: subject.map_or_else(|| PUBLIC_SUBJECT.to_string(), |u| u.to_string()),
            ids: ids.to_vec(),
        };
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|_| TokenError::Invalid)
    }

    /// Verify a content token on behalf of `caller` (None = anonymous).
    /// Returns the granted content ids.
    pub fn verify_content_ids(
        &self,
        token: &str,
        caller: Option<UserId>,
    ) -> Result<Vec<ContentId>, TokenError> {
        let claims: ContentClaims = self.decode_without_expiry(token)?;

        if claims.pfx != CONTENT_PREFIX {
            return Err(TokenError::WrongPrefix);
        }
        if claims.ids.is_empty() {
            return Err(TokenError::Empty);
        }
        let permitted = claims.sub == PUBLIC_SUBJECT
            || caller.is_some_and(|user| claims.sub == user.to_string());
        if !permitted {
            return Err(TokenError::Forbidden);
        }
        Ok(claims.ids)
    }

    /// Sign a time-boxed satellite initialization token for one tenant.
    pub fn sign_satellite(&self, tenant: TenantId, expires_in_secs: i64) -> Result<String, TokenError> {
        let claims = SatelliteClaims {
            pfx: SATELLITE_PREFIX.to_string(),
            tenant,
            exp: chrono::Utc::now().timestamp() + expires_in_secs,
        };
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|_| TokenError::Invalid)
    }

    /// Verify a satellite initialization token, returning the embedded tenant.
    pub fn verify_satellite(&self, token: &str) -> Result<TenantId, TokenError> {
        let claims: SatelliteClaims = self.decode(token)?;
        if claims.pfx != SATELLITE_PREFIX {
            return Err(TokenError::WrongPrefix);
        }
        Ok(claims.tenant)
    }

    /// Sign a short-lived bearer for downloading one seed blob.
    pub fn sign_seed_access(&self, tenant: TenantId, expires_in_secs: i64) -> Result<String, TokenError> {
        let claims = AccessClaims {
            sub: tenant.to_string(),
            exp: chrono::Utc::now().timestamp() + expires_in_secs,
        };
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|_| TokenError::Invalid)
    }

    pub fn verify_seed_access(&self, token: &str) -> Result<(), TokenError> {
        let _: AccessClaims = self.decode(token)?;
        Ok(())
    }

    fn decode<T: serde::de::DeserializeOwned>(&self, token: &str) -> Result<T, TokenError> {
        let validation = Validation::new(Algorithm::HS256);
        jsonwebtoken::decode::<T>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(map_jwt_error)
    }

    fn decode_without_expiry<T: serde::de::DeserializeOwned>(
        &self,
        token: &str,
    ) -> Result<T, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.set_required_spec_claims::<&str>(&[]);
        jsonwebtoken::decode::<T>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(map_jwt_error)
    }
}

fn map_jwt_error(err: jsonwebtoken::errors::Error) -> TokenError {
    use jsonwebtoken::errors::ErrorKind;
    match err.kind() {
        ErrorKind::ExpiredSignature => TokenError::Expired,
        _ => TokenError::Invalid,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> TokenSigner {
        TokenSigner::new(b"test-secret")
    }

    #[test]
    fn public_content_token_round_trips() {
        let ids = vec![ContentId::new(), ContentId::new()];
        let token = signer().sign_content_ids(None, &ids).unwrap();
        let granted = signer().verify_content_ids(&token, None).unwrap();
        assert_eq!(granted, ids);
    }

    #[test]
    fn user_scoped_token_rejects_other_callers() {
        let owner = UserId::new();
        let token = signer()
            .sign_content_ids(Some(owner), &[ContentId::new()])
            .unwrap();

        assert!(signer().verify_content_ids(&token, Some(owner)).is_ok());
        assert_eq!(
            signer().verify_content_ids(&token, Some(UserId::new())),
            Err(TokenError::Forbidden)
        );
        assert_eq!(
            signer().verify_content_ids(&token, None),
            Err(TokenError::Forbidden)
        );
    }

    #[test]
    fn empty_id_list_is_rejected() {
        let token = signer().sign_content_ids(None, &[]).unwrap();
        assert_eq!(signer().verify_content_ids(&token, None), Err(TokenError::Empty));
    }

    #[test]
    fn satellite_token_embeds_tenant() {
        let tenant = TenantId::new();
        let token = signer().sign_satellite(tenant, 300).unwrap();
        assert_eq!(signer().verify_satellite(&token).unwrap(), tenant);
    }

    #[test]
    fn satellite_token_is_not_a_content_token() {
        let token = signer().sign_satellite(TenantId::new(), 300).unwrap();
        assert!(signer().verify_content_ids(&token, None).is_err());
    }

    #[test]
    fn tampered_token_is_invalid() {
        let other = TokenSigner::new(b"other-secret");
        let token = signer().sign_content_ids(None, &[ContentId::new()]).unwrap();
        assert_eq!(
            other.verify_content_ids(&token, None),
            Err(TokenError::Invalid)
        );
    }
}
