use crate::model::role::Role;
use crate::models::{Claims, TokenType};
use chrono::Utc;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::Error};
use uuid::Uuid;

fn now() -> usize {
    Utc::now().timestamp().max(0) as usize
}

/// Identity baked into every token pair.
#[derive(Debug, Clone)]
pub struct TokenSubject {
    pub user_id: u64,
    pub email: String,
    pub role: Role,
    pub company_id: Option<u64>,
    pub session_id: u64,
}

fn claims_for(subject: &TokenSubject, token_type: TokenType, ttl: usize) -> Claims {
    Claims {
        user_id: subject.user_id,
        sub: subject.email.clone(),
        role: subject.role,
        exp: now() + ttl,
        jti: Uuid::new_v4().to_string(),
        token_type,
        sid: subject.session_id,
        company_id: subject.company_id,
    }
}

pub fn generate_access_token(subject: &TokenSubject, secret: &str, ttl: usize) -> Result<String, Error> {
    let claims = claims_for(subject, TokenType::Access, ttl);

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

pub fn generate_refresh_token(
    subject: &TokenSubject,
    secret: &str,
    ttl: usize,
) -> Result<(String, Claims), Error> {
    let claims = claims_for(subject, TokenType::Refresh, ttl);

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok((token, claims))
}

pub fn verify_token(token: &str, secret: &str) -> Result<Claims, String> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| e.to_string())
}

/// Pulls the token out of `Authorization: Bearer <token>`.
pub fn bearer_token(header: Option<&str>) -> Option<&str> {
    header
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subject() -> TokenSubject {
        TokenSubject {
            user_id: 42,
            email: "jane@odoo.in".into(),
            role: Role::HrOfficer,
            company_id: Some(3),
            session_id: 9,
        }
    }

    #[test]
    fn access_token_round_trip() {
        let token = generate_access_token(&subject(), "secret", 60).unwrap();
        let claims = verify_token(&token, "secret").unwrap();
        assert_eq!(claims.user_id, 42);
        assert_eq!(claims.role, Role::HrOfficer);
        assert_eq!(claims.company_id, Some(3));
        assert_eq!(claims.sid, 9);
        assert_eq!(claims.token_type, TokenType::Access);
    }

    #[test]
    fn refresh_tokens_get_unique_ids() {
        let (_, a) = generate_refresh_token(&subject(), "secret", 60).unwrap();
        let (_, b) = generate_refresh_token(&subject(), "secret", 60).unwrap();
        assert_eq!(a.token_type, TokenType::Refresh);
        assert_ne!(a.jti, b.jti);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = generate_access_token(&subject(), "secret", 60).unwrap();
        assert!(verify_token(&token, "other").is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let mut claims = claims_for(&subject(), TokenType::Access, 0);
        // Past the default 60 s leeway.
        claims.exp = now() - 120;
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"secret"),
        )
        .unwrap();
        assert!(verify_token(&token, "secret").is_err());
    }

    #[test]
    fn bearer_parsing() {
        assert_eq!(bearer_token(Some("Bearer abc")), Some("abc"));
        assert_eq!(bearer_token(Some("Basic abc")), None);
        assert_eq!(bearer_token(Some("Bearer ")), None);
        assert_eq!(bearer_token(None), None);
    }
}
