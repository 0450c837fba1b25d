use crate::auth::ended_sessions;
use crate::auth::jwt::{bearer_token, verify_token};
use crate::config::Config;
use crate::errors::ApiError;
use crate::model::role::{Role, Scope};
use crate::models::{Claims, TokenType};
use actix_web::{FromRequest, HttpMessage, HttpRequest, dev::Payload, web::Data};
use futures::future::{Ready, ready};

#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: u64,
    pub email: String,
    pub role: Role,
    pub session_id: u64,

    /// Present only once the user belongs to a company
    pub company_id: Option<u64>,
}

impl AuthUser {
    /// Access-token claims only; refresh tokens never authenticate requests,
    /// and neither do tokens of a session that has since ended.
    pub fn from_claims(claims: Claims) -> Result<Self, ApiError> {
        if claims.token_type != TokenType::Access {
            return Err(ApiError::unauthorized("Access token required"));
        }
        if ended_sessions::is_ended(claims.sid) {
            return Err(ApiError::unauthorized("Session ended"));
        }
        Ok(Self {
            user_id: claims.user_id,
            email: claims.sub,
            role: claims.role,
            session_id: claims.sid,
            company_id: claims.company_id,
        })
    }

    fn from_header(req: &HttpRequest) -> Result<Self, ApiError> {
        let header = req
            .headers()
            .get("Authorization")
            .and_then(|h| h.to_str().ok());
        let token = bearer_token(header).ok_or_else(|| ApiError::unauthorized("Missing token"))?;

        let config = req
            .app_data::<Data<Config>>()
            .ok_or_else(|| ApiError::internal("Config missing"))?;

        let claims = verify_token(token, &config.jwt_secret)
            .map_err(|_| ApiError::unauthorized("Invalid token"))?;

        Self::from_claims(claims)
    }

    pub fn require_admin(&self) -> Result<(), ApiError> {
        if self.role == Role::Admin {
            Ok(())
        } else {
            Err(ApiError::forbidden("Admin only"))
        }
    }

    pub fn require_any(&self, roles: &[Role]) -> Result<(), ApiError> {
        if roles.contains(&self.role) {
            Ok(())
        } else {
            Err(ApiError::forbidden(format!(
                "Requires one of: {}",
                roles.iter().map(|r| r.as_ref()).collect::<Vec<_>>().join(", ")
            )))
        }
    }

    /// Company id, or 403 for users who have not joined one yet.
    pub fn require_company(&self) -> Result<u64, ApiError> {
        self.company_id
            .ok_or_else(|| ApiError::forbidden("No company"))
    }

    pub fn directory_scope(&self) -> Scope {
        self.role.directory_scope(self.user_id)
    }

    pub fn review_scope(&self) -> Scope {
        self.role.review_scope(self.user_id)
    }
}

impl FromRequest for AuthUser {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        // Set by auth_middleware on protected scopes.
        if let Some(user) = req.extensions().get::<AuthUser>() {
            return ready(Ok(user.clone()));
        }

        ready(Self::from_header(req).map_err(actix_web::Error::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(role: Role, company_id: Option<u64>) -> AuthUser {
        AuthUser {
            user_id: 1,
            email: "a@b.co".into(),
            role,
            session_id: 1,
            company_id,
        }
    }

    #[test]
    fn guards_reject_with_forbidden() {
        let employee = user(Role::Employee, Some(1));
        assert!(matches!(employee.require_admin(), Err(ApiError::Forbidden(_))));
        assert!(matches!(
            employee.require_any(&[Role::Admin, Role::PayrollOfficer]),
            Err(ApiError::Forbidden(_))
        ));

        let payroll = user(Role::PayrollOfficer, Some(1));
        assert!(payroll.require_any(&[Role::Admin, Role::PayrollOfficer]).is_ok());
    }

    #[test]
    fn company_less_users_are_forbidden() {
        assert!(matches!(
            user(Role::Employee, None).require_company(),
            Err(ApiError::Forbidden(_))
        ));
        assert_eq!(user(Role::Employee, Some(5)).require_company().unwrap(), 5);
    }

    fn claims(token_type: TokenType, sid: u64) -> Claims {
        Claims {
            user_id: 1,
            sub: "a@b.co".into(),
            role: Role::Admin,
            exp: 0,
            jti: "x".into(),
            token_type,
            sid,
            company_id: None,
        }
    }

    #[test]
    fn refresh_claims_do_not_authenticate() {
        assert!(matches!(
            AuthUser::from_claims(claims(TokenType::Refresh, 1)),
            Err(ApiError::Unauthorized(_))
        ));
    }

    #[actix_web::test]
    async fn ended_sessions_do_not_authenticate() {
        assert!(AuthUser::from_claims(claims(TokenType::Access, 920_001)).is_ok());

        ended_sessions::mark_ended(920_001).await;
        match AuthUser::from_claims(claims(TokenType::Access, 920_001)) {
            Err(ApiError::Unauthorized(msg)) => assert_eq!(msg, "Session ended"),
            other => panic!("expected 401, got {other:?}"),
        }
    }
}
