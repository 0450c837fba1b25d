use crate::auth::auth::AuthUser;
use crate::auth::jwt::verify_token;
use crate::config::Config;
use crate::errors::ApiError;
use actix_web::middleware::Next;
use actix_web::{
    Error, HttpMessage, ResponseError,
    body::BoxBody,
    dev::{ServiceRequest, ServiceResponse},
    web::Data,
};

pub async fn auth_middleware(
    req: ServiceRequest,
    next: Next<BoxBody>,
) -> Result<ServiceResponse<BoxBody>, Error> {
    let config = req
        .app_data::<Data<Config>>()
        .ok_or_else(|| ApiError::internal("App config missing"))?;

    let header_value = match req.headers().get("Authorization") {
        Some(h) => match h.to_str() {
            Ok(v) => v,
            Err(_) => return reject(req, "Invalid Authorization header encoding"),
        },
        None => return reject(req, "Missing Authorization header"),
    };

    let token = match header_value.strip_prefix("Bearer ") {
        Some(t) => t.trim(),
        None => return reject(req, "Authorization header must start with Bearer"),
    };

    let claims = match verify_token(token, &config.jwt_secret) {
        Ok(c) => c,
        Err(e) => {
            tracing::debug!(error = %e, path = %req.path(), "Rejected token");
            return reject(req, "Invalid or expired token");
        }
    };

    let auth_user = match AuthUser::from_claims(claims) {
        Ok(user) => user,
        Err(e) => return reject(req, &e.to_string()),
    };

    req.extensions_mut().insert(auth_user);

    next.call(req).await
}

fn reject(req: ServiceRequest, message: &str) -> Result<ServiceResponse<BoxBody>, Error> {
    let resp = ApiError::unauthorized(message).error_response();
    Ok(req.into_response(resp))
}
