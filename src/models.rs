use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::model::role::Role;

#[derive(Deserialize, ToSchema)]
pub struct RegisterReq {
    #[schema(example = "John")]
    pub first_name: String,
    #[schema(example = "Doe")]
    pub last_name: String,
    #[schema(example = "john.doe@odoo.in")]
    pub email: String,
    #[schema(example = "s3cret-pass")]
    pub password: String,
    /// When present, a new company is created and the user becomes its admin.
    #[schema(example = "Odoo India")]
    pub company_name: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct LoginReqDto {
    /// Email address or generated login id.
    #[schema(example = "OIJODO20220001")]
    pub login: String,
    pub password: String,
}

#[derive(Serialize, ToSchema)]
pub struct LoginResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub session_id: u64,
    pub user: crate::model::user::User,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: u64,
    pub sub: String,
    pub role: Role,
    pub exp: usize,
    pub jti: String,
    pub token_type: TokenType,
    /// Session the token was minted for.
    pub sid: u64,
    /// Absent until the user joins or creates a company.
    pub company_id: Option<u64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum TokenType {
    Access,
    Refresh,
}

#[derive(Serialize, ToSchema)]
pub struct MessageResponse {
    #[schema(example = "Done")]
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
