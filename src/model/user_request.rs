use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// A company-less user asking to join a company.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct UserRequest {
    pub id: u64,
    pub user_id: u64,
    pub company_id: u64,
    pub message: Option<String>,
    #[schema(example = "PENDING")]
    pub status: String,
    pub reviewed_by: Option<u64>,
    #[schema(value_type = String, format = "date-time")]
    pub created_at: DateTime<Utc>,
    #[schema(value_type = Option<String>, format = "date-time")]
    pub reviewed_at: Option<DateTime<Utc>>,
    /// Requester's name and email, joined from `users`.
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

pub const SELECT_USER_REQUEST: &str = r#"
    SELECT r.id, r.user_id, r.company_id, r.message, r.status, r.reviewed_by, r.created_at,
           r.reviewed_at, u.first_name, u.last_name, u.email
    FROM user_requests r
    JOIN users u ON u.id = r.user_id
"#;
