use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct Company {
    pub id: u64,
    #[schema(example = "Odoo India")]
    pub name: String,
    /// Prefix of generated login ids.
    #[schema(example = "OI")]
    pub code: String,
    #[schema(value_type = String, format = "date-time")]
    pub created_at: DateTime<Utc>,
}

pub const SELECT_COMPANY: &str = "SELECT id, name, code, created_at FROM companies";
