use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Row used by login and refresh; carries the password hash.
#[derive(Debug, sqlx::FromRow)]
pub struct UserCredentials {
    pub id: u64,
    pub email: String,
    pub password: String,
    pub role: String,
    pub company_id: Option<u64>,
    pub is_active: bool,
}

/// Public view of a user. Never carries the password hash.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
#[schema(example = json!({
    "id": 1,
    "company_id": 1,
    "login_id": "OIJODO20220001",
    "email": "john.doe@odoo.in",
    "first_name": "John",
    "last_name": "Doe",
    "phone": "+919876543210",
    "role": "EMPLOYEE",
    "department": "Engineering",
    "designation": "Developer",
    "manager_id": 2,
    "basic_salary": 50000.0,
    "date_of_joining": "2022-04-01",
    "is_active": true,
    "last_login_at": null,
    "created_at": "2022-04-01T09:00:00Z"
}))]
pub struct User {
    pub id: u64,
    pub company_id: Option<u64>,
    pub login_id: Option<String>,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub role: String,
    pub department: Option<String>,
    pub designation: Option<String>,
    pub manager_id: Option<u64>,
    pub basic_salary: f64,
    #[schema(value_type = Option<String>, format = "date")]
    pub date_of_joining: Option<NaiveDate>,
    pub is_active: bool,
    #[schema(value_type = Option<String>, format = "date-time")]
    pub last_login_at: Option<DateTime<Utc>>,
    #[schema(value_type = String, format = "date-time")]
    pub created_at: DateTime<Utc>,
}

pub const SELECT_USER: &str = r#"
    SELECT id, company_id, login_id, email, first_name, last_name, phone, role, department,
           designation, manager_id, basic_salary, date_of_joining, is_active, last_login_at,
           created_at
    FROM users
"#;

pub async fn find_in_company(
    pool: &sqlx::MySqlPool,
    company_id: u64,
    user_id: u64,
) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>(&format!("{SELECT_USER} WHERE id = ? AND company_id = ?"))
        .bind(user_id)
        .bind(company_id)
        .fetch_optional(pool)
        .await
}

pub async fn find_by_id(pool: &sqlx::MySqlPool, user_id: u64) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>(&format!("{SELECT_USER} WHERE id = ?"))
        .bind(user_id)
        .fetch_optional(pool)
        .await
}

/// Loose email shape check: one `@`, non-empty local part, dotted domain.
pub fn is_valid_email(email: &str) -> bool {
    let mut parts = email.split('@');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(local), Some(domain), None) => {
            !local.is_empty()
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && domain.contains('.')
                && !email.chars().any(char::is_whitespace)
        }
        _ => false,
    }
}

pub const MIN_PASSWORD_LEN: usize = 8;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_shapes() {
        assert!(is_valid_email("john.doe@odoo.in"));
        assert!(!is_valid_email("john.doe"));
        assert!(!is_valid_email("john@doe"));
        assert!(!is_valid_email("@odoo.in"));
        assert!(!is_valid_email("a@b@c.com"));
        assert!(!is_valid_email("john doe@odoo.in"));
    }
}
