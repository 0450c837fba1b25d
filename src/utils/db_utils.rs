use chrono::NaiveDate;
use serde_json::{Map, Value};
use sqlx::MySqlPool;

use crate::errors::ApiError;

/// SQL bindable value
#[derive(Debug, PartialEq)]
pub enum SqlValue {
    String(String),
    U64(u64),
    I64(i64),
    F64(f64),
    Bool(bool),
    Date(NaiveDate),
    Null,
}

#[derive(Debug)]
pub struct SqlUpdate {
    pub sql: String,
    pub values: Vec<SqlValue>,
}

/// Builds `UPDATE <table> SET ... WHERE id = ? AND company_id = ?` from a
/// JSON object. Only keys in `allowed` are accepted; column names never come
/// from the payload directly.
pub fn build_update_sql(
    table: &str,
    payload: &Map<String, Value>,
    allowed: &[&'static str],
    id_value: u64,
    company_id: u64,
) -> Result<SqlUpdate, ApiError> {
    if payload.is_empty() {
        return Err(ApiError::bad_request("No fields provided for update"));
    }

    let mut columns: Vec<&'static str> = Vec::with_capacity(payload.len());
    let mut values = Vec::with_capacity(payload.len() + 2);

    for (key, value) in payload {
        let column = allowed
            .iter()
            .copied()
            .find(|c| *c == key.as_str())
            .ok_or_else(|| ApiError::bad_request(format!("Field '{key}' cannot be updated")))?;

        columns.push(column);
        values.push(to_sql_value(column, value)?);
    }

    let set_clause = columns
        .iter()
        .map(|c| format!("{c} = ?"))
        .collect::<Vec<_>>()
        .join(", ");

    let sql = format!("UPDATE {table} SET {set_clause} WHERE id = ? AND company_id = ?");

    values.push(SqlValue::U64(id_value));
    values.push(SqlValue::U64(company_id));

    Ok(SqlUpdate { sql, values })
}

fn to_sql_value(column: &str, value: &Value) -> Result<SqlValue, ApiError> {
    Ok(match value {
        Value::String(s) => match NaiveDate::parse_from_str(s, "%Y-%m-%d") {
            Ok(d) => SqlValue::Date(d),
            Err(_) => SqlValue::String(s.clone()),
        },
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                SqlValue::U64(u)
            } else if let Some(i) = n.as_i64() {
                SqlValue::I64(i)
            } else if let Some(f) = n.as_f64() {
                SqlValue::F64(f)
            } else {
                return Err(ApiError::bad_request(format!("Invalid number for '{column}'")));
            }
        }
        Value::Bool(b) => SqlValue::Bool(*b),
        Value::Null => SqlValue::Null,
        _ => {
            return Err(ApiError::bad_request(format!(
                "Unsupported value type for '{column}'"
            )));
        }
    })
}

pub async fn execute_update(pool: &MySqlPool, update: SqlUpdate) -> Result<u64, sqlx::Error> {
    let mut query = sqlx::query(&update.sql);

    for value in update.values {
        query = match value {
            SqlValue::String(v) => query.bind(v),
            SqlValue::U64(v) => query.bind(v),
            SqlValue::I64(v) => query.bind(v),
            SqlValue::F64(v) => query.bind(v),
            SqlValue::Bool(v) => query.bind(v),
            SqlValue::Date(v) => query.bind(v),
            SqlValue::Null => query.bind(None::<String>),
        };
    }

    let result = query.execute(pool).await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn builds_scoped_update() {
        let payload = obj(json!({ "department": "R&D", "date_of_joining": "2024-01-15" }));
        let update =
            build_update_sql("users", &payload, &["department", "date_of_joining"], 7, 2).unwrap();

        assert!(update.sql.starts_with("UPDATE users SET "));
        assert!(update.sql.ends_with("WHERE id = ? AND company_id = ?"));
        assert_eq!(update.values.len(), 4);
        assert!(update.values.contains(&SqlValue::String("R&D".into())));
        assert!(
            update
                .values
                .contains(&SqlValue::Date(NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()))
        );
        assert_eq!(update.values[2], SqlValue::U64(7));
        assert_eq!(update.values[3], SqlValue::U64(2));
    }

    #[test]
    fn rejects_columns_outside_allow_list() {
        let payload = obj(json!({ "password": "x" }));
        let err = build_update_sql("users", &payload, &["department"], 1, 1).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));

        let payload = obj(json!({ "id = 1; DROP TABLE users; --": 1 }));
        assert!(build_update_sql("users", &payload, &["department"], 1, 1).is_err());
    }

    #[test]
    fn rejects_empty_and_nested_payloads() {
        assert!(build_update_sql("users", &Map::new(), &["department"], 1, 1).is_err());
        let payload = obj(json!({ "department": { "nested": true } }));
        assert!(build_update_sql("users", &payload, &["department"], 1, 1).is_err());
    }

    #[test]
    fn numbers_keep_their_kind() {
        let payload = obj(json!({ "basic_salary": 52000.5, "manager_id": 3, "is_active": false }));
        let update = build_update_sql(
            "users",
            &payload,
            &["basic_salary", "manager_id", "is_active"],
            1,
            1,
        )
        .unwrap();
        assert!(update.values.contains(&SqlValue::F64(52000.5)));
        assert!(update.values.contains(&SqlValue::U64(3)));
        assert!(update.values.contains(&SqlValue::Bool(false)));
    }
}
