use crate::{
    api::company::company_code_of,
    auth::{
        auth::AuthUser,
        login_id::{LOGIN_ID_KEY, MAX_SERIAL_ATTEMPTS, login_id_prefix, next_serial, with_serial},
        password::{hash_password, temporary_password},
    },
    db::{is_unique_violation, violates_key},
    errors::{ApiError, ApiResult},
    model::{
        role::{Role, Scope, USER_MANAGERS},
        user::{self, SELECT_USER, User, is_valid_email},
        user_session::{EndReason, end_user_sessions},
    },
    models::MessageResponse,
    utils::{
        db_utils::{build_update_sql, execute_update},
        email_index,
        pagination::{Filter, FilterValue, Pagination, bind_filters},
    },
};
use actix_web::{HttpResponse, web};
use chrono::{Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::MySqlPool;
use std::str::FromStr;
use tracing::{error, info};
use utoipa::{IntoParams, ToSchema};

#[derive(Deserialize, ToSchema)]
pub struct CreateUser {
    #[schema(example = "Jane")]
    pub first_name: String,
    #[schema(example = "Smith")]
    pub last_name: String,
    #[schema(example = "jane.smith@odoo.in", format = "email")]
    pub email: String,
    pub phone: Option<String>,
    /// Defaults to EMPLOYEE.
    pub role: Option<Role>,
    #[schema(example = "Engineering")]
    pub department: Option<String>,
    #[schema(example = "Developer")]
    pub designation: Option<String>,
    pub manager_id: Option<u64>,
    #[schema(example = 50000.0)]
    pub basic_salary: Option<f64>,
    /// Defaults to today.
    #[schema(value_type = Option<String>, format = "date", example = "2025-10-01")]
    pub date_of_joining: Option<NaiveDate>,
}

/// The temporary password is only ever shown in this response.
#[derive(Serialize, ToSchema)]
pub struct CreatedUser {
    pub user: User,
    #[schema(example = "q8Xk2LmP0aZr")]
    pub temporary_password: String,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct UserQuery {
    pub page: Option<u64>,
    pub per_page: Option<u64>,
    pub role: Option<Role>,
    pub department: Option<String>,
    /// Matches name, email or login id.
    pub search: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct UserListResponse {
    pub data: Vec<User>,
    #[schema(example = 1)]
    pub page: u64,
    #[schema(example = 20)]
    pub per_page: u64,
    #[schema(example = 42)]
    pub total: i64,
}

fn validate_new_user(auth: &AuthUser, body: &CreateUser) -> Result<Role, ApiError> {
    if body.first_name.trim().is_empty() || body.last_name.trim().is_empty() {
        return Err(ApiError::bad_request("first_name and last_name are required"));
    }
    if !is_valid_email(body.email.trim()) {
        return Err(ApiError::bad_request("Invalid email address"));
    }
    if body.basic_salary.is_some_and(|s| !s.is_finite() || s < 0.0) {
        return Err(ApiError::bad_request("basic_salary must be a non-negative number"));
    }

    let role = body.role.unwrap_or(Role::Employee);
    if !auth.role.can_assign(role) {
        return Err(ApiError::forbidden(format!("{} cannot assign role {}", auth.role, role)));
    }
    if body.basic_salary.is_some() && !auth.role.editable_user_columns().contains(&"basic_salary") {
        return Err(ApiError::forbidden("Salary is managed by payroll"));
    }
    Ok(role)
}

/// A manager must be an existing user of the same company.
async fn ensure_manager(pool: &MySqlPool, company_id: u64, manager_id: u64) -> ApiResult<()> {
    match user::find_in_company(pool, company_id, manager_id).await? {
        Some(_) => Ok(()),
        None => Err(ApiError::bad_request("manager_id does not belong to this company")),
    }
}

/// A user of the caller's company that the caller may see. Users of other
/// companies are reported as missing.
pub(crate) async fn visible_user(pool: &MySqlPool, auth: &AuthUser, user_id: u64) -> ApiResult<User> {
    let company_id = auth.require_company()?;
    let target = user::find_in_company(pool, company_id, user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    if target.id == auth.user_id {
        return Ok(target);
    }
    match auth.directory_scope() {
        Scope::Company => Ok(target),
        Scope::Team(manager_id) if target.manager_id == Some(manager_id) => Ok(target),
        _ => Err(ApiError::forbidden("Not allowed to view this user")),
    }
}

#[utoipa::path(
    post,
    path = "/api/users",
    request_body = CreateUser,
    responses(
        (status = 201, description = "Employee created", body = CreatedUser),
        (status = 400, description = "Invalid input"),
        (status = 403, description = "Admin or HR only"),
        (status = 409, description = "Email already registered")
    ),
    security(("bearer_auth" = [])),
    tag = "Users"
)]
pub async fn create_user(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    body: web::Json<CreateUser>,
) -> ApiResult<HttpResponse> {
    let company_id = auth.require_company()?;
    auth.require_any(USER_MANAGERS)?;
    let role = validate_new_user(&auth, &body)?;

    let email = email_index::normalize(&body.email);
    if !email_index::is_available(pool.get_ref(), &email).await? {
        return Err(ApiError::conflict("Email already registered"));
    }
    if let Some(manager_id) = body.manager_id {
        ensure_manager(pool.get_ref(), company_id, manager_id).await?;
    }

    let code = company_code_of(pool.get_ref(), company_id).await?;
    let joined = body.date_of_joining.unwrap_or_else(|| Utc::now().date_naive());
    let password = temporary_password();
    let hashed = hash_password(&password)
        .map_err(|e| ApiError::internal(format!("password hashing failed: {e}")))?;

    let prefix = login_id_prefix(&code, &body.first_name, &body.last_name, joined.year());
    let first_serial = next_serial(pool.get_ref(), company_id, joined.year(), &prefix).await?;
    let mut user_id = None;

    for attempt in 0..MAX_SERIAL_ATTEMPTS {
        let login_id = with_serial(&prefix, first_serial + attempt);

        let inserted = sqlx::query(
            r#"
            INSERT INTO users
                (company_id, login_id, email, password, first_name, last_name, phone, role,
                 department, designation, manager_id, basic_salary, date_of_joining)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(company_id)
        .bind(&login_id)
        .bind(&email)
        .bind(&hashed)
        .bind(body.first_name.trim())
        .bind(body.last_name.trim())
        .bind(&body.phone)
        .bind(role.as_ref())
        .bind(&body.department)
        .bind(&body.designation)
        .bind(body.manager_id)
        .bind(body.basic_salary.unwrap_or(0.0))
        .bind(joined)
        .execute(pool.get_ref())
        .await;

        match inserted {
            Ok(r) => {
                user_id = Some(r.last_insert_id());
                break;
            }
            Err(e) if violates_key(&e, LOGIN_ID_KEY) => continue,
            Err(e) if is_unique_violation(&e) => {
                return Err(ApiError::conflict("Email already registered"));
            }
            Err(e) => {
                error!(error = %e, "Failed to create user");
                return Err(e.into());
            }
        }
    }

    let user_id = user_id.ok_or_else(|| ApiError::conflict("Could not allocate a login id, retry"))?;
    email_index::remember(&email).await;

    let user = user::find_by_id(pool.get_ref(), user_id)
        .await?
        .ok_or_else(|| ApiError::internal("created user not found"))?;

    info!(company_id, user_id, role = %role, created_by = auth.user_id, "User created");

    Ok(HttpResponse::Created().json(CreatedUser {
        user,
        temporary_password: password,
    }))
}

#[utoipa::path(
    get,
    path = "/api/users",
    params(UserQuery),
    responses(
        (status = 200, description = "Paginated user list", body = UserListResponse),
        (status = 403, description = "Employees cannot list users")
    ),
    security(("bearer_auth" = [])),
    tag = "Users"
)]
pub async fn list_users(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<UserQuery>,
) -> ApiResult<HttpResponse> {
    let company_id = auth.require_company()?;
    let pagination = Pagination::new(query.page, query.per_page);

    let mut filter = Filter::new();
    filter.push("company_id = ?", FilterValue::U64(company_id));
    match auth.directory_scope() {
        Scope::Company => {}
        Scope::Team(manager_id) => filter.push("manager_id = ?", FilterValue::U64(manager_id)),
        Scope::Own(_) => return Err(ApiError::forbidden("Not allowed to list users")),
    }
    if let Some(role) = query.role {
        filter.push("role = ?", FilterValue::Str(role.as_ref().to_string()));
    }
    if let Some(department) = query.department.as_deref().filter(|d| !d.trim().is_empty()) {
        filter.push("department = ?", FilterValue::Str(department.trim().to_string()));
    }
    if let Some(search) = query.search.as_deref().filter(|s| !s.trim().is_empty()) {
        let like = format!("%{}%", search.trim());
        filter.push_many(
            "(first_name LIKE ? OR last_name LIKE ? OR email LIKE ? OR login_id LIKE ?)",
            std::iter::repeat(FilterValue::Str(like)).take(4),
        );
    }

    let where_clause = filter.where_clause();

    let count_sql = format!("SELECT COUNT(*) FROM users{where_clause}");
    let total: i64 = bind_filters!(sqlx::query_scalar(&count_sql), &filter.args)
        .fetch_one(pool.get_ref())
        .await?;

    let data_sql = format!("{SELECT_USER}{where_clause} ORDER BY id DESC LIMIT ? OFFSET ?");
    let data = bind_filters!(sqlx::query_as::<_, User>(&data_sql), &filter.args)
        .bind(pagination.per_page)
        .bind(pagination.offset())
        .fetch_all(pool.get_ref())
        .await?;

    Ok(HttpResponse::Ok().json(UserListResponse {
        data,
        page: pagination.page,
        per_page: pagination.per_page,
        total,
    }))
}

#[utoipa::path(
    get,
    path = "/api/users/{id}",
    params(("id" = u64, Path, description = "User id")),
    responses(
        (status = 200, description = "User", body = User),
        (status = 403, description = "Outside the caller's scope"),
        (status = 404, description = "User not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Users"
)]
pub async fn get_user(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> ApiResult<HttpResponse> {
    let user = visible_user(pool.get_ref(), &auth, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(user))
}

/// Checks payload-level rules that do not need the database.
fn check_update_payload(auth: &AuthUser, target_id: u64, payload: &Map<String, Value>) -> ApiResult<()> {
    if let Some(raw) = payload.get("role") {
        let role = raw
            .as_str()
            .and_then(|s| Role::from_str(s).ok())
            .ok_or_else(|| ApiError::bad_request("Invalid role"))?;
        if !auth.role.can_assign(role) {
            return Err(ApiError::forbidden(format!("{} cannot assign role {}", auth.role, role)));
        }
    }
    if target_id == auth.user_id && (payload.contains_key("role") || payload.contains_key("is_active")) {
        return Err(ApiError::bad_request("You cannot change your own role or status"));
    }
    if let Some(v) = payload.get("manager_id") {
        if v.as_u64() == Some(target_id) {
            return Err(ApiError::bad_request("A user cannot manage themselves"));
        }
    }
    if let Some(v) = payload.get("basic_salary") {
        if !v.as_f64().is_some_and(|s| s >= 0.0) {
            return Err(ApiError::bad_request("basic_salary must be a non-negative number"));
        }
    }
    for name in ["first_name", "last_name"] {
        if let Some(v) = payload.get(name) {
            if !v.as_str().is_some_and(|s| !s.trim().is_empty()) {
                return Err(ApiError::bad_request(format!("{name} cannot be empty")));
            }
        }
    }
    // Deactivation ends sessions only on a real `false`.
    if payload.get("is_active").is_some_and(|v| !v.is_boolean()) {
        return Err(ApiError::bad_request("is_active must be true or false"));
    }
    Ok(())
}

/// Partial update. The columns a caller may touch depend on their role.
#[utoipa::path(
    put,
    path = "/api/users/{id}",
    params(("id" = u64, Path, description = "User id")),
    request_body(content = Object, example = json!({ "department": "Finance", "basic_salary": 52000.0 })),
    responses(
        (status = 200, description = "Updated user", body = User),
        (status = 400, description = "Unknown or invalid field"),
        (status = 403, description = "Field or role not allowed"),
        (status = 404, description = "User not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Users"
)]
pub async fn update_user(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    body: web::Json<Map<String, Value>>,
) -> ApiResult<HttpResponse> {
    let company_id = auth.require_company()?;
    let user_id = path.into_inner();
    let payload = body.into_inner();

    let allowed = auth.role.editable_user_columns();
    if allowed.is_empty() {
        return Err(ApiError::forbidden("Not allowed to edit users"));
    }
    check_update_payload(&auth, user_id, &payload)?;
    let update = build_update_sql("users", &payload, allowed, user_id, company_id)?;

    let target = user::find_in_company(pool.get_ref(), company_id, user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    if auth.role != Role::Admin && target.role == Role::Admin.as_ref() {
        return Err(ApiError::forbidden("Only an admin can edit an admin"));
    }
    if let Some(manager_id) = payload.get("manager_id").and_then(Value::as_u64) {
        ensure_manager(pool.get_ref(), company_id, manager_id).await?;
    }

    execute_update(pool.get_ref(), update).await.map_err(|e| {
        error!(error = %e, user_id, "Failed to update user");
        ApiError::from(e)
    })?;

    if payload.get("is_active") == Some(&Value::Bool(false)) {
        end_user_sessions(pool.get_ref(), user_id, EndReason::Terminated).await?;
    }

    let user = user::find_in_company(pool.get_ref(), company_id, user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    info!(company_id, user_id, updated_by = auth.user_id, "User updated");

    Ok(HttpResponse::Ok().json(user))
}

#[utoipa::path(
    delete,
    path = "/api/users/{id}",
    params(("id" = u64, Path, description = "User id")),
    responses(
        (status = 200, description = "User deleted", body = MessageResponse),
        (status = 400, description = "Cannot delete yourself"),
        (status = 403, description = "Admin only"),
        (status = 404, description = "User not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Users"
)]
pub async fn delete_user(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> ApiResult<HttpResponse> {
    auth.require_admin()?;
    let company_id = auth.require_company()?;
    let user_id = path.into_inner();

    if user_id == auth.user_id {
        return Err(ApiError::bad_request("You cannot delete your own account"));
    }

    let target = user::find_in_company(pool.get_ref(), company_id, user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    // Sessions cascade with the row; block their tokens first.
    end_user_sessions(pool.get_ref(), user_id, EndReason::Terminated).await?;

    sqlx::query("DELETE FROM users WHERE id = ? AND company_id = ?")
        .bind(user_id)
        .bind(company_id)
        .execute(pool.get_ref())
        .await?;

    email_index::forget(&target.email).await;

    info!(company_id, user_id, deleted_by = auth.user_id, "User deleted");

    Ok(HttpResponse::Ok().json(MessageResponse::new("User deleted")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn caller(role: Role) -> AuthUser {
        AuthUser {
            user_id: 1,
            email: "boss@odoo.in".into(),
            role,
            session_id: 1,
            company_id: Some(1),
        }
    }

    fn new_user(role: Option<Role>, salary: Option<f64>) -> CreateUser {
        CreateUser {
            first_name: "Jane".into(),
            last_name: "Smith".into(),
            email: "jane@odoo.in".into(),
            phone: None,
            role,
            department: None,
            designation: None,
            manager_id: None,
            basic_salary: salary,
            date_of_joining: None,
        }
    }

    #[test]
    fn hr_cannot_create_admins_or_set_salary() {
        let hr = caller(Role::HrOfficer);
        assert_eq!(validate_new_user(&hr, &new_user(None, None)).unwrap(), Role::Employee);
        assert!(matches!(
            validate_new_user(&hr, &new_user(Some(Role::Admin), None)),
            Err(ApiError::Forbidden(_))
        ));
        assert!(matches!(
            validate_new_user(&hr, &new_user(None, Some(1000.0))),
            Err(ApiError::Forbidden(_))
        ));

        let admin = caller(Role::Admin);
        assert_eq!(
            validate_new_user(&admin, &new_user(Some(Role::Admin), Some(1000.0))).unwrap(),
            Role::Admin
        );
    }

    #[test]
    fn new_users_need_names_and_a_valid_email() {
        let admin = caller(Role::Admin);
        let mut body = new_user(None, None);
        body.email = "not-an-email".into();
        assert!(matches!(validate_new_user(&admin, &body), Err(ApiError::BadRequest(_))));

        let body = new_user(None, Some(-5.0));
        assert!(matches!(validate_new_user(&admin, &body), Err(ApiError::BadRequest(_))));
    }

    #[test]
    fn update_payload_rules() {
        let hr = caller(Role::HrOfficer);
        let obj = |v: Value| v.as_object().cloned().unwrap();

        assert!(matches!(
            check_update_payload(&hr, 2, &obj(json!({ "role": "ADMIN" }))),
            Err(ApiError::Forbidden(_))
        ));
        assert!(matches!(
            check_update_payload(&hr, 2, &obj(json!({ "role": "OVERLORD" }))),
            Err(ApiError::BadRequest(_))
        ));
        assert!(check_update_payload(&hr, 2, &obj(json!({ "role": "MANAGER" }))).is_ok());
        assert!(matches!(
            check_update_payload(&hr, 1, &obj(json!({ "is_active": false }))),
            Err(ApiError::BadRequest(_))
        ));
        assert!(matches!(
            check_update_payload(&hr, 2, &obj(json!({ "manager_id": 2 }))),
            Err(ApiError::BadRequest(_))
        ));
    }

    #[test]
    fn required_columns_cannot_be_nulled() {
        let admin = caller(Role::Admin);
        let obj = |v: Value| v.as_object().cloned().unwrap();

        for payload in [
            json!({ "first_name": null }),
            json!({ "last_name": "   " }),
            json!({ "role": null }),
            json!({ "is_active": null }),
            json!({ "basic_salary": null }),
        ] {
            assert!(
                matches!(check_update_payload(&admin, 2, &obj(payload.clone())), Err(ApiError::BadRequest(_))),
                "{payload}"
            );
        }

        // Optional columns may be cleared.
        assert!(check_update_payload(&admin, 2, &obj(json!({ "phone": null, "manager_id": null }))).is_ok());
        assert!(check_update_payload(&admin, 2, &obj(json!({ "first_name": "Ravi" }))).is_ok());
    }

    #[test]
    fn is_active_must_be_a_boolean() {
        let admin = caller(Role::Admin);
        let obj = |v: Value| v.as_object().cloned().unwrap();

        for raw in [json!(0), json!(1), json!("false")] {
            assert!(matches!(
                check_update_payload(&admin, 2, &obj(json!({ "is_active": raw }))),
                Err(ApiError::BadRequest(_))
            ));
        }
        assert!(check_update_payload(&admin, 2, &obj(json!({ "is_active": false }))).is_ok());
    }
}
