use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};
use utoipa::ToSchema;

#[derive(
    Debug,
    Copy,
    Clone,
    Eq,
    PartialEq,
    Hash,
    Serialize,
    Deserialize,
    ToSchema,
    Display,
    EnumString,
    AsRefStr,
    EnumIter,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin,
    HrOfficer,
    PayrollOfficer,
    Manager,
    Employee,
}

/// Which users' records a caller may read.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Scope {
    /// Every user of the caller's company.
    Company,
    /// The caller and their direct reports.
    Team(u64),
    /// Only the caller.
    Own(u64),
}

pub const USER_MANAGERS: &[Role] = &[Role::Admin, Role::HrOfficer];
pub const PAYROLL_RUNNERS: &[Role] = &[Role::Admin, Role::PayrollOfficer];
pub const LEAVE_REVIEWERS: &[Role] = &[Role::Admin, Role::HrOfficer, Role::Manager];
pub const MONITORS: &[Role] = &[Role::Admin, Role::Manager];

impl Role {
    /// Scope for people directory, attendance and payroll-adjacent reads.
    pub fn directory_scope(self, user_id: u64) -> Scope {
        match self {
            Role::Admin | Role::HrOfficer | Role::PayrollOfficer => Scope::Company,
            Role::Manager => Scope::Team(user_id),
            Role::Employee => Scope::Own(user_id),
        }
    }

    /// Scope for leave requests and activity logs. Payroll officers only
    /// see their own.
    pub fn review_scope(self, user_id: u64) -> Scope {
        match self {
            Role::Admin | Role::HrOfficer => Scope::Company,
            Role::Manager => Scope::Team(user_id),
            Role::PayrollOfficer | Role::Employee => Scope::Own(user_id),
        }
    }

    /// Roles this role may hand out when creating or promoting users.
    pub fn can_assign(self, target: Role) -> bool {
        match self {
            Role::Admin => true,
            Role::HrOfficer => target != Role::Admin,
            _ => false,
        }
    }

    /// Columns of `users` this role may change through `PUT /users/{id}`.
    pub fn editable_user_columns(self) -> &'static [&'static str] {
        match self {
            Role::Admin => &[
                "first_name",
                "last_name",
                "phone",
                "role",
                "department",
                "designation",
                "manager_id",
                "basic_salary",
                "date_of_joining",
                "is_active",
            ],
            Role::HrOfficer => &[
                "first_name",
                "last_name",
                "phone",
                "role",
                "department",
                "designation",
                "manager_id",
                "date_of_joining",
                "is_active",
            ],
            Role::PayrollOfficer => &["basic_salary"],
            Role::Manager | Role::Employee => &[],
        }
    }
}

impl Scope {
    /// SQL predicate on a `user_id`-like column plus its bind value.
    pub fn user_predicate(&self, column: &str) -> Option<(String, u64)> {
        match self {
            Scope::Company => None,
            Scope::Team(manager_id) => Some((
                format!(
                    "({column} = ? OR {column} IN (SELECT id FROM users WHERE manager_id = {manager_id}))"
                ),
                *manager_id,
            )),
            Scope::Own(user_id) => Some((format!("{column} = ?"), *user_id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn role_strings_round_trip_through_strum() {
        for role in Role::iter() {
            assert_eq!(Role::from_str(role.as_ref()).unwrap(), role);
        }
        assert_eq!(Role::HrOfficer.to_string(), "HR_OFFICER");
        assert!(Role::from_str("SUPERUSER").is_err());
    }

    #[test]
    fn serde_uses_the_same_names_as_the_database() {
        let json = serde_json::to_string(&Role::PayrollOfficer).unwrap();
        assert_eq!(json, "\"PAYROLL_OFFICER\"");
        let role: Role = serde_json::from_str("\"MANAGER\"").unwrap();
        assert_eq!(role, Role::Manager);
    }

    #[test]
    fn employees_only_see_themselves() {
        assert_eq!(Role::Employee.directory_scope(7), Scope::Own(7));
        assert_eq!(Role::Manager.directory_scope(7), Scope::Team(7));
        assert_eq!(Role::PayrollOfficer.directory_scope(7), Scope::Company);
        assert_eq!(Role::PayrollOfficer.review_scope(7), Scope::Own(7));
    }

    #[test]
    fn hr_cannot_mint_admins() {
        assert!(Role::Admin.can_assign(Role::Admin));
        assert!(Role::HrOfficer.can_assign(Role::Manager));
        assert!(!Role::HrOfficer.can_assign(Role::Admin));
        assert!(!Role::Manager.can_assign(Role::Employee));
    }

    #[test]
    fn salary_is_owned_by_payroll() {
        assert!(Role::PayrollOfficer.editable_user_columns().contains(&"basic_salary"));
        assert!(!Role::HrOfficer.editable_user_columns().contains(&"basic_salary"));
        assert!(Role::Employee.editable_user_columns().is_empty());
    }

    #[test]
    fn team_predicate_includes_the_manager() {
        let (sql, bind) = Scope::Team(4).user_predicate("a.user_id").unwrap();
        assert_eq!(bind, 4);
        assert!(sql.starts_with("(a.user_id = ? OR a.user_id IN"));
        assert!(sql.contains("manager_id = 4"));
        assert!(Scope::Company.user_predicate("user_id").is_none());
    }
}
