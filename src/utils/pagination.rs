/// 1-based page window shared by list endpoints.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pagination {
    pub page: u64,
    pub per_page: u64,
}

pub const DEFAULT_PER_PAGE: u64 = 20;
pub const MAX_PER_PAGE: u64 = 100;

impl Pagination {
    pub fn new(page: Option<u64>, per_page: Option<u64>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            per_page: per_page.unwrap_or(DEFAULT_PER_PAGE).clamp(1, MAX_PER_PAGE),
        }
    }

    /// Saturates for absurd page numbers; MySQL then returns an empty page.
    pub fn offset(&self) -> u64 {
        self.page.saturating_sub(1).saturating_mul(self.per_page)
    }
}

/// Bind values collected while building a dynamic WHERE clause.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    U64(u64),
    Str(String),
    Date(chrono::NaiveDate),
}

/// Accumulates `AND`-joined predicates and their binds.
#[derive(Debug, Default)]
pub struct Filter {
    conditions: Vec<String>,
    pub args: Vec<FilterValue>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, condition: impl Into<String>, value: FilterValue) {
        self.conditions.push(condition.into());
        self.args.push(value);
    }

    /// Condition with several placeholders, bound in order.
    pub fn push_many(&mut self, condition: impl Into<String>, values: impl IntoIterator<Item = FilterValue>) {
        self.conditions.push(condition.into());
        self.args.extend(values);
    }

    /// Condition without a bind value.
    pub fn push_raw(&mut self, condition: impl Into<String>) {
        self.conditions.push(condition.into());
    }

    pub fn where_clause(&self) -> String {
        if self.conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.conditions.join(" AND "))
        }
    }
}

/// Binds every collected value onto a `query_as`.
macro_rules! bind_filters {
    ($query:expr, $args:expr) => {{
        let mut q = $query;
        for arg in $args {
            q = match arg {
                $crate::utils::pagination::FilterValue::U64(v) => q.bind(*v),
                $crate::utils::pagination::FilterValue::Str(s) => q.bind(s.as_str()),
                $crate::utils::pagination::FilterValue::Date(d) => q.bind(*d),
            };
        }
        q
    }};
}

pub(crate) use bind_filters;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_and_clamping() {
        assert_eq!(Pagination::new(None, None), Pagination { page: 1, per_page: 20 });
        assert_eq!(Pagination::new(Some(0), Some(1000)).per_page, MAX_PER_PAGE);
        assert_eq!(Pagination::new(Some(3), Some(10)).offset(), 20);
        assert_eq!(Pagination::new(Some(1), Some(0)).per_page, 1);
    }

    #[test]
    fn huge_page_numbers_do_not_overflow() {
        assert_eq!(Pagination::new(Some(u64::MAX), Some(100)).offset(), u64::MAX);
        assert_eq!(Pagination::new(Some(u64::MAX / 2), Some(3)).offset(), u64::MAX);
    }

    #[test]
    fn where_clause_joins_conditions() {
        let mut f = Filter::new();
        assert_eq!(f.where_clause(), "");
        f.push("company_id = ?", FilterValue::U64(1));
        f.push("status = ?", FilterValue::Str("PENDING".into()));
        f.push_raw("is_active = TRUE");
        assert_eq!(
            f.where_clause(),
            " WHERE company_id = ? AND status = ? AND is_active = TRUE"
        );
        assert_eq!(f.args.len(), 2);
    }

    #[test]
    fn push_many_keeps_bind_order() {
        let mut f = Filter::new();
        f.push("company_id = ?", FilterValue::U64(1));
        f.push_many(
            "(first_name LIKE ? OR email LIKE ?)",
            [FilterValue::Str("%jo%".into()), FilterValue::Str("%jo%".into())],
        );
        assert_eq!(f.args.len(), 3);
        assert_eq!(f.args[0], FilterValue::U64(1));
        assert!(f.where_clause().ends_with("(first_name LIKE ? OR email LIKE ?)"));
    }
}
