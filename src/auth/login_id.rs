//! Generated login ids, e.g. `OIJODO20220001`:
//! company code `OI`, first name `JO`, last name `DO`, joining year, serial.

use sqlx::{Executor, MySql};

fn letters(s: &str) -> impl Iterator<Item = char> + '_ {
    s.chars()
        .filter(|c| c.is_ascii_alphabetic())
        .map(|c| c.to_ascii_uppercase())
}

/// Two upper-case letters, padded with `X` when the source is short.
fn two_letters(s: &str) -> String {
    let mut out: String = letters(s).take(2).collect();
    while out.len() < 2 {
        out.push('X');
    }
    out
}

/// Initials of the first two words, or the first two letters of a
/// single-word name.
pub fn company_code(company_name: &str) -> String {
    let words: Vec<&str> = company_name
        .split_whitespace()
        .filter(|w| letters(w).next().is_some())
        .collect();

    match words.as_slice() {
        [first, second, ..] => {
            let mut code = String::new();
            code.extend(letters(first).take(1));
            code.extend(letters(second).take(1));
            code
        }
        [only] => two_letters(only),
        [] => "XX".to_string(),
    }
}

/// Everything but the serial, e.g. `OIJODO2022`.
pub fn login_id_prefix(code: &str, first_name: &str, last_name: &str, year: i32) -> String {
    format!("{}{}{}{:04}", code, two_letters(first_name), two_letters(last_name), year)
}

pub fn with_serial(prefix: &str, serial: u32) -> String {
    format!("{prefix}{serial:04}")
}

pub fn format_login_id(code: &str, first_name: &str, last_name: &str, year: i32, serial: u32) -> String {
    with_serial(&login_id_prefix(code, first_name, last_name, year), serial)
}

/// Next serial for a company and joining year: the company's joiners that
/// year plus one. Company codes are only two letters, so another company can
/// already own ids under the same prefix; the serial then continues past the
/// highest one taken.
pub async fn next_serial<'e, E>(executor: E, company_id: u64, year: i32, prefix: &str) -> Result<u32, sqlx::Error>
where
    E: Executor<'e, Database = MySql>,
{
    let taken: i64 = sqlx::query_scalar(
        r#"
        SELECT CAST(GREATEST(
            (SELECT COUNT(*)
             FROM users
             WHERE company_id = ? AND login_id IS NOT NULL AND YEAR(date_of_joining) = ?),
            (SELECT COALESCE(MAX(CAST(RIGHT(login_id, 4) AS UNSIGNED)), 0)
             FROM users
             WHERE login_id LIKE ?)
        ) AS SIGNED)
        "#,
    )
    .bind(company_id)
    .bind(year)
    .bind(format!("{prefix}____"))
    .fetch_one(executor)
    .await?;

    Ok(u32::try_from(taken.max(0)).unwrap_or(u32::MAX).saturating_add(1))
}

/// Unique index guarding generated ids; a hit means another request took the
/// serial first.
pub const LOGIN_ID_KEY: &str = "uq_users_login_id";

/// Serial bumps tried on collision before giving up with 409.
pub const MAX_SERIAL_ATTEMPTS: u32 = 5;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_the_documented_example() {
        let code = company_code("Odoo India");
        assert_eq!(code, "OI");
        assert_eq!(format_login_id(&code, "John", "Doe", 2022, 1), "OIJODO20220001");
    }

    #[test]
    fn prefix_is_the_id_without_serial() {
        let prefix = login_id_prefix("OI", "John", "Doe", 2025);
        assert_eq!(prefix, "OIJODO2025");
        assert_eq!(with_serial(&prefix, 42), format_login_id("OI", "John", "Doe", 2025, 42));
        // Different companies, same two-letter code: ids only differ by serial.
        assert_eq!(
            login_id_prefix(&company_code("Odoo India"), "John", "Doe", 2025),
            login_id_prefix(&company_code("Oracle Inc"), "Jonas", "Dobbs", 2025)
        );
    }

    #[test]
    fn single_word_company_uses_two_letters() {
        assert_eq!(company_code("acme"), "AC");
        assert_eq!(company_code("  x  "), "XX");
        assert_eq!(company_code(""), "XX");
    }

    #[test]
    fn short_or_accented_names_are_padded() {
        assert_eq!(format_login_id("AC", "Al", "O", 2025, 12), "ACALOX20250012");
        assert_eq!(format_login_id("AC", "Émile", "Zola", 2025, 3), "ACMIZO20250003");
    }
}
