use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use rand::{Rng, distributions::Alphanumeric};

pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let argon2 = Argon2::default();
    let salt = SaltString::generate(&mut OsRng);

    Ok(argon2.hash_password(password.as_bytes(), &salt)?.to_string())
}

/// A malformed stored hash counts as a mismatch.
pub fn verify_password(password: &str, hashed: &str) -> Result<(), argon2::password_hash::Error> {
    let argon2 = Argon2::default();
    let parsed = PasswordHash::new(hashed)?;

    argon2.verify_password(password.as_bytes(), &parsed)
}

/// One-time password handed to employees created by HR.
pub fn temporary_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify() {
        let hash = hash_password("correct horse").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("correct horse", &hash).is_ok());
        assert!(verify_password("battery staple", &hash).is_err());
    }

    #[test]
    fn garbage_hash_does_not_panic() {
        assert!(verify_password("anything", "not-a-phc-string").is_err());
    }

    #[test]
    fn temporary_passwords_are_long_enough() {
        let pw = temporary_password();
        assert_eq!(pw.len(), 12);
        assert!(pw.len() >= crate::model::user::MIN_PASSWORD_LEN);
        assert_ne!(pw, temporary_password());
    }
}
