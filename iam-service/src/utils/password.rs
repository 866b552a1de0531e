use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

/// Argon2id PHC string for a password, salted per call.
pub fn hash_password(password: &str) -> Result<String, anyhow::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?;
    Ok(hash.to_string())
}

/// Whether `password` matches a stored PHC string.
///
/// A mismatch is `Ok(false)`; only a malformed stored hash is an error.
pub fn password_matches(password: &str, stored_hash: &str) -> Result<bool, anyhow::Error> {
    let parsed = PasswordHash::new(stored_hash)
        .map_err(|e| anyhow::anyhow!("Invalid password hash format: {}", e))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_match() -> Result<(), anyhow::Error> {
        let hash = hash_password("correct horse battery staple")?;
        assert!(hash.starts_with("$argon2"));
        assert!(password_matches("correct horse battery staple", &hash)?);
        assert!(!password_matches("correct horse", &hash)?);
        Ok(())
    }

    #[test]
    fn test_salted_per_call() -> Result<(), anyhow::Error> {
        let first = hash_password("hunter2")?;
        let second = hash_password("hunter2")?;
        assert_ne!(first, second);
        assert!(password_matches("hunter2", &second)?);
        Ok(())
    }

    #[test]
    fn test_malformed_hash_is_an_error() {
        assert!(password_matches("anything", "not-a-phc-string").is_err());
    }
}
