// src/auth/password.rs

use anyhow::{anyhow, Result};
use bcrypt::{hash, verify, DEFAULT_COST};

pub fn hash_password(password: &str) -> Result<String> {
    hash(password, DEFAULT_COST).map_err(|e| anyhow!("Failed to hash password: {}", e))
}

pub fn verify_password(password: &str, password_hash: &str) -> Result<bool> {
    verify(password, password_hash).map_err(|e| anyhow!("Failed to verify password: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify() {
        let hashed = hash_password("p4ssw0rd").unwrap();
        assert!(verify_password("p4ssw0rd", &hashed).unwrap());
        assert!(!verify_password("wrong", &hashed).unwrap());
    }
}
