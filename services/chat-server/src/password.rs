use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;

/// Hashes a client-supplied password digest with argon2, the memory-hard
/// KDF this corpus reaches for when it needs a real password hash (`sha2`
/// stays reserved for non-secret content hashing, e.g. file dedup).
pub fn hash_password(pw_hash: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    Ok(argon2.hash_password(pw_hash.as_bytes(), &salt)?.to_string())
}

pub fn verify_password(pw_hash: &str, stored: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored) else {
        return false;
    };
    Argon2::default().verify_password(pw_hash.as_bytes(), &parsed).is_ok()
}
