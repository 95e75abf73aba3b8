//! Salted, slow password hashing (argon2id).

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};

use crate::error::{CoreError, CoreResult};

/// Tunable argon2 cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashCost {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for HashCost {
    fn default() -> Self {
        Self {
            memory_kib: Params::DEFAULT_M_COST,
            iterations: Params::DEFAULT_T_COST,
            parallelism: Params::DEFAULT_P_COST,
        }
    }
}

impl HashCost {
    /// Cheapest parameters argon2 accepts. Tests only.
    pub fn minimal() -> Self {
        Self {
            memory_kib: Params::MIN_M_COST.max(8),
            iterations: 1,
            parallelism: 1,
        }
    }
}

/// Hashes and verifies passwords with a fixed cost.
#[derive(Debug, Clone)]
pub struct PasswordHasher {
    params: Params,
    /// Verified against when the account does not exist, so unknown
    /// usernames cost the same as wrong passwords.
    dummy_hash: String,
    #[cfg(test)]
    derivations: std::sync::Arc<std::sync::atomic::AtomicUsize>,
}

impl PasswordHasher {
    pub fn new(cost: HashCost) -> CoreResult<Self> {
        let params = Params::new(cost.memory_kib, cost.iterations, cost.parallelism, None)
            .map_err(|e| CoreError::Internal(format!("invalid argon2 parameters: {e}")))?;
        let mut hasher = Self {
            params,
            dummy_hash: String::new(),
            #[cfg(test)]
            derivations: Default::default(),
        };
        hasher.dummy_hash = hasher.hash("inkpost-dummy-password")?;
        Ok(hasher)
    }

    /// Number of argon2 derivations run so far.
    #[cfg(test)]
    pub(crate) fn derivations(&self) -> usize {
        self.derivations.load(std::sync::atomic::Ordering::SeqCst)
    }

    fn argon2(&self) -> Argon2<'static> {
        #[cfg(test)]
        self.derivations
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    pub fn hash(&self, password: &str) -> CoreResult<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| CoreError::Internal(format!("failed to hash password: {e}")))?;
        Ok(hash.to_string())
    }

    /// Returns `false` for a mismatch or an unparseable stored hash.
    pub fn verify(&self, hash: &str, password: &str) -> bool {
        let parsed = match PasswordHash::new(hash) {
            Ok(h) => h,
            Err(e) => {
                tracing::error!("Stored password hash is unparseable: {e}");
                return false;
            }
        };
        self.argon2()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    }

    /// Burns one verification's worth of work and always fails.
    pub fn verify_dummy(&self, password: &str) -> bool {
        let _ = self.verify(&self.dummy_hash, password);
        false
    }
}
