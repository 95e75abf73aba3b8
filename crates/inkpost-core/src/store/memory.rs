//! In-process [`CredentialStore`] for single-instance deployments and tests.

use std::collections::HashMap;
use std::time::SystemTime;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{CredentialStore, StoreError};
use crate::account::{Account, AccountUpdate, CodeKind, NewAccount, Profile, Role};
use crate::code::constant_time_eq;

#[derive(Debug, Default)]
struct Tables {
    accounts: HashMap<String, Account>,
    by_username: HashMap<String, String>,
    by_email: HashMap<String, String>,
}

impl Tables {
    fn lookup(&self, index: &HashMap<String, String>, key: &str) -> Option<Account> {
        index.get(key).and_then(|id| self.accounts.get(id)).cloned()
    }
}

/// Accounts held in memory behind one lock, with unique indexes on
/// username and email.
///
/// Every operation takes the lock once and never awaits while holding it.
#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    tables: RwLock<Tables>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.tables.read().await.accounts.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn find_by_username_or_email(
        &self,
        username: &str,
        email: &str,
    ) -> Result<Option<Account>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .lookup(&tables.by_username, username)
            .or_else(|| tables.lookup(&tables.by_email, email)))
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<Account>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.lookup(&tables.by_username, username))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.lookup(&tables.by_email, email))
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Account>, StoreError> {
        Ok(self.tables.read().await.accounts.get(id).cloned())
    }

    async fn insert_unique(&self, new: NewAccount) -> Result<Account, StoreError> {
        let mut tables = self.tables.write().await;
        if tables.by_username.contains_key(&new.username) || tables.by_email.contains_key(&new.email)
        {
            return Err(StoreError::Conflict);
        }

        let account = Account {
            id: uuid::Uuid::new_v4().to_string(),
            username: new.username,
            email: new.email,
            password_hash: new.password_hash,
            profile: Profile {
                display_name: new.display_name,
                ..Profile::default()
            },
            role: Role::User,
            is_verified: false,
            is_banned: false,
            verification: Some(new.verification),
            reset: None,
            followers: Vec::new(),
            following: Vec::new(),
            created_at: new.created_at,
        };

        tables
            .by_username
            .insert(account.username.clone(), account.id.clone());
        tables
            .by_email
            .insert(account.email.clone(), account.id.clone());
        tables.accounts.insert(account.id.clone(), account.clone());
        Ok(account)
    }

    async fn update_fields(&self, id: &str, update: AccountUpdate) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        match tables.accounts.get_mut(id) {
            Some(account) => {
                account.apply(&update);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        let Some(account) = tables.accounts.remove(id) else {
            return Ok(false);
        };
        tables.by_username.remove(&account.username);
        tables.by_email.remove(&account.email);
        Ok(true)
    }

    async fn consume_code(
        &self,
        email: &str,
        kind: CodeKind,
        code: &str,
        now: SystemTime,
        then: AccountUpdate,
    ) -> Result<Option<Account>, StoreError> {
        let mut tables = self.tables.write().await;
        let Some(id) = tables.by_email.get(email).cloned() else {
            return Ok(None);
        };
        let Some(account) = tables.accounts.get_mut(&id) else {
            return Ok(None);
        };

        let matches = account
            .pending(kind)
            .is_some_and(|p| p.is_live(now) && constant_time_eq(p.code.as_bytes(), code.as_bytes()));
        if !matches {
            return Ok(None);
        }

        account.apply(&then.clear_code(kind));
        Ok(Some(account.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::PendingCode;
    use std::sync::Arc;
    use std::time::Duration;

    fn new_account(username: &str, email: &str, code: &str, now: SystemTime) -> NewAccount {
        NewAccount {
            username: username.to_string(),
            email: email.to_string(),
            password_hash: "$argon2id$x".to_string(),
            display_name: username.to_string(),
            verification: PendingCode::issued(code.to_string(), now, Duration::from_secs(3600)),
            created_at: now,
        }
    }

    // --- Insert / lookup ---

    #[tokio::test]
    async fn insert_then_find() {
        let store = InMemoryCredentialStore::new();
        let now = SystemTime::now();
        let acc = store
            .insert_unique(new_account("alice", "a@x.com", "111111", now))
            .await
            .unwrap();

        assert!(!acc.is_verified);
        assert_eq!(acc.profile.display_name, "alice");
        assert_eq!(
            store.find_by_username("alice").await.unwrap().unwrap().id,
            acc.id
        );
        assert_eq!(store.find_by_email("a@x.com").await.unwrap().unwrap().id, acc.id);
        assert_eq!(store.find_by_id(&acc.id).await.unwrap().unwrap().id, acc.id);
        assert!(store
            .find_by_username_or_email("nobody", "a@x.com")
            .await
            .unwrap()
            .is_some());
        assert!(store.find_by_username("bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_username_or_email_conflicts() {
        let store = InMemoryCredentialStore::new();
        let now = SystemTime::now();
        store
            .insert_unique(new_account("alice", "a@x.com", "1", now))
            .await
            .unwrap();

        let by_name = store
            .insert_unique(new_account("alice", "other@x.com", "1", now))
            .await;
        assert!(matches!(by_name, Err(StoreError::Conflict)));

        let by_email = store
            .insert_unique(new_account("other", "a@x.com", "1", now))
            .await;
        assert!(matches!(by_email, Err(StoreError::Conflict)));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn delete_frees_both_indexes() {
        let store = InMemoryCredentialStore::new();
        let now = SystemTime::now();
        let acc = store
            .insert_unique(new_account("alice", "a@x.com", "1", now))
            .await
            .unwrap();
        assert!(store.delete(&acc.id).await.unwrap());
        assert!(!store.delete(&acc.id).await.unwrap());
        assert!(store.is_empty().await);
        assert!(store
            .insert_unique(new_account("alice", "a@x.com", "1", now))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn update_missing_account_reports_false() {
        let store = InMemoryCredentialStore::new();
        assert!(!store
            .update_fields("nope", AccountUpdate::default())
            .await
            .unwrap());
    }

    // --- consume_code ---

    #[tokio::test]
    async fn consume_clears_code_and_applies_update() {
        let store = InMemoryCredentialStore::new();
        let now = SystemTime::now();
        store
            .insert_unique(new_account("alice", "a@x.com", "123456", now))
            .await
            .unwrap();

        let then = AccountUpdate {
            is_verified: Some(true),
            ..AccountUpdate::default()
        };
        let acc = store
            .consume_code("a@x.com", CodeKind::Verification, "123456", now, then.clone())
            .await
            .unwrap()
            .unwrap();
        assert!(acc.is_verified);
        assert!(acc.verification.is_none());

        let replay = store
            .consume_code("a@x.com", CodeKind::Verification, "123456", now, then)
            .await
            .unwrap();
        assert!(replay.is_none());
    }

    #[tokio::test]
    async fn consume_rejects_wrong_kind_code_or_email() {
        let store = InMemoryCredentialStore::new();
        let now = SystemTime::now();
        store
            .insert_unique(new_account("alice", "a@x.com", "123456", now))
            .await
            .unwrap();
        let none = AccountUpdate::default();

        for (email, kind, code) in [
            ("a@x.com", CodeKind::Reset, "123456"),
            ("a@x.com", CodeKind::Verification, "654321"),
            ("b@x.com", CodeKind::Verification, "123456"),
        ] {
            assert!(store
                .consume_code(email, kind, code, now, none.clone())
                .await
                .unwrap()
                .is_none());
        }
        let acc = store.find_by_email("a@x.com").await.unwrap().unwrap();
        assert!(acc.verification.is_some());
    }

    #[tokio::test]
    async fn consume_rejects_code_at_expiry() {
        let store = InMemoryCredentialStore::new();
        let now = SystemTime::now();
        store
            .insert_unique(new_account("alice", "a@x.com", "123456", now))
            .await
            .unwrap();
        let at_expiry = now + Duration::from_secs(3600);
        assert!(store
            .consume_code(
                "a@x.com",
                CodeKind::Verification,
                "123456",
                at_expiry,
                AccountUpdate::default()
            )
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_consumers_see_one_success() {
        let store = Arc::new(InMemoryCredentialStore::new());
        let now = SystemTime::now();
        store
            .insert_unique(new_account("alice", "a@x.com", "123456", now))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .consume_code(
                        "a@x.com",
                        CodeKind::Verification,
                        "123456",
                        now,
                        AccountUpdate::default(),
                    )
                    .await
                    .unwrap()
                    .is_some()
            }));
        }

        let mut wins = 0;
        for h in handles {
            if h.await.unwrap() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
    }
}
