//! Accounts: password hashing, the credential store port and its adapters.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::{domain::UtcOffset, settings::with_timeout, Result};

/// A stored account.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    pub password_hash: String,
    pub country: String,
    pub offset: UtcOffset,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    Duplicate,
}

/// Port for the relational credential store.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert a new account; an existing username is left untouched.
    async fn create_user(&self, user: User) -> Result<CreateOutcome>;

    async fn get_user(&self, username: &str) -> Result<Option<User>>;
}

/// Hash a password with the deployment-wide salt.
///
/// The salt is the same for every account.
pub fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoginOutcome {
    Authorized(User),
    NotFound,
    WrongPassword,
}

/// Register/login operations over a [`UserStore`].
#[derive(Clone)]
pub struct Authenticator {
    store: Arc<dyn UserStore>,
    salt: String,
    timeout: Duration,
}

impl Authenticator {
    pub fn new(store: Arc<dyn UserStore>, salt: impl Into<String>, timeout: Duration) -> Self {
        Self {
            store,
            salt: salt.into(),
            timeout,
        }
    }

    pub async fn register(
        &self,
        username: &str,
        password: &str,
        country: &str,
        offset: UtcOffset,
    ) -> Result<CreateOutcome> {
        let user = User {
            username: username.to_string(),
            password_hash: hash_password(&self.salt, password),
            country: country.to_string(),
            offset,
        };
        with_timeout("create user", self.timeout, self.store.create_user(user)).await
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<LoginOutcome> {
        let found = with_timeout("get user", self.timeout, self.store.get_user(username)).await?;
        let Some(user) = found else {
            return Ok(LoginOutcome::NotFound);
        };
        if hash_password(&self.salt, password) != user.password_hash {
            return Ok(LoginOutcome::WrongPassword);
        }
        Ok(LoginOutcome::Authorized(user))
    }
}

// ============== Adapters ==============

/// Credential store kept in process memory.
#[derive(Default)]
pub struct MemoryUserStore {
    users: Mutex<HashMap<String, User>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn create_user(&self, user: User) -> Result<CreateOutcome> {
        let mut users = self.users.lock().await;
        if users.contains_key(&user.username) {
            return Ok(CreateOutcome::Duplicate);
        }
        users.insert(user.username.clone(), user);
        Ok(CreateOutcome::Created)
    }

    async fn get_user(&self, username: &str) -> Result<Option<User>> {
        Ok(self.users.lock().await.get(username).cloned())
    }
}

/// Credential store persisted as a JSON array of users.
///
/// The whole file is rewritten on every insert (temp file + rename).
pub struct FileUserStore {
    path: PathBuf,
    users: Mutex<HashMap<String, User>>,
}

impl FileUserStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let users = load_users_file(&path)?
            .into_iter()
            .map(|u| (u.username.clone(), u))
            .collect();
        Ok(Self {
            path,
            users: Mutex::new(users),
        })
    }

    async fn persist(&self, users: &HashMap<String, User>) -> Result<()> {
        let mut list: Vec<&User> = users.values().collect();
        list.sort_by(|a, b| a.username.cmp(&b.username));
        let body = serde_json::to_vec_pretty(&list)?;

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl UserStore for FileUserStore {
    async fn create_user(&self, user: User) -> Result<CreateOutcome> {
        let mut users = self.users.lock().await;
        if users.contains_key(&user.username) {
            return Ok(CreateOutcome::Duplicate);
        }
        let username = user.username.clone();
        users.insert(username.clone(), user);
        if let Err(e) = self.persist(&users).await {
            users.remove(&username);
            return Err(e);
        }
        Ok(CreateOutcome::Created)
    }

    async fn get_user(&self, username: &str) -> Result<Option<User>> {
        Ok(self.users.lock().await.get(username).cloned())
    }
}

fn load_users_file(path: &Path) -> Result<Vec<User>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let text = std::fs::read_to_string(path)?;
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(&text)?)
}
