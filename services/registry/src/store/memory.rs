//! In-memory implementations of the store contracts.
//!
//! Tenancy follows the document layout: one partition per app id, created on
//! first use inside a concurrency-safe map (the moral equivalent of the
//! lazily-ensured per-app collections of a document store). Each partition
//! is guarded by its own mutex, which stands in for the single-document
//! atomicity a remote store would provide; the uniqueness invariants on
//! acct ids and `(user_id, index)` are enforced inside the critical section
//! exactly where a unique index would reject the write.
use super::{IdentityStore, NonceStore, SessionStore, MAX_ACCT_PER_USER};
use crate::error::{Error, Result};
use crate::id;
use crate::model::{App, Role, SessData, Session, User};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct Partition {
    users: HashMap<String, User>,
    roles: HashMap<String, Role>,
}

#[derive(Debug, Default)]
pub struct MemoryIdentityStore {
    partitions: DashMap<String, Arc<Mutex<Partition>>>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn partition(&self, app_id: &str) -> Arc<Mutex<Partition>> {
        self.partitions.entry(app_id.to_string()).or_default().clone()
    }
}

fn add_to_set(set: &mut Vec<String>, values: &[String]) {
    for value in values {
        if !set.contains(value) {
            set.push(value.clone());
        }
    }
}

// Best-effort equivalent of slicing the acct list to its newest entries.
fn trim_acct_ids(user: &mut User) {
    if user.acct_ids.len() > MAX_ACCT_PER_USER {
        let excess = user.acct_ids.len() - MAX_ACCT_PER_USER;
        user.acct_ids.drain(..excess);
    }
}

#[async_trait]
impl IdentityStore for MemoryIdentityStore {
    async fn login_user(&self, app: &App, user_ip: &str, acct_ids: &[String]) -> Result<User> {
        if acct_ids.len() > MAX_ACCT_PER_USER {
            return Err(Error::invalid_argument("too many acct ids"));
        }
        let partition = self.partition(&app.id);
        let mut partition = partition.lock();
        let now = Utc::now();

        let matched: Vec<String> = partition
            .users
            .values()
            .filter(|user| user.acct_ids.iter().any(|acct| acct_ids.contains(acct)))
            .map(|user| user.id.clone())
            .collect();
        match matched.as_slice() {
            [] => {
                let mut user = User {
                    id: id::new_user_id(app.key),
                    acct_ids: Vec::with_capacity(acct_ids.len()),
                    create_time: now,
                    create_ip: user_ip.to_string(),
                    login_time: now,
                    login_ip: user_ip.to_string(),
                    ban_to: None,
                    ban_for: String::new(),
                    metadata: HashMap::new(),
                };
                add_to_set(&mut user.acct_ids, acct_ids);
                partition.users.insert(user.id.clone(), user.clone());
                Ok(user)
            }
            [user_id] => {
                let user = partition.users.get_mut(user_id).expect("matched user");
                user.login_time = now;
                user.login_ip = user_ip.to_string();
                add_to_set(&mut user.acct_ids, acct_ids);
                let post_image = user.clone();
                trim_acct_ids(user);
                Ok(post_image)
            }
            // The acct set maps onto two users; the unique index on acct
            // ids forbids the merge, so the set is ambiguous by contract.
            _ => Err(Error::AcctAlreadyExists),
        }
    }

    async fn bind_acct_ids(
        &self,
        app_id: &str,
        user_id: &str,
        acct_ids: &[String],
        takeover: bool,
    ) -> Result<User> {
        if acct_ids.len() > MAX_ACCT_PER_USER {
            return Err(Error::invalid_argument("too many acct ids"));
        }
        let partition = self.partition(app_id);
        let mut partition = partition.lock();
        if takeover {
            // Pull the acct ids from whichever users currently hold them.
            for user in partition.users.values_mut() {
                if user.id != user_id {
                    user.acct_ids.retain(|acct| !acct_ids.contains(acct));
                }
            }
        } else {
            let conflict = partition.users.values().any(|user| {
                user.id != user_id && user.acct_ids.iter().any(|acct| acct_ids.contains(acct))
            });
            if conflict {
                return Err(Error::AcctAlreadyExists);
            }
        }
        let user = partition
            .users
            .get_mut(user_id)
            .ok_or(Error::UserNotFound)?;
        add_to_set(&mut user.acct_ids, acct_ids);
        let post_image = user.clone();
        trim_acct_ids(user);
        Ok(post_image)
    }

    async fn get_user(&self, app_id: &str, user_id: &str) -> Result<User> {
        let partition = self.partition(app_id);
        let partition = partition.lock();
        partition
            .users
            .get(user_id)
            .cloned()
            .ok_or(Error::UserNotFound)
    }

    async fn get_users(&self, app_id: &str, user_ids: &[String]) -> Result<Vec<User>> {
        let partition = self.partition(app_id);
        let partition = partition.lock();
        Ok(user_ids
            .iter()
            .filter_map(|user_id| partition.users.get(user_id).cloned())
            .collect())
    }

    async fn set_user_metadata(
        &self,
        app_id: &str,
        user_id: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<()> {
        let partition = self.partition(app_id);
        let mut partition = partition.lock();
        if let Some(user) = partition.users.get_mut(user_id) {
            for (key, value) in metadata {
                if value.is_empty() {
                    user.metadata.remove(key);
                } else {
                    user.metadata.insert(key.clone(), value.clone());
                }
            }
        }
        Ok(())
    }

    async fn ban_users(
        &self,
        app_id: &str,
        user_ids: &[String],
        ban_to: DateTime<Utc>,
        reason: &str,
    ) -> Result<()> {
        let partition = self.partition(app_id);
        let mut partition = partition.lock();
        for user_id in user_ids {
            if let Some(user) = partition.users.get_mut(user_id) {
                user.ban_to = Some(ban_to);
                user.ban_for = reason.to_string();
            }
        }
        Ok(())
    }

    async fn unban_users(&self, app_id: &str, user_ids: &[String]) -> Result<()> {
        let partition = self.partition(app_id);
        let mut partition = partition.lock();
        for user_id in user_ids {
            if let Some(user) = partition.users.get_mut(user_id) {
                user.ban_to = None;
                user.ban_for.clear();
            }
        }
        Ok(())
    }

    async fn create_role(&self, app: &App, user_id: &str, index: u32) -> Result<Role> {
        let partition = self.partition(&app.id);
        let mut partition = partition.lock();
        let duplicate = partition
            .roles
            .values()
            .any(|role| role.user_id == user_id && role.index == index);
        if duplicate {
            return Err(Error::invalid_argument("role index already exists"));
        }
        let role = Role {
            id: id::new_role_id(app.key),
            user_id: user_id.to_string(),
            index,
            create_time: Utc::now(),
            sign_in_time: None,
            metadata: HashMap::new(),
        };
        partition.roles.insert(role.id.clone(), role.clone());
        Ok(role)
    }

    async fn sign_in_role(&self, app_id: &str, user_id: &str, role_id: &str) -> Result<Role> {
        let partition = self.partition(app_id);
        let mut partition = partition.lock();
        let role = partition
            .roles
            .get_mut(role_id)
            .filter(|role| role.user_id == user_id)
            .ok_or(Error::RoleNotFound)?;
        role.sign_in_time = Some(Utc::now());
        Ok(role.clone())
    }

    async fn list_roles(&self, app_id: &str, user_id: &str) -> Result<Vec<Role>> {
        let partition = self.partition(app_id);
        let partition = partition.lock();
        let mut roles: Vec<Role> = partition
            .roles
            .values()
            .filter(|role| role.user_id == user_id)
            .cloned()
            .collect();
        roles.sort_by_key(|role| role.index);
        Ok(roles)
    }

    async fn get_roles(&self, app_id: &str, role_ids: &[String]) -> Result<Vec<Role>> {
        let partition = self.partition(app_id);
        let partition = partition.lock();
        Ok(role_ids
            .iter()
            .filter_map(|role_id| partition.roles.get(role_id).cloned())
            .collect())
    }

    async fn roles_by_user(&self, app_id: &str, user_ids: &[String]) -> Result<Vec<Role>> {
        let partition = self.partition(app_id);
        let partition = partition.lock();
        let mut roles: Vec<Role> = partition
            .roles
            .values()
            .filter(|role| user_ids.contains(&role.user_id))
            .cloned()
            .collect();
        roles.sort_by(|a, b| (&a.user_id, a.index).cmp(&(&b.user_id, b.index)));
        Ok(roles)
    }

    async fn set_role_metadata(
        &self,
        app_id: &str,
        user_id: &str,
        role_id: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<()> {
        let partition = self.partition(app_id);
        let mut partition = partition.lock();
        if let Some(role) = partition
            .roles
            .get_mut(role_id)
            .filter(|role| role.user_id == user_id)
        {
            for (key, value) in metadata {
                if value.is_empty() {
                    role.metadata.remove(key);
                } else {
                    role.metadata.insert(key.clone(), value.clone());
                }
            }
        }
        Ok(())
    }
}

/// Session records as encoded bytes, as a remote KV would hold them. The
/// whole map sits behind one mutex, so `update_data`'s read-modify-write is
/// atomic the same way the server-side script variant is.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    inner: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn put(&self, user_id: &str, sess: &Session) -> Result<()> {
        let bytes = sess.to_bytes()?;
        self.inner.lock().insert(user_id.to_string(), bytes);
        Ok(())
    }

    async fn get(&self, user_id: &str) -> Result<Session> {
        let bytes = self
            .inner
            .lock()
            .get(user_id)
            .cloned()
            .ok_or(Error::InvalidToken)?;
        Session::from_bytes(&bytes)
    }

    async fn update_data(&self, user_id: &str, data: &SessData) -> Result<()> {
        let mut inner = self.inner.lock();
        let entry = inner.get_mut(user_id).ok_or(Error::InvalidToken)?;
        let mut sess = Session::from_bytes(entry)?;
        sess.data = data.clone();
        *entry = sess.to_bytes()?;
        Ok(())
    }

    async fn delete(&self, user_ids: &[String]) -> Result<()> {
        let mut inner = self.inner.lock();
        for user_id in user_ids {
            inner.remove(user_id);
        }
        Ok(())
    }
}

/// Nonce replay window: set-if-absent with TTL, pruned lazily.
#[derive(Debug, Default)]
pub struct MemoryNonceStore {
    inner: Mutex<HashMap<String, Instant>>,
}

impl MemoryNonceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NonceStore for MemoryNonceStore {
    async fn check(&self, app_id: &str, nonce: &str, ttl: Duration) -> Result<bool> {
        let key = format!("{app_id}${nonce}");
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.retain(|_, expires_at| *expires_at > now);
        if inner.contains_key(&key) {
            return Ok(false);
        }
        inner.insert(key, now + ttl);
        Ok(true)
    }
}
