//! Store contracts for the session KV, the nonce KV and the per-tenant
//! identity documents. The stores themselves are external collaborators;
//! only the operations the service needs are specified here, and the
//! in-memory implementations in [`memory`] back tests, local development
//! and non-durable deployments.
use crate::error::Result;
use crate::model::{App, Role, SessData, Session, User};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;

pub mod memory;

pub use memory::{MemoryIdentityStore, MemoryNonceStore, MemorySessionStore};

/// A user may accumulate at most this many acct ids.
pub const MAX_ACCT_PER_USER: usize = 10;

/// Session records keyed by user id.
///
/// `update_data` must be atomic with respect to concurrent `update_data`
/// calls: the read-modify-write of the embedded `data` record happens as one
/// operation (a server-side script on a remote KV), never as a client-side
/// get-then-put.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Unconditionally replace the session, rotating the token.
    async fn put(&self, user_id: &str, sess: &Session) -> Result<()>;

    /// Fails with `InvalidToken` when no session exists.
    async fn get(&self, user_id: &str) -> Result<Session>;

    /// Atomically replace only the embedded `data` record, keeping the token.
    /// Fails with `InvalidToken` when no session exists.
    async fn update_data(&self, user_id: &str, data: &SessData) -> Result<()>;

    /// Logout: remove the sessions of all given users.
    async fn delete(&self, user_ids: &[String]) -> Result<()>;
}

/// Replay window for login nonces: set-if-absent with TTL.
#[async_trait]
pub trait NonceStore: Send + Sync {
    /// Returns `true` when the nonce was unseen and is now recorded for
    /// `ttl`, `false` when it was already present.
    async fn check(&self, app_id: &str, nonce: &str, ttl: Duration) -> Result<bool>;
}

/// Per-tenant user and role documents.
///
/// Implementations guarantee two uniqueness invariants per tenant: acct ids
/// are pairwise disjoint across users, and `(user_id, index)` is unique
/// across roles. These indexes are the concurrency-safety backbone; every
/// mutation below relies on them rather than on caller-side locking.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Login-or-create keyed on "any element of `acct_ids` matches an
    /// existing user". Returns the post-image. An acct set that straddles
    /// two existing users fails with `AcctAlreadyExists`; a set larger than
    /// [`MAX_ACCT_PER_USER`] fails with `InvalidArgument`. Oversized acct
    /// lists are trimmed to the most recent entries best-effort.
    async fn login_user(&self, app: &App, user_ip: &str, acct_ids: &[String]) -> Result<User>;

    /// Add acct ids to a user. Without `takeover`, an acct id held by any
    /// other user fails with `AcctAlreadyExists`; with it, the ids are first
    /// pulled from their current owners. Returns the post-image.
    async fn bind_acct_ids(
        &self,
        app_id: &str,
        user_id: &str,
        acct_ids: &[String],
        takeover: bool,
    ) -> Result<User>;

    async fn get_user(&self, app_id: &str, user_id: &str) -> Result<User>;

    /// Fetch the named users; unknown ids are skipped.
    async fn get_users(&self, app_id: &str, user_ids: &[String]) -> Result<Vec<User>>;

    /// Apply a metadata patch: non-empty values are set, empty values unset.
    /// A missing user is a no-op, matching a filtered document update.
    async fn set_user_metadata(
        &self,
        app_id: &str,
        user_id: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<()>;

    async fn ban_users(
        &self,
        app_id: &str,
        user_ids: &[String],
        ban_to: DateTime<Utc>,
        reason: &str,
    ) -> Result<()>;

    async fn unban_users(&self, app_id: &str, user_ids: &[String]) -> Result<()>;

    /// Insert a role; a duplicate `(user_id, index)` fails with
    /// `InvalidArgument` per the unique index.
    async fn create_role(&self, app: &App, user_id: &str, index: u32) -> Result<Role>;

    /// Update `sign_in_time` of a role matched on both id and owner;
    /// a miss on either fails with `RoleNotFound`. Returns the post-image.
    async fn sign_in_role(&self, app_id: &str, user_id: &str, role_id: &str) -> Result<Role>;

    async fn list_roles(&self, app_id: &str, user_id: &str) -> Result<Vec<Role>>;

    /// Fetch the named roles; unknown ids are skipped.
    async fn get_roles(&self, app_id: &str, role_ids: &[String]) -> Result<Vec<Role>>;

    /// All roles owned by any of the given users.
    async fn roles_by_user(&self, app_id: &str, user_ids: &[String]) -> Result<Vec<Role>>;

    /// Metadata patch scoped to `(role_id, user_id)`; a miss is a no-op.
    async fn set_role_metadata(
        &self,
        app_id: &str,
        user_id: &str,
        role_id: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<()>;
}
