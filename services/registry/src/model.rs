//! Domain model: tenant apps with compiled permissions, per-tenant user and
//! role documents, and the session record backing bearer tokens.
use crate::error::{Error, Result};
use anyhow::Context;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Raw app document as stored in the config store's `apps` collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSpec {
    pub id: String,
    pub key: u32,
    #[serde(default)]
    pub secret: String,
    #[serde(default)]
    pub fingerprint: String,
    #[serde(default)]
    pub permissions: Vec<String>,
}

/// Compiled path matcher. Patterns are globs: `*` matches within one path
/// segment, `**` crosses segments, `?` matches a single character.
#[derive(Debug, Clone)]
pub struct Permission {
    pattern: String,
    regex: Regex,
}

impl Permission {
    pub fn compile(pattern: &str) -> anyhow::Result<Self> {
        let mut expr = String::with_capacity(pattern.len() + 8);
        expr.push('^');
        let mut chars = pattern.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '*' => {
                    if chars.peek() == Some(&'*') {
                        chars.next();
                        expr.push_str(".*");
                    } else {
                        expr.push_str("[^/]*");
                    }
                }
                '?' => expr.push_str("[^/]"),
                c => expr.push_str(&regex::escape(c.encode_utf8(&mut [0u8; 4]))),
            }
        }
        expr.push('$');
        let regex = Regex::new(&expr)
            .with_context(|| format!("compile permission pattern: {pattern}"))?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn is_permitted(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }
}

/// Parsed tenant configuration. Built from an [`AppSpec`] during registry
/// refresh; never mutated afterwards.
#[derive(Debug, Clone)]
pub struct App {
    pub id: String,
    /// Non-zero numeric key folded into every id minted for this tenant.
    pub key: u32,
    /// HMAC key for login-state signature verification.
    pub secret: String,
    /// Per-tenant token cipher key, SHA-256 of the configured fingerprint.
    pub cipher_key: [u8; 32],
    /// Effective permissions: common rules plus the app's own.
    permissions: Vec<Permission>,
}

impl App {
    pub fn parse(spec: AppSpec, common: &[Permission]) -> anyhow::Result<Self> {
        anyhow::ensure!(!spec.id.is_empty(), "app id must not be empty");
        anyhow::ensure!(spec.key != 0, "app {} has a zero key", spec.id);
        let mut permissions = common.to_vec();
        for pattern in &spec.permissions {
            permissions.push(Permission::compile(pattern)?);
        }
        let cipher_key = Sha256::digest(spec.fingerprint.as_bytes()).into();
        Ok(Self {
            id: spec.id,
            key: spec.key,
            secret: spec.secret,
            cipher_key,
            permissions,
        })
    }

    pub fn is_permitted(&self, path: &str) -> bool {
        self.permissions.iter().any(|p| p.is_permitted(path))
    }
}

/// Per-tenant user document. Any element of `acct_ids` identifies the user;
/// the set is element-unique across all users of one tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub acct_ids: Vec<String>,
    pub create_time: DateTime<Utc>,
    pub create_ip: String,
    pub login_time: DateTime<Utc>,
    pub login_ip: String,
    pub ban_to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ban_for: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl User {
    pub fn banned_at(&self, now: DateTime<Utc>) -> bool {
        self.ban_to.is_some_and(|until| until > now)
    }
}

/// Per-tenant role document; `(user_id, index)` is unique per tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub id: String,
    pub user_id: String,
    pub index: u32,
    pub create_time: DateTime<Utc>,
    pub sign_in_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Embedded session data mutated by role sign-in without rotating the token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessData {
    #[serde(rename = "roleId", default)]
    pub role_id: String,
    #[serde(rename = "roleIndex", default)]
    pub role_index: u32,
}

/// Session record stored per user id. Rewriting the whole record rotates the
/// bearer token; `data` alone is updated in place by role sign-in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    #[serde(default)]
    pub data: SessData,
}

impl Session {
    /// Encode as a self-describing MessagePack record (field-name keyed, so
    /// adding fields later stays decodable).
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        rmp_serde::to_vec_named(self).map_err(|_| Error::MalformedSessData)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        rmp_serde::from_slice(bytes).map_err(|_| Error::MalformedSessData)
    }
}
