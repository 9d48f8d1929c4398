//! HTTP Basic authentication
//!
//! A single realm backed by an in-memory user store. A request is let through
//! only when its credentials match a user holding the required role.

use super::{Error, Headers, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use std::collections::HashMap;

/// Username and password taken from an `Authorization: Basic` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Credentials {
            user: user.into(),
            password: password.into(),
        }
    }

    /// Parse an `Authorization` header value
    ///
    /// The scheme is matched case-insensitively; the password may contain
    /// colons, the user may not.
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        let (scheme, token) = value
            .split_once(' ')
            .ok_or_else(|| Error::InvalidCredentials("missing scheme".to_string()))?;

        if !scheme.eq_ignore_ascii_case("Basic") {
            return Err(Error::InvalidCredentials(format!("unsupported scheme {}", scheme)));
        }

        let decoded = STANDARD
            .decode(token.trim())
            .map_err(|e| Error::InvalidCredentials(e.to_string()))?;
        let decoded = String::from_utf8(decoded)
            .map_err(|_| Error::InvalidCredentials("credentials are not UTF-8".to_string()))?;

        let (user, password) = decoded
            .split_once(':')
            .ok_or_else(|| Error::InvalidCredentials("missing ':' separator".to_string()))?;

        Ok(Credentials::new(user, password))
    }

    /// Render as an `Authorization` header value
    pub fn to_header_value(&self) -> String {
        format!(
            "Basic {}",
            STANDARD.encode(format!("{}:{}", self.user, self.password))
        )
    }
}

#[derive(Debug, Clone)]
struct UserEntry {
    password: String,
    roles: Vec<String>,
}

/// In-memory user store
#[derive(Debug, Clone, Default)]
pub struct UserStore {
    users: HashMap<String, UserEntry>,
}

impl UserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&mut self, user: impl Into<String>, password: impl Into<String>, roles: &[&str]) {
        self.users.insert(
            user.into(),
            UserEntry {
                password: password.into(),
                roles: roles.iter().map(|r| r.to_string()).collect(),
            },
        );
    }

    /// Check a password and role, returning whether both match
    fn verify(&self, credentials: &Credentials, role: &str) -> bool {
        self.users
            .get(&credentials.user)
            .map(|entry| {
                entry.password == credentials.password && entry.roles.iter().any(|r| r == role)
            })
            .unwrap_or(false)
    }
}

/// Outcome of authenticating one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthResult {
    Authenticated(String),
    Challenge,
}

/// Basic authenticator guarding every path with one role constraint
#[derive(Debug, Clone)]
pub struct BasicAuthenticator {
    realm: String,
    role: String,
    store: UserStore,
}

impl BasicAuthenticator {
    pub fn new(realm: impl Into<String>, role: impl Into<String>, store: UserStore) -> Self {
        BasicAuthenticator {
            realm: realm.into(),
            role: role.into(),
            store,
        }
    }

    pub fn realm(&self) -> &str {
        &self.realm
    }

    /// Authenticate a request from its headers
    pub fn authenticate(&self, headers: &Headers) -> AuthResult {
        let Some(value) = headers.get("Authorization") else {
            return AuthResult::Challenge;
        };

        match Credentials::parse(value) {
            Ok(credentials) if self.store.verify(&credentials, &self.role) => {
                AuthResult::Authenticated(credentials.user)
            }
            Ok(credentials) => {
                tracing::debug!(user = %credentials.user, "rejected credentials");
                AuthResult::Challenge
            }
            Err(e) => {
                tracing::debug!(error = %e, "malformed Authorization header");
                AuthResult::Challenge
            }
        }
    }

    /// `WWW-Authenticate` value sent with a challenge
    pub fn challenge_header(&self) -> String {
        format!("Basic realm=\"{}\"", self.realm)
    }
}
