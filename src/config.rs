//! Harness configuration

use crate::body::DEFAULT_CHUNK_SIZE;
use crate::http::{Credentials, ServerConfig, UserStore};
use crate::{Error, Result};
use std::net::SocketAddr;
use std::time::Duration;

/// Default port of the standalone server
pub const DEFAULT_PORT: u16 = 9999;

/// Default fixture size the pattern is repeated up to
pub const DEFAULT_FIXTURE_SIZE: u64 = 500 * 1024;

/// Settings for a reproduction run
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub bind: SocketAddr,
    /// Uploads per strategy
    pub iterations: usize,
    pub response_timeout: Duration,
    pub linger_timeout: Duration,
    pub chunk_size: usize,
    pub fixture_size: u64,
    pub realm: String,
    pub user: String,
    pub password: String,
    pub role: String,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        HarnessConfig {
            bind: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
            iterations: 5,
            response_timeout: Duration::from_secs(10),
            linger_timeout: Duration::from_secs(2),
            chunk_size: DEFAULT_CHUNK_SIZE,
            fixture_size: DEFAULT_FIXTURE_SIZE,
            realm: "MyRealm".to_string(),
            user: "user".to_string(),
            password: "pwd".to_string(),
            role: "user".to_string(),
        }
    }
}

impl HarnessConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(mut self, bind: SocketAddr) -> Self {
        self.bind = bind;
        self
    }

    /// Bind to `port` on the loopback interface; 0 picks a free port
    pub fn port(mut self, port: u16) -> Self {
        self.bind.set_port(port);
        self
    }

    pub fn iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn linger_timeout(mut self, timeout: Duration) -> Self {
        self.linger_timeout = timeout;
        self
    }

    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn fixture_size(mut self, size: u64) -> Self {
        self.fixture_size = size;
        self
    }

    pub fn credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = user.into();
        self.password = password.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.iterations == 0 {
            return Err(Error::Config("iterations must be at least 1".to_string()));
        }
        if self.chunk_size == 0 {
            return Err(Error::Config("chunk size must be non-zero".to_string()));
        }
        if self.response_timeout.is_zero() || self.linger_timeout.is_zero() {
            return Err(Error::Config("timeouts must be non-zero".to_string()));
        }
        Ok(())
    }

    /// Credentials of the configured user
    pub fn user_credentials(&self) -> Credentials {
        Credentials::new(&self.user, &self.password)
    }

    pub fn server_config(&self) -> ServerConfig {
        let mut users = UserStore::new();
        users.add_user(&self.user, &self.password, &[self.role.as_str()]);
        ServerConfig {
            bind: self.bind,
            realm: self.realm.clone(),
            role: self.role.clone(),
            users,
            linger_timeout: self.linger_timeout,
            idle_timeout: self.response_timeout,
        }
    }
}
