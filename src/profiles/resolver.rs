// mysql-helper/src/profiles/resolver.rs
use std::fmt;
use std::path::{Path, PathBuf};

use super::{Profiles, RemoteHost, find_profile};
use crate::config::expand_home;
use crate::errors::{AppError, Result};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_MYSQL_PORT: u16 = 3306;
pub const DEFAULT_SSH_PORT: u16 = 22;
pub const DEFAULT_DRIVER: &str = "mysql";
pub const DEFAULT_CHARSET: &str = "utf8mb4";
pub const DEFAULT_COLLATION: &str = "utf8mb4_unicode_ci";

/// A local connection record with every default applied.
#[derive(Clone, PartialEq)]
pub struct ConnectionParams {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub driver: String,
    pub charset: String,
    pub collation: String,
}

impl fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("name", &self.name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("driver", &self.driver)
            .field("charset", &self.charset)
            .field("collation", &self.collation)
            .finish_non_exhaustive()
    }
}

/// SSH authentication, one variant per method with exactly the fields it needs.
#[derive(Clone, PartialEq)]
pub enum AuthMethod {
    None,
    Agent,
    Password { password: String },
    PublicKey { public_key: PathBuf, private_key: PathBuf, passphrase: Option<String> },
}

impl AuthMethod {
    pub fn tag(&self) -> &'static str {
        match self {
            AuthMethod::None => "none",
            AuthMethod::Agent => "agent",
            AuthMethod::Password { .. } => "password",
            AuthMethod::PublicKey { .. } => "publickey",
        }
    }

    fn from_remote(remote: &RemoteHost) -> Result<Self> {
        let tag = remote
            .method
            .as_deref()
            .map(str::trim)
            .filter(|tag| !tag.is_empty())
            .ok_or_else(|| AppError::UnsupportedMethod("no method configured".to_string()))?;

        match tag.to_lowercase().as_str() {
            "none" => Ok(AuthMethod::None),
            "agent" => Ok(AuthMethod::Agent),
            "password" => Ok(AuthMethod::Password { password: remote.password.clone().unwrap_or_default() }),
            "publickey" | "public-key" => Ok(AuthMethod::PublicKey {
                public_key: key_path(remote.public_key.as_deref(), default_public_key),
                private_key: key_path(remote.private_key.as_deref(), default_private_key),
                passphrase: remote.passphrase.clone().filter(|p| !p.is_empty()),
            }),
            other => Err(AppError::UnsupportedMethod(other.to_string())),
        }
    }
}

impl fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMethod::PublicKey { public_key, private_key, .. } => f
                .debug_struct("PublicKey")
                .field("public_key", public_key)
                .field("private_key", private_key)
                .finish_non_exhaustive(),
            other => f.write_str(other.tag()),
        }
    }
}

/// A remote host record with every default applied and its method resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteParams {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth: AuthMethod,
    /// Last connectivity test outcome, as stored in the profile.
    pub working: bool,
}

impl RemoteParams {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

pub fn default_public_key() -> PathBuf {
    ssh_dir().join("id_rsa.pub")
}

pub fn default_private_key() -> PathBuf {
    ssh_dir().join("id_rsa")
}

fn ssh_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_default().join(".ssh")
}

fn key_path(stored: Option<&str>, default: fn() -> PathBuf) -> PathBuf {
    match stored.map(str::trim).filter(|p| !p.is_empty()) {
        Some(path) => expand_home(Path::new(path)),
        None => default(),
    }
}

fn non_empty_or(value: Option<&str>, default: &str) -> String {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(default)
        .to_string()
}

/// Materialises `profile.local[connection]` with defaults filled in.
pub fn resolve_local(profiles: &Profiles, profile: &str, connection: &str) -> Result<ConnectionParams> {
    let record = find_profile(profiles, profile)?
        .local
        .get(connection)
        .ok_or_else(|| AppError::not_found("Local connection", format!("{}/{}", profile, connection)))?;

    Ok(ConnectionParams {
        name: connection.to_string(),
        host: non_empty_or(Some(record.host.as_str()), DEFAULT_HOST),
        port: record.port.unwrap_or(DEFAULT_MYSQL_PORT),
        username: record.username.clone(),
        password: record.password.clone(),
        driver: non_empty_or(record.driver.as_deref(), DEFAULT_DRIVER),
        charset: non_empty_or(record.charset.as_deref(), DEFAULT_CHARSET),
        collation: non_empty_or(record.collation.as_deref(), DEFAULT_COLLATION),
    })
}

/// Materialises `profile.remote[remote]`, rejecting unknown authentication methods.
pub fn resolve_remote(profiles: &Profiles, profile: &str, remote: &str) -> Result<RemoteParams> {
    let record = find_profile(profiles, profile)?
        .remote
        .get(remote)
        .ok_or_else(|| AppError::not_found("Remote", format!("{}/{}", profile, remote)))?;

    Ok(RemoteParams {
        name: remote.to_string(),
        host: record.host.trim().to_string(),
        port: record.port.unwrap_or(DEFAULT_SSH_PORT),
        username: record.username.clone(),
        auth: AuthMethod::from_remote(record)?,
        working: record.working,
    })
}
