//! Run configuration assembled once from the environment.
//!
//! Credentials come from process environment variables, optionally seeded
//! from a `.env` file. The orchestrator builds a [`Config`] up front and
//! hands the relevant half to each stage; nothing below this module reads
//! the environment.

use std::{env, fmt, path::Path};

use log::debug;
use sqlx::postgres::PgConnectOptions;

use crate::error::ConfigError;

pub const KOBO_USERNAME: &str = "KOBO_USERNAME";
pub const KOBO_PASSWORD: &str = "KOBO_PASSWORD";
pub const KOBO_CSV_URL: &str = "KOBO_CSV_URL";
pub const PG_HOST: &str = "PG_HOST";
pub const PG_PORT: &str = "PG_PORT";
pub const PG_DATABASE: &str = "PG_DATABASE";
pub const PG_USER: &str = "PG_USER";
pub const PG_PASSWORD: &str = "PG_PASSWORD";

pub const DEFAULT_PG_PORT: u16 = 5432;

/// Seeds the process environment from an env file.
///
/// With no explicit path a `.env` in the working directory is loaded when
/// present; an explicit path must exist.
pub fn load_env_file(path: Option<&Path>) -> Result<(), ConfigError> {
    match path {
        Some(path) => dotenv::from_path(path).map_err(|source| ConfigError::EnvFile {
            path: path.to_path_buf(),
            source,
        }),
        None => {
            match dotenv::dotenv() {
                Ok(found) => debug!("Loaded environment from {found:?}"),
                Err(err) => debug!("No .env file loaded: {err}"),
            }
            Ok(())
        }
    }
}

#[derive(Clone)]
pub struct ApiConfig {
    pub export_url: String,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiConfig")
            .field("export_url", &self.export_url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl ApiConfig {
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            export_url: required(&lookup, KOBO_CSV_URL)?,
            username: required(&lookup, KOBO_USERNAME)?,
            password: required(&lookup, KOBO_PASSWORD)?,
        })
    }
}

#[derive(Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl DatabaseConfig {
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let port = match lookup(PG_PORT).filter(|value| !value.trim().is_empty()) {
            Some(value) => value
                .trim()
                .parse::<u16>()
                .map_err(|_| ConfigError::InvalidPort { value })?,
            None => DEFAULT_PG_PORT,
        };
        Ok(Self {
            host: required(&lookup, PG_HOST)?,
            port,
            database: required(&lookup, PG_DATABASE)?,
            user: required(&lookup, PG_USER)?,
            password: required(&lookup, PG_PASSWORD)?,
        })
    }

    pub fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .database(&self.database)
            .username(&self.user)
            .password(&self.password)
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub api: ApiConfig,
    pub database: DatabaseConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            api: ApiConfig::from_lookup(&lookup)?,
            database: DatabaseConfig::from_lookup(&lookup)?,
        })
    }
}

fn required<F>(lookup: &F, key: &'static str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .filter(|value| !value.trim().is_empty())
        .ok_or(ConfigError::Missing(key))
}
