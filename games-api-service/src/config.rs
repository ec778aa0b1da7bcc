// Copyright (C) 2026 StarHuntingGames
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use std::{net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use anyhow::Context;
use games_common::{FIELD_GENRE, FIELD_PLATFORM, FIELD_RELEASE_YEAR, FIELD_TITLE, expand_env_vars};
use serde::Deserialize;
use tracing::{info, warn};

const DEFAULT_BIND: &str = "0.0.0.0:3000";
const DEFAULT_LOG_DIR: &str = "logs";
const DEFAULT_LOG_QUEUE_CAPACITY: usize = 1024;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

const UNIQUE_FIELD_CANDIDATES: [&str; 4] =
    [FIELD_TITLE, FIELD_GENRE, FIELD_PLATFORM, FIELD_RELEASE_YEAR];

/// Where games are persisted, parsed from `GAMES_DATABASE_URL`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseUrl {
    Memory,
    Dynamo { table_name: String },
}

impl FromStr for DatabaseUrl {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        if value == "memory" || value == "memory://" {
            return Ok(Self::Memory);
        }
        if let Some(table_name) = value.strip_prefix("dynamodb://") {
            let table_name = table_name.trim_matches('/');
            anyhow::ensure!(
                !table_name.is_empty(),
                "GAMES_DATABASE_URL must name a table, e.g. dynamodb://games"
            );
            return Ok(Self::Dynamo {
                table_name: table_name.to_string(),
            });
        }
        anyhow::bail!("unsupported GAMES_DATABASE_URL {value:?}; expected memory:// or dynamodb://<table>")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    pub bind_addr: SocketAddr,
    pub database: DatabaseUrl,
    pub log_dir: PathBuf,
    pub log_queue_capacity: usize,
    pub request_timeout: Duration,
    pub unique_fields: Vec<String>,
}

/// Optional YAML overlay named by `GAMES_CONFIG_PATH`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct ServiceConfigFile {
    bind: Option<String>,
    database_url: Option<String>,
    log_dir: Option<String>,
    log_queue_capacity: Option<usize>,
    request_timeout_secs: Option<u64>,
    unique_fields: Option<Vec<String>>,
}

impl ServiceConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let file = load_config_file();
        Self::resolve(file, |name| std::env::var(name).ok())
    }

    fn resolve(
        file: ServiceConfigFile,
        env: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<Self> {
        let env = |name: &str| {
            env(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let bind = env("GAMES_API_BIND")
            .or(file.bind)
            .unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind_addr = bind
            .parse::<SocketAddr>()
            .with_context(|| format!("invalid GAMES_API_BIND {bind:?}"))?;

        let database = env("GAMES_DATABASE_URL")
            .or(file.database_url)
            .context("GAMES_DATABASE_URL is not set")?
            .parse::<DatabaseUrl>()?;

        let log_dir = PathBuf::from(
            env("GAMES_LOG_DIR")
                .or(file.log_dir)
                .unwrap_or_else(|| DEFAULT_LOG_DIR.to_string()),
        );

        let log_queue_capacity = match env("GAMES_LOG_QUEUE_CAPACITY") {
            Some(raw) => raw
                .parse::<usize>()
                .with_context(|| format!("invalid GAMES_LOG_QUEUE_CAPACITY {raw:?}"))?,
            None => file.log_queue_capacity.unwrap_or(DEFAULT_LOG_QUEUE_CAPACITY),
        };
        anyhow::ensure!(
            log_queue_capacity > 0,
            "GAMES_LOG_QUEUE_CAPACITY must be positive"
        );

        let request_timeout_secs = match env("GAMES_REQUEST_TIMEOUT_SECS") {
            Some(raw) => raw
                .parse::<u64>()
                .with_context(|| format!("invalid GAMES_REQUEST_TIMEOUT_SECS {raw:?}"))?,
            None => file
                .request_timeout_secs
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
        };
        anyhow::ensure!(
            request_timeout_secs > 0,
            "GAMES_REQUEST_TIMEOUT_SECS must be positive"
        );

        let unique_fields = match env("GAMES_UNIQUE_FIELDS") {
            Some(raw) => raw.split(',').map(ToOwned::to_owned).collect(),
            None => file.unique_fields.unwrap_or_default(),
        };
        let unique_fields = normalize_unique_fields(unique_fields)?;

        Ok(Self {
            bind_addr,
            database,
            log_dir,
            log_queue_capacity,
            request_timeout: Duration::from_secs(request_timeout_secs),
            unique_fields,
        })
    }
}

fn normalize_unique_fields(fields: Vec<String>) -> anyhow::Result<Vec<String>> {
    let mut normalized: Vec<String> = Vec::new();
    for field in fields {
        let field = field.trim();
        if field.is_empty() || normalized.iter().any(|existing| existing == field) {
            continue;
        }
        anyhow::ensure!(
            UNIQUE_FIELD_CANDIDATES.contains(&field),
            "unknown unique field {field:?}; expected one of {UNIQUE_FIELD_CANDIDATES:?}"
        );
        normalized.push(field.to_string());
    }
    Ok(normalized)
}

fn load_config_file() -> ServiceConfigFile {
    let Some(path) = std::env::var("GAMES_CONFIG_PATH")
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
    else {
        return ServiceConfigFile::default();
    };

    let raw = match std::fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(error) => {
            warn!(path = %path, error = %error, "failed to read games config file");
            return ServiceConfigFile::default();
        }
    };

    match parse_config_file(&raw) {
        Ok(file) => {
            info!(path = %path, "loaded games config file");
            file
        }
        Err(error) => {
            warn!(path = %path, error = %error, "failed to parse games config yaml");
            ServiceConfigFile::default()
        }
    }
}

fn parse_config_file(raw: &str) -> Result<ServiceConfigFile, serde_yaml::Error> {
    if raw.trim().is_empty() {
        return Ok(ServiceConfigFile::default());
    }
    serde_yaml::from_str(&expand_env_vars(raw))
}
