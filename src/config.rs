//! Runtime configuration read from the environment

use std::env;

use crate::auth::DEFAULT_PUBLIC_PREFIXES;

#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres connection string; only database commands need it.
    pub database_url: Option<String>,

    pub max_connections: u32,

    /// Default tracing filter when `RUST_LOG` is unset.
    pub log_level: String,

    /// Paths reachable without a session.
    pub public_prefixes: Vec<String>,

    /// Percentage under which a student is flagged in reports.
    pub standing_threshold: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: 5,
            log_level: "info".to_string(),
            public_prefixes: DEFAULT_PUBLIC_PREFIXES.iter().map(|p| p.to_string()).collect(),
            standing_threshold: 75.0,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            max_connections: lookup("ATTENDANCE_DB_MAX_CONNECTIONS")
                .and_then(|value| value.parse().ok())
                .unwrap_or(defaults.max_connections),
            log_level: lookup("ATTENDANCE_LOG").unwrap_or(defaults.log_level),
            public_prefixes: lookup("ATTENDANCE_PUBLIC_PREFIXES")
                .map(|value| {
                    value
                        .split(',')
                        .map(str::trim)
                        .filter(|prefix| !prefix.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or(defaults.public_prefixes),
            standing_threshold: lookup("ATTENDANCE_STANDING_THRESHOLD")
                .and_then(|value| value.parse().ok())
                .unwrap_or(defaults.standing_threshold),
        }
    }
}
