// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Configuration is read once from the environment at startup into
//! [`AppConfig`] and passed down explicitly.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `DATA_DIR` | Directory holding the redb database | `./data` |
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `JWT_SECRET` | HMAC secret for bearer tokens | Required in release builds |
//! | `JWT_ISSUER` | `iss` claim of issued tokens | `portal-auth` |
//! | `SESSION_RETENTION_DAYS` | Session record lifetime, 1 to 3650 | `30` |
//! | `PASSWORD_HASH_ITERATIONS` | PBKDF2 rounds for new hashes | `600000` |
//! | `AUDIT_REDACT_KEYS` | Extra comma-separated keys to redact | empty |
//! | `GEOIP_TABLE` | JSON file mapping CIDR blocks to locations | unset |
//! | `TLS_CERT_PATH` / `TLS_KEY_PATH` | PEM files; serve HTTPS when both set | unset |
//! | `SEED_ADMIN_EMAIL` / `SEED_ADMIN_PASSWORD` | Bootstrap admin account | unset |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::Duration;

pub const DATA_DIR_ENV: &str = "DATA_DIR";
pub const HOST_ENV: &str = "HOST";
pub const PORT_ENV: &str = "PORT";
pub const JWT_SECRET_ENV: &str = "JWT_SECRET";
pub const JWT_ISSUER_ENV: &str = "JWT_ISSUER";
pub const SESSION_RETENTION_DAYS_ENV: &str = "SESSION_RETENTION_DAYS";
pub const PASSWORD_HASH_ITERATIONS_ENV: &str = "PASSWORD_HASH_ITERATIONS";
pub const AUDIT_REDACT_KEYS_ENV: &str = "AUDIT_REDACT_KEYS";
pub const GEOIP_TABLE_ENV: &str = "GEOIP_TABLE";
pub const TLS_CERT_PATH_ENV: &str = "TLS_CERT_PATH";
pub const TLS_KEY_PATH_ENV: &str = "TLS_KEY_PATH";
pub const SEED_ADMIN_EMAIL_ENV: &str = "SEED_ADMIN_EMAIL";
pub const SEED_ADMIN_PASSWORD_ENV: &str = "SEED_ADMIN_PASSWORD";
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

/// File name of the database inside `DATA_DIR`.
pub const DATABASE_FILE: &str = "portal.redb";

/// Secret used when `JWT_SECRET` is missing in debug builds.
const DEV_JWT_SECRET: &str = "development-only-insecure-secret";

const MIN_JWT_SECRET_LEN: usize = 32;

/// Ten years.
const MAX_SESSION_RETENTION_DAYS: i64 = 3650;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),

    #[error("{name} has an invalid value: {value}")]
    Invalid { name: &'static str, value: String },

    #[error("{name} must be set together with {other}")]
    Incomplete {
        name: &'static str,
        other: &'static str,
    },
}

/// Output format for the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

#[derive(Debug, Clone)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

#[derive(Debug, Clone)]
pub struct SeedAdmin {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub host: String,
    pub port: u16,
    pub jwt_secret: String,
    /// True when the development fallback secret is in use.
    pub insecure_jwt_secret: bool,
    pub jwt_issuer: String,
    pub session_retention: Duration,
    pub password_hash_iterations: u32,
    pub extra_redact_keys: Vec<String>,
    pub geoip_table: Option<PathBuf>,
    pub tls: Option<TlsPaths>,
    pub seed_admin: Option<SeedAdmin>,
    pub log_format: LogFormat,
}

impl AppConfig {
    /// Load configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let (jwt_secret, insecure_jwt_secret) = match var(JWT_SECRET_ENV) {
            Some(secret) if secret.len() < MIN_JWT_SECRET_LEN => {
                return Err(ConfigError::Invalid {
                    name: JWT_SECRET_ENV,
                    value: format!("secret shorter than {MIN_JWT_SECRET_LEN} bytes"),
                })
            }
            Some(secret) => (secret, false),
            None if cfg!(debug_assertions) => (DEV_JWT_SECRET.to_string(), true),
            None => return Err(ConfigError::Missing(JWT_SECRET_ENV)),
        };

        let retention_days: i64 = parse_or(var(SESSION_RETENTION_DAYS_ENV), SESSION_RETENTION_DAYS_ENV, 30)?;
        let session_retention = Some(retention_days)
            .filter(|days| (1..=MAX_SESSION_RETENTION_DAYS).contains(days))
            .and_then(Duration::try_days)
            .ok_or_else(|| ConfigError::Invalid {
                name: SESSION_RETENTION_DAYS_ENV,
                value: retention_days.to_string(),
            })?;

        let password_hash_iterations: u32 =
            parse_or(var(PASSWORD_HASH_ITERATIONS_ENV), PASSWORD_HASH_ITERATIONS_ENV, 600_000)?;
        if password_hash_iterations == 0 {
            return Err(ConfigError::Invalid {
                name: PASSWORD_HASH_ITERATIONS_ENV,
                value: "0".to_string(),
            });
        }

        let tls = match (var(TLS_CERT_PATH_ENV), var(TLS_KEY_PATH_ENV)) {
            (Some(cert), Some(key)) => Some(TlsPaths {
                cert: cert.into(),
                key: key.into(),
            }),
            (None, None) => None,
            (Some(_), None) => {
                return Err(ConfigError::Incomplete {
                    name: TLS_CERT_PATH_ENV,
                    other: TLS_KEY_PATH_ENV,
                })
            }
            (None, Some(_)) => {
                return Err(ConfigError::Incomplete {
                    name: TLS_KEY_PATH_ENV,
                    other: TLS_CERT_PATH_ENV,
                })
            }
        };

        let seed_admin = match (var(SEED_ADMIN_EMAIL_ENV), var(SEED_ADMIN_PASSWORD_ENV)) {
            (Some(email), Some(password)) => Some(SeedAdmin { email, password }),
            (None, None) => None,
            (Some(_), None) => {
                return Err(ConfigError::Incomplete {
                    name: SEED_ADMIN_EMAIL_ENV,
                    other: SEED_ADMIN_PASSWORD_ENV,
                })
            }
            (None, Some(_)) => {
                return Err(ConfigError::Incomplete {
                    name: SEED_ADMIN_PASSWORD_ENV,
                    other: SEED_ADMIN_EMAIL_ENV,
                })
            }
        };

        let log_format = match var(LOG_FORMAT_ENV).as_deref().map(str::to_lowercase).as_deref() {
            None | Some("pretty") => LogFormat::Pretty,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: LOG_FORMAT_ENV,
                    value: other.to_string(),
                })
            }
        };

        Ok(Self {
            data_dir: var(DATA_DIR_ENV).unwrap_or_else(|| "./data".to_string()).into(),
            host: var(HOST_ENV).unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or(var(PORT_ENV), PORT_ENV, 8080)?,
            jwt_secret,
            insecure_jwt_secret,
            jwt_issuer: var(JWT_ISSUER_ENV).unwrap_or_else(|| "portal-auth".to_string()),
            session_retention,
            password_hash_iterations,
            extra_redact_keys: var(AUDIT_REDACT_KEYS_ENV)
                .map(|keys| {
                    keys.split(',')
                        .map(str::trim)
                        .filter(|k| !k.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            geoip_table: var(GEOIP_TABLE_ENV).map(PathBuf::from),
            tls,
            seed_admin,
            log_format,
        })
    }

    /// Path of the redb database file.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE)
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|_| ConfigError::Invalid {
                name: HOST_ENV,
                value: self.host.clone(),
            })
    }
}

fn parse_or<T: FromStr>(raw: Option<String>, name: &'static str, default: T) -> Result<T, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    #[test]
    fn defaults_apply_when_unset() {
        let config = AppConfig::from_lookup(lookup(&[(JWT_SECRET_ENV, SECRET)])).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.session_retention, Duration::days(30));
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert!(config.tls.is_none());
        assert!(!config.insecure_jwt_secret);
        assert_eq!(config.database_path(), PathBuf::from("./data").join(DATABASE_FILE));
    }

    #[cfg(debug_assertions)]
    #[test]
    fn missing_secret_falls_back_in_debug_builds() {
        let config = AppConfig::from_lookup(lookup(&[])).unwrap();
        assert!(config.insecure_jwt_secret);
    }

    #[test]
    fn short_secret_is_rejected() {
        let result = AppConfig::from_lookup(lookup(&[(JWT_SECRET_ENV, "short")]));
        assert!(matches!(result, Err(ConfigError::Invalid { name: JWT_SECRET_ENV, .. })));
    }

    #[test]
    fn redact_keys_are_split_and_trimmed() {
        let config = AppConfig::from_lookup(lookup(&[
            (JWT_SECRET_ENV, SECRET),
            (AUDIT_REDACT_KEYS_ENV, " apiKey , secret,, "),
        ]))
        .unwrap();
        assert_eq!(config.extra_redact_keys, vec!["apiKey", "secret"]);
    }

    #[test]
    fn retention_out_of_range_is_invalid() {
        for days in ["0", "-3", "3651", "9223372036854775807"] {
            let result = AppConfig::from_lookup(lookup(&[
                (JWT_SECRET_ENV, SECRET),
                (SESSION_RETENTION_DAYS_ENV, days),
            ]));
            assert!(
                matches!(result, Err(ConfigError::Invalid { name: SESSION_RETENTION_DAYS_ENV, .. })),
                "{days} accepted"
            );
        }

        let config = AppConfig::from_lookup(lookup(&[
            (JWT_SECRET_ENV, SECRET),
            (SESSION_RETENTION_DAYS_ENV, "3650"),
        ]))
        .unwrap();
        assert_eq!(config.session_retention, Duration::days(3650));
    }

    #[test]
    fn tls_requires_both_paths() {
        let result = AppConfig::from_lookup(lookup(&[
            (JWT_SECRET_ENV, SECRET),
            (TLS_CERT_PATH_ENV, "/etc/cert.pem"),
        ]));
        assert!(matches!(result, Err(ConfigError::Incomplete { .. })));
    }

    #[test]
    fn invalid_port_is_reported() {
        let result = AppConfig::from_lookup(lookup(&[(JWT_SECRET_ENV, SECRET), (PORT_ENV, "http")]));
        assert!(matches!(result, Err(ConfigError::Invalid { name: PORT_ENV, .. })));
    }

    #[test]
    fn json_log_format_is_case_insensitive() {
        let config =
            AppConfig::from_lookup(lookup(&[(JWT_SECRET_ENV, SECRET), (LOG_FORMAT_ENV, "JSON")])).unwrap();
        assert_eq!(config.log_format, LogFormat::Json);
    }
}
