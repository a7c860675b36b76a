//! Environment-driven configuration.
//!
//! Database settings are resolved from an explicitly passed key/value map so
//! that tests never have to mutate the process environment. Server settings
//! never fail to resolve; invalid values fall back to defaults with a warning.

use clap::Parser;
use log::{info, warn};
use std::collections::HashMap;

use crate::error::ServerError;

#[derive(Parser, Debug, Default)]
#[command(
    name = "mysql-mcp-server",
    about = "Model Context Protocol server for MySQL/MariaDB databases"
)]
pub struct Args {
    /// Transport mode, overrides MCP_TRANSPORT_MODE
    #[arg(long, value_enum)]
    pub transport: Option<TransportMode>,

    /// HTTP bind host, overrides MCP_SERVER_HOST
    #[arg(long)]
    pub host: Option<String>,

    /// HTTP bind port, overrides MCP_SERVER_PORT
    #[arg(long)]
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum TransportMode {
    Stdio,
    Http,
    Both,
}

#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub ssl: bool,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    /// Named connections in configuration order.
    pub connections: Vec<(String, ConnectionSettings)>,
    pub default_connection: String,
    pub connection_limit: u32,
    pub timeout_ms: u64,
}

impl DatabaseSettings {
    pub fn get(&self, name: &str) -> Option<&ConnectionSettings> {
        self.connections
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, c)| c)
    }

    pub fn names(&self) -> Vec<String> {
        self.connections.iter().map(|(n, _)| n.clone()).collect()
    }
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub transport: TransportMode,
    pub host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
    pub enable_cors: bool,
    pub api_key: Option<String>,
}

impl ServerSettings {
    pub fn apply_overrides(mut self, args: &Args) -> Self {
        if let Some(transport) = args.transport {
            self.transport = transport;
        }
        if let Some(host) = &args.host {
            self.host = host.clone();
        }
        if let Some(port) = args.port {
            self.port = port;
        }
        self
    }
}

/// Snapshot of the process environment for the resolvers below.
pub fn from_process_env() -> HashMap<String, String> {
    std::env::vars().collect()
}

/// Resolve database configuration.
///
/// When `DB_CONNECTIONS` is set (comma-separated names), each name is parsed
/// from `DB_{NAME}_*` variables; otherwise a single connection named
/// "default" is built from the unprefixed `DB_*` variables.
pub fn resolve_database(vars: &HashMap<String, String>) -> Result<DatabaseSettings, ServerError> {
    let connection_limit = parse_or_default(vars, "DB_CONNECTION_LIMIT", 10);
    let timeout_ms = parse_or_default(vars, "DB_TIMEOUT", 60_000);

    match vars.get("DB_CONNECTIONS") {
        Some(list) => {
            let names: Vec<String> = list
                .split(',')
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty())
                .collect();
            if names.is_empty() {
                return Err(ServerError::Config(
                    "DB_CONNECTIONS is set but lists no connection names".to_string(),
                ));
            }

            let mut connections = Vec::with_capacity(names.len());
            for name in &names {
                let prefix = format!("DB_{}_", name.to_uppercase());
                connections.push((name.clone(), parse_connection(vars, &prefix, name)?));
            }

            let default_connection = vars
                .get("DEFAULT_DB")
                .cloned()
                .unwrap_or_else(|| names[0].clone());
            if !names.contains(&default_connection) {
                return Err(ServerError::Config(format!(
                    "Default database connection '{default_connection}' not found in available connections"
                )));
            }

            info!(
                "Loaded multi-database configuration with {} connections: {}",
                connections.len(),
                names.join(", ")
            );
            Ok(DatabaseSettings {
                connections,
                default_connection,
                connection_limit,
                timeout_ms,
            })
        }
        None => {
            info!("Using single database configuration");
            Ok(DatabaseSettings {
                connections: vec![(
                    "default".to_string(),
                    parse_connection(vars, "DB_", "default")?,
                )],
                default_connection: "default".to_string(),
                connection_limit,
                timeout_ms,
            })
        }
    }
}

fn parse_connection(
    vars: &HashMap<String, String>,
    prefix: &str,
    name: &str,
) -> Result<ConnectionSettings, ServerError> {
    let get = |suffix: &str| vars.get(&format!("{prefix}{suffix}")).cloned();

    let user = get("USER").filter(|v| !v.is_empty());
    let password = get("PASSWORD").filter(|v| !v.is_empty());
    let database = get("NAME").filter(|v| !v.is_empty());

    let mut missing = Vec::new();
    if user.is_none() {
        missing.push("user");
    }
    if password.is_none() {
        missing.push("password");
    }
    if database.is_none() {
        missing.push("database");
    }
    if !missing.is_empty() {
        return Err(ServerError::Config(format!(
            "Missing required configuration for database connection '{name}': {}",
            missing.join(", ")
        )));
    }

    let port = match get("PORT") {
        Some(v) => v.parse::<u16>().map_err(|_| {
            ServerError::Config(format!(
                "Invalid port '{v}' for database connection '{name}'"
            ))
        })?,
        None => 3306,
    };

    Ok(ConnectionSettings {
        host: get("HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
        port,
        user: user.unwrap_or_default(),
        password: password.unwrap_or_default(),
        database: database.unwrap_or_default(),
        ssl: get("SSL").map(|v| v.eq_ignore_ascii_case("true")).unwrap_or(false),
    })
}

/// Resolve server-level settings. Never fails; bad values fall back to
/// defaults so a misconfigured transport does not abort startup.
pub fn resolve_server(vars: &HashMap<String, String>) -> ServerSettings {
    let transport = match vars.get("MCP_TRANSPORT_MODE").map(String::as_str) {
        None => TransportMode::Stdio,
        Some("stdio") => TransportMode::Stdio,
        Some("http") => TransportMode::Http,
        Some("both") => TransportMode::Both,
        Some(other) => {
            warn!("Unknown MCP_TRANSPORT_MODE '{other}', falling back to stdio");
            TransportMode::Stdio
        }
    };

    let allowed_origins = match vars.get("MCP_ALLOWED_ORIGINS").map(String::as_str) {
        None | Some("*") => vec!["*".to_string()],
        Some(list) => list
            .split(',')
            .map(|o| o.trim().to_string())
            .filter(|o| !o.is_empty())
            .collect(),
    };

    ServerSettings {
        transport,
        host: vars
            .get("MCP_SERVER_HOST")
            .cloned()
            .unwrap_or_else(|| "0.0.0.0".to_string()),
        port: parse_or_default(vars, "MCP_SERVER_PORT", 3000),
        allowed_origins,
        enable_cors: vars
            .get("MCP_ENABLE_CORS")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(true),
        api_key: vars.get("MCP_API_KEY").cloned().filter(|k| !k.is_empty()),
    }
}

fn parse_or_default<T: std::str::FromStr + Copy + std::fmt::Display>(
    vars: &HashMap<String, String>,
    key: &str,
    default: T,
) -> T {
    match vars.get(key) {
        Some(v) => v.parse().unwrap_or_else(|_| {
            warn!("Invalid value '{v}' for {key}, using default {default}");
            default
        }),
        None => default,
    }
}
