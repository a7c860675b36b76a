use std::fmt;

#[derive(Debug)]
pub enum ServerError {
    Config(String),
    Validation(String),
    Safety(String),
    InvalidIdentifier(String),
    ConnectionNotFound {
        name: String,
        available: Vec<String>,
    },
    Query(sqlx::Error),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerError::Config(msg) => write!(f, "Configuration error: {msg}"),
            ServerError::Validation(msg) => write!(f, "{msg}"),
            ServerError::Safety(msg) => write!(f, "{msg}"),
            ServerError::InvalidIdentifier(name) => {
                write!(f, "Invalid table name format: '{name}'")
            }
            ServerError::ConnectionNotFound { name, available } => write!(
                f,
                "Database connection '{name}' not found. Available connections: {}",
                available.join(", ")
            ),
            ServerError::Query(e) => write!(f, "Query failed: {e}"),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServerError::Query(e) => Some(e),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for ServerError {
    fn from(e: sqlx::Error) -> Self {
        ServerError::Query(e)
    }
}
