//! Tool argument shapes and the SQL safety gate.
//!
//! The safety gate is a textual heuristic, not a parser: it scans the whole
//! statement with regular expressions, so a string literal containing
//! "DROP DATABASE" is rejected too, and semicolon-separated batches may evade
//! the WHERE-clause warnings. Both limitations are accepted.

use log::warn;
use regex::{Regex, RegexSet};
use serde::Deserialize;
use std::sync::OnceLock;

use crate::error::ServerError;

#[derive(Debug, Deserialize)]
pub struct QueryArguments {
    pub query: String,
    #[serde(default)]
    pub params: Vec<String>,
    pub connection: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TableArguments {
    pub table_name: String,
    pub connection: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ConnectionArguments {
    pub connection: Option<String>,
}

fn identifier_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap())
}

/// Identifiers (table names) cannot be bind parameters, so anything that gets
/// interpolated into SQL must pass this grammar.
pub fn is_valid_identifier(name: &str) -> bool {
    identifier_pattern().is_match(name)
}

pub fn validate_query(args: &QueryArguments) -> Result<(), ServerError> {
    if args.query.is_empty() {
        return Err(ServerError::Validation("Query cannot be empty".to_string()));
    }
    Ok(())
}

pub fn validate_table(args: &TableArguments) -> Result<(), ServerError> {
    if args.table_name.is_empty() {
        return Err(ServerError::Validation(
            "Table name cannot be empty".to_string(),
        ));
    }
    if !is_valid_identifier(&args.table_name) {
        return Err(ServerError::Validation(format!(
            "Invalid table name format: '{}'",
            args.table_name
        )));
    }
    Ok(())
}

fn dangerous_patterns() -> &'static RegexSet {
    static SET: OnceLock<RegexSet> = OnceLock::new();
    SET.get_or_init(|| {
        RegexSet::new([
            r"(?i)DROP\s+DATABASE",
            r"(?i)DROP\s+SCHEMA",
            r"(?i)TRUNCATE",
        ])
        .unwrap()
    })
}

/// True when the statement mutates rows without a WHERE clause. Heuristic
/// only; anchored on single statements.
pub(crate) fn mutation_without_where(query: &str) -> bool {
    static DELETE_ALL: OnceLock<Regex> = OnceLock::new();
    static UPDATE: OnceLock<Regex> = OnceLock::new();
    static WHERE: OnceLock<Regex> = OnceLock::new();

    let delete_all =
        DELETE_ALL.get_or_init(|| Regex::new(r"(?i)DELETE\s+FROM\s+\w+\s*(;|$)").unwrap());
    let update = UPDATE.get_or_init(|| Regex::new(r"(?i)UPDATE\s+\w+\s+SET\s+").unwrap());
    let where_clause = WHERE.get_or_init(|| Regex::new(r"(?i)\bWHERE\b").unwrap());

    delete_all.is_match(query) || (update.is_match(query) && !where_clause.is_match(query))
}

/// Reject destructive statement classes outright, warn on unscoped mutations.
/// Only the free-form `execute_query` tool goes through this gate; the fixed
/// internal statements bypass it.
pub fn check_query_safety(query: &str) -> Result<(), ServerError> {
    if dangerous_patterns().is_match(query) {
        return Err(ServerError::Safety(
            "Dangerous SQL operation detected and blocked".to_string(),
        ));
    }

    if mutation_without_where(query) {
        warn!("Potentially dangerous SQL operation without WHERE clause");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn query_arguments_default_params() {
        let args: QueryArguments =
            serde_json::from_value(json!({"query": "SELECT * FROM users"})).unwrap();
        assert_eq!(args.query, "SELECT * FROM users");
        assert!(args.params.is_empty());
        assert!(args.connection.is_none());
    }

    #[test]
    fn query_arguments_with_params_and_connection() {
        let args: QueryArguments = serde_json::from_value(json!({
            "query": "SELECT * FROM users WHERE id = ?",
            "params": ["123"],
            "connection": "logs"
        }))
        .unwrap();
        assert_eq!(args.params, vec!["123"]);
        assert_eq!(args.connection.as_deref(), Some("logs"));
    }

    #[test]
    fn empty_query_is_rejected() {
        let args: QueryArguments = serde_json::from_value(json!({"query": ""})).unwrap();
        let err = validate_query(&args).unwrap_err().to_string();
        assert_eq!(err, "Query cannot be empty");
    }

    #[test]
    fn table_name_grammar() {
        for good in ["users", "user_profiles", "_hidden", "CamelCase2"] {
            let args = TableArguments {
                table_name: good.to_string(),
                connection: None,
            };
            assert!(validate_table(&args).is_ok(), "should accept {good}");
        }

        for bad in ["", "123invalid", "table-name", "users; DROP TABLE users", "a b"] {
            let args = TableArguments {
                table_name: bad.to_string(),
                connection: None,
            };
            assert!(validate_table(&args).is_err(), "should reject {bad:?}");
        }
    }

    #[test]
    fn dangerous_statements_are_blocked() {
        for q in [
            "DROP DATABASE test",
            "drop   database test",
            "DROP SCHEMA foo",
            "TRUNCATE TABLE users",
            "truncate users",
            "SELECT 'x'; DROP DATABASE test",
        ] {
            assert!(check_query_safety(q).is_err(), "should block {q:?}");
        }
    }

    #[test]
    fn safe_statements_pass() {
        for q in [
            "SELECT * FROM users",
            "INSERT INTO users (name) VALUES (?)",
            "UPDATE users SET name = ? WHERE id = ?",
            "DELETE FROM users WHERE id = 1",
        ] {
            assert!(check_query_safety(q).is_ok(), "should allow {q:?}");
        }
    }

    #[test]
    fn unscoped_mutations_warn_but_pass() {
        assert!(mutation_without_where("DELETE FROM users"));
        assert!(mutation_without_where("DELETE FROM users;"));
        assert!(mutation_without_where("UPDATE users SET active = 0"));
        assert!(check_query_safety("DELETE FROM users").is_ok());

        assert!(!mutation_without_where("DELETE FROM users WHERE id = 1"));
        assert!(!mutation_without_where("UPDATE users SET active = 0 WHERE id = 1"));
        assert!(!mutation_without_where("SELECT * FROM users"));
    }
}
