//! Static tool catalog returned verbatim on `tools/list`.

use serde_json::json;

use crate::rpc::Tool;

pub fn tool_catalog() -> Vec<Tool> {
    vec![
        Tool {
            name: "execute_query".to_string(),
            description: "Execute a SQL query on the MySQL/MariaDB database".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "The SQL query to execute"
                    },
                    "params": {
                        "type": "array",
                        "description": "Parameters for the SQL query (optional)",
                        "items": { "type": "string" }
                    },
                    "connection": {
                        "type": "string",
                        "description": "Database connection name (optional, uses default if not specified)"
                    }
                },
                "required": ["query"]
            }),
        },
        Tool {
            name: "list_tables".to_string(),
            description: "List all tables in the database".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "connection": {
                        "type": "string",
                        "description": "Database connection name (optional, uses default if not specified)"
                    }
                }
            }),
        },
        Tool {
            name: "describe_table".to_string(),
            description: "Get the schema/structure of a specific table".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "table_name": {
                        "type": "string",
                        "description": "Name of the table to describe"
                    },
                    "connection": {
                        "type": "string",
                        "description": "Database connection name (optional, uses default if not specified)"
                    }
                },
                "required": ["table_name"]
            }),
        },
        Tool {
            name: "test_connection".to_string(),
            description: "Test the database connection".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "connection": {
                        "type": "string",
                        "description": "Database connection name (optional, uses default if not specified)"
                    }
                }
            }),
        },
        Tool {
            name: "list_connections".to_string(),
            description: "List all available database connections".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {}
            }),
        },
        Tool {
            name: "get_connection_info".to_string(),
            description: "Get information about a specific database connection".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "connection": {
                        "type": "string",
                        "description": "Database connection name (optional, uses default if not specified)"
                    }
                }
            }),
        },
        Tool {
            name: "test_all_connections".to_string(),
            description: "Test all configured database connections".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {}
            }),
        },
    ]
}
