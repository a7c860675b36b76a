//! MySQL MCP Server
//!
//! A Model Context Protocol (MCP) server for MySQL/MariaDB databases. Exposes
//! a fixed tool catalog (query execution, table listing, schema inspection,
//! connection testing) over JSON-RPC 2.0, via stdio and/or an HTTP transport
//! with an SSE event stream.
//!
//! # Features
//!
//! - Multiple named database connections with a configurable default
//! - Parameterized query execution with a destructive-statement safety gate
//! - Schema inspection and table listing
//! - stdio, HTTP, or combined transport modes
//! - Optional API key and CORS controls on the HTTP transport

mod config;
mod db;
mod error;
mod http;
mod rpc;
mod server;
mod tools;
mod validators;

use clap::Parser;
use log::{error, info};
use std::sync::Arc;

use config::{Args, TransportMode};
use db::DatabaseManager;
use server::Dispatcher;

#[tokio::main]
async fn main() {
    env_logger::init();

    let args = Args::parse();
    let vars = config::from_process_env();

    let db_settings = match config::resolve_database(&vars) {
        Ok(settings) => settings,
        Err(e) => {
            error!("{e}");
            eprintln!("{e}");
            std::process::exit(1);
        }
    };
    let server_settings = config::resolve_server(&vars).apply_overrides(&args);

    let db = Arc::new(DatabaseManager::new(db_settings));
    info!("Transport mode: {:?}", server_settings.transport);

    let outcome = {
        let db = Arc::clone(&db);
        let settings = server_settings;
        let run = async move {
            match settings.transport {
                TransportMode::Stdio => server::run_stdio(Dispatcher::new(db)).await,
                TransportMode::Http => http::serve(settings, Dispatcher::new(db)).await,
                TransportMode::Both => {
                    // Each transport gets its own dispatcher; they share only
                    // the immutable registry.
                    let stdio = server::run_stdio(Dispatcher::new(Arc::clone(&db)));
                    let http = http::serve(settings, Dispatcher::new(db));
                    tokio::try_join!(stdio, http).map(|_| ())
                }
            }
        };

        tokio::select! {
            result = run => Some(result),
            _ = shutdown_signal() => None,
        }
    };

    // Pools are always drained before the process exits.
    match outcome {
        Some(Ok(())) => {
            db.close().await;
        }
        Some(Err(e)) => {
            error!("Server error: {e}");
            db.close().await;
            std::process::exit(1);
        }
        None => {
            info!("Shutdown signal received, closing connection pools");
            db.close().await;
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {e}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                futures::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = futures::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
