// SPDX-FileCopyrightText: 2026 Fieldsync Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Fieldsync - offline-tolerant sync agent for field delivery apps.
//!
//! This is the binary entry point.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod app;
mod commands;
mod serve;
mod shutdown;
mod status;

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use fieldsync_core::FieldsyncError;

/// Fieldsync - offline-tolerant sync agent for field delivery apps.
#[derive(Parser, Debug)]
#[command(name = "fieldsync", version, about, long_about = None)]
struct Cli {
    /// Load this configuration file instead of searching the standard locations.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the outbox, background sync and realtime order feed until interrupted.
    Serve,
    /// Queue an API request for delivery.
    Enqueue {
        /// HTTP method, e.g. POST.
        method: String,
        /// Absolute URL or a path relative to `api.base_url`.
        url: String,
        /// Request body.
        #[arg(long)]
        body: Option<String>,
        /// Content type sent with the body.
        #[arg(long, default_value = "application/json")]
        content_type: String,
    },
    /// Deliver every queued request once.
    Drain,
    /// Show stored credentials and queued requests.
    Status {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
        /// Disable colors.
        #[arg(long)]
        plain: bool,
    },
    /// Store an access/refresh token pair.
    Login {
        #[arg(long)]
        access_token: Option<String>,
        #[arg(long)]
        refresh_token: Option<String>,
        /// Access token expiry (RFC 3339).
        #[arg(long)]
        expires_at: Option<DateTime<Utc>>,
    },
    /// Remove stored credentials.
    Logout,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => fieldsync_config::load_and_validate_path(path),
        None => fieldsync_config::load_and_validate(),
    };
    let config = match loaded {
        Ok(config) => config,
        Err(errors) => {
            fieldsync_config::render_errors(&errors);
            std::process::exit(1);
        }
    };

    init_tracing(&config.agent.log_level);

    let result: Result<(), FieldsyncError> = match cli.command {
        Some(Commands::Serve) => serve::run_serve(config).await,
        Some(Commands::Enqueue {
            method,
            url,
            body,
            content_type,
        }) => commands::run_enqueue(config, method, url, body, content_type).await,
        Some(Commands::Drain) => commands::run_drain(config).await,
        Some(Commands::Status { json, plain }) => status::run_status(config, json, plain).await,
        Some(Commands::Login {
            access_token,
            refresh_token,
            expires_at,
        }) => commands::run_login(config, access_token, refresh_token, expires_at).await,
        Some(Commands::Logout) => commands::run_logout(config).await,
        None => {
            println!("fieldsync: use --help for available commands");
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("fieldsync={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .with_writer(std::io::stderr)
        .init();
}
