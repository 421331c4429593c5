//! `AeroChat` stub backend -- in-memory messaging server.
//!
//! Serves the chat REST API and WebSocket push endpoint against an
//! in-memory state table. Intended for local development and
//! integration tests, not production.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 127.0.0.1:8080
//! cargo run --bin aerochat-stubd
//!
//! # Run on custom address
//! cargo run --bin aerochat-stubd -- --bind 127.0.0.1:9000
//!
//! # Or via environment variable
//! AEROCHAT_STUB_ADDR=127.0.0.1:9000 cargo run --bin aerochat-stubd
//! ```

use std::sync::Arc;

use clap::Parser;

use aerochat_proto::model::{ChatUser, Role, UserId};
use aerochat_stubd::config::{StubCliArgs, StubConfig};
use aerochat_stubd::server;
use aerochat_stubd::state::StubState;

#[tokio::main]
async fn main() {
    let cli = StubCliArgs::parse();

    // Load config from CLI args + config file + env vars + defaults.
    let config = match StubConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    // Initialize tracing with the resolved log level.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(addr = %config.bind_addr, "starting aerochat stub backend");

    let state = Arc::new(StubState::new());
    for seed in &config.seed_users {
        let user = ChatUser {
            id: UserId::new(seed.id.clone()),
            name: seed.name.clone(),
            avatar: None,
            role: Some(Role::Candidate),
        };
        state.register_user(seed.token.clone(), user);
        tracing::info!(user = %seed.id, "seeded user");
    }

    match server::start_server(&config.bind_addr, state).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "stub backend listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "stub backend task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start stub backend");
            std::process::exit(1);
        }
    }
}
