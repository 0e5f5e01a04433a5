//! Planning poker - real-time estimation sessions
//!
//! `poker-app` joins a session from the console. `poker-app serve` hosts a
//! session server others can point `POKER_SERVER_URL` at.

use std::net::Ipv4Addr;

use poker_core::{Database, IdentityRepository};
use poker_net::{generate_token, Server, SessionEndpoint};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod console;
mod controller;
mod network;
mod state;

use config::{Config, ConfigError};
use controller::SessionController;

const DATABASE_FILE: &str = "poker.db";

#[derive(Debug, thiserror::Error)]
enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Core(#[from] poker_core::Error),

    #[error(transparent)]
    Net(#[from] poker_net::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn main() {
    // Logs go to stderr so they don't interleave with the console view
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    tracing::info!("Starting planning poker");

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!("Failed to create tokio runtime: {}", e);
            std::process::exit(1);
        }
    };

    let result = match std::env::args().nth(1).as_deref() {
        None => runtime.block_on(run_session(&config)),
        Some("serve") => runtime.block_on(serve(&config)),
        Some(other) => {
            eprintln!("unknown subcommand '{}'\nusage: poker-app [serve]", other);
            std::process::exit(2);
        }
    };

    if let Err(e) = result {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

async fn run_session(config: &Config) -> Result<(), AppError> {
    let data_dir = config.data_dir()?;
    std::fs::create_dir_all(&data_dir)?;

    let db = Database::open(data_dir.join(DATABASE_FILE))?;
    let participant_id = db.get_or_create_participant_id()?;

    let store = network::connect_store(config, &participant_id).await;
    let controller = SessionController::start(Box::new(db), store, config.controller_options());

    console::run(&controller).await?;

    controller.shutdown();
    tracing::info!("Session closed");
    Ok(())
}

async fn serve(config: &Config) -> Result<(), AppError> {
    let token = config.server_token.clone().unwrap_or_else(generate_token);
    let server = Server::start(config.listen_port, token.clone()).await?;

    let local = SessionEndpoint::new(Ipv4Addr::LOCALHOST.into(), server.addr().port(), token);
    println!("Session server listening on {}", server.addr());
    println!("Join with POKER_SERVER_URL={}", local);
    println!("(replace 127.0.0.1 with this machine's address for remote players)");

    tokio::signal::ctrl_c().await?;
    server.shutdown();
    tracing::info!("Server stopped");
    Ok(())
}
