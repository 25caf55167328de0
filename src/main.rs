//! CinderKV server binary.
//!
//! Parses flags and the optional config file, wires the storage engine,
//! evictor and expiry sweeper together, then accepts clients until Ctrl+C.

use cinderkv::commands::CommandHandler;
use cinderkv::config::{self, CliCommand, ServerConfig};
use cinderkv::connection::{handle_connection, ConnectionStats};
use cinderkv::storage::{Evictor, ExpirySweeper, StorageEngine};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn print_banner(config: &ServerConfig) {
    let max_memory = if config.max_memory == 0 {
        "unlimited".to_string()
    } else {
        format!("{} bytes", config.max_memory)
    };

    println!(
        r#"
   ___ _         _          _  ____   __
  / __(_)_ _  __| |___ _ _ | |/ /\ \ / /
 | (__| | ' \/ _` / -_) '_|| ' <  \ V /
  \___|_|_||_\__,_\___|_|  |_|\_\  \_/

CinderKV v{} - In-Memory Key-Value Server
──────────────────────────────────────────────────────────────
Listening on      {}
Max memory        {}
Eviction policy   {}

Use Ctrl+C to shutdown gracefully.
"#,
        cinderkv::VERSION,
        config.bind_address(),
        max_memory,
        config.eviction_policy,
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match config::parse_args(std::env::args().skip(1)) {
        Ok(CliCommand::Run(config)) => config,
        Ok(CliCommand::Help) => {
            print!("{}", config::HELP);
            return Ok(());
        }
        Ok(CliCommand::Version) => {
            println!("CinderKV version {}", cinderkv::VERSION);
            return Ok(());
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            eprint!("{}", config::HELP);
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    print_banner(&config);

    let storage = Arc::new(StorageEngine::new());
    info!("Storage engine initialized with 64 shards");

    let evictor = Arc::new(Evictor::new(Arc::clone(&storage), config.eviction()));
    info!(
        max_memory = config.max_memory,
        policy = %config.eviction_policy,
        samples = config.max_memory_samples,
        "Eviction configured"
    );

    let _sweeper = ExpirySweeper::start(Arc::clone(&storage), config.expiry());
    info!(hz = config.hz, "Background expiry sweeper started");

    let stats = Arc::new(ConnectionStats::new());
    let handler = CommandHandler::new(storage, evictor, Arc::clone(&stats));

    let listener = TcpListener::bind(config.bind_address()).await?;
    info!("Listening on {}", config.bind_address());

    let shutdown = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received, stopping server..."),
            Err(e) => {
                warn!(error = %e, "Could not listen for Ctrl+C, running until killed");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = accept_loop(listener, handler, stats) => {}
        _ = shutdown => {}
    }

    info!("Server shutdown complete");
    Ok(())
}

async fn accept_loop(listener: TcpListener, handler: CommandHandler, stats: Arc<ConnectionStats>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    warn!(client = %addr, error = %e, "Failed to set TCP_NODELAY");
                }
                tokio::spawn(handle_connection(
                    stream,
                    addr,
                    handler.clone(),
                    Arc::clone(&stats),
                ));
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}
