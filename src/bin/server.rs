//! voxel-hub-server binary
//!
//! Opens the world store, registers the `Block` and `Player` services and
//! serves connections until interrupted.
//!
//! ## Configuration (flags / env / TOML via `config` crate)
//!
//! | Flag       | Env                             | Default        | Description              |
//! |------------|---------------------------------|----------------|--------------------------|
//! | `--listen` | `VOXEL_HUB_LISTEN_ADDR`         | `0.0.0.0:8421` | TCP listen address       |
//! | `--db`     | `VOXEL_HUB_DB_PATH`             | `world.db`     | World file (`""` = RAM)  |
//! | `--config` | `VOXEL_HUB_CONFIG`              | (none)         | Optional TOML file       |
//! |            | `VOXEL_HUB_NOTIFY_QUEUE_DEPTH`  | `256`          | Pending pushes per peer  |
//! |            | `VOXEL_HUB_MAX_STREAMS`         | `8`            | Streams per connection   |
//! |            | `VOXEL_HUB_MAX_FRAME_SIZE`      | `1048576`      | Longest RPC record       |

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use voxel_hub::{
    protocol::methods, BlockService, PlayerService, Server, ServerConfig, WorldStore,
};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "voxel-hub-server", about = "Voxel Hub world server", version)]
struct Args {
    /// Address to listen on
    #[arg(short, long, env = "VOXEL_HUB_LISTEN_ADDR")]
    listen: Option<String>,

    /// World database file; empty for an in-memory world
    #[arg(long, env = "VOXEL_HUB_DB_PATH")]
    db: Option<String>,

    /// TOML settings file
    #[arg(short, long, env = "VOXEL_HUB_CONFIG")]
    config: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("voxel_hub=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let mut config = ServerConfig::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        config.listen_addr = listen;
    }
    if let Some(db) = args.db {
        config.db_path = db;
    }
    config.validate()?;

    log::info!(
        "Starting voxel-hub-server (listen={}, db={:?}, notify_queue_depth={})",
        config.listen_addr,
        config.db_path,
        config.notify_queue_depth,
    );

    // World data layer
    let store = Arc::new(if config.db_path.is_empty() {
        log::warn!("no database path; world will not survive a restart");
        WorldStore::in_memory()
    } else {
        WorldStore::open(&config.db_path)
            .with_context(|| format!("opening world store {}", config.db_path))?
    });

    let listener = TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;

    // Services
    let mut server = Server::new(config.tunnel());
    let registry = server.registry().clone();
    server.register_service(
        methods::BLOCK,
        Arc::new(BlockService::new(store.clone(), registry.clone())),
    );
    server.register_service(methods::PLAYER, PlayerService::new(registry));
    let server = Arc::new(server);

    // Run until interrupted
    let serving = tokio::spawn(server.clone().serve(listener));
    tokio::select! {
        result = serving => {
            result.context("accept loop panicked")??;
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("waiting for ctrl-c")?;
            log::info!("interrupted; shutting down");
        }
    }

    server.shutdown();
    store.close().context("flushing world store")?;
    log::info!("world store closed");
    Ok(())
}
