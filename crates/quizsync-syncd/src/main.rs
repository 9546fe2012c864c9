use anyhow::Result;
use clap::Parser;
use quizsync_core::models::{DeviceSessionId, SessionContext, UserIdentity};
use quizsync_syncd::config::load_syncd_config;
use quizsync_syncd::remote::{HttpStore, MemoryStore, RemoteStore};
use quizsync_syncd::{LocalStore, SyncManager};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "quizsync-syncd", about = "Background record sync daemon for quizsync")]
struct Args {
    /// Path to the configuration file
    #[arg(long, default_value = "~/.config/quizsync/config.toml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = if args.config.starts_with("~/") {
        dirs::home_dir().unwrap().join(&args.config[2..])
    } else {
        PathBuf::from(&args.config)
    };

    let config = load_syncd_config(&config_path)?;
    if args.verbose {
        println!("Using config: {}", config_path.display());
    }

    let cache = LocalStore::open(&config.database_path()?, &config.app.app_id)?;
    let context = SessionContext {
        app_id: config.app.app_id.clone(),
        identity: config.user.identity.map(UserIdentity),
        device: Some(DeviceSessionId(uuid::Uuid::new_v4().to_string())),
        user_name: config.user.name.clone(),
    };

    let flush_interval = Duration::from_secs(config.sync.flush_interval_seconds);
    let remote_url = config.remote.as_ref().and_then(|r| r.url.clone());

    match remote_url {
        Some(url) => {
            let auth_token = config.remote.as_ref().and_then(|r| r.auth_token.clone());
            let store = HttpStore::new(&url, auth_token);
            if args.verbose {
                println!("Using remote store: {}", url);
            }
            let mut manager = SyncManager::new(cache, store.clone(), context)?;
            manager.init().await?;
            run_loop(&mut manager, flush_interval).await?;
            store.teardown().await;
        }
        None => {
            println!("No remote store configured - running in local-only mode");
            let mut manager = SyncManager::new(cache, MemoryStore::new(), context)?;
            manager.init().await?;
            run_loop(&mut manager, flush_interval).await?;
        }
    }

    Ok(())
}

async fn run_loop<S: RemoteStore>(
    manager: &mut SyncManager<S>,
    flush_interval: Duration,
) -> Result<()> {
    loop {
        tokio::select! {
            snapshot = manager.next_remote_snapshot() => {
                match snapshot {
                    Some(snapshot) => manager.handle_remote_snapshot(snapshot).await?,
                    None => {
                        eprintln!("WARNING: Remote subscription closed, shutting down");
                        manager.teardown().await;
                        break;
                    }
                }
            }

            // Periodic flush of writes queued while offline
            _ = tokio::time::sleep(flush_interval) => {
                let report = manager.flush_queue().await?;
                if report.dropped > 0 {
                    eprintln!(
                        "WARNING: Dropped {} queued writes past the retry ceiling",
                        report.dropped
                    );
                }
            }

            // Handle shutdown signals
            _ = tokio::signal::ctrl_c() => {
                println!("Received shutdown signal, stopping quizsync-syncd");
                manager.teardown().await;
                break;
            }
        }
    }
    Ok(())
}
