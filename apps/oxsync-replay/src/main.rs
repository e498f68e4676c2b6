//! oxsync-replay - Replay recorded change events
//!
//! Reads a file of old/new envelope pairs (one JSON object per line), runs
//! every pair through the reconciliation engine against an in-memory
//! groupware service and prints the resulting remote state.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

use oxsync_provisioning::{
    Attributes, ChangeEnvelope, Dispatcher, EngineConfig, MemoryDirectory, Outcome,
};
use oxsync_remote::memory::MemoryRemote;
use oxsync_remote::traits::RemoteService;

/// Replay directory change events against an in-memory groupware service
#[derive(Parser, Debug)]
#[command(name = "oxsync-replay")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// File with one `{"old": ..., "new": ...}` envelope pair per line
    input: PathBuf,

    /// Tenant ids that exist before the replay starts
    #[arg(long, value_delimiter = ',', default_value = "10")]
    tenants: Vec<i64>,

    /// Directory for the identity cache and configuration files
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Stop at the first failed event
    #[arg(long)]
    fail_fast: bool,
}

/// One recorded change.
#[derive(Debug, Deserialize)]
struct Recorded {
    #[serde(default)]
    old: Option<ChangeEnvelope>,
    #[serde(default)]
    new: Option<ChangeEnvelope>,
}

#[derive(Debug, Default)]
struct Summary {
    changed: usize,
    ignored: usize,
    skipped: usize,
    failed: usize,
}

#[tokio::main]
async fn main() {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,oxsync_provisioning=debug")),
        )
        .init();

    let args = Args::parse();

    // The command line overrides OX_DATA_DIR; everything else comes from the environment.
    let data_dir = args.data_dir.clone();
    let config = EngineConfig::from_reader(move |key| match (key, &data_dir) {
        ("OX_DATA_DIR", Some(dir)) => Ok(dir.to_string_lossy().into_owned()),
        _ => std::env::var(key),
    })
    .unwrap_or_else(|e| {
        eprintln!("Configuration error: {e}");
        std::process::exit(1);
    });

    let raw = std::fs::read_to_string(&args.input).unwrap_or_else(|e| {
        eprintln!("Cannot read {}: {e}", args.input.display());
        std::process::exit(1);
    });

    tracing::info!(
        input = %args.input.display(),
        data_dir = %config.data_dir.display(),
        tenants = ?args.tenants,
        "starting replay"
    );

    let remote = Arc::new(MemoryRemote::with_tenants(args.tenants.iter().copied()));
    let directory = Arc::new(MemoryDirectory::new());
    let service: Arc<dyn RemoteService> = remote.clone();
    let mut dispatcher =
        Dispatcher::new(config, service, directory.clone()).unwrap_or_else(|e| {
            eprintln!("Startup error: {e}");
            std::process::exit(1);
        });

    let mut summary = Summary::default();
    for (index, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let recorded: Recorded = match serde_json::from_str(line) {
            Ok(recorded) => recorded,
            Err(e) => {
                tracing::error!(line = index + 1, error = %e, "malformed event");
                summary.failed += 1;
                if args.fail_fast {
                    break;
                }
                continue;
            }
        };

        track_directory(&directory, &recorded).await;

        match dispatcher.handle_envelopes(recorded.old, recorded.new).await {
            Ok(outcome) if outcome.changed() => summary.changed += 1,
            Ok(Outcome::Skipped(_)) => summary.skipped += 1,
            Ok(_) => summary.ignored += 1,
            Err(e) => {
                tracing::error!(line = index + 1, error = %e, "event failed");
                summary.failed += 1;
                if args.fail_fast {
                    break;
                }
            }
        }
    }

    tracing::info!(
        changed = summary.changed,
        ignored = summary.ignored,
        skipped = summary.skipped,
        failed = summary.failed,
        "replay finished"
    );

    match serde_json::to_string_pretty(&remote.snapshot().await) {
        Ok(state) => println!("{state}"),
        Err(e) => eprintln!("Cannot render remote state: {e}"),
    }

    if summary.failed > 0 {
        std::process::exit(2);
    }
}

/// Keep the local directory view in step with the replayed events so
/// group lookups see the objects recorded so far.
async fn track_directory(directory: &MemoryDirectory, recorded: &Recorded) {
    if let Some(old) = &recorded.old {
        directory.remove(&old.dn).await;
    }
    if let Some(new) = &recorded.new {
        if let Some(object) = &new.object {
            directory
                .insert(new.dn.clone(), Attributes::from(object.clone()))
                .await;
        }
    }
}
