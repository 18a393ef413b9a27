use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sitesync::config::Config;
use sitesync::remote::RestStore;
use sitesync::{DatabaseManager, EntityType, ManagerSettings, Payload, RecordId};

#[derive(Parser, Debug)]
#[command(name = "sitesync")]
#[command(about = "Keep a local mirror of the back-office store in sync")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/sitesync/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Probe the remote store
  Status,
  /// Load collections and print their sizes
  Load {
    /// Only load this entity type
    #[arg(short, long)]
    entity: Option<EntityType>,
  },
  /// Follow live changes until interrupted
  Watch {
    #[arg(required = true)]
    entities: Vec<EntityType>,
  },
  /// Create a record from a JSON object
  Create { entity: EntityType, json: String },
  /// Patch a record with a JSON object
  Update {
    entity: EntityType,
    id: String,
    json: String,
  },
  /// Delete a record
  Delete { entity: EntityType, id: String },
}

/// Log to stderr and to a daily file under the data directory.
fn init_tracing() -> Option<WorkerGuard> {
  let filter = EnvFilter::try_from_env("SITESYNC_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
  let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);

  let log_dir = dirs::data_dir().map(|d| d.join("sitesync").join("logs"));
  match log_dir.filter(|dir| std::fs::create_dir_all(dir).is_ok()) {
    Some(dir) => {
      let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "sitesync.log"));
      tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .init();
      Some(guard)
    }
    None => {
      tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .init();
      None
    }
  }
}

fn parse_payload(json: &str) -> Result<Payload> {
  match serde_json::from_str::<Value>(json)? {
    Value::Object(fields) => Ok(fields),
    other => Err(eyre!("Expected a JSON object, got: {}", other)),
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;
  let _guard = init_tracing();

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;

  let remote = Arc::new(RestStore::new(&config)?);
  let manager = DatabaseManager::new(remote, ManagerSettings::try_from(&config.sync)?);

  let result = run(&manager, args.command).await;
  manager.teardown();
  result
}

async fn run(manager: &DatabaseManager, command: Command) -> Result<()> {
  match command {
    Command::Status => {
      let probe = manager.check_connection().await;
      let state = manager.connection_state();
      println!(
        "{} ({:?})",
        if state.online { "online" } else { "offline" },
        state.indicator
      );
      probe?;
    }
    Command::Load { entity } => {
      let statuses = match entity {
        Some(entity) => vec![(entity, manager.load(entity).await)],
        None => manager.load_all_data().await,
      };
      for (entity, status) in statuses {
        println!(
          "{:<20} {:>6}  {:?}",
          entity.to_string(),
          manager.get_collection(entity).len(),
          status
        );
      }
    }
    Command::Watch { entities } => watch(manager, entities).await?,
    Command::Create { entity, json } => {
      manager.check_connection().await?;
      let record = manager.create(entity, &parse_payload(&json)?).await?;
      println!("{}", serde_json::to_string_pretty(&record)?);
    }
    Command::Update { entity, id, json } => {
      manager.check_connection().await?;
      let record = manager
        .update(entity, &RecordId::from(id.as_str()), &parse_payload(&json)?)
        .await?;
      println!("{}", serde_json::to_string_pretty(&record)?);
    }
    Command::Delete { entity, id } => {
      manager.check_connection().await?;
      let id = manager.delete(entity, &RecordId::from(id.as_str())).await?;
      println!("deleted {} {}", entity, id);
    }
  }
  Ok(())
}

async fn watch(manager: &DatabaseManager, entities: Vec<EntityType>) -> Result<()> {
  manager.load_all_data().await;

  let (tx, mut rx) = mpsc::unbounded_channel();
  let listener = manager.on_any_change(move |entity| {
    tx.send(entity)?;
    Ok(())
  });

  for entity in &entities {
    manager.subscribe(*entity).await?;
  }
  info!(count = entities.len(), "watching for changes, Ctrl-C to stop");

  loop {
    tokio::select! {
      _ = tokio::signal::ctrl_c() => break,
      Some(entity) = rx.recv() => {
        let len = manager.get_collection(entity).len();
        if entity.affects_dashboard() {
          info!(%entity, len, "changed, dashboard aggregates need a refresh");
        } else {
          info!(%entity, len, "changed");
        }
      }
    }
  }

  manager.remove_listener(listener);
  Ok(())
}
