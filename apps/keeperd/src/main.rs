use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use keeper_core::{BackupRequest, StoreKind};
use keeper_rcon::{RconConsole, load_server_properties};
use tracing::{info, warn};

mod backup;
mod config;
mod lock;
mod notify;
mod recovery;
mod retention;
mod runner;
mod stats;
mod store;
#[cfg(test)]
mod testutil;
mod upload;

use backup::Engine;
use backup::quiesce::load_success_pattern;
use config::KeeperConfig;
use notify::LogNotifier;
use runner::ExecRunner;
use stats::format_size;

#[derive(Parser)]
#[command(name = "keeperd", about = "World backup keeper for a live Bedrock server")]
struct Cli {
    /// Config file path; defaults to the per-user data directory.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Identity to attribute this invocation to, checked against the
    /// configured allowlist.
    #[arg(long)]
    requester: Option<String>,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run a backup now (the default when no subcommand is given).
    Backup {
        #[arg(long)]
        permanent: bool,
    },
    /// List archived backups.
    List {
        #[arg(long)]
        permanent: bool,
    },
    /// Show size figures for the world and both stores.
    Stats,
    /// Delete an archived backup.
    Remove {
        name: String,
        #[arg(long)]
        permanent: bool,
    },
    /// Rename an archived backup in place.
    Rename {
        name: String,
        new_name: String,
        #[arg(long)]
        permanent: bool,
    },
    /// Copy a backup between the normal and permanent stores.
    Transfer {
        name: String,
        /// Move from the permanent store back to the normal one.
        #[arg(long)]
        from_permanent: bool,
        /// Remove the source artifact after a successful copy.
        #[arg(long)]
        delete_source: bool,
    },
    /// Push a backup to the configured WebDAV share.
    Upload {
        name: String,
        #[arg(long)]
        permanent: bool,
    },
    /// Stop the server and restore the named backup via the helper.
    Recover {
        name: String,
        #[arg(long)]
        permanent: bool,
    },
}

fn store_kind(permanent: bool) -> StoreKind {
    if permanent {
        StoreKind::Permanent
    } else {
        StoreKind::Normal
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt().init();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("{message}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), String> {
    let config_path = match cli.config {
        Some(path) => path,
        None => config::default_config_path()?,
    };
    let config = config::load_or_init(&config_path)?;

    // Single-instance lock next to the config; two keepers driving the same
    // server would defeat every in-process guard.
    let lock_path = config_path.with_file_name("keeperd.lock");
    let _instance = match lock::acquire(&lock_path) {
        Ok(guard) => guard,
        Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
            warn!("another keeper instance holds {}", lock_path.display());
            return Err("another instance is already running".to_string());
        }
        Err(err) => return Err(format!("failed to acquire instance lock: {err}")),
    };

    if !config.allowlist.is_empty() {
        let permitted = cli
            .requester
            .as_deref()
            .map(|who| config.allowlist.iter().any(|entry| entry == who))
            .unwrap_or(false);
        if !permitted {
            return Err("requester is not on the configured allowlist".to_string());
        }
    }

    for kind in [StoreKind::Normal, StoreKind::Permanent] {
        tokio::fs::create_dir_all(config.store_dir(kind))
            .await
            .map_err(|err| format!("failed to create {} store: {err}", kind.label()))?;
    }
    // A populated scratch dir at startup is leftover from an interrupted
    // run; nothing else owns it.
    backup::ops::reset_scratch(&config.scratch_dir)
        .await
        .map_err(|err| err.to_string())?;

    let command = cli.command.unwrap_or(Command::Backup { permanent: false });
    match command {
        Command::Backup { permanent } => {
            let engine = build_engine(config).await?;
            let report = engine
                .run_backup(BackupRequest::new(store_kind(permanent), cli.requester))
                .await
                .map_err(|err| err.to_string())?;
            info!(
                "archive {} ({}) after {} query attempts",
                report.archive.display(),
                format_size(report.size_bytes),
                report.attempts
            );
            Ok(())
        }
        Command::List { permanent } => {
            let dir = config.store_dir(store_kind(permanent));
            let artifacts = store::list(dir, config.format)
                .await
                .map_err(|err| err.to_string())?;
            if artifacts.is_empty() {
                println!("no backups in {}", dir.display());
                return Ok(());
            }
            for artifact in artifacts {
                let created = artifact
                    .created
                    .map(|at| {
                        chrono::DateTime::<chrono::Local>::from(at)
                            .format("%Y-%m-%d %H:%M:%S")
                            .to_string()
                    })
                    .unwrap_or_else(|| "unknown".to_string());
                println!(
                    "{}  {}  {}",
                    artifact.name,
                    format_size(artifact.size_bytes),
                    created
                );
            }
            Ok(())
        }
        Command::Stats => {
            let world = world_name(&config).await;
            let world_dir = config.server_root.join("worlds").join(&world);
            let figures = stats::collect(
                &ExecRunner,
                &config.helper,
                &world_dir,
                &config.backup_dir,
                &config.permanent_dir,
            )
            .await
            .map_err(|err| err.to_string())?;
            for entry in figures {
                println!(
                    "{}  {}  {} files",
                    entry.path,
                    format_size(entry.size),
                    entry.file_count
                );
            }
            Ok(())
        }
        Command::Remove { name, permanent } => {
            store::remove(config.store_dir(store_kind(permanent)), &name, config.format)
                .await
                .map_err(|err| err.to_string())?;
            println!("removed {name}");
            Ok(())
        }
        Command::Rename {
            name,
            new_name,
            permanent,
        } => {
            let renamed = store::rename(
                config.store_dir(store_kind(permanent)),
                &name,
                &new_name,
                config.format,
            )
            .await
            .map_err(|err| err.to_string())?;
            println!("renamed {name} to {renamed}");
            Ok(())
        }
        Command::Transfer {
            name,
            from_permanent,
            delete_source,
        } => {
            let (from, to) = if from_permanent {
                (StoreKind::Permanent, StoreKind::Normal)
            } else {
                (StoreKind::Normal, StoreKind::Permanent)
            };
            store::transfer(
                &ExecRunner,
                &config.helper,
                &name,
                config.store_dir(from),
                config.store_dir(to),
                delete_source,
                config.format,
            )
            .await
            .map_err(|err| err.to_string())?;
            println!("transferred {name} to the {} store", to.label());
            Ok(())
        }
        Command::Upload { name, permanent } => {
            let artifact = store::artifact_path(
                config.store_dir(store_kind(permanent)),
                &name,
                config.format,
            )
            .map_err(|err| err.to_string())?;
            let summary = upload::upload(&ExecRunner, &config.helper, &artifact, &config.upload)
                .await
                .map_err(|err| err.to_string())?;
            if !summary.is_empty() {
                println!("{summary}");
            }
            Ok(())
        }
        Command::Recover { name, permanent } => {
            let requester = cli.requester.clone();
            let engine = build_engine(config).await?;
            let handoff = recovery::launch_recovery(
                &engine,
                &name,
                store_kind(permanent),
                requester.as_deref(),
            )
            .await
            .map_err(|err| err.to_string())?;
            // The helper (pid below) restores and relaunches the server once
            // this process has exited.
            info!("recovery handed off to pid {}", handoff.pid);
            Ok(())
        }
    }
}

async fn world_name(config: &KeeperConfig) -> String {
    match load_server_properties(&config.server_root).await {
        Ok(Some(props)) => props.level_name,
        _ => None,
    }
    .unwrap_or_else(|| "Bedrock level".to_string())
}

/// Wire the live collaborators: RCON console from `server.properties`, the
/// locale-resolved acknowledgement pattern and the real process runner.
async fn build_engine(config: KeeperConfig) -> Result<Engine, String> {
    let props = load_server_properties(&config.server_root)
        .await
        .map_err(|err| format!("failed to read server.properties: {err}"))?
        .ok_or_else(|| {
            format!(
                "server.properties not found under {}",
                config.server_root.display()
            )
        })?;
    let console = props.console.ok_or_else(|| {
        "RCON is not enabled; set enable-rcon and rcon.password in server.properties".to_string()
    })?;
    let world = props
        .level_name
        .unwrap_or_else(|| "Bedrock level".to_string());
    let language = props.language.unwrap_or_else(|| config.language.clone());
    let pattern = load_success_pattern(&config.server_root, &language).await;

    Ok(Engine::new(
        config,
        world,
        Arc::new(ExecRunner),
        Arc::new(RconConsole::from_settings(console)),
        Arc::new(LogNotifier),
        pattern,
    ))
}
