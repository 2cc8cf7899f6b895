use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::FixedOffset;
use serde::Serialize;
use spendlog_core::Frequency;
use spendlog_daemon::config::{self, Config};
use spendlog_daemon::{build_router, start, App, AppOptions, AppState};
use spendlog_storage::ShareFacility;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Parsed command line: the config plus the positional words and `--yes`.
struct Invocation {
    cfg: Config,
    words: Vec<String>,
    confirmed: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let inv = parse_args()?;
    let opts = app_options(&inv.cfg)?;

    let listen = env::var("SPENDLOG_LISTEN")
        .ok()
        .or_else(|| inv.cfg.server.listen.clone())
        .unwrap_or_else(|| "127.0.0.1:8089".to_owned());

    let words: Vec<&str> = inv.words.iter().map(String::as_str).collect();
    match words.as_slice() {
        [] | ["serve"] => {
            let app = start(&opts).await?;
            run_service(app, &listen, &inv.cfg).await
        }
        [mode, rest @ ..] => {
            let app = App::open(&opts).await?;
            run_command(&app, mode, rest, inv.confirmed).await
        }
    }
}

/// Parse CLI args, returning the loaded config and the remaining words.
fn parse_args() -> Result<Invocation> {
    let args: Vec<String> = env::args().collect();
    let mut config_path: Option<PathBuf> = None;
    let mut words = Vec::new();
    let mut confirmed = false;
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
                if i >= args.len() {
                    bail!("--config requires a path argument");
                }
                config_path = Some(PathBuf::from(&args[i]));
            }
            "--yes" | "-y" => confirmed = true,
            other => words.push(other.to_owned()),
        }
        i += 1;
    }

    let cfg = match config_path {
        Some(path) => {
            info!(?path, "loading config file");
            config::load_config(&path)?
        }
        None => Config::default(),
    };

    Ok(Invocation { cfg, words, confirmed })
}

fn app_options(cfg: &Config) -> Result<AppOptions> {
    let root = env::var("SPENDLOG_ROOT")
        .ok()
        .or_else(|| cfg.storage.root.clone())
        .unwrap_or_else(|| "./data".to_owned());

    let mut opts = AppOptions::new(root);
    if let Some(retention) = env::var("SPENDLOG_RETENTION")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .or(cfg.storage.retention_count)
    {
        opts.retention = retention;
    }
    if let Some(secs) = cfg.schedule.granularity_secs {
        opts.granularity = Duration::from_secs(secs);
    }
    if let Some(minutes) = cfg.schedule.utc_offset_minutes {
        let offset = FixedOffset::east_opt(minutes * 60)
            .with_context(|| format!("utc_offset_minutes out of range: {minutes}"))?;
        opts.utc_offset = Some(offset);
    }
    opts.share_command = cfg.share.command.clone();
    Ok(opts)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn require_confirmation(mode: &str, confirmed: bool) -> Result<()> {
    if !confirmed {
        bail!("{mode} is destructive; re-run with --yes to confirm");
    }
    Ok(())
}

async fn run_command(app: &App, mode: &str, args: &[&str], confirmed: bool) -> Result<()> {
    match (mode, args) {
        ("backup", []) => {
            let backup = app.repo.create().await?;
            info!(backup_id = %backup.id, records = backup.record_count, "backup created");
            print_json(&backup)
        }
        ("list", []) => print_json(&app.repo.list().await),
        ("stats", []) => print_json(&app.repo.stats().await),
        ("restore", [id]) => {
            require_confirmation("restore", confirmed)?;
            let report = app.restore.restore(id).await?;
            print_json(&report)
        }
        ("delete", [id]) => {
            require_confirmation("delete", confirmed)?;
            app.repo.delete(id).await?;
            info!(backup_id = %id, "backup deleted");
            Ok(())
        }
        ("import", [path]) => {
            let backup = app.repo.import(&PathBuf::from(path)).await?;
            print_json(&backup)
        }
        ("export", [id]) => {
            let path = if app.share.is_available() {
                app.repo.share(id, app.share.as_ref()).await?
            } else {
                app.repo.export(id).await?
            };
            println!("{}", path.display());
            Ok(())
        }
        ("schedule", rest) => run_schedule(app, rest).await,
        _ => bail!("unknown command: {mode} {}", args.join(" ")),
    }
}

async fn run_schedule(app: &App, args: &[&str]) -> Result<()> {
    let scheduler = &app.scheduler;
    let policy = match args {
        [] | ["status"] => scheduler.policy().await,
        ["enable", rest @ ..] => {
            let frequency = rest
                .first()
                .map(|f| f.parse::<Frequency>())
                .transpose()
                .map_err(anyhow::Error::msg)?;
            let time = rest.get(1).copied();
            if frequency.is_some() || time.is_some() {
                scheduler.update(frequency, time).await?;
            }
            scheduler.enable().await?
        }
        ["disable"] => scheduler.disable().await?,
        ["test"] => {
            let backup = scheduler.test_backup().await?;
            return print_json(&backup);
        }
        other => bail!("unknown schedule command: {}", other.join(" ")),
    };
    print_json(&serde_json::json!({
        "policy": policy,
        "nextBackupTime": scheduler.next_backup_time(&policy),
    }))
}

async fn run_service(app: App, listen: &str, cfg: &Config) -> Result<()> {
    let state = AppState {
        app,
        api_token: env::var("SPENDLOG_API_TOKEN")
            .ok()
            .or_else(|| cfg.security.api_token.clone()),
    };

    let addr: SocketAddr = listen
        .parse()
        .with_context(|| format!("invalid listen address: {listen}"))?;
    let router = build_router(state);

    info!(%addr, "starting spendlog api server");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .await?;
    Ok(())
}
