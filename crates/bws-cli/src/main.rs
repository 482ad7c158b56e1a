use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use bws_client::{BwsTask, WebserviceClient};
use bws_core::{motion, BwsToken};
use bws_session::{drive, Mode, Session, TokioExecutor};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

mod config;
mod console;
mod frames;

use config::{Config, Overrides};
use console::ConsoleView;

const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Parser)]
#[command(name = "bws")]
#[command(about = "Verification and enrollment against the BioID Web Service")]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Base URL of the BWS extension API
    #[arg(long, global = true)]
    endpoint: Option<String>,
    #[arg(long, global = true)]
    app_id: Option<String>,
    #[arg(long, global = true)]
    app_secret: Option<String>,
    /// Biometric class id of the subject
    #[arg(long, global = true)]
    bcid: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Inspect or request tokens
    Token {
        #[command(subcommand)]
        command: TokenCommand,
    },
    /// Compare two frames with the local motion detector
    Motion { reference: PathBuf, current: PathBuf },
    /// Verify the subject using frames replayed from a directory
    Verify {
        #[arg(long)]
        frames: PathBuf,
        /// Milliseconds between frames
        #[arg(long)]
        interval_ms: Option<u64>,
    },
    /// Enroll the subject using frames replayed from a directory
    Enroll {
        #[arg(long)]
        frames: PathBuf,
        /// Milliseconds between frames
        #[arg(long)]
        interval_ms: Option<u64>,
    },
}

#[derive(Subcommand)]
enum TokenCommand {
    /// Print the claims of a token as JSON
    Decode { raw: String },
    /// Request a token from the webservice and print it
    Request {
        #[arg(long, value_enum, default_value_t = TaskArg::Verify)]
        task: TaskArg,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum TaskArg {
    Verify,
    Enroll,
}

impl From<TaskArg> for BwsTask {
    fn from(task: TaskArg) -> Self {
        match task {
            TaskArg::Verify => BwsTask::Verify,
            TaskArg::Enroll => BwsTask::Enroll,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(log_filter(std::env::var("RUST_LOG").ok().as_deref()))
        .with_writer(std::io::stderr)
        .init();

    let mut overrides = Overrides {
        endpoint: cli.endpoint,
        app_id: cli.app_id,
        app_secret: cli.app_secret,
        bcid: cli.bcid,
        frame_interval_ms: None,
    };

    match cli.command {
        Command::Token {
            command: TokenCommand::Decode { raw },
        } => {
            println!("{}", serde_json::to_string_pretty(&describe_token(&raw)?)?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Token {
            command: TokenCommand::Request { task },
        } => {
            let config = Config::load(cli.config.as_deref(), &overrides)?;
            let client = WebserviceClient::new(config.client_settings()?);
            let task = BwsTask::from(task);
            let raw = tokio::task::spawn_blocking(move || {
                let bcid = client.settings().bcid.clone();
                client.request_token(&bcid, task)
            })
            .await??;
            println!("{raw}");
            Ok(ExitCode::SUCCESS)
        }
        Command::Motion { reference, current } => {
            let first = frames::load_image(&reference)?;
            let second = frames::load_image(&current)?;
            let result = motion::analyse(&first, &second);
            println!(
                "triggered={} threshold={} box={}x{} moved={}%",
                result.triggered,
                result.threshold,
                result.box_width,
                result.box_height,
                result.moved_percent
            );
            Ok(if result.triggered {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Verify {
            frames,
            interval_ms,
        } => {
            overrides.frame_interval_ms = interval_ms;
            let config = Config::load(cli.config.as_deref(), &overrides)?;
            run_session(Mode::Verify, &config, &frames).await
        }
        Command::Enroll {
            frames,
            interval_ms,
        } => {
            overrides.frame_interval_ms = interval_ms;
            let config = Config::load(cli.config.as_deref(), &overrides)?;
            run_session(Mode::enroll(), &config, &frames).await
        }
    }
}

/// `RUST_LOG` directives when set and valid, `info` otherwise.
fn log_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Claims of `raw` plus the derived flags, as JSON.
fn describe_token(raw: &str) -> Result<Value> {
    let token = BwsToken::decode(raw).context("cannot decode token")?;
    let mut json = token.claims().to_json();
    if let Some(map) = json.as_object_mut() {
        map.insert("fingerprint".into(), Value::from(token.fingerprint()));
        map.insert(
            "expires_at".into(),
            token
                .expires_at()
                .map(|t| Value::from(t.to_rfc3339()))
                .unwrap_or(Value::Null),
        );
        map.insert("max_tries".into(), Value::from(token.max_tries()));
        map.insert("enrollment".into(), Value::from(token.is_enrollment()));
        map.insert("identification".into(), Value::from(token.is_identification()));
        map.insert("live_detection".into(), Value::from(token.is_live_detection_enabled()));
        map.insert("challenge_response".into(), Value::from(token.is_challenge_response()));
        map.insert("auto_enroll".into(), Value::from(token.is_auto_enroll_enabled()));
    }
    Ok(json)
}

async fn run_session(mode: Mode, config: &Config, frames_dir: &Path) -> Result<ExitCode> {
    let client = Arc::new(WebserviceClient::new(config.client_settings()?));
    let images = frames::load_frames(frames_dir)?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let (frames_tx, mut frames_rx) = mpsc::unbounded_channel();
    let mut session = Session::new(
        mode,
        config.session_settings(),
        client.clone(),
        client,
        TokioExecutor::current(tx),
        ConsoleView::default(),
    );
    tracing::info!(session = %session.id(), frames = images.len(), "session starting");

    let source = tokio::spawn(frames::replay(images, config.frame_interval(), frames_tx));
    // No camera prompt on the command line; frames come from disk.
    session.on_resume().context("session failed to start")?;
    session.on_permission_result(true);

    let outcome = drive(&mut session, &mut rx, &mut frames_rx).await;
    source.abort();

    if outcome.context("session failed")? {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}
