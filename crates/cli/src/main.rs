//! `sipua` - register an account, place a test call, play a file and record
//! both directions, then hang up.
//!
//! The far end is the in-process loopback engine, so a run exercises the whole
//! call and media path without a network.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

use sipua_core::config::{MediaPlan, CALL_ID_PLACEHOLDER};
use sipua_core::loopback::{wav, LoopbackEngine};
use sipua_core::{UaEvent, UserAgent, UserAgentHandle};

mod config;
mod logging;

use config::{FileConfig, Overrides};
use logging::LoggingConfig;

#[derive(Parser, Debug)]
#[command(name = "sipua", author, version, about, long_about = None)]
struct Args {
    /// Configuration file (TOML, or JSON with a .json extension)
    #[arg(short, long, env = "SIPUA_CONFIG")]
    config: Option<PathBuf>,

    /// Local SIP port
    #[arg(short, long)]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "SIPUA_LOG_LEVEL")]
    log_level: Option<String>,

    /// URI to call once the account is active
    #[arg(short, long)]
    target: Option<String>,

    /// Seconds to keep the call up
    #[arg(long)]
    call_duration_secs: Option<u64>,

    /// Seconds to wait after hanging up
    #[arg(long)]
    hangup_grace_secs: Option<u64>,

    /// Simulate an incoming call from this URI
    #[arg(long, value_name = "URI")]
    simulate_incoming: Option<String>,

    /// Print operator events to stdout as JSON lines
    #[arg(long)]
    json_events: bool,

    /// Log in JSON format
    #[arg(long)]
    json_logs: bool,

    /// Include source file and line in log lines
    #[arg(long)]
    log_source: bool,

    /// Create the player file with a test tone if it does not exist
    #[arg(long)]
    write_sample_tone: bool,
}

impl Args {
    fn overrides(&self) -> Overrides {
        Overrides {
            port: self.port,
            log_level: self.log_level.clone(),
            target: self.target.clone(),
            call_duration_secs: self.call_duration_secs,
            hangup_grace_secs: self.hangup_grace_secs,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    match run(args).await {
        Ok(()) => {
            println!("Success");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            println!("Error Found");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };
    args.overrides().apply(&mut config);

    let level = logging::parse_log_level(&config.run.log_level)?;
    let mut logging_config = LoggingConfig::new(level, "sipua");
    if args.json_logs {
        logging_config = logging_config.with_json();
    }
    if args.log_source {
        logging_config = logging_config.with_file_info();
    }
    logging::setup_logging(logging_config)?;
    logging::log_welcome("sipua", sipua_core::VERSION);

    config.validate()?;
    if args.write_sample_tone {
        write_sample_tone(&config.ua.account.media)?;
    }

    let (engine, events) = LoopbackEngine::new();
    let (ua, task) = UserAgent::new(engine.clone(), config.ua.agent.clone()).spawn(events);
    if args.json_events {
        spawn_event_printer(&ua);
    }

    ua.create_transport(config.ua.transport.clone())
        .await
        .context("Error creating transport")?;

    let account = ua
        .add_account(config.ua.account.clone())
        .await
        .context("Error adding account")?;
    let status = ua
        .wait_until_active(account, config.run.registration_timeout())
        .await
        .context("Account did not become active")?;
    info!(account_id = %account, code = status.code, "Account active");

    if let Some(remote) = &args.simulate_incoming {
        engine
            .inject_incoming_call(account, remote)
            .context("Error simulating incoming call")?;
    }

    if let Some(target) = &config.run.target {
        ua.make_call(account, target.as_str(), config.ua.call)
            .await
            .with_context(|| format!("Error making call to {}", target))?;
    }

    tokio::select! {
        _ = tokio::time::sleep(config.run.call_duration()) => {}
        _ = tokio::signal::ctrl_c() => info!("Interrupted, hanging up"),
    }

    ua.hangup_all().await.context("Error hanging up calls")?;
    tokio::time::sleep(config.run.hangup_grace()).await;

    let stats = ua.shutdown().await?;
    task.await.context("User agent task failed")?;
    info!(
        events = stats.events_dispatched,
        orphans = stats.orphan_events,
        "Finished"
    );
    Ok(())
}

/// Print every operator event as one JSON line
fn spawn_event_printer(ua: &UserAgentHandle) {
    let mut rx = ua.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event printer fell behind"),
                Err(RecvError::Closed) => break,
            }
        }
    });
}

fn print_event(event: &UaEvent) {
    match serde_json::to_string(event) {
        Ok(line) => println!("{}", line),
        Err(e) => warn!(error = %e, "Failed to serialize event"),
    }
}

/// One second of a 440 Hz tone at the recorder sample rate
fn sample_tone() -> Vec<i16> {
    let rate = wav::DEFAULT_SAMPLE_RATE as f32;
    (0..wav::DEFAULT_SAMPLE_RATE)
        .map(|n| ((n as f32 * 440.0 * std::f32::consts::TAU / rate).sin() * 8000.0) as i16)
        .collect()
}

fn write_sample_tone(plan: &MediaPlan) -> Result<()> {
    let Some(path) = plan.player.as_deref() else {
        warn!("No player configured, not writing a sample tone");
        return Ok(());
    };
    if path.to_string_lossy().contains(CALL_ID_PLACEHOLDER) {
        warn!(path = %path.display(), "Player path is per call, not writing a sample tone");
        return Ok(());
    }
    if path.exists() {
        return Ok(());
    }
    create_parent(path)?;
    wav::write_pcm_wav(path, wav::DEFAULT_SAMPLE_RATE, &sample_tone())
        .with_context(|| format!("Failed to write sample tone to {}", path.display()))?;
    info!(path = %path.display(), "Wrote sample tone");
    Ok(())
}

fn create_parent(path: &Path) -> Result<()> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display())),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from([
            "sipua",
            "--port",
            "5070",
            "--target",
            "sip:bob@example.com",
            "--call-duration-secs",
            "3",
            "--json-events",
            "--log-source",
        ])
        .unwrap();
        assert!(args.json_events);
        assert!(args.log_source);
        assert!(!args.write_sample_tone);

        let overrides = args.overrides();
        assert_eq!(overrides.port, Some(5070));
        assert_eq!(overrides.target.as_deref(), Some("sip:bob@example.com"));
        assert_eq!(overrides.call_duration_secs, Some(3));
        assert_eq!(overrides.hangup_grace_secs, None);
    }

    #[test]
    fn test_sample_tone_is_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("media").join("Ring02.wav");
        let plan = MediaPlan::default().with_player(&path);

        write_sample_tone(&plan).unwrap();
        let tone = wav::read_pcm_wav(&path).unwrap();
        assert_eq!(tone.samples.len(), wav::DEFAULT_SAMPLE_RATE as usize);

        // an existing file is left alone
        wav::write_pcm_wav(&path, 8000, &[1, 2, 3]).unwrap();
        write_sample_tone(&plan).unwrap();
        assert_eq!(wav::read_pcm_wav(&path).unwrap().samples, vec![1, 2, 3]);
    }

    #[test]
    fn test_sample_tone_skips_per_call_player() {
        let dir = tempfile::tempdir().unwrap();
        let plan = MediaPlan::default().with_player(dir.path().join("{call_id}.wav"));
        write_sample_tone(&plan).unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
