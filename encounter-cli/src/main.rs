use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use encounter_session::{
    compute_duration_seconds, format_duration, report, Config, Encounter, EncounterManager,
    EncounterState, HttpBackend, MessageRole, NewMessage, ReportDraft, TimeInput,
};

/// Drive pausable consultation encounters against an encounter service
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file (defaults to ~/.consultscribe/config.json)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Encounter service URL, overrides the config file
    #[arg(long)]
    base_url: Option<String>,

    /// Owner id, overrides the config file
    #[arg(short, long)]
    user: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(flatten)]
    Service(ServiceCommand),
    /// Compute a recording duration without contacting the service
    Duration {
        /// Start as RFC 3339 text or epoch milliseconds
        #[arg(long)]
        start: Option<String>,
        #[arg(long)]
        end: Option<String>,
        #[arg(long, allow_hyphen_values = true)]
        seconds: Option<f64>,
    },
}

/// Commands that talk to the encounter service
#[derive(Subcommand, Debug)]
enum ServiceCommand {
    /// Start a new encounter
    Start {
        /// Initial state as a JSON object
        #[arg(long)]
        state: Option<String>,
    },
    /// Pause the active encounter, snapshotting its state
    Pause {
        /// Replacement state as a JSON object (defaults to the current state)
        #[arg(long)]
        state: Option<String>,
        #[arg(long)]
        step: Option<String>,
        #[arg(long)]
        transcript: Option<String>,
        /// Elapsed recording seconds
        #[arg(long)]
        recording_time: Option<f64>,
    },
    /// Resume a paused encounter
    Resume { id: String },
    /// Complete the current encounter
    Complete {
        /// Archive a report draft
        #[arg(long)]
        archive: bool,
        /// Recording start, used for the draft duration
        #[arg(long)]
        started_at: Option<String>,
        /// Recording end, used for the draft duration
        #[arg(long)]
        ended_at: Option<String>,
    },
    /// Append a message to the active encounter
    Message {
        content: String,
        #[arg(long, default_value = "user", value_parser = parse_role)]
        role: MessageRole,
        #[arg(long)]
        step: Option<String>,
    },
    /// List paused encounters
    Paused,
    /// Show the active or paused encounter
    Active,
}

fn parse_role(value: &str) -> Result<MessageRole, String> {
    serde_json::from_value(serde_json::Value::String(value.to_string()))
        .map_err(|_| format!("unknown role '{}' (expected user, assistant or system)", value))
}

/// Numbers are epoch milliseconds, anything else is parsed as text
fn parse_time(value: &str) -> TimeInput {
    match value.trim().parse::<f64>() {
        Ok(ms) => TimeInput::EpochMillis(ms),
        Err(_) => TimeInput::from(value),
    }
}

fn parse_state(json: &str) -> Result<EncounterState> {
    serde_json::from_str(json).context("State must be a JSON object")
}

/// State sent on pause: the current state, or `--state`, with flag overrides
fn build_pause_state(
    current: Option<&Encounter>,
    state: Option<&str>,
    step: Option<String>,
    transcript: Option<String>,
    recording_time: Option<f64>,
) -> Result<EncounterState> {
    let mut snapshot = match state {
        Some(json) => parse_state(json)?,
        None => current.map(|e| e.state.clone()).unwrap_or_default(),
    };
    if step.is_some() {
        snapshot.step = step;
    }
    if transcript.is_some() {
        snapshot.transcript = transcript;
    }
    if recording_time.is_some() {
        snapshot.recording_time = recording_time;
    }
    Ok(snapshot)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_duration(start: Option<String>, end: Option<String>, seconds: Option<f64>) {
    let total = compute_duration_seconds(
        start.as_deref().map(parse_time),
        end.as_deref().map(parse_time),
        seconds,
    );
    match total {
        Some(total) => println!("{} ({} s)", format_duration(Some(total as f64)), total),
        None => println!("{}", format_duration(None)),
    }
}

fn load_config(
    path: Option<&Path>,
    base_url: Option<String>,
    user: Option<String>,
) -> Result<Config> {
    let mut config = match path {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default(),
    };
    if let Some(base_url) = base_url {
        config.base_url = base_url;
    }
    if user.is_some() {
        config.owner_id = user;
    }
    Ok(config)
}

/// Manager rehydrated with whatever the service considers current
async fn connect(config: &Config) -> Result<EncounterManager<HttpBackend>> {
    let backend = HttpBackend::from_config(config)?;
    let mut manager = EncounterManager::new(backend, config.owner_id.clone());
    if let Some(encounter) = manager.get_active_encounter().await? {
        debug!("Current encounter {} is {}", encounter.id, encounter.status);
    }
    Ok(manager)
}

async fn run(args: Args) -> Result<()> {
    match args.command {
        Command::Duration {
            start,
            end,
            seconds,
        } => {
            print_duration(start, end, seconds);
            Ok(())
        }
        Command::Service(command) => {
            let config = load_config(args.config.as_deref(), args.base_url, args.user)?;
            run_service_command(command, &config).await
        }
    }
}

async fn run_service_command(command: ServiceCommand, config: &Config) -> Result<()> {
    let mut manager = connect(config).await?;

    match command {
        ServiceCommand::Start { state } => {
            let initial = state.as_deref().map(parse_state).transpose()?;
            let encounter = manager.start(initial).await?;
            print_json(&encounter)?;
        }
        ServiceCommand::Pause {
            state,
            step,
            transcript,
            recording_time,
        } => {
            let snapshot = build_pause_state(
                manager.current(),
                state.as_deref(),
                step,
                transcript,
                recording_time,
            )?;
            let encounter = manager.pause(snapshot).await?;
            print_json(&encounter)?;
        }
        ServiceCommand::Resume { id } => {
            let encounter = manager.resume(&id).await?;
            println!("Resumed {} at {}", encounter.id, encounter.state.recording_display());
        }
        ServiceCommand::Complete {
            archive,
            started_at,
            ended_at,
        } => {
            let encounter = manager.complete().await?;
            let draft = ReportDraft::from_encounter(
                &encounter,
                started_at.as_deref().map(parse_time),
                ended_at.as_deref().map(parse_time),
            );
            println!(
                "Completed {} (duration {}, {} words)",
                encounter.id,
                draft.duration_display,
                draft.word_count()
            );
            if archive {
                let path = report::save_report(&config.archive_path()?, &draft)?;
                info!("Report draft written to {}", path.display());
                println!("Archived report draft: {}", path.display());
            }
        }
        ServiceCommand::Message {
            content,
            role,
            step,
        } => {
            let mut message = NewMessage::new(role, content);
            message.step = step;
            let encounter = manager.record_message(message).await?;
            println!(
                "Encounter {} now has {} messages",
                encounter.id,
                encounter.state.messages.len()
            );
        }
        ServiceCommand::Paused => {
            let paused = manager.fetch_paused_encounters().await?;
            if paused.is_empty() {
                println!("No paused encounters");
            }
            for encounter in paused {
                println!(
                    "{}  step={}  recorded={}",
                    encounter.id,
                    encounter.state.step.as_deref().unwrap_or("-"),
                    encounter.state.recording_display()
                );
            }
        }
        ServiceCommand::Active => match manager.current() {
            Some(encounter) => print_json(encounter)?,
            None => println!("No active or paused encounter"),
        },
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    run(args).await
}
