use crate::application::commands::{
    close_focus_impl, end_focus_impl, focus_status_impl, list_focus_history_impl, open_focus_impl,
    reset_focus_impl, toggle_focus_impl, AppState, FocusStateResponse,
};
use crate::application::focus_session::SessionCloseConfirmer;
use crate::domain::models::TimerSnapshot;
use crate::domain::presentation::{end_failure_message, format_clock, ring_offset};
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

const CLOSE_PROMPT: &str = "You have an active session. Do you want to end it? [y/N] ";

type SharedInput = Arc<Mutex<Lines<BufReader<Stdin>>>>;

#[derive(Parser)]
#[command(name = "studyflow-focus")]
#[command(about = "StudyFlow focus timer", long_about = None)]
pub struct Cli {
    /// Directory holding config/, state/ and logs/ (defaults to the current directory)
    #[arg(long, global = true, env = "STUDYFLOW_WORKSPACE")]
    workspace: Option<PathBuf>,
    /// StudyFlow server base URL; overrides config and environment
    #[arg(long, global = true)]
    server: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an interactive focus session
    Run {
        /// Subject recorded when the session starts
        #[arg(long)]
        subject: Option<String>,
    },
    /// Ask the server whether a focus session is active
    Status,
    /// List focus sessions recorded on this machine, newest first
    History {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

pub async fn execute(cli: Cli) -> Result<(), InfraError> {
    let workspace_root = match cli.workspace {
        Some(path) => path,
        None => std::env::current_dir()?,
    };
    let state = AppState::new(workspace_root, cli.server.as_deref())?;

    match cli.command {
        Commands::Run { subject } => run_session(&state, subject).await,
        Commands::Status => {
            let status = focus_status_impl(&state)
                .await
                .map_err(|error| report(&state, "focus_status", error))?;
            if status.active {
                println!(
                    "Active focus session detected: {} (started {})",
                    status.subject.as_deref().unwrap_or("unknown subject"),
                    status.start_time.as_deref().unwrap_or("unknown")
                );
            } else {
                println!("No active focus session.");
            }
            Ok(())
        }
        Commands::History { limit } => {
            let sessions = list_focus_history_impl(&state, Some(limit))
                .map_err(|error| report(&state, "list_focus_history", error))?;
            if sessions.is_empty() {
                println!("No focus sessions recorded yet.");
            }
            for session in sessions {
                println!(
                    "{}  {:<28} {}h {}m",
                    session.start_time.format("%Y-%m-%d %H:%M"),
                    session.subject,
                    session.duration_minutes / 60,
                    session.duration_minutes % 60
                );
            }
            Ok(())
        }
    }
}

async fn run_session(state: &AppState, subject: Option<String>) -> Result<(), InfraError> {
    let input: SharedInput = Arc::new(Mutex::new(BufReader::new(tokio::io::stdin()).lines()));
    let confirmer = StdinConfirmer {
        input: Arc::clone(&input),
    };

    let opened = open_focus_impl(state)
        .await
        .map_err(|error| report(state, "open_focus", error))?;
    if opened.remote.as_ref().is_some_and(|status| status.active) {
        println!("Note: the server already has an active focus session.");
    }
    println!("{}", banner(&state.config().app_name));
    print_state(&opened.timer);

    let renderer = spawn_renderer(state.subscribe(), state.config().ring_radius);

    loop {
        let line = {
            let mut lines = input.lock().await;
            lines.next_line().await?
        };
        let Some(line) = line else {
            if state.subscribe().borrow().state.holds_session() {
                log::warn!("stdin closed; abandoning the active focus session");
            }
            break;
        };

        match line.trim() {
            "" | "t" => match toggle_focus_impl(state, subject.clone()) {
                Ok(response) => print_state(&response),
                Err(error) => eprintln!("{}", state.command_error("toggle_focus", &error)),
            },
            "e" => match end_focus_impl(state).await {
                Ok(Some(ended)) => println!("\n{}", ended.message),
                Ok(None) => println!("\nNo active focus session."),
                Err(error) => {
                    state.command_error("end_focus", &error);
                    eprintln!("\n{}", end_failure_message());
                }
            },
            "r" => match reset_focus_impl(state) {
                Ok(response) => print_state(&response),
                Err(error) => eprintln!("{}", state.command_error("reset_focus", &error)),
            },
            "q" => match close_focus_impl(state, &confirmer).await {
                Ok(response) if response.status == "kept" => {}
                Ok(response) => {
                    if let Some(ended) = response.ended {
                        println!("{}", ended.message);
                    }
                    break;
                }
                Err(error) => {
                    state.command_error("close_focus", &error);
                    eprintln!("{}", end_failure_message());
                }
            },
            other => println!("\nUnknown command '{other}'"),
        }
    }

    renderer.abort();
    Ok(())
}

fn banner(app_name: &str) -> String {
    format!("{app_name} focus timer. Commands: [enter]/t start or pause, e end, r reset, q quit")
}

fn report(state: &AppState, command: &str, error: InfraError) -> InfraError {
    state.command_error(command, &error);
    error
}

fn print_state(response: &FocusStateResponse) {
    println!(
        "\n{}  {}  {}",
        response.clock,
        response.state,
        response.subject.as_deref().unwrap_or("")
    );
}

fn render_line(snapshot: &TimerSnapshot, ring_radius: f64) -> String {
    format!(
        "\r{}  {:<7}  ring {:>7.1}  {}",
        format_clock(snapshot.elapsed_seconds),
        snapshot.state.as_str(),
        ring_offset(snapshot.progress_fraction, ring_radius),
        snapshot.subject.as_deref().unwrap_or("")
    )
}

fn spawn_renderer(mut receiver: watch::Receiver<TimerSnapshot>, ring_radius: f64) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while receiver.changed().await.is_ok() {
            let line = render_line(&receiver.borrow_and_update(), ring_radius);
            if stdout.write_all(line.as_bytes()).await.is_err() || stdout.flush().await.is_err() {
                break;
            }
        }
    })
}

struct StdinConfirmer {
    input: SharedInput,
}

#[async_trait]
impl SessionCloseConfirmer for StdinConfirmer {
    async fn confirm_discard(&self, snapshot: &TimerSnapshot) -> bool {
        println!("\n{} elapsed.", format_clock(snapshot.elapsed_seconds));
        print!("{CLOSE_PROMPT}");
        let _ = std::io::stdout().flush();

        let mut lines = self.input.lock().await;
        match lines.next_line().await {
            Ok(Some(answer)) => is_affirmative(&answer),
            _ => false,
        }
    }
}

fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
