use std::io::{self, BufRead, IsTerminal, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use clap::Parser;
use tree_translator_rust::{CheckpointState, ResumeChoice};

/// Set while the resume prompt blocks on stdin.
static PROMPTING: AtomicBool = AtomicBool::new(false);

#[derive(Parser, Debug)]
#[command(
    name = "tree-translator-rust",
    version,
    about = "Translate nested JSON message files in resumable batches"
)]
struct Cli {
    /// Target languages, comma separated (default: [system] languages)
    #[arg(short = 'l', long = "lang", value_delimiter = ',')]
    lang: Vec<String>,

    /// Skip translation and merge existing batch files
    #[arg(long = "merge-only", conflicts_with = "clear_state")]
    merge_only: bool,

    /// Discard in-progress checkpoints and exit
    #[arg(long = "clear-state")]
    clear_state: bool,

    /// Resume an existing checkpoint without asking
    #[arg(long = "resume", conflicts_with = "restart")]
    resume: bool,

    /// Discard an existing checkpoint without asking
    #[arg(long = "restart")]
    restart: bool,

    /// Strings per batch (overrides [system] batch_size)
    #[arg(short = 'b', long = "batch-size")]
    batch_size: Option<usize>,

    /// Seconds allowed per backend call (overrides [system] timeout_secs)
    #[arg(short = 't', long = "timeout")]
    timeout: Option<u64>,

    /// Read extra settings from a local TOML file
    #[arg(short = 'r', long = "read-settings")]
    read_settings: Option<String>,

    /// Transliterate every string of FILE in place and exit
    #[arg(long = "transliterate", value_name = "FILE")]
    transliterate: Option<String>,

    /// Script for --transliterate (default: sr-latin)
    #[arg(long = "script", requires = "transliterate")]
    script: Option<String>,

    /// Enable verbose logging
    #[arg(long = "verbose")]
    verbose: bool,

    /// Append logs to a file instead of stderr
    #[arg(long = "log-file")]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    tree_translator_rust::logging::init(cli.verbose, cli.log_file.as_deref())?;

    let (handle, interrupt) = tree_translator_rust::interrupt_channel();
    tokio::spawn(async move {
        wait_for_shutdown().await;
        tracing::warn!("interrupt received, saving progress");
        handle.trigger();
        if PROMPTING.load(Ordering::SeqCst) {
            // The checkpoint being asked about is still untouched.
            eprintln!();
            std::process::exit(130);
        }
    });

    let forced = if cli.resume {
        Some(ResumeChoice::Resume)
    } else if cli.restart {
        Some(ResumeChoice::Restart)
    } else {
        None
    };
    let mut decide = move |state: &CheckpointState| forced.unwrap_or_else(|| ask_resume(state));

    let execution = tree_translator_rust::run(
        tree_translator_rust::Config {
            languages: cli.lang,
            merge_only: cli.merge_only,
            clear_state: cli.clear_state,
            batch_size: cli.batch_size,
            timeout_secs: cli.timeout,
            settings_path: cli.read_settings,
            transliterate_file: cli.transliterate,
            script: cli.script,
        },
        interrupt,
        &mut decide,
    )
    .await?;

    if !execution.report.is_empty() {
        println!("{}", execution.report);
    }
    if execution.interrupted {
        return Ok(ExitCode::from(130));
    }
    Ok(if execution.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn ask_resume(state: &CheckpointState) -> ResumeChoice {
    if !io::stdin().is_terminal() {
        return ResumeChoice::Resume;
    }
    eprintln!(
        "Found a checkpoint for '{}' ({}): {}/{} batches completed, {} failed, last update {}",
        state.target_language,
        state.language_pair,
        state.completed_batches.len(),
        state.total_batches,
        state.failed_batches.len(),
        state.last_updated_at
    );
    eprint!("Resume? [Y/n] ");
    let _ = io::stderr().flush();
    let mut line = String::new();
    PROMPTING.store(true, Ordering::SeqCst);
    let read = io::stdin().lock().read_line(&mut line);
    PROMPTING.store(false, Ordering::SeqCst);
    if read.is_err() {
        return ResumeChoice::Resume;
    }
    parse_answer(&line)
}

fn parse_answer(line: &str) -> ResumeChoice {
    match line.trim().to_lowercase().as_str() {
        "n" | "no" | "r" | "restart" => ResumeChoice::Restart,
        _ => ResumeChoice::Resume,
    }
}

#[cfg(unix)]
async fn wait_for_shutdown() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = wait_for_ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(_) => wait_for_ctrl_c().await,
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown() {
    wait_for_ctrl_c().await
}

async fn wait_for_ctrl_c() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}
