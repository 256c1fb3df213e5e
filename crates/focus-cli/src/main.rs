//! # focus-cli
//!
//! Follows one focus session live: loads the REST baseline, keeps the
//! socket open, and logs task, cycle, and leaderboard changes until ctrl-c.

#![deny(unsafe_code)]

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use focus_core::ids::{SessionId, UserId};
use focus_settings::FocusSettings;
use focus_sync::api::{HttpSessionApi, SessionApi};
use focus_sync::bus::SyncNotice;
use focus_sync::reconciler::MutationKind;
use focus_sync::runtime::{SyncConsumer, SyncRuntime};
use focus_sync::selectors::{
    select_current_cycle, select_leaderboard, select_session_stats, select_task_counts,
};
use focus_sync::store::SessionState;
use parking_lot::Mutex;
use tokio::sync::broadcast;

/// Live focus-session client.
#[derive(Parser, Debug)]
#[command(name = "focus-sync", about = "Follow a focus session in real time")]
struct Cli {
    /// Session to follow.
    session_id: String,

    /// The local user's id (owner of tasks added from here).
    #[arg(long)]
    user: String,

    /// Settings file (defaults to `~/.focus-sync/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log filter, overriding the settings file.
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON log lines.
    #[arg(long)]
    json_logs: bool,

    /// Tasks to add once connected.
    #[arg(long = "add-task", value_name = "TITLE")]
    add_tasks: Vec<String>,

    /// Complete the session on ctrl-c and print the report.
    #[arg(long)]
    complete: bool,
}

fn load_settings(path: Option<&Path>) -> Result<FocusSettings> {
    let path = path.map_or_else(focus_settings::settings_path, Path::to_path_buf);
    focus_settings::load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))
}

fn init_logging(args: &Cli, settings: &FocusSettings) {
    let level = args.log_level.as_deref().unwrap_or(&settings.logging.level);
    if args.json_logs || settings.logging.json {
        focus_core::logging::init_json_subscriber(level);
    } else {
        focus_core::logging::init_subscriber(level);
    }
}

/// What the log line cares about; a change in any of these is reported.
#[derive(Clone, Debug, PartialEq, Eq)]
struct Digest {
    cycle: u32,
    completed: u32,
    total: u32,
    pending: usize,
    leader: Option<(String, i64)>,
}

impl Digest {
    /// Replace `self` with `next`; true when they differed.
    fn changed_to(&mut self, next: &Self) -> bool {
        if self == next {
            return false;
        }
        *self = next.clone();
        true
    }

    fn of(state: &SessionState) -> Self {
        let counts = select_task_counts(state);
        Self {
            cycle: select_current_cycle(state),
            completed: counts.completed,
            total: counts.total,
            pending: state.pending_mutations,
            leader: select_leaderboard(state)
                .first()
                .map(|e| (e.user_name.clone(), e.score)),
        }
    }
}

fn watch_changes(consumer: &SyncConsumer) {
    let last = Mutex::new(Digest::of(&consumer.snapshot()));
    let _ = consumer.subscribe(move |state| {
        let digest = Digest::of(state);
        if last.lock().changed_to(&digest) {
            tracing::info!(
                cycle = digest.cycle,
                completed = digest.completed,
                total = digest.total,
                pending = digest.pending,
                leader = ?digest.leader,
                "session updated"
            );
        }
    });
}

async fn log_notices(mut rx: broadcast::Receiver<SyncNotice>) {
    loop {
        match rx.recv().await {
            Ok(notice) => tracing::warn!(kind = notice.name(), "{}", notice.message()),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!(skipped = n, "notice receiver lagged");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let settings = load_settings(args.settings.as_deref())?;
    init_logging(&args, &settings);

    let session_id = SessionId::from(args.session_id.as_str());
    let api = HttpSessionApi::from_settings(&settings.api).context("Failed to build API client")?;
    let runtime = SyncRuntime::new(&settings, UserId::from(args.user.as_str()))
        .context("Failed to start sync runtime")?;

    runtime
        .load_session(&api, &session_id)
        .await
        .with_context(|| format!("Failed to load session {session_id}"))?;

    let consumer = runtime.acquire().context("Failed to connect")?;
    watch_changes(&consumer);
    let notices = tokio::spawn(log_notices(consumer.notices()));

    for title in &args.add_tasks {
        match consumer.dispatch_mutation(MutationKind::AddTask { title: title.clone() }) {
            Ok(id) => tracing::info!(mutation_id = %id, %title, "task submitted"),
            Err(e) => tracing::warn!(error = %e, %title, "task not submitted"),
        }
    }

    tracing::info!(url = runtime.ws_url(), session_id = %session_id, "following session");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    if args.complete {
        let report = api
            .complete_session(&session_id)
            .await
            .context("Failed to complete session")?;
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        let stats = consumer.select(select_session_stats);
        println!("{}", serde_json::to_string_pretty(&stats)?);
    }

    drop(consumer);
    runtime.shutdown().await;
    notices.abort();

    tracing::info!("Shutdown complete");
    Ok(())
}
