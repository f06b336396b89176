use std::{path::PathBuf, sync::Arc};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    load_settings, BoardEvent, BoardSession, BoardStore, ClientSettings, HttpWorkflowApi,
    MoveProposal, Notification, Notifier, PhaseTransitions, TransportKind, WorkflowApi,
};
use shared::{
    domain::{BoardItemId, CandidateId, Decision, Phase},
    protocol::Board,
};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Interview pipeline board client")]
struct Args {
    /// Settings file; defaults to ./pipeline.toml when present.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    server_url: Option<String>,
    #[arg(long)]
    transport: Option<TransportKind>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the current board.
    Show {
        /// Dump the raw snapshot as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Follow live updates until interrupted.
    Watch,
    /// Move a candidate to another phase.
    Move {
        /// Board item id (`item-1`) or candidate id (`cand-1`).
        candidate: String,
        /// Target phase; defaults to the next one.
        #[arg(long)]
        to: Option<Phase>,
        /// `passed` or `failed`.
        #[arg(long)]
        decision: Decision,
        #[arg(long)]
        score: Option<i32>,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Print workflow metrics.
    Metrics,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();

    let mut settings = load_settings(args.config.as_deref())?;
    if let Some(server_url) = args.server_url {
        settings.server_url = server_url;
    }
    if let Some(transport) = args.transport {
        settings.transport = transport;
    }

    match args.command {
        Command::Show { json } => show(&settings, json).await,
        Command::Watch => watch(&settings).await,
        Command::Move {
            candidate,
            to,
            decision,
            score,
            notes,
        } => move_candidate(&settings, &candidate, to, decision, score, notes).await,
        Command::Metrics => metrics(&settings).await,
    }
}

fn print_board(board: &Board) {
    for column in &board.columns {
        println!("{} ({})", column.title, column.candidates.len());
        for candidate in &column.candidates {
            let score = candidate
                .ai_score
                .map(|score| format!(" ai:{score}"))
                .unwrap_or_default();
            println!(
                "  {:<8} {:<20} {:>3}d{score}  {}",
                candidate.id, candidate.name, candidate.days_in_phase, candidate.position
            );
        }
    }
}

fn print_notification(notification: &Notification) {
    println!("[{:?}] {}", notification.level, notification.message);
}

async fn show(settings: &ClientSettings, json: bool) -> Result<()> {
    let api = Arc::new(HttpWorkflowApi::new(&settings.server_url)?);
    let store = BoardStore::new(api, settings.snapshot_failure);
    let snapshot = store.load_snapshot().await;
    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot.board)?);
        return Ok(());
    }
    if let Some(error) = &snapshot.error {
        eprintln!("showing {:?} board: {error}", snapshot.origin);
    }
    print_board(&snapshot.board);
    Ok(())
}

async fn watch(settings: &ClientSettings) -> Result<()> {
    let session = BoardSession::from_settings(settings)?;
    let mut events = session.subscribe_events();
    let first = session.start().await;
    print_board(&first.board);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(BoardEvent::Notification(notification)) => print_notification(&notification),
                Ok(BoardEvent::ConnectionChanged(status)) => println!(
                    "connection: {:?} (attempts {})",
                    status.state, status.reconnect_attempts
                ),
                Ok(BoardEvent::SnapshotReplaced(snapshot)) => {
                    println!("-- revision {} --", snapshot.revision);
                    print_board(&snapshot.board);
                }
                Err(RecvError::Lagged(skipped)) => tracing::warn!(skipped, "missed board events"),
                Err(RecvError::Closed) => break,
            },
        }
    }
    session.shutdown();
    Ok(())
}

async fn move_candidate(
    settings: &ClientSettings,
    reference: &str,
    to: Option<Phase>,
    decision: Decision,
    score: Option<i32>,
    notes: Option<String>,
) -> Result<()> {
    let api: Arc<dyn WorkflowApi> = Arc::new(HttpWorkflowApi::new(&settings.server_url)?);
    let store = BoardStore::new(api.clone(), settings.snapshot_failure);
    let snapshot = store.load_snapshot().await;
    if !snapshot.is_live() {
        bail!(
            "board unavailable: {}",
            snapshot.error.as_deref().unwrap_or("no live snapshot")
        );
    }

    let board = &snapshot.board;
    let candidate = board
        .candidate(&BoardItemId::new(reference))
        .or_else(|| board.candidate_by_candidate_id(&CandidateId::new(reference)))
        .with_context(|| format!("no candidate '{reference}' on the board"))?;
    let proposal = match to {
        Some(phase) => MoveProposal::new(candidate, candidate.current_phase, phase)?,
        None => MoveProposal::to_next_phase(candidate)?,
    };
    let item_id = proposal.item_id.clone();
    let to_phase = proposal.to_phase;

    let notifier = Notifier::new(16);
    let mut notifications = notifier.subscribe();
    let transitions = PhaseTransitions::new(api, store, notifier);
    transitions.propose(proposal)?;
    transitions.edit_form(&item_id, |form| {
        form.decision = Some(decision);
        form.score = score;
        form.notes = notes;
    })?;
    transitions.confirm(&item_id).await?;

    while let Ok(event) = notifications.try_recv() {
        if let BoardEvent::Notification(notification) = event {
            print_notification(&notification);
        }
    }
    println!("{} moved to {}", candidate.name, to_phase.label());
    Ok(())
}

async fn metrics(settings: &ClientSettings) -> Result<()> {
    let api = HttpWorkflowApi::new(&settings.server_url)?;
    let metrics = api.fetch_metrics().await?;
    println!("total candidates: {}", metrics.total_candidates);
    for phase in &metrics.phases {
        println!(
            "  {:<20} {:>3} candidates, {:.1} days avg",
            phase.phase_id.label(),
            phase.candidate_count,
            phase.average_days_in_phase
        );
    }
    Ok(())
}
