//! promptq CLI - binary entry point and terminal session management.
//!
//! # Architecture
//!
//! The CLI wires configuration into the engine ([`promptq_engine`]) and hands
//! the resulting [`App`] to the renderer ([`promptq_tui`]):
//!
//! ```text
//! main() -> build_app(config) -> TerminalSession::new() -> run_app() -> App + TUI
//!              |
//!              +-- DraftStore (session file)
//!              +-- NetworkMonitor (+ optional TCP probe)
//!              +-- QueueManager (HttpPromptSender)
//!              +-- HistorySync (optional)
//! ```
//!
//! # Event Loop
//!
//! A fixed 8ms render cadence:
//!
//! 1. Wait for frame tick
//! 2. Drain input queue (non-blocking via [`promptq_tui::InputPump`])
//! 3. Advance application state (`app.tick()`)
//! 4. Render frame

mod crash_hardening;

use anyhow::Result;
use clap::Parser;
use crossterm::{
    event::{DisableBracketedPaste, DisableFocusChange, EnableBracketedPaste, EnableFocusChange},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::prelude::*;
use std::{
    fs::{self, OpenOptions},
    io::{Stdout, stdout},
    path::PathBuf,
    sync::Mutex,
    time::Duration,
};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use promptq_config::{BackendConfig, PromptqConfig, promptq_home};
use promptq_engine::{
    App, HistorySync, HttpPromptSender, NetworkMonitor, OutboundPrompt, ProbeGuard, ProbeTarget,
    QueueManager, QueueOptions, RetryPolicy, SendError, SyncGuard, UiOptions,
};
use promptq_store::DraftStore;
use promptq_tui::{InputPump, draw, handle_events};

const FRAME_DURATION: Duration = Duration::from_millis(8);
const SYNC_DEBOUNCE: Duration = Duration::from_secs(2);

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (log_file, init_warnings) = open_log_file();

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    // Writing to stderr would corrupt the TUI, so run without logs instead.
    tracing_subscriber::registry().with(env_filter).init();
}

fn open_log_file() -> (Option<(PathBuf, fs::File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in log_file_candidates() {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "Failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new()
            .create(true)
            .append(true)
            .open(&candidate)
        {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => warnings.push(format!(
                "Failed to open log file {}: {e}",
                candidate.display()
            )),
        }
    }

    (None, warnings)
}

fn log_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    // Primary: ~/.promptq/logs/promptq.log
    if let Some(home) = promptq_home() {
        candidates.push(home.join("logs").join("promptq.log"));
    }

    // Fallback: ./.promptq/logs/promptq.log
    candidates.push(PathBuf::from(".promptq").join("logs").join("promptq.log"));

    candidates
}

/// Offline-tolerant prompt composer and delivery queue.
#[derive(Parser, Debug)]
#[command(name = "promptq", version, about)]
struct Cli {
    /// Session to open. Remembered as the default for later runs.
    #[arg(long, value_name = "NAME")]
    session: Option<String>,
}

impl Cli {
    fn session(&self) -> Option<&str> {
        self.session.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }
}

/// Background tasks that must outlive the event loop.
struct Services {
    _probe: Option<ProbeGuard>,
    _sync: Option<SyncGuard>,
}

fn build_app(config: &PromptqConfig, session: &str) -> (App, Services) {
    let queue_config = config.queue();
    let store = match promptq_home() {
        Some(home) => {
            DraftStore::open(&home.join("sessions"), session, queue_config.history_limit)
        }
        None => {
            tracing::warn!("No home directory; drafts and queue will not persist");
            DraftStore::in_memory(queue_config.history_limit)
        }
    };

    let default_backend = BackendConfig::default();
    let backend = config.backend.as_ref().unwrap_or(&default_backend);
    let backend_url = config.backend_url();
    let api_key = backend.resolved_api_key();
    let timeout = backend.request_timeout();

    let network = NetworkMonitor::new(true);
    let network_config = config.network();
    let probe = match backend_url.as_deref().and_then(ProbeTarget::from_url) {
        Some(target) if network_config.probe => {
            Some(network.spawn_probe(target, network_config.probe_interval()))
        }
        _ => None,
    };

    let mut options = QueueOptions {
        dispatch_delay: queue_config.dispatch_delay(),
        retry: RetryPolicy::from_config(&config.retry()),
        session_id: backend.session_id.clone(),
        start_disabled: false,
    };

    let mut notice = None;
    let sender = match backend_url.as_deref() {
        Some(url) => {
            match HttpPromptSender::new(url, api_key.clone(), backend.session_id.clone(), timeout)
            {
                Ok(sender) => Some(sender),
                Err(e) => {
                    tracing::error!(error = %e, "Invalid backend configuration");
                    notice = Some(format!("Backend unavailable: {e}"));
                    None
                }
            }
        }
        None => {
            notice = Some("No backend configured; prompts stay queued".to_string());
            None
        }
    };

    let queue = match sender {
        Some(sender) => QueueManager::start(store, sender, network, options),
        None => {
            options.start_disabled = true;
            let unconfigured = |_prompt: OutboundPrompt| {
                std::future::ready(Err::<(), _>(SendError::msg("no backend configured")))
            };
            QueueManager::start(store, unconfigured, network, options)
        }
    };

    let sync_config = config.sync.clone().unwrap_or_default();
    let sync = match (backend_url.as_deref(), sync_config.spec_task_id.as_deref()) {
        (Some(url), Some(spec_task_id)) if sync_config.is_enabled() => {
            match HistorySync::new(
                url,
                api_key,
                sync_config.project_id.clone(),
                spec_task_id,
                timeout,
            ) {
                Ok(sync) => Some(sync.spawn(queue.clone(), SYNC_DEBOUNCE)),
                Err(e) => {
                    tracing::warn!(error = %e, "History sync disabled");
                    None
                }
            }
        }
        _ => None,
    };

    let ui = config.app.as_ref().map_or_else(UiOptions::default, |app| UiOptions {
        ascii_only: app.ascii_only,
        high_contrast: app.high_contrast,
    });
    let mut app = App::new(queue, ui);
    app.set_notice(notice);

    (
        app,
        Services {
            _probe: probe,
            _sync: sync,
        },
    )
}

/// RAII wrapper for terminal state with guaranteed cleanup on drop.
///
/// Enables raw mode, bracketed paste, and the alternate screen. On drop the
/// terminal is restored even after panics or early returns.
struct TerminalSession {
    terminal: Terminal<CrosstermBackend<Stdout>>,
}

impl TerminalSession {
    fn new() -> Result<Self> {
        enable_raw_mode()?;

        let mut out = stdout();
        if let Err(err) = execute!(
            out,
            EnableBracketedPaste,
            EnableFocusChange,
            EnterAlternateScreen
        ) {
            let _ = disable_raw_mode();
            let _ = execute!(
                out,
                LeaveAlternateScreen,
                DisableFocusChange,
                DisableBracketedPaste
            );
            return Err(err.into());
        }

        match Terminal::new(CrosstermBackend::new(out)) {
            Ok(terminal) => Ok(Self { terminal }),
            Err(err) => {
                let _ = disable_raw_mode();
                let _ = execute!(
                    stdout(),
                    LeaveAlternateScreen,
                    DisableFocusChange,
                    DisableBracketedPaste
                );
                Err(err.into())
            }
        }
    }
}

impl Drop for TerminalSession {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(
            self.terminal.backend_mut(),
            LeaveAlternateScreen,
            DisableFocusChange,
            DisableBracketedPaste
        );
        let _ = self.terminal.show_cursor();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();
    if let Err(e) = crash_hardening::apply() {
        tracing::warn!(error = %e, "Crash hardening unavailable");
    }

    let config = match PromptqConfig::load() {
        Ok(config) => config.unwrap_or_default(),
        Err(e) => {
            eprintln!("Warning: {e}; using defaults");
            PromptqConfig::default()
        }
    };

    let session = match cli.session() {
        Some(session) => {
            if let Err(e) = PromptqConfig::persist_session(session) {
                tracing::warn!(error = %e, "Failed to remember session");
            }
            session.to_owned()
        }
        None => config.session(),
    };
    tracing::info!(session = %session, "Starting promptq");

    let (mut app, services) = build_app(&config, &session);

    let run_result = {
        let mut session = TerminalSession::new()?;
        run_app(&mut session.terminal, &mut app).await
    };

    app.flush_draft();
    drop(services);

    if let Err(err) = run_result {
        eprintln!("Error: {err:?}");
    }
    Ok(())
}

async fn run_app<B>(terminal: &mut Terminal<B>, app: &mut App) -> Result<()>
where
    B: Backend,
    B::Error: Send + Sync + 'static,
{
    let mut input = InputPump::new();
    let mut frames = tokio::time::interval(FRAME_DURATION);
    frames.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut tick: usize = 0;

    let result: Result<()> = loop {
        frames.tick().await;

        let quit_now = match handle_events(app, &mut input) {
            Ok(q) => q,
            Err(e) => break Err(e),
        };
        if quit_now {
            break Ok(());
        }

        app.tick();
        tick = tick.wrapping_add(1);

        if let Err(e) = terminal.draw(|frame| draw(frame, app, tick / 10)) {
            break Err(e.into());
        }
    };

    input.shutdown().await;
    result
}
