//! Key handling for the prompt surface.
//!
//! Terminal events are read on a blocking thread and handed over through a
//! bounded channel; [`handle_events`] drains a limited batch per frame and
//! forwards each key to the mode guard that matches the composer state.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use tokio::sync::mpsc;
use tracing::debug;

use promptq_engine::{App, ComposeModeAccess, ComposerMode, EditModeAccess, QueueFocusAccess};

const INPUT_POLL_TIMEOUT: Duration = Duration::from_millis(25); // shutdown responsiveness
const INPUT_CHANNEL_CAPACITY: usize = 1024; // bounded: no OOM
const MAX_EVENTS_PER_FRAME: usize = 64; // never starve rendering

/// Terminals without bracketed paste deliver a paste as a burst of key
/// events. While a burst is active, bare `Enter` inserts a newline instead of
/// submitting the half-pasted prompt.
const PASTE_INTER_KEY_THRESHOLD: Duration = Duration::from_millis(20);
const PASTE_IDLE_TIMEOUT: Duration = Duration::from_millis(75);
const PASTE_QUEUE_THRESHOLD: usize = 32;

fn normalize_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

enum InputMsg {
    Event(Event),
    Error(String),
}

#[derive(Debug)]
struct PasteDetector {
    last_key_time: Instant,
    active_until: Instant,
}

impl PasteDetector {
    fn new(now: Instant) -> Self {
        Self {
            last_key_time: now,
            active_until: now,
        }
    }

    fn reset(&mut self, now: Instant) {
        self.last_key_time = now;
        self.active_until = now;
    }

    fn update(&mut self, now: Instant, backlog: usize, event: &Event) -> bool {
        let is_key_event = matches!(
            event,
            Event::Key(KeyEvent {
                kind: KeyEventKind::Press | KeyEventKind::Repeat,
                ..
            })
        );

        let was_active = now < self.active_until;
        let backlog_high = backlog >= PASTE_QUEUE_THRESHOLD;
        let rapid =
            is_key_event && now.duration_since(self.last_key_time) < PASTE_INTER_KEY_THRESHOLD;
        let active = was_active || backlog_high || rapid;

        if is_key_event {
            if active {
                self.active_until = now + PASTE_IDLE_TIMEOUT;
            }
            self.last_key_time = now;
        }
        active
    }
}

pub struct InputPump {
    rx: mpsc::Receiver<InputMsg>,
    stop: Arc<AtomicBool>,
    join: Option<tokio::task::JoinHandle<()>>,
    paste: PasteDetector,
}

impl InputPump {
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(INPUT_CHANNEL_CAPACITY);
        let stop = Arc::new(AtomicBool::new(false));
        let stop2 = Arc::clone(&stop);

        let join = tokio::task::spawn_blocking(move || input_loop(&stop2, &tx));
        Self {
            rx,
            stop,
            join: Some(join),
            paste: PasteDetector::new(Instant::now()),
        }
    }

    pub async fn shutdown(&mut self) {
        // Close first so a thread blocked on a full channel wakes up.
        self.rx.close();

        self.stop.store(true, Ordering::Release);
        if let Some(join) = self.join.take() {
            let _ = tokio::time::timeout(Duration::from_secs(2), join).await;
        }
    }
}

impl Default for InputPump {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InputPump {
    fn drop(&mut self) {
        self.rx.close();
        self.stop.store(true, Ordering::Release);
    }
}

fn input_loop(stop: &AtomicBool, tx: &mpsc::Sender<InputMsg>) {
    while !stop.load(Ordering::Acquire) {
        match event::poll(INPUT_POLL_TIMEOUT) {
            Ok(true) => match event::read() {
                Ok(ev) => {
                    // Backpressure rather than drop: a large paste must arrive whole.
                    if tx.blocking_send(InputMsg::Event(ev)).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    let _ = tx.blocking_send(InputMsg::Error(e.to_string()));
                    break;
                }
            },
            Ok(false) => {}
            Err(e) => {
                let _ = tx.blocking_send(InputMsg::Error(e.to_string()));
                break;
            }
        }
    }
}

/// Apply pending terminal events. Returns `true` once the app wants to quit.
pub fn handle_events(app: &mut App, input: &mut InputPump) -> Result<bool> {
    let mut processed = 0;
    while processed < MAX_EVENTS_PER_FRAME {
        let ev = match input.rx.try_recv() {
            Ok(InputMsg::Event(ev)) => ev,
            Ok(InputMsg::Error(msg)) => return Err(anyhow!("input error: {msg}")),
            Err(mpsc::error::TryRecvError::Empty) => break,
            Err(mpsc::error::TryRecvError::Disconnected) => {
                return Err(anyhow!("input pump disconnected"));
            }
        };

        let now = Instant::now();
        let backlog = input.rx.len();
        let paste_active = if matches!(app.mode(), ComposerMode::Compose | ComposerMode::Edit) {
            input.paste.update(now, backlog, &ev)
        } else {
            input.paste.reset(now);
            false
        };
        if paste_active {
            debug!(backlog, "Input paste detection active");
        }

        if apply_event(app, ev, paste_active) {
            return Ok(true);
        }
        processed += 1;
    }
    Ok(app.should_quit())
}

/// Route one terminal event. Returns `true` once the app wants to quit.
pub fn apply_event(app: &mut App, event: Event, paste_active: bool) -> bool {
    match event {
        Event::Key(key) => {
            if matches!(key.kind, KeyEventKind::Release) {
                return app.should_quit();
            }

            let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
            if ctrl && key.code == KeyCode::Char('c') {
                app.request_quit();
                return true;
            }
            if ctrl && key.code == KeyCode::Char('o') {
                app.toggle_forced_offline();
                return app.should_quit();
            }

            match app.mode() {
                ComposerMode::Compose => handle_compose_mode(app, key, paste_active),
                ComposerMode::Queue => handle_queue_mode(app, key),
                ComposerMode::Edit => handle_edit_mode(app, key, paste_active),
            }
        }
        Event::Paste(text) => {
            let normalized = normalize_line_endings(&text);
            match app.mode() {
                ComposerMode::Compose => {
                    if let ComposeModeAccess::InCompose(mut compose) = app.compose_mode_mut() {
                        compose.enter_text(&normalized);
                    }
                }
                ComposerMode::Edit => {
                    if let EditModeAccess::InEdit(mut edit) = app.edit_mode_mut() {
                        edit.enter_text(&normalized);
                    }
                }
                ComposerMode::Queue => {}
            }
        }
        Event::FocusLost => {
            if let EditModeAccess::InEdit(edit) = app.edit_mode_mut() {
                edit.commit();
            }
        }
        _ => {}
    }
    app.should_quit()
}

/// Enter with Shift or Alt inserts a newline; some terminals only report Alt.
fn is_newline_chord(key: &KeyEvent) -> bool {
    key.modifiers
        .intersects(KeyModifiers::SHIFT | KeyModifiers::ALT)
}

fn handle_compose_mode(app: &mut App, key: KeyEvent, paste_active: bool) {
    match key.code {
        KeyCode::Esc => {
            app.request_quit();
            return;
        }
        KeyCode::Tab => {
            app.focus_queue();
            return;
        }
        _ => {}
    }

    let ComposeModeAccess::InCompose(mut compose) = app.compose_mode_mut() else {
        return;
    };
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);

    match key.code {
        KeyCode::Enter if paste_active || is_newline_chord(&key) => compose.enter_newline(),
        KeyCode::Enter => {
            compose.submit();
        }
        KeyCode::Char('j') if ctrl => compose.enter_newline(),
        KeyCode::Char('w') if ctrl => compose.delete_word_backwards(),
        KeyCode::Char('u') if ctrl => compose.clear_line(),
        KeyCode::Char('a') if ctrl => compose.reset_cursor(),
        KeyCode::Char('e') if ctrl => compose.move_cursor_end(),
        KeyCode::Char('r') if ctrl => {
            compose.recall_match();
        }
        KeyCode::Char('p') if ctrl => {
            compose.toggle_pin();
        }
        KeyCode::Char('t') if ctrl => {
            compose.toggle_template();
        }
        KeyCode::Char(c) if !ctrl => compose.enter_char(c),
        KeyCode::Backspace if key.modifiers.contains(KeyModifiers::ALT) => {
            compose.delete_word_backwards();
        }
        KeyCode::Backspace => compose.delete_char(),
        KeyCode::Delete => compose.delete_char_forward(),
        KeyCode::Left => compose.move_cursor_left(),
        KeyCode::Right => compose.move_cursor_right(),
        KeyCode::Home => compose.reset_cursor(),
        KeyCode::End => compose.move_cursor_end(),
        KeyCode::Up => compose.up(),
        KeyCode::Down => compose.down(),
        _ => {}
    }
}

fn handle_queue_mode(app: &mut App, key: KeyEvent) {
    let QueueFocusAccess::InQueue(mut focus) = app.queue_focus_mut() else {
        return;
    };
    match key.code {
        KeyCode::Tab | KeyCode::Esc => focus.leave(),
        KeyCode::Up | KeyCode::Char('k') => focus.move_up(),
        KeyCode::Down | KeyCode::Char('j') => focus.move_down(),
        KeyCode::Enter | KeyCode::Char('e') => focus.begin_edit(),
        KeyCode::Delete | KeyCode::Char('d') => focus.remove_selected(),
        KeyCode::Char('r') => focus.retry_selected(),
        _ => {}
    }
}

fn handle_edit_mode(app: &mut App, key: KeyEvent, paste_active: bool) {
    let EditModeAccess::InEdit(mut edit) = app.edit_mode_mut() else {
        return;
    };
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);

    match key.code {
        KeyCode::Esc => edit.cancel(),
        KeyCode::Enter if paste_active || is_newline_chord(&key) => edit.enter_newline(),
        KeyCode::Enter | KeyCode::Tab => edit.commit(),
        KeyCode::Char('w') if ctrl => edit.delete_word_backwards(),
        KeyCode::Char(c) if !ctrl => edit.enter_char(c),
        KeyCode::Backspace => edit.delete_char(),
        KeyCode::Delete => edit.delete_char_forward(),
        KeyCode::Left => edit.move_cursor_left(),
        KeyCode::Right => edit.move_cursor_right(),
        KeyCode::Up => edit.move_cursor_line_up(),
        KeyCode::Down => edit.move_cursor_line_down(),
        KeyCode::Home => edit.reset_cursor(),
        KeyCode::End => edit.move_cursor_end(),
        _ => {}
    }
}
