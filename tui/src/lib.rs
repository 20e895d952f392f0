//! TUI rendering for promptq using ratatui.
//!
//! Three stacked regions: the queue panel, the composer, and a one-line
//! status bar with the network indicator.

mod input;
mod theme;

pub use input::{InputPump, apply_event, handle_events};
pub use theme::{Glyphs, Palette, glyphs, palette, spinner_frame, styles};

use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, BorderType, Borders, Padding, Paragraph},
};
use unicode_width::UnicodeWidthStr;

use promptq_engine::{App, ComposerMode, EntryStatus, QueueEntry, QueueSnapshot};
use promptq_types::single_line_preview;
use promptq_types::ui::DraftInput;

const MAX_INPUT_LINES: u16 = 8;
const MAX_ERROR_PREVIEW: usize = 60;

/// Main draw function. `tick` drives the sending spinner.
pub fn draw(frame: &mut Frame, app: &App, tick: usize) {
    let options = app.options();
    let palette = palette(options);
    let glyphs = glyphs(options);
    let snapshot = app.snapshot();

    let bg_block = Block::default().style(Style::default().bg(palette.bg_dark));
    frame.render_widget(bg_block, frame.area());

    let editing_buffer = app.active_edit().map(|(_, buffer)| buffer);
    let visible = editing_buffer.unwrap_or_else(|| app.draft());
    let line_count = visible.text().split('\n').count() as u16;
    let input_height = line_count.clamp(1, MAX_INPUT_LINES) + 2;

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(3),               // Queue
            Constraint::Length(input_height), // Composer
            Constraint::Length(1),            // Status bar
        ])
        .split(frame.area());

    draw_queue(frame, app, &snapshot, chunks[0], &palette, &glyphs, tick);
    draw_input(frame, app, chunks[1], &palette);
    draw_status_bar(frame, app, &snapshot, chunks[2], &palette, &glyphs);
}

fn status_badge(
    entry: &QueueEntry,
    snapshot: &QueueSnapshot,
    glyphs: &Glyphs,
    tick: usize,
    app: &App,
) -> String {
    let attempts = if entry.attempts > 1 {
        format!(" x{}", entry.attempts)
    } else {
        String::new()
    };
    match entry.status {
        EntryStatus::Pending if snapshot.editing.as_ref() == Some(&entry.id) => {
            format!("{} editing", glyphs.editing)
        }
        EntryStatus::Pending => format!("{} pending", glyphs.pending),
        EntryStatus::Sending => format!(
            "{} sending{attempts}",
            spinner_frame(tick, app.options())
        ),
        EntryStatus::Sent => format!("{} sent", glyphs.sent),
        EntryStatus::Failed if snapshot.is_parked(&entry.id) => {
            format!("{} failed{attempts}", glyphs.parked)
        }
        EntryStatus::Failed => format!("{} failed{attempts}", glyphs.failed),
    }
}

fn draw_queue(
    frame: &mut Frame,
    app: &App,
    snapshot: &QueueSnapshot,
    area: Rect,
    palette: &Palette,
    glyphs: &Glyphs,
    tick: usize,
) {
    let focused = matches!(app.mode(), ComposerMode::Queue | ComposerMode::Edit);
    let border_style = if focused {
        Style::default().fg(palette.primary)
    } else {
        Style::default().fg(palette.bg_border)
    };
    let title = format!(
        " Queue ({}) · History ({}) ",
        snapshot.queue.len(),
        snapshot.history.len()
    );
    let block = Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(border_style)
        .style(Style::default().bg(palette.bg_panel))
        .padding(Padding::horizontal(1))
        .title(Span::styled(
            title,
            Style::default()
                .fg(palette.text_primary)
                .add_modifier(Modifier::BOLD),
        ));

    let inner_width = area.width.saturating_sub(4) as usize;
    let selected = app.selected_row();
    let mut lines: Vec<Line> = Vec::new();

    if snapshot.queue.is_empty() {
        lines.push(Line::from(Span::styled(
            "Nothing queued. Type a prompt and press Enter.",
            Style::default().fg(palette.text_muted),
        )));
    }

    for (idx, entry) in snapshot.queue.iter().enumerate() {
        let is_selected = focused && selected == Some(idx);
        let marker = if is_selected { glyphs.selected } else { " " };
        let badge = status_badge(entry, snapshot, glyphs, tick, app);
        let used = marker.width() + badge.width() + 3;
        let preview =
            single_line_preview(&entry.content, inner_width.saturating_sub(used).max(8));

        let row_style = if is_selected {
            Style::default().bg(palette.bg_highlight)
        } else {
            Style::default()
        };
        lines.push(
            Line::from(vec![
                Span::styled(format!("{marker} "), Style::default().fg(palette.primary)),
                Span::styled(
                    format!("{badge:<12}"),
                    Style::default().fg(palette.status_color(entry.status)),
                ),
                Span::raw(" "),
                Span::styled(preview, Style::default().fg(palette.text_primary)),
            ])
            .style(row_style),
        );

        if entry.status == EntryStatus::Failed
            && let Some(err) = entry.last_error.as_deref()
        {
            lines.push(Line::from(Span::styled(
                format!(
                    "    {}",
                    single_line_preview(err, MAX_ERROR_PREVIEW.min(inner_width.max(8)))
                ),
                Style::default().fg(palette.error),
            )));
        }
    }

    frame.render_widget(Paragraph::new(lines).block(block), area);
}

/// Cursor cell for `draft` relative to the text origin, plus the first
/// visible line when the draft is taller than `height`.
fn cursor_cell(draft: &DraftInput, height: u16) -> (u16, u16, u16) {
    let text = draft.text();
    let byte = draft.byte_index();
    let (line, _) = draft.line_and_column();
    let line_start = text[..byte].rfind('\n').map_or(0, |i| i + 1);
    let x = text[line_start..byte].width() as u16;
    let line = line as u16;
    let scroll = line.saturating_sub(height.saturating_sub(1));
    (x, line - scroll, scroll)
}

fn draw_input(frame: &mut Frame, app: &App, area: Rect, palette: &Palette) {
    let mode = app.mode();
    let (label, label_style, border_color) = match mode {
        ComposerMode::Compose => ("COMPOSE", styles::mode_compose(palette), palette.success),
        ComposerMode::Queue => ("QUEUE", styles::mode_queue(palette), palette.bg_border),
        ComposerMode::Edit => ("EDIT", styles::mode_edit(palette), palette.warning),
    };

    let hints: Vec<Span> = match mode {
        ComposerMode::Compose => vec![
            Span::styled("Enter", styles::key_highlight(palette)),
            Span::styled(" queue  ", styles::key_hint(palette)),
            Span::styled("Shift+Enter", styles::key_highlight(palette)),
            Span::styled(" newline  ", styles::key_hint(palette)),
            Span::styled("Ctrl+R", styles::key_highlight(palette)),
            Span::styled(" recall  ", styles::key_hint(palette)),
            Span::styled("Tab", styles::key_highlight(palette)),
            Span::styled(" queue panel ", styles::key_hint(palette)),
        ],
        ComposerMode::Queue => vec![
            Span::styled("e", styles::key_highlight(palette)),
            Span::styled(" edit  ", styles::key_hint(palette)),
            Span::styled("d", styles::key_highlight(palette)),
            Span::styled(" remove  ", styles::key_hint(palette)),
            Span::styled("r", styles::key_highlight(palette)),
            Span::styled(" retry  ", styles::key_hint(palette)),
            Span::styled("Tab", styles::key_highlight(palette)),
            Span::styled(" back ", styles::key_hint(palette)),
        ],
        ComposerMode::Edit => vec![
            Span::styled("Enter", styles::key_highlight(palette)),
            Span::styled(" save  ", styles::key_hint(palette)),
            Span::styled("Esc", styles::key_highlight(palette)),
            Span::styled(" revert ", styles::key_hint(palette)),
        ],
    };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(Style::default().fg(border_color))
        .style(Style::default().bg(palette.bg_panel))
        .title(Span::styled(format!(" {label} "), label_style))
        .title_bottom(Line::from(hints).right_aligned());

    let buffer = app.active_edit().map(|(_, b)| b).unwrap_or_else(|| app.draft());
    let inner_height = area.height.saturating_sub(2).max(1);
    let (cx, cy, scroll) = cursor_cell(buffer, inner_height);

    let lines: Vec<Line> = buffer
        .text()
        .split('\n')
        .map(|l| {
            Line::from(Span::styled(
                l.to_string(),
                Style::default().fg(palette.text_primary),
            ))
        })
        .collect();
    frame.render_widget(
        Paragraph::new(lines).block(block).scroll((scroll, 0)),
        area,
    );

    if mode != ComposerMode::Queue {
        let max_x = area.width.saturating_sub(2);
        frame.set_cursor_position((area.x + 1 + cx.min(max_x), area.y + 1 + cy));
    }
}

fn draw_status_bar(
    frame: &mut Frame,
    app: &App,
    snapshot: &QueueSnapshot,
    area: Rect,
    palette: &Palette,
    glyphs: &Glyphs,
) {
    let (net_glyph, net_label, net_color) = if snapshot.disabled {
        (glyphs.paused, "paused", palette.warning)
    } else if app.queue().network().is_forced_offline() {
        (glyphs.offline, "offline (forced)", palette.warning)
    } else if snapshot.online {
        (glyphs.online, "online", palette.success)
    } else {
        (glyphs.offline, "offline", palette.error)
    };

    let mut spans = vec![
        Span::raw(" "),
        Span::styled(
            format!("{net_glyph} {net_label}"),
            Style::default().fg(net_color),
        ),
    ];
    if !snapshot.persistent {
        spans.push(Span::styled(
            " │ not saved",
            Style::default().fg(palette.warning),
        ));
    }
    if let Some(msg) = app.status_message() {
        spans.push(Span::styled(
            format!(" │ {msg}"),
            Style::default().fg(palette.text_secondary),
        ));
    }
    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}
