use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Wrap},
};

use kiosk_core::types::OrchestratorState;
use crate::app::lock;
use crate::App;

fn key_hint(key: &str) -> Span<'_> {
    Span::styled(key, Style::default().fg(Color::Yellow))
}

pub fn draw(f: &mut Frame, app: &App) {
    let chunks = if app.log_visible {
        Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
            .split(f.area())
    } else {
        Layout::default()
            .constraints([Constraint::Percentage(100)])
            .split(f.area())
    };

    // -- Left panel: slots --

    let (banner_label, banner_bg) = match *lock(&app.orch_state) {
        OrchestratorState::Running => ("RUNNING (Press S to pause)", Color::Green),
        OrchestratorState::Paused => ("PAUSED (Press S to resume)", Color::Yellow),
        OrchestratorState::Stopped => ("STOPPED", Color::Red),
    };

    let mut lines: Vec<Line> = vec![
        Line::from(vec![
            Span::raw(" "),
            key_hint("j"),
            Span::raw("/"),
            key_hint("k"),
            Span::raw(" select, "),
            key_hint("r"),
            Span::raw(" relaunch, "),
            key_hint("c"),
            Span::raw(" reload config, "),
            key_hint("l"),
            Span::raw(" logs, "),
            key_hint("q"),
            Span::raw(" quit"),
        ]),
        Line::from(""),
    ];

    {
        let status = lock(&app.status);

        let monitor_color = if status.monitors.len() == status.expected_monitors { Color::Cyan } else { Color::Red };
        let mut summary = vec![
            Span::styled(
                format!(" monitors {}/{}", status.monitors.len(), status.expected_monitors),
                Style::default().fg(monitor_color),
            ),
            Span::styled(format!("  passes {}", status.ticks), Style::default().fg(Color::DarkGray)),
        ];
        if let Some(at) = status.last_tick {
            summary.push(Span::styled(format!("  last {}", at.format("%H:%M:%S")), Style::default().fg(Color::DarkGray)));
        }
        lines.push(Line::from(summary));
        lines.push(Line::from(""));

        for (i, slot) in status.slots.iter().enumerate() {
            let prefix = if i == app.selected { "> " } else { "  " };
            let (marker, marker_color) = match slot.handle {
                Some(_) => ("[●]", banner_bg),
                None => ("[ ]", Color::DarkGray),
            };
            let monitor = slot.monitor.map_or_else(|| "-".to_string(), |m| m.to_string());

            lines.push(Line::from(vec![
                Span::raw(prefix),
                Span::styled(marker, Style::default().fg(marker_color)),
                Span::styled(format!(" {} ", monitor), Style::default().fg(Color::Yellow)),
                Span::styled(slot.url.clone(), Style::default().fg(Color::White).add_modifier(Modifier::BOLD)),
            ]));

            let handle = slot.handle.map_or_else(|| "no window".to_string(), |h| format!("#{}", h));
            let mut detail = vec![
                Span::styled(format!("      {}", handle), Style::default().fg(Color::DarkGray)),
                Span::styled(format!("  tick {}", slot.tick), Style::default().fg(Color::Cyan)),
            ];
            if slot.nudges > 0 {
                detail.push(Span::styled(format!("  nudged {}x", slot.nudges), Style::default().fg(Color::Yellow)));
            }
            lines.push(Line::from(detail));
        }

        if let Some(err) = &status.error {
            lines.push(Line::from(""));
            lines.push(Line::from(Span::styled(format!(" error: {}", err), Style::default().fg(Color::Red))));
        }
    }

    let left_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(1), Constraint::Min(0)])
        .split(chunks[0]);

    let banner_width = left_chunks[0].width as usize;
    let pad_total = banner_width.saturating_sub(banner_label.len());
    let pad_left = pad_total / 2;
    let centered_banner = format!("{}{}{}", " ".repeat(pad_left), banner_label, " ".repeat(pad_total - pad_left));
    let banner = Paragraph::new(Line::from(Span::styled(
        centered_banner,
        Style::default().fg(Color::Black).bg(banner_bg).add_modifier(Modifier::BOLD),
    )));
    f.render_widget(banner, left_chunks[0]);

    let slot_list = Paragraph::new(lines)
        .block(
            Block::default()
                .borders(Borders::LEFT | Borders::RIGHT | Borders::BOTTOM)
                .border_style(Style::default().fg(Color::Cyan)),
        )
        .wrap(Wrap { trim: false });
    f.render_widget(slot_list, left_chunks[1]);

    // -- Right panel: logs --
    if app.log_visible && chunks.len() > 1 {
        let visible_height = chunks[1].height.saturating_sub(2) as usize;
        let total = app.log_messages.len();
        let scroll = app.log_scroll.min(total.saturating_sub(visible_height));
        let start = total.saturating_sub(visible_height + scroll);
        let end = total.saturating_sub(scroll);
        let log_lines: Vec<Line> = app.log_messages[start..end].iter().map(|m| parse_log_line(m)).collect();

        let log_panel = Paragraph::new(log_lines)
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(" Logs ")
                    .border_style(Style::default().fg(Color::Yellow)),
            )
            .wrap(Wrap { trim: false });
        f.render_widget(log_panel, chunks[1]);
    }

    if let Some(dialog) = &app.confirm {
        dialog.render(f);
    }
}

fn prefix_color(index: u8) -> Color {
    match index {
        1 => Color::DarkGray,
        2 => Color::LightBlue,
        3 => Color::Magenta,
        4 => Color::Green,
        _ => Color::White,
    }
}

/// Render a structured log line (level\x1fprefix\x1fcolor\x1ftimestamp\x1fmessage).
fn parse_log_line(raw: &str) -> Line<'_> {
    let parts: Vec<&str> = raw.splitn(5, '\x1f').collect();
    let [level, prefix, color, timestamp, message] = parts[..] else {
        return Line::from(raw);
    };
    let line_color = prefix_color(color.parse().unwrap_or(0));

    let mut spans = vec![Span::styled(timestamp, Style::default().fg(Color::DarkGray)), Span::raw(" ")];

    match level {
        "ERROR" => spans.push(Span::styled("error ", Style::default().fg(Color::Red))),
        "WARN" => spans.push(Span::styled("warn ", Style::default().fg(Color::Yellow))),
        _ => {}
    }

    if !prefix.is_empty() {
        spans.push(Span::styled(prefix, Style::default().fg(line_color).add_modifier(Modifier::BOLD)));
        spans.push(Span::raw(" "));
    }
    spans.push(Span::styled(message, Style::default().fg(line_color)));

    Line::from(spans)
}
