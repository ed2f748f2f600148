use ratatui::{
    Frame,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Clear, Paragraph, Wrap},
};
use jarvis::client::MicState;
use jarvis::state::Role;
use crate::app::App;

/// Style one reply line. Replies are loose markdown: `**bold**`,
/// `` `code` `` and `-`/`*` list items. Unmatched markers stay literal.
fn styled_reply_line(text: &str) -> Line<'static> {
    let trimmed = text.trim_start();
    let item = trimmed.strip_prefix("- ").or_else(|| trimmed.strip_prefix("* "));

    let mut spans: Vec<Span<'static>> = Vec::new();
    let mut rest = match item {
        Some(body) => {
            spans.push(Span::styled("  • ", Style::default().fg(Color::Yellow)));
            body
        }
        None => text,
    };

    let markers = [
        ("**", Style::default().add_modifier(Modifier::BOLD)),
        ("`", Style::default().fg(Color::Green)),
    ];
    while !rest.is_empty() {
        let next = markers
            .iter()
            .filter_map(|(marker, style)| rest.find(marker).map(|at| (at, *marker, *style)))
            .min_by_key(|(at, _, _)| *at);
        let Some((at, marker, style)) = next else {
            spans.push(Span::raw(rest.to_string()));
            break;
        };

        let inner = at + marker.len();
        match rest[inner..].find(marker) {
            Some(len) if len > 0 => {
                if at > 0 {
                    spans.push(Span::raw(rest[..at].to_string()));
                }
                spans.push(Span::styled(rest[inner..inner + len].to_string(), style));
                rest = &rest[inner + len + marker.len()..];
            }
            _ => {
                spans.push(Span::raw(rest[..inner].to_string()));
                rest = &rest[inner..];
            }
        }
    }

    Line::from(spans)
}

pub fn render(app: &mut App, frame: &mut Frame) {
    let area = frame.area();

    // Main layout: header, chat, input, footer
    let [header_area, chat_area, input_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(3),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(app, frame, header_area);
    render_chat(app, frame, chat_area);
    render_input(app, frame, input_area);
    render_footer(app, frame, footer_area);

    if app.view().notice.is_some() {
        render_notice(app, frame, area);
    }
}

fn render_header(app: &App, frame: &mut Frame, area: Rect) {
    let status = app.view().connectivity;
    let (r, g, b) = status.color();

    let title = Line::from(vec![
        Span::styled(" Jarvis ", Style::default().fg(Color::Cyan).bold()),
        Span::styled(
            format!("v{}", env!("CARGO_PKG_VERSION")),
            Style::default().fg(Color::Gray),
        ),
        Span::raw(" "),
        Span::styled(
            format!(" {} ", status.label()),
            Style::default().bg(Color::Rgb(r, g, b)).fg(Color::Black).bold(),
        ),
        Span::styled(
            format!(" {} ", app.client.model()),
            Style::default().fg(Color::Gray),
        ),
    ]);

    let header = Paragraph::new(title).style(Style::default().bg(Color::DarkGray));
    frame.render_widget(header, area);
}

fn render_chat(app: &mut App, frame: &mut Frame, area: Rect) {
    // Store chat area dimensions for scroll calculations (inner size minus borders)
    app.chat_height = area.height.saturating_sub(2);
    app.chat_width = area.width.saturating_sub(2);
    app.follow_latest();

    let chat_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    let view = app.client.sink();
    let chat_text = if view.bubbles.is_empty() && !app.is_waiting() {
        Text::from(Span::styled(
            "Say something to Jarvis...",
            Style::default().fg(Color::DarkGray),
        ))
    } else {
        let mut lines: Vec<Line> = Vec::new();

        for msg in &view.bubbles {
            match msg.role {
                Role::User => {
                    lines.push(Line::from(Span::styled(
                        "You:",
                        Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
                    )));
                    for line in msg.content.lines() {
                        lines.push(Line::from(line.to_string()));
                    }
                }
                Role::Assistant => {
                    lines.push(Line::from(Span::styled(
                        "Jarvis:",
                        Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
                    )));
                    for line in msg.content.lines() {
                        lines.push(styled_reply_line(line));
                    }
                }
            }
            lines.push(Line::default());
        }

        if app.is_waiting() {
            lines.push(Line::from(Span::styled(
                "Jarvis:",
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
            )));
            // Animated ellipsis: cycles through ".", "..", "..."
            let dots = ".".repeat((app.animation_frame as usize) + 1);
            lines.push(Line::from(Span::styled(
                format!("Thinking{}", dots),
                Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
            )));
        }

        Text::from(lines)
    };

    let chat = Paragraph::new(chat_text)
        .block(chat_block)
        .wrap(Wrap { trim: true })
        .scroll((app.chat_scroll, 0));

    frame.render_widget(chat, area);
}

fn render_input(app: &App, frame: &mut Frame, area: Rect) {
    let view = app.view();
    let listening = view.mic == MicState::Listening;

    let (border_color, title) = if listening {
        (Color::Red, " Listening... (Ctrl-T to stop) ")
    } else {
        (Color::Yellow, " Message ")
    };

    let input_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(title);

    // Inner width = total width - 2 (for borders)
    let inner_width = area.width.saturating_sub(2) as usize;
    let cursor_pos = view.cursor;

    // Calculate scroll offset to keep cursor visible
    let scroll_offset = if inner_width == 0 {
        0
    } else if cursor_pos >= inner_width {
        cursor_pos - inner_width + 1
    } else {
        0
    };

    let visible_text: String = view
        .input
        .chars()
        .skip(scroll_offset)
        .take(inner_width)
        .collect();

    let input = Paragraph::new(visible_text)
        .style(Style::default().fg(Color::Cyan))
        .block(input_block);

    frame.render_widget(input, area);

    let cursor_x = (cursor_pos - scroll_offset) as u16;
    frame.set_cursor_position((area.x + cursor_x + 1, area.y + 1));
}

fn render_footer(app: &App, frame: &mut Frame, area: Rect) {
    // Key style: dark background with bright text for visibility on both light/dark terminals
    let key_style = Style::default().bg(Color::DarkGray).fg(Color::White);
    let label_style = Style::default().bg(Color::Black).fg(Color::White);
    let off_style = Style::default().bg(Color::Black).fg(Color::DarkGray);

    let mic_label = match app.view().mic {
        MicState::Listening => " stop mic ",
        MicState::Idle => " mic ",
    };
    let mic_style = if app.client.can_listen() { label_style } else { off_style };

    let speech_on = app.client.speech_settings().enabled;
    let speech_style = if app.client.can_speak() { label_style } else { off_style };
    let speech_label = if speech_on { " speech on " } else { " speech off " };

    let voice_label = app
        .client
        .selected_voice()
        .map(|v| format!(" {} ", v.label()))
        .unwrap_or_else(|| " voice ".to_string());

    let hints = vec![
        Span::styled(" Enter ", key_style),
        Span::styled(" send ", label_style),
        Span::styled(" ^T ", key_style),
        Span::styled(mic_label, mic_style),
        Span::styled(" ^S ", key_style),
        Span::styled(speech_label, speech_style),
        Span::styled(" ^V ", key_style),
        Span::styled(voice_label, speech_style),
        Span::styled(" PgUp/PgDn ", key_style),
        Span::styled(" scroll ", label_style),
        Span::styled(" ^C ", key_style),
        Span::styled(" quit ", label_style),
    ];

    let footer = Paragraph::new(Line::from(hints));
    frame.render_widget(footer, area);
}

fn render_notice(app: &App, frame: &mut Frame, area: Rect) {
    let Some(notice) = app.view().notice.as_deref() else {
        return;
    };

    // Calculate popup size and position (centered)
    let popup_width = 60.min(area.width.saturating_sub(4));
    let text_width = popup_width.saturating_sub(2).max(1) as usize;
    let text_lines = (notice.chars().count() / text_width + 1) as u16;
    let popup_height = (text_lines + 4).min(area.height);

    let popup_x = (area.width.saturating_sub(popup_width)) / 2;
    let popup_y = (area.height.saturating_sub(popup_height)) / 2;

    let popup_area = Rect::new(popup_x, popup_y, popup_width, popup_height);

    // Clear the area behind the popup
    frame.render_widget(Clear, popup_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow))
        .title(" Notice ");

    let text = Text::from(vec![
        Line::from(notice.to_string()),
        Line::default(),
        Line::from(Span::styled("Esc to dismiss", Style::default().fg(Color::DarkGray))),
    ]);

    let popup = Paragraph::new(text).block(block).wrap(Wrap { trim: true });
    frame.render_widget(popup, popup_area);
}
