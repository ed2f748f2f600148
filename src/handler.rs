use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers, MouseEvent, MouseEventKind};
use crate::app::App;
use crate::tui::AppEvent;

const PAGE_LINES: u16 = 10;
const WHEEL_LINES: u16 = 3;

/// Convert a character index to a byte index for UTF-8 safe string operations
fn char_to_byte_index(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

pub async fn handle_event(app: &mut App, event: AppEvent) -> Result<()> {
    match event {
        AppEvent::Key(key) => handle_key(app, key),
        AppEvent::Mouse(mouse) => handle_mouse(app, mouse),
        AppEvent::Paste(text) => insert_text(app, &text),
        AppEvent::Resize(_, _) => {}
        AppEvent::Tick => {
            app.tick_animation();
        }
    }
    app.poll_tasks().await;
    Ok(())
}

fn handle_key(app: &mut App, key: KeyEvent) {
    if key.modifiers.contains(KeyModifiers::CONTROL) {
        match key.code {
            KeyCode::Char('c') => app.should_quit = true,
            KeyCode::Char('t') => app.toggle_mic(),
            KeyCode::Char('s') => app.toggle_speech(),
            KeyCode::Char('v') => app.next_voice(),
            _ => {}
        }
        return;
    }

    match key.code {
        KeyCode::Esc => app.dismiss_notice(),
        KeyCode::Enter => app.submit_input(),
        KeyCode::PageUp => app.scroll_up(PAGE_LINES),
        KeyCode::PageDown => app.scroll_down(PAGE_LINES),
        KeyCode::Backspace => {
            let view = app.view_mut();
            if view.cursor > 0 {
                view.cursor -= 1;
                let byte_pos = char_to_byte_index(&view.input, view.cursor);
                view.input.remove(byte_pos);
            }
        }
        KeyCode::Delete => {
            let view = app.view_mut();
            let char_count = view.input.chars().count();
            if view.cursor < char_count {
                let byte_pos = char_to_byte_index(&view.input, view.cursor);
                view.input.remove(byte_pos);
            }
        }
        KeyCode::Left => {
            let view = app.view_mut();
            view.cursor = view.cursor.saturating_sub(1);
        }
        KeyCode::Right => {
            let view = app.view_mut();
            let char_count = view.input.chars().count();
            view.cursor = (view.cursor + 1).min(char_count);
        }
        KeyCode::Home => {
            app.view_mut().cursor = 0;
        }
        KeyCode::End => {
            let view = app.view_mut();
            view.cursor = view.input.chars().count();
        }
        KeyCode::Char(c) => {
            let view = app.view_mut();
            let byte_pos = char_to_byte_index(&view.input, view.cursor);
            view.input.insert(byte_pos, c);
            view.cursor += 1;
        }
        _ => {}
    }
}

/// Pasted text goes in at the cursor; the input is a single line
fn insert_text(app: &mut App, text: &str) {
    let view = app.view_mut();
    for c in text.chars().map(|c| if c == '\n' || c == '\r' { ' ' } else { c }) {
        let byte_pos = char_to_byte_index(&view.input, view.cursor);
        view.input.insert(byte_pos, c);
        view.cursor += 1;
    }
}

fn handle_mouse(app: &mut App, mouse: MouseEvent) {
    match mouse.kind {
        MouseEventKind::ScrollDown => app.scroll_down(WHEEL_LINES),
        MouseEventKind::ScrollUp => app.scroll_up(WHEEL_LINES),
        _ => {}
    }
}
