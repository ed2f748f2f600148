//! Terminal setup and the event feed for the chat screen

use std::io::{self, Stderr};
use std::time::Duration;
use anyhow::Result;
use crossterm::{
    event::{
        DisableBracketedPaste, DisableMouseCapture, EnableBracketedPaste, EnableMouseCapture,
        Event, EventStream, KeyEvent, KeyEventKind, MouseEvent,
    },
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

pub type Tui = Terminal<CrosstermBackend<Stderr>>;

/// Drives the "Thinking..." animation and reply polling
pub const TICK: Duration = Duration::from_millis(300);

#[derive(Debug, PartialEq)]
pub enum AppEvent {
    Key(KeyEvent),
    Mouse(MouseEvent),
    Paste(String),
    Resize(u16, u16),
    Tick,
}

/// Map a terminal event to what the chat screen handles. Key releases and
/// focus changes are dropped.
fn translate(event: Event) -> Option<AppEvent> {
    match event {
        Event::Key(key) if key.kind == KeyEventKind::Press => Some(AppEvent::Key(key)),
        Event::Mouse(mouse) => Some(AppEvent::Mouse(mouse)),
        Event::Paste(text) => Some(AppEvent::Paste(text)),
        Event::Resize(w, h) => Some(AppEvent::Resize(w, h)),
        _ => None,
    }
}

/// One reader task merges terminal input and the tick into a single channel.
/// Dropping the handler stops the task.
pub struct EventHandler {
    rx: mpsc::UnboundedReceiver<AppEvent>,
    reader: JoinHandle<()>,
}

impl EventHandler {
    pub fn new(tick: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        let reader = tokio::spawn(async move {
            let mut input = EventStream::new();
            let mut ticker = tokio::time::interval(tick);
            loop {
                let event = tokio::select! {
                    next = input.next() => match next {
                        Some(Ok(event)) => translate(event),
                        Some(Err(err)) => {
                            warn!(error = %err, "terminal event read failed");
                            None
                        }
                        None => break,
                    },
                    _ = ticker.tick() => Some(AppEvent::Tick),
                };
                if let Some(event) = event {
                    if tx.send(event).is_err() {
                        break;
                    }
                }
            }
        });

        Self { rx, reader }
    }

    pub async fn next(&mut self) -> Option<AppEvent> {
        self.rx.recv().await
    }
}

impl Drop for EventHandler {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Raw mode, alternate screen, mouse capture and bracketed paste
pub fn init() -> Result<Tui> {
    enable_raw_mode()?;
    execute!(
        io::stderr(),
        EnterAlternateScreen,
        EnableMouseCapture,
        EnableBracketedPaste
    )?;
    Ok(Terminal::new(CrosstermBackend::new(io::stderr()))?)
}

pub fn restore() -> Result<()> {
    execute!(
        io::stderr(),
        DisableBracketedPaste,
        DisableMouseCapture,
        LeaveAlternateScreen
    )?;
    disable_raw_mode()?;
    Ok(())
}

/// Put the terminal back before the panic message prints
pub fn install_panic_hook() {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let _ = restore();
        previous(info);
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::{KeyCode, KeyEventState, KeyModifiers, MouseEventKind};

    fn key(kind: KeyEventKind) -> KeyEvent {
        KeyEvent {
            code: KeyCode::Char('a'),
            modifiers: KeyModifiers::NONE,
            kind,
            state: KeyEventState::NONE,
        }
    }

    #[test]
    fn test_only_key_presses_pass() {
        let press = key(KeyEventKind::Press);
        assert_eq!(translate(Event::Key(press)), Some(AppEvent::Key(press)));
        assert_eq!(translate(Event::Key(key(KeyEventKind::Release))), None);
        assert_eq!(translate(Event::Key(key(KeyEventKind::Repeat))), None);
    }

    #[test]
    fn test_paste_resize_and_mouse_pass_focus_dropped() {
        assert_eq!(
            translate(Event::Paste("hi".to_string())),
            Some(AppEvent::Paste("hi".to_string()))
        );
        assert_eq!(translate(Event::Resize(80, 24)), Some(AppEvent::Resize(80, 24)));
        let mouse = MouseEvent {
            kind: MouseEventKind::ScrollUp,
            column: 0,
            row: 0,
            modifiers: KeyModifiers::NONE,
        };
        assert_eq!(translate(Event::Mouse(mouse)), Some(AppEvent::Mouse(mouse)));
        assert_eq!(translate(Event::FocusGained), None);
    }
}
