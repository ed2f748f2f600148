use std::collections::VecDeque;
use anyhow::anyhow;
use tokio::task::JoinHandle;
use tracing::warn;

use jarvis::chat_api::{ChatReply, ChatRequest};
use jarvis::client::{ConversationClient, MicAction, MicState, RenderSink};
use jarvis::config::Config;
use jarvis::connectivity::Connectivity;
use jarvis::state::Message;

/// What the terminal shows: the rendered bubbles, the input line and the
/// status indicators. The conversation client draws into it.
#[derive(Debug)]
pub struct ChatView {
    pub bubbles: Vec<Message>,
    pub follow_latest: bool,
    pub input: String,
    pub cursor: usize, // cursor position in input, in chars
    pub notice: Option<String>,
    pub connectivity: Connectivity,
    pub mic: MicState,
}

impl ChatView {
    pub fn new() -> Self {
        Self {
            bubbles: Vec::new(),
            follow_latest: true,
            input: String::new(),
            cursor: 0,
            notice: None,
            connectivity: Connectivity::Offline,
            mic: MicState::Idle,
        }
    }
}

impl Default for ChatView {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderSink for ChatView {
    fn render_message(&mut self, message: &Message) {
        self.bubbles.push(message.clone());
    }

    fn scroll_to_latest(&mut self) {
        self.follow_latest = true;
    }

    fn clear_input(&mut self) {
        self.input.clear();
        self.cursor = 0;
    }

    fn show_notice(&mut self, notice: &str) {
        self.notice = Some(notice.to_string());
    }

    fn set_connectivity(&mut self, status: Connectivity) {
        self.connectivity = status;
    }

    fn set_mic_state(&mut self, state: MicState) {
        self.mic = state;
    }
}

type ReplyTask = JoinHandle<anyhow::Result<ChatReply>>;
type RecognitionTask = JoinHandle<anyhow::Result<Option<String>>>;

pub struct App {
    pub should_quit: bool,
    pub client: ConversationClient<ChatView>,

    // In-flight work; replies are applied in send order
    pub reply_tasks: VecDeque<ReplyTask>,
    pub recognition_task: Option<RecognitionTask>,

    // Chat pane geometry, updated during render
    pub chat_scroll: u16,
    pub chat_height: u16,
    pub chat_width: u16,

    // Animation state
    pub animation_frame: u8, // 0-2 for ellipsis animation

    /// Save speech toggles to the config file
    pub persist_preferences: bool,
}

impl App {
    pub fn new(client: ConversationClient<ChatView>, persist_preferences: bool) -> Self {
        Self {
            should_quit: false,
            client,
            reply_tasks: VecDeque::new(),
            recognition_task: None,
            chat_scroll: 0,
            chat_height: 0,
            chat_width: 0,
            animation_frame: 0,
            persist_preferences,
        }
    }

    pub fn view(&self) -> &ChatView {
        self.client.sink()
    }

    pub fn view_mut(&mut self) -> &mut ChatView {
        self.client.sink_mut()
    }

    pub fn is_waiting(&self) -> bool {
        !self.reply_tasks.is_empty()
    }

    /// Send whatever is in the input line
    pub fn submit_input(&mut self) {
        let text = self.view().input.clone();
        if let Some(request) = self.client.submit_user_text(&text) {
            self.spawn_reply(request);
        }
    }

    fn spawn_reply(&mut self, request: ChatRequest) {
        let endpoint = self.client.endpoint();
        self.reply_tasks
            .push_back(tokio::spawn(async move { endpoint.send(&request).await }));
    }

    pub fn toggle_mic(&mut self) {
        match self.client.toggle_mic_capture() {
            MicAction::Start { locale, stop } => {
                if let Some(recognizer) = self.client.recognizer() {
                    self.recognition_task = Some(tokio::spawn(async move {
                        recognizer.recognize(&locale, stop).await
                    }));
                }
            }
            MicAction::Stopped => {
                // whatever the stopped session heard is discarded
                if let Some(task) = self.recognition_task.take() {
                    task.abort();
                }
            }
            MicAction::Unsupported => {}
        }
    }

    /// Apply finished background work. Called on every loop iteration.
    pub async fn poll_tasks(&mut self) {
        while self
            .reply_tasks
            .front()
            .map(|task| task.is_finished())
            .unwrap_or(false)
        {
            let Some(task) = self.reply_tasks.pop_front() else {
                break;
            };
            let outcome = match task.await {
                Ok(outcome) => outcome,
                Err(e) => Err(anyhow!("chat request task failed: {}", e)),
            };
            self.client.complete_reply(outcome);
        }

        let recognition_done = self
            .recognition_task
            .as_ref()
            .map(|task| task.is_finished())
            .unwrap_or(false);
        if recognition_done {
            if let Some(task) = self.recognition_task.take() {
                let result = match task.await {
                    Ok(result) => result,
                    Err(e) => Err(anyhow!("recognition task failed: {}", e)),
                };
                if let Some(request) = self.client.finish_recognition(result) {
                    self.spawn_reply(request);
                }
            }
        }
    }

    pub fn toggle_speech(&mut self) {
        let enabled = !self.client.speech_settings().enabled;
        self.client.set_speech_enabled(enabled);
        self.save_preferences();
    }

    pub fn next_voice(&mut self) {
        match self.client.cycle_voice() {
            Some(voice) => {
                let label = format!("Voice: {}", voice.label());
                self.view_mut().show_notice(&label);
                self.save_preferences();
            }
            None => self.view_mut().show_notice("No voices available"),
        }
    }

    fn save_preferences(&self) {
        if !self.persist_preferences {
            return;
        }
        let settings = self.client.speech_settings();
        if let Err(e) = Config::save_speech_preferences(settings.enabled, settings.voice_index) {
            warn!(error = %e, "could not save speech preferences");
        }
    }

    pub fn dismiss_notice(&mut self) {
        self.view_mut().notice = None;
    }

    /// Tick animation frame (called by Tick event)
    pub fn tick_animation(&mut self) {
        if self.is_waiting() {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
    }

    pub fn scroll_up(&mut self, lines: u16) {
        self.chat_scroll = self.chat_scroll.saturating_sub(lines);
        self.view_mut().follow_latest = false;
    }

    pub fn scroll_down(&mut self, lines: u16) {
        let max = self.max_scroll();
        self.chat_scroll = self.chat_scroll.saturating_add(lines).min(max);
        if self.chat_scroll >= max {
            self.view_mut().follow_latest = true;
        }
    }

    /// Keep the newest bubble visible. Called from render once the pane size
    /// is known.
    pub fn follow_latest(&mut self) {
        if self.view().follow_latest {
            self.chat_scroll = self.max_scroll();
        }
    }

    fn max_scroll(&self) -> u16 {
        let visible_height = if self.chat_height > 0 { self.chat_height } else { 20 };
        self.chat_line_count().saturating_sub(visible_height)
    }

    /// Wrapped line count of the chat pane contents
    pub fn chat_line_count(&self) -> u16 {
        // Use actual chat width for wrap calculation, default to 50 if not set
        let wrap_width = if self.chat_width > 0 {
            self.chat_width as usize
        } else {
            50
        };

        let mut total_lines: u16 = 0;

        for msg in &self.view().bubbles {
            total_lines = total_lines.saturating_add(1); // Role line
            for line in msg.content.lines() {
                // Use character count, not byte length, for proper UTF-8 handling
                let char_count = line.chars().count();
                let wrapped = if char_count == 0 { 1 } else { char_count / wrap_width + 1 };
                total_lines = total_lines.saturating_add(wrapped as u16);
            }
            total_lines = total_lines.saturating_add(1); // Blank line after message
        }

        if self.is_waiting() {
            total_lines = total_lines.saturating_add(2); // "Jarvis:" + "Thinking..."
        }

        total_lines
    }
}
