//! Conversation client
//!
//! Owns the message history and mediates input (typed or spoken text) to
//! output (rendered messages and spoken replies). Rendering goes through a
//! [`RenderSink`] so the same client drives the terminal UI and the tests.

use anyhow::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::chat_api::{ChatEndpoint, ChatReply, ChatRequest};
use crate::connectivity::Connectivity;
use crate::speech::{Capability, SpeechRecognizer, SpeechSynthesizer, Voice, DEFAULT_LOCALE};
use crate::state::{History, Message, Role};
use crate::store::KeyValueStore;

pub const REPLY_FALLBACK: &str = "Hmm, I could not think of a reply.";
pub const NETWORK_APOLOGY: &str = "Network error. I saved your message — try again when online.";
pub const MIC_UNSUPPORTED: &str =
    "Speech recognition not supported here. Configure a recognizer command to use the mic.";

/// Where the client draws. Implementations decide what a "bubble" looks like.
pub trait RenderSink {
    fn render_message(&mut self, message: &Message);
    fn scroll_to_latest(&mut self);
    fn clear_input(&mut self);
    fn show_notice(&mut self, notice: &str);
    fn set_connectivity(&mut self, status: Connectivity);
    fn set_mic_state(&mut self, state: MicState);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MicState {
    #[default]
    Idle,
    Listening,
}

/// What the caller should do after a mic toggle
#[derive(Debug, Clone)]
pub enum MicAction {
    /// Run a recognition session in this locale until `stop` is cancelled,
    /// and report back through [`ConversationClient::finish_recognition`]
    Start { locale: String, stop: CancellationToken },
    Stopped,
    Unsupported,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechSettings {
    pub enabled: bool,
    pub voice_index: usize,
    pub locale: String,
}

impl Default for SpeechSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            voice_index: 0,
            locale: DEFAULT_LOCALE.to_string(),
        }
    }
}

pub struct ConversationClient<S: RenderSink> {
    history: History,
    store: Arc<dyn KeyValueStore>,
    endpoint: Arc<dyn ChatEndpoint>,
    model: String,
    synthesizer: Capability<Arc<dyn SpeechSynthesizer>>,
    recognizer: Capability<Arc<dyn SpeechRecognizer>>,
    settings: SpeechSettings,
    mic: MicState,
    session: Option<CancellationToken>,
    sink: S,
}

impl<S: RenderSink> ConversationClient<S> {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        endpoint: Arc<dyn ChatEndpoint>,
        model: impl Into<String>,
        sink: S,
    ) -> Self {
        Self {
            history: History::new(),
            store,
            endpoint,
            model: model.into(),
            synthesizer: Capability::Unavailable,
            recognizer: Capability::Unavailable,
            settings: SpeechSettings::default(),
            mic: MicState::Idle,
            session: None,
            sink,
        }
    }

    pub fn with_synthesizer(mut self, synthesizer: Capability<Arc<dyn SpeechSynthesizer>>) -> Self {
        self.synthesizer = synthesizer;
        self
    }

    pub fn with_recognizer(mut self, recognizer: Capability<Arc<dyn SpeechRecognizer>>) -> Self {
        self.recognizer = recognizer;
        self
    }

    pub fn with_speech_settings(mut self, settings: SpeechSettings) -> Self {
        self.settings = settings;
        self
    }

    // Accessors
    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn endpoint(&self) -> Arc<dyn ChatEndpoint> {
        self.endpoint.clone()
    }

    pub fn recognizer(&self) -> Option<Arc<dyn SpeechRecognizer>> {
        self.recognizer.get().cloned()
    }

    pub fn mic_state(&self) -> MicState {
        self.mic
    }

    pub fn can_speak(&self) -> bool {
        self.synthesizer.is_available()
    }

    pub fn can_listen(&self) -> bool {
        self.recognizer.is_available()
    }

    pub fn speech_settings(&self) -> &SpeechSettings {
        &self.settings
    }

    /// Replace the in-memory history with what the store holds.
    pub fn load_history(&mut self) -> &History {
        self.history = History::load(self.store.as_ref());
        info!(messages = self.history.len(), "conversation history loaded");
        &self.history
    }

    /// Draw every loaded message once, without appending.
    pub fn render_history(&mut self) {
        for message in self.history.messages() {
            self.sink.render_message(message);
        }
        self.sink.scroll_to_latest();
    }

    pub fn append_and_render(&mut self, role: Role, content: &str, render: bool) {
        let message = Message {
            role,
            content: content.to_string(),
        };
        self.history.push(message.clone());

        if let Err(e) = self.history.persist(self.store.as_ref()) {
            error!(error = %e, "failed to persist conversation history");
        }

        if render {
            self.sink.render_message(&message);
            self.sink.scroll_to_latest();
        }
    }

    /// Record the user's message and build the request carrying the full
    /// history. Blank text yields `None` and changes nothing.
    pub fn submit_user_text(&mut self, text: &str) -> Option<ChatRequest> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        self.append_and_render(Role::User, text, true);
        self.sink.clear_input();

        Some(ChatRequest {
            model: self.model.clone(),
            messages: self.history.messages().to_vec(),
        })
    }

    /// Turn the outcome of a chat request into an assistant message.
    /// Failures never leave this function.
    pub fn complete_reply(&mut self, outcome: Result<ChatReply>) {
        match outcome {
            Ok(reply) => {
                let text = reply.text().unwrap_or(REPLY_FALLBACK).to_string();
                self.append_and_render(Role::Assistant, &text, true);
                self.speak(&text);
            }
            Err(e) => {
                warn!(error = %e, "chat request failed");
                self.append_and_render(Role::Assistant, NETWORK_APOLOGY, true);
            }
        }
    }

    /// Send text and wait for the reply. Returns whether a request was made.
    pub async fn send_user_text(&mut self, text: &str) -> bool {
        let Some(request) = self.submit_user_text(text) else {
            return false;
        };
        let outcome = self.endpoint.send(&request).await;
        self.complete_reply(outcome);
        true
    }

    pub fn speak(&self, text: &str) {
        if !self.settings.enabled {
            return;
        }
        let Some(synthesizer) = self.synthesizer.get() else {
            return;
        };

        let voices = synthesizer.voices();
        let voice = voices.get(self.settings.voice_index);
        synthesizer.cancel();
        if let Err(e) = synthesizer.speak(text, voice) {
            warn!(error = %e, "speech synthesis failed");
        }
    }

    pub fn toggle_mic_capture(&mut self) -> MicAction {
        let Some(recognizer) = self.recognizer.get() else {
            self.sink.show_notice(MIC_UNSUPPORTED);
            return MicAction::Unsupported;
        };

        match self.mic {
            MicState::Listening => {
                if let Some(session) = self.session.take() {
                    session.cancel();
                }
                recognizer.stop();
                self.set_mic(MicState::Idle);
                MicAction::Stopped
            }
            MicState::Idle => {
                // Keep our own voice out of the recording
                if let Some(synthesizer) = self.synthesizer.get() {
                    synthesizer.cancel();
                }
                let stop = CancellationToken::new();
                self.session = Some(stop.clone());
                self.set_mic(MicState::Listening);
                MicAction::Start {
                    locale: self.settings.locale.clone(),
                    stop,
                }
            }
        }
    }

    /// End of a recognition session. A transcript is submitted like typed
    /// text and the resulting request is handed back to run. Results of a
    /// session the user already stopped are dropped.
    pub fn finish_recognition(&mut self, result: Result<Option<String>>) -> Option<ChatRequest> {
        if self.session.take().is_none() {
            debug!("recognition result after stop ignored");
            return None;
        }
        self.set_mic(MicState::Idle);
        match result {
            Ok(Some(transcript)) => {
                debug!(chars = transcript.len(), "utterance recognized");
                self.submit_user_text(&transcript)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "speech recognition failed");
                None
            }
        }
    }

    /// One full spoken exchange: listen, send, reply.
    pub async fn listen_once(&mut self) -> bool {
        let MicAction::Start { locale, stop } = self.toggle_mic_capture() else {
            return false;
        };
        let Some(recognizer) = self.recognizer() else {
            return false;
        };

        let result = recognizer.recognize(&locale, stop).await;
        let Some(request) = self.finish_recognition(result) else {
            return false;
        };
        let outcome = self.endpoint.send(&request).await;
        self.complete_reply(outcome);
        true
    }

    pub fn set_connectivity(&mut self, status: Connectivity) {
        self.sink.set_connectivity(status);
    }

    // Speech settings
    pub fn set_speech_enabled(&mut self, enabled: bool) {
        self.settings.enabled = enabled;
        if !enabled {
            if let Some(synthesizer) = self.synthesizer.get() {
                synthesizer.cancel();
            }
        }
    }

    pub fn voices(&self) -> Vec<Voice> {
        self.synthesizer
            .get()
            .map(|s| s.voices())
            .unwrap_or_default()
    }

    pub fn selected_voice(&self) -> Option<Voice> {
        self.voices().get(self.settings.voice_index).cloned()
    }

    pub fn set_voice_index(&mut self, index: usize) {
        self.settings.voice_index = index;
    }

    /// Select the next voice, wrapping around.
    pub fn cycle_voice(&mut self) -> Option<Voice> {
        let voices = self.voices();
        if voices.is_empty() {
            return None;
        }
        // a stored index may be stale or huge
        let next = (self.settings.voice_index % voices.len() + 1) % voices.len();
        self.settings.voice_index = next;
        voices.get(next).cloned()
    }

    fn set_mic(&mut self, state: MicState) {
        self.mic = state;
        self.sink.set_mic_state(state);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::state::HISTORY_KEY;
    use crate::store::MemoryStore;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub rendered: Vec<Message>,
        pub scrolls: usize,
        pub input_clears: usize,
        pub notices: Vec<String>,
        pub connectivity: Option<Connectivity>,
        pub mic_states: Vec<MicState>,
    }

    impl RenderSink for RecordingSink {
        fn render_message(&mut self, message: &Message) {
            self.rendered.push(message.clone());
        }
        fn scroll_to_latest(&mut self) {
            self.scrolls += 1;
        }
        fn clear_input(&mut self) {
            self.input_clears += 1;
        }
        fn show_notice(&mut self, notice: &str) {
            self.notices.push(notice.to_string());
        }
        fn set_connectivity(&mut self, status: Connectivity) {
            self.connectivity = Some(status);
        }
        fn set_mic_state(&mut self, state: MicState) {
            self.mic_states.push(state);
        }
    }

    /// Replies are handed out in order; an exhausted queue is a network error.
    #[derive(Default)]
    struct ScriptedEndpoint {
        replies: Mutex<VecDeque<Result<&'static str>>>,
        requests: Mutex<Vec<ChatRequest>>,
    }

    impl ScriptedEndpoint {
        fn new(replies: Vec<Result<&'static str>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ChatEndpoint for ScriptedEndpoint {
        async fn send(&self, request: &ChatRequest) -> Result<ChatReply> {
            self.requests.lock().unwrap().push(request.clone());
            let next = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(anyhow!("connection refused")));
            next.and_then(|body| Ok(ChatReply::from_body(body)?))
        }
    }

    type EventLog = Arc<Mutex<Vec<String>>>;

    struct FakeSynthesizer {
        log: EventLog,
        speaking: AtomicBool,
        voices: Vec<Voice>,
    }

    impl SpeechSynthesizer for FakeSynthesizer {
        fn voices(&self) -> Vec<Voice> {
            self.voices.clone()
        }
        fn speak(&self, text: &str, voice: Option<&Voice>) -> Result<()> {
            let voice = voice.map(|v| v.name.as_str()).unwrap_or("default");
            self.log.lock().unwrap().push(format!("speak:{}:{}", voice, text));
            self.speaking.store(true, Ordering::SeqCst);
            Ok(())
        }
        fn cancel(&self) {
            self.log.lock().unwrap().push("cancel".to_string());
            self.speaking.store(false, Ordering::SeqCst);
        }
        fn is_speaking(&self) -> bool {
            self.speaking.load(Ordering::SeqCst)
        }
    }

    struct FakeRecognizer {
        log: EventLog,
        transcript: Option<&'static str>,
    }

    #[async_trait]
    impl SpeechRecognizer for FakeRecognizer {
        async fn recognize(&self, locale: &str, _stop: CancellationToken) -> Result<Option<String>> {
            self.log.lock().unwrap().push(format!("recognize:{}", locale));
            Ok(self.transcript.map(str::to_string))
        }
        fn stop(&self) {
            self.log.lock().unwrap().push("stop".to_string());
        }
    }

    fn voices() -> Vec<Voice> {
        vec![
            Voice { name: "alice".into(), lang: "en-US".into() },
            Voice { name: "bruno".into(), lang: "pt-BR".into() },
        ]
    }

    fn synthesizer(log: &EventLog) -> Arc<FakeSynthesizer> {
        Arc::new(FakeSynthesizer {
            log: log.clone(),
            speaking: AtomicBool::new(false),
            voices: voices(),
        })
    }

    fn client(
        store: Arc<MemoryStore>,
        endpoint: Arc<ScriptedEndpoint>,
    ) -> ConversationClient<RecordingSink> {
        ConversationClient::new(store, endpoint, "gpt-4o-mini", RecordingSink::default())
    }

    fn persisted_len(store: &MemoryStore) -> usize {
        History::load(store).len()
    }

    #[tokio::test]
    async fn test_round_trips_grow_history_by_two() {
        let store = Arc::new(MemoryStore::new());
        let endpoint = ScriptedEndpoint::new(vec![Ok(r#"{"content":"hi there"}"#), Err(anyhow!("offline"))]);
        let mut client = client(store.clone(), endpoint.clone());
        client.load_history();

        assert!(client.send_user_text("hello").await);
        assert_eq!(persisted_len(&store), 2);

        assert!(client.send_user_text("  again  ").await);
        assert_eq!(persisted_len(&store), 4);

        let history = History::load(store.as_ref());
        assert_eq!(history.messages()[2], Message::user("again"));
        assert_eq!(history.messages()[3], Message::assistant(NETWORK_APOLOGY));
        assert_eq!(endpoint.request_count(), 2);
    }

    #[tokio::test]
    async fn test_request_carries_full_history_and_model() {
        let store = Arc::new(MemoryStore::new());
        let endpoint = ScriptedEndpoint::new(vec![Ok(r#"{"content":"one"}"#), Ok(r#"{"content":"two"}"#)]);
        let mut client = client(store, endpoint.clone());

        client.send_user_text("first").await;
        client.send_user_text("second").await;

        let requests = endpoint.requests.lock().unwrap();
        assert_eq!(requests[1].model, "gpt-4o-mini");
        assert_eq!(
            requests[1].messages,
            vec![Message::user("first"), Message::assistant("one"), Message::user("second")]
        );
    }

    #[tokio::test]
    async fn test_blank_text_sends_nothing() {
        let store = Arc::new(MemoryStore::new());
        let endpoint = ScriptedEndpoint::new(vec![]);
        let mut client = client(store.clone(), endpoint.clone());

        assert!(!client.send_user_text("").await);
        assert!(!client.send_user_text(" \t\n ").await);

        assert!(client.history().is_empty());
        assert!(store.get(HISTORY_KEY).unwrap().is_none());
        assert_eq!(endpoint.request_count(), 0);
        assert_eq!(client.sink().input_clears, 0);
    }

    #[tokio::test]
    async fn test_reply_content_is_rendered() {
        let endpoint = ScriptedEndpoint::new(vec![Ok(r#"{"content": "hello"}"#), Ok("{}")]);
        let mut client = client(Arc::new(MemoryStore::new()), endpoint);

        client.send_user_text("hi").await;
        client.send_user_text("hi").await;

        let rendered = &client.sink().rendered;
        assert_eq!(rendered[1], Message::assistant("hello"));
        assert_eq!(rendered[3], Message::assistant(REPLY_FALLBACK));
        assert_eq!(client.sink().input_clears, 2);
        assert_eq!(client.sink().scrolls, 4);
    }

    #[tokio::test]
    async fn test_malformed_reply_falls_back_instead_of_apologizing() {
        let endpoint = ScriptedEndpoint::new(vec![Ok(r#"{"content":42}"#), Ok("null")]);
        let mut client = client(Arc::new(MemoryStore::new()), endpoint);

        client.send_user_text("hi").await;
        client.send_user_text("again").await;

        let rendered = &client.sink().rendered;
        assert_eq!(rendered[1], Message::assistant(REPLY_FALLBACK));
        assert_eq!(rendered[3], Message::assistant(REPLY_FALLBACK));
        assert!(rendered.iter().all(|m| m.content != NETWORK_APOLOGY));
    }

    #[tokio::test]
    async fn test_load_history_is_idempotent_and_renders_once() {
        let store = Arc::new(MemoryStore::new());
        let mut seeded = History::new();
        seeded.push(Message::user("a"));
        seeded.push(Message::assistant("b"));
        seeded.persist(store.as_ref()).unwrap();

        let mut client = client(store.clone(), ScriptedEndpoint::new(vec![]));
        let first = client.load_history().clone();
        let second = client.load_history().clone();
        assert_eq!(first, second);

        client.render_history();
        assert_eq!(client.sink().rendered.len(), 2);
        assert_eq!(persisted_len(&store), 2);
    }

    #[test]
    fn test_append_without_render_still_persists() {
        let store = Arc::new(MemoryStore::new());
        let mut client = client(store.clone(), ScriptedEndpoint::new(vec![]));
        client.append_and_render(Role::User, "quiet", false);
        assert!(client.sink().rendered.is_empty());
        assert_eq!(persisted_len(&store), 1);
    }

    #[tokio::test]
    async fn test_reply_is_spoken_with_selected_voice() {
        let log = EventLog::default();
        let endpoint = ScriptedEndpoint::new(vec![Ok(r#"{"content":"ok"}"#)]);
        let mut client = client(Arc::new(MemoryStore::new()), endpoint)
            .with_synthesizer(Capability::Available(synthesizer(&log)));
        client.set_voice_index(1);

        client.send_user_text("hi").await;
        assert_eq!(*log.lock().unwrap(), vec!["cancel", "speak:bruno:ok"]);
    }

    #[test]
    fn test_speak_falls_back_to_default_voice() {
        let log = EventLog::default();
        let mut client = client(Arc::new(MemoryStore::new()), ScriptedEndpoint::new(vec![]))
            .with_synthesizer(Capability::Available(synthesizer(&log)));
        client.set_voice_index(7);

        client.speak("one");
        client.speak("two");
        assert_eq!(
            *log.lock().unwrap(),
            vec!["cancel", "speak:default:one", "cancel", "speak:default:two"]
        );
    }

    #[test]
    fn test_speak_disabled_or_unavailable_is_noop() {
        let log = EventLog::default();
        let mut client = client(Arc::new(MemoryStore::new()), ScriptedEndpoint::new(vec![]))
            .with_synthesizer(Capability::Available(synthesizer(&log)));
        client.set_speech_enabled(false);
        log.lock().unwrap().clear();
        client.speak("hidden");
        assert!(log.lock().unwrap().is_empty());

        let bare = self::client(Arc::new(MemoryStore::new()), ScriptedEndpoint::new(vec![]));
        assert!(!bare.can_speak());
        bare.speak("nothing happens");
    }

    #[tokio::test]
    async fn test_failed_send_is_not_spoken() {
        let log = EventLog::default();
        let mut client = client(Arc::new(MemoryStore::new()), ScriptedEndpoint::new(vec![]))
            .with_synthesizer(Capability::Available(synthesizer(&log)));
        client.send_user_text("hi").await;
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_mic_unsupported_shows_notice() {
        let mut client = client(Arc::new(MemoryStore::new()), ScriptedEndpoint::new(vec![]));
        assert!(matches!(client.toggle_mic_capture(), MicAction::Unsupported));
        assert_eq!(client.mic_state(), MicState::Idle);
        assert_eq!(client.sink().notices, vec![MIC_UNSUPPORTED.to_string()]);
        assert!(client.sink().mic_states.is_empty());
    }

    #[tokio::test]
    async fn test_mic_cancels_speech_before_recognition() {
        let log = EventLog::default();
        let synth = synthesizer(&log);
        let mut client = client(
            Arc::new(MemoryStore::new()),
            ScriptedEndpoint::new(vec![Ok(r#"{"content":"sure"}"#)]),
        )
        .with_synthesizer(Capability::Available(synth.clone()))
        .with_recognizer(Capability::Available(Arc::new(FakeRecognizer {
            log: log.clone(),
            transcript: Some("lights on"),
        })))
        .with_speech_settings(SpeechSettings {
            enabled: true,
            voice_index: 0,
            locale: "pt-BR".to_string(),
        });

        client.speak("long answer");
        assert!(synth.is_speaking());
        log.lock().unwrap().clear();

        assert!(client.listen_once().await);

        let events = log.lock().unwrap().clone();
        assert_eq!(events, vec!["cancel", "recognize:pt-BR", "cancel", "speak:alice:sure"]);
        assert_eq!(client.history().messages()[0], Message::user("lights on"));
        assert_eq!(client.history().messages()[1], Message::assistant("sure"));
        assert_eq!(client.mic_state(), MicState::Idle);
        assert_eq!(client.sink().mic_states, vec![MicState::Listening, MicState::Idle]);
    }

    #[test]
    fn test_mic_toggle_stops_listening() {
        let log = EventLog::default();
        let mut client = client(Arc::new(MemoryStore::new()), ScriptedEndpoint::new(vec![]))
            .with_recognizer(Capability::Available(Arc::new(FakeRecognizer {
                log: log.clone(),
                transcript: None,
            })));

        let MicAction::Start { locale, stop } = client.toggle_mic_capture() else {
            panic!("expected a recognition session to start");
        };
        assert_eq!(locale, "en-US");
        assert!(!stop.is_cancelled());
        assert_eq!(client.mic_state(), MicState::Listening);
        assert!(matches!(client.toggle_mic_capture(), MicAction::Stopped));
        assert!(stop.is_cancelled());
        assert_eq!(client.mic_state(), MicState::Idle);
        assert_eq!(*log.lock().unwrap(), vec!["stop"]);

        // session ended by the recognizer itself
        client.toggle_mic_capture();
        assert!(client.finish_recognition(Ok(None)).is_none());
        assert_eq!(client.mic_state(), MicState::Idle);
        assert!(client.history().is_empty());
    }

    #[test]
    fn test_transcript_of_stopped_session_is_dropped() {
        let mut client = client(Arc::new(MemoryStore::new()), ScriptedEndpoint::new(vec![]))
            .with_recognizer(Capability::Available(Arc::new(FakeRecognizer {
                log: EventLog::default(),
                transcript: None,
            })));

        client.toggle_mic_capture();
        client.toggle_mic_capture();
        // the session finished before it saw the stop
        assert!(client.finish_recognition(Ok(Some("lights on".to_string()))).is_none());
        assert!(client.history().is_empty());
        assert!(client.sink().rendered.is_empty());
        assert_eq!(client.mic_state(), MicState::Idle);
        assert_eq!(client.sink().mic_states, vec![MicState::Listening, MicState::Idle]);
    }

    #[test]
    fn test_recognition_error_returns_to_idle() {
        let mut client = client(Arc::new(MemoryStore::new()), ScriptedEndpoint::new(vec![]))
            .with_recognizer(Capability::Available(Arc::new(FakeRecognizer {
                log: EventLog::default(),
                transcript: None,
            })));
        client.toggle_mic_capture();
        assert!(client.finish_recognition(Err(anyhow!("device busy"))).is_none());
        assert_eq!(client.mic_state(), MicState::Idle);
    }

    #[test]
    fn test_cycle_voice_wraps() {
        let log = EventLog::default();
        let mut client = client(Arc::new(MemoryStore::new()), ScriptedEndpoint::new(vec![]))
            .with_synthesizer(Capability::Available(synthesizer(&log)));
        assert_eq!(client.selected_voice().unwrap().name, "alice");
        assert_eq!(client.cycle_voice().unwrap().name, "bruno");
        assert_eq!(client.cycle_voice().unwrap().name, "alice");
    }

    #[test]
    fn test_cycle_voice_from_out_of_range_index() {
        let log = EventLog::default();
        let mut client = client(Arc::new(MemoryStore::new()), ScriptedEndpoint::new(vec![]))
            .with_synthesizer(Capability::Available(synthesizer(&log)));

        client.set_voice_index(usize::MAX);
        // usize::MAX is odd, so it lands on "bruno" and the next one is "alice"
        assert_eq!(client.cycle_voice().unwrap().name, "alice");
        assert_eq!(client.speech_settings().voice_index, 0);

        client.set_voice_index(7);
        assert_eq!(client.cycle_voice().unwrap().name, "alice");
        assert_eq!(client.cycle_voice().unwrap().name, "bruno");
    }

    #[test]
    fn test_connectivity_reaches_sink() {
        let mut client = client(Arc::new(MemoryStore::new()), ScriptedEndpoint::new(vec![]));
        client.set_connectivity(Connectivity::Offline);
        assert_eq!(client.sink().connectivity, Some(Connectivity::Offline));
    }
}
