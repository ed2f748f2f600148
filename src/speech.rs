//! Speech output and microphone capture
//!
//! Both capabilities are optional. They are detected once at startup and
//! handed to the client as a [`Capability`], so a missing engine disables the
//! matching control instead of failing on every call.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_LOCALE: &str = "en-US";

/// Result of a one-time platform capability query
#[derive(Debug, Clone)]
pub enum Capability<T> {
    Available(T),
    Unavailable,
}

impl<T> Capability<T> {
    pub fn is_available(&self) -> bool {
        matches!(self, Capability::Available(_))
    }

    pub fn get(&self) -> Option<&T> {
        match self {
            Capability::Available(inner) => Some(inner),
            Capability::Unavailable => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Voice {
    pub name: String,
    pub lang: String,
}

impl Voice {
    pub fn label(&self) -> String {
        format!("{} ({})", self.name, self.lang)
    }
}

pub trait SpeechSynthesizer: Send + Sync {
    fn voices(&self) -> Vec<Voice>;
    /// Start speaking. Returns once playback has started.
    fn speak(&self, text: &str, voice: Option<&Voice>) -> Result<()>;
    fn cancel(&self);
    fn is_speaking(&self) -> bool;
}

#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    /// Listen for a single utterance. `Ok(None)` means the session ended
    /// without a result, including a cancelled `stop` token. The token may
    /// already be cancelled when the session starts.
    async fn recognize(&self, locale: &str, stop: CancellationToken) -> Result<Option<String>>;
    /// End the running session, if any.
    fn stop(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynthEngine {
    Espeak,
    Say,
    /// User-configured command, text passed as the last argument
    Custom,
}

/// Speech output through a command-line TTS engine. One child process at a
/// time; cancelling kills it.
pub struct CommandSynthesizer {
    program: PathBuf,
    args: Vec<String>,
    engine: SynthEngine,
    voices: Vec<Voice>,
    current: Mutex<Option<Child>>,
}

impl CommandSynthesizer {
    pub fn new(program: PathBuf, args: Vec<String>, engine: SynthEngine) -> Self {
        let voices = match engine {
            SynthEngine::Espeak => list_voices(&program, &["--voices"], parse_espeak_voices),
            SynthEngine::Say => list_voices(&program, &["-v", "?"], parse_say_voices),
            SynthEngine::Custom => Vec::new(),
        };
        debug!(program = %program.display(), voices = voices.len(), "speech synthesizer ready");
        Self {
            program,
            args,
            engine,
            voices,
            current: Mutex::new(None),
        }
    }

    pub fn engine(&self) -> SynthEngine {
        self.engine
    }
}

impl SpeechSynthesizer for CommandSynthesizer {
    fn voices(&self) -> Vec<Voice> {
        self.voices.clone()
    }

    fn speak(&self, text: &str, voice: Option<&Voice>) -> Result<()> {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        if let Some(voice) = voice {
            match self.engine {
                SynthEngine::Espeak | SynthEngine::Say => {
                    command.arg("-v").arg(&voice.name);
                }
                SynthEngine::Custom => {}
            }
        }
        command
            .arg(text)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        let child = command
            .spawn()
            .with_context(|| format!("Failed to start {}", self.program.display()))?;

        let mut current = self
            .current
            .lock()
            .map_err(|_| anyhow!("synthesizer lock poisoned"))?;
        if let Some(mut previous) = current.replace(child) {
            let _ = previous.kill();
            let _ = previous.wait();
        }
        Ok(())
    }

    fn cancel(&self) {
        if let Ok(mut current) = self.current.lock() {
            if let Some(mut child) = current.take() {
                let _ = child.kill();
                let _ = child.wait();
            }
        }
    }

    fn is_speaking(&self) -> bool {
        let Ok(mut current) = self.current.lock() else {
            return false;
        };
        match current.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }
}

impl Drop for CommandSynthesizer {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Speech input through a user-configured command that prints the transcript
/// on stdout. `{locale}` in the arguments is replaced by the session locale.
pub struct CommandRecognizer {
    program: PathBuf,
    args: Vec<String>,
    active: Mutex<Option<CancellationToken>>,
}

impl CommandRecognizer {
    pub fn new(program: PathBuf, args: Vec<String>) -> Self {
        Self {
            program,
            args,
            active: Mutex::new(None),
        }
    }
}

#[async_trait]
impl SpeechRecognizer for CommandRecognizer {
    async fn recognize(&self, locale: &str, stop: CancellationToken) -> Result<Option<String>> {
        if stop.is_cancelled() {
            return Ok(None);
        }
        if let Ok(mut active) = self.active.lock() {
            *active = Some(stop.clone());
        }

        let args: Vec<String> = self
            .args
            .iter()
            .map(|a| a.replace("{locale}", locale))
            .collect();

        let mut child = tokio::process::Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to start {}", self.program.display()))?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("recognizer stdout unavailable"))?;

        let read = async move {
            let mut output = String::new();
            stdout.read_to_string(&mut output).await?;
            Ok::<_, std::io::Error>(output)
        };

        tokio::select! {
            biased;
            _ = stop.cancelled() => {
                let _ = child.kill().await;
                Ok(None)
            }
            output = read => {
                let output = output?;
                let status = child.wait().await?;
                if !status.success() {
                    debug!(%status, "recognizer exited with failure");
                }
                Ok(first_transcript_line(&output))
            }
        }
    }

    fn stop(&self) {
        if let Ok(active) = self.active.lock() {
            if let Some(token) = active.as_ref() {
                token.cancel();
            }
        }
    }
}

/// Look for a TTS engine: the configured command first, then the usual
/// engines on `PATH`.
pub fn detect_synthesizer(configured: Option<&[String]>) -> Capability<Arc<dyn SpeechSynthesizer>> {
    if let Some((program, args)) = configured.and_then(|c| c.split_first()) {
        return match find_program(program) {
            Some(path) => {
                info!(program = %path.display(), "using configured speech synthesizer");
                Capability::Available(Arc::new(CommandSynthesizer::new(
                    path,
                    args.to_vec(),
                    SynthEngine::Custom,
                )))
            }
            None => {
                warn!(%program, "configured speech synthesizer not found, speech output disabled");
                Capability::Unavailable
            }
        };
    }

    let candidates = [
        ("espeak-ng", SynthEngine::Espeak),
        ("espeak", SynthEngine::Espeak),
        ("say", SynthEngine::Say),
    ];
    for (name, engine) in candidates {
        if let Some(path) = find_program(name) {
            info!(program = %path.display(), "detected speech synthesizer");
            return Capability::Available(Arc::new(CommandSynthesizer::new(path, Vec::new(), engine)));
        }
    }

    info!("no speech synthesizer found, speech output disabled");
    Capability::Unavailable
}

/// A recognizer is only available when one is configured and installed.
pub fn detect_recognizer(configured: Option<&[String]>) -> Capability<Arc<dyn SpeechRecognizer>> {
    let Some((program, args)) = configured.and_then(|c| c.split_first()) else {
        info!("no speech recognizer configured, mic disabled");
        return Capability::Unavailable;
    };

    match find_program(program) {
        Some(path) => {
            info!(program = %path.display(), "using configured speech recognizer");
            Capability::Available(Arc::new(CommandRecognizer::new(path, args.to_vec())))
        }
        None => {
            warn!(%program, "configured speech recognizer not found, mic disabled");
            Capability::Unavailable
        }
    }
}

/// `en_US.UTF-8` -> `en-US`. `C`/`POSIX` and empty values give `None`.
pub fn locale_from_env_value(value: &str) -> Option<String> {
    let base = value.split(['.', '@']).next()?.trim();
    if base.is_empty() || base == "C" || base == "POSIX" {
        return None;
    }
    Some(base.replace('_', "-"))
}

pub fn system_locale() -> String {
    ["LC_ALL", "LC_MESSAGES", "LANG"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .find_map(|value| locale_from_env_value(&value))
        .unwrap_or_else(|| DEFAULT_LOCALE.to_string())
}

fn find_program(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }

    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|path| path.is_file())
}

fn list_voices(program: &Path, args: &[&str], parse: fn(&str) -> Vec<Voice>) -> Vec<Voice> {
    match Command::new(program).args(args).stderr(Stdio::null()).output() {
        Ok(output) => parse(&String::from_utf8_lossy(&output.stdout)),
        Err(e) => {
            warn!(error = %e, "could not list voices");
            Vec::new()
        }
    }
}

fn parse_espeak_voices(listing: &str) -> Vec<Voice> {
    listing
        .lines()
        .skip(1)
        .filter_map(|line| {
            let cols: Vec<&str> = line.split_whitespace().collect();
            if cols.len() < 4 {
                return None;
            }
            Some(Voice {
                name: cols[3].to_string(),
                lang: cols[1].to_string(),
            })
        })
        .collect()
}

fn parse_say_voices(listing: &str) -> Vec<Voice> {
    listing
        .lines()
        .filter_map(|line| {
            let entry = line.split('#').next()?.trim();
            let (name, lang) = entry.rsplit_once(char::is_whitespace)?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some(Voice {
                name: name.to_string(),
                lang: lang.replace('_', "-"),
            })
        })
        .collect()
}

fn first_transcript_line(output: &str) -> Option<String> {
    output
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}
