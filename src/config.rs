use std::env;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent},
    terminal,
};
use tracing::warn;


/// Trait for types that can retrieve their configuration key from environment variables
pub trait KeyFromEnv {
    /// The environment variable name for this client's API key
    const KEY_NAME: &'static str;

    /// Find the API key by checking environment variables first, then .env file
    fn find_key() -> Option<String> {
        // Silently ignore a missing .env file
        let _ = dotenvy::dotenv();

        env::var(Self::KEY_NAME).ok().filter(|key| !key.trim().is_empty())
    }

    /// Find the API key, asking on the terminal for up to 15 seconds when it is not set.
    fn find_key_with_user() -> Option<String> {
        if let Some(key) = Self::find_key() {
            return Some(key);
        }

        print!("Environment variable {} not found. Please enter the API key (15 second timeout): ", Self::KEY_NAME);
        let _ = io::stdout().flush();

        let (sender, receiver) = std::sync::mpsc::channel();

        thread::spawn(move || {
            let mut input = String::new();
            if io::stdin().read_line(&mut input).is_ok() {
                let _ = sender.send(input.trim().to_string());
            }
        });

        let api_key = match receiver.recv_timeout(Duration::from_secs(15)) {
            Ok(input) if !input.is_empty() => input,
            _ => {
                warn!(key = Self::KEY_NAME, "No API key entered before timeout");
                return None;
            }
        };

        if Self::prompt_save_to_env() {
            if let Err(e) = Self::save_to_env_file(&api_key) {
                eprintln!("Warning: Failed to save to .env file: {}", e);
            } else {
                println!("API key saved to .env file");
            }
        }

        Some(api_key)
    }

    /// Prompt user if they want to save the API key to .env file
    /// Uses single keystroke detection with fallback to Enter
    fn prompt_save_to_env() -> bool {
        print!("Add {} to .env file? (y/N): ", Self::KEY_NAME);
        let _ = io::stdout().flush();

        if let Ok(response) = read_yes_no_key() {
            println!("{}", if response { "y" } else { "n" });
            return response;
        }

        let mut input = String::new();
        if io::stdin().read_line(&mut input).is_ok() {
            input.trim().eq_ignore_ascii_case("y")
        } else {
            false
        }
    }

    /// Append the API key to .env unless it is already there
    fn save_to_env_file(api_key: &str) -> io::Result<()> {
        let env_line = format!("{}={}\n", Self::KEY_NAME, api_key);

        if let Ok(content) = std::fs::read_to_string(".env") {
            if content.contains(&format!("{}=", Self::KEY_NAME)) {
                return Ok(());
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(".env")?;
        file.write_all(env_line.as_bytes())
    }
}

/// Read one keystroke in raw mode; anything but `y` means no.
pub fn read_yes_no_key() -> io::Result<bool> {
    terminal::enable_raw_mode()?;

    let result = (|| -> io::Result<bool> {
        if event::poll(Duration::from_secs(30))? {
            if let Event::Key(KeyEvent { code, .. }) = event::read()? {
                return Ok(matches!(code, KeyCode::Char('y' | 'Y')));
            }
        }
        Ok(false)
    })();

    terminal::disable_raw_mode()?;
    result
}

/// Tunables for the study activities.
#[derive(Debug, Clone, PartialEq)]
pub struct StudyConfig {
    /// Questions requested per quiz
    pub question_count: usize,
    /// Cards requested per flashcard deck
    pub flashcard_count: usize,
    /// Upper bound on source material embedded into a prompt, in chars
    pub max_source_chars: usize,
    /// Where prompt/response transcripts are written, if anywhere
    pub transcript_dir: Option<PathBuf>,
}

impl Default for StudyConfig {
    fn default() -> Self {
        Self {
            question_count: 5,
            flashcard_count: 10,
            max_source_chars: 30_000,
            transcript_dir: None,
        }
    }
}

const COUNT_RANGE: std::ops::RangeInclusive<usize> = 1..=50;

impl StudyConfig {
    /// Load from `STUDY_*` environment variables (after `.env`), keeping
    /// defaults for anything unset or malformed.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let read_usize = |name: &str, default: usize| -> usize {
            match lookup(name) {
                None => default,
                Some(raw) => match raw.trim().parse::<usize>() {
                    Ok(v) => v,
                    Err(_) => {
                        warn!(variable = name, value = %raw, "Ignoring malformed setting");
                        default
                    }
                },
            }
        };

        Self {
            question_count: clamp_count(read_usize("STUDY_QUESTION_COUNT", defaults.question_count)),
            flashcard_count: clamp_count(read_usize("STUDY_FLASHCARD_COUNT", defaults.flashcard_count)),
            max_source_chars: read_usize("STUDY_MAX_SOURCE_CHARS", defaults.max_source_chars).max(1_000),
            transcript_dir: lookup("STUDY_TRANSCRIPT_DIR")
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
        }
    }

    #[must_use]
    pub fn with_question_count(mut self, count: usize) -> Self {
        self.question_count = clamp_count(count);
        self
    }
}

pub(crate) fn clamp_count(n: usize) -> usize {
    n.clamp(*COUNT_RANGE.start(), *COUNT_RANGE.end())
}
