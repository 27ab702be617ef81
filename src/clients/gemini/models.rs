#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum GeminiModel {
    #[default]
    Flash,       // "gemini-2.0-flash"
    FlashLite,   // "gemini-2.0-flash-lite"
    Pro,         // "gemini-1.5-pro"
    Override(String),
}

impl GeminiModel {
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Flash => "gemini-2.0-flash",
            Self::FlashLite => "gemini-2.0-flash-lite",
            Self::Pro => "gemini-1.5-pro",
            Self::Override(s) => s.as_str(),
        }
    }
}
