#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ClaudeModel {
    #[default]
    Haiku35,
    Sonnet4,
    Opus4,
    Override(String),
}

impl ClaudeModel {
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Haiku35 => "claude-3-5-haiku-20241022",
            Self::Sonnet4 => "claude-sonnet-4-20250514",
            Self::Opus4 => "claude-opus-4-20250514",
            Self::Override(s) => s.as_str(),
        }
    }

    /// Short family names map to the pinned models; anything else is used verbatim.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "" | "haiku" => Self::Haiku35,
            "sonnet" => Self::Sonnet4,
            "opus" => Self::Opus4,
            _ => Self::Override(name.trim().to_string()),
        }
    }
}
