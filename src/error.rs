use thiserror::Error;

/// Fixed advisory shown in the error banner when the backend reports
/// resource exhaustion.
pub const QUOTA_ADVISORY: &str =
    "The study assistant has reached its usage quota for now. Please wait a few minutes and try again.";

#[derive(Error, Debug)]
pub enum QueryResolverError {
    #[error("AI error: {0}")]
    Ai(#[from] AIError),
}

#[derive(Error, Debug)]
pub enum AIError {
    #[error("Gemini API error: {0}")]
    Gemini(#[from] GeminiError),
    #[error("Claude API error: {0}")]
    Claude(#[from] ClaudeError),
    #[error("DeepSeek API error: {0}")]
    DeepSeek(#[from] DeepSeekError),
    #[error("Mock client error: {0}")]
    Mock(String),
    #[error("Stream error: {0}")]
    Stream(String),
}

impl AIError {
    /// True when the backend refused the request because a usage quota ran out.
    pub fn is_quota_exceeded(&self) -> bool {
        match self {
            AIError::Gemini(GeminiError::QuotaExceeded(_)) => true,
            AIError::Gemini(GeminiError::RateLimit)
            | AIError::Claude(ClaudeError::RateLimit)
            | AIError::DeepSeek(DeepSeekError::RateLimit) => true,
            AIError::Gemini(GeminiError::Api(body))
            | AIError::Claude(ClaudeError::Api(body))
            | AIError::DeepSeek(DeepSeekError::Api(body))
            | AIError::Stream(body) => mentions_quota(body),
            _ => false,
        }
    }

    /// Retry bucket name used to look up `RetryConfig::max_retries`.
    /// Rate limits count as quota errors and are never retried.
    pub fn retry_category(&self) -> &'static str {
        match self {
            AIError::Gemini(GeminiError::Http(_))
            | AIError::Claude(ClaudeError::Http(_))
            | AIError::DeepSeek(DeepSeekError::Http(_))
            | AIError::Stream(_) => "http_error",
            _ => "api_error",
        }
    }

    /// Errors that will fail the same way on every attempt.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            AIError::Gemini(GeminiError::Authentication)
                | AIError::Gemini(GeminiError::Blocked(_))
                | AIError::Claude(ClaudeError::Authentication)
                | AIError::DeepSeek(DeepSeekError::Authentication)
        ) || self.is_quota_exceeded()
    }
}

pub(crate) fn mentions_quota(body: &str) -> bool {
    let lower = body.to_lowercase();
    lower.contains("resource_exhausted") || lower.contains("quota")
}

#[derive(Error, Debug)]
pub enum GeminiError {
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("API error: {0}")]
    Api(String),
    #[error("Rate limit exceeded")]
    RateLimit,
    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),
    #[error("Response blocked: {0}")]
    Blocked(String),
    #[error("Authentication failed")]
    Authentication,
}

#[derive(Error, Debug)]
pub enum ClaudeError {
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("API error: {0}")]
    Api(String),
    #[error("Rate limit exceeded")]
    RateLimit,
    #[error("Authentication failed")]
    Authentication,
}

#[derive(Error, Debug)]
pub enum DeepSeekError {
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("API error: {0}")]
    Api(String),
    #[error("Rate limit exceeded")]
    RateLimit,
    #[error("Authentication failed")]
    Authentication,
}

/// Failures surfaced by the study session controller.
#[derive(Error, Debug)]
pub enum StudyError {
    #[error(transparent)]
    Query(#[from] QueryResolverError),
    #[error("Enter a textbook name first")]
    NoTextbook,
    #[error("{0} must not be empty")]
    EmptyInput(&'static str),
    #[error("This action belongs to the {expected} screen, but {actual} is open")]
    WrongScreen { expected: &'static str, actual: &'static str },
    #[error("A request is already in progress")]
    Busy,
    #[error("The model did not return any quiz questions")]
    NoQuestions,
    #[error("The model did not return any flashcards")]
    NoFlashcards,
    #[error("There are no incorrect answers to review")]
    NothingToReview,
    #[error("The quiz is already finished")]
    QuizFinished,
    #[error("This answer has already been evaluated; move to the next question")]
    AwaitingAdvance,
    #[error("Submit an answer before moving on")]
    NotEvaluated,
    #[error("No search result at position {0}")]
    NoSuchSource(usize),
    #[error("Could not read PDF: {0}")]
    Pdf(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<AIError> for StudyError {
    fn from(err: AIError) -> Self {
        StudyError::Query(QueryResolverError::Ai(err))
    }
}

impl StudyError {
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, StudyError::Query(QueryResolverError::Ai(ai)) if ai.is_quota_exceeded())
    }

    /// Text for the single error banner.
    pub fn banner_message(&self) -> String {
        if self.is_quota_exceeded() {
            QUOTA_ADVISORY.to_string()
        } else {
            self.to_string()
        }
    }
}
