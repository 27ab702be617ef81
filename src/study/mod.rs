//! The study assistant: a view-state session driven by a generative backend.

pub mod assistant;
pub mod flashcards;
pub mod parse;
pub mod prompts;
pub mod quiz;
pub mod session;
pub mod sources;

pub use assistant::StudyAssistant;
pub use flashcards::{Flashcard, FlashcardDeck};
pub use prompts::{Difficulty, ExamOptions, PlanOptions};
pub use quiz::{Evaluation, IncorrectEntry, QuizPhase, QuizQuestion, QuizState, QuizSummary, Verdict};
pub use session::{QaPanel, Score, Screen, SourcesPanel, StudySession, TextPanel, TutorChat, View};
pub use sources::{PdfTextExtractor, SourceLink, SourceMaterial, TextExtractor};
