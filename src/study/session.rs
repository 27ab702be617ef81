//! The view-state controller.
//!
//! Exactly one screen is active at a time and the active screen owns all of
//! its data, so leaving a screen discards whatever it was showing. Only the
//! textbook, attached source material, score and incorrect-answer log live
//! outside the view; they survive navigation until the session goes home.

use crate::core::ChatMessage;
use crate::error::StudyError;
use crate::study::flashcards::FlashcardDeck;
use crate::study::quiz::{Evaluation, IncorrectEntry, QuizState, QuizSummary};
use crate::study::sources::{SourceLink, SourceMaterial};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Screen {
    Home,
    Menu,
    Quiz,
    QuizResults,
    Flashcards,
    Summary,
    QuestionAnswer,
    ExamPaper,
    StudyPlan,
    Tutor,
    Sources,
    Review,
}

impl Screen {
    /// Activities offered on the menu, in display order.
    pub const ACTIVITIES: [Screen; 9] = [
        Screen::Quiz,
        Screen::Flashcards,
        Screen::Summary,
        Screen::QuestionAnswer,
        Screen::ExamPaper,
        Screen::StudyPlan,
        Screen::Tutor,
        Screen::Sources,
        Screen::Review,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Screen::Home => "Home",
            Screen::Menu => "Menu",
            Screen::Quiz => "Quiz",
            Screen::QuizResults => "Quiz results",
            Screen::Flashcards => "Flashcards",
            Screen::Summary => "Summary",
            Screen::QuestionAnswer => "Questions & answers",
            Screen::ExamPaper => "Exam paper",
            Screen::StudyPlan => "Study plan",
            Screen::Tutor => "Tutor",
            Screen::Sources => "Sources",
            Screen::Review => "Review mistakes",
        }
    }
}

/// A screen showing one generated document.
#[derive(Debug, Clone, Default)]
pub struct TextPanel {
    /// What was asked for, shown while the reply is pending
    pub request: Option<String>,
    pub content: Option<String>,
}

impl TextPanel {
    /// Forget the previous document before a new request goes out.
    pub(crate) fn start(&mut self, request: impl Into<String>) {
        self.request = Some(request.into());
        self.content = None;
    }
}

#[derive(Debug, Clone, Default)]
pub struct QaPanel {
    /// Answered questions, oldest first
    pub history: Vec<(String, String)>,
    pub pending: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct TutorChat {
    /// Visible conversation; the tutor's instructions are not part of it
    pub transcript: Vec<ChatMessage>,
    /// Tokens of the reply currently streaming in
    pub pending_reply: String,
}

#[derive(Debug, Clone, Default)]
pub struct SourcesPanel {
    pub query: Option<String>,
    pub answer: Option<String>,
    pub links: Vec<SourceLink>,
}

/// The active screen together with the data only that screen shows.
#[derive(Debug, Clone)]
pub enum View {
    Home,
    Menu,
    /// `None` until a quiz has been generated
    Quiz(Option<QuizState>),
    QuizResults(QuizSummary),
    Flashcards(Option<FlashcardDeck>),
    Summary(TextPanel),
    QuestionAnswer(QaPanel),
    ExamPaper(TextPanel),
    StudyPlan(TextPanel),
    Tutor(TutorChat),
    Sources(SourcesPanel),
    /// Reads the session's incorrect-answer log
    Review,
}

impl View {
    pub fn screen(&self) -> Screen {
        match self {
            View::Home => Screen::Home,
            View::Menu => Screen::Menu,
            View::Quiz(_) => Screen::Quiz,
            View::QuizResults(_) => Screen::QuizResults,
            View::Flashcards(_) => Screen::Flashcards,
            View::Summary(_) => Screen::Summary,
            View::QuestionAnswer(_) => Screen::QuestionAnswer,
            View::ExamPaper(_) => Screen::ExamPaper,
            View::StudyPlan(_) => Screen::StudyPlan,
            View::Tutor(_) => Screen::Tutor,
            View::Sources(_) => Screen::Sources,
            View::Review => Screen::Review,
        }
    }

    /// Empty view for `screen`. Results only exist at the end of a quiz.
    fn fresh(screen: Screen) -> Option<View> {
        Some(match screen {
            Screen::Home => View::Home,
            Screen::Menu => View::Menu,
            Screen::Quiz => View::Quiz(None),
            Screen::QuizResults => return None,
            Screen::Flashcards => View::Flashcards(None),
            Screen::Summary => View::Summary(TextPanel::default()),
            Screen::QuestionAnswer => View::QuestionAnswer(QaPanel::default()),
            Screen::ExamPaper => View::ExamPaper(TextPanel::default()),
            Screen::StudyPlan => View::StudyPlan(TextPanel::default()),
            Screen::Tutor => View::Tutor(TutorChat::default()),
            Screen::Sources => View::Sources(SourcesPanel::default()),
            Screen::Review => View::Review,
        })
    }
}

/// Answers graded across every quiz of the session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Score {
    pub correct: usize,
    pub attempted: usize,
}

impl Score {
    pub fn percent(&self) -> Option<u32> {
        (self.attempted > 0).then(|| ((self.correct * 100) as f64 / self.attempted as f64).round() as u32)
    }
}

#[derive(Debug)]
pub struct StudySession {
    textbook: Option<String>,
    source: Option<SourceMaterial>,
    view: View,
    score: Score,
    incorrect_log: Vec<IncorrectEntry>,
    banner: Option<String>,
    busy: bool,
}

impl Default for StudySession {
    fn default() -> Self {
        Self::new()
    }
}

impl StudySession {
    pub fn new() -> Self {
        Self {
            textbook: None,
            source: None,
            view: View::Home,
            score: Score::default(),
            incorrect_log: Vec::new(),
            banner: None,
            busy: false,
        }
    }

    pub fn screen(&self) -> Screen {
        self.view.screen()
    }

    pub fn view(&self) -> &View {
        &self.view
    }

    pub(crate) fn view_mut(&mut self) -> &mut View {
        &mut self.view
    }

    pub fn textbook(&self) -> Option<&str> {
        self.textbook.as_deref()
    }

    pub fn require_textbook(&self) -> Result<&str, StudyError> {
        self.textbook.as_deref().ok_or(StudyError::NoTextbook)
    }

    pub fn source(&self) -> Option<&SourceMaterial> {
        self.source.as_ref()
    }

    pub fn score(&self) -> Score {
        self.score
    }

    pub fn incorrect_log(&self) -> &[IncorrectEntry] {
        &self.incorrect_log
    }

    pub fn banner(&self) -> Option<&str> {
        self.banner.as_deref()
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    /// Names the textbook on the home screen and opens the menu.
    pub fn set_textbook(&mut self, name: &str) -> Result<(), StudyError> {
        self.expect_screen(Screen::Home)?;
        let name = name.trim();
        if name.is_empty() {
            return Err(StudyError::EmptyInput("Textbook name"));
        }
        info!(textbook = %name, "textbook selected");
        self.textbook = Some(name.to_string());
        self.go_to(Screen::Menu)
    }

    /// Switch to `screen` with a fresh, empty view.
    pub fn go_to(&mut self, screen: Screen) -> Result<(), StudyError> {
        if screen == Screen::Home {
            self.go_home();
            return Ok(());
        }
        if self.busy {
            return Err(StudyError::Busy);
        }
        self.require_textbook()?;
        let view = View::fresh(screen).ok_or(StudyError::WrongScreen {
            expected: Screen::Quiz.name(),
            actual: self.screen().name(),
        })?;
        self.show(view);
        Ok(())
    }

    pub fn back_to_menu(&mut self) -> Result<(), StudyError> {
        self.go_to(Screen::Menu)
    }

    /// Start over: forget the textbook, sources, score and mistakes.
    pub fn go_home(&mut self) {
        debug!(from = self.screen().name(), "returning home");
        *self = Self::new();
    }

    /// Replace the view wholesale. Clears the banner like any transition.
    pub(crate) fn show(&mut self, view: View) {
        debug!(from = self.screen().name(), to = view.screen().name(), "screen transition");
        self.view = view;
        self.banner = None;
    }

    pub fn expect_screen(&self, expected: Screen) -> Result<(), StudyError> {
        let actual = self.screen();
        if actual == expected {
            Ok(())
        } else {
            Err(StudyError::WrongScreen { expected: expected.name(), actual: actual.name() })
        }
    }

    pub fn show_error(&mut self, err: &StudyError) {
        warn!(error = %err, screen = self.screen().name(), "showing error banner");
        self.banner = Some(err.banner_message());
    }

    pub fn clear_error(&mut self) {
        self.banner = None;
    }

    /// Marks a backend request as in flight. A second one is refused.
    pub fn begin_request(&mut self) -> Result<(), StudyError> {
        if self.busy {
            return Err(StudyError::Busy);
        }
        self.busy = true;
        self.banner = None;
        Ok(())
    }

    pub fn end_request(&mut self) {
        self.busy = false;
    }

    /// Ends the request bracket and routes a failure to the banner.
    pub fn settle<T>(&mut self, result: Result<T, StudyError>) -> Result<T, StudyError> {
        match result {
            Err(StudyError::Busy) => Err(StudyError::Busy),
            Err(err) => {
                self.end_request();
                self.show_error(&err);
                Err(err)
            }
            Ok(value) => {
                self.end_request();
                Ok(value)
            }
        }
    }

    /// Scores an answer as soon as its verdict is known.
    pub fn record_evaluation(&mut self, evaluation: &Evaluation, entry: Option<IncorrectEntry>) {
        self.score.attempted += 1;
        if evaluation.is_correct() {
            self.score.correct += 1;
        }
        self.incorrect_log.extend(entry);
    }

    pub fn attach_source(&mut self, source: SourceMaterial) {
        info!(name = %source.name, chars = source.char_count(), "source material attached");
        self.source = Some(source);
    }

    pub fn clear_source(&mut self) {
        self.source = None;
    }
}
