use crate::config::{clamp_count, StudyConfig};
use crate::core::{ChatMessage, LowLevelClient, QueryResolver};
use crate::error::{AIError, StudyError};
use crate::study::flashcards::{Flashcard, FlashcardDeck};
use crate::study::parse;
use crate::study::prompts::{self, ExamOptions, PlanOptions, PromptContext};
use crate::study::quiz::{Evaluation, QuizQuestion, QuizState};
use crate::study::session::{Screen, SourcesPanel, StudySession, TextPanel, View};
use crate::study::sources::{PdfTextExtractor, SourceLink, SourceMaterial, TextExtractor};
use futures_util::StreamExt;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, instrument, warn};

const WHOLE_TEXTBOOK: &str = "Whole textbook";
const REVIEW_TOPIC: &str = "Review of earlier mistakes";
const UNTITLED_TEXTBOOK: &str = "Untitled textbook";

fn topic_arg(topic: &str) -> Option<&str> {
    Some(topic.trim()).filter(|t| !t.is_empty())
}

/// Textbook name for a file opened from the home screen: the file stem with
/// `_`/`-` as spaces, else the file name, else a placeholder.
fn textbook_name(file_name: &str) -> String {
    let stem = Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .map(|s| s.replace(['_', '-'], " "))
        .unwrap_or_default();
    let name = [stem.trim(), file_name.trim()]
        .into_iter()
        .find(|candidate| !candidate.is_empty())
        .unwrap_or(UNTITLED_TEXTBOOK)
        .to_string();
    name
}

fn required<'a>(text: &'a str, what: &'static str) -> Result<&'a str, StudyError> {
    topic_arg(text).ok_or(StudyError::EmptyInput(what))
}

/// Drives a `StudySession` against a generative backend.
///
/// Each activity validates the active screen, brackets its backend request
/// with the session's busy flag and writes the reply into the active view.
/// Failures are shown on the session banner and returned to the caller.
#[derive(Debug)]
pub struct StudyAssistant<C: LowLevelClient> {
    session: StudySession,
    resolver: QueryResolver<C>,
    config: StudyConfig,
    extractor: Arc<dyn TextExtractor>,
}

impl<C: LowLevelClient> StudyAssistant<C> {
    pub fn new(resolver: QueryResolver<C>, config: StudyConfig) -> Self {
        Self {
            session: StudySession::new(),
            resolver,
            config,
            extractor: Arc::new(PdfTextExtractor),
        }
    }

    #[must_use]
    pub fn with_extractor(mut self, extractor: Arc<dyn TextExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn session(&self) -> &StudySession {
        &self.session
    }

    pub fn config(&self) -> &StudyConfig {
        &self.config
    }

    fn context(&self) -> Result<PromptContext<'_>, StudyError> {
        Ok(PromptContext {
            textbook: self.session.require_textbook()?,
            source: self.session.source(),
            max_source_chars: self.config.max_source_chars,
        })
    }

    // ── Navigation ──────────────────────────────────────────────────────

    pub fn set_textbook(&mut self, name: &str) -> Result<(), StudyError> {
        let result = self.session.set_textbook(name);
        self.session.settle(result)
    }

    pub fn go_to(&mut self, screen: Screen) -> Result<(), StudyError> {
        let result = self.session.go_to(screen);
        self.session.settle(result)
    }

    pub fn back_to_menu(&mut self) -> Result<(), StudyError> {
        self.go_to(Screen::Menu)
    }

    pub fn go_home(&mut self) {
        self.session.go_home();
    }

    pub fn clear_error(&mut self) {
        self.session.clear_error();
    }

    pub fn detach_source(&mut self) {
        self.session.clear_source();
    }

    // ── Quiz ────────────────────────────────────────────────────────────

    /// Generates a quiz on `topic` (blank for the whole book). Returns the question count.
    #[instrument(skip(self))]
    pub async fn start_quiz(&mut self, topic: &str) -> Result<usize, StudyError> {
        let result = self.start_quiz_inner(topic).await;
        self.session.settle(result)
    }

    async fn start_quiz_inner(&mut self, topic: &str) -> Result<usize, StudyError> {
        self.session.expect_screen(Screen::Quiz)?;
        let topic = topic_arg(topic);
        let prompt = prompts::quiz(&self.context()?, topic, self.config.question_count);
        self.session.begin_request()?;
        self.session.show(View::Quiz(None));

        let questions = self.fetch_questions(prompt, self.config.question_count).await?;
        let count = questions.len();
        let quiz = QuizState::new(topic.unwrap_or(WHOLE_TEXTBOOK), questions)?;
        self.session.show(View::Quiz(Some(quiz)));
        info!(count, "quiz ready");
        Ok(count)
    }

    async fn fetch_questions(&self, prompt: String, limit: usize) -> Result<Vec<QuizQuestion>, StudyError> {
        let response = self.resolver.query::<QuizQuestion>(prompt).await?;
        let mut questions = if response.has_data() {
            parse::tidy_questions(response.data_only().into_iter().cloned().collect())
        } else {
            parse::parse_quiz(&response.text_content())
        };
        if questions.is_empty() {
            warn!("reply contained no usable questions");
            return Err(StudyError::NoQuestions);
        }
        questions.truncate(limit);
        Ok(questions)
    }

    fn active_quiz(&self) -> Result<&QuizState, StudyError> {
        match self.session.view() {
            View::Quiz(Some(quiz)) => Ok(quiz),
            View::Quiz(None) => Err(StudyError::NoQuestions),
            other => Err(StudyError::WrongScreen {
                expected: Screen::Quiz.name(),
                actual: other.screen().name(),
            }),
        }
    }

    fn active_quiz_mut(&mut self) -> Result<&mut QuizState, StudyError> {
        let actual = self.session.screen();
        match self.session.view_mut() {
            View::Quiz(Some(quiz)) => Ok(quiz),
            View::Quiz(None) => Err(StudyError::NoQuestions),
            _ => Err(StudyError::WrongScreen { expected: Screen::Quiz.name(), actual: actual.name() }),
        }
    }

    /// Grades `answer` for the current question. The score changes as soon as
    /// the verdict is in; the correct answer is revealed on a miss.
    #[instrument(skip(self))]
    pub async fn submit_answer(&mut self, answer: &str) -> Result<Evaluation, StudyError> {
        let result = self.submit_answer_inner(answer).await;
        self.session.settle(result)
    }

    async fn submit_answer_inner(&mut self, answer: &str) -> Result<Evaluation, StudyError> {
        let question = self.active_quiz()?.begin_submit(answer)?.clone();
        let given = question.expand_choice(answer);
        let prompt = prompts::grade_answer(&self.context()?, &question, &given);
        self.session.begin_request()?;

        let feedback = self.resolver.ask_text(prompt).await?;
        let verdict = parse::sniff_verdict(&feedback);
        let (evaluation, entry) = self.active_quiz_mut()?.apply_evaluation(answer, verdict, feedback)?;
        self.session.record_evaluation(&evaluation, entry);
        info!(verdict = ?evaluation.verdict, "answer graded");
        Ok(evaluation)
    }

    /// Moves past an evaluated question; opens the results after the last one.
    pub fn next_question(&mut self) -> Result<Screen, StudyError> {
        let result = self.next_question_inner();
        self.session.settle(result)
    }

    fn next_question_inner(&mut self) -> Result<Screen, StudyError> {
        let quiz = self.active_quiz_mut()?;
        if quiz.advance()? {
            return Ok(Screen::Quiz);
        }
        let summary = quiz.summary();
        info!(correct = summary.correct, total = summary.total, "quiz finished");
        self.session.show(View::QuizResults(summary));
        Ok(Screen::QuizResults)
    }

    /// New quiz built from the incorrect-answer log.
    #[instrument(skip(self))]
    pub async fn review_mistakes(&mut self) -> Result<usize, StudyError> {
        let result = self.review_mistakes_inner().await;
        self.session.settle(result)
    }

    async fn review_mistakes_inner(&mut self) -> Result<usize, StudyError> {
        self.session.expect_screen(Screen::Review)?;
        let log = self.session.incorrect_log();
        if log.is_empty() {
            return Err(StudyError::NothingToReview);
        }
        let prompt = prompts::review_mistakes(&self.context()?, log, self.config.question_count);
        self.session.begin_request()?;

        let questions = self.fetch_questions(prompt, self.config.question_count).await?;
        let count = questions.len();
        self.session.show(View::Quiz(Some(QuizState::new(REVIEW_TOPIC, questions)?)));
        Ok(count)
    }

    // ── Flashcards ──────────────────────────────────────────────────────

    #[instrument(skip(self))]
    pub async fn load_flashcards(&mut self, topic: &str) -> Result<usize, StudyError> {
        let result = self.load_flashcards_inner(topic).await;
        self.session.settle(result)
    }

    async fn load_flashcards_inner(&mut self, topic: &str) -> Result<usize, StudyError> {
        self.session.expect_screen(Screen::Flashcards)?;
        let topic = topic_arg(topic);
        let prompt = prompts::flashcards(&self.context()?, topic, self.config.flashcard_count);
        self.session.begin_request()?;
        self.session.show(View::Flashcards(None));

        let response = self.resolver.query::<Flashcard>(prompt).await?;
        let mut cards: Vec<Flashcard> = if response.has_data() {
            response.data_only().into_iter().cloned().collect()
        } else {
            parse::parse_flashcards(&response.text_content())
        };
        cards.retain(|c| !c.front.trim().is_empty() && !c.back.trim().is_empty());
        cards.truncate(self.config.flashcard_count);
        let deck = FlashcardDeck::new(topic.unwrap_or(WHOLE_TEXTBOOK), cards)?;
        let count = deck.position().1;
        self.session.show(View::Flashcards(Some(deck)));
        Ok(count)
    }

    fn deck_op(&mut self, op: impl FnOnce(&mut FlashcardDeck)) -> Result<(), StudyError> {
        let actual = self.session.screen();
        let result = match self.session.view_mut() {
            View::Flashcards(Some(deck)) => {
                op(deck);
                Ok(())
            }
            View::Flashcards(None) => Err(StudyError::NoFlashcards),
            _ => Err(StudyError::WrongScreen { expected: Screen::Flashcards.name(), actual: actual.name() }),
        };
        self.session.settle(result)
    }

    pub fn flip_card(&mut self) -> Result<(), StudyError> {
        self.deck_op(FlashcardDeck::flip)
    }

    pub fn next_card(&mut self) -> Result<(), StudyError> {
        self.deck_op(FlashcardDeck::next)
    }

    pub fn previous_card(&mut self) -> Result<(), StudyError> {
        self.deck_op(FlashcardDeck::previous)
    }

    // ── Documents ───────────────────────────────────────────────────────

    fn text_panel_mut(&mut self, screen: Screen) -> Option<&mut TextPanel> {
        match (screen, self.session.view_mut()) {
            (Screen::Summary, View::Summary(panel))
            | (Screen::ExamPaper, View::ExamPaper(panel))
            | (Screen::StudyPlan, View::StudyPlan(panel)) => Some(panel),
            _ => None,
        }
    }

    /// Clears the panel, asks for the document and fills the panel with it.
    async fn generate_document(&mut self, screen: Screen, request: String, prompt: String) -> Result<String, StudyError> {
        self.session.begin_request()?;
        if let Some(panel) = self.text_panel_mut(screen) {
            panel.start(request);
        }
        let result = self.resolver.ask_text(prompt).await;
        if let Some(panel) = self.text_panel_mut(screen) {
            match &result {
                Ok(text) => panel.content = Some(text.clone()),
                Err(_) => *panel = TextPanel::default(),
            }
        }
        Ok(result?)
    }

    #[instrument(skip(self))]
    pub async fn summarize(&mut self, topic: &str) -> Result<String, StudyError> {
        let result = self.summarize_inner(topic).await;
        self.session.settle(result)
    }

    async fn summarize_inner(&mut self, topic: &str) -> Result<String, StudyError> {
        self.session.expect_screen(Screen::Summary)?;
        let topic = topic_arg(topic);
        let prompt = prompts::summary(&self.context()?, topic);
        let request = topic.unwrap_or(WHOLE_TEXTBOOK).to_string();
        self.generate_document(Screen::Summary, request, prompt).await
    }

    #[instrument(skip(self))]
    pub async fn generate_exam(&mut self, options: ExamOptions) -> Result<String, StudyError> {
        let result = self.generate_exam_inner(options).await;
        self.session.settle(result)
    }

    async fn generate_exam_inner(&mut self, options: ExamOptions) -> Result<String, StudyError> {
        self.session.expect_screen(Screen::ExamPaper)?;
        let options = ExamOptions { question_count: clamp_count(options.question_count), ..options };
        let prompt = prompts::exam_paper(&self.context()?, &options);
        let request = format!(
            "{} questions, {}, {} minutes",
            options.question_count, options.difficulty, options.duration_minutes
        );
        self.generate_document(Screen::ExamPaper, request, prompt).await
    }

    /// Study plan that gives extra time to the questions missed so far.
    #[instrument(skip(self))]
    pub async fn generate_plan(&mut self, options: PlanOptions) -> Result<String, StudyError> {
        let result = self.generate_plan_inner(options).await;
        self.session.settle(result)
    }

    async fn generate_plan_inner(&mut self, options: PlanOptions) -> Result<String, StudyError> {
        self.session.expect_screen(Screen::StudyPlan)?;
        let options = PlanOptions { days: options.days.max(1), ..options };
        let prompt = prompts::study_plan(&self.context()?, &options, self.session.incorrect_log());
        let request = format!("{} days, {} h/day", options.days, options.hours_per_day);
        self.generate_document(Screen::StudyPlan, request, prompt).await
    }

    // ── Questions & answers ─────────────────────────────────────────────

    #[instrument(skip(self))]
    pub async fn ask(&mut self, question: &str) -> Result<String, StudyError> {
        let result = self.ask_inner(question).await;
        self.session.settle(result)
    }

    async fn ask_inner(&mut self, question: &str) -> Result<String, StudyError> {
        self.session.expect_screen(Screen::QuestionAnswer)?;
        let question = required(question, "Question")?;
        let prompt = prompts::question_answer(&self.context()?, question);
        self.session.begin_request()?;
        if let View::QuestionAnswer(qa) = self.session.view_mut() {
            qa.pending = Some(question.to_string());
        }

        let result = self.resolver.ask_text(prompt).await;
        if let View::QuestionAnswer(qa) = self.session.view_mut() {
            qa.pending = None;
            if let Ok(answer) = &result {
                qa.history.push((question.to_string(), answer.clone()));
            }
        }
        Ok(result?)
    }

    // ── Tutor ───────────────────────────────────────────────────────────

    /// Sends `message` to the tutor, calling `on_token` for every streamed
    /// piece of the reply. A failed exchange is removed from the transcript.
    #[instrument(skip(self, on_token))]
    pub async fn tutor_send<F>(&mut self, message: &str, on_token: F) -> Result<String, StudyError>
    where
        F: FnMut(&str),
    {
        let result = self.tutor_send_inner(message, on_token).await;
        self.session.settle(result)
    }

    async fn tutor_send_inner<F>(&mut self, message: &str, mut on_token: F) -> Result<String, StudyError>
    where
        F: FnMut(&str),
    {
        self.session.expect_screen(Screen::Tutor)?;
        let message = required(message, "Message")?;
        let instructions = prompts::tutor_system(&self.context()?);
        self.session.begin_request()?;

        let mut messages = vec![ChatMessage::user(instructions), ChatMessage::model(prompts::TUTOR_ACK)];
        if let View::Tutor(chat) = self.session.view_mut() {
            chat.transcript.push(ChatMessage::user(message));
            chat.pending_reply.clear();
            messages.extend(chat.transcript.iter().cloned());
        }

        let outcome = self.stream_reply(messages, &mut on_token).await;
        if let View::Tutor(chat) = self.session.view_mut() {
            chat.pending_reply.clear();
            match &outcome {
                Ok(reply) => chat.transcript.push(ChatMessage::model(reply.clone())),
                Err(_) => {
                    chat.transcript.pop();
                }
            }
        }
        outcome
    }

    async fn stream_reply<F>(&mut self, messages: Vec<ChatMessage>, on_token: &mut F) -> Result<String, StudyError>
    where
        F: FnMut(&str),
    {
        let mut stream = self.resolver.stream_chat(messages).await?;
        let mut reply = String::new();
        while let Some(token) = stream.next().await {
            let token = token?;
            on_token(&token);
            reply.push_str(&token);
            if let View::Tutor(chat) = self.session.view_mut() {
                chat.pending_reply.push_str(&token);
            }
        }
        let reply = reply.trim().to_string();
        if reply.is_empty() {
            return Err(AIError::Stream("the tutor sent an empty reply".to_string()).into());
        }
        Ok(reply)
    }

    // ── Sources ─────────────────────────────────────────────────────────

    /// Extracts text from a PDF and attaches it as source material. On the
    /// home screen the file also names the textbook.
    #[instrument(skip(self, bytes), fields(bytes = bytes.len()))]
    pub async fn ingest_pdf(&mut self, bytes: Vec<u8>, name: &str) -> Result<usize, StudyError> {
        let result = self.ingest_pdf_inner(bytes, name).await;
        self.session.settle(result)
    }

    async fn ingest_pdf_inner(&mut self, bytes: Vec<u8>, name: &str) -> Result<usize, StudyError> {
        let screen = self.session.screen();
        if !matches!(screen, Screen::Home | Screen::Sources) {
            return Err(StudyError::WrongScreen { expected: Screen::Sources.name(), actual: screen.name() });
        }
        self.session.begin_request()?;

        let extractor = Arc::clone(&self.extractor);
        let text = tokio::task::spawn_blocking(move || extractor.extract(&bytes))
            .await
            .map_err(|e| StudyError::Pdf(e.to_string()))??;
        let source = SourceMaterial::new(name, text);
        let chars = source.char_count();
        self.session.attach_source(source);
        self.session.end_request();

        if screen == Screen::Home {
            self.session.set_textbook(&textbook_name(name))?;
        }
        Ok(chars)
    }

    /// Grounded web search; the cited links land on the sources screen.
    #[instrument(skip(self))]
    pub async fn web_search(&mut self, query: &str) -> Result<Vec<SourceLink>, StudyError> {
        let result = self.web_search_inner(query).await;
        self.session.settle(result)
    }

    async fn web_search_inner(&mut self, query: &str) -> Result<Vec<SourceLink>, StudyError> {
        self.session.expect_screen(Screen::Sources)?;
        let query = required(query, "Search query")?;
        let prompt = prompts::web_search(self.session.require_textbook()?, query);
        self.session.begin_request()?;
        if let View::Sources(panel) = self.session.view_mut() {
            *panel = SourcesPanel { query: Some(query.to_string()), ..SourcesPanel::default() };
        }

        let result = self.resolver.search(prompt).await;
        let links = result.as_deref().map(parse::parse_sources).unwrap_or_default();
        if let View::Sources(panel) = self.session.view_mut() {
            match &result {
                Ok(answer) => {
                    panel.answer = Some(answer.clone());
                    panel.links = links.clone();
                }
                Err(_) => *panel = SourcesPanel::default(),
            }
        }
        result?;
        info!(links = links.len(), "search finished");
        Ok(links)
    }

    /// Attaches the last search answer as source material, credited to the
    /// link at `index`.
    pub fn attach_source(&mut self, index: usize) -> Result<(), StudyError> {
        let result = self.attach_source_inner(index);
        self.session.settle(result)
    }

    fn attach_source_inner(&mut self, index: usize) -> Result<(), StudyError> {
        self.session.expect_screen(Screen::Sources)?;
        let material = match self.session.view() {
            View::Sources(SourcesPanel { answer: Some(answer), links, .. }) => {
                let link = links.get(index).ok_or(StudyError::NoSuchSource(index))?;
                SourceMaterial::new(link.title.clone(), format!("{answer}\n\nSource: {}", link.url))
            }
            _ => return Err(StudyError::NoSuchSource(index)),
        };
        self.session.attach_source(material);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::mock::{MockClient, MockHandle, MockResponse};
    use crate::core::RetryConfig;
    use crate::error::GeminiError;
    use crate::error::QUOTA_ADVISORY;
    use crate::study::quiz::Verdict;

    fn assistant_on(screen: Screen) -> (StudyAssistant<MockClient>, Arc<MockHandle>) {
        let (client, handle) = MockClient::new();
        let resolver = QueryResolver::new(client, RetryConfig::none());
        let mut assistant = StudyAssistant::new(resolver, StudyConfig::default());
        assistant.set_textbook("Campbell Biology").unwrap();
        assistant.go_to(screen).unwrap();
        (assistant, handle)
    }

    fn ok(text: &str) -> MockResponse {
        MockResponse::Success(text.to_string())
    }

    const QUIZ_JSON: &str = r#"[
        {"question": "Powerhouse of the cell?", "options": ["Nucleus", "Mitochondria"], "answer": "Mitochondria"},
        {"question": "Unit of heredity?", "options": ["Gene", "Lipid"], "answer": "A"}
    ]"#;

    #[tokio::test]
    async fn quiz_round_trip_through_the_model() {
        let (mut assistant, handle) = assistant_on(Screen::Quiz);
        handle.add_responses([ok(QUIZ_JSON), ok("Incorrect. It is the mitochondria."), ok("Correct!")]);

        assert_eq!(assistant.start_quiz("cells").await.unwrap(), 2);
        assert!(handle.last_prompt().unwrap().contains("Response Format"));

        let eval = assistant.submit_answer("a").await.unwrap();
        assert_eq!(eval.verdict, Verdict::Incorrect);
        assert_eq!(eval.revealed_answer.as_deref(), Some("Mitochondria"));
        assert!(handle.last_prompt().unwrap().contains("Student's answer: Nucleus"));

        assert_eq!(assistant.next_question().unwrap(), Screen::Quiz);
        assert!(assistant.submit_answer("Gene").await.unwrap().is_correct());
        assert_eq!(assistant.next_question().unwrap(), Screen::QuizResults);

        let score = assistant.session().score();
        assert_eq!((score.correct, score.attempted), (1, 2));
        assert_eq!(assistant.session().incorrect_log()[0].given, "Nucleus");
    }

    #[tokio::test]
    async fn grading_failure_keeps_the_question_open() {
        let (mut assistant, handle) = assistant_on(Screen::Quiz);
        handle.add_responses([
            ok(QUIZ_JSON),
            MockResponse::Error(AIError::Gemini(GeminiError::QuotaExceeded("daily".into()))),
            ok("Correct"),
        ]);
        assistant.start_quiz("").await.unwrap();

        let err = assistant.submit_answer("B").await.unwrap_err();
        assert!(err.is_quota_exceeded());
        assert_eq!(assistant.session().banner(), Some(QUOTA_ADVISORY));
        assert!(!assistant.session().is_busy());
        assert_eq!(assistant.session().score().attempted, 0);

        assert!(assistant.submit_answer("B").await.unwrap().is_correct());
        assert!(assistant.session().banner().is_none());
    }

    #[tokio::test]
    async fn failed_tutor_exchange_leaves_no_trace() {
        let (mut assistant, handle) = assistant_on(Screen::Tutor);
        handle.add_responses([ok("Osmosis moves water."), MockResponse::Error(AIError::Mock("down".into()))]);

        let mut streamed = Vec::new();
        let reply = assistant.tutor_send("What is osmosis?", |t| streamed.push(t.to_string())).await.unwrap();
        assert_eq!(reply, "Osmosis moves water.");
        assert_eq!(streamed.concat(), "Osmosis moves water.");
        assert!(streamed.len() > 1);

        assert!(assistant.tutor_send("And diffusion?", |_| {}).await.is_err());
        match assistant.session().view() {
            View::Tutor(chat) => {
                assert_eq!(chat.transcript.len(), 2);
                assert!(chat.pending_reply.is_empty());
            }
            other => panic!("unexpected view {other:?}"),
        }
    }

    #[test]
    fn textbook_names_from_file_names() {
        assert_eq!(textbook_name("intro_to-biology.pdf"), "intro to biology");
        assert_eq!(textbook_name("__.pdf"), "__.pdf");
        assert_eq!(textbook_name("  "), UNTITLED_TEXTBOOK);
    }

    #[tokio::test]
    async fn actions_check_the_active_screen() {
        let (mut assistant, handle) = assistant_on(Screen::Summary);
        let err = assistant.start_quiz("cells").await.unwrap_err();
        assert!(matches!(err, StudyError::WrongScreen { expected: "Quiz", actual: "Summary" }));
        assert_eq!(handle.call_count(), 0);
        assert!(assistant.session().banner().is_some());
    }
}
