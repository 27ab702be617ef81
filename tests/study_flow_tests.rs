
use std::sync::Arc;

use study_companion::clients::mock::MockResponse;
use study_companion::error::{AIError, GeminiError, StudyError, QUOTA_ADVISORY};
use study_companion::study::{
    Difficulty, ExamOptions, PlanOptions, QuizPhase, Screen, SourceMaterial, TextExtractor, Verdict, View,
};
use test_utils::{assistant_on, mock_assistant, ok};

const NUMBERED_QUIZ: &str = "Sure! Here is a short quiz.

1. Which organelle makes ATP?
A) Nucleus
B) Mitochondria
C) Golgi apparatus
D) Lysosome
Answer: B
Explanation: Cellular respiration happens in mitochondria.

2. What does DNA stand for?
A) Deoxyribonucleic acid
B) Dinitrogen acid
Answer: A) Deoxyribonucleic acid
";

fn quota() -> MockResponse {
    MockResponse::Error(AIError::Gemini(GeminiError::QuotaExceeded("requests per day".into())))
}

#[tokio::test]
async fn plain_text_quiz_is_played_to_the_end() {
    let (mut assistant, handle) = assistant_on(
        Screen::Quiz,
        vec![ok(NUMBERED_QUIZ), ok("**Correct!** Mitochondria produce ATP."), ok("Not correct. It is deoxyribonucleic acid.")],
    );

    assert_eq!(assistant.start_quiz("cell biology").await.unwrap(), 2);
    assert!(handle.prompts()[0].contains("cell biology"));

    let eval = assistant.submit_answer("B").await.unwrap();
    assert_eq!(eval.verdict, Verdict::Correct);
    assert!(eval.revealed_answer.is_none());

    // Evaluated questions cannot be answered twice
    let err = assistant.submit_answer("B").await.unwrap_err();
    assert!(matches!(err, StudyError::AwaitingAdvance));
    assert_eq!(handle.call_count(), 2);

    assert_eq!(assistant.next_question().unwrap(), Screen::Quiz);
    let eval = assistant.submit_answer("b").await.unwrap();
    assert_eq!(eval.verdict, Verdict::Incorrect);
    assert_eq!(eval.revealed_answer.as_deref(), Some("Deoxyribonucleic acid"));

    assert_eq!(assistant.next_question().unwrap(), Screen::QuizResults);
    match assistant.session().view() {
        View::QuizResults(summary) => assert_eq!((summary.correct, summary.total), (1, 2)),
        other => panic!("expected results, got {other:?}"),
    }
    let log = assistant.session().incorrect_log();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].given, "Dinitrogen acid");
    assert_eq!(log[0].correct, "Deoxyribonucleic acid");
}

#[tokio::test]
async fn unclear_grader_reply_falls_back_to_the_answer_key() {
    let (mut assistant, _handle) = assistant_on(
        Screen::Quiz,
        vec![ok(NUMBERED_QUIZ), ok("Mitochondria are indeed where ATP is made.")],
    );
    assistant.start_quiz("").await.unwrap();
    let eval = assistant.submit_answer("mitochondria").await.unwrap();
    assert_eq!(eval.verdict, Verdict::Correct);
    assert_eq!(assistant.session().score().correct, 1);
}

#[tokio::test]
async fn advancing_before_grading_is_refused() {
    let (mut assistant, _handle) = assistant_on(Screen::Quiz, vec![ok(NUMBERED_QUIZ)]);
    assistant.start_quiz("").await.unwrap();
    assert!(matches!(assistant.next_question(), Err(StudyError::NotEvaluated)));
    assert!(assistant.session().banner().is_some());
    match assistant.session().view() {
        View::Quiz(Some(quiz)) => assert_eq!(*quiz.phase(), QuizPhase::Answering),
        other => panic!("expected an active quiz, got {other:?}"),
    }
}

#[tokio::test]
async fn unusable_quiz_reply_shows_an_error() {
    let (mut assistant, _handle) = assistant_on(Screen::Quiz, vec![ok("I cannot write a quiz about that.")]);
    let err = assistant.start_quiz("").await.unwrap_err();
    assert!(matches!(err, StudyError::NoQuestions));
    assert_eq!(assistant.session().banner(), Some("The model did not return any quiz questions"));
    assert!(matches!(assistant.session().view(), View::Quiz(None)));
    assert!(!assistant.session().is_busy());
}

#[tokio::test]
async fn quota_errors_show_the_advisory() {
    let (mut assistant, handle) = assistant_on(Screen::Summary, vec![quota()]);
    let err = assistant.summarize("photosynthesis").await.unwrap_err();
    assert!(err.is_quota_exceeded());
    assert_eq!(assistant.session().banner(), Some(QUOTA_ADVISORY));
    // Quota errors are never retried
    assert_eq!(handle.call_count(), 1);
    match assistant.session().view() {
        View::Summary(panel) => assert!(panel.request.is_none() && panel.content.is_none()),
        other => panic!("expected summary, got {other:?}"),
    }
}

#[tokio::test]
async fn new_request_replaces_the_previous_document() {
    let (mut assistant, _handle) = assistant_on(
        Screen::Summary,
        vec![ok("Summary of photosynthesis"), MockResponse::Error(AIError::Mock("offline".into()))],
    );
    assistant.summarize("photosynthesis").await.unwrap();
    assert!(assistant.summarize("respiration").await.is_err());
    match assistant.session().view() {
        View::Summary(panel) => assert!(panel.content.is_none(), "stale summary still visible"),
        other => panic!("expected summary, got {other:?}"),
    }
}

#[tokio::test]
async fn switching_screens_leaves_no_stale_data() {
    let (mut assistant, _handle) = assistant_on(Screen::QuestionAnswer, vec![ok("Chlorophyll absorbs light.")]);
    assistant.ask("What does chlorophyll do?").await.unwrap();
    match assistant.session().view() {
        View::QuestionAnswer(qa) => assert_eq!(qa.history.len(), 1),
        other => panic!("expected Q&A, got {other:?}"),
    }

    assistant.go_to(Screen::Tutor).unwrap();
    assistant.go_to(Screen::QuestionAnswer).unwrap();
    match assistant.session().view() {
        View::QuestionAnswer(qa) => assert!(qa.history.is_empty() && qa.pending.is_none()),
        other => panic!("expected Q&A, got {other:?}"),
    }
}

#[tokio::test]
async fn flashcards_from_labelled_text() {
    let reply = "Front: Osmosis\nBack: Diffusion of water across a membrane\n\nFront: ATP\nBack: Energy currency of the cell";
    let (mut assistant, _handle) = assistant_on(Screen::Flashcards, vec![ok(reply)]);
    assert_eq!(assistant.load_flashcards("membranes").await.unwrap(), 2);

    assistant.flip_card().unwrap();
    assistant.next_card().unwrap();
    match assistant.session().view() {
        View::Flashcards(Some(deck)) => {
            assert_eq!(deck.topic(), "membranes");
            assert!(!deck.is_flipped());
            assert_eq!(deck.visible_side(), "ATP");
        }
        other => panic!("expected a deck, got {other:?}"),
    }
}

#[tokio::test]
async fn card_actions_need_a_deck() {
    let (mut assistant, _handle) = assistant_on(Screen::Flashcards, vec![]);
    assert!(matches!(assistant.flip_card(), Err(StudyError::NoFlashcards)));
    assistant.back_to_menu().unwrap();
    assert!(matches!(assistant.next_card(), Err(StudyError::WrongScreen { .. })));
}

#[tokio::test]
async fn review_quiz_is_built_from_mistakes() {
    let (mut assistant, handle) = assistant_on(
        Screen::Quiz,
        vec![
            ok(NUMBERED_QUIZ),
            ok("Incorrect."),
            ok(r#"[{"question": "Where is ATP synthase found?", "options": ["Inner mitochondrial membrane", "Cell wall"], "answer": "A"}]"#),
        ],
    );
    assistant.start_quiz("").await.unwrap();
    assistant.submit_answer("A").await.unwrap();

    assistant.go_to(Screen::Review).unwrap();
    assert_eq!(assistant.review_mistakes().await.unwrap(), 1);
    let prompt = handle.last_prompt().unwrap();
    assert!(prompt.contains("Which organelle makes ATP?"));
    assert!(prompt.contains("Student answered: Nucleus"));

    match assistant.session().view() {
        View::Quiz(Some(quiz)) => assert_eq!(quiz.current().unwrap().answer, "Inner mitochondrial membrane"),
        other => panic!("expected review quiz, got {other:?}"),
    }
}

#[tokio::test]
async fn review_without_mistakes_is_an_error() {
    let (mut assistant, handle) = assistant_on(Screen::Review, vec![]);
    assert!(matches!(assistant.review_mistakes().await, Err(StudyError::NothingToReview)));
    assert_eq!(handle.call_count(), 0);
}

#[tokio::test]
async fn exam_and_plan_use_their_options() {
    let (mut assistant, handle) = assistant_on(Screen::ExamPaper, vec![ok("EXAM"), ok("PLAN")]);
    let options = ExamOptions {
        topic: Some("genetics".into()),
        question_count: 500,
        difficulty: Difficulty::Hard,
        duration_minutes: 90,
        include_answer_key: false,
    };
    assert_eq!(assistant.generate_exam(options).await.unwrap(), "EXAM");
    let prompt = handle.last_prompt().unwrap();
    assert!(prompt.contains("90-minute hard exam paper on the topic \"genetics\" with 50 questions"));
    assert!(!prompt.contains("Answer Key"));

    assistant.go_to(Screen::StudyPlan).unwrap();
    let plan = PlanOptions { days: 7, hours_per_day: 2.0, goal: Some("pass the final".into()) };
    assert_eq!(assistant.generate_plan(plan).await.unwrap(), "PLAN");
    assert!(handle.last_prompt().unwrap().contains("7-day study plan"));
    match assistant.session().view() {
        View::StudyPlan(panel) => assert_eq!(panel.content.as_deref(), Some("PLAN")),
        other => panic!("expected plan, got {other:?}"),
    }
}

#[tokio::test]
async fn tutor_streams_and_keeps_the_conversation() {
    let (mut assistant, handle) = assistant_on(
        Screen::Tutor,
        vec![ok("Photosynthesis turns light into chemical energy."), ok("Chlorophyll is green.")],
    );
    let mut tokens = Vec::new();
    assistant
        .tutor_send("Explain photosynthesis", |t| tokens.push(t.to_string()))
        .await
        .unwrap();
    assert!(tokens.len() > 1);
    assistant.tutor_send("Why are leaves green?", |_| {}).await.unwrap();

    // The second request carries the instructions and the whole conversation
    let prompt = handle.last_prompt().unwrap();
    assert!(prompt.starts_with("Student: You are a study assistant"));
    assert!(prompt.contains("Student: Explain photosynthesis"));
    assert!(prompt.contains("Tutor: Photosynthesis turns light into chemical energy."));

    match assistant.session().view() {
        View::Tutor(chat) => assert_eq!(chat.transcript.len(), 4),
        other => panic!("expected tutor, got {other:?}"),
    }
    assert!(matches!(assistant.tutor_send("   ", |_| {}).await, Err(StudyError::EmptyInput("Message"))));
}

#[tokio::test]
async fn web_search_links_can_become_source_material() {
    let answer = "Light reactions happen in the thylakoids [Khan Academy](https://www.khanacademy.org/photo). \
                  See also https://en.wikipedia.org/wiki/Photosynthesis.";
    let (mut assistant, handle) = assistant_on(Screen::Sources, vec![ok(answer), ok("Summary using the source")]);

    let links = assistant.web_search("light reactions").await.unwrap();
    assert_eq!(links.len(), 2);
    assert!(matches!(assistant.attach_source(5), Err(StudyError::NoSuchSource(5))));
    assistant.attach_source(0).unwrap();
    assert_eq!(assistant.session().source().unwrap().name, "Khan Academy");

    assistant.go_to(Screen::Summary).unwrap();
    assistant.summarize("").await.unwrap();
    let prompt = handle.last_prompt().unwrap();
    assert!(prompt.contains("<material>"));
    assert!(prompt.contains("Source: https://www.khanacademy.org/photo"));
}

#[derive(Debug)]
struct FakeExtractor;

impl TextExtractor for FakeExtractor {
    fn extract(&self, bytes: &[u8]) -> Result<String, StudyError> {
        String::from_utf8(bytes.to_vec()).map_err(|e| StudyError::Pdf(e.to_string()))
    }
}

#[tokio::test]
async fn pdf_on_home_names_the_textbook() {
    let (assistant, _handle) = mock_assistant(vec![]);
    let mut assistant = assistant.with_extractor(Arc::new(FakeExtractor));

    let chars = assistant
        .ingest_pdf(b"Chapter 1: The chemistry of life".to_vec(), "intro_to_biology.pdf")
        .await
        .unwrap();
    assert_eq!(chars, 32);
    assert_eq!(assistant.session().textbook(), Some("intro to biology"));
    assert_eq!(assistant.session().screen(), Screen::Menu);
    assert_eq!(
        assistant.session().source(),
        Some(&SourceMaterial::new("intro_to_biology.pdf", "Chapter 1: The chemistry of life"))
    );
}

#[tokio::test]
async fn pdf_with_a_punctuation_only_stem_still_names_the_textbook() {
    let (assistant, _handle) = mock_assistant(vec![]);
    let mut assistant = assistant.with_extractor(Arc::new(FakeExtractor));

    assistant.ingest_pdf(b"Lecture notes".to_vec(), "__.pdf").await.unwrap();
    assert_eq!(assistant.session().textbook(), Some("__.pdf"));
    assert_eq!(assistant.session().screen(), Screen::Menu);
    assert!(assistant.session().banner().is_none());
}

#[tokio::test]
async fn unreadable_pdf_reports_on_the_banner() {
    let (mut assistant, _handle) = assistant_on(Screen::Sources, vec![]);
    let err = assistant.ingest_pdf(b"not a pdf".to_vec(), "notes.pdf").await.unwrap_err();
    assert!(matches!(err, StudyError::Pdf(_)));
    assert!(assistant.session().banner().unwrap().starts_with("Could not read PDF"));
    assert!(assistant.session().source().is_none());
}

#[tokio::test]
async fn going_home_forgets_everything() {
    let (mut assistant, _handle) = assistant_on(Screen::Quiz, vec![ok(NUMBERED_QUIZ), ok("Incorrect")]);
    assistant.start_quiz("").await.unwrap();
    assistant.submit_answer("A").await.unwrap();
    assert_eq!(assistant.session().score().attempted, 1);

    assistant.go_home();
    let session = assistant.session();
    assert_eq!(session.screen(), Screen::Home);
    assert!(session.textbook().is_none());
    assert_eq!(session.score().attempted, 0);
    assert!(session.incorrect_log().is_empty());
    assert!(matches!(assistant.go_to(Screen::Quiz), Err(StudyError::NoTextbook)));
}
