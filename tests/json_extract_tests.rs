use serde::Deserialize;
use study_companion::json_utils::{extract_all, strip_code_fences};
use study_companion::study::{Flashcard, QuizQuestion};

#[test]
fn flashcards_from_a_bare_array() {
    let s = r#"[{"front":"Osmosis","back":"Water diffusion"},{"term":"ATP","definition":"Energy currency"}]"#;
    let cards: Vec<Flashcard> = extract_all(s);
    assert_eq!(cards.len(), 2);
    assert_eq!(cards[1].front, "ATP");
    assert_eq!(cards[1].back, "Energy currency");
}

#[test]
fn flashcards_between_chatty_text() {
    let s = r#"Here you go: {"front":"Mitosis","back":"Division"} and also {"note":"ignore me"} then {"front":"Meiosis","back":"Gametes"}. Good luck!"#;
    let cards: Vec<Flashcard> = extract_all(s);
    assert_eq!(cards.len(), 2);
    assert_eq!(cards[0].front, "Mitosis");
    assert_eq!(cards[1].back, "Gametes");
}

#[test]
fn questions_inside_a_wrapper_object() {
    let s = r#"```json
{"quiz": {"title": "Cells", "questions": [
  {"question": "Powerhouse of the cell?", "options": ["Nucleus", "Mitochondria"], "answer": "B"},
  {"prompt": "Unit of heredity?", "choices": {"A": "Gene", "B": "Lipid"}, "correctAnswer": "A"}
]}}
```"#;
    let questions: Vec<QuizQuestion> = extract_all(strip_code_fences(s));
    assert_eq!(questions.len(), 2);
    assert_eq!(questions[0].correct_text(), "Mitochondria");
    assert_eq!(questions[1].question, "Unit of heredity?");
    assert_eq!(questions[1].options, vec!["Gene", "Lipid"]);
    assert_eq!(questions[1].correct_text(), "Gene");
}

#[test]
fn array_and_loose_object_are_both_collected() {
    let s = r#"First batch [{"question":"Q1?","answer":"a1"},{"question":"Q2?","answer":"a2"}] and one more {"question":"Q3?","answer":"a3"}"#;
    let questions: Vec<QuizQuestion> = extract_all(s);
    let texts: Vec<&str> = questions.iter().map(|q| q.question.as_str()).collect();
    assert_eq!(texts, ["Q1?", "Q2?", "Q3?"]);
    assert!(questions.iter().all(|q| q.options.is_empty()));
}

#[test]
fn plain_prose_yields_nothing() {
    let questions: Vec<QuizQuestion> = extract_all("1. What is osmosis?\nA) Diffusion of water\nAnswer: A");
    assert!(questions.is_empty());
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum StudyItem {
    Card { front: String, back: String },
    KeyTerm { term: String },
}

#[test]
fn tagged_items_mixed_with_text_and_arrays() {
    let s = r#"
Start
{"kind":"key_term","term":"Osmosis"}
[ {"kind":"card","front":"ATP","back":"Energy"}, {"kind":"key_term","term":"Enzyme"} ]
End
{"kind":"card","front":"DNA","back":"Genetic code"}
"#;
    let items: Vec<StudyItem> = extract_all(s);
    assert_eq!(
        items,
        vec![
            StudyItem::KeyTerm { term: "Osmosis".into() },
            StudyItem::Card { front: "ATP".into(), back: "Energy".into() },
            StudyItem::KeyTerm { term: "Enzyme".into() },
            StudyItem::Card { front: "DNA".into(), back: "Genetic code".into() },
        ]
    );
}
