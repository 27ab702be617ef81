//! Tolerant readers for model output.
//!
//! Models are asked for JSON, but they do not always comply. Every reader
//! here tries the JSON structures embedded in the reply first and falls back
//! to line-oriented patterns when none deserialize.

use crate::json_utils::{extract_all, strip_code_fences};
use crate::study::flashcards::Flashcard;
use crate::study::quiz::{strip_option_label, QuizQuestion, Verdict};
use crate::study::sources::SourceLink;
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;
use tracing::debug;

// ── Quiz patterns ───────────────────────────────────────────────────────

static RE_QUESTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:#+\s*)?(?:\*\*)?\s*(?:question\s*|q)?(\d{1,3})\s*[.):]\s*(?:\*\*)?\s*(.+)$").unwrap()
});

static RE_OPTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[-*]\s+)?(?:\*\*)?\(?([A-Ha-h])[).:](?:\*\*)?\s+(.+)$").unwrap()
});

static RE_ANSWER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:\*\*)?\s*(?:correct\s+)?answer\s*(?:\*\*)?\s*[:\-]\s*(?:\*\*)?\s*(.+)$").unwrap()
});

static RE_EXPLANATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:\*\*)?\s*explanation\s*(?:\*\*)?\s*[:\-]\s*(?:\*\*)?\s*(.+)$").unwrap()
});

// ── Flashcard patterns ──────────────────────────────────────────────────

static RE_CARD_FRONT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:[-*]\s+|\d+[.)]\s+)?(?:\*\*)?(?:front|q|question|term)\s*(?:\*\*)?\s*:\s*(?:\*\*)?\s*(.+)$")
        .unwrap()
});

static RE_CARD_BACK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:[-*]\s+)?(?:\*\*)?(?:back|a|answer|definition)\s*(?:\*\*)?\s*:\s*(?:\*\*)?\s*(.+)$").unwrap()
});

static RE_TERM_DASH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[-*]\s+|\d+[.)]\s+)?(?:\*\*)?([^:*]+?)(?:\*\*)?\s+[-–—]\s+(.+)$").unwrap()
});

// ── Source patterns ─────────────────────────────────────────────────────

static RE_MD_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]+)\]\((https?://[^\s)]+)\)").unwrap());

static RE_BARE_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s<>"')\]]+"#).unwrap());

/// One letter per option, `A` to `Z`.
const MAX_OPTIONS: usize = 26;

fn clean(text: &str) -> String {
    text.replace("**", "").trim().to_string()
}

/// Quiz questions from a model reply, JSON first, numbered text second.
pub fn parse_quiz(text: &str) -> Vec<QuizQuestion> {
    let from_json = tidy_questions(extract_all::<QuizQuestion>(strip_code_fences(text)));
    if !from_json.is_empty() {
        return from_json;
    }
    let from_text = tidy_questions(numbered_questions(text));
    debug!(count = from_text.len(), "quiz parsed from plain text");
    from_text
}

/// Drops empty questions, strips option labels and resolves letter answers.
pub fn tidy_questions(questions: Vec<QuizQuestion>) -> Vec<QuizQuestion> {
    questions
        .into_iter()
        .filter_map(|mut q| {
            q.question = clean(&q.question);
            if q.question.is_empty() {
                return None;
            }
            q.options = q
                .options
                .iter()
                .map(|o| clean(strip_option_label(o)))
                .filter(|o| !o.is_empty())
                .take(MAX_OPTIONS)
                .collect();
            q.answer = clean(&q.correct_text());
            q.explanation = q.explanation.as_deref().map(clean).filter(|e| !e.is_empty());
            Some(q)
        })
        .collect()
}

fn numbered_questions(text: &str) -> Vec<QuizQuestion> {
    let mut questions = Vec::new();
    let mut current: Option<QuizQuestion> = None;

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if let Some(caps) = RE_ANSWER.captures(line) {
            if let Some(q) = current.as_mut() {
                q.answer = clean(&caps[1]);
            }
            continue;
        }
        if let Some(caps) = RE_EXPLANATION.captures(line) {
            if let Some(q) = current.as_mut() {
                q.explanation = Some(clean(&caps[1]));
            }
            continue;
        }
        if let (Some(caps), Some(q)) = (RE_OPTION.captures(line), current.as_mut()) {
            q.options.push(clean(&caps[2]));
            continue;
        }
        if let Some(caps) = RE_QUESTION.captures(line) {
            questions.extend(current.take());
            current = Some(QuizQuestion {
                question: clean(&caps[2]),
                options: Vec::new(),
                answer: String::new(),
                explanation: None,
            });
            continue;
        }
        // Wrapped lines continue whatever was read last
        if let Some(q) = current.as_mut() {
            if let Some(explanation) = q.explanation.as_mut() {
                explanation.push(' ');
                explanation.push_str(&clean(line));
            } else if q.options.is_empty() && q.answer.is_empty() {
                q.question.push(' ');
                q.question.push_str(&clean(line));
            }
        }
    }
    questions.extend(current);
    questions
}

/// Flashcards from a model reply, JSON first, labelled line pairs second.
pub fn parse_flashcards(text: &str) -> Vec<Flashcard> {
    let keep = |c: &Flashcard| !c.front.trim().is_empty() && !c.back.trim().is_empty();

    let from_json: Vec<Flashcard> = extract_all::<Flashcard>(strip_code_fences(text))
        .into_iter()
        .filter(keep)
        .collect();
    if !from_json.is_empty() {
        return from_json;
    }

    let mut cards = labelled_pairs(text);
    if cards.is_empty() {
        cards = text
            .lines()
            .filter_map(|line| RE_TERM_DASH.captures(line.trim()))
            .map(|caps| Flashcard { front: clean(&caps[1]), back: clean(&caps[2]) })
            .collect();
    }
    cards.retain(keep);
    debug!(count = cards.len(), "flashcards parsed from plain text");
    cards
}

fn labelled_pairs(text: &str) -> Vec<Flashcard> {
    let mut cards: Vec<Flashcard> = Vec::new();
    let mut front: Option<String> = None;
    let mut last_was_back = false;

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if let Some(caps) = RE_CARD_FRONT.captures(line) {
            front = Some(clean(&caps[1]));
            last_was_back = false;
        } else if let Some(caps) = RE_CARD_BACK.captures(line) {
            if let Some(front) = front.take() {
                cards.push(Flashcard { front, back: clean(&caps[1]) });
                last_was_back = true;
            }
        } else if last_was_back {
            if let Some(card) = cards.last_mut() {
                card.back.push(' ');
                card.back.push_str(&clean(line));
            }
        }
    }
    cards
}

/// Reads the grader's verdict from the first words of its reply.
///
/// Only a whole leading word counts ("Correction: ..." is not "Correct").
/// Without a verdict word up front, a negative word in the first sentence
/// still marks the answer Incorrect; anything else is Unclear.
pub fn sniff_verdict(text: &str) -> Verdict {
    let head = text.trim_start();
    if head.starts_with(['✅', '✔']) {
        return Verdict::Correct;
    }
    if head.starts_with(['❌', '✗', '✘']) {
        return Verdict::Incorrect;
    }

    let mut head = strip_leading_marks(head).to_lowercase();
    for label in ["verdict", "result", "evaluation"] {
        if let Some(rest) = strip_word(&head, label) {
            head = strip_leading_marks(rest).to_string();
            break;
        }
    }

    const INCORRECT: [&str; 4] = ["incorrect", "not correct", "not quite", "wrong"];
    if INCORRECT.iter().any(|p| strip_word(&head, p).is_some()) {
        return Verdict::Incorrect;
    }
    if strip_word(&head, "correct").is_some() {
        return Verdict::Correct;
    }

    let first_sentence = head.split(['.', '!', '?', '\n']).next().unwrap_or_default();
    let words: Vec<&str> = first_sentence
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    let negated = words.iter().any(|w| matches!(*w, "incorrect" | "wrong"))
        || words.windows(2).any(|pair| pair == ["not", "correct"]);
    if negated {
        Verdict::Incorrect
    } else {
        Verdict::Unclear
    }
}

/// `text` after a leading `word`, if the word ends there.
fn strip_word<'a>(text: &'a str, word: &str) -> Option<&'a str> {
    text.strip_prefix(word)
        .filter(|rest| !rest.starts_with(|c: char| c.is_alphanumeric()))
}

fn strip_leading_marks(text: &str) -> &str {
    text.trim_start_matches(|c: char| c.is_whitespace() || c.is_ascii_punctuation())
}

/// Links cited in a search answer: Markdown links first, then bare URLs.
pub fn parse_sources(text: &str) -> Vec<SourceLink> {
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for caps in RE_MD_LINK.captures_iter(text) {
        let url = caps[2].to_string();
        if seen.insert(url.clone()) {
            links.push(SourceLink { title: clean(&caps[1]), url });
        }
    }
    for m in RE_BARE_URL.find_iter(text) {
        let url = m.as_str().trim_end_matches(['.', ',', ';', ':']).to_string();
        if seen.insert(url.clone()) {
            links.push(SourceLink { title: host_of(&url).to_string(), url });
        }
    }
    links
}

fn host_of(url: &str) -> &str {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    rest.split(['/', '?', '#']).next().unwrap_or(rest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiz_from_fenced_json_wrapper() {
        let reply = r#"```json
{"questions": [
  {"question": "Powerhouse of the cell?", "options": ["A) Nucleus", "B) Mitochondria"], "answer": "B", "explanation": "ATP"},
  {"question": "  ", "options": [], "answer": "x"}
]}
```"#;
        let quiz = parse_quiz(reply);
        assert_eq!(quiz.len(), 1);
        assert_eq!(quiz[0].options, vec!["Nucleus", "Mitochondria"]);
        assert_eq!(quiz[0].answer, "Mitochondria");
        assert_eq!(quiz[0].explanation.as_deref(), Some("ATP"));
    }

    #[test]
    fn quiz_from_numbered_text() {
        let reply = "Here is your quiz.\n\n\
            **1.** What gas do plants absorb\nfor photosynthesis?\n\
            A) Oxygen\nB) Carbon dioxide\nC) Nitrogen\n\
            **Answer:** B\n\
            Explanation: Plants take in CO2\nthrough stomata.\n\n\
            Question 2: Name the green pigment.\n\
            Answer: Chlorophyll\n";
        let quiz = parse_quiz(reply);
        assert_eq!(quiz.len(), 2);
        assert_eq!(quiz[0].question, "What gas do plants absorb for photosynthesis?");
        assert_eq!(quiz[0].options, vec!["Oxygen", "Carbon dioxide", "Nitrogen"]);
        assert_eq!(quiz[0].answer, "Carbon dioxide");
        assert_eq!(quiz[0].explanation.as_deref(), Some("Plants take in CO2 through stomata."));
        assert_eq!(quiz[1].question, "Name the green pigment.");
        assert!(quiz[1].options.is_empty());
        assert_eq!(quiz[1].answer, "Chlorophyll");
    }

    #[test]
    fn tidied_questions_keep_at_most_26_options() {
        let q = QuizQuestion {
            question: "Pick one".into(),
            options: (0..40).map(|i| format!("choice {i}")).collect(),
            answer: "Z".into(),
            explanation: None,
        };
        let tidied = tidy_questions(vec![q]);
        assert_eq!(tidied[0].options.len(), 26);
        assert_eq!(tidied[0].answer, "choice 25");
    }

    #[test]
    fn quiz_with_nothing_recognisable_is_empty() {
        assert!(parse_quiz("I'm sorry, I can't help with that.").is_empty());
    }

    #[test]
    fn flashcards_from_json_aliases() {
        let cards = parse_flashcards(r#"[{"term": "Osmosis", "definition": "Diffusion of water"}, {"front": "", "back": "x"}]"#);
        assert_eq!(cards, vec![Flashcard { front: "Osmosis".into(), back: "Diffusion of water".into() }]);
    }

    #[test]
    fn flashcards_from_labelled_pairs() {
        let reply = "Front: Mitosis\nBack: Cell division producing\ntwo identical cells\n\n**Q:** ATP\n**A:** Energy currency";
        let cards = parse_flashcards(reply);
        assert_eq!(cards.len(), 2);
        assert_eq!(cards[0].back, "Cell division producing two identical cells");
        assert_eq!(cards[1], Flashcard { front: "ATP".into(), back: "Energy currency".into() });
    }

    #[test]
    fn flashcards_from_term_dash_lines() {
        let cards = parse_flashcards("- **T-cell** - Immune cell\n2. Ribosome — Protein factory\nNo dash here");
        assert_eq!(cards.len(), 2);
        assert_eq!(cards[0].front, "T-cell");
        assert_eq!(cards[1].back, "Protein factory");
    }

    #[test]
    fn verdict_prefixes() {
        assert_eq!(sniff_verdict("Correct! Well done."), Verdict::Correct);
        assert_eq!(sniff_verdict("  **Incorrect.** The answer is B"), Verdict::Incorrect);
        assert_eq!(sniff_verdict("## Not correct"), Verdict::Incorrect);
        assert_eq!(sniff_verdict("Wrong, try again"), Verdict::Incorrect);
        assert_eq!(sniff_verdict("Verdict: correct"), Verdict::Correct);
        assert_eq!(sniff_verdict("Result - Incorrect"), Verdict::Incorrect);
        assert_eq!(sniff_verdict("❌ No"), Verdict::Incorrect);
        assert_eq!(sniff_verdict("Partially correct"), Verdict::Unclear);
        assert_eq!(sniff_verdict(""), Verdict::Unclear);
    }

    #[test]
    fn verdict_words_must_end_at_a_boundary() {
        assert_eq!(
            sniff_verdict("Correction: the right answer is Mitochondria, not Nucleus."),
            Verdict::Unclear
        );
        assert_eq!(sniff_verdict("Right idea, but incorrect: the answer is B."), Verdict::Incorrect);
        assert_eq!(sniff_verdict("Rightly so, mitochondria make ATP."), Verdict::Unclear);
        assert_eq!(sniff_verdict("Correctly identified!"), Verdict::Unclear);
        assert_eq!(sniff_verdict("Wrongful? No. Correct."), Verdict::Unclear);
    }

    #[test]
    fn sources_markdown_then_bare_deduplicated() {
        let text = "See [Khan Academy](https://khanacademy.org/cells) and https://en.wikipedia.org/wiki/Cell.\n\
            Also https://khanacademy.org/cells again.";
        let links = parse_sources(text);
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].title, "Khan Academy");
        assert_eq!(links[1], SourceLink { title: "en.wikipedia.org".into(), url: "https://en.wikipedia.org/wiki/Cell".into() });
    }
}
