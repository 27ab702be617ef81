use crate::error::StudyError;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// A multiple-choice or short-answer question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct QuizQuestion {
    #[serde(alias = "q", alias = "prompt")]
    pub question: String,
    /// Answer choices; empty for short-answer questions
    #[serde(default, alias = "choices", deserialize_with = "options_list")]
    #[schemars(with = "Vec<String>")]
    pub options: Vec<String>,
    #[serde(default, alias = "correct_answer", alias = "correctAnswer")]
    pub answer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

/// Options arrive either as a list or as a `{"A": "...", "B": "..."}` map.
fn options_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Options {
        List(Vec<String>),
        Labelled(BTreeMap<String, String>),
    }

    Ok(match Options::deserialize(deserializer)? {
        Options::List(list) => list,
        Options::Labelled(map) => map.into_values().collect(),
    })
}

static RE_OPTION_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\(?([A-Ha-h])[\).:]\s+").unwrap());

/// Drops a leading `A) `, `b. ` or `(C) ` label.
pub fn strip_option_label(text: &str) -> &str {
    let trimmed = text.trim();
    match RE_OPTION_LABEL.find(trimmed) {
        Some(m) => trimmed[m.end()..].trim(),
        None => trimmed,
    }
}

/// Index of the option a bare letter (`"b"`, `"B)"`, `"(B)"`) refers to.
fn letter_index(text: &str, option_count: usize) -> Option<usize> {
    let letter: String = text
        .trim()
        .trim_matches(|c: char| matches!(c, '(' | ')' | '.' | ':' | '*'))
        .to_string();
    let mut chars = letter.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_ascii_alphabetic() => {
            let index = (c.to_ascii_uppercase() as u8 - b'A') as usize;
            (index < option_count).then_some(index)
        }
        _ => None,
    }
}

impl QuizQuestion {
    /// Resolves an option letter (alone or as a label) to the option text.
    pub fn expand_choice(&self, answer: &str) -> String {
        if self.options.is_empty() {
            return answer.trim().to_string();
        }
        if let Some(index) = letter_index(answer, self.options.len()) {
            return strip_option_label(&self.options[index]).to_string();
        }
        if let Some(caps) = RE_OPTION_LABEL.captures(answer.trim()) {
            if let Some(index) = letter_index(&caps[1], self.options.len()) {
                return strip_option_label(&self.options[index]).to_string();
            }
        }
        strip_option_label(answer).to_string()
    }

    /// The answer key as option text.
    pub fn correct_text(&self) -> String {
        self.expand_choice(&self.answer)
    }

    /// Options paired with their letters; anything past `Z` is left out.
    pub fn lettered_options(&self) -> impl Iterator<Item = (char, &str)> + '_ {
        ('A'..='Z').zip(self.options.iter().map(String::as_str))
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_matches(|c: char| c.is_ascii_punctuation())
        .to_lowercase()
}

/// Compares an answer with the key without asking the model.
pub fn grade_locally(question: &QuizQuestion, given: &str) -> Verdict {
    if question.answer.trim().is_empty() {
        return Verdict::Unclear;
    }
    let expected = normalize(&question.correct_text());
    let given = normalize(&question.expand_choice(given));
    if expected == given {
        Verdict::Correct
    } else if question.options.is_empty() {
        Verdict::Unclear
    } else {
        Verdict::Incorrect
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Correct,
    Incorrect,
    Unclear,
}

/// Outcome of grading one answer.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub verdict: Verdict,
    pub feedback: String,
    /// Set whenever the verdict is not Correct
    pub revealed_answer: Option<String>,
}

impl Evaluation {
    pub fn is_correct(&self) -> bool {
        self.verdict == Verdict::Correct
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncorrectEntry {
    pub question: String,
    pub given: String,
    pub correct: String,
    pub feedback: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum QuizPhase {
    Answering,
    Evaluated(Evaluation),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuizSummary {
    pub correct: usize,
    pub total: usize,
}

/// One quiz round: a fixed question list walked through submit, evaluate, advance.
#[derive(Debug, Clone)]
pub struct QuizState {
    topic: String,
    questions: Vec<QuizQuestion>,
    index: usize,
    phase: QuizPhase,
    correct: usize,
}

impl QuizState {
    pub fn new(topic: impl Into<String>, questions: Vec<QuizQuestion>) -> Result<Self, StudyError> {
        if questions.is_empty() {
            return Err(StudyError::NoQuestions);
        }
        Ok(Self {
            topic: topic.into(),
            questions,
            index: 0,
            phase: QuizPhase::Answering,
            correct: 0,
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn current(&self) -> Option<&QuizQuestion> {
        self.questions.get(self.index)
    }

    /// 1-based position of the current question and the total.
    pub fn position(&self) -> (usize, usize) {
        ((self.index + 1).min(self.questions.len()), self.questions.len())
    }

    pub fn phase(&self) -> &QuizPhase {
        &self.phase
    }

    pub fn is_finished(&self) -> bool {
        self.index >= self.questions.len()
    }

    pub fn summary(&self) -> QuizSummary {
        QuizSummary { correct: self.correct, total: self.questions.len() }
    }

    /// Checks an answer may be submitted now and returns the question to grade.
    pub fn begin_submit(&self, answer: &str) -> Result<&QuizQuestion, StudyError> {
        if matches!(self.phase, QuizPhase::Evaluated(_)) {
            return Err(StudyError::AwaitingAdvance);
        }
        let question = self.current().ok_or(StudyError::QuizFinished)?;
        if answer.trim().is_empty() {
            return Err(StudyError::EmptyInput("Answer"));
        }
        Ok(question)
    }

    /// Records the grader's verdict for the current question.
    pub fn apply_evaluation(
        &mut self,
        given: &str,
        verdict: Verdict,
        feedback: String,
    ) -> Result<(Evaluation, Option<IncorrectEntry>), StudyError> {
        let question = self.begin_submit(given)?.clone();
        let verdict = match verdict {
            Verdict::Unclear => grade_locally(&question, given),
            decided => decided,
        };
        let correct_text = question.correct_text();

        let (evaluation, entry) = if verdict == Verdict::Correct {
            self.correct += 1;
            (Evaluation { verdict, feedback, revealed_answer: None }, None)
        } else {
            let revealed = (!correct_text.is_empty()).then(|| correct_text.clone());
            let entry = IncorrectEntry {
                question: question.question.clone(),
                given: question.expand_choice(given),
                correct: correct_text,
                feedback: feedback.clone(),
            };
            (Evaluation { verdict, feedback, revealed_answer: revealed }, Some(entry))
        };

        self.phase = QuizPhase::Evaluated(evaluation.clone());
        Ok((evaluation, entry))
    }

    /// Moves past an evaluated question. Returns false once the quiz is over.
    pub fn advance(&mut self) -> Result<bool, StudyError> {
        match self.phase {
            QuizPhase::Answering if self.is_finished() => Err(StudyError::QuizFinished),
            QuizPhase::Answering => Err(StudyError::NotEvaluated),
            QuizPhase::Evaluated(_) => {
                self.index += 1;
                self.phase = QuizPhase::Answering;
                Ok(!self.is_finished())
            }
        }
    }
}
