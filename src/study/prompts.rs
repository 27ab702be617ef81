use crate::study::quiz::{IncorrectEntry, QuizQuestion};
use crate::study::sources::SourceMaterial;
use std::fmt;
use std::fmt::Write as _;

/// Reply the tutor gives to its own instructions, keeping turns alternating.
pub const TUTOR_ACK: &str = "Understood. I'm ready to help you study.";

/// What every prompt knows about the session.
#[derive(Debug, Clone, Copy)]
pub struct PromptContext<'a> {
    pub textbook: &'a str,
    pub source: Option<&'a SourceMaterial>,
    pub max_source_chars: usize,
}

impl PromptContext<'_> {
    fn preamble(&self) -> String {
        let mut out = format!(
            "You are a study assistant helping a student who is studying the textbook \"{}\".\n",
            self.textbook
        );
        if let Some(source) = self.source {
            let _ = write!(
                out,
                "\nUse the following material from \"{}\" as your primary reference:\n<material>\n{}\n</material>\n",
                source.name,
                source.excerpt(self.max_source_chars)
            );
        }
        out
    }
}

fn scope(topic: Option<&str>) -> String {
    match topic.map(str::trim).filter(|t| !t.is_empty()) {
        Some(topic) => format!("the topic \"{topic}\""),
        None => "the whole textbook".to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

impl std::str::FromStr for Difficulty {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "easy" => Ok(Self::Easy),
            "medium" | "" => Ok(Self::Medium),
            "hard" => Ok(Self::Hard),
            other => Err(format!("Unknown difficulty '{other}'. Use easy, medium or hard")),
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExamOptions {
    pub topic: Option<String>,
    pub question_count: usize,
    pub difficulty: Difficulty,
    pub duration_minutes: u32,
    pub include_answer_key: bool,
}

impl Default for ExamOptions {
    fn default() -> Self {
        Self {
            topic: None,
            question_count: 10,
            difficulty: Difficulty::Medium,
            duration_minutes: 60,
            include_answer_key: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlanOptions {
    pub days: u32,
    pub hours_per_day: f32,
    pub goal: Option<String>,
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self { days: 14, hours_per_day: 1.5, goal: None }
    }
}

pub fn quiz(ctx: &PromptContext<'_>, topic: Option<&str>, count: usize) -> String {
    format!(
        "{}\nWrite {count} multiple-choice questions on {} to test the student's understanding. \
         Each question has four options and exactly one correct answer. \
         Give the answer as the full text of the correct option and add a one-sentence explanation.",
        ctx.preamble(),
        scope(topic)
    )
}

pub fn grade_answer(ctx: &PromptContext<'_>, question: &QuizQuestion, given: &str) -> String {
    let mut out = ctx.preamble();
    let _ = writeln!(out, "\nGrade the student's answer to this quiz question.\n\nQuestion: {}", question.question);
    for (letter, option) in question.lettered_options() {
        let _ = writeln!(out, "{letter}) {option}");
    }
    if !question.answer.is_empty() {
        let _ = writeln!(out, "Answer key: {}", question.answer);
    }
    let _ = writeln!(out, "Student's answer: {given}");
    out.push_str(
        "\nStart your reply with exactly \"Correct\" or \"Incorrect\". \
         Then explain briefly why, and if the answer is wrong, state the correct answer.",
    );
    out
}

pub fn flashcards(ctx: &PromptContext<'_>, topic: Option<&str>, count: usize) -> String {
    format!(
        "{}\nCreate {count} flashcards covering the key terms and concepts of {}. \
         The front holds a term or short question, the back a concise definition or answer.",
        ctx.preamble(),
        scope(topic)
    )
}

pub fn summary(ctx: &PromptContext<'_>, topic: Option<&str>) -> String {
    format!(
        "{}\nSummarize {} for revision. Use short Markdown sections with bullet points, \
         highlight key terms in bold and finish with the three most important takeaways.",
        ctx.preamble(),
        scope(topic)
    )
}

pub fn question_answer(ctx: &PromptContext<'_>, question: &str) -> String {
    format!(
        "{}\nAnswer the student's question clearly and accurately, referring to the textbook's \
         treatment of the subject where possible. If the question is outside the textbook's scope, say so.\n\n\
         Question: {question}",
        ctx.preamble()
    )
}

pub fn exam_paper(ctx: &PromptContext<'_>, options: &ExamOptions) -> String {
    let mut out = format!(
        "{}\nWrite a {}-minute {} exam paper on {} with {} questions. \
         Mix multiple-choice, short-answer and long-answer questions, number them, and show the marks for each.",
        ctx.preamble(),
        options.duration_minutes,
        options.difficulty,
        scope(options.topic.as_deref()),
        options.question_count
    );
    if options.include_answer_key {
        out.push_str(" After the paper, add a section titled \"Answer Key\" with model answers.");
    }
    out
}

pub fn study_plan(ctx: &PromptContext<'_>, options: &PlanOptions, weak_areas: &[IncorrectEntry]) -> String {
    let mut out = format!(
        "{}\nCreate a {}-day study plan for this textbook with about {} hours of study per day. \
         Lay it out day by day with concrete chapters or topics, activities and a short review at the end of each week.",
        ctx.preamble(),
        options.days,
        options.hours_per_day
    );
    if let Some(goal) = options.goal.as_deref().filter(|g| !g.trim().is_empty()) {
        let _ = write!(out, "\nThe student's goal: {goal}");
    }
    if !weak_areas.is_empty() {
        out.push_str("\nThe student recently got these questions wrong; schedule extra time for them:");
        for entry in weak_areas {
            let _ = write!(out, "\n- {}", entry.question);
        }
    }
    out
}

/// Hidden first turn of the tutor conversation.
pub fn tutor_system(ctx: &PromptContext<'_>) -> String {
    format!(
        "{}\nAct as a patient, encouraging tutor. Explain step by step, check understanding with short questions, \
         and keep replies focused on the textbook's material.",
        ctx.preamble()
    )
}

pub fn web_search(textbook: &str, query: &str) -> String {
    format!(
        "Search the web for reliable study resources about \"{query}\" for a student using the textbook \"{textbook}\". \
         Summarize what the best sources say and cite each one as a Markdown link."
    )
}

pub fn review_mistakes(ctx: &PromptContext<'_>, entries: &[IncorrectEntry], count: usize) -> String {
    let mut out = format!(
        "{}\nThe student answered these questions incorrectly. Write {count} new multiple-choice questions \
         that revisit the same concepts from a different angle.\n",
        ctx.preamble()
    );
    for entry in entries {
        let _ = write!(
            out,
            "\n- Question: {}\n  Student answered: {}\n  Correct answer: {}",
            entry.question, entry.given, entry.correct
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx<'a>(source: Option<&'a SourceMaterial>) -> PromptContext<'a> {
        PromptContext { textbook: "Campbell Biology", source, max_source_chars: 5 }
    }

    #[test]
    fn source_material_is_embedded_and_truncated() {
        let source = SourceMaterial::new("chapter1.pdf", "Cells are the unit of life");
        let prompt = summary(&ctx(Some(&source)), Some("cells"));
        assert!(prompt.contains("Campbell Biology"));
        assert!(prompt.contains("chapter1.pdf"));
        assert!(prompt.contains("Cells\n[...truncated]"));
        assert!(!prompt.contains("unit of life"));
    }

    #[test]
    fn grading_prompt_lists_lettered_options() {
        let q = QuizQuestion {
            question: "2+2?".into(),
            options: vec!["3".into(), "4".into()],
            answer: "4".into(),
            explanation: None,
        };
        let prompt = grade_answer(&ctx(None), &q, "3");
        assert!(prompt.contains("A) 3\nB) 4\n"));
        assert!(prompt.contains("Answer key: 4"));
        assert!(prompt.contains("\"Incorrect\""));
    }

    #[test]
    fn grading_prompt_survives_huge_option_lists() {
        let q = QuizQuestion {
            question: "Pick one".into(),
            options: (0..200).map(|i| format!("choice {i}")).collect(),
            answer: "A".into(),
            explanation: None,
        };
        let prompt = grade_answer(&ctx(None), &q, "B");
        assert!(prompt.contains("Z) choice 25\n"));
        assert!(!prompt.contains("choice 26"));
    }

    #[test]
    fn blank_topic_means_whole_book() {
        assert!(quiz(&ctx(None), Some("  "), 3).contains("the whole textbook"));
        assert_eq!("HARD".parse::<Difficulty>(), Ok(Difficulty::Hard));
        assert!("extreme".parse::<Difficulty>().is_err());
    }

    #[test]
    fn plan_mentions_weak_areas() {
        let entry = IncorrectEntry {
            question: "What is osmosis?".into(),
            given: "a".into(),
            correct: "b".into(),
            feedback: String::new(),
        };
        let prompt = study_plan(&ctx(None), &PlanOptions::default(), &[entry]);
        assert!(prompt.contains("14-day"));
        assert!(prompt.contains("- What is osmosis?"));
    }
}
