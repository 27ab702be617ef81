use anyhow::Context;
use clap::Parser;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use study_companion::clients::flexible::{ClientType, FlexibleClient};
use study_companion::core::{ChatRole, LowLevelClient, QueryResolver, RetryConfig};
use study_companion::error::StudyError;
use study_companion::interceptors::file::FileInterceptor;
use study_companion::study::{
    Difficulty, ExamOptions, PlanOptions, QuizPhase, Screen, StudyAssistant, StudySession, TextPanel, Verdict, View,
};
use study_companion::StudyConfig;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "📚 Study companion: quizzes, flashcards, summaries and a tutor for your textbook", long_about = None)]
#[command(after_help = "ENVIRONMENT VARIABLES:
    GEMINI_API_KEY         API key for Gemini (default backend)
    ANTHROPIC_API_KEY      API key for Claude
    DEEPSEEK_API_KEY       API key for DeepSeek
    STUDY_QUESTION_COUNT   Questions per quiz (1-50)
    STUDY_FLASHCARD_COUNT  Cards per deck (1-50)
    STUDY_MAX_SOURCE_CHARS Source material embedded per prompt
    STUDY_TRANSCRIPT_DIR   Write every prompt/response pair here

COMMANDS (any screen):
    :menu   back to the activity menu
    :home   start over with another textbook
    :quit   exit")]
struct Args {
    /// Backend: gemini, claude, deepseek, mock [default: first with an API key]
    #[arg(short, long, value_enum)]
    client: Option<ClientType>,

    /// Textbook to study; skips the home screen
    #[arg(short, long)]
    textbook: Option<String>,

    /// PDF to attach as source material
    #[arg(long)]
    pdf: Option<PathBuf>,

    /// Record prompts and replies as Markdown files in this directory
    #[arg(long)]
    transcript_dir: Option<PathBuf>,

    /// Questions per quiz
    #[arg(short, long)]
    questions: Option<usize>,

    /// Debug logging on stderr
    #[arg(short, long)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "study_companion=debug,study=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let args = Args::parse();
    init_tracing(args.verbose);

    let mut config = StudyConfig::from_env();
    if let Some(count) = args.questions {
        config = config.with_question_count(count);
    }
    if let Some(dir) = args.transcript_dir.clone() {
        config.transcript_dir = Some(dir);
    }

    let kind = args.client.unwrap_or_default();
    if args.client.is_none() && kind == ClientType::Mock {
        warn!("no backend configured, using the mock client");
        eprintln!("⚠️  {}", ClientType::offline_notice());
    }
    let client = FlexibleClient::from_type(kind).with_context(|| format!("could not start the {kind} client"))?;
    info!(client = %kind, "backend ready");

    let mut resolver = QueryResolver::new(client, RetryConfig::default());
    if let Some(dir) = &config.transcript_dir {
        resolver = resolver.with_interceptor(Arc::new(FileInterceptor::new(dir.clone())));
    }
    let mut assistant = StudyAssistant::new(resolver, config);

    if let Some(textbook) = &args.textbook {
        assistant.set_textbook(textbook)?;
    }
    if let Some(path) = &args.pdf {
        let bytes = std::fs::read(path).with_context(|| format!("could not read {}", path.display()))?;
        if assistant.session().textbook().is_some() {
            assistant.go_to(Screen::Sources)?;
        }
        assistant.ingest_pdf(bytes, &file_name(path)).await?;
        if assistant.session().screen() == Screen::Sources {
            assistant.back_to_menu()?;
        }
    }

    println!("📚 Study companion ({kind})");
    run(&mut assistant).await
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

async fn run<C: LowLevelClient>(assistant: &mut StudyAssistant<C>) -> anyhow::Result<()> {
    let stdin = io::stdin();
    loop {
        render(assistant.session());
        print!("> ");
        io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim();
        match input {
            ":q" | ":quit" => break,
            ":home" => assistant.go_home(),
            ":menu" => {
                let _ = assistant.back_to_menu();
            }
            _ => {
                // Assistant failures are already on the banner
                if let Err(err) = handle(assistant, input).await {
                    if assistant.session().banner().is_none() {
                        println!("⚠️  {err}");
                    }
                }
            }
        }
    }
    println!("👋 Bye");
    Ok(())
}

async fn handle<C: LowLevelClient>(assistant: &mut StudyAssistant<C>, input: &str) -> Result<(), StudyError> {
    match assistant.session().view() {
        View::Home => match input.strip_prefix(":pdf ") {
            Some(path) => {
                let path = Path::new(path.trim());
                let bytes = std::fs::read(path)?;
                assistant.ingest_pdf(bytes, &file_name(path)).await.map(drop)
            }
            None => assistant.set_textbook(input),
        },
        View::Menu => match input.parse::<usize>().ok().and_then(|n| Screen::ACTIVITIES.get(n.wrapping_sub(1)).copied()) {
            Some(screen) => assistant.go_to(screen),
            None => Ok(()),
        },
        View::Quiz(None) => assistant.start_quiz(input).await.map(drop),
        View::Quiz(Some(quiz)) => match quiz.phase() {
            QuizPhase::Answering => assistant.submit_answer(input).await.map(drop),
            QuizPhase::Evaluated(_) => assistant.next_question().map(drop),
        },
        View::QuizResults(_) => match input {
            "n" => assistant.go_to(Screen::Quiz),
            "r" => assistant.go_to(Screen::Review),
            _ => assistant.back_to_menu(),
        },
        View::Flashcards(None) => assistant.load_flashcards(input).await.map(drop),
        View::Flashcards(Some(_)) => match input {
            "n" => assistant.next_card(),
            "p" => assistant.previous_card(),
            _ => assistant.flip_card(),
        },
        View::Summary(_) => assistant.summarize(input).await.map(drop),
        View::QuestionAnswer(_) => assistant.ask(input).await.map(drop),
        View::ExamPaper(_) => assistant.generate_exam(exam_options(input)).await.map(drop),
        View::StudyPlan(_) => assistant.generate_plan(plan_options(input)).await.map(drop),
        View::Tutor(_) => {
            print!("🎓 ");
            let result = assistant
                .tutor_send(input, |token| {
                    print!("{token}");
                    let _ = io::stdout().flush();
                })
                .await;
            println!();
            result.map(drop)
        }
        View::Sources(_) => {
            let (command, rest) = input.split_once(' ').unwrap_or((input, ""));
            match command {
                "pdf" => {
                    let path = Path::new(rest.trim());
                    let bytes = std::fs::read(path)?;
                    assistant.ingest_pdf(bytes, &file_name(path)).await.map(drop)
                }
                "search" => assistant.web_search(rest).await.map(drop),
                "use" => match rest.trim().parse::<usize>() {
                    Ok(n) if n > 0 => assistant.attach_source(n - 1),
                    _ => Err(StudyError::NoSuchSource(0)),
                },
                "clear" => {
                    assistant.detach_source();
                    Ok(())
                }
                _ => Ok(()),
            }
        }
        View::Review => match input {
            "q" => assistant.review_mistakes().await.map(drop),
            _ => Ok(()),
        },
    }
}

/// `[count] [easy|medium|hard] [minutes] [topic...]`, in any order.
fn exam_options(input: &str) -> ExamOptions {
    let mut options = ExamOptions::default();
    let mut numbers = 0;
    let mut topic = Vec::new();
    for word in input.split_whitespace() {
        if let Ok(n) = word.parse::<u32>() {
            match numbers {
                0 => options.question_count = n as usize,
                _ => options.duration_minutes = n,
            }
            numbers += 1;
        } else if let Ok(difficulty) = word.parse::<Difficulty>() {
            options.difficulty = difficulty;
        } else if word == "nokey" {
            options.include_answer_key = false;
        } else {
            topic.push(word);
        }
    }
    options.topic = (!topic.is_empty()).then(|| topic.join(" "));
    options
}

/// `[days] [hours per day] [goal...]`
fn plan_options(input: &str) -> PlanOptions {
    let mut options = PlanOptions::default();
    let mut words = input.split_whitespace().peekable();
    if let Some(days) = words.peek().and_then(|w| w.parse::<u32>().ok()) {
        options.days = days;
        words.next();
        if let Some(hours) = words.peek().and_then(|w| w.parse::<f32>().ok()) {
            options.hours_per_day = hours;
            words.next();
        }
    }
    let goal: Vec<&str> = words.collect();
    options.goal = (!goal.is_empty()).then(|| goal.join(" "));
    options
}

fn render(session: &StudySession) {
    println!();
    if let Some(banner) = session.banner() {
        println!("⚠️  {banner}");
    }
    let title = match session.textbook() {
        Some(book) => format!("== {} · {} ==", session.screen().name(), book),
        None => format!("== {} ==", session.screen().name()),
    };
    println!("{title}");

    match session.view() {
        View::Home => println!("Enter the name of your textbook, or :pdf <path> to load one."),
        View::Menu => {
            let score = session.score();
            if let Some(percent) = score.percent() {
                println!("Score so far: {}/{} ({percent}%)", score.correct, score.attempted);
            }
            if let Some(source) = session.source() {
                println!("Source material: {} ({} chars)", source.name, source.char_count());
            }
            for (i, screen) in Screen::ACTIVITIES.iter().enumerate() {
                println!("  {}. {}", i + 1, screen.name());
            }
        }
        View::Quiz(None) => println!("Quiz topic (blank for the whole textbook):"),
        View::Quiz(Some(quiz)) => {
            let (n, total) = quiz.position();
            if let Some(question) = quiz.current() {
                println!("Question {n}/{total}: {}", question.question);
                for (letter, option) in question.lettered_options() {
                    println!("  {letter}) {option}");
                }
            }
            match quiz.phase() {
                QuizPhase::Answering => println!("Your answer:"),
                QuizPhase::Evaluated(evaluation) => {
                    let mark = match evaluation.verdict {
                        Verdict::Correct => "✅",
                        Verdict::Incorrect => "❌",
                        Verdict::Unclear => "❔",
                    };
                    println!("{mark} {}", evaluation.feedback);
                    if let Some(answer) = &evaluation.revealed_answer {
                        println!("Correct answer: {answer}");
                    }
                    println!("Press Enter for the next question.");
                }
            }
        }
        View::QuizResults(summary) => {
            println!("You scored {}/{}.", summary.correct, summary.total);
            println!("n = new quiz, r = review mistakes, Enter = menu");
        }
        View::Flashcards(None) => println!("Flashcard topic (blank for the whole textbook):"),
        View::Flashcards(Some(deck)) => {
            let (n, total) = deck.position();
            let side = if deck.is_flipped() { "back" } else { "front" };
            println!("Card {n}/{total} ({side}): {}", deck.visible_side());
            println!("Enter = flip, n = next, p = previous");
        }
        View::Summary(panel) => render_panel(panel, "Topic to summarize (blank for the whole textbook):"),
        View::ExamPaper(panel) => render_panel(panel, "Exam: [questions] [easy|medium|hard] [minutes] [topic] [nokey]"),
        View::StudyPlan(panel) => render_panel(panel, "Plan: [days] [hours per day] [goal]"),
        View::QuestionAnswer(qa) => {
            if let Some((question, answer)) = qa.history.last() {
                println!("Q: {question}\n\n{answer}\n");
            }
            println!("Ask a question:");
        }
        View::Tutor(chat) => {
            if chat.transcript.is_empty() {
                println!("Say hello to your tutor.");
            } else if let Some(last) = chat.transcript.iter().rev().find(|m| m.role == ChatRole::User) {
                println!("(last question: {})", last.text);
            }
        }
        View::Sources(panel) => {
            if let Some(answer) = &panel.answer {
                println!("{answer}\n");
            }
            for (i, link) in panel.links.iter().enumerate() {
                println!("  [{}] {} <{}>", i + 1, link.title, link.url);
            }
            println!("pdf <path> | search <query> | use <n> | clear");
        }
        View::Review => {
            let log = session.incorrect_log();
            if log.is_empty() {
                println!("No mistakes recorded yet.");
            }
            for entry in log {
                println!("- {}\n  you: {}  correct: {}", entry.question, entry.given, entry.correct);
            }
            println!("q = quiz me on these");
        }
    }
}

fn render_panel(panel: &TextPanel, hint: &str) {
    if let Some(content) = &panel.content {
        println!("{content}\n");
    }
    println!("{hint}");
}
