mod commands;
mod utils;

use agent_host::{default_counter, MeterLevel, Session};
use anyhow::Result;
use commands::{parse, Command, HELP};
use providers::LlamaCliRunner;
use shared::events::{Notice, SessionUpdate};
use shared::AssistantError;
use std::io::{self, BufRead, Write};
use tracing_subscriber::EnvFilter;
use utils::{load_settings_or_default, save_settings, vector_db_path};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let (settings, found) = load_settings_or_default();
    if !found {
        save_settings(&settings);
    }

    let runner = LlamaCliRunner::new(settings.inference.clone(), settings.stream.clone());
    let mut session = Session::new(settings.clone(), Box::new(runner), default_counter());

    let db_path = vector_db_path();
    match services::open_vector_store(&settings.retrieval, &db_path) {
        Ok(store) => session = session.with_vector_store(Box::new(store)),
        Err(e) => tracing::warn!("vector store disabled: {:#}", e),
    }

    println!(
        "LLaMA Assistant - Mode: {} - Skill: {} (type /help for commands)",
        session.mode(),
        session.skill()
    );

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("> ");
        io::stdout().flush()?;
        let Some(line) = lines.next() else {
            break;
        };
        let command = match parse(&line?) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(message) => {
                println!("[{}]", message);
                continue;
            }
        };
        if command == Command::Quit {
            break;
        }
        handle(&mut session, command)?;
    }

    Ok(())
}

fn handle(session: &mut Session, command: Command) -> Result<()> {
    match command {
        Command::Message(text) => {
            println!("\nUSER: {}", text);
            let started = session.submit(&text).map(|_| ());
            stream_turn(session, started)?;
        }
        Command::Load(path) => match session.load_file_text(&path) {
            Ok(text) => {
                print_notice(&Notice::FileLoaded {
                    name: file_name(&path),
                });
                let started = session.submit(&text).map(|_| ());
                stream_turn(session, started)?;
            }
            Err(e) => print_notice(&Notice::from(&e)),
        },
        Command::Inject(path) => {
            let started = session.submit_file(&path).map(|_| ());
            stream_turn(session, started)?;
        }
        Command::Mode(mode) => {
            session.set_mode(mode);
            println!("[Mode: {}]", mode);
        }
        Command::Skill(skill) => {
            session.set_skill(skill);
            println!("[Skill: {}]", skill);
        }
        Command::VectorFile(path) => report(session.ingest_file(&path)),
        Command::VectorFolder(path) => report(session.ingest_folder(&path)),
        Command::Chunks => match session.preview_chunks() {
            Ok(chunks) if chunks.is_empty() => print_notice(&Notice::NoChunks),
            Ok(chunks) => {
                for chunk in chunks {
                    println!("---\n{}", chunk);
                }
            }
            Err(e) => print_notice(&Notice::from(&e)),
        },
        Command::Tokens(text) => {
            let meter = session.token_meter(&text);
            match meter.level {
                MeterLevel::Ok => println!("[{}]", meter),
                MeterLevel::Warning => println!("[⚠️ {}]", meter),
                MeterLevel::Over => println!("[⛔ {}]", meter),
            }
        }
        Command::History => println!("{}", session.history().render()),
        Command::Help => println!("{}", HELP),
        Command::Quit => {}
    }
    Ok(())
}

/// Print a turn's output as it arrives
fn stream_turn(session: &mut Session, started: Result<(), AssistantError>) -> Result<()> {
    if let Err(e) = started {
        print_notice(&Notice::from(&e));
        return Ok(());
    }
    let mut stdout = io::stdout();
    while let Some(update) = session.next_update() {
        match update {
            SessionUpdate::Fragment(text) => {
                write!(stdout, "{}", text)?;
                stdout.flush()?;
            }
            SessionUpdate::Notice(notice) => print_notice(&notice),
            SessionUpdate::Completed { mode, .. } => {
                tracing::info!("turn finished - Mode: {}", mode);
            }
        }
    }
    Ok(())
}

fn report(result: Result<Notice, AssistantError>) {
    match result {
        Ok(notice) => print_notice(&notice),
        Err(e) => print_notice(&Notice::from(&e)),
    }
}

fn print_notice(notice: &Notice) {
    if notice.is_error() {
        tracing::debug!("{}", notice);
    }
    println!("{}", notice);
}

fn file_name(path: &std::path::Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}
