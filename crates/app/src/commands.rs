//! REPL input parsing.

use shared::agent_api::{PromptMode, SkillTag};
use std::path::PathBuf;

use crate::utils::expand_user_path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Message(String),
    Mode(PromptMode),
    Skill(SkillTag),
    VectorFile(PathBuf),
    VectorFolder(PathBuf),
    Chunks,
    Load(PathBuf),
    Inject(PathBuf),
    Tokens(String),
    History,
    Help,
    Quit,
}

pub const HELP: &str = "\
Type a message and press Enter to send it.
  /mode <answer|assistant>   switch prompt mode
  /skill <name>              general, python, raspberry pi, sql, json
  /vector-file <path>        add a file to the vector store
  /vector-folder <path>      add every text file under a folder
  /chunks                    preview stored chunks
  /load <path>               send a file's text as your message
  /inject <path>             run a file as the whole prompt
  /tokens <text>             count tokens without sending
  /history                   show the conversation so far
  /quit                      exit";

/// Parse one input line. Blank lines yield `Ok(None)`.
pub fn parse(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Some(Command::Message(line.to_string())));
    };

    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };
    let path_arg = || {
        if arg.is_empty() {
            Err(format!("/{} needs a path", name))
        } else {
            Ok(expand_user_path(arg))
        }
    };

    let command = match name.to_ascii_lowercase().as_str() {
        "mode" => Command::Mode(arg.parse()?),
        "skill" => Command::Skill(arg.parse()?),
        "vector-file" => Command::VectorFile(path_arg()?),
        "vector-folder" => Command::VectorFolder(path_arg()?),
        "chunks" => Command::Chunks,
        "load" => Command::Load(path_arg()?),
        "inject" => Command::Inject(path_arg()?),
        "tokens" => Command::Tokens(arg.to_string()),
        "history" => Command::History,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Err(format!("Unknown command /{} (try /help)", other)),
    };
    Ok(Some(command))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_message() {
        assert_eq!(
            parse("  what is a GPIO pin?  ").unwrap(),
            Some(Command::Message("what is a GPIO pin?".into()))
        );
        assert_eq!(parse("   ").unwrap(), None);
    }

    #[test]
    fn test_mode_and_skill() {
        assert_eq!(
            parse("/mode assistant").unwrap(),
            Some(Command::Mode(PromptMode::Assistant))
        );
        assert_eq!(
            parse("/skill Raspberry Pi").unwrap(),
            Some(Command::Skill(SkillTag::RaspberryPi))
        );
        assert!(parse("/mode chatty").is_err());
    }

    #[test]
    fn test_path_commands() {
        assert_eq!(
            parse("/vector-folder /srv/docs").unwrap(),
            Some(Command::VectorFolder(PathBuf::from("/srv/docs")))
        );
        assert_eq!(
            parse("/inject notes/todo.txt").unwrap(),
            Some(Command::Inject(PathBuf::from("notes/todo.txt")))
        );
        let err = parse("/load").unwrap_err();
        assert!(err.contains("needs a path"));
    }

    #[test]
    fn test_misc_commands() {
        assert_eq!(
            parse("/tokens count these words").unwrap(),
            Some(Command::Tokens("count these words".into()))
        );
        assert_eq!(parse("/QUIT").unwrap(), Some(Command::Quit));
        assert_eq!(parse("/chunks").unwrap(), Some(Command::Chunks));
        assert!(parse("/frobnicate").unwrap_err().contains("/frobnicate"));
    }
}
