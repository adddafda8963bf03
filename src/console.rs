//! Interactive console commands.

use std::path::PathBuf;

use serde_json::{Map, Value};

use crate::core::session::messages::RESERVED_COMMANDS;

/// Audio file sent by a bare `f`.
pub const DEFAULT_AUDIO_FILE: &str = "input.wav";

/// Help text printed when the console starts.
pub const CONSOLE_HELP: &str = "Commands:
  f [file]              send a WAV file (default: input.wav)
  i                     interrupt the avatar
  c <command> [json]    send a custom command with an optional JSON object
  q                     quit";

/// A line typed at the interactive console.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    SendFile(PathBuf),
    Interrupt,
    Custom {
        command: String,
        data: Map<String, Value>,
    },
    Quit,
}

impl ConsoleCommand {
    /// Parse one input line. Blank lines yield `Ok(None)`.
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }

        let (verb, rest) = match line.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (line, ""),
        };

        let command = match verb.to_ascii_lowercase().as_str() {
            "f" => {
                let path = if rest.is_empty() { DEFAULT_AUDIO_FILE } else { rest };
                ConsoleCommand::SendFile(PathBuf::from(path))
            }
            "i" => ConsoleCommand::Interrupt,
            "q" | "quit" | "exit" => ConsoleCommand::Quit,
            "c" => parse_custom(rest)?,
            other => return Err(format!("Unknown command '{other}'")),
        };
        Ok(Some(command))
    }
}

fn parse_custom(rest: &str) -> Result<ConsoleCommand, String> {
    let (command, payload) = match rest.split_once(char::is_whitespace) {
        Some((command, payload)) => (command, payload.trim()),
        None => (rest, ""),
    };
    if command.is_empty() {
        return Err("Usage: c <command> [json-object]".to_string());
    }
    if RESERVED_COMMANDS.iter().any(|reserved| *reserved == command) {
        return Err(format!("'{command}' is a built-in command and cannot be sent with c"));
    }

    let data = if payload.is_empty() {
        Map::new()
    } else {
        match serde_json::from_str::<Value>(payload) {
            Ok(Value::Object(map)) => map,
            Ok(_) => return Err("Custom command data must be a JSON object".to_string()),
            Err(e) => return Err(format!("Invalid JSON: {e}")),
        }
    };

    Ok(ConsoleCommand::Custom {
        command: command.to_string(),
        data,
    })
}
