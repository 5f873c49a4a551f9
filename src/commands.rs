//! Operator commands: input lines starting with `/`, handled locally.

use std::str::FromStr;
use thiserror::Error;

pub const COMMAND_PREFIX: char = '/';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalCommand {
    /// Leave the local process.
    Exit,
    /// Ask the remote service to shut down.
    Kill,
    /// `Kill`, then `Exit`.
    Terminate,
    Connect,
    Devices,
    Help,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("unknown command: {0}")]
    Unknown(String),
}

impl LocalCommand {
    pub const ALL: [LocalCommand; 6] = [
        LocalCommand::Exit,
        LocalCommand::Kill,
        LocalCommand::Terminate,
        LocalCommand::Connect,
        LocalCommand::Devices,
        LocalCommand::Help,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            LocalCommand::Exit => "exit",
            LocalCommand::Kill => "kill",
            LocalCommand::Terminate => "terminate",
            LocalCommand::Connect => "connect",
            LocalCommand::Devices => "devices",
            LocalCommand::Help => "help",
        }
    }

    pub fn summary(&self) -> &'static str {
        match self {
            LocalCommand::Exit => "exit the client",
            LocalCommand::Kill => "shut down the server",
            LocalCommand::Terminate => "shut down the server, then exit",
            LocalCommand::Connect => "reconnect to the server",
            LocalCommand::Devices => "list configured devices",
            LocalCommand::Help => "show this help",
        }
    }

    pub fn help_text() -> String {
        Self::ALL
            .iter()
            .map(|cmd| format!("  /{:<10} {}", cmd.name(), cmd.summary()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl FromStr for LocalCommand {
    type Err = CommandError;

    /// Accepts the line with or without its leading `/`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        let name = name.strip_prefix(COMMAND_PREFIX).unwrap_or(name);

        Self::ALL
            .into_iter()
            .find(|cmd| cmd.name() == name)
            .ok_or_else(|| CommandError::Unknown(name.to_string()))
    }
}

pub fn is_command(line: &str) -> bool {
    line.starts_with(COMMAND_PREFIX)
}
