//! Special commands parser for interactive chat
//!
//! Lines starting with `/` (plus the bare words `exit` and `quit`) control the
//! session instead of being sent to the model. Command names are
//! case-insensitive; arguments keep their case.

use thiserror::Error;

/// Errors that can occur when parsing special commands
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Unknown command was entered
    #[error("Unknown command: {0}\n\nType '/help' to see available commands")]
    UnknownCommand(String),

    /// Command was given an argument it does not take
    #[error("Unsupported argument for {command}: {arg}\n\nType '/help' to see valid usage")]
    UnsupportedArgument { command: String, arg: String },

    /// Command requires an argument but none was provided
    #[error("Command {command} requires an argument\n\nUsage: {usage}")]
    MissingArgument { command: String, usage: String },
}

/// Special commands that can be executed during interactive chat
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecialCommand {
    /// Leave the session
    Exit,
    /// Show the command list
    Help,
    /// Start a new conversation; the current one stays in history
    Clear,
    /// Replace the system prompt for later requests
    SetSystem(String),
    /// Switch the model for later requests
    SwitchModel(String),
    /// Generate a title now and confirm the conversation is stored
    Save,
    /// Show token usage for the session and conversation
    Usage,
    /// Resend an unanswered message
    Retry,
    /// Show profile, model and conversation details
    Status,
    /// Not a special command; send the input to the model
    None,
}

fn no_argument(command: &str, arg: &str, cmd: SpecialCommand) -> Result<SpecialCommand, CommandError> {
    if arg.is_empty() {
        Ok(cmd)
    } else {
        Err(CommandError::UnsupportedArgument {
            command: command.to_string(),
            arg: arg.to_string(),
        })
    }
}

fn required_argument(
    command: &str,
    arg: &str,
    usage: &str,
    build: impl FnOnce(String) -> SpecialCommand,
) -> Result<SpecialCommand, CommandError> {
    if arg.is_empty() {
        Err(CommandError::MissingArgument {
            command: command.to_string(),
            usage: usage.to_string(),
        })
    } else {
        Ok(build(arg.to_string()))
    }
}

/// Parse a user input line into a special command
///
/// # Errors
///
/// Returns `CommandError` for unknown commands or bad arguments
///
/// # Examples
///
/// ```
/// use oaichat::commands::special_commands::{parse_special_command, SpecialCommand};
///
/// assert_eq!(parse_special_command("/EXIT").unwrap(), SpecialCommand::Exit);
/// assert_eq!(
///     parse_special_command("/model gpt-4o").unwrap(),
///     SpecialCommand::SwitchModel("gpt-4o".to_string())
/// );
/// assert_eq!(parse_special_command("hello").unwrap(), SpecialCommand::None);
/// ```
pub fn parse_special_command(input: &str) -> Result<SpecialCommand, CommandError> {
    let trimmed = input.trim();
    let (head, rest) = match trimmed.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (trimmed, ""),
    };
    let command = head.to_lowercase();

    if !command.starts_with('/') {
        return match (command.as_str(), rest) {
            ("exit" | "quit", "") => Ok(SpecialCommand::Exit),
            _ => Ok(SpecialCommand::None),
        };
    }

    match command.as_str() {
        "/exit" | "/quit" => no_argument(&command, rest, SpecialCommand::Exit),
        "/help" | "/?" => no_argument(&command, rest, SpecialCommand::Help),
        "/clear" => no_argument(&command, rest, SpecialCommand::Clear),
        "/save" => no_argument(&command, rest, SpecialCommand::Save),
        "/usage" => no_argument(&command, rest, SpecialCommand::Usage),
        "/retry" => no_argument(&command, rest, SpecialCommand::Retry),
        "/status" => no_argument(&command, rest, SpecialCommand::Status),
        "/system" => required_argument(&command, rest, "/system <prompt>", SpecialCommand::SetSystem),
        "/model" => required_argument(&command, rest, "/model <name>", SpecialCommand::SwitchModel),
        _ => Err(CommandError::UnknownCommand(head.to_string())),
    }
}

/// Print help for the interactive commands
pub fn print_help() {
    println!(
        r#"
Chat Commands
=============

  /help            - Show this help message
  /exit, /quit     - Leave the session (also: exit, quit)
  /clear           - Start a new conversation (the current one stays in history)
  /system <prompt> - Change the system prompt for later messages
  /model <name>    - Switch to a different model
  /save            - Generate a title for this conversation now
  /usage           - Show token usage
  /retry           - Resend the last message if it got no reply
  /status          - Show profile, model and conversation details

Press Ctrl-C while a reply is streaming to stop it.
Press Ctrl-C or Ctrl-D at the prompt to leave.
"#
    );
}
