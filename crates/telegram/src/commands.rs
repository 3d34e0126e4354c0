use taskwire_core::DialogInput;
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChatCommand {
    CreateTask,
    Cancel,
    Help,
    Unknown(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CallbackParseError {
    #[error("callback payload is empty")]
    Empty,
    #[error("unsupported callback action `{0}`")]
    UnknownAction(String),
    #[error("callback `{0}` carries an invalid option index")]
    InvalidIndex(String),
}

/// Parses a bot command such as `/create_task` or `/create_task@taskwire_bot extra`.
///
/// Returns `None` for text that is not a command.
pub fn parse_command(text: &str) -> Option<ChatCommand> {
    let trimmed = text.trim();
    let head = trimmed.strip_prefix('/')?.split_whitespace().next().unwrap_or_default();
    let name = head.split('@').next().unwrap_or_default().to_ascii_lowercase();

    Some(match name.as_str() {
        "create_task" | "createtask" | "new_task" => ChatCommand::CreateTask,
        "cancel" => ChatCommand::Cancel,
        "help" | "start" => ChatCommand::Help,
        _ => ChatCommand::Unknown(name),
    })
}

/// Encodes a button press as inline-keyboard callback data (Telegram caps it at 64 bytes).
pub fn encode_callback(input: &DialogInput) -> Option<String> {
    let encoded = match input {
        DialogInput::Select(index) => format!("sel|{index}"),
        DialogInput::Toggle(index) => format!("tgl|{index}"),
        DialogInput::Done => "done".to_owned(),
        DialogInput::Skip => "skip".to_owned(),
        DialogInput::Others => "others".to_owned(),
        DialogInput::NewLabel => "lbl_new".to_owned(),
        DialogInput::Retry => "retry".to_owned(),
        DialogInput::Cancel => "cancel".to_owned(),
        DialogInput::Text(_) | DialogInput::ForwardedText(_) => return None,
    };
    Some(encoded)
}

pub fn decode_callback(data: &str) -> Result<DialogInput, CallbackParseError> {
    let data = data.trim();
    if data.is_empty() {
        return Err(CallbackParseError::Empty);
    }

    if let Some((action, index)) = data.split_once('|') {
        let index: usize =
            index.parse().map_err(|_| CallbackParseError::InvalidIndex(data.to_owned()))?;
        return match action {
            "sel" => Ok(DialogInput::Select(index)),
            "tgl" => Ok(DialogInput::Toggle(index)),
            other => Err(CallbackParseError::UnknownAction(other.to_owned())),
        };
    }

    match data {
        "done" => Ok(DialogInput::Done),
        "skip" => Ok(DialogInput::Skip),
        "others" => Ok(DialogInput::Others),
        "lbl_new" => Ok(DialogInput::NewLabel),
        "retry" => Ok(DialogInput::Retry),
        "cancel" => Ok(DialogInput::Cancel),
        other => Err(CallbackParseError::UnknownAction(other.to_owned())),
    }
}

pub fn help_text() -> String {
    [
        "Available commands:",
        "/create_task - start creating a new task",
        "/cancel - cancel the task in progress",
        "/help - show this message",
    ]
    .join("\n")
}
