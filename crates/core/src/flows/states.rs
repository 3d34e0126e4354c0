use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::carry_over::CarryCategory;
use crate::domain::field::FieldName;
use crate::options::OptionItem;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DialogState {
    /// Waiting for an answer to one field's prompt.
    Field(FieldName),
    AssigneeSearch,
    AssigneeResults,
    LabelEntry,
    /// Every field is resolved; the record is ready for submission.
    Finalizing,
    SubmissionFailed,
    CarryOverOffer,
    CarryOverSelect,
    Completed,
    Cancelled,
}

impl DialogState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    pub fn field(&self) -> Option<FieldName> {
        match self {
            Self::Field(field) => Some(*field),
            Self::AssigneeSearch | Self::AssigneeResults => Some(FieldName::Assignee),
            Self::LabelEntry => Some(FieldName::Labels),
            _ => None,
        }
    }
}

/// One user action, already decoded from the chat transport.
///
/// Selections carry the index of the option in the prompt that is currently shown.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DialogInput {
    Text(String),
    /// Text forwarded from another chat; used to prefill summary and description.
    ForwardedText(String),
    Select(usize),
    Toggle(usize),
    Done,
    Skip,
    Others,
    NewLabel,
    Retry,
    Cancel,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Notice {
    Retained(FieldName),
    Skipped(FieldName),
    NoOptions(FieldName),
    InvalidInput(String),
    NoUserMatches(String),
    Cancelled,
}

impl Notice {
    pub fn text(&self) -> String {
        match self {
            Self::Retained(field) => format!("{} already set, keeping it.", field.display_name()),
            Self::Skipped(field) => format!("Skipping {}.", field.display_name().to_lowercase()),
            Self::NoOptions(field) => {
                format!("No {} options found, moving on.", field.display_name().to_lowercase())
            }
            Self::InvalidInput(reason) => format!("Invalid input: {reason}"),
            Self::NoUserMatches(query) => {
                format!("No users found for \"{query}\". Try another search.")
            }
            Self::Cancelled => "Task creation cancelled.".to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptControls {
    pub multi_select: bool,
    pub skip: bool,
    pub others: bool,
    pub new_label: bool,
    pub retry: bool,
}

/// What the user should be asked next. Transports render it however they like.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    pub text: String,
    pub options: Vec<OptionItem>,
    /// Values currently toggled on, for multi-select prompts.
    pub selected: BTreeSet<String>,
    pub controls: PromptControls,
}

impl Prompt {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            options: Vec::new(),
            selected: BTreeSet::new(),
            controls: PromptControls::default(),
        }
    }

    pub fn with_options(mut self, options: Vec<OptionItem>) -> Self {
        self.options = options;
        self
    }

    pub fn with_controls(mut self, controls: PromptControls) -> Self {
        self.controls = controls;
        self
    }

    pub fn option(&self, index: usize) -> Option<&OptionItem> {
        self.options.get(index)
    }

    pub fn is_selected(&self, option: &OptionItem) -> bool {
        self.selected.contains(&option.value)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CarryOverChoice {
    Fresh,
    CloneAll,
    Choose,
    Finish,
}

impl CarryOverChoice {
    pub const ALL: [CarryOverChoice; 4] = [Self::Fresh, Self::CloneAll, Self::Choose, Self::Finish];

    pub fn label(self) -> &'static str {
        match self {
            Self::Fresh => "Yes, new task",
            Self::CloneAll => "Yes, same as before",
            Self::Choose => "Yes, choose fields",
            Self::Finish => "No",
        }
    }

    pub fn value(self) -> &'static str {
        match self {
            Self::Fresh => "fresh",
            Self::CloneAll => "clone",
            Self::Choose => "choose",
            Self::Finish => "finish",
        }
    }

    pub fn from_value(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|choice| choice.value() == value)
    }
}

/// Result of feeding one input to the record builder.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: DialogState,
    pub to: DialogState,
    pub notices: Vec<Notice>,
    pub prompt: Option<Prompt>,
    /// True when the input only changed the current prompt in place (multi-select toggles).
    pub refreshes_prompt: bool,
}

impl TransitionOutcome {
    pub fn submission_ready(&self) -> bool {
        self.to == DialogState::Finalizing
    }
}

/// Categories the user may tick on the carry-over prompt.
pub fn carry_category_options(categories: &[CarryCategory]) -> Vec<OptionItem> {
    categories.iter().map(|category| OptionItem::plain(category.as_str())).collect()
}
