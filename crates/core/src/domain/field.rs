use std::fmt;

use serde::{Deserialize, Serialize};

/// Every collectible field, declared in dialog order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldName {
    Project,
    Summary,
    Description,
    Component,
    Assignee,
    Priority,
    Sprint,
    Epic,
    Release,
    TaskType,
    ParentStory,
    StoryPoints,
    Deadline,
    Labels,
    Attachments,
}

impl FieldName {
    pub const ORDER: [FieldName; 15] = [
        FieldName::Project,
        FieldName::Summary,
        FieldName::Description,
        FieldName::Component,
        FieldName::Assignee,
        FieldName::Priority,
        FieldName::Sprint,
        FieldName::Epic,
        FieldName::Release,
        FieldName::TaskType,
        FieldName::ParentStory,
        FieldName::StoryPoints,
        FieldName::Deadline,
        FieldName::Labels,
        FieldName::Attachments,
    ];

    pub fn position(self) -> usize {
        self as usize
    }

    /// The field declared right after this one, ignoring conditional fields.
    pub fn successor(self) -> Option<FieldName> {
        Self::ORDER.get(self.position() + 1).copied()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::Summary => "summary",
            Self::Description => "description",
            Self::Component => "component",
            Self::Assignee => "assignee",
            Self::Priority => "priority",
            Self::Sprint => "sprint",
            Self::Epic => "epic",
            Self::Release => "release",
            Self::TaskType => "task_type",
            Self::ParentStory => "parent_story",
            Self::StoryPoints => "story_points",
            Self::Deadline => "deadline",
            Self::Labels => "labels",
            Self::Attachments => "attachments",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::Project => "Project",
            Self::Summary => "Summary",
            Self::Description => "Description",
            Self::Component => "Components",
            Self::Assignee => "Assignee",
            Self::Priority => "Priority",
            Self::Sprint => "Sprint",
            Self::Epic => "Epic",
            Self::Release => "Release",
            Self::TaskType => "Task type",
            Self::ParentStory => "Parent story",
            Self::StoryPoints => "Story points",
            Self::Deadline => "Deadline",
            Self::Labels => "Labels",
            Self::Attachments => "Attachments",
        }
    }

    pub fn question(self) -> &'static str {
        match self {
            Self::Project => "Please select a project:",
            Self::Summary => "Please enter the task summary:",
            Self::Description => {
                "Send me the description of the task (or type \"skip\" to leave it empty)."
            }
            Self::Component => {
                "Choose one or more components (toggle on/off). Press Done when finished, or Skip."
            }
            Self::Assignee => "Select an assignee, or Others to search for someone else:",
            Self::Priority => "Select a priority:",
            Self::Sprint => "Select a sprint:",
            Self::Epic => "Select an epic:",
            Self::Release => "Select a release:",
            Self::TaskType => "Select the task type:",
            Self::ParentStory => "Select the parent story for this sub-task:",
            Self::StoryPoints => "Select the story points:",
            Self::Deadline => "Pick the number of days until the deadline:",
            Self::Labels => {
                "Choose one or more labels (toggle on/off), add a New label, then press Done or Skip."
            }
            Self::Attachments => {
                "Send attachments (images, videos, audio, documents). Type \"done\" when finished or \"skip\" to skip."
            }
        }
    }
}

impl fmt::Display for FieldName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FieldName {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ORDER
            .into_iter()
            .find(|field| field.as_str() == value.trim())
            .ok_or_else(|| format!("unknown field `{value}`"))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputKind {
    FreeText,
    SingleSelect,
    MultiSelect,
    Upload,
}

/// Which tracker read feeds a field when no fixed list is configured.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LookupKind {
    Projects,
    Components,
    Assignees,
    Priorities,
    Sprints,
    Epics,
    Versions,
    IssueTypes,
    Stories,
    Labels,
}

impl LookupKind {
    pub fn needs_project(self) -> bool {
        !matches!(self, Self::Projects | Self::Priorities)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuiltinOptions {
    StoryPoints,
    DeadlineOffsets,
}

impl BuiltinOptions {
    pub const STORY_POINTS: [&'static str; 16] = [
        "0.25", "0.5", "0.75", "1", "1.5", "2", "3", "4", "5", "6", "7", "8", "10", "12", "14",
        "21",
    ];

    pub const DEADLINE_OFFSETS: [u32; 17] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 21, 30];

    /// `(label, value)` pairs in display order.
    pub fn pairs(self) -> Vec<(String, String)> {
        match self {
            Self::StoryPoints => Self::STORY_POINTS
                .iter()
                .map(|points| ((*points).to_string(), (*points).to_string()))
                .collect(),
            Self::DeadlineOffsets => Self::DEADLINE_OFFSETS
                .iter()
                .map(|days| {
                    let label =
                        if *days == 0 { "Current Day".to_string() } else { days.to_string() };
                    (label, days.to_string())
                })
                .collect(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OptionOrigin {
    Lookup(LookupKind),
    Builtin(BuiltinOptions),
    None,
}

/// Static metadata for one collectible field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: FieldName,
    pub input: InputKind,
    pub options: OptionOrigin,
    pub skippable: bool,
    /// Required fields ignore an `active = false` user setting.
    pub required: bool,
}

impl FieldDescriptor {
    const fn new(
        name: FieldName,
        input: InputKind,
        options: OptionOrigin,
        skippable: bool,
        required: bool,
    ) -> Self {
        Self { name, input, options, skippable, required }
    }

    pub fn position(&self) -> usize {
        self.name.position()
    }

    pub fn multi_select(&self) -> bool {
        matches!(self.input, InputKind::MultiSelect)
    }

    pub fn lookup(&self) -> Option<LookupKind> {
        match self.options {
            OptionOrigin::Lookup(kind) => Some(kind),
            _ => None,
        }
    }
}

const DESCRIPTORS: [FieldDescriptor; 15] = {
    use FieldName as F;
    use InputKind::{FreeText, MultiSelect, SingleSelect, Upload};
    use OptionOrigin::{Builtin, Lookup};

    [
        FieldDescriptor::new(F::Project, SingleSelect, Lookup(LookupKind::Projects), false, true),
        FieldDescriptor::new(F::Summary, FreeText, OptionOrigin::None, false, true),
        FieldDescriptor::new(F::Description, FreeText, OptionOrigin::None, true, true),
        FieldDescriptor::new(F::Component, MultiSelect, Lookup(LookupKind::Components), true, false),
        FieldDescriptor::new(F::Assignee, SingleSelect, Lookup(LookupKind::Assignees), true, false),
        FieldDescriptor::new(F::Priority, SingleSelect, Lookup(LookupKind::Priorities), true, false),
        FieldDescriptor::new(F::Sprint, SingleSelect, Lookup(LookupKind::Sprints), true, false),
        FieldDescriptor::new(F::Epic, SingleSelect, Lookup(LookupKind::Epics), true, false),
        FieldDescriptor::new(F::Release, SingleSelect, Lookup(LookupKind::Versions), true, false),
        FieldDescriptor::new(F::TaskType, SingleSelect, Lookup(LookupKind::IssueTypes), true, false),
        FieldDescriptor::new(F::ParentStory, SingleSelect, Lookup(LookupKind::Stories), true, false),
        FieldDescriptor::new(
            F::StoryPoints,
            SingleSelect,
            Builtin(BuiltinOptions::StoryPoints),
            true,
            false,
        ),
        FieldDescriptor::new(
            F::Deadline,
            SingleSelect,
            Builtin(BuiltinOptions::DeadlineOffsets),
            true,
            false,
        ),
        FieldDescriptor::new(F::Labels, MultiSelect, Lookup(LookupKind::Labels), true, false),
        FieldDescriptor::new(F::Attachments, Upload, OptionOrigin::None, true, false),
    ]
};

pub fn descriptor(name: FieldName) -> &'static FieldDescriptor {
    &DESCRIPTORS[name.position()]
}

#[cfg(test)]
mod tests {
    use super::{descriptor, BuiltinOptions, FieldName, InputKind, LookupKind};

    #[test]
    fn descriptor_table_follows_declared_order() {
        for (index, field) in FieldName::ORDER.iter().enumerate() {
            assert_eq!(descriptor(*field).name, *field);
            assert_eq!(descriptor(*field).position(), index);
        }
        assert_eq!(FieldName::Attachments.successor(), None);
        assert_eq!(FieldName::TaskType.successor(), Some(FieldName::ParentStory));
    }

    #[test]
    fn only_components_and_labels_are_multi_select() {
        let multi: Vec<FieldName> = FieldName::ORDER
            .into_iter()
            .filter(|field| descriptor(*field).multi_select())
            .collect();
        assert_eq!(multi, vec![FieldName::Component, FieldName::Labels]);
        assert_eq!(descriptor(FieldName::Summary).input, InputKind::FreeText);
    }

    #[test]
    fn field_names_round_trip_through_their_config_keys() {
        for field in FieldName::ORDER {
            assert_eq!(field.as_str().parse::<FieldName>(), Ok(field));
        }
        assert!("severity".parse::<FieldName>().is_err());
    }

    #[test]
    fn deadline_offsets_label_today_specially() {
        let pairs = BuiltinOptions::DeadlineOffsets.pairs();
        assert_eq!(pairs.first(), Some(&("Current Day".to_string(), "0".to_string())));
        assert_eq!(pairs.last(), Some(&("30".to_string(), "30".to_string())));
        assert_eq!(pairs.len(), 17);
    }

    #[test]
    fn project_scoped_lookups_are_flagged() {
        assert!(!LookupKind::Projects.needs_project());
        assert!(!LookupKind::Priorities.needs_project());
        assert!(LookupKind::Sprints.needs_project());
    }
}
