use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::record::{AttachmentSet, RecordId, TaskRecord};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CarryCategory {
    Project,
    Sprint,
    Epic,
    Assignee,
    Component,
    Label,
    /// Parent story of a sub-task, together with the sub-task type.
    Story,
}

impl CarryCategory {
    pub const BASE: [CarryCategory; 6] = [
        Self::Project,
        Self::Sprint,
        Self::Epic,
        Self::Assignee,
        Self::Component,
        Self::Label,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::Sprint => "sprint",
            Self::Epic => "epic",
            Self::Assignee => "assignee",
            Self::Component => "component",
            Self::Label => "label",
            Self::Story => "story",
        }
    }

    pub fn from_value(value: &str) -> Option<Self> {
        match value {
            "project" => Some(Self::Project),
            "sprint" => Some(Self::Sprint),
            "epic" => Some(Self::Epic),
            "assignee" => Some(Self::Assignee),
            "component" => Some(Self::Component),
            "label" => Some(Self::Label),
            "story" => Some(Self::Story),
            _ => None,
        }
    }
}

impl fmt::Display for CarryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Categories worth offering for `previous`; `story` only follows a sub-task.
pub fn available_categories(previous: &TaskRecord) -> Vec<CarryCategory> {
    let mut categories = CarryCategory::BASE.to_vec();
    if previous.is_sub_task() {
        categories.push(CarryCategory::Story);
    }
    categories
}

/// A blank record sharing only the user's settings snapshot.
pub fn fresh(previous: &TaskRecord) -> TaskRecord {
    TaskRecord::new(previous.settings.clone())
}

/// Builds the next record from the chosen categories. Everything else starts unset.
pub fn fork(previous: &TaskRecord, selection: &BTreeSet<CarryCategory>) -> TaskRecord {
    let mut next = fresh(previous);

    for category in selection {
        match category {
            CarryCategory::Project => {
                next.project = previous.project.clone();
                next.project_context = previous.project_context.clone();
            }
            CarryCategory::Sprint => next.sprint = previous.sprint.clone(),
            CarryCategory::Epic => next.epic = previous.epic.clone(),
            CarryCategory::Assignee => next.assignee = previous.assignee.clone(),
            CarryCategory::Component => next.components = previous.components.clone(),
            CarryCategory::Label => next.labels = previous.labels.clone(),
            CarryCategory::Story => {
                if previous.is_sub_task() {
                    next.task_type = previous.task_type.clone();
                    next.parent_issue = previous.parent_issue.clone();
                }
            }
        }
    }

    if next.parent_issue.is_some() {
        next.epic = None;
    }
    next
}

/// Copies every field except the free text, which is asked again, and attachments.
pub fn clone_all(previous: &TaskRecord) -> TaskRecord {
    TaskRecord {
        id: RecordId::generate(),
        summary: None,
        description: None,
        attachments: AttachmentSet::default(),
        ..previous.clone()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::NaiveDate;

    use super::{available_categories, clone_all, fork, CarryCategory};
    use crate::domain::record::{Attachment, MediaCategory, SprintRef, TaskRecord};
    use crate::domain::settings::UserSettings;
    use crate::options::OptionItem;

    fn finalized() -> TaskRecord {
        let mut record = TaskRecord::new(UserSettings::default());
        record.set_project("ENG");
        record.project_context.board_id = Some(3);
        record.project_context.sprints = Some(vec![OptionItem::new("Sprint 77", "77")]);
        record.summary = Some("Fix login".to_string());
        record.description = Some("Users are logged out".to_string());
        record.components.insert("Backend".to_string());
        record.assignee = Some("acc-1".to_string());
        record.priority = Some("High".to_string());
        record.sprint = Some(SprintRef::Numeric(77));
        record.epic = Some("ENG-1".to_string());
        record.release = Some("1.4".to_string());
        record.task_type = Some("Task".to_string());
        record.story_points = Some(3.0);
        record.due_date = NaiveDate::from_ymd_opt(2026, 3, 1);
        record.labels.insert("urgent".to_string());
        record.attachments.push(
            MediaCategory::Image,
            Attachment { filename: "single_image.jpg".to_string(), bytes: vec![1, 2] },
        );
        record
    }

    #[test]
    fn project_and_sprint_selection_copies_only_those_fields() {
        let previous = finalized();
        let selection = BTreeSet::from([CarryCategory::Sprint, CarryCategory::Project]);

        let next = fork(&previous, &selection);

        assert_eq!(next.project.as_deref(), Some("ENG"));
        assert_eq!(next.sprint, Some(SprintRef::Numeric(77)));
        assert_eq!(next.project_context, previous.project_context);
        assert_eq!(next.summary, None);
        assert_eq!(next.description, None);
        assert!(next.components.is_empty());
        assert_eq!(next.assignee, None);
        assert_eq!(next.priority, None);
        assert_eq!(next.epic, None);
        assert_eq!(next.release, None);
        assert_eq!(next.task_type, None);
        assert_eq!(next.story_points, None);
        assert_eq!(next.due_date, None);
        assert!(next.labels.is_empty());
        assert!(next.attachments.is_empty());
        assert_ne!(next.id, previous.id);
    }

    #[test]
    fn selection_order_does_not_matter() {
        let previous = finalized();
        let mut forward = BTreeSet::new();
        forward.insert(CarryCategory::Label);
        forward.insert(CarryCategory::Assignee);
        let mut backward = BTreeSet::new();
        backward.insert(CarryCategory::Assignee);
        backward.insert(CarryCategory::Label);

        let a = fork(&previous, &forward);
        let b = fork(&previous, &backward);

        assert_eq!(a.assignee, b.assignee);
        assert_eq!(a.labels, b.labels);
    }

    #[test]
    fn story_is_only_offered_and_copied_for_sub_tasks() {
        let mut previous = finalized();
        assert!(!available_categories(&previous).contains(&CarryCategory::Story));
        let next = fork(&previous, &BTreeSet::from([CarryCategory::Story]));
        assert_eq!(next.parent_issue, None);
        assert_eq!(next.task_type, None);

        previous.task_type = Some("Sub-task".to_string());
        previous.set_parent_issue("ENG-9");
        assert!(available_categories(&previous).contains(&CarryCategory::Story));

        let next = fork(&previous, &BTreeSet::from([CarryCategory::Story, CarryCategory::Epic]));
        assert_eq!(next.parent_issue.as_deref(), Some("ENG-9"));
        assert_eq!(next.task_type.as_deref(), Some("Sub-task"));
        assert_eq!(next.epic, None);
    }

    #[test]
    fn clone_all_resets_text_and_attachments() {
        let previous = finalized();
        let next = clone_all(&previous);

        assert_eq!(next.summary, None);
        assert_eq!(next.description, None);
        assert!(next.attachments.is_empty());
        assert_eq!(next.priority.as_deref(), Some("High"));
        assert_eq!(next.labels, previous.labels);
        assert_ne!(next.id, previous.id);
    }
}
