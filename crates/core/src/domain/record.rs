use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::field::FieldName;
use crate::domain::settings::UserSettings;
use crate::options::OptionItem;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId(pub String);

impl RecordId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Trackers identify sprints by number; some boards hand out opaque ids instead.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SprintRef {
    Numeric(u64),
    Opaque(String),
}

impl SprintRef {
    pub fn parse(value: &str) -> Self {
        let trimmed = value.trim();
        trimmed.parse::<u64>().map(Self::Numeric).unwrap_or_else(|_| Self::Opaque(trimmed.into()))
    }
}

impl fmt::Display for SprintRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric(id) => write!(f, "{id}"),
            Self::Opaque(id) => f.write_str(id),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaCategory {
    Image,
    Video,
    Audio,
    Document,
}

impl MediaCategory {
    /// Filename for the `index`-th item of a batch.
    pub fn batch_filename(self, index: usize, original: Option<&str>) -> String {
        match (self, original) {
            (Self::Document, Some(name)) if !name.trim().is_empty() => name.to_string(),
            (Self::Image, _) => format!("image_{index}.jpg"),
            (Self::Video, _) => format!("video_{index}.mp4"),
            (Self::Audio, _) => format!("audio_{index}.mp3"),
            (Self::Document, _) => format!("document_{index}"),
        }
    }

    /// Filename for an attachment sent on its own.
    pub fn single_filename(self, original: Option<&str>) -> String {
        match (self, original) {
            (Self::Document, Some(name)) if !name.trim().is_empty() => name.to_string(),
            (Self::Image, _) => "single_image.jpg".to_string(),
            (Self::Video, _) => "video.mp4".to_string(),
            (Self::Audio, _) => "audio.mp3".to_string(),
            (Self::Document, _) => "document".to_string(),
        }
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl fmt::Debug for Attachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attachment")
            .field("filename", &self.filename)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentSet {
    items: BTreeMap<MediaCategory, Vec<Attachment>>,
}

impl AttachmentSet {
    pub fn push(&mut self, category: MediaCategory, attachment: Attachment) {
        self.items.entry(category).or_default().push(attachment);
    }

    pub fn merge(&mut self, other: AttachmentSet) {
        for (category, attachments) in other.items {
            self.items.entry(category).or_default().extend(attachments);
        }
    }

    pub fn get(&self, category: MediaCategory) -> &[Attachment] {
        self.items.get(&category).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.items.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (MediaCategory, &Attachment)> {
        self.items
            .iter()
            .flat_map(|(category, attachments)| attachments.iter().map(move |a| (*category, a)))
    }
}

/// Lookup results fetched for the record's project, reused by later fields and carry-over.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectContext {
    pub board_id: Option<u64>,
    pub sprints: Option<Vec<OptionItem>>,
    pub epics: Option<Vec<OptionItem>>,
    pub task_types: Option<Vec<OptionItem>>,
}

/// The task being defined by one conversation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: RecordId,
    pub project: Option<String>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub components: BTreeSet<String>,
    pub assignee: Option<String>,
    pub priority: Option<String>,
    pub sprint: Option<SprintRef>,
    pub epic: Option<String>,
    pub release: Option<String>,
    pub task_type: Option<String>,
    pub parent_issue: Option<String>,
    pub story_points: Option<f64>,
    pub due_date: Option<NaiveDate>,
    pub labels: BTreeSet<String>,
    #[serde(skip)]
    pub attachments: AttachmentSet,
    pub project_context: ProjectContext,
    pub settings: UserSettings,
}

impl TaskRecord {
    pub fn new(settings: UserSettings) -> Self {
        Self {
            id: RecordId::generate(),
            project: None,
            summary: None,
            description: None,
            components: BTreeSet::new(),
            assignee: None,
            priority: None,
            sprint: None,
            epic: None,
            release: None,
            task_type: None,
            parent_issue: None,
            story_points: None,
            due_date: None,
            labels: BTreeSet::new(),
            attachments: AttachmentSet::default(),
            project_context: ProjectContext::default(),
            settings,
        }
    }

    pub fn is_sub_task(&self) -> bool {
        self.task_type.as_deref().map(is_sub_task_type).unwrap_or(false)
    }

    /// Whether the field already carries a value and should be retained without prompting.
    pub fn has_value(&self, field: FieldName) -> bool {
        match field {
            FieldName::Project => self.project.is_some(),
            FieldName::Summary => self.summary.as_deref().is_some_and(|s| !s.trim().is_empty()),
            FieldName::Description => self.description.is_some(),
            FieldName::Component => !self.components.is_empty(),
            FieldName::Assignee => self.assignee.is_some(),
            FieldName::Priority => self.priority.is_some(),
            FieldName::Sprint => self.sprint.is_some(),
            FieldName::Epic => self.epic.is_some(),
            FieldName::Release => self.release.is_some(),
            FieldName::TaskType => self.task_type.is_some(),
            FieldName::ParentStory => self.parent_issue.is_some(),
            FieldName::StoryPoints => self.story_points.is_some(),
            FieldName::Deadline => self.due_date.is_some(),
            FieldName::Labels => !self.labels.is_empty(),
            // attachments accumulate until the user says done
            FieldName::Attachments => false,
        }
    }

    pub fn set_project(&mut self, project: impl Into<String>) {
        let project = project.into();
        if self.project.as_deref() != Some(project.as_str()) {
            self.project_context = ProjectContext::default();
        }
        self.project = Some(project);
    }

    /// Epic links do not apply to sub-tasks, so an existing parent wins.
    pub fn set_epic(&mut self, epic: impl Into<String>) {
        if self.parent_issue.is_none() {
            self.epic = Some(epic.into());
        }
    }

    pub fn set_parent_issue(&mut self, key: impl Into<String>) {
        self.parent_issue = Some(key.into());
        self.epic = None;
    }

    /// Flips membership of `value` in a multi-select field. Returns the new membership.
    pub fn toggle(&mut self, field: FieldName, value: &str) -> bool {
        let set = match field {
            FieldName::Component => &mut self.components,
            FieldName::Labels => &mut self.labels,
            _ => return false,
        };
        if set.remove(value) {
            false
        } else {
            set.insert(value.to_string());
            true
        }
    }

    pub fn clear_selection(&mut self, field: FieldName) {
        match field {
            FieldName::Component => self.components.clear(),
            FieldName::Labels => self.labels.clear(),
            _ => {}
        }
    }

    pub fn selection(&self, field: FieldName) -> Option<&BTreeSet<String>> {
        match field {
            FieldName::Component => Some(&self.components),
            FieldName::Labels => Some(&self.labels),
            _ => None,
        }
    }
}

pub fn is_sub_task_type(task_type: &str) -> bool {
    let normalized = task_type.trim().to_ascii_lowercase();
    normalized == "sub-task" || normalized == "subtask"
}

#[cfg(test)]
mod tests {
    use super::{AttachmentSet, MediaCategory, SprintRef, TaskRecord};
    use crate::domain::field::FieldName;
    use crate::domain::settings::UserSettings;
    use crate::domain::record::Attachment;

    #[test]
    fn toggling_twice_leaves_the_set_unchanged() {
        let mut record = TaskRecord::new(UserSettings::default());
        record.components.insert("Backend".to_string());
        let before = record.components.clone();

        assert!(record.toggle(FieldName::Component, "Frontend"));
        assert!(!record.toggle(FieldName::Component, "Frontend"));

        assert_eq!(record.components, before);
    }

    #[test]
    fn parent_issue_clears_epic_and_blocks_later_epic() {
        let mut record = TaskRecord::new(UserSettings::default());
        record.task_type = Some("Sub-task".to_string());
        record.set_epic("ENG-1");
        record.set_parent_issue("ENG-7");

        assert_eq!(record.epic, None);
        record.set_epic("ENG-2");
        assert_eq!(record.epic, None);
        assert!(record.is_sub_task());
    }

    #[test]
    fn switching_project_drops_cached_context() {
        let mut record = TaskRecord::new(UserSettings::default());
        record.set_project("ENG");
        record.project_context.board_id = Some(12);

        record.set_project("ENG");
        assert_eq!(record.project_context.board_id, Some(12));

        record.set_project("OPS");
        assert_eq!(record.project_context.board_id, None);
    }

    #[test]
    fn sprint_ref_prefers_numeric_ids() {
        assert_eq!(SprintRef::parse("77"), SprintRef::Numeric(77));
        assert_eq!(SprintRef::parse("sprint-x"), SprintRef::Opaque("sprint-x".to_string()));
        assert_eq!(SprintRef::parse(" 77 ").to_string(), "77");
    }

    #[test]
    fn attachment_set_merges_per_category() {
        let mut set = AttachmentSet::default();
        set.push(MediaCategory::Image, Attachment { filename: "a.jpg".into(), bytes: vec![1] });

        let mut other = AttachmentSet::default();
        other.push(MediaCategory::Image, Attachment { filename: "b.jpg".into(), bytes: vec![2] });
        other.push(MediaCategory::Audio, Attachment { filename: "c.mp3".into(), bytes: vec![3] });
        set.merge(other);

        assert_eq!(set.len(), 3);
        assert_eq!(set.get(MediaCategory::Image).len(), 2);
        assert!(set.get(MediaCategory::Video).is_empty());
    }

    #[test]
    fn batch_filenames_follow_category_conventions() {
        assert_eq!(MediaCategory::Image.batch_filename(2, None), "image_2.jpg");
        assert_eq!(MediaCategory::Document.batch_filename(0, Some("spec.pdf")), "spec.pdf");
        assert_eq!(MediaCategory::Audio.single_filename(None), "audio.mp3");
    }
}
