//! Decides, for one field, whether to retain, skip, or ask.
//!
//! Resolution is split in two pure steps so the live lookup stays outside:
//! [`plan`] works from the record and its settings snapshot alone, and
//! [`resolve_lookup`] turns a lookup outcome into the final [`Resolution`].

use crate::domain::field::{FieldDescriptor, InputKind, LookupKind, OptionOrigin};
use crate::domain::record::TaskRecord;
use crate::errors::DialogError;
use crate::options::OptionItem;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// Turned off in the user's settings.
    Inactive,
    /// The lookup returned nothing, or failed.
    NoOptions,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Resolution {
    Retain,
    Skip(SkipReason),
    /// Ask the user. `options` is empty for free-text and upload fields.
    Ask { options: Vec<OptionItem>, multi_select: bool },
}

/// A live read the caller must perform before the field can be resolved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LookupRequest {
    Projects,
    Components { project: String },
    Assignees { project: String },
    Priorities,
    Sprints { project: String, board_id: Option<u64> },
    Epics { project: String },
    Versions { project: String },
    IssueTypes { project: String },
    Stories { project: String, epic: Option<String> },
    Labels { project: String },
}

#[derive(Clone, Debug, PartialEq)]
pub enum Plan {
    Resolved(Resolution),
    Lookup(LookupRequest),
}

/// Precedence: existing value, then inactive setting, then fixed list, then lookup.
pub fn plan(descriptor: &FieldDescriptor, record: &TaskRecord) -> Plan {
    let field = descriptor.name;
    let settings = &record.settings;

    if record.has_value(field) {
        return Plan::Resolved(Resolution::Retain);
    }

    if !descriptor.required && !settings.is_active(field) {
        return Plan::Resolved(Resolution::Skip(SkipReason::Inactive));
    }

    if let Some(values) = settings.fixed_values(field) {
        return Plan::Resolved(ask(descriptor, values.iter().cloned().map(OptionItem::plain).collect()));
    }

    match descriptor.options {
        OptionOrigin::None => Plan::Resolved(Resolution::Ask {
            options: Vec::new(),
            multi_select: descriptor.multi_select(),
        }),
        OptionOrigin::Builtin(builtin) => Plan::Resolved(ask(
            descriptor,
            builtin.pairs().into_iter().map(|(label, value)| OptionItem::new(label, value)).collect(),
        )),
        OptionOrigin::Lookup(kind) => {
            if let Some(cached) = cached_options(kind, record) {
                return Plan::Resolved(options_or_skip(descriptor, cached.to_vec()));
            }
            match lookup_request(kind, record) {
                Some(request) => Plan::Lookup(request),
                None => Plan::Resolved(Resolution::Skip(SkipReason::NoOptions)),
            }
        }
    }
}

/// Lookup failures degrade to "no options"; they never end the dialog.
pub fn resolve_lookup(
    descriptor: &FieldDescriptor,
    outcome: Result<Vec<OptionItem>, DialogError>,
) -> Resolution {
    match outcome {
        Ok(options) => options_or_skip(descriptor, options),
        Err(_) => Resolution::Skip(SkipReason::NoOptions),
    }
}

fn options_or_skip(descriptor: &FieldDescriptor, options: Vec<OptionItem>) -> Resolution {
    if options.is_empty() && !matches!(descriptor.input, InputKind::FreeText | InputKind::Upload) {
        return Resolution::Skip(SkipReason::NoOptions);
    }
    ask(descriptor, options)
}

fn ask(descriptor: &FieldDescriptor, options: Vec<OptionItem>) -> Resolution {
    Resolution::Ask { options, multi_select: descriptor.multi_select() }
}

fn cached_options(kind: LookupKind, record: &TaskRecord) -> Option<&[OptionItem]> {
    let context = &record.project_context;
    match kind {
        LookupKind::Sprints => context.sprints.as_deref(),
        LookupKind::Epics => context.epics.as_deref(),
        LookupKind::IssueTypes => context.task_types.as_deref(),
        _ => None,
    }
}

fn lookup_request(kind: LookupKind, record: &TaskRecord) -> Option<LookupRequest> {
    if kind == LookupKind::Projects {
        return Some(LookupRequest::Projects);
    }
    if kind == LookupKind::Priorities {
        return Some(LookupRequest::Priorities);
    }

    let project = record.project.clone()?;
    let request = match kind {
        LookupKind::Components => LookupRequest::Components { project },
        LookupKind::Assignees => LookupRequest::Assignees { project },
        LookupKind::Sprints => {
            LookupRequest::Sprints { project, board_id: record.project_context.board_id }
        }
        LookupKind::Epics => LookupRequest::Epics { project },
        LookupKind::Versions => LookupRequest::Versions { project },
        LookupKind::IssueTypes => LookupRequest::IssueTypes { project },
        LookupKind::Stories => LookupRequest::Stories { project, epic: record.epic.clone() },
        LookupKind::Labels => LookupRequest::Labels { project },
        LookupKind::Projects | LookupKind::Priorities => return None,
    };
    Some(request)
}

#[cfg(test)]
mod tests {
    use super::{plan, resolve_lookup, LookupRequest, Plan, Resolution, SkipReason};
    use crate::domain::field::{descriptor, FieldName};
    use crate::domain::record::{SprintRef, TaskRecord};
    use crate::domain::settings::{FieldConfig, UserSettings};
    use crate::errors::DialogError;
    use crate::options::{OptionItem, TrackerError};

    fn record_with(settings: UserSettings) -> TaskRecord {
        let mut record = TaskRecord::new(settings);
        record.set_project("ENG");
        record
    }

    #[test]
    fn existing_value_wins_over_every_setting() {
        let settings = UserSettings::default().with_field(FieldName::Sprint, FieldConfig::inactive());
        let mut record = record_with(settings);
        record.sprint = Some(SprintRef::Numeric(77));

        assert_eq!(plan(descriptor(FieldName::Sprint), &record), Plan::Resolved(Resolution::Retain));
    }

    #[test]
    fn inactive_field_is_skipped_without_lookup() {
        let settings =
            UserSettings::default().with_field(FieldName::Priority, FieldConfig::inactive());
        let record = record_with(settings);

        assert_eq!(
            plan(descriptor(FieldName::Priority), &record),
            Plan::Resolved(Resolution::Skip(SkipReason::Inactive))
        );
    }

    #[test]
    fn required_fields_ignore_inactive_setting() {
        let settings = UserSettings::default().with_field(FieldName::Summary, FieldConfig::inactive());
        let record = TaskRecord::new(settings);

        assert_eq!(
            plan(descriptor(FieldName::Summary), &record),
            Plan::Resolved(Resolution::Ask { options: Vec::new(), multi_select: false })
        );
    }

    #[test]
    fn fixed_list_is_used_verbatim() {
        let settings = UserSettings::default()
            .with_field(FieldName::Component, FieldConfig::fixed(["Backend", "Frontend"]));
        let record = record_with(settings);

        assert_eq!(
            plan(descriptor(FieldName::Component), &record),
            Plan::Resolved(Resolution::Ask {
                options: vec![OptionItem::plain("Backend"), OptionItem::plain("Frontend")],
                multi_select: true,
            })
        );
    }

    #[test]
    fn unset_field_without_fixed_list_requests_lookup() {
        let mut record = record_with(UserSettings::default());
        record.epic = Some("ENG-1".to_string());

        assert_eq!(
            plan(descriptor(FieldName::ParentStory), &record),
            Plan::Lookup(LookupRequest::Stories {
                project: "ENG".to_string(),
                epic: Some("ENG-1".to_string())
            })
        );
    }

    #[test]
    fn cached_project_context_avoids_lookup() {
        let mut record = record_with(UserSettings::default());
        record.project_context.sprints = Some(vec![OptionItem::new("Sprint 77", "77")]);

        assert_eq!(
            plan(descriptor(FieldName::Sprint), &record),
            Plan::Resolved(Resolution::Ask {
                options: vec![OptionItem::new("Sprint 77", "77")],
                multi_select: false
            })
        );
    }

    #[test]
    fn project_scoped_lookup_without_project_is_skipped() {
        let record = TaskRecord::new(UserSettings::default());
        assert_eq!(
            plan(descriptor(FieldName::Release), &record),
            Plan::Resolved(Resolution::Skip(SkipReason::NoOptions))
        );
    }

    #[test]
    fn builtin_scales_are_offered_without_lookup() {
        let record = record_with(UserSettings::default());
        match plan(descriptor(FieldName::StoryPoints), &record) {
            Plan::Resolved(Resolution::Ask { options, multi_select }) => {
                assert!(!multi_select);
                assert_eq!(options.len(), 16);
                assert_eq!(options[6], OptionItem::plain("3"));
            }
            other => panic!("unexpected plan {other:?}"),
        }
    }

    #[test]
    fn empty_or_failed_lookup_becomes_no_options() {
        let priority = descriptor(FieldName::Priority);
        assert_eq!(resolve_lookup(priority, Ok(Vec::new())), Resolution::Skip(SkipReason::NoOptions));
        assert_eq!(
            resolve_lookup(
                priority,
                Err(DialogError::LookupUnavailable(TrackerError::Transport("timeout".to_string())))
            ),
            Resolution::Skip(SkipReason::NoOptions)
        );
    }

    #[test]
    fn plan_is_deterministic() {
        let record = record_with(UserSettings::default());
        for field in FieldName::ORDER {
            assert_eq!(plan(descriptor(field), &record), plan(descriptor(field), &record));
        }
    }
}
