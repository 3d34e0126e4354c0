use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{Days, Local, NaiveDate};
use tracing::{debug, warn};

use crate::carry_over::{self, CarryCategory};
use crate::domain::field::{descriptor, FieldDescriptor, FieldName, InputKind};
use crate::domain::record::{SprintRef, TaskRecord};
use crate::errors::DialogError;
use crate::flows::states::{
    carry_category_options, CarryOverChoice, DialogInput, DialogState, Notice, Prompt,
    PromptControls, TransitionOutcome,
};
use crate::options::{OptionItem, OptionSource, TrackerError};
use crate::resolver::{self, LookupRequest, Plan, Resolution, SkipReason};

pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

#[derive(Clone, Copy, Debug)]
pub struct FixedClock(pub NaiveDate);

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        self.0
    }
}

/// Everything one conversation knows about the task it is defining.
#[derive(Clone, Debug)]
pub struct DialogSession {
    pub record: TaskRecord,
    pub state: DialogState,
    pub prompt: Option<Prompt>,
    /// Multi-select prompt to return to after a free-text detour.
    parked_prompt: Option<Prompt>,
    /// The last successfully submitted record, kept for carry-over.
    pub previous: Option<TaskRecord>,
    pub carry_selection: BTreeSet<CarryCategory>,
}

impl DialogSession {
    pub fn new(record: TaskRecord) -> Self {
        Self {
            record,
            state: DialogState::Field(FieldName::Project),
            prompt: None,
            parked_prompt: None,
            previous: None,
            carry_selection: BTreeSet::new(),
        }
    }
}

/// The field after `current` for this record; `None` means every field has been visited.
///
/// `parent_story` only exists on the path of sub-tasks.
pub fn next_field(current: Option<FieldName>, record: &TaskRecord) -> Option<FieldName> {
    let mut candidate = match current {
        None => Some(FieldName::Project),
        Some(field) => field.successor(),
    };
    while let Some(field) = candidate {
        if field == FieldName::ParentStory && !record.is_sub_task() {
            candidate = field.successor();
            continue;
        }
        return Some(field);
    }
    None
}

enum Next {
    AdvanceFrom(FieldName),
    Refresh,
    Show(DialogState, Prompt),
    Restart,
    Finalize,
    Finish,
}

type Answer = Result<Next, String>;

/// Walks a [`DialogSession`] through the field order, one input at a time.
#[derive(Clone)]
pub struct RecordBuilder {
    source: Arc<dyn OptionSource>,
    clock: Arc<dyn Clock>,
}

impl RecordBuilder {
    pub fn new(source: Arc<dyn OptionSource>, clock: Arc<dyn Clock>) -> Self {
        Self { source, clock }
    }

    /// Resolves fields from the top until one needs the user.
    pub async fn start(&self, session: &mut DialogSession) -> TransitionOutcome {
        let from = session.state.clone();
        let mut notices = Vec::new();
        self.walk(session, None, &mut notices).await;
        outcome(from, session, notices, false)
    }

    pub async fn apply(&self, session: &mut DialogSession, input: DialogInput) -> TransitionOutcome {
        let from = session.state.clone();
        let mut notices = Vec::new();

        if input == DialogInput::Cancel {
            session.state = DialogState::Cancelled;
            session.prompt = None;
            notices.push(Notice::Cancelled);
            return outcome(from, session, notices, false);
        }

        let answer = match from.clone() {
            DialogState::Field(field) => self.answer_field(session, field, input),
            DialogState::AssigneeSearch => self.answer_search(session, input, &mut notices).await,
            DialogState::AssigneeResults => self.answer_search_result(session, input),
            DialogState::LabelEntry => answer_new_label(session, input),
            DialogState::SubmissionFailed => match input {
                DialogInput::Retry => Ok(Next::Finalize),
                _ => Err("choose Retry or Cancel".to_string()),
            },
            DialogState::CarryOverOffer => answer_carry_offer(session, input),
            DialogState::CarryOverSelect => answer_carry_select(session, input),
            DialogState::Finalizing => Err("the task is being created, please wait".to_string()),
            DialogState::Completed | DialogState::Cancelled => {
                Err("this dialog has ended, start a new one with /create_task".to_string())
            }
        };

        let refreshes_prompt = matches!(answer, Ok(Next::Refresh));
        match answer {
            Ok(Next::AdvanceFrom(field)) => self.walk(session, Some(field), &mut notices).await,
            Ok(Next::Refresh) => refresh_selection(session),
            Ok(Next::Show(state, prompt)) => {
                session.state = state;
                session.prompt = Some(prompt);
            }
            Ok(Next::Restart) => self.walk(session, None, &mut notices).await,
            Ok(Next::Finalize) => {
                session.state = DialogState::Finalizing;
                session.prompt = None;
            }
            Ok(Next::Finish) => {
                session.state = DialogState::Completed;
                session.prompt = None;
            }
            Err(reason) => notices.push(Notice::InvalidInput(reason)),
        }

        debug!(
            event_name = "dialog.transition",
            record_id = %session.record.id,
            from = ?from,
            to = ?session.state,
            "dialog input applied"
        );
        outcome(from, session, notices, refreshes_prompt)
    }

    /// Records a successful submission and offers to start another task.
    pub fn submission_succeeded(&self, session: &mut DialogSession) -> TransitionOutcome {
        let from = session.state.clone();
        session.previous = Some(session.record.clone());
        session.state = DialogState::CarryOverOffer;
        session.prompt = Some(carry_offer_prompt());
        outcome(from, session, Vec::new(), false)
    }

    /// Keeps the record so the same submission can be retried.
    pub fn submission_failed(&self, session: &mut DialogSession, error: &str) -> TransitionOutcome {
        let from = session.state.clone();
        session.state = DialogState::SubmissionFailed;
        session.prompt = Some(
            Prompt::text(format!("Failed to create task: {error}"))
                .with_controls(PromptControls { retry: true, ..PromptControls::default() }),
        );
        outcome(from, session, Vec::new(), false)
    }

    async fn walk(
        &self,
        session: &mut DialogSession,
        from: Option<FieldName>,
        notices: &mut Vec<Notice>,
    ) {
        session.parked_prompt = None;
        let mut cursor = from;

        while let Some(field) = next_field(cursor, &session.record) {
            let field_descriptor = descriptor(field);
            let resolution = match resolver::plan(field_descriptor, &session.record) {
                Plan::Resolved(resolution) => resolution,
                Plan::Lookup(request) => {
                    let lookup = self
                        .lookup(&mut session.record, &request)
                        .await
                        .map_err(DialogError::LookupUnavailable);
                    if let Err(error) = &lookup {
                        warn!(
                            event_name = "dialog.lookup.failed",
                            record_id = %session.record.id,
                            field = %field,
                            error = %error,
                            "live lookup failed, treating as no options"
                        );
                    }
                    resolver::resolve_lookup(field_descriptor, lookup)
                }
            };
            if field == FieldName::ParentStory && session.record.is_sub_task() {
                // a sub-task never carries an epic, even when no parent is picked
                session.record.epic = None;
            }

            match resolution {
                Resolution::Retain => notices.push(Notice::Retained(field)),
                Resolution::Skip(SkipReason::Inactive) => notices.push(Notice::Skipped(field)),
                Resolution::Skip(SkipReason::NoOptions) => notices.push(Notice::NoOptions(field)),
                Resolution::Ask { options, multi_select } => {
                    session.state = DialogState::Field(field);
                    session.prompt =
                        Some(field_prompt(field_descriptor, &session.record, options, multi_select));
                    return;
                }
            }
            cursor = Some(field);
        }

        session.state = DialogState::Finalizing;
        session.prompt = None;
    }

    async fn lookup(
        &self,
        record: &mut TaskRecord,
        request: &LookupRequest,
    ) -> Result<Vec<OptionItem>, TrackerError> {
        let source = &self.source;
        match request {
            LookupRequest::Projects => source.list_projects().await,
            LookupRequest::Components { project } => source.list_components(project).await,
            LookupRequest::Assignees { project } => source.list_assignees(project).await,
            LookupRequest::Priorities => source.list_priorities().await,
            LookupRequest::Sprints { project, board_id } => {
                let board = match board_id {
                    Some(board) => Some(*board),
                    None => source.board_for_project(project).await?,
                };
                record.project_context.board_id = board;
                let sprints = match board {
                    Some(board) => source.list_sprints(board).await?,
                    None => Vec::new(),
                };
                record.project_context.sprints = Some(sprints.clone());
                Ok(sprints)
            }
            LookupRequest::Epics { project } => {
                let epics = source.list_epics(project).await?;
                record.project_context.epics = Some(epics.clone());
                Ok(epics)
            }
            LookupRequest::Versions { project } => source.list_versions(project).await,
            LookupRequest::IssueTypes { project } => {
                let types = source.list_issue_types(project).await?;
                record.project_context.task_types = Some(types.clone());
                Ok(types)
            }
            LookupRequest::Stories { project, epic } => {
                source.list_stories(project, epic.as_deref()).await
            }
            LookupRequest::Labels { project } => source.list_labels(project).await,
        }
    }

    fn answer_field(&self, session: &mut DialogSession, field: FieldName, input: DialogInput) -> Answer {
        let field_descriptor = descriptor(field);
        match (field_descriptor.input, input) {
            (InputKind::FreeText, DialogInput::Text(text)) => {
                answer_text(&mut session.record, field, &text, false)
            }
            (InputKind::FreeText, DialogInput::ForwardedText(text)) => {
                answer_text(&mut session.record, field, &text, true)
            }
            (InputKind::FreeText, DialogInput::Skip) if field_descriptor.skippable => {
                Ok(Next::AdvanceFrom(field))
            }
            (InputKind::SingleSelect, DialogInput::Select(index)) => {
                let value = selected_value(session, index)?;
                self.commit(&mut session.record, field, &value)?;
                Ok(Next::AdvanceFrom(field))
            }
            (InputKind::SingleSelect, DialogInput::Text(text))
                if matches!(field, FieldName::StoryPoints | FieldName::Deadline) =>
            {
                self.commit(&mut session.record, field, &text)?;
                Ok(Next::AdvanceFrom(field))
            }
            (InputKind::SingleSelect, DialogInput::Others) if field == FieldName::Assignee => {
                Ok(Next::Show(
                    DialogState::AssigneeSearch,
                    Prompt::text("Type a name or email to search for the assignee:"),
                ))
            }
            (InputKind::MultiSelect, DialogInput::Toggle(index)) => {
                let value = selected_value(session, index)?;
                session.record.toggle(field, &value);
                Ok(Next::Refresh)
            }
            (InputKind::MultiSelect, DialogInput::Done) => Ok(Next::AdvanceFrom(field)),
            (InputKind::MultiSelect, DialogInput::NewLabel) if field == FieldName::Labels => {
                session.parked_prompt = session.prompt.clone();
                Ok(Next::Show(DialogState::LabelEntry, Prompt::text("Type the new label:")))
            }
            (InputKind::SingleSelect | InputKind::MultiSelect, DialogInput::Skip)
                if field_descriptor.skippable =>
            {
                session.record.clear_selection(field);
                Ok(Next::AdvanceFrom(field))
            }
            (InputKind::Upload, DialogInput::Done | DialogInput::Skip) => {
                Ok(Next::AdvanceFrom(field))
            }
            (InputKind::Upload, DialogInput::Text(text)) => {
                match text.trim().to_ascii_lowercase().as_str() {
                    "done" | "skip" => Ok(Next::AdvanceFrom(field)),
                    _ => Err("send an attachment, or type \"done\" or \"skip\"".to_string()),
                }
            }
            (_, other) => Err(unexpected(field, &other)),
        }
    }

    async fn answer_search(
        &self,
        session: &mut DialogSession,
        input: DialogInput,
        notices: &mut Vec<Notice>,
    ) -> Answer {
        let query = match input {
            DialogInput::Text(query) => query.trim().to_string(),
            DialogInput::Skip => return Ok(Next::AdvanceFrom(FieldName::Assignee)),
            _ => return Err("type a name or email to search for".to_string()),
        };
        if query.is_empty() {
            return Err("the search text is empty".to_string());
        }

        let results = match self.source.search_users(&query).await {
            Ok(results) => results,
            Err(error) => {
                warn!(
                    event_name = "dialog.user_search.failed",
                    record_id = %session.record.id,
                    error = %error,
                    "user search failed"
                );
                Vec::new()
            }
        };

        if results.is_empty() {
            notices.push(Notice::NoUserMatches(query));
            return Ok(Next::Show(
                DialogState::AssigneeSearch,
                Prompt::text("Type a name or email to search for the assignee:"),
            ));
        }

        let prompt = Prompt::text("Select the user:").with_options(results).with_controls(
            PromptControls { skip: true, others: true, ..PromptControls::default() },
        );
        Ok(Next::Show(DialogState::AssigneeResults, prompt))
    }

    fn answer_search_result(&self, session: &mut DialogSession, input: DialogInput) -> Answer {
        match input {
            DialogInput::Select(index) => {
                let value = selected_value(session, index)?;
                session.record.assignee = Some(value);
                Ok(Next::AdvanceFrom(FieldName::Assignee))
            }
            DialogInput::Others => Ok(Next::Show(
                DialogState::AssigneeSearch,
                Prompt::text("Type a name or email to search for the assignee:"),
            )),
            DialogInput::Skip => Ok(Next::AdvanceFrom(FieldName::Assignee)),
            other => Err(unexpected(FieldName::Assignee, &other)),
        }
    }

    fn commit(&self, record: &mut TaskRecord, field: FieldName, value: &str) -> Result<(), String> {
        match field {
            FieldName::Project => record.set_project(value),
            FieldName::Assignee => record.assignee = Some(value.to_string()),
            FieldName::Priority => record.priority = Some(value.to_string()),
            FieldName::Sprint => record.sprint = Some(SprintRef::parse(value)),
            FieldName::Epic => record.set_epic(value),
            FieldName::Release => record.release = Some(value.to_string()),
            FieldName::TaskType => record.task_type = Some(value.to_string()),
            FieldName::ParentStory => record.set_parent_issue(value),
            FieldName::StoryPoints => record.story_points = Some(parse_story_points(value)?),
            FieldName::Deadline => record.due_date = Some(self.parse_deadline(value)?),
            other => return Err(format!("{} does not take a selection", other.display_name())),
        }
        Ok(())
    }

    /// Accepts a day offset from today or an ISO date.
    fn parse_deadline(&self, value: &str) -> Result<NaiveDate, String> {
        let value = value.trim();
        if let Ok(days) = value.parse::<u64>() {
            return self
                .clock
                .today()
                .checked_add_days(Days::new(days))
                .ok_or_else(|| format!("{days} days from today is out of range"));
        }
        NaiveDate::parse_from_str(value, "%Y-%m-%d")
            .map_err(|_| format!("`{value}` is neither a number of days nor a YYYY-MM-DD date"))
    }
}

fn outcome(
    from: DialogState,
    session: &DialogSession,
    notices: Vec<Notice>,
    refreshes_prompt: bool,
) -> TransitionOutcome {
    TransitionOutcome {
        from,
        to: session.state.clone(),
        notices,
        prompt: session.prompt.clone(),
        refreshes_prompt,
    }
}

fn answer_text(record: &mut TaskRecord, field: FieldName, text: &str, forwarded: bool) -> Answer {
    let trimmed = text.trim();
    match field {
        FieldName::Summary => {
            if trimmed.is_empty() {
                return Err("the summary cannot be empty".to_string());
            }
            if forwarded {
                let first_line = trimmed.lines().next().unwrap_or(trimmed).trim();
                record.summary = Some(first_line.to_string());
                record.description = Some(trimmed.to_string());
            } else {
                record.summary = Some(trimmed.to_string());
            }
        }
        FieldName::Description => {
            if !trimmed.eq_ignore_ascii_case("skip") && !trimmed.is_empty() {
                record.description = Some(trimmed.to_string());
            }
        }
        other => return Err(format!("{} does not take free text", other.display_name())),
    }
    Ok(Next::AdvanceFrom(field))
}

fn answer_new_label(session: &mut DialogSession, input: DialogInput) -> Answer {
    let mut prompt = match session.parked_prompt.take() {
        Some(prompt) => prompt,
        None => return Err("there is no label prompt to return to".to_string()),
    };

    match input {
        DialogInput::Text(text) => {
            let label = text.trim();
            if label.is_empty() {
                session.parked_prompt = Some(prompt);
                return Err("the label cannot be empty".to_string());
            }
            if !prompt.options.iter().any(|option| option.value == label) {
                prompt.options.push(OptionItem::plain(label));
            }
            session.record.labels.insert(label.to_string());
            prompt.selected = session.record.labels.clone();
            Ok(Next::Show(DialogState::Field(FieldName::Labels), prompt))
        }
        DialogInput::Skip => Ok(Next::Show(DialogState::Field(FieldName::Labels), prompt)),
        other => {
            session.parked_prompt = Some(prompt);
            Err(unexpected(FieldName::Labels, &other))
        }
    }
}

fn answer_carry_offer(session: &mut DialogSession, input: DialogInput) -> Answer {
    let index = match input {
        DialogInput::Select(index) => index,
        _ => return Err("pick one of the options".to_string()),
    };
    let choice = selected_value(session, index)
        .ok()
        .and_then(|value| CarryOverChoice::from_value(&value))
        .ok_or_else(|| "pick one of the options".to_string())?;
    let previous = session.previous.clone().ok_or_else(|| "no previous task".to_string())?;

    match choice {
        CarryOverChoice::Fresh => {
            session.record = carry_over::fresh(&previous);
            Ok(Next::Restart)
        }
        CarryOverChoice::CloneAll => {
            session.record = carry_over::clone_all(&previous);
            Ok(Next::Restart)
        }
        CarryOverChoice::Choose => {
            session.carry_selection.clear();
            let categories = carry_over::available_categories(&previous);
            let prompt = Prompt::text("Select which fields to keep for the new task:")
                .with_options(carry_category_options(&categories))
                .with_controls(PromptControls {
                    multi_select: true,
                    skip: true,
                    ..PromptControls::default()
                });
            Ok(Next::Show(DialogState::CarryOverSelect, prompt))
        }
        CarryOverChoice::Finish => Ok(Next::Finish),
    }
}

fn answer_carry_select(session: &mut DialogSession, input: DialogInput) -> Answer {
    let previous = session.previous.clone().ok_or_else(|| "no previous task".to_string())?;
    match input {
        DialogInput::Toggle(index) => {
            let value = selected_value(session, index)?;
            let category = CarryCategory::from_value(&value)
                .ok_or_else(|| format!("`{value}` is not a field category"))?;
            if !session.carry_selection.remove(&category) {
                session.carry_selection.insert(category);
            }
            Ok(Next::Refresh)
        }
        DialogInput::Done => {
            session.record = carry_over::fork(&previous, &session.carry_selection);
            session.carry_selection.clear();
            Ok(Next::Restart)
        }
        DialogInput::Skip => {
            session.record = carry_over::fork(&previous, &BTreeSet::new());
            session.carry_selection.clear();
            Ok(Next::Restart)
        }
        _ => Err("toggle the fields to keep, then press Done or Skip".to_string()),
    }
}

fn refresh_selection(session: &mut DialogSession) {
    let selected = match &session.state {
        DialogState::CarryOverSelect => {
            session.carry_selection.iter().map(|category| category.as_str().to_string()).collect()
        }
        state => state
            .field()
            .and_then(|field| session.record.selection(field))
            .cloned()
            .unwrap_or_default(),
    };
    if let Some(prompt) = session.prompt.as_mut() {
        prompt.selected = selected;
    }
}

fn selected_value(session: &DialogSession, index: usize) -> Result<String, String> {
    session
        .prompt
        .as_ref()
        .and_then(|prompt| prompt.option(index))
        .map(|option| option.value.clone())
        .ok_or_else(|| format!("option {} is not on the list", index + 1))
}

fn parse_story_points(value: &str) -> Result<f64, String> {
    let points = value
        .trim()
        .parse::<f64>()
        .map_err(|_| format!("story points must be a number, got `{}`", value.trim()))?;
    if !points.is_finite() || points < 0.0 {
        return Err("story points must be zero or more".to_string());
    }
    Ok(points)
}

fn field_prompt(
    field_descriptor: &FieldDescriptor,
    record: &TaskRecord,
    options: Vec<OptionItem>,
    multi_select: bool,
) -> Prompt {
    let field = field_descriptor.name;
    let selectable = matches!(field_descriptor.input, InputKind::SingleSelect | InputKind::MultiSelect);
    Prompt {
        text: field.question().to_string(),
        options,
        selected: record.selection(field).cloned().unwrap_or_default(),
        controls: PromptControls {
            multi_select,
            skip: selectable && field_descriptor.skippable,
            others: field == FieldName::Assignee,
            new_label: field == FieldName::Labels,
            retry: false,
        },
    }
}

fn carry_offer_prompt() -> Prompt {
    Prompt::text("Task created. Do you want to create another task with similar fields?")
        .with_options(
            CarryOverChoice::ALL
                .into_iter()
                .map(|choice| OptionItem::new(choice.label(), choice.value()))
                .collect(),
        )
}

fn unexpected(field: FieldName, input: &DialogInput) -> String {
    let kind = match input {
        DialogInput::Text(_) | DialogInput::ForwardedText(_) => "text",
        DialogInput::Select(_) => "a selection",
        DialogInput::Toggle(_) => "a toggle",
        DialogInput::Done => "done",
        DialogInput::Skip => "skip",
        DialogInput::Others => "a user search",
        DialogInput::NewLabel => "a new label",
        DialogInput::Retry => "retry",
        DialogInput::Cancel => "cancel",
    };
    format!("{} does not accept {kind} here", field.display_name())
}
