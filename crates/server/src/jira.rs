//! Jira REST client backing the option source: `/rest/api/2` for issues and
//! metadata, `/rest/agile/1.0` for boards and sprints.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{multipart, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use taskwire_core::config::TrackerConfig;
use taskwire_core::domain::record::SprintRef;
use taskwire_core::{IssueRef, IssueRequest, OptionItem, OptionSource, TrackerError};
use tracing::{debug, warn};

const MAX_RESULTS: u32 = 200;
const ERROR_BODY_LIMIT: usize = 500;
const OPEN_STATUSES: &str = r#"status in ("To Do", "In Progress")"#;

/// Custom field ids differ between Jira instances.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CustomFields {
    pub story_points: String,
    pub sprint: String,
    pub epic_link: String,
}

#[derive(Clone)]
pub struct JiraClient {
    http: reqwest::Client,
    base_url: String,
    username: String,
    api_token: SecretString,
    fields: CustomFields,
}

#[derive(Debug, Deserialize)]
struct Named {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Project {
    key: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct ProjectDetail {
    #[serde(default, rename = "issueTypes")]
    issue_types: Vec<Named>,
}

#[derive(Debug, Deserialize)]
struct JiraUser {
    name: Option<String>,
    #[serde(rename = "accountId")]
    account_id: Option<String>,
    #[serde(rename = "displayName")]
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Version {
    name: String,
    #[serde(default)]
    released: bool,
    #[serde(default)]
    archived: bool,
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    values: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct Board {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct Sprint {
    id: u64,
    name: String,
    state: String,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(default)]
    issues: Vec<Issue>,
}

#[derive(Debug, Deserialize)]
struct Issue {
    key: String,
    #[serde(default)]
    fields: IssueFields,
}

#[derive(Debug, Default, Deserialize)]
struct IssueFields {
    summary: Option<String>,
    #[serde(default)]
    labels: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CreatedIssue {
    key: String,
}

impl JiraClient {
    pub fn new(config: &TrackerConfig) -> Result<Self, TrackerError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .build()
            .map_err(|error| TrackerError::Transport(error.to_string()))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim().trim_end_matches('/').to_owned(),
            username: config.username.clone(),
            api_token: config.api_token.clone(),
            fields: CustomFields {
                story_points: config.story_points_field.clone(),
                sprint: config.sprint_field.clone(),
                epic_link: config.epic_link_field.clone(),
            },
        })
    }

    pub fn browse_url(&self, key: &str) -> String {
        format!("{}/browse/{key}", self.base_url)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .basic_auth(&self.username, Some(self.api_token.expose_secret()))
            .header(reqwest::header::ACCEPT, "application/json")
    }

    async fn get<T>(&self, path: &str, query: &[(&str, String)]) -> Result<T, TrackerError>
    where
        T: DeserializeOwned,
    {
        let url = format!("{}{path}", self.base_url);
        let response = self.authorized(self.http.get(url).query(query)).send().await;
        decode(path, response).await
    }

    async fn search(&self, jql: String, fields: &str) -> Result<Vec<Issue>, TrackerError> {
        debug!(jql = %jql, "searching tracker issues");
        let result: SearchResult = self
            .get(
                "/rest/api/2/search",
                &[
                    ("jql", jql),
                    ("fields", fields.to_owned()),
                    ("maxResults", MAX_RESULTS.to_string()),
                ],
            )
            .await?;
        Ok(result.issues)
    }

    async fn upload_attachments(&self, key: &str, request: &IssueRequest) {
        for (category, attachment) in request.attachments.iter() {
            let part = multipart::Part::bytes(attachment.bytes.clone())
                .file_name(attachment.filename.clone());
            let form = multipart::Form::new().part("file", part);
            let url = format!("{}/rest/api/2/issue/{key}/attachments", self.base_url);
            let response = self
                .authorized(self.http.post(url))
                .header("X-Atlassian-Token", "no-check")
                .multipart(form)
                .send()
                .await;

            if let Err(error) = decode::<Value>("attachments", response).await {
                warn!(
                    event_name = "tracker.attachment_failed",
                    issue_key = key,
                    category = ?category,
                    filename = %attachment.filename,
                    error = %error,
                    "attachment upload failed"
                );
            }
        }
    }
}

async fn decode<T>(
    operation: &str,
    response: Result<reqwest::Response, reqwest::Error>,
) -> Result<T, TrackerError>
where
    T: DeserializeOwned,
{
    let response = response
        .map_err(|error| TrackerError::Transport(format!("{operation}: {error}")))?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(status_error(status, &body));
    }
    response
        .json::<T>()
        .await
        .map_err(|error| TrackerError::Decode(format!("{operation}: {error}")))
}

fn status_error(status: StatusCode, body: &str) -> TrackerError {
    let mut body = body.trim().to_owned();
    if body.len() > ERROR_BODY_LIMIT {
        let mut cut = ERROR_BODY_LIMIT;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    TrackerError::Status { status: status.as_u16(), body }
}

fn quoted(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// The `fields` object of a create-issue call. Unset values are left out.
pub fn issue_fields(request: &IssueRequest, custom: &CustomFields) -> Value {
    let mut fields = Map::new();
    fields.insert("project".into(), json!({ "key": request.project }));
    fields.insert("summary".into(), json!(request.summary));
    fields.insert("description".into(), json!(request.description));
    fields.insert("issuetype".into(), json!({ "name": request.issue_type }));

    if !request.components.is_empty() {
        let components: Vec<Value> =
            request.components.iter().map(|name| json!({ "name": name })).collect();
        fields.insert("components".into(), Value::Array(components));
    }
    if let Some(assignee) = &request.assignee {
        fields.insert("assignee".into(), json!({ "name": assignee }));
    }
    if let Some(priority) = &request.priority {
        fields.insert("priority".into(), json!({ "name": priority }));
    }
    if let Some(sprint) = &request.sprint {
        let value = match sprint {
            SprintRef::Numeric(id) => json!(id),
            SprintRef::Opaque(id) => json!(id),
        };
        fields.insert(custom.sprint.clone(), value);
    }
    if let Some(epic) = &request.epic {
        fields.insert(custom.epic_link.clone(), json!(epic));
    }
    if let Some(release) = &request.release {
        fields.insert("fixVersions".into(), json!([{ "name": release }]));
    }
    if let Some(parent) = &request.parent {
        fields.insert("parent".into(), json!({ "key": parent }));
    }
    if let Some(points) = request.story_points {
        fields.insert(custom.story_points.clone(), json!(points));
    }
    if let Some(due) = request.due_date {
        fields.insert("duedate".into(), json!(due.format("%Y-%m-%d").to_string()));
    }
    if !request.labels.is_empty() {
        fields.insert("labels".into(), json!(request.labels));
    }

    Value::Object(fields)
}

fn issue_options(issues: Vec<Issue>) -> Vec<OptionItem> {
    issues
        .into_iter()
        .map(|issue| {
            let label = match issue.fields.summary {
                Some(summary) => format!("{}: {summary}", issue.key),
                None => issue.key.clone(),
            };
            OptionItem::new(label, issue.key)
        })
        .collect()
}

fn user_options(users: Vec<JiraUser>) -> Vec<OptionItem> {
    users
        .into_iter()
        .filter_map(|user| {
            let id = user.name.or(user.account_id)?;
            let label = user.display_name.unwrap_or_else(|| id.clone());
            Some(OptionItem::new(label, id))
        })
        .collect()
}

#[async_trait]
impl OptionSource for JiraClient {
    async fn list_projects(&self) -> Result<Vec<OptionItem>, TrackerError> {
        let projects: Vec<Project> = self.get("/rest/api/2/project", &[]).await?;
        Ok(projects.into_iter().map(|project| OptionItem::new(project.name, project.key)).collect())
    }

    async fn list_components(&self, project: &str) -> Result<Vec<OptionItem>, TrackerError> {
        let components: Vec<Named> =
            self.get(&format!("/rest/api/2/project/{project}/components"), &[]).await?;
        Ok(components.into_iter().map(|component| OptionItem::plain(component.name)).collect())
    }

    async fn list_assignees(&self, project: &str) -> Result<Vec<OptionItem>, TrackerError> {
        let users: Vec<JiraUser> = self
            .get(
                "/rest/api/2/user/assignable/search",
                &[("project", project.to_owned()), ("maxResults", MAX_RESULTS.to_string())],
            )
            .await?;
        Ok(user_options(users))
    }

    async fn board_for_project(&self, project: &str) -> Result<Option<u64>, TrackerError> {
        let boards: Page<Board> = self
            .get("/rest/agile/1.0/board", &[("projectKeyOrId", project.to_owned())])
            .await?;
        Ok(boards.values.first().map(|board| board.id))
    }

    async fn list_sprints(&self, board_id: u64) -> Result<Vec<OptionItem>, TrackerError> {
        let sprints: Page<Sprint> = self
            .get(
                &format!("/rest/agile/1.0/board/{board_id}/sprint"),
                &[("state", "active,future".to_owned())],
            )
            .await?;
        Ok(sprints
            .values
            .into_iter()
            .filter(|sprint| matches!(sprint.state.as_str(), "active" | "future"))
            .map(|sprint| OptionItem::new(sprint.name, sprint.id.to_string()))
            .collect())
    }

    async fn list_epics(&self, project: &str) -> Result<Vec<OptionItem>, TrackerError> {
        let jql = format!("project = {} AND issuetype = Epic AND {OPEN_STATUSES}", quoted(project));
        Ok(issue_options(self.search(jql, "summary").await?))
    }

    async fn list_versions(&self, project: &str) -> Result<Vec<OptionItem>, TrackerError> {
        let versions: Vec<Version> =
            self.get(&format!("/rest/api/2/project/{project}/versions"), &[]).await?;
        Ok(versions
            .into_iter()
            .filter(|version| !version.released && !version.archived)
            .map(|version| OptionItem::plain(version.name))
            .collect())
    }

    async fn list_priorities(&self) -> Result<Vec<OptionItem>, TrackerError> {
        let priorities: Vec<Named> = self.get("/rest/api/2/priority", &[]).await?;
        Ok(priorities.into_iter().map(|priority| OptionItem::plain(priority.name)).collect())
    }

    /// Labels already used in the project, sorted and de-duplicated.
    async fn list_labels(&self, project: &str) -> Result<Vec<OptionItem>, TrackerError> {
        let jql = format!("project = {} AND labels is not EMPTY", quoted(project));
        let mut labels: Vec<String> = self
            .search(jql, "labels")
            .await?
            .into_iter()
            .flat_map(|issue| issue.fields.labels)
            .collect();
        labels.sort();
        labels.dedup();
        Ok(labels.into_iter().map(OptionItem::plain).collect())
    }

    async fn list_issue_types(&self, project: &str) -> Result<Vec<OptionItem>, TrackerError> {
        let detail: ProjectDetail = self.get(&format!("/rest/api/2/project/{project}"), &[]).await?;
        Ok(detail.issue_types.into_iter().map(|kind| OptionItem::plain(kind.name)).collect())
    }

    async fn list_stories(
        &self,
        project: &str,
        epic: Option<&str>,
    ) -> Result<Vec<OptionItem>, TrackerError> {
        let mut jql = format!("project = {} AND issuetype = Story AND {OPEN_STATUSES}", quoted(project));
        if let Some(epic) = epic {
            jql.push_str(&format!(" AND \"Epic Link\" = {}", quoted(epic)));
        }
        Ok(issue_options(self.search(jql, "summary").await?))
    }

    async fn search_users(&self, query: &str) -> Result<Vec<OptionItem>, TrackerError> {
        let users: Vec<JiraUser> = self
            .get(
                "/rest/api/2/user/search",
                &[("username", query.to_owned()), ("maxResults", "50".to_owned())],
            )
            .await?;
        Ok(user_options(users))
    }

    async fn create_issue(&self, request: &IssueRequest) -> Result<IssueRef, TrackerError> {
        let body = json!({ "fields": issue_fields(request, &self.fields) });
        let url = format!("{}/rest/api/2/issue", self.base_url);
        let response = self.authorized(self.http.post(url)).json(&body).send().await;
        let created: CreatedIssue = decode("create issue", response).await?;

        // The issue exists at this point; attachment failures must not turn into a retry.
        self.upload_attachments(&created.key, request).await;

        Ok(IssueRef { url: self.browse_url(&created.key), key: created.key })
    }
}
