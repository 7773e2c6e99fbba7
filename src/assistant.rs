//! OpenAI Assistants (v2) client and the per-user thread/run flow.
//!
//! Each Telegram user owns at most one assistant thread. A question either
//! opens a new thread (create-and-run in a single call) or is appended to the
//! user's thread followed by a new run. The run is then polled until it leaves
//! the `queued`/`in_progress` states, and the newest thread message is the
//! answer.
//!
//! The HTTP surface sits behind [`AssistantApi`] so the flow can be driven by
//! an in-process fake in tests.

use std::time::Duration;

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::AssistantConfig;

lazy_static! {
    static ref CITATION_MARKER: Regex = Regex::new(r"【.*?†source】").unwrap();
}

#[derive(Debug, Error)]
pub enum AssistantError {
    #[error("assistant is not configured")]
    NotConfigured,
    #[error("rate limited by the assistant API")]
    RateLimited,
    #[error("assistant API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("assistant request failed: {0}")]
    Transport(String),
    #[error("assistant run ended with status {status}: {message}")]
    RunFailed { status: String, message: String },
    #[error("assistant run did not finish after {polls} polls")]
    Timeout { polls: u32 },
    #[error("assistant returned an empty answer")]
    EmptyResponse,
}

impl From<reqwest::Error> for AssistantError {
    fn from(err: reqwest::Error) -> Self {
        AssistantError::Transport(err.to_string())
    }
}

/// Lifecycle states of an assistant run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    RequiresAction,
    Cancelling,
    Cancelled,
    Failed,
    Completed,
    Incomplete,
    Expired,
    #[serde(other)]
    Unknown,
}

impl RunStatus {
    pub fn is_pending(self) -> bool {
        matches!(self, RunStatus::Queued | RunStatus::InProgress)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::InProgress => "in_progress",
            RunStatus::RequiresAction => "requires_action",
            RunStatus::Cancelling => "cancelling",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Failed => "failed",
            RunStatus::Completed => "completed",
            RunStatus::Incomplete => "incomplete",
            RunStatus::Expired => "expired",
            RunStatus::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunError {
    #[serde(default)]
    pub code: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub thread_id: String,
    pub status: RunStatus,
    #[serde(default)]
    pub last_error: Option<RunError>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssistantReply {
    pub thread_id: String,
    pub text: String,
}

/// How long to wait for a run
#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    pub interval: Duration,
    pub max_polls: u32,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_polls: 90,
        }
    }
}

#[async_trait]
pub trait AssistantApi: Send + Sync {
    /// Open a thread seeded with `content` and start a run on it
    async fn create_thread_and_run(&self, content: &str) -> Result<Run, AssistantError>;
    async fn add_message(&self, thread_id: &str, content: &str) -> Result<(), AssistantError>;
    async fn create_run(&self, thread_id: &str) -> Result<Run, AssistantError>;
    async fn retrieve_run(&self, thread_id: &str, run_id: &str) -> Result<Run, AssistantError>;
    /// Text of the newest message in the thread
    async fn latest_message(&self, thread_id: &str) -> Result<Option<String>, AssistantError>;
    /// Upload a knowledge file, returning its file id
    async fn upload_file(&self, file_name: &str, bytes: Vec<u8>) -> Result<String, AssistantError>;
    async fn add_file_to_vector_store(&self, vector_store_id: &str, file_id: &str) -> Result<(), AssistantError>;
}

/// Start a run for `query`, on the user's thread when there is one.
///
/// The returned run carries the thread id, which callers persist before
/// waiting so a later failure does not lose the conversation.
pub async fn start_run<A>(api: &A, thread_id: Option<&str>, query: &str) -> Result<Run, AssistantError>
where
    A: AssistantApi + ?Sized,
{
    match thread_id {
        None => {
            let run = api.create_thread_and_run(query).await?;
            info!(thread_id = %run.thread_id, run_id = %run.id, "Opened new assistant thread");
            Ok(run)
        }
        Some(thread_id) => {
            api.add_message(thread_id, query).await?;
            let run = api.create_run(thread_id).await?;
            debug!(thread_id, run_id = %run.id, "Started run on existing thread");
            Ok(run)
        }
    }
}

/// Poll `run` until it settles and return the cleaned answer text
pub async fn wait_for_answer<A>(api: &A, mut run: Run, poll: PollSettings) -> Result<String, AssistantError>
where
    A: AssistantApi + ?Sized,
{
    let mut polls = 0;
    while run.status.is_pending() {
        if polls >= poll.max_polls {
            warn!(thread_id = %run.thread_id, run_id = %run.id, polls, "Assistant run timed out");
            return Err(AssistantError::Timeout { polls });
        }
        tokio::time::sleep(poll.interval).await;
        run = api.retrieve_run(&run.thread_id, &run.id).await?;
        polls += 1;
    }

    if run.status != RunStatus::Completed {
        let message = run
            .last_error
            .map(|e| e.message)
            .unwrap_or_else(|| "unknown error".to_string());
        error!(thread_id = %run.thread_id, status = run.status.as_str(), error = %message, "Assistant run did not complete");
        return Err(AssistantError::RunFailed {
            status: run.status.as_str().to_string(),
            message,
        });
    }

    let text = api
        .latest_message(&run.thread_id)
        .await?
        .map(|t| clean_citations(&t))
        .filter(|t| !t.is_empty())
        .ok_or(AssistantError::EmptyResponse)?;

    debug!(thread_id = %run.thread_id, polls, chars = text.len(), "Assistant run completed");
    Ok(text)
}

/// Start a run and wait for it in one go
pub async fn ask<A>(
    api: &A,
    thread_id: Option<&str>,
    query: &str,
    poll: PollSettings,
) -> Result<AssistantReply, AssistantError>
where
    A: AssistantApi + ?Sized,
{
    let run = start_run(api, thread_id, query).await?;
    let thread_id = run.thread_id.clone();
    let text = wait_for_answer(api, run, poll).await?;
    Ok(AssistantReply { thread_id, text })
}

/// Remove file-search citation markers such as `【4:0†source】`
pub fn clean_citations(text: &str) -> String {
    CITATION_MARKER.replace_all(text, "").trim().to_string()
}

// ── HTTP client ──────────────────────────────────────────────────────────────

/// Assistants API over HTTPS
#[derive(Debug, Clone)]
pub struct OpenAiAssistant {
    client: Client,
    api_base: String,
    api_key: Option<String>,
    assistant_id: Option<String>,
}

impl OpenAiAssistant {
    pub fn new(config: &AssistantConfig) -> Result<Self, AssistantError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;

        Ok(Self {
            client,
            api_base: config.api_base.clone(),
            api_key: config.api_key.clone(),
            assistant_id: config.assistant_id.clone(),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some() && self.assistant_id.is_some()
    }

    fn assistant_id(&self) -> Result<&str, AssistantError> {
        self.assistant_id.as_deref().ok_or(AssistantError::NotConfigured)
    }

    fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder, AssistantError> {
        let key = self.api_key.as_deref().ok_or(AssistantError::NotConfigured)?;
        Ok(request.bearer_auth(key).header("OpenAI-Beta", "assistants=v2"))
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path)
    }
}

#[derive(Debug, Serialize)]
struct ThreadMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct NewThread<'a> {
    messages: Vec<ThreadMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct CreateThreadAndRun<'a> {
    assistant_id: &'a str,
    thread: NewThread<'a>,
}

#[derive(Debug, Serialize)]
struct CreateRun<'a> {
    assistant_id: &'a str,
}

#[derive(Debug, Serialize)]
struct AttachFile<'a> {
    file_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessageList {
    data: Vec<MessageObject>,
}

#[derive(Debug, Deserialize)]
struct MessageObject {
    #[serde(default)]
    content: Vec<MessageContent>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum MessageContent {
    Text { text: TextContent },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct TextContent {
    value: String,
}

#[derive(Debug, Deserialize)]
struct FileObject {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

async fn check_status(response: Response) -> Result<Response, AssistantError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(AssistantError::RateLimited);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ApiErrorBody>(&body)
        .map(|b| b.error.message)
        .unwrap_or(body);
    Err(AssistantError::Api {
        status: status.as_u16(),
        message,
    })
}

fn first_text(list: MessageList) -> Option<String> {
    list.data.into_iter().next().and_then(|message| {
        message.content.into_iter().find_map(|content| match content {
            MessageContent::Text { text } => Some(text.value),
            MessageContent::Other => None,
        })
    })
}

#[async_trait]
impl AssistantApi for OpenAiAssistant {
    async fn create_thread_and_run(&self, content: &str) -> Result<Run, AssistantError> {
        let body = CreateThreadAndRun {
            assistant_id: self.assistant_id()?,
            thread: NewThread {
                messages: vec![ThreadMessage { role: "user", content }],
            },
        };
        let request = self.authorized(self.client.post(self.url("threads/runs")))?;
        let response = check_status(request.json(&body).send().await?).await?;
        Ok(response.json::<Run>().await?)
    }

    async fn add_message(&self, thread_id: &str, content: &str) -> Result<(), AssistantError> {
        let body = ThreadMessage { role: "user", content };
        let request = self.authorized(self.client.post(self.url(&format!("threads/{thread_id}/messages"))))?;
        check_status(request.json(&body).send().await?).await?;
        Ok(())
    }

    async fn create_run(&self, thread_id: &str) -> Result<Run, AssistantError> {
        let body = CreateRun {
            assistant_id: self.assistant_id()?,
        };
        let request = self.authorized(self.client.post(self.url(&format!("threads/{thread_id}/runs"))))?;
        let response = check_status(request.json(&body).send().await?).await?;
        Ok(response.json::<Run>().await?)
    }

    async fn retrieve_run(&self, thread_id: &str, run_id: &str) -> Result<Run, AssistantError> {
        let request = self.authorized(self.client.get(self.url(&format!("threads/{thread_id}/runs/{run_id}"))))?;
        let response = check_status(request.send().await?).await?;
        Ok(response.json::<Run>().await?)
    }

    async fn latest_message(&self, thread_id: &str) -> Result<Option<String>, AssistantError> {
        let request = self
            .authorized(self.client.get(self.url(&format!("threads/{thread_id}/messages"))))?
            .query(&[("limit", "1"), ("order", "desc")]);
        let response = check_status(request.send().await?).await?;
        Ok(first_text(response.json::<MessageList>().await?))
    }

    async fn upload_file(&self, file_name: &str, bytes: Vec<u8>) -> Result<String, AssistantError> {
        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name.to_string());
        let form = reqwest::multipart::Form::new()
            .text("purpose", "assistants")
            .part("file", part);
        let request = self.authorized(self.client.post(self.url("files")))?;
        let response = check_status(request.multipart(form).send().await?).await?;
        let file = response.json::<FileObject>().await?;
        info!(file_id = %file.id, file_name, "Uploaded knowledge file");
        Ok(file.id)
    }

    async fn add_file_to_vector_store(&self, vector_store_id: &str, file_id: &str) -> Result<(), AssistantError> {
        let request = self.authorized(
            self.client
                .post(self.url(&format!("vector_stores/{vector_store_id}/files"))),
        )?;
        check_status(request.json(&AttachFile { file_id }).send().await?).await?;
        info!(vector_store_id, file_id, "Attached file to vector store");
        Ok(())
    }
}
