//! Heartbeat and status reporting from Minion to Overlord.
//!
//! Delivery is best-effort: a failed send logs a warning and never blocks
//! or re-queues. `poll_answer` is the one place the Minion blocks on an
//! operator.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use tokio::task::JoinHandle;

/// Types of events reported to the Overlord.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Heartbeat,
    Progress,
    Complete,
    Error,
    Question,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Heartbeat => "heartbeat",
            Self::Progress => "progress",
            Self::Complete => "complete",
            Self::Error => "error",
            Self::Question => "question",
        }
    }
}

/// Default seconds between heartbeats.
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 60;
/// Default seconds to wait for a human answer.
pub const DEFAULT_ANSWER_TIMEOUT_SECS: u64 = 600;
/// Default seconds between answer polls.
pub const DEFAULT_ANSWER_POLL_INTERVAL_SECS: u64 = 15;

/// Handles communication with the Overlord.
pub struct Reporter {
    minion_id: String,
    issue_number: u64,
    callback_url: String,
    heartbeat_interval: Duration,
    http: reqwest::Client,
    current_status: Arc<Mutex<String>>,
    heartbeat_task: Option<JoinHandle<()>>,
}

impl Reporter {
    pub fn new(
        minion_id: impl Into<String>,
        issue_number: u64,
        callback_url: impl Into<String>,
    ) -> Self {
        Self {
            minion_id: minion_id.into(),
            issue_number,
            callback_url: callback_url.into(),
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_INTERVAL_SECS),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            current_status: Arc::new(Mutex::new("initializing".to_string())),
            heartbeat_task: None,
        }
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    fn payload(&self, event: EventType, message: &str, data: Value) -> Value {
        json!({
            "minion_id": self.minion_id,
            "event": event.as_str(),
            "issue": self.issue_number,
            "message": message,
            "data": data,
            "timestamp": Utc::now().to_rfc3339(),
        })
    }

    async fn send_payload(
        http: &reqwest::Client,
        callback_url: &str,
        payload: &Value,
    ) -> bool {
        match http.post(callback_url).json(payload).send().await {
            Ok(response) if response.status().is_success() => {
                tracing::debug!(event = %payload["event"], "Reported to Overlord");
                true
            }
            Ok(response) => {
                tracing::warn!(
                    status = %response.status(),
                    "Report failed"
                );
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to send report");
                false
            }
        }
    }

    async fn send(&self, event: EventType, message: &str, data: Value) -> bool {
        let payload = self.payload(event, message, data);
        Self::send_payload(&self.http, &self.callback_url, &payload).await
    }

    /// Start the background heartbeat task.
    pub fn start(&mut self) {
        if self.heartbeat_task.is_some() {
            return;
        }

        let http = self.http.clone();
        let callback_url = self.callback_url.clone();
        let minion_id = self.minion_id.clone();
        let issue_number = self.issue_number;
        let status = Arc::clone(&self.current_status);
        let interval = self.heartbeat_interval;

        self.heartbeat_task = Some(tokio::spawn(async move {
            loop {
                let message = status.lock().expect("status lock poisoned").clone();
                let payload = json!({
                    "minion_id": minion_id,
                    "event": "heartbeat",
                    "issue": issue_number,
                    "message": message,
                    "data": {},
                    "timestamp": Utc::now().to_rfc3339(),
                });
                Self::send_payload(&http, &callback_url, &payload).await;
                tokio::time::sleep(interval).await;
            }
        }));
        tracing::info!(
            interval_secs = self.heartbeat_interval.as_secs(),
            "Reporter started"
        );
    }

    /// Stop the heartbeat task.
    pub fn stop(&mut self) {
        if let Some(task) = self.heartbeat_task.take() {
            task.abort();
        }
        tracing::info!("Reporter stopped");
    }

    /// Update the status carried by subsequent heartbeats.
    pub fn update_status(&self, status: impl Into<String>) {
        *self.current_status.lock().expect("status lock poisoned") = status.into();
    }

    /// Send a one-shot heartbeat.
    pub async fn heartbeat(&self, message: &str) -> bool {
        self.send(EventType::Heartbeat, message, json!({})).await
    }

    /// Report progress on the task.
    pub async fn progress(&self, message: &str, data: Option<Value>) -> bool {
        self.update_status(message);
        self.send(EventType::Progress, message, data.unwrap_or_else(|| json!({})))
            .await
    }

    /// Report successful completion.
    pub async fn complete(
        &self,
        message: &str,
        pr_number: Option<u64>,
        pr_url: Option<&str>,
        branch: Option<&str>,
        review_summary: Option<&str>,
    ) -> bool {
        let mut data = serde_json::Map::new();
        if let Some(pr_number) = pr_number {
            data.insert("pr_number".to_string(), json!(pr_number));
        }
        if let Some(pr_url) = pr_url {
            data.insert("pr_url".to_string(), json!(pr_url));
        }
        if let Some(branch) = branch {
            data.insert("branch".to_string(), json!(branch));
        }
        if let Some(review_summary) = review_summary {
            data.insert("review_summary".to_string(), json!(review_summary));
        }
        self.send(EventType::Complete, message, Value::Object(data))
            .await
    }

    /// Report an error.
    pub async fn error(
        &self,
        message: &str,
        error_type: Option<&str>,
        details: Option<&str>,
    ) -> bool {
        let mut data = serde_json::Map::new();
        if let Some(error_type) = error_type {
            data.insert("error_type".to_string(), json!(error_type));
        }
        if let Some(details) = details {
            data.insert("details".to_string(), json!(details));
        }
        self.send(EventType::Error, message, Value::Object(data)).await
    }

    /// Send a question for human input.
    pub async fn question(
        &self,
        question_text: &str,
        blocker_type: &str,
        question_id: &str,
    ) -> bool {
        self.update_status("waiting for answer");
        self.send(
            EventType::Question,
            question_text,
            json!({
                "blocker_type": blocker_type,
                "question_id": question_id,
            }),
        )
        .await
    }

    /// Answer endpoint derived from the callback URL: the trailing path
    /// segment is replaced with `answer/{minion_id}`.
    fn answer_url(&self) -> String {
        let base = self
            .callback_url
            .rsplit_once('/')
            .map_or(self.callback_url.as_str(), |(base, _)| base);
        format!("{base}/answer/{}", self.minion_id)
    }

    /// Poll the Overlord for an answer to a pending question.
    ///
    /// Returns the answer text, or `None` when the timeout elapses.
    pub async fn poll_answer(
        &self,
        question_id: &str,
        timeout: Duration,
        interval: Duration,
    ) -> Option<String> {
        let answer_url = self.answer_url();
        let mut elapsed = Duration::ZERO;

        while elapsed < timeout {
            match self
                .http
                .get(&answer_url)
                .query(&[("question_id", question_id)])
                .send()
                .await
            {
                Ok(response) if response.status().is_success() => {
                    if let Ok(data) = response.json::<Value>().await {
                        if data["answered"].as_bool() == Some(true) {
                            tracing::info!(question_id, "Received answer");
                            return data["answer"].as_str().map(str::to_string);
                        }
                    }
                }
                Ok(_) | Err(_) => {
                    tracing::debug!(question_id, "Answer poll attempt failed");
                }
            }

            tokio::time::sleep(interval).await;
            elapsed += interval;
        }

        tracing::warn!(
            question_id,
            timeout_secs = timeout.as_secs(),
            "No answer received"
        );
        None
    }
}

impl Drop for Reporter {
    fn drop(&mut self) {
        if let Some(task) = self.heartbeat_task.take() {
            task.abort();
        }
    }
}
