//! Hosted forge-API backend.
//!
//! Talks to a forge-style REST issue API over HTTPS. Rate limits (429) and
//! server errors are retried with bounded backoff and surfaced as transient;
//! 401/403 abort the batch as authentication failures.
//!
//! Field coverage: everything except `due_date`. The forge API has no
//! per-record due date, so that field is skipped during merge rather than
//! read as a deletion.

use chrono::{DateTime, Utc};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

use super::{with_backoff, RemoteBackend, RemoteRecord};
use crate::config::WorkspaceConfig;
use crate::error::SyncError;
use crate::record::{Field, Record, RecordKind, TrackedFields};
use crate::report::SyncReport;

const SUPPORTED_FIELDS: [Field; 7] = [
    Field::Title,
    Field::Status,
    Field::Assignee,
    Field::Priority,
    Field::Labels,
    Field::Content,
    Field::Milestone,
];

const PAGE_SIZE: usize = 100;
const RETRY_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone)]
pub struct ForgeConfig {
    /// Base URL of the forge, e.g. `https://forge.example.com`.
    pub base_url: String,
    /// Project the records belong to, e.g. `team/tracker`.
    pub project: String,
    /// Bearer token, already resolved from the environment. `None` for
    /// anonymous read-only access.
    pub token: Option<String>,
}

impl ForgeConfig {
    /// Build a forge config from the workspace settings, resolving the token
    /// from the environment variable the config names.
    pub fn from_workspace(config: &WorkspaceConfig) -> Result<Self, SyncError> {
        let base_url = config
            .remote
            .url
            .clone()
            .ok_or_else(|| SyncError::Remote("forge backend requires remote.url".to_string()))?;
        let project = config.remote.project.clone().ok_or_else(|| {
            SyncError::Remote("forge backend requires remote.project".to_string())
        })?;

        let token = match &config.remote.token_env {
            Some(var) => match std::env::var(var) {
                Ok(token) if !token.is_empty() => Some(token),
                _ => {
                    return Err(SyncError::BackendAuth(format!(
                        "token environment variable '{var}' is not set"
                    )))
                }
            },
            None => None,
        };

        Ok(ForgeConfig {
            base_url: base_url.trim_end_matches('/').to_string(),
            project,
            token,
        })
    }
}

/// Wire representation of a record on the forge.
#[derive(Debug, Serialize, Deserialize)]
struct ForgeRecordDto {
    id: String,

    #[serde(default)]
    kind: RecordKind,

    #[serde(default)]
    title: String,

    #[serde(default)]
    status: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    assignee: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    priority: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    labels: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    milestone: Option<String>,

    #[serde(default)]
    body: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    updated_at: Option<DateTime<Utc>>,
}

impl ForgeRecordDto {
    fn into_remote_record(self) -> RemoteRecord {
        let fields = TrackedFields {
            title: self.title,
            status: self.status,
            assignee: self.assignee,
            priority: self.priority,
            labels: self.labels.into_iter().collect::<BTreeSet<_>>(),
            content: self.body,
            milestone: self.milestone,
            due_date: None,
        };
        RemoteRecord {
            id: self.id,
            kind: self.kind,
            fields,
            last_updated: self.updated_at,
        }
    }

    fn from_record(record: &Record) -> Self {
        ForgeRecordDto {
            id: record.id.clone(),
            kind: record.kind,
            title: record.fields.title.clone(),
            status: record.fields.status.clone(),
            assignee: record.fields.assignee.clone(),
            priority: record.fields.priority.clone(),
            labels: record.fields.labels.iter().cloned().collect(),
            milestone: record.fields.milestone.clone(),
            body: record.fields.content.clone(),
            updated_at: None,
        }
    }
}

pub struct ForgeBackend {
    config: ForgeConfig,
    client: Client,
}

impl ForgeBackend {
    pub fn new(config: ForgeConfig) -> Result<Self, SyncError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("issue-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SyncError::Remote(format!("failed to build HTTP client: {e}")))?;

        Ok(ForgeBackend { config, client })
    }

    fn records_url(&self) -> String {
        format!(
            "{}/api/projects/{}/records",
            self.config.base_url, self.config.project
        )
    }

    fn request(&self, builder: reqwest::blocking::RequestBuilder) -> reqwest::blocking::RequestBuilder {
        match &self.config.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Map an HTTP status to the error taxonomy.
    fn status_error(status: StatusCode, context: &str) -> SyncError {
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            SyncError::BackendAuth(format!("{context}: HTTP {status}"))
        } else if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            SyncError::TransientRemote(format!("{context}: HTTP {status}"))
        } else {
            SyncError::Remote(format!("{context}: HTTP {status}"))
        }
    }

    fn transport_error(e: reqwest::Error, context: &str) -> SyncError {
        // Connection/timeout trouble is worth retrying.
        SyncError::TransientRemote(format!("{context}: {e}"))
    }

    fn fetch_page(&self, page: usize) -> Result<Vec<ForgeRecordDto>, SyncError> {
        let url = format!("{}?page={page}&per_page={PAGE_SIZE}", self.records_url());
        let response = self
            .request(self.client.get(&url))
            .send()
            .map_err(|e| Self::transport_error(e, "fetch records"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::status_error(status, "fetch records"));
        }

        response
            .json::<Vec<ForgeRecordDto>>()
            .map_err(|e| SyncError::Remote(format!("malformed records response: {e}")))
    }
}

impl RemoteBackend for ForgeBackend {
    fn name(&self) -> &'static str {
        "forge"
    }

    fn authenticate(&self) -> Result<(), SyncError> {
        let url = format!("{}/api/user", self.config.base_url);
        let response = self
            .request(self.client.get(&url))
            .send()
            .map_err(|e| Self::transport_error(e, "authenticate"))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(Self::status_error(status, "authenticate"))
        }
    }

    fn fetch_all(&self) -> Result<Vec<RemoteRecord>, SyncError> {
        let mut records = Vec::new();
        let mut page = 1;

        loop {
            let batch = with_backoff("fetch page", RETRY_ATTEMPTS, || self.fetch_page(page))?;
            let received = batch.len();
            records.extend(batch.into_iter().map(ForgeRecordDto::into_remote_record));

            if received < PAGE_SIZE {
                break;
            }
            page += 1;
        }

        log::debug!("fetched {} records from {}", records.len(), self.records_url());
        Ok(records)
    }

    fn push(&self, record: &Record) -> Result<(), SyncError> {
        let url = format!("{}/{}", self.records_url(), record.id);
        let dto = ForgeRecordDto::from_record(record);

        with_backoff("push record", RETRY_ATTEMPTS, || {
            let response = self
                .request(self.client.put(&url).json(&dto))
                .send()
                .map_err(|e| Self::transport_error(e, "push record"))?;

            let status = response.status();
            if status.is_success() {
                Ok(())
            } else {
                Err(Self::status_error(status, "push record"))
            }
        })
    }

    fn pull(&self) -> Result<SyncReport, SyncError> {
        let records = self.fetch_all()?;
        let mut report = SyncReport::new();
        for record in &records {
            report.record_success(&record.id);
        }
        Ok(report)
    }

    fn supported_fields(&self) -> &[Field] {
        &SUPPORTED_FIELDS
    }
}
