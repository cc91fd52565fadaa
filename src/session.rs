//! The bucket protocol between the dubbing UI and the processing backend.
//!
//! A session owns one folder in the bucket. The UI drops trigger objects
//! into it and the backend answers by writing (or deleting) well-known
//! objects next to them.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::object_store::{IfMatch, ObjectStore, ObjectStoreError, PutRequest};
use crate::poll::{PollError, PollPolicy, PollingFetcher};

pub const INPUT_VIDEO: &str = "input.mp4";
pub const CONFIG: &str = "config.json";
pub const UTTERANCES: &str = "utterances.json";
pub const VOICES: &str = "voices.json";
pub const UTTERANCES_PREVIEW: &str = "utterances_preview.json";
pub const UTTERANCES_APPROVED: &str = "utterances_approved.json";
pub const DUBBED_VIDEO: &str = "dubbed_video.mp4";

pub const DEFAULT_FOLDER_SEPARATOR: &str = "--";

const JSON: &str = "application/json";

/// One timed speech segment and its voice assignment.
///
/// The backend fills fields in stages: `utterances.json` is first written
/// before any speech is synthesized, so the synthesis outputs and the
/// provider-specific voice settings may be missing. Missing fields stay
/// missing when written back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Utterance {
    pub start: f64,
    pub end: f64,
    #[serde(default)]
    pub path: String,
    pub text: String,
    pub for_dubbing: bool,
    pub speaker_id: String,
    pub ssml_gender: String,
    #[serde(default)]
    pub translated_text: String,
    pub assigned_voice: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dubbed_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pitch: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_gain_db: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adjust_speed: Option<bool>,
    /// Fields the backend added that we do not model; written back untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Voice name to voice id, as published in `voices.json`.
pub type Voices = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Speaker {
    pub voice: String,
    pub gender: String,
}

/// Distinct speakers keyed by id. Later utterances win on conflict.
pub fn speakers(utterances: &[Utterance]) -> BTreeMap<String, Speaker> {
    utterances
        .iter()
        .map(|u| {
            (
                u.speaker_id.clone(),
                Speaker {
                    voice: u.assigned_voice.clone(),
                    gender: u.ssml_gender.clone(),
                },
            )
        })
        .collect()
}

/// Poll budgets for each step of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionPolicies {
    pub utterances: PollPolicy,
    pub voices: PollPolicy,
    pub preview: PollPolicy,
    pub dubbed_video: PollPolicy,
}

impl Default for SessionPolicies {
    fn default() -> Self {
        Self {
            utterances: PollPolicy::from_millis(15_000, 20),
            voices: PollPolicy::from_millis(15_000, 2),
            preview: PollPolicy::from_millis(15_000, 20),
            dubbed_video: PollPolicy::from_millis(15_000, 20),
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("unsupported content type {0:?}: only video and JSON uploads are allowed")]
    UnsupportedContentType(String),

    #[error("upload of {key} failed: {source}")]
    Upload {
        key: String,
        #[source]
        source: ObjectStoreError,
    },

    #[error("dubbing config must be a JSON object")]
    ConfigNotObject,

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Poll(#[from] PollError),
}

/// Utterances and voices produced by the backend for a new video.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub utterances: Vec<Utterance>,
    pub voices: Voices,
}

/// Builds a session folder name: `{video}{separator}{unix_millis}`.
pub fn folder_name(video_file_name: &str, separator: &str, unix_millis: u128) -> String {
    format!("{video_file_name}{separator}{unix_millis}")
}

fn check_content_type(content_type: &str) -> Result<(), SessionError> {
    if content_type.starts_with("video/") || content_type == JSON {
        Ok(())
    } else {
        Err(SessionError::UnsupportedContentType(content_type.to_string()))
    }
}

pub struct DubbingSession {
    fetcher: PollingFetcher,
    folder: String,
    policies: SessionPolicies,
}

impl DubbingSession {
    /// Starts a new session folder named after the video and the current time.
    pub fn start(fetcher: PollingFetcher, video_file_name: &str) -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        Self::resume(fetcher, folder_name(video_file_name, DEFAULT_FOLDER_SEPARATOR, millis))
    }

    /// Attaches to an existing session folder.
    pub fn resume(fetcher: PollingFetcher, folder: impl Into<String>) -> Self {
        Self {
            fetcher,
            folder: folder.into(),
            policies: SessionPolicies::default(),
        }
    }

    pub fn with_policies(mut self, policies: SessionPolicies) -> Self {
        self.policies = policies;
        self
    }

    pub fn folder(&self) -> &str {
        &self.folder
    }

    pub fn key(&self, name: &str) -> String {
        format!("{}/{}", self.folder, name)
    }

    async fn upload(&self, name: &str, body: Vec<u8>, content_type: &str) -> Result<String, SessionError> {
        check_content_type(content_type)?;
        let key = self.key(name);
        let request = PutRequest::new(key.clone(), body, content_type);
        let etag = self
            .fetcher
            .store()
            .put(&request, IfMatch::Any)
            .await
            .map_err(|source| SessionError::Upload { key: key.clone(), source })?;
        info!(%key, content_type, "uploaded");
        Ok(etag)
    }

    /// Uploads the video and its dubbing config, then waits for the backend
    /// to publish utterances and the voice catalogue.
    pub async fn submit(
        &self,
        video: Vec<u8>,
        video_content_type: &str,
        config: &serde_json::Value,
    ) -> Result<Submission, SessionError> {
        if !video_content_type.starts_with("video/") {
            return Err(SessionError::UnsupportedContentType(video_content_type.to_string()));
        }
        let mut config = config.as_object().cloned().ok_or(SessionError::ConfigNotObject)?;
        // The backend locates the video itself.
        config.remove("input_video");
        let config = serde_json::to_vec(&config)?;

        self.upload(INPUT_VIDEO, video, video_content_type).await?;
        self.upload(CONFIG, config, JSON).await?;

        let utterances: Vec<Utterance> = self
            .fetcher
            .fetch_json_when_present(&self.key(UTTERANCES), self.policies.utterances)
            .await?;
        let voices: Voices = self
            .fetcher
            .fetch_json_when_present(&self.key(VOICES), self.policies.voices)
            .await?;

        Ok(Submission { utterances, voices })
    }

    /// Sends edited utterances for re-translation. The backend deletes the
    /// preview object once it has rewritten `utterances.json`.
    pub async fn preview(&self, utterances: &[Utterance]) -> Result<Vec<Utterance>, SessionError> {
        self.upload(UTTERANCES_PREVIEW, serde_json::to_vec(utterances)?, JSON)
            .await?;
        self.fetcher
            .wait_until_absent(&self.key(UTTERANCES_PREVIEW), self.policies.preview)
            .await?;
        let refreshed = self
            .fetcher
            .fetch_json_when_present(&self.key(UTTERANCES), self.policies.utterances)
            .await?;
        Ok(refreshed)
    }

    /// Approves the final utterances and waits for the dubbed video.
    pub async fn approve(&self, utterances: &[Utterance]) -> Result<Vec<u8>, SessionError> {
        self.upload(UTTERANCES_APPROVED, serde_json::to_vec(utterances)?, JSON)
            .await?;
        let video = self
            .fetcher
            .fetch_when_present(&self.key(DUBBED_VIDEO), self.policies.dubbed_video)
            .await?;
        Ok(video)
    }
}
