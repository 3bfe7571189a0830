//! Durable job records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::generation::prompt::PromptContext;
use crate::generation::types::Purpose;

// ═══════════════════════════════════════════
// Status
// ═══════════════════════════════════════════

/// Job lifecycle. Strictly forward: queued → processing → done | error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Done,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Done => "done",
            Self::Error => "error",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "processing" => Some(Self::Processing),
            "done" => Some(Self::Done),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }

    /// Whether a write may move a record from `self` to `next`.
    ///
    /// Re-writing the same non-terminal status is allowed (chunk and
    /// metadata updates while processing). Terminal records never change.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match (self, next) {
            (Self::Queued, Self::Queued) => true,
            (Self::Queued, Self::Processing) => true,
            (Self::Processing, Self::Processing) => true,
            (Self::Processing, Self::Done) => true,
            (Self::Processing, Self::Error) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ═══════════════════════════════════════════
// Type and input
// ═══════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Topics,
    Draft,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Topics => "topics",
            Self::Draft => "draft",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "topics" => Some(Self::Topics),
            "draft" => Some(Self::Draft),
            _ => None,
        }
    }

    pub fn purpose(&self) -> Purpose {
        match self {
            Self::Topics => Purpose::TopicIdeas,
            Self::Draft => Purpose::ContentDraft,
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Generation parameters captured when the job is queued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobInput {
    Topics {
        count: u32,
        subject: String,
        #[serde(default)]
        keywords: Vec<String>,
        #[serde(default)]
        audience: Option<String>,
    },
    Draft {
        title: String,
        #[serde(default)]
        brief: Option<String>,
        #[serde(default)]
        tone: Option<String>,
        #[serde(default)]
        keywords: Vec<String>,
    },
}

impl JobInput {
    pub fn job_type(&self) -> JobType {
        match self {
            Self::Topics { .. } => JobType::Topics,
            Self::Draft { .. } => JobType::Draft,
        }
    }

    pub fn prompt_context(&self) -> PromptContext {
        match self {
            Self::Topics {
                count,
                subject,
                keywords,
                audience,
            } => PromptContext {
                topic_count: Some(*count),
                subject: Some(subject.clone()),
                keywords: keywords.clone(),
                audience: audience.clone(),
                ..Default::default()
            },
            Self::Draft {
                title,
                brief,
                tone,
                keywords,
            } => PromptContext {
                title: Some(title.clone()),
                brief: brief.clone(),
                tone: tone.clone(),
                keywords: keywords.clone(),
                ..Default::default()
            },
        }
    }
}

// ═══════════════════════════════════════════
// Record
// ═══════════════════════════════════════════

/// One durable unit of generation work, as returned by polling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub job_id: String,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub status: JobStatus,
    /// Append-only partial text units, in order.
    pub chunks: Vec<String>,
    pub result_content_id: Option<String>,
    /// Frozen audit metadata, set once the job is terminal.
    pub generation_metadata: Option<serde_json::Value>,
    pub error: Option<String>,
    pub input: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// New queued record with a fresh id.
    pub fn queued(input: &JobInput) -> Self {
        let now = Utc::now();
        Self {
            job_id: uuid::Uuid::new_v4().to_string(),
            job_type: input.job_type(),
            status: JobStatus::Queued,
            chunks: Vec::new(),
            result_content_id: None,
            generation_metadata: None,
            error: None,
            input: serde_json::to_value(input).unwrap_or(serde_json::Value::Null),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn parsed_input(&self) -> Result<JobInput, serde_json::Error> {
        serde_json::from_value(self.input.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_moves_forward_only() {
        use JobStatus::*;
        assert!(Queued.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Done));
        assert!(Processing.can_transition_to(Error));
        assert!(Processing.can_transition_to(Processing));

        assert!(!Processing.can_transition_to(Queued));
        assert!(!Done.can_transition_to(Processing));
        assert!(!Done.can_transition_to(Done));
        assert!(!Error.can_transition_to(Done));
        assert!(!Queued.can_transition_to(Done));
    }

    #[test]
    fn terminal_statuses() {
        assert!(JobStatus::Done.is_terminal());
        assert!(JobStatus::Error.is_terminal());
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
    }

    #[test]
    fn status_round_trips_through_str() {
        for s in ["queued", "processing", "done", "error"] {
            assert_eq!(JobStatus::from_str(s).unwrap().as_str(), s);
        }
        assert_eq!(JobStatus::from_str("paused"), None);
    }

    #[test]
    fn job_type_maps_to_purpose() {
        assert_eq!(JobType::Topics.purpose(), Purpose::TopicIdeas);
        assert_eq!(JobType::Draft.purpose(), Purpose::ContentDraft);
    }

    #[test]
    fn queued_record_carries_input() {
        let input = JobInput::Draft {
            title: "Bid bonds".into(),
            brief: None,
            tone: Some("plain".into()),
            keywords: vec![],
        };
        let record = JobRecord::queued(&input);
        assert_eq!(record.status, JobStatus::Queued);
        assert_eq!(record.job_type, JobType::Draft);
        assert_eq!(record.parsed_input().unwrap(), input);
        assert_eq!(record.input["kind"], "draft");
    }

    #[test]
    fn record_serializes_type_field() {
        let record = JobRecord::queued(&JobInput::Topics {
            count: 5,
            subject: "tenders".into(),
            keywords: vec![],
            audience: None,
        });
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["type"], "topics");
        assert_eq!(json["status"], "queued");
        assert!(json["jobId"].is_string());
        assert!(json["resultContentId"].is_null());
    }

    #[test]
    fn prompt_context_from_topics_input() {
        let input = JobInput::Topics {
            count: 4,
            subject: "frameworks".into(),
            keywords: vec!["lots".into()],
            audience: Some("suppliers".into()),
        };
        let ctx = input.prompt_context();
        assert_eq!(ctx.topic_count, Some(4));
        assert_eq!(ctx.audience.as_deref(), Some("suppliers"));
    }
}
