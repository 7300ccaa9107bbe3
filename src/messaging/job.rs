//! # Report Job Message
//!
//! The unit of work carried by the report queue. Field names on the wire are fixed
//! camelCase (`jobId`, `reportId`, ...) so producers written in other languages can
//! share the queue.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Output document format requested for a report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    Pdf,
    Word,
    Excel,
    Powerpoint,
}

impl ReportFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Pdf => "application/pdf",
            Self::Word => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
            Self::Excel => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            Self::Powerpoint => {
                "application/vnd.openxmlformats-officedocument.presentationml.presentation"
            }
        }
    }

    pub fn file_extension(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Word => "docx",
            Self::Excel => "xlsx",
            Self::Powerpoint => "pptx",
        }
    }
}

impl std::fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Pdf => "pdf",
            Self::Word => "word",
            Self::Excel => "excel",
            Self::Powerpoint => "powerpoint",
        };
        f.write_str(name)
    }
}

/// A report rendering job
///
/// `job_id` always equals `report_id`: one job per report record. `retry_count`
/// grows by one each time the job is moved from the dead-letter queue back to the
/// work queue and is never reset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobMessage {
    pub job_id: String,
    pub report_id: String,
    pub analysis_id: String,
    pub project_id: String,
    pub format: ReportFormat,
    pub template: String,
    pub name: String,
    /// Optional report sections; interpreted only by the rendering pipeline
    #[serde(default)]
    pub parameters: HashMap<String, serde_json::Value>,
    pub requested_by_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub retry_count: u32,
    /// Higher is served first
    #[serde(default)]
    pub priority: u8,
}

/// Inputs for [`JobMessage::create`]
#[derive(Debug, Clone)]
pub struct CreateJobParams {
    pub report_id: String,
    pub analysis_id: String,
    pub project_id: String,
    pub format: ReportFormat,
    pub template: String,
    pub name: String,
    pub parameters: Option<HashMap<String, serde_json::Value>>,
    pub requested_by_id: String,
    pub priority: Option<u8>,
}

impl JobMessage {
    /// Build a fresh job for a report record
    pub fn create(params: CreateJobParams) -> Self {
        Self {
            job_id: params.report_id.clone(),
            report_id: params.report_id,
            analysis_id: params.analysis_id,
            project_id: params.project_id,
            format: params.format,
            template: params.template,
            name: params.name,
            parameters: params.parameters.unwrap_or_default(),
            requested_by_id: params.requested_by_id,
            created_at: Utc::now(),
            retry_count: 0,
            priority: params.priority.unwrap_or(0),
        }
    }

    /// Copy of this job for one more pass through the work queue
    pub fn next_retry(&self) -> Self {
        Self {
            retry_count: self.retry_count.saturating_add(1),
            ..self.clone()
        }
    }

    /// Read a rendering parameter as a concrete type
    ///
    /// Returns `None` when the key is absent or holds a value of another shape.
    pub fn parameter<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.parameters
            .get(key)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }
}

/// Build a job message from request parameters
pub fn create_job_message(params: CreateJobParams) -> JobMessage {
    JobMessage::create(params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params() -> CreateJobParams {
        CreateJobParams {
            report_id: "rep-42".to_string(),
            analysis_id: "ana-7".to_string(),
            project_id: "prj-1".to_string(),
            format: ReportFormat::Pdf,
            template: "hazop-standard".to_string(),
            name: "Q3 HazOp Review".to_string(),
            parameters: None,
            requested_by_id: "user-9".to_string(),
            priority: None,
        }
    }

    #[test]
    fn test_create_sets_identity_and_defaults() {
        let before = Utc::now();
        let job = JobMessage::create(params());

        assert_eq!(job.job_id, "rep-42");
        assert_eq!(job.job_id, job.report_id);
        assert_eq!(job.retry_count, 0);
        assert_eq!(job.priority, 0);
        assert!(job.parameters.is_empty());
        assert!(job.created_at >= before);
    }

    #[test]
    fn test_created_at_serializes_as_iso8601() {
        let job = create_job_message(params());
        let value = serde_json::to_value(&job).unwrap();
        let created_at = value["createdAt"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(created_at).is_ok());
    }

    #[test]
    fn test_wire_field_names() {
        let mut p = params();
        p.priority = Some(5);
        let value = serde_json::to_value(JobMessage::create(p)).unwrap();
        let object = value.as_object().unwrap();

        for field in [
            "jobId",
            "reportId",
            "analysisId",
            "projectId",
            "format",
            "template",
            "name",
            "parameters",
            "requestedById",
            "createdAt",
            "retryCount",
            "priority",
        ] {
            assert!(object.contains_key(field), "missing {field}");
        }
        assert_eq!(object.len(), 12);
        assert_eq!(value["format"], "pdf");
        assert_eq!(value["priority"], 5);
    }

    #[test]
    fn test_next_retry_only_touches_retry_count() {
        let job = JobMessage::create(params());
        let retried = job.next_retry().next_retry();
        assert_eq!(retried.retry_count, 2);
        assert_eq!(
            JobMessage {
                retry_count: 0,
                ..retried
            },
            job
        );
    }

    #[test]
    fn test_typed_parameter_access() {
        let mut p = params();
        p.parameters = Some(HashMap::from([
            ("includeRiskMatrix".to_string(), json!(true)),
            ("sections".to_string(), json!(["summary", "nodes"])),
        ]));
        let job = JobMessage::create(p);

        assert_eq!(job.parameter::<bool>("includeRiskMatrix"), Some(true));
        assert_eq!(
            job.parameter::<Vec<String>>("sections"),
            Some(vec!["summary".to_string(), "nodes".to_string()])
        );
        assert_eq!(job.parameter::<u32>("includeRiskMatrix"), None);
        assert_eq!(job.parameter::<bool>("missing"), None);
    }

    #[test]
    fn test_format_metadata() {
        assert_eq!(ReportFormat::Excel.file_extension(), "xlsx");
        assert_eq!(ReportFormat::Pdf.content_type(), "application/pdf");
        assert_eq!(ReportFormat::Powerpoint.to_string(), "powerpoint");
    }
}
