use std::collections::HashMap;

use report_queue::{create_job_message, CreateJobParams, JobMessage, ReportFormat};

/// Fluent builder for report jobs used across the integration suites
#[derive(Debug, Clone)]
pub struct JobBuilder {
    params: CreateJobParams,
}

impl JobBuilder {
    pub fn new(report_id: &str) -> Self {
        Self {
            params: CreateJobParams {
                report_id: report_id.to_string(),
                analysis_id: "analysis-1".to_string(),
                project_id: "project-1".to_string(),
                format: ReportFormat::Pdf,
                template: "standard".to_string(),
                name: format!("Report {report_id}"),
                parameters: None,
                requested_by_id: "user-1".to_string(),
                priority: None,
            },
        }
    }

    pub fn format(mut self, format: ReportFormat) -> Self {
        self.params.format = format;
        self
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.params.priority = Some(priority);
        self
    }

    pub fn parameter(mut self, key: &str, value: serde_json::Value) -> Self {
        self.params
            .parameters
            .get_or_insert_with(HashMap::new)
            .insert(key.to_string(), value);
        self
    }

    pub fn build(self) -> JobMessage {
        create_job_message(self.params)
    }
}

pub fn sample_job(report_id: &str) -> JobMessage {
    JobBuilder::new(report_id).build()
}
