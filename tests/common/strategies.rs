use std::collections::HashMap;

use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use report_queue::{JobMessage, ReportFormat};

/// Strategy for identifiers shaped like database keys
pub fn id_strategy() -> impl Strategy<Value = String> {
    "[a-z0-9][a-z0-9-]{0,35}"
}

pub fn format_strategy() -> impl Strategy<Value = ReportFormat> {
    prop_oneof![
        Just(ReportFormat::Pdf),
        Just(ReportFormat::Word),
        Just(ReportFormat::Excel),
        Just(ReportFormat::Powerpoint),
    ]
}

/// Strategy for arbitrary JSON parameter values, nested up to three levels
pub fn parameter_value_strategy() -> impl Strategy<Value = serde_json::Value> {
    let leaf = prop_oneof![
        Just(serde_json::Value::Null),
        any::<bool>().prop_map(serde_json::Value::from),
        any::<i64>().prop_map(serde_json::Value::from),
        any::<f64>()
            .prop_filter("JSON has no NaN or infinity", |f| f.is_finite())
            .prop_map(serde_json::Value::from),
        "[ -~]{0,32}".prop_map(serde_json::Value::from),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(serde_json::Value::Array),
            prop::collection::hash_map("[a-zA-Z_][a-zA-Z0-9_]{0,15}", inner, 0..4)
                .prop_map(|map| serde_json::Value::Object(map.into_iter().collect())),
        ]
    })
}

/// Strategy for rendering parameters
pub fn parameters_strategy() -> impl Strategy<Value = HashMap<String, serde_json::Value>> {
    prop::collection::hash_map(
        "[a-zA-Z_][a-zA-Z0-9_]{0,15}",
        parameter_value_strategy(),
        0..5,
    )
}

/// Strategy for complete job messages, including retried ones
pub fn job_message_strategy() -> impl Strategy<Value = JobMessage> {
    (
        id_strategy(),
        id_strategy(),
        id_strategy(),
        format_strategy(),
        "[a-z_]{1,20}",
        "[ -~]{0,64}",
        parameters_strategy(),
        id_strategy(),
        0i64..4_102_444_800,
        0u32..1000,
        0u8..=10,
    )
        .prop_map(
            |(
                report_id,
                analysis_id,
                project_id,
                format,
                template,
                name,
                parameters,
                requested_by_id,
                created_secs,
                retry_count,
                priority,
            )| JobMessage {
                job_id: report_id.clone(),
                report_id,
                analysis_id,
                project_id,
                format,
                template,
                name,
                parameters,
                requested_by_id,
                created_at: Utc
                    .timestamp_opt(created_secs, 0)
                    .single()
                    .unwrap_or_else(Utc::now),
                retry_count,
                priority,
            },
        )
}
