//! Result shapes shared by shard responses and proxy responses
//!
//! These serialize to and from the InfluxDB 1.x `/query` JSON body.

use crate::model::Tags;
use serde::{Deserialize, Serialize};

/// Top-level `/query` response body
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    #[serde(default)]
    pub results: Vec<StatementResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of one statement, or one chunk of it while streaming
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatementResult {
    #[serde(default)]
    pub statement_id: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub series: Vec<Row>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatementResult {
    pub fn empty(statement_id: usize) -> Self {
        Self {
            statement_id,
            ..Default::default()
        }
    }

    pub fn with_series(statement_id: usize, series: Vec<Row>) -> Self {
        Self {
            statement_id,
            series,
            ..Default::default()
        }
    }

    pub fn error(statement_id: usize, error: impl ToString) -> Self {
        Self {
            statement_id,
            error: Some(error.to_string()),
            ..Default::default()
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Named, tagged table of rows. The first column is always `time`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Row {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Tags::is_empty")]
    pub tags: Tags,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<Vec<serde_json::Value>>,
    /// More rows of this series follow in a later chunk
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub partial: bool,
}

impl Row {
    /// Same measurement and tag set
    pub fn same_series(&self, other: &Row) -> bool {
        self.name == other.name && self.tags == other.tags
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub level: String,
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_influx_response() {
        let body = json!({
            "results": [{
                "statement_id": 0,
                "series": [{
                    "name": "cpu",
                    "tags": {"host": "a"},
                    "columns": ["time", "value"],
                    "values": [[1, 0.5]]
                }]
            }]
        });

        let resp: QueryResponse = serde_json::from_value(body).unwrap();
        let row = &resp.results[0].series[0];
        assert_eq!(row.name, "cpu");
        assert_eq!(row.tags.get("host").map(String::as_str), Some("a"));
        assert!(!row.partial);
    }

    #[test]
    fn omits_empty_members() {
        let encoded = serde_json::to_value(StatementResult::empty(3)).unwrap();
        assert_eq!(encoded, json!({"statement_id": 3}));

        let encoded = serde_json::to_value(StatementResult::error(1, "boom")).unwrap();
        assert_eq!(encoded, json!({"statement_id": 1, "error": "boom"}));
    }
}
