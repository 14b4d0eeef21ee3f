//! Per-attempt request metrics

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of dispatched request
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum RequestKind {
    Post,
    Get,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Post => "POST",
            Self::Get => "GET",
        }
    }
}

/// One row per dispatch attempt, appended to a shared collection and read
/// only after all dispatch work completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestMetrics {
    pub start_time: DateTime<Utc>,
    pub request_kind: RequestKind,
    pub latency_ms: u64,
    pub response_code: u16,
}

impl RequestMetrics {
    pub fn new(
        start_time: DateTime<Utc>,
        request_kind: RequestKind,
        latency_ms: u64,
        response_code: u16,
    ) -> Self {
        Self {
            start_time,
            request_kind,
            latency_ms,
            response_code,
        }
    }

    /// CSV row matching the `StartTime,RequestType,Latency,ResponseCode` header
    pub fn csv_row(&self) -> String {
        format!(
            "{},{},{},{}",
            self.start_time.timestamp_millis(),
            self.request_kind.as_str(),
            self.latency_ms,
            self.response_code
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csv_row() {
        let metric = RequestMetrics::new(
            DateTime::from_timestamp_millis(1_700_000_000_000).unwrap(),
            RequestKind::Post,
            12,
            201,
        );
        assert_eq!(metric.csv_row(), "1700000000000,POST,12,201");
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(RequestKind::Post.as_str(), "POST");
        assert_eq!(RequestKind::Get.as_str(), "GET");
    }
}
