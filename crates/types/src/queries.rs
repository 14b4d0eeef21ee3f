//! Read-query wire shapes
//!
//! Query requests and replies travel as tagged unions, one variant per
//! query kind, validated at the consumer boundary. Correlation metadata
//! (`correlation_id`, `reply_to`) travels as envelope properties, never in
//! these bodies.

use serde::{Deserialize, Serialize};

/// A read query published to the broker's query queue
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum QueryRequest {
    /// Total vertical for one skier on one day
    #[serde(rename = "GET_DAY_VERTICAL")]
    DayVertical {
        #[serde(rename = "skierID")]
        skier_id: u32,
        #[serde(rename = "resortID")]
        resort_id: u32,
        #[serde(rename = "seasonID")]
        season_id: u16,
        #[serde(rename = "dayID")]
        day_id: u16,
    },
    /// Per-season vertical totals for one skier at one resort
    #[serde(rename = "GET_RESORT_VERTICAL")]
    ResortVertical {
        #[serde(rename = "skierID")]
        skier_id: u32,
        resorts: Vec<u32>,
        seasons: Vec<u16>,
    },
    /// Distinct skiers at a resort on one day
    #[serde(rename = "GET_NUM_UNIQUE_SKIERS")]
    UniqueSkiers {
        #[serde(rename = "resortID")]
        resort_id: u32,
        #[serde(rename = "seasonID")]
        season_id: u16,
        #[serde(rename = "dayID")]
        day_id: u16,
    },
}

impl QueryRequest {
    /// Short name for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DayVertical { .. } => "day_vertical",
            Self::ResortVertical { .. } => "resort_vertical",
            Self::UniqueSkiers { .. } => "unique_skiers",
        }
    }

    /// Deterministic cache key derived from the full parameter set
    pub fn cache_key(&self) -> String {
        match self {
            Self::DayVertical {
                skier_id,
                resort_id,
                season_id,
                day_id,
            } => format!(
                "dayVertical:SKIER#{skier_id}#RESORT#{resort_id}#SEASON#{season_id}#DAY#{day_id}"
            ),
            Self::ResortVertical {
                skier_id,
                resorts,
                seasons,
            } => {
                let resorts = join_ids(resorts);
                let seasons = join_ids(seasons);
                format!("resortVertical:SKIER#{skier_id}#RESORTS#{resorts}#SEASONS#{seasons}")
            }
            Self::UniqueSkiers {
                resort_id,
                season_id,
                day_id,
            } => format!("uniqueSkiers:RESORT#{resort_id}#SEASON#{season_id}#DAY#{day_id}"),
        }
    }
}

fn join_ids<T: ToString>(ids: &[T]) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// One (season, total vertical) pair in a resort-vertical reply
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeasonVertical {
    #[serde(rename = "seasonID")]
    pub season_id: String,
    #[serde(rename = "totalVert")]
    pub total_vert: i64,
}

/// Reply to a read query, carrying a response code alongside the payload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueryReply {
    DayVertical {
        response_code: u16,
        total_vertical: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    ResortVertical {
        response_code: u16,
        resorts: Vec<SeasonVertical>,
    },
    UniqueSkiers {
        response_code: u16,
        resort: u32,
        num_skiers: u64,
    },
    Error {
        response_code: u16,
        message: String,
    },
}

impl QueryReply {
    pub fn response_code(&self) -> u16 {
        match self {
            Self::DayVertical { response_code, .. }
            | Self::ResortVertical { response_code, .. }
            | Self::UniqueSkiers { response_code, .. }
            | Self::Error { response_code, .. } => *response_code,
        }
    }

    /// Internal-error reply with a short user-visible message
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::Error {
            response_code: 500,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_tag_round_trip() {
        let request = QueryRequest::DayVertical {
            skier_id: 55,
            resort_id: 7,
            season_id: 2024,
            day_id: 3,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["type"], "GET_DAY_VERTICAL");
        assert_eq!(json["skierID"], 55);

        let back: QueryRequest = serde_json::from_value(json).unwrap();
        assert_eq!(back, request);
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let raw = r#"{"type":"GET_SOMETHING_ELSE","skierID":1}"#;
        assert!(serde_json::from_str::<QueryRequest>(raw).is_err());
    }

    #[test]
    fn test_cache_keys_are_parameter_sensitive() {
        let a = QueryRequest::ResortVertical {
            skier_id: 1,
            resorts: vec![7],
            seasons: vec![2024],
        };
        let b = QueryRequest::ResortVertical {
            skier_id: 1,
            resorts: vec![7],
            seasons: vec![2024, 2025],
        };
        assert_ne!(a.cache_key(), b.cache_key());
        assert_eq!(
            a.cache_key(),
            "resortVertical:SKIER#1#RESORTS#7#SEASONS#2024"
        );
    }

    #[test]
    fn test_unique_skiers_cache_key_matches_grouping() {
        let request = QueryRequest::UniqueSkiers {
            resort_id: 7,
            season_id: 2024,
            day_id: 3,
        };
        assert_eq!(request.cache_key(), "uniqueSkiers:RESORT#7#SEASON#2024#DAY#3");
    }

    #[test]
    fn test_reply_code_accessor() {
        let reply = QueryReply::DayVertical {
            response_code: 404,
            total_vertical: -1,
            message: Some("No data found".into()),
        };
        assert_eq!(reply.response_code(), 404);
        assert_eq!(QueryReply::internal_error("boom").response_code(), 500);
    }

    #[test]
    fn test_reply_serialized_form_is_stable() {
        let reply = QueryReply::UniqueSkiers {
            response_code: 200,
            resort: 7,
            num_skiers: 42,
        };
        let first = serde_json::to_string(&reply).unwrap();
        let second = serde_json::to_string(&reply).unwrap();
        assert_eq!(first, second);
        let back: QueryReply = serde_json::from_str(&first).unwrap();
        assert_eq!(back, reply);
    }
}
