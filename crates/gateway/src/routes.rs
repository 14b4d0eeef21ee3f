//! Route handlers

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, RawQuery, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error, warn};

use slopestream_broker::Envelope;
use slopestream_types::{
    parse_ride_path, LiftRideEvent, PipelineError, QueryReply, QueryRequest,
};

use crate::AppState;

/// Write-path request body
#[derive(Debug, Deserialize)]
struct RideBody {
    time: i64,
    #[serde(rename = "liftID")]
    lift_id: i64,
}

fn message_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "message": message }))).into_response()
}

fn status_from(code: u16) -> StatusCode {
    StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

/// Fallback for any path outside the surface
pub async fn invalid_url() -> Response {
    message_response(StatusCode::BAD_REQUEST, "Invalid URL format")
}

/// POST /skiers/{resortID}/seasons/{seasonID}/days/{dayID}/skiers/{skierID}
pub async fn post_ride(
    State(state): State<Arc<AppState>>,
    Path((resort_id, season_id, day_id, skier_id)): Path<(String, String, String, String)>,
    body: Bytes,
) -> Response {
    let Ok(ride) = serde_json::from_slice::<RideBody>(&body) else {
        return message_response(StatusCode::BAD_REQUEST, "Invalid body parameters");
    };

    let event = match LiftRideEvent::from_request(
        &resort_id,
        &season_id,
        &day_id,
        &skier_id,
        ride.time,
        ride.lift_id,
    ) {
        Ok(event) => event,
        Err(err) => {
            debug!(error = %err, "rejected write request");
            return message_response(StatusCode::BAD_REQUEST, &err.to_string());
        }
    };

    let payload = match serde_json::to_vec(&event) {
        Ok(payload) => payload,
        Err(err) => {
            error!(error = %err, "failed to serialize event");
            return message_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to send data to the queue",
            );
        }
    };

    let published = async {
        let channel = state.publish_pool.acquire().await?;
        channel
            .publish(&state.write_queue, &Envelope::default(), &payload)
            .await
    }
    .await;

    match published {
        Ok(()) => StatusCode::CREATED.into_response(),
        Err(err) => {
            error!(error = %err, "failed to enqueue event");
            message_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to send data to the queue",
            )
        }
    }
}

/// GET /skiers/{resortID}/seasons/{seasonID}/days/{dayID}/skiers/{skierID}
pub async fn get_day_vertical(
    State(state): State<Arc<AppState>>,
    Path((resort_id, season_id, day_id, skier_id)): Path<(String, String, String, String)>,
) -> Response {
    let (resort_id, season_id, day_id, skier_id) =
        match parse_ride_path(&resort_id, &season_id, &day_id, &skier_id) {
            Ok(parts) => parts,
            Err(err) => {
                debug!(error = %err, "rejected day vertical request");
                return message_response(StatusCode::BAD_REQUEST, "Invalid URL format");
            }
        };

    let request = QueryRequest::DayVertical {
        skier_id,
        resort_id,
        season_id,
        day_id,
    };

    match round_trip(&state, &request).await {
        Ok(QueryReply::DayVertical {
            response_code: 200,
            total_vertical,
            ..
        }) => (StatusCode::OK, total_vertical.to_string()).into_response(),
        Ok(QueryReply::DayVertical {
            response_code,
            message,
            ..
        }) => message_response(
            status_from(response_code),
            message.as_deref().unwrap_or("No data found"),
        ),
        Ok(other) => error_reply_response(other),
        Err(err) => rpc_error_response(err),
    }
}

/// GET /skiers/{skierID}/vertical?resort=&season=
pub async fn get_resort_vertical(
    State(state): State<Arc<AppState>>,
    Path(skier_id): Path<String>,
    RawQuery(query): RawQuery,
) -> Response {
    let Ok(skier_id) = skier_id.parse::<u32>() else {
        return message_response(StatusCode::BAD_REQUEST, "Invalid URL format");
    };

    let (resorts, seasons) = match parse_vertical_params(query.as_deref().unwrap_or("")) {
        Ok(params) => params,
        Err(response) => return response,
    };

    let request = QueryRequest::ResortVertical {
        skier_id,
        resorts,
        seasons,
    };

    match round_trip(&state, &request).await {
        Ok(QueryReply::ResortVertical {
            response_code: 200,
            resorts,
        }) => (StatusCode::OK, Json(resorts)).into_response(),
        Ok(other) => error_reply_response(other),
        Err(err) => rpc_error_response(err),
    }
}

/// GET /resorts/{resortID}/seasons/{seasonID}/day/{dayID}/skiers
pub async fn get_unique_skiers(
    State(state): State<Arc<AppState>>,
    Path((resort_id, season_id, day_id)): Path<(String, String, String)>,
) -> Response {
    // Skier segment is fixed by the route; reuse the shared path rules.
    let (resort_id, season_id, day_id, _) =
        match parse_ride_path(&resort_id, &season_id, &day_id, "1") {
            Ok(parts) => parts,
            Err(err) => {
                debug!(error = %err, "rejected unique skiers request");
                return message_response(StatusCode::BAD_REQUEST, "Invalid URL format");
            }
        };

    let request = QueryRequest::UniqueSkiers {
        resort_id,
        season_id,
        day_id,
    };

    match round_trip(&state, &request).await {
        Ok(QueryReply::UniqueSkiers {
            response_code: 200,
            resort,
            num_skiers,
        }) => (
            StatusCode::OK,
            Json(json!({ "resort": resort, "numSkiers": num_skiers })),
        )
            .into_response(),
        Ok(other) => error_reply_response(other),
        Err(err) => rpc_error_response(err),
    }
}

/// Publish the query and wait for its correlated reply
async fn round_trip(state: &AppState, request: &QueryRequest) -> Result<QueryReply, PipelineError> {
    let payload = serde_json::to_vec(request)?;
    let reply = state.rpc.call(&payload).await?;
    Ok(serde_json::from_slice(&reply)?)
}

fn parse_vertical_params(query: &str) -> Result<(Vec<u32>, Vec<u16>), Response> {
    let mut resorts = Vec::new();
    let mut seasons = Vec::new();
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        match key {
            "resort" => match value.parse::<u32>() {
                Ok(resort) => resorts.push(resort),
                Err(_) => {
                    return Err(message_response(
                        StatusCode::BAD_REQUEST,
                        "Invalid query parameters",
                    ))
                }
            },
            "season" => match value.parse::<u16>() {
                Ok(season) => seasons.push(season),
                Err(_) => {
                    return Err(message_response(
                        StatusCode::BAD_REQUEST,
                        "Invalid query parameters",
                    ))
                }
            },
            other => debug!(key = other, "ignoring unknown query parameter"),
        }
    }
    Ok((resorts, seasons))
}

/// Map non-200 replies onto the HTTP surface
fn error_reply_response(reply: QueryReply) -> Response {
    let code = reply.response_code();
    let message = match reply {
        QueryReply::Error { message, .. } => message,
        QueryReply::DayVertical { message, .. } => {
            message.unwrap_or_else(|| "Unknown error".to_string())
        }
        _ => "Unknown error".to_string(),
    };
    warn!(code, %message, "query reply carried an error");
    message_response(status_from(code), &message)
}

fn rpc_error_response(err: PipelineError) -> Response {
    match err {
        PipelineError::Timeout { .. } => {
            message_response(StatusCode::GATEWAY_TIMEOUT, "Request timed out")
        }
        err => {
            error!(error = %err, "query round trip failed");
            message_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to process GET request",
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_vertical_params_repeatable_season() {
        let (resorts, seasons) = parse_vertical_params("resort=7&season=2024&season=2025").unwrap();
        assert_eq!(resorts, vec![7]);
        assert_eq!(seasons, vec![2024, 2025]);
    }

    #[test]
    fn test_parse_vertical_params_empty() {
        let (resorts, seasons) = parse_vertical_params("").unwrap();
        assert!(resorts.is_empty());
        assert!(seasons.is_empty());
    }

    #[test]
    fn test_parse_vertical_params_rejects_garbage() {
        assert!(parse_vertical_params("resort=abc").is_err());
        assert!(parse_vertical_params("season=20x4").is_err());
    }
}
