//! HTTP dispatch target

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::debug;

use slopestream_types::{LiftRideEvent, PipelineError, Result};

use crate::dispatcher::RideDispatcher;

/// Posts lift rides to the gateway's write endpoint
#[derive(Debug, Clone)]
pub struct HttpRideTarget {
    client: Client,
    base_url: String,
}

impl HttpRideTarget {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client: Client::new(),
            base_url,
        }
    }

    fn url_for(&self, event: &LiftRideEvent) -> String {
        format!(
            "{}/skiers/{}/seasons/{}/days/{}/skiers/{}",
            self.base_url, event.resort_id, event.season_id, event.day_id, event.skier_id
        )
    }
}

#[async_trait]
impl RideDispatcher for HttpRideTarget {
    async fn dispatch(&self, event: &LiftRideEvent) -> Result<u16> {
        let url = self.url_for(event);
        let response = self
            .client
            .post(&url)
            .json(&json!({ "time": event.time, "liftID": event.lift_id }))
            .send()
            .await;

        match response {
            Ok(response) => {
                let status = response.status().as_u16();
                if (200..300).contains(&status) {
                    Ok(status)
                } else {
                    Err(PipelineError::from_status(status))
                }
            }
            Err(err) => {
                debug!(error = %err, %url, "transport error on dispatch");
                // No status to classify; treat like an unavailable upstream.
                Err(PipelineError::TransientRemote { status: 503 })
            }
        }
    }
}
