//! Synthetic event generation

use rand::Rng;
use tokio::sync::mpsc;
use tracing::{debug, info};

use slopestream_types::{LiftRideEvent, Result};

/// Inclusive value ranges for generated events
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    pub skier_min: u32,
    pub skier_max: u32,
    pub resort_id: u32,
    pub season_id: u16,
    pub day_id: u16,
    pub lift_min: u32,
    pub lift_max: u32,
    pub time_min: u16,
    pub time_max: u16,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            skier_min: 1,
            skier_max: 100_000,
            resort_id: 1,
            season_id: 2024,
            day_id: 3,
            lift_min: 1,
            lift_max: 40,
            time_min: 1,
            time_max: 360,
        }
    }
}

/// Produces validated synthetic lift-ride events
#[derive(Debug, Clone)]
pub struct EventGenerator {
    config: GeneratorConfig,
}

impl EventGenerator {
    pub fn new(config: GeneratorConfig) -> Self {
        Self { config }
    }

    /// Generate one event within the configured ranges.
    ///
    /// Events go through the same validating constructor as the HTTP
    /// boundary, so a misconfigured range fails here instead of deep in
    /// the pipeline.
    pub fn generate(&self) -> Result<LiftRideEvent> {
        let mut rng = rand::thread_rng();
        LiftRideEvent::new(
            rng.gen_range(self.config.skier_min..=self.config.skier_max),
            self.config.resort_id,
            self.config.season_id,
            self.config.day_id,
            rng.gen_range(self.config.time_min..=self.config.time_max),
            rng.gen_range(self.config.lift_min..=self.config.lift_max),
        )
    }

    /// Fill the bounded work queue with `total` events, blocking while the
    /// queue is full. Returns how many events were produced; stops early
    /// if every consumer is gone.
    pub async fn produce(&self, queue: mpsc::Sender<LiftRideEvent>, total: u64) -> Result<u64> {
        info!(total, "event production started");
        for produced in 0..total {
            let event = self.generate()?;
            if queue.send(event).await.is_err() {
                debug!(produced, "work queue closed, production stopped early");
                return Ok(produced);
            }
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_generate_valid_events() {
        let generator = EventGenerator::new(GeneratorConfig::default());
        for _ in 0..500 {
            let event = generator.generate().unwrap();
            assert!((1..=100_000).contains(&event.skier_id));
            assert_eq!(event.resort_id, 1);
            assert_eq!(event.season_id, 2024);
            assert_eq!(event.day_id, 3);
            assert!((1..=40).contains(&event.lift_id));
            assert!((1..=360).contains(&event.time));
        }
    }

    #[test]
    fn test_invalid_ranges_fail_construction() {
        let generator = EventGenerator::new(GeneratorConfig {
            time_min: 400,
            time_max: 400,
            ..GeneratorConfig::default()
        });
        assert!(generator.generate().is_err());
    }

    #[tokio::test]
    async fn test_produce_blocks_on_full_queue() {
        let generator = EventGenerator::new(GeneratorConfig::default());
        let (tx, mut rx) = mpsc::channel(2);

        let producer = tokio::spawn(async move { generator.produce(tx, 10).await.unwrap() });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        // Queue capacity is 2, so the producer is blocked mid-run.
        assert!(!producer.is_finished());

        let mut received = 0;
        while rx.recv().await.is_some() {
            received += 1;
        }
        assert_eq!(received, 10);
        assert_eq!(producer.await.unwrap(), 10);
    }
}
