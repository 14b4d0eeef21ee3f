//! Lift ride event and boundary validation

use serde::{Deserialize, Serialize};

use crate::errors::{PipelineError, Result};

/// A single lift ride, immutable once admitted to the write path.
///
/// All fields are range-validated at construction; an event that fails
/// validation is rejected at the boundary and never enqueued.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LiftRideEvent {
    #[serde(rename = "skierID")]
    pub skier_id: u32,
    #[serde(rename = "resortID")]
    pub resort_id: u32,
    /// Four-digit season year
    #[serde(rename = "seasonID")]
    pub season_id: u16,
    /// Day of season, 1..=366
    #[serde(rename = "dayID")]
    pub day_id: u16,
    /// Minute of day, 0..=360
    pub time: u16,
    #[serde(rename = "liftID")]
    pub lift_id: u32,
}

impl LiftRideEvent {
    /// Create a validated event.
    pub fn new(
        skier_id: u32,
        resort_id: u32,
        season_id: u16,
        day_id: u16,
        time: u16,
        lift_id: u32,
    ) -> Result<Self> {
        if skier_id == 0 {
            return Err(PipelineError::Validation("skierID must be positive".into()));
        }
        if resort_id == 0 {
            return Err(PipelineError::Validation("resortID must be positive".into()));
        }
        if !(1000..=9999).contains(&season_id) {
            return Err(PipelineError::Validation(
                "seasonID must be a 4-digit year".into(),
            ));
        }
        if !(1..=366).contains(&day_id) {
            return Err(PipelineError::Validation(
                "dayID must be between 1 and 366".into(),
            ));
        }
        if time > 360 {
            return Err(PipelineError::Validation(
                "time must be between 0 and 360".into(),
            ));
        }
        if lift_id == 0 {
            return Err(PipelineError::Validation("liftID must be positive".into()));
        }
        Ok(Self {
            skier_id,
            resort_id,
            season_id,
            day_id,
            time,
            lift_id,
        })
    }

    /// Build a validated event from raw URL path segments and body fields.
    ///
    /// Mirrors the write-path URL rules: resortID and skierID numeric,
    /// seasonID exactly 4 digits, dayID in 1..=366, body `time` in 0..=360
    /// and `liftID` >= 1.
    pub fn from_request(
        resort_id: &str,
        season_id: &str,
        day_id: &str,
        skier_id: &str,
        time: i64,
        lift_id: i64,
    ) -> Result<Self> {
        let (resort_id, season_id, day_id, skier_id) =
            parse_ride_path(resort_id, season_id, day_id, skier_id)?;
        if !(0..=360).contains(&time) {
            return Err(PipelineError::Validation(
                "time must be between 0 and 360".into(),
            ));
        }
        if lift_id < 1 {
            return Err(PipelineError::Validation("liftID must be positive".into()));
        }
        Self::new(
            skier_id,
            resort_id,
            season_id,
            day_id,
            time as u16,
            lift_id as u32,
        )
    }

    /// Vertical meters contributed by this ride
    pub fn vertical(&self) -> i64 {
        i64::from(self.lift_id) * 10
    }
}

/// Validate the shared ride-path segments and parse them.
///
/// Used by both the write path and the day-vertical read path, which
/// address the same `(resort, season, day, skier)` coordinates.
pub fn parse_ride_path(
    resort_id: &str,
    season_id: &str,
    day_id: &str,
    skier_id: &str,
) -> Result<(u32, u16, u16, u32)> {
    let resort_id = parse_numeric(resort_id, "resortID")?;
    let skier_id = parse_numeric(skier_id, "skierID")?;
    if season_id.len() != 4 || !season_id.bytes().all(|b| b.is_ascii_digit()) {
        return Err(PipelineError::Validation(
            "seasonID must be a 4-digit year".into(),
        ));
    }
    let season_id: u16 = season_id
        .parse()
        .map_err(|_| PipelineError::Validation("seasonID must be a 4-digit year".into()))?;
    let day_id: u16 = day_id
        .parse()
        .map_err(|_| PipelineError::Validation("dayID must be an integer".into()))?;
    if !(1..=366).contains(&day_id) {
        return Err(PipelineError::Validation(
            "dayID must be between 1 and 366".into(),
        ));
    }
    Ok((resort_id, season_id, day_id, skier_id))
}

fn parse_numeric(raw: &str, field: &str) -> Result<u32> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(PipelineError::Validation(format!(
            "{field} must be numeric"
        )));
    }
    raw.parse()
        .map_err(|_| PipelineError::Validation(format!("{field} out of range")))
}
