//! Durable-store key scheme
//!
//! Records are addressed by a partition key per skier and a sort key that
//! encodes resort, season, day, lift and time. A denormalized index key
//! groups records by (resort, season, day) for distinct-skier counting.
//! Prefixes are `#`-terminated so `DAY#3` can never match `DAY#30`.

use serde::{Deserialize, Serialize};

use crate::events::LiftRideEvent;

/// One persisted ride, shaped for partition/sort-key addressing.
///
/// Upserts are idempotent per record: the sort key pins the ride down to
/// lift and time, so exact redelivery of the same event overwrites itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RideRecord {
    pub partition_key: String,
    pub sort_key: String,
    /// Secondary-index grouping key for unique-skier counting
    pub index_key: String,
    pub lift_id: u32,
    pub time: u16,
    pub vertical: i64,
}

impl RideRecord {
    pub fn from_event(event: &LiftRideEvent) -> Self {
        Self {
            partition_key: partition_key(event.skier_id),
            sort_key: format!(
                "RESORT#{}#SEASON#{}#DAY#{}#LIFT#{}#TIME#{}",
                event.resort_id, event.season_id, event.day_id, event.lift_id, event.time
            ),
            index_key: index_key(event.resort_id, event.season_id, event.day_id),
            lift_id: event.lift_id,
            time: event.time,
            vertical: event.vertical(),
        }
    }

    /// Season segment of the sort key, if present
    pub fn season(&self) -> Option<&str> {
        self.sort_key.split('#').nth(3)
    }
}

/// Partition key for a skier
pub fn partition_key(skier_id: u32) -> String {
    format!("SKIER#{skier_id}")
}

/// Exact secondary-index key for a (resort, season, day) grouping
pub fn index_key(resort_id: u32, season_id: u16, day_id: u16) -> String {
    format!("RESORT#{resort_id}#SEASON#{season_id}#DAY#{day_id}")
}

/// Sort-key prefix matching every ride of a skier on one day
pub fn day_prefix(resort_id: u32, season_id: u16, day_id: u16) -> String {
    format!("RESORT#{resort_id}#SEASON#{season_id}#DAY#{day_id}#")
}

/// Sort-key prefix matching every ride of a skier in one season
pub fn season_prefix(resort_id: u32, season_id: u16) -> String {
    format!("RESORT#{resort_id}#SEASON#{season_id}#")
}

/// Sort-key prefix matching every ride of a skier at one resort
pub fn resort_prefix(resort_id: u32) -> String {
    format!("RESORT#{resort_id}#")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event() -> LiftRideEvent {
        LiftRideEvent::new(55, 7, 2024, 3, 120, 9).unwrap()
    }

    #[test]
    fn test_record_shape() {
        let record = RideRecord::from_event(&event());
        assert_eq!(record.partition_key, "SKIER#55");
        assert_eq!(record.sort_key, "RESORT#7#SEASON#2024#DAY#3#LIFT#9#TIME#120");
        assert_eq!(record.index_key, "RESORT#7#SEASON#2024#DAY#3");
        assert_eq!(record.vertical, 90);
        assert_eq!(record.season(), Some("2024"));
    }

    #[test]
    fn test_day_prefix_is_terminated() {
        let record = RideRecord::from_event(&LiftRideEvent::new(1, 1, 2024, 30, 0, 1).unwrap());
        // A day-3 prefix must not match a day-30 record.
        assert!(!record.sort_key.starts_with(&day_prefix(1, 2024, 3)));
        assert!(record.sort_key.starts_with(&day_prefix(1, 2024, 30)));
    }

    #[test]
    fn test_prefix_nesting() {
        let record = RideRecord::from_event(&event());
        assert!(record.sort_key.starts_with(&resort_prefix(7)));
        assert!(record.sort_key.starts_with(&season_prefix(7, 2024)));
        assert!(record.sort_key.starts_with(&day_prefix(7, 2024, 3)));
        assert!(!record.sort_key.starts_with(&season_prefix(7, 2025)));
    }
}
