//! Reference data: airports, cargo types and flights
use std::fmt;

use chrono::Utc;

use super::cargo::TimeStamp;

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct Location {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub airport_code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct CargoType {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, minicbor::Encode, minicbor::Decode)]
pub enum FlightStatus {
    #[n(0)]
    Scheduled,
    #[n(1)]
    Delayed,
    #[n(2)]
    Cancelled,
    #[n(3)]
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct Flight {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub aircraft_id: String,
    #[n(2)]
    pub origin_id: String,
    #[n(3)]
    pub destination_id: String,
    #[n(4)]
    pub departure_time: TimeStamp<Utc>,
    #[n(5)]
    pub arrival_time: TimeStamp<Utc>,
    #[n(6)]
    pub status: FlightStatus,
}

impl Flight {
    pub fn has_valid_schedule(&self) -> bool {
        self.departure_time < self.arrival_time
    }

    /// Open for new cargo: departs in the future and has not been cancelled.
    pub fn is_bookable(&self) -> bool {
        !self.departure_time.is_past()
            && !matches!(self.status, FlightStatus::Cancelled | FlightStatus::Completed)
    }
}

/// A flight joined with its airport codes, as offered on the booking form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlightRow {
    pub flight: Flight,
    pub origin_code: String,
    pub destination_code: String,
}

impl fmt::Display for FlightRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} ({})",
            self.origin_code, self.destination_code, self.flight.departure_time
        )
    }
}
