//! Core cargo records, status chain and booking requests
use std::fmt;

use chrono::{DateTime, Duration, TimeZone, Utc};

use super::error::LifecycleError;
use super::handler_action::ActionKind;

/// Lifecycle of a cargo item. The only legal path is
/// `Pending -> InTransit -> Delivered`.
#[derive(
    minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, Eq, Ord, PartialEq, PartialOrd, Hash,
)]
pub enum CargoStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    InTransit,
    #[n(2)]
    Delivered,
}

impl CargoStatus {
    /// Moves one step along the chain. The action decides which step it may
    /// perform; anything else, including a repeat of an applied step, fails.
    pub fn advance(self, target: CargoStatus, action: ActionKind) -> Result<Self, LifecycleError> {
        let (from, to) = action.transition();
        if self == from && target == to {
            return Ok(to);
        }

        Err(LifecycleError::InvalidTransition {
            from: self,
            to: target,
            action,
        })
    }
}

impl fmt::Display for CargoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CargoStatus::Pending => "PENDING",
            CargoStatus::InTransit => "IN_TRANSIT",
            CargoStatus::Delivered => "DELIVERED",
        };
        f.write_str(name)
    }
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

impl PartialOrd for TimeStamp<Utc> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimeStamp<Utc> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn new_with(
        year: i32,
        month: u32,
        day: u32,
        hour: u32,
        min: u32,
        sec: u32,
    ) -> Option<Self> {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .single()
            .map(Self)
    }
    /// A timestamp offset from now, negative hours point into the past.
    pub fn hours_from_now(hours: i64) -> Self {
        Self(Utc::now() + Duration::hours(hours))
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
    pub fn is_past(&self) -> bool {
        self.0 <= Utc::now()
    }
    // sortable key fragment, also used for audit ordering in the store
    pub(crate) fn sort_key(&self) -> String {
        format!("{:020}", self.0.timestamp_nanos_opt().unwrap_or_default().max(0))
    }
}

impl Default for TimeStamp<Utc> {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TimeStamp<Utc> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M"))
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

/// Weight in kilograms.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Weight(#[n(0)] f64);

impl Weight {
    /// Accepts `0 < kg <= max_kg`; NaN and infinities are rejected.
    pub fn new(kg: f64, max_kg: f64) -> Result<Self, LifecycleError> {
        if !kg.is_finite() || kg <= 0.0 || kg > max_kg {
            return Err(LifecycleError::InvalidWeight(kg));
        }
        Ok(Self(kg))
    }
    pub fn kg(&self) -> f64 {
        self.0
    }
}

/// Money in minor units (cents).
#[derive(
    minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, Eq, Ord, PartialEq, PartialOrd, Hash,
)]
pub struct Price(#[n(0)] u64);

impl Price {
    pub fn from_cents(cents: u64) -> Self {
        Self(cents)
    }
    pub fn from_units(units: u64) -> Self {
        Self(units * 100)
    }
    pub fn cents(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}.{:02}", self.0 / 100, self.0 % 100)
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq)]
pub struct Cargo {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub customer_id: String,
    #[n(2)]
    pub cargo_type_id: String,
    #[n(3)]
    pub flight_id: String,
    #[n(4)]
    pub weight: Weight,
    // origin and destination are a snapshot taken at booking time, later
    // flight edits do not move them
    #[n(5)]
    pub origin_id: String,
    #[n(6)]
    pub destination_id: String,
    #[n(7)]
    pub status: CargoStatus,
    #[n(8)]
    pub calculated_price: Price,
    #[n(9)]
    pub booked_at: TimeStamp<Utc>,
}

impl Cargo {
    /// Applies a handler action, returning the cargo in its new status.
    pub fn advance(&self, target: CargoStatus, action: ActionKind) -> Result<Self, LifecycleError> {
        let status = self.status.advance(target, action)?;
        Ok(Self {
            status,
            ..self.clone()
        })
    }

    pub fn is_cancellable(&self) -> bool {
        self.status == CargoStatus::Pending
    }
}

/// What a customer asks for when booking. Origin and destination default to
/// the flight's own locations when left unset.
#[derive(Debug, Clone, PartialEq)]
pub struct BookingRequest {
    pub cargo_type_id: String,
    pub flight_id: String,
    pub weight_kg: f64,
    pub origin_id: Option<String>,
    pub destination_id: Option<String>,
}

impl BookingRequest {
    pub fn new(cargo_type_id: &str, flight_id: &str, weight_kg: f64) -> Self {
        Self {
            cargo_type_id: cargo_type_id.to_string(),
            flight_id: flight_id.to_string(),
            weight_kg,
            origin_id: None,
            destination_id: None,
        }
    }
    pub fn set_origin(mut self, origin_id: &str) -> Self {
        self.origin_id = Some(origin_id.to_string());
        self
    }
    pub fn set_destination(mut self, destination_id: &str) -> Self {
        self.destination_id = Some(destination_id.to_string());
        self
    }
}

/// Admin edits to a booked cargo. Status is not amendable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CargoAmendment {
    pub weight_kg: Option<f64>,
    pub cargo_type_id: Option<String>,
}

impl CargoAmendment {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_weight(mut self, weight_kg: f64) -> Self {
        self.weight_kg = Some(weight_kg);
        self
    }
    pub fn set_cargo_type(mut self, cargo_type_id: &str) -> Self {
        self.cargo_type_id = Some(cargo_type_id.to_string());
        self
    }
}
