use super::cargo::{CargoStatus, TimeStamp};
use super::error::{LifecycleError, StoreError};
use chrono::Utc;

/// Physical handling step a cargo handler performs.
#[derive(
    Debug, PartialEq, Eq, PartialOrd, Ord, Hash, minicbor::Encode, minicbor::Decode, Clone, Copy,
)]
pub enum ActionKind {
    #[n(0)]
    Pickup,
    #[n(1)]
    Load,
    #[n(2)]
    Unload,
    #[n(3)]
    Deliver,
}

impl ActionKind {
    pub const ALL: [ActionKind; 4] = [
        ActionKind::Pickup,
        ActionKind::Load,
        ActionKind::Unload,
        ActionKind::Deliver,
    ];

    /// The single status step this action performs.
    pub fn transition(self) -> (CargoStatus, CargoStatus) {
        match self {
            ActionKind::Pickup | ActionKind::Load => (CargoStatus::Pending, CargoStatus::InTransit),
            ActionKind::Unload | ActionKind::Deliver => {
                (CargoStatus::InTransit, CargoStatus::Delivered)
            }
        }
    }
}

/// Append-only audit entry, written in the same commit as the status change it
/// records.
#[derive(Debug, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Clone)]
pub struct HandlerAction {
    #[n(0)]
    pub cargo_id: String,
    #[n(1)]
    pub action: ActionKind,
    #[n(2)]
    pub performed_by: String, // user id of the handler or admin
    #[n(3)]
    pub notes: String,
    #[n(4)]
    pub timestamp: TimeStamp<Utc>,
    #[n(5)]
    pub from: CargoStatus,
    #[n(6)]
    pub to: CargoStatus,
}

impl HandlerAction {
    pub fn new(
        cargo_id: String,
        action: ActionKind,
        performed_by: String,
        notes: String,
        timestamp: TimeStamp<Utc>,
    ) -> Self {
        let (from, to) = action.transition();
        Self {
            cargo_id,
            action,
            performed_by,
            notes,
            timestamp,
            from,
            to,
        }
    }
    /// Encodes the entry and returns its content hash alongside the bytes.
    pub fn build(&self) -> Result<(String, Vec<u8>), StoreError> {
        let cbor = minicbor::to_vec(self)?;
        let hash = sha256::digest(&cbor);

        Ok((hash, cbor))
    }
}

/// The audit trail of one cargo, oldest entry first.
#[derive(Debug, Clone, PartialEq)]
pub struct CargoHistory {
    pub cargo_id: String,
    pub actions: Vec<HandlerAction>,
}

impl CargoHistory {
    pub fn new(cargo_id: String) -> Self {
        Self {
            cargo_id,
            actions: vec![],
        }
    }
    pub fn insert_action(&mut self, action: HandlerAction) {
        self.actions.push(action);
    }

    /// Replays the trail from `Pending`. A well formed trail lands on the
    /// stored cargo status; a broken one yields `InvalidTransition`.
    pub fn derived_status(&self) -> Result<CargoStatus, LifecycleError> {
        self.actions
            .iter()
            .try_fold(CargoStatus::Pending, |status, entry| {
                status.advance(entry.to, entry.action)
            })
    }
}
