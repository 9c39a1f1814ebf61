use crate::cargo::CargoStatus;
use crate::handler_action::ActionKind;
use crate::identity::{Operation, Role};

#[derive(thiserror::Error, Debug)]
pub enum LifecycleError {
    #[error("Invalid username or password")]
    Unauthenticated,
    #[error("Role {role:?} is not permitted to {operation:?}")]
    Unauthorized { role: Option<Role>, operation: Operation },
    #[error("{0} not found")]
    NotFound(String),
    #[error("Cannot move cargo from {from:?} to {to:?} with action {action:?}")]
    InvalidTransition {
        from: CargoStatus,
        to: CargoStatus,
        action: ActionKind,
    },
    #[error("Cargo in status {0} can no longer be cancelled")]
    NotCancellable(CargoStatus),
    #[error("Weight must be above 0 and at most the configured maximum, got {0} kg")]
    InvalidWeight(f64),
    #[error("Flight {0} does not exist")]
    FlightNotFound(String),
    #[error("Flight {0} has already departed")]
    FlightDeparted(String),
    #[error("Flight {0} has been cancelled")]
    FlightCancelled(String),
    #[error("Departure must be before arrival")]
    InvalidSchedule,
    #[error("Username {0} is already taken")]
    UsernameTaken(String),
    #[error("Airport code {0} is already registered")]
    LocationTaken(String),
    #[error("An administrator already exists")]
    AlreadyBootstrapped,
    #[error("Failed to mint identifier: {0}")]
    Identifier(String),
    #[error("Persistence failure: {0}")]
    PersistenceFailure(#[from] StoreError),
}

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    Sled(#[from] sled::Error),
    #[error("failed to decode record: {0}")]
    Decode(#[from] minicbor::decode::Error),
    #[error("failed to encode record: {0}")]
    Encode(#[from] minicbor::encode::Error<std::convert::Infallible>),
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value for {0}")]
    InvalidEnv(&'static str),
    #[error("{0} must be a positive finite number")]
    InvalidValue(&'static str),
}
