//! Users, roles and the capability table
use chrono::Utc;

use super::cargo::TimeStamp;

/// One role per user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, minicbor::Encode, minicbor::Decode)]
pub enum Role {
    #[n(0)]
    Admin,
    #[n(1)]
    CargoHandler,
    #[n(2)]
    Customer,
}

/// Everything the engine can be asked to do. Each role maps to a fixed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ViewAllCargo,
    ViewPendingCargo,
    ViewOwnCargo,
    ViewHistory,
    TransitionStatus,
    CreateBooking,
    CancelBooking,
    AmendCargo,
    ViewUsers,
    ManageUsers,
    ManageFlights,
    ManageReferenceData,
    ViewFlights,
    ViewReferenceData,
}

const ADMIN_CAPABILITIES: &[Operation] = &[
    Operation::ViewAllCargo,
    Operation::ViewHistory,
    Operation::TransitionStatus,
    Operation::AmendCargo,
    Operation::ViewUsers,
    Operation::ManageUsers,
    Operation::ManageFlights,
    Operation::ManageReferenceData,
    Operation::ViewFlights,
    Operation::ViewReferenceData,
];

const HANDLER_CAPABILITIES: &[Operation] = &[
    Operation::ViewPendingCargo,
    Operation::ViewHistory,
    Operation::TransitionStatus,
    Operation::ViewFlights,
    Operation::ViewReferenceData,
];

const CUSTOMER_CAPABILITIES: &[Operation] = &[
    Operation::ViewOwnCargo,
    Operation::CreateBooking,
    Operation::CancelBooking,
    Operation::ViewFlights,
    Operation::ViewReferenceData,
];

/// Which cargo a role may list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CargoScope {
    All,
    Pending,
    Owned,
}

impl Role {
    pub fn capabilities(self) -> &'static [Operation] {
        match self {
            Role::Admin => ADMIN_CAPABILITIES,
            Role::CargoHandler => HANDLER_CAPABILITIES,
            Role::Customer => CUSTOMER_CAPABILITIES,
        }
    }

    pub fn permits(self, operation: Operation) -> bool {
        self.capabilities().contains(&operation)
    }

    pub fn cargo_scope(self) -> CargoScope {
        match self {
            Role::Admin => CargoScope::All,
            Role::CargoHandler => CargoScope::Pending,
            Role::Customer => CargoScope::Owned,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::CargoHandler => "cargo_handler",
            Role::Customer => "customer",
        }
    }
}

/// Salted sha256 of a password. Both parts are hex encoded.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct PasswordHash {
    #[n(0)]
    salt: String,
    #[n(1)]
    digest: String,
}

impl PasswordHash {
    pub fn new(password: &str) -> Self {
        let salt: [u8; 16] = rand::random();
        Self::with_salt(&salt, password)
    }

    fn with_salt(salt: &[u8], password: &str) -> Self {
        Self {
            salt: hex::encode(salt),
            digest: salted_digest(salt, password),
        }
    }

    pub fn verify(&self, password: &str) -> bool {
        match hex::decode(&self.salt) {
            Ok(salt) => salted_digest(&salt, password) == self.digest,
            Err(_) => false,
        }
    }
}

fn salted_digest(salt: &[u8], password: &str) -> String {
    let mut input = salt.to_vec();
    input.extend_from_slice(password.as_bytes());
    sha256::digest(&input)
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct User {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub username: String,
    #[n(2)]
    pub password_hash: PasswordHash,
    #[n(3)]
    pub email: String,
    #[n(4)]
    pub role: Role,
    #[n(5)]
    pub created_at: TimeStamp<Utc>,
}

impl User {
    pub fn actor(&self) -> Actor {
        Actor {
            user_id: self.id.clone(),
            username: self.username.clone(),
            role: self.role,
        }
    }

    pub fn summary(&self) -> UserSummary {
        UserSummary {
            username: self.username.clone(),
            email: self.email.clone(),
            role: self.role,
            created_at: self.created_at.clone(),
        }
    }
}

/// The caller of an engine operation. Passed explicitly into every call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user_id: String,
    pub username: String,
    pub role: Role,
}

/// A user as shown on the admin users table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSummary {
    pub username: String,
    pub email: String,
    pub role: Role,
    pub created_at: TimeStamp<Utc>,
}
