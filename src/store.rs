//! Persistence gateway for the lifecycle engine
//!
//! Reads are plain parameterised lookups. Every write that has to observe the
//! current state first takes a validation closure and runs read, validate and
//! write as one sled transaction: either all of it commits or none of it does.
//! Closures may run more than once when sled retries a conflicting transaction,
//! so they must not have side effects.
use std::sync::Arc;

use minicbor::{Decode, Encode};
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionError,
    TransactionResult, TransactionalTree,
};

use super::cargo::Cargo;
use super::config::DatabaseConfig;
use super::error::{LifecycleError, StoreError};
use super::fleet::{CargoType, Flight, Location};
use super::handler_action::HandlerAction;
use super::identity::User;

pub type Validate<'a, T, R> = &'a dyn Fn(&T) -> Result<R, LifecycleError>;

pub trait CargoStore {
    fn user(&self, id: &str) -> Result<Option<User>, StoreError>;
    fn user_by_username(&self, username: &str) -> Result<Option<User>, StoreError>;
    fn users(&self) -> Result<Vec<User>, StoreError>;
    /// Fails with `UsernameTaken` when the username is in use.
    fn insert_user(&self, user: &User) -> Result<(), LifecycleError>;
    /// Like `insert_user`, but only succeeds for the very first user.
    fn insert_first_user(&self, user: &User) -> Result<(), LifecycleError>;

    fn location(&self, id: &str) -> Result<Option<Location>, StoreError>;
    fn locations(&self) -> Result<Vec<Location>, StoreError>;
    /// Fails with `LocationTaken` when the airport code is in use.
    fn insert_location(&self, location: &Location) -> Result<(), LifecycleError>;

    fn cargo_type(&self, id: &str) -> Result<Option<CargoType>, StoreError>;
    fn cargo_types(&self) -> Result<Vec<CargoType>, StoreError>;
    fn insert_cargo_type(&self, cargo_type: &CargoType) -> Result<(), StoreError>;

    fn flight(&self, id: &str) -> Result<Option<Flight>, StoreError>;
    fn flights(&self) -> Result<Vec<Flight>, StoreError>;
    fn insert_flight(&self, flight: &Flight) -> Result<(), StoreError>;
    fn update_flight(
        &self,
        flight_id: &str,
        apply: Validate<'_, Flight, Flight>,
    ) -> Result<Flight, LifecycleError>;

    fn cargo(&self, id: &str) -> Result<Option<Cargo>, StoreError>;
    fn all_cargo(&self) -> Result<Vec<Cargo>, StoreError>;
    /// Audit trail of one cargo, oldest first.
    fn handler_actions(&self, cargo_id: &str) -> Result<Vec<HandlerAction>, StoreError>;

    /// Reads the flight and stores the cargo `book` derives from it.
    fn book_cargo(
        &self,
        flight_id: &str,
        book: Validate<'_, Flight, Cargo>,
    ) -> Result<Cargo, LifecycleError>;
    /// Reads the cargo, stores the new cargo and appends the audit entry.
    fn transition_cargo(
        &self,
        cargo_id: &str,
        apply: Validate<'_, Cargo, (Cargo, HandlerAction)>,
    ) -> Result<(Cargo, HandlerAction), LifecycleError>;
    fn update_cargo(
        &self,
        cargo_id: &str,
        apply: Validate<'_, Cargo, Cargo>,
    ) -> Result<Cargo, LifecycleError>;
    fn remove_cargo(
        &self,
        cargo_id: &str,
        check: Validate<'_, Cargo, ()>,
    ) -> Result<Cargo, LifecycleError>;
}

const BOOTSTRAP_KEY: &str = "meta/bootstrapped";

fn user_key(id: &str) -> String {
    format!("user/{id}")
}
fn username_key(username: &str) -> String {
    format!("username/{username}")
}
fn location_key(id: &str) -> String {
    format!("location/{id}")
}
fn airport_key(code: &str) -> String {
    format!("airport/{code}")
}
fn cargo_type_key(id: &str) -> String {
    format!("cargo_type/{id}")
}
fn flight_key(id: &str) -> String {
    format!("flight/{id}")
}
fn cargo_key(id: &str) -> String {
    format!("cargo/{id}")
}
fn action_prefix(cargo_id: &str) -> String {
    format!("action/{cargo_id}/")
}

fn encode<T: Encode<()>>(value: &T) -> Result<Vec<u8>, StoreError> {
    Ok(minicbor::to_vec(value)?)
}

fn decode<'b, T: Decode<'b, ()>>(bytes: &'b [u8]) -> Result<T, StoreError> {
    Ok(minicbor::decode(bytes)?)
}

fn abort(e: impl Into<LifecycleError>) -> ConflictableTransactionError<LifecycleError> {
    ConflictableTransactionError::Abort(e.into())
}

fn tx_get<T>(
    tx: &TransactionalTree,
    key: &str,
) -> ConflictableTransactionResult<Option<T>, LifecycleError>
where
    T: for<'b> Decode<'b, ()>,
{
    match tx.get(key.as_bytes())? {
        Some(bytes) => decode(&bytes).map(Some).map_err(abort),
        None => Ok(None),
    }
}

fn tx_put<T: Encode<()>>(
    tx: &TransactionalTree,
    key: &str,
    value: &T,
) -> ConflictableTransactionResult<(), LifecycleError> {
    let bytes = encode(value).map_err(abort)?;
    tx.insert(key.as_bytes(), bytes)?;
    Ok(())
}

fn tx_put_user(
    tx: &TransactionalTree,
    user: &User,
) -> ConflictableTransactionResult<(), LifecycleError> {
    let name_key = username_key(&user.username);
    if tx.get(name_key.as_bytes())?.is_some() {
        return Err(abort(LifecycleError::UsernameTaken(user.username.clone())));
    }
    tx.insert(name_key.as_bytes(), user.id.as_bytes())?;
    tx_put(tx, &user_key(&user.id), user)
}

// collapses sled's transaction error into the engine taxonomy
fn finish<T>(result: TransactionResult<T, LifecycleError>) -> Result<T, LifecycleError> {
    result.map_err(|e| match e {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => StoreError::from(e).into(),
    })
}

pub struct SledStore {
    instance: Arc<sled::Db>,
}

impl SledStore {
    pub fn new(instance: Arc<sled::Db>) -> Self {
        Self { instance }
    }

    pub fn open(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let db = config.sled_config().open()?;
        log::info!("opened cargo store at {}", config.path.display());
        Ok(Self::new(Arc::new(db)))
    }

    pub fn flush(&self) -> Result<usize, StoreError> {
        Ok(self.instance.flush()?)
    }

    fn get<T>(&self, key: &str) -> Result<Option<T>, StoreError>
    where
        T: for<'b> Decode<'b, ()>,
    {
        match self.instance.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put<T: Encode<()>>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        self.instance.insert(key.as_bytes(), encode(value)?)?;
        Ok(())
    }

    fn scan<T>(&self, prefix: &str) -> Result<Vec<T>, StoreError>
    where
        T: for<'b> Decode<'b, ()>,
    {
        self.instance
            .scan_prefix(prefix.as_bytes())
            .map(|item| {
                let (_, bytes) = item?;
                decode(&bytes)
            })
            .collect()
    }
}

impl CargoStore for SledStore {
    fn user(&self, id: &str) -> Result<Option<User>, StoreError> {
        self.get(&user_key(id))
    }

    fn user_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        match self.instance.get(username_key(username).as_bytes())? {
            Some(id) => self.get(&user_key(&String::from_utf8_lossy(&id))),
            None => Ok(None),
        }
    }

    fn users(&self) -> Result<Vec<User>, StoreError> {
        self.scan("user/")
    }

    fn insert_user(&self, user: &User) -> Result<(), LifecycleError> {
        finish(self.instance.transaction(|tx| tx_put_user(tx, user)))
    }

    fn insert_first_user(&self, user: &User) -> Result<(), LifecycleError> {
        finish(self.instance.transaction(|tx| {
            if tx.get(BOOTSTRAP_KEY.as_bytes())?.is_some() {
                return Err(abort(LifecycleError::AlreadyBootstrapped));
            }
            tx.insert(BOOTSTRAP_KEY.as_bytes(), user.id.as_bytes())?;
            tx_put_user(tx, user)
        }))
    }

    fn location(&self, id: &str) -> Result<Option<Location>, StoreError> {
        self.get(&location_key(id))
    }

    fn locations(&self) -> Result<Vec<Location>, StoreError> {
        self.scan("location/")
    }

    fn insert_location(&self, location: &Location) -> Result<(), LifecycleError> {
        let code_key = airport_key(&location.airport_code);
        finish(self.instance.transaction(|tx| {
            if tx.get(code_key.as_bytes())?.is_some() {
                return Err(abort(LifecycleError::LocationTaken(
                    location.airport_code.clone(),
                )));
            }
            tx.insert(code_key.as_bytes(), location.id.as_bytes())?;
            tx_put(tx, &location_key(&location.id), location)
        }))
    }

    fn cargo_type(&self, id: &str) -> Result<Option<CargoType>, StoreError> {
        self.get(&cargo_type_key(id))
    }

    fn cargo_types(&self) -> Result<Vec<CargoType>, StoreError> {
        self.scan("cargo_type/")
    }

    fn insert_cargo_type(&self, cargo_type: &CargoType) -> Result<(), StoreError> {
        self.put(&cargo_type_key(&cargo_type.id), cargo_type)
    }

    fn flight(&self, id: &str) -> Result<Option<Flight>, StoreError> {
        self.get(&flight_key(id))
    }

    fn flights(&self) -> Result<Vec<Flight>, StoreError> {
        self.scan("flight/")
    }

    fn insert_flight(&self, flight: &Flight) -> Result<(), StoreError> {
        self.put(&flight_key(&flight.id), flight)
    }

    fn update_flight(
        &self,
        flight_id: &str,
        apply: Validate<'_, Flight, Flight>,
    ) -> Result<Flight, LifecycleError> {
        let key = flight_key(flight_id);
        finish(self.instance.transaction(|tx| {
            let current: Flight = tx_get(tx, &key)?
                .ok_or_else(|| abort(LifecycleError::FlightNotFound(flight_id.to_string())))?;
            let updated = apply(&current).map_err(abort)?;
            tx_put(tx, &key, &updated)?;
            Ok(updated)
        }))
    }

    fn cargo(&self, id: &str) -> Result<Option<Cargo>, StoreError> {
        self.get(&cargo_key(id))
    }

    fn all_cargo(&self) -> Result<Vec<Cargo>, StoreError> {
        self.scan("cargo/")
    }

    fn handler_actions(&self, cargo_id: &str) -> Result<Vec<HandlerAction>, StoreError> {
        self.scan(&action_prefix(cargo_id))
    }

    fn book_cargo(
        &self,
        flight_id: &str,
        book: Validate<'_, Flight, Cargo>,
    ) -> Result<Cargo, LifecycleError> {
        let key = flight_key(flight_id);
        finish(self.instance.transaction(|tx| {
            let flight: Flight = tx_get(tx, &key)?
                .ok_or_else(|| abort(LifecycleError::FlightNotFound(flight_id.to_string())))?;
            let cargo = book(&flight).map_err(abort)?;
            tx_put(tx, &cargo_key(&cargo.id), &cargo)?;
            Ok(cargo)
        }))
    }

    fn transition_cargo(
        &self,
        cargo_id: &str,
        apply: Validate<'_, Cargo, (Cargo, HandlerAction)>,
    ) -> Result<(Cargo, HandlerAction), LifecycleError> {
        let key = cargo_key(cargo_id);
        finish(self.instance.transaction(|tx| {
            let current: Cargo = tx_get(tx, &key)?
                .ok_or_else(|| abort(LifecycleError::NotFound(format!("cargo {cargo_id}"))))?;
            let (updated, action) = apply(&current).map_err(abort)?;

            let (hash, audit) = action.build().map_err(abort)?;
            let audit_key = format!(
                "{}{}/{}",
                action_prefix(cargo_id),
                action.timestamp.sort_key(),
                hash
            );
            tx.insert(audit_key.as_bytes(), audit)?;
            tx_put(tx, &key, &updated)?;
            Ok((updated, action))
        }))
    }

    fn update_cargo(
        &self,
        cargo_id: &str,
        apply: Validate<'_, Cargo, Cargo>,
    ) -> Result<Cargo, LifecycleError> {
        let key = cargo_key(cargo_id);
        finish(self.instance.transaction(|tx| {
            let current: Cargo = tx_get(tx, &key)?
                .ok_or_else(|| abort(LifecycleError::NotFound(format!("cargo {cargo_id}"))))?;
            let updated = apply(&current).map_err(abort)?;
            tx_put(tx, &key, &updated)?;
            Ok(updated)
        }))
    }

    fn remove_cargo(
        &self,
        cargo_id: &str,
        check: Validate<'_, Cargo, ()>,
    ) -> Result<Cargo, LifecycleError> {
        let key = cargo_key(cargo_id);
        finish(self.instance.transaction(|tx| {
            let current: Cargo = tx_get(tx, &key)?
                .ok_or_else(|| abort(LifecycleError::NotFound(format!("cargo {cargo_id}"))))?;
            check(&current).map_err(abort)?;
            tx.remove(key.as_bytes())?;
            Ok(current)
        }))
    }
}
