//! Service layer API for the cargo lifecycle
//!
//! Every operation takes the calling [`Actor`] explicitly. The actor is
//! re-resolved against the store on each call and checked against the role
//! capability table before anything is read or written.
use std::collections::HashMap;

use chrono::Utc;

use super::cargo::{BookingRequest, Cargo, CargoAmendment, CargoStatus, TimeStamp};
use super::config::Config;
use super::error::LifecycleError;
use super::fleet::{CargoType, Flight, FlightRow, FlightStatus, Location};
use super::handler_action::{ActionKind, CargoHistory, HandlerAction};
use super::identity::{Actor, CargoScope, Operation, PasswordHash, Role, User, UserSummary};
use super::pricing::PricingRule;
use super::store::{CargoStore, SledStore};
use super::utils::{CARGO_HRP, CARGO_TYPE_HRP, FLIGHT_HRP, LOCATION_HRP, USER_HRP, mint_id};

/// A cargo joined with the names the dashboards show next to it.
#[derive(Debug, Clone, PartialEq)]
pub struct CargoRow {
    pub cargo: Cargo,
    pub customer: String,
    pub cargo_type: String,
    pub origin_code: String,
    pub destination_code: String,
    pub departure: TimeStamp<Utc>,
}

pub struct CargoService<S: CargoStore> {
    store: S,
    pricing: PricingRule,
}

impl CargoService<SledStore> {
    pub fn open(config: &Config) -> Result<Self, LifecycleError> {
        let store = SledStore::open(&config.database)?;
        Ok(Self::new(store, config.pricing))
    }
}

impl<S: CargoStore> CargoService<S> {
    pub fn new(store: S, pricing: PricingRule) -> Self {
        Self { store, pricing }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn pricing(&self) -> &PricingRule {
        &self.pricing
    }

    /// Resolve the actor and check the capability table
    fn authorize(&self, actor: &Actor, operation: Operation) -> Result<User, LifecycleError> {
        match self.store.user(&actor.user_id)? {
            Some(user) if user.role == actor.role && user.role.permits(operation) => Ok(user),
            Some(user) => {
                log::warn!(
                    "denied {:?} to {} ({})",
                    operation,
                    user.username,
                    user.role.name()
                );
                Err(LifecycleError::Unauthorized {
                    role: Some(user.role),
                    operation,
                })
            }
            None => {
                log::warn!("denied {:?} to unknown user {}", operation, actor.user_id);
                Err(LifecycleError::Unauthorized {
                    role: None,
                    operation,
                })
            }
        }
    }

    fn new_user(
        &self,
        username: &str,
        password: &str,
        email: &str,
        role: Role,
    ) -> Result<User, LifecycleError> {
        Ok(User {
            id: mint_id(USER_HRP)?,
            username: username.to_string(),
            password_hash: PasswordHash::new(password),
            email: email.to_string(),
            role,
            created_at: TimeStamp::new(),
        })
    }

    // IDENTITY

    /// Create the first administrator. Only works on an empty user base.
    pub fn bootstrap_admin(
        &self,
        username: &str,
        password: &str,
        email: &str,
    ) -> Result<Actor, LifecycleError> {
        let user = self.new_user(username, password, email, Role::Admin)?;
        self.store.insert_first_user(&user)?;
        log::info!("bootstrapped administrator {}", user.username);
        Ok(user.actor())
    }

    /// Unknown users and wrong passwords give the same error.
    pub fn authenticate(&self, username: &str, password: &str) -> Result<Actor, LifecycleError> {
        match self.store.user_by_username(username)? {
            Some(user) if user.password_hash.verify(password) => {
                log::info!("{} logged in as {}", user.username, user.role.name());
                Ok(user.actor())
            }
            _ => {
                log::debug!("failed login for {username}");
                Err(LifecycleError::Unauthenticated)
            }
        }
    }

    pub fn resolve_user(&self, user_id: &str) -> Result<Actor, LifecycleError> {
        self.store
            .user(user_id)?
            .map(|user| user.actor())
            .ok_or_else(|| LifecycleError::NotFound(format!("user {user_id}")))
    }

    pub fn register_user(
        &self,
        actor: &Actor,
        username: &str,
        password: &str,
        email: &str,
        role: Role,
    ) -> Result<Actor, LifecycleError> {
        self.authorize(actor, Operation::ManageUsers)?;

        let user = self.new_user(username, password, email, role)?;
        self.store.insert_user(&user)?;
        log::info!("{} registered {} as {}", actor.username, username, role.name());
        Ok(user.actor())
    }

    pub fn list_users(&self, actor: &Actor) -> Result<Vec<UserSummary>, LifecycleError> {
        self.authorize(actor, Operation::ViewUsers)?;

        let mut users = self.store.users()?;
        users.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(users.iter().map(User::summary).collect())
    }

    // REFERENCE DATA

    pub fn add_location(&self, actor: &Actor, airport_code: &str) -> Result<Location, LifecycleError> {
        self.authorize(actor, Operation::ManageReferenceData)?;

        let location = Location {
            id: mint_id(LOCATION_HRP)?,
            airport_code: airport_code.to_uppercase(),
        };
        self.store.insert_location(&location)?;
        Ok(location)
    }

    pub fn list_locations(&self, actor: &Actor) -> Result<Vec<Location>, LifecycleError> {
        self.authorize(actor, Operation::ViewReferenceData)?;

        let mut locations = self.store.locations()?;
        locations.sort_by(|a, b| a.airport_code.cmp(&b.airport_code));
        Ok(locations)
    }

    pub fn add_cargo_type(&self, actor: &Actor, name: &str) -> Result<CargoType, LifecycleError> {
        self.authorize(actor, Operation::ManageReferenceData)?;

        let cargo_type = CargoType {
            id: mint_id(CARGO_TYPE_HRP)?,
            name: name.to_string(),
        };
        self.store.insert_cargo_type(&cargo_type)?;
        Ok(cargo_type)
    }

    pub fn list_cargo_types(&self, actor: &Actor) -> Result<Vec<CargoType>, LifecycleError> {
        self.authorize(actor, Operation::ViewReferenceData)?;

        let mut types = self.store.cargo_types()?;
        types.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(types)
    }

    // FLIGHTS

    pub fn schedule_flight(
        &self,
        actor: &Actor,
        aircraft_id: &str,
        origin_id: &str,
        destination_id: &str,
        departure_time: TimeStamp<Utc>,
        arrival_time: TimeStamp<Utc>,
    ) -> Result<Flight, LifecycleError> {
        self.authorize(actor, Operation::ManageFlights)?;
        self.require_location(origin_id)?;
        self.require_location(destination_id)?;

        let flight = Flight {
            id: mint_id(FLIGHT_HRP)?,
            aircraft_id: aircraft_id.to_string(),
            origin_id: origin_id.to_string(),
            destination_id: destination_id.to_string(),
            departure_time,
            arrival_time,
            status: FlightStatus::Scheduled,
        };
        if !flight.has_valid_schedule() {
            return Err(LifecycleError::InvalidSchedule);
        }

        self.store.insert_flight(&flight)?;
        log::info!("scheduled flight {} departing {}", flight.id, flight.departure_time);
        Ok(flight)
    }

    pub fn update_flight_status(
        &self,
        actor: &Actor,
        flight_id: &str,
        status: FlightStatus,
    ) -> Result<Flight, LifecycleError> {
        self.authorize(actor, Operation::ManageFlights)?;

        let flight = self
            .store
            .update_flight(flight_id, &|flight| Ok(Flight { status, ..flight.clone() }))?;
        log::info!("flight {} is now {:?}", flight_id, status);
        Ok(flight)
    }

    /// Move a flight's times. Booked cargo keeps its own booking data.
    pub fn reschedule_flight(
        &self,
        actor: &Actor,
        flight_id: &str,
        departure_time: TimeStamp<Utc>,
        arrival_time: TimeStamp<Utc>,
    ) -> Result<Flight, LifecycleError> {
        self.authorize(actor, Operation::ManageFlights)?;

        let flight = self.store.update_flight(flight_id, &|flight| {
            let updated = Flight {
                departure_time: departure_time.clone(),
                arrival_time: arrival_time.clone(),
                ..flight.clone()
            };
            if !updated.has_valid_schedule() {
                return Err(LifecycleError::InvalidSchedule);
            }
            Ok(updated)
        })?;
        log::info!("flight {} rescheduled to depart {}", flight.id, flight.departure_time);
        Ok(flight)
    }

    /// Point a flight at other airports. Cargo already booked keeps the route
    /// it was booked with.
    pub fn reroute_flight(
        &self,
        actor: &Actor,
        flight_id: &str,
        origin_id: &str,
        destination_id: &str,
    ) -> Result<Flight, LifecycleError> {
        self.authorize(actor, Operation::ManageFlights)?;
        self.require_location(origin_id)?;
        self.require_location(destination_id)?;

        let flight = self.store.update_flight(flight_id, &|flight| {
            Ok(Flight {
                origin_id: origin_id.to_string(),
                destination_id: destination_id.to_string(),
                ..flight.clone()
            })
        })?;
        log::info!("flight {} rerouted", flight.id);
        Ok(flight)
    }

    /// Flights still open for booking, earliest departure first.
    pub fn bookable_flights(&self, actor: &Actor) -> Result<Vec<FlightRow>, LifecycleError> {
        self.authorize(actor, Operation::ViewFlights)?;

        let codes = self.airport_codes()?;
        let mut rows: Vec<FlightRow> = self
            .store
            .flights()?
            .into_iter()
            .filter(Flight::is_bookable)
            .filter_map(|flight| {
                let origin_code = codes.get(&flight.origin_id)?.clone();
                let destination_code = codes.get(&flight.destination_id)?.clone();
                Some(FlightRow {
                    flight,
                    origin_code,
                    destination_code,
                })
            })
            .collect();
        rows.sort_by(|a, b| a.flight.departure_time.cmp(&b.flight.departure_time));
        Ok(rows)
    }

    // CARGO LIFECYCLE

    /// Move a cargo one step along `Pending -> InTransit -> Delivered` and
    /// record the handler action in the same commit.
    pub fn transition_status(
        &self,
        actor: &Actor,
        cargo_id: &str,
        target: CargoStatus,
        action: ActionKind,
        notes: &str,
    ) -> Result<(Cargo, HandlerAction), LifecycleError> {
        let handler = self.authorize(actor, Operation::TransitionStatus)?;

        let result = self.store.transition_cargo(cargo_id, &|cargo| {
            let updated = cargo.advance(target, action)?;
            let entry = HandlerAction::new(
                cargo.id.clone(),
                action,
                handler.id.clone(),
                notes.to_string(),
                TimeStamp::new(),
            );
            Ok((updated, entry))
        });

        match &result {
            Ok((cargo, _)) => log::info!(
                "{} moved {} to {} ({:?})",
                handler.username,
                cargo.id,
                cargo.status,
                action
            ),
            Err(e) => log::warn!("transition of {} rejected: {}", cargo_id, e),
        }
        result
    }

    /// Book a new cargo on a future flight. Price is `weight * rate`.
    pub fn create_booking(
        &self,
        actor: &Actor,
        request: &BookingRequest,
    ) -> Result<Cargo, LifecycleError> {
        let customer = self.authorize(actor, Operation::CreateBooking)?;

        let weight = self.pricing.weight(request.weight_kg)?;
        let calculated_price = self.pricing.quote(weight);
        self.require_cargo_type(&request.cargo_type_id)?;
        if let Some(origin_id) = &request.origin_id {
            self.require_location(origin_id)?;
        }
        if let Some(destination_id) = &request.destination_id {
            self.require_location(destination_id)?;
        }
        let cargo_id = mint_id(CARGO_HRP)?;

        let cargo = self.store.book_cargo(&request.flight_id, &|flight| {
            if flight.status == FlightStatus::Cancelled {
                return Err(LifecycleError::FlightCancelled(flight.id.clone()));
            }
            if flight.departure_time.is_past() || flight.status == FlightStatus::Completed {
                return Err(LifecycleError::FlightDeparted(flight.id.clone()));
            }

            Ok(Cargo {
                id: cargo_id.clone(),
                customer_id: customer.id.clone(),
                cargo_type_id: request.cargo_type_id.clone(),
                flight_id: flight.id.clone(),
                weight,
                origin_id: request
                    .origin_id
                    .clone()
                    .unwrap_or_else(|| flight.origin_id.clone()),
                destination_id: request
                    .destination_id
                    .clone()
                    .unwrap_or_else(|| flight.destination_id.clone()),
                status: CargoStatus::Pending,
                calculated_price,
                booked_at: TimeStamp::new(),
            })
        })?;

        log::info!(
            "{} booked {} on {} for {}",
            customer.username,
            cargo.id,
            cargo.flight_id,
            cargo.calculated_price
        );
        Ok(cargo)
    }

    /// Withdraw a booking. Only the owner, and only while still pending.
    pub fn cancel_booking(&self, actor: &Actor, cargo_id: &str) -> Result<Cargo, LifecycleError> {
        let customer = self.authorize(actor, Operation::CancelBooking)?;

        let cargo = self.store.remove_cargo(cargo_id, &|cargo| {
            if cargo.customer_id != customer.id {
                return Err(LifecycleError::Unauthorized {
                    role: Some(customer.role),
                    operation: Operation::CancelBooking,
                });
            }
            if !cargo.is_cancellable() {
                return Err(LifecycleError::NotCancellable(cargo.status));
            }
            Ok(())
        })?;

        log::info!("{} cancelled {}", customer.username, cargo.id);
        Ok(cargo)
    }

    pub fn amend_cargo(
        &self,
        actor: &Actor,
        cargo_id: &str,
        amendment: &CargoAmendment,
    ) -> Result<Cargo, LifecycleError> {
        self.authorize(actor, Operation::AmendCargo)?;

        let weight = amendment
            .weight_kg
            .map(|kg| self.pricing.weight(kg))
            .transpose()?;
        if let Some(cargo_type_id) = &amendment.cargo_type_id {
            self.require_cargo_type(cargo_type_id)?;
        }

        let cargo = self.store.update_cargo(cargo_id, &|cargo| {
            let mut updated = cargo.clone();
            if let Some(weight) = weight {
                updated.weight = weight;
                updated.calculated_price = self.pricing.quote(weight);
            }
            if let Some(cargo_type_id) = &amendment.cargo_type_id {
                updated.cargo_type_id = cargo_type_id.clone();
            }
            Ok(updated)
        })?;

        log::info!("{} amended {}", actor.username, cargo.id);
        Ok(cargo)
    }

    /// Cargo the actor's role may see: everything for admins, pending cargo by
    /// earliest departure for handlers, own cargo by latest departure for
    /// customers.
    pub fn list_visible_cargo(&self, actor: &Actor) -> Result<Vec<CargoRow>, LifecycleError> {
        let scope = actor.role.cargo_scope();
        let operation = match scope {
            CargoScope::All => Operation::ViewAllCargo,
            CargoScope::Pending => Operation::ViewPendingCargo,
            CargoScope::Owned => Operation::ViewOwnCargo,
        };
        let user = self.authorize(actor, operation)?;

        let cargo = self.store.all_cargo()?.into_iter().filter(|c| match scope {
            CargoScope::All => true,
            CargoScope::Pending => c.status == CargoStatus::Pending,
            CargoScope::Owned => c.customer_id == user.id,
        });
        let mut rows = self.join_rows(cargo)?;

        match scope {
            CargoScope::All => rows.sort_by(|a, b| a.cargo.booked_at.cmp(&b.cargo.booked_at)),
            CargoScope::Pending => rows.sort_by(|a, b| a.departure.cmp(&b.departure)),
            CargoScope::Owned => rows.sort_by(|a, b| b.departure.cmp(&a.departure)),
        }
        Ok(rows)
    }

    /// The handling trail of one cargo. Customers only see their own.
    pub fn cargo_history(&self, actor: &Actor, cargo_id: &str) -> Result<CargoHistory, LifecycleError> {
        let operation = match actor.role.cargo_scope() {
            CargoScope::Owned => Operation::ViewOwnCargo,
            _ => Operation::ViewHistory,
        };
        let user = self.authorize(actor, operation)?;

        let cargo = self
            .store
            .cargo(cargo_id)?
            .ok_or_else(|| LifecycleError::NotFound(format!("cargo {cargo_id}")))?;
        if operation == Operation::ViewOwnCargo && cargo.customer_id != user.id {
            return Err(LifecycleError::Unauthorized {
                role: Some(user.role),
                operation,
            });
        }

        let mut history = CargoHistory::new(cargo.id);
        for entry in self.store.handler_actions(cargo_id)? {
            history.insert_action(entry);
        }
        Ok(history)
    }

    // HELPERS

    fn require_location(&self, id: &str) -> Result<Location, LifecycleError> {
        self.store
            .location(id)?
            .ok_or_else(|| LifecycleError::NotFound(format!("location {id}")))
    }

    fn require_cargo_type(&self, id: &str) -> Result<CargoType, LifecycleError> {
        self.store
            .cargo_type(id)?
            .ok_or_else(|| LifecycleError::NotFound(format!("cargo type {id}")))
    }

    fn airport_codes(&self) -> Result<HashMap<String, String>, LifecycleError> {
        Ok(self
            .store
            .locations()?
            .into_iter()
            .map(|l| (l.id, l.airport_code))
            .collect())
    }

    // rows whose references no longer resolve are dropped, like an inner join
    fn join_rows(
        &self,
        cargo: impl Iterator<Item = Cargo>,
    ) -> Result<Vec<CargoRow>, LifecycleError> {
        let codes = self.airport_codes()?;
        let types: HashMap<String, String> = self
            .store
            .cargo_types()?
            .into_iter()
            .map(|t| (t.id, t.name))
            .collect();
        let customers: HashMap<String, String> = self
            .store
            .users()?
            .into_iter()
            .map(|u| (u.id, u.username))
            .collect();
        let departures: HashMap<String, TimeStamp<Utc>> = self
            .store
            .flights()?
            .into_iter()
            .map(|f| (f.id, f.departure_time))
            .collect();

        let rows = cargo
            .filter_map(|cargo| {
                let row = CargoRow {
                    customer: customers.get(&cargo.customer_id)?.clone(),
                    cargo_type: types.get(&cargo.cargo_type_id)?.clone(),
                    origin_code: codes.get(&cargo.origin_id)?.clone(),
                    destination_code: codes.get(&cargo.destination_id)?.clone(),
                    departure: departures.get(&cargo.flight_id)?.clone(),
                    cargo,
                };
                Some(row)
            })
            .collect::<Vec<_>>();
        Ok(rows)
    }
}
