use std::sync::Arc;

use anyhow::Context;
use cargo_lifecycle::{
    cargo::{BookingRequest, CargoAmendment, CargoStatus, Price, TimeStamp},
    config::{Config, DatabaseConfig},
    error::LifecycleError,
    fleet::{CargoType, Flight, FlightStatus},
    handler_action::ActionKind,
    identity::{Actor, Role},
    pricing::PricingRule,
    service::CargoService,
    store::{CargoStore, SledStore},
};
use sled::open;
use tempfile::{TempDir, tempdir}; // Use for test db cleanup.

struct Desk {
    service: CargoService<SledStore>,
    admin: Actor,
    handler: Actor,
    customer: Actor,
    other_customer: Actor,
    cargo_type: CargoType,
    flight: Flight,
    // keeps the database directory alive for the length of the test
    _dir: TempDir,
}

// Sled holds a file lock on the database, so every test gets its own
// database inside a temporary directory.
fn desk(db_name: &str) -> anyhow::Result<Desk> {
    let _ = env_logger::builder().is_test(true).try_init();

    let dir = tempdir()?;
    let db = Arc::new(open(dir.path().join(db_name))?);
    let service = CargoService::new(SledStore::new(db), PricingRule::default());

    let admin = service.bootstrap_admin("root", "root-pw", "root@cargo.test")?;
    let handler = service.register_user(
        &admin,
        "hank",
        "hank-pw",
        "hank@cargo.test",
        Role::CargoHandler,
    )?;
    let customer =
        service.register_user(&admin, "cora", "cora-pw", "cora@cargo.test", Role::Customer)?;
    let other_customer =
        service.register_user(&admin, "olaf", "olaf-pw", "olaf@cargo.test", Role::Customer)?;

    let ams = service.add_location(&admin, "ams")?;
    let jfk = service.add_location(&admin, "JFK")?;
    let cargo_type = service.add_cargo_type(&admin, "Perishable")?;
    let flight = service.schedule_flight(
        &admin,
        "PH-BXA",
        &ams.id,
        &jfk.id,
        TimeStamp::hours_from_now(48),
        TimeStamp::hours_from_now(56),
    )?;

    Ok(Desk {
        service,
        admin,
        handler,
        customer,
        other_customer,
        cargo_type,
        flight,
        _dir: dir,
    })
}

impl Desk {
    fn book(&self, customer: &Actor, weight_kg: f64) -> anyhow::Result<String> {
        let request = BookingRequest::new(&self.cargo_type.id, &self.flight.id, weight_kg);
        let cargo = self
            .service
            .create_booking(customer, &request)
            .context("Booking failed: ")?;
        Ok(cargo.id)
    }

    fn second_flight(&self, hours_from_now: i64) -> anyhow::Result<Flight> {
        Ok(self.service.schedule_flight(
            &self.admin,
            "PH-BXB",
            &self.flight.origin_id,
            &self.flight.destination_id,
            TimeStamp::hours_from_now(hours_from_now),
            TimeStamp::hours_from_now(hours_from_now + 8),
        )?)
    }
}

#[test]
fn handler_picks_up_pending_cargo() -> anyhow::Result<()> {
    let desk = desk("pickup.db")?;
    let cargo_id = desk.book(&desk.customer, 250.0)?;

    let (cargo, entry) = desk
        .service
        .transition_status(
            &desk.handler,
            &cargo_id,
            CargoStatus::InTransit,
            ActionKind::Pickup,
            "ok",
        )
        .context("Pickup failed: ")?;

    assert_eq!(cargo.status, CargoStatus::InTransit);
    assert_eq!(entry.action, ActionKind::Pickup);
    assert_eq!(entry.performed_by, desk.handler.user_id);

    let history = desk.service.cargo_history(&desk.handler, &cargo_id)?;
    assert_eq!(history.actions.len(), 1);
    assert_eq!(history.actions[0].notes, "ok");

    // same call again must not apply twice
    let again = desk.service.transition_status(
        &desk.handler,
        &cargo_id,
        CargoStatus::InTransit,
        ActionKind::Pickup,
        "ok",
    );
    assert!(matches!(
        again,
        Err(LifecycleError::InvalidTransition {
            from: CargoStatus::InTransit,
            ..
        })
    ));
    assert_eq!(
        desk.service.cargo_history(&desk.handler, &cargo_id)?.actions.len(),
        1
    );

    Ok(())
}

#[test]
fn cargo_travels_to_delivered() -> anyhow::Result<()> {
    let desk = desk("delivered.db")?;
    let cargo_id = desk.book(&desk.customer, 40.0)?;

    desk.service.transition_status(
        &desk.handler,
        &cargo_id,
        CargoStatus::InTransit,
        ActionKind::Load,
        "loaded on PH-BXA",
    )?;
    let (cargo, _) = desk.service.transition_status(
        &desk.admin,
        &cargo_id,
        CargoStatus::Delivered,
        ActionKind::Deliver,
        "signed for",
    )?;
    assert_eq!(cargo.status, CargoStatus::Delivered);

    // terminal
    for action in ActionKind::ALL {
        for target in [CargoStatus::InTransit, CargoStatus::Delivered] {
            assert!(
                desk.service
                    .transition_status(&desk.handler, &cargo_id, target, action, "")
                    .is_err()
            );
        }
    }

    let history = desk.service.cargo_history(&desk.customer, &cargo_id)?;
    assert_eq!(history.derived_status()?, CargoStatus::Delivered);

    Ok(())
}

#[test]
fn skipping_in_transit_is_rejected() -> anyhow::Result<()> {
    let desk = desk("skip.db")?;
    let cargo_id = desk.book(&desk.customer, 40.0)?;

    let res = desk.service.transition_status(
        &desk.handler,
        &cargo_id,
        CargoStatus::Delivered,
        ActionKind::Deliver,
        "",
    );
    assert!(matches!(res, Err(LifecycleError::InvalidTransition { .. })));

    // action does not match the requested step
    let res = desk.service.transition_status(
        &desk.handler,
        &cargo_id,
        CargoStatus::InTransit,
        ActionKind::Unload,
        "",
    );
    assert!(matches!(res, Err(LifecycleError::InvalidTransition { .. })));

    let cargo = desk.service.store().cargo(&cargo_id)?.context("cargo missing")?;
    assert_eq!(cargo.status, CargoStatus::Pending);

    Ok(())
}

#[test]
fn unknown_cargo_is_not_found() -> anyhow::Result<()> {
    let desk = desk("unknown.db")?;

    let res = desk.service.transition_status(
        &desk.handler,
        "cargo_nope",
        CargoStatus::InTransit,
        ActionKind::Pickup,
        "",
    );
    assert!(matches!(res, Err(LifecycleError::NotFound(_))));

    Ok(())
}

#[test]
fn customers_never_move_cargo() -> anyhow::Result<()> {
    let desk = desk("customer_transition.db")?;
    let cargo_id = desk.book(&desk.customer, 10.0)?;

    let res = desk.service.transition_status(
        &desk.customer,
        &cargo_id,
        CargoStatus::InTransit,
        ActionKind::Pickup,
        "",
    );
    assert!(matches!(res, Err(LifecycleError::Unauthorized { .. })));

    desk.service.transition_status(
        &desk.handler,
        &cargo_id,
        CargoStatus::InTransit,
        ActionKind::Pickup,
        "",
    )?;
    let res = desk.service.transition_status(
        &desk.customer,
        &cargo_id,
        CargoStatus::Delivered,
        ActionKind::Deliver,
        "",
    );
    assert!(matches!(res, Err(LifecycleError::Unauthorized { .. })));

    // unknown cargo still reports the missing permission first
    let res = desk.service.transition_status(
        &desk.customer,
        "cargo_nope",
        CargoStatus::InTransit,
        ActionKind::Pickup,
        "",
    );
    assert!(matches!(res, Err(LifecycleError::Unauthorized { .. })));

    Ok(())
}

#[test]
fn claimed_role_must_match_stored_role() -> anyhow::Result<()> {
    let desk = desk("spoof.db")?;
    let cargo_id = desk.book(&desk.customer, 10.0)?;

    let spoofed = Actor {
        role: Role::CargoHandler,
        ..desk.customer.clone()
    };
    let res = desk.service.transition_status(
        &spoofed,
        &cargo_id,
        CargoStatus::InTransit,
        ActionKind::Pickup,
        "",
    );
    assert!(matches!(
        res,
        Err(LifecycleError::Unauthorized {
            role: Some(Role::Customer),
            ..
        })
    ));

    Ok(())
}

#[test]
fn booking_prices_by_weight_and_snapshots_route() -> anyhow::Result<()> {
    let desk = desk("price.db")?;
    let request = BookingRequest::new(&desk.cargo_type.id, &desk.flight.id, 100.0);

    let cargo = desk.service.create_booking(&desk.customer, &request)?;

    assert_eq!(cargo.calculated_price, Price::from_units(1_000));
    assert_eq!(cargo.status, CargoStatus::Pending);
    assert_eq!(cargo.customer_id, desk.customer.user_id);
    assert_eq!(cargo.origin_id, desk.flight.origin_id);
    assert_eq!(cargo.destination_id, desk.flight.destination_id);

    Ok(())
}

#[test]
fn booking_rejects_bad_weights() -> anyhow::Result<()> {
    let desk = desk("weights.db")?;

    for weight in [0.0, -5.0, 10_001.0, f64::NAN] {
        let request = BookingRequest::new(&desk.cargo_type.id, &desk.flight.id, weight);
        let res = desk.service.create_booking(&desk.customer, &request);
        assert!(matches!(res, Err(LifecycleError::InvalidWeight(_))));
    }
    assert!(desk.service.store().all_cargo()?.is_empty());

    Ok(())
}

#[test]
fn booking_requires_an_open_flight() -> anyhow::Result<()> {
    let desk = desk("flights.db")?;

    let missing = BookingRequest::new(&desk.cargo_type.id, "flight_nope", 10.0);
    assert!(matches!(
        desk.service.create_booking(&desk.customer, &missing),
        Err(LifecycleError::FlightNotFound(_))
    ));

    let departed = desk.second_flight(-6)?;
    let request = BookingRequest::new(&desk.cargo_type.id, &departed.id, 10.0);
    assert!(matches!(
        desk.service.create_booking(&desk.customer, &request),
        Err(LifecycleError::FlightDeparted(_))
    ));

    let cancelled = desk.second_flight(12)?;
    desk.service
        .update_flight_status(&desk.admin, &cancelled.id, FlightStatus::Cancelled)?;
    let request = BookingRequest::new(&desk.cargo_type.id, &cancelled.id, 10.0);
    assert!(matches!(
        desk.service.create_booking(&desk.customer, &request),
        Err(LifecycleError::FlightCancelled(_))
    ));

    let unknown_type = BookingRequest::new("ctype_nope", &desk.flight.id, 10.0);
    assert!(matches!(
        desk.service.create_booking(&desk.customer, &unknown_type),
        Err(LifecycleError::NotFound(_))
    ));

    Ok(())
}

#[test]
fn only_customers_book() -> anyhow::Result<()> {
    let desk = desk("who_books.db")?;
    let request = BookingRequest::new(&desk.cargo_type.id, &desk.flight.id, 10.0);

    for actor in [&desk.admin, &desk.handler] {
        assert!(matches!(
            desk.service.create_booking(actor, &request),
            Err(LifecycleError::Unauthorized { .. })
        ));
    }

    Ok(())
}

#[test]
fn visibility_follows_role() -> anyhow::Result<()> {
    let desk = desk("visibility.db")?;
    let later = desk.second_flight(96)?;

    let early = desk.book(&desk.customer, 10.0)?;
    let late = desk.service.create_booking(
        &desk.customer,
        &BookingRequest::new(&desk.cargo_type.id, &later.id, 20.0),
    )?;
    let foreign = desk.book(&desk.other_customer, 30.0)?;
    let moving = desk.book(&desk.other_customer, 40.0)?;
    desk.service.transition_status(
        &desk.handler,
        &moving,
        CargoStatus::InTransit,
        ActionKind::Pickup,
        "",
    )?;

    // customer: own cargo only, latest departure first
    let rows = desk.service.list_visible_cargo(&desk.customer)?;
    let ids: Vec<_> = rows.iter().map(|r| r.cargo.id.clone()).collect();
    assert_eq!(ids, vec![late.id.clone(), early.clone()]);
    assert!(rows.iter().all(|r| r.cargo.customer_id == desk.customer.user_id));
    assert_eq!(rows[1].origin_code, "AMS");
    assert_eq!(rows[1].destination_code, "JFK");
    assert_eq!(rows[1].cargo_type, "Perishable");
    assert_eq!(rows[1].customer, "cora");

    // handler: pending only, earliest departure first
    let rows = desk.service.list_visible_cargo(&desk.handler)?;
    assert!(rows.iter().all(|r| r.cargo.status == CargoStatus::Pending));
    assert_eq!(rows.len(), 3);
    assert_eq!(rows.last().map(|r| r.cargo.id.clone()), Some(late.id));
    assert!(rows.windows(2).all(|w| w[0].departure <= w[1].departure));
    assert!(!rows.iter().any(|r| r.cargo.id == moving));

    // admin: everything
    let rows = desk.service.list_visible_cargo(&desk.admin)?;
    assert_eq!(rows.len(), 4);
    assert!(rows.iter().any(|r| r.cargo.id == foreign));

    Ok(())
}

#[test]
fn cancelling_a_booking() -> anyhow::Result<()> {
    let desk = desk("cancel.db")?;
    let mine = desk.book(&desk.customer, 10.0)?;
    let shipped = desk.book(&desk.customer, 10.0)?;

    assert!(matches!(
        desk.service.cancel_booking(&desk.other_customer, &mine),
        Err(LifecycleError::Unauthorized { .. })
    ));
    assert!(matches!(
        desk.service.cancel_booking(&desk.handler, &mine),
        Err(LifecycleError::Unauthorized { .. })
    ));

    desk.service.transition_status(
        &desk.handler,
        &shipped,
        CargoStatus::InTransit,
        ActionKind::Pickup,
        "",
    )?;
    assert!(matches!(
        desk.service.cancel_booking(&desk.customer, &shipped),
        Err(LifecycleError::NotCancellable(CargoStatus::InTransit))
    ));

    let removed = desk.service.cancel_booking(&desk.customer, &mine)?;
    assert_eq!(removed.id, mine);
    assert!(desk.service.store().cargo(&mine)?.is_none());
    assert!(matches!(
        desk.service.cancel_booking(&desk.customer, &mine),
        Err(LifecycleError::NotFound(_))
    ));

    Ok(())
}

#[test]
fn admin_amendment_reprices() -> anyhow::Result<()> {
    let desk = desk("amend.db")?;
    let cargo_id = desk.book(&desk.customer, 10.0)?;
    let fragile = desk.service.add_cargo_type(&desk.admin, "Fragile")?;

    let amendment = CargoAmendment::new()
        .set_weight(12.5)
        .set_cargo_type(&fragile.id);
    let cargo = desk.service.amend_cargo(&desk.admin, &cargo_id, &amendment)?;
    assert_eq!(cargo.calculated_price, Price::from_units(125));
    assert_eq!(cargo.cargo_type_id, fragile.id);
    assert_eq!(cargo.status, CargoStatus::Pending);

    assert!(matches!(
        desk.service.amend_cargo(&desk.handler, &cargo_id, &amendment),
        Err(LifecycleError::Unauthorized { .. })
    ));
    assert!(matches!(
        desk.service
            .amend_cargo(&desk.admin, &cargo_id, &CargoAmendment::new().set_weight(0.0)),
        Err(LifecycleError::InvalidWeight(_))
    ));

    Ok(())
}

#[test]
fn concurrent_pickups_apply_once() -> anyhow::Result<()> {
    let desk = desk("race.db")?;
    let cargo_id = desk.book(&desk.customer, 10.0)?;

    let results: Vec<_> = std::thread::scope(|s| {
        let workers: Vec<_> = [ActionKind::Pickup, ActionKind::Load]
            .into_iter()
            .map(|action| {
                let desk = &desk;
                let cargo_id = &cargo_id;
                s.spawn(move || {
                    desk.service
                        .transition_status(
                            &desk.handler,
                            cargo_id,
                            CargoStatus::InTransit,
                            action,
                            "",
                        )
                        .is_ok()
                })
            })
            .collect();
        workers
            .into_iter()
            .map(|w| w.join().unwrap_or(false))
            .collect()
    });

    assert_eq!(results.iter().filter(|ok| **ok).count(), 1);
    assert_eq!(
        desk.service.cargo_history(&desk.admin, &cargo_id)?.actions.len(),
        1
    );

    Ok(())
}

#[test]
fn bookable_flights_are_future_and_open() -> anyhow::Result<()> {
    let desk = desk("bookable.db")?;
    let earlier = desk.second_flight(6)?;
    desk.second_flight(-3)?;
    let cancelled = desk.second_flight(10)?;
    desk.service
        .update_flight_status(&desk.admin, &cancelled.id, FlightStatus::Cancelled)?;

    let rows = desk.service.bookable_flights(&desk.customer)?;
    let ids: Vec<_> = rows.iter().map(|r| r.flight.id.clone()).collect();
    assert_eq!(ids, vec![earlier.id, desk.flight.id.clone()]);
    assert!(rows[0].to_string().starts_with("AMS -> JFK ("));

    let codes: Vec<_> = desk
        .service
        .list_locations(&desk.customer)?
        .into_iter()
        .map(|l| l.airport_code)
        .collect();
    assert_eq!(codes, vec!["AMS", "JFK"]);
    let types = desk.service.list_cargo_types(&desk.handler)?;
    assert_eq!(types, vec![desk.cargo_type.clone()]);

    Ok(())
}

#[test]
fn flight_management_is_admin_only() -> anyhow::Result<()> {
    let desk = desk("flight_admin.db")?;

    let res = desk.service.schedule_flight(
        &desk.admin,
        "PH-BXC",
        &desk.flight.origin_id,
        &desk.flight.destination_id,
        TimeStamp::hours_from_now(10),
        TimeStamp::hours_from_now(9),
    );
    assert!(matches!(res, Err(LifecycleError::InvalidSchedule)));

    let res = desk.service.update_flight_status(
        &desk.handler,
        &desk.flight.id,
        FlightStatus::Delayed,
    );
    assert!(matches!(res, Err(LifecycleError::Unauthorized { .. })));

    let res = desk.service.add_location(&desk.customer, "LHR");
    assert!(matches!(res, Err(LifecycleError::Unauthorized { .. })));

    // codes are stored uppercase, so "ams" and "AMS" are the same airport
    let res = desk.service.add_location(&desk.admin, "AMS");
    assert!(matches!(res, Err(LifecycleError::LocationTaken(code)) if code == "AMS"));
    assert_eq!(desk.service.list_locations(&desk.admin)?.len(), 2);

    let res = desk.service.reschedule_flight(
        &desk.handler,
        &desk.flight.id,
        TimeStamp::hours_from_now(60),
        TimeStamp::hours_from_now(66),
    );
    assert!(matches!(res, Err(LifecycleError::Unauthorized { .. })));

    let flight =
        desk.service
            .update_flight_status(&desk.admin, &desk.flight.id, FlightStatus::Delayed)?;
    assert_eq!(flight.status, FlightStatus::Delayed);

    Ok(())
}

#[test]
fn flight_edits_leave_booked_cargo_alone() -> anyhow::Result<()> {
    let desk = desk("flight_edit.db")?;
    let cargo_id = desk.book(&desk.customer, 20.0)?;
    let lhr = desk.service.add_location(&desk.admin, "LHR")?;
    let sin = desk.service.add_location(&desk.admin, "SIN")?;

    let flight = desk
        .service
        .reroute_flight(&desk.admin, &desk.flight.id, &lhr.id, &sin.id)
        .context("Reroute failed: ")?;
    assert_eq!(flight.origin_id, lhr.id);

    let res = desk.service.reschedule_flight(
        &desk.admin,
        &desk.flight.id,
        TimeStamp::hours_from_now(70),
        TimeStamp::hours_from_now(70),
    );
    assert!(matches!(res, Err(LifecycleError::InvalidSchedule)));

    let later = TimeStamp::hours_from_now(72);
    let flight = desk.service.reschedule_flight(
        &desk.admin,
        &desk.flight.id,
        later.clone(),
        TimeStamp::hours_from_now(80),
    )?;
    assert_eq!(flight.departure_time, later);

    // the booking keeps the route it was made with
    let cargo = desk.service.store().cargo(&cargo_id)?.context("cargo missing")?;
    assert_eq!(cargo.origin_id, desk.flight.origin_id);
    assert_eq!(cargo.destination_id, desk.flight.destination_id);

    let rows = desk.service.list_visible_cargo(&desk.customer)?;
    assert_eq!(rows[0].origin_code, "AMS");
    assert_eq!(rows[0].destination_code, "JFK");
    assert_eq!(rows[0].departure, later);

    Ok(())
}

#[test]
fn login_and_user_administration() -> anyhow::Result<()> {
    let desk = desk("login.db")?;

    let actor = desk.service.authenticate("hank", "hank-pw")?;
    assert_eq!(actor, desk.handler);
    assert_eq!(desk.service.resolve_user(&desk.handler.user_id)?, desk.handler);

    // wrong password and unknown user are indistinguishable
    assert!(matches!(
        desk.service.authenticate("hank", "nope"),
        Err(LifecycleError::Unauthenticated)
    ));
    assert!(matches!(
        desk.service.authenticate("nobody", "hank-pw"),
        Err(LifecycleError::Unauthenticated)
    ));

    assert!(matches!(
        desk.service.bootstrap_admin("root2", "pw", "root2@cargo.test"),
        Err(LifecycleError::AlreadyBootstrapped)
    ));
    assert!(matches!(
        desk.service
            .register_user(&desk.admin, "cora", "pw", "x@cargo.test", Role::Customer),
        Err(LifecycleError::UsernameTaken(_))
    ));
    assert!(matches!(
        desk.service
            .register_user(&desk.handler, "eve", "pw", "eve@cargo.test", Role::Admin),
        Err(LifecycleError::Unauthorized { .. })
    ));

    let users = desk.service.list_users(&desk.admin)?;
    let names: Vec<_> = users.iter().map(|u| u.username.as_str()).collect();
    assert_eq!(names, vec!["root", "hank", "cora", "olaf"]);
    assert_eq!(users[1].role, Role::CargoHandler);
    assert!(matches!(
        desk.service.list_users(&desk.customer),
        Err(LifecycleError::Unauthorized { .. })
    ));

    Ok(())
}

#[test]
fn history_is_private_to_the_owner() -> anyhow::Result<()> {
    let desk = desk("history.db")?;
    let cargo_id = desk.book(&desk.customer, 10.0)?;

    assert!(desk.service.cargo_history(&desk.customer, &cargo_id).is_ok());
    assert!(matches!(
        desk.service.cargo_history(&desk.other_customer, &cargo_id),
        Err(LifecycleError::Unauthorized { .. })
    ));

    Ok(())
}

#[test]
fn state_survives_reopen() -> anyhow::Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempdir()?;
    let config = Config {
        database: DatabaseConfig {
            path: dir.path().join("reopen.db"),
            temporary: false,
        },
        pricing: PricingRule::default(),
    };

    let cargo_id = {
        let service = CargoService::open(&config)?;
        let admin = service.bootstrap_admin("root", "pw", "root@cargo.test")?;
        let customer =
            service.register_user(&admin, "cora", "pw", "cora@cargo.test", Role::Customer)?;
        let a = service.add_location(&admin, "AMS")?;
        let b = service.add_location(&admin, "CDG")?;
        let ct = service.add_cargo_type(&admin, "General")?;
        let flight = service.schedule_flight(
            &admin,
            "PH-BXA",
            &a.id,
            &b.id,
            TimeStamp::hours_from_now(24),
            TimeStamp::hours_from_now(26),
        )?;
        let cargo = service
            .create_booking(&customer, &BookingRequest::new(&ct.id, &flight.id, 3.0))?;
        service.store().flush()?;
        cargo.id
    };

    let service = CargoService::open(&config)?;
    let customer = service.authenticate("cora", "pw")?;
    let rows = service.list_visible_cargo(&customer)?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].cargo.id, cargo_id);
    assert_eq!(rows[0].destination_code, "CDG");

    Ok(())
}
