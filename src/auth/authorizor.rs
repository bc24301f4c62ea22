use oso::{Oso, OsoError, PolarClass};

use crate::auth::{Dispatch, User};
use crate::entities::Booking;

pub fn new() -> Result<Oso, OsoError> {
    let mut o = Oso::new();

    o.register_class(Dispatch::get_polar_class())?;
    o.register_class(User::get_polar_class())?;
    o.register_class(Booking::get_polar_class())?;

    o.load_str(include_str!("rules.polar"))?;

    Ok(o)
}

#[cfg(test)]
fn pending_booking(passenger_id: uuid::Uuid) -> Booking {
    use crate::entities::Coordinates;

    let pickup = Coordinates::new(14.5995, 120.9842);
    Booking::new(passenger_id, pickup, pickup, 50.0, chrono::Utc::now()).unwrap()
}

#[test]
fn dispatch_role_test() {
    use uuid::Uuid;

    let authorizor = new().unwrap();

    let passenger = User::passenger(Uuid::new_v4());
    let driver = User::driver(Uuid::new_v4());
    let system = User::new_system_user();

    let allowed = |user: &User, action: &str| {
        authorizor
            .is_allowed(user.clone(), action.to_string(), Dispatch)
            .unwrap()
    };

    assert!(allowed(&passenger, "create_booking"));
    assert!(!allowed(&passenger, "search_bookings"));

    assert!(allowed(&driver, "search_bookings"));
    assert!(allowed(&driver, "respond_to_bookings"));
    assert!(!allowed(&passenger, "respond_to_bookings"));
    assert!(allowed(&driver, "list_driver_bookings"));
    assert!(!allowed(&driver, "create_booking"));

    assert!(allowed(&system, "expire_bookings"));
    assert!(!allowed(&passenger, "expire_bookings"));
}

#[test]
fn booking_passenger_role_test() {
    use uuid::Uuid;

    let authorizor = new().unwrap();

    let passenger = User::passenger(Uuid::new_v4());
    let stranger = User::passenger(Uuid::new_v4());
    let booking = pending_booking(passenger.id);

    for action in ["read", "respond_to_offer", "cancel", "rate"] {
        let result = authorizor.is_allowed(passenger.clone(), action, booking.clone());
        assert_eq!(result.unwrap(), true, "{}", action);

        let result = authorizor.is_allowed(stranger.clone(), action, booking.clone());
        assert_eq!(result.unwrap(), false, "{}", action);
    }

    let result = authorizor.is_allowed(passenger.clone(), "respond", booking.clone());
    assert_eq!(result.unwrap(), false);

    let result = authorizor.is_allowed(passenger.clone(), "complete", booking.clone());
    assert_eq!(result.unwrap(), false);
}

#[test]
fn booking_candidate_and_driver_role_test() {
    use chrono::Utc;
    use uuid::Uuid;

    let authorizor = new().unwrap();

    let driver = User::driver(Uuid::new_v4());
    let other_driver = User::driver(Uuid::new_v4());
    let mut booking = pending_booking(Uuid::new_v4());

    // while pending every driver is a candidate

    for user in [&driver, &other_driver] {
        let result = authorizor.is_allowed(user.clone(), "respond", booking.clone());
        assert_eq!(result.unwrap(), true);

        let result = authorizor.is_allowed(user.clone(), "read", booking.clone());
        assert_eq!(result.unwrap(), true);

        let result = authorizor.is_allowed(user.clone(), "complete", booking.clone());
        assert_eq!(result.unwrap(), false);

        let result = authorizor.is_allowed(user.clone(), "cancel", booking.clone());
        assert_eq!(result.unwrap(), false);
    }

    booking.accept_directly(driver.id, Utc::now()).unwrap();

    // after acceptance only the assigned driver keeps access

    for action in ["read", "confirm_pickup", "complete", "cancel"] {
        let result = authorizor.is_allowed(driver.clone(), action, booking.clone());
        assert_eq!(result.unwrap(), true, "{}", action);

        let result = authorizor.is_allowed(other_driver.clone(), action, booking.clone());
        assert_eq!(result.unwrap(), false, "{}", action);
    }

    let result = authorizor.is_allowed(driver.clone(), "respond", booking.clone());
    assert_eq!(result.unwrap(), false);

    let result = authorizor.is_allowed(driver.clone(), "rate", booking.clone());
    assert_eq!(result.unwrap(), false);
}
