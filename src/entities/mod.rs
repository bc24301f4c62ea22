mod booking;
mod event;
mod location;

pub use booking::{
    validate_fare, validate_message, validate_reason, validate_update, Booking, DriverOffer,
    Party, Status,
};
pub use event::{BookingEvent, EventKind};
pub use location::Coordinates;
