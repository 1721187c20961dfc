pub mod booking;
pub mod status;

pub use booking::{
    clean_guest_names, Booking, BookingAggregate, BookingDetail, BookingDetailAdditional,
    GuestAssignment, LineItem, LineItemGuests, NewAdditional, NewLineItem,
};
pub use status::{
    BookingProjection, BookingStatus, CancellationKind, PaymentProjection, PaymentStatus,
    StatusDimension, StatusTarget, TerminalStamp,
};
