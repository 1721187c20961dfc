pub mod bookings;
pub mod cache;
pub mod cart;
pub mod checkout;
pub mod clock;
pub mod code_allocator;
pub mod notification;
pub mod status;
