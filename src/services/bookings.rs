use rusqlite::Connection;

use crate::db::queries;
use crate::errors::AppError;
use crate::models::{Booking, BookingAggregate, LineItem};
use crate::state::AppState;

pub fn load_aggregate(conn: &Connection, booking: Booking) -> rusqlite::Result<BookingAggregate> {
    let details = queries::get_details_for_booking(conn, &booking.id)?;
    let mut line_items = Vec::with_capacity(details.len());
    for detail in details {
        let additionals = queries::get_additionals_for_detail(conn, &detail.id)?;
        line_items.push(LineItem {
            detail,
            additionals,
        });
    }
    Ok(BookingAggregate::new(booking, line_items))
}

pub async fn get_booking(state: &AppState, booking_id: &str) -> Result<BookingAggregate, AppError> {
    let db = state.db.lock().await;
    let booking = queries::get_booking(&db, booking_id)?
        .ok_or_else(|| AppError::NotFound(format!("booking {booking_id}")))?;
    Ok(load_aggregate(&db, booking)?)
}

pub async fn get_booking_by_code(state: &AppState, code: &str) -> Result<BookingAggregate, AppError> {
    let db = state.db.lock().await;
    let booking = queries::get_booking_by_code(&db, code)?
        .ok_or_else(|| AppError::NotFound(format!("booking code {code}")))?;
    Ok(load_aggregate(&db, booking)?)
}

/// Submitted bookings of an agent, newest first. The open cart is not
/// included; see `cart::find_cart`.
pub async fn list_for_agent(
    state: &AppState,
    agent_id: &str,
    limit: i64,
) -> Result<Vec<BookingAggregate>, AppError> {
    let db = state.db.lock().await;
    let bookings = queries::get_bookings_for_agent(&db, agent_id, limit)?;
    let mut aggregates = Vec::with_capacity(bookings.len());
    for booking in bookings {
        aggregates.push(load_aggregate(&db, booking)?);
    }
    Ok(aggregates)
}
