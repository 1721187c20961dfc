use chrono::NaiveDateTime;
use rusqlite::{Connection, TransactionBehavior};

use crate::db::queries;
use crate::errors::AppError;
use crate::models::{
    clean_guest_names, Booking, BookingAggregate, BookingDetail, BookingDetailAdditional,
    BookingStatus, GuestAssignment, NewAdditional, NewLineItem, PaymentStatus,
};
use crate::services::bookings::load_aggregate;
use crate::state::AppState;

/// Returns the agent's open cart, creating an empty one if needed.
pub async fn get_or_create_cart(state: &AppState, agent_id: &str) -> Result<String, AppError> {
    if agent_id.trim().is_empty() {
        return Err(AppError::InvalidInput("agent id is required".to_string()));
    }

    let db = state.db.lock().await;
    if let Some(cart) = queries::get_cart_for_agent(&db, agent_id)? {
        return Ok(cart.id);
    }

    let now = state.clock.now_utc_naive();
    let booking = Booking {
        id: uuid::Uuid::new_v4().to_string(),
        agent_id: agent_id.to_string(),
        code: None,
        submitted_at: None,
        created_at: now,
        updated_at: now,
    };
    queries::insert_booking(&db, &booking)?;

    tracing::info!(agent_id, booking_id = %booking.id, "created cart");
    Ok(booking.id)
}

pub async fn find_cart(
    state: &AppState,
    agent_id: &str,
) -> Result<Option<BookingAggregate>, AppError> {
    let db = state.db.lock().await;
    match queries::get_cart_for_agent(&db, agent_id)? {
        Some(cart) => Ok(Some(load_aggregate(&db, cart)?)),
        None => Ok(None),
    }
}

/// Appends draft line items to the cart. Room/price validity and
/// availability must have been checked by the caller.
pub async fn add_line_items(
    state: &AppState,
    booking_id: &str,
    items: Vec<NewLineItem>,
) -> Result<Vec<String>, AppError> {
    if items.is_empty() {
        return Err(AppError::InvalidInput("no line items given".to_string()));
    }
    for item in &items {
        validate_line_item(item)?;
    }

    let now = state.clock.now_utc_naive();
    let mut db = state.db.lock().await;
    let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;
    load_cart(&tx, booking_id)?;

    let mut ids = Vec::with_capacity(items.len());
    for item in items {
        let detail = BookingDetail {
            id: uuid::Uuid::new_v4().to_string(),
            booking_id: booking_id.to_string(),
            room_price_id: item.room_price_id,
            check_in: item.check_in,
            check_out: item.check_out,
            guest_names: clean_guest_names(&item.guest_names),
            code: None,
            status_booking: BookingStatus::Draft,
            status_payment: PaymentStatus::Unpaid,
            admin_notes: None,
            additional_notes: item.additional_notes.filter(|n| !n.trim().is_empty()),
            receipt_url: None,
            approved_at: None,
            rejected_at: None,
            cancelled_at: None,
            created_at: now,
            updated_at: now,
        };
        queries::insert_detail(&tx, &detail)?;
        insert_additionals(&tx, &detail.id, &item.additionals, &now)?;
        ids.push(detail.id);
    }
    queries::touch_booking(&tx, booking_id, &now)?;
    tx.commit()?;

    tracing::info!(booking_id, count = ids.len(), "added line items to cart");
    Ok(ids)
}

pub async fn remove_line_item(
    state: &AppState,
    booking_id: &str,
    line_item_id: &str,
) -> Result<(), AppError> {
    let now = state.clock.now_utc_naive();
    let mut db = state.db.lock().await;
    let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;

    load_cart(&tx, booking_id)?;
    let detail = owned_detail(&tx, booking_id, line_item_id)?;
    ensure_draft(&detail)?;

    if !queries::delete_draft_detail(&tx, line_item_id)? {
        return Err(not_draft(line_item_id));
    }
    queries::touch_booking(&tx, booking_id, &now)?;
    tx.commit()?;

    tracing::info!(booking_id, line_item_id, "removed line item from cart");
    Ok(())
}

pub async fn assign_guests(
    state: &AppState,
    booking_id: &str,
    assignment: GuestAssignment,
) -> Result<(), AppError> {
    let now = state.clock.now_utc_naive();
    let mut db = state.db.lock().await;
    let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;

    load_cart(&tx, booking_id)?;
    apply_guest_assignment(&tx, booking_id, &assignment, &now)?;
    queries::touch_booking(&tx, booking_id, &now)?;
    tx.commit()?;

    tracing::info!(booking_id, "assigned guests");
    Ok(())
}

/// Replaces every add-on of a draft line item.
pub async fn replace_additionals(
    state: &AppState,
    booking_id: &str,
    line_item_id: &str,
    additionals: Vec<NewAdditional>,
) -> Result<(), AppError> {
    for additional in &additionals {
        validate_additional(additional)?;
    }

    let now = state.clock.now_utc_naive();
    let mut db = state.db.lock().await;
    let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;

    load_cart(&tx, booking_id)?;
    let detail = owned_detail(&tx, booking_id, line_item_id)?;
    ensure_draft(&detail)?;

    queries::delete_additionals_for_detail(&tx, line_item_id)?;
    insert_additionals(&tx, line_item_id, &additionals, &now)?;
    queries::touch_booking(&tx, booking_id, &now)?;
    tx.commit()?;

    Ok(())
}

pub async fn set_additional_notes(
    state: &AppState,
    booking_id: &str,
    line_item_id: &str,
    notes: Option<String>,
) -> Result<(), AppError> {
    let now = state.clock.now_utc_naive();
    let db = state.db.lock().await;

    load_cart(&db, booking_id)?;
    let detail = owned_detail(&db, booking_id, line_item_id)?;
    ensure_draft(&detail)?;

    let notes = notes.as_deref().map(str::trim).filter(|n| !n.is_empty());
    if !queries::set_additional_notes(&db, line_item_id, notes, &now)? {
        return Err(not_draft(line_item_id));
    }
    Ok(())
}

/// Writes guest names onto draft line items of `booking_id`. Shared with
/// checkout, which applies the guest data it is given inside its own
/// transaction.
pub(crate) fn apply_guest_assignment(
    conn: &Connection,
    booking_id: &str,
    assignment: &GuestAssignment,
    now: &NaiveDateTime,
) -> Result<(), AppError> {
    match assignment {
        GuestAssignment::PerLineItem(items) => {
            for item in items {
                let detail = owned_detail(conn, booking_id, &item.line_item_id)?;
                ensure_draft(&detail)?;
                let names = clean_guest_names(&item.guest_names);
                if !queries::set_guest_names(conn, &detail.id, &names, now)? {
                    return Err(not_draft(&detail.id));
                }
            }
        }
        GuestAssignment::WholeBooking(names) => {
            let names = clean_guest_names(names);
            for detail in queries::get_details_for_booking(conn, booking_id)?
                .into_iter()
                .filter(BookingDetail::is_draft)
            {
                queries::set_guest_names(conn, &detail.id, &names, now)?;
            }
        }
    }
    Ok(())
}

/// Loads a booking and checks it is still an open cart.
pub(crate) fn load_cart(conn: &Connection, booking_id: &str) -> Result<Booking, AppError> {
    let booking = queries::get_booking(conn, booking_id)?
        .ok_or_else(|| AppError::NotFound(format!("booking {booking_id}")))?;
    if !booking.is_cart() {
        return Err(AppError::NotAllowed(format!(
            "booking {booking_id} has already been submitted"
        )));
    }
    Ok(booking)
}

fn owned_detail(
    conn: &Connection,
    booking_id: &str,
    line_item_id: &str,
) -> Result<BookingDetail, AppError> {
    queries::get_detail(conn, line_item_id)?
        .filter(|d| d.booking_id == booking_id)
        .ok_or_else(|| {
            AppError::NotFound(format!("line item {line_item_id} in booking {booking_id}"))
        })
}

fn ensure_draft(detail: &BookingDetail) -> Result<(), AppError> {
    if detail.is_draft() {
        Ok(())
    } else {
        Err(not_draft(&detail.id))
    }
}

fn not_draft(line_item_id: &str) -> AppError {
    AppError::NotAllowed(format!("line item {line_item_id} is no longer a draft"))
}

fn insert_additionals(
    conn: &Connection,
    detail_id: &str,
    additionals: &[NewAdditional],
    now: &NaiveDateTime,
) -> Result<(), AppError> {
    for additional in additionals {
        queries::insert_additional(
            conn,
            &BookingDetailAdditional {
                id: uuid::Uuid::new_v4().to_string(),
                booking_detail_id: detail_id.to_string(),
                name: additional.name.trim().to_string(),
                price: additional.price,
                per_pax: additional.per_pax,
                created_at: *now,
            },
        )?;
    }
    Ok(())
}

fn validate_line_item(item: &NewLineItem) -> Result<(), AppError> {
    if item.room_price_id.trim().is_empty() {
        return Err(AppError::InvalidInput("room price reference is required".to_string()));
    }
    if item.check_out <= item.check_in {
        return Err(AppError::InvalidInput(format!(
            "check-out {} must be after check-in {}",
            item.check_out, item.check_in
        )));
    }
    for additional in &item.additionals {
        validate_additional(additional)?;
    }
    Ok(())
}

/// Upper bound for one add-on price, in minor currency units.
pub const MAX_ADDITIONAL_PRICE: i64 = 1_000_000_000_000;

fn validate_additional(additional: &NewAdditional) -> Result<(), AppError> {
    if additional.name.trim().is_empty() {
        return Err(AppError::InvalidInput("additional item needs a name".to_string()));
    }
    if additional.price < 0 {
        return Err(AppError::InvalidInput(format!(
            "additional item {} has a negative price",
            additional.name
        )));
    }
    if additional.price > MAX_ADDITIONAL_PRICE {
        return Err(AppError::InvalidInput(format!(
            "additional item {} price exceeds {MAX_ADDITIONAL_PRICE}",
            additional.name
        )));
    }
    Ok(())
}
