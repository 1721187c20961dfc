use chrono::NaiveDateTime;
use rusqlite::Connection;
use serde::Serialize;

use crate::db::{self, queries};
use crate::errors::AppError;
use crate::models::{BookingDetail, GuestAssignment};
use crate::services::cart::apply_guest_assignment;
use crate::services::code_allocator::CodeScope;
use crate::services::notification::{Actor, Notification, NotificationKind};
use crate::state::AppState;

#[derive(Debug, Clone, Serialize)]
pub struct SubmittedLineItem {
    pub id: String,
    pub code: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutReceipt {
    pub booking_id: String,
    pub booking_code: String,
    pub line_items: Vec<SubmittedLineItem>,
}

/// Submits a cart: applies any guest data, checks every draft line item has
/// guests, gives each item and the booking a code and moves the items to
/// in-review. Everything happens in one transaction; on any failure nothing
/// is written and the cart stays as it was.
///
/// Codes taken from the registry by a failed attempt are not given back. A
/// retry allocates fresh ones. Callers may wrap this in a timeout; dropping
/// the future rolls the transaction back.
pub async fn checkout(
    state: &AppState,
    booking_id: &str,
    guest_data: Option<GuestAssignment>,
    actor: Actor,
) -> Result<CheckoutReceipt, AppError> {
    let now = state.clock.now_utc_naive();

    let mut tx = db::ImmediateTransaction::begin(state.db.lock().await)?;

    let result = submit_cart(state, tx.conn(), booking_id, guest_data.as_ref(), &now).await;
    let receipt = match result {
        Ok(receipt) => receipt,
        Err(e) => {
            drop(tx);
            tracing::warn!(booking_id, error = %e, "checkout rolled back");
            return Err(e);
        }
    };
    tx.commit()?;

    tracing::info!(
        booking_id,
        booking_code = %receipt.booking_code,
        line_items = receipt.line_items.len(),
        "cart checked out"
    );

    state.notifications.enqueue(Notification {
        booking_id: receipt.booking_id.clone(),
        booking_code: Some(receipt.booking_code.clone()),
        line_item_id: None,
        line_item_code: None,
        actor,
        kind: NotificationKind::Submitted {
            line_items: receipt.line_items.len(),
        },
        occurred_at: now,
    });

    Ok(receipt)
}

// Runs inside the open transaction. Nothing borrowed from `conn` may live
// across an await.
async fn submit_cart(
    state: &AppState,
    conn: &mut Connection,
    booking_id: &str,
    guest_data: Option<&GuestAssignment>,
    now: &NaiveDateTime,
) -> Result<CheckoutReceipt, AppError> {
    let booking = queries::get_booking(conn, booking_id)?
        .ok_or_else(|| AppError::NotFound(format!("booking {booking_id}")))?;
    if !booking.is_cart() {
        return Err(AppError::StaleCart(booking_id.to_string()));
    }

    if let Some(assignment) = guest_data {
        apply_guest_assignment(conn, booking_id, assignment, now)?;
    }

    let drafts: Vec<BookingDetail> = queries::get_details_for_booking(conn, booking_id)?
        .into_iter()
        .filter(BookingDetail::is_draft)
        .collect();
    if drafts.is_empty() {
        return Err(AppError::StaleCart(booking_id.to_string()));
    }

    let missing: Vec<String> = drafts
        .iter()
        .filter(|d| !d.has_guests())
        .map(|d| d.id.clone())
        .collect();
    if !missing.is_empty() {
        return Err(AppError::IncompleteGuestData {
            line_items: missing,
        });
    }

    let mut line_items = Vec::with_capacity(drafts.len());
    for detail in &drafts {
        let code = state.allocator.allocate(CodeScope::Detail(&detail.id)).await?;
        let submitted = queries::submit_detail(conn, &detail.id, &code, now)?;
        if !submitted {
            return Err(AppError::StaleCart(booking_id.to_string()));
        }
        line_items.push(SubmittedLineItem {
            id: detail.id.clone(),
            code,
        });
    }

    let booking_code = state.allocator.allocate(CodeScope::Booking(booking_id)).await?;
    let marked = queries::mark_booking_submitted(conn, booking_id, &booking_code, now)?;
    if !marked {
        return Err(AppError::StaleCart(booking_id.to_string()));
    }

    Ok(CheckoutReceipt {
        booking_id: booking_id.to_string(),
        booking_code,
        line_items,
    })
}
