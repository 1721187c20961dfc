use chrono::NaiveDateTime;
use rusqlite::{Connection, TransactionBehavior};
use serde::Serialize;

use crate::db::queries;
use crate::errors::AppError;
use crate::models::{
    BookingDetail, BookingStatus, CancellationKind, PaymentStatus, StatusDimension, StatusTarget,
    TerminalStamp,
};
use crate::services::notification::{Actor, Notification, NotificationKind};
use crate::state::AppState;

/// Result of an accepted status change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransitionOutcome {
    pub line_item_id: String,
    pub dimension: StatusDimension,
    pub previous: StatusTarget,
    pub current: StatusTarget,
    pub cancellation: Option<CancellationKind>,
}

/// Moves one line item along the booking or payment dimension.
///
/// Draft → in-review is reserved for checkout and is refused here.
pub async fn transition(
    state: &AppState,
    line_item_id: &str,
    target: StatusTarget,
    actor: Actor,
) -> Result<TransitionOutcome, AppError> {
    let now = state.clock.now_utc_naive();

    let mut db = state.db.lock().await;
    let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let detail = load_detail(&tx, line_item_id)?;
    let outcome = match target {
        StatusTarget::Booking(to) => change_booking_status(&tx, &detail, to, &now)?,
        StatusTarget::Payment(to) => change_payment_status(&tx, &detail, to, &now)?,
    };
    let booking_code = queries::get_booking(&tx, &detail.booking_id)?.and_then(|b| b.code);
    tx.commit()?;
    drop(db);

    tracing::info!(
        line_item_id,
        dimension = %outcome.dimension,
        from = outcome.previous.label(),
        to = outcome.current.label(),
        actor = ?actor,
        "line item status changed"
    );

    if let Some(kind) = notification_kind(&outcome) {
        state.notifications.enqueue(Notification {
            booking_id: detail.booking_id,
            booking_code,
            line_item_id: Some(detail.id),
            line_item_code: detail.code,
            actor,
            kind,
            occurred_at: now,
        });
    }

    Ok(outcome)
}

/// Records a payment receipt. An unpaid line item moves to
/// awaiting-verification; one already awaiting keeps its status and gets the
/// new receipt.
pub async fn attach_receipt(
    state: &AppState,
    line_item_id: &str,
    receipt_url: &str,
    actor: Actor,
) -> Result<PaymentStatus, AppError> {
    let receipt_url = receipt_url.trim();
    if receipt_url.is_empty() {
        return Err(AppError::InvalidInput("receipt url is required".to_string()));
    }

    let now = state.clock.now_utc_naive();
    let mut db = state.db.lock().await;
    let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let detail = load_detail(&tx, line_item_id)?;

    let outcome = match detail.status_payment {
        PaymentStatus::Unpaid => Some(change_payment_status(
            &tx,
            &detail,
            PaymentStatus::AwaitingVerification,
            &now,
        )?),
        PaymentStatus::AwaitingVerification => None,
        settled => {
            return Err(AppError::NotAllowed(format!(
                "line item {line_item_id} payment is already {settled}"
            )))
        }
    };
    queries::set_receipt_url(&tx, line_item_id, receipt_url, &now)?;
    let booking_code = queries::get_booking(&tx, &detail.booking_id)?.and_then(|b| b.code);
    tx.commit()?;
    drop(db);

    tracing::info!(line_item_id, actor = ?actor, "payment receipt attached");

    if let Some(kind) = outcome.as_ref().and_then(notification_kind) {
        state.notifications.enqueue(Notification {
            booking_id: detail.booking_id,
            booking_code,
            line_item_id: Some(detail.id),
            line_item_code: detail.code,
            actor,
            kind,
            occurred_at: now,
        });
    }

    Ok(PaymentStatus::AwaitingVerification)
}

pub async fn set_admin_notes(
    state: &AppState,
    line_item_id: &str,
    notes: Option<String>,
) -> Result<(), AppError> {
    let now = state.clock.now_utc_naive();
    let db = state.db.lock().await;
    let notes = notes.as_deref().map(str::trim).filter(|n| !n.is_empty());
    if !queries::set_admin_notes(&db, line_item_id, notes, &now)? {
        return Err(AppError::NotFound(format!("line item {line_item_id}")));
    }
    Ok(())
}

fn load_detail(conn: &Connection, line_item_id: &str) -> Result<BookingDetail, AppError> {
    queries::get_detail(conn, line_item_id)?
        .ok_or_else(|| AppError::NotFound(format!("line item {line_item_id}")))
}

fn stamp_is_set(detail: &BookingDetail, stamp: TerminalStamp) -> bool {
    match stamp {
        TerminalStamp::ApprovedAt => detail.approved_at.is_some(),
        TerminalStamp::RejectedAt => detail.rejected_at.is_some(),
        TerminalStamp::CancelledAt => detail.cancelled_at.is_some(),
    }
}

/// Refuses a booking move from the state in `detail`: `AlreadyTerminal` first,
/// then `InvalidTransition`.
fn check_booking_move(detail: &BookingDetail, to: BookingStatus) -> Result<(), AppError> {
    let from = detail.status_booking;

    if from.is_final() {
        return Err(AppError::AlreadyTerminal {
            line_item: detail.id.clone(),
            status: from.to_string(),
        });
    }
    if to.stamp().is_some_and(|s| stamp_is_set(detail, s)) {
        return Err(AppError::AlreadyTerminal {
            line_item: detail.id.clone(),
            status: to.to_string(),
        });
    }
    if to == BookingStatus::InReview || !from.can_transition_to(to) {
        return Err(invalid_booking_move(detail, to));
    }
    Ok(())
}

fn invalid_booking_move(detail: &BookingDetail, to: BookingStatus) -> AppError {
    AppError::InvalidTransition {
        line_item: detail.id.clone(),
        dimension: StatusDimension::Booking,
        from: detail.status_booking.to_string(),
        to: to.to_string(),
    }
}

fn change_booking_status(
    conn: &Connection,
    detail: &BookingDetail,
    to: BookingStatus,
    now: &NaiveDateTime,
) -> Result<TransitionOutcome, AppError> {
    check_booking_move(detail, to)?;

    let from = detail.status_booking;
    if !queries::update_booking_status(conn, &detail.id, from, to, to.stamp(), now)? {
        // the row moved since it was read; judge the request against where it is now
        let current = load_detail(conn, &detail.id)?;
        check_booking_move(&current, to)?;
        return Err(invalid_booking_move(&current, to));
    }

    Ok(TransitionOutcome {
        line_item_id: detail.id.clone(),
        dimension: StatusDimension::Booking,
        previous: StatusTarget::Booking(from),
        current: StatusTarget::Booking(to),
        cancellation: (to == BookingStatus::Cancelled).then(|| CancellationKind::from_previous(from)),
    })
}

fn change_payment_status(
    conn: &Connection,
    detail: &BookingDetail,
    to: PaymentStatus,
    now: &NaiveDateTime,
) -> Result<TransitionOutcome, AppError> {
    let from = detail.status_payment;

    if from == PaymentStatus::Refunded {
        return Err(AppError::AlreadyTerminal {
            line_item: detail.id.clone(),
            status: from.to_string(),
        });
    }
    if !from.can_transition_to(to) {
        return Err(AppError::InvalidTransition {
            line_item: detail.id.clone(),
            dimension: StatusDimension::Payment,
            from: from.to_string(),
            to: to.to_string(),
        });
    }

    if !queries::update_payment_status(conn, &detail.id, from, to, now)? {
        let current = load_detail(conn, &detail.id)?.status_payment;
        if current == PaymentStatus::Refunded {
            return Err(AppError::AlreadyTerminal {
                line_item: detail.id.clone(),
                status: current.to_string(),
            });
        }
        return Err(AppError::InvalidTransition {
            line_item: detail.id.clone(),
            dimension: StatusDimension::Payment,
            from: current.to_string(),
            to: to.to_string(),
        });
    }

    Ok(TransitionOutcome {
        line_item_id: detail.id.clone(),
        dimension: StatusDimension::Payment,
        previous: StatusTarget::Payment(from),
        current: StatusTarget::Payment(to),
        cancellation: None,
    })
}

/// Terminal booking targets and every payment change are announced.
fn notification_kind(outcome: &TransitionOutcome) -> Option<NotificationKind> {
    match (outcome.previous, outcome.current) {
        (StatusTarget::Booking(from), StatusTarget::Booking(to)) if to.is_terminal() => {
            Some(NotificationKind::StatusChanged {
                from,
                to,
                cancellation: outcome.cancellation,
            })
        }
        (StatusTarget::Payment(from), StatusTarget::Payment(to)) => {
            Some(NotificationKind::PaymentChanged { from, to })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{FixedOffset, NaiveDate, TimeZone};
    use tokio::sync::mpsc;

    use super::*;
    use crate::config::AppConfig;
    use crate::db;
    use crate::models::{GuestAssignment, NewLineItem};
    use crate::services::cache::memory::MemoryCache;
    use crate::services::clock::{Clock, ManualClock};
    use crate::services::notification::NotificationQueue;
    use crate::services::{cart, checkout};

    async fn submitted_items(count: usize) -> (Arc<AppState>, Vec<String>, mpsc::Receiver<Notification>) {
        let offset = FixedOffset::east_opt(7 * 3600).unwrap();
        let clock = Arc::new(ManualClock::new(
            offset.with_ymd_and_hms(2025, 6, 16, 10, 0, 0).unwrap(),
        ));
        let cache = Arc::new(MemoryCache::new(clock.clone()));
        let (notifications, mut rx) = NotificationQueue::channel(64);
        let state = Arc::new(AppState::new(
            db::init_db(":memory:").unwrap(),
            AppConfig::default(),
            cache,
            clock,
            notifications,
        ));

        let cart_id = cart::get_or_create_cart(&state, "agent-1").await.unwrap();
        let items = (0..count)
            .map(|_| NewLineItem {
                room_price_id: "rp-standard".to_string(),
                check_in: NaiveDate::from_ymd_opt(2025, 8, 1).unwrap(),
                check_out: NaiveDate::from_ymd_opt(2025, 8, 2).unwrap(),
                guest_names: vec![],
                additional_notes: None,
                additionals: vec![],
            })
            .collect();
        let ids = cart::add_line_items(&state, &cart_id, items).await.unwrap();
        checkout::checkout(
            &state,
            &cart_id,
            Some(GuestAssignment::WholeBooking(vec!["Alice".to_string()])),
            Actor::Agent("agent-1".to_string()),
        )
        .await
        .unwrap();
        // drain the Submitted event
        rx.recv().await.unwrap();
        (state, ids, rx)
    }

    fn staff() -> Actor {
        Actor::Staff("staff-1".to_string())
    }

    #[tokio::test]
    async fn test_confirm_stamps_once() {
        let (state, ids, mut rx) = submitted_items(1).await;

        let outcome = transition(
            &state,
            &ids[0],
            StatusTarget::Booking(BookingStatus::Confirmed),
            staff(),
        )
        .await
        .unwrap();
        assert_eq!(outcome.previous, StatusTarget::Booking(BookingStatus::InReview));
        assert_eq!(outcome.current, StatusTarget::Booking(BookingStatus::Confirmed));

        let first_approved_at = {
            let conn = state.db.lock().await;
            queries::get_detail(&conn, &ids[0]).unwrap().unwrap().approved_at
        };
        assert!(first_approved_at.is_some());

        assert!(matches!(
            transition(
                &state,
                &ids[0],
                StatusTarget::Booking(BookingStatus::Confirmed),
                staff()
            )
            .await,
            Err(AppError::AlreadyTerminal { .. })
        ));

        let conn = state.db.lock().await;
        let detail = queries::get_detail(&conn, &ids[0]).unwrap().unwrap();
        assert_eq!(detail.approved_at, first_approved_at);
        drop(conn);

        let notification = rx.recv().await.unwrap();
        assert_eq!(notification.line_item_id.as_deref(), Some(ids[0].as_str()));
        assert!(matches!(
            notification.kind,
            NotificationKind::StatusChanged {
                to: BookingStatus::Confirmed,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_rejected_is_final() {
        let (state, ids, _rx) = submitted_items(1).await;
        transition(&state, &ids[0], StatusTarget::Booking(BookingStatus::Rejected), staff())
            .await
            .unwrap();

        for target in [BookingStatus::Confirmed, BookingStatus::Cancelled] {
            assert!(matches!(
                transition(&state, &ids[0], StatusTarget::Booking(target), staff()).await,
                Err(AppError::AlreadyTerminal { .. })
            ));
        }
    }

    #[tokio::test]
    async fn test_cancel_after_approval() {
        let (state, ids, _rx) = submitted_items(1).await;
        transition(&state, &ids[0], StatusTarget::Booking(BookingStatus::Confirmed), staff())
            .await
            .unwrap();
        let outcome = transition(
            &state,
            &ids[0],
            StatusTarget::Booking(BookingStatus::Cancelled),
            staff(),
        )
        .await
        .unwrap();
        assert_eq!(outcome.cancellation, Some(CancellationKind::AfterApproval));

        let conn = state.db.lock().await;
        let detail = queries::get_detail(&conn, &ids[0]).unwrap().unwrap();
        assert!(detail.approved_at.is_some());
        assert!(detail.cancelled_at.is_some());
        assert!(detail.rejected_at.is_none());
    }

    #[tokio::test]
    async fn test_illegal_booking_moves() {
        let (state, ids, _rx) = submitted_items(1).await;

        // in-review is reached through checkout only
        assert!(matches!(
            transition(&state, &ids[0], StatusTarget::Booking(BookingStatus::InReview), staff())
                .await,
            Err(AppError::InvalidTransition { .. })
        ));
        assert!(matches!(
            transition(&state, &ids[0], StatusTarget::Booking(BookingStatus::Draft), staff()).await,
            Err(AppError::InvalidTransition { .. })
        ));

        transition(&state, &ids[0], StatusTarget::Booking(BookingStatus::Confirmed), staff())
            .await
            .unwrap();
        match transition(&state, &ids[0], StatusTarget::Booking(BookingStatus::Rejected), staff())
            .await
        {
            Err(AppError::InvalidTransition {
                dimension, from, to, ..
            }) => {
                assert_eq!(dimension, StatusDimension::Booking);
                assert_eq!(from, "confirmed");
                assert_eq!(to, "rejected");
            }
            other => panic!("expected InvalidTransition, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_payment_is_independent_of_booking_status() {
        let (state, ids, mut rx) = submitted_items(1).await;

        transition(&state, &ids[0], StatusTarget::Payment(PaymentStatus::Paid), staff())
            .await
            .unwrap();
        let conn = state.db.lock().await;
        let detail = queries::get_detail(&conn, &ids[0]).unwrap().unwrap();
        assert_eq!(detail.status_booking, BookingStatus::InReview);
        assert_eq!(detail.status_payment, PaymentStatus::Paid);
        drop(conn);

        assert!(matches!(
            rx.recv().await.unwrap().kind,
            NotificationKind::PaymentChanged {
                from: PaymentStatus::Unpaid,
                to: PaymentStatus::Paid
            }
        ));

        transition(&state, &ids[0], StatusTarget::Payment(PaymentStatus::Refunded), staff())
            .await
            .unwrap();
        assert!(matches!(
            transition(&state, &ids[0], StatusTarget::Payment(PaymentStatus::Paid), staff()).await,
            Err(AppError::AlreadyTerminal { .. })
        ));
    }

    #[tokio::test]
    async fn test_attach_receipt_moves_to_awaiting_verification() {
        let (state, ids, _rx) = submitted_items(1).await;

        let status = attach_receipt(&state, &ids[0], "https://files.example/r1.jpg", Actor::Agent("agent-1".to_string()))
            .await
            .unwrap();
        assert_eq!(status, PaymentStatus::AwaitingVerification);
        // a second receipt replaces the first
        attach_receipt(&state, &ids[0], "https://files.example/r2.jpg", Actor::Agent("agent-1".to_string()))
            .await
            .unwrap();

        let conn = state.db.lock().await;
        let detail = queries::get_detail(&conn, &ids[0]).unwrap().unwrap();
        assert_eq!(detail.status_payment, PaymentStatus::AwaitingVerification);
        assert_eq!(detail.receipt_url.as_deref(), Some("https://files.example/r2.jpg"));
        drop(conn);

        transition(&state, &ids[0], StatusTarget::Payment(PaymentStatus::Paid), staff())
            .await
            .unwrap();
        assert!(matches!(
            attach_receipt(&state, &ids[0], "https://files.example/r3.jpg", Actor::System).await,
            Err(AppError::NotAllowed(_))
        ));
    }

    #[tokio::test]
    async fn test_admin_notes() {
        let (state, ids, _rx) = submitted_items(1).await;
        set_admin_notes(&state, &ids[0], Some("late arrival".to_string()))
            .await
            .unwrap();
        assert!(matches!(
            set_admin_notes(&state, "missing", None).await,
            Err(AppError::NotFound(_))
        ));

        let conn = state.db.lock().await;
        let detail = queries::get_detail(&conn, &ids[0]).unwrap().unwrap();
        assert_eq!(detail.admin_notes.as_deref(), Some("late arrival"));
    }

    #[tokio::test]
    async fn test_concurrent_confirm_and_reject() {
        let (state, ids, _rx) = submitted_items(1).await;

        let a = {
            let state = state.clone();
            let id = ids[0].clone();
            tokio::spawn(async move {
                transition(&state, &id, StatusTarget::Booking(BookingStatus::Confirmed), staff()).await
            })
        };
        let b = {
            let state = state.clone();
            let id = ids[0].clone();
            tokio::spawn(async move {
                transition(&state, &id, StatusTarget::Booking(BookingStatus::Rejected), staff()).await
            })
        };
        let results = [a.await.unwrap(), b.await.unwrap()];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);

        let conn = state.db.lock().await;
        let detail = queries::get_detail(&conn, &ids[0]).unwrap().unwrap();
        assert!(detail.approved_at.is_some() ^ detail.rejected_at.is_some());
    }

    #[tokio::test]
    async fn test_lost_race_reports_the_current_status() {
        let (state, ids, _rx) = submitted_items(2).await;
        let now = state.clock.now_utc_naive();
        let conn = state.db.lock().await;

        // another writer confirmed the item after it was read; rejecting is
        // now simply illegal, not a repeat of a terminal move
        let stale = queries::get_detail(&conn, &ids[0]).unwrap().unwrap();
        assert!(queries::update_booking_status(
            &conn,
            &ids[0],
            BookingStatus::InReview,
            BookingStatus::Confirmed,
            Some(TerminalStamp::ApprovedAt),
            &now,
        )
        .unwrap());
        match change_booking_status(&conn, &stale, BookingStatus::Rejected, &now) {
            Err(AppError::InvalidTransition { from, to, .. }) => {
                assert_eq!(from, "confirmed");
                assert_eq!(to, "rejected");
            }
            other => panic!("expected InvalidTransition, got {other:?}"),
        }

        // the other writer already rejected it: same move, already terminal
        let stale = queries::get_detail(&conn, &ids[1]).unwrap().unwrap();
        assert!(queries::update_booking_status(
            &conn,
            &ids[1],
            BookingStatus::InReview,
            BookingStatus::Rejected,
            Some(TerminalStamp::RejectedAt),
            &now,
        )
        .unwrap());
        assert!(matches!(
            change_booking_status(&conn, &stale, BookingStatus::Rejected, &now),
            Err(AppError::AlreadyTerminal { .. })
        ));

        // payment moved underneath as well
        let stale = queries::get_detail(&conn, &ids[0]).unwrap().unwrap();
        assert!(queries::update_payment_status(
            &conn,
            &ids[0],
            PaymentStatus::Unpaid,
            PaymentStatus::AwaitingVerification,
            &now,
        )
        .unwrap());
        match change_payment_status(&conn, &stale, PaymentStatus::Paid, &now) {
            Err(AppError::InvalidTransition { from, .. }) => {
                assert_eq!(from, "awaiting_verification")
            }
            other => panic!("expected InvalidTransition, got {other:?}"),
        }
    }
}
