use std::fmt;

use serde::{Deserialize, Serialize};

/// Which independent status column a transition targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusDimension {
    Booking,
    Payment,
}

impl StatusDimension {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusDimension::Booking => "booking status",
            StatusDimension::Payment => "payment status",
        }
    }
}

impl fmt::Display for StatusDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Booking status of a single line item. Ids match the `status_bookings`
/// lookup table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Draft,
    InReview,
    Confirmed,
    Rejected,
    Cancelled,
}

/// The immutable timestamp column stamped when a status is entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalStamp {
    ApprovedAt,
    RejectedAt,
    CancelledAt,
}

impl TerminalStamp {
    pub fn column(&self) -> &'static str {
        match self {
            TerminalStamp::ApprovedAt => "approved_at",
            TerminalStamp::RejectedAt => "rejected_at",
            TerminalStamp::CancelledAt => "cancelled_at",
        }
    }
}

impl BookingStatus {
    pub const ALL: [BookingStatus; 5] = [
        BookingStatus::Draft,
        BookingStatus::InReview,
        BookingStatus::Confirmed,
        BookingStatus::Rejected,
        BookingStatus::Cancelled,
    ];

    pub fn id(&self) -> i64 {
        match self {
            BookingStatus::Draft => 1,
            BookingStatus::InReview => 2,
            BookingStatus::Confirmed => 3,
            BookingStatus::Rejected => 4,
            BookingStatus::Cancelled => 5,
        }
    }

    pub fn from_id(id: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.id() == id)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Draft => "draft",
            BookingStatus::InReview => "in_review",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Rejected => "rejected",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    /// Legal next states. `Draft -> InReview` is listed here but only
    /// checkout is allowed to take it.
    pub fn allowed_targets(&self) -> &'static [BookingStatus] {
        match self {
            BookingStatus::Draft => &[BookingStatus::InReview, BookingStatus::Cancelled],
            BookingStatus::InReview => &[
                BookingStatus::Confirmed,
                BookingStatus::Rejected,
                BookingStatus::Cancelled,
            ],
            BookingStatus::Confirmed => &[BookingStatus::Cancelled],
            BookingStatus::Rejected | BookingStatus::Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, target: BookingStatus) -> bool {
        self.allowed_targets().contains(&target)
    }

    /// True for statuses that end the approval workflow.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BookingStatus::Confirmed | BookingStatus::Rejected | BookingStatus::Cancelled
        )
    }

    /// True for statuses with no outgoing transitions at all.
    pub fn is_final(&self) -> bool {
        self.allowed_targets().is_empty()
    }

    pub fn stamp(&self) -> Option<TerminalStamp> {
        match self {
            BookingStatus::Confirmed => Some(TerminalStamp::ApprovedAt),
            BookingStatus::Rejected => Some(TerminalStamp::RejectedAt),
            BookingStatus::Cancelled => Some(TerminalStamp::CancelledAt),
            BookingStatus::Draft | BookingStatus::InReview => None,
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payment status of a single line item. Ids match `status_payments`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Unpaid,
    AwaitingVerification,
    Paid,
    Refunded,
}

impl PaymentStatus {
    pub const ALL: [PaymentStatus; 4] = [
        PaymentStatus::Unpaid,
        PaymentStatus::AwaitingVerification,
        PaymentStatus::Paid,
        PaymentStatus::Refunded,
    ];

    pub fn id(&self) -> i64 {
        match self {
            PaymentStatus::Unpaid => 1,
            PaymentStatus::AwaitingVerification => 2,
            PaymentStatus::Paid => 3,
            PaymentStatus::Refunded => 4,
        }
    }

    pub fn from_id(id: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.id() == id)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Unpaid => "unpaid",
            PaymentStatus::AwaitingVerification => "awaiting_verification",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Refunded => "refunded",
        }
    }

    pub fn allowed_targets(&self) -> &'static [PaymentStatus] {
        match self {
            PaymentStatus::Unpaid => &[PaymentStatus::AwaitingVerification, PaymentStatus::Paid],
            PaymentStatus::AwaitingVerification => &[PaymentStatus::Paid, PaymentStatus::Unpaid],
            PaymentStatus::Paid => &[PaymentStatus::Refunded],
            PaymentStatus::Refunded => &[],
        }
    }

    pub fn can_transition_to(&self, target: PaymentStatus) -> bool {
        self.allowed_targets().contains(&target)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A requested status change. The variant selects the dimension, so a
/// payment status can never be written into the booking column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "dimension", content = "status", rename_all = "snake_case")]
pub enum StatusTarget {
    Booking(BookingStatus),
    Payment(PaymentStatus),
}

impl StatusTarget {
    pub fn dimension(&self) -> StatusDimension {
        match self {
            StatusTarget::Booking(_) => StatusDimension::Booking,
            StatusTarget::Payment(_) => StatusDimension::Payment,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            StatusTarget::Booking(s) => s.as_str(),
            StatusTarget::Payment(s) => s.as_str(),
        }
    }
}

/// Distinguishes cancellations that happen before approval from those that
/// undo an approved reservation; collaborators drive refunds off this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancellationKind {
    BeforeApproval,
    AfterApproval,
}

impl CancellationKind {
    pub fn from_previous(previous: BookingStatus) -> Self {
        if previous == BookingStatus::Confirmed {
            CancellationKind::AfterApproval
        } else {
            CancellationKind::BeforeApproval
        }
    }
}

/// Booking-level status, computed from the line items and never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingProjection {
    Draft,
    InReview,
    InReviewPartial,
    Confirmed,
    PartiallyConfirmed,
    Rejected,
    Cancelled,
    Closed,
}

impl BookingProjection {
    pub fn from_statuses<I>(statuses: I) -> Self
    where
        I: IntoIterator<Item = BookingStatus>,
    {
        let mut total = 0usize;
        let (mut draft, mut in_review, mut confirmed, mut rejected, mut cancelled) =
            (0usize, 0usize, 0usize, 0usize, 0usize);

        for status in statuses {
            total += 1;
            match status {
                BookingStatus::Draft => draft += 1,
                BookingStatus::InReview => in_review += 1,
                BookingStatus::Confirmed => confirmed += 1,
                BookingStatus::Rejected => rejected += 1,
                BookingStatus::Cancelled => cancelled += 1,
            }
        }

        if total == 0 || draft > 0 {
            return BookingProjection::Draft;
        }
        if confirmed == total {
            return BookingProjection::Confirmed;
        }
        if rejected == total {
            return BookingProjection::Rejected;
        }
        if cancelled == total {
            return BookingProjection::Cancelled;
        }
        if in_review > 0 {
            return if rejected + cancelled == 0 {
                BookingProjection::InReview
            } else {
                BookingProjection::InReviewPartial
            };
        }
        if confirmed > 0 {
            BookingProjection::PartiallyConfirmed
        } else {
            BookingProjection::Closed
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingProjection::Draft => "draft",
            BookingProjection::InReview => "in_review",
            BookingProjection::InReviewPartial => "in_review_partial",
            BookingProjection::Confirmed => "confirmed",
            BookingProjection::PartiallyConfirmed => "partially_confirmed",
            BookingProjection::Rejected => "rejected",
            BookingProjection::Cancelled => "cancelled",
            BookingProjection::Closed => "closed",
        }
    }
}

/// Booking-level payment summary over the line items still in play
/// (rejected and cancelled items are ignored).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentProjection {
    Unpaid,
    PartiallyPaid,
    Paid,
    Refunded,
}

impl PaymentProjection {
    pub fn from_statuses<I>(statuses: I) -> Self
    where
        I: IntoIterator<Item = (BookingStatus, PaymentStatus)>,
    {
        let live: Vec<PaymentStatus> = statuses
            .into_iter()
            .filter(|(b, _)| !matches!(b, BookingStatus::Rejected | BookingStatus::Cancelled))
            .map(|(_, p)| p)
            .collect();

        if live.is_empty() {
            return PaymentProjection::Unpaid;
        }

        let paid = live.iter().filter(|p| **p == PaymentStatus::Paid).count();
        let refunded = live.iter().filter(|p| **p == PaymentStatus::Refunded).count();

        if refunded == live.len() {
            PaymentProjection::Refunded
        } else if paid == live.len() {
            PaymentProjection::Paid
        } else if paid + refunded > 0 {
            PaymentProjection::PartiallyPaid
        } else {
            PaymentProjection::Unpaid
        }
    }
}
