use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use super::status::{BookingProjection, BookingStatus, PaymentProjection, PaymentStatus};

/// An agent's order. While `submitted_at` is `None` this row is the agent's
/// cart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: String,
    pub agent_id: String,
    pub code: Option<String>,
    pub submitted_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Booking {
    pub fn is_cart(&self) -> bool {
        self.submitted_at.is_none()
    }
}

/// One room stay inside a booking (a sub-booking).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingDetail {
    pub id: String,
    pub booking_id: String,
    pub room_price_id: String,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub guest_names: Vec<String>,
    pub code: Option<String>,
    pub status_booking: BookingStatus,
    pub status_payment: PaymentStatus,
    pub admin_notes: Option<String>,
    pub additional_notes: Option<String>,
    pub receipt_url: Option<String>,
    pub approved_at: Option<NaiveDateTime>,
    pub rejected_at: Option<NaiveDateTime>,
    pub cancelled_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl BookingDetail {
    pub fn is_draft(&self) -> bool {
        self.status_booking == BookingStatus::Draft
    }

    pub fn has_guests(&self) -> bool {
        self.guest_names.iter().any(|n| !n.trim().is_empty())
    }

    pub fn nights(&self) -> i64 {
        (self.check_out - self.check_in).num_days()
    }
}

/// Add-on charge owned by one line item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingDetailAdditional {
    pub id: String,
    pub booking_detail_id: String,
    pub name: String,
    /// Minor currency units.
    pub price: i64,
    pub per_pax: bool,
    pub created_at: NaiveDateTime,
}

impl BookingDetailAdditional {
    pub fn charge(&self, guests: usize) -> i64 {
        if self.per_pax {
            self.price.saturating_mul(i64::try_from(guests).unwrap_or(i64::MAX))
        } else {
            self.price
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAdditional {
    pub name: String,
    pub price: i64,
    #[serde(default)]
    pub per_pax: bool,
}

/// A room the agent wants to put in the cart. Availability and price
/// validity are the caller's responsibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewLineItem {
    pub room_price_id: String,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    #[serde(default)]
    pub guest_names: Vec<String>,
    #[serde(default)]
    pub additional_notes: Option<String>,
    #[serde(default)]
    pub additionals: Vec<NewAdditional>,
}

/// Guest names for a cart, either per line item or one list applied to
/// every draft line item of the booking.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "scope", content = "guests", rename_all = "snake_case")]
pub enum GuestAssignment {
    PerLineItem(Vec<LineItemGuests>),
    WholeBooking(Vec<String>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineItemGuests {
    pub line_item_id: String,
    pub guest_names: Vec<String>,
}

/// Trims names and drops blanks.
pub fn clean_guest_names(names: &[String]) -> Vec<String> {
    names
        .iter()
        .map(|n| n.trim())
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct LineItem {
    #[serde(flatten)]
    pub detail: BookingDetail,
    pub additionals: Vec<BookingDetailAdditional>,
}

impl LineItem {
    pub fn additionals_total(&self) -> i64 {
        let guests = self.detail.guest_names.len().max(1);
        self.additionals
            .iter()
            .map(|a| a.charge(guests))
            .fold(0i64, i64::saturating_add)
    }
}

/// A booking with its line items and the statuses computed from them.
#[derive(Debug, Clone, Serialize)]
pub struct BookingAggregate {
    pub booking: Booking,
    pub line_items: Vec<LineItem>,
    pub status: BookingProjection,
    pub payment_status: PaymentProjection,
}

impl BookingAggregate {
    pub fn new(booking: Booking, line_items: Vec<LineItem>) -> Self {
        let status =
            BookingProjection::from_statuses(line_items.iter().map(|l| l.detail.status_booking));
        let payment_status = PaymentProjection::from_statuses(
            line_items
                .iter()
                .map(|l| (l.detail.status_booking, l.detail.status_payment)),
        );
        Self {
            booking,
            line_items,
            status,
            payment_status,
        }
    }

    pub fn line_item(&self, id: &str) -> Option<&LineItem> {
        self.line_items.iter().find(|l| l.detail.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn additional(price: i64, per_pax: bool) -> BookingDetailAdditional {
        BookingDetailAdditional {
            id: "add-1".to_string(),
            booking_detail_id: "det-1".to_string(),
            name: "Breakfast".to_string(),
            price,
            per_pax,
            created_at: NaiveDateTime::parse_from_str("2025-03-10 10:00:00", "%Y-%m-%d %H:%M:%S")
                .unwrap(),
        }
    }

    #[test]
    fn test_additional_charge() {
        assert_eq!(additional(150_000, false).charge(3), 150_000);
        assert_eq!(additional(150_000, true).charge(3), 450_000);
    }

    #[test]
    fn test_large_charges_saturate() {
        assert_eq!(additional(i64::MAX / 2, true).charge(3), i64::MAX);

        let ts = NaiveDateTime::parse_from_str("2025-03-10 10:00:00", "%Y-%m-%d %H:%M:%S").unwrap();
        let item = LineItem {
            detail: BookingDetail {
                id: "det-1".to_string(),
                booking_id: "bk-1".to_string(),
                room_price_id: "rp-1".to_string(),
                check_in: NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
                check_out: NaiveDate::from_ymd_opt(2025, 3, 11).unwrap(),
                guest_names: vec!["Alice".to_string()],
                code: None,
                status_booking: BookingStatus::Draft,
                status_payment: PaymentStatus::Unpaid,
                admin_notes: None,
                additional_notes: None,
                receipt_url: None,
                approved_at: None,
                rejected_at: None,
                cancelled_at: None,
                created_at: ts,
                updated_at: ts,
            },
            additionals: vec![additional(i64::MAX - 1, false), additional(10, false)],
        };
        assert_eq!(item.additionals_total(), i64::MAX);
    }

    #[test]
    fn test_clean_guest_names() {
        let names = vec![
            "  Alice ".to_string(),
            "".to_string(),
            "   ".to_string(),
            "Bob".to_string(),
        ];
        assert_eq!(clean_guest_names(&names), vec!["Alice", "Bob"]);
    }

    #[test]
    fn test_guest_assignment_serde() {
        let whole: GuestAssignment =
            serde_json::from_str(r#"{"scope":"whole_booking","guests":["Alice"]}"#).unwrap();
        assert!(matches!(whole, GuestAssignment::WholeBooking(ref g) if g == &["Alice"]));

        let per_item: GuestAssignment = serde_json::from_str(
            r#"{"scope":"per_line_item","guests":[{"line_item_id":"d1","guest_names":["Bob"]}]}"#,
        )
        .unwrap();
        match per_item {
            GuestAssignment::PerLineItem(items) => {
                assert_eq!(items.len(), 1);
                assert_eq!(items[0].line_item_id, "d1");
            }
            other => panic!("unexpected assignment: {other:?}"),
        }
    }
}
