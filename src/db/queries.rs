use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::models::{
    Booking, BookingDetail, BookingDetailAdditional, BookingStatus, PaymentStatus, TerminalStamp,
};

pub const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub const DATE_FORMAT: &str = "%Y-%m-%d";

fn fmt_ts(ts: &NaiveDateTime) -> String {
    ts.format(TS_FORMAT).to_string()
}

fn fmt_opt_ts(ts: &Option<NaiveDateTime>) -> Option<String> {
    ts.as_ref().map(fmt_ts)
}

fn conversion_error(idx: usize, ty: Type, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, ty, msg.into())
}

fn parse_ts(idx: usize, s: &str) -> rusqlite::Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, TS_FORMAT)
        .map_err(|e| conversion_error(idx, Type::Text, format!("bad timestamp {s:?}: {e}")))
}

fn parse_opt_ts(idx: usize, s: Option<String>) -> rusqlite::Result<Option<NaiveDateTime>> {
    s.map(|s| parse_ts(idx, &s)).transpose()
}

fn parse_date(idx: usize, s: &str) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(s, DATE_FORMAT)
        .map_err(|e| conversion_error(idx, Type::Text, format!("bad date {s:?}: {e}")))
}

// ── Bookings ──

const BOOKING_COLUMNS: &str = "id, agent_id, code, submitted_at, created_at, updated_at";

fn parse_booking_row(row: &Row) -> rusqlite::Result<Booking> {
    let submitted_at: Option<String> = row.get(3)?;
    let created_at: String = row.get(4)?;
    let updated_at: String = row.get(5)?;

    Ok(Booking {
        id: row.get(0)?,
        agent_id: row.get(1)?,
        code: row.get(2)?,
        submitted_at: parse_opt_ts(3, submitted_at)?,
        created_at: parse_ts(4, &created_at)?,
        updated_at: parse_ts(5, &updated_at)?,
    })
}

pub fn insert_booking(conn: &Connection, booking: &Booking) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO bookings (id, agent_id, code, submitted_at, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            booking.id,
            booking.agent_id,
            booking.code,
            fmt_opt_ts(&booking.submitted_at),
            fmt_ts(&booking.created_at),
            fmt_ts(&booking.updated_at),
        ],
    )?;
    Ok(())
}

pub fn get_booking(conn: &Connection, id: &str) -> rusqlite::Result<Option<Booking>> {
    conn.query_row(
        &format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = ?1"),
        params![id],
        parse_booking_row,
    )
    .optional()
}

pub fn get_cart_for_agent(conn: &Connection, agent_id: &str) -> rusqlite::Result<Option<Booking>> {
    conn.query_row(
        &format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE agent_id = ?1 AND submitted_at IS NULL"),
        params![agent_id],
        parse_booking_row,
    )
    .optional()
}

pub fn get_bookings_for_agent(
    conn: &Connection,
    agent_id: &str,
    limit: i64,
) -> rusqlite::Result<Vec<Booking>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {BOOKING_COLUMNS} FROM bookings
         WHERE agent_id = ?1 AND submitted_at IS NOT NULL
         ORDER BY submitted_at DESC LIMIT ?2"
    ))?;

    let rows = stmt.query_map(params![agent_id, limit], parse_booking_row)?;

    let mut bookings = vec![];
    for row in rows {
        bookings.push(row?);
    }
    Ok(bookings)
}

pub fn get_booking_by_code(conn: &Connection, code: &str) -> rusqlite::Result<Option<Booking>> {
    conn.query_row(
        &format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE code = ?1"),
        params![code],
        parse_booking_row,
    )
    .optional()
}

/// Stamps the booking as submitted. Returns false if it already was.
pub fn mark_booking_submitted(
    conn: &Connection,
    id: &str,
    code: &str,
    now: &NaiveDateTime,
) -> rusqlite::Result<bool> {
    let now = fmt_ts(now);
    let count = conn.execute(
        "UPDATE bookings SET code = COALESCE(code, ?1), submitted_at = ?2, updated_at = ?2
         WHERE id = ?3 AND submitted_at IS NULL",
        params![code, now, id],
    )?;
    Ok(count > 0)
}

pub fn touch_booking(conn: &Connection, id: &str, now: &NaiveDateTime) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE bookings SET updated_at = ?1 WHERE id = ?2",
        params![fmt_ts(now), id],
    )?;
    Ok(())
}

// ── Booking Details ──

const DETAIL_COLUMNS: &str = "id, booking_id, room_price_id, check_in, check_out, guest_names, code, \
     status_booking_id, status_payment_id, admin_notes, additional_notes, receipt_url, \
     approved_at, rejected_at, cancelled_at, created_at, updated_at";

fn parse_detail_row(row: &Row) -> rusqlite::Result<BookingDetail> {
    let check_in: String = row.get(3)?;
    let check_out: String = row.get(4)?;
    let guest_names_json: String = row.get(5)?;
    let status_booking_id: i64 = row.get(7)?;
    let status_payment_id: i64 = row.get(8)?;
    let created_at: String = row.get(15)?;
    let updated_at: String = row.get(16)?;

    let guest_names: Vec<String> = serde_json::from_str(&guest_names_json)
        .map_err(|e| conversion_error(5, Type::Text, format!("bad guest list: {e}")))?;
    let status_booking = BookingStatus::from_id(status_booking_id).ok_or_else(|| {
        conversion_error(7, Type::Integer, format!("unknown booking status {status_booking_id}"))
    })?;
    let status_payment = PaymentStatus::from_id(status_payment_id).ok_or_else(|| {
        conversion_error(8, Type::Integer, format!("unknown payment status {status_payment_id}"))
    })?;

    Ok(BookingDetail {
        id: row.get(0)?,
        booking_id: row.get(1)?,
        room_price_id: row.get(2)?,
        check_in: parse_date(3, &check_in)?,
        check_out: parse_date(4, &check_out)?,
        guest_names,
        code: row.get(6)?,
        status_booking,
        status_payment,
        admin_notes: row.get(9)?,
        additional_notes: row.get(10)?,
        receipt_url: row.get(11)?,
        approved_at: parse_opt_ts(12, row.get(12)?)?,
        rejected_at: parse_opt_ts(13, row.get(13)?)?,
        cancelled_at: parse_opt_ts(14, row.get(14)?)?,
        created_at: parse_ts(15, &created_at)?,
        updated_at: parse_ts(16, &updated_at)?,
    })
}

pub fn insert_detail(conn: &Connection, detail: &BookingDetail) -> rusqlite::Result<()> {
    let guest_names = serde_json::to_string(&detail.guest_names)
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;

    conn.execute(
        &format!(
            "INSERT INTO booking_details ({DETAIL_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)"
        ),
        params![
            detail.id,
            detail.booking_id,
            detail.room_price_id,
            detail.check_in.format(DATE_FORMAT).to_string(),
            detail.check_out.format(DATE_FORMAT).to_string(),
            guest_names,
            detail.code,
            detail.status_booking.id(),
            detail.status_payment.id(),
            detail.admin_notes,
            detail.additional_notes,
            detail.receipt_url,
            fmt_opt_ts(&detail.approved_at),
            fmt_opt_ts(&detail.rejected_at),
            fmt_opt_ts(&detail.cancelled_at),
            fmt_ts(&detail.created_at),
            fmt_ts(&detail.updated_at),
        ],
    )?;
    Ok(())
}

pub fn get_detail(conn: &Connection, id: &str) -> rusqlite::Result<Option<BookingDetail>> {
    conn.query_row(
        &format!("SELECT {DETAIL_COLUMNS} FROM booking_details WHERE id = ?1"),
        params![id],
        parse_detail_row,
    )
    .optional()
}

pub fn get_details_for_booking(
    conn: &Connection,
    booking_id: &str,
) -> rusqlite::Result<Vec<BookingDetail>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {DETAIL_COLUMNS} FROM booking_details
         WHERE booking_id = ?1 ORDER BY created_at ASC, rowid ASC"
    ))?;

    let rows = stmt.query_map(params![booking_id], parse_detail_row)?;

    let mut details = vec![];
    for row in rows {
        details.push(row?);
    }
    Ok(details)
}

/// Deletes a draft line item; its additionals go with it.
pub fn delete_draft_detail(conn: &Connection, id: &str) -> rusqlite::Result<bool> {
    let count = conn.execute(
        "DELETE FROM booking_details WHERE id = ?1 AND status_booking_id = ?2",
        params![id, BookingStatus::Draft.id()],
    )?;
    Ok(count > 0)
}

pub fn set_guest_names(
    conn: &Connection,
    id: &str,
    guest_names: &[String],
    now: &NaiveDateTime,
) -> rusqlite::Result<bool> {
    let guest_names = serde_json::to_string(guest_names)
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
    let count = conn.execute(
        "UPDATE booking_details SET guest_names = ?1, updated_at = ?2
         WHERE id = ?3 AND status_booking_id = ?4",
        params![guest_names, fmt_ts(now), id, BookingStatus::Draft.id()],
    )?;
    Ok(count > 0)
}

pub fn set_additional_notes(
    conn: &Connection,
    id: &str,
    notes: Option<&str>,
    now: &NaiveDateTime,
) -> rusqlite::Result<bool> {
    let count = conn.execute(
        "UPDATE booking_details SET additional_notes = ?1, updated_at = ?2
         WHERE id = ?3 AND status_booking_id = ?4",
        params![notes, fmt_ts(now), id, BookingStatus::Draft.id()],
    )?;
    Ok(count > 0)
}

pub fn set_admin_notes(
    conn: &Connection,
    id: &str,
    notes: Option<&str>,
    now: &NaiveDateTime,
) -> rusqlite::Result<bool> {
    let count = conn.execute(
        "UPDATE booking_details SET admin_notes = ?1, updated_at = ?2 WHERE id = ?3",
        params![notes, fmt_ts(now), id],
    )?;
    Ok(count > 0)
}

pub fn set_receipt_url(
    conn: &Connection,
    id: &str,
    url: &str,
    now: &NaiveDateTime,
) -> rusqlite::Result<bool> {
    let count = conn.execute(
        "UPDATE booking_details SET receipt_url = ?1, updated_at = ?2 WHERE id = ?3",
        params![url, fmt_ts(now), id],
    )?;
    Ok(count > 0)
}

/// Gives a draft line item its code and moves it to in-review in one write.
pub fn submit_detail(
    conn: &Connection,
    id: &str,
    code: &str,
    now: &NaiveDateTime,
) -> rusqlite::Result<bool> {
    let count = conn.execute(
        "UPDATE booking_details SET code = ?1, status_booking_id = ?2, updated_at = ?3
         WHERE id = ?4 AND status_booking_id = ?5 AND code IS NULL",
        params![
            code,
            BookingStatus::InReview.id(),
            fmt_ts(now),
            id,
            BookingStatus::Draft.id(),
        ],
    )?;
    Ok(count > 0)
}

/// Compare-and-set on the booking status. When `stamp` is given, the matching
/// timestamp column must still be empty; it is filled in the same write.
pub fn update_booking_status(
    conn: &Connection,
    id: &str,
    from: BookingStatus,
    to: BookingStatus,
    stamp: Option<TerminalStamp>,
    now: &NaiveDateTime,
) -> rusqlite::Result<bool> {
    let now = fmt_ts(now);
    let count = match stamp {
        Some(stamp) => {
            let column = stamp.column();
            conn.execute(
                &format!(
                    "UPDATE booking_details SET status_booking_id = ?1, {column} = ?2, updated_at = ?2
                     WHERE id = ?3 AND status_booking_id = ?4 AND {column} IS NULL"
                ),
                params![to.id(), now, id, from.id()],
            )?
        }
        None => conn.execute(
            "UPDATE booking_details SET status_booking_id = ?1, updated_at = ?2
             WHERE id = ?3 AND status_booking_id = ?4",
            params![to.id(), now, id, from.id()],
        )?,
    };
    Ok(count > 0)
}

pub fn update_payment_status(
    conn: &Connection,
    id: &str,
    from: PaymentStatus,
    to: PaymentStatus,
    now: &NaiveDateTime,
) -> rusqlite::Result<bool> {
    let count = conn.execute(
        "UPDATE booking_details SET status_payment_id = ?1, updated_at = ?2
         WHERE id = ?3 AND status_payment_id = ?4",
        params![to.id(), fmt_ts(now), id, from.id()],
    )?;
    Ok(count > 0)
}

// ── Additionals ──

pub fn insert_additional(
    conn: &Connection,
    additional: &BookingDetailAdditional,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO booking_detail_additionals (id, booking_detail_id, name, price, per_pax, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            additional.id,
            additional.booking_detail_id,
            additional.name,
            additional.price,
            additional.per_pax as i32,
            fmt_ts(&additional.created_at),
        ],
    )?;
    Ok(())
}

pub fn get_additionals_for_detail(
    conn: &Connection,
    detail_id: &str,
) -> rusqlite::Result<Vec<BookingDetailAdditional>> {
    let mut stmt = conn.prepare(
        "SELECT id, booking_detail_id, name, price, per_pax, created_at
         FROM booking_detail_additionals WHERE booking_detail_id = ?1
         ORDER BY created_at ASC, rowid ASC",
    )?;

    let rows = stmt.query_map(params![detail_id], |row| {
        let created_at: String = row.get(5)?;
        Ok(BookingDetailAdditional {
            id: row.get(0)?,
            booking_detail_id: row.get(1)?,
            name: row.get(2)?,
            price: row.get(3)?,
            per_pax: row.get::<_, i32>(4)? != 0,
            created_at: parse_ts(5, &created_at)?,
        })
    })?;

    let mut additionals = vec![];
    for row in rows {
        additionals.push(row?);
    }
    Ok(additionals)
}

pub fn delete_additionals_for_detail(conn: &Connection, detail_id: &str) -> rusqlite::Result<usize> {
    conn.execute(
        "DELETE FROM booking_detail_additionals WHERE booking_detail_id = ?1",
        params![detail_id],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn setup_db() -> Connection {
        db::init_db(":memory:").unwrap()
    }

    fn ts(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, TS_FORMAT).unwrap()
    }

    fn booking(id: &str, agent: &str) -> Booking {
        Booking {
            id: id.to_string(),
            agent_id: agent.to_string(),
            code: None,
            submitted_at: None,
            created_at: ts("2025-06-16 09:00:00"),
            updated_at: ts("2025-06-16 09:00:00"),
        }
    }

    fn detail(id: &str, booking_id: &str) -> BookingDetail {
        BookingDetail {
            id: id.to_string(),
            booking_id: booking_id.to_string(),
            room_price_id: "rp-deluxe".to_string(),
            check_in: NaiveDate::from_ymd_opt(2025, 7, 1).unwrap(),
            check_out: NaiveDate::from_ymd_opt(2025, 7, 3).unwrap(),
            guest_names: vec!["Alice".to_string()],
            code: None,
            status_booking: BookingStatus::Draft,
            status_payment: PaymentStatus::Unpaid,
            admin_notes: None,
            additional_notes: Some("late arrival".to_string()),
            receipt_url: None,
            approved_at: None,
            rejected_at: None,
            cancelled_at: None,
            created_at: ts("2025-06-16 09:00:00"),
            updated_at: ts("2025-06-16 09:00:00"),
        }
    }

    #[test]
    fn test_detail_round_trip() {
        let conn = setup_db();
        insert_booking(&conn, &booking("b1", "agent-1")).unwrap();
        insert_detail(&conn, &detail("d1", "b1")).unwrap();

        let loaded = get_detail(&conn, "d1").unwrap().unwrap();
        assert_eq!(loaded.guest_names, vec!["Alice"]);
        assert_eq!(loaded.status_booking, BookingStatus::Draft);
        assert_eq!(loaded.nights(), 2);
        assert_eq!(loaded.additional_notes.as_deref(), Some("late arrival"));
        assert!(get_detail(&conn, "missing").unwrap().is_none());
    }

    #[test]
    fn test_one_cart_per_agent() {
        let conn = setup_db();
        insert_booking(&conn, &booking("b1", "agent-1")).unwrap();
        assert!(insert_booking(&conn, &booking("b2", "agent-1")).is_err());

        assert!(mark_booking_submitted(&conn, "b1", "BK250616AAAA", &ts("2025-06-16 10:00:00")).unwrap());
        insert_booking(&conn, &booking("b2", "agent-1")).unwrap();

        let cart = get_cart_for_agent(&conn, "agent-1").unwrap().unwrap();
        assert_eq!(cart.id, "b2");
        assert_eq!(get_bookings_for_agent(&conn, "agent-1", 10).unwrap().len(), 1);
    }

    #[test]
    fn test_draft_rows_cannot_hold_codes() {
        let conn = setup_db();
        insert_booking(&conn, &booking("b1", "agent-1")).unwrap();
        let mut coded = detail("d1", "b1");
        coded.code = Some("RS250616AAAA".to_string());
        assert!(insert_detail(&conn, &coded).is_err());
    }

    #[test]
    fn test_codes_and_stamps_are_immutable() {
        let conn = setup_db();
        let now = ts("2025-06-16 10:00:00");
        insert_booking(&conn, &booking("b1", "agent-1")).unwrap();
        insert_detail(&conn, &detail("d1", "b1")).unwrap();

        assert!(submit_detail(&conn, "d1", "RS250616AAAA", &now).unwrap());
        assert!(!submit_detail(&conn, "d1", "RS250616BBBB", &now).unwrap());

        // the trigger rejects direct rewrites too
        assert!(conn
            .execute("UPDATE booking_details SET code = 'X' WHERE id = 'd1'", [])
            .is_err());

        assert!(update_booking_status(
            &conn,
            "d1",
            BookingStatus::InReview,
            BookingStatus::Confirmed,
            Some(TerminalStamp::ApprovedAt),
            &now,
        )
        .unwrap());
        assert!(conn
            .execute(
                "UPDATE booking_details SET approved_at = '2030-01-01 00:00:00' WHERE id = 'd1'",
                [],
            )
            .is_err());

        let loaded = get_detail(&conn, "d1").unwrap().unwrap();
        assert_eq!(loaded.code.as_deref(), Some("RS250616AAAA"));
        assert_eq!(loaded.approved_at, Some(now));
    }

    #[test]
    fn test_status_update_is_compare_and_set() {
        let conn = setup_db();
        let now = ts("2025-06-16 10:00:00");
        insert_booking(&conn, &booking("b1", "agent-1")).unwrap();
        insert_detail(&conn, &detail("d1", "b1")).unwrap();

        // stale "from" status matches nothing
        assert!(!update_booking_status(
            &conn,
            "d1",
            BookingStatus::InReview,
            BookingStatus::Rejected,
            Some(TerminalStamp::RejectedAt),
            &now,
        )
        .unwrap());
        assert!(!update_payment_status(&conn, "d1", PaymentStatus::Paid, PaymentStatus::Refunded, &now).unwrap());
        assert!(update_payment_status(&conn, "d1", PaymentStatus::Unpaid, PaymentStatus::Paid, &now).unwrap());
    }

    #[test]
    fn test_additionals_cascade_with_detail() {
        let conn = setup_db();
        insert_booking(&conn, &booking("b1", "agent-1")).unwrap();
        insert_detail(&conn, &detail("d1", "b1")).unwrap();
        insert_additional(
            &conn,
            &BookingDetailAdditional {
                id: "a1".to_string(),
                booking_detail_id: "d1".to_string(),
                name: "Extra bed".to_string(),
                price: 200_000,
                per_pax: false,
                created_at: ts("2025-06-16 09:00:00"),
            },
        )
        .unwrap();
        assert_eq!(get_additionals_for_detail(&conn, "d1").unwrap().len(), 1);

        assert!(delete_draft_detail(&conn, "d1").unwrap());
        assert!(get_additionals_for_detail(&conn, "d1").unwrap().is_empty());
    }
}
