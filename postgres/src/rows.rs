//! Row tuples and their conversion into domain types.

use chrono::{DateTime, Utc};
use rifa_core::pricing::Promotion;
use rifa_core::store::{StoreError, StoreResult};
use rifa_core::types::{
    AllocationPolicy, ExternalId, Money, Payment, PaymentId, PaymentScope, PaymentStatus, Raffle,
    RaffleId, RaffleStatus, Reservation, ReservationToken, Ticket, TicketId, TicketNumber,
    TicketStatus, UserId,
};
use uuid::Uuid;

pub(crate) const RAFFLE_COLUMNS: &str = "id, title, description, image_url, price_cents, \
     promo_price_cents, promo_ends_at, total_numbers, policy, status, winner_ticket_id, created_at";

pub(crate) const TICKET_COLUMNS: &str =
    "id, raffle_id, owner_id, number, price_cents, payment_id, status, paid_at, created_at";

pub(crate) const PAYMENT_COLUMNS: &str = "id, external_id, owner_id, raffle_id, amount_cents, \
     status, policy, quantity, created_at, updated_at, charge_expires_at";

pub(crate) const RESERVATION_COLUMNS: &str =
    "token, raffle_id, owner_id, quantity, unit_price_cents, created_at, expires_at";

pub(crate) type RaffleRow = (
    Uuid,
    String,
    Option<String>,
    Option<String>,
    i64,
    Option<i64>,
    Option<DateTime<Utc>>,
    i32,
    String,
    String,
    Option<Uuid>,
    DateTime<Utc>,
);

pub(crate) type TicketRow = (
    Uuid,
    Uuid,
    Uuid,
    i32,
    i64,
    Option<Uuid>,
    String,
    Option<DateTime<Utc>>,
    DateTime<Utc>,
);

pub(crate) type PaymentRow = (
    Uuid,
    String,
    Uuid,
    Uuid,
    i64,
    String,
    String,
    i32,
    DateTime<Utc>,
    DateTime<Utc>,
    DateTime<Utc>,
);

pub(crate) type ReservationRow = (Uuid, Uuid, Uuid, i32, i64, DateTime<Utc>, DateTime<Utc>);

fn corrupt(what: impl std::fmt::Display) -> StoreError {
    StoreError::Corrupt(what.to_string())
}

pub(crate) fn money(cents: i64) -> StoreResult<Money> {
    u64::try_from(cents)
        .map(Money::from_cents)
        .map_err(|_| corrupt(format!("negative amount {cents}")))
}

pub(crate) fn cents(money: Money) -> StoreResult<i64> {
    i64::try_from(money.cents()).map_err(|_| corrupt(format!("amount {money} out of range")))
}

pub(crate) fn count(value: i32, column: &str) -> StoreResult<u32> {
    u32::try_from(value).map_err(|_| corrupt(format!("negative {column} {value}")))
}

pub(crate) fn int(value: u32, column: &str) -> StoreResult<i32> {
    i32::try_from(value).map_err(|_| corrupt(format!("{column} {value} out of range")))
}

pub(crate) fn raffle(row: RaffleRow) -> StoreResult<Raffle> {
    let (
        id,
        title,
        description,
        image_url,
        price_cents,
        promo_price,
        promo_ends_at,
        total_numbers,
        policy,
        status,
        winner,
        created_at,
    ) = row;

    let promotion = match (promo_price, promo_ends_at) {
        (Some(price), Some(ends_at)) => Some(Promotion::new(money(price)?, ends_at)),
        (None, None) => None,
        _ => return Err(corrupt(format!("raffle {id} has a half-set promotion"))),
    };

    Ok(Raffle {
        id: RaffleId::from_uuid(id),
        title,
        description,
        image_url,
        price: money(price_cents)?,
        promotion,
        total_numbers: count(total_numbers, "total_numbers")?,
        policy: AllocationPolicy::parse(&policy)
            .ok_or_else(|| corrupt(format!("unknown policy '{policy}'")))?,
        status: RaffleStatus::parse(&status)
            .ok_or_else(|| corrupt(format!("unknown raffle status '{status}'")))?,
        winner: winner.map(TicketId::from_uuid),
        created_at,
    })
}

pub(crate) fn ticket(row: TicketRow) -> StoreResult<Ticket> {
    let (id, raffle_id, owner_id, number, price_cents, payment_id, status, paid_at, created_at) =
        row;

    let status = match (status.as_str(), paid_at) {
        ("pending", _) => TicketStatus::Pending,
        ("paid", Some(paid_at)) => TicketStatus::Paid { paid_at },
        (other, _) => return Err(corrupt(format!("ticket {id} has status '{other}'"))),
    };

    Ok(Ticket {
        id: TicketId::from_uuid(id),
        raffle_id: RaffleId::from_uuid(raffle_id),
        owner: UserId::from_uuid(owner_id),
        number: TicketNumber::new(count(number, "number")?),
        price: money(price_cents)?,
        payment_id: payment_id.map(PaymentId::from_uuid),
        created_at,
        status,
    })
}

/// Builds a payment. `tickets` are the attached ticket ids of a manual payment.
pub(crate) fn payment(row: PaymentRow, tickets: Vec<Uuid>) -> StoreResult<Payment> {
    let (
        id,
        external_id,
        owner_id,
        raffle_id,
        amount_cents,
        status,
        policy,
        quantity,
        created_at,
        updated_at,
        charge_expires_at,
    ) = row;

    let scope = match AllocationPolicy::parse(&policy) {
        Some(AllocationPolicy::Manual) => PaymentScope::Manual {
            tickets: tickets.into_iter().map(TicketId::from_uuid).collect(),
        },
        Some(AllocationPolicy::Pooled) => PaymentScope::Pooled {
            quantity: count(quantity, "quantity")?,
        },
        None => return Err(corrupt(format!("unknown policy '{policy}'"))),
    };

    Ok(Payment {
        id: PaymentId::from_uuid(id),
        external_id: ExternalId::new(external_id),
        owner: UserId::from_uuid(owner_id),
        raffle_id: RaffleId::from_uuid(raffle_id),
        amount: money(amount_cents)?,
        status: PaymentStatus::parse(&status)
            .ok_or_else(|| corrupt(format!("unknown payment status '{status}'")))?,
        scope,
        created_at,
        updated_at,
        charge_expires_at,
    })
}

pub(crate) fn reservation(row: ReservationRow) -> StoreResult<Reservation> {
    let (token, raffle_id, owner_id, quantity, unit_price_cents, created_at, expires_at) = row;
    Ok(Reservation {
        token: ReservationToken::from_uuid(token),
        raffle_id: RaffleId::from_uuid(raffle_id),
        owner: UserId::from_uuid(owner_id),
        quantity: count(quantity, "quantity")?,
        unit_price: money(unit_price_cents)?,
        created_at,
        expires_at,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn raffle_row() -> RaffleRow {
        (
            Uuid::new_v4(),
            "Moto".to_string(),
            None,
            None,
            1_000,
            Some(800),
            Some(now()),
            100,
            "pooled".to_string(),
            "active".to_string(),
            None,
            now(),
        )
    }

    #[test]
    fn decodes_raffle_with_promotion() {
        let decoded = raffle(raffle_row()).unwrap();
        assert_eq!(decoded.policy, AllocationPolicy::Pooled);
        assert_eq!(decoded.promotion, Some(Promotion::new(Money::from_cents(800), now())));
    }

    #[test]
    fn rejects_half_set_promotion() {
        let mut row = raffle_row();
        row.6 = None;
        assert!(matches!(raffle(row), Err(StoreError::Corrupt(_))));
    }

    #[test]
    fn paid_ticket_needs_a_settlement_time() {
        let row: TicketRow = (
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            7,
            1_000,
            None,
            "paid".to_string(),
            None,
            now(),
        );
        assert!(matches!(ticket(row), Err(StoreError::Corrupt(_))));
    }

    #[test]
    fn negative_amounts_are_corrupt() {
        assert!(money(-1).is_err());
        assert_eq!(money(250).unwrap(), Money::from_cents(250));
    }
}
