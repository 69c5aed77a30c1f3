//! Read models returned by the service.

use chrono::{DateTime, Utc};
use rifa_core::types::{
    AllocationPolicy, Money, PaymentId, Raffle, RaffleId, RaffleStatus, TicketId, TicketNumber,
    UserId,
};
use serde::Serialize;

/// Input for creating a raffle
#[derive(Clone, Debug)]
pub struct NewRaffle {
    /// Title
    pub title: String,
    /// Description
    pub description: Option<String>,
    /// Cover image
    pub image_url: Option<String>,
    /// Base price per ticket
    pub price: Money,
    /// Size of the number space
    pub total_numbers: u32,
    /// Allocation policy
    pub policy: AllocationPolicy,
}

/// A raffle as shown in listings
#[derive(Clone, Debug, Serialize)]
pub struct RaffleSummary {
    /// Raffle
    pub id: RaffleId,
    /// Title
    pub title: String,
    /// Description
    pub description: Option<String>,
    /// Cover image
    pub image_url: Option<String>,
    /// Allocation policy
    pub policy: AllocationPolicy,
    /// Active or closed
    pub status: RaffleStatus,
    /// Base price
    pub base_price: Money,
    /// Price right now
    pub current_price: Money,
    /// Whether `current_price` is promotional
    pub promotional: bool,
    /// End of the running promotion
    pub promotion_ends_at: Option<DateTime<Utc>>,
    /// Size of the number space
    pub total_numbers: u32,
    /// Numbers held or sold
    pub sold: u32,
    /// Numbers still free
    pub remaining: u32,
    /// Winning ticket, once drawn
    pub winner: Option<TicketId>,
}

impl RaffleSummary {
    pub(crate) fn new(raffle: &Raffle, occupied: usize, now: DateTime<Utc>) -> Self {
        let current_price = raffle.price_at(now);
        let promotional = raffle
            .promotion
            .as_ref()
            .is_some_and(|p| p.is_active_at(now));
        let sold = u32::try_from(occupied).unwrap_or(u32::MAX);
        Self {
            id: raffle.id,
            title: raffle.title.clone(),
            description: raffle.description.clone(),
            image_url: raffle.image_url.clone(),
            policy: raffle.policy,
            status: raffle.status,
            base_price: raffle.price,
            current_price,
            promotional,
            promotion_ends_at: raffle
                .promotion
                .as_ref()
                .filter(|_| promotional)
                .map(|p| p.ends_at),
            total_numbers: raffle.total_numbers,
            sold,
            remaining: raffle.total_numbers.saturating_sub(sold),
            winner: raffle.winner,
        }
    }
}

/// A raffle page: the summary plus which numbers are taken
#[derive(Clone, Debug, Serialize)]
pub struct RaffleDetail {
    /// Summary
    #[serde(flatten)]
    pub summary: RaffleSummary,
    /// Numbers held or sold, ascending
    pub occupied: Vec<TicketNumber>,
}

/// One ticket on the buyer's dashboard
#[derive(Clone, Debug, Serialize)]
pub struct DashboardTicket {
    /// Ticket
    pub id: TicketId,
    /// Number
    pub number: TicketNumber,
    /// Price charged or quoted
    pub price: Money,
    /// Whether the ticket is paid
    pub paid: bool,
    /// Attached payment
    pub payment_id: Option<PaymentId>,
    /// When the number was held
    pub created_at: DateTime<Utc>,
    /// Settlement time
    pub paid_at: Option<DateTime<Utc>>,
    /// Seconds left on the hold, for pending tickets
    pub seconds_remaining: Option<i64>,
    /// Whether this ticket won
    pub winner: bool,
}

/// The buyer's tickets in one raffle
#[derive(Clone, Debug, Serialize)]
pub struct DashboardEntry {
    /// Raffle
    pub raffle_id: RaffleId,
    /// Title
    pub title: String,
    /// Active or closed
    pub status: RaffleStatus,
    /// Winning number, once drawn
    pub winning_number: Option<TicketNumber>,
    /// Tickets, newest first
    pub tickets: Vec<DashboardTicket>,
}

/// Winner information for a closed raffle
#[derive(Clone, Debug, Serialize)]
pub struct WinnerDetails {
    /// Raffle
    pub raffle_id: RaffleId,
    /// Title
    pub title: String,
    /// Winning ticket
    pub ticket_id: TicketId,
    /// Winning number
    pub number: TicketNumber,
    /// Ticket owner
    pub owner: UserId,
    /// Price paid for the winning ticket
    pub price: Money,
    /// Raffle base price per ticket
    pub base_price: Money,
    /// When the winning number was bought
    pub purchased_at: DateTime<Utc>,
    /// When the winning ticket was paid
    pub paid_at: Option<DateTime<Utc>>,
}
