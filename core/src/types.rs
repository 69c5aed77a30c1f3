//! Domain types for the raffle system.
//!
//! Identifiers, the [`Money`] value object, ticket numbers and the four
//! persistent entities: [`Raffle`], [`Ticket`], [`Reservation`] and [`Payment`].

use crate::error::RaffleError;
use crate::pricing::{self, Promotion};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! uuid_identifier {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            #[doc = concat!("Creates a new random `", stringify!($name), "`")]
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[doc = concat!("Create a `", stringify!($name), "` from a `Uuid`")]
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the inner UUID
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_identifier!(
    /// Unique identifier for a raffle
    RaffleId
);
uuid_identifier!(
    /// Unique identifier for a ticket row
    TicketId
);
uuid_identifier!(
    /// Internal identifier for a payment record
    PaymentId
);
uuid_identifier!(
    /// Identifier of the buyer, supplied by the identity layer
    UserId
);
uuid_identifier!(
    /// Opaque handle for an un-numbered pooled reservation
    ReservationToken
);

/// Provider-side identifier of a charge (the PIX `txid`).
///
/// This is the key reconciliation works on: polls, notifications and
/// operator actions all address a payment by its external id.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExternalId(String);

impl ExternalId {
    /// Wrap a provider identifier
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Ticket numbers
// ============================================================================

/// A ticket number inside a raffle. Valid numbers are `1..=total_numbers`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketNumber(u32);

impl TicketNumber {
    /// Creates a ticket number
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Returns the raw number
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for TicketNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Money Value Object (cents-based to avoid floating point errors)
// ============================================================================

/// Represents an amount in BRL cents
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(u64);

impl Money {
    /// Zero reais
    pub const ZERO: Self = Self(0);

    /// Creates a `Money` value from cents
    #[must_use]
    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    /// Creates a `Money` value from whole reais with overflow checking
    #[must_use]
    pub const fn checked_from_reais(reais: u64) -> Option<Self> {
        match reais.checked_mul(100) {
            Some(cents) => Some(Self(cents)),
            None => None,
        }
    }

    /// Returns the amount in cents
    #[must_use]
    pub const fn cents(&self) -> u64 {
        self.0
    }

    /// Checks if the amount is zero
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Adds two money amounts with overflow checking
    #[must_use]
    pub const fn checked_add(self, other: Self) -> Option<Self> {
        match self.0.checked_add(other.0) {
            Some(result) => Some(Self(result)),
            None => None,
        }
    }

    /// Multiplies money by a quantity with overflow checking
    #[must_use]
    pub const fn checked_multiply(self, quantity: u32) -> Option<Self> {
        match self.0.checked_mul(quantity as u64) {
            Some(result) => Some(Self(result)),
            None => None,
        }
    }

    /// Splits the amount into `parts` shares that sum back to the amount.
    ///
    /// Leftover cents go one each to the first shares, so shares differ by
    /// at most one cent. Returns an empty vector when `parts` is zero.
    #[must_use]
    pub fn split(self, parts: u32) -> Vec<Self> {
        if parts == 0 {
            return Vec::new();
        }
        let parts_u64 = u64::from(parts);
        let base = self.0 / parts_u64;
        let remainder = self.0 % parts_u64;
        (0..parts_u64)
            .map(|i| Self(base + u64::from(i < remainder)))
            .collect()
    }

    /// Parses a decimal amount such as `"20"`, `"20.5"` or `"20,50"`.
    ///
    /// More than two fractional digits is rejected rather than rounded.
    #[must_use]
    pub fn parse_decimal(raw: &str) -> Option<Self> {
        let raw = raw.trim().replace(',', ".");
        let (whole, fraction) = match raw.split_once('.') {
            Some((whole, fraction)) => (whole, fraction),
            None => (raw.as_str(), ""),
        };
        if whole.is_empty() && fraction.is_empty() {
            return None;
        }
        if fraction.len() > 2
            || !whole.chars().all(|c| c.is_ascii_digit())
            || !fraction.chars().all(|c| c.is_ascii_digit())
        {
            return None;
        }
        let whole: u64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
        let fraction: u64 = match fraction.len() {
            0 => 0,
            1 => fraction.parse::<u64>().ok()? * 10,
            _ => fraction.parse().ok()?,
        };
        whole.checked_mul(100)?.checked_add(fraction).map(Self)
    }

    /// Formats as a plain decimal with two places, e.g. `"20.00"`.
    #[must_use]
    pub fn to_decimal_string(self) -> String {
        format!("{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R$ {},{:02}", self.0 / 100, self.0 % 100)
    }
}

// ============================================================================
// Raffle
// ============================================================================

/// How a raffle hands out numbers
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationPolicy {
    /// The buyer picks explicit numbers; they are held while payment is pending.
    Manual,
    /// The buyer asks for a quantity; numbers are drawn at random after payment.
    Pooled,
}

impl AllocationPolicy {
    /// Storage representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Pooled => "pooled",
        }
    }

    /// Parse the storage representation
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "manual" => Some(Self::Manual),
            "pooled" => Some(Self::Pooled),
            _ => None,
        }
    }
}

/// Lifecycle of a raffle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RaffleStatus {
    /// Accepting purchases
    Active,
    /// A winner has been drawn; no further sales
    Closed,
}

impl RaffleStatus {
    /// Storage representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Closed => "closed",
        }
    }

    /// Parse the storage representation
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

/// A raffle and its pricing configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Raffle {
    /// Raffle identifier
    pub id: RaffleId,
    /// Display title (also sent to the payer's bank app)
    pub title: String,
    /// Free-form description
    pub description: Option<String>,
    /// Cover image location
    pub image_url: Option<String>,
    /// Base price per ticket
    pub price: Money,
    /// Optional time-boxed promotional price
    pub promotion: Option<Promotion>,
    /// Size of the number space, numbers run `1..=total_numbers`
    pub total_numbers: u32,
    /// Allocation policy
    pub policy: AllocationPolicy,
    /// Active or closed
    pub status: RaffleStatus,
    /// Winning ticket once drawn
    pub winner: Option<TicketId>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl Raffle {
    /// Returns true once a winner was drawn
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.status == RaffleStatus::Closed
    }

    /// Fails with [`RaffleError::RaffleClosed`] when the raffle no longer sells.
    ///
    /// # Errors
    ///
    /// Returns `RaffleClosed` carrying the winner when the raffle is closed.
    pub fn ensure_open(&self) -> Result<(), RaffleError> {
        if self.is_closed() {
            return Err(RaffleError::RaffleClosed {
                raffle_id: self.id,
                winner: self.winner,
            });
        }
        Ok(())
    }

    /// Whether `number` lies in this raffle's number space
    #[must_use]
    pub const fn contains(&self, number: TicketNumber) -> bool {
        number.get() >= 1 && number.get() <= self.total_numbers
    }

    /// Unit price in effect at `at`
    #[must_use]
    pub fn price_at(&self, at: DateTime<Utc>) -> Money {
        pricing::effective_price(self.price, self.promotion.as_ref(), at)
    }
}

// ============================================================================
// Tickets and reservations
// ============================================================================

/// Payment state of a ticket row
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TicketStatus {
    /// Held while the buyer pays
    Pending,
    /// Settled
    Paid {
        /// Settlement time reported by the provider
        paid_at: DateTime<Utc>,
    },
}

/// A numbered ticket.
///
/// Every row carries a number; pooled purchases only produce rows once paid.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    /// Ticket identifier
    pub id: TicketId,
    /// Owning raffle
    pub raffle_id: RaffleId,
    /// Buyer
    pub owner: UserId,
    /// Number inside the raffle
    pub number: TicketNumber,
    /// Price snapshot (set at reservation, rewritten when a charge is issued)
    pub price: Money,
    /// Payment the ticket is attached to, if a charge was requested
    pub payment_id: Option<PaymentId>,
    /// When the number was first held
    pub created_at: DateTime<Utc>,
    /// Pending or paid
    #[serde(flatten)]
    pub status: TicketStatus,
}

impl Ticket {
    /// A freshly held ticket awaiting payment
    #[must_use]
    pub fn pending(
        raffle_id: RaffleId,
        owner: UserId,
        number: TicketNumber,
        price: Money,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TicketId::new(),
            raffle_id,
            owner,
            number,
            price,
            payment_id: None,
            created_at,
            status: TicketStatus::Pending,
        }
    }

    /// Returns true while the ticket awaits payment
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self.status, TicketStatus::Pending)
    }

    /// Returns the settlement time of a paid ticket
    #[must_use]
    pub const fn paid_at(&self) -> Option<DateTime<Utc>> {
        match self.status {
            TicketStatus::Paid { paid_at } => Some(paid_at),
            TicketStatus::Pending => None,
        }
    }

    /// Instant at which a pending hold lapses
    #[must_use]
    pub fn hold_deadline(&self, hold: Duration) -> DateTime<Utc> {
        self.created_at + hold
    }

    /// Time left on the hold, clamped at zero. Paid tickets report `None`.
    #[must_use]
    pub fn hold_remaining(&self, now: DateTime<Utc>, hold: Duration) -> Option<Duration> {
        if !self.is_pending() {
            return None;
        }
        let left = self.hold_deadline(hold) - now;
        Some(left.max(Duration::zero()))
    }
}

/// An un-numbered pooled purchase intent.
///
/// Consumes no numbers. Supply is only checked when it is created and when a
/// charge is issued against it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    /// Handle returned to the buyer
    pub token: ReservationToken,
    /// Target raffle
    pub raffle_id: RaffleId,
    /// Buyer
    pub owner: UserId,
    /// Number of tickets wanted
    pub quantity: u32,
    /// Unit price quoted when the reservation was made
    pub unit_price: Money,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// The token is useless after this instant
    pub expires_at: DateTime<Utc>,
}

impl Reservation {
    /// Whether the reservation lapsed at `now`
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Result of a successful purchase
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Allocation {
    /// Manual policy: the numbers are held as pending tickets
    Numbered(Vec<Ticket>),
    /// Pooled policy: a reservation awaiting payment
    Reserved(Reservation),
}

// ============================================================================
// Payments
// ============================================================================

/// Reconciliation status of a payment
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Charge issued, awaiting settlement
    Pending,
    /// Settled and allocated
    Paid,
    /// Withdrawn by the merchant
    Cancelled,
    /// Lapsed at the provider
    Expired,
}

impl PaymentStatus {
    /// Storage representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }

    /// Parse the storage representation
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "paid" => Some(Self::Paid),
            "cancelled" => Some(Self::Cancelled),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }

    /// Every status except `Pending` is final
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a payment pays for
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum PaymentScope {
    /// Explicit pending tickets
    Manual {
        /// Attached tickets
        tickets: Vec<TicketId>,
    },
    /// A quantity of random numbers, materialized on settlement
    Pooled {
        /// Tickets to draw
        quantity: u32,
    },
}

impl PaymentScope {
    /// Allocation policy this scope belongs to
    #[must_use]
    pub const fn policy(&self) -> AllocationPolicy {
        match self {
            Self::Manual { .. } => AllocationPolicy::Manual,
            Self::Pooled { .. } => AllocationPolicy::Pooled,
        }
    }

    /// Number of tickets covered
    #[must_use]
    pub fn ticket_count(&self) -> u32 {
        match self {
            Self::Manual { tickets } => u32::try_from(tickets.len()).unwrap_or(u32::MAX),
            Self::Pooled { quantity } => *quantity,
        }
    }
}

/// A charge issued with the payment provider and its reconciliation state
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    /// Internal identifier
    pub id: PaymentId,
    /// Provider identifier (unique)
    pub external_id: ExternalId,
    /// Payer
    pub owner: UserId,
    /// Raffle paid for
    pub raffle_id: RaffleId,
    /// Total charged
    pub amount: Money,
    /// Reconciliation status
    pub status: PaymentStatus,
    /// Tickets or quantity covered
    pub scope: PaymentScope,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last status change
    pub updated_at: DateTime<Utc>,
    /// When the provider stops accepting payment for the charge
    pub charge_expires_at: DateTime<Utc>,
}
