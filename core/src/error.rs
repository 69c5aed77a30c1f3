//! Error taxonomy for raffle operations.

use crate::gateway::GatewayError;
use crate::store::StoreError;
use crate::types::{ExternalId, PaymentStatus, RaffleId, TicketId, TicketNumber};
use thiserror::Error;

/// Errors surfaced by purchase, payment and draw operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RaffleError {
    /// One or more requested numbers are already held or sold
    #[error("numbers already taken in raffle {raffle_id}: {}", join_numbers(.numbers))]
    NumberUnavailable {
        /// Raffle
        raffle_id: RaffleId,
        /// Every conflicting number
        numbers: Vec<TicketNumber>,
    },

    /// Pooled request exceeds the remaining supply
    #[error("requested {requested} tickets but only {available} remain in raffle {raffle_id}")]
    InsufficientSupply {
        /// Raffle
        raffle_id: RaffleId,
        /// Quantity asked for
        requested: u32,
        /// Numbers still free
        available: u32,
    },

    /// The payment provider failed or timed out
    #[error("payment provider error: {0}")]
    PaymentProviderError(#[from] GatewayError),

    /// Inbound notification failed signature verification
    #[error("notification signature verification failed")]
    InvalidNotification,

    /// Confirmation for a payment that is already paid
    #[error("payment {0} is already finalized")]
    AlreadyFinalized(ExternalId),

    /// A paid pooled payment could not get enough numbers. Operator alert.
    #[error(
        "raffle {raffle_id} cannot allocate {needed} numbers for payment {external_id}: only {available} free"
    )]
    AllocationRaceFatal {
        /// Raffle
        raffle_id: RaffleId,
        /// Settled payment left unallocated
        external_id: ExternalId,
        /// Tickets owed
        needed: u32,
        /// Numbers left
        available: u32,
    },

    /// The hold or reservation lapsed, or the referenced tickets were reclaimed
    #[error("reservation expired: {0}")]
    ReservationExpired(String),

    /// Draw requested with no paid tickets
    #[error("raffle {0} has no paid tickets to draw from")]
    NoEligibleTickets(RaffleId),

    /// Raffle does not exist
    #[error("raffle {0} not found")]
    RaffleNotFound(RaffleId),

    /// Payment does not exist
    #[error("payment {0} not found")]
    PaymentNotFound(ExternalId),

    /// No winner has been drawn yet
    #[error("raffle {0} has not been drawn")]
    RaffleNotDrawn(RaffleId),

    /// The raffle was drawn and accepts no further changes
    #[error("raffle {raffle_id} is closed")]
    RaffleClosed {
        /// Raffle
        raffle_id: RaffleId,
        /// Winning ticket
        winner: Option<TicketId>,
    },

    /// Confirmation arrived for a cancelled or expired payment
    #[error("payment {external_id} is {status} and cannot be settled")]
    PaymentNotPending {
        /// Payment
        external_id: ExternalId,
        /// Its terminal status
        status: PaymentStatus,
    },

    /// The caller does not own the referenced resource
    #[error("resource belongs to another user")]
    NotOwner,

    /// Malformed or out-of-range input
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Storage failure
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl RaffleError {
    /// Shorthand for [`RaffleError::InvalidRequest`]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Shorthand for [`RaffleError::ReservationExpired`]
    pub fn expired(message: impl Into<String>) -> Self {
        Self::ReservationExpired(message.into())
    }

    /// Stable machine-readable code, used in API error bodies and metric labels
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NumberUnavailable { .. } => "number_unavailable",
            Self::InsufficientSupply { .. } => "insufficient_supply",
            Self::PaymentProviderError(_) => "payment_provider_error",
            Self::InvalidNotification => "invalid_notification",
            Self::AlreadyFinalized(_) => "already_finalized",
            Self::AllocationRaceFatal { .. } => "allocation_race_fatal",
            Self::ReservationExpired(_) => "reservation_expired",
            Self::NoEligibleTickets(_) => "no_eligible_tickets",
            Self::RaffleNotFound(_) => "raffle_not_found",
            Self::PaymentNotFound(_) => "payment_not_found",
            Self::RaffleNotDrawn(_) => "raffle_not_drawn",
            Self::RaffleClosed { .. } => "raffle_closed",
            Self::PaymentNotPending { .. } => "payment_not_pending",
            Self::NotOwner => "not_owner",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Store(_) => "store_error",
        }
    }
}

fn join_numbers(numbers: &[TicketNumber]) -> String {
    numbers
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
