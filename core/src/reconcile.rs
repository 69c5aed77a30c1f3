//! Payment reconciliation state machine.
//!
//! ```text
//! Pending --Confirm--> Paid          (allocates tickets)
//! Pending --Cancel---> Cancelled
//! Pending --Expire---> Expired
//! Paid    --Confirm--> Paid          (no-op, AlreadyFinalized)
//! ```
//!
//! Every non-pending status is terminal. Polls, provider notifications, the
//! reconciliation sweep and operator actions all feed the same [`PaymentAction`]
//! into [`PaymentReducer`], so whichever arrives first wins and the rest see
//! `AlreadyFinalized`. The reducer only describes the writes; the runtime
//! executes them inside the transaction holding the payment lock.

use crate::reducer::Reducer;
use crate::types::{Money, Payment, PaymentId, PaymentScope, PaymentStatus, RaffleId, TicketId, UserId};
use chrono::{DateTime, Utc};
use smallvec::{SmallVec, smallvec};
use std::fmt;

/// What caused a reconciliation attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Trigger {
    /// The buyer's client asked for the status
    Poll,
    /// The provider pushed a notification
    Notification,
    /// The periodic reconciliation sweep
    Sweep,
    /// An operator forced the transition
    Operator,
}

impl Trigger {
    /// Label used in logs and metrics
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Poll => "poll",
            Self::Notification => "notification",
            Self::Sweep => "sweep",
            Self::Operator => "operator",
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs to the payment state machine
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PaymentAction {
    /// The provider reports the charge settled
    Confirm {
        /// Settlement time
        paid_at: DateTime<Utc>,
    },
    /// The charge was withdrawn
    Cancel {
        /// Observation time
        at: DateTime<Utc>,
    },
    /// The charge lapsed
    Expire {
        /// Observation time
        at: DateTime<Utc>,
    },
}

impl PaymentAction {
    /// Status the action drives towards
    #[must_use]
    pub const fn target(&self) -> PaymentStatus {
        match self {
            Self::Confirm { .. } => PaymentStatus::Paid,
            Self::Cancel { .. } => PaymentStatus::Cancelled,
            Self::Expire { .. } => PaymentStatus::Expired,
        }
    }
}

/// Writes the runtime must perform, in order
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PaymentEffect {
    /// Persist the new status
    RecordStatus {
        /// Payment
        payment_id: PaymentId,
        /// New status
        status: PaymentStatus,
        /// Change time
        at: DateTime<Utc>,
    },
    /// Manual policy: flip the attached pending tickets to paid
    SettleTickets {
        /// Payment
        payment_id: PaymentId,
        /// Tickets to settle
        tickets: Vec<TicketId>,
        /// Settlement time
        paid_at: DateTime<Utc>,
    },
    /// Pooled policy: draw fresh numbers and insert them as paid tickets
    MaterializeTickets {
        /// Payment
        payment_id: PaymentId,
        /// Raffle to draw from
        raffle_id: RaffleId,
        /// Ticket owner
        owner: UserId,
        /// One price per ticket, summing to the payment amount
        prices: Vec<Money>,
        /// Settlement time
        paid_at: DateTime<Utc>,
    },
    /// Confirmation for a payment already paid
    AlreadyFinalized,
    /// The payment is terminal and the action does not apply
    Refused {
        /// Current status
        current: PaymentStatus,
        /// Status the action asked for
        requested: PaymentStatus,
    },
}

/// Reducer driving [`Payment::status`]
#[derive(Clone, Copy, Debug, Default)]
pub struct PaymentReducer;

impl PaymentReducer {
    /// Creates the reducer
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn allocation_effect(payment: &Payment, paid_at: DateTime<Utc>) -> PaymentEffect {
        match &payment.scope {
            PaymentScope::Manual { tickets } => PaymentEffect::SettleTickets {
                payment_id: payment.id,
                tickets: tickets.clone(),
                paid_at,
            },
            PaymentScope::Pooled { quantity } => PaymentEffect::MaterializeTickets {
                payment_id: payment.id,
                raffle_id: payment.raffle_id,
                owner: payment.owner,
                prices: payment.amount.split(*quantity),
                paid_at,
            },
        }
    }
}

impl Reducer for PaymentReducer {
    type State = Payment;
    type Action = PaymentAction;
    type Environment = ();
    type Effect = PaymentEffect;

    fn reduce(
        &self,
        payment: &mut Payment,
        action: PaymentAction,
        _env: &(),
    ) -> SmallVec<[PaymentEffect; 4]> {
        let requested = action.target();
        match (payment.status, action) {
            (PaymentStatus::Pending, PaymentAction::Confirm { paid_at }) => {
                payment.status = PaymentStatus::Paid;
                payment.updated_at = paid_at;
                smallvec![
                    PaymentEffect::RecordStatus {
                        payment_id: payment.id,
                        status: PaymentStatus::Paid,
                        at: paid_at,
                    },
                    Self::allocation_effect(payment, paid_at),
                ]
            }
            (
                PaymentStatus::Pending,
                PaymentAction::Cancel { at } | PaymentAction::Expire { at },
            ) => {
                payment.status = requested;
                payment.updated_at = at;
                smallvec![PaymentEffect::RecordStatus {
                    payment_id: payment.id,
                    status: requested,
                    at,
                }]
            }
            (PaymentStatus::Paid, PaymentAction::Confirm { .. }) => {
                smallvec![PaymentEffect::AlreadyFinalized]
            }
            (current, _) => smallvec![PaymentEffect::Refused { current, requested }],
        }
    }
}
