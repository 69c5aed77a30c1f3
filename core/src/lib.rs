//! # Rifa Core
//!
//! Functional core for selling raffle tickets and reconciling PIX payments.
//!
//! Nothing in this crate performs I/O. Pricing, allocation checks, number
//! picking, the payment state machine and winner selection are plain
//! functions over values. Storage and the payment provider appear only as
//! traits ([`store::RaffleStore`], [`gateway::PaymentGateway`]) that the runtime
//! injects.
//!
//! ## Core Concepts
//!
//! - **Raffle**: a number space `1..=N`, a base price and an optional promotion
//! - **Allocation policy**: `Manual` (buyer picks numbers, held while paying) or
//!   `Pooled` (buyer asks for a quantity, numbers drawn after payment)
//! - **Payment**: a provider charge reconciled through `Pending → Paid | Cancelled | Expired`
//! - **Reducer**: `(State, Action, Environment) → (State, Effects)` where effects
//!   describe writes for the runtime to perform

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};

pub mod allocation;
pub mod draw;
pub mod error;
pub mod gateway;
pub mod pricing;
pub mod reconcile;
pub mod store;
pub mod types;

pub use error::RaffleError;

/// Reducer module - the core trait for state transitions
///
/// Reducers are pure functions: `(State, Action, Environment) → (State, Effects)`.
/// They are deterministic and carry no I/O; the effects they return are
/// descriptions the runtime executes.
pub mod reducer {
    use smallvec::SmallVec;

    /// The Reducer trait
    ///
    /// # Type Parameters
    ///
    /// - `State`: The domain state this reducer operates on
    /// - `Action`: The action type this reducer processes
    /// - `Environment`: The injected dependencies this reducer needs
    /// - `Effect`: Descriptions of work left for the runtime
    ///
    /// # Example
    ///
    /// ```
    /// use rifa_core::reducer::Reducer;
    /// use smallvec::{SmallVec, smallvec};
    ///
    /// struct Counter;
    ///
    /// impl Reducer for Counter {
    ///     type State = u32;
    ///     type Action = u32;
    ///     type Environment = ();
    ///     type Effect = String;
    ///
    ///     fn reduce(&self, state: &mut u32, add: u32, _env: &()) -> SmallVec<[String; 4]> {
    ///         *state += add;
    ///         smallvec![format!("now {state}")]
    ///     }
    /// }
    ///
    /// let mut n = 1;
    /// let effects = Counter.reduce(&mut n, 2, &());
    /// assert_eq!(n, 3);
    /// assert_eq!(effects[0], "now 3");
    /// ```
    pub trait Reducer {
        /// The state type this reducer operates on
        type State;

        /// The action type this reducer processes
        type Action;

        /// The environment type with injected dependencies
        type Environment;

        /// The effect descriptions this reducer emits
        type Effect;

        /// Reduce an action into state changes and effects
        ///
        /// Updates `state` in place and returns the effects to execute, in order.
        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            env: &Self::Environment,
        ) -> SmallVec<[Self::Effect; 4]>;
    }
}

/// Environment module - injected capabilities
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall clock
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
