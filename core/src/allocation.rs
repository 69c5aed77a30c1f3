//! Allocation rules for both policies.
//!
//! These functions decide; they never write. The runtime calls them inside a
//! transaction that holds the raffle lock, so the `occupied` set they see is
//! the one the inserts will race against.

use crate::error::RaffleError;
use crate::types::{Raffle, TicketNumber};
use rand::Rng;
use std::collections::BTreeSet;

/// Validates a manual selection against the occupied set.
///
/// Returns the requested numbers sorted. Every conflicting number is
/// reported, not just the first one.
///
/// # Errors
///
/// - `RaffleClosed` if the raffle was drawn
/// - `InvalidRequest` for an empty selection, duplicates, or numbers outside
///   `1..=total_numbers`
/// - `NumberUnavailable` listing every number already held or sold
pub fn check_manual(
    raffle: &Raffle,
    requested: &[TicketNumber],
    occupied: &BTreeSet<TicketNumber>,
) -> Result<Vec<TicketNumber>, RaffleError> {
    raffle.ensure_open()?;
    if requested.is_empty() {
        return Err(RaffleError::invalid("select at least one number"));
    }

    let mut seen = BTreeSet::new();
    let mut duplicates = BTreeSet::new();
    for &number in requested {
        if !raffle.contains(number) {
            return Err(RaffleError::invalid(format!(
                "number {number} is outside 1..={}",
                raffle.total_numbers
            )));
        }
        if !seen.insert(number) {
            duplicates.insert(number);
        }
    }
    if let Some(first) = duplicates.first() {
        return Err(RaffleError::invalid(format!(
            "number {first} selected more than once"
        )));
    }

    let conflicts: Vec<TicketNumber> = seen.intersection(occupied).copied().collect();
    if !conflicts.is_empty() {
        return Err(RaffleError::NumberUnavailable {
            raffle_id: raffle.id,
            numbers: conflicts,
        });
    }
    Ok(seen.into_iter().collect())
}

/// Validates a pooled quantity against the remaining supply.
///
/// # Errors
///
/// - `RaffleClosed` if the raffle was drawn
/// - `InvalidRequest` when `quantity` is zero
/// - `InsufficientSupply` when fewer than `quantity` numbers are free
pub fn check_pooled(raffle: &Raffle, quantity: u32, occupied: usize) -> Result<(), RaffleError> {
    raffle.ensure_open()?;
    if quantity == 0 {
        return Err(RaffleError::invalid("quantity must be at least 1"));
    }
    let available = remaining(raffle.total_numbers, occupied);
    if available < quantity {
        return Err(RaffleError::InsufficientSupply {
            raffle_id: raffle.id,
            requested: quantity,
            available,
        });
    }
    Ok(())
}

/// Free numbers given how many are occupied
#[must_use]
pub fn remaining(total: u32, occupied: usize) -> u32 {
    total.saturating_sub(u32::try_from(occupied).unwrap_or(u32::MAX))
}

/// Every number in `1..=total` not in `occupied`, ascending
#[must_use]
pub fn available_numbers(total: u32, occupied: &BTreeSet<TicketNumber>) -> Vec<TicketNumber> {
    (1..=total)
        .map(TicketNumber::new)
        .filter(|n| !occupied.contains(n))
        .collect()
}

/// Draws `quantity` distinct numbers uniformly from the free set.
///
/// Returns `None` when fewer than `quantity` numbers are free. The result
/// is sorted ascending.
pub fn pick_numbers<R: Rng + ?Sized>(
    total: u32,
    occupied: &BTreeSet<TicketNumber>,
    quantity: u32,
    rng: &mut R,
) -> Option<Vec<TicketNumber>> {
    let free = available_numbers(total, occupied);
    let quantity = usize::try_from(quantity).ok()?;
    if free.len() < quantity {
        return None;
    }
    let mut picked: Vec<TicketNumber> = rand::seq::index::sample(rng, free.len(), quantity)
        .into_iter()
        .map(|i| free[i])
        .collect();
    picked.sort_unstable();
    Some(picked)
}
