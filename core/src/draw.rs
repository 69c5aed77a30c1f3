//! Winner selection.

use crate::error::RaffleError;
use crate::types::{Raffle, Ticket};
use rand::Rng;
use rand::seq::IteratorRandom;

/// Picks a winner uniformly among the paid tickets.
///
/// Pending tickets never win, no matter how many there are.
///
/// # Errors
///
/// - `RaffleClosed` if a winner was already drawn
/// - `NoEligibleTickets` if nothing has been paid
pub fn pick_winner<'a, R: Rng + ?Sized>(
    raffle: &Raffle,
    tickets: &'a [Ticket],
    rng: &mut R,
) -> Result<&'a Ticket, RaffleError> {
    raffle.ensure_open()?;
    tickets
        .iter()
        .filter(|t| t.raffle_id == raffle.id && !t.is_pending())
        .choose(rng)
        .ok_or(RaffleError::NoEligibleTickets(raffle.id))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{
        AllocationPolicy, Money, RaffleId, RaffleStatus, TicketId, TicketNumber, TicketStatus,
        UserId,
    };
    use chrono::Utc;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::collections::HashMap;

    fn raffle() -> Raffle {
        Raffle {
            id: RaffleId::new(),
            title: "Cesta".to_string(),
            description: None,
            image_url: None,
            price: Money::from_cents(500),
            promotion: None,
            total_numbers: 50,
            policy: AllocationPolicy::Manual,
            status: RaffleStatus::Active,
            winner: None,
            created_at: Utc::now(),
        }
    }

    fn ticket(raffle: &Raffle, number: u32, paid: bool) -> Ticket {
        let mut t = Ticket::pending(
            raffle.id,
            UserId::new(),
            TicketNumber::new(number),
            raffle.price,
            Utc::now(),
        );
        if paid {
            t.status = TicketStatus::Paid { paid_at: Utc::now() };
        }
        t
    }

    #[test]
    fn only_paid_tickets_can_win() {
        let r = raffle();
        let tickets: Vec<Ticket> = (1..=20).map(|n| ticket(&r, n, n == 13)).collect();
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..50 {
            let winner = pick_winner(&r, &tickets, &mut rng).unwrap();
            assert_eq!(winner.number, TicketNumber::new(13));
        }
    }

    #[test]
    fn no_paid_tickets_is_an_error() {
        let r = raffle();
        let tickets = vec![ticket(&r, 1, false)];
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(
            pick_winner(&r, &tickets, &mut rng).unwrap_err(),
            RaffleError::NoEligibleTickets(r.id)
        );
    }

    #[test]
    fn closed_raffle_cannot_be_drawn_again() {
        let mut r = raffle();
        let winner = TicketId::new();
        r.status = RaffleStatus::Closed;
        r.winner = Some(winner);
        let tickets = vec![ticket(&r, 1, true)];
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(
            pick_winner(&r, &tickets, &mut rng).unwrap_err(),
            RaffleError::RaffleClosed {
                raffle_id: r.id,
                winner: Some(winner)
            }
        );
    }

    #[test]
    fn every_paid_ticket_can_win() {
        let r = raffle();
        let tickets: Vec<Ticket> = (1..=4).map(|n| ticket(&r, n, true)).collect();
        let mut rng = StdRng::seed_from_u64(99);
        let mut wins: HashMap<TicketNumber, u32> = HashMap::new();
        for _ in 0..4000 {
            let w = pick_winner(&r, &tickets, &mut rng).unwrap();
            *wins.entry(w.number).or_default() += 1;
        }
        assert_eq!(wins.len(), 4);
        for count in wins.values() {
            assert!((800..1200).contains(count), "skewed draw: {wins:?}");
        }
    }
}
