//! Winner draw.

use crate::RaffleService;
use crate::metrics::LifecycleMetrics;
use crate::views::WinnerDetails;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rifa_core::RaffleError;
use rifa_core::draw::pick_winner;
use rifa_core::types::{RaffleId, Ticket};
use tracing::{info, instrument};

impl RaffleService {
    /// Draws the winner and closes the raffle.
    ///
    /// Runs under the raffle lock. Remaining pending tickets are deleted in
    /// the same transaction, since a closed raffle cannot sell them. A second
    /// draw is rejected with `RaffleClosed` carrying the recorded winner.
    ///
    /// # Errors
    ///
    /// - `RaffleNotFound`
    /// - `RaffleClosed` when a winner was already drawn
    /// - `NoEligibleTickets` when nothing has been paid
    #[instrument(skip(self), fields(raffle_id = %raffle_id))]
    pub async fn draw(&self, raffle_id: RaffleId) -> Result<Ticket, RaffleError> {
        let mut tx = self.begin().await?;
        let raffle = tx
            .lock_raffle(raffle_id)
            .await?
            .ok_or(RaffleError::RaffleNotFound(raffle_id))?;
        let tickets = tx.raffle_tickets(raffle_id).await?;
        let winner = {
            let mut rng = StdRng::from_entropy();
            pick_winner(&raffle, &tickets, &mut rng)?.clone()
        };

        let released = tx.delete_pending_for_raffle(raffle_id).await?;
        tx.close_raffle(raffle_id, winner.id).await?;
        tx.commit().await?;

        LifecycleMetrics::record_draw();
        info!(
            winner = %winner.id,
            number = %winner.number,
            released,
            "Raffle drawn"
        );
        Ok(winner)
    }

    /// Winner details for a drawn raffle.
    ///
    /// # Errors
    ///
    /// - `RaffleNotFound`
    /// - `RaffleNotDrawn` before the draw
    pub async fn winner(&self, raffle_id: RaffleId) -> Result<WinnerDetails, RaffleError> {
        let mut tx = self.begin().await?;
        let raffle = tx
            .get_raffle(raffle_id)
            .await?
            .ok_or(RaffleError::RaffleNotFound(raffle_id))?;
        let winner_id = raffle
            .winner
            .ok_or(RaffleError::RaffleNotDrawn(raffle_id))?;
        let ticket = tx
            .raffle_tickets(raffle_id)
            .await?
            .into_iter()
            .find(|t| t.id == winner_id)
            .ok_or(RaffleError::RaffleNotDrawn(raffle_id))?;

        Ok(WinnerDetails {
            raffle_id,
            title: raffle.title,
            ticket_id: ticket.id,
            number: ticket.number,
            owner: ticket.owner,
            price: ticket.price,
            base_price: raffle.price,
            purchased_at: ticket.created_at,
            paid_at: ticket.paid_at(),
        })
    }
}
