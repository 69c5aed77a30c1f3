//! Raffle administration and read models.

use crate::RaffleService;
use crate::views::{
    DashboardEntry, DashboardTicket, NewRaffle, RaffleDetail, RaffleSummary,
};
use rifa_core::RaffleError;
use rifa_core::pricing::{self, Promotion};
use rifa_core::store::StoreError;
use rifa_core::types::{Money, Raffle, RaffleId, RaffleStatus, UserId};
use std::collections::BTreeMap;
use tracing::{info, instrument, warn};

impl RaffleService {
    /// Creates an active raffle.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` for an empty title, zero price or zero numbers.
    #[instrument(skip(self, new), fields(title = %new.title))]
    pub async fn create_raffle(&self, new: NewRaffle) -> Result<Raffle, RaffleError> {
        if new.title.trim().is_empty() {
            return Err(RaffleError::invalid("title is required"));
        }
        if new.price.is_zero() {
            return Err(RaffleError::invalid("price must be greater than zero"));
        }
        if new.total_numbers == 0 {
            return Err(RaffleError::invalid("a raffle needs at least one number"));
        }

        let raffle = Raffle {
            id: RaffleId::new(),
            title: new.title.trim().to_string(),
            description: new.description,
            image_url: new.image_url,
            price: new.price,
            promotion: None,
            total_numbers: new.total_numbers,
            policy: new.policy,
            status: RaffleStatus::Active,
            winner: None,
            created_at: self.clock.now(),
        };
        let mut tx = self.begin().await?;
        tx.insert_raffle(&raffle).await?;
        tx.commit().await?;
        info!(raffle_id = %raffle.id, policy = raffle.policy.as_str(), "Raffle created");
        Ok(raffle)
    }

    /// Sets a promotional price ending at `raw_end`.
    ///
    /// `raw_end` may be RFC 3339 or `YYYY-MM-DD HH:MM[:SS]` (space or `T`),
    /// naive values being read at the configured offset.
    ///
    /// # Errors
    ///
    /// - `InvalidRequest` if the end time does not parse or the price does
    ///   not undercut the base price
    /// - `RaffleNotFound`, `RaffleClosed`
    #[instrument(skip(self), fields(raffle_id = %raffle_id))]
    pub async fn set_promotion(
        &self,
        raffle_id: RaffleId,
        price: Money,
        raw_end: &str,
    ) -> Result<Raffle, RaffleError> {
        let promotion = Promotion::parse(price, raw_end, self.config.promo_offset)
            .ok_or_else(|| RaffleError::invalid(format!("unrecognised end time '{raw_end}'")))?;
        self.update_promotion(raffle_id, Some(promotion)).await
    }

    /// Removes the raffle's promotion.
    ///
    /// # Errors
    ///
    /// `RaffleNotFound`, `RaffleClosed`
    #[instrument(skip(self), fields(raffle_id = %raffle_id))]
    pub async fn remove_promotion(&self, raffle_id: RaffleId) -> Result<Raffle, RaffleError> {
        self.update_promotion(raffle_id, None).await
    }

    async fn update_promotion(
        &self,
        raffle_id: RaffleId,
        promotion: Option<Promotion>,
    ) -> Result<Raffle, RaffleError> {
        let mut tx = self.begin().await?;
        let mut raffle = tx
            .lock_raffle(raffle_id)
            .await?
            .ok_or(RaffleError::RaffleNotFound(raffle_id))?;
        raffle.ensure_open()?;
        if let Some(promo) = &promotion {
            if !pricing::is_valid_promotion(raffle.price, promo.price) {
                return Err(RaffleError::invalid(format!(
                    "promotional price {} must be below {}",
                    promo.price, raffle.price
                )));
            }
        }
        tx.set_promotion(raffle_id, promotion).await?;
        tx.commit().await?;
        raffle.promotion = promotion;
        info!(promotion = ?raffle.promotion, "Promotion updated");
        Ok(raffle)
    }

    /// Deletes a raffle that never sold anything.
    ///
    /// # Errors
    ///
    /// - `RaffleNotFound`, `RaffleClosed`
    /// - `InvalidRequest` while tickets or payments reference the raffle
    #[instrument(skip(self), fields(raffle_id = %raffle_id))]
    pub async fn delete_raffle(&self, raffle_id: RaffleId) -> Result<(), RaffleError> {
        let mut tx = self.begin().await?;
        let raffle = tx
            .lock_raffle(raffle_id)
            .await?
            .ok_or(RaffleError::RaffleNotFound(raffle_id))?;
        raffle.ensure_open()?;
        if !tx.occupied_numbers(raffle_id).await?.is_empty() {
            return Err(RaffleError::invalid("raffle already has tickets"));
        }
        tx.delete_raffle(raffle_id).await.map_err(|e| match e {
            StoreError::Conflict(_) => RaffleError::invalid("raffle has payments on record"),
            other => other.into(),
        })?;
        tx.commit().await?;
        info!("Raffle deleted");
        Ok(())
    }

    /// Lists raffles with live pricing and stock.
    ///
    /// # Errors
    ///
    /// Store errors only.
    pub async fn list_raffles(
        &self,
        status: Option<RaffleStatus>,
    ) -> Result<Vec<RaffleSummary>, RaffleError> {
        let now = self.clock.now();
        let mut tx = self.begin().await?;
        let raffles = tx.list_raffles(status).await?;
        let mut summaries = Vec::with_capacity(raffles.len());
        for raffle in &raffles {
            let occupied = tx.occupied_numbers(raffle.id).await?;
            summaries.push(RaffleSummary::new(raffle, occupied.len(), now));
        }
        Ok(summaries)
    }

    /// One raffle with its occupied numbers.
    ///
    /// # Errors
    ///
    /// `RaffleNotFound`
    pub async fn raffle_detail(&self, raffle_id: RaffleId) -> Result<RaffleDetail, RaffleError> {
        let now = self.clock.now();
        let mut tx = self.begin().await?;
        let raffle = tx
            .get_raffle(raffle_id)
            .await?
            .ok_or(RaffleError::RaffleNotFound(raffle_id))?;
        let occupied = tx.occupied_numbers(raffle_id).await?;
        Ok(RaffleDetail {
            summary: RaffleSummary::new(&raffle, occupied.len(), now),
            occupied: occupied.into_iter().collect(),
        })
    }

    /// The buyer's tickets grouped by raffle, newest raffle activity first.
    ///
    /// Runs an expiry sweep first so lapsed holds never show up. A failed
    /// sweep is logged and the dashboard is still served.
    ///
    /// # Errors
    ///
    /// Store errors only.
    #[instrument(skip(self), fields(owner = %owner))]
    pub async fn dashboard(&self, owner: UserId) -> Result<Vec<DashboardEntry>, RaffleError> {
        if let Err(e) = self.sweep_expired().await {
            warn!(error = %e, "Opportunistic sweep failed");
        }

        let now = self.clock.now();
        let hold = self.config.ticket_hold;
        let mut tx = self.begin().await?;
        let tickets = tx.owner_tickets(owner).await?;

        let mut order: Vec<RaffleId> = Vec::new();
        let mut grouped: BTreeMap<RaffleId, Vec<DashboardTicket>> = BTreeMap::new();
        for ticket in tickets {
            if !grouped.contains_key(&ticket.raffle_id) {
                order.push(ticket.raffle_id);
            }
            grouped
                .entry(ticket.raffle_id)
                .or_default()
                .push(DashboardTicket {
                    id: ticket.id,
                    number: ticket.number,
                    price: ticket.price,
                    paid: !ticket.is_pending(),
                    payment_id: ticket.payment_id,
                    created_at: ticket.created_at,
                    paid_at: ticket.paid_at(),
                    seconds_remaining: ticket.hold_remaining(now, hold).map(|d| d.num_seconds()),
                    winner: false,
                });
        }

        let mut entries = Vec::with_capacity(order.len());
        for raffle_id in order {
            let Some(raffle) = tx.get_raffle(raffle_id).await? else {
                continue;
            };
            let mut tickets = grouped.remove(&raffle_id).unwrap_or_default();
            let winning_number = match raffle.winner {
                Some(winner_id) => tx
                    .raffle_tickets(raffle_id)
                    .await?
                    .into_iter()
                    .find(|t| t.id == winner_id)
                    .map(|t| t.number),
                None => None,
            };
            for ticket in &mut tickets {
                ticket.winner = raffle.winner == Some(ticket.id);
            }
            entries.push(DashboardEntry {
                raffle_id,
                title: raffle.title,
                status: raffle.status,
                winning_number,
                tickets,
            });
        }
        Ok(entries)
    }
}
