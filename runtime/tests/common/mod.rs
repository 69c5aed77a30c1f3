//! Shared harness for service tests.

#![allow(dead_code, clippy::expect_used, clippy::unwrap_used)]

use chrono::{DateTime, Duration, Utc};
use rifa_core::environment::Clock;
use rifa_core::gateway::Payer;
use rifa_core::types::{
    Allocation, AllocationPolicy, Money, Raffle, RaffleId, RaffleStatus, Reservation, Ticket,
    TicketNumber, TicketStatus, UserId,
};
use rifa_runtime::{ChargeInfo, ChargeTarget, PurchaseRequest, RaffleService, ServiceConfig};
use rifa_testing::{InMemoryStore, ManualClock, MockPaymentGateway, test_clock};
use std::sync::Arc;

pub struct Harness {
    pub service: Arc<RaffleService>,
    pub store: Arc<InMemoryStore>,
    pub gateway: Arc<MockPaymentGateway>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(ServiceConfig::default())
    }

    pub fn with_config(config: ServiceConfig) -> Self {
        rifa_testing::init_test_tracing();
        let store = Arc::new(InMemoryStore::new());
        let gateway = Arc::new(MockPaymentGateway::new("webhook-secret"));
        let clock = Arc::new(ManualClock::new(test_clock().now()));
        let service = Arc::new(RaffleService::new(
            store.clone(),
            gateway.clone(),
            clock.clone(),
            config,
        ));
        Self {
            service,
            store,
            gateway,
            clock,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }

    pub async fn raffle(&self, total: u32, policy: AllocationPolicy, price_cents: u64) -> Raffle {
        let raffle = Raffle {
            id: RaffleId::new(),
            title: "Moto Honda CG 160".to_string(),
            description: Some("Sorteio beneficente".to_string()),
            image_url: None,
            price: Money::from_cents(price_cents),
            promotion: None,
            total_numbers: total,
            policy,
            status: RaffleStatus::Active,
            winner: None,
            created_at: self.now(),
        };
        self.store.seed_raffle(raffle.clone()).await;
        raffle
    }

    /// Seeds paid tickets for `numbers` owned by a stranger.
    pub async fn sell(&self, raffle: &Raffle, numbers: &[u32]) -> Vec<Ticket> {
        let tickets: Vec<Ticket> = numbers
            .iter()
            .map(|&n| {
                let mut t = Ticket::pending(
                    raffle.id,
                    UserId::new(),
                    TicketNumber::new(n),
                    raffle.price,
                    self.now(),
                );
                t.status = TicketStatus::Paid {
                    paid_at: self.now(),
                };
                t
            })
            .collect();
        self.store.seed_tickets(tickets.clone()).await;
        tickets
    }

    pub async fn hold(&self, raffle: &Raffle, owner: UserId, numbers: &[u32]) -> Vec<Ticket> {
        let request = PurchaseRequest::Numbers(numbers.iter().copied().map(TicketNumber::new).collect());
        match self.service.purchase(raffle.id, owner, request).await.unwrap() {
            Allocation::Numbered(tickets) => tickets,
            Allocation::Reserved(_) => panic!("manual raffle returned a reservation"),
        }
    }

    pub async fn reserve(&self, raffle: &Raffle, owner: UserId, quantity: u32) -> Reservation {
        match self
            .service
            .purchase(raffle.id, owner, PurchaseRequest::Quantity(quantity))
            .await
            .unwrap()
        {
            Allocation::Reserved(reservation) => reservation,
            Allocation::Numbered(_) => panic!("pooled raffle returned tickets"),
        }
    }

    pub async fn charge_tickets(&self, owner: UserId, tickets: &[Ticket]) -> ChargeInfo {
        self.service
            .request_charge(
                owner,
                ChargeTarget::Tickets(tickets.iter().map(|t| t.id).collect()),
                payer(),
            )
            .await
            .unwrap()
    }

    pub async fn charge_reservation(&self, owner: UserId, reservation: &Reservation) -> ChargeInfo {
        self.service
            .request_charge(owner, ChargeTarget::Reservation(reservation.token), payer())
            .await
            .unwrap()
    }
}

pub fn payer() -> Payer {
    Payer::new("Maria da Silva", "123.456.789-09")
}

pub fn numbers(ns: &[u32]) -> Vec<TicketNumber> {
    ns.iter().copied().map(TicketNumber::new).collect()
}
