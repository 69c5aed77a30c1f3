//! Concurrent purchases and settlements.
//!
//! These run on the multi-threaded runtime so that store transactions
//! really interleave.

#![allow(clippy::expect_used, clippy::unwrap_used)]

mod common;

use common::{Harness, numbers};
use futures::future::join_all;
use rifa_core::RaffleError;
use rifa_core::reconcile::Trigger;
use rifa_core::types::{AllocationPolicy, TicketNumber, UserId};
use rifa_runtime::{FinalizeOutcome, PurchaseRequest};
use std::collections::BTreeSet;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn one_buyer_wins_a_contested_number() {
    let h = Harness::new();
    let raffle = h.raffle(100, AllocationPolicy::Manual, 1_000).await;
    let raffle_id = raffle.id;

    let attempts = (0..16).map(|_| {
        let service = h.service.clone();
        tokio::spawn(async move {
            service
                .purchase(raffle_id, UserId::new(), PurchaseRequest::Numbers(numbers(&[42])))
                .await
        })
    });
    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.expect("task panicked"))
        .collect();

    let won = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(won, 1);
    assert!(
        results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, RaffleError::NumberUnavailable { .. }))
    );
    assert_eq!(h.store.tickets(raffle.id).await.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn overlapping_selections_never_share_a_number() {
    let h = Harness::new();
    let raffle = h.raffle(30, AllocationPolicy::Manual, 1_000).await;
    let raffle_id = raffle.id;

    let attempts = (0..10u32).map(|i| {
        let service = h.service.clone();
        let wanted = numbers(&[i + 1, i + 2, i + 3]);
        tokio::spawn(async move {
            service
                .purchase(raffle_id, UserId::new(), PurchaseRequest::Numbers(wanted))
                .await
        })
    });
    for joined in join_all(attempts).await {
        let _ = joined.expect("task panicked");
    }

    let tickets = h.store.tickets(raffle.id).await;
    let distinct: BTreeSet<TicketNumber> = tickets.iter().map(|t| t.number).collect();
    assert_eq!(distinct.len(), tickets.len());
    assert_eq!(tickets.len() % 3, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_confirmations_finalize_once() {
    let h = Harness::new();
    let raffle = h.raffle(50, AllocationPolicy::Pooled, 1_000).await;
    let buyer = UserId::new();
    let reservation = h.reserve(&raffle, buyer, 4).await;
    let charge = h.charge_reservation(buyer, &reservation).await;

    let deliveries = (0..8).map(|i| {
        let service = h.service.clone();
        let external_id = charge.external_id.clone();
        let trigger = if i % 2 == 0 {
            Trigger::Notification
        } else {
            Trigger::Poll
        };
        tokio::spawn(async move { service.finalize(&external_id, trigger, None).await })
    });
    let outcomes: Vec<FinalizeOutcome> = join_all(deliveries)
        .await
        .into_iter()
        .map(|joined| joined.expect("task panicked").expect("finalize failed"))
        .collect();

    let fresh = outcomes
        .iter()
        .filter(|o| matches!(o, FinalizeOutcome::Finalized { .. }))
        .count();
    assert_eq!(fresh, 1);
    assert_eq!(h.store.tickets(raffle.id).await.len(), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pooled_settlements_never_oversell() {
    let h = Harness::new();
    let raffle = h.raffle(10, AllocationPolicy::Pooled, 1_000).await;

    // Four reservations of three each are accepted up front; only three fit.
    let mut charges = Vec::new();
    for _ in 0..4 {
        let buyer = UserId::new();
        let reservation = h.reserve(&raffle, buyer, 3).await;
        charges.push(h.charge_reservation(buyer, &reservation).await);
    }

    let settlements = charges.iter().map(|charge| {
        let service = h.service.clone();
        let external_id = charge.external_id.clone();
        tokio::spawn(async move {
            service
                .finalize(&external_id, Trigger::Notification, None)
                .await
        })
    });
    let results: Vec<_> = join_all(settlements)
        .await
        .into_iter()
        .map(|joined| joined.expect("task panicked"))
        .collect();

    let settled = results.iter().filter(|r| r.is_ok()).count();
    let stranded = results
        .iter()
        .filter(|r| matches!(r, Err(RaffleError::AllocationRaceFatal { .. })))
        .count();
    assert_eq!(settled, 3);
    assert_eq!(stranded, 1);

    let tickets = h.store.tickets(raffle.id).await;
    let distinct: BTreeSet<TicketNumber> = tickets.iter().map(|t| t.number).collect();
    assert_eq!(tickets.len(), 9);
    assert_eq!(distinct.len(), 9);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sweeps_and_purchases_interleave_safely() {
    let h = Harness::new();
    let raffle = h.raffle(20, AllocationPolicy::Manual, 1_000).await;
    for n in 1..=5 {
        h.hold(&raffle, UserId::new(), &[n]).await;
    }
    h.advance(chrono::Duration::hours(1));
    let raffle_id = raffle.id;

    let sweeps: Vec<_> = (0..4)
        .map(|_| {
            let service = h.service.clone();
            tokio::spawn(async move { service.sweep_expired().await })
        })
        .collect();
    let buys: Vec<_> = (1..=5u32)
        .map(|n| {
            let service = h.service.clone();
            tokio::spawn(async move {
                service
                    .purchase(raffle_id, UserId::new(), PurchaseRequest::Numbers(numbers(&[n])))
                    .await
            })
        })
        .collect();

    let reclaimed: usize = join_all(sweeps)
        .await
        .into_iter()
        .map(|joined| joined.expect("task panicked").expect("sweep failed").reclaimed_tickets)
        .sum();
    for joined in join_all(buys).await {
        let _ = joined.expect("task panicked");
    }

    assert_eq!(reclaimed, 5);
    let tickets = h.store.tickets(raffle.id).await;
    let distinct: BTreeSet<TicketNumber> = tickets.iter().map(|t| t.number).collect();
    assert_eq!(distinct.len(), tickets.len());
}
