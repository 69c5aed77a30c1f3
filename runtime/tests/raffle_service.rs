//! End-to-end behaviour of `RaffleService` against the in-memory store and
//! the scriptable gateway.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

mod common;

use chrono::Duration;
use common::{Harness, numbers, payer};
use rifa_core::RaffleError;
use rifa_core::gateway::{GatewayError, Payer};
use rifa_core::reconcile::Trigger;
use rifa_core::types::{
    AllocationPolicy, ExternalId, Money, PaymentStatus, RaffleStatus, TicketNumber, UserId,
};
use rifa_runtime::views::NewRaffle;
use rifa_runtime::{ChargeTarget, FinalizeOutcome, PurchaseRequest, ServiceConfig};
use std::collections::BTreeSet;

#[tokio::test]
async fn manual_purchase_is_all_or_nothing() {
    let h = Harness::new();
    let raffle = h.raffle(10, AllocationPolicy::Manual, 1_000).await;
    h.sell(&raffle, &[7]).await;

    let err = h
        .service
        .purchase(raffle.id, UserId::new(), PurchaseRequest::Numbers(numbers(&[3, 7])))
        .await
        .unwrap_err();

    assert_eq!(
        err,
        RaffleError::NumberUnavailable {
            raffle_id: raffle.id,
            numbers: numbers(&[7]),
        }
    );
    let held: Vec<u32> = h
        .store
        .tickets(raffle.id)
        .await
        .iter()
        .map(|t| t.number.get())
        .collect();
    assert_eq!(held, vec![7]);
}

#[tokio::test]
async fn manual_purchase_rejects_out_of_range_numbers() {
    let h = Harness::new();
    let raffle = h.raffle(10, AllocationPolicy::Manual, 1_000).await;

    let err = h
        .service
        .purchase(raffle.id, UserId::new(), PurchaseRequest::Numbers(numbers(&[0, 11])))
        .await
        .unwrap_err();

    assert!(matches!(err, RaffleError::InvalidRequest(_)));
    assert!(h.store.tickets(raffle.id).await.is_empty());
}

#[tokio::test]
async fn purchase_arguments_must_match_the_policy() {
    let h = Harness::new();
    let manual = h.raffle(10, AllocationPolicy::Manual, 1_000).await;
    let pooled = h.raffle(10, AllocationPolicy::Pooled, 1_000).await;

    let err = h
        .service
        .purchase(manual.id, UserId::new(), PurchaseRequest::Quantity(2))
        .await
        .unwrap_err();
    assert!(matches!(err, RaffleError::InvalidRequest(_)));

    let err = h
        .service
        .purchase(pooled.id, UserId::new(), PurchaseRequest::Numbers(numbers(&[1])))
        .await
        .unwrap_err();
    assert!(matches!(err, RaffleError::InvalidRequest(_)));
}

#[tokio::test]
async fn pooled_purchase_reports_remaining_supply() {
    let h = Harness::new();
    let raffle = h.raffle(10, AllocationPolicy::Pooled, 1_000).await;
    h.sell(&raffle, &[1, 2, 3, 4, 5, 6, 7]).await;

    let err = h
        .service
        .purchase(raffle.id, UserId::new(), PurchaseRequest::Quantity(5))
        .await
        .unwrap_err();

    assert_eq!(
        err,
        RaffleError::InsufficientSupply {
            raffle_id: raffle.id,
            requested: 5,
            available: 3,
        }
    );
    assert!(h.store.reservations().await.is_empty());
}

#[tokio::test]
async fn pooled_finalize_materializes_fresh_numbers() {
    let h = Harness::new();
    let raffle = h.raffle(20, AllocationPolicy::Pooled, 1_000).await;
    let sold: BTreeSet<TicketNumber> = h
        .sell(&raffle, &[1, 2, 3])
        .await
        .into_iter()
        .map(|t| t.number)
        .collect();
    let buyer = UserId::new();

    let reservation = h.reserve(&raffle, buyer, 5).await;
    let charge = h.charge_reservation(buyer, &reservation).await;
    assert_eq!(charge.amount, Money::from_cents(5_000));
    assert_eq!(charge.quantity, 5);
    assert!(h.store.reservations().await.is_empty());

    let outcome = h
        .service
        .finalize(&charge.external_id, Trigger::Poll, None)
        .await
        .unwrap();

    let FinalizeOutcome::Finalized { payment, tickets } = outcome else {
        panic!("expected a fresh finalize");
    };
    assert_eq!(payment.status, PaymentStatus::Paid);
    assert_eq!(tickets.len(), 5);
    assert!(tickets.iter().all(|t| t.price == Money::from_cents(1_000)));
    assert!(tickets.iter().all(|t| t.owner == buyer && !t.is_pending()));
    let fresh: BTreeSet<TicketNumber> = tickets.iter().map(|t| t.number).collect();
    assert_eq!(fresh.len(), 5);
    assert!(fresh.is_disjoint(&sold));
    assert_eq!(h.store.tickets(raffle.id).await.len(), 8);
}

#[tokio::test]
async fn finalize_is_idempotent() {
    let h = Harness::new();
    let raffle = h.raffle(10, AllocationPolicy::Pooled, 1_000).await;
    let buyer = UserId::new();
    let reservation = h.reserve(&raffle, buyer, 2).await;
    let charge = h.charge_reservation(buyer, &reservation).await;

    let first = h
        .service
        .finalize(&charge.external_id, Trigger::Notification, None)
        .await
        .unwrap();
    let second = h
        .service
        .finalize(&charge.external_id, Trigger::Poll, None)
        .await
        .unwrap();

    assert!(matches!(first, FinalizeOutcome::Finalized { .. }));
    assert!(matches!(second, FinalizeOutcome::AlreadyFinalized(_)));
    assert_eq!(h.store.tickets(raffle.id).await.len(), 2);
}

#[tokio::test]
async fn manual_finalize_settles_held_tickets() {
    let h = Harness::new();
    let raffle = h.raffle(10, AllocationPolicy::Manual, 1_500).await;
    let buyer = UserId::new();
    let held = h.hold(&raffle, buyer, &[2, 4]).await;
    let charge = h.charge_tickets(buyer, &held).await;
    assert_eq!(charge.amount, Money::from_cents(3_000));

    let paid_at = h.now() + Duration::minutes(3);
    let outcome = h
        .service
        .finalize(&charge.external_id, Trigger::Notification, Some(paid_at))
        .await
        .unwrap();

    let FinalizeOutcome::Finalized { tickets, .. } = outcome else {
        panic!("expected a fresh finalize");
    };
    assert_eq!(tickets.len(), 2);
    for ticket in h.store.tickets(raffle.id).await {
        assert_eq!(ticket.paid_at(), Some(paid_at));
        assert_eq!(ticket.payment_id, Some(charge.payment_id));
    }
}

#[tokio::test]
async fn sweep_releases_holds_exactly_at_the_deadline() {
    let h = Harness::new();
    let raffle = h.raffle(10, AllocationPolicy::Manual, 1_000).await;
    h.hold(&raffle, UserId::new(), &[5]).await;

    h.advance(Duration::minutes(59) + Duration::seconds(59));
    let report = h.service.sweep_expired().await.unwrap();
    assert_eq!(report.reclaimed_tickets, 0);
    assert_eq!(h.store.tickets(raffle.id).await.len(), 1);

    h.advance(Duration::seconds(1));
    let report = h.service.sweep_expired().await.unwrap();
    assert_eq!(report.reclaimed_tickets, 1);
    assert!(h.store.tickets(raffle.id).await.is_empty());

    let next = UserId::new();
    let tickets = h.hold(&raffle, next, &[5]).await;
    assert_eq!(tickets[0].owner, next);
}

#[tokio::test]
async fn sweep_leaves_paid_tickets_alone() {
    let h = Harness::new();
    let raffle = h.raffle(10, AllocationPolicy::Manual, 1_000).await;
    h.sell(&raffle, &[1, 2]).await;

    h.advance(Duration::hours(3));
    let report = h.service.sweep_expired().await.unwrap();

    assert_eq!(report.reclaimed_tickets, 0);
    assert_eq!(h.store.tickets(raffle.id).await.len(), 2);
}

#[tokio::test]
async fn sweep_purges_lapsed_reservations() {
    let h = Harness::new();
    let raffle = h.raffle(10, AllocationPolicy::Pooled, 1_000).await;
    let buyer = UserId::new();
    let reservation = h.reserve(&raffle, buyer, 2).await;

    h.advance(Duration::minutes(15));
    let report = h.service.sweep_expired().await.unwrap();
    assert_eq!(report.purged_reservations, 1);

    let err = h
        .service
        .request_charge(buyer, ChargeTarget::Reservation(reservation.token), payer())
        .await
        .unwrap_err();
    assert!(matches!(err, RaffleError::ReservationExpired(_)));
}

#[tokio::test]
async fn charge_uses_the_price_in_force_when_requested() {
    let h = Harness::new();
    let raffle = h.raffle(10, AllocationPolicy::Manual, 1_000).await;
    let ends_at = h.now() + Duration::minutes(30);
    h.service
        .set_promotion(raffle.id, Money::from_cents(800), &ends_at.to_rfc3339())
        .await
        .unwrap();

    let buyer = UserId::new();
    let early = h.hold(&raffle, buyer, &[1]).await;
    let late = h.hold(&raffle, buyer, &[2]).await;

    h.advance(Duration::minutes(30) - Duration::seconds(1));
    let promo = h.charge_tickets(buyer, &early).await;
    assert_eq!(promo.unit_price, Money::from_cents(800));

    h.advance(Duration::seconds(2));
    let regular = h.charge_tickets(buyer, &late).await;
    assert_eq!(regular.unit_price, Money::from_cents(1_000));
    assert_eq!(regular.amount, Money::from_cents(1_000));

    let stored = h.store.tickets(raffle.id).await;
    assert_eq!(stored[0].price, Money::from_cents(800));
    assert_eq!(stored[1].price, Money::from_cents(1_000));
}

#[tokio::test]
async fn naive_promotion_end_is_read_in_local_time() {
    let h = Harness::new();
    let raffle = h.raffle(10, AllocationPolicy::Manual, 1_000).await;

    // 2025-01-01 00:00 UTC is 2024-12-31 21:00 at UTC-3
    let updated = h
        .service
        .set_promotion(raffle.id, Money::from_cents(500), "2024-12-31 21:30")
        .await
        .unwrap();
    assert_eq!(
        updated.promotion.unwrap().ends_at,
        h.now() + Duration::minutes(30)
    );

    let err = h
        .service
        .set_promotion(raffle.id, Money::from_cents(500), "next tuesday")
        .await
        .unwrap_err();
    assert!(matches!(err, RaffleError::InvalidRequest(_)));

    let err = h
        .service
        .set_promotion(raffle.id, Money::from_cents(1_200), "2024-12-31 21:30")
        .await
        .unwrap_err();
    assert!(matches!(err, RaffleError::InvalidRequest(_)));
}

#[tokio::test]
async fn charge_expiry_is_clamped_to_the_remaining_hold() {
    let h = Harness::new();
    let raffle = h.raffle(10, AllocationPolicy::Manual, 1_000).await;
    let buyer = UserId::new();
    let held = h.hold(&raffle, buyer, &[9]).await;

    h.advance(Duration::minutes(50));
    let charge = h.charge_tickets(buyer, &held).await;

    assert_eq!(charge.expires_at, h.now() + Duration::minutes(10));
    let (_, request) = h.gateway.charges().pop().unwrap();
    assert_eq!(request.expires_in_secs, 600);
    assert_eq!(request.description, format!("Rifa: {}", raffle.title));
    assert_eq!(
        request.info,
        vec![
            ("Rifa ID".to_string(), raffle.id.to_string()),
            ("User ID".to_string(), buyer.to_string()),
            ("Quantidade".to_string(), "1".to_string()),
        ]
    );
}

#[tokio::test]
async fn charge_on_a_lapsed_hold_releases_the_numbers() {
    let h = Harness::new();
    let raffle = h.raffle(10, AllocationPolicy::Manual, 1_000).await;
    let buyer = UserId::new();
    let held = h.hold(&raffle, buyer, &[3]).await;

    h.advance(Duration::hours(1));
    let err = h
        .service
        .request_charge(buyer, ChargeTarget::Tickets(vec![held[0].id]), payer())
        .await
        .unwrap_err();

    assert!(matches!(err, RaffleError::ReservationExpired(_)));
    assert!(h.store.tickets(raffle.id).await.is_empty());
    assert!(h.gateway.charges().is_empty());
}

#[tokio::test]
async fn charge_requires_a_valid_payer() {
    let h = Harness::new();
    let raffle = h.raffle(10, AllocationPolicy::Manual, 1_000).await;
    let buyer = UserId::new();
    let held = h.hold(&raffle, buyer, &[3]).await;

    let err = h
        .service
        .request_charge(
            buyer,
            ChargeTarget::Tickets(vec![held[0].id]),
            Payer::new("Maria", "123"),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, RaffleError::InvalidRequest(_)));
    assert!(h.gateway.charges().is_empty());
}

#[tokio::test]
async fn charge_rejects_someone_elses_tickets() {
    let h = Harness::new();
    let raffle = h.raffle(10, AllocationPolicy::Manual, 1_000).await;
    let held = h.hold(&raffle, UserId::new(), &[3]).await;

    let err = h
        .service
        .request_charge(UserId::new(), ChargeTarget::Tickets(vec![held[0].id]), payer())
        .await
        .unwrap_err();

    assert_eq!(err, RaffleError::NotOwner);
}

#[tokio::test]
async fn provider_timeout_leaves_no_payment_behind() {
    let h = Harness::with_config(ServiceConfig {
        gateway_timeout: std::time::Duration::from_millis(50),
        ..ServiceConfig::default()
    });
    h.gateway.delay_charges(std::time::Duration::from_millis(200));
    let raffle = h.raffle(10, AllocationPolicy::Manual, 1_000).await;
    let buyer = UserId::new();
    let held = h.hold(&raffle, buyer, &[1]).await;

    let err = h
        .service
        .request_charge(buyer, ChargeTarget::Tickets(vec![held[0].id]), payer())
        .await
        .unwrap_err();

    assert_eq!(err, RaffleError::PaymentProviderError(GatewayError::Timeout));
    assert!(h.store.payments().await.is_empty());
    let tickets = h.store.tickets(raffle.id).await;
    assert!(tickets[0].is_pending());
    assert_eq!(tickets[0].payment_id, None);
}

#[tokio::test]
async fn provider_rejection_is_reported() {
    let h = Harness::new();
    h.gateway
        .fail_next_charge(GatewayError::Rejected("chave invalida".to_string()));
    let raffle = h.raffle(10, AllocationPolicy::Pooled, 1_000).await;
    let buyer = UserId::new();
    let reservation = h.reserve(&raffle, buyer, 1).await;

    let err = h
        .service
        .request_charge(buyer, ChargeTarget::Reservation(reservation.token), payer())
        .await
        .unwrap_err();

    assert!(matches!(err, RaffleError::PaymentProviderError(GatewayError::Rejected(_))));
    assert!(h.store.payments().await.is_empty());
    assert_eq!(h.store.reservations().await.len(), 1);
}

#[tokio::test]
async fn notification_requires_a_valid_signature() {
    let h = Harness::new();
    let raffle = h.raffle(10, AllocationPolicy::Pooled, 1_000).await;
    let buyer = UserId::new();
    let reservation = h.reserve(&raffle, buyer, 1).await;
    let charge = h.charge_reservation(buyer, &reservation).await;
    let body = h.gateway.notification(&[(charge.external_id.clone(), h.now())]);

    let err = h
        .service
        .handle_notification(&body, "sha256=deadbeef")
        .await
        .unwrap_err();

    assert_eq!(err, RaffleError::InvalidNotification);
    let payment = h.store.payment(&charge.external_id).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Pending);
    assert!(h.store.tickets(raffle.id).await.is_empty());
}

#[tokio::test]
async fn notification_settles_once_and_acks_duplicates() {
    let h = Harness::new();
    let raffle = h.raffle(10, AllocationPolicy::Manual, 1_000).await;
    let buyer = UserId::new();
    let held = h.hold(&raffle, buyer, &[6]).await;
    let charge = h.charge_tickets(buyer, &held).await;
    let body = h.gateway.notification(&[(charge.external_id.clone(), h.now())]);
    let signature = h.gateway.sign(&body);

    let first = h.service.handle_notification(&body, &signature).await.unwrap();
    let second = h.service.handle_notification(&body, &signature).await.unwrap();

    assert_eq!(first.finalized, 1);
    assert_eq!(second.finalized, 0);
    assert_eq!(second.duplicates, 1);
    assert!(!h.store.tickets(raffle.id).await[0].is_pending());
}

#[tokio::test]
async fn notification_for_unknown_charge_is_acknowledged() {
    let h = Harness::new();
    let body = h
        .gateway
        .notification(&[(ExternalId::new("NEVERISSUED"), h.now())]);
    let signature = h.gateway.sign(&body);

    let ack = h.service.handle_notification(&body, &signature).await.unwrap();

    assert_eq!(ack.unknown, 1);
    assert_eq!(ack.finalized, 0);
}

#[tokio::test]
async fn notification_batch_settles_past_a_refused_charge() {
    let h = Harness::new();
    let raffle = h.raffle(10, AllocationPolicy::Manual, 1_000).await;
    let first_buyer = UserId::new();
    let cancelled = h.charge_tickets(first_buyer, &h.hold(&raffle, first_buyer, &[1]).await).await;
    h.service
        .close_payment(&cancelled.external_id, PaymentStatus::Cancelled, Trigger::Operator)
        .await
        .unwrap();
    let second_buyer = UserId::new();
    let pending = h.charge_tickets(second_buyer, &h.hold(&raffle, second_buyer, &[2]).await).await;

    let body = h.gateway.notification(&[
        (cancelled.external_id.clone(), h.now()),
        (pending.external_id.clone(), h.now()),
    ]);
    let signature = h.gateway.sign(&body);
    let ack = h.service.handle_notification(&body, &signature).await.unwrap();

    assert_eq!(ack.failed, 1);
    assert_eq!(ack.finalized, 1);
    let settled = h.store.payment(&pending.external_id).await.unwrap();
    assert_eq!(settled.status, PaymentStatus::Paid);
    let refused = h.store.payment(&cancelled.external_id).await.unwrap();
    assert_eq!(refused.status, PaymentStatus::Cancelled);

    // Redelivery of the same body is stable
    let replay = h.service.handle_notification(&body, &signature).await.unwrap();
    assert_eq!(replay.failed, 1);
    assert_eq!(replay.duplicates, 1);
}

#[tokio::test]
async fn polling_settles_a_paid_charge() {
    let h = Harness::new();
    let raffle = h.raffle(10, AllocationPolicy::Manual, 1_000).await;
    let buyer = UserId::new();
    let held = h.hold(&raffle, buyer, &[8]).await;
    let charge = h.charge_tickets(buyer, &held).await;

    let status = h
        .service
        .poll_status(&charge.external_id, Some(buyer))
        .await
        .unwrap();
    assert_eq!(status, PaymentStatus::Pending);

    let paid_at = h.now() + Duration::minutes(2);
    h.gateway.mark_paid(&charge.external_id, paid_at);
    let status = h
        .service
        .poll_status(&charge.external_id, Some(buyer))
        .await
        .unwrap();

    assert_eq!(status, PaymentStatus::Paid);
    assert_eq!(h.store.tickets(raffle.id).await[0].paid_at(), Some(paid_at));

    let err = h
        .service
        .poll_status(&charge.external_id, Some(UserId::new()))
        .await
        .unwrap_err();
    assert_eq!(err, RaffleError::NotOwner);
}

#[tokio::test]
async fn poll_surfaces_provider_failures() {
    let h = Harness::new();
    let raffle = h.raffle(10, AllocationPolicy::Pooled, 1_000).await;
    let buyer = UserId::new();
    let reservation = h.reserve(&raffle, buyer, 1).await;
    let charge = h.charge_reservation(buyer, &reservation).await;
    h.gateway
        .fail_queries(Some(GatewayError::Transport("connection reset".to_string())));

    let err = h
        .service
        .poll_status(&charge.external_id, None)
        .await
        .unwrap_err();

    assert!(matches!(err, RaffleError::PaymentProviderError(_)));
    let payment = h.store.payment(&charge.external_id).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Pending);
}

#[tokio::test]
async fn cancelled_payment_cannot_be_settled() {
    let h = Harness::new();
    let raffle = h.raffle(10, AllocationPolicy::Manual, 1_000).await;
    let buyer = UserId::new();
    let held = h.hold(&raffle, buyer, &[1]).await;
    let charge = h.charge_tickets(buyer, &held).await;

    let status = h
        .service
        .close_payment(&charge.external_id, PaymentStatus::Cancelled, Trigger::Operator)
        .await
        .unwrap();
    assert_eq!(status, PaymentStatus::Cancelled);

    let err = h
        .service
        .finalize(&charge.external_id, Trigger::Notification, None)
        .await
        .unwrap_err();

    assert_eq!(
        err,
        RaffleError::PaymentNotPending {
            external_id: charge.external_id.clone(),
            status: PaymentStatus::Cancelled,
        }
    );
    assert!(h.store.tickets(raffle.id).await[0].is_pending());
}

#[tokio::test]
async fn closing_a_paid_payment_keeps_it_paid() {
    let h = Harness::new();
    let raffle = h.raffle(10, AllocationPolicy::Pooled, 1_000).await;
    let buyer = UserId::new();
    let reservation = h.reserve(&raffle, buyer, 1).await;
    let charge = h.charge_reservation(buyer, &reservation).await;
    h.service
        .finalize(&charge.external_id, Trigger::Poll, None)
        .await
        .unwrap();

    let status = h
        .service
        .close_payment(&charge.external_id, PaymentStatus::Expired, Trigger::Sweep)
        .await
        .unwrap();

    assert_eq!(status, PaymentStatus::Paid);
    let payment = h.store.payment(&charge.external_id).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Paid);
}

#[tokio::test]
async fn finalize_after_reclaim_reports_expiry() {
    let h = Harness::new();
    let raffle = h.raffle(10, AllocationPolicy::Manual, 1_000).await;
    let buyer = UserId::new();
    let held = h.hold(&raffle, buyer, &[4]).await;
    let charge = h.charge_tickets(buyer, &held).await;

    h.advance(Duration::hours(1));
    h.service.sweep_expired().await.unwrap();
    let err = h
        .service
        .finalize(&charge.external_id, Trigger::Notification, None)
        .await
        .unwrap_err();

    assert!(matches!(err, RaffleError::ReservationExpired(_)));
    let payment = h.store.payment(&charge.external_id).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Pending);
}

#[tokio::test]
async fn oversold_pooled_payment_is_flagged_and_left_pending() {
    let h = Harness::new();
    let raffle = h.raffle(5, AllocationPolicy::Pooled, 1_000).await;
    let buyer = UserId::new();
    let reservation = h.reserve(&raffle, buyer, 3).await;
    let charge = h.charge_reservation(buyer, &reservation).await;
    h.sell(&raffle, &[1, 2, 3]).await;

    let err = h
        .service
        .finalize(&charge.external_id, Trigger::Notification, None)
        .await
        .unwrap_err();

    assert_eq!(
        err,
        RaffleError::AllocationRaceFatal {
            raffle_id: raffle.id,
            external_id: charge.external_id.clone(),
            needed: 3,
            available: 2,
        }
    );
    let payment = h.store.payment(&charge.external_id).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Pending);
    assert_eq!(h.store.tickets(raffle.id).await.len(), 3);
}

#[tokio::test]
async fn reconcile_applies_provider_outcomes() {
    let h = Harness::new();
    let raffle = h.raffle(10, AllocationPolicy::Pooled, 1_000).await;
    let buyer = UserId::new();
    let first = h.reserve(&raffle, buyer, 1).await;
    let second = h.reserve(&raffle, buyer, 1).await;
    let third = h.reserve(&raffle, buyer, 1).await;
    let paid = h.charge_reservation(buyer, &first).await;
    let cancelled = h.charge_reservation(buyer, &second).await;
    let waiting = h.charge_reservation(buyer, &third).await;
    h.gateway.mark_paid(&paid.external_id, h.now());
    h.gateway.mark(&cancelled.external_id, PaymentStatus::Cancelled);

    let report = h.service.reconcile_pending().await.unwrap();

    assert_eq!(report.checked, 3);
    assert_eq!(report.finalized, 1);
    assert_eq!(report.closed, 1);
    assert_eq!(report.failed, 0);
    for (external_id, expected) in [
        (&paid.external_id, PaymentStatus::Paid),
        (&cancelled.external_id, PaymentStatus::Cancelled),
        (&waiting.external_id, PaymentStatus::Pending),
    ] {
        let payment = h.store.payment(external_id).await.unwrap();
        assert_eq!(payment.status, expected);
    }
}

#[tokio::test]
async fn reconcile_ignores_payments_outside_the_lookback() {
    let h = Harness::new();
    let raffle = h.raffle(10, AllocationPolicy::Pooled, 1_000).await;
    let buyer = UserId::new();
    let reservation = h.reserve(&raffle, buyer, 1).await;
    h.charge_reservation(buyer, &reservation).await;

    h.advance(Duration::hours(2));
    let report = h.service.reconcile_pending().await.unwrap();

    assert_eq!(report.checked, 0);
}

#[tokio::test]
async fn retry_issues_a_second_charge_and_first_settlement_wins() {
    let h = Harness::new();
    let raffle = h.raffle(10, AllocationPolicy::Manual, 1_000).await;
    let buyer = UserId::new();
    let held = h.hold(&raffle, buyer, &[2]).await;
    let original = h.charge_tickets(buyer, &held).await;

    let retry = h
        .service
        .retry_payment(buyer, held[0].id, payer())
        .await
        .unwrap();
    assert_ne!(retry.external_id, original.external_id);
    assert_eq!(h.store.payments().await.len(), 2);

    h.service
        .finalize(&retry.external_id, Trigger::Poll, None)
        .await
        .unwrap();
    let late = h
        .service
        .finalize(&original.external_id, Trigger::Notification, None)
        .await
        .unwrap();

    let FinalizeOutcome::Finalized { tickets, .. } = late else {
        panic!("late settlement should still be recorded");
    };
    assert!(tickets.is_empty());
    let ticket = &h.store.tickets(raffle.id).await[0];
    assert_eq!(ticket.payment_id, Some(retry.payment_id));
}

#[tokio::test]
async fn draw_picks_a_paid_ticket_and_closes_the_raffle() {
    let h = Harness::new();
    let raffle = h.raffle(10, AllocationPolicy::Manual, 1_000).await;
    let sold = h.sell(&raffle, &[1, 2, 3]).await;
    h.hold(&raffle, UserId::new(), &[4]).await;

    let winner = h.service.draw(raffle.id).await.unwrap();

    assert!(sold.iter().any(|t| t.id == winner.id));
    let stored = h.store.raffle(raffle.id).await.unwrap();
    assert_eq!(stored.status, RaffleStatus::Closed);
    assert_eq!(stored.winner, Some(winner.id));
    assert_eq!(h.store.tickets(raffle.id).await.len(), 3);

    let details = h.service.winner(raffle.id).await.unwrap();
    assert_eq!(details.ticket_id, winner.id);
    assert_eq!(details.number, winner.number);
    assert_eq!(details.base_price, raffle.price);
    assert_eq!(details.purchased_at, winner.created_at);
}

#[tokio::test]
async fn second_draw_is_rejected_and_keeps_the_winner() {
    let h = Harness::new();
    let raffle = h.raffle(10, AllocationPolicy::Manual, 1_000).await;
    h.sell(&raffle, &[1, 2, 3, 4, 5]).await;
    let winner = h.service.draw(raffle.id).await.unwrap();

    let err = h.service.draw(raffle.id).await.unwrap_err();

    assert_eq!(
        err,
        RaffleError::RaffleClosed {
            raffle_id: raffle.id,
            winner: Some(winner.id),
        }
    );
    let stored = h.store.raffle(raffle.id).await.unwrap();
    assert_eq!(stored.winner, Some(winner.id));
}

#[tokio::test]
async fn draw_without_paid_tickets_fails() {
    let h = Harness::new();
    let raffle = h.raffle(10, AllocationPolicy::Manual, 1_000).await;
    h.hold(&raffle, UserId::new(), &[1]).await;

    let err = h.service.draw(raffle.id).await.unwrap_err();
    assert_eq!(err, RaffleError::NoEligibleTickets(raffle.id));

    let err = h.service.winner(raffle.id).await.unwrap_err();
    assert_eq!(err, RaffleError::RaffleNotDrawn(raffle.id));
}

#[tokio::test]
async fn closed_raffle_rejects_purchases() {
    let h = Harness::new();
    let raffle = h.raffle(10, AllocationPolicy::Manual, 1_000).await;
    let sold = h.sell(&raffle, &[1]).await;
    h.service.draw(raffle.id).await.unwrap();

    let err = h
        .service
        .purchase(raffle.id, UserId::new(), PurchaseRequest::Numbers(numbers(&[2])))
        .await
        .unwrap_err();

    assert_eq!(
        err,
        RaffleError::RaffleClosed {
            raffle_id: raffle.id,
            winner: Some(sold[0].id),
        }
    );
}

#[tokio::test]
async fn dashboard_groups_tickets_and_flags_the_winner() {
    let h = Harness::new();
    let raffle = h.raffle(10, AllocationPolicy::Manual, 1_000).await;
    let buyer = UserId::new();
    h.hold(&raffle, buyer, &[2]).await;
    let to_pay = h.hold(&raffle, buyer, &[3]).await;
    let charge = h.charge_tickets(buyer, &to_pay).await;
    h.service
        .finalize(&charge.external_id, Trigger::Poll, None)
        .await
        .unwrap();

    h.advance(Duration::minutes(10));
    let entries = h.service.dashboard(buyer).await.unwrap();
    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    assert_eq!(entry.raffle_id, raffle.id);
    assert_eq!(entry.winning_number, None);
    let pending = entry.tickets.iter().find(|t| t.number.get() == 2).unwrap();
    assert!(!pending.paid);
    assert_eq!(pending.seconds_remaining, Some(50 * 60));
    let paid = entry.tickets.iter().find(|t| t.number.get() == 3).unwrap();
    assert!(paid.paid);
    assert_eq!(paid.seconds_remaining, None);

    h.service.draw(raffle.id).await.unwrap();
    let entries = h.service.dashboard(buyer).await.unwrap();
    let entry = &entries[0];
    assert_eq!(entry.status, RaffleStatus::Closed);
    assert_eq!(entry.winning_number, Some(TicketNumber::new(3)));
    assert_eq!(entry.tickets.len(), 1);
    assert!(entry.tickets[0].winner);
}

#[tokio::test]
async fn dashboard_hides_lapsed_holds() {
    let h = Harness::new();
    let raffle = h.raffle(10, AllocationPolicy::Manual, 1_000).await;
    let buyer = UserId::new();
    h.hold(&raffle, buyer, &[2]).await;

    h.advance(Duration::hours(2));
    let entries = h.service.dashboard(buyer).await.unwrap();

    assert!(entries.is_empty());
}

#[tokio::test]
async fn catalog_reports_live_stock_and_price() {
    let h = Harness::new();
    let raffle = h
        .service
        .create_raffle(NewRaffle {
            title: "  Smart TV 55  ".to_string(),
            description: None,
            image_url: None,
            price: Money::from_cents(2_000),
            total_numbers: 100,
            policy: AllocationPolicy::Manual,
        })
        .await
        .unwrap();
    assert_eq!(raffle.title, "Smart TV 55");
    h.hold(&raffle, UserId::new(), &[10, 20]).await;
    h.service
        .set_promotion(
            raffle.id,
            Money::from_cents(1_500),
            &(h.now() + Duration::hours(1)).to_rfc3339(),
        )
        .await
        .unwrap();

    let listed = h.service.list_raffles(Some(RaffleStatus::Active)).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].sold, 2);
    assert_eq!(listed[0].remaining, 98);
    assert_eq!(listed[0].current_price, Money::from_cents(1_500));
    assert!(listed[0].promotional);

    let detail = h.service.raffle_detail(raffle.id).await.unwrap();
    assert_eq!(detail.occupied, numbers(&[10, 20]));

    let cleared = h.service.remove_promotion(raffle.id).await.unwrap();
    assert_eq!(cleared.promotion, None);
    assert!(h.service.list_raffles(Some(RaffleStatus::Closed)).await.unwrap().is_empty());
}

#[tokio::test]
async fn create_raffle_validates_input() {
    let h = Harness::new();
    let base = NewRaffle {
        title: "Bicicleta".to_string(),
        description: None,
        image_url: None,
        price: Money::from_cents(500),
        total_numbers: 50,
        policy: AllocationPolicy::Pooled,
    };

    for bad in [
        NewRaffle { title: " ".to_string(), ..base.clone() },
        NewRaffle { price: Money::ZERO, ..base.clone() },
        NewRaffle { total_numbers: 0, ..base.clone() },
    ] {
        let err = h.service.create_raffle(bad).await.unwrap_err();
        assert!(matches!(err, RaffleError::InvalidRequest(_)));
    }
}

#[tokio::test]
async fn only_untouched_raffles_can_be_deleted() {
    let h = Harness::new();
    let busy = h.raffle(10, AllocationPolicy::Manual, 1_000).await;
    let idle = h.raffle(10, AllocationPolicy::Manual, 1_000).await;
    h.hold(&busy, UserId::new(), &[1]).await;

    let err = h.service.delete_raffle(busy.id).await.unwrap_err();
    assert!(matches!(err, RaffleError::InvalidRequest(_)));
    assert!(h.store.raffle(busy.id).await.is_some());

    h.service.delete_raffle(idle.id).await.unwrap();
    assert!(h.store.raffle(idle.id).await.is_none());
    assert_eq!(
        h.service.raffle_detail(idle.id).await.unwrap_err(),
        RaffleError::RaffleNotFound(idle.id)
    );
}
