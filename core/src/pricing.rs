//! Pricing resolver.
//!
//! A raffle has a base price and at most one promotion `(price, ends_at)`.
//! The promotional price applies strictly before `ends_at`; at or after it the
//! base price is back. Promotion end times arrive from admins as plain text in
//! a handful of layouts, and anything unparsable falls back to the base price
//! instead of failing the purchase.

use crate::types::Money;
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Layouts accepted for textual promotion end times, most specific first.
const NAIVE_LAYOUTS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// A time-boxed promotional price
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Promotion {
    /// Price while the promotion runs
    pub price: Money,
    /// First instant at which the promotion no longer applies
    pub ends_at: DateTime<Utc>,
}

impl Promotion {
    /// Creates a promotion
    #[must_use]
    pub const fn new(price: Money, ends_at: DateTime<Utc>) -> Self {
        Self { price, ends_at }
    }

    /// Builds a promotion from a textual end time, see [`parse_instant`].
    #[must_use]
    pub fn parse(price: Money, raw_end: &str, offset: FixedOffset) -> Option<Self> {
        parse_instant(raw_end, offset).map(|ends_at| Self { price, ends_at })
    }

    /// Whether the promotion applies at `at`
    #[must_use]
    pub fn is_active_at(&self, at: DateTime<Utc>) -> bool {
        at < self.ends_at
    }
}

/// Parses a promotion end time.
///
/// Accepts RFC 3339 (carrying its own offset) and the naive layouts
/// `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DD HH:MM` and their `T`-separated forms.
/// Naive values are read as local time at `offset`.
#[must_use]
pub fn parse_instant(raw: &str, offset: FixedOffset) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    NAIVE_LAYOUTS
        .iter()
        .find_map(|layout| NaiveDateTime::parse_from_str(raw, layout).ok())
        .and_then(|naive| offset.from_local_datetime(&naive).single())
        .map(|local| local.with_timezone(&Utc))
}

/// Unit price in effect at `at`.
#[must_use]
pub fn effective_price(base: Money, promotion: Option<&Promotion>, at: DateTime<Utc>) -> Money {
    match promotion {
        Some(promo) if promo.is_active_at(at) => promo.price,
        _ => base,
    }
}

/// Unit price for a promotion whose end time is still raw text.
///
/// Used where stored data may predate validation: an end time that does not
/// parse means no promotion.
#[must_use]
pub fn effective_price_raw(
    base: Money,
    promo_price: Option<Money>,
    promo_end: Option<&str>,
    offset: FixedOffset,
    at: DateTime<Utc>,
) -> Money {
    let promotion = promo_price
        .zip(promo_end)
        .and_then(|(price, end)| Promotion::parse(price, end, offset));
    effective_price(base, promotion.as_ref(), at)
}

/// Checks an admin-supplied promotion against the base price.
///
/// A promotion must undercut the base price and must not be free.
#[must_use]
pub fn is_valid_promotion(base: Money, promo: Money) -> bool {
    !promo.is_zero() && promo < base
}
