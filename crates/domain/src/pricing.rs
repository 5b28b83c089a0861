//! Effective price resolution.

use chrono::{DateTime, Utc};
use common::Money;
use store::{DiscountRecord, ProductCatalog, ProductRecord};

use crate::error::Result;

/// Applies the best currently-active percentage discount to a base price.
pub struct PriceResolver;

impl PriceResolver {
    /// Returns the largest percent among discounts active at `now`.
    pub fn best_active_percent(discounts: &[DiscountRecord], now: DateTime<Utc>) -> Option<f64> {
        discounts
            .iter()
            .filter(|d| d.is_active_at(now))
            .map(|d| d.percent)
            .reduce(f64::max)
    }

    /// Returns `base_price` reduced by the best discount active at `now`, or
    /// `base_price` itself if none is active.
    pub fn effective_price(
        base_price: Money,
        discounts: &[DiscountRecord],
        now: DateTime<Utc>,
    ) -> Money {
        match Self::best_active_percent(discounts, now) {
            Some(percent) => base_price.percent_off(percent),
            None => base_price,
        }
    }

    /// Looks up the product's active discounts and prices it at `now`.
    pub async fn resolve<T: ProductCatalog>(
        tx: &mut T,
        product: &ProductRecord,
        now: DateTime<Utc>,
    ) -> Result<Money> {
        let discounts = tx.active_discounts(product.id, now).await?;
        let price = Self::effective_price(product.base_price, &discounts, now);
        tracing::debug!(
            product_id = %product.id,
            base_price = %product.base_price,
            %price,
            active_discounts = discounts.len(),
            "resolved price"
        );
        Ok(price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use common::ProductId;

    fn discount(percent: f64, starts_in_hours: i64, ends_in_hours: i64, now: DateTime<Utc>) -> DiscountRecord {
        DiscountRecord {
            id: 1,
            product_id: ProductId::new(1),
            percent,
            starts_at: now + Duration::hours(starts_in_hours),
            ends_at: now + Duration::hours(ends_in_hours),
        }
    }

    #[test]
    fn test_no_discount_keeps_base_price() {
        let now = Utc::now();
        assert_eq!(
            PriceResolver::effective_price(Money::from_units(100), &[], now),
            Money::from_units(100)
        );
    }

    #[test]
    fn test_single_active_discount() {
        let now = Utc::now();
        let discounts = [discount(20.0, -1, 1, now)];
        assert_eq!(
            PriceResolver::effective_price(Money::from_units(100), &discounts, now),
            Money::from_units(80)
        );
    }

    #[test]
    fn test_largest_active_discount_wins() {
        let now = Utc::now();
        let discounts = [
            discount(10.0, -1, 1, now),
            discount(35.0, -2, 2, now),
            discount(20.0, -1, 1, now),
        ];
        assert_eq!(
            PriceResolver::effective_price(Money::from_units(100), &discounts, now),
            Money::from_units(65)
        );
    }

    #[test]
    fn test_expired_and_future_discounts_are_ignored() {
        let now = Utc::now();
        let discounts = [discount(50.0, -48, -24, now), discount(90.0, 1, 5, now)];
        assert_eq!(PriceResolver::best_active_percent(&discounts, now), None);
        assert_eq!(
            PriceResolver::effective_price(Money::from_units(100), &discounts, now),
            Money::from_units(100)
        );
    }

    #[test]
    fn test_window_bounds_are_inclusive() {
        let now = Utc::now();
        let starts_now = [discount(25.0, 0, 1, now)];
        let ends_now = [discount(25.0, -1, 0, now)];
        assert_eq!(PriceResolver::best_active_percent(&starts_now, now), Some(25.0));
        assert_eq!(PriceResolver::best_active_percent(&ends_now, now), Some(25.0));
    }
}
