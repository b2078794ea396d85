use super::PricingPolicy;
use crate::prompt::PromptChannel;
use async_trait::async_trait;

const TIER_ONE_CEILING: f64 = 300.0;
const TIER_TWO_CEILING: f64 = 4000.0;
const TIER_ONE_RATE: f64 = 0.04;
const TIER_TWO_RATE: f64 = 0.02;
const LOW_PRICE_THRESHOLD: f64 = 6.0;

/// Undercuts the source price and, when the seller absorbs marketplace fees,
/// raises the result so that price + fee still covers the target.
#[derive(Debug, Clone)]
pub struct FeeAwarePricing {
    pub seller_pays_fee: bool,
    pub fixed_fee: f64,
}

impl FeeAwarePricing {
    pub fn new(seller_pays_fee: bool, fixed_fee: f64) -> Self {
        Self {
            seller_pays_fee,
            fixed_fee,
        }
    }

    pub fn fee(&self, price: f64) -> f64 {
        if price <= 0.0 {
            return self.fixed_fee;
        }
        let variable = if price <= TIER_ONE_CEILING {
            price * TIER_ONE_RATE
        } else {
            let banded = price.min(TIER_TWO_CEILING) - TIER_ONE_CEILING;
            TIER_ONE_CEILING * TIER_ONE_RATE + banded * TIER_TWO_RATE
        };
        self.fixed_fee + variable
    }

    /// Smallest price (in whole pennies) with `price + fee(price) >= target`.
    pub fn minimum_price_covering(&self, target: f64) -> f64 {
        let crossover = TIER_ONE_CEILING + self.fee(TIER_ONE_CEILING);
        let estimate = if target > crossover {
            let base = self.fixed_fee + TIER_ONE_CEILING * (TIER_ONE_RATE - TIER_TWO_RATE);
            (target - base) / (1.0 + TIER_TWO_RATE)
        } else {
            (target - self.fixed_fee) / (1.0 + TIER_ONE_RATE)
        };

        let target_cents = (target * 100.0).ceil() as i64;
        let mut cents = ((estimate * 100.0).floor() as i64).max(0);
        while cents <= target_cents {
            let price = cents as f64 / 100.0;
            if price + self.fee(price) >= target - 1e-9 {
                return price;
            }
            cents += 1;
        }
        target
    }
}

#[async_trait]
impl PricingPolicy for FeeAwarePricing {
    async fn adjust(&self, source_price: f64, prompts: &dyn PromptChannel) -> f64 {
        let mut price = source_price;
        if price > LOW_PRICE_THRESHOLD {
            price -= 1.0;
        } else if price > 0.0 && price < LOW_PRICE_THRESHOLD {
            let off = prompts
                .request_text("Price is less than 6, what should we take off?", "0")
                .await;
            if let Ok(value) = off.trim().parse::<f64>()
                && value.is_finite()
            {
                price -= value;
            }
        }

        if self.seller_pays_fee {
            price = self.minimum_price_covering(price);
        }
        (price * 100.0).round() / 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::ScriptedPrompts;

    #[test]
    fn fee_is_tiered() {
        let pricing = FeeAwarePricing::new(false, 0.72);
        assert!((pricing.fee(0.0) - 0.72).abs() < 1e-9);
        assert!((pricing.fee(100.0) - 4.72).abs() < 1e-9);
        assert!((pricing.fee(500.0) - (0.72 + 12.0 + 4.0)).abs() < 1e-9);
        assert!((pricing.fee(10_000.0) - (0.72 + 12.0 + 74.0)).abs() < 1e-9);
    }

    #[test]
    fn minimum_price_covers_target() {
        let pricing = FeeAwarePricing::new(true, 0.72);
        for target in [5.0, 19.99, 312.0, 850.0] {
            let price = pricing.minimum_price_covering(target);
            assert!(price + pricing.fee(price) >= target - 1e-9);
            let cheaper = price - 0.01;
            assert!(cheaper + pricing.fee(cheaper) < target);
        }
    }

    #[tokio::test]
    async fn prices_above_threshold_drop_by_one() {
        let pricing = FeeAwarePricing::new(false, 0.72);
        let prompts = ScriptedPrompts::new();
        assert_eq!(pricing.adjust(20.0, &prompts).await, 19.0);
        assert!(prompts.asked().await.is_empty());
    }

    #[tokio::test]
    async fn low_prices_ask_for_a_reduction() {
        let pricing = FeeAwarePricing::new(false, 0.72);
        let prompts = ScriptedPrompts::new()
            .with_answer("Price is less than 6, what should we take off?", "0.5");
        assert_eq!(pricing.adjust(4.0, &prompts).await, 3.5);
    }

    #[tokio::test]
    async fn unreadable_reduction_keeps_price() {
        let pricing = FeeAwarePricing::new(false, 0.72);
        let prompts = ScriptedPrompts::new()
            .with_answer("Price is less than 6, what should we take off?", "a bit");
        assert_eq!(pricing.adjust(4.0, &prompts).await, 4.0);
    }

    #[tokio::test]
    async fn non_finite_reduction_is_ignored() {
        let pricing = FeeAwarePricing::new(false, 0.72);
        for answer in ["NaN", "inf", "-inf"] {
            let prompts = ScriptedPrompts::new()
                .with_answer("Price is less than 6, what should we take off?", answer);
            assert_eq!(pricing.adjust(4.0, &prompts).await, 4.0);
        }
    }
}
