//! Pricing strategies.
//!
//! Pricing is polymorphic over a small capability set so per-user or tiered
//! pricing can land without touching the charge engine. The default charges
//! a fixed unit price from configuration.

use canvass_core::{Config, UserId};

pub trait PricingStrategy: Send + Sync + std::fmt::Debug {
    /// Price of one fresh evaluation for this user.
    fn unit_price(&self, user_id: &UserId) -> f64;

    /// Price of `count` fresh evaluations.
    #[allow(clippy::cast_precision_loss)]
    fn total(&self, user_id: &UserId, count: usize) -> f64 {
        self.unit_price(user_id) * count as f64
    }
}

/// Fixed unit price for every user.
#[derive(Debug, Clone)]
pub struct FixedPricing {
    unit: f64,
}

impl FixedPricing {
    pub fn new(unit: f64) -> Self {
        Self { unit }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.billing.price_per_evaluation)
    }
}

impl PricingStrategy for FixedPricing {
    fn unit_price(&self, _user_id: &UserId) -> f64 {
        self.unit
    }
}
