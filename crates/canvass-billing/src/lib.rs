pub mod balance;
pub mod charge;
pub mod consumption;
pub mod pricing;
pub mod signup;

pub use balance::BalanceService;
pub use charge::{ChargePreview, ChargeResult, ChargeService};
pub use consumption::ConsumptionService;
pub use pricing::{FixedPricing, PricingStrategy};
pub use signup::SignupService;
