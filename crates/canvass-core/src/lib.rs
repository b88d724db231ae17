pub mod config;
pub mod error;
pub mod fakes;
pub mod ids;
pub mod traits;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use ids::*;
pub use traits::EmbeddingProvider;
pub use types::*;
