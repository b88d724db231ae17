pub mod client;
pub mod registry;
pub mod service;
pub mod types;

pub use client::ScraperClient;
pub use registry::BatchRegistry;
pub use service::ScrapeService;
pub use types::*;
