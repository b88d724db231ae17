pub mod citations;
pub mod enrich;
pub mod freshness;
pub mod mentions;
pub mod report;
pub mod selection;
pub mod types;
pub mod validator;

pub use citations::{CitationInput, CitationLeaderboard, CitationLeaderboardBuilder};
pub use enrich::{EnrichedResult, EnrichedResults, ResultsEnricher};
pub use freshness::{ComparisonService, FreshnessAnalyzer};
pub use mentions::{BrandInput, BrandMentionDetector, DomainInput, DomainMentionDetector};
pub use report::ReportService;
pub use selection::{MostRecent, SelectionAnalyzer, SelectionStrategy};
pub use types::*;
pub use validator::validate_selections;
