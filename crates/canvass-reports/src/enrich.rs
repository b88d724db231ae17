//! Enrichment of evaluation results with brand mentions and a citation
//! leaderboard, for the results endpoints.

use chrono::{DateTime, Utc};
use serde::Serialize;

use canvass_core::{Answer, Evaluation, EvaluationId, EvaluationStatus, Prompt, PromptId};

use crate::citations::{CitationInput, CitationLeaderboard, CitationLeaderboardBuilder};
use crate::mentions::{BrandInput, BrandMentionDetector, BrandMentionResult};

#[derive(Debug, Clone, Serialize)]
pub struct EnrichedResult {
    pub prompt_id: PromptId,
    pub prompt_text: String,
    pub evaluation_id: Option<EvaluationId>,
    pub status: Option<EvaluationStatus>,
    pub answer: Option<Answer>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Present only when brands were supplied and the answer had text.
    pub brand_mentions: Option<Vec<BrandMentionResult>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnrichedResults {
    pub results: Vec<EnrichedResult>,
    pub citation_leaderboard: CitationLeaderboard,
}

/// Orchestrates the per-result brand detection and the cross-result citation
/// aggregation.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResultsEnricher {
    brand_detector: BrandMentionDetector,
    citation_builder: CitationLeaderboardBuilder,
}

impl ResultsEnricher {
    pub fn new(citation_builder: CitationLeaderboardBuilder) -> Self {
        Self {
            brand_detector: BrandMentionDetector,
            citation_builder,
        }
    }

    pub fn enrich(
        &self,
        results: &[(Prompt, Option<Evaluation>)],
        brands: Option<&[BrandInput]>,
    ) -> EnrichedResults {
        let mut all_citations = Vec::new();

        let enriched = results
            .iter()
            .map(|(prompt, evaluation)| {
                let answer = evaluation.as_ref().and_then(|e| e.answer.clone());

                if let Some(answer) = &answer {
                    all_citations.extend(answer.citations.iter().map(|citation| CitationInput {
                        url: citation.url.clone(),
                        text: citation.text.clone().unwrap_or_default(),
                    }));
                }

                let brand_mentions = match (brands, &answer) {
                    (Some(brands), Some(answer)) if !answer.response.is_empty() => {
                        Some(self.brand_detector.detect(&answer.response, brands))
                    }
                    _ => None,
                };

                EnrichedResult {
                    prompt_id: prompt.id,
                    prompt_text: prompt.text.clone(),
                    evaluation_id: evaluation.as_ref().map(|e| e.id),
                    status: evaluation.as_ref().map(|e| e.status),
                    answer,
                    completed_at: evaluation.as_ref().and_then(|e| e.completed_at),
                    brand_mentions,
                }
            })
            .collect();

        EnrichedResults {
            results: enriched,
            citation_leaderboard: self.citation_builder.aggregate(&all_citations),
        }
    }
}
