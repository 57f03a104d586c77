// src/quality/mod.rs
// Confidence scoring for retrieval-augmented replies: a weighted aggregate of
// similarity, source quality, recency and feedback history, mapped onto the
// coarse rag_status labels.

use chrono::{DateTime, Utc};

use crate::db::RagStatus;
use crate::search::Hit;

/// Component weights of the aggregate
const SIMILARITY_WEIGHT: f64 = 0.4;
const SOURCE_QUALITY_WEIGHT: f64 = 0.3;
const RECENCY_WEIGHT: f64 = 0.2;
const FEEDBACK_WEIGHT: f64 = 0.1;

/// One feedback observation relevant to scoring
#[derive(Debug, Clone)]
pub struct FeedbackObservation {
    pub source_path: String,
    pub helpful: bool,
}

/// Inputs beyond the hits themselves
#[derive(Debug, Clone, Default)]
pub struct ScoringContext {
    pub feedback_history: Vec<FeedbackObservation>,
    /// Last-modified timestamps per file path when known
    pub file_mtimes: Vec<(String, DateTime<Utc>)>,
}

pub struct ConfidenceService;

impl ConfidenceService {
    /// Overall confidence for a reply backed by `hits`, in [0, 1].
    pub fn calculate_rag_confidence(hits: &[Hit], ctx: &ScoringContext) -> f64 {
        if hits.is_empty() {
            return 0.0;
        }

        let mut weighted_sum = 0.0;
        let mut total_weight = 0.0;
        for hit in hits {
            let confidence = Self::result_confidence(hit, ctx);
            let weight = (hit.score as f64).max(0.0);
            weighted_sum += confidence * weight;
            total_weight += weight;
        }

        let mut confidence = if total_weight > 0.0 {
            weighted_sum / total_weight
        } else {
            0.0
        };

        // Multiple confirming sources earn a small diversity boost
        if hits.len() > 1 {
            let boost = ((hits.len() - 1) as f64 * 0.02).min(0.1);
            confidence = (confidence + boost).min(1.0);
        }

        (confidence * 1000.0).round() / 1000.0
    }

    fn result_confidence(hit: &Hit, ctx: &ScoringContext) -> f64 {
        let similarity = (hit.score as f64).clamp(0.0, 1.0);
        let source = Self::source_quality(hit);
        let recency = Self::recency_confidence(hit, ctx);
        let feedback = Self::feedback_confidence(hit, &ctx.feedback_history);

        (similarity * SIMILARITY_WEIGHT
            + source * SOURCE_QUALITY_WEIGHT
            + recency * RECENCY_WEIGHT
            + feedback * FEEDBACK_WEIGHT)
            .min(1.0)
    }

    /// Quality by inferred source type, nudged by content signals.
    fn source_quality(hit: &Hit) -> f64 {
        let path = hit.metadata.file_path.to_lowercase();
        let mut quality: f64 = if path.contains("readme") {
            0.70
        } else if path.ends_with(".md") || path.ends_with(".rst") || path.ends_with(".txt") {
            0.85
        } else if path.contains("test") || path.contains("spec") {
            0.90
        } else if !path.is_empty() {
            0.60
        } else {
            0.50
        };

        let has_docs = hit.content.lines().any(|line| {
            let t = line.trim_start();
            t.starts_with("///") || t.starts_with("/**") || t.starts_with("\"\"\"") || t.starts_with("# ")
        });
        if has_docs {
            quality = (quality + 0.05).min(1.0);
        }
        if hit.content.contains("TODO") || hit.content.contains("FIXME") {
            quality = (quality - 0.1).max(0.0);
        }
        quality
    }

    /// Newer sources are worth more; unknown ages sit at a neutral 0.6.
    fn recency_confidence(hit: &Hit, ctx: &ScoringContext) -> f64 {
        let Some((_, modified)) = ctx
            .file_mtimes
            .iter()
            .find(|(path, _)| *path == hit.metadata.file_path)
        else {
            return 0.6;
        };

        let days_old = (Utc::now() - *modified).num_days();
        match days_old {
            d if d <= 7 => 1.0,
            d if d <= 30 => 0.9,
            d if d <= 90 => 0.8,
            d if d <= 365 => 0.6,
            _ => 0.4,
        }
    }

    /// Helpful-ratio over feedback for the same source, smoothed when sparse.
    fn feedback_confidence(hit: &Hit, history: &[FeedbackObservation]) -> f64 {
        if history.is_empty() {
            return 0.5;
        }

        let relevant: Vec<&FeedbackObservation> = history
            .iter()
            .filter(|f| f.source_path == hit.metadata.file_path)
            .collect();
        if relevant.is_empty() {
            return 0.5;
        }

        let helpful = relevant.iter().filter(|f| f.helpful).count() as f64;
        let ratio = helpful / relevant.len() as f64;

        if relevant.len() < 3 {
            0.5 + (ratio - 0.5) * 0.3
        } else {
            ratio
        }
    }

    /// Map confidence + sources onto the coarse status label.
    pub fn degradation_status(
        confidence: f64,
        hits: &[Hit],
        error: Option<&str>,
    ) -> RagStatus {
        if error.is_some() {
            return RagStatus::Error;
        }
        if hits.is_empty() {
            return RagStatus::Standard;
        }
        if confidence >= 0.8 {
            RagStatus::Active
        } else if confidence >= 0.6 {
            RagStatus::Degraded
        } else {
            RagStatus::Poor
        }
    }

    /// Human-readable explanation of a confidence level.
    pub fn explanation(confidence: f64) -> &'static str {
        if confidence >= 0.9 {
            "Very high confidence - multiple high-quality sources confirm this information"
        } else if confidence >= 0.8 {
            "High confidence - reliable sources support this response"
        } else if confidence >= 0.7 {
            "Good confidence - sources are relevant and reasonably reliable"
        } else if confidence >= 0.6 {
            "Moderate confidence - some uncertainty in source quality or relevance"
        } else if confidence >= 0.5 {
            "Low confidence - limited or less reliable source information"
        } else {
            "Very low confidence - sources may not be reliable or relevant"
        }
    }
}
