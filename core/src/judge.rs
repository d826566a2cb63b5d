//! Candidate selection.
//!
//! The judge only ever sees the successful subset of a fan-out, labeled by
//! position within that subset. A verdict pointing outside the subset is an
//! error; there is no fallback pick.

use crate::api::ApiError;
use crate::asset::ImageAsset;
use crate::generation::Candidate;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum JudgeError {
    #[error("judge needs at least 2 candidates, got {0}")]
    TooFewCandidates(usize),

    #[error("judge picked index {index} but only {len} candidates were offered")]
    IndexOutOfRange { index: i64, len: usize },

    #[error("judge request failed: {0}")]
    Request(#[source] ApiError),
}

/// Similarity of a result to the reference style
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Similarity {
    High,
    Medium,
    Low,
}

impl fmt::Display for Similarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        })
    }
}

/// Raw answer of an evaluator, index as the model returned it
#[derive(Debug, Clone)]
pub struct JudgeVerdict {
    pub index: i64,
    pub rationale: String,
    pub confidence: Option<Similarity>,
}

impl JudgeVerdict {
    /// Check the index against the number of candidates offered
    pub fn validate(&self, len: usize) -> Result<usize, JudgeError> {
        usize::try_from(self.index)
            .ok()
            .filter(|&index| index < len)
            .ok_or(JudgeError::IndexOutOfRange {
                index: self.index,
                len,
            })
    }
}

/// Automated visual comparison
#[async_trait]
pub trait Evaluator: Send + Sync {
    /// Pick the best of `candidates` (0-based) against the reference
    async fn evaluate(
        &self,
        reference: &ImageAsset,
        candidates: &[ImageAsset],
    ) -> Result<JudgeVerdict, ApiError>;

    async fn rate_similarity(
        &self,
        reference: &ImageAsset,
        candidate: &ImageAsset,
    ) -> Result<Similarity, ApiError>;
}

/// Outcome of a successful selection
#[derive(Debug, Clone)]
pub struct Selection {
    /// Position within the successful subset
    pub position: usize,
    pub candidate: Candidate,
    pub rationale: String,
}

pub struct Judge {
    evaluator: Arc<dyn Evaluator>,
}

impl Judge {
    pub fn new(evaluator: Arc<dyn Evaluator>) -> Self {
        Self { evaluator }
    }

    /// Pick the best candidate. Issues exactly one evaluation call.
    pub async fn select(
        &self,
        reference: &ImageAsset,
        candidates: &[Candidate],
    ) -> Result<Selection, JudgeError> {
        if candidates.len() < 2 {
            return Err(JudgeError::TooFewCandidates(candidates.len()));
        }

        let images: Vec<ImageAsset> = candidates.iter().map(|c| c.image.clone()).collect();
        let verdict = self
            .evaluator
            .evaluate(reference, &images)
            .await
            .map_err(JudgeError::Request)?;

        let position = verdict.validate(candidates.len())?;
        let candidate = candidates[position].clone();

        log::info!(
            "Judge picked candidate {} (generation #{}){}: {}",
            position,
            candidate.ordinal,
            verdict
                .confidence
                .map(|c| format!(", confidence {c}"))
                .unwrap_or_default(),
            verdict.rationale
        );

        Ok(Selection {
            position,
            candidate,
            rationale: verdict.rationale,
        })
    }

    /// Rate how closely the chosen image follows the reference
    pub async fn check_quality(
        &self,
        reference: &ImageAsset,
        chosen: &ImageAsset,
    ) -> Result<Similarity, JudgeError> {
        let similarity = self
            .evaluator
            .rate_similarity(reference, chosen)
            .await
            .map_err(JudgeError::Request)?;

        log::debug!("Quality check rated similarity {}", similarity);
        Ok(similarity)
    }
}
