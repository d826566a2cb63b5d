pub mod api;
pub mod asset;
pub mod catalog;
pub mod config;
pub mod error;
pub mod generation;
pub mod journal;
pub mod judge;
pub mod preprocessing;
pub mod retry;
pub mod transition;

#[cfg(test)]
mod testing;

pub use api::{ApiClient, ApiError, GenerationRequest, ImageEditor};
pub use asset::{ImageAsset, MediaType};
pub use catalog::{JsonCatalog, StyleCatalog, StyleFilter, StyleRecord};
pub use config::Config;
pub use error::SynthesisError;
pub use journal::{RunJournal, Statistics};
pub use judge::{Evaluator, JudgeError, JudgeVerdict, Similarity};
pub use transition::{TransitionError, TransitionRenderer};

use crate::generation::{failure_reasons, successful_subset, CandidateGenerator};
use crate::journal::CompletedRun;
use crate::judge::Judge;
use crate::preprocessing::Preprocessor;
use crate::retry::{retry, RetryError};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Stages of one synthesis attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    Init,
    Preprocessing,
    Generating,
    Judging,
    Transitioning,
    Done,
    Failed,
}

/// Input of [`Synthesizer::synthesize`]. Unset options fall back to the config.
#[derive(Debug, Clone)]
pub struct SynthesisRequest {
    pub original: ImageAsset,
    /// Reference style photos; the first one is used
    pub references: Vec<ImageAsset>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub transition_duration: Option<Duration>,
    /// Rate the chosen image against the reference and reject `low` matches.
    ///
    /// This makes one similarity call to the evaluator even when a single
    /// candidate succeeded and selection was skipped.
    pub quality_check: Option<bool>,
    pub max_attempts: Option<u32>,
}

impl SynthesisRequest {
    pub fn new(original: ImageAsset, references: Vec<ImageAsset>) -> Self {
        Self {
            original,
            references,
            width: None,
            height: None,
            transition_duration: None,
            quality_check: None,
            max_attempts: None,
        }
    }
}

/// Final composite plus the optional before/after animation
#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub image: ImageAsset,
    pub transition: Option<ImageAsset>,
    pub metadata: RunMetadata,
}

impl PipelineResult {
    /// File name for the composite, e.g. `composite.jpg`
    pub fn composite_file_name(&self) -> String {
        format!("composite{}", self.image.media_type().extension())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    pub attempts: u32,
    pub width: u32,
    pub height: u32,
    pub candidates_generated: usize,
    pub candidates_succeeded: usize,
    pub judged: bool,
    pub chosen_ordinal: usize,
    pub rationale: Option<String>,
    pub similarity: Option<Similarity>,
    pub transition_error: Option<String>,
}

/// Output metadata written next to the images
#[derive(Debug, Serialize, Deserialize)]
pub struct OutputMetadata {
    pub media_type: MediaType,
    pub image_bytes: usize,
    pub transition_bytes: Option<usize>,
    #[serde(flatten)]
    pub run: RunMetadata,
}

impl From<&PipelineResult> for OutputMetadata {
    fn from(result: &PipelineResult) -> Self {
        Self {
            media_type: result.image.media_type(),
            image_bytes: result.image.len(),
            transition_bytes: result.transition.as_ref().map(ImageAsset::len),
            run: result.metadata.clone(),
        }
    }
}

/// Request options resolved against the config
#[derive(Debug, Clone, Copy)]
struct RunSettings {
    width: u32,
    height: u32,
    transition_duration: Option<Duration>,
    quality_check: bool,
    max_attempts: NonZeroU32,
}

/// Main synthesizer that orchestrates the entire workflow
pub struct Synthesizer {
    config: Config,
    preprocessor: Preprocessor,
    generator: CandidateGenerator,
    judge: Judge,
    renderer: TransitionRenderer,
    journal: Option<RunJournal>,
}

impl Synthesizer {
    pub fn new(config: Config) -> Result<Self> {
        let client = Arc::new(ApiClient::new(&config.api)?);
        Self::with_backends(config, client.clone(), client)
    }

    /// Build a synthesizer over custom model backends
    pub fn with_backends(
        config: Config,
        editor: Arc<dyn ImageEditor>,
        evaluator: Arc<dyn Evaluator>,
    ) -> Result<Self> {
        config.validate()?;

        let journal = if config.journal_enabled {
            Some(match &config.journal_path {
                Some(path) => RunJournal::with_path(PathBuf::from(path))?,
                None => RunJournal::new()?,
            })
        } else {
            None
        };

        Ok(Self {
            preprocessor: Preprocessor::new(editor.clone()),
            generator: CandidateGenerator::new(editor, config.pipeline.fan_out),
            judge: Judge::new(evaluator),
            renderer: TransitionRenderer::new(&config.transition),
            journal,
            config,
        })
    }

    /// Produce a composite of `request.original` wearing the reference hairstyle.
    ///
    /// Each attempt re-runs the whole pipeline from scratch. Invalid input is
    /// rejected before any model call and is never retried.
    pub async fn synthesize(
        &self,
        request: SynthesisRequest,
    ) -> Result<PipelineResult, SynthesisError> {
        let settings = self.resolve(&request)?;
        if request.references.len() > 1 {
            log::debug!(
                "Using the first of {} reference images",
                request.references.len()
            );
        }

        log::info!(
            "Synthesizing {}x{} composite (up to {} attempts)",
            settings.width,
            settings.height,
            settings.max_attempts
        );

        let (request, settings) = (&request, &settings);
        let outcome = retry(settings.max_attempts, |attempt| async move {
            let result = self.attempt(attempt, request, settings).await;
            if let Err(err) = &result {
                enter(attempt, RunStage::Failed);
                log::error!("Attempt {} failed during {:?}: {}", attempt, err.stage(), err);
                self.record(|journal| {
                    journal.log_attempt_failure(attempt, err.stage(), &err.to_string())
                });
            }
            result
        })
        .await;

        match outcome {
            Ok(result) => {
                let metadata = &result.metadata;
                self.record(|journal| {
                    journal.log_completed(&CompletedRun {
                        attempts: metadata.attempts,
                        candidates_generated: metadata.candidates_generated,
                        candidates_succeeded: metadata.candidates_succeeded,
                        judged: metadata.judged,
                        transition: result.transition.is_some(),
                    })
                });
                Ok(result)
            }
            Err(RetryError { attempts, last }) => {
                log::error!("Giving up after {} attempt(s): {}", attempts, last);
                self.record(|journal| journal.log_failed(attempts, last.stage(), &last.to_string()));
                Err(SynthesisError::RetryExhausted {
                    attempts,
                    last: Box::new(last),
                })
            }
        }
    }

    fn resolve(&self, request: &SynthesisRequest) -> Result<RunSettings, SynthesisError> {
        let pipeline = &self.config.pipeline;

        if request.original.is_empty()
            || request.original.media_type() == MediaType::Unknown
        {
            return Err(SynthesisError::Validation(
                "original image is missing or not a recognised image format".to_string(),
            ));
        }
        let Some(reference) = request.references.first() else {
            return Err(SynthesisError::Validation(
                "at least one reference image is required".to_string(),
            ));
        };
        if reference.is_empty() || reference.media_type() == MediaType::Unknown {
            return Err(SynthesisError::Validation(
                "reference image is missing or not a recognised image format".to_string(),
            ));
        }

        let width = request.width.unwrap_or(pipeline.width);
        let height = request.height.unwrap_or(pipeline.height);
        if width == 0 || height == 0 {
            return Err(SynthesisError::Validation(
                "width and height must be positive".to_string(),
            ));
        }

        let transition_duration = if self.config.transition.enabled {
            let duration = request
                .transition_duration
                .unwrap_or(Duration::from_millis(self.config.transition.duration_ms));
            if duration.is_zero() {
                return Err(SynthesisError::Validation(
                    "transition duration must be positive".to_string(),
                ));
            }
            Some(duration)
        } else {
            None
        };

        let max_attempts = NonZeroU32::new(request.max_attempts.unwrap_or(pipeline.max_attempts))
            .ok_or_else(|| {
                SynthesisError::Validation("max attempts must be at least 1".to_string())
            })?;

        Ok(RunSettings {
            width,
            height,
            transition_duration,
            quality_check: request.quality_check.unwrap_or(pipeline.quality_check),
            max_attempts,
        })
    }

    async fn attempt(
        &self,
        attempt: u32,
        request: &SynthesisRequest,
        settings: &RunSettings,
    ) -> Result<PipelineResult, SynthesisError> {
        let (width, height) = (settings.width, settings.height);
        enter(attempt, RunStage::Init);

        enter(attempt, RunStage::Preprocessing);
        let prepared = self
            .preprocessor
            .run(&request.original, &request.references[0], width, height)
            .await
            .map_err(SynthesisError::Preprocessing)?;

        enter(attempt, RunStage::Generating);
        let outcomes = self
            .generator
            .generate(&prepared.subject, &prepared.reference, width, height)
            .await;
        let candidates = successful_subset(&outcomes);
        log::info!(
            "{} of {} candidates succeeded",
            candidates.len(),
            outcomes.len()
        );

        let (chosen, rationale, judged) = match candidates.as_slice() {
            [] => {
                return Err(SynthesisError::UpstreamGeneration {
                    attempted: outcomes.len(),
                    reasons: failure_reasons(&outcomes),
                });
            }
            [only] => (only.clone(), None, false),
            _ => {
                enter(attempt, RunStage::Judging);
                let selection = self.judge.select(&prepared.reference, &candidates).await?;
                (selection.candidate, Some(selection.rationale), true)
            }
        };

        let similarity = if settings.quality_check {
            enter(attempt, RunStage::Judging);
            let similarity = self
                .judge
                .check_quality(&prepared.reference, &chosen.image)
                .await?;
            if similarity == Similarity::Low {
                return Err(SynthesisError::QualityRejected);
            }
            Some(similarity)
        } else {
            None
        };

        let mut transition = None;
        let mut transition_error = None;
        if let Some(duration) = settings.transition_duration {
            enter(attempt, RunStage::Transitioning);
            match self
                .renderer
                .render(&request.original, &chosen.image, width, height, duration)
                .await
            {
                Ok(gif) => transition = Some(gif),
                Err(err) => {
                    log::warn!("Transition rendering failed, continuing without it: {}", err);
                    transition_error = Some(err.to_string());
                }
            }
        }

        enter(attempt, RunStage::Done);
        Ok(PipelineResult {
            image: chosen.image,
            transition,
            metadata: RunMetadata {
                attempts: attempt,
                width,
                height,
                candidates_generated: outcomes.len(),
                candidates_succeeded: candidates.len(),
                judged,
                chosen_ordinal: chosen.ordinal,
                rationale,
                similarity,
                transition_error,
            },
        })
    }

    /// Journal writes never affect a run
    fn record(&self, write: impl FnOnce(&RunJournal) -> Result<()>) {
        if let Some(journal) = &self.journal {
            if let Err(err) = write(journal) {
                log::warn!("Failed to write run journal: {:#}", err);
            }
        }
    }
}

fn enter(attempt: u32, stage: RunStage) {
    log::debug!("Attempt {} -> {:?}", attempt, stage);
}
