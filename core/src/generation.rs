use crate::api::{GenerationRequest, ImageEditor};
use crate::asset::ImageAsset;
use futures::future::join_all;
use std::sync::Arc;

const COMPOSITE_PROMPT: &str = "\
# Role
You are an expert photo editor. Add a new hairstyle to the person in a photo and return the \
composite image.

# Inputs
- The first image is the person who receives the hairstyle.
- The second image shows the hairstyle to add.

# Requirements
- Keep the first image's style, lighting, shadows, reflections and camera perspective. Change \
only the hair.
- Match the reference hairstyle's length, volume, colour, style and parting exactly, even if \
the result looks unusual. Hair that falls past the shoulders in the reference must fall past \
the shoulders in the result.
- Re-render the hairstyle for this scene instead of pasting it: follow the person's head pose \
and perspective, scale it to fit, and light and shade it from the photo's own light sources.
- Never return the person unchanged or bald. The new hairstyle must be visible.

Return only the final composed image, with no text.";

/// Result of one fan-out request
#[derive(Debug, Clone)]
pub struct CandidateOutcome {
    /// Position in the fan-out, stable for the run
    pub ordinal: usize,
    pub result: Result<ImageAsset, String>,
}

/// A successfully generated image
#[derive(Debug, Clone)]
pub struct Candidate {
    pub ordinal: usize,
    pub image: ImageAsset,
}

pub struct CandidateGenerator {
    editor: Arc<dyn ImageEditor>,
    fan_out: usize,
}

impl CandidateGenerator {
    pub fn new(editor: Arc<dyn ImageEditor>, fan_out: usize) -> Self {
        Self { editor, fan_out }
    }

    pub fn fan_out(&self) -> usize {
        self.fan_out
    }

    /// Issue `fan_out` identical composite requests and wait for all of them.
    ///
    /// Failures never cancel siblings. An empty image counts as a failure.
    /// Outcomes come back in ordinal order whatever order the requests
    /// finish in.
    pub async fn generate(
        &self,
        subject: &ImageAsset,
        reference: &ImageAsset,
        width: u32,
        height: u32,
    ) -> Vec<CandidateOutcome> {
        log::info!("Generating {} candidates at {}x{}", self.fan_out, width, height);

        let requests = (0..self.fan_out).map(|ordinal| {
            let request = GenerationRequest {
                prompt: COMPOSITE_PROMPT.to_string(),
                primary: subject.clone(),
                references: vec![reference.clone()],
                width,
                height,
            };
            async move {
                let result = match self.editor.edit(&request).await {
                    Ok(image) if image.is_empty() => {
                        Err("model returned an empty image".to_string())
                    }
                    Ok(image) => Ok(image),
                    Err(err) => Err(err.to_string()),
                };
                if let Err(reason) = &result {
                    log::warn!("Generation {} failed: {}", ordinal, reason);
                }
                CandidateOutcome { ordinal, result }
            }
        });

        join_all(requests).await
    }
}

/// Keep the successful outcomes, in ordinal order
pub fn successful_subset(outcomes: &[CandidateOutcome]) -> Vec<Candidate> {
    outcomes
        .iter()
        .filter_map(|outcome| {
            outcome.result.as_ref().ok().map(|image| Candidate {
                ordinal: outcome.ordinal,
                image: image.clone(),
            })
        })
        .collect()
}

/// Failure reasons, prefixed with their ordinal
pub fn failure_reasons(outcomes: &[CandidateOutcome]) -> Vec<String> {
    outcomes
        .iter()
        .filter_map(|outcome| {
            outcome
                .result
                .as_ref()
                .err()
                .map(|reason| format!("#{}: {}", outcome.ordinal, reason))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_png, ScriptedEditor};

    #[tokio::test]
    async fn test_generate_settles_all_requests() {
        let editor = Arc::new(ScriptedEditor::new().fail_calls([1, 3]));
        let generator = CandidateGenerator::new(editor.clone(), 5);

        let outcomes = generator
            .generate(&sample_png(8, 8), &sample_png(8, 8), 400, 400)
            .await;

        assert_eq!(outcomes.len(), 5);
        assert_eq!(editor.calls(), 5);
        let ordinals: Vec<usize> = outcomes.iter().map(|o| o.ordinal).collect();
        assert_eq!(ordinals, vec![0, 1, 2, 3, 4]);
        assert!(outcomes[1].result.is_err());
        assert!(outcomes[3].result.is_err());
    }

    #[tokio::test]
    async fn test_requests_are_identical() {
        let editor = Arc::new(ScriptedEditor::new());
        let generator = CandidateGenerator::new(editor.clone(), 3);
        let subject = sample_png(8, 8);
        let reference = sample_png(6, 6);

        generator.generate(&subject, &reference, 320, 240).await;

        let requests = editor.requests();
        assert_eq!(requests.len(), 3);
        for request in &requests {
            assert_eq!(request.primary, subject);
            assert_eq!(request.references, vec![reference.clone()]);
            assert_eq!((request.width, request.height), (320, 240));
            assert_eq!(request.prompt, requests[0].prompt);
        }
    }

    #[tokio::test]
    async fn test_successful_subset_keeps_order() {
        let editor = Arc::new(ScriptedEditor::new().fail_calls([0, 2]));
        let generator = CandidateGenerator::new(editor, 4);

        let outcomes = generator
            .generate(&sample_png(8, 8), &sample_png(8, 8), 64, 64)
            .await;
        let subset = successful_subset(&outcomes);

        let ordinals: Vec<usize> = subset.iter().map(|c| c.ordinal).collect();
        assert_eq!(ordinals, vec![1, 3]);
        assert_eq!(failure_reasons(&outcomes).len(), 2);
        assert!(failure_reasons(&outcomes)[0].starts_with("#0:"));
    }

    #[tokio::test]
    async fn test_outcomes_follow_issue_order_not_completion_order() {
        // Later calls are held for fewer turns, so they finish first
        let editor = Arc::new(
            ScriptedEditor::new().delay_calls([(0, 9), (1, 7), (2, 5), (3, 3), (4, 1)]),
        );
        let generator = CandidateGenerator::new(editor.clone(), 5);

        let outcomes = generator
            .generate(&sample_png(8, 8), &sample_png(8, 8), 64, 64)
            .await;

        assert_eq!(editor.finished(), vec![4, 3, 2, 1, 0]);
        for (ordinal, outcome) in outcomes.iter().enumerate() {
            assert_eq!(outcome.ordinal, ordinal);
            assert_eq!(
                outcome.result.as_ref().unwrap(),
                &ScriptedEditor::output(ordinal)
            );
        }
    }

    #[tokio::test]
    async fn test_empty_image_is_a_failure() {
        let editor = Arc::new(ScriptedEditor::new().empty_calls([1]));
        let generator = CandidateGenerator::new(editor, 3);

        let outcomes = generator
            .generate(&sample_png(8, 8), &sample_png(8, 8), 64, 64)
            .await;

        let ordinals: Vec<usize> = successful_subset(&outcomes)
            .iter()
            .map(|c| c.ordinal)
            .collect();
        assert_eq!(ordinals, vec![0, 2]);
        assert_eq!(
            failure_reasons(&outcomes),
            vec!["#1: model returned an empty image".to_string()]
        );
    }
}
