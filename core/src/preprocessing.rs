use crate::api::{ApiError, GenerationRequest, ImageEditor};
use crate::asset::ImageAsset;
use std::sync::Arc;

const REMOVE_HAIR_PROMPT: &str = "\
Remove all hair and any headwear (hats, caps and similar) from this person and give them a very \
short buzz cut.

Do not return the original photo unchanged.

Return only the final edited image, with no text.";

// A fully bald result pushes the hairline of later composites too high, so
// the subject keeps a buzz cut.

const RELIGHT_PROMPT: &str = "\
# Role
You are an expert photo editor. Change the background and relight the face in the first image \
so that it matches the background and lighting of the second image. The person should look as \
if they stood in exactly the same place as the person in the second image.

# Requirements
- Match the second image's style, lighting, shadows and reflections.
- Keep the direction of its light sources, including any backlighting.
- If the second image has shadows on the face, add matching shadows on the face.

Return only the final edited image, with no text.";

/// Inputs cleaned for candidate generation
#[derive(Debug, Clone)]
pub struct PreparedInputs {
    /// Original subject with the hair stripped to a buzz cut
    pub subject: ImageAsset,
    /// Reference style relit to match the original photo
    pub reference: ImageAsset,
}

pub struct Preprocessor {
    editor: Arc<dyn ImageEditor>,
}

impl Preprocessor {
    pub fn new(editor: Arc<dyn ImageEditor>) -> Self {
        Self { editor }
    }

    /// Strip the hair from `original` and relight `reference` concurrently.
    ///
    /// Both calls must succeed; the raw images are never substituted.
    pub async fn run(
        &self,
        original: &ImageAsset,
        reference: &ImageAsset,
        width: u32,
        height: u32,
    ) -> Result<PreparedInputs, ApiError> {
        let remove_hair = GenerationRequest {
            prompt: REMOVE_HAIR_PROMPT.to_string(),
            primary: original.clone(),
            references: Vec::new(),
            width,
            height,
        };
        let relight = GenerationRequest {
            prompt: RELIGHT_PROMPT.to_string(),
            primary: reference.clone(),
            references: vec![original.clone()],
            width,
            height,
        };

        let (subject, reference) =
            tokio::try_join!(self.editor.edit(&remove_hair), self.editor.edit(&relight))?;

        log::debug!(
            "Preprocessed subject ({} bytes) and reference ({} bytes)",
            subject.len(),
            reference.len()
        );

        Ok(PreparedInputs { subject, reference })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_png, ScriptedEditor};

    #[tokio::test]
    async fn test_run_issues_both_edits() {
        let editor = Arc::new(ScriptedEditor::new());
        let preprocessor = Preprocessor::new(editor.clone());
        let original = sample_png(10, 10);
        let reference = sample_png(12, 12);

        let prepared = preprocessor.run(&original, &reference, 400, 400).await.unwrap();

        let requests = editor.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].primary, original);
        assert!(requests[0].references.is_empty());
        assert_eq!(requests[1].primary, reference);
        assert_eq!(requests[1].references, vec![original.clone()]);
        assert_eq!(prepared.subject, ScriptedEditor::output(0));
        assert_eq!(prepared.reference, ScriptedEditor::output(1));
    }

    #[tokio::test]
    async fn test_either_failure_fails_the_stage() {
        for failing in [0, 1] {
            let editor = Arc::new(ScriptedEditor::new().fail_calls([failing]));
            let preprocessor = Preprocessor::new(editor);

            let result = preprocessor
                .run(&sample_png(4, 4), &sample_png(4, 4), 64, 64)
                .await;
            assert!(result.is_err(), "call {failing} failing must fail the stage");
        }
    }
}
