//! Deterministic stand-ins for the model endpoints.

use crate::api::{ApiError, GenerationRequest, ImageEditor};
use crate::asset::{ImageAsset, MediaType};
use crate::generation::Candidate;
use crate::judge::{Evaluator, JudgeVerdict, Similarity};
use async_trait::async_trait;
use image::{DynamicImage, ImageOutputFormat, Rgba, RgbaImage};
use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::sync::Mutex;

/// A real PNG of the given size
pub fn sample_png(width: u32, height: u32) -> ImageAsset {
    let img = RgbaImage::from_pixel(width, height, Rgba([200, 120, 40, 255]));
    let mut buf = Vec::new();
    DynamicImage::ImageRgba8(img)
        .write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Png)
        .unwrap();
    ImageAsset::from_bytes(buf)
}

pub fn candidate(ordinal: usize, seed: u8) -> Candidate {
    Candidate {
        ordinal,
        image: ImageAsset::new(vec![0xff, 0xd8, 0xff, seed], MediaType::Jpeg),
    }
}

/// Editor that answers every call with a distinct image, except the calls
/// (0-based, in invocation order) scripted to fail or come back empty.
#[derive(Default)]
pub struct ScriptedEditor {
    failing: HashSet<usize>,
    empty: HashSet<usize>,
    delays: HashMap<usize, usize>,
    requests: Mutex<Vec<GenerationRequest>>,
    finished: Mutex<Vec<usize>>,
}

impl ScriptedEditor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_calls(mut self, calls: impl IntoIterator<Item = usize>) -> Self {
        self.failing.extend(calls);
        self
    }

    pub fn empty_calls(mut self, calls: impl IntoIterator<Item = usize>) -> Self {
        self.empty.extend(calls);
        self
    }

    /// Hold call `call` for `rounds` scheduler turns before it answers
    pub fn delay_calls(mut self, delays: impl IntoIterator<Item = (usize, usize)>) -> Self {
        self.delays.extend(delays);
        self
    }

    /// The image returned by call `call`
    pub fn output(call: usize) -> ImageAsset {
        ImageAsset::new(format!("edited-{call}").into_bytes(), MediaType::Jpeg)
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Call indices in the order they completed
    pub fn finished(&self) -> Vec<usize> {
        self.finished.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImageEditor for ScriptedEditor {
    async fn edit(&self, request: &GenerationRequest) -> Result<ImageAsset, ApiError> {
        let call = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request.clone());
            requests.len() - 1
        };
        let rounds = self.delays.get(&call).copied().unwrap_or(1);
        for _ in 0..rounds {
            tokio::task::yield_now().await;
        }
        self.finished.lock().unwrap().push(call);

        if self.failing.contains(&call) {
            Err(ApiError::ApiError {
                status: 503,
                message: format!("scripted failure of call {call}"),
            })
        } else if self.empty.contains(&call) {
            Ok(ImageAsset::new(Vec::new(), MediaType::Jpeg))
        } else {
            Ok(Self::output(call))
        }
    }
}

/// Evaluator that returns scripted verdicts, one per call, repeating the last
pub struct ScriptedEvaluator {
    picks: Vec<i64>,
    similarity: Similarity,
    fail: bool,
    offered: Mutex<Vec<Vec<ImageAsset>>>,
    ratings: Mutex<usize>,
}

impl ScriptedEvaluator {
    pub fn picking(index: i64) -> Self {
        Self::picking_each([index])
    }

    pub fn picking_each(picks: impl IntoIterator<Item = i64>) -> Self {
        Self {
            picks: picks.into_iter().collect(),
            similarity: Similarity::High,
            fail: false,
            offered: Mutex::new(Vec::new()),
            ratings: Mutex::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::picking(0)
        }
    }

    pub fn with_similarity(mut self, similarity: Similarity) -> Self {
        self.similarity = similarity;
        self
    }

    /// Number of candidates offered on each evaluation call
    pub fn evaluations(&self) -> Vec<usize> {
        self.offered.lock().unwrap().iter().map(Vec::len).collect()
    }

    /// Candidates offered on each evaluation call, in label order
    pub fn offered(&self) -> Vec<Vec<ImageAsset>> {
        self.offered.lock().unwrap().clone()
    }

    pub fn ratings(&self) -> usize {
        *self.ratings.lock().unwrap()
    }
}

#[async_trait]
impl Evaluator for ScriptedEvaluator {
    async fn evaluate(
        &self,
        _reference: &ImageAsset,
        candidates: &[ImageAsset],
    ) -> Result<JudgeVerdict, ApiError> {
        let call = {
            let mut offered = self.offered.lock().unwrap();
            offered.push(candidates.to_vec());
            offered.len() - 1
        };

        if self.fail {
            return Err(ApiError::MalformedResponse("scripted failure".to_string()));
        }

        let index = self
            .picks
            .get(call)
            .or(self.picks.last())
            .copied()
            .unwrap_or(0);
        Ok(JudgeVerdict {
            index,
            rationale: format!("scripted pick {index}"),
            confidence: Some(Similarity::High),
        })
    }

    async fn rate_similarity(
        &self,
        _reference: &ImageAsset,
        _candidate: &ImageAsset,
    ) -> Result<Similarity, ApiError> {
        *self.ratings.lock().unwrap() += 1;
        if self.fail {
            return Err(ApiError::MalformedResponse("scripted failure".to_string()));
        }
        Ok(self.similarity)
    }
}
