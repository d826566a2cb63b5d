use crate::asset::ImageAsset;
use crate::config::ApiConfig;
use crate::judge::{Evaluator, JudgeVerdict, Similarity};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("API returned error: {status} - {message}")]
    ApiError { status: u16, message: String },

    #[error("Failed to encode image: {0}")]
    ImageEncodeError(#[from] image::ImageError),

    #[error("Failed to decode base64: {0}")]
    Base64DecodeError(#[from] base64::DecodeError),

    #[error("No image found in response")]
    NoImage,

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Missing API key")]
    MissingApiKey,

    #[error("Image worker failed: {0}")]
    WorkerFailed(#[from] tokio::task::JoinError),
}

/// One image-editing call: a prompt, the image to edit and optional references
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub primary: ImageAsset,
    pub references: Vec<ImageAsset>,
    pub width: u32,
    pub height: u32,
}

/// An external model that edits one image into another
#[async_trait]
pub trait ImageEditor: Send + Sync {
    async fn edit(&self, request: &GenerationRequest) -> Result<ImageAsset, ApiError>;
}

pub struct ApiClient {
    config: ApiConfig,
    http: reqwest::Client,
}

// Chat-completions request types
#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    modalities: Option<[&'static str; 2]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: Vec<ContentPart>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

impl ContentPart {
    fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    fn image(asset: &ImageAsset) -> Self {
        Self::ImageUrl {
            image_url: ImageUrl {
                url: asset.to_data_uri(),
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ImageUrl {
    url: String,
}

// Chat-completions response types
#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    #[serde(default)]
    images: Vec<ResponseImage>,
}

#[derive(Debug, Deserialize)]
struct ResponseImage {
    image_url: ImageUrl,
}

#[derive(Debug, Deserialize)]
struct VerdictPayload {
    reason: String,
    best_index: i64,
}

#[derive(Debug, Deserialize)]
struct SimilarityPayload {
    reason: String,
    similarity: Similarity,
}

const JUDGE_INSTRUCTIONS: &str = "You are an expert image evaluator. Several edited photos were \
generated from the same person and the same reference hairstyle. Pick the single best one, \
judging how closely the hairstyle matches the reference in style, length and colour, how \
naturally it sits on the person's head and face, whether its lighting and shadows agree with \
the rest of the photo, and overall realism. Answer with the 0-based index of the best image \
and your reasoning.\n\nThis is the reference hairstyle:";

const CANDIDATES_LABEL: &str =
    "These are the generated images. The first is index 0, the second index 1, and so on.";

const SIMILARITY_INSTRUCTIONS: &str = "Compare the hairstyle in the second image with the \
reference hairstyle in the first image. Rate how similar they are in style, length and colour \
as high, medium or low, and explain briefly.";

impl ApiClient {
    pub fn new(config: &ApiConfig) -> Result<Self, ApiError> {
        let mut builder = reqwest::Client::builder();
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }

        Ok(Self {
            config: config.clone(),
            http: builder.build()?,
        })
    }

    /// Download an image, e.g. a catalog photo
    pub async fn download(&self, url: &str) -> Result<ImageAsset, ApiError> {
        log::debug!("Downloading image from {}", url);

        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::ApiError {
                status: status.as_u16(),
                message: format!("failed to fetch {url}"),
            });
        }

        Ok(ImageAsset::from_bytes(response.bytes().await?.to_vec()))
    }

    async fn chat(&self, request: &ChatRequest<'_>) -> Result<ResponseMessage, ApiError> {
        let api_key = self.config.api_key.as_ref().ok_or(ApiError::MissingApiKey)?;

        let response = self
            .http
            .post(&self.config.endpoint)
            .bearer_auth(api_key)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;

        if !status.is_success() {
            return Err(ApiError::ApiError {
                status: status.as_u16(),
                message: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        let parsed: ChatResponse = serde_json::from_slice(&body)
            .map_err(|e| ApiError::MalformedResponse(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message)
            .ok_or_else(|| ApiError::MalformedResponse("response has no choices".to_string()))
    }

    async fn structured<T: DeserializeOwned>(
        &self,
        messages: Vec<ChatMessage>,
        schema_name: &str,
        schema: Value,
    ) -> Result<T, ApiError> {
        let request = ChatRequest {
            model: &self.config.judge_model,
            messages,
            modalities: None,
            response_format: Some(json!({
                "type": "json_schema",
                "json_schema": {
                    "name": schema_name,
                    "strict": true,
                    "schema": schema,
                }
            })),
        };

        let message = self.chat(&request).await?;
        let content = message
            .content
            .ok_or_else(|| ApiError::MalformedResponse("response has no content".to_string()))?;

        serde_json::from_str(&content).map_err(|e| ApiError::MalformedResponse(e.to_string()))
    }
}

#[async_trait]
impl ImageEditor for ApiClient {
    async fn edit(&self, request: &GenerationRequest) -> Result<ImageAsset, ApiError> {
        let (width, height) = (request.width, request.height);

        let mut content = vec![ContentPart::image(
            &normalize(&request.primary, width, height).await?,
        )];
        for reference in &request.references {
            content.push(ContentPart::image(&normalize(reference, width, height).await?));
        }
        content.push(ContentPart::text(request.prompt.as_str()));

        let chat = ChatRequest {
            model: &self.config.image_model,
            messages: vec![ChatMessage {
                role: "user",
                content,
            }],
            modalities: Some(["image", "text"]),
            response_format: None,
        };

        let message = self.chat(&chat).await?;
        let url = message
            .images
            .into_iter()
            .next()
            .map(|image| image.image_url.url)
            .ok_or(ApiError::NoImage)?;

        let generated = if url.starts_with("data:image/") {
            ImageAsset::from_data_uri(&url)?
        } else {
            self.download(&url).await?
        };

        normalize(&generated, width, height).await
    }
}

/// Cover-resize to JPEG on the blocking pool so the fan-out keeps running
async fn normalize(asset: &ImageAsset, width: u32, height: u32) -> Result<ImageAsset, ApiError> {
    let asset = asset.clone();
    let resized = tokio::task::spawn_blocking(move || asset.fit_cover_jpeg(width, height)).await?;
    Ok(resized?)
}

#[async_trait]
impl Evaluator for ApiClient {
    async fn evaluate(
        &self,
        reference: &ImageAsset,
        candidates: &[ImageAsset],
    ) -> Result<JudgeVerdict, ApiError> {
        let mut labeled: Vec<ContentPart> = candidates.iter().map(ContentPart::image).collect();
        labeled.push(ContentPart::text(CANDIDATES_LABEL));

        let messages = vec![
            ChatMessage {
                role: "user",
                content: vec![
                    ContentPart::text(format!(
                        "{} candidates to compare.\n\n{JUDGE_INSTRUCTIONS}",
                        candidates.len()
                    )),
                    ContentPart::image(reference),
                ],
            },
            ChatMessage {
                role: "assistant",
                content: vec![ContentPart::text("Ready to evaluate the generated images.")],
            },
            ChatMessage {
                role: "user",
                content: labeled,
            },
        ];

        let schema = json!({
            "type": "object",
            "properties": {
                "reason": { "type": "string", "description": "Why this image was chosen" },
                "best_index": { "type": "integer", "description": "0-based index of the best image" }
            },
            "required": ["reason", "best_index"],
            "additionalProperties": false
        });

        let payload: VerdictPayload = self.structured(messages, "candidate_verdict", schema).await?;

        Ok(JudgeVerdict {
            index: payload.best_index,
            rationale: payload.reason,
            confidence: None,
        })
    }

    async fn rate_similarity(
        &self,
        reference: &ImageAsset,
        candidate: &ImageAsset,
    ) -> Result<Similarity, ApiError> {
        let messages = vec![ChatMessage {
            role: "user",
            content: vec![
                ContentPart::text(SIMILARITY_INSTRUCTIONS),
                ContentPart::image(reference),
                ContentPart::image(candidate),
            ],
        }];

        let schema = json!({
            "type": "object",
            "properties": {
                "reason": { "type": "string" },
                "similarity": { "type": "string", "enum": ["high", "medium", "low"] }
            },
            "required": ["reason", "similarity"],
            "additionalProperties": false
        });

        let payload: SimilarityPayload =
            self.structured(messages, "similarity_rating", schema).await?;
        log::debug!("Similarity rated {}: {}", payload.similarity, payload.reason);
        Ok(payload.similarity)
    }
}
