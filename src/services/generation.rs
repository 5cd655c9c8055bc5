use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::models::job::Category;
use crate::services::images::ImageData;

/// Produces a new image of the person wearing one garment.
#[async_trait]
pub trait Compositor: Send + Sync {
    async fn composite(
        &self,
        base: &ImageData,
        garment: &ImageData,
        category: Category,
        canvas: &ImageData,
    ) -> Result<ImageData, GenerationError>;
}

/// Writes a short styling comment for a finished look.
#[async_trait]
pub trait Captioner: Send + Sync {
    async fn caption(&self, image: &ImageData) -> Result<String, GenerationError>;
}

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Client for the Gemini `generateContent` REST endpoint.
pub struct GeminiClient {
    http: Client,
    api_key: String,
    image_model: String,
    caption_model: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum RequestPart<'a> {
    Text {
        text: &'a str,
    },
    #[serde(rename_all = "camelCase")]
    Inline {
        inline_data: InlineData,
    },
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: Vec<&'static str>,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponsePart {
    text: Option<String>,
    inline_data: Option<InlineData>,
}

impl GeminiClient {
    pub fn new(
        api_key: String,
        image_model: String,
        caption_model: String,
        request_timeout: Duration,
    ) -> Result<Self, GenerationError> {
        let http = Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            http,
            api_key,
            image_model,
            caption_model,
        })
    }

    async fn generate(
        &self,
        model: &str,
        request: &GenerateRequest<'_>,
    ) -> Result<Vec<ResponsePart>, GenerationError> {
        if self.api_key.is_empty() {
            return Err(GenerationError::MissingApiKey);
        }

        let url = format!("{}/{}:generateContent", GEMINI_BASE_URL, model);
        let started = std::time::Instant::now();

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(model, status = status.as_u16(), "Gemini call rejected");
            return Err(GenerationError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateResponse = response.json().await?;
        tracing::debug!(
            model,
            elapsed_ms = started.elapsed().as_millis() as u64,
            candidates = parsed.candidates.len(),
            "Gemini call finished"
        );

        Ok(parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts)
            .unwrap_or_default())
    }
}

fn inline(image: &ImageData) -> RequestPart<'static> {
    RequestPart::Inline {
        inline_data: InlineData {
            mime_type: image.mime_type.clone(),
            data: base64::engine::general_purpose::STANDARD.encode(&image.bytes),
        },
    }
}

fn composite_prompt(category: Category) -> String {
    format!(
        "You are given three images: a photo of a person, a product photo of {garment}, \
         and a blank canvas. Dress the person in the {garment} from the product photo, \
         replacing whatever {garment} they currently wear. Keep their face, pose, body shape, \
         other clothing and background unchanged. Render the result at exactly the canvas \
         size and aspect ratio. Return only the edited image.",
        garment = category.garment_name()
    )
}

const CAPTION_PROMPT: &str = "Look at this outfit and write one or two friendly sentences \
    of styling feedback, mentioning what works and where it would suit. Reply with the \
    comment only.";

#[async_trait]
impl Compositor for GeminiClient {
    async fn composite(
        &self,
        base: &ImageData,
        garment: &ImageData,
        category: Category,
        canvas: &ImageData,
    ) -> Result<ImageData, GenerationError> {
        let prompt = composite_prompt(category);
        let request = GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![
                    RequestPart::Text { text: &prompt },
                    inline(base),
                    inline(garment),
                    inline(canvas),
                ],
            }],
            generation_config: Some(GenerationConfig {
                response_modalities: vec!["TEXT", "IMAGE"],
            }),
        };

        let parts = self.generate(&self.image_model, &request).await?;
        let data = parts
            .into_iter()
            .find_map(|p| p.inline_data)
            .ok_or(GenerationError::NoImage)?;

        let bytes = base64::engine::general_purpose::STANDARD.decode(data.data)?;
        Ok(ImageData::new(bytes, data.mime_type))
    }
}

#[async_trait]
impl Captioner for GeminiClient {
    async fn caption(&self, image: &ImageData) -> Result<String, GenerationError> {
        let request = GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![RequestPart::Text { text: CAPTION_PROMPT }, inline(image)],
            }],
            generation_config: None,
        };

        let parts = self.generate(&self.caption_model, &request).await?;
        let text: String = parts.into_iter().filter_map(|p| p.text).collect();
        let text = text.trim();
        if text.is_empty() {
            return Err(GenerationError::NoText);
        }
        Ok(text.to_string())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("Gemini API key is not configured")]
    MissingApiKey,

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Gemini returned status {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Response contained no image")]
    NoImage,

    #[error("Response contained no text")]
    NoText,

    #[error("Failed to decode image payload: {0}")]
    Decode(#[from] base64::DecodeError),
}
