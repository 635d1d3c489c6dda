use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::Engine;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::core::config::resolve_api_key;
use crate::core::error::BackendError;

const DEFAULT_OPENAI_API_URL: &str = "https://api.openai.com/v1";

#[async_trait]
pub trait ImageBackend: Send + Sync {
    fn provider(&self) -> &str;

    /// PNG bytes of a square cover, or `None` when the provider is disabled
    /// or returned no image.
    async fn generate_cover(
        &self,
        synopsis: &str,
        genre: Option<&str>,
        style: Option<&str>,
    ) -> Result<Option<Vec<u8>>, BackendError>;
}

pub fn cover_prompt(synopsis: &str, genre: Option<&str>, style: Option<&str>) -> String {
    let mut prompt = format!("Cover illustration for an audio story: {}.", synopsis.trim());
    if let Some(genre) = genre.filter(|g| !g.trim().is_empty()) {
        prompt.push_str(&format!(" Genre: {}.", genre));
    }
    if let Some(style) = style.filter(|s| !s.trim().is_empty()) {
        prompt.push_str(&format!(" Mood inspired by the writing of {}.", style));
    }
    prompt.push_str(" Painterly, atmospheric, warm light, high quality. Square format, no text or lettering.");
    prompt
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum ImageProviderConfig {
    None,
    Gemini(GeminiImageConfig),
    Openai(OpenAiImageConfig),
}

impl Default for ImageProviderConfig {
    fn default() -> Self {
        ImageProviderConfig::None
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct GeminiImageConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct OpenAiImageConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub size: Option<String>,
}

/// The closed set of cover image providers.
pub enum ImageProvider {
    Disabled,
    Gemini(GeminiImageClient),
    Openai(OpenAiImageClient),
}

pub fn create_image_backend(config: &ImageProviderConfig) -> Result<ImageProvider> {
    let provider = match config {
        ImageProviderConfig::None => ImageProvider::Disabled,
        ImageProviderConfig::Gemini(cfg) => ImageProvider::Gemini(GeminiImageClient::new(cfg)?),
        ImageProviderConfig::Openai(cfg) => ImageProvider::Openai(OpenAiImageClient::new(cfg)?),
    };
    info!("Initialized image provider: {}", provider.provider());
    Ok(provider)
}

#[async_trait]
impl ImageBackend for ImageProvider {
    fn provider(&self) -> &str {
        match self {
            ImageProvider::Disabled => "none",
            ImageProvider::Gemini(_) => "gemini",
            ImageProvider::Openai(_) => "openai",
        }
    }

    async fn generate_cover(
        &self,
        synopsis: &str,
        genre: Option<&str>,
        style: Option<&str>,
    ) -> Result<Option<Vec<u8>>, BackendError> {
        let prompt = cover_prompt(synopsis, genre, style);
        let result = match self {
            ImageProvider::Disabled => return Ok(None),
            ImageProvider::Gemini(c) => c.generate(&prompt).await,
            ImageProvider::Openai(c) => c.generate(&prompt).await,
        };
        result.map_err(|e| BackendError::from_anyhow(self.provider(), e))
    }
}

fn decode_base64(data: &str) -> Result<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(data.trim())
        .context("Image payload is not valid base64")
}

// --- Gemini (Imagen) ---

pub struct GeminiImageClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct ImagenRequest {
    instances: Vec<ImagenInstance>,
    parameters: ImagenParameters,
}

#[derive(Serialize)]
struct ImagenInstance {
    prompt: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ImagenParameters {
    sample_count: u32,
    aspect_ratio: String,
}

#[derive(Deserialize)]
struct ImagenResponse {
    #[serde(default)]
    predictions: Vec<ImagenPrediction>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImagenPrediction {
    bytes_base64_encoded: Option<String>,
}

impl GeminiImageClient {
    fn new(config: &GeminiImageConfig) -> Result<Self> {
        let api_key = resolve_api_key(config.api_key.as_deref(), "GEMINI_API_KEY")
            .context("Gemini API key missing (set image.api_key or GEMINI_API_KEY)")?;
        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model: config
                .model
                .clone()
                .unwrap_or_else(|| "imagen-3.0-generate-002".to_string()),
        })
    }

    async fn generate(&self, prompt: &str) -> Result<Option<Vec<u8>>> {
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:predict?key={}",
            self.model, self.api_key
        );
        let body = ImagenRequest {
            instances: vec![ImagenInstance {
                prompt: prompt.to_string(),
            }],
            parameters: ImagenParameters {
                sample_count: 1,
                aspect_ratio: "1:1".to_string(),
            },
        };

        let resp = self.client.post(&url).json(&body).send().await?;
        if !resp.status().is_success() {
            let error_text = resp.text().await?;
            return Err(anyhow!("Imagen API error: {}", error_text));
        }

        let result: ImagenResponse = resp.json().await?;
        debug!("Imagen returned {} prediction(s)", result.predictions.len());
        result
            .predictions
            .into_iter()
            .find_map(|p| p.bytes_base64_encoded)
            .map(|data| decode_base64(&data))
            .transpose()
    }
}

// --- OpenAI Images ---

pub struct OpenAiImageClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    size: String,
}

#[derive(Serialize)]
struct OpenAiImageRequest {
    prompt: String,
    model: String,
    n: u32,
    size: String,
    response_format: String,
}

#[derive(Deserialize)]
struct OpenAiImageResponse {
    #[serde(default)]
    data: Vec<OpenAiImageData>,
}

#[derive(Deserialize)]
struct OpenAiImageData {
    b64_json: Option<String>,
}

impl OpenAiImageClient {
    fn new(config: &OpenAiImageConfig) -> Result<Self> {
        let api_key = resolve_api_key(config.api_key.as_deref(), "OPENAI_API_KEY")
            .context("OpenAI API key missing (set image.api_key or OPENAI_API_KEY)")?;
        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: config
                .base_url
                .as_deref()
                .unwrap_or(DEFAULT_OPENAI_API_URL)
                .trim_end_matches('/')
                .to_string(),
            model: config.model.clone().unwrap_or_else(|| "dall-e-3".to_string()),
            size: config.size.clone().unwrap_or_else(|| "1024x1024".to_string()),
        })
    }

    async fn generate(&self, prompt: &str) -> Result<Option<Vec<u8>>> {
        let url = format!("{}/images/generations", self.base_url);
        let body = OpenAiImageRequest {
            prompt: prompt.to_string(),
            model: self.model.clone(),
            n: 1,
            size: self.size.clone(),
            response_format: "b64_json".to_string(),
        };

        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            let error_text = resp.text().await?;
            return Err(anyhow!("OpenAI image API error: {}", error_text));
        }

        let result: OpenAiImageResponse = resp.json().await?;
        result
            .data
            .into_iter()
            .find_map(|d| d.b64_json)
            .map(|data| decode_base64(&data))
            .transpose()
    }
}
