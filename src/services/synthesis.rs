// src/services/synthesis.rs
use crate::config::Config;
use crate::errors::PageGenError;
use crate::models::{GenerationMode, ModelSettings, ReferenceImage};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use log::debug;
use reqwest::{Client, multipart};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;

/// One image generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisRequest {
    pub prompt: String,
    pub reference_image: Option<ReferenceImage>,
    pub mode: GenerationMode,
    pub model_settings: Option<ModelSettings>,
}

/// Backend that turns a prompt (and optional reference) into one image,
/// returned as a data URL. Retrying is the caller's decision.
#[async_trait]
pub trait ImageSynthesizer: Send + Sync {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<String, PageGenError>;
    fn name(&self) -> &str;
}

pub fn build_synthesizer(config: &Config) -> Result<Arc<dyn ImageSynthesizer>, PageGenError> {
    match config.image_provider.as_str() {
        "openai" => {
            let key = config
                .openai_api_key
                .clone()
                .ok_or_else(|| PageGenError::Config("OPENAI_API_KEY must be set".to_string()))?;
            Ok(Arc::new(OpenAiSynthesizer::new(
                key,
                config.openai_base_url.clone(),
                config.image_model.clone(),
                config.image_size.clone(),
            )))
        }
        other => Err(PageGenError::InvalidProvider(other.to_string())),
    }
}

/// Wraps the section prompt in mode-specific framing.
pub fn frame_prompt(mode: GenerationMode, prompt: &str, has_reference: bool) -> String {
    let prompt = prompt.trim();
    match (mode, has_reference) {
        (GenerationMode::Creation, true) => format!(
            "Professional e-commerce product photograph. Keep the product in the reference image \
             exactly as it is (shape, color, logo, material). Scene: {prompt}"
        ),
        (GenerationMode::Creation, false) => {
            format!("Professional e-commerce product photograph. Scene: {prompt}")
        }
        (GenerationMode::Localization, true) => format!(
            "Recreate the reference image for a local market detail page. The product must stay \
             identical; adapt setting, models and props to the target audience. Direction: {prompt}"
        ),
        (GenerationMode::Localization, false) => format!(
            "Localized e-commerce detail page image for the target market. Direction: {prompt}"
        ),
    }
}

pub struct OpenAiSynthesizer {
    api_key: String,
    base_url: String,
    default_model: String,
    default_size: String,
    client: Client,
}

impl OpenAiSynthesizer {
    pub fn new(api_key: String, base_url: String, default_model: String, default_size: String) -> Self {
        Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            default_model,
            default_size,
            client: Client::new(),
        }
    }

    async fn generate(
        &self,
        prompt: &str,
        model: &str,
        size: &str,
        quality: Option<&str>,
    ) -> Result<reqwest::Response, PageGenError> {
        let mut body = json!({
            "model": model,
            "prompt": prompt,
            "n": 1,
            "size": size,
        });
        if let Some(quality) = quality {
            body["quality"] = json!(quality);
        }
        if model.starts_with("dall-e") {
            body["response_format"] = json!("b64_json");
        }

        self.client
            .post(format!("{}/images/generations", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| PageGenError::Synthesis(format!("Image generation request failed: {}", e)))
    }

    async fn edit(
        &self,
        prompt: &str,
        reference: &ReferenceImage,
        model: &str,
        size: &str,
        quality: Option<&str>,
    ) -> Result<reqwest::Response, PageGenError> {
        let image_bytes = general_purpose::STANDARD
            .decode(reference.data.as_bytes())
            .map_err(|e| PageGenError::ImageProcessing(format!("Invalid reference image: {}", e)))?;

        let extension = reference
            .mime_type
            .rsplit('/')
            .next()
            .filter(|ext| !ext.is_empty())
            .unwrap_or("png");
        let image_part = multipart::Part::bytes(image_bytes)
            .file_name(format!("reference.{}", extension))
            .mime_str(&reference.mime_type)
            .map_err(|e| PageGenError::ImageProcessing(format!("Invalid mime type: {}", e)))?;

        let mut form = multipart::Form::new()
            .text("model", model.to_string())
            .text("prompt", prompt.to_string())
            .text("size", size.to_string())
            .part("image", image_part);
        if let Some(quality) = quality {
            form = form.text("quality", quality.to_string());
        }

        self.client
            .post(format!("{}/images/edits", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .multipart(form)
            .send()
            .await
            .map_err(|e| PageGenError::Synthesis(format!("Image edit request failed: {}", e)))
    }
}

#[async_trait]
impl ImageSynthesizer for OpenAiSynthesizer {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<String, PageGenError> {
        let start = Instant::now();
        let settings = request.model_settings.as_ref();
        let model = settings
            .and_then(|s| s.model.as_deref())
            .unwrap_or(&self.default_model);
        let size = settings
            .and_then(|s| s.size.as_deref())
            .unwrap_or(&self.default_size);
        let quality = settings.and_then(|s| s.quality.as_deref());

        let prompt = frame_prompt(request.mode, &request.prompt, request.reference_image.is_some());

        let response = match &request.reference_image {
            Some(reference) => self.edit(&prompt, reference, model, size, quality).await?,
            None => self.generate(&prompt, model, size, quality).await?,
        };

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(PageGenError::Synthesis(format!(
                "Image generation error ({}): {}",
                status, error_text
            )));
        }

        let result: serde_json::Value = response.json().await.map_err(|e| {
            PageGenError::Synthesis(format!("Failed to parse generation response: {}", e))
        })?;

        let b64_json = result["data"][0]["b64_json"]
            .as_str()
            .ok_or_else(|| PageGenError::Synthesis("No image data in response".to_string()))?;

        debug!(
            "{} produced an image in {}ms",
            model,
            start.elapsed().as_millis()
        );

        Ok(format!("data:image/png;base64,{}", b64_json))
    }

    fn name(&self) -> &str {
        "openai"
    }
}
