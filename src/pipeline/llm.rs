//! VLM interaction: the production [`VisualOracle`].
//!
//! [`VlmOracle`] turns the two oracle calls into chat requests against an
//! `edgequake_llm` provider. Prompt wording lives in [`crate::prompts`];
//! deadlines are enforced one level up by the detection and review stages so
//! stub oracles get the same treatment.
//!
//! There is no retry loop here. A failed detection skips its page and a
//! failed review falls back to the highest-confidence crop, so a retry would
//! only add latency to an answer the user is already waiting for.

use crate::error::OracleError;
use crate::oracle::VisualOracle;
use crate::pipeline::encode::encode_image;
use crate::prompts::{
    detection_user_prompt, review_user_prompt, DETECTION_SYSTEM_PROMPT, REVIEW_SYSTEM_PROMPT,
};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider};
use image::DynamicImage;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// [`VisualOracle`] backed by a multimodal LLM provider.
pub struct VlmOracle {
    provider: Arc<dyn LLMProvider>,
    temperature: f32,
    max_tokens: usize,
}

impl VlmOracle {
    pub fn new(provider: Arc<dyn LLMProvider>, temperature: f32, max_tokens: usize) -> Self {
        Self {
            provider,
            temperature,
            max_tokens,
        }
    }

    async fn ask(&self, system: &str, user: String, images: Vec<ImageData>) -> Result<String, OracleError> {
        let start = Instant::now();
        let image_count = images.len();
        let messages = vec![
            ChatMessage::system(system),
            ChatMessage::user_with_images(&user, images),
        ];

        let response = self
            .provider
            .chat(&messages, Some(&build_options(self.temperature, self.max_tokens)))
            .await
            .map_err(|e| OracleError::Transport(e.to_string()))?;

        debug!(
            "{} image(s): {} input tokens, {} output tokens, {:?}",
            image_count,
            response.prompt_tokens,
            response.completion_tokens,
            start.elapsed()
        );
        Ok(response.content)
    }
}

/// Build `CompletionOptions` from the oracle settings.
fn build_options(temperature: f32, max_tokens: usize) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(temperature),
        max_tokens: Some(max_tokens),
        ..Default::default()
    }
}

fn encode(image: &DynamicImage) -> Result<ImageData, OracleError> {
    encode_image(image).map_err(|e| OracleError::Encoding(e.to_string()))
}

#[async_trait]
impl VisualOracle for VlmOracle {
    async fn detect_regions(
        &self,
        image: &DynamicImage,
        query: Option<&str>,
    ) -> Result<String, OracleError> {
        let data = encode(image)?;
        self.ask(DETECTION_SYSTEM_PROMPT, detection_user_prompt(query), vec![data])
            .await
    }

    async fn review_candidates(
        &self,
        images: &[DynamicImage],
        query: &str,
    ) -> Result<String, OracleError> {
        let data = images.iter().map(encode).collect::<Result<Vec<_>, _>>()?;
        self.ask(REVIEW_SYSTEM_PROMPT, review_user_prompt(query, images.len()), data)
            .await
    }
}
