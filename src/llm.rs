use async_trait::async_trait;
use ollama_rs::{
    generation::completion::request::GenerationRequest,
    generation::parameters::{FormatType, JsonStructure},
    Ollama,
};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use thiserror::Error;

#[derive(Debug, Error)]
pub(crate) enum ModelError {
    #[error("model request failed: {0}")]
    Request(String),
    #[error("model returned malformed output: {0}")]
    MalformedOutput(String),
}

/// Language-model capability consumed by the pipelines.
///
/// Structured generation constrains the model to a predeclared shape so the
/// caller never has to strip prose or code fences out of the response.
#[async_trait]
pub(crate) trait LanguageModel: Send + Sync {
    /// Free-text generation, used for explanations and insight narration.
    async fn generate_text(&self, system: &str, prompt: &str) -> Result<String, ModelError>;

    /// Constrained generation into `T`'s JSON schema.
    async fn generate_structured<T>(&self, system: &str, prompt: &str) -> Result<T, ModelError>
    where
        T: DeserializeOwned + JsonSchema + Send + 'static;
}

/// Model capability backed by a local Ollama server.
pub(crate) struct OllamaModel {
    client: Ollama,
    model: String,
}

impl OllamaModel {
    pub(crate) fn new(url: &str, model: &str) -> anyhow::Result<Self> {
        let client = Ollama::try_new(url)?;
        Ok(Self {
            client,
            model: model.to_string(),
        })
    }
}

#[async_trait]
impl LanguageModel for OllamaModel {
    async fn generate_text(&self, system: &str, prompt: &str) -> Result<String, ModelError> {
        let request = GenerationRequest::new(self.model.clone(), prompt.to_string())
            .system(system.to_string());
        let response = self
            .client
            .generate(request)
            .await
            .map_err(|e| ModelError::Request(e.to_string()))?;
        Ok(response.response.trim().to_string())
    }

    async fn generate_structured<T>(&self, system: &str, prompt: &str) -> Result<T, ModelError>
    where
        T: DeserializeOwned + JsonSchema + Send + 'static,
    {
        let request = GenerationRequest::new(self.model.clone(), prompt.to_string())
            .system(system.to_string())
            .format(FormatType::StructuredJson(JsonStructure::new::<T>()));
        let response = self
            .client
            .generate(request)
            .await
            .map_err(|e| ModelError::Request(e.to_string()))?;
        serde_json::from_str(&response.response)
            .map_err(|e| ModelError::MalformedOutput(e.to_string()))
    }
}
