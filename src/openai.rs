use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::error::ApiError;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const COMPLETION_TEMPERATURE: f64 = 0.7;
const COMPLETION_MAX_TOKENS: u32 = 200;

const IMPROVE_SYSTEM_PROMPT: &str = concat!(
    "You are an expert at writing prompts for AI image generation. ",
    "Your task is to enhance the given prompt to create more detailed and visually appealing images. ",
    "Focus on adding more descriptive details, specifying art style and medium, ",
    "including lighting and atmosphere details, and maintaining the original intent. ",
    "Respond only with the enhanced prompt, no explanations."
);

const TRANSLATE_SYSTEM_PROMPT: &str = concat!(
    "You are a translator for AI image generation prompts. ",
    "Translate the given prompt to English, preserving its meaning and imagery. ",
    "If the prompt is already in English, return it unchanged. ",
    "Respond only with the translated prompt, no explanations."
);

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Option<Vec<ChatChoice>>,
    error: Option<OpenAiError>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiError {
    message: Option<String>,
}

/// Chat-completions client covering both prompt stages: enhancement and
/// translation. Performs no retries; failures bubble to the handler.
#[derive(Clone, Debug)]
pub struct OpenAiClient {
    http: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiClient {
    pub fn new(http: Client, api_key: String, model: String) -> Self {
        Self {
            http,
            api_key,
            base_url: OPENAI_BASE_URL.to_string(),
            model,
        }
    }

    /// Points the client at a different API root, e.g. a mock server in
    /// tests.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub async fn improve_prompt(&self, prompt: &str) -> Result<String, ApiError> {
        let improved = self
            .chat(
                IMPROVE_SYSTEM_PROMPT,
                &format!("Enhance this image prompt: {prompt}"),
            )
            .await?;
        tracing::info!(improved_prompt = %improved, "prompt enhanced");
        Ok(improved)
    }

    pub async fn translate_to_english(&self, prompt: &str) -> Result<String, ApiError> {
        let translated = self.chat(TRANSLATE_SYSTEM_PROMPT, prompt).await?;
        tracing::info!(translated_prompt = %translated, "prompt translated");
        Ok(translated)
    }

    async fn chat(&self, system: &str, user: &str) -> Result<String, ApiError> {
        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model,
                "messages": [
                    {"role": "system", "content": system},
                    {"role": "user", "content": user}
                ],
                "temperature": COMPLETION_TEMPERATURE,
                "max_tokens": COMPLETION_MAX_TOKENS
            }))
            .send()
            .await?;

        let response = assert_ok_response(response).await?;
        let payload: ChatCompletionResponse = response.json().await?;
        if let Some(message) = payload.error.and_then(|err| err.message) {
            return Err(ApiError::Upstream(format!("OpenAI error: {message}")));
        }
        let content = payload
            .choices
            .and_then(|choices| choices.into_iter().next())
            .and_then(|choice| choice.message)
            .and_then(|message| message.content)
            .ok_or_else(|| ApiError::Upstream("OpenAI returned no completion".to_string()))?;

        Ok(content.trim().to_string())
    }
}

async fn assert_ok_response(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    Err(ApiError::Upstream(format!("OpenAI request failed: {status} {text}")))
}
