use crate::error::ApiError;
use crate::openai::OpenAiClient;

/// One optional prompt transformation. Stages share a uniform
/// prompt-in/prompt-out contract and run in configured order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PromptStage {
    Translate,
    Enhance,
}

impl PromptStage {
    pub fn name(&self) -> &'static str {
        match self {
            PromptStage::Translate => "translate",
            PromptStage::Enhance => "enhance",
        }
    }

    /// Parses a comma-separated stage list, e.g. `"translate,enhance"`.
    /// An empty string selects no stages. Unknown names are returned as the
    /// error value.
    pub fn parse_list(raw: &str) -> Result<Vec<PromptStage>, String> {
        let mut stages = Vec::new();
        for token in raw.split(',') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            match token {
                "translate" => stages.push(PromptStage::Translate),
                "enhance" => stages.push(PromptStage::Enhance),
                other => return Err(other.to_string()),
            }
        }
        Ok(stages)
    }
}

/// Prompt after the pipeline ran, plus each stage's output for the metadata
/// record.
#[derive(Debug)]
pub struct PipelineOutcome {
    pub final_prompt: String,
    pub translated_prompt: Option<String>,
    pub enhanced_prompt: Option<String>,
}

pub async fn run(
    stages: &[PromptStage],
    openai: &OpenAiClient,
    prompt: &str,
) -> Result<PipelineOutcome, ApiError> {
    let mut current = prompt.to_string();
    let mut translated_prompt = None;
    let mut enhanced_prompt = None;

    for stage in stages {
        tracing::debug!(stage = stage.name(), "running prompt stage");
        match stage {
            PromptStage::Translate => {
                current = openai.translate_to_english(&current).await?;
                translated_prompt = Some(current.clone());
            }
            PromptStage::Enhance => {
                current = openai.improve_prompt(&current).await?;
                enhanced_prompt = Some(current.clone());
            }
        }
    }

    Ok(PipelineOutcome {
        final_prompt: current,
        translated_prompt,
        enhanced_prompt,
    })
}
