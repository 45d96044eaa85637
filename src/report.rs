//! Report drafting: merge a Markdown template with JSON context and send
//! the result to an OpenRouter-compatible completion endpoint.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::{Map, Value};

use docrag_core::prompt::ChatMessage;
use docrag_core::template::merge_template;

use crate::config::ReportConfig;
use crate::error::RagError;

/// Completion endpoint settings with the resolved API key.
#[derive(Debug, Clone)]
pub struct CompletionSettings {
    pub url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub timeout_secs: u64,
    pub referer: Option<String>,
    pub title: Option<String>,
    pub system_prompt: String,
}

impl CompletionSettings {
    pub fn new(config: &ReportConfig, api_key: Option<String>) -> Self {
        Self {
            url: config.url.clone(),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout_secs: config.timeout_secs,
            referer: config.referer.clone(),
            title: config.title.clone(),
            system_prompt: config.system_prompt.clone(),
        }
    }
}

pub fn read_template(path: &Path) -> Result<String> {
    if !path.exists() {
        return Err(RagError::missing("Template", path).into());
    }
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

/// Placeholder values from an optional JSON object file, in file order.
pub fn read_context(path: Option<&Path>) -> Result<Map<String, Value>> {
    let Some(path) = path else {
        return Ok(Map::new());
    };
    if !path.exists() {
        return Err(RagError::missing("Context file", path).into());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let value: Value = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(RagError::config(format!(
            "Context file {} must contain a JSON object",
            path.display()
        ))
        .into()),
    }
}

/// Send `prompt` as the user turn after the system prompt and return the
/// first choice's message content.
pub async fn call_completion(settings: &CompletionSettings, prompt: &str) -> Result<String> {
    let api_key = settings
        .api_key
        .as_deref()
        .ok_or_else(|| RagError::config("OPENROUTER_API_KEY is not set. Aborting request."))?;

    let payload = serde_json::json!({
        "model": settings.model,
        "messages": [
            ChatMessage::system(settings.system_prompt.clone()),
            ChatMessage::user(prompt),
        ],
        "temperature": settings.temperature,
        "max_tokens": settings.max_tokens,
    });

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(settings.timeout_secs))
        .build()?;
    let mut request = client.post(&settings.url).bearer_auth(api_key).json(&payload);
    if let Some(referer) = &settings.referer {
        request = request.header("HTTP-Referer", referer);
    }
    if let Some(title) = &settings.title {
        request = request.header("X-Title", title);
    }

    tracing::debug!(url = %settings.url, model = %settings.model, "requesting completion");
    let response = request
        .send()
        .await
        .with_context(|| format!("Completion request to {} failed", settings.url))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(RagError::Remote {
            service: "OpenRouter",
            status: status.as_u16(),
            body,
        }
        .into());
    }

    let data: Value = response.json().await?;
    data.pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            RagError::UnexpectedResponse {
                service: "OpenRouter",
                detail: data.to_string(),
            }
            .into()
        })
}

/// What [`generate`] wrote.
#[derive(Debug, Clone, PartialEq)]
pub enum ReportOutcome {
    DryRun { output: PathBuf },
    Generated { output: PathBuf, model: String },
}

impl fmt::Display for ReportOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportOutcome::DryRun { output } => {
                write!(f, "[dry-run] Wrote merged template to {}", output.display())
            }
            ReportOutcome::Generated { output, model } => {
                let name = output
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| output.display().to_string());
                write!(f, "Generated {} using {}", name, model)
            }
        }
    }
}

/// Merge the template with `context` and write either the merged prompt
/// (`dry_run`) or the generated report to `output`.
pub async fn generate(
    template_path: &Path,
    output: &Path,
    context: &Map<String, Value>,
    settings: &CompletionSettings,
    dry_run: bool,
) -> Result<ReportOutcome> {
    let template = read_template(template_path)?;
    let prompt = merge_template(&template, context);

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    if dry_run {
        std::fs::write(output, &prompt)
            .with_context(|| format!("Failed to write {}", output.display()))?;
        return Ok(ReportOutcome::DryRun {
            output: output.to_path_buf(),
        });
    }

    let content = call_completion(settings, &prompt).await?;
    std::fs::write(output, format!("{}\n", content.trim()))
        .with_context(|| format!("Failed to write {}", output.display()))?;
    Ok(ReportOutcome::Generated {
        output: output.to_path_buf(),
        model: settings.model.clone(),
    })
}
