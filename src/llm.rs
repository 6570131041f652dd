use crate::config::LlmConfig;
use crate::error::{MendError, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Prompt wording used to ask for SQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PromptTemplate {
    /// Short instructions; the re-prompt after an extraction failure.
    Basic,
    Production,
}

impl PromptTemplate {
    pub fn render(&self, question: &str, schema: &str) -> String {
        match self {
            PromptTemplate::Basic => format!(
                "Translate the question into one SQL query for this database.\n\n\
                 Schema:\n{}\n\nQuestion:\n{}\n\n\
                 Reply with the SQL statement only. No markdown, no explanation.",
                schema, question
            ),
            PromptTemplate::Production => format!(
                "You convert business questions into precise, read-only SQL.\n\n\
                 ## Schema\n{}\n\n## Question\n{}\n\n## Rules\n\
                 - Use only tables and columns that appear in the schema.\n\
                 - Give every table a distinct alias and qualify every column with it.\n\
                 - Every JOIN needs an ON condition.\n\
                 - Wrap nullable percentages in IFNULL(x, 0) inside arithmetic.\n\
                 - Never modify data.\n\n\
                 Return a single SQL statement inside a ```sql block.",
                schema, question
            ),
        }
    }
}

/// OpenAI-compatible chat completion client.
pub struct LlmClient {
    api_key: String,
    base_url: String,
    model: String,
    temperature: f64,
    max_tokens: u32,
    client: reqwest::Client,
}

impl LlmClient {
    pub fn new(api_key: String, model: String, base_url: String) -> Self {
        Self {
            api_key,
            base_url,
            model,
            temperature: 0.1,
            max_tokens: 1000,
            client: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            ..Self::new(config.api_key.clone(), config.model.clone(), config.base_url.clone())
        }
    }

    /// Raw model text for `question`; SQL still has to be extracted.
    pub async fn generate_sql(&self, question: &str, schema: &str, template: PromptTemplate) -> Result<String> {
        self.call_llm(&template.render(question, schema)).await
    }

    pub async fn call_llm(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": "You are a careful SQL analyst."},
                {"role": "user", "content": prompt}
            ],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });
        debug!("Calling {} at {}", self.model, self.base_url);

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url.trim_end_matches('/')))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| MendError::Llm(format!("LLM API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(MendError::Llm(format!("LLM API error ({}): {}", status, error_text)));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| MendError::Llm(format!("Failed to parse LLM response: {}", e)))?;

        parse_completion(&response_json)
    }
}

fn parse_completion(response: &serde_json::Value) -> Result<String> {
    if let Some(error) = response.get("error") {
        return Err(MendError::Llm(format!("LLM API error: {}", error)));
    }

    let choice = response
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .ok_or_else(|| MendError::Llm(format!("No choices in LLM response: {}", response)))?;

    if choice.get("finish_reason").and_then(|r| r.as_str()) == Some("length") {
        warn!("LLM response was truncated due to length limit");
    }

    choice
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| MendError::Llm("LLM response has no message content".to_string()))
}
