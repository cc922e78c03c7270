//! Language model providers.
//!
//! Two chat APIs are supported, selected by `llm.provider`:
//!
//! | Provider | Endpoint | Auth | Answer |
//! |----------|----------|------|--------|
//! | `openai` | `POST {base}/v1/chat/completions` | `Authorization: Bearer` | `choices[0].message.content` |
//! | `anthropic` | `POST {base}/v1/messages` | `x-api-key` | `content[0].text` |
//!
//! One request per call. Nothing is retried or streamed, and the SQL that
//! comes back is not validated. Non-2xx responses become errors carrying the
//! status and the response body.

use anyhow::{anyhow, bail, Context, Result};
use serde_json::{json, Value};
use std::time::Duration;

use crate::config::{LlmConfig, LlmKind, ProviderKind};
use crate::type_map::type_map_for;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const RESPONSE_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

/// Settings shared by every provider variant.
#[derive(Debug, Clone)]
pub struct ChatSettings {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    settings: ChatSettings,
}

#[derive(Debug, Clone)]
pub struct AnthropicProvider {
    settings: ChatSettings,
}

/// A configured language model client.
#[derive(Debug, Clone)]
pub enum LlmProvider {
    OpenAi(OpenAiProvider),
    Anthropic(AnthropicProvider),
}

/// Inputs for [`LlmProvider::generate_sql`].
///
/// `max_tokens` and `temperature` override the configured values when set.
#[derive(Debug, Default, Clone)]
pub struct SqlPrompt<'a> {
    /// Backend the SQL must run on; `None` asks for generic SQL.
    pub kind: Option<ProviderKind>,
    /// Schema text, usually compact JSON or the formatted manifest.
    pub schema: &'a str,
    pub question: &'a str,
    pub focus_tables: &'a [String],
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl SqlPrompt<'_> {
    pub fn dialect(&self) -> &'static str {
        self.kind.map(|k| k.dialect()).unwrap_or("SQL")
    }

    /// System and user messages for this request.
    pub fn render(&self) -> (String, String) {
        let dialect = self.dialect();
        let system = format!(
            "You are a SQL expert for {}. Translate questions into SQL queries using only the tables and fields in the provided schema.",
            dialect
        );

        let legend = match self.kind {
            Some(kind) => type_map_for(kind).legend(),
            None => "S=STRING, I=INTEGER, F=FLOAT, N=NUMERIC, B=BOOLEAN, D=DATE, DT=DATETIME, TS=TIMESTAMP, T=TIME, BY=BYTES, J=JSON, U=UUID, A=ARRAY, ST=STRUCT, G=GEOGRAPHY".to_string(),
        };

        let mut user = String::new();
        user.push_str(
            "The schema lists tables as objects with \"t\" (qualified table name), \"d\" (description) and \"f\" (fields). Each field has \"n\" (name) and \"t\" (type code).\n",
        );
        user.push_str(&format!("Type codes: {}\n\n", legend));
        user.push_str(&format!("Schema: {}\n\n", self.schema));
        if !self.focus_tables.is_empty() {
            user.push_str(&format!("Focus tables: {}\n\n", self.focus_tables.join(", ")));
        }
        user.push_str(&format!("Question: {}\n\n", self.question));
        user.push_str(&format!(
            "Generate a valid {} SQL query. Return only the SQL.",
            dialect
        ));

        (system, user)
    }
}

impl LlmProvider {
    /// Build a provider, resolving `${VAR}` references in the config first.
    ///
    /// An unset variable fails here, before any network call.
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let resolved = config.resolved()?;
        if resolved.api_key.trim().is_empty() {
            bail!("llm.api_key resolved to an empty string");
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(resolved.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        let settings = ChatSettings {
            http,
            api_key: resolved.api_key.clone(),
            model: resolved.model_name().to_string(),
            base_url: resolved.base_url().to_string(),
            max_tokens: resolved.max_tokens,
            temperature: resolved.temperature,
        };

        Ok(match resolved.provider {
            LlmKind::OpenAi => LlmProvider::OpenAi(OpenAiProvider { settings }),
            LlmKind::Anthropic => LlmProvider::Anthropic(AnthropicProvider { settings }),
        })
    }

    pub fn kind(&self) -> LlmKind {
        match self {
            LlmProvider::OpenAi(_) => LlmKind::OpenAi,
            LlmProvider::Anthropic(_) => LlmKind::Anthropic,
        }
    }

    pub fn model(&self) -> &str {
        &self.settings().model
    }

    fn settings(&self) -> &ChatSettings {
        match self {
            LlmProvider::OpenAi(p) => &p.settings,
            LlmProvider::Anthropic(p) => &p.settings,
        }
    }

    /// Ask for a SQL query answering `prompt.question`.
    pub async fn generate_sql(&self, prompt: &SqlPrompt<'_>) -> Result<String> {
        let (system, user) = prompt.render();
        let settings = self.settings();
        let max_tokens = prompt.max_tokens.unwrap_or(settings.max_tokens);
        let temperature = prompt.temperature.unwrap_or(settings.temperature);

        tracing::debug!(
            provider = self.kind().as_str(),
            model = %settings.model,
            dialect = prompt.dialect(),
            "generating sql"
        );
        let text = self.complete(&system, &user, max_tokens, temperature).await?;
        Ok(strip_code_fence(&text))
    }

    /// Free-form completion with the configured limits.
    pub async fn generate_response(&self, prompt: &str) -> Result<String> {
        let settings = self.settings();
        self.complete(
            RESPONSE_SYSTEM_PROMPT,
            prompt,
            settings.max_tokens,
            settings.temperature,
        )
        .await
    }

    async fn complete(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String> {
        match self {
            LlmProvider::OpenAi(p) => p.complete(system, user, max_tokens, temperature).await,
            LlmProvider::Anthropic(p) => p.complete(system, user, max_tokens, temperature).await,
        }
    }
}

impl OpenAiProvider {
    async fn complete(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String> {
        let s = &self.settings;
        let body = json!({
            "model": s.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
            "max_tokens": max_tokens,
            "temperature": temperature,
        });

        let response = s
            .http
            .post(format!("{}/v1/chat/completions", s.base_url))
            .header("Authorization", format!("Bearer {}", s.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .context("OpenAI request failed")?;

        let json = read_json(response, "OpenAI").await?;
        json.pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string())
            .ok_or_else(|| anyhow!("OpenAI response has no message content: {}", json))
    }
}

impl AnthropicProvider {
    async fn complete(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String> {
        let s = &self.settings;
        let body = json!({
            "model": s.model,
            "system": system,
            "messages": [
                { "role": "user", "content": user },
            ],
            "max_tokens": max_tokens,
            "temperature": temperature,
        });

        let response = s
            .http
            .post(format!("{}/v1/messages", s.base_url))
            .header("x-api-key", &s.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .context("Anthropic request failed")?;

        let json = read_json(response, "Anthropic").await?;
        json.pointer("/content/0/text")
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string())
            .ok_or_else(|| anyhow!("Anthropic response has no text content: {}", json))
    }
}

async fn read_json(response: reqwest::Response, provider: &str) -> Result<Value> {
    let status = response.status();
    if !status.is_success() {
        let body_text = response.text().await.unwrap_or_default();
        bail!("{} API error {}: {}", provider, status, body_text);
    }
    Ok(response.json().await?)
}

/// Drop a surrounding Markdown code fence, if the model added one.
fn strip_code_fence(text: &str) -> String {
    let trimmed = text.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };
    let Some(inner) = inner.strip_suffix("```") else {
        return trimmed.to_string();
    };
    // skip the opening fence line when it is bare or only a language tag
    let inner = match inner.split_once('\n') {
        Some((tag, rest)) if is_fence_tag(tag.trim()) => rest,
        _ => inner,
    };
    inner.trim().to_string()
}

const FENCE_TAGS: &[&str] = &[
    "sql",
    "postgres",
    "postgresql",
    "pgsql",
    "mysql",
    "sqlite",
    "bigquery",
    "googlesql",
    "plsql",
    "tsql",
];

fn is_fence_tag(tag: &str) -> bool {
    tag.is_empty() || FENCE_TAGS.iter().any(|t| t.eq_ignore_ascii_case(tag))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(provider: LlmKind, api_key: &str) -> LlmConfig {
        LlmConfig {
            provider,
            api_key: api_key.to_string(),
            model: None,
            max_tokens: 150,
            temperature: 0.0,
            base_url: None,
            timeout_secs: 5,
        }
    }

    #[test]
    fn test_prompt_template() {
        let focus = vec!["users".to_string(), "orders".to_string()];
        let prompt = SqlPrompt {
            kind: Some(ProviderKind::Postgres),
            schema: r#"[{"t":"public.users","d":"","f":[{"n":"id","t":"I"}]}]"#,
            question: "How many users?",
            focus_tables: &focus,
            ..Default::default()
        };
        let (system, user) = prompt.render();
        assert!(system.contains("SQL expert for PostgreSQL"));
        assert!(user.contains("Schema: [{\"t\":\"public.users\""));
        assert!(user.contains("Focus tables: users, orders"));
        assert!(user.contains("Question: How many users?"));
        assert!(user.contains("I=INTEGER"));
        assert!(user.ends_with("Generate a valid PostgreSQL SQL query. Return only the SQL."));
    }

    #[test]
    fn test_prompt_without_focus() {
        let prompt = SqlPrompt {
            kind: Some(ProviderKind::Sqlite),
            schema: "[]",
            question: "q",
            ..Default::default()
        };
        let (_, user) = prompt.render();
        assert!(!user.contains("Focus tables"));
        assert!(user.contains("SQLite"));
    }

    #[test]
    fn test_from_config_fails_on_unset_key_var() {
        let err = LlmProvider::from_config(&config(
            LlmKind::OpenAi,
            "${TABLETALK_LLM_TEST_UNSET_KEY}",
        ))
        .unwrap_err();
        assert!(format!("{:#}", err).contains("TABLETALK_LLM_TEST_UNSET_KEY"));
    }

    #[test]
    fn test_from_config_defaults() {
        let provider = LlmProvider::from_config(&config(LlmKind::Anthropic, "key")).unwrap();
        assert_eq!(provider.kind(), LlmKind::Anthropic);
        assert_eq!(provider.model(), "claude-3-5-sonnet-20240620");
    }

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(strip_code_fence("  SELECT 1;\n"), "SELECT 1;");
        assert_eq!(strip_code_fence("```sql\nSELECT 1;\n```"), "SELECT 1;");
        assert_eq!(strip_code_fence("```\nSELECT 1;\n```"), "SELECT 1;");
        assert_eq!(strip_code_fence("```SELECT 1```"), "SELECT 1");
    }

    #[test]
    fn test_strip_code_fence_keeps_sql_on_the_fence_line() {
        assert_eq!(
            strip_code_fence("```SELECT\n*\nFROM t```"),
            "SELECT\n*\nFROM t"
        );
        assert_eq!(
            strip_code_fence("```SELECT id\nFROM t\n```"),
            "SELECT id\nFROM t"
        );
        assert_eq!(
            strip_code_fence("```PostgreSQL\nSELECT 1\n```"),
            "SELECT 1"
        );
    }
}
