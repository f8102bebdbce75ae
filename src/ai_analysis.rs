//! Qualitative project assessment through a generative text model.

use crate::errors::ScreenerError;
use crate::storage_utils::AiConfig;
use async_trait::async_trait;
use futures::future::join_all;
use log::{info, warn};
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;

static CODE_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```(?:json)?").unwrap());

const NOT_AVAILABLE: &str = "N/A";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    VeryHighOrScam,
    AnalysisError,
    /// Any label the model invents outside the requested set.
    Other(String),
}

impl RiskLevel {
    pub fn label(&self) -> &str {
        match self {
            RiskLevel::Low => "Bajo",
            RiskLevel::Medium => "Medio",
            RiskLevel::High => "Alto",
            RiskLevel::VeryHighOrScam => "Muy Alto / Estafa Potencial",
            RiskLevel::AnalysisError => "Error de Análisis",
            RiskLevel::Other(label) => label,
        }
    }
}

impl From<String> for RiskLevel {
    fn from(label: String) -> Self {
        match label.trim() {
            "Bajo" => RiskLevel::Low,
            "Medio" => RiskLevel::Medium,
            "Alto" => RiskLevel::High,
            "Muy Alto / Estafa Potencial" | "Muy Alto" | "Estafa Potencial" => {
                RiskLevel::VeryHighOrScam
            }
            "Error de Análisis" => RiskLevel::AnalysisError,
            other => RiskLevel::Other(other.to_string()),
        }
    }
}

impl From<RiskLevel> for String {
    fn from(level: RiskLevel) -> Self {
        level.label().to_string()
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiAssessment {
    #[serde(default)]
    pub symbol: String,
    pub risk_level: RiskLevel,
    pub summary: String,
    pub long_term_outlook: String,
    pub medium_term_outlook: String,
    pub short_term_outlook: String,
}

impl AiAssessment {
    fn degraded(symbol: &str, error: &ScreenerError) -> Self {
        Self {
            symbol: symbol.to_string(),
            risk_level: RiskLevel::AnalysisError,
            summary: format!("Analysis could not be completed: {}", error),
            long_term_outlook: NOT_AVAILABLE.to_string(),
            medium_term_outlook: NOT_AVAILABLE.to_string(),
            short_term_outlook: NOT_AVAILABLE.to_string(),
        }
    }
}

/// Anything that turns a prompt into text.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, ScreenerError>;
}

/// Google Gemini `generateContent` REST client.
pub struct GeminiClient {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl GeminiClient {
    pub fn new(config: &AiConfig, api_key: String) -> Result<Self, ScreenerError> {
        let client = Client::builder().timeout(Duration::from_secs(120)).build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
        })
    }

    /// Reads the API key from the environment variable named in `config`.
    pub fn from_env(config: &AiConfig) -> Result<Self, ScreenerError> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            ScreenerError::InvalidConfig(format!(
                "environment variable {} is not set",
                config.api_key_env
            ))
        })?;
        Self::new(config, api_key)
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<String, ScreenerError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        );
        let body = json!({ "contents": [{ "parts": [{ "text": prompt }] }] });

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ScreenerError::AiAnalysis(format!("HTTP {}: {}", status, text)));
        }

        let payload: Value = response.json().await?;
        payload["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ScreenerError::AiAnalysis("response contained no text".to_string()))
    }
}

/// Base asset of `symbol` once the quote asset is removed (`SOLUSDT` -> `SOL`).
pub fn project_name(symbol: &str, quote_asset: &str) -> String {
    symbol.replace(quote_asset, "")
}

pub fn build_prompt(project: &str) -> String {
    format!(
        r#"Act as a skeptical, fundamentals-focused cryptocurrency analyst.
Analyse the crypto project "{project}".

Using public, verifiable information (real use cases, team, tokenomics,
development activity on repositories such as GitHub, community, security
audits, and red flags or risks), give a concise analysis.

Reply ONLY with a JSON object with exactly these keys:
{{
  "risk_level": "string",
  "summary": "string",
  "long_term_outlook": "string",
  "medium_term_outlook": "string",
  "short_term_outlook": "string"
}}

- "risk_level": one of "Bajo", "Medio", "Alto" or "Muy Alto / Estafa Potencial".
- "summary": one or two sentences on what the project is and its main strength or weakness.
- "long_term_outlook": investment view for 1-3 years. Be critical about adoption or obsolescence.
- "medium_term_outlook": swing trading view (weeks to months): narratives, roadmap events, volatility.
- "short_term_outlook": day trading view: liquidity, volatility, sensitivity to daily news.

No disclaimers, introductions or extra text. Only the JSON object."#
    )
}

/// Removes markdown code fences the model likes to wrap JSON in.
pub fn strip_code_fences(text: &str) -> String {
    CODE_FENCE.replace_all(text.trim(), "").trim().to_string()
}

pub fn parse_assessment(symbol: &str, text: &str) -> Result<AiAssessment, ScreenerError> {
    let mut assessment: AiAssessment = serde_json::from_str(&strip_code_fences(text))
        .map_err(|e| ScreenerError::AiAnalysis(format!("invalid JSON reply: {}", e)))?;
    assessment.symbol = symbol.to_string();
    Ok(assessment)
}

/// Asks the model about one symbol. Never fails: any error yields a
/// placeholder record whose summary names the error.
pub async fn assess_symbol(
    generator: &dyn TextGenerator,
    symbol: &str,
    quote_asset: &str,
) -> AiAssessment {
    let project = project_name(symbol, quote_asset);
    info!("Requesting AI analysis for {}", project);

    let outcome = match generator.generate(&build_prompt(&project)).await {
        Ok(text) => parse_assessment(symbol, &text),
        Err(e) => Err(e),
    };

    outcome.unwrap_or_else(|e| {
        warn!("AI analysis of {} failed: {}", project, e);
        AiAssessment::degraded(symbol, &e)
    })
}

/// Assesses every symbol concurrently; output order follows `symbols`.
pub async fn assess_symbols(
    generator: &dyn TextGenerator,
    symbols: &[String],
    quote_asset: &str,
) -> Vec<AiAssessment> {
    join_all(
        symbols
            .iter()
            .map(|symbol| assess_symbol(generator, symbol, quote_asset)),
    )
    .await
}
