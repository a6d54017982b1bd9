use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use super::{AdviceRequest, Advisor, FindingsContext, SYSTEM_PROMPT};
use crate::config::AdvisorSettings;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const TEMPERATURE: f32 = 0.7;
const MAX_TOKENS: u32 = 1000;

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// Advisor backed by an OpenAI-compatible chat-completions endpoint.
pub struct HttpAdvisor {
    agent: ureq::Agent,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl HttpAdvisor {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>, api_key: Option<String>) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build();
        Self {
            agent,
            endpoint: endpoint.into(),
            model: model.into(),
            api_key,
        }
    }

    pub fn from_settings(settings: &AdvisorSettings) -> Result<Self> {
        let endpoint = settings
            .endpoint
            .clone()
            .ok_or_else(|| anyhow!("advisor.endpoint is not configured"))?;
        let api_key = std::env::var(&settings.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty());
        if api_key.is_none() {
            log::warn!(
                "{} is not set; calling {} without credentials",
                settings.api_key_env,
                endpoint
            );
        }
        Ok(Self::new(endpoint, settings.model.clone(), api_key))
    }
}

impl Advisor for HttpAdvisor {
    fn name(&self) -> &'static str {
        "http"
    }

    fn advise(&self, request: &AdviceRequest) -> Result<String> {
        request.validate()?;
        let prompt = FindingsContext::from_request(request).prompt(&request.question);
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt,
                },
            ],
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
        };
        let body = serde_json::to_value(&body).context("encode chat request")?;

        let mut call = self.agent.post(&self.endpoint);
        if let Some(key) = &self.api_key {
            call = call.set("Authorization", &format!("Bearer {}", key));
        }
        let response: ChatResponse = call
            .send_json(body)
            .with_context(|| format!("chat request to {}", self.endpoint))?
            .into_json()
            .context("decode chat response")?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| anyhow!("chat response from {} had no content", self.endpoint))
    }
}
