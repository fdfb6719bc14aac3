use std::time::Duration;

use async_trait::async_trait;
use curator_config::{AiService, AiSettings, ServiceEndpoint};
use serde_json::{json, Value};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use super::{parse_identification, Identifier};
use crate::error::{CuratorError, Result};
use crate::types::ProvisionalIdent;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const SYSTEM_PROMPT: &str = "你是一个媒体文件分析助手。请从文件名中提取电影或电视剧信息，并返回标准的JSON格式。";

fn build_prompt(filename: &str) -> String {
    format!(
        "分析这个文件名，告诉我这是电影还是电视剧：\n\n\
         文件名：{filename}\n\n\
         如果是电影，返回：{{\"type\": \"movie\", \"title\": \"电影名称\", \"year\": 年份}}\n\
         如果是电视剧，返回：{{\"type\": \"tv\", \"title\": \"剧集名称\", \"season\": 季数, \"episode\": 集数}}\n\n\
         注意：\n- 年份、季数、集数都必须是数字\n- 名称要简洁规范"
    )
}

/// [`Identifier`] backed by an OpenAI-compatible chat-completion endpoint.
///
/// Concurrency is capped by a semaphore sized from `ai_max_concurrent`;
/// acquisition is non-blocking, so a saturated client sheds the call instead
/// of queueing behind the other workers.
#[derive(Debug)]
pub struct ChatCompletionIdentifier {
    client: reqwest::Client,
    service: AiService,
    endpoint: ServiceEndpoint,
    max_tokens: u32,
    permits: Semaphore,
}

impl ChatCompletionIdentifier {
    pub fn from_settings(settings: &AiSettings) -> Result<Self> {
        let endpoint = settings.active_endpoint().clone();
        if !endpoint.is_configured() {
            return Err(CuratorError::Unconfigured(format!(
                "identification service {} has no API key",
                settings.service.as_str()
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            service: settings.service,
            endpoint,
            max_tokens: settings.max_tokens,
            permits: Semaphore::new(settings.max_concurrent.max(1)),
        })
    }

    fn request_body(&self, filename: &str) -> Value {
        let mut body = json!({
            "model": self.endpoint.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": build_prompt(filename)},
            ],
            "temperature": 0.1,
            "max_tokens": self.max_tokens,
            "response_format": {"type": "json_object"},
        });

        // zhipu needs sampling and thinking disabled for deterministic JSON
        if self.service == AiService::Zhipu {
            body["do_sample"] = json!(false);
            body["thinking"] = json!({"type": "disabled"});
        }

        body
    }

    async fn request(&self, filename: &str) -> Result<Option<ProvisionalIdent>> {
        let response = self
            .client
            .post(&self.endpoint.url)
            .bearer_auth(&self.endpoint.api_key)
            .json(&self.request_body(filename))
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 401 {
            return Err(CuratorError::Unauthorized(format!(
                "{} rejected the API key",
                self.service.as_str()
            )));
        }
        if status.as_u16() == 429 {
            return Err(CuratorError::RateLimited(self.service.as_str().to_owned()));
        }
        let response = response.error_for_status()?;

        let payload: Value = response.json().await?;
        let content = payload
            .get("choices")
            .and_then(|choices| choices.get(0))
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(Value::as_str)
            .unwrap_or_default();

        match parse_identification(content) {
            Some(ident) => {
                debug!(filename, ?ident, "identification parsed");
                Ok(Some(ident))
            }
            None => {
                warn!(filename, "identification response failed validation");
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl Identifier for ChatCompletionIdentifier {
    async fn identify(&self, filename: &str) -> Result<Option<ProvisionalIdent>> {
        let Ok(_permit) = self.permits.try_acquire() else {
            warn!(filename, "identification concurrency limit reached, shedding call");
            return Ok(None);
        };

        self.request(filename).await
    }

    fn service_name(&self) -> &str {
        self.service.as_str()
    }
}
