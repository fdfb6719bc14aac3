//! Filename identification via a generative-text service.
//!
//! The pipeline only depends on the [`Identifier`] contract; the concrete
//! chat-completion implementation lives in [`chat`]. Responses are a JSON
//! object embedded somewhere in the completion text; anything that fails
//! validation is treated as "could not identify" rather than an error.

mod chat;

pub use chat::ChatCompletionIdentifier;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::ProvisionalIdent;

#[async_trait]
pub trait Identifier: Send + Sync {
    /// Identify a filename as a movie or episode. `Ok(None)` means the
    /// service answered but the result was unusable or the call was shed.
    async fn identify(&self, filename: &str) -> Result<Option<ProvisionalIdent>>;

    fn service_name(&self) -> &str;
}

/// Stand-in used when the configured service has no usable API key. Every
/// call fails, which surfaces as a per-file failure instead of aborting the
/// whole process; the dependency health probe reports the root cause.
#[derive(Debug)]
pub struct UnconfiguredIdentifier {
    service: String,
}

impl UnconfiguredIdentifier {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }
}

#[async_trait]
impl Identifier for UnconfiguredIdentifier {
    async fn identify(&self, _filename: &str) -> Result<Option<ProvisionalIdent>> {
        Err(crate::error::CuratorError::Unconfigured(format!(
            "identification service {} has no API key",
            self.service
        )))
    }

    fn service_name(&self) -> &str {
        &self.service
    }
}

/// Extract and validate the JSON object from a completion response.
///
/// Movies require a non-empty title and an optional integer year; series
/// require a title plus integer season and episode, both at least 1.
pub fn parse_identification(response: &str) -> Option<ProvisionalIdent> {
    let start = response.find('{')?;
    let end = response.rfind('}')?;
    let value: serde_json::Value = serde_json::from_str(&response[start..=end]).ok()?;

    let title = value.get("title")?.as_str()?.trim().to_owned();
    if title.is_empty() {
        return None;
    }

    match value.get("type")?.as_str()? {
        "movie" => {
            let year = match value.get("year") {
                None | Some(serde_json::Value::Null) => None,
                Some(raw) => Some(raw.as_i64()? as i32),
            };
            Some(ProvisionalIdent::Movie { title, year })
        }
        "tv" => {
            let season = value.get("season")?.as_u64()?;
            let episode = value.get("episode")?.as_u64()?;
            if season < 1 || episode < 1 {
                return None;
            }
            Some(ProvisionalIdent::Series {
                title,
                season: season as u32,
                episode: episode as u32,
            })
        }
        _ => None,
    }
}
