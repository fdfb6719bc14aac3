use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::database::MetadataCache;
use crate::error::{CuratorError, Result};
use crate::types::{EnrichedRecord, MediaKind};

const API_BASE: &str = "https://api.themoviedb.org/3";
const LANGUAGE: &str = "zh-CN";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Four-digit year prefix of a `release_date` / `first_air_date` value.
pub fn extract_release_year(date: Option<&str>) -> Option<i32> {
    date.filter(|d| d.len() >= 4)
        .and_then(|d| d[..4].parse().ok())
}

/// Thin film-database client. Lookups consult the durable cache first; a
/// miss searches, fetches the detail payload of the top result and caches
/// the enriched record under the original query key.
#[derive(Debug)]
pub struct TmdbClient {
    client: reqwest::Client,
    api_key: String,
    cache: Arc<MetadataCache>,
}

impl TmdbClient {
    pub fn new(api_key: impl Into<String>, proxy: &str, cache: Arc<MetadataCache>) -> Result<Self> {
        let mut builder = reqwest::Client::builder().timeout(REQUEST_TIMEOUT);
        if !proxy.is_empty() {
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
        }

        Ok(Self {
            client: builder.build()?,
            api_key: api_key.into(),
            cache,
        })
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let response = self
            .client
            .get(format!("{API_BASE}{path}"))
            .query(&[
                ("api_key", self.api_key.as_str()),
                ("language", LANGUAGE),
            ])
            .query(query)
            .send()
            .await?;

        match response.status().as_u16() {
            401 => Err(CuratorError::Unauthorized(
                "film database rejected the API key".into(),
            )),
            429 => Err(CuratorError::RateLimited("film database".into())),
            _ => Ok(response.error_for_status()?.json().await?),
        }
    }

    /// Connectivity/credential probe used at startup and by health checks.
    pub async fn configuration(&self) -> Result<Value> {
        let config = self.get_json("/configuration", &[]).await?;
        if config.get("images").is_none() {
            return Err(CuratorError::Internal(
                "film database returned an unexpected configuration payload".into(),
            ));
        }
        Ok(config)
    }

    pub async fn search_movie(
        &self,
        title: &str,
        year: Option<i32>,
    ) -> Result<Option<EnrichedRecord>> {
        if let Some(cached) = self.cache.get("movie", title, year).await? {
            debug!(title, "movie lookup served from cache");
            return Ok(Some(cached));
        }

        let mut query = vec![("query", title.to_owned())];
        if let Some(year) = year {
            query.push(("primary_release_year", year.to_string()));
        }
        let results = self.get_json("/search/movie", &query).await?;

        let Some(id) = first_result_id(&results) else {
            warn!(title, "no movie match in film database");
            return Ok(None);
        };

        let details = self.get_json(&format!("/movie/{id}"), &[]).await?;
        let record = enrich(id, MediaKind::Movie, &details);
        self.cache.set("movie", title, year, &record).await?;

        debug!(title, canonical = %record.title, animation = record.is_animation(), "movie enriched");
        Ok(Some(record))
    }

    pub async fn search_series(&self, title: &str) -> Result<Option<EnrichedRecord>> {
        if let Some(cached) = self.cache.get("tv", title, None).await? {
            debug!(title, "series lookup served from cache");
            return Ok(Some(cached));
        }

        let results = self
            .get_json("/search/tv", &[("query", title.to_owned())])
            .await?;

        let Some(id) = first_result_id(&results) else {
            warn!(title, "no series match in film database");
            return Ok(None);
        };

        let details = self.get_json(&format!("/tv/{id}"), &[]).await?;
        let record = enrich(id, MediaKind::Series, &details);
        self.cache.set("tv", title, None, &record).await?;

        debug!(title, canonical = %record.title, animation = record.is_animation(), "series enriched");
        Ok(Some(record))
    }
}

fn first_result_id(results: &Value) -> Option<i64> {
    results
        .get("results")?
        .as_array()?
        .first()?
        .get("id")?
        .as_i64()
}

/// Build the enriched record from a detail payload.
fn enrich(id: i64, kind: MediaKind, details: &Value) -> EnrichedRecord {
    let (title_field, date_field) = match kind {
        MediaKind::Movie => ("title", "release_date"),
        MediaKind::Series => ("name", "first_air_date"),
    };

    let title = details
        .get(title_field)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned();

    let release_year =
        extract_release_year(details.get(date_field).and_then(Value::as_str));

    let empty = Vec::new();
    let genre_entries = details
        .get("genres")
        .and_then(Value::as_array)
        .unwrap_or(&empty);
    let genres = genre_entries
        .iter()
        .filter_map(|genre| genre.get("name").and_then(Value::as_str))
        .map(str::to_owned)
        .collect();
    let genre_ids = genre_entries
        .iter()
        .filter_map(|genre| genre.get("id").and_then(Value::as_i64))
        .collect();

    EnrichedRecord {
        external_id: id,
        media_kind: kind,
        title,
        release_year,
        genres,
        genre_ids,
        payload: details.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn release_year_extraction() {
        assert_eq!(extract_release_year(Some("1999-03-31")), Some(1999));
        assert_eq!(extract_release_year(Some("2022")), Some(2022));
        assert_eq!(extract_release_year(Some("19")), None);
        assert_eq!(extract_release_year(Some("year unknown")), None);
        assert_eq!(extract_release_year(None), None);
    }

    #[test]
    fn enrich_movie_payload() {
        let details = json!({
            "title": "黑客帝国",
            "release_date": "1999-03-31",
            "genres": [
                {"id": 28, "name": "动作"},
                {"id": 878, "name": "科幻"},
            ],
        });

        let record = enrich(603, MediaKind::Movie, &details);
        assert_eq!(record.external_id, 603);
        assert_eq!(record.title, "黑客帝国");
        assert_eq!(record.release_year, Some(1999));
        assert_eq!(record.genre_ids, vec![28, 878]);
        assert!(!record.is_animation());
    }

    #[test]
    fn enrich_series_payload_detects_animation() {
        let details = json!({
            "name": "SPY×FAMILY",
            "first_air_date": "2022-04-09",
            "genres": [
                {"id": 16, "name": "动画"},
                {"id": 35, "name": "喜剧"},
            ],
        });

        let record = enrich(120089, MediaKind::Series, &details);
        assert_eq!(record.title, "SPY×FAMILY");
        assert_eq!(record.release_year, Some(2022));
        assert!(record.is_animation());
    }

    #[test]
    fn missing_fields_degrade_gracefully() {
        let record = enrich(1, MediaKind::Movie, &json!({}));
        assert_eq!(record.title, "");
        assert_eq!(record.release_year, None);
        assert!(record.genres.is_empty());
        assert!(record.genre_ids.is_empty());
    }
}
