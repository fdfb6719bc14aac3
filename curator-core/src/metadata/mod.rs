//! Film-database enrichment.
//!
//! The pipeline depends on the [`FilmDatabase`] contract; [`TmdbClient`] is
//! the concrete implementation.

mod tmdb;

pub use tmdb::{extract_release_year, TmdbClient};

use async_trait::async_trait;

use crate::error::Result;
use crate::types::EnrichedRecord;

#[async_trait]
pub trait FilmDatabase: Send + Sync {
    /// `Ok(None)` when the database has no match for the title.
    async fn search_movie(&self, title: &str, year: Option<i32>)
        -> Result<Option<EnrichedRecord>>;

    async fn search_series(&self, title: &str) -> Result<Option<EnrichedRecord>>;
}

#[async_trait]
impl FilmDatabase for TmdbClient {
    async fn search_movie(
        &self,
        title: &str,
        year: Option<i32>,
    ) -> Result<Option<EnrichedRecord>> {
        TmdbClient::search_movie(self, title, year).await
    }

    async fn search_series(&self, title: &str) -> Result<Option<EnrichedRecord>> {
        TmdbClient::search_series(self, title).await
    }
}
