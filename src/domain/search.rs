//! Job search history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;

use crate::domain::application::ApplicationTracker;
use crate::error::DbError;

/// Input for `record_search`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSearch {
    pub keywords: String,
    #[serde(default)]
    pub location: Option<String>,
    pub source: String,
    #[serde(default)]
    pub results_count: u32,
    #[serde(default)]
    pub filtered_count: u32,
    #[serde(default)]
    pub search_params: serde_json::Value,
}

impl NewSearch {
    pub fn new(keywords: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            keywords: keywords.into(),
            location: None,
            source: source.into(),
            results_count: 0,
            filtered_count: 0,
            search_params: serde_json::Value::Object(Default::default()),
        }
    }

    pub fn location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Postings found, and how many survived scoring.
    pub fn counts(mut self, results: u32, filtered: u32) -> Self {
        self.results_count = results;
        self.filtered_count = filtered;
        self
    }

    pub fn params(mut self, params: serde_json::Value) -> Self {
        self.search_params = params;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct SearchEntry {
    pub id: i64,
    pub searched_at: DateTime<Utc>,
    pub keywords: String,
    pub location: Option<String>,
    pub source: String,
    pub results_count: i64,
    pub filtered_count: i64,
    pub search_params: Json<serde_json::Value>,
}

impl ApplicationTracker {
    pub async fn record_search(&self, search: NewSearch) -> Result<i64, DbError> {
        if search.keywords.trim().is_empty() || search.source.trim().is_empty() {
            return Err(DbError::validation("search keywords and source must not be empty"));
        }
        if search.filtered_count > search.results_count {
            return Err(DbError::validation(format!(
                "filtered_count {} exceeds results_count {}",
                search.filtered_count, search.results_count
            )));
        }

        let id = self
            .database()
            .transaction("record_search", |session| {
                let search = search.clone();
                Box::pin(async move {
                    session
                        .fetch_scalar(
                            "insert_search",
                            sqlx::query_scalar(
                                "INSERT INTO search_history \
                                 (searched_at, keywords, location, source, results_count, filtered_count, search_params) \
                                 VALUES (?, ?, ?, ?, ?, ?, ?) RETURNING id",
                            )
                            .bind(Utc::now())
                            .bind(&search.keywords)
                            .bind(search.location.as_deref())
                            .bind(&search.source)
                            .bind(search.results_count)
                            .bind(search.filtered_count)
                            .bind(Json(&search.search_params)),
                        )
                        .await
                })
            })
            .await?;

        tracing::info!(
            event = "search_recorded",
            search_id = id,
            keywords = %search.keywords,
            source = %search.source,
            results = search.results_count,
            filtered = search.filtered_count,
            "Search recorded"
        );
        Ok(id)
    }

    /// Most recent searches first.
    pub async fn recent_searches(&self, limit: u32) -> Result<Vec<SearchEntry>, DbError> {
        self.database()
            .transaction("recent_searches", |session| {
                Box::pin(async move {
                    session
                        .fetch_all_as(
                            "recent_searches",
                            sqlx::query_as::<_, SearchEntry>(
                                "SELECT id, searched_at, keywords, location, source, results_count, filtered_count, search_params \
                                 FROM search_history ORDER BY searched_at DESC, id DESC LIMIT ?",
                            )
                            .bind(limit),
                        )
                        .await
                })
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_search_defaults() {
        let search = NewSearch::new("rust engineer", "linkedin");
        assert_eq!(search.results_count, 0);
        assert_eq!(search.location, None);
        assert_eq!(search.search_params, serde_json::json!({}));
    }

    #[test]
    fn test_new_search_builder() {
        let search = NewSearch::new("rust engineer", "indeed")
            .location("Berlin")
            .counts(40, 7)
            .params(serde_json::json!({ "remote": true }));

        assert_eq!(search.location.as_deref(), Some("Berlin"));
        assert_eq!((search.results_count, search.filtered_count), (40, 7));
        assert_eq!(search.search_params["remote"], true);
    }
}
