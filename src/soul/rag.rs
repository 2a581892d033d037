use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

use crate::error::{Error, Result};

/// A knowledge-base match returned by retrieval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedDocument {
    pub content: String,
    /// Higher is closer, typically between 0 and 1
    pub similarity: f64,
}

#[async_trait]
pub trait Retriever: Send + Sync {
    /// Search the knowledge base for documents at least `min_similarity` close to `query`
    async fn search(&self, query: &str, min_similarity: f64) -> Result<Vec<RetrievedDocument>>;
}

/// Keep documents at or above `min_similarity`, best first, at most `limit` of them
pub fn select_top_documents(
    documents: Vec<RetrievedDocument>,
    min_similarity: f64,
    limit: usize,
) -> Vec<RetrievedDocument> {
    let mut eligible: Vec<RetrievedDocument> = documents
        .into_iter()
        .filter(|d| d.similarity >= min_similarity)
        .collect();
    eligible.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
    eligible.truncate(limit);
    eligible
}

/// Retrieval over a JSON endpoint:
/// `POST {"query", "minSimilarity"}` -> `[{"content", "similarity"}]`
pub struct HttpRetriever {
    url: String,
    client: Client,
}

impl HttpRetriever {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            url: url.into(),
            client: Client::builder().timeout(timeout).build()?,
        })
    }
}

#[async_trait]
impl Retriever for HttpRetriever {
    async fn search(&self, query: &str, min_similarity: f64) -> Result<Vec<RetrievedDocument>> {
        let response = self
            .client
            .post(&self.url)
            .json(&json!({ "query": query, "minSimilarity": min_similarity }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Upstream(format!("retrieval request failed with status {}", status)));
        }
        let documents: Vec<RetrievedDocument> = response.json().await?;
        debug!("[Retriever] {} documents for query", documents.len());
        Ok(documents)
    }
}

/// Used when no knowledge base is configured
pub struct EmptyRetriever;

#[async_trait]
impl Retriever for EmptyRetriever {
    async fn search(&self, _query: &str, _min_similarity: f64) -> Result<Vec<RetrievedDocument>> {
        Ok(Vec::new())
    }
}
