use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{RelayError, Result};

use super::{SearchHit, VectorIndex};

const PAYLOAD_KEY: &str = "cache_key";

/// Vector index backed by Qdrant's HTTP API.
#[derive(Clone)]
pub struct QdrantIndex {
    http: reqwest::Client,
    base_url: String,
    collection: String,
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    vector: &'a [f32],
    limit: u32,
    score_threshold: f32,
    with_payload: bool,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    result: Vec<ScoredPoint>,
}

#[derive(Deserialize)]
struct ScoredPoint {
    id: Value,
    score: f32,
    #[serde(default)]
    payload: Option<Value>,
}

#[derive(Serialize)]
struct UpsertRequest<'a> {
    points: Vec<Point<'a>>,
}

#[derive(Serialize)]
struct Point<'a> {
    id: String,
    vector: &'a [f32],
    payload: Value,
}

impl QdrantIndex {
    pub fn new(base_url: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            collection: collection.into(),
        }
    }

    fn points_url(&self) -> String {
        format!("{}/collections/{}/points", self.base_url, self.collection)
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn search(&self, vector: &[f32], threshold: f32) -> Result<Option<SearchHit>> {
        let body = SearchRequest {
            vector,
            limit: 1,
            score_threshold: threshold,
            with_payload: true,
        };

        let response = self
            .http
            .post(format!("{}/search", self.points_url()))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::Api { status, body });
        }

        let parsed: SearchResponse = response.json().await?;
        let Some(top) = parsed.result.into_iter().next() else {
            return Ok(None);
        };

        // Points are stored under random uuids with the fingerprint in
        // the payload; older deployments keyed points by fingerprint
        // directly, so fall back to the id.
        let fingerprint = top
            .payload
            .as_ref()
            .and_then(|payload| payload.get(PAYLOAD_KEY))
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| top.id.as_str().map(str::to_string))
            .ok_or_else(|| {
                RelayError::InvalidResponse("search hit carries no cache key".to_string())
            })?;

        Ok(Some(SearchHit {
            fingerprint,
            score: top.score,
        }))
    }

    async fn upsert(&self, fingerprint: &str, vector: &[f32]) -> Result<()> {
        let body = UpsertRequest {
            points: vec![Point {
                id: Uuid::new_v4().to_string(),
                vector,
                payload: serde_json::json!({ PAYLOAD_KEY: fingerprint }),
            }],
        };

        let response = self.http.put(self.points_url()).json(&body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::Api { status, body });
        }

        Ok(())
    }
}
