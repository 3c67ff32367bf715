use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use super::{IndexClient, IndexError};
use crate::config::IndexConfig;
use crate::constants::search::{HIGHLIGHT_SEPARATOR, SNIPPET_FALLBACK_CHARS};
use crate::domain::{SearchHit, SearchPage};

#[derive(Debug, Deserialize)]
struct EsResponse {
    hits: EsHits,
}

#[derive(Debug, Deserialize)]
struct EsHits {
    #[serde(default)]
    total: Option<EsTotal>,
    #[serde(default)]
    hits: Vec<EsHit>,
}

/// Older clusters report the total as a bare number.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum EsTotal {
    Object { value: u64 },
    Number(u64),
}

#[derive(Debug, Deserialize)]
struct EsHit {
    #[serde(rename = "_score", default)]
    score: Option<f64>,
    #[serde(rename = "_source", default)]
    source: EsSource,
    #[serde(default)]
    highlight: Option<EsHighlight>,
}

#[derive(Debug, Default, Deserialize)]
struct EsSource {
    #[serde(default)]
    url: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    content: String,
    #[serde(default)]
    domain: String,
    #[serde(default)]
    crawl_date: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct EsHighlight {
    #[serde(default)]
    content: Vec<String>,
}

#[derive(Clone)]
pub struct ElasticsearchClient {
    client: Client,
    base_url: String,
    index_name: String,
    username: Option<String>,
    password: Option<String>,
}

impl ElasticsearchClient {
    #[must_use]
    pub fn new(config: &IndexConfig) -> Self {
        Self {
            client: Client::builder()
                .user_agent("Crawlgate/1.0")
                .timeout(Duration::from_secs(config.request_timeout_seconds))
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            index_name: config.index_name.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
        }
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.username {
            Some(user) => builder.basic_auth(user, self.password.as_deref()),
            None => builder,
        }
    }

    fn build_query(text: &str, limit: u32, offset: u64) -> serde_json::Value {
        json!({
            "from": offset,
            "size": limit,
            "query": {
                "multi_match": {
                    "query": text,
                    "fields": ["title^3", "content", "url"],
                    "type": "best_fields",
                    "fuzziness": "AUTO"
                }
            },
            "highlight": {
                "fields": {
                    "content": { "fragment_size": 150, "number_of_fragments": 3 }
                }
            }
        })
    }

    fn parse_response(body: EsResponse) -> SearchPage {
        let total = match body.hits.total {
            Some(EsTotal::Object { value } | EsTotal::Number(value)) => value,
            None => body.hits.hits.len() as u64,
        };

        let hits = body
            .hits
            .hits
            .into_iter()
            .map(|hit| {
                let snippet = match hit.highlight {
                    Some(h) if !h.content.is_empty() => h.content.join(HIGHLIGHT_SEPARATOR),
                    _ => fallback_snippet(&hit.source.content),
                };

                SearchHit {
                    url: hit.source.url,
                    title: hit.source.title.unwrap_or_else(|| "No title".to_string()),
                    snippet,
                    domain: hit.source.domain,
                    crawl_date: hit.source.crawl_date,
                    score: hit.score.unwrap_or(0.0),
                }
            })
            .collect();

        SearchPage { total, hits }
    }
}

fn fallback_snippet(content: &str) -> String {
    if content.chars().count() > SNIPPET_FALLBACK_CHARS {
        let head: String = content.chars().take(SNIPPET_FALLBACK_CHARS).collect();
        format!("{head}...")
    } else {
        content.to_string()
    }
}

fn classify(err: &reqwest::Error) -> IndexError {
    if let Some(status) = err.status() {
        return classify_status(status, &err.to_string());
    }
    IndexError::Transient(err.to_string())
}

fn classify_status(status: StatusCode, body: &str) -> IndexError {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        IndexError::Transient(format!("status={status}"))
    } else {
        IndexError::MalformedQuery(format!("status={status}, body={body}"))
    }
}

#[async_trait::async_trait]
impl IndexClient for ElasticsearchClient {
    async fn query(&self, text: &str, limit: u32, offset: u64) -> Result<SearchPage, IndexError> {
        let url = format!("{}/{}/_search", self.base_url, self.index_name);
        debug!(index = %self.index_name, limit, offset, "Querying index");

        let response = self
            .request(reqwest::Method::POST, &url)
            .json(&Self::build_query(text, limit, offset))
            .send()
            .await
            .map_err(|e| classify(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let body: EsResponse = response
            .json()
            .await
            .map_err(|e| IndexError::Transient(format!("Invalid index response: {e}")))?;

        Ok(Self::parse_response(body))
    }

    async fn ping(&self) -> bool {
        self.request(reqwest::Method::GET, &self.base_url)
            .send()
            .await
            .is_ok_and(|r| r.status().is_success())
    }
}
