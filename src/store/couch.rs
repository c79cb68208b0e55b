//! CouchDB-backed RemoteStore implementation

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, Stream, StreamExt};
use log::debug;
use reqwest::{Client, RequestBuilder, Response, Url};
use serde::Deserialize;
use serde_json::json;

use super::{FeedStream, RemoteStore};
use crate::config::StoreConfig;
use crate::domain::{ChangesPage, FeedEvent, Item, Selector, WriteResult};
use crate::error::StoreError;

/// Extra time granted to a long-poll request beyond the feed's own timeout
const FEED_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct DbInfo {
    update_seq: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct FindResponse {
    #[serde(default)]
    docs: Vec<Item>,
    bookmark: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BulkRow {
    #[serde(default)]
    id: String,
    #[serde(default)]
    ok: bool,
    rev: Option<String>,
    error: Option<String>,
}

/// Remote store client for a CouchDB database
pub struct CouchStore {
    client: Client,
    db_url: Url,
    username: String,
    password: String,
    page_size: usize,
}

impl std::fmt::Debug for CouchStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CouchStore")
            .field("db_url", &self.db_url.as_str())
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl CouchStore {
    /// Create a client for the database described by `config`
    pub fn new(config: &StoreConfig) -> Result<Self, StoreError> {
        if !config.is_configured() {
            return Err(StoreError::Unavailable("store is not configured".to_string()));
        }

        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| StoreError::Unavailable(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            db_url: database_url(&config.hostname, &config.database)?,
            username: config.username.clone(),
            password: config.password.clone(),
            page_size: config.find_page_size.max(1),
        })
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.db_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.basic_auth(&self.username, Some(&self.password))
    }
}

/// Build the database URL; a bare hostname gets `https://`
fn database_url(hostname: &str, database: &str) -> Result<Url, StoreError> {
    let base = if hostname.contains("://") {
        hostname.to_string()
    } else {
        format!("https://{}", hostname)
    };
    let mut url = Url::parse(&base).map_err(|e| StoreError::Unavailable(format!("invalid store URL {}: {}", base, e)))?;
    url.path_segments_mut()
        .map_err(|_| StoreError::Unavailable(format!("invalid store URL {}", base)))?
        .pop_if_empty()
        .push(database);
    Ok(url)
}

/// Turn a non-success response into an error carrying the body
async fn check(response: Response) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(StoreError::Http {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl RemoteStore for CouchStore {
    async fn update_seq(&self) -> Result<String, StoreError> {
        let response = self.authed(self.client.get(self.db_url.clone())).send().await?;
        let info: DbInfo = check(response).await?.json().await?;
        Ok(match info.update_seq {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        })
    }

    async fn query(&self, selector: &Selector) -> Result<Vec<Item>, StoreError> {
        let mut items = Vec::new();
        let mut bookmark: Option<String> = None;

        loop {
            let mut body = json!({
                "selector": selector.to_mango(),
                "limit": self.page_size,
            });
            if let Some(mark) = &bookmark {
                body["bookmark"] = json!(mark);
            }

            let response = self
                .authed(self.client.post(self.url(&["_find"])))
                .json(&body)
                .send()
                .await?;
            let page: FindResponse = check(response).await?.json().await?;
            let fetched = page.docs.len();
            items.extend(page.docs);

            match page.bookmark {
                Some(mark) if fetched == self.page_size => bookmark = Some(mark),
                _ => break,
            }
        }

        debug!("query {:?} returned {} docs", selector, items.len());
        Ok(items)
    }

    async fn get(&self, id: &str) -> Result<Option<Item>, StoreError> {
        let response = self.authed(self.client.get(self.url(&[id]))).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(check(response).await?.json().await?))
    }

    async fn bulk_update(&self, items: &[Item]) -> Result<Vec<WriteResult>, StoreError> {
        let response = self
            .authed(self.client.post(self.url(&["_bulk_docs"])))
            .json(&json!({ "docs": items }))
            .send()
            .await?;
        let rows: Vec<BulkRow> = check(response).await?.json().await?;
        if rows.len() != items.len() {
            return Err(StoreError::Decode(format!(
                "bulk update returned {} results for {} docs",
                rows.len(),
                items.len()
            )));
        }

        Ok(rows
            .into_iter()
            .zip(items)
            .map(|(row, item)| WriteResult {
                id: if row.id.is_empty() { item.id.clone() } else { row.id },
                ok: row.ok && row.error.is_none(),
                rev: row.rev,
            })
            .collect())
    }

    async fn changes_since(&self, since: &str) -> Result<ChangesPage, StoreError> {
        let response = self
            .authed(self.client.get(self.url(&["_changes"])))
            .query(&[("since", since)])
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    async fn changes_continuous(&self, since: &str, timeout: Duration) -> Result<FeedStream, StoreError> {
        let timeout_ms = timeout.as_millis().to_string();
        let response = self
            .authed(self.client.get(self.url(&["_changes"])))
            .query(&[("feed", "continuous"), ("since", since), ("timeout", timeout_ms.as_str())])
            .timeout(timeout + FEED_GRACE)
            .send()
            .await?;
        let response = check(response).await?;
        Ok(feed_lines(response.bytes_stream()))
    }
}

/// Take the next complete line from `buf`, or the remainder once the body is done
fn take_line(buf: &mut Vec<u8>, done: bool) -> Option<Vec<u8>> {
    if let Some(pos) = buf.iter().position(|b| *b == b'\n') {
        return Some(buf.drain(..=pos).collect());
    }
    if done && !buf.is_empty() {
        return Some(std::mem::take(buf));
    }
    None
}

/// Split a chunked response body into feed events, one JSON object per line
pub(crate) fn feed_lines<S, B, E>(body: S) -> FeedStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<StoreError> + Send + 'static,
{
    let body: Pin<Box<S>> = Box::pin(body);
    stream::unfold((body, Vec::new(), false), |(mut body, mut buf, mut done)| async move {
        loop {
            if let Some(line) = take_line(&mut buf, done) {
                match FeedEvent::from_line(&String::from_utf8_lossy(&line)) {
                    Ok(Some(event)) => return Some((Ok(event), (body, buf, done))),
                    Ok(None) => continue,
                    Err(err) => return Some((Err(err.into()), (body, buf, done))),
                }
            }
            if done {
                return None;
            }
            match body.next().await {
                Some(Ok(chunk)) => buf.extend_from_slice(chunk.as_ref()),
                Some(Err(err)) => return Some((Err(err.into()), (body, buf, true))),
                None => done = true,
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Change;

    fn chunks(parts: &[&str]) -> impl Stream<Item = Result<Vec<u8>, StoreError>> + Send + 'static {
        let owned: Vec<Result<Vec<u8>, StoreError>> = parts.iter().map(|p| Ok(p.as_bytes().to_vec())).collect();
        stream::iter(owned)
    }

    #[test]
    fn test_find_page_with_odd_document_decodes() {
        let page: FindResponse = serde_json::from_value(json!({
            "docs": [
                {"_id": "a", "db": "Tasks", "parentId": "p1", "masterRank": 1},
                {"_id": "b", "db": "Tasks", "parentId": "p1", "labelIds": ["l1", 7], "done": "true"}
            ],
            "bookmark": "g1"
        }))
        .unwrap();
        assert_eq!(page.docs.len(), 2);
        assert_eq!(page.docs[1].group(), Some("p1"));
        assert!(!page.docs[1].is_done());
    }

    #[test]
    fn test_database_url_adds_scheme() {
        let url = database_url("example.cloudant.com", "u-abc").unwrap();
        assert_eq!(url.as_str(), "https://example.cloudant.com/u-abc");
    }

    #[test]
    fn test_database_url_keeps_scheme() {
        let url = database_url("http://localhost:5984/", "tasks").unwrap();
        assert_eq!(url.as_str(), "http://localhost:5984/tasks");
    }

    #[test]
    fn test_new_rejects_unconfigured_store() {
        let err = CouchStore::new(&StoreConfig::default()).unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }

    #[test]
    fn test_doc_url_escapes_id() {
        let config = StoreConfig {
            hostname: "localhost:5984".to_string(),
            username: "u".to_string(),
            password: "p".to_string(),
            database: "db".to_string(),
            ..Default::default()
        };
        let store = CouchStore::new(&config).unwrap();
        assert_eq!(store.url(&["a/b"]).as_str(), "https://localhost:5984/db/a%2Fb");
        assert_eq!(store.url(&["_changes"]).as_str(), "https://localhost:5984/db/_changes");
    }

    #[tokio::test]
    async fn test_feed_lines_split_across_chunks() {
        let feed = feed_lines(chunks(&[
            "{\"seq\":\"1-a\",\"id\":\"t1\",\"chan",
            "ges\":[{\"rev\":\"2-x\"}]}\n\n{\"last_seq\":\"1-a\"}\n",
        ]));
        let events: Vec<FeedEvent> = feed.map(|e| e.unwrap()).collect().await;
        assert_eq!(
            events,
            vec![
                FeedEvent::Change(Change::updated("1-a", "t1", "2-x")),
                FeedEvent::LastSeq("1-a".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_feed_lines_trailing_line_without_newline() {
        let feed = feed_lines(chunks(&["{\"last_seq\":\"9\"}"]));
        let events: Vec<FeedEvent> = feed.map(|e| e.unwrap()).collect().await;
        assert_eq!(events, vec![FeedEvent::LastSeq("9".to_string())]);
    }

    #[tokio::test]
    async fn test_feed_lines_reports_bad_json() {
        let mut feed = feed_lines(chunks(&["oops\n"]));
        assert!(feed.next().await.unwrap().is_err());
        assert!(feed.next().await.is_none());
    }
}
