//! RealtimeDbStore - Firebase Realtime Database の REST API 実装
//!
//! # 対応関係
//! - `find_one`: `GET {ns}.json?orderBy="status"&equalTo="waiting"&limitToFirst=1`
//! - `conditional_update`: `GET`（`X-Firebase-ETag: true`）→ transform → `PUT`（`if-match`）
//!   412 が返ったら新しい値と ETag で transform をやり直す
//! - `update`: `PATCH`（`null` はフィールド削除）
//!
//! # tie-break
//! `equalTo` で一致した子はキーの辞書順で返されます。
//!
//! # 壊れたレコード
//! レコードは `TaskRecord::from_value_lossy` で読みます。`status` 以外のフィールドが
//! 壊れていても候補として返し、claim 後に `error` へ送ります（キューを止めない）。
//!
//! 認証トークンの取得はこのクレートの外側の責務です。
//! 取得済みのトークンを `auth` クエリパラメータとして付けるだけです。

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ETAG, IF_MATCH};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::domain::{PayloadRef, RecordField, RecordPatch, StoreError, TaskId, TaskRecord};
use crate::ports::{RecordStore, TaskProducer, Transform};

/// Retry count the Firebase SDKs use for transactions.
pub const DEFAULT_MAX_TRANSACTION_RETRIES: u32 = 25;

const FIREBASE_ETAG_HEADER: &str = "X-Firebase-ETag";
const NULL_ETAG: &str = "null_etag";

/// Construction parameters for [`RealtimeDbStore`].
#[derive(Debug, Clone)]
pub struct RealtimeDbOptions {
    /// e.g. `https://my-project-default-rtdb.firebaseio.com`
    pub database_url: String,
    pub namespace: String,
    pub auth_token: Option<String>,
    pub max_transaction_retries: u32,
    pub request_timeout: Duration,
}

impl RealtimeDbOptions {
    pub fn new(database_url: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            namespace: namespace.into(),
            auth_token: None,
            max_transaction_retries: DEFAULT_MAX_TRANSACTION_RETRIES,
            request_timeout: Duration::from_secs(30),
        }
    }
}

pub struct RealtimeDbStore {
    client: Client,
    base_url: String,
    namespace: String,
    auth_token: Option<String>,
    max_transaction_retries: u32,
}

impl RealtimeDbStore {
    pub fn new(options: RealtimeDbOptions) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(options.request_timeout)
            .build()
            .map_err(|e| StoreError::Unavailable(format!("http client: {e}")))?;
        Ok(Self {
            client,
            base_url: options.database_url.trim_end_matches('/').to_string(),
            namespace: options.namespace.trim_matches('/').to_string(),
            auth_token: options.auth_token,
            max_transaction_retries: options.max_transaction_retries,
        })
    }

    fn namespace_url(&self) -> String {
        format!("{}/{}.json", self.base_url, self.namespace)
    }

    fn record_url(&self, id: &TaskId) -> String {
        format!("{}/{}/{}.json", self.base_url, self.namespace, id)
    }

    fn request(&self, method: Method, url: String) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.auth_token {
            Some(token) => builder.query(&[("auth", token.as_str())]),
            None => builder,
        }
    }
}

async fn send(builder: RequestBuilder) -> Result<Response, StoreError> {
    builder.send().await.map_err(transport_error)
}

fn transport_error(err: reqwest::Error) -> StoreError {
    if err.is_decode() {
        StoreError::Decode(err.to_string())
    } else {
        StoreError::Unavailable(err.to_string())
    }
}

/// Map a non-2xx response to a `StoreError`.
async fn status_error(resp: Response) -> StoreError {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        StoreError::Unavailable(format!("{status}: {body}"))
    } else {
        StoreError::Rejected {
            status: status.as_u16(),
            body,
        }
    }
}

async fn ensure_success(resp: Response) -> Result<Response, StoreError> {
    if resp.status().is_success() {
        Ok(resp)
    } else {
        Err(status_error(resp).await)
    }
}

async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, StoreError> {
    let bytes = resp.bytes().await.map_err(transport_error)?;
    serde_json::from_slice(&bytes).map_err(|e| StoreError::Decode(e.to_string()))
}

fn record_from_value(value: serde_json::Value) -> Result<TaskRecord, StoreError> {
    TaskRecord::from_value_lossy(value).map_err(|e| StoreError::Decode(e.to_string()))
}

async fn decode_record(resp: Response) -> Result<Option<TaskRecord>, StoreError> {
    let value: Option<serde_json::Value> = decode(resp).await?;
    value.map(record_from_value).transpose()
}

fn etag_of(resp: &Response) -> Result<String, StoreError> {
    resp.headers()
        .get(ETAG)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
        .ok_or_else(|| StoreError::Decode("response carried no ETag".into()))
}

#[async_trait]
impl RecordStore for RealtimeDbStore {
    async fn find_one(
        &self,
        field: RecordField,
        value: &str,
    ) -> Result<Option<(TaskId, TaskRecord)>, StoreError> {
        // orderBy / equalTo take JSON literals
        let order_by = serde_json::Value::from(field.key()).to_string();
        let equal_to = serde_json::Value::from(value).to_string();

        let resp = send(self.request(Method::GET, self.namespace_url()).query(&[
            ("orderBy", order_by.as_str()),
            ("equalTo", equal_to.as_str()),
            ("limitToFirst", "1"),
        ]))
        .await?;
        let matches: Option<BTreeMap<String, serde_json::Value>> =
            decode(ensure_success(resp).await?).await?;

        let Some((id, value)) = matches.and_then(|m| m.into_iter().next()) else {
            return Ok(None);
        };
        let record = record_from_value(value)?;
        if let Some(problem) = &record.malformed {
            warn!(task_id = %id, problem = %problem, "candidate record is malformed");
        }
        Ok(Some((TaskId::new(id), record)))
    }

    async fn conditional_update(
        &self,
        id: &TaskId,
        transform: Transform<'_>,
    ) -> Result<bool, StoreError> {
        let url = self.record_url(id);

        let resp = send(
            self.request(Method::GET, url.clone())
                .header(FIREBASE_ETAG_HEADER, "true"),
        )
        .await?;
        let resp = ensure_success(resp).await?;
        let mut etag = etag_of(&resp)?;
        let mut current = decode_record(resp).await?;

        for attempt in 0..=self.max_transaction_retries {
            let Some(next) = transform(current.as_ref()) else {
                return Ok(false);
            };

            let resp = send(
                self.request(Method::PUT, url.clone())
                    .header(IF_MATCH, etag.as_str())
                    .json(&next),
            )
            .await?;

            if resp.status().is_success() {
                return Ok(true);
            }
            if resp.status() != StatusCode::PRECONDITION_FAILED {
                return Err(status_error(resp).await);
            }

            // 412: someone else wrote first; retry against their value
            debug!(task_id = %id, attempt, "conditional write raced, retrying");
            etag = etag_of(&resp)?;
            current = decode_record(resp).await?;
        }

        warn!(
            task_id = %id,
            retries = self.max_transaction_retries,
            "conditional write gave up after repeated contention"
        );
        Ok(false)
    }

    async fn update(&self, id: &TaskId, patch: &RecordPatch) -> Result<(), StoreError> {
        let resp = send(self.request(Method::PATCH, self.record_url(id)).json(patch)).await?;
        ensure_success(resp).await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<(TaskId, TaskRecord)>, StoreError> {
        let resp = send(self.request(Method::GET, self.namespace_url())).await?;
        let records: Option<BTreeMap<String, serde_json::Value>> =
            decode(ensure_success(resp).await?).await?;

        let mut listed = Vec::new();
        for (id, value) in records.unwrap_or_default() {
            match record_from_value(value) {
                Ok(record) => listed.push((TaskId::new(id), record)),
                Err(err) => warn!(task_id = %id, error = %err, "skipping undecodable record"),
            }
        }
        Ok(listed)
    }
}

#[async_trait]
impl TaskProducer for RealtimeDbStore {
    async fn enqueue(&self, id: &TaskId, payload_ref: &PayloadRef) -> Result<(), StoreError> {
        let record = TaskRecord::waiting(payload_ref.clone());
        let resp = send(
            self.request(Method::PUT, self.record_url(id))
                .header(IF_MATCH, NULL_ETAG)
                .json(&record),
        )
        .await?;

        if resp.status() == StatusCode::PRECONDITION_FAILED {
            return Err(StoreError::AlreadyExists(id.clone()));
        }
        ensure_success(resp).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskStatus;
    use chrono::{TimeZone, Utc};
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn store_for(server: &MockServer) -> RealtimeDbStore {
        RealtimeDbStore::new(RealtimeDbOptions::new(server.uri(), "summarizeQueue")).unwrap()
    }

    fn claim_transform(current: Option<&TaskRecord>) -> Option<TaskRecord> {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        current.and_then(|record| record.claimed(now))
    }

    #[tokio::test]
    async fn find_one_queries_by_child_value() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/summarizeQueue.json"))
            .and(query_param("orderBy", "\"status\""))
            .and(query_param("equalTo", "\"waiting\""))
            .and(query_param("limitToFirst", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "t1": { "path": "courses/a.md", "status": "waiting" }
            })))
            .mount(&server)
            .await;

        let (id, record) = store_for(&server)
            .find_one(RecordField::Status, "waiting")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(id, TaskId::new("t1"));
        assert_eq!(record.payload_ref.as_str(), "courses/a.md");
    }

    #[tokio::test]
    async fn find_one_empty_result_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/summarizeQueue.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let found = store_for(&server)
            .find_one(RecordField::Status, "waiting")
            .await
            .unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn find_one_accepts_server_timestamp_millis() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/summarizeQueue.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "a": { "path": "p1", "status": "waiting", "lastUpdated": 1_704_110_400_000_i64 }
            })))
            .mount(&server)
            .await;

        let (_, record) = store_for(&server)
            .find_one(RecordField::Status, "waiting")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(record.malformed, None);
        assert_eq!(
            record.last_updated,
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap())
        );
    }

    #[tokio::test]
    async fn find_one_returns_malformed_candidate_instead_of_failing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/summarizeQueue.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "a": { "path": "p1", "status": "waiting", "lastUpdated": "yesterday" }
            })))
            .mount(&server)
            .await;

        let (id, record) = store_for(&server)
            .find_one(RecordField::Status, "waiting")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(id, TaskId::new("a"));
        assert_eq!(record.status, TaskStatus::Waiting);
        assert_eq!(record.last_updated, None);
        assert!(record.malformed.unwrap().starts_with("lastUpdated"));
    }

    #[tokio::test]
    async fn malformed_waiting_record_is_moved_to_error_and_queue_drains() {
        use crate::app::{PollLoop, PollOutcome};
        use crate::config::QueueSettings;
        use crate::domain::ExecutionError;
        use crate::ports::JobExecutor;
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};

        #[derive(Default)]
        struct Counting(AtomicUsize);

        #[async_trait]
        impl JobExecutor for Counting {
            async fn execute(&self, _payload_ref: &PayloadRef) -> Result<(), ExecutionError> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }

        let server = MockServer::start().await;
        let stored = serde_json::json!({ "path": "p1", "status": "waiting", "lastUpdated": "yesterday" });
        Mock::given(method("GET"))
            .and(path("/summarizeQueue.json"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "a": stored.clone() })),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/summarizeQueue/a.json"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("ETag", "etag-1")
                    .set_body_json(stored),
            )
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/summarizeQueue/a.json"))
            .and(header("if-match", "etag-1"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/summarizeQueue/a.json"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let executor = Arc::new(Counting::default());
        let mut poll = PollLoop::new(
            Arc::new(store_for(&server)),
            executor.clone(),
            &QueueSettings::new("summarizeQueue"),
        );

        assert_eq!(poll.poll_once().await, PollOutcome::Failed);
        assert_eq!(executor.0.load(Ordering::SeqCst), 0);

        let requests = server.received_requests().await.unwrap();
        let put = requests
            .iter()
            .find(|r| r.method.as_str() == "PUT")
            .unwrap();
        let claimed: serde_json::Value = serde_json::from_slice(&put.body).unwrap();
        assert_eq!(claimed["status"], "in-progress");
        assert!(claimed["lastUpdated"].as_str().unwrap().ends_with('Z'));

        let patch = requests
            .iter()
            .find(|r| r.method.as_str() == "PATCH")
            .unwrap();
        let finished: serde_json::Value = serde_json::from_slice(&patch.body).unwrap();
        assert_eq!(finished["status"], "error");
        let detail = finished["error"].as_str().unwrap();
        assert!(detail.contains("malformed record: lastUpdated"), "{detail}");
    }

    #[tokio::test]
    async fn auth_token_is_sent_as_query_param() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/summarizeQueue.json"))
            .and(query_param("auth", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_string("null"))
            .expect(1)
            .mount(&server)
            .await;

        let mut options = RealtimeDbOptions::new(server.uri(), "summarizeQueue");
        options.auth_token = Some("secret".into());
        let store = RealtimeDbStore::new(options).unwrap();

        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn conditional_update_puts_with_etag() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/summarizeQueue/t1.json"))
            .and(header("X-Firebase-ETag", "true"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("ETag", "etag-1")
                    .set_body_json(serde_json::json!({ "path": "p1", "status": "waiting" })),
            )
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/summarizeQueue/t1.json"))
            .and(header("if-match", "etag-1"))
            .and(body_json(serde_json::json!({
                "path": "p1",
                "status": "in-progress",
                "lastUpdated": "2024-01-01T12:00:00.000Z",
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let committed = store_for(&server)
            .conditional_update(&TaskId::new("t1"), &claim_transform)
            .await
            .unwrap();
        assert!(committed);
    }

    #[tokio::test]
    async fn conditional_update_reapplies_transform_after_412() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/summarizeQueue/t1.json"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("ETag", "etag-1")
                    .set_body_json(serde_json::json!({ "path": "p1", "status": "waiting" })),
            )
            .mount(&server)
            .await;
        // another worker claimed it between our read and write
        Mock::given(method("PUT"))
            .and(path("/summarizeQueue/t1.json"))
            .respond_with(
                ResponseTemplate::new(412)
                    .insert_header("ETag", "etag-2")
                    .set_body_json(serde_json::json!({ "path": "p1", "status": "in-progress" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let committed = store_for(&server)
            .conditional_update(&TaskId::new("t1"), &claim_transform)
            .await
            .unwrap();
        assert!(!committed);
    }

    #[tokio::test]
    async fn conditional_update_gives_up_after_max_retries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/summarizeQueue/t1.json"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("ETag", "etag-1")
                    .set_body_json(serde_json::json!({ "path": "p1", "status": "waiting" })),
            )
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/summarizeQueue/t1.json"))
            .respond_with(
                ResponseTemplate::new(412)
                    .insert_header("ETag", "etag-n")
                    .set_body_json(serde_json::json!({ "path": "p1", "status": "waiting" })),
            )
            .expect(3)
            .mount(&server)
            .await;

        let mut options = RealtimeDbOptions::new(server.uri(), "summarizeQueue");
        options.max_transaction_retries = 2;
        let store = RealtimeDbStore::new(options).unwrap();

        let committed = store
            .conditional_update(&TaskId::new("t1"), &claim_transform)
            .await
            .unwrap();
        assert!(!committed);
    }

    #[tokio::test]
    async fn update_patches_terminal_fields() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/summarizeQueue/t2.json"))
            .and(body_json(serde_json::json!({
                "status": "error",
                "lastUpdated": "2024-01-01T12:00:00.000Z",
                "error": "bad payload",
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let patch = RecordPatch {
            status: TaskStatus::Error,
            last_updated: Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
            error_detail: Some("bad payload".into()),
        };
        store_for(&server)
            .update(&TaskId::new("t2"), &patch)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn server_errors_are_unavailable_and_client_errors_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/summarizeQueue.json"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .respond_with(ResponseTemplate::new(401).set_body_string("Permission denied"))
            .mount(&server)
            .await;

        let store = store_for(&server);
        let err = store.list().await.unwrap_err();
        assert!(err.is_unavailable());

        let patch = RecordPatch {
            status: TaskStatus::Done,
            last_updated: Utc::now(),
            error_detail: None,
        };
        let err = store.update(&TaskId::new("t1"), &patch).await.unwrap_err();
        assert!(matches!(err, StoreError::Rejected { status: 401, .. }));
    }

    #[tokio::test]
    async fn unreachable_server_is_unavailable() {
        // nothing listens on port 9 (discard) in the test environment
        let store =
            RealtimeDbStore::new(RealtimeDbOptions::new("http://127.0.0.1:9", "q")).unwrap();

        let err = store
            .find_one(RecordField::Status, "waiting")
            .await
            .unwrap_err();
        assert!(err.is_unavailable());
    }

    #[tokio::test]
    async fn enqueue_refuses_existing_record() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/summarizeQueue/t1.json"))
            .and(header("if-match", "null_etag"))
            .respond_with(ResponseTemplate::new(412))
            .mount(&server)
            .await;

        let err = store_for(&server)
            .enqueue(&TaskId::new("t1"), &"p1".into())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
    }
}
