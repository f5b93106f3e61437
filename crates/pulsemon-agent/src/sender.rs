//! HTTP delivery of metrics to the collector server.

use crate::config::ReportMode;
use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use pulsemon_common::retry::{RetryError, RetryExecutor};
use pulsemon_common::types::Metric;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::StatusCode;
use std::error::Error as StdError;
use std::io::{ErrorKind, Write};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Failure of a single HTTP exchange.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("Send: transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Send: server answered {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("Send: encoding error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Send: gzip error: {0}")]
    Compress(#[source] std::io::Error),
}

/// Message fragments of transient network conditions found anywhere in an
/// error's source chain.
const TRANSIENT_MARKERS: &[&str] = &[
    "connection refused",
    "connection reset",
    "reset by peer",
    "broken pipe",
    "timed out",
    "unexpected eof",
    "end of file",
    "dns error",
    "no such host",
    "failed to lookup address",
    "network is unreachable",
    "tls handshake",
    "connection closed before message completed",
    "server closed",
];

/// Transport classifier for [`RetryExecutor`].
///
/// Connect and timeout failures, resets, broken pipes, premature EOF, DNS and
/// TLS handshake failures are transient. Non-2xx answers and encoding errors
/// are terminal.
pub fn is_transient_transport_error(err: &SendError) -> bool {
    match err {
        SendError::Transport(e) => e.is_connect() || e.is_timeout() || chain_is_transient(e),
        SendError::Status { .. } | SendError::Encode(_) | SendError::Compress(_) => false,
    }
}

fn chain_is_transient(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            if matches!(
                io.kind(),
                ErrorKind::ConnectionRefused
                    | ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::NotConnected
                    | ErrorKind::BrokenPipe
                    | ErrorKind::TimedOut
                    | ErrorKind::UnexpectedEof
            ) {
                return true;
            }
        }
        let message = e.to_string().to_ascii_lowercase();
        if TRANSIENT_MARKERS.iter().any(|marker| message.contains(marker)) {
            return true;
        }
        current = e.source();
    }
    false
}

fn gzip(data: &[u8]) -> Result<Vec<u8>, SendError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).map_err(SendError::Compress)?;
    encoder.finish().map_err(SendError::Compress)
}

/// Delivers metrics to the server, each HTTP call retried on its own.
#[derive(Debug, Clone)]
pub struct Sender {
    client: reqwest::Client,
    base_url: String,
    retry: RetryExecutor,
    mode: ReportMode,
}

impl Sender {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        retry: RetryExecutor,
        mode: ReportMode,
    ) -> Result<Self, SendError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            retry,
            mode,
        })
    }

    pub fn mode(&self) -> ReportMode {
        self.mode
    }

    /// `POST /update/` with one gzip JSON metric. Returns how many metrics
    /// went out (0 when the metric is invalid).
    pub async fn send_single(
        &self,
        metric: &Metric,
        cancel: &CancellationToken,
    ) -> Result<usize, RetryError<SendError>> {
        if let Err(e) = metric.validate() {
            tracing::warn!(metric = %metric.id, error = %e, "Skipping invalid metric");
            return Ok(0);
        }
        let body = self.encode(metric)?;
        let url = format!("{}/update/", self.base_url);
        self.retried("send_single", cancel, &url, &body).await?;
        Ok(1)
    }

    /// `POST /updates/` with every valid metric in one gzip JSON array.
    pub async fn send_batch(
        &self,
        metrics: &[Metric],
        cancel: &CancellationToken,
    ) -> Result<usize, RetryError<SendError>> {
        let valid: Vec<&Metric> = metrics
            .iter()
            .filter(|m| match m.validate() {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(metric = %m.id, error = %e, "Skipping invalid metric");
                    false
                }
            })
            .collect();
        if valid.is_empty() {
            return Ok(0);
        }
        let body = self.encode(&valid)?;
        let url = format!("{}/updates/", self.base_url);
        self.retried("send_batch", cancel, &url, &body).await?;
        tracing::debug!(count = valid.len(), "Batch delivered");
        Ok(valid.len())
    }

    /// `POST /update/{kind}/{id}/{value}` with an empty body.
    pub async fn send_path(
        &self,
        metric: &Metric,
        cancel: &CancellationToken,
    ) -> Result<usize, RetryError<SendError>> {
        let Some(value) = metric.validate().ok().and_then(|()| metric.value_string()) else {
            tracing::warn!(metric = %metric.id, "Skipping invalid metric");
            return Ok(0);
        };
        // Ids are free-form; `/`, `?` and spaces must not split the route.
        let url = format!(
            "{}/update/{}/{}/{}",
            self.base_url,
            metric.kind,
            urlencoding::encode(&metric.id),
            value
        );
        let sender = self;
        let url = url.as_str();
        self.retry
            .execute("send_path", is_transient_transport_error, cancel, move || {
                sender.post(url, None)
            })
            .await?;
        Ok(1)
    }

    fn encode<T: serde::Serialize + ?Sized>(
        &self,
        payload: &T,
    ) -> Result<Vec<u8>, RetryError<SendError>> {
        let failed = |operation: &str, source: SendError| RetryError::Failed {
            operation: operation.to_string(),
            attempts: 0,
            transient: false,
            source,
        };
        let json = serde_json::to_vec(payload).map_err(|e| failed("encode", e.into()))?;
        gzip(&json).map_err(|e| failed("compress", e))
    }

    async fn retried(
        &self,
        operation: &str,
        cancel: &CancellationToken,
        url: &str,
        body: &[u8],
    ) -> Result<(), RetryError<SendError>> {
        let sender = self;
        self.retry
            .execute(operation, is_transient_transport_error, cancel, move || {
                sender.post(url, Some(body))
            })
            .await
    }

    async fn post(&self, url: &str, gzip_json: Option<&[u8]>) -> Result<(), SendError> {
        let request = match gzip_json {
            Some(body) => self
                .client
                .post(url)
                .header(CONTENT_TYPE, "application/json")
                .header(CONTENT_ENCODING, "gzip")
                .body(body.to_vec()),
            None => self.client.post(url).header(CONTENT_TYPE, "text/plain"),
        };
        // The gzip feature adds `Accept-Encoding: gzip` and inflates replies.
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(SendError::Status {
            status,
            body: body.trim().to_string(),
        })
    }
}

/// Something the report loop can hand a flushed buffer to.
#[async_trait]
pub trait MetricReporter: Send + Sync {
    /// Delivers `metrics`, returning how many were sent.
    async fn report(
        &self,
        metrics: Vec<Metric>,
        cancel: &CancellationToken,
    ) -> Result<usize, RetryError<SendError>>;
}

#[async_trait]
impl MetricReporter for Sender {
    async fn report(
        &self,
        metrics: Vec<Metric>,
        cancel: &CancellationToken,
    ) -> Result<usize, RetryError<SendError>> {
        match self.mode {
            ReportMode::Batch => self.send_batch(&metrics, cancel).await,
            ReportMode::Json => {
                let mut sent = 0;
                for metric in &metrics {
                    sent += self.send_single(metric, cancel).await?;
                }
                Ok(sent)
            }
            ReportMode::Path => {
                let mut sent = 0;
                for metric in &metrics {
                    sent += self.send_path(metric, cancel).await?;
                }
                Ok(sent)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Bytes;
    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode as AxumStatus, Uri};
    use axum::Router;
    use flate2::read::GzDecoder;
    use pulsemon_common::retry::RetryPolicy;
    use std::io::Read;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone)]
    struct Captured {
        path: String,
        content_type: Option<String>,
        content_encoding: Option<String>,
        accept_encoding: Option<String>,
        body: Vec<u8>,
    }

    #[derive(Clone)]
    struct Recorder {
        requests: Arc<Mutex<Vec<Captured>>>,
        status: AxumStatus,
    }

    async fn record(
        State(recorder): State<Recorder>,
        uri: Uri,
        headers: HeaderMap,
        body: Bytes,
    ) -> AxumStatus {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        recorder.requests.lock().unwrap().push(Captured {
            path: uri.path().to_string(),
            content_type: header("content-type"),
            content_encoding: header("content-encoding"),
            accept_encoding: header("accept-encoding"),
            body: body.to_vec(),
        });
        recorder.status
    }

    async fn spawn_server(status: AxumStatus) -> (String, Arc<Mutex<Vec<Captured>>>) {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new().fallback(record).with_state(Recorder {
            requests: requests.clone(),
            status,
        });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), requests)
    }

    fn sender(base_url: &str, mode: ReportMode) -> Sender {
        let retry = RetryExecutor::new(RetryPolicy::new(3, vec![Duration::from_millis(10)]));
        Sender::new(base_url, Duration::from_secs(4), retry, mode).unwrap()
    }

    fn gunzip(data: &[u8]) -> serde_json::Value {
        let mut text = String::new();
        GzDecoder::new(data).read_to_string(&mut text).unwrap();
        serde_json::from_str(&text).unwrap()
    }

    #[tokio::test]
    async fn batch_is_one_gzip_json_array() {
        let (base_url, requests) = spawn_server(AxumStatus::OK).await;
        let token = CancellationToken::new();
        let mut broken = Metric::counter("Broken", 1);
        broken.delta = None;
        let metrics = vec![Metric::counter("X", 5), broken, Metric::gauge("Y", 1.5)];

        let sent = sender(&base_url, ReportMode::Batch)
            .report(metrics, &token)
            .await
            .unwrap();
        assert_eq!(sent, 2);

        let requests = requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        let request = &requests[0];
        assert_eq!(request.path, "/updates/");
        assert_eq!(request.content_type.as_deref(), Some("application/json"));
        assert_eq!(request.content_encoding.as_deref(), Some("gzip"));
        assert!(request.accept_encoding.as_deref().unwrap_or("").contains("gzip"));
        assert_eq!(
            gunzip(&request.body),
            serde_json::json!([
                {"id": "X", "type": "counter", "delta": 5},
                {"id": "Y", "type": "gauge", "value": 1.5}
            ])
        );
    }

    #[tokio::test]
    async fn json_mode_posts_each_metric() {
        let (base_url, requests) = spawn_server(AxumStatus::OK).await;
        let token = CancellationToken::new();
        let metrics = vec![Metric::gauge("Alloc", 2.0), Metric::counter("PollCount", 1)];

        let sent = sender(&base_url, ReportMode::Json)
            .report(metrics, &token)
            .await
            .unwrap();
        assert_eq!(sent, 2);

        let requests = requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert!(requests.iter().all(|r| r.path == "/update/"));
        assert_eq!(
            gunzip(&requests[1].body),
            serde_json::json!({"id": "PollCount", "type": "counter", "delta": 1})
        );
    }

    #[tokio::test]
    async fn path_mode_encodes_metric_in_url() {
        let (base_url, requests) = spawn_server(AxumStatus::OK).await;
        let token = CancellationToken::new();
        let metrics = vec![Metric::gauge("Alloc", 123.5), Metric::counter("PollCount", 2)];

        sender(&base_url, ReportMode::Path)
            .report(metrics, &token)
            .await
            .unwrap();

        let paths: Vec<String> = requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.path.clone())
            .collect();
        assert_eq!(
            paths,
            vec!["/update/gauge/Alloc/123.5", "/update/counter/PollCount/2"]
        );
    }

    #[tokio::test]
    async fn path_mode_escapes_reserved_characters_in_ids() {
        let (base_url, requests) = spawn_server(AxumStatus::OK).await;
        let token = CancellationToken::new();

        sender(&base_url, ReportMode::Path)
            .report(vec![Metric::gauge("Heap Alloc/rss?x", 1.0)], &token)
            .await
            .unwrap();

        let requests = requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].path, "/update/gauge/Heap%20Alloc%2Frss%3Fx/1");
    }

    #[tokio::test]
    async fn non_success_status_is_terminal() {
        let (base_url, requests) = spawn_server(AxumStatus::BAD_REQUEST).await;
        let token = CancellationToken::new();

        let err = sender(&base_url, ReportMode::Batch)
            .send_batch(&[Metric::gauge("Alloc", 1.0)], &token)
            .await
            .unwrap_err();

        assert_eq!(err.attempts(), 1);
        assert!(matches!(
            err.last_error(),
            Some(SendError::Status { status, .. }) if *status == StatusCode::BAD_REQUEST
        ));
        assert_eq!(requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn all_invalid_batch_sends_nothing() {
        let token = CancellationToken::new();
        let mut broken = Metric::gauge("Alloc", 1.0);
        broken.value = None;
        // Nothing listens here; any request would fail.
        let sent = sender("http://127.0.0.1:9", ReportMode::Batch)
            .send_batch(&[broken], &token)
            .await
            .unwrap();
        assert_eq!(sent, 0);
    }

    #[tokio::test]
    async fn refused_connection_is_retried_then_reported() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let token = CancellationToken::new();
        let err = sender(&format!("http://{addr}"), ReportMode::Batch)
            .send_batch(&[Metric::gauge("Alloc", 1.0)], &token)
            .await
            .unwrap_err();

        assert_eq!(err.attempts(), 3);
        assert!(matches!(err, RetryError::Failed { transient: true, .. }));
        assert!(err.to_string().contains("send_batch"));
    }

    #[test]
    fn classifier_reads_the_source_chain() {
        #[derive(Debug, thiserror::Error)]
        #[error("request failed")]
        struct Wrapper(#[source] std::io::Error);

        let reset = Wrapper(std::io::Error::new(ErrorKind::ConnectionReset, "os error 104"));
        assert!(chain_is_transient(&reset));

        let eof = std::io::Error::new(ErrorKind::Other, "unexpected EOF during handshake");
        assert!(chain_is_transient(&eof));

        let denied = std::io::Error::new(ErrorKind::PermissionDenied, "forbidden");
        assert!(!chain_is_transient(&denied));

        let status = SendError::Status {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: String::new(),
        };
        assert!(!is_transient_transport_error(&status));
    }
}
