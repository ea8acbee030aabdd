use crate::dns::flush::CacheFlusher;
use crate::error::TraceError;
use crate::http::observer::{PhaseRecorder, SharedObserver};
use crate::http::timing_connector::{Endpoint, TimingConnector};
use crate::timing::{PhaseTimestamps, TraceResult};
use anyhow::Context;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use http_body_util::{BodyExt, Empty};
use hyper::body::Incoming;
use hyper::client::conn::http1;
use hyper::header::{ACCEPT, HOST, LOCATION, USER_AGENT};
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::time::Duration;
use tokio::time::timeout;
use tracing::Instrument;
use url::Url;

/// Client behaviour that would otherwise be left to library defaults.
#[derive(Debug, Clone)]
pub struct ClientPolicy {
    /// Deadline for the whole trace: connect, request, redirects and body drain.
    pub timeout: Duration,
    pub follow_redirects: bool,
    pub max_redirects: u8,
}

impl Default for ClientPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            follow_redirects: true,
            max_redirects: 10,
        }
    }
}

/// Everything one trace observed before it is reduced to a `TraceResult`.
#[derive(Debug, Clone)]
pub struct TraceRun {
    pub stamps: PhaseTimestamps,
    pub t0: DateTime<Utc>,
    pub t1: DateTime<Utc>,
    pub status: StatusCode,
}

pub struct Tracer<F> {
    flusher: F,
    connector: TimingConnector,
    policy: ClientPolicy,
}

impl<F: CacheFlusher> Tracer<F> {
    pub fn new(flusher: F, connector: TimingConnector, policy: ClientPolicy) -> Self {
        Self {
            flusher,
            connector,
            policy,
        }
    }

    pub fn policy(&self) -> &ClientPolicy {
        &self.policy
    }

    /// Flushes the DNS cache, issues one GET against `url` and reports its phase durations.
    pub async fn trace(&self, url: &str) -> Result<TraceResult, TraceError> {
        let span = info_span!("trace", url = %url);
        async move {
            let run = self.run(url).await?;
            let result = TraceResult::derive(&run.stamps, run.t0, run.t1);
            info!("{} {}", run.status, result);
            Ok(result)
        }
        .instrument(span)
        .await
    }

    pub async fn run(&self, url: &str) -> Result<TraceRun, TraceError> {
        self.flusher.flush().await?;

        let t0 = Utc::now();
        let (status, stamps) = timeout(self.policy.timeout, self.fetch(url))
            .await
            .map_err(|_| {
                TraceError::RequestFailed(anyhow!(
                    "request timed out after {:?}",
                    self.policy.timeout
                ))
            })?
            .map_err(TraceError::RequestFailed)?;
        let t1 = Utc::now();

        Ok(TraceRun {
            stamps,
            t0,
            t1,
            status,
        })
    }

    /// Follows redirects and returns the final status with the stamps of the final hop only.
    async fn fetch(&self, url: &str) -> Result<(StatusCode, PhaseTimestamps), anyhow::Error> {
        let mut current_url: Url = url
            .parse()
            .with_context(|| format!("parse {:?}", url))?;
        let mut redirects = 0u8;

        loop {
            let endpoint = Endpoint::from_url(&current_url)?;
            let request = build_request(&current_url, &endpoint)?;
            let recorder = PhaseRecorder::new();
            let res = self
                .send(&endpoint, request, recorder.clone())
                .await
                .with_context(|| format!("Get {:?}", current_url.as_str()))?;

            let status = res.status();
            let location = res
                .headers()
                .get(LOCATION)
                .map(|v| v.to_str().map(str::to_string));
            if self.policy.follow_redirects && is_followed_redirect(status) {
                if let Some(location) = location {
                    ensure!(
                        redirects < self.policy.max_redirects,
                        "stopped after {} redirects",
                        self.policy.max_redirects
                    );
                    redirects += 1;
                    current_url = current_url.join(&location?)?;
                    debug!(
                        "Redirecting to: {current_url} ({redirects}/{})",
                        self.policy.max_redirects
                    );
                    continue;
                }
            }

            let drained = drain(res).await?;
            debug!("Drained {} body bytes", drained);
            return Ok((status, recorder.snapshot()));
        }
    }

    async fn send(
        &self,
        endpoint: &Endpoint,
        request: Request<Empty<Bytes>>,
        observer: SharedObserver,
    ) -> Result<Response<Incoming>, anyhow::Error> {
        let stream = self.connector.connect(endpoint, observer).await?;
        let (mut sender, conn) = http1::handshake(TokioIo::new(stream)).await?;
        tokio::spawn(
            async move {
                if let Err(err) = conn.await {
                    debug!("Connection closed with error: {:?}", err);
                }
            }
            .instrument(info_span!("conn").or_current()),
        );

        debug!(
            "> {} {} {:?}",
            request.method(),
            request.uri(),
            request.version()
        );
        let res = sender.send_request(request).await?;
        debug!("< {:?} {}", res.version(), res.status());
        Ok(res)
    }
}

fn build_request(url: &Url, endpoint: &Endpoint) -> Result<Request<Empty<Bytes>>, anyhow::Error> {
    let origin_form = match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    };
    let request = Request::builder()
        .method(Method::GET)
        .uri(origin_form)
        .header(HOST, endpoint.authority())
        .header(ACCEPT, "*/*")
        .header(USER_AGENT, concat!("httptrace/", env!("CARGO_PKG_VERSION")))
        .body(Empty::new())?;
    Ok(request)
}

fn is_followed_redirect(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::SEE_OTHER
            | StatusCode::TEMPORARY_REDIRECT
            | StatusCode::PERMANENT_REDIRECT
    )
}

/// Reads the body to the end and throws it away, returning the byte count.
async fn drain(res: Response<Incoming>) -> Result<u64, anyhow::Error> {
    let mut body = res.into_body();
    let mut total = 0u64;
    while let Some(frame) = body.frame().await {
        if let Ok(data) = frame?.into_data() {
            total += data.len() as u64;
        }
    }
    Ok(total)
}
