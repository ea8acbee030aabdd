use crate::dns::flush::{CacheFlusher, FlushError};
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::{HOST, LOCATION};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;

pub struct FailingFlusher;

impl CacheFlusher for FailingFlusher {
    async fn flush(&self) -> Result<(), FlushError> {
        Err(FlushError::Spawn {
            command: "flushdns".to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, "command not found"),
        })
    }
}

/// A local origin server counting the connections it accepted.
pub struct Origin {
    pub addr: SocketAddr,
    pub accepted: Arc<AtomicUsize>,
}

impl Origin {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

async fn respond(req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    let redirect = |to: &str| {
        Response::builder()
            .status(StatusCode::FOUND)
            .header(LOCATION, to)
            .body(Full::new(Bytes::new()))
            .unwrap()
    };
    let res = match req.uri().path() {
        "/redirect" => redirect("/"),
        "/loop" => redirect("/loop"),
        "/to-ip" => {
            let port = req
                .headers()
                .get(HOST)
                .and_then(|h| h.to_str().ok())
                .and_then(|h| h.rsplit(':').next())
                .unwrap_or("80");
            redirect(&format!("http://127.0.0.1:{port}/"))
        }
        "/no-location" => Response::builder()
            .status(StatusCode::FOUND)
            .body(Full::new(Bytes::new()))
            .unwrap(),
        "/large" => Response::new(Full::new(Bytes::from(vec![b'x'; 256 * 1024]))),
        _ => Response::new(Full::new(Bytes::from_static(b"hello"))),
    };
    Ok(res)
}

pub async fn spawn_origin() -> Origin {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = accepted.clone();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service_fn(respond))
                    .await;
            });
        }
    });
    Origin { addr, accepted }
}

/// Accepts connections and never answers.
pub async fn spawn_silent_origin() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    addr
}

/// Succeeds and counts how many traces reached the flush step.
#[derive(Default, Clone)]
pub struct CountingFlusher(pub Arc<AtomicUsize>);

impl CountingFlusher {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

impl CacheFlusher for CountingFlusher {
    async fn flush(&self) -> Result<(), FlushError> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
