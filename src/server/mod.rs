pub mod handler;

use crate::dns::flush::CacheFlusher;
use crate::http::tracer::Tracer;
use crate::server::handler::route;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::Instrument;

/// Accepts connections forever, serving each on its own task.
pub async fn serve<F: CacheFlusher>(listener: TcpListener, tracer: Arc<Tracer<F>>) {
    loop {
        let (stream, remote_addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("Failed to accept connection: {}", e);
                continue;
            }
        };
        let tracer = tracer.clone();
        tokio::spawn(
            async move {
                let service = service_fn(move |req| route(req, tracer.clone()));
                if let Err(err) = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await
                {
                    debug!("Connection failed: {:?}", err);
                }
            }
            .instrument(info_span!("conn", remoteAddr = %remote_addr)),
        );
    }
}
