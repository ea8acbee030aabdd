use crate::http::observer::{PhaseObserver, SharedObserver};
use crate::http::resolver::SystemResolver;
use crate::timing::Phase;
use pki_types::ServerName;
use rustls::ClientConfig;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use url::{Host, Url};

/// Where a single hop connects to, taken from the request URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: Host<String>,
    pub port: u16,
    pub tls: bool,
}

impl Endpoint {
    pub fn from_url(url: &Url) -> Result<Self, anyhow::Error> {
        let tls = match url.scheme() {
            "https" => true,
            "http" => false,
            other => return Err(anyhow!("unsupported protocol scheme \"{}\"", other)),
        };
        let host = url
            .host()
            .ok_or_else(|| anyhow!("no host in request URL"))?
            .to_owned();
        let port = url
            .port_or_known_default()
            .ok_or_else(|| anyhow!("no port for request URL"))?;
        Ok(Self { host, port, tls })
    }

    /// Value for the `Host` header, omitting the scheme's default port.
    pub fn authority(&self) -> String {
        let default_port = if self.tls { 443 } else { 80 };
        if self.port == default_port {
            self.host.to_string()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Opens a fresh connection per call and reports every phase to the observer.
#[derive(Clone)]
pub struct TimingConnector {
    resolver: SystemResolver,
    tls: TlsConnector,
}

impl TimingConnector {
    pub fn new(tls_config: Arc<ClientConfig>) -> Self {
        Self {
            resolver: SystemResolver::new(),
            tls: TlsConnector::from(tls_config),
        }
    }

    pub async fn connect(
        &self,
        endpoint: &Endpoint,
        observer: SharedObserver,
    ) -> Result<FirstByteStream<MaybeTlsStream>, anyhow::Error> {
        let addrs = match &endpoint.host {
            Host::Domain(name) => {
                self.resolver
                    .resolve(name, endpoint.port, observer.as_ref())
                    .await?
            }
            Host::Ipv4(ip) => vec![SocketAddr::new(IpAddr::V4(*ip), endpoint.port)],
            Host::Ipv6(ip) => vec![SocketAddr::new(IpAddr::V6(*ip), endpoint.port)],
        };

        let tcp = connect_any(&addrs, observer.as_ref()).await?;
        let remote_addr = tcp.peer_addr()?;
        let local_addr = tcp.local_addr()?;
        debug!("Connected {} -> {}", local_addr, remote_addr);

        let stream = if endpoint.tls {
            let server_name = match &endpoint.host {
                Host::Domain(name) => ServerName::try_from(name.clone())
                    .map_err(|e| anyhow!("invalid server name {}: {}", name, e))?,
                Host::Ipv4(ip) => ServerName::from(IpAddr::V4(*ip)),
                Host::Ipv6(ip) => ServerName::from(IpAddr::V6(*ip)),
            };
            observer.on_phase(Phase::TlsStart);
            let handshake = self.tls.connect(server_name, tcp).await;
            observer.on_phase(Phase::TlsDone);
            let tls_stream =
                handshake.map_err(|e| anyhow!("tls handshake with {} failed: {}", remote_addr, e))?;
            let (_, session) = tls_stream.get_ref();
            debug!(
                "TLS established: version={:?} cipher={:?}",
                session.protocol_version(),
                session.negotiated_cipher_suite().map(|cs| cs.suite())
            );
            MaybeTlsStream::Tls(Box::new(tls_stream))
        } else {
            MaybeTlsStream::Plain(tcp)
        };

        observer.on_phase(Phase::ConnectionObtained);
        Ok(FirstByteStream::new(stream, observer))
    }
}

/// Tries each resolved address in order, stamping connect phases per attempt.
async fn connect_any(
    addrs: &[SocketAddr],
    observer: &dyn PhaseObserver,
) -> Result<TcpStream, anyhow::Error> {
    let mut last_err = None;
    for addr in addrs {
        observer.on_phase(Phase::ConnectStart);
        let attempt = TcpStream::connect(addr).await;
        observer.on_phase(Phase::ConnectDone);
        match attempt {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                return Ok(stream);
            }
            Err(e) => {
                debug!("Connect to {} failed: {}", addr, e);
                last_err = Some(anyhow!("dial tcp {}: {}", addr, e));
            }
        }
    }
    Err(last_err.unwrap_or_else(|| anyhow!("no addresses to connect to")))
}

pub enum MaybeTlsStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for MaybeTlsStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MaybeTlsStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_flush(cx),
            MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Reports `FirstResponseByte` on the first read that yields data.
pub struct FirstByteStream<S> {
    inner: S,
    observer: Option<SharedObserver>,
}

impl<S> FirstByteStream<S> {
    pub fn new(inner: S, observer: SharedObserver) -> Self {
        Self {
            inner,
            observer: Some(observer),
        }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for FirstByteStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let filled_before = buf.filled().len();
        let poll = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &poll {
            if buf.filled().len() > filled_before {
                if let Some(observer) = this.observer.take() {
                    observer.on_phase(Phase::FirstResponseByte);
                }
            }
        }
        poll
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for FirstByteStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
