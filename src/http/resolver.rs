use crate::http::observer::PhaseObserver;
use crate::timing::Phase;
use std::net::{SocketAddr, ToSocketAddrs};

/// Resolves through the system resolver, whose cache the flusher clears.
#[derive(Clone, Debug, Default)]
pub struct SystemResolver;

impl SystemResolver {
    pub fn new() -> Self {
        Self
    }

    pub async fn resolve(
        &self,
        host: &str,
        port: u16,
        observer: &dyn PhaseObserver,
    ) -> Result<Vec<SocketAddr>, anyhow::Error> {
        let host = host.to_string();
        debug!("Resolving DNS for: {}", &host);

        observer.on_phase(Phase::DnsStart);
        let lookup_host = host.clone();
        let result = tokio::task::spawn_blocking(move || (lookup_host.as_str(), port).to_socket_addrs())
            .await?;
        observer.on_phase(Phase::DnsDone);

        let addresses: Vec<SocketAddr> = result
            .map_err(|e| anyhow!("dns lookup of {} failed: {}", host, e))?
            .collect();
        if addresses.is_empty() {
            error!("DNS resolution for {} returned no addresses.", &host);
            return Err(anyhow!("no IP addresses found for host {}", host));
        }

        for (i, addr) in addresses.iter().enumerate() {
            if i == 0 {
                debug!("Resolved IP: {}", addr.ip());
            } else {
                debug!("Resolved IP (alternative): {}", addr.ip());
            }
        }
        Ok(addresses)
    }
}
