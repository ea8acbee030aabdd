use crate::dns::flush::FlushError;

/// Why a trace produced no timing result.
#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    #[error("failed to flush DNS: {0}")]
    DnsFlushFailed(#[from] FlushError),
    #[error("{0:#}")]
    RequestFailed(anyhow::Error),
}
