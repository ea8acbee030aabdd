use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// A network milestone reported by the transport while a request is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    DnsStart,
    DnsDone,
    ConnectStart,
    ConnectDone,
    TlsStart,
    TlsDone,
    ConnectionObtained,
    FirstResponseByte,
}

/// Wall-clock instants captured by the phase hooks of a single trace.
///
/// A field stays `None` when its hook never fired: no DNS phases for an IP
/// literal host, no TLS phases for plaintext HTTP.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PhaseTimestamps {
    pub dns_start: Option<DateTime<Utc>>,
    pub dns_done: Option<DateTime<Utc>>,
    pub connect_start: Option<DateTime<Utc>>,
    pub connect_done: Option<DateTime<Utc>>,
    pub tls_start: Option<DateTime<Utc>>,
    pub tls_done: Option<DateTime<Utc>>,
    pub connection_obtained: Option<DateTime<Utc>>,
    pub first_response_byte: Option<DateTime<Utc>>,
}

impl PhaseTimestamps {
    /// Stamps `at` into the slot for `phase`, replacing any earlier value.
    pub fn record(&mut self, phase: Phase, at: DateTime<Utc>) {
        let slot = match phase {
            Phase::DnsStart => &mut self.dns_start,
            Phase::DnsDone => &mut self.dns_done,
            Phase::ConnectStart => &mut self.connect_start,
            Phase::ConnectDone => &mut self.connect_done,
            Phase::TlsStart => &mut self.tls_start,
            Phase::TlsDone => &mut self.tls_done,
            Phase::ConnectionObtained => &mut self.connection_obtained,
            Phase::FirstResponseByte => &mut self.first_response_byte,
        };
        *slot = Some(at);
    }
}

/// Millisecond durations derived from one trace.
///
/// A phase whose hooks did not both fire is reported as `None` and serialized
/// as `null`, never as zero or a negative number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraceResult {
    pub dns_lookup_ms: Option<i64>,
    pub tcp_connect_ms: Option<i64>,
    pub tls_handshake_ms: Option<i64>,
    pub time_to_first_byte_ms: Option<i64>,
    pub total_time_ms: i64,
}

impl TraceResult {
    /// `t0` is taken just before the request is issued, `t1` once the body is drained.
    pub fn derive(stamps: &PhaseTimestamps, t0: DateTime<Utc>, t1: DateTime<Utc>) -> Self {
        Self {
            dns_lookup_ms: millis_between(stamps.dns_start, stamps.dns_done),
            tcp_connect_ms: millis_between(stamps.connect_start, stamps.connect_done),
            tls_handshake_ms: millis_between(stamps.tls_start, stamps.tls_done),
            time_to_first_byte_ms: millis_between(Some(t0), stamps.first_response_byte),
            total_time_ms: (t1 - t0).num_milliseconds(),
        }
    }
}

fn millis_between(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Option<i64> {
    Some((end? - start?).num_milliseconds())
}

impl fmt::Display for TraceResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rows = [
            ("DNS lookup", self.dns_lookup_ms),
            ("TCP connect", self.tcp_connect_ms),
            ("TLS handshake", self.tls_handshake_ms),
            ("First byte", self.time_to_first_byte_ms),
            ("Total time", Some(self.total_time_ms)),
        ];
        write!(f, "Time breakdown:")?;
        for (label, value) in rows {
            match value {
                Some(ms) => write!(f, " {}={}ms", label, ms)?,
                None => write!(f, " {}=N/A", label)?,
            }
        }
        Ok(())
    }
}
