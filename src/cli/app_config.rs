use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about)]
pub struct Cli {
    /// Address to listen on
    #[arg(long = "bind", env = "BIND_ADDR", default_value = "0.0.0.0")]
    pub bind_addr: String,
    /// Port to listen on
    #[arg(short = 'p', long, env = "PORT", default_value_t = 3000)]
    pub port: u16,
    /// Deadline for a whole trace, in seconds
    #[arg(long = "timeout", env = "TRACE_TIMEOUT_SECS", default_value_t = 30)]
    pub timeout_secs: u64,
    /// Report the first response instead of following redirects
    #[arg(long, env = "TRACE_NO_FOLLOW_REDIRECTS")]
    pub no_follow_redirects: bool,
    /// Maximum number of redirects followed per trace
    #[arg(long, env = "TRACE_MAX_REDIRECTS", default_value_t = 10)]
    pub max_redirects: u8,
    /// Do not flush the OS resolver cache before each trace
    #[arg(long, env = "TRACE_NO_DNS_FLUSH")]
    pub no_dns_flush: bool,
    /// Allow insecure server connections
    #[arg(short = 'k', long = "insecure")]
    pub skip_certificate_validate: bool,
    /// PEM bundle used instead of the built-in root certificates
    #[arg(short = 'c', long = "cacert", env = "TRACE_CACERT", value_name = "file")]
    pub certificate_path_option: Option<PathBuf>,
    ///  Make the operation more talkative
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbosity: u8,
}
