use crate::cli::app_config::Cli;
use crate::dns::flush::{CacheFlusher, NoopFlusher, SystemFlusher};
use crate::http::timing_connector::TimingConnector;
use crate::http::tracer::{ClientPolicy, Tracer};
use crate::server::serve;
use crate::tls::config::client_config;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

pub async fn main_with_error() -> Result<(), anyhow::Error> {
    let cli: Cli = Cli::parse();
    init_logging(cli.verbosity)?;

    let connector = TimingConnector::new(client_config(
        cli.skip_certificate_validate,
        cli.certificate_path_option.as_deref(),
    )?);
    let policy = client_policy(&cli);

    if cli.no_dns_flush {
        warn!("DNS cache flushing disabled, lookups may be served from a warm cache");
        run_server(&cli, Tracer::new(NoopFlusher, connector, policy)).await
    } else {
        let flusher = SystemFlusher::for_host_os();
        info!("Flushing DNS cache before each trace with `{}`", flusher.command_line());
        run_server(&cli, Tracer::new(flusher, connector, policy)).await
    }
}

fn init_logging(verbosity: u8) -> Result<(), anyhow::Error> {
    let log_level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let filter = EnvFilter::builder()
        .with_default_directive(log_level.into())
        .from_env_lossy()
        .add_directive("hyper_util=off".parse()?);
    let subscriber = tracing_subscriber::fmt()
        .with_level(true)
        .with_target(false)
        .with_span_events(FmtSpan::NONE)
        .with_env_filter(filter)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
    Ok(())
}

fn client_policy(cli: &Cli) -> ClientPolicy {
    ClientPolicy {
        timeout: Duration::from_secs(cli.timeout_secs),
        follow_redirects: !cli.no_follow_redirects,
        max_redirects: cli.max_redirects,
    }
}

async fn run_server<F: CacheFlusher>(cli: &Cli, tracer: Tracer<F>) -> Result<(), anyhow::Error> {
    let addr = format!("{}:{}", cli.bind_addr, cli.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(
        "Server running on http://{} (timeout {:?}, follow redirects: {})",
        listener.local_addr()?,
        tracer.policy().timeout,
        tracer.policy().follow_redirects
    );

    tokio::select! {
        _ = serve(listener, Arc::new(tracer)) => Ok(()),
        res = tokio::signal::ctrl_c() => {
            res?;
            info!("Shutting down");
            Ok(())
        }
    }
}
