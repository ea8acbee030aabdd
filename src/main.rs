#[macro_use]
extern crate anyhow;
#[macro_use]
extern crate tracing;

mod app;
mod cli;
mod dns;
mod error;
mod http;
mod server;
#[cfg(test)]
mod test_support;
mod timing;
mod tls;

use crate::app::run::main_with_error;

#[tokio::main]
async fn main() {
    if let Err(e) = main_with_error().await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
