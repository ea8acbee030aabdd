pub mod cert_verifier;
pub mod config;
