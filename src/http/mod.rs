pub mod observer;
pub mod resolver;
pub mod timing_connector;
pub mod tracer;
