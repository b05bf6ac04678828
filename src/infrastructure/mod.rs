//! Infrastructure: configuration, logging, and HTTP ingress.

pub mod config;
pub mod http;
pub mod logging;
