pub mod actuator;
pub mod capture;
pub mod client;
pub mod config;
pub mod emotion;
pub mod inference;
pub mod oracle;
pub mod perception;
pub mod pipeline;
pub mod rate_limit;
pub mod service;
pub mod util;
