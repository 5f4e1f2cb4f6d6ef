//! Logging, and the knobs that make a [`Switchboard`](crate::core::Switchboard) unreliable.

mod failure_config;
mod logging;

#[rustfmt::skip]
pub use {
  failure_config::FailureConfig,
  failure_config::FailureConfigMap,
  logging::Logger,
  logging::LoggerMsg,
  logging::LogLevel,
};
