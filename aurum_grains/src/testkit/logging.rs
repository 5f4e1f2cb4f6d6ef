use crate::core::{Actor, ActorContext};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use LoggerMsg::*;

#[derive(
  Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum LogLevel {
  Trace,
  Debug,
  Info,
  Warn,
  Error,
  Fatal,
  Off,
}
impl LogLevel {
  pub const MIN: LogLevel = LogLevel::Trace;
}

pub enum LoggerMsg {
  Log(LogLevel, Box<dyn ToString + Send + 'static>),
  SetLevel(LogLevel),
}

/// Filters by level and forwards to `tracing`, tagged with the node's address.
pub struct Logger {
  level: LogLevel,
}
impl Logger {
  pub fn new(level: LogLevel) -> Self {
    Logger { level: level }
  }
}
#[async_trait]
impl Actor<LoggerMsg> for Logger {
  async fn recv(&mut self, ctx: &ActorContext<LoggerMsg>, msg: LoggerMsg) {
    match msg {
      Log(level, s) => {
        if level >= self.level {
          emit(level, &ctx.pid.address, s.to_string());
        }
      }
      SetLevel(level) => self.level = level,
    }
  }
}

fn emit(level: LogLevel, node: &str, msg: String) {
  match level {
    LogLevel::Trace => tracing::trace!(node = node, "{}", msg),
    LogLevel::Debug => tracing::debug!(node = node, "{}", msg),
    LogLevel::Info => tracing::info!(node = node, "{}", msg),
    LogLevel::Warn => tracing::warn!(node = node, "{}", msg),
    LogLevel::Error => tracing::error!(node = node, "{}", msg),
    LogLevel::Fatal => tracing::error!(node = node, fatal = true, "{}", msg),
    LogLevel::Off => {}
  }
}

#[macro_export]
macro_rules! log {
  ($msg_level:expr, $log_level:expr, $node:expr, $msg:expr) => {
    if $msg_level >= $log_level {
      $node.log($crate::testkit::LoggerMsg::Log(
        $msg_level,
        ::std::boxed::Box::new($msg),
      ));
    }
  };
}

#[macro_export]
macro_rules! trace {
  ($log_level:expr, $node:expr, $msg:expr) => {
    $crate::log!($crate::testkit::LogLevel::Trace, $log_level, $node, $msg)
  };
}

#[macro_export]
macro_rules! debug {
  ($log_level:expr, $node:expr, $msg:expr) => {
    $crate::log!($crate::testkit::LogLevel::Debug, $log_level, $node, $msg)
  };
}

#[macro_export]
macro_rules! info {
  ($log_level:expr, $node:expr, $msg:expr) => {
    $crate::log!($crate::testkit::LogLevel::Info, $log_level, $node, $msg)
  };
}

#[macro_export]
macro_rules! warn {
  ($log_level:expr, $node:expr, $msg:expr) => {
    $crate::log!($crate::testkit::LogLevel::Warn, $log_level, $node, $msg)
  };
}

#[macro_export]
macro_rules! error {
  ($log_level:expr, $node:expr, $msg:expr) => {
    $crate::log!($crate::testkit::LogLevel::Error, $log_level, $node, $msg)
  };
}

#[macro_export]
macro_rules! fatal {
  ($log_level:expr, $node:expr, $msg:expr) => {
    $crate::log!($crate::testkit::LogLevel::Fatal, $log_level, $node, $msg)
  };
}

#[test]
fn test_log_level_order() {
  assert!(LogLevel::MIN < LogLevel::Debug);
  assert!(LogLevel::Warn >= LogLevel::Info);
  assert!(LogLevel::Fatal < LogLevel::Off);
}
