use thiserror::Error;

/// Why a message to another actor did not produce an answer. Callers in the cluster treat every
/// variant as "no answer yet".
#[derive(Debug, Error)]
pub enum RemotingError {
  #[error("request timed out")]
  Timeout,

  #[error("no member is connected at {0}")]
  Unreachable(String),

  #[error("reply channel closed before a response arrived")]
  Closed,

  #[error("codec error: {0}")]
  Codec(#[from] serde_cbor::Error),
}
