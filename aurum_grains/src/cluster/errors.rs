use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SpawnError {
  #[error("kind {0} is not registered on this member")]
  UnknownKind(String),
}
