use crate::core::{Node, RemotingError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// What actually crosses the switchboard. Payloads are encoded separately so the registry can
/// route an envelope without knowing the receiver's message type.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) enum Envelope {
  Message {
    dest: String,
    sender: String,
    payload: Vec<u8>,
  },
  Request {
    id: u64,
    dest: String,
    sender: String,
    payload: Vec<u8>,
  },
  Response {
    id: u64,
    payload: Vec<u8>,
  },
}
impl Envelope {
  pub fn serialize(&self) -> Result<Vec<u8>, RemotingError> {
    Ok(serde_cbor::to_vec(self)?)
  }

  pub fn deserialize(bytes: &[u8]) -> Result<Envelope, RemotingError> {
    Ok(serde_cbor::from_slice(bytes)?)
  }
}

/// A message from another member, still serialized.
pub struct Inbound {
  sender: String,
  payload: Vec<u8>,
  responder: Option<Responder>,
}
impl Inbound {
  pub(in crate::core) fn new(
    sender: String,
    payload: Vec<u8>,
    responder: Option<Responder>,
  ) -> Inbound {
    Inbound {
      sender: sender,
      payload: payload,
      responder: responder,
    }
  }

  /// Address of the member that sent this message.
  pub fn sender(&self) -> &str {
    &self.sender
  }

  pub fn decode<T: DeserializeOwned>(&self) -> Result<T, RemotingError> {
    Ok(serde_cbor::from_slice(&self.payload)?)
  }

  pub fn into_responder(self) -> Option<Responder> {
    self.responder
  }

  pub fn into_parts<T: DeserializeOwned>(
    self,
  ) -> Result<(T, Option<Responder>), RemotingError> {
    let msg = self.decode()?;
    Ok((msg, self.responder))
  }
}

/// Answers exactly one request. Dropping it without responding lets the requester time out.
pub struct Responder {
  node: Node,
  address: String,
  id: u64,
}
impl Responder {
  pub(in crate::core) fn new(node: Node, address: String, id: u64) -> Responder {
    Responder {
      node: node,
      address: address,
      id: id,
    }
  }

  pub fn respond<T: Serialize>(self, msg: &T) -> Result<(), RemotingError> {
    let env = Envelope::Response {
      id: self.id,
      payload: serde_cbor::to_vec(msg)?,
    };
    self.node.transmit(&self.address, &env)
  }
}
