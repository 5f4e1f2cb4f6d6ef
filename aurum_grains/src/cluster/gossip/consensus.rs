use crate::cluster::gossip::GossipState;
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::fmt;
use tokio::sync::watch;
use uuid::Uuid;

/// Decides whether the members in the given set agree, and on what. Values are the raw encoded
/// gossip values.
pub type ConsensusPredicate =
  Box<dyn Fn(&GossipState, &HashSet<String>) -> Option<Vec<u8>> + Send>;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConsensusReached {
  pub id: String,
  pub value: Vec<u8>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ConsensusUpdate {
  Reached(ConsensusReached),
  Lost { id: String },
}

/// A predicate over gossip state, evaluated whenever one of its keys or the membership changes.
/// Updates are edge triggered: a check that stays satisfied with the same value reports nothing.
pub struct ConsensusCheck {
  id: String,
  affected_keys: Vec<String>,
  predicate: ConsensusPredicate,
  current: Option<Vec<u8>>,
  tx: watch::Sender<Option<Vec<u8>>>,
}
impl ConsensusCheck {
  pub fn new<F>(
    id: impl Into<String>,
    affected_keys: Vec<String>,
    predicate: F,
  ) -> (ConsensusCheck, ConsensusHandle)
  where
    F: Fn(&GossipState, &HashSet<String>) -> Option<Vec<u8>> + Send + 'static,
  {
    let id = id.into();
    let (tx, rx) = watch::channel(None);
    let check = ConsensusCheck {
      id: id.clone(),
      affected_keys: affected_keys,
      predicate: Box::new(predicate),
      current: None,
      tx: tx,
    };
    (check, ConsensusHandle { id: id, rx: rx })
  }

  pub fn id(&self) -> &str {
    &self.id
  }

  pub fn affected_keys(&self) -> &[String] {
    &self.affected_keys
  }

  pub fn evaluate(
    &mut self,
    state: &GossipState,
    members: &HashSet<String>,
  ) -> Option<ConsensusUpdate> {
    let next = (self.predicate)(state, members);
    if next == self.current {
      return None;
    }
    self.current = next.clone();
    self.tx.send_replace(next.clone());
    Some(match next {
      Some(value) => ConsensusUpdate::Reached(ConsensusReached {
        id: self.id.clone(),
        value: value,
      }),
      None => ConsensusUpdate::Lost {
        id: self.id.clone(),
      },
    })
  }
}
impl Drop for ConsensusCheck {
  fn drop(&mut self) {
    self.tx.send_replace(None);
  }
}
impl fmt::Debug for ConsensusCheck {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ConsensusCheck")
      .field("id", &self.id)
      .field("affected_keys", &self.affected_keys)
      .field("current", &self.current)
      .finish()
  }
}

/// Observes the outcome of a [`ConsensusCheck`] from outside the gossip actor.
#[derive(Clone, Debug)]
pub struct ConsensusHandle {
  id: String,
  rx: watch::Receiver<Option<Vec<u8>>>,
}
impl ConsensusHandle {
  pub fn id(&self) -> &str {
    &self.id
  }

  /// The agreed value, if the members currently agree and it decodes as `T`.
  pub fn try_get_consensus<T: DeserializeOwned>(&self) -> Option<T> {
    let current = self.rx.borrow();
    serde_cbor::from_slice(current.as_ref()?).ok()
  }

  /// Resolves once the members agree. `None` if the check was removed first.
  pub async fn wait_consensus<T: DeserializeOwned>(&self) -> Option<T> {
    let mut rx = self.rx.clone();
    loop {
      let decoded = rx
        .borrow()
        .as_ref()
        .and_then(|bytes| serde_cbor::from_slice(bytes).ok());
      if decoded.is_some() {
        return decoded;
      }
      if rx.changed().await.is_err() {
        return None;
      }
    }
  }
}

/// Satisfied when every member has a value for `key` and all of them are equal.
pub fn all_members_agree(
  key: String,
) -> impl Fn(&GossipState, &HashSet<String>) -> Option<Vec<u8>> + Send + 'static {
  move |state, members| {
    let mut agreed: Option<&Vec<u8>> = None;
    for member in members {
      let value = &state.get(member, &key)?.value;
      match agreed {
        Some(v) if v != value => return None,
        _ => agreed = Some(value),
      }
    }
    agreed.cloned()
  }
}

pub struct ConsensusCheckBuilder {
  id: Option<String>,
  keys: Vec<String>,
}
impl ConsensusCheckBuilder {
  pub fn new(key: impl Into<String>) -> ConsensusCheckBuilder {
    ConsensusCheckBuilder {
      id: None,
      keys: vec![key.into()],
    }
  }

  pub fn with_id(mut self, id: impl Into<String>) -> ConsensusCheckBuilder {
    self.id = Some(id.into());
    self
  }

  pub fn build(self) -> (ConsensusCheck, ConsensusHandle) {
    let id = self.id.unwrap_or_else(|| Uuid::new_v4().to_string());
    let predicate = all_members_agree(self.keys[0].clone());
    ConsensusCheck::new(id, self.keys, predicate)
  }
}

#[cfg(test)]
fn state_with(values: &[(&str, &str, &[u8])]) -> GossipState {
  use crate::cluster::gossip::{GossipKeyValue, GossipMemberState};
  let mut state = GossipState::default();
  for (member, key, value) in values {
    let entry = state
      .members
      .entry(member.to_string())
      .or_insert_with(GossipMemberState::default);
    entry.values.insert(
      key.to_string(),
      GossipKeyValue {
        sequence_number: 1,
        value: value.to_vec(),
        local_timestamp_ms: 0,
      },
    );
  }
  state
}

#[cfg(test)]
fn members_of(ids: &[&str]) -> HashSet<String> {
  ids.iter().map(|s| s.to_string()).collect()
}

#[test]
fn test_all_members_agree() {
  let agree = all_members_agree("k".to_string());
  let state = state_with(&[("a", "k", b"1"), ("b", "k", b"1"), ("c", "k", b"2")]);
  assert_eq!(agree(&state, &members_of(&["a", "b"])), Some(b"1".to_vec()));
  assert_eq!(agree(&state, &members_of(&["a", "b", "c"])), None);
  assert_eq!(agree(&state, &members_of(&["a", "d"])), None);
  assert_eq!(agree(&state, &members_of(&[])), None);
}

#[test]
fn test_consensus_is_edge_triggered() {
  let (mut check, handle) = ConsensusCheckBuilder::new("k").with_id("c1").build();
  let members = members_of(&["a", "b"]);
  let split = state_with(&[("a", "k", b"1")]);
  assert_eq!(check.evaluate(&split, &members), None);

  let agreed = state_with(&[("a", "k", b"1"), ("b", "k", b"1")]);
  let reached = check.evaluate(&agreed, &members);
  assert_eq!(
    reached,
    Some(ConsensusUpdate::Reached(ConsensusReached {
      id: "c1".to_string(),
      value: b"1".to_vec(),
    }))
  );
  for _ in 0..3 {
    assert_eq!(check.evaluate(&agreed, &members), None);
  }
  assert_eq!(
    check.evaluate(&split, &members),
    Some(ConsensusUpdate::Lost {
      id: "c1".to_string()
    })
  );
  assert!(handle.try_get_consensus::<u64>().is_none());
}

#[test]
fn test_consensus_handle_decodes_value() {
  let (mut check, handle) = ConsensusCheckBuilder::new("hash").build();
  let encoded = serde_cbor::to_vec(&42u64).unwrap();
  let state = state_with(&[("a", "hash", &encoded[..]), ("b", "hash", &encoded[..])]);
  assert!(check.evaluate(&state, &members_of(&["a", "b"])).is_some());
  assert_eq!(handle.try_get_consensus::<u64>(), Some(42));
  let waited = tokio_test::block_on(handle.wait_consensus::<u64>());
  assert_eq!(waited, Some(42));

  drop(check);
  assert!(handle.try_get_consensus::<u64>().is_none());
  assert_eq!(tokio_test::block_on(handle.wait_consensus::<u64>()), None);
}
