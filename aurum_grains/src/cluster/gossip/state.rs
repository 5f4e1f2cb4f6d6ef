use im::OrdMap;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct GossipKeyValue {
  pub sequence_number: i64,
  pub value: Vec<u8>,
  /// When this member stored the entry, in milliseconds since the epoch. Not comparable across
  /// members.
  pub local_timestamp_ms: i64,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct GossipMemberState {
  pub values: OrdMap<String, GossipKeyValue>,
}

/// Member id to that member's state. Cloning is cheap, maps are shared structurally.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct GossipState {
  pub members: OrdMap<String, GossipMemberState>,
}
impl GossipState {
  pub fn get(&self, member_id: &str, key: &str) -> Option<&GossipKeyValue> {
    self.members.get(member_id)?.values.get(key)
  }
}

/// An entry that changed when merging remote state.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GossipUpdate {
  pub member_id: String,
  pub key: String,
  pub value: Vec<u8>,
  pub sequence_number: i64,
}

pub(crate) fn now_ms() -> i64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_millis() as i64)
    .unwrap_or(0)
}

/// Last writer wins by sequence number. Entries about `skip_member` are ignored, a member is the
/// only authority on its own state.
pub fn merge_state(
  local: &mut GossipState,
  remote: &GossipState,
  skip_member: &str,
  now_ms: i64,
) -> Vec<GossipUpdate> {
  let mut updates = Vec::new();
  for (member_id, remote_member) in remote.members.iter() {
    if member_id == skip_member {
      continue;
    }
    for (key, remote_value) in remote_member.values.iter() {
      let newer = local
        .get(member_id, key)
        .map_or(true, |v| v.sequence_number < remote_value.sequence_number);
      if !newer {
        continue;
      }
      let mut stored = remote_value.clone();
      stored.local_timestamp_ms = now_ms;
      let member = match local.members.get_mut(member_id) {
        Some(member) => member,
        None => {
          local
            .members
            .insert(member_id.clone(), GossipMemberState::default());
          match local.members.get_mut(member_id) {
            Some(member) => member,
            None => continue,
          }
        }
      };
      member.values.insert(key.clone(), stored);
      updates.push(GossipUpdate {
        member_id: member_id.clone(),
        key: key.clone(),
        value: remote_value.value.clone(),
        sequence_number: remote_value.sequence_number,
      });
    }
  }
  updates
}

#[cfg(test)]
fn entry(seq: i64, value: &[u8]) -> GossipKeyValue {
  GossipKeyValue {
    sequence_number: seq,
    value: value.to_vec(),
    local_timestamp_ms: 0,
  }
}

#[cfg(test)]
fn state_of(member: &str, values: Vec<(&str, GossipKeyValue)>) -> GossipState {
  let mut state = GossipState::default();
  state.members.insert(
    member.to_string(),
    GossipMemberState {
      values: values.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
    },
  );
  state
}

#[test]
fn test_merge_last_writer_wins() {
  let mut local = state_of("b", vec![("color", entry(3, b"red"))]);
  let stale = state_of("b", vec![("color", entry(2, b"blue"))]);
  assert!(merge_state(&mut local, &stale, "a", 10).is_empty());
  assert_eq!(local.get("b", "color").unwrap().value, b"red".to_vec());

  let fresh = state_of("b", vec![("color", entry(4, b"green")), ("size", entry(1, b"xl"))]);
  let updates = merge_state(&mut local, &fresh, "a", 20);
  assert_eq!(updates.len(), 2);
  assert_eq!(local.get("b", "color").unwrap().value, b"green".to_vec());
  assert_eq!(local.get("b", "size").unwrap().local_timestamp_ms, 20);
}

#[test]
fn test_merge_is_idempotent() {
  let mut local = GossipState::default();
  let remote = state_of("c", vec![("k", entry(1, b"v"))]);
  assert_eq!(merge_state(&mut local, &remote, "a", 1).len(), 1);
  assert!(merge_state(&mut local, &remote, "a", 2).is_empty());
  assert_eq!(local.get("c", "k").unwrap().local_timestamp_ms, 1);
}

#[test]
fn test_merge_ignores_own_state() {
  let mut local = state_of("a", vec![("k", entry(5, b"mine"))]);
  let remote = state_of("a", vec![("k", entry(9, b"theirs"))]);
  assert!(merge_state(&mut local, &remote, "a", 1).is_empty());
  assert_eq!(local.get("a", "k").unwrap().value, b"mine".to_vec());
}
