use serde::{Deserialize, Serialize};
use std::fmt;

/// The stable name of a grain: which kind of grain, and which one of that kind.
#[derive(
  Clone, Debug, Deserialize, Eq, Hash, PartialEq, Ord, PartialOrd, Serialize,
)]
pub struct ClusterIdentity {
  pub identity: String,
  pub kind: String,
}
impl ClusterIdentity {
  pub fn new(identity: impl Into<String>, kind: impl Into<String>) -> Self {
    ClusterIdentity {
      identity: identity.into(),
      kind: kind.into(),
    }
  }

  /// `<kind length>:<kind>/<identity>`. The length prefix keeps the encoding injective even when
  /// identities or kinds contain the separators.
  pub fn as_key(&self) -> String {
    format!("{}:{}/{}", self.kind.len(), self.kind, self.identity)
  }

  pub fn from_key(key: &str) -> Option<ClusterIdentity> {
    let (len, rest) = key.split_at(key.find(':')?);
    let len: usize = len.parse().ok()?;
    let rest = &rest[1..];
    let kind = rest.get(..len)?;
    let identity = rest.get(len..)?.strip_prefix('/')?;
    Some(ClusterIdentity::new(identity, kind))
  }
}
impl fmt::Display for ClusterIdentity {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}.{}", self.identity, self.kind)
  }
}

#[test]
fn test_keys_do_not_collide() {
  // Joined with a plain dot, both of these would be "a.b.c".
  let first = ClusterIdentity::new("a.b", "c");
  let second = ClusterIdentity::new("a", "b.c");
  assert_eq!(first.to_string(), second.to_string());
  assert_ne!(first.as_key(), second.as_key());
  assert_eq!(first.as_key(), "1:c/a.b");
  assert_eq!(second.as_key(), "3:b.c/a");
}

#[test]
fn test_key_round_trip_with_separators() {
  let ids = vec![
    ClusterIdentity::new("user-42", "UserGrain"),
    ClusterIdentity::new("x/y:z", "k:/"),
    ClusterIdentity::new("", ""),
  ];
  for id in ids {
    assert_eq!(ClusterIdentity::from_key(&id.as_key()), Some(id));
  }
  assert_eq!(ClusterIdentity::from_key("nope"), None);
  assert_eq!(ClusterIdentity::from_key("9:short/x"), None);
}
