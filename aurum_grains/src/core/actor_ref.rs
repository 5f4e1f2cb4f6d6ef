use crate::core::{local_actor_msg_convert, ActorSignal, LocalActorMsg};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

/// Location of an actor: the address of the member hosting it and its name in that member's
/// registry.
#[derive(
  Clone, Debug, Deserialize, Eq, Hash, PartialEq, Ord, PartialOrd, Serialize,
)]
pub struct Pid {
  pub address: String,
  pub id: String,
}
impl Pid {
  pub fn new(address: impl Into<String>, id: impl Into<String>) -> Pid {
    Pid {
      address: address.into(),
      id: id.into(),
    }
  }
}
impl fmt::Display for Pid {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}/{}", self.address, self.id)
  }
}

pub struct LocalRef<T> {
  pub(crate) func: Arc<dyn Fn(LocalActorMsg<T>) -> bool + Send + Sync>,
}
impl<T> Clone for LocalRef<T> {
  fn clone(&self) -> Self {
    LocalRef {
      func: self.func.clone(),
    }
  }
}
impl<T: Send + 'static> LocalRef<T> {
  /// Wraps a closure. Signals are not delivered to it.
  pub fn new<F>(f: F) -> LocalRef<T>
  where
    F: Fn(T) -> bool + Send + Sync + 'static,
  {
    LocalRef {
      func: Arc::new(move |msg| match msg {
        LocalActorMsg::Msg(item) => f(item),
        LocalActorMsg::Signal(_) => false,
      }),
    }
  }

  /// Accepts a single message, which completes the oneshot.
  pub fn once(tx: oneshot::Sender<T>) -> LocalRef<T> {
    let cell = Mutex::new(Some(tx));
    LocalRef::new(move |item| {
      let tx = match cell.lock() {
        Ok(mut guard) => guard.take(),
        Err(poisoned) => poisoned.into_inner().take(),
      };
      tx.map_or(false, |tx| tx.send(item).is_ok())
    })
  }

  pub fn send(&self, item: T) -> bool {
    (&self.func)(LocalActorMsg::Msg(item))
  }

  pub fn signal(&self, sig: ActorSignal) -> bool {
    (&self.func)(LocalActorMsg::Signal(sig))
  }

  pub fn transform<I: Send + 'static>(&self) -> LocalRef<I>
  where
    T: From<I>,
  {
    let func = self.func.clone();
    LocalRef {
      func: Arc::new(move |x: LocalActorMsg<I>| {
        func(local_actor_msg_convert(x))
      }),
    }
  }

  pub fn void() -> LocalRef<T> {
    LocalRef {
      func: Arc::new(|_| false),
    }
  }
}

#[test]
fn test_local_ref_once() {
  let (tx, mut rx) = oneshot::channel::<u32>();
  let r = LocalRef::once(tx);
  assert!(r.send(4));
  assert!(!r.send(5));
  assert!(!r.signal(ActorSignal::Term));
  assert_eq!(rx.try_recv(), Ok(4));
}

#[test]
fn test_local_ref_transform() {
  let (tx, mut rx) = oneshot::channel::<u64>();
  let r: LocalRef<u32> = LocalRef::<u64>::once(tx).transform();
  assert!(r.send(7));
  assert_eq!(rx.try_recv(), Ok(7u64));
  assert!(!LocalRef::<u32>::void().send(1));
}
