use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

#[derive(
  Clone, Debug, Deserialize, Eq, Hash, PartialEq, Ord, PartialOrd, Serialize,
)]
pub enum Host {
  DNS(String),
  IP(IpAddr),
}
impl fmt::Display for Host {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Host::DNS(s) => write!(f, "{}", s),
      Host::IP(ip) => write!(f, "{}", ip),
    }
  }
}
impl From<&str> for Host {
  fn from(s: &str) -> Host {
    match s.parse::<IpAddr>() {
      Ok(ip) => Host::IP(ip),
      Err(_) => Host::DNS(s.to_string()),
    }
  }
}

#[derive(
  Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize, Ord, PartialOrd,
)]
pub struct Socket {
  pub host: Host,
  pub port: u16,
}
impl Socket {
  pub fn new(host: Host, port: u16) -> Socket {
    Socket {
      host: host,
      port: port,
    }
  }
}
impl fmt::Display for Socket {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.host, self.port)
  }
}

#[test]
fn test_socket_display() {
  let ip = Socket::new(Host::from("127.0.0.1"), 5500);
  assert_eq!(ip.to_string(), "127.0.0.1:5500");
  assert!(matches!(ip.host, Host::IP(_)));
  let dns = Socket::new(Host::from("grains.local"), 80);
  assert_eq!(dns.to_string(), "grains.local:80");
}
