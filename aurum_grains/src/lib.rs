//! Virtual actors (grains) for `aurum` clusters. A grain is addressed by a stable
//! [`ClusterIdentity`](crate::cluster::ClusterIdentity) and activated on demand on whichever member
//! owns it. Ownership follows rendezvous hashing over the current topology, and is handed over
//! between members when the topology changes. Members share loosely consistent facts (heartbeats,
//! topology hashes, anything the application sets) through gossip.
//!
//! - [`core`]: the actor runtime the cluster is built on.
//! - [`cluster`]: partitioning, placement, handover and gossip.
//! - [`testkit`]: logging and failure injection.

pub mod cluster;
pub mod core;
pub mod testkit;
