//! Identity ownership and grain activation.
//!
//! Each member runs one [`IdentityActor`] and one [`PlacementActor`]. The [`PartitionManager`]
//! spawns both and feeds them topology changes from the cluster's event stream.

mod identity_actor;
mod manager;
mod placement_actor;

#[rustfmt::skip]
pub use {
  identity_actor::IdentityActor,
  identity_actor::IdentityMsg,
  identity_actor::OwnershipTable,
  manager::PartitionManager,
  placement_actor::GrainMeta,
  placement_actor::PlacementActor,
  placement_actor::PlacementMsg,
};
