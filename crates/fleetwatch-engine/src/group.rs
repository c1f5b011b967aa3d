//! Group snapshot and the control-plane seam.

use fleetwatch_state::{GroupName, InstanceId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::BoxFuture;

/// Errors surfaced by a control plane.
#[derive(Debug, Error)]
pub enum ControlPlaneError {
    #[error("group not found: {0}")]
    GroupNotFound(String),

    #[error("invalid snapshot for group {group}: {reason}")]
    InvalidSnapshot { group: String, reason: String },

    #[error("command rejected: {0}")]
    Rejected(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Point-in-time view of an instance group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GroupSnapshot {
    pub name: GroupName,
    /// Member instances, in the control plane's order.
    pub members: Vec<InstanceId>,
    pub instance_count: u32,
    pub desired_capacity: u32,
    pub min_size: u32,
    pub max_size: u32,
}

impl GroupSnapshot {
    /// Build a snapshot whose `instance_count` matches `members`.
    pub fn new(
        name: impl Into<GroupName>,
        members: Vec<InstanceId>,
        desired_capacity: u32,
        min_size: u32,
        max_size: u32,
    ) -> Self {
        Self {
            name: name.into(),
            instance_count: members.len() as u32,
            members,
            desired_capacity,
            min_size,
            max_size,
        }
    }

    /// Check the size invariants reported by the control plane.
    pub fn validate(&self) -> Result<(), ControlPlaneError> {
        let invalid = |reason: String| ControlPlaneError::InvalidSnapshot {
            group: self.name.clone(),
            reason,
        };
        if self.instance_count as usize != self.members.len() {
            return Err(invalid(format!(
                "instance_count {} does not match {} members",
                self.instance_count,
                self.members.len()
            )));
        }
        if !(self.min_size <= self.desired_capacity && self.desired_capacity <= self.max_size) {
            return Err(invalid(format!(
                "desired capacity {} outside [{}, {}]",
                self.desired_capacity, self.min_size, self.max_size
            )));
        }
        Ok(())
    }

    /// Whether a capacity value lies within `[min_size, max_size]`.
    pub fn in_band(&self, capacity: u32) -> bool {
        self.min_size <= capacity && capacity <= self.max_size
    }
}

/// Group management API: membership snapshots and the two commands the
/// engine can issue. Commands are fire-and-forget; success is not
/// re-verified.
pub trait ControlPlane: Send + Sync {
    fn snapshot<'a>(&'a self, group: &'a str)
        -> BoxFuture<'a, Result<GroupSnapshot, ControlPlaneError>>;

    fn terminate<'a>(&'a self, instance_id: &'a str) -> BoxFuture<'a, Result<(), ControlPlaneError>>;

    fn set_desired_capacity<'a>(
        &'a self,
        group: &'a str,
        capacity: u32,
    ) -> BoxFuture<'a, Result<(), ControlPlaneError>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn members(n: usize) -> Vec<InstanceId> {
        (0..n).map(|i| format!("i-{i}")).collect()
    }

    #[test]
    fn new_counts_members() {
        let snap = GroupSnapshot::new("web", members(3), 3, 1, 5);
        assert_eq!(snap.instance_count, 3);
        assert!(snap.validate().is_ok());
    }

    #[test]
    fn validate_rejects_mismatched_count() {
        let mut snap = GroupSnapshot::new("web", members(3), 3, 1, 5);
        snap.instance_count = 4;
        assert!(matches!(
            snap.validate(),
            Err(ControlPlaneError::InvalidSnapshot { .. })
        ));
    }

    #[test]
    fn validate_rejects_desired_outside_band() {
        let snap = GroupSnapshot::new("web", members(3), 6, 1, 5);
        assert!(snap.validate().is_err());
    }

    #[test]
    fn band_is_inclusive() {
        let snap = GroupSnapshot::new("web", members(2), 2, 1, 4);
        assert!(snap.in_band(1));
        assert!(snap.in_band(4));
        assert!(!snap.in_band(0));
        assert!(!snap.in_band(5));
    }
}
