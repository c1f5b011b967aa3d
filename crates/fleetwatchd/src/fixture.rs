//! Fixture backend — a group simulated by a JSON file.
//!
//! Implements both `SampleSource` and `ControlPlane`. Commands mutate the
//! in-memory model and rewrite the file atomically (write to a sibling temp
//! file, then rename), so successive invocations observe earlier actions.
//!
//! ```json
//! {
//!   "groups": [
//!     { "name": "web", "members": ["i-1", "i-2"],
//!       "desired_capacity": 2, "min_size": 1, "max_size": 4 }
//!   ],
//!   "samples": { "i-1": { "value": 42.0, "count": 3 } }
//! }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use fleetwatch_engine::{BoxFuture, ControlPlane, ControlPlaneError, GroupSnapshot, Sample, SampleSource};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("failed to read fixture {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse fixture {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to write fixture {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("unknown instance: {0}")]
    UnknownInstance(String),
}

/// On-disk fixture contents.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FixtureData {
    #[serde(default)]
    pub groups: Vec<FixtureGroup>,
    /// Latest sample per instance. Instances without an entry have no data.
    #[serde(default)]
    pub samples: BTreeMap<String, Sample>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FixtureGroup {
    pub name: String,
    pub members: Vec<String>,
    pub desired_capacity: u32,
    pub min_size: u32,
    pub max_size: u32,
}

/// File-backed group simulator.
pub struct FixtureBackend {
    path: PathBuf,
    data: Mutex<FixtureData>,
}

impl FixtureBackend {
    pub fn open(path: &Path) -> Result<Self, FixtureError> {
        let content = std::fs::read_to_string(path).map_err(|source| FixtureError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let data = serde_json::from_str(&content).map_err(|source| FixtureError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(?path, "fixture loaded");
        Ok(Self {
            path: path.to_path_buf(),
            data: Mutex::new(data),
        })
    }

    /// Copy of the current model.
    pub fn data(&self) -> FixtureData {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FixtureData> {
        // A poisoned lock still holds a consistent model: every mutation is a
        // single assignment or removal.
        self.data.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn persist(&self, data: &FixtureData) -> Result<(), FixtureError> {
        let write_err = |source| FixtureError::Write {
            path: self.path.clone(),
            source,
        };
        let body = serde_json::to_vec_pretty(data).map_err(|e| write_err(std::io::Error::other(e)))?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, body).map_err(write_err)?;
        std::fs::rename(&tmp, &self.path).map_err(write_err)?;
        Ok(())
    }
}

impl SampleSource for FixtureBackend {
    fn sample<'a>(
        &'a self,
        instance_id: &'a str,
        _window: Duration,
    ) -> BoxFuture<'a, anyhow::Result<Option<Sample>>> {
        Box::pin(async move { Ok(self.lock().samples.get(instance_id).copied()) })
    }
}

impl ControlPlane for FixtureBackend {
    fn snapshot<'a>(&'a self, group: &'a str) -> BoxFuture<'a, Result<GroupSnapshot, ControlPlaneError>> {
        Box::pin(async move {
            let data = self.lock();
            let found = data
                .groups
                .iter()
                .find(|g| g.name == group)
                .ok_or_else(|| ControlPlaneError::GroupNotFound(group.to_string()))?;
            Ok(GroupSnapshot::new(
                found.name.clone(),
                found.members.clone(),
                found.desired_capacity,
                found.min_size,
                found.max_size,
            ))
        })
    }

    fn terminate<'a>(&'a self, instance_id: &'a str) -> BoxFuture<'a, Result<(), ControlPlaneError>> {
        Box::pin(async move {
            let mut data = self.lock();
            let group = data
                .groups
                .iter_mut()
                .find(|g| g.members.iter().any(|m| m == instance_id))
                .ok_or_else(|| {
                    ControlPlaneError::Rejected(FixtureError::UnknownInstance(instance_id.to_string()).to_string())
                })?;
            group.members.retain(|m| m != instance_id);
            data.samples.remove(instance_id);
            self.persist(&data).map_err(anyhow::Error::from)?;
            info!(instance = %instance_id, "fixture instance terminated");
            Ok(())
        })
    }

    fn set_desired_capacity<'a>(
        &'a self,
        group: &'a str,
        capacity: u32,
    ) -> BoxFuture<'a, Result<(), ControlPlaneError>> {
        Box::pin(async move {
            let mut data = self.lock();
            let found = data
                .groups
                .iter_mut()
                .find(|g| g.name == group)
                .ok_or_else(|| ControlPlaneError::GroupNotFound(group.to_string()))?;
            if capacity < found.min_size || capacity > found.max_size {
                return Err(ControlPlaneError::Rejected(format!(
                    "capacity {capacity} outside [{}, {}]",
                    found.min_size, found.max_size
                )));
            }
            found.desired_capacity = capacity;
            self.persist(&data).map_err(anyhow::Error::from)?;
            info!(%group, capacity, "fixture desired capacity set");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_fixture(dir: &Path) -> PathBuf {
        let path = dir.join("group.json");
        std::fs::write(
            &path,
            r#"{
  "groups": [
    { "name": "web", "members": ["i-1", "i-2", "i-3"],
      "desired_capacity": 3, "min_size": 1, "max_size": 5 }
  ],
  "samples": {
    "i-1": { "value": 40.0, "count": 3 },
    "i-2": { "value": 50.0, "count": 3 }
  }
}"#,
        )
        .unwrap();
        path
    }

    #[tokio::test]
    async fn snapshot_and_samples_come_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FixtureBackend::open(&write_fixture(dir.path())).unwrap();

        let snap = backend.snapshot("web").await.unwrap();
        assert_eq!(snap.instance_count, 3);
        assert_eq!(snap.desired_capacity, 3);

        let window = Duration::from_secs(180);
        assert_eq!(
            backend.sample("i-1", window).await.unwrap(),
            Some(Sample { value: 40.0, count: 3 })
        );
        assert_eq!(backend.sample("i-3", window).await.unwrap(), None);
    }

    #[tokio::test]
    async fn unknown_group_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FixtureBackend::open(&write_fixture(dir.path())).unwrap();

        assert!(matches!(
            backend.snapshot("batch").await,
            Err(ControlPlaneError::GroupNotFound(_))
        ));
    }

    #[tokio::test]
    async fn commands_are_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(dir.path());
        let backend = FixtureBackend::open(&path).unwrap();

        backend.terminate("i-2").await.unwrap();
        backend.set_desired_capacity("web", 2).await.unwrap();

        let reopened = FixtureBackend::open(&path).unwrap();
        let data = reopened.data();
        assert_eq!(data.groups[0].members, vec!["i-1".to_string(), "i-3".to_string()]);
        assert_eq!(data.groups[0].desired_capacity, 2);
        assert!(!data.samples.contains_key("i-2"));
    }

    #[tokio::test]
    async fn rejects_out_of_band_capacity_and_unknown_instance() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FixtureBackend::open(&write_fixture(dir.path())).unwrap();

        assert!(matches!(
            backend.set_desired_capacity("web", 9).await,
            Err(ControlPlaneError::Rejected(_))
        ));
        assert!(matches!(
            backend.terminate("i-404").await,
            Err(ControlPlaneError::Rejected(_))
        ));
    }

    #[test]
    fn malformed_fixture_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(matches!(
            FixtureBackend::open(&path),
            Err(FixtureError::Parse { .. })
        ));
    }
}
