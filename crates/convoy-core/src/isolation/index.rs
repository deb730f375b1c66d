//! Index of live isolation instances, shared by every process.

use std::path::PathBuf;

use tracing::debug;

use super::Instance;
use crate::{state_file::StateFile, Error, Result};

/// `instances.json` under the state directory
#[derive(Debug, Clone)]
pub(crate) struct InstanceIndex {
    file: StateFile<Vec<Instance>>,
}

impl InstanceIndex {
    pub(crate) fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            file: StateFile::new(path),
        }
    }

    /// Register an instance; paths and IDs must be unique among live entries.
    pub(crate) fn insert(&self, instance: &Instance) -> Result<()> {
        self.file.update(|instances| {
            if let Some(existing) = instances
                .iter()
                .find(|i| i.path == instance.path || i.id == instance.id)
            {
                return Err(Error::IsolationCreationFailed {
                    branch: instance.branch.clone(),
                    reason: format!(
                        "path {} already registered to instance {}",
                        existing.path.display(),
                        existing.id
                    ),
                });
            }
            instances.push(instance.clone());
            Ok(())
        })?;
        debug!(id = %instance.id, index = %self.file.path().display(), "instance registered");
        Ok(())
    }

    /// Drop an entry. Returns whether it was present.
    pub(crate) fn remove(&self, id: &str) -> Result<bool> {
        self.file.update(|instances| {
            let before = instances.len();
            instances.retain(|i| i.id != id);
            Ok(instances.len() != before)
        })
    }

    pub(crate) fn list(&self) -> Result<Vec<Instance>> {
        self.file.read()
    }
}
