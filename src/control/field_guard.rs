//! Optional check that processes only change the fields they compute.
//!
//! The guard keeps a copy of every owned allocation. After a process runs,
//! any value that differs from the copy must lie inside the storage of one
//! of the process's writable fields.

use crate::atm_error::AtmError;
use crate::field::repository::{FieldHandle, FieldRepository};
use std::collections::{BTreeMap, BTreeSet, HashSet};

#[derive(Clone, Debug, Default)]
pub struct FieldMutationGuard {
    snapshot: BTreeMap<FieldHandle, Vec<f64>>,
}

impl FieldMutationGuard {
    pub fn snapshot(repo: &FieldRepository) -> Self {
        let mut guard = Self::default();
        guard.refresh(repo);
        guard
    }

    pub fn refresh(&mut self, repo: &FieldRepository) {
        self.snapshot = repo
            .owned_storage()
            .map(|(h, v)| (h, v.to_vec()))
            .collect();
    }

    /// Compare the repository against the snapshot.
    ///
    /// # Errors
    /// `FieldIllegallyModified` naming the first field that changed outside
    /// `writable`.
    pub fn verify(
        &self,
        repo: &FieldRepository,
        process: &str,
        writable: &BTreeSet<FieldHandle>,
    ) -> Result<(), AtmError> {
        let mut allowed: HashSet<(FieldHandle, usize)> = HashSet::new();
        for &h in writable {
            let (owner, idx) = repo.storage_indices(h)?;
            allowed.extend(idx.into_iter().map(|i| (owner, i)));
        }
        for (owner, current) in repo.owned_storage() {
            let Some(before) = self.snapshot.get(&owner) else {
                continue;
            };
            let changed = before
                .iter()
                .zip(current)
                .enumerate()
                .find(|(i, (a, b))| a.to_bits() != b.to_bits() && !allowed.contains(&(owner, *i)))
                .map(|(i, _)| i);
            if let Some(pos) = changed {
                return Err(AtmError::FieldIllegallyModified {
                    process: process.to_string(),
                    field: Self::field_name_at(repo, owner, pos)?,
                });
            }
        }
        Ok(())
    }

    /// Name of the registered field whose storage holds `(owner, pos)`.
    fn field_name_at(repo: &FieldRepository, owner: FieldHandle, pos: usize) -> Result<String, AtmError> {
        for (h, id) in repo.fields() {
            if h == owner {
                continue;
            }
            let (o, idx) = repo.storage_indices(h)?;
            if o == owner && idx.contains(&pos) {
                return Ok(id.name().to_string());
            }
        }
        Ok(repo.identifier(owner)?.name().to_string())
    }
}
