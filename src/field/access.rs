//! Read/write access to field values, with per-process write permissions.

use crate::atm_error::AtmError;
use crate::field::identifier::FieldIdentifier;
use crate::field::repository::{FieldHandle, FieldRepository};
use std::collections::BTreeSet;

/// Minimal value access used by remappers and processes.
pub trait FieldStore {
    fn identifier(&self, h: FieldHandle) -> Result<&FieldIdentifier, AtmError>;
    fn read(&self, h: FieldHandle) -> Result<Vec<f64>, AtmError>;
    fn write(&mut self, h: FieldHandle, values: &[f64]) -> Result<(), AtmError>;
}

impl FieldStore for FieldRepository {
    fn identifier(&self, h: FieldHandle) -> Result<&FieldIdentifier, AtmError> {
        FieldRepository::identifier(self, h)
    }
    fn read(&self, h: FieldHandle) -> Result<Vec<f64>, AtmError> {
        FieldRepository::read(self, h)
    }
    fn write(&mut self, h: FieldHandle, values: &[f64]) -> Result<(), AtmError> {
        FieldRepository::write(self, h, values)
    }
}

/// A repository borrowed together with the set of handles its holder may
/// write. Writing a subview is allowed when the view itself or any of its
/// ancestors is writable.
pub struct FieldAccess<'a> {
    repo: &'a mut FieldRepository,
    writable: &'a BTreeSet<FieldHandle>,
}

impl<'a> FieldAccess<'a> {
    pub fn new(repo: &'a mut FieldRepository, writable: &'a BTreeSet<FieldHandle>) -> Self {
        Self { repo, writable }
    }

    pub fn repo(&self) -> &FieldRepository {
        self.repo
    }

    /// Reborrow with a different writable set, e.g. for a child process.
    pub fn scoped<'b>(&'b mut self, writable: &'b BTreeSet<FieldHandle>) -> FieldAccess<'b> {
        FieldAccess {
            repo: &mut *self.repo,
            writable,
        }
    }

    pub fn can_write(&self, h: FieldHandle) -> bool {
        self.writable.contains(&h)
            || self
                .repo
                .ancestors(h)
                .iter()
                .any(|a| self.writable.contains(a))
    }
}

impl FieldStore for FieldAccess<'_> {
    fn identifier(&self, h: FieldHandle) -> Result<&FieldIdentifier, AtmError> {
        self.repo.identifier(h)
    }

    fn read(&self, h: FieldHandle) -> Result<Vec<f64>, AtmError> {
        self.repo.read(h)
    }

    fn write(&mut self, h: FieldHandle, values: &[f64]) -> Result<(), AtmError> {
        if !self.can_write(h) {
            return Err(AtmError::ReadOnlyField {
                field: self.repo.identifier(h)?.name().to_string(),
            });
        }
        self.repo.write(h, values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::layout::{FieldLayout, FieldTag};

    #[test]
    fn writes_outside_the_writable_set_fail() {
        let mut repo = FieldRepository::new();
        repo.registration_begins().unwrap();
        let l = FieldLayout::new(vec![FieldTag::Column], vec![2]).unwrap();
        let a = repo
            .register_field(FieldIdentifier::new("a", l.clone(), "1", "g"), &[] as &[&str])
            .unwrap();
        let b = repo
            .register_field(FieldIdentifier::new("b", l, "1", "g"), &[] as &[&str])
            .unwrap();
        repo.registration_ends().unwrap();

        let writable = BTreeSet::from([a]);
        let mut access = FieldAccess::new(&mut repo, &writable);
        access.write(a, &[1.0, 2.0]).unwrap();
        assert!(matches!(
            access.write(b, &[1.0, 2.0]),
            Err(AtmError::ReadOnlyField { .. })
        ));
        let none = BTreeSet::new();
        let mut inner = access.scoped(&none);
        assert!(inner.write(a, &[0.0, 0.0]).is_err());
        assert_eq!(inner.read(a).unwrap(), vec![1.0, 2.0]);
    }
}
