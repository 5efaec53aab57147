//! The interface every atmosphere process implements.
//!
//! A process goes through the same stages as the driver: it is created from
//! parameters, told about grids (after which it knows its field
//! identifiers), registers fields, receives handles to the allocated fields,
//! is initialized, runs once per time step, and is finalized.

use crate::atm_error::AtmError;
use crate::control::process_group::AtmosphereProcessGroup;
use crate::field::access::FieldAccess;
use crate::field::identifier::FieldIdentifier;
use crate::field::repository::{FieldHandle, FieldRepository};
use crate::grid::GridProvider;
use crate::time_stamp::TimeStamp;
use std::collections::BTreeSet;

/// A process needs every field of `name` available on `grid`, optionally as
/// one bundled allocation.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct GroupRequest {
    pub name: String,
    pub grid: String,
    pub bundled: bool,
}

pub trait AtmosphereProcess {
    fn name(&self) -> &str;

    /// Grids this process works on. Known right after construction.
    fn required_grids(&self) -> BTreeSet<String>;

    /// Resolve grids; after this, field identifiers are known.
    fn set_grids(&mut self, grids: &dyn GridProvider) -> Result<(), AtmError>;

    fn required_fields(&self) -> Vec<FieldIdentifier>;
    fn computed_fields(&self) -> Vec<FieldIdentifier>;

    fn required_groups(&self) -> Vec<GroupRequest> {
        Vec::new()
    }

    /// Register every field this process touches. The default registers
    /// required and computed fields without group membership.
    fn register_fields(&self, repo: &mut FieldRepository) -> Result<(), AtmError> {
        for id in self.required_fields().into_iter().chain(self.computed_fields()) {
            repo.register_field(id, &[] as &[&str])?;
        }
        Ok(())
    }

    /// Hand over a field this process reads.
    fn set_required_field(&mut self, h: FieldHandle, id: &FieldIdentifier) -> Result<(), AtmError>;

    /// Hand over a field this process writes.
    fn set_computed_field(&mut self, h: FieldHandle, id: &FieldIdentifier) -> Result<(), AtmError>;

    /// Hand over the members of a requested group on its grid.
    fn set_required_group(
        &mut self,
        _group: &GroupRequest,
        _members: &[FieldHandle],
    ) -> Result<(), AtmError> {
        Ok(())
    }

    fn initialize(&mut self, _t0: TimeStamp) -> Result<(), AtmError> {
        Ok(())
    }

    /// Advance one step of `dt` seconds.
    fn run(&mut self, fields: &mut FieldAccess<'_>, dt: f64) -> Result<(), AtmError>;

    fn finalize(&mut self) -> Result<(), AtmError> {
        Ok(())
    }

    /// Downcast used when walking the process tree.
    fn as_group(&self) -> Option<&AtmosphereProcessGroup> {
        None
    }
}

/// Handles bound for one identifier list, in declaration order.
///
/// Leaf processes keep one of these for their inputs and one for their
/// outputs, and look handles up by field name.
#[derive(Clone, Debug, Default)]
pub struct BoundFields {
    ids: Vec<FieldIdentifier>,
    handles: Vec<Option<FieldHandle>>,
}

impl BoundFields {
    pub fn new(ids: Vec<FieldIdentifier>) -> Self {
        let handles = vec![None; ids.len()];
        Self { ids, handles }
    }

    pub fn ids(&self) -> &[FieldIdentifier] {
        &self.ids
    }

    /// Bind `h` if `id` is one of ours; returns whether it was.
    pub fn bind(&mut self, h: FieldHandle, id: &FieldIdentifier) -> bool {
        match self.ids.iter().position(|x| x == id) {
            Some(i) => {
                self.handles[i] = Some(h);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, name: &str) -> Result<FieldHandle, AtmError> {
        let i = self.ids.iter().position(|x| x.name() == name);
        i.and_then(|i| self.handles[i])
            .ok_or_else(|| AtmError::UnknownField {
                name: name.to_string(),
                grid: i
                    .map(|i| self.ids[i].grid_name().to_string())
                    .unwrap_or_default(),
            })
    }
}
