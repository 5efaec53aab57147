//! Sequential group of atmosphere processes.
//!
//! Children run in order. A field computed by an earlier child is an
//! internal dependency: it is not part of the group's required fields, and
//! later children that need it receive it read-only.

use crate::atm_error::AtmError;
use crate::control::atm_process::{AtmosphereProcess, GroupRequest};
use crate::control::field_guard::FieldMutationGuard;
use crate::field::access::FieldAccess;
use crate::field::identifier::FieldIdentifier;
use crate::field::repository::{FieldHandle, FieldRepository};
use crate::grid::GridProvider;
use crate::time_stamp::TimeStamp;
use std::collections::BTreeSet;

pub struct AtmosphereProcessGroup {
    name: String,
    processes: Vec<Box<dyn AtmosphereProcess>>,
    /// Handles each child may write, parallel to `processes`.
    writable: Vec<BTreeSet<FieldHandle>>,
}

impl AtmosphereProcessGroup {
    pub fn new(name: impl Into<String>, processes: Vec<Box<dyn AtmosphereProcess>>) -> Self {
        let writable = vec![BTreeSet::new(); processes.len()];
        Self {
            name: name.into(),
            processes,
            writable,
        }
    }

    pub fn processes(&self) -> impl Iterator<Item = &dyn AtmosphereProcess> + '_ {
        self.processes.iter().map(|p| p.as_ref())
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    /// Run every child; with a guard, check after each child that it only
    /// changed fields it computes.
    pub fn run_checked(
        &mut self,
        fields: &mut FieldAccess<'_>,
        dt: f64,
        mut guard: Option<&mut FieldMutationGuard>,
    ) -> Result<(), AtmError> {
        for (proc, writable) in self.processes.iter_mut().zip(&self.writable) {
            log::trace!("running `{}`", proc.name());
            {
                let mut scoped = fields.scoped(writable);
                proc.run(&mut scoped, dt)?;
            }
            if let Some(g) = guard.as_deref_mut() {
                g.verify(fields.repo(), proc.name(), writable)?;
                g.refresh(fields.repo());
            }
        }
        Ok(())
    }
}

impl AtmosphereProcess for AtmosphereProcessGroup {
    fn name(&self) -> &str {
        &self.name
    }

    fn required_grids(&self) -> BTreeSet<String> {
        self.processes
            .iter()
            .flat_map(|p| p.required_grids())
            .collect()
    }

    fn set_grids(&mut self, grids: &dyn GridProvider) -> Result<(), AtmError> {
        for p in &mut self.processes {
            p.set_grids(grids)?;
        }
        Ok(())
    }

    fn required_fields(&self) -> Vec<FieldIdentifier> {
        let mut computed_so_far: BTreeSet<FieldIdentifier> = BTreeSet::new();
        let mut out: Vec<FieldIdentifier> = Vec::new();
        for p in &self.processes {
            for id in p.required_fields() {
                if !computed_so_far.contains(&id) && !out.contains(&id) {
                    out.push(id);
                }
            }
            computed_so_far.extend(p.computed_fields());
        }
        out
    }

    fn computed_fields(&self) -> Vec<FieldIdentifier> {
        let mut out: Vec<FieldIdentifier> = Vec::new();
        for id in self.processes.iter().flat_map(|p| p.computed_fields()) {
            if !out.contains(&id) {
                out.push(id);
            }
        }
        out
    }

    fn required_groups(&self) -> Vec<GroupRequest> {
        let set: BTreeSet<GroupRequest> = self
            .processes
            .iter()
            .flat_map(|p| p.required_groups())
            .collect();
        set.into_iter().collect()
    }

    fn register_fields(&self, repo: &mut FieldRepository) -> Result<(), AtmError> {
        for p in &self.processes {
            p.register_fields(repo)?;
        }
        Ok(())
    }

    fn set_required_field(&mut self, h: FieldHandle, id: &FieldIdentifier) -> Result<(), AtmError> {
        for p in &mut self.processes {
            if p.required_fields().contains(id) {
                p.set_required_field(h, id)?;
            }
        }
        Ok(())
    }

    fn set_computed_field(&mut self, h: FieldHandle, id: &FieldIdentifier) -> Result<(), AtmError> {
        let mut computed_earlier = false;
        for (p, writable) in self.processes.iter_mut().zip(&mut self.writable) {
            // Read-only for later children that consume it. Children that
            // both read and write it get it via the caller's required list.
            if computed_earlier && p.required_fields().contains(id) {
                p.set_required_field(h, id)?;
            }
            if p.computed_fields().contains(id) {
                p.set_computed_field(h, id)?;
                writable.insert(h);
                computed_earlier = true;
            }
        }
        Ok(())
    }

    fn set_required_group(&mut self, group: &GroupRequest, members: &[FieldHandle]) -> Result<(), AtmError> {
        for p in &mut self.processes {
            if p.required_groups().contains(group) {
                p.set_required_group(group, members)?;
            }
        }
        Ok(())
    }

    fn initialize(&mut self, t0: TimeStamp) -> Result<(), AtmError> {
        for p in &mut self.processes {
            p.initialize(t0)?;
            log::debug!("initialized process `{}`", p.name());
        }
        Ok(())
    }

    fn run(&mut self, fields: &mut FieldAccess<'_>, dt: f64) -> Result<(), AtmError> {
        self.run_checked(fields, dt, None)
    }

    fn finalize(&mut self) -> Result<(), AtmError> {
        for p in &mut self.processes {
            p.finalize()?;
        }
        Ok(())
    }

    fn as_group(&self) -> Option<&AtmosphereProcessGroup> {
        Some(self)
    }
}
