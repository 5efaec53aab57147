//! FieldRepository: arena of field records keyed by `(name, grid)`.
//!
//! Registration is bracketed by [`registration_begins`](FieldRepository::registration_begins)
//! and [`registration_ends`](FieldRepository::registration_ends). Storage is
//! allocated only when registration ends, after bundled groups have been
//! laid out, so that bundle members can become subviews of one allocation.
//!
//! Every rank runs the same registration sequence (SPMD); the gate is a
//! state check, not a lock.

use crate::atm_error::AtmError;
use crate::field::header::{FieldHeader, SubviewInfo};
use crate::field::identifier::FieldIdentifier;
use crate::field::layout::FieldTag;
use crate::time_stamp::TimeStamp;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

/// Stable index of a field record inside a [`FieldRepository`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldHandle(usize);

impl FieldHandle {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for FieldHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Debug)]
enum Storage {
    /// Registered, not yet allocated.
    Unallocated,
    /// Owns its values (row-major over the layout).
    Owned(Vec<f64>),
    /// Slice of the parent recorded in the header.
    View,
}

#[derive(Clone, Debug)]
struct FieldRecord {
    header: FieldHeader,
    storage: Storage,
}

/// Named set of fields. `fields_names` keeps registration order, which is
/// also the component order of the group's bundle.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GroupInfo {
    pub name: String,
    pub fields_names: Vec<String>,
    pub bundled: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RepoState {
    Clean,
    Open,
    Closed,
}

#[derive(Clone, Debug)]
pub struct FieldRepository {
    records: Vec<FieldRecord>,
    index: BTreeMap<(String, String), FieldHandle>,
    groups: BTreeMap<String, GroupInfo>,
    bundle_requests: BTreeSet<(String, String)>,
    components: HashMap<(FieldHandle, usize), FieldHandle>,
    state: RepoState,
}

impl Default for FieldRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl FieldRepository {
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
            index: BTreeMap::new(),
            groups: BTreeMap::new(),
            bundle_requests: BTreeSet::new(),
            components: HashMap::new(),
            state: RepoState::Clean,
        }
    }

    pub fn state(&self) -> RepoState {
        self.state
    }

    fn require_state(&self, want: RepoState, operation: &'static str) -> Result<(), AtmError> {
        if self.state == want {
            return Ok(());
        }
        let reason = match want {
            RepoState::Clean => "repository registration already started",
            RepoState::Open => "repository is not open for registration",
            RepoState::Closed => "repository registration has not ended",
        };
        Err(AtmError::RegistrationPhase { operation, reason })
    }

    pub fn registration_begins(&mut self) -> Result<(), AtmError> {
        self.require_state(RepoState::Clean, "registration_begins")?;
        self.state = RepoState::Open;
        Ok(())
    }

    /// Register `id`, adding it to each of `groups`.
    ///
    /// Registering an identical identifier again is a no-op apart from group
    /// membership; a different layout under the same `(name, grid)` fails.
    pub fn register_field<S: AsRef<str>>(
        &mut self,
        id: FieldIdentifier,
        groups: &[S],
    ) -> Result<FieldHandle, AtmError> {
        self.require_state(RepoState::Open, "register_field")?;
        let name = id.name().to_string();
        let key = (name.clone(), id.grid_name().to_string());
        let handle = match self.index.get(&key) {
            Some(&h) => {
                if self.records[h.0].header.identifier() != &id {
                    return Err(AtmError::ConflictingField {
                        name,
                        grid: key.1,
                    });
                }
                h
            }
            None => {
                let h = FieldHandle(self.records.len());
                self.records.push(FieldRecord {
                    header: FieldHeader::new(id),
                    storage: Storage::Unallocated,
                });
                self.index.insert(key, h);
                h
            }
        };
        for group in groups {
            let group = group.as_ref();
            self.records[handle.0]
                .header
                .tracking_mut()
                .add_to_group(group);
            let info = self
                .groups
                .entry(group.to_string())
                .or_insert_with(|| GroupInfo {
                    name: group.to_string(),
                    ..GroupInfo::default()
                });
            if !info.fields_names.contains(&name) {
                info.fields_names.push(name.clone());
            }
        }
        Ok(handle)
    }

    /// Ask for `group` to be allocated as one bundled field on `grid`.
    pub fn request_bundle(&mut self, group: &str, grid: &str) -> Result<(), AtmError> {
        self.require_state(RepoState::Open, "request_bundle")?;
        let info = self
            .groups
            .get_mut(group)
            .ok_or_else(|| AtmError::UnknownGroup(group.to_string()))?;
        info.bundled = true;
        self.bundle_requests
            .insert((group.to_string(), grid.to_string()));
        Ok(())
    }

    /// Close registration: lay out requested bundles, then allocate storage
    /// for every remaining field.
    pub fn registration_ends(&mut self) -> Result<(), AtmError> {
        self.require_state(RepoState::Open, "registration_ends")?;
        let requests: Vec<_> = self.bundle_requests.iter().cloned().collect();
        for (group, grid) in requests {
            self.create_bundle(&group, &grid)?;
        }
        for rec in &mut self.records {
            if let Storage::Unallocated = rec.storage {
                rec.storage = Storage::Owned(vec![0.0; rec.header.identifier().layout().size()]);
            }
        }
        self.state = RepoState::Closed;
        log::debug!(
            "field repository closed: {} fields, {} groups",
            self.index.len(),
            self.groups.len()
        );
        Ok(())
    }

    fn create_bundle(&mut self, group: &str, grid: &str) -> Result<FieldHandle, AtmError> {
        let info = self
            .groups
            .get(group)
            .ok_or_else(|| AtmError::UnknownGroup(group.to_string()))?
            .clone();
        let members = info
            .fields_names
            .iter()
            .map(|name| self.get_field(name, grid))
            .collect::<Result<Vec<_>, _>>()?;
        let first = *members.first().ok_or_else(|| {
            AtmError::InvalidLayout(format!("group `{group}` has no fields to bundle"))
        })?;
        let layout = self.records[first.0].header.identifier().layout().clone();
        if layout.tags().first() != Some(&FieldTag::Column) || layout.is_vector_layout() {
            return Err(AtmError::InvalidLayout(format!(
                "cannot bundle group `{group}`: member layout {layout} is not a scalar column layout"
            )));
        }
        for &m in &members {
            let header = &self.records[m.0].header;
            if header.identifier().layout() != &layout {
                return Err(AtmError::InvalidLayout(format!(
                    "group `{group}` members have different layouts on grid `{grid}`"
                )));
            }
            if header.parent().is_some() {
                return Err(AtmError::InvalidLayout(format!(
                    "field `{}` already belongs to another bundle",
                    header.identifier().name()
                )));
            }
        }

        let key = (group.to_string(), grid.to_string());
        if self.index.contains_key(&key) {
            return Err(AtmError::ConflictingField {
                name: key.0,
                grid: key.1,
            });
        }
        let bundle_layout = layout.insert_dim(1, FieldTag::Component, members.len());
        let mut header = FieldHeader::new(FieldIdentifier::new(group, bundle_layout, "", grid));
        header.tracking_mut().add_to_group(group);
        let bundle = FieldHandle(self.records.len());
        self.records.push(FieldRecord {
            header,
            storage: Storage::Unallocated,
        });
        self.index.insert(key, bundle);

        for (i, &m) in members.iter().enumerate() {
            let rec = &mut self.records[m.0];
            rec.header.set_parent(SubviewInfo {
                parent: bundle,
                dim: 1,
                index: i,
            });
            rec.storage = Storage::View;
        }
        log::debug!(
            "bundled group `{group}` on grid `{grid}` ({} fields)",
            members.len()
        );
        Ok(bundle)
    }

    // ----- lookup -----

    fn record(&self, h: FieldHandle) -> Result<&FieldRecord, AtmError> {
        self.records
            .get(h.0)
            .ok_or(AtmError::InvalidFieldHandle(h.0))
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.index.keys().any(|(n, _)| n == name)
    }

    pub fn has_field_on(&self, name: &str, grid: &str) -> bool {
        self.index
            .contains_key(&(name.to_string(), grid.to_string()))
    }

    pub fn get_field(&self, name: &str, grid: &str) -> Result<FieldHandle, AtmError> {
        self.index
            .get(&(name.to_string(), grid.to_string()))
            .copied()
            .ok_or_else(|| AtmError::UnknownField {
                name: name.to_string(),
                grid: grid.to_string(),
            })
    }

    /// Handle registered for `id`; the stored layout must match.
    pub fn handle_of(&self, id: &FieldIdentifier) -> Result<FieldHandle, AtmError> {
        let h = self.get_field(id.name(), id.grid_name())?;
        if self.records[h.0].header.identifier().layout() != id.layout() {
            return Err(AtmError::ConflictingField {
                name: id.name().to_string(),
                grid: id.grid_name().to_string(),
            });
        }
        Ok(h)
    }

    /// Every registered copy of `name`, one per grid, in grid-name order.
    pub fn aliases(&self, name: &str) -> Vec<FieldHandle> {
        self.index
            .iter()
            .filter(|((n, _), _)| n == name)
            .map(|(_, &h)| h)
            .collect()
    }

    pub fn header(&self, h: FieldHandle) -> Result<&FieldHeader, AtmError> {
        Ok(&self.record(h)?.header)
    }

    pub fn identifier(&self, h: FieldHandle) -> Result<&FieldIdentifier, AtmError> {
        Ok(self.record(h)?.header.identifier())
    }

    pub fn update_time_stamp(&mut self, h: FieldHandle, ts: TimeStamp) -> Result<(), AtmError> {
        self.records
            .get_mut(h.0)
            .ok_or(AtmError::InvalidFieldHandle(h.0))?
            .header
            .tracking_mut()
            .update_time_stamp(ts);
        Ok(())
    }

    /// Named fields, in `(name, grid)` order.
    pub fn fields(&self) -> impl Iterator<Item = (FieldHandle, &FieldIdentifier)> + '_ {
        self.index
            .values()
            .map(move |&h| (h, self.records[h.0].header.identifier()))
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn groups_info(&self) -> &BTreeMap<String, GroupInfo> {
        &self.groups
    }

    pub fn group(&self, name: &str) -> Result<&GroupInfo, AtmError> {
        self.groups
            .get(name)
            .ok_or_else(|| AtmError::UnknownGroup(name.to_string()))
    }

    /// Handles of `group`'s members on `grid`, in group order.
    pub fn group_fields(&self, group: &str, grid: &str) -> Result<Vec<FieldHandle>, AtmError> {
        self.group(group)?
            .fields_names
            .iter()
            .map(|name| self.get_field(name, grid))
            .collect()
    }

    /// The bundle allocated for `group` on `grid`, if one was requested.
    pub fn bundle_of(&self, group: &str, grid: &str) -> Option<FieldHandle> {
        let key = (group.to_string(), grid.to_string());
        if self.bundle_requests.contains(&key) {
            self.index.get(&key).copied()
        } else {
            None
        }
    }

    /// Subview of component `comp` of a vector field.
    pub fn get_component(&mut self, h: FieldHandle, comp: usize) -> Result<FieldHandle, AtmError> {
        self.require_state(RepoState::Closed, "get_component")?;
        if let Some(&c) = self.components.get(&(h, comp)) {
            return Ok(c);
        }
        let id = self.identifier(h)?.clone();
        let vdim = id.layout().vector_dim().ok_or_else(|| {
            AtmError::InvalidLayout(format!("field `{}` is not a vector field", id.name()))
        })?;
        let ncmp = id.layout().dim(vdim);
        if comp >= ncmp {
            return Err(AtmError::InvalidLayout(format!(
                "component {comp} out of range for `{}` with {ncmp} components",
                id.name()
            )));
        }
        let sub_id = FieldIdentifier::new(
            format!("{}_{comp}", id.name()),
            id.layout().strip_dim(vdim),
            id.units(),
            id.grid_name(),
        );
        let mut header = FieldHeader::new(sub_id);
        header.set_parent(SubviewInfo {
            parent: h,
            dim: vdim,
            index: comp,
        });
        let c = FieldHandle(self.records.len());
        self.records.push(FieldRecord {
            header,
            storage: Storage::View,
        });
        self.components.insert((h, comp), c);
        Ok(c)
    }

    /// Chain of parents of `h`, nearest first.
    pub fn ancestors(&self, h: FieldHandle) -> Vec<FieldHandle> {
        let mut out = Vec::new();
        let mut cur = h;
        while let Some(info) = self.records.get(cur.0).and_then(|r| r.header.parent()) {
            out.push(info.parent);
            cur = info.parent;
        }
        out
    }

    // ----- data access -----

    /// Owning record and the flat positions (row-major in `h`'s layout) of
    /// `h`'s values inside the owner's storage.
    pub fn storage_indices(&self, h: FieldHandle) -> Result<(FieldHandle, Vec<usize>), AtmError> {
        let rec = self.record(h)?;
        match &rec.storage {
            Storage::Owned(v) => Ok((h, (0..v.len()).collect())),
            Storage::View => {
                let info = rec
                    .header
                    .parent()
                    .ok_or(AtmError::InvalidFieldHandle(h.0))?;
                let (owner, parent_idx) = self.storage_indices(info.parent)?;
                let dims = self.identifier(info.parent)?.layout().dims().to_vec();
                let stride: usize = dims[info.dim + 1..].iter().product();
                let extent = dims[info.dim];
                let idx = parent_idx
                    .iter()
                    .enumerate()
                    .filter(|(pos, _)| (pos / stride) % extent == info.index)
                    .map(|(_, &s)| s)
                    .collect();
                Ok((owner, idx))
            }
            Storage::Unallocated => Err(AtmError::RegistrationPhase {
                operation: "field access",
                reason: "field storage is allocated when registration ends",
            }),
        }
    }

    fn owned_data(&self, h: FieldHandle) -> Result<&[f64], AtmError> {
        match &self.record(h)?.storage {
            Storage::Owned(v) => Ok(v),
            _ => Err(AtmError::InvalidFieldHandle(h.0)),
        }
    }

    /// Copy of the field's values, row-major over its layout.
    pub fn read(&self, h: FieldHandle) -> Result<Vec<f64>, AtmError> {
        if let Storage::Owned(v) = &self.record(h)?.storage {
            return Ok(v.clone());
        }
        let (owner, idx) = self.storage_indices(h)?;
        let data = self.owned_data(owner)?;
        Ok(idx.iter().map(|&i| data[i]).collect())
    }

    pub fn write(&mut self, h: FieldHandle, values: &[f64]) -> Result<(), AtmError> {
        let (owner, idx) = self.storage_indices(h)?;
        if values.len() != idx.len() {
            return Err(AtmError::FieldSizeMismatch {
                field: self.identifier(h)?.name().to_string(),
                expected: idx.len(),
                got: values.len(),
            });
        }
        match &mut self.records[owner.0].storage {
            Storage::Owned(data) => {
                for (&i, &x) in idx.iter().zip(values) {
                    data[i] = x;
                }
                Ok(())
            }
            _ => Err(AtmError::InvalidFieldHandle(owner.0)),
        }
    }

    /// Set every value of the field to `value`.
    pub fn set_value(&mut self, h: FieldHandle, value: f64) -> Result<(), AtmError> {
        let n = self.storage_indices(h)?.1.len();
        self.write(h, &vec![value; n])
    }

    /// Records that own storage, with their values.
    pub(crate) fn owned_storage(&self) -> impl Iterator<Item = (FieldHandle, &[f64])> + '_ {
        self.records
            .iter()
            .enumerate()
            .filter_map(|(i, r)| match &r.storage {
                Storage::Owned(v) => Some((FieldHandle(i), v.as_slice())),
                _ => None,
            })
    }

    /// Release all storage and metadata; the repository can be reused.
    pub fn clean_up(&mut self) {
        *self = Self::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::layout::FieldLayout;

    fn col_lev(ncol: usize, nlev: usize) -> FieldLayout {
        FieldLayout::new(vec![FieldTag::Column, FieldTag::Level], vec![ncol, nlev]).unwrap()
    }

    #[test]
    fn registration_gate_is_enforced() {
        let mut repo = FieldRepository::new();
        let id = FieldIdentifier::new("T_mid", col_lev(2, 3), "K", "physics");
        assert!(matches!(
            repo.register_field(id.clone(), &["tracers"]),
            Err(AtmError::RegistrationPhase { .. })
        ));
        repo.registration_begins().unwrap();
        let h = repo.register_field(id.clone(), &[] as &[&str]).unwrap();
        // Re-registration dedups.
        assert_eq!(repo.register_field(id, &[] as &[&str]).unwrap(), h);
        assert!(matches!(repo.read(h), Err(AtmError::RegistrationPhase { .. })));
        repo.registration_ends().unwrap();
        assert_eq!(repo.read(h).unwrap(), vec![0.0; 6]);
        assert!(repo.registration_begins().is_err());
    }

    #[test]
    fn conflicting_layouts_are_rejected() {
        let mut repo = FieldRepository::new();
        repo.registration_begins().unwrap();
        repo.register_field(FieldIdentifier::new("p", col_lev(2, 3), "Pa", "g"), &[] as &[&str])
            .unwrap();
        let err = repo
            .register_field(FieldIdentifier::new("p", col_lev(2, 4), "Pa", "g"), &[] as &[&str])
            .unwrap_err();
        assert!(matches!(err, AtmError::ConflictingField { .. }));
    }

    #[test]
    fn bundle_members_share_storage() {
        let mut repo = FieldRepository::new();
        repo.registration_begins().unwrap();
        let qv = repo
            .register_field(FieldIdentifier::new("qv", col_lev(2, 2), "kg/kg", "g"), &["tracers"])
            .unwrap();
        let qc = repo
            .register_field(FieldIdentifier::new("qc", col_lev(2, 2), "kg/kg", "g"), &["tracers"])
            .unwrap();
        repo.request_bundle("tracers", "g").unwrap();
        repo.registration_ends().unwrap();

        let bundle = repo.bundle_of("tracers", "g").unwrap();
        assert_eq!(repo.identifier(bundle).unwrap().layout().dims(), &[2, 2, 2]);
        repo.write(qv, &[1.0, 2.0, 3.0, 4.0]).unwrap();
        repo.write(qc, &[5.0, 6.0, 7.0, 8.0]).unwrap();
        // (COL, CMP, LEV) row-major.
        assert_eq!(
            repo.read(bundle).unwrap(),
            vec![1.0, 2.0, 5.0, 6.0, 3.0, 4.0, 7.0, 8.0]
        );
        assert_eq!(repo.ancestors(qc), vec![bundle]);

        let comp1 = repo.get_component(bundle, 1).unwrap();
        assert_eq!(repo.read(comp1).unwrap(), repo.read(qc).unwrap());
    }

    #[test]
    fn component_out_of_range_fails() {
        let mut repo = FieldRepository::new();
        repo.registration_begins().unwrap();
        let l = FieldLayout::new(
            vec![FieldTag::Column, FieldTag::Component],
            vec![3, 2],
        )
        .unwrap();
        let h = repo
            .register_field(FieldIdentifier::new("wind", l, "m/s", "g"), &[] as &[&str])
            .unwrap();
        repo.registration_ends().unwrap();
        assert!(repo.get_component(h, 2).is_err());
        let c = repo.get_component(h, 1).unwrap();
        repo.set_value(c, 4.0).unwrap();
        assert_eq!(repo.read(h).unwrap(), vec![0.0, 4.0, 0.0, 4.0, 0.0, 4.0]);
    }

    #[test]
    fn write_size_mismatch() {
        let mut repo = FieldRepository::new();
        repo.registration_begins().unwrap();
        let h = repo
            .register_field(FieldIdentifier::new("ps", col_lev(2, 1), "Pa", "g"), &[] as &[&str])
            .unwrap();
        repo.registration_ends().unwrap();
        assert!(matches!(
            repo.write(h, &[1.0]),
            Err(AtmError::FieldSizeMismatch { expected: 2, got: 1, .. })
        ));
    }
}
