//! The `Remapper` trait and its registration gate.
//!
//! A remapper relates fields on a source grid to fields on a target grid.
//! Pairs are registered between `registration_begins` and
//! `registration_ends`, bound to concrete storage with `bind_field`, and
//! remapped with `remap`. Implementors supply the `do_*` hooks; the provided
//! methods enforce phase ordering and layout compatibility.

use crate::atm_error::AtmError;
use crate::field::access::FieldStore;
use crate::field::identifier::FieldIdentifier;
use crate::field::layout::{FieldLayout, LayoutType};
use crate::field::repository::{FieldHandle, RepoState};
use crate::grid::Grid;

/// Two layouts can be remapped into each other when they have the same tag
/// shape and the same number of values per column.
pub fn layouts_compatible(src: &FieldLayout, tgt: &FieldLayout) -> bool {
    let kind = src.layout_type();
    kind != LayoutType::Invalid && kind == tgt.layout_type() && src.column_size() == tgt.column_size()
}

/// Registration state shared by every remapper.
#[derive(Clone, Debug)]
pub struct RemapperBase {
    state: RepoState,
    src_ids: Vec<FieldIdentifier>,
    tgt_ids: Vec<FieldIdentifier>,
    bound: Vec<Option<(FieldHandle, FieldHandle)>>,
}

impl Default for RemapperBase {
    fn default() -> Self {
        Self {
            state: RepoState::Clean,
            src_ids: Vec::new(),
            tgt_ids: Vec::new(),
            bound: Vec::new(),
        }
    }
}

impl RemapperBase {
    pub fn state(&self) -> RepoState {
        self.state
    }

    pub fn num_registered_fields(&self) -> usize {
        self.src_ids.len()
    }

    pub fn src_ids(&self) -> &[FieldIdentifier] {
        &self.src_ids
    }

    pub fn tgt_ids(&self) -> &[FieldIdentifier] {
        &self.tgt_ids
    }

    pub fn is_bound(&self, index: usize) -> bool {
        matches!(self.bound.get(index), Some(Some(_)))
    }

    /// All `(src, tgt)` handles, or an error naming the first unbound pair.
    pub fn bound_fields(&self) -> Result<Vec<(FieldHandle, FieldHandle)>, AtmError> {
        self.bound
            .iter()
            .copied()
            .map(|b| {
                b.ok_or(AtmError::RegistrationPhase {
                    operation: "remap",
                    reason: "not every registered field has been bound",
                })
            })
            .collect()
    }
}

/// Map fields from `src_grid` to `tgt_grid` (forward) or back (backward).
pub trait Remapper {
    fn base(&self) -> &RemapperBase;
    fn base_mut(&mut self) -> &mut RemapperBase;

    fn src_grid(&self) -> &Grid;
    fn tgt_grid(&self) -> &Grid;

    /// Layout on the source grid matching `tgt` on the target grid.
    fn create_src_layout(&self, tgt: &FieldLayout) -> FieldLayout {
        tgt.with_dim(0, self.src_grid().num_local_dofs())
    }

    /// Layout on the target grid matching `src` on the source grid.
    fn create_tgt_layout(&self, src: &FieldLayout) -> FieldLayout {
        src.with_dim(0, self.tgt_grid().num_local_dofs())
    }

    fn compatible_layouts(&self, src: &FieldLayout, tgt: &FieldLayout) -> bool {
        layouts_compatible(src, tgt)
    }

    fn do_register_field(
        &mut self,
        _src: &FieldIdentifier,
        _tgt: &FieldIdentifier,
    ) -> Result<(), AtmError> {
        Ok(())
    }

    fn do_bind_field(
        &mut self,
        _index: usize,
        _src: FieldHandle,
        _tgt: FieldHandle,
    ) -> Result<(), AtmError> {
        Ok(())
    }

    fn do_registration_ends(&mut self) -> Result<(), AtmError> {
        Ok(())
    }

    fn do_remap_fwd(&mut self, store: &mut dyn FieldStore) -> Result<(), AtmError>;
    fn do_remap_bwd(&mut self, store: &mut dyn FieldStore) -> Result<(), AtmError>;

    // ----- provided -----

    fn registration_begins(&mut self) -> Result<(), AtmError> {
        let base = self.base_mut();
        if base.state != RepoState::Clean {
            return Err(AtmError::RegistrationPhase {
                operation: "registration_begins",
                reason: "remapper registration already started",
            });
        }
        base.state = RepoState::Open;
        Ok(())
    }

    /// Record a `(src, tgt)` pair and return its index.
    ///
    /// # Errors
    /// Fails outside the registration window, if either identifier lives on
    /// the wrong grid, or if the layouts are not compatible.
    fn register_field(
        &mut self,
        src: FieldIdentifier,
        tgt: FieldIdentifier,
    ) -> Result<usize, AtmError> {
        if self.base().state != RepoState::Open {
            return Err(AtmError::RegistrationPhase {
                operation: "register_field",
                reason: "remapper is not open for registration",
            });
        }
        for (id, grid) in [(&src, self.src_grid()), (&tgt, self.tgt_grid())] {
            if id.grid_name() != grid.name() {
                return Err(AtmError::GridMismatch {
                    grid: grid.name().to_string(),
                    reason: format!("field `{}` lives on grid `{}`", id.name(), id.grid_name()),
                });
            }
        }
        let sizes_match = src.layout().dims().first() == Some(&self.src_grid().num_local_dofs())
            && tgt.layout().dims().first() == Some(&self.tgt_grid().num_local_dofs());
        if !sizes_match || !self.compatible_layouts(src.layout(), tgt.layout()) {
            return Err(AtmError::IncompatibleLayouts {
                field: src.name().to_string(),
                src: src.layout().to_string(),
                tgt: tgt.layout().to_string(),
            });
        }
        self.do_register_field(&src, &tgt)?;
        let base = self.base_mut();
        base.src_ids.push(src);
        base.tgt_ids.push(tgt);
        base.bound.push(None);
        Ok(base.src_ids.len() - 1)
    }

    /// Attach storage to the pair registered at `index`.
    fn bind_field(
        &mut self,
        index: usize,
        src: FieldHandle,
        tgt: FieldHandle,
    ) -> Result<(), AtmError> {
        let registered = self.base().num_registered_fields();
        if index >= registered {
            return Err(AtmError::FieldIndexOutOfRange { index, registered });
        }
        if self.base().state == RepoState::Clean {
            return Err(AtmError::RegistrationPhase {
                operation: "bind_field",
                reason: "registration has not started",
            });
        }
        self.do_bind_field(index, src, tgt)?;
        self.base_mut().bound[index] = Some((src, tgt));
        Ok(())
    }

    fn registration_ends(&mut self) -> Result<(), AtmError> {
        if self.base().state != RepoState::Open {
            return Err(AtmError::RegistrationPhase {
                operation: "registration_ends",
                reason: "remapper is not open for registration",
            });
        }
        self.do_registration_ends()?;
        self.base_mut().state = RepoState::Closed;
        Ok(())
    }

    fn num_registered_fields(&self) -> usize {
        self.base().num_registered_fields()
    }

    /// Remap every registered pair. Requires closed registration and all
    /// pairs bound.
    fn remap(&mut self, store: &mut dyn FieldStore, forward: bool) -> Result<(), AtmError> {
        if self.base().state != RepoState::Closed {
            return Err(AtmError::RegistrationPhase {
                operation: "remap",
                reason: "remapper registration has not ended",
            });
        }
        self.base().bound_fields()?;
        if forward {
            self.do_remap_fwd(store)
        } else {
            self.do_remap_bwd(store)
        }
    }
}
