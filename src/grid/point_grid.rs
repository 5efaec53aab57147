//! Rank-local view of a named, distributed set of DOFs.

use crate::atm_error::AtmError;
use crate::field::layout::{FieldLayout, FieldTag};
use std::collections::HashMap;

/// Global DOF identifier, stable across ranks.
pub type Gid = u64;

/// `Grid` stores the GIDs owned by this rank in local-index order, the
/// inverse GID→LID lookup, and the vertical extent shared by every column.
///
/// # Invariants
/// - Each GID appears at most once.
/// - `lids[gids[i]] == i` for every local index `i`.
#[derive(Clone, Debug)]
pub struct Grid {
    name: String,
    gids: Vec<Gid>,
    lids: HashMap<Gid, usize>,
    num_levels: usize,
    num_global_dofs: usize,
}

impl Grid {
    /// Build a grid from the GIDs owned by this rank.
    ///
    /// # Errors
    /// Returns `Err(DuplicateGid)` if a GID is listed twice.
    pub fn new(
        name: impl Into<String>,
        gids: Vec<Gid>,
        num_levels: usize,
        num_global_dofs: usize,
    ) -> Result<Self, AtmError> {
        let name = name.into();
        let mut lids = HashMap::with_capacity(gids.len());
        for (lid, &gid) in gids.iter().enumerate() {
            if lids.insert(gid, lid).is_some() {
                return Err(AtmError::DuplicateGid { gid, grid: name });
            }
        }
        Ok(Self {
            name,
            gids,
            lids,
            num_levels,
            num_global_dofs,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// GIDs owned by this rank, indexed by LID.
    pub fn gids(&self) -> &[Gid] {
        &self.gids
    }

    pub fn num_local_dofs(&self) -> usize {
        self.gids.len()
    }

    pub fn num_global_dofs(&self) -> usize {
        self.num_global_dofs
    }

    pub fn num_levels(&self) -> usize {
        self.num_levels
    }

    #[inline]
    pub fn lid_of(&self, gid: Gid) -> Option<usize> {
        self.lids.get(&gid).copied()
    }

    /// Like [`lid_of`](Self::lid_of) but reports the grid in the error.
    pub fn try_lid_of(&self, gid: Gid) -> Result<usize, AtmError> {
        self.lid_of(gid).ok_or_else(|| AtmError::UnknownGid {
            gid,
            grid: self.name.clone(),
        })
    }

    #[inline]
    pub fn gid_of(&self, lid: usize) -> Option<Gid> {
        self.gids.get(lid).copied()
    }

    /// `(COL)` layout: one value per column.
    pub fn scalar2d_layout(&self) -> FieldLayout {
        FieldLayout::from_parts(vec![FieldTag::Column], vec![self.num_local_dofs()])
    }

    /// `(COL, LEV)` layout on level midpoints.
    pub fn scalar3d_mid_layout(&self) -> FieldLayout {
        FieldLayout::from_parts(
            vec![FieldTag::Column, FieldTag::Level],
            vec![self.num_local_dofs(), self.num_levels],
        )
    }

    /// `(COL, ILEV)` layout on level interfaces.
    pub fn scalar3d_int_layout(&self) -> FieldLayout {
        FieldLayout::from_parts(
            vec![FieldTag::Column, FieldTag::InterfaceLevel],
            vec![self.num_local_dofs(), self.num_levels + 1],
        )
    }

    /// `(COL, CMP, LEV)` layout with `ncmp` components.
    pub fn vector3d_mid_layout(&self, ncmp: usize) -> FieldLayout {
        FieldLayout::from_parts(
            vec![FieldTag::Column, FieldTag::Component, FieldTag::Level],
            vec![self.num_local_dofs(), ncmp, self.num_levels],
        )
    }
}

impl PartialEq for Grid {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.gids == other.gids
            && self.num_levels == other.num_levels
            && self.num_global_dofs == other.num_global_dofs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lid_lookup_is_inverse_of_gids() {
        let g = Grid::new("physics", vec![7, 3, 11], 4, 12).unwrap();
        for (lid, &gid) in g.gids().iter().enumerate() {
            assert_eq!(g.lid_of(gid), Some(lid));
        }
        assert!(g.lid_of(5).is_none());
        assert!(matches!(g.try_lid_of(5), Err(AtmError::UnknownGid { gid: 5, .. })));
    }

    #[test]
    fn duplicate_gids_are_rejected() {
        let err = Grid::new("dyn", vec![1, 2, 1], 1, 3).unwrap_err();
        assert!(matches!(err, AtmError::DuplicateGid { gid: 1, .. }));
    }

    #[test]
    fn layouts_follow_grid_sizes() {
        let g = Grid::new("physics", vec![0, 1], 3, 2).unwrap();
        assert_eq!(g.scalar3d_mid_layout().dims(), &[2, 3]);
        assert_eq!(g.scalar3d_int_layout().dims(), &[2, 4]);
        assert_eq!(g.vector3d_mid_layout(5).size(), 30);
    }
}
