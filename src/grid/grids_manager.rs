//! Builds the grids the model needs and the remappers between them.

use crate::algs::communicator::Communicator;
use crate::atm_error::AtmError;
use crate::config::{GridParams, GridsManagerParams};
use crate::grid::decomposition::block_range;
use crate::grid::point_grid::{Gid, Grid};
use crate::remap::{CoarseningRemapper, IdentityRemapper, MapFile, Remapper};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Grid lookup and remapper construction, as seen by atmosphere processes.
pub trait GridProvider {
    fn get_grid(&self, name: &str) -> Result<Arc<Grid>, AtmError>;
    fn create_remapper(&self, src: &str, tgt: &str) -> Result<Box<dyn Remapper>, AtmError>;
}

pub struct GridsManager<C: Communicator + Clone> {
    comm: C,
    params: GridsManagerParams,
    grids: BTreeMap<String, Arc<Grid>>,
}

impl<C: Communicator + Clone> GridsManager<C> {
    pub fn new(comm: C, params: GridsManagerParams) -> Self {
        Self {
            comm,
            params,
            grids: BTreeMap::new(),
        }
    }

    /// Build `required` plus the reference grid. Grids already built are kept.
    pub fn build_grids<'a, I>(&mut self, required: I) -> Result<(), AtmError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut names: BTreeSet<String> = required.into_iter().map(str::to_string).collect();
        names.insert(self.params.reference_grid.clone());
        for name in names {
            if self.grids.contains_key(&name) {
                continue;
            }
            let grid = self.build_grid(&name)?;
            log::info!(
                "built grid `{name}`: {} local / {} global DOFs, {} levels",
                grid.num_local_dofs(),
                grid.num_global_dofs(),
                grid.num_levels()
            );
            self.grids.insert(name, Arc::new(grid));
        }
        Ok(())
    }

    fn build_grid(&self, name: &str) -> Result<Grid, AtmError> {
        let gp: &GridParams = self
            .params
            .grids
            .get(name)
            .ok_or_else(|| AtmError::UnknownGrid(name.to_string()))?;
        let all: Vec<Gid> = match (&gp.gids, gp.num_global_dofs) {
            (Some(gids), _) => gids.clone(),
            (None, Some(n)) => (0..n as Gid).collect(),
            (None, None) => {
                return Err(AtmError::GridMismatch {
                    grid: name.to_string(),
                    reason: "grid needs either `gids` or `num_global_dofs`".into(),
                });
            }
        };
        let n_global = all.len();
        let local = all[block_range(n_global, self.comm.rank(), self.comm.size())].to_vec();
        Grid::new(name, local, gp.num_levels, n_global)
    }

    pub fn get_grid(&self, name: &str) -> Result<Arc<Grid>, AtmError> {
        self.grids
            .get(name)
            .cloned()
            .ok_or_else(|| AtmError::UnknownGrid(name.to_string()))
    }

    pub fn reference_grid(&self) -> Result<Arc<Grid>, AtmError> {
        self.get_grid(&self.params.reference_grid)
    }

    pub fn grid_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.grids.keys().map(String::as_str)
    }

    pub fn comm(&self) -> &C {
        &self.comm
    }

    /// Remapper from `src` to `tgt`: identity for the same grid, coarsening
    /// for a configured pair.
    pub fn create_remapper(&self, src: &str, tgt: &str) -> Result<Box<dyn Remapper>, AtmError> {
        let src_grid = self.get_grid(src)?;
        if src == tgt {
            return Ok(Box::new(IdentityRemapper::new(src_grid)));
        }
        let rp = self
            .params
            .remaps
            .iter()
            .find(|r| r.src == src && r.tgt == tgt)
            .ok_or_else(|| AtmError::NoRemapAvailable {
                src: src.to_string(),
                tgt: tgt.to_string(),
            })?;
        let map = MapFile::from_path(&rp.map_file)?;
        let remapper = CoarseningRemapper::new(src_grid, tgt, &map, self.comm.clone())?;
        if let Some(built) = self.grids.get(tgt) {
            if built.gids() != remapper.tgt_grid().gids() {
                return Err(AtmError::GridMismatch {
                    grid: tgt.to_string(),
                    reason: "map file decomposition differs from the configured grid".into(),
                });
            }
        }
        Ok(Box::new(remapper))
    }
}

impl<C: Communicator + Clone> GridProvider for GridsManager<C> {
    fn get_grid(&self, name: &str) -> Result<Arc<Grid>, AtmError> {
        GridsManager::get_grid(self, name)
    }
    fn create_remapper(&self, src: &str, tgt: &str) -> Result<Box<dyn Remapper>, AtmError> {
        GridsManager::create_remapper(self, src, tgt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::{LocalComm, NoComm};
    use crate::config::GridParams;

    fn params() -> GridsManagerParams {
        let mut grids = BTreeMap::new();
        grids.insert(
            "physics".to_string(),
            GridParams {
                num_global_dofs: Some(5),
                gids: None,
                num_levels: 3,
            },
        );
        grids.insert(
            "dyn".to_string(),
            GridParams {
                num_global_dofs: None,
                gids: Some(vec![40, 30, 20]),
                num_levels: 3,
            },
        );
        GridsManagerParams {
            reference_grid: "physics".into(),
            grids,
            remaps: Vec::new(),
        }
    }

    #[test]
    fn reference_grid_is_always_built() {
        let mut gm = GridsManager::new(NoComm, params());
        gm.build_grids(["dyn"]).unwrap();
        assert_eq!(gm.reference_grid().unwrap().num_local_dofs(), 5);
        assert_eq!(gm.get_grid("dyn").unwrap().gids(), &[40, 30, 20]);
        assert!(gm.build_grids(["nope"]).is_err());
    }

    #[test]
    fn grids_are_block_decomposed() {
        let world = LocalComm::world(2);
        let mut gm = GridsManager::new(world[1].clone(), params());
        gm.build_grids(["dyn"]).unwrap();
        assert_eq!(gm.reference_grid().unwrap().gids(), &[3, 4]);
        assert_eq!(gm.get_grid("dyn").unwrap().gids(), &[20]);
    }

    #[test]
    fn unconfigured_pairs_have_no_remap() {
        let mut gm = GridsManager::new(NoComm, params());
        gm.build_grids(["dyn"]).unwrap();
        assert!(gm.create_remapper("physics", "physics").is_ok());
        assert!(matches!(
            gm.create_remapper("physics", "dyn"),
            Err(AtmError::NoRemapAvailable { .. })
        ));
    }
}
