//! Coarsening remapper: `tgt = W * src` with `W` read from a mapping file.
//!
//! Each rank multiplies its local source columns into an *overlapped* target
//! grid (every target row touched by a local source column), then the
//! exchange plan ships those partial sums to the ranks owning the rows,
//! where they are added up.

use crate::algs::communicator::{Communicator, RemapCommTags};
use crate::atm_error::AtmError;
use crate::field::access::FieldStore;
use crate::field::repository::FieldHandle;
use crate::grid::{Gid, Grid, block_owner};
use crate::remap::exchange_plan::ExchangePlan;
use crate::remap::map_file::MapFile;
use crate::remap::remapper::{Remapper, RemapperBase};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

pub struct CoarseningRemapper<C: Communicator> {
    base: RemapperBase,
    comm: C,
    tags: RemapCommTags,
    src_grid: Arc<Grid>,
    tgt_grid: Arc<Grid>,
    ov_grid: Grid,
    /// Global owner of every target row.
    row_owner: HashMap<Gid, usize>,
    /// `(ov lid, src lid)` per local triplet, sorted by `(row GID, col GID)`.
    row_col_lids: Vec<(usize, usize)>,
    weights: Vec<f64>,
    ov_fields: Vec<Vec<f64>>,
    /// Target values assembled from every peer, reused across remaps.
    tgt_fields: Vec<Vec<f64>>,
    plan: Option<ExchangePlan>,
}

impl<C: Communicator> CoarseningRemapper<C> {
    /// Set up the remap from `src_grid` onto a target grid named `tgt_name`,
    /// decomposed over `comm` as described by `map`.
    pub fn new(
        src_grid: Arc<Grid>,
        tgt_name: &str,
        map: &MapFile,
        comm: C,
    ) -> Result<Self, AtmError> {
        let (rank, size) = (comm.rank(), comm.size());
        let rows = map.row_gids();
        let n_rows = rows.len();
        let row_owner: HashMap<Gid, usize> = rows
            .iter()
            .enumerate()
            .map(|(pos, &gid)| (gid, block_owner(pos, n_rows, size)))
            .collect();
        let tgt_grid = Arc::new(Grid::new(
            tgt_name,
            map.target_decomposition(rank, size),
            src_grid.num_levels(),
            n_rows,
        )?);

        // Triplets arrive sorted by (row, col); keep those touching our columns.
        let local: Vec<_> = map
            .triplets()
            .iter()
            .filter_map(|t| src_grid.lid_of(t.col).map(|c| (t.row, c, t.weight)))
            .collect();
        let ov_gids: BTreeSet<Gid> = local.iter().map(|&(row, _, _)| row).collect();
        let ov_grid = Grid::new(
            format!("{tgt_name}_ov"),
            ov_gids.into_iter().collect(),
            src_grid.num_levels(),
            n_rows,
        )?;
        let mut row_col_lids = Vec::with_capacity(local.len());
        let mut weights = Vec::with_capacity(local.len());
        for (row, col_lid, w) in local {
            row_col_lids.push((ov_grid.try_lid_of(row)?, col_lid));
            weights.push(w);
        }
        log::debug!(
            "rank {rank}: coarsening {} -> {tgt_name}: {} local triplets, {} overlapped rows, {} owned rows",
            src_grid.name(),
            weights.len(),
            ov_grid.num_local_dofs(),
            tgt_grid.num_local_dofs()
        );

        Ok(Self {
            base: RemapperBase::default(),
            comm,
            tags: RemapCommTags::default(),
            src_grid,
            tgt_grid,
            ov_grid,
            row_owner,
            row_col_lids,
            weights,
            ov_fields: Vec::new(),
            tgt_fields: Vec::new(),
            plan: None,
        })
    }

    /// Use a different tag block, e.g. when several remappers share a comm.
    pub fn with_tags(mut self, tags: RemapCommTags) -> Self {
        self.tags = tags;
        self
    }

    pub fn tgt_grid_arc(&self) -> Arc<Grid> {
        Arc::clone(&self.tgt_grid)
    }

    pub fn ov_grid(&self) -> &Grid {
        &self.ov_grid
    }

    pub fn plan(&self) -> Option<&ExchangePlan> {
        self.plan.as_ref()
    }

    fn local_mat_vec(&mut self, index: usize, src: &[f64]) {
        let cs = self.base.tgt_ids()[index].layout().column_size();
        let ov = &mut self.ov_fields[index];
        ov.fill(0.0);
        for (&(row, col), &w) in self.row_col_lids.iter().zip(&self.weights) {
            let src_col = &src[col * cs..(col + 1) * cs];
            for (o, &s) in ov[row * cs..(row + 1) * cs].iter_mut().zip(src_col) {
                *o += w * s;
            }
        }
    }
}

impl<C: Communicator> Remapper for CoarseningRemapper<C> {
    fn base(&self) -> &RemapperBase {
        &self.base
    }
    fn base_mut(&mut self) -> &mut RemapperBase {
        &mut self.base
    }
    fn src_grid(&self) -> &Grid {
        &self.src_grid
    }
    fn tgt_grid(&self) -> &Grid {
        &self.tgt_grid
    }

    fn do_registration_ends(&mut self) -> Result<(), AtmError> {
        let col_sizes: Vec<usize> = self
            .base
            .tgt_ids()
            .iter()
            .map(|id| id.layout().column_size())
            .collect();
        self.ov_fields = col_sizes
            .iter()
            .map(|cs| vec![0.0; self.ov_grid.num_local_dofs() * cs])
            .collect();
        self.tgt_fields = col_sizes
            .iter()
            .map(|cs| vec![0.0; self.tgt_grid.num_local_dofs() * cs])
            .collect();
        let row_owner = &self.row_owner;
        let tgt_name = self.tgt_grid.name();
        self.plan = Some(ExchangePlan::build(
            &self.comm,
            self.tags,
            &self.ov_grid,
            &self.tgt_grid,
            |gid| {
                row_owner.get(&gid).copied().ok_or_else(|| AtmError::UnknownGid {
                    gid,
                    grid: tgt_name.to_string(),
                })
            },
            col_sizes,
        )?);
        Ok(())
    }

    fn do_remap_fwd(&mut self, store: &mut dyn FieldStore) -> Result<(), AtmError> {
        let pairs: Vec<(FieldHandle, FieldHandle)> = self.base.bound_fields()?;
        for (i, &(src_h, _)) in pairs.iter().enumerate() {
            let src = store.read(src_h)?;
            let expected = self.src_grid.num_local_dofs() * self.base.src_ids()[i].layout().column_size();
            if src.len() != expected {
                return Err(AtmError::FieldSizeMismatch {
                    field: store.identifier(src_h)?.name().to_string(),
                    expected,
                    got: src.len(),
                });
            }
            self.local_mat_vec(i, &src);
        }

        let plan = self.plan.as_mut().ok_or(AtmError::RegistrationPhase {
            operation: "remap",
            reason: "exchange plan is built when registration ends",
        })?;
        plan.pack(&self.ov_fields);
        plan.exchange(&self.comm)?;

        for f in &mut self.tgt_fields {
            f.fill(0.0);
        }
        plan.unpack(&mut self.tgt_fields);
        for (&(_, tgt_h), values) in pairs.iter().zip(&self.tgt_fields) {
            store.write(tgt_h, values)?;
        }
        Ok(())
    }

    fn do_remap_bwd(&mut self, _store: &mut dyn FieldStore) -> Result<(), AtmError> {
        Err(AtmError::UnsupportedOperation(
            "CoarseningRemapper only supports fwd remapping",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::field::identifier::FieldIdentifier;
    use crate::field::repository::FieldRepository;
    use crate::remap::map_file::Triplet;

    fn four_to_two() -> MapFile {
        let t = |row, col, weight| Triplet { row, col, weight };
        MapFile::from_triplets(vec![t(0, 0, 0.5), t(0, 1, 0.5), t(1, 2, 0.5), t(1, 3, 0.5)])
    }

    #[test]
    fn serial_coarsening_averages_pairs() {
        let src = Arc::new(Grid::new("fine", vec![0, 1, 2, 3], 1, 4).unwrap());
        let mut r = CoarseningRemapper::new(Arc::clone(&src), "coarse", &four_to_two(), NoComm).unwrap();
        assert_eq!(r.tgt_grid().gids(), &[0, 1]);

        let src_id = FieldIdentifier::new("T", src.scalar2d_layout(), "K", "fine");
        let tgt_id = FieldIdentifier::new("T", r.tgt_grid().scalar2d_layout(), "K", "coarse");
        let mut repo = FieldRepository::new();
        repo.registration_begins().unwrap();
        let sh = repo.register_field(src_id.clone(), &[] as &[&str]).unwrap();
        let th = repo.register_field(tgt_id.clone(), &[] as &[&str]).unwrap();
        repo.registration_ends().unwrap();
        repo.write(sh, &[10.0, 20.0, 30.0, 40.0]).unwrap();

        r.registration_begins().unwrap();
        let idx = r.register_field(src_id, tgt_id).unwrap();
        r.bind_field(idx, sh, th).unwrap();
        r.registration_ends().unwrap();
        r.remap(&mut repo, true).unwrap();
        assert_eq!(repo.read(th).unwrap(), vec![15.0, 35.0]);

        assert!(matches!(
            r.remap(&mut repo, false),
            Err(AtmError::UnsupportedOperation(_))
        ));
    }
}
