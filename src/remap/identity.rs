//! Remapper between a grid and itself.

use crate::atm_error::AtmError;
use crate::field::access::FieldStore;
use crate::grid::Grid;
use crate::remap::remapper::{Remapper, RemapperBase};
use std::sync::Arc;

pub struct IdentityRemapper {
    base: RemapperBase,
    grid: Arc<Grid>,
}

impl IdentityRemapper {
    pub fn new(grid: Arc<Grid>) -> Self {
        Self {
            base: RemapperBase::default(),
            grid,
        }
    }

    fn copy(&self, store: &mut dyn FieldStore, forward: bool) -> Result<(), AtmError> {
        for (src, tgt) in self.base.bound_fields()? {
            let (from, to) = if forward { (src, tgt) } else { (tgt, src) };
            let values = store.read(from)?;
            store.write(to, &values)?;
        }
        Ok(())
    }
}

impl Remapper for IdentityRemapper {
    fn base(&self) -> &RemapperBase {
        &self.base
    }
    fn base_mut(&mut self) -> &mut RemapperBase {
        &mut self.base
    }
    fn src_grid(&self) -> &Grid {
        &self.grid
    }
    fn tgt_grid(&self) -> &Grid {
        &self.grid
    }

    fn do_remap_fwd(&mut self, store: &mut dyn FieldStore) -> Result<(), AtmError> {
        self.copy(store, true)
    }

    fn do_remap_bwd(&mut self, store: &mut dyn FieldStore) -> Result<(), AtmError> {
        self.copy(store, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::identifier::FieldIdentifier;
    use crate::field::repository::FieldRepository;

    #[test]
    fn copies_both_ways() {
        let g = Arc::new(Grid::new("g", vec![3, 4], 2, 2).unwrap());
        let a = FieldIdentifier::new("a", g.scalar3d_mid_layout(), "1", "g");
        let b = FieldIdentifier::new("b", g.scalar3d_mid_layout(), "1", "g");
        let mut repo = FieldRepository::new();
        repo.registration_begins().unwrap();
        let ah = repo.register_field(a.clone(), &[] as &[&str]).unwrap();
        let bh = repo.register_field(b.clone(), &[] as &[&str]).unwrap();
        repo.registration_ends().unwrap();

        let mut r = IdentityRemapper::new(g);
        assert!(r.remap(&mut repo, true).is_err());
        r.registration_begins().unwrap();
        r.register_field(a, b).unwrap();
        r.bind_field(0, ah, bh).unwrap();
        assert!(r.bind_field(1, ah, bh).is_err());
        r.registration_ends().unwrap();

        repo.write(ah, &[1.0, 2.0, 3.0, 4.0]).unwrap();
        r.remap(&mut repo, true).unwrap();
        assert_eq!(repo.read(bh).unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
        repo.set_value(bh, 7.0).unwrap();
        r.remap(&mut repo, false).unwrap();
        assert_eq!(repo.read(ah).unwrap(), vec![7.0; 4]);
    }
}
