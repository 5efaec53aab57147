//! Coarsens a list of fields onto another grid once per time step.

use crate::atm_error::AtmError;
use crate::config::ProcessParams;
use crate::control::atm_process::AtmosphereProcess;
use crate::field::access::FieldAccess;
use crate::field::identifier::FieldIdentifier;
use crate::field::layout::FieldLayout;
use crate::field::repository::FieldHandle;
use crate::grid::{Grid, GridProvider};
use crate::remap::Remapper;
use crate::time_stamp::TimeStamp;
use serde::Deserialize;
use std::collections::BTreeSet;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoarsenLayout {
    Scalar2d,
    #[default]
    Scalar3dMid,
    Scalar3dInt,
}

impl CoarsenLayout {
    fn on(self, grid: &Grid) -> FieldLayout {
        match self {
            CoarsenLayout::Scalar2d => grid.scalar2d_layout(),
            CoarsenLayout::Scalar3dMid => grid.scalar3d_mid_layout(),
            CoarsenLayout::Scalar3dInt => grid.scalar3d_int_layout(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct CoarsenField {
    pub name: String,
    pub units: String,
    #[serde(default)]
    pub layout: CoarsenLayout,
}

#[derive(Clone, Debug)]
struct Pair {
    src: FieldIdentifier,
    tgt: FieldIdentifier,
    src_h: Option<FieldHandle>,
    tgt_h: Option<FieldHandle>,
}

pub struct Coarsen {
    name: String,
    src_grid: String,
    tgt_grid: String,
    fields: Vec<CoarsenField>,
    pairs: Vec<Pair>,
    remapper: Option<Box<dyn Remapper>>,
}

impl Coarsen {
    pub fn create(params: &ProcessParams) -> Result<Box<dyn AtmosphereProcess>, AtmError> {
        Ok(Box::new(Self::new(params)?))
    }

    pub fn new(params: &ProcessParams) -> Result<Self, AtmError> {
        let fields: Vec<CoarsenField> = params.require("fields")?;
        if fields.is_empty() {
            return Err(params.invalid("no fields to coarsen".into()));
        }
        Ok(Self {
            name: params.display_name().to_string(),
            src_grid: params.require_grid()?.to_string(),
            tgt_grid: params.require("tgt_grid")?,
            fields,
            pairs: Vec::new(),
            remapper: None,
        })
    }

    fn remapper_mut(&mut self) -> Result<&mut Box<dyn Remapper>, AtmError> {
        self.remapper.as_mut().ok_or(AtmError::RegistrationPhase {
            operation: "coarsen",
            reason: "grids have not been set",
        })
    }

    fn try_bind(&mut self, index: usize) -> Result<(), AtmError> {
        if let (Some(s), Some(t)) = (self.pairs[index].src_h, self.pairs[index].tgt_h) {
            self.remapper_mut()?.bind_field(index, s, t)?;
        }
        Ok(())
    }
}

impl AtmosphereProcess for Coarsen {
    fn name(&self) -> &str {
        &self.name
    }

    fn required_grids(&self) -> BTreeSet<String> {
        BTreeSet::from([self.src_grid.clone(), self.tgt_grid.clone()])
    }

    fn set_grids(&mut self, grids: &dyn GridProvider) -> Result<(), AtmError> {
        let src = grids.get_grid(&self.src_grid)?;
        let mut remapper = grids.create_remapper(&self.src_grid, &self.tgt_grid)?;
        remapper.registration_begins()?;
        self.pairs.clear();
        for f in &self.fields {
            let src_id = FieldIdentifier::new(&f.name, f.layout.on(&src), &f.units, src.name());
            let tgt_layout = remapper.create_tgt_layout(src_id.layout());
            let tgt_id = src_id.on_grid(&self.tgt_grid, tgt_layout);
            remapper.register_field(src_id.clone(), tgt_id.clone())?;
            self.pairs.push(Pair {
                src: src_id,
                tgt: tgt_id,
                src_h: None,
                tgt_h: None,
            });
        }
        self.remapper = Some(remapper);
        Ok(())
    }

    fn required_fields(&self) -> Vec<FieldIdentifier> {
        self.pairs.iter().map(|p| p.src.clone()).collect()
    }

    fn computed_fields(&self) -> Vec<FieldIdentifier> {
        self.pairs.iter().map(|p| p.tgt.clone()).collect()
    }

    fn set_required_field(&mut self, h: FieldHandle, id: &FieldIdentifier) -> Result<(), AtmError> {
        if let Some(i) = self.pairs.iter().position(|p| &p.src == id) {
            self.pairs[i].src_h = Some(h);
            self.try_bind(i)?;
        }
        Ok(())
    }

    fn set_computed_field(&mut self, h: FieldHandle, id: &FieldIdentifier) -> Result<(), AtmError> {
        if let Some(i) = self.pairs.iter().position(|p| &p.tgt == id) {
            self.pairs[i].tgt_h = Some(h);
            self.try_bind(i)?;
        }
        Ok(())
    }

    fn initialize(&mut self, _t0: TimeStamp) -> Result<(), AtmError> {
        let n = self.pairs.len();
        let remapper = self.remapper_mut()?;
        remapper.registration_ends()?;
        log::debug!("coarsening {n} fields to grid `{}`", remapper.tgt_grid().name());
        Ok(())
    }

    fn run(&mut self, fields: &mut FieldAccess<'_>, _dt: f64) -> Result<(), AtmError> {
        self.remapper_mut()?.remap(fields, true)
    }
}
