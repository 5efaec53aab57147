//! Relaxation of temperature and moisture toward prescribed profiles.
//!
//! Parameters: `tscale` (s), `p_low`/`p_high` (Pa, the nudged pressure
//! window), and `t_obs`/`q_obs` giving one value per level, applied to
//! every column.

use crate::atm_error::AtmError;
use crate::config::ProcessParams;
use crate::control::atm_process::{AtmosphereProcess, BoundFields};
use crate::field::access::{FieldAccess, FieldStore};
use crate::field::identifier::FieldIdentifier;
use crate::field::repository::FieldHandle;
use crate::grid::GridProvider;
use crate::physics::{NudgingBounds, advance_iop_nudging};
use std::collections::BTreeSet;

pub struct IopNudging {
    name: String,
    grid_name: String,
    bounds: NudgingBounds<f64>,
    t_obs: Vec<f64>,
    q_obs: Vec<f64>,
    inputs: BoundFields,
    outputs: BoundFields,
}

impl IopNudging {
    pub fn create(params: &ProcessParams) -> Result<Box<dyn AtmosphereProcess>, AtmError> {
        Ok(Box::new(Self::new(params)?))
    }

    pub fn new(params: &ProcessParams) -> Result<Self, AtmError> {
        let bounds = NudgingBounds {
            p_low: params.get("p_low")?.unwrap_or(0.0),
            p_high: params.get("p_high")?.unwrap_or(f64::MAX),
            tscale: params.require("tscale")?,
        };
        if bounds.p_low > bounds.p_high {
            return Err(params.invalid(format!(
                "empty pressure window [{}, {}]",
                bounds.p_low, bounds.p_high
            )));
        }
        let t_obs: Vec<f64> = params.require("t_obs")?;
        let q_obs: Vec<f64> = params.require("q_obs")?;
        if t_obs.len() != q_obs.len() {
            return Err(params.invalid("`t_obs` and `q_obs` differ in length".into()));
        }
        Ok(Self {
            name: params.display_name().to_string(),
            grid_name: params.require_grid()?.to_string(),
            bounds,
            t_obs,
            q_obs,
            inputs: BoundFields::default(),
            outputs: BoundFields::default(),
        })
    }
}

impl AtmosphereProcess for IopNudging {
    fn name(&self) -> &str {
        &self.name
    }

    fn required_grids(&self) -> BTreeSet<String> {
        BTreeSet::from([self.grid_name.clone()])
    }

    fn set_grids(&mut self, grids: &dyn GridProvider) -> Result<(), AtmError> {
        let grid = grids.get_grid(&self.grid_name)?;
        if self.t_obs.len() != grid.num_levels() {
            return Err(AtmError::InvalidProcessParams {
                process: self.name.clone(),
                reason: format!(
                    "observed profiles have {} levels, grid `{}` has {}",
                    self.t_obs.len(),
                    grid.name(),
                    grid.num_levels()
                ),
            });
        }
        let mid = grid.scalar3d_mid_layout();
        let id = |name: &str, units: &str| FieldIdentifier::new(name, mid.clone(), units, grid.name());
        self.inputs = BoundFields::new(vec![id("p_mid", "Pa"), id("T_mid", "K"), id("qv", "kg/kg")]);
        self.outputs = BoundFields::new(vec![
            id("T_mid", "K"),
            id("qv", "kg/kg"),
            id("T_mid_nudging_tend", "K/s"),
            id("qv_nudging_tend", "kg/kg/s"),
        ]);
        Ok(())
    }

    fn required_fields(&self) -> Vec<FieldIdentifier> {
        self.inputs.ids().to_vec()
    }

    fn computed_fields(&self) -> Vec<FieldIdentifier> {
        self.outputs.ids().to_vec()
    }

    fn set_required_field(&mut self, h: FieldHandle, id: &FieldIdentifier) -> Result<(), AtmError> {
        self.inputs.bind(h, id);
        Ok(())
    }

    fn set_computed_field(&mut self, h: FieldHandle, id: &FieldIdentifier) -> Result<(), AtmError> {
        self.outputs.bind(h, id);
        Ok(())
    }

    fn run(&mut self, fields: &mut FieldAccess<'_>, dt: f64) -> Result<(), AtmError> {
        let p_mid = fields.read(self.inputs.get("p_mid")?)?;
        let t_mid = fields.read(self.inputs.get("T_mid")?)?;
        let qv = fields.read(self.inputs.get("qv")?)?;

        let nlev = self.t_obs.len();
        let n = p_mid.len();
        let mut t_new = vec![0.0; n];
        let mut q_new = vec![0.0; n];
        let mut t_tend = vec![0.0; n];
        let mut q_tend = vec![0.0; n];
        if nlev > 0 {
            for (c, p) in p_mid.chunks(nlev).enumerate() {
                let col = c * nlev..(c + 1) * nlev;
                advance_iop_nudging(
                    dt,
                    &self.bounds,
                    p,
                    &t_mid[col.clone()],
                    &qv[col.clone()],
                    &self.t_obs,
                    &self.q_obs,
                    &mut t_new[col.clone()],
                    &mut q_new[col.clone()],
                    &mut t_tend[col.clone()],
                    &mut q_tend[col],
                );
            }
        }

        fields.write(self.outputs.get("T_mid")?, &t_new)?;
        fields.write(self.outputs.get("qv")?, &q_new)?;
        fields.write(self.outputs.get("T_mid_nudging_tend")?, &t_tend)?;
        fields.write(self.outputs.get("qv_nudging_tend")?, &q_tend)?;
        Ok(())
    }
}
