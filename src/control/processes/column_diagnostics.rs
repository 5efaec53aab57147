//! Diagnostic column quantities derived from the thermodynamic state.
//!
//! Inputs on `(COL, LEV)`: `p_mid`, `T_mid`, `qv`, `pseudo_density`.
//! Outputs: `exner`, `theta`, `T_virtual` and `dz` on `(COL, LEV)`, and
//! `z_int` on `(COL, ILEV)` integrated upward from `z_surf`.

use crate::atm_error::AtmError;
use crate::config::ProcessParams;
use crate::control::atm_process::{AtmosphereProcess, BoundFields};
use crate::field::access::{FieldAccess, FieldStore};
use crate::field::identifier::FieldIdentifier;
use crate::field::repository::FieldHandle;
use crate::grid::GridProvider;
use crate::physics::{
    calculate_dz, calculate_theta_from_t, calculate_virtual_temperature, calculate_z_int,
    exner_function,
};
use itertools::izip;
use std::collections::BTreeSet;

pub struct ColumnDiagnostics {
    name: String,
    grid_name: String,
    z_surf: f64,
    nlev: usize,
    inputs: BoundFields,
    outputs: BoundFields,
}

impl ColumnDiagnostics {
    pub fn create(params: &ProcessParams) -> Result<Box<dyn AtmosphereProcess>, AtmError> {
        Ok(Box::new(Self::new(params)?))
    }

    pub fn new(params: &ProcessParams) -> Result<Self, AtmError> {
        Ok(Self {
            name: params.display_name().to_string(),
            grid_name: params.require_grid()?.to_string(),
            z_surf: params.get("z_surf")?.unwrap_or(0.0),
            nlev: 0,
            inputs: BoundFields::default(),
            outputs: BoundFields::default(),
        })
    }
}

fn integrate_heights(dz: &[f64], z_surf: f64, z_int: &mut [f64], nlev: usize) {
    #[cfg(feature = "rayon")]
    {
        use rayon::prelude::*;
        z_int
            .par_chunks_mut(nlev + 1)
            .zip(dz.par_chunks(nlev))
            .for_each(|(zi, dz)| calculate_z_int(dz, z_surf, zi));
    }
    #[cfg(not(feature = "rayon"))]
    for (zi, dz) in z_int.chunks_mut(nlev + 1).zip(dz.chunks(nlev)) {
        calculate_z_int(dz, z_surf, zi);
    }
}

impl AtmosphereProcess for ColumnDiagnostics {
    fn name(&self) -> &str {
        &self.name
    }

    fn required_grids(&self) -> BTreeSet<String> {
        BTreeSet::from([self.grid_name.clone()])
    }

    fn set_grids(&mut self, grids: &dyn GridProvider) -> Result<(), AtmError> {
        let grid = grids.get_grid(&self.grid_name)?;
        self.nlev = grid.num_levels();
        let mid = grid.scalar3d_mid_layout();
        let int = grid.scalar3d_int_layout();
        let id = |name: &str, units: &str| FieldIdentifier::new(name, mid.clone(), units, grid.name());
        self.inputs = BoundFields::new(vec![
            id("p_mid", "Pa"),
            id("T_mid", "K"),
            id("qv", "kg/kg"),
            id("pseudo_density", "Pa"),
        ]);
        self.outputs = BoundFields::new(vec![
            id("exner", "1"),
            id("theta", "K"),
            id("T_virtual", "K"),
            id("dz", "m"),
            FieldIdentifier::new("z_int", int, "m", grid.name()),
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

    fn run(&mut self, fields: &mut FieldAccess<'_>, _dt: f64) -> Result<(), AtmError> {
        let p_mid = fields.read(self.inputs.get("p_mid")?)?;
        let t_mid = fields.read(self.inputs.get("T_mid")?)?;
        let qv = fields.read(self.inputs.get("qv")?)?;
        let pdel = fields.read(self.inputs.get("pseudo_density")?)?;

        let n = p_mid.len();
        let mut exner = vec![0.0; n];
        let mut theta = vec![0.0; n];
        let mut t_virtual = vec![0.0; n];
        let mut dz = vec![0.0; n];
        for (k, (&p, &t, &q, &dp)) in izip!(&p_mid, &t_mid, &qv, &pdel).enumerate() {
            exner[k] = exner_function(p);
            theta[k] = calculate_theta_from_t(t, p);
            t_virtual[k] = calculate_virtual_temperature(t, q);
            dz[k] = calculate_dz(dp, p, t, q);
        }
        let ncol = if self.nlev == 0 { 0 } else { n / self.nlev };
        let mut z_int = vec![0.0; ncol * (self.nlev + 1)];
        if self.nlev > 0 {
            integrate_heights(&dz, self.z_surf, &mut z_int, self.nlev);
        }

        fields.write(self.outputs.get("exner")?, &exner)?;
        fields.write(self.outputs.get("theta")?, &theta)?;
        fields.write(self.outputs.get("T_virtual")?, &t_virtual)?;
        fields.write(self.outputs.get("dz")?, &dz)?;
        fields.write(self.outputs.get("z_int")?, &z_int)?;
        Ok(())
    }
}
