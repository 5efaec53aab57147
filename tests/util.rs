#![allow(dead_code)]
use atmos_driver::atm_error::AtmError;
use atmos_driver::config::ProcessParams;
use atmos_driver::control::{AtmosphereProcess, BoundFields, GroupRequest};
use atmos_driver::field::{FieldAccess, FieldHandle, FieldIdentifier, FieldLayout, FieldRepository, FieldStore};
use atmos_driver::grid::{Grid, GridProvider};
use atmos_driver::remap::{MapFile, Remapper};
use atmos_driver::remap::map_file::Triplet;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::PathBuf;

pub fn t(row: u64, col: u64, weight: f64) -> Triplet {
    Triplet { row, col, weight }
}

/// Target GID 0 averages source 0 and 1, GID 1 averages 2 and 3.
pub fn four_to_two() -> MapFile {
    MapFile::from_triplets(vec![t(0, 0, 0.5), t(0, 1, 0.5), t(1, 2, 0.5), t(1, 3, 0.5)])
}

pub const FOUR_TO_TWO_TEXT: &str = "# row col weight\n0 0 0.5\n0 1 0.5\n\n1 2 0.5\n1 3 0.5\n";

/// A file under the system temp dir, unique per process and `name`.
pub fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("atmos_driver_{}_{name}", std::process::id()))
}

pub fn write_temp(name: &str, contents: &str) -> PathBuf {
    let path = temp_path(name);
    std::fs::write(&path, contents).unwrap();
    path
}

/// Register `src`/`tgt` in a fresh repository, run one forward remap and
/// return the target values.
pub fn remap_once(
    r: &mut dyn Remapper,
    src: FieldIdentifier,
    tgt: FieldIdentifier,
    values: &[f64],
) -> Result<Vec<f64>, AtmError> {
    let mut repo = FieldRepository::new();
    repo.registration_begins()?;
    let sh = repo.register_field(src.clone(), &[] as &[&str])?;
    let th = repo.register_field(tgt.clone(), &[] as &[&str])?;
    repo.registration_ends()?;
    repo.write(sh, values)?;

    r.registration_begins()?;
    let idx = r.register_field(src, tgt)?;
    r.bind_field(idx, sh, th)?;
    r.registration_ends()?;
    r.remap(&mut repo, true)?;
    repo.read(th)
}

// ----- configurable test process -----

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeLayout {
    Scalar2d,
    #[default]
    Scalar3dMid,
    Vector3dMid(usize),
}

#[derive(Clone, Debug, Deserialize)]
pub struct ProbeField {
    pub name: String,
    pub units: String,
    #[serde(default)]
    pub layout: ProbeLayout,
    #[serde(default)]
    pub group: Option<String>,
}

/// Process configured entirely from parameters:
///
/// * `requires` / `computes`: field lists on `grid`;
/// * `groups`: group requests;
/// * `write_to`: name of a required field the process writes during `run`;
/// * `fail_finalize`: make `finalize` return an error.
///
/// Each run adds one to every computed field.
pub struct Probe {
    name: String,
    grid: String,
    requires: Vec<ProbeField>,
    computes: Vec<ProbeField>,
    groups: Vec<GroupRequest>,
    write_to: Option<String>,
    fail_finalize: bool,
    inputs: BoundFields,
    outputs: BoundFields,
    group_members: Vec<FieldHandle>,
}

impl Probe {
    pub fn create(params: &ProcessParams) -> Result<Box<dyn AtmosphereProcess>, AtmError> {
        Ok(Box::new(Probe {
            name: params.display_name().to_string(),
            grid: params.require_grid()?.to_string(),
            requires: params.get("requires")?.unwrap_or_default(),
            computes: params.get("computes")?.unwrap_or_default(),
            groups: params
                .get::<Vec<(String, String, bool)>>("groups")?
                .unwrap_or_default()
                .into_iter()
                .map(|(name, grid, bundled)| GroupRequest { name, grid, bundled })
                .collect(),
            write_to: params.get("write_to")?,
            fail_finalize: params.get("fail_finalize")?.unwrap_or(false),
            inputs: BoundFields::default(),
            outputs: BoundFields::default(),
            group_members: Vec::new(),
        }))
    }

    fn ids(fields: &[ProbeField], grid: &Grid) -> Vec<FieldIdentifier> {
        fields
            .iter()
            .map(|f| {
                let layout: FieldLayout = match f.layout {
                    ProbeLayout::Scalar2d => grid.scalar2d_layout(),
                    ProbeLayout::Scalar3dMid => grid.scalar3d_mid_layout(),
                    ProbeLayout::Vector3dMid(n) => grid.vector3d_mid_layout(n),
                };
                FieldIdentifier::new(&f.name, layout, &f.units, grid.name())
            })
            .collect()
    }
}

impl AtmosphereProcess for Probe {
    fn name(&self) -> &str {
        &self.name
    }

    fn required_grids(&self) -> BTreeSet<String> {
        BTreeSet::from([self.grid.clone()])
    }

    fn set_grids(&mut self, grids: &dyn GridProvider) -> Result<(), AtmError> {
        let grid = grids.get_grid(&self.grid)?;
        self.inputs = BoundFields::new(Self::ids(&self.requires, &grid));
        self.outputs = BoundFields::new(Self::ids(&self.computes, &grid));
        Ok(())
    }

    fn required_fields(&self) -> Vec<FieldIdentifier> {
        self.inputs.ids().to_vec()
    }

    fn computed_fields(&self) -> Vec<FieldIdentifier> {
        self.outputs.ids().to_vec()
    }

    fn required_groups(&self) -> Vec<GroupRequest> {
        self.groups.clone()
    }

    fn register_fields(&self, repo: &mut FieldRepository) -> Result<(), AtmError> {
        let fields = self.requires.iter().chain(&self.computes);
        let ids = self.inputs.ids().iter().chain(self.outputs.ids());
        for (field, id) in fields.zip(ids) {
            let groups: Vec<&str> = field.group.iter().map(String::as_str).collect();
            repo.register_field(id.clone(), &groups)?;
        }
        Ok(())
    }

    fn set_required_field(&mut self, h: FieldHandle, id: &FieldIdentifier) -> Result<(), AtmError> {
        self.inputs.bind(h, id);
        Ok(())
    }

    fn set_computed_field(&mut self, h: FieldHandle, id: &FieldIdentifier) -> Result<(), AtmError> {
        self.outputs.bind(h, id);
        Ok(())
    }

    fn set_required_group(&mut self, _group: &GroupRequest, members: &[FieldHandle]) -> Result<(), AtmError> {
        self.group_members.extend_from_slice(members);
        Ok(())
    }

    fn run(&mut self, fields: &mut FieldAccess<'_>, _dt: f64) -> Result<(), AtmError> {
        for id in self.outputs.ids().to_vec() {
            let h = self.outputs.get(id.name())?;
            let v: Vec<f64> = fields.read(h)?.iter().map(|x| x + 1.0).collect();
            fields.write(h, &v)?;
        }
        if let Some(name) = &self.write_to {
            let h = self.inputs.get(name)?;
            let n = fields.read(h)?.len();
            fields.write(h, &vec![0.0; n])?;
        }
        // Group members on other grids are readable.
        for &h in &self.group_members {
            fields.read(h)?;
        }
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), AtmError> {
        if self.fail_finalize {
            return Err(AtmError::UnsupportedOperation("process refuses to finalize"));
        }
        Ok(())
    }
}
