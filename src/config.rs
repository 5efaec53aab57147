//! Parameter tree for the atmosphere driver, loaded from JSON.
//!
//! ```json
//! {
//!   "atmosphere_processes": { "type": "group", "processes": [ ... ] },
//!   "grids_manager": { "reference_grid": "physics", "grids": { ... } },
//!   "initial_conditions": { "ps": 1.0e5, "qv": [0.1, 0.2, 0.3] },
//!   "debug": { "dag_verbosity": 1 }
//! }
//! ```

use crate::atm_error::AtmError;
use crate::grid::Gid;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, Deserialize)]
pub struct AtmParams {
    pub atmosphere_processes: ProcessParams,
    pub grids_manager: GridsManagerParams,
    #[serde(default)]
    pub initial_conditions: InitialConditionsParams,
    #[serde(default)]
    pub debug: DebugParams,
    #[serde(default)]
    pub output_manager: Option<OutputManagerParams>,
}

impl AtmParams {
    pub fn from_json_str(s: &str) -> Result<Self, AtmError> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, AtmError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
}

/// One node of the process tree. Keys other than the named ones are kept
/// in `extra` for the process to interpret.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ProcessParams {
    #[serde(rename = "type")]
    pub process_type: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub grid: Option<String>,
    #[serde(default)]
    pub processes: Vec<ProcessParams>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl ProcessParams {
    /// Configured name, falling back to the type.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.process_type)
    }

    pub fn get<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<Option<T>, AtmError> {
        match self.extra.get(key) {
            None => Ok(None),
            Some(v) => T::deserialize(v).map(Some).map_err(|e| self.invalid(format!("`{key}`: {e}"))),
        }
    }

    pub fn require<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<T, AtmError> {
        self.get(key)?
            .ok_or_else(|| self.invalid(format!("missing required parameter `{key}`")))
    }

    pub fn require_grid(&self) -> Result<&str, AtmError> {
        self.grid
            .as_deref()
            .ok_or_else(|| self.invalid("missing required parameter `grid`".to_string()))
    }

    pub(crate) fn invalid(&self, reason: String) -> AtmError {
        AtmError::InvalidProcessParams {
            process: self.display_name().to_string(),
            reason,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct GridsManagerParams {
    pub reference_grid: String,
    pub grids: BTreeMap<String, GridParams>,
    #[serde(default)]
    pub remaps: Vec<RemapParams>,
}

/// A grid is either a block-decomposed range `0..num_global_dofs` or an
/// explicit GID list (decomposed in list order).
#[derive(Clone, Debug, Deserialize)]
pub struct GridParams {
    #[serde(default)]
    pub num_global_dofs: Option<usize>,
    #[serde(default)]
    pub gids: Option<Vec<Gid>>,
    #[serde(default = "default_num_levels")]
    pub num_levels: usize,
}

fn default_num_levels() -> usize {
    1
}

#[derive(Clone, Debug, Deserialize)]
pub struct RemapParams {
    pub src: String,
    pub tgt: String,
    pub map_file: PathBuf,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct InitialConditionsParams {
    /// JSON object `name -> value` read as an initial-condition source.
    #[serde(default)]
    pub file: Option<PathBuf>,
    #[serde(flatten)]
    pub constants: BTreeMap<String, IcValue>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum IcValue {
    Scalar(f64),
    Vector(Vec<f64>),
}

#[derive(Clone, Debug, Deserialize)]
pub struct DebugParams {
    /// Verbosity of the dependency graph dump; negative disables it.
    #[serde(default = "default_dag_verbosity")]
    pub dag_verbosity: i32,
    #[serde(default = "default_dag_file")]
    pub dag_file: PathBuf,
    #[serde(default = "default_check_field_mutation")]
    pub check_field_mutation: bool,
}

fn default_dag_verbosity() -> i32 {
    -1
}

fn default_dag_file() -> PathBuf {
    PathBuf::from("atm_dag.dot")
}

fn default_check_field_mutation() -> bool {
    cfg!(debug_assertions)
}

impl Default for DebugParams {
    fn default() -> Self {
        Self {
            dag_verbosity: default_dag_verbosity(),
            dag_file: default_dag_file(),
            check_field_mutation: default_check_field_mutation(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct OutputManagerParams {
    #[serde(default)]
    pub streams: Vec<StreamParams>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct StreamParams {
    pub name: String,
    pub grid: String,
    pub fields: Vec<String>,
    /// Write every `frequency` steps.
    #[serde(default = "default_frequency")]
    pub frequency: usize,
    /// JSON-lines file; in-memory when absent.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Write `(COL, LEV)` fields level by level instead of column by column.
    #[serde(default)]
    pub level_major: bool,
}

fn default_frequency() -> usize {
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    const PARAMS: &str = r#"{
        "atmosphere_processes": {
            "type": "group",
            "processes": [
                { "type": "column_diagnostics", "grid": "physics", "tscale": 3600.0 }
            ]
        },
        "grids_manager": {
            "reference_grid": "physics",
            "grids": { "physics": { "num_global_dofs": 4, "num_levels": 2 } }
        },
        "initial_conditions": { "ps": 1.0e5, "qv": [0.1, 0.2, 0.3] }
    }"#;

    #[test]
    fn parses_nested_processes_and_constants() {
        let p = AtmParams::from_json_str(PARAMS).unwrap();
        let leaf = &p.atmosphere_processes.processes[0];
        assert_eq!(leaf.display_name(), "column_diagnostics");
        assert_eq!(leaf.require::<f64>("tscale").unwrap(), 3600.0);
        assert!(leaf.get::<f64>("missing").unwrap().is_none());
        assert!(leaf.require::<String>("tscale").is_err());
        assert_eq!(p.initial_conditions.constants["ps"], IcValue::Scalar(1.0e5));
        assert_eq!(
            p.initial_conditions.constants["qv"],
            IcValue::Vector(vec![0.1, 0.2, 0.3])
        );
        assert_eq!(p.debug.dag_verbosity, -1);
        assert_eq!(p.grids_manager.grids["physics"].num_levels, 2);
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        assert!(matches!(
            AtmParams::from_json_str("{"),
            Err(AtmError::Config(_))
        ));
    }
}
