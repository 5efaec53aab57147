//! Builds the process tree from parameters.

use crate::atm_error::AtmError;
use crate::config::ProcessParams;
use crate::control::atm_process::AtmosphereProcess;
use crate::control::process_group::AtmosphereProcessGroup;
use crate::control::processes::{ColumnDiagnostics, Coarsen, IopNudging};
use std::collections::BTreeMap;

/// Constructor for one process type.
pub type ProcessCreator = fn(&ProcessParams) -> Result<Box<dyn AtmosphereProcess>, AtmError>;

/// Registry of process types. The type `group` is always available and
/// builds its children recursively.
#[derive(Clone, Debug, Default)]
pub struct ProcessFactory {
    creators: BTreeMap<String, ProcessCreator>,
}

impl ProcessFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory knowing every built-in process type.
    pub fn with_builtins() -> Self {
        let mut f = Self::new();
        f.register("column_diagnostics", ColumnDiagnostics::create);
        f.register("iop_nudging", IopNudging::create);
        f.register("coarsen", Coarsen::create);
        f
    }

    /// Add or replace the creator for `process_type`.
    pub fn register(&mut self, process_type: impl Into<String>, creator: ProcessCreator) {
        self.creators.insert(process_type.into(), creator);
    }

    pub fn is_registered(&self, process_type: &str) -> bool {
        process_type == "group" || self.creators.contains_key(process_type)
    }

    pub fn create(&self, params: &ProcessParams) -> Result<Box<dyn AtmosphereProcess>, AtmError> {
        if params.process_type == "group" {
            return Ok(Box::new(self.build_group(params)?));
        }
        let creator = self
            .creators
            .get(&params.process_type)
            .ok_or_else(|| AtmError::UnknownProcessType(params.process_type.clone()))?;
        let proc = creator(params)?;
        log::debug!("created process `{}` ({})", proc.name(), params.process_type);
        Ok(proc)
    }

    /// Build the root of the tree. A leaf root is wrapped in a group of one.
    pub fn create_group(&self, params: &ProcessParams) -> Result<AtmosphereProcessGroup, AtmError> {
        if params.process_type == "group" {
            self.build_group(params)
        } else {
            let leaf = self.create(params)?;
            Ok(AtmosphereProcessGroup::new("atm_procs", vec![leaf]))
        }
    }

    fn build_group(&self, params: &ProcessParams) -> Result<AtmosphereProcessGroup, AtmError> {
        if params.processes.is_empty() {
            return Err(params.invalid("a group needs at least one process".into()));
        }
        let children = params
            .processes
            .iter()
            .map(|p| self.create(p))
            .collect::<Result<Vec<_>, _>>()?;
        let name = params.name.clone().unwrap_or_else(|| "atm_procs".into());
        Ok(AtmosphereProcessGroup::new(name, children))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(v: serde_json::Value) -> ProcessParams {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn builds_nested_groups() {
        let f = ProcessFactory::with_builtins();
        let p = params(json!({
            "type": "group",
            "name": "physics",
            "processes": [
                { "type": "column_diagnostics", "grid": "g" },
                { "type": "group", "processes": [
                    { "type": "column_diagnostics", "name": "diag2", "grid": "g" }
                ]}
            ]
        }));
        let g = f.create_group(&p).unwrap();
        assert_eq!(g.name(), "physics");
        assert_eq!(g.len(), 2);
        let inner = g.processes().nth(1).and_then(|p| p.as_group()).unwrap();
        assert_eq!(inner.processes().next().unwrap().name(), "diag2");
    }

    #[test]
    fn unknown_types_and_empty_groups_fail() {
        let f = ProcessFactory::with_builtins();
        assert!(matches!(
            f.create(&params(json!({"type": "dynamics"}))),
            Err(AtmError::UnknownProcessType(t)) if t == "dynamics"
        ));
        assert!(matches!(
            f.create(&params(json!({"type": "group"}))),
            Err(AtmError::InvalidProcessParams { .. })
        ));
        let leaf = f
            .create_group(&params(json!({"type": "column_diagnostics", "grid": "g"})))
            .unwrap();
        assert_eq!(leaf.len(), 1);
    }
}
