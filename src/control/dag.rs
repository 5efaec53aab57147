//! Dependency graph of the process tree, written as Graphviz dot.
//!
//! Nodes are leaf processes in execution order plus a node standing for the
//! state at the beginning of the time step (initial conditions or the
//! previous step) and, when attached, the surface coupling. An input that
//! nobody provides is flagged as missing.

use crate::atm_error::AtmError;
use crate::control::atm_process::AtmosphereProcess;
use crate::field::identifier::FieldIdentifier;
use std::collections::BTreeSet;
use std::io::Write;
use std::path::Path;

#[derive(Clone, Debug, Default)]
struct DagNode {
    name: String,
    required: Vec<FieldIdentifier>,
    computed: Vec<FieldIdentifier>,
    /// `(provider node, field)` for each satisfied input.
    edges: Vec<(usize, FieldIdentifier)>,
    missing: Vec<FieldIdentifier>,
}

#[derive(Clone, Debug, Default)]
pub struct AtmProcDag {
    nodes: Vec<DagNode>,
}

const BEGIN: usize = 0;

fn collect_leaves<'a>(p: &'a dyn AtmosphereProcess, out: &mut Vec<&'a dyn AtmosphereProcess>) {
    match p.as_group() {
        Some(g) => g.processes().for_each(|c| collect_leaves(c, out)),
        None => out.push(p),
    }
}

impl AtmProcDag {
    /// Build the graph for `root`.
    ///
    /// `available` holds `(name, grid)` of fields valid at the beginning of a
    /// step; `imports`/`exports` are the surface coupling field names.
    pub fn build(
        root: &dyn AtmosphereProcess,
        available: &BTreeSet<(String, String)>,
        imports: &[String],
        exports: &[String],
    ) -> Self {
        let mut leaves = Vec::new();
        collect_leaves(root, &mut leaves);

        let mut nodes = vec![DagNode {
            name: "Begin of atm time step".into(),
            ..DagNode::default()
        }];
        let has_coupling = !imports.is_empty() || !exports.is_empty();
        let key = |id: &FieldIdentifier| (id.name().to_string(), id.grid_name().to_string());

        for leaf in &leaves {
            let mut node = DagNode {
                name: leaf.name().to_string(),
                required: leaf.required_fields(),
                computed: leaf.computed_fields(),
                ..DagNode::default()
            };
            for id in &node.required {
                let provider = nodes
                    .iter()
                    .enumerate()
                    .skip(1)
                    .rev()
                    .find(|(_, n)| n.computed.contains(id))
                    .map(|(i, _)| i);
                match provider {
                    Some(i) => node.edges.push((i, id.clone())),
                    None if available.contains(&key(id)) || imports.iter().any(|f| f == id.name()) => {
                        node.edges.push((BEGIN, id.clone()))
                    }
                    None => node.missing.push(id.clone()),
                }
            }
            nodes.push(node);
        }

        if has_coupling {
            let mut node = DagNode {
                name: "Surface coupling".into(),
                ..DagNode::default()
            };
            for name in exports {
                let provider = nodes
                    .iter()
                    .enumerate()
                    .skip(1)
                    .rev()
                    .find_map(|(i, n)| n.computed.iter().find(|c| c.name() == name).map(|c| (i, c.clone())));
                match provider {
                    Some((i, id)) => node.edges.push((i, id)),
                    None => log::warn!("surface coupling exports `{name}`, which no process computes"),
                }
            }
            nodes.push(node);
        }
        Self { nodes }
    }

    pub fn has_unmet_dependencies(&self) -> bool {
        self.nodes.iter().any(|n| !n.missing.is_empty())
    }

    /// Every missing input, as `name[grid]`.
    pub fn missing_fields(&self) -> Vec<String> {
        let set: BTreeSet<String> = self
            .nodes
            .iter()
            .flat_map(|n| n.missing.iter().map(|id| format!("{}[{}]", id.name(), id.grid_name())))
            .collect();
        set.into_iter().collect()
    }

    /// Write the graph in dot format.
    ///
    /// Verbosity 0 shows processes and missing inputs; 1 adds field names on
    /// edges; 2 and above list each process's inputs and outputs with layouts.
    pub fn write_dot<W: Write>(&self, w: &mut W, verbosity: i32) -> Result<(), AtmError> {
        writeln!(w, "digraph atm_dag {{")?;
        for (i, n) in self.nodes.iter().enumerate() {
            let mut label = n.name.clone();
            if verbosity >= 2 {
                for id in &n.required {
                    label.push_str(&format!("\\n(in) {id}"));
                }
                for id in &n.computed {
                    label.push_str(&format!("\\n(out) {id}"));
                }
            }
            for id in &n.missing {
                label.push_str(&format!("\\nMISSING: {}[{}]", id.name(), id.grid_name()));
            }
            let color = if n.missing.is_empty() { "black" } else { "red" };
            writeln!(w, "  {i} [shape=box, color={color}, label=\"{label}\"];")?;
        }
        for (i, n) in self.nodes.iter().enumerate() {
            for (from, id) in &n.edges {
                if verbosity >= 1 {
                    writeln!(w, "  {from} -> {i} [label=\"{}\"];", id.name())?;
                } else {
                    writeln!(w, "  {from} -> {i};")?;
                }
            }
        }
        writeln!(w, "}}")?;
        Ok(())
    }

    /// Write the graph to `path` unless `verbosity` is negative.
    pub fn write_dot_file(&self, path: &Path, verbosity: i32) -> Result<(), AtmError> {
        if verbosity < 0 {
            return Ok(());
        }
        let mut file = std::io::BufWriter::new(std::fs::File::create(path)?);
        self.write_dot(&mut file, verbosity)?;
        file.flush()?;
        log::info!("wrote process dependency graph to {}", path.display());
        Ok(())
    }
}
