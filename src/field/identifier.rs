//! Field identifiers: name, layout, units, and owning grid.

use crate::field::layout::FieldLayout;
use std::fmt;

/// Fully qualified description of a field. Two identifiers with the same
/// name on different grids denote different fields.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldIdentifier {
    name: String,
    layout: FieldLayout,
    units: String,
    grid: String,
}

impl FieldIdentifier {
    pub fn new(
        name: impl Into<String>,
        layout: FieldLayout,
        units: impl Into<String>,
        grid: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            layout,
            units: units.into(),
            grid: grid.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn layout(&self) -> &FieldLayout {
        &self.layout
    }

    pub fn units(&self) -> &str {
        &self.units
    }

    pub fn grid_name(&self) -> &str {
        &self.grid
    }

    /// Same name and units, different grid and layout.
    pub fn on_grid(&self, grid: impl Into<String>, layout: FieldLayout) -> Self {
        Self {
            name: self.name.clone(),
            layout,
            units: self.units.clone(),
            grid: grid.into(),
        }
    }
}

impl fmt::Display for FieldIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}] {}", self.name, self.grid, self.layout)
    }
}
