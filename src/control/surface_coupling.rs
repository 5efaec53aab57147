//! Hook for an external surface-coupling component.

use crate::atm_error::AtmError;
use crate::field::repository::FieldRepository;

/// Imports surface fluxes before the atmosphere step and exports
/// atmosphere state after it.
pub trait SurfaceCoupling {
    /// Field names written by `do_import`.
    fn import_fields(&self) -> Vec<String>;
    /// Field names read by `do_export`.
    fn export_fields(&self) -> Vec<String>;

    fn do_import(&mut self, repo: &mut FieldRepository) -> Result<(), AtmError>;
    fn do_export(&mut self, repo: &FieldRepository) -> Result<(), AtmError>;
}
