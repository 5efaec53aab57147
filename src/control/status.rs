//! Driver initialization stages as a guarded, monotonic state machine.

use crate::atm_error::AtmError;
use itertools::Itertools;
use std::fmt;

/// One completed initialization stage. Declaration order is the nominal
/// setup order.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DriverStage {
    CommSet,
    ParamsSet,
    ProcessesCreated,
    GridsCreated,
    FieldsCreated,
    FieldsInitialized,
    OutputInitialized,
    ProcessesInitialized,
}

impl DriverStage {
    pub const ALL: [DriverStage; 8] = [
        DriverStage::CommSet,
        DriverStage::ParamsSet,
        DriverStage::ProcessesCreated,
        DriverStage::GridsCreated,
        DriverStage::FieldsCreated,
        DriverStage::FieldsInitialized,
        DriverStage::OutputInitialized,
        DriverStage::ProcessesInitialized,
    ];

    #[inline]
    fn bit(self) -> u16 {
        1 << (self as u16)
    }
}

impl fmt::Display for DriverStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DriverStage::CommSet => "comm-set",
            DriverStage::ParamsSet => "params-set",
            DriverStage::ProcessesCreated => "processes-created",
            DriverStage::GridsCreated => "grids-created",
            DriverStage::FieldsCreated => "fields-created",
            DriverStage::FieldsInitialized => "fields-initialized",
            DriverStage::OutputInitialized => "output-initialized",
            DriverStage::ProcessesInitialized => "processes-initialized",
        };
        f.write_str(s)
    }
}

/// Set of completed stages. Stages are only ever added; the set is emptied
/// only by [`reset`](Self::reset) when the driver is torn down.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DriverStatus {
    bits: u16,
}

impl DriverStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_set(&self, stage: DriverStage) -> bool {
        self.bits & stage.bit() != 0
    }

    pub fn stages(&self) -> impl Iterator<Item = DriverStage> + '_ {
        DriverStage::ALL.into_iter().filter(|s| self.is_set(*s))
    }

    pub fn is_fully_initialized(&self) -> bool {
        DriverStage::ALL.iter().all(|s| self.is_set(*s))
    }

    /// Verify that every `required` stage is set and no `forbidden` one is.
    pub fn check(
        &self,
        operation: &'static str,
        required: &[DriverStage],
        forbidden: &[DriverStage],
    ) -> Result<(), AtmError> {
        let missing: Vec<_> = required.iter().filter(|s| !self.is_set(**s)).collect();
        let present: Vec<_> = forbidden.iter().filter(|s| self.is_set(**s)).collect();
        if missing.is_empty() && present.is_empty() {
            return Ok(());
        }
        Err(AtmError::StatusCheckFailed {
            operation,
            missing: missing.iter().join(", "),
            forbidden: present.iter().join(", "),
            status: self.to_string(),
        })
    }

    /// Guarded transition: [`check`](Self::check), then mark `to` complete.
    pub fn transition(
        &mut self,
        operation: &'static str,
        required: &[DriverStage],
        forbidden: &[DriverStage],
        to: DriverStage,
    ) -> Result<(), AtmError> {
        self.check(operation, required, forbidden)?;
        self.bits |= to.bit();
        Ok(())
    }

    pub(crate) fn reset(&mut self) {
        self.bits = 0;
    }
}

impl fmt::Display for DriverStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", self.stages().join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use DriverStage::*;

    #[test]
    fn transitions_are_guarded() {
        let mut st = DriverStatus::new();
        let err = st
            .transition("create_grids", &[ProcessesCreated], &[GridsCreated], GridsCreated)
            .unwrap_err();
        match err {
            AtmError::StatusCheckFailed { missing, .. } => assert_eq!(missing, "processes-created"),
            other => panic!("unexpected error {other}"),
        }
        assert!(!st.is_set(GridsCreated));

        st.transition("set_comm", &[], &[CommSet], CommSet).unwrap();
        assert!(st.transition("set_comm", &[], &[CommSet], CommSet).is_err());
        assert!(st.is_set(CommSet));
        assert_eq!(st.to_string(), "{comm-set}");
    }

    #[test]
    fn fully_initialized_needs_every_stage() {
        let mut st = DriverStatus::new();
        for s in DriverStage::ALL {
            assert!(!st.is_fully_initialized());
            st.transition("step", &[], &[], s).unwrap();
        }
        assert!(st.is_fully_initialized());
        st.reset();
        assert_eq!(st.stages().count(), 0);
    }
}
