//! Process-wide registry for the I/O subsystem.
//!
//! The first driver that needs output initializes the subsystem with its
//! communicator. Later drivers may share it only through the same
//! communicator, and only the initializing driver shuts it down.

use crate::atm_error::AtmError;
use once_cell::sync::Lazy;
use parking_lot::Mutex;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct IoSession {
    comm_handle: u64,
    owner: u64,
}

static IO_SESSION: Lazy<Mutex<Option<IoSession>>> = Lazy::new(|| Mutex::new(None));

/// Initialize the subsystem for `owner`, or join an existing session.
///
/// Returns `true` if this call performed the initialization.
///
/// # Errors
/// `CommMismatch` if a session exists on a different communicator.
pub fn init_io_subsystem(comm_handle: u64, owner: u64) -> Result<bool, AtmError> {
    let mut session = IO_SESSION.lock();
    match *session {
        Some(s) if s.comm_handle != comm_handle => Err(AtmError::CommMismatch {
            inited: s.comm_handle,
            current: comm_handle,
        }),
        Some(_) => Ok(false),
        None => {
            *session = Some(IoSession { comm_handle, owner });
            log::info!("I/O subsystem initialized (comm {comm_handle:#x})");
            Ok(true)
        }
    }
}

/// Shut the subsystem down if `owner` initialized it. Returns whether it did.
pub fn finalize_io_subsystem(owner: u64) -> bool {
    let mut session = IO_SESSION.lock();
    match *session {
        Some(s) if s.owner == owner => {
            *session = None;
            log::info!("I/O subsystem finalized");
            true
        }
        _ => false,
    }
}

pub fn is_io_subsystem_initialized() -> bool {
    IO_SESSION.lock().is_some()
}

/// Communicator handle of the current session.
pub fn io_comm_handle() -> Option<u64> {
    IO_SESSION.lock().map(|s| s.comm_handle)
}
