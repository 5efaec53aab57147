//! Thin façade over intra-process (threads) or inter-process (MPI) message passing.
//!
//! Messages are *contiguous byte slices* (no zero-copy guarantees).
//! All handles are **waitable** but non-blocking: the exchange code calls
//! `.wait()` before it trusts that a buffer is ready, and always drains
//! every send handle before returning.

use bytes::Bytes;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;

/// Non-blocking point-to-point communication.
pub trait Communicator: Send + Sync + 'static {
    /// Handle returned by `isend`.
    type SendHandle: Wait;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;
    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> Self::RecvHandle;

    /// Rank of this process within the communicator.
    fn rank(&self) -> usize;
    /// Number of ranks in the communicator.
    fn size(&self) -> usize;

    /// Opaque identity of the underlying communicator, used to detect two
    /// subsystems being driven through different communicators.
    fn handle_id(&self) -> u64 {
        0
    }
}

/// Anything that can be waited on.
pub trait Wait {
    /// Wait for completion and return the received data (if any).
    fn wait(self) -> Option<Vec<u8>>;

    /// Wait for completion and copy the received data into `out`.
    ///
    /// Returns the number of bytes received, or `None` if nothing arrived.
    /// `out` is only written when the sizes match exactly.
    fn wait_into(self, out: &mut [u8]) -> Option<usize>
    where
        Self: Sized,
    {
        let raw = self.wait()?;
        if raw.len() == out.len() {
            out.copy_from_slice(&raw);
        }
        Some(raw.len())
    }
}

impl Wait for () {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
}

/// Typed message tag. Each exchange phase gets its own tag so that messages
/// from different phases can never be confused.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct CommTag(pub u16);

impl CommTag {
    pub const fn new(tag: u16) -> Self {
        Self(tag)
    }
    pub const fn as_u16(self) -> u16 {
        self.0
    }
    /// Derive a sibling tag, e.g. one per exchange stage.
    pub const fn offset(self, by: u16) -> Self {
        Self(self.0.wrapping_add(by))
    }
}

/// Tags used by the coarsening remapper.
#[derive(Copy, Clone, Debug)]
pub struct RemapCommTags {
    pub sizes: CommTag,
    pub gids: CommTag,
    pub data: CommTag,
}

impl RemapCommTags {
    pub const fn from_base(base: CommTag) -> Self {
        Self {
            sizes: base,
            gids: base.offset(1),
            data: base.offset(2),
        }
    }
}

impl Default for RemapCommTags {
    fn default() -> Self {
        Self::from_base(CommTag::new(0x5200))
    }
}

/// Compile-time no-op comm for pure serial runs and unit tests.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Communicator for NoComm {
    type SendHandle = ();
    type RecvHandle = ();

    fn isend(&self, _peer: usize, _tag: u16, _buf: &[u8]) {}
    fn irecv(&self, _peer: usize, _tag: u16, _buf: &mut [u8]) {}

    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
}

// --- LocalComm: intra-process, one thread per simulated rank ---
type Key = (usize, usize, u16); // (src, dst, tag)

#[derive(Debug, Default)]
struct Mailbox {
    queues: DashMap<Key, VecDeque<Bytes>>,
}

/// In-process communicator: every rank of a world shares one mailbox, and
/// messages between a (src, dst, tag) triple are delivered in FIFO order.
#[derive(Clone, Debug)]
pub struct LocalComm {
    rank: usize,
    size: usize,
    mailbox: Arc<Mailbox>,
}

impl LocalComm {
    /// Create a world of `size` ranks sharing one mailbox.
    pub fn world(size: usize) -> Vec<LocalComm> {
        let mailbox = Arc::new(Mailbox::default());
        (0..size)
            .map(|rank| LocalComm {
                rank,
                size,
                mailbox: Arc::clone(&mailbox),
            })
            .collect()
    }
}

/// Receive handle for [`LocalComm`]; polls the shared mailbox on `wait`.
pub struct LocalHandle {
    mailbox: Arc<Mailbox>,
    key: Key,
    len: usize,
}

impl LocalHandle {
    fn pop(&self) -> Bytes {
        loop {
            if let Some(mut queue) = self.mailbox.queues.get_mut(&self.key) {
                if let Some(bytes) = queue.pop_front() {
                    return bytes;
                }
            }
            std::thread::yield_now();
        }
    }
}

impl Wait for LocalHandle {
    fn wait(self) -> Option<Vec<u8>> {
        let bytes = self.pop();
        let n = self.len.min(bytes.len());
        Some(bytes[..n].to_vec())
    }

    fn wait_into(self, out: &mut [u8]) -> Option<usize> {
        let bytes = self.pop();
        if bytes.len() == out.len() {
            out.copy_from_slice(&bytes);
        }
        Some(bytes.len())
    }
}

impl Communicator for LocalComm {
    type SendHandle = ();
    type RecvHandle = LocalHandle;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) {
        let key = (self.rank, peer, tag);
        self.mailbox
            .queues
            .entry(key)
            .or_default()
            .push_back(Bytes::copy_from_slice(buf));
    }

    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> LocalHandle {
        LocalHandle {
            mailbox: Arc::clone(&self.mailbox),
            key: (peer, self.rank, tag),
            len: buf.len(),
        }
    }

    fn rank(&self) -> usize {
        self.rank
    }
    fn size(&self) -> usize {
        self.size
    }
    fn handle_id(&self) -> u64 {
        Arc::as_ptr(&self.mailbox) as usize as u64
    }
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::{Communicator, Wait};
    use crate::atm_error::{AtmError, CommError};
    use mpi::environment::Universe;
    use mpi::raw::AsRaw;
    use mpi::request::{Request, StaticScope};
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Message buffers kept for reuse between exchanges.
    const MAX_POOLED_BUFFERS: usize = 64;

    /// Heap buffers returned by completed requests. Exchanges repeat the
    /// same message sizes every step, so after the first step every request
    /// finds a buffer of the right length here.
    #[derive(Default)]
    struct BufferPool {
        free: Mutex<Vec<Box<[u8]>>>,
    }

    impl BufferPool {
        fn take(&self, len: usize) -> Box<[u8]> {
            let mut free = self.free.lock();
            match free.iter().position(|b| b.len() == len) {
                Some(i) => free.swap_remove(i),
                None => vec![0u8; len].into_boxed_slice(),
            }
        }

        fn give(&self, buf: Box<[u8]>) {
            let mut free = self.free.lock();
            if free.len() < MAX_POOLED_BUFFERS {
                free.push(buf);
            }
        }
    }

    /// MPI world communicator. Owns the MPI universe, so MPI is finalized
    /// when the last clone is dropped.
    #[derive(Clone)]
    pub struct MpiComm {
        pub world: Arc<SimpleCommunicator>,
        rank: usize,
        size: usize,
        pool: Arc<BufferPool>,
        _universe: Arc<Universe>,
    }

    // The communicator is only driven from the control thread; MPI is
    // initialized with the default (funneled or better) threading level.
    unsafe impl Send for MpiComm {}
    unsafe impl Sync for MpiComm {}

    impl MpiComm {
        pub fn new() -> Result<Self, AtmError> {
            let universe = mpi::initialize().ok_or_else(|| AtmError::CommError {
                neighbor: 0,
                source: Box::new(CommError("MPI was already initialized".into())),
            })?;
            let world = universe.world();
            let rank = world.rank() as usize;
            let size = world.size() as usize;
            Ok(Self {
                world: Arc::new(world),
                rank,
                size,
                pool: Arc::default(),
                _universe: Arc::new(universe),
            })
        }
    }

    /// Pending MPI request together with the heap buffer it reads or fills.
    /// The buffer goes back to the pool once the request completes.
    pub struct MpiHandle {
        req: Option<Request<'static, [u8]>>,
        data: Box<[u8]>,
        pool: Arc<BufferPool>,
    }

    unsafe impl Send for MpiHandle {}

    impl MpiHandle {
        fn complete(&mut self) {
            if let Some(req) = self.req.take() {
                req.wait();
            }
        }
    }

    impl Wait for MpiHandle {
        fn wait(mut self) -> Option<Vec<u8>> {
            self.complete();
            Some(self.data.to_vec())
        }

        fn wait_into(mut self, out: &mut [u8]) -> Option<usize> {
            self.complete();
            if self.data.len() == out.len() {
                out.copy_from_slice(&self.data);
            }
            Some(self.data.len())
        }
    }

    impl Drop for MpiHandle {
        fn drop(&mut self) {
            // `data` must outlive the request.
            self.complete();
            self.pool.give(std::mem::take(&mut self.data));
        }
    }

    impl Communicator for MpiComm {
        type SendHandle = MpiHandle;
        type RecvHandle = MpiHandle;

        fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> MpiHandle {
            let mut data = self.pool.take(buf.len());
            data.copy_from_slice(buf);
            // SAFETY: the heap allocation behind `data` never moves and is
            // kept alive by the handle until the request completes.
            let slice: &'static [u8] =
                unsafe { std::slice::from_raw_parts(data.as_ptr(), data.len()) };
            let req = self
                .world
                .process_at_rank(peer as i32)
                .immediate_send_with_tag(StaticScope, slice, tag as i32);
            MpiHandle {
                req: Some(req),
                data,
                pool: Arc::clone(&self.pool),
            }
        }

        fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> MpiHandle {
            let mut data = self.pool.take(buf.len());
            // SAFETY: see `isend`; the handle owns `data` until completion.
            let slice: &'static mut [u8] =
                unsafe { std::slice::from_raw_parts_mut(data.as_mut_ptr(), data.len()) };
            let req = self
                .world
                .process_at_rank(peer as i32)
                .immediate_receive_into_with_tag(StaticScope, slice, tag as i32);
            MpiHandle {
                req: Some(req),
                data,
                pool: Arc::clone(&self.pool),
            }
        }

        fn rank(&self) -> usize {
            self.rank
        }
        fn size(&self) -> usize {
            self.size
        }
        fn handle_id(&self) -> u64 {
            self.world.as_raw() as usize as u64
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;
