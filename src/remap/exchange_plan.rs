//! Exchange plan: moves overlapped-target partial sums to the ranks that own
//! the target rows.
//!
//! The plan is built once, after the remapped field set is final, and reused
//! for every forward remap. Buffers are laid out peer by peer (ascending
//! rank); inside a peer's segment each field occupies one block of
//! `num_gids * column_size` values, fields in registration order.
//!
//! Values travel as native `f64` bytes; GIDs and counts use the little-endian
//! wire records of [`crate::algs::wire`].

use crate::algs::communicator::{Communicator, RemapCommTags, Wait};
use crate::algs::exchange::{exchange_counts, exchange_gid_lists};
use crate::algs::wire::{cast_slice, cast_slice_mut};
use crate::atm_error::{AtmError, CommError};
use crate::grid::{Gid, Grid};
use std::collections::{BTreeMap, BTreeSet};

/// Local indices exchanged with one peer and where they sit in the buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerWindow {
    pub pid: usize,
    pub lids: Vec<usize>,
    /// Offset in GIDs from the start of the buffer.
    pub offset: usize,
}

#[derive(Clone, Debug)]
pub struct ExchangePlan {
    rank: usize,
    tags: RemapCommTags,
    col_sizes: Vec<usize>,
    total_col_size: usize,
    send: Vec<PeerWindow>,
    recv: Vec<PeerWindow>,
    send_buf: Vec<f64>,
    recv_buf: Vec<f64>,
    total_num_recv_gids: usize,
}

fn windows(by_pid: BTreeMap<usize, Vec<usize>>) -> Vec<PeerWindow> {
    let mut offset = 0;
    by_pid
        .into_iter()
        .filter(|(_, lids)| !lids.is_empty())
        .map(|(pid, lids)| {
            let w = PeerWindow { pid, lids, offset };
            offset += w.lids.len();
            w
        })
        .collect()
}

impl ExchangePlan {
    /// Build the plan.
    ///
    /// `ov_grid` holds the target rows this rank computed partial sums for;
    /// `owner_of` gives the rank owning each target GID on `tgt_grid`.
    /// `col_sizes` has one entry per remapped field.
    pub fn build<C, F>(
        comm: &C,
        tags: RemapCommTags,
        ov_grid: &Grid,
        tgt_grid: &Grid,
        owner_of: F,
        col_sizes: Vec<usize>,
    ) -> Result<Self, AtmError>
    where
        C: Communicator,
        F: Fn(Gid) -> Result<usize, AtmError>,
    {
        let rank = comm.rank();

        // 1) group overlapped rows by owning rank
        let mut send_lids: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        let mut send_gids: BTreeMap<usize, Vec<Gid>> = BTreeMap::new();
        for (lid, &gid) in ov_grid.gids().iter().enumerate() {
            let pid = owner_of(gid)?;
            send_lids.entry(pid).or_default().push(lid);
            send_gids.entry(pid).or_default().push(gid);
        }

        // 2) rows we keep are received from ourselves
        let mut recv_lids: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        if let Some(own) = send_gids.remove(&rank) {
            let lids = own
                .iter()
                .map(|&g| tgt_grid.try_lid_of(g))
                .collect::<Result<Vec<_>, _>>()?;
            recv_lids.insert(rank, lids);
        }

        // 3) tell every other rank how many rows to expect, then ship GIDs
        let peers: BTreeSet<usize> = (0..comm.size()).filter(|&p| p != rank).collect();
        let send_counts: BTreeMap<usize, usize> =
            send_gids.iter().map(|(&p, g)| (p, g.len())).collect();
        let recv_counts = exchange_counts(&send_counts, comm, tags.sizes, &peers)?;
        let recv_gids = exchange_gid_lists(&send_gids, &recv_counts, comm, tags.gids)?;
        for (pid, gids) in recv_gids {
            let lids = gids
                .iter()
                .map(|&g| tgt_grid.try_lid_of(g))
                .collect::<Result<Vec<_>, _>>()?;
            recv_lids.insert(pid, lids);
        }

        let send = windows(send_lids);
        let recv = windows(recv_lids);
        let total_col_size: usize = col_sizes.iter().sum();
        let total_num_send_gids: usize = send.iter().map(|w| w.lids.len()).sum();
        let total_num_recv_gids: usize = recv.iter().map(|w| w.lids.len()).sum();
        log::debug!(
            "rank {rank}: remap plan sends {total_num_send_gids} rows to {} ranks, receives {total_num_recv_gids} rows from {} ranks",
            send.len(),
            recv.len()
        );

        Ok(Self {
            rank,
            tags,
            send_buf: vec![0.0; total_num_send_gids * total_col_size],
            recv_buf: vec![0.0; total_num_recv_gids * total_col_size],
            col_sizes,
            total_col_size,
            send,
            recv,
            total_num_recv_gids,
        })
    }

    pub fn send_windows(&self) -> &[PeerWindow] {
        &self.send
    }

    pub fn recv_windows(&self) -> &[PeerWindow] {
        &self.recv
    }

    /// Rows received per remap, counting every contribution separately.
    pub fn total_num_recv_gids(&self) -> usize {
        self.total_num_recv_gids
    }

    /// Value range of field `f` inside the segment of window `w`.
    fn field_block(&self, w: &PeerWindow, f: usize) -> (usize, usize) {
        let n = w.lids.len();
        let prefix: usize = self.col_sizes[..f].iter().sum();
        (w.offset * self.total_col_size + n * prefix, self.col_sizes[f])
    }

    fn segment(&self, w: &PeerWindow) -> std::ops::Range<usize> {
        let start = w.offset * self.total_col_size;
        start..start + w.lids.len() * self.total_col_size
    }

    /// Gather overlapped-target values of every field into the send buffer.
    pub fn pack(&mut self, ov_fields: &[Vec<f64>]) {
        for w in &self.send {
            for (f, field) in ov_fields.iter().enumerate() {
                let (block, cs) = self.field_block(w, f);
                for (k, &lid) in w.lids.iter().enumerate() {
                    let dst = block + k * cs;
                    self.send_buf[dst..dst + cs].copy_from_slice(&field[lid * cs..(lid + 1) * cs]);
                }
            }
        }
    }

    /// Post all receives and sends, copy our own segment locally, and wait
    /// for everything. Every send is drained before returning, also on error.
    pub fn exchange<C: Communicator>(&mut self, comm: &C) -> Result<(), AtmError> {
        let tag = self.tags.data.as_u16();

        let mut pending_recvs = Vec::with_capacity(self.recv.len());
        for w in self.recv.iter().filter(|w| w.pid != self.rank) {
            let range = self.segment(w);
            let h = comm.irecv(w.pid, tag, cast_slice_mut(&mut self.recv_buf[range.clone()]));
            pending_recvs.push((w.pid, range, h));
        }

        let mut pending_sends = Vec::with_capacity(self.send.len());
        for w in self.send.iter().filter(|w| w.pid != self.rank) {
            let range = self.segment(w);
            pending_sends.push(comm.isend(w.pid, tag, cast_slice(&self.send_buf[range])));
        }

        let own_send = self.send.iter().find(|w| w.pid == self.rank).map(|w| self.segment(w));
        let own_recv = self.recv.iter().find(|w| w.pid == self.rank).map(|w| self.segment(w));
        if let (Some(src), Some(dst)) = (own_send, own_recv) {
            self.recv_buf[dst].copy_from_slice(&self.send_buf[src]);
        }

        // Received bytes land directly in the plan's persistent buffer.
        let mut maybe_err = None;
        for (pid, range, h) in pending_recvs {
            let out = cast_slice_mut(&mut self.recv_buf[range]);
            let expected = out.len();
            match h.wait_into(out) {
                Some(got) if got == expected => {}
                Some(got) if maybe_err.is_none() => {
                    maybe_err = Some(AtmError::BufferSizeMismatch {
                        neighbor: pid,
                        expected,
                        got,
                    });
                }
                None if maybe_err.is_none() => {
                    maybe_err = Some(AtmError::CommError {
                        neighbor: pid,
                        source: Box::new(CommError(format!(
                            "failed to receive remap data from rank {pid}"
                        ))),
                    });
                }
                _ => {}
            }
        }

        for send in pending_sends {
            let _ = send.wait();
        }

        match maybe_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Add received contributions into `tgt_fields`, peers in ascending rank.
    pub fn unpack(&self, tgt_fields: &mut [Vec<f64>]) {
        for w in &self.recv {
            for (f, field) in tgt_fields.iter_mut().enumerate() {
                let (block, cs) = self.field_block(w, f);
                for (k, &lid) in w.lids.iter().enumerate() {
                    let src = &self.recv_buf[block + k * cs..block + (k + 1) * cs];
                    for (t, &v) in field[lid * cs..(lid + 1) * cs].iter_mut().zip(src) {
                        *t += v;
                    }
                }
            }
        }
    }
}
