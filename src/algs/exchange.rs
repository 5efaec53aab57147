//! Point-to-point exchange helpers used while building remap plans.
//!
//! Stage 1 exchanges per-peer item counts with every other rank; stage 2
//! ships GID lists to the peers with a nonzero count. Both stages post all
//! receives before sending and guarantee that every send handle is drained
//! before returning, even if an error occurs.

use crate::algs::communicator::{CommTag, Communicator, Wait};
use crate::algs::wire::{WireCount, WireGid, cast_slice, cast_slice_mut, decode_vec};
use crate::atm_error::{AtmError, CommError};
use std::collections::{BTreeMap, BTreeSet};

/// Tell every rank in `peers` how many items we will send it, and learn how
/// many items each of them will send us. Peers absent from `send_counts`
/// receive a zero.
pub fn exchange_counts<C>(
    send_counts: &BTreeMap<usize, usize>,
    comm: &C,
    tag: CommTag,
    peers: &BTreeSet<usize>,
) -> Result<BTreeMap<usize, usize>, AtmError>
where
    C: Communicator,
{
    // 1) post all receives
    let mut recv_size: BTreeMap<usize, (C::RecvHandle, WireCount)> = BTreeMap::new();
    for &nbr in peers {
        let mut cnt = WireCount::new(0);
        let h = comm.irecv(
            nbr,
            tag.as_u16(),
            cast_slice_mut(std::slice::from_mut(&mut cnt)),
        );
        recv_size.insert(nbr, (h, cnt));
    }

    // 2) post all sends and keep buffers alive until completion
    let mut pending_sends = Vec::with_capacity(peers.len());
    let mut send_bufs = Vec::with_capacity(peers.len());
    for &nbr in peers {
        let count = WireCount::new(send_counts.get(&nbr).copied().unwrap_or(0));
        pending_sends.push(comm.isend(
            nbr,
            tag.as_u16(),
            cast_slice(std::slice::from_ref(&count)),
        ));
        send_bufs.push(count);
    }

    // 3) wait for all recvs, collect counts (but do not early-return)
    let mut sizes_in = BTreeMap::new();
    let mut maybe_err = None;
    for (nbr, (h, mut cnt)) in recv_size {
        match h.wait() {
            Some(data) if data.len() == std::mem::size_of::<WireCount>() => {
                if maybe_err.is_none() {
                    cast_slice_mut(std::slice::from_mut(&mut cnt)).copy_from_slice(&data);
                    sizes_in.insert(nbr, cnt.get());
                }
            }
            Some(data) if maybe_err.is_none() => {
                maybe_err = Some(AtmError::BufferSizeMismatch {
                    neighbor: nbr,
                    expected: std::mem::size_of::<WireCount>(),
                    got: data.len(),
                });
            }
            None if maybe_err.is_none() => {
                maybe_err = Some(AtmError::CommError {
                    neighbor: nbr,
                    source: Box::new(CommError(format!(
                        "failed to receive count from rank {nbr}"
                    ))),
                });
            }
            _ => {} // already have an error; just drain
        }
    }

    // 4) always drain all send handles before returning
    for send in pending_sends {
        let _ = send.wait();
    }
    drop(send_bufs);

    match maybe_err {
        Some(err) => Err(err),
        None => Ok(sizes_in),
    }
}

/// Ship `send_lists[peer]` to each peer and receive `recv_counts[peer]` GIDs
/// from each peer. Peers with a zero count in either direction exchange
/// nothing.
pub fn exchange_gid_lists<C>(
    send_lists: &BTreeMap<usize, Vec<u64>>,
    recv_counts: &BTreeMap<usize, usize>,
    comm: &C,
    tag: CommTag,
) -> Result<BTreeMap<usize, Vec<u64>>, AtmError>
where
    C: Communicator,
{
    let mut recv_data: BTreeMap<usize, (C::RecvHandle, usize)> = BTreeMap::new();
    for (&nbr, &n_items) in recv_counts.iter().filter(|(_, n)| **n > 0) {
        let mut buffer = vec![WireGid::of(0); n_items];
        let h = comm.irecv(nbr, tag.as_u16(), cast_slice_mut(&mut buffer));
        recv_data.insert(nbr, (h, n_items));
    }

    let mut pending_sends = Vec::with_capacity(send_lists.len());
    let mut send_bufs = Vec::with_capacity(send_lists.len());
    for (&nbr, gids) in send_lists.iter().filter(|(_, g)| !g.is_empty()) {
        let wire: Vec<WireGid> = gids.iter().map(|&g| WireGid::of(g)).collect();
        pending_sends.push(comm.isend(nbr, tag.as_u16(), cast_slice(&wire)));
        send_bufs.push(wire);
    }

    let mut out = BTreeMap::new();
    let mut maybe_err = None;
    for (nbr, (h, n_items)) in recv_data {
        let expected = n_items * std::mem::size_of::<WireGid>();
        match h.wait() {
            Some(raw) if raw.len() == expected => {
                if maybe_err.is_none() {
                    match decode_vec::<WireGid>(&raw) {
                        Ok(gids) => {
                            out.insert(nbr, gids.iter().map(WireGid::get).collect());
                        }
                        Err(reason) => {
                            maybe_err = Some(AtmError::CommError {
                                neighbor: nbr,
                                source: Box::new(CommError(reason)),
                            });
                        }
                    }
                }
            }
            Some(raw) if maybe_err.is_none() => {
                maybe_err = Some(AtmError::BufferSizeMismatch {
                    neighbor: nbr,
                    expected,
                    got: raw.len(),
                });
            }
            None if maybe_err.is_none() => {
                maybe_err = Some(AtmError::CommError {
                    neighbor: nbr,
                    source: Box::new(CommError(format!(
                        "failed to receive gid list from rank {nbr}"
                    ))),
                });
            }
            _ => {}
        }
    }

    for send in pending_sends {
        let _ = send.wait();
    }
    drop(send_bufs);

    match maybe_err {
        Some(err) => Err(err),
        None => Ok(out),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::{LocalComm, NoComm};

    #[test]
    fn zero_peers_is_empty() {
        let res = exchange_counts(&BTreeMap::new(), &NoComm, CommTag::new(0x10), &BTreeSet::new());
        assert!(res.unwrap().is_empty());
    }

    #[test]
    fn counts_and_gids_between_two_ranks() {
        let world = LocalComm::world(2);
        let results: Vec<_> = std::thread::scope(|s| {
            let handles: Vec<_> = world
                .iter()
                .map(|comm| {
                    s.spawn(move || {
                        let me = comm.rank();
                        let other = 1 - me;
                        let mut lists = BTreeMap::new();
                        lists.insert(other, vec![10 * me as u64, 10 * me as u64 + 1, 7]);
                        let counts: BTreeMap<usize, usize> =
                            lists.iter().map(|(p, l)| (*p, l.len())).collect();
                        let peers = BTreeSet::from([other]);
                        let recv = exchange_counts(&counts, comm, CommTag::new(0x20), &peers).unwrap();
                        exchange_gid_lists(&lists, &recv, comm, CommTag::new(0x21)).unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(results[0][&1], vec![10, 11, 7]);
        assert_eq!(results[1][&0], vec![0, 1, 7]);
    }

    #[test]
    fn malformed_count_is_reported_after_draining() {
        let world = LocalComm::world(2);
        let tag = CommTag::new(0x30);
        // Rank 1 sends a 3-byte "count".
        world[1].isend(0, tag.as_u16(), &[1, 2, 3]);
        let res = exchange_counts(&BTreeMap::new(), &world[0], tag, &BTreeSet::from([1]));
        assert!(matches!(res, Err(AtmError::BufferSizeMismatch { neighbor: 1, .. })));
        // Our send to rank 1 still went out.
        let mut buf = [0u8; 4];
        assert_eq!(world[1].irecv(0, tag.as_u16(), &mut buf).wait().unwrap().len(), 4);
    }
}
