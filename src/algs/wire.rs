//! Fixed, little-endian wire types for remap plan construction.
//!
//! All multi-byte integers in these structs are **little-endian** on the wire.
//! We store them pre-LE with `.to_le()` and decode with `.from_le()`.

use bytemuck::{Pod, Zeroable};
use static_assertions::assert_eq_size;

pub fn cast_slice<T: Pod>(v: &[T]) -> &[u8] {
    bytemuck::cast_slice(v)
}

pub fn cast_slice_mut<T: Pod>(v: &mut [T]) -> &mut [u8] {
    bytemuck::cast_slice_mut(v)
}

/// Decode a received byte buffer into owned records.
///
/// Received buffers carry no alignment guarantee, so the bytes are copied
/// into a properly aligned vector instead of being reinterpreted in place.
pub fn decode_vec<T: Pod>(raw: &[u8]) -> Result<Vec<T>, String> {
    let size = std::mem::size_of::<T>();
    if raw.len() % size != 0 {
        return Err(format!(
            "buffer of {} bytes is not a multiple of the {size}-byte record",
            raw.len()
        ));
    }
    let mut out = vec![T::zeroed(); raw.len() / size];
    cast_slice_mut(&mut out).copy_from_slice(raw);
    Ok(out)
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireCount {
    pub n_le: u32, // count of following records
}

impl WireCount {
    pub fn new(n: usize) -> Self {
        Self {
            n_le: (n as u32).to_le(),
        }
    }
    pub fn get(&self) -> usize {
        u32::from_le(self.n_le) as usize
    }
}

/// A global DOF identifier carried on the wire.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireGid {
    pub gid_le: u64,
}

impl WireGid {
    pub fn of(gid: u64) -> Self {
        Self {
            gid_le: gid.to_le(),
        }
    }
    pub fn get(&self) -> u64 {
        u64::from_le(self.gid_le)
    }
}

assert_eq_size!(WireCount, u32);
assert_eq_size!(WireGid, u64);
