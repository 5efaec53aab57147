//! Column-major / row-major transposition of `(ncol, nlev)` arrays.

/// Direction of a layout conversion.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TransposeDirection {
    /// Row-major `[col][lev]` to column-major `[lev][col]`.
    CToF,
    /// Column-major `[lev][col]` to row-major `[col][lev]`.
    FToC,
}

/// Transpose `src` into `dst`, both holding `ncol * nlev` values.
pub fn transpose<T: Copy>(dir: TransposeDirection, src: &[T], dst: &mut [T], ncol: usize, nlev: usize) {
    debug_assert_eq!(src.len(), ncol * nlev);
    debug_assert_eq!(dst.len(), ncol * nlev);
    for i in 0..ncol {
        for k in 0..nlev {
            match dir {
                TransposeDirection::CToF => dst[k * ncol + i] = src[i * nlev + k],
                TransposeDirection::FToC => dst[i * nlev + k] = src[k * ncol + i],
            }
        }
    }
}
