//! Sparse remap weights read from a mapping file.
//!
//! The file is plain text, one triplet per line:
//!
//! ```text
//! # row(target GID)  col(source GID)  weight
//! 0 0 0.5
//! 0 1 0.5
//! ```
//!
//! Blank lines and `#` comments are ignored. Every rank reads the whole
//! file; the target decomposition is derived from it deterministically.

use crate::atm_error::AtmError;
use crate::grid::{Gid, block_range};
use std::collections::BTreeMap;
use std::io::BufRead;
use std::path::Path;

/// One term `W[row][col] = weight` of the sparse map.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Triplet {
    pub row: Gid,
    pub col: Gid,
    pub weight: f64,
}

#[derive(Clone, Debug, Default)]
pub struct MapFile {
    triplets: Vec<Triplet>,
}

impl MapFile {
    /// Triplets are stably sorted by `(row, col)`.
    pub fn from_triplets(mut triplets: Vec<Triplet>) -> Self {
        triplets.sort_by_key(|t| (t.row, t.col));
        Self { triplets }
    }

    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self, AtmError> {
        let mut triplets = Vec::new();
        for (i, line) in reader.lines().enumerate() {
            let line = line?;
            let body = line.split('#').next().unwrap_or("").trim();
            if body.is_empty() {
                continue;
            }
            let parse_err = |reason: String| AtmError::MapFileParse { line: i + 1, reason };
            let tokens: Vec<&str> = body.split_whitespace().collect();
            let [row, col, weight] = tokens.as_slice() else {
                return Err(parse_err(format!(
                    "expected `row col weight`, found {} fields",
                    tokens.len()
                )));
            };
            triplets.push(Triplet {
                row: row
                    .parse()
                    .map_err(|e| parse_err(format!("bad row GID `{row}`: {e}")))?,
                col: col
                    .parse()
                    .map_err(|e| parse_err(format!("bad column GID `{col}`: {e}")))?,
                weight: weight
                    .parse()
                    .map_err(|e| parse_err(format!("bad weight `{weight}`: {e}")))?,
            });
        }
        Ok(Self::from_triplets(triplets))
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, AtmError> {
        let file = std::fs::File::open(path.as_ref())?;
        let map = Self::from_reader(std::io::BufReader::new(file))?;
        log::debug!(
            "read {} remap triplets from {}",
            map.triplets.len(),
            path.as_ref().display()
        );
        Ok(map)
    }

    pub fn triplets(&self) -> &[Triplet] {
        &self.triplets
    }

    /// Distinct target GIDs, ascending.
    pub fn row_gids(&self) -> Vec<Gid> {
        let mut rows: Vec<Gid> = self.triplets.iter().map(|t| t.row).collect();
        rows.dedup();
        rows
    }

    /// Distinct source GIDs, ascending.
    pub fn col_gids(&self) -> Vec<Gid> {
        let mut cols: Vec<Gid> = self.triplets.iter().map(|t| t.col).collect();
        cols.sort_unstable();
        cols.dedup();
        cols
    }

    /// Target GIDs owned by `rank`: a block of the ascending row list.
    pub fn target_decomposition(&self, rank: usize, size: usize) -> Vec<Gid> {
        let rows = self.row_gids();
        rows[block_range(rows.len(), rank, size)].to_vec()
    }

    /// Sum of weights per target row, accumulated in triplet order.
    pub fn row_sums(&self) -> BTreeMap<Gid, f64> {
        let mut sums = BTreeMap::new();
        for t in &self.triplets {
            *sums.entry(t.row).or_insert(0.0) += t.weight;
        }
        sums
    }

    /// Check that every row sums to one within `tol`.
    ///
    /// Every offending row is logged; the first one is returned as the error.
    pub fn check_partition_of_unity(&self, tol: f64) -> Result<(), AtmError> {
        let mut first = None;
        for (row, sum) in self.row_sums() {
            if (sum - 1.0).abs() > tol {
                log::warn!("remap row {row} weights sum to {sum}");
                first.get_or_insert(AtmError::WeightSumMismatch { row, sum });
            }
        }
        match first {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
