//! All-to-all-v traffic matrices
//!
//! Entry `(i, j)` is the number of chunks rank `i` sends to rank `j`. The
//! accumulated row sums locate a chunk range inside the sender's input; the
//! accumulated column sums locate where it lands in the receiver's output.

use anyhow::{bail, ensure, Context, Result};
use collsim_core::Chunk;

/// An N x N nonnegative integer traffic matrix
#[derive(Debug, Clone)]
pub struct TrafficMatrix {
    num_ranks: usize,
    entries: Vec<usize>,
}

impl TrafficMatrix {
    /// Parse from CSV text: one row per rank, `num_ranks` comma-separated
    /// nonnegative integers each.
    pub fn from_csv(text: &str, num_ranks: usize) -> Result<Self> {
        let mut entries = Vec::with_capacity(num_ranks * num_ranks);
        let mut lines = text.lines();
        for i in 0..num_ranks {
            let line = lines
                .next()
                .with_context(|| format!("traffic file ended early: no row for rank {i}"))?;
            let row = line
                .split(',')
                .map(|cell| {
                    cell.trim()
                        .parse::<usize>()
                        .with_context(|| format!("invalid traffic entry `{}` in row {i}", cell.trim()))
                })
                .collect::<Result<Vec<_>>>()?;
            ensure!(
                row.len() == num_ranks,
                "expected {num_ranks} columns in row {i}, got {}",
                row.len()
            );
            entries.extend(row);
        }
        Ok(Self { num_ranks, entries })
    }

    pub fn num_ranks(&self) -> usize {
        self.num_ranks
    }

    /// Chunks sent from rank `i` to rank `j`
    pub fn get(&self, i: usize, j: usize) -> usize {
        self.entries[i * self.num_ranks + j]
    }

    /// Accumulated row sums: `acc[i][j]` is the sum of row `i` through
    /// column `j`.
    ///
    /// ```text
    /// 0 1 2    0 1 3
    /// 3 4 5 => 3 7 12
    /// 6 7 8    6 13 21
    /// ```
    pub fn accumulated_row_sums(&self) -> Vec<usize> {
        let n = self.num_ranks;
        let mut acc = vec![0; n * n];
        for i in 0..n {
            let mut sum = 0;
            for j in 0..n {
                sum += self.get(i, j);
                acc[i * n + j] = sum;
            }
        }
        acc
    }

    /// Accumulated column sums: `acc[i][j]` is the sum of column `j`
    /// through row `i`.
    ///
    /// ```text
    /// 0 1 2    0 1 2
    /// 3 4 5 => 3 5 7
    /// 6 7 8    9 12 15
    /// ```
    pub fn accumulated_col_sums(&self) -> Vec<usize> {
        let n = self.num_ranks;
        let mut acc = vec![0; n * n];
        for j in 0..n {
            let mut sum = 0;
            for i in 0..n {
                sum += self.get(i, j);
                acc[i * n + j] = sum;
            }
        }
        acc
    }

    /// Preflight: every rank must send and receive exactly
    /// `num_ranks * chunk_factor` chunks.
    pub fn validate_totals(&self, chunk_factor: usize) -> Result<()> {
        let n = self.num_ranks;
        let expected = n * chunk_factor;
        let rows = self.accumulated_row_sums();
        for i in 0..n {
            let total = rows[i * n + n - 1];
            if total != expected {
                bail!("rank {i} has incorrect row sum: {total}, expected {expected}");
            }
        }
        let cols = self.accumulated_col_sums();
        for j in 0..n {
            let total = cols[(n - 1) * n + j];
            if total != expected {
                bail!("rank {j} has incorrect column sum: {total}, expected {expected}");
            }
        }
        Ok(())
    }

    /// The expected output of every rank, concatenated: rank `j`'s chunks
    /// occupy `[j * n * chunk_factor, (j + 1) * n * chunk_factor)`. The
    /// chunks rank `i` sends to rank `j` are its input range
    /// `rows[i][j-1]..rows[i][j]`, rendered `"{i}_{k}"`, landing at the
    /// receiver's offset `cols[i-1][j]`.
    pub fn expected_outputs(&self, chunk_factor: usize) -> Vec<Chunk> {
        let n = self.num_ranks;
        let rows = self.accumulated_row_sums();
        let cols = self.accumulated_col_sums();
        let mut result = vec![Chunk::new(); n * n * chunk_factor];
        for i in 0..n {
            for j in 0..n {
                let start = if j == 0 { 0 } else { rows[i * n + j - 1] };
                let end = rows[i * n + j];
                let mut out = if i == 0 { 0 } else { cols[(i - 1) * n + j] };
                for k in start..end {
                    result[j * n * chunk_factor + out] = format!("{i}_{k}");
                    out += 1;
                }
            }
        }
        result
    }
}
