//! Tally builder: genotypes and positions → bSFS tensor.
//!
//! Purpose
//! -------
//! Count, for every pairwise sample comparison and every block, how many
//! sites of each mutation type the block carries, clip those counts at
//! `k_max + 1` and tally identical clipped vectors into a dense tensor of
//! shape `k_max + 2`.
//!
//! Key behaviors
//! -------------
//! - [`PairStatistic`] classifies one site for one pair of individuals;
//!   [`FourMutationTypes`] is the standard `hetB, hetA, hetAB, fixed` split.
//! - [`build_tally`] discards variants at or beyond `blocks × block_length`
//!   and tallies blocks without variants as the all-zero vector.
//! - [`tally_mutation_counts`] is the clip/aggregate/scatter step on its own.
//! - [`CompactTally`] stores the tensor in the narrowest unsigned type that
//!   holds its largest cell.
//! - [`sparse_rows`] lists the non-zero cells of a rank-4 or rank-5 tally.
//!
//! Invariants
//! ----------
//! - The tally of one call sums to `comparisons × blocks`.
//! - Every index along axis `t` is at most `k_max[t] + 1`.

use std::collections::BTreeMap;

use ndarray::{Array2, ArrayD, ArrayView1, ArrayView3, Dimension, IxDyn, s};

use crate::simulation::errors::{SimError, SimResult};

/// Contiguous, equally long blocks covering `[0, blocks × block_length)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockLayout {
    pub block_length: u64,
    pub blocks: usize,
}

impl BlockLayout {
    /// # Errors
    /// - `InvalidBlockLayout` for zero length or zero blocks.
    pub fn new(block_length: u64, blocks: usize) -> SimResult<Self> {
        if block_length == 0 || blocks == 0 {
            return Err(SimError::InvalidBlockLayout { block_length, blocks });
        }
        Ok(Self { block_length, blocks })
    }

    pub fn sequence_length(&self) -> u64 {
        self.block_length * self.blocks as u64
    }

    /// Block holding `position`, if it lies inside the layout.
    pub fn block_of(&self, position: u64) -> Option<usize> {
        (position < self.sequence_length()).then(|| (position / self.block_length) as usize)
    }
}

/// Per-site mutation-type classification for a pair of individuals.
pub trait PairStatistic: Send + Sync {
    /// Number of mutation types (tally axes).
    fn mutation_types(&self) -> usize;

    /// Type index of the site given both individuals' alleles, or `None` if
    /// the site does not count for this pair.
    fn classify(&self, a: ArrayView1<'_, i8>, b: ArrayView1<'_, i8>) -> Option<usize>;
}

/// `hetB`, `hetA`, `hetAB`, `fixed`, in that axis order.
///
/// Missing calls (negative alleles), multiallelic and invariant sites are
/// ignored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FourMutationTypes;

impl FourMutationTypes {
    pub const HET_B: usize = 0;
    pub const HET_A: usize = 1;
    pub const HET_AB: usize = 2;
    pub const FIXED: usize = 3;
}

fn is_het(alleles: &ArrayView1<'_, i8>) -> bool {
    alleles.iter().any(|&x| x != alleles[0])
}

impl PairStatistic for FourMutationTypes {
    fn mutation_types(&self) -> usize {
        4
    }

    fn classify(&self, a: ArrayView1<'_, i8>, b: ArrayView1<'_, i8>) -> Option<usize> {
        if a.is_empty() || b.is_empty() {
            return None;
        }
        let mut seen: Vec<i8> = Vec::with_capacity(2);
        for &allele in a.iter().chain(b.iter()) {
            if allele < 0 {
                return None;
            }
            if !seen.contains(&allele) {
                seen.push(allele);
            }
        }
        if seen.len() != 2 {
            return None;
        }
        match (is_het(&a), is_het(&b)) {
            (true, true) => Some(Self::HET_AB),
            (true, false) => Some(Self::HET_A),
            (false, true) => Some(Self::HET_B),
            (false, false) => Some(Self::FIXED),
        }
    }
}

/// Tally tensor in the narrowest unsigned element type.
#[derive(Debug, Clone, PartialEq)]
pub enum CompactTally {
    U8(ArrayD<u8>),
    U16(ArrayD<u16>),
    U32(ArrayD<u32>),
    U64(ArrayD<u64>),
}

impl CompactTally {
    /// Narrow `counts` to the smallest type holding its maximum.
    pub fn from_counts(counts: ArrayD<u64>) -> Self {
        let max = counts.iter().copied().max().unwrap_or(0);
        if max <= u64::from(u8::MAX) {
            CompactTally::U8(counts.mapv(|c| c as u8))
        } else if max <= u64::from(u16::MAX) {
            CompactTally::U16(counts.mapv(|c| c as u16))
        } else if max <= u64::from(u32::MAX) {
            CompactTally::U32(counts.mapv(|c| c as u32))
        } else {
            CompactTally::U64(counts)
        }
    }

    pub fn shape(&self) -> &[usize] {
        match self {
            CompactTally::U8(a) => a.shape(),
            CompactTally::U16(a) => a.shape(),
            CompactTally::U32(a) => a.shape(),
            CompactTally::U64(a) => a.shape(),
        }
    }

    pub fn dtype(&self) -> &'static str {
        match self {
            CompactTally::U8(_) => "u8",
            CompactTally::U16(_) => "u16",
            CompactTally::U32(_) => "u32",
            CompactTally::U64(_) => "u64",
        }
    }

    /// Widen to `u64` for summation.
    pub fn to_u64(&self) -> ArrayD<u64> {
        match self {
            CompactTally::U8(a) => a.mapv(u64::from),
            CompactTally::U16(a) => a.mapv(u64::from),
            CompactTally::U32(a) => a.mapv(u64::from),
            CompactTally::U64(a) => a.clone(),
        }
    }

    pub fn total(&self) -> u64 {
        self.to_u64().sum()
    }
}

/// Clip each row at `k_max + 1`, count identical rows and scatter the counts
/// into a tensor of shape `k_max + 2`.
///
/// # Errors
/// - `EmptyKMax` for an empty `k_max`.
/// - `KMaxLengthMismatch` if a row's length differs from `k_max`.
pub fn tally_mutation_counts(rows: &[Vec<u64>], k_max: &[usize]) -> SimResult<CompactTally> {
    if k_max.is_empty() {
        return Err(SimError::EmptyKMax);
    }
    let mut occurrences: BTreeMap<Vec<usize>, u64> = BTreeMap::new();
    for row in rows {
        if row.len() != k_max.len() {
            return Err(SimError::KMaxLengthMismatch { expected: row.len(), found: k_max.len() });
        }
        let clipped: Vec<usize> = row
            .iter()
            .zip(k_max)
            .map(|(&count, &cap)| (count.min(cap as u64 + 1)) as usize)
            .collect();
        *occurrences.entry(clipped).or_insert(0) += 1;
    }

    let shape: Vec<usize> = k_max.iter().map(|&k| k + 2).collect();
    let mut counts = ArrayD::<u64>::zeros(IxDyn(&shape));
    for (index, count) in occurrences {
        counts[IxDyn(&index)] = count;
    }
    Ok(CompactTally::from_counts(counts))
}

/// bSFS tally of one simulated replicate.
///
/// `genotypes` has shape `(variants, samples, ploidy)`; `positions` holds one
/// integer site per variant.
///
/// # Errors
/// - `PositionCountMismatch` if variants and positions disagree.
/// - `SampleIndexOutOfRange` for a pair outside the sample axis.
/// - `EmptyKMax` / `KMaxLengthMismatch` if `k_max` does not fit the statistic.
pub fn build_tally(
    genotypes: ArrayView3<'_, i8>, positions: &[u64], sample_pairs: &[(usize, usize)], k_max: &[usize],
    layout: BlockLayout, statistic: &dyn PairStatistic,
) -> SimResult<CompactTally> {
    let (variants, samples, _) = genotypes.dim();
    if variants != positions.len() {
        return Err(SimError::PositionCountMismatch { variants, positions: positions.len() });
    }
    if k_max.is_empty() {
        return Err(SimError::EmptyKMax);
    }
    let types = statistic.mutation_types();
    if k_max.len() != types {
        return Err(SimError::KMaxLengthMismatch { expected: types, found: k_max.len() });
    }
    if let Some(index) = sample_pairs.iter().flat_map(|&(a, b)| [a, b]).find(|&i| i >= samples) {
        return Err(SimError::SampleIndexOutOfRange { index, samples });
    }

    let blocks: Vec<Option<usize>> = positions.iter().map(|&p| layout.block_of(p)).collect();
    let mut rows = Vec::with_capacity(sample_pairs.len() * layout.blocks);
    for &(a, b) in sample_pairs {
        let mut per_block = vec![vec![0_u64; types]; layout.blocks];
        for (variant, block) in blocks.iter().enumerate() {
            let Some(block) = *block else { continue };
            let alleles_a = genotypes.slice(s![variant, a, ..]);
            let alleles_b = genotypes.slice(s![variant, b, ..]);
            if let Some(t) = statistic.classify(alleles_a, alleles_b) {
                per_block[block][t] += 1;
            }
        }
        rows.extend(per_block);
    }
    tally_mutation_counts(&rows, k_max)
}

/// Non-zero cells of a rank-4 (blocks) or rank-5 (windows) tally as rows.
///
/// Rank 4 rows are `[count, i0, i1, i2, i3]`; rank 5 rows are
/// `[window, count, i1, i2, i3, i4]`. An all-zero tally yields `None`.
///
/// # Errors
/// - `UnsupportedRank` for any other rank.
pub fn sparse_rows(tally: &ArrayD<u64>) -> SimResult<Option<Array2<u64>>> {
    let rank = tally.ndim();
    if rank != 4 && rank != 5 {
        return Err(SimError::UnsupportedRank { rank });
    }
    let rows: Vec<Vec<u64>> = tally
        .indexed_iter()
        .filter(|&(_, &count)| count > 0)
        .map(|(index, &count)| {
            let index: Vec<u64> = index.slice().iter().map(|&i| i as u64).collect();
            let mut row = Vec::with_capacity(rank + 1);
            if rank == 5 {
                row.push(index[0]);
                row.push(count);
                row.extend_from_slice(&index[1..]);
            } else {
                row.push(count);
                row.extend_from_slice(&index);
            }
            row
        })
        .collect();
    if rows.is_empty() {
        return Ok(None);
    }
    let width = rank + 1;
    let flat: Vec<u64> = rows.into_iter().flatten().collect();
    Ok(Some(Array2::from_shape_vec((flat.len() / width, width), flat)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array3, array};

    /// One variant per row, two diploid samples.
    fn genotypes(rows: &[[[i8; 2]; 2]]) -> Array3<i8> {
        let flat: Vec<i8> = rows.iter().flatten().flatten().copied().collect();
        Array3::from_shape_vec((rows.len(), 2, 2), flat).unwrap()
    }

    #[test]
    // Purpose
    // -------
    // Each site class lands on its own axis; uninformative sites are dropped.
    //
    // Given
    // -----
    // - hetA, hetB, hetAB, fixed, invariant, missing and triallelic sites.
    //
    // Expect
    // ------
    // - Types 1, 0, 2, 3 then `None` three times.
    fn four_mutation_types_classifies_sites() {
        let stat = FourMutationTypes;
        let g = genotypes(&[
            [[0, 1], [0, 0]],
            [[1, 1], [0, 1]],
            [[0, 1], [1, 0]],
            [[1, 1], [0, 0]],
            [[0, 0], [0, 0]],
            [[-1, 1], [0, 0]],
            [[0, 1], [2, 2]],
        ]);

        let types: Vec<_> =
            (0..7).map(|v| stat.classify(g.slice(s![v, 0, ..]), g.slice(s![v, 1, ..]))).collect();

        assert_eq!(types, vec![Some(1), Some(0), Some(2), Some(3), None, None, None]);
    }

    #[test]
    // Purpose
    // -------
    // Counts above k_max go to the overflow bucket `k_max + 1`.
    //
    // Given
    // -----
    // - k_max = (2, 1); rows (3, 1), (5, 4), (0, 0), (3, 1).
    //
    // Expect
    // ------
    // - Shape (4, 3); cell [3, 1] = 2, [3, 2] = 1, [0, 0] = 1; stored as u8.
    fn tally_clips_at_overflow_bucket() {
        let rows = vec![vec![3, 1], vec![5, 4], vec![0, 0], vec![3, 1]];

        let tally = tally_mutation_counts(&rows, &[2, 1]).unwrap();
        let counts = tally.to_u64();

        assert_eq!(tally.shape(), &[4, 3]);
        assert_eq!(tally.dtype(), "u8");
        assert_eq!(counts[IxDyn(&[3, 1])], 2);
        assert_eq!(counts[IxDyn(&[3, 2])], 1);
        assert_eq!(counts[IxDyn(&[0, 0])], 1);
        assert_eq!(tally.total(), 4);
    }

    #[test]
    // Purpose
    // -------
    // Blocks without variants count as the all-zero vector and variants past
    // the layout are discarded.
    //
    // Given
    // -----
    // - 3 blocks of 10 sites; a hetA site at 4, a fixed site at 12 and a
    //   hetA site at 35 (outside); one pair.
    //
    // Expect
    // ------
    // - Total 3; [0,1,0,0], [0,0,0,1] and [0,0,0,0] each counted once.
    fn build_tally_bins_variants_by_block() {
        let g = genotypes(&[[[0, 1], [0, 0]], [[1, 1], [0, 0]], [[0, 1], [0, 0]]]);
        let layout = BlockLayout::new(10, 3).unwrap();

        let tally =
            build_tally(g.view(), &[4, 12, 35], &[(0, 1)], &[2, 2, 2, 2], layout, &FourMutationTypes).unwrap();
        let counts = tally.to_u64();

        assert_eq!(tally.total(), 3);
        assert_eq!(counts[IxDyn(&[0, 1, 0, 0])], 1);
        assert_eq!(counts[IxDyn(&[0, 0, 0, 1])], 1);
        assert_eq!(counts[IxDyn(&[0, 0, 0, 0])], 1);
    }

    #[test]
    // Purpose
    // -------
    // Bad inputs are reported with the offending values.
    //
    // Given
    // -----
    // - k_max of length 2 for a four-type statistic; a pair using sample 5.
    //
    // Expect
    // ------
    // - `KMaxLengthMismatch { expected: 4, found: 2 }` and
    //   `SampleIndexOutOfRange { index: 5, samples: 2 }`.
    fn build_tally_rejects_bad_inputs() {
        let g = genotypes(&[[[0, 1], [0, 0]]]);
        let layout = BlockLayout::new(10, 1).unwrap();

        let short_k = build_tally(g.view(), &[1], &[(0, 1)], &[2, 2], layout, &FourMutationTypes);
        let bad_pair = build_tally(g.view(), &[1], &[(0, 5)], &[2, 2, 2, 2], layout, &FourMutationTypes);

        assert_eq!(short_k.unwrap_err(), SimError::KMaxLengthMismatch { expected: 4, found: 2 });
        assert_eq!(bad_pair.unwrap_err(), SimError::SampleIndexOutOfRange { index: 5, samples: 2 });
    }

    #[test]
    // Purpose
    // -------
    // Count rows fix the number of mutation types; a shorter `k_max` is
    // reported the same way `build_tally` reports it.
    //
    // Given
    // -----
    // - One row with three mutation types and k_max = (2, 2).
    //
    // Expect
    // ------
    // - `KMaxLengthMismatch { expected: 3, found: 2 }`, rendered as
    //   "k_max has 2 entries but there are 3 mutation types".
    fn tally_counts_reject_row_longer_than_k_max() {
        let err = tally_mutation_counts(&[vec![1, 0, 2]], &[2, 2]).unwrap_err();

        assert_eq!(err, SimError::KMaxLengthMismatch { expected: 3, found: 2 });
        assert_eq!(err.to_string(), "k_max has 2 entries but there are 3 mutation types");
    }

    #[test]
    // Purpose
    // -------
    // Large counts widen the element type.
    //
    // Given
    // -----
    // - A tensor whose largest cell is 70_000.
    //
    // Expect
    // ------
    // - `u32` storage with the values intact.
    fn compact_tally_picks_narrowest_type() {
        let counts = array![[1_u64, 70_000], [0, 255]].into_dyn();

        let tally = CompactTally::from_counts(counts.clone());

        assert_eq!(tally.dtype(), "u32");
        assert_eq!(tally.to_u64(), counts);
    }

    #[test]
    // Purpose
    // -------
    // Row form of block and window tallies.
    //
    // Given
    // -----
    // - Rank-4 tally with 3 at [0,1,0,1]; rank-5 with 2 at [1,0,0,0,1];
    //   an all-zero rank-4 tally; a rank-2 tally.
    //
    // Expect
    // ------
    // - [[3,0,1,0,1]], [[1,2,0,0,0,1]], `None`, `UnsupportedRank { rank: 2 }`.
    fn sparse_rows_lists_nonzero_cells() {
        let mut blocks = ArrayD::<u64>::zeros(IxDyn(&[2, 2, 2, 2]));
        blocks[IxDyn(&[0, 1, 0, 1])] = 3;
        let mut windows = ArrayD::<u64>::zeros(IxDyn(&[2, 2, 2, 2, 2]));
        windows[IxDyn(&[1, 0, 0, 0, 1])] = 2;

        let block_rows = sparse_rows(&blocks).unwrap().unwrap();
        let window_rows = sparse_rows(&windows).unwrap().unwrap();
        let empty = sparse_rows(&ArrayD::<u64>::zeros(IxDyn(&[2, 2, 2, 2]))).unwrap();
        let err = sparse_rows(&ArrayD::<u64>::zeros(IxDyn(&[2, 2]))).unwrap_err();

        assert_eq!(block_rows, array![[3, 0, 1, 0, 1]]);
        assert_eq!(window_rows, array![[1, 2, 0, 0, 0, 1]]);
        assert!(empty.is_none());
        assert_eq!(err, SimError::UnsupportedRank { rank: 2 });
    }
}
