//! Instruction-level matching inside matched basic blocks.
//!
//! Once two basic blocks form a fixed point, their instructions are aligned
//! with a longest common subsequence over the per-mnemonic primes. The
//! alignment keeps instruction order, tolerates insertions and deletions,
//! and treats two instructions as equal when their mnemonics map to the
//! same prime.

/// Index pairs of the longest common subsequence of two prime sequences.
///
/// Classic dynamic program over the full table; basic blocks are small
/// enough that the quadratic cost does not matter. Ties prefer the earliest
/// match on both sides, so the result is deterministic.
pub fn compute_lcs(primary: &[u64], secondary: &[u64]) -> Vec<(u32, u32)> {
    let n = primary.len();
    let m = secondary.len();
    if n == 0 || m == 0 {
        return Vec::new();
    }

    // length[i][j] = LCS length of primary[i..] and secondary[j..].
    let mut length: Vec<u32> = vec![0; (n + 1) * (m + 1)];
    let at = |i: usize, j: usize| i * (m + 1) + j;
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            length[at(i, j)] = if primary[i] == secondary[j] {
                length[at(i + 1, j + 1)] + 1
            } else {
                length[at(i + 1, j)].max(length[at(i, j + 1)])
            };
        }
    }

    let mut matches = Vec::with_capacity(length[at(0, 0)] as usize);
    let mut i = 0;
    let mut j = 0;
    while i < n && j < m {
        if primary[i] == secondary[j] {
            matches.push((i as u32, j as u32));
            i += 1;
            j += 1;
        } else if length[at(i + 1, j)] >= length[at(i, j + 1)] {
            i += 1;
        } else {
            j += 1;
        }
    }
    matches
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_sequences_match_fully() {
        let sequence = [2u64, 3, 5, 7];
        let matches = compute_lcs(&sequence, &sequence);
        assert_eq!(matches, vec![(0, 0), (1, 1), (2, 2), (3, 3)]);
    }

    #[test]
    fn insertion_is_skipped() {
        let primary = [2u64, 3, 5];
        let secondary = [2u64, 11, 3, 5];
        let matches = compute_lcs(&primary, &secondary);
        assert_eq!(matches, vec![(0, 0), (1, 2), (2, 3)]);
    }

    #[test]
    fn disjoint_sequences_do_not_match() {
        assert!(compute_lcs(&[2, 3], &[5, 7]).is_empty());
        assert!(compute_lcs(&[], &[5, 7]).is_empty());
    }

    #[test]
    fn reordering_keeps_the_longest_run() {
        let primary = [2u64, 3, 5, 7];
        let secondary = [3u64, 5, 7, 2];
        let matches = compute_lcs(&primary, &secondary);
        assert_eq!(matches, vec![(1, 0), (2, 1), (3, 2)]);
    }
}
