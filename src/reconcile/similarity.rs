//! Ratcliff/Obershelp string similarity.
//!
//! `ratio = 2 * M / T`, where `T` is the total number of characters in both
//! strings and `M` the number of characters in matching blocks: the longest
//! common block, then recursively the longest blocks to its left and right.
//! Two empty strings are identical (`1.0`).

/// Similarity of `a` and `b` in `[0.0, 1.0]`.
#[must_use]
pub fn ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let score = 2.0 * matching_characters(&a, &b) as f64 / total as f64;
    score
}

fn matching_characters(a: &[char], b: &[char]) -> usize {
    let mut pending = vec![(0, a.len(), 0, b.len())];
    let mut matched = 0;
    while let Some((alo, ahi, blo, bhi)) = pending.pop() {
        let (i, j, size) = longest_match(a, b, (alo, ahi), (blo, bhi));
        if size == 0 {
            continue;
        }
        matched += size;
        pending.push((alo, i, blo, j));
        pending.push((i + size, ahi, j + size, bhi));
    }
    matched
}

/// Longest common block of `a[alo..ahi]` and `b[blo..bhi]` as
/// `(start_in_a, start_in_b, len)`. Ties go to the block starting earliest
/// in `a`, then earliest in `b`.
fn longest_match(
    a: &[char],
    b: &[char],
    (alo, ahi): (usize, usize),
    (blo, bhi): (usize, usize),
) -> (usize, usize, usize) {
    let mut best = (alo, blo, 0);
    // previous[k]: length of the common run ending at a[i - 1] and b[blo + k - 1].
    let mut previous = vec![0usize; bhi - blo + 1];
    for i in alo..ahi {
        let mut current = vec![0usize; bhi - blo + 1];
        for j in blo..bhi {
            if a[i] == b[j] {
                let len = previous[j - blo] + 1;
                current[j - blo + 1] = len;
                if len > best.2 {
                    best = (i + 1 - len, j + 1 - len, len);
                }
            }
        }
        previous = current;
    }
    best
}
