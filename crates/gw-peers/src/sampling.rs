use rand::seq::SliceRandom;
use rand::Rng;

/// Weighted sampling without replacement (spec §4.1 algorithm). Draws
/// `count` distinct indices from `weights`, each draw picking index `i`
/// with probability proportional to its current weight among the
/// remaining candidates, then shuffles the result to break ties between
/// equal-weight picks.
///
/// Weights must be non-negative; a zero-weight candidate can still be
/// drawn only if every remaining candidate has zero weight (falls back
/// to uniform choice among them).
pub fn weighted_sample_without_replacement<R: Rng>(
    rng: &mut R,
    weights: &[u32],
    count: usize,
) -> Vec<usize> {
    let n = weights.len();
    let count = count.min(n);
    if count == 0 {
        return Vec::new();
    }

    let mut remaining: Vec<usize> = (0..n).collect();
    let mut picked = Vec::with_capacity(count);

    for _ in 0..count {
        let total: u64 = remaining.iter().map(|&i| weights[i] as u64).sum();
        let chosen_pos = if total == 0 {
            rng.gen_range(0..remaining.len())
        } else {
            let target = rng.gen_range(0..total);
            let mut cumulative: u64 = 0;
            let mut pos = remaining.len() - 1;
            for (idx, &i) in remaining.iter().enumerate() {
                cumulative += weights[i] as u64;
                if target < cumulative {
                    pos = idx;
                    break;
                }
            }
            pos
        };
        picked.push(remaining.remove(chosen_pos));
    }

    picked.shuffle(rng);
    picked
}
