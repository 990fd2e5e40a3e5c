//! Money-shock partitioning.

use rand::seq::index;
use rand::Rng;

/// Split the positive quantity `q` into `n` positive integers that sum to
/// `q`: picture `q` pebbles in a line, cut at `n - 1` distinct positions,
/// and take the run lengths. Requires `1 <= n <= q`.
pub fn random_divide(rng: &mut impl Rng, q: u64, n: usize) -> Vec<u64> {
    assert!(n >= 1 && (n as u64) <= q, "need 1 <= n <= q");

    // n - 1 distinct cut positions drawn from [1, q).
    let mut positions: Vec<u64> = index::sample(rng, (q - 1) as usize, n - 1)
        .into_iter()
        .map(|p| p as u64 + 1)
        .collect();
    positions.push(q);
    positions.sort_unstable();

    let mut parts = Vec::with_capacity(n);
    let mut prev = 0;
    for pos in positions {
        parts.push(pos - prev);
        prev = pos;
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parts_are_positive_and_sum_to_q() {
        let mut rng = rand::thread_rng();
        for _ in 0..200 {
            let parts = random_divide(&mut rng, 10, 4);
            assert_eq!(parts.len(), 4);
            assert_eq!(parts.iter().sum::<u64>(), 10);
            assert!(parts.iter().all(|&p| p > 0));
        }
    }

    #[test]
    fn one_recipient_takes_everything() {
        let mut rng = rand::thread_rng();
        assert_eq!(random_divide(&mut rng, 7, 1), vec![7]);
    }

    #[test]
    fn n_equals_q_gives_all_ones() {
        let mut rng = rand::thread_rng();
        assert_eq!(random_divide(&mut rng, 5, 5), vec![1, 1, 1, 1, 1]);
    }

    #[test]
    #[should_panic]
    fn more_recipients_than_units_is_rejected() {
        let mut rng = rand::thread_rng();
        random_divide(&mut rng, 3, 4);
    }
}
