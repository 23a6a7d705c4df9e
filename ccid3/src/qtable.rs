//! Lookup table for the throughput equation denominator.
//!
//! The table stores 1e3*(sqrt(2p/3) + 12*sqrt(3p/8)*p*(1+32p^2)) as a
//! function of the inverse loss event rate 1/p. It is built once with
//! floating point and read with integer indexing afterwards. Inverse
//! rates beyond the table clamp to the last entry; at that point the
//! equation rate is receive-limit bound in practice anyway.

use std::sync::OnceLock;

const TABLE_LEN: usize = 512;

static TABLE: OnceLock<Vec<u64>> = OnceLock::new();

fn build() -> Vec<u64> {
    (1..=TABLE_LEN)
        .map(|inv| {
            let p = 1.0 / inv as f64;
            let q = 1e3
                * ((2.0 * p / 3.0).sqrt()
                    + 12.0 * (3.0 * p / 8.0).sqrt() * p * (1.0 + 32.0 * p * p));
            q.round() as u64
        })
        .collect()
}

/// The equation denominator for a given inverse loss event rate,
/// which must be at least one.
pub(crate) fn q(loss_rate_inv: u32) -> u64 {
    debug_assert!(loss_rate_inv > 0);
    let table = TABLE.get_or_init(build);
    let j = (loss_rate_inv as usize).min(table.len());
    table[j - 1]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worst_case() {
        // p = 1: sqrt(2/3) + 12*sqrt(3/8)*33, times 1e3.
        assert_eq!(q(1), 243_316);
    }

    #[test]
    fn test_monotone_decreasing() {
        let mut prev = q(1);
        for inv in 2..=(TABLE_LEN as u32) {
            let cur = q(inv);
            assert!(cur <= prev, "q not monotone at {}", inv);
            assert!(cur > 0);
            prev = cur;
        }
    }

    #[test]
    fn test_clamps_beyond_table() {
        assert_eq!(q(TABLE_LEN as u32), q(u32::MAX));
    }
}
