//! Grid ladder - price level generation

use super::errors::{GridError, GridResult};
use super::types::GridLevel;

/// Build the descending ladder of level prices around `center_price`.
///
/// Produces `2 * level_count - 1` prices: the center, `level_count - 1`
/// prices below it each `(1 - step_fraction)` times the previous one, and
/// `level_count - 1` prices above it each `(1 + step_fraction)` times the
/// previous one. Duplicates are kept.
pub fn generate_ladder(center_price: f64, step_fraction: f64, level_count: u32) -> GridResult<Vec<f64>> {
    if !(center_price > 0.0) || !center_price.is_finite() {
        return Err(GridError::InvalidConfig(format!(
            "center price must be positive, got {}",
            center_price
        )));
    }
    if !(step_fraction > 0.0 && step_fraction < 1.0) {
        return Err(GridError::InvalidConfig(format!(
            "step fraction must be in (0, 1), got {}",
            step_fraction
        )));
    }
    if level_count < 1 {
        return Err(GridError::InvalidConfig("level count must be at least 1".into()));
    }

    let side_count = (level_count - 1) as usize;
    let mut ladder = Vec::with_capacity(2 * side_count + 1);
    ladder.push(center_price);

    let mut last = center_price;
    for _ in 0..side_count {
        last *= 1.0 - step_fraction;
        ladder.push(last);
    }

    let mut last = center_price;
    for _ in 0..side_count {
        last *= 1.0 + step_fraction;
        ladder.push(last);
    }

    ladder.sort_by(|a, b| b.total_cmp(a));
    Ok(ladder)
}

/// Create one empty level per ladder price, indexed in ladder order
pub fn build_levels(ladder: &[f64]) -> Vec<GridLevel> {
    ladder
        .iter()
        .enumerate()
        .map(|(i, &price)| GridLevel::new(i as u32, price))
        .collect()
}

/// Round a price to `decimals` decimal places (half away from zero)
pub fn round_price(price: f64, decimals: u32) -> f64 {
    let multiplier = 10f64.powi(decimals as i32);
    (price * multiplier).round() / multiplier
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: &[f64], expected: &[f64]) {
        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < 1e-9, "{} != {}", a, e);
        }
    }

    #[test]
    fn test_geometric_ladder_both_directions() {
        let ladder = generate_ladder(100.0, 0.1, 3).unwrap();
        assert_close(&ladder, &[121.0, 110.0, 100.0, 90.0, 81.0]);
    }

    #[test]
    fn test_ladder_is_descending_and_sized() {
        let ladder = generate_ladder(10000.0, 0.01, 5).unwrap();
        assert_eq!(ladder.len(), 9);
        assert!(ladder.windows(2).all(|w| w[0] > w[1]));
        assert_eq!(ladder[4], 10000.0);
        assert!((ladder[5] - 9900.0).abs() < 1e-9);
        assert!((ladder[3] - 10100.0).abs() < 1e-9);
    }

    #[test]
    fn test_single_level_is_center_only() {
        let ladder = generate_ladder(50.0, 0.05, 1).unwrap();
        assert_eq!(ladder, vec![50.0]);
    }

    #[test]
    fn test_steps_compound_off_previous_price() {
        let ladder = generate_ladder(1000.0, 0.02, 4).unwrap();
        let below = &ladder[3..];
        for pair in below.windows(2) {
            assert!((pair[1] / pair[0] - 0.98).abs() < 1e-12);
        }
        let above = &ladder[..4];
        for pair in above.windows(2) {
            assert!((pair[0] / pair[1] - 1.02).abs() < 1e-12);
        }
    }

    #[test]
    fn test_invalid_inputs_rejected() {
        assert!(generate_ladder(0.0, 0.1, 3).is_err());
        assert!(generate_ladder(-5.0, 0.1, 3).is_err());
        assert!(generate_ladder(100.0, 0.0, 3).is_err());
        assert!(generate_ladder(100.0, 1.0, 3).is_err());
        assert!(generate_ladder(100.0, 0.1, 0).is_err());
        assert!(generate_ladder(f64::NAN, 0.1, 3).is_err());
    }

    #[test]
    fn test_build_levels_indexes_in_ladder_order() {
        let ladder = generate_ladder(100.0, 0.1, 2).unwrap();
        let levels = build_levels(&ladder);
        assert_eq!(levels.len(), 3);
        for (i, level) in levels.iter().enumerate() {
            assert_eq!(level.index, i as u32);
            assert_eq!(level.price, ladder[i]);
            assert!(level.is_empty());
        }
    }

    #[test]
    fn test_round_price() {
        assert_eq!(round_price(10000.000000001, 2), 10000.0);
        assert!((round_price(123.456, 2) - 123.46).abs() < 1e-9);
        assert!((round_price(123.456, 0) - 123.0).abs() < 1e-9);
    }
}
