//! Probability/log domain helpers shared by the pipeline stages.

/// Numeric floor used before taking logs and when renormalizing.
pub const EPSILON: f64 = 2.2204e-16;

/// Natural log with the value floored at [`EPSILON`], so zero maps to
/// `ln(EPSILON)` instead of `-inf`.
pub fn floor_log(x: f64) -> f64 {
    x.max(EPSILON).ln()
}

/// Applies [`floor_log`] to every entry in place.
pub fn floor_log_in_place(values: &mut [f32]) {
    for v in values.iter_mut() {
        *v = floor_log(*v as f64) as f32;
    }
}

/// Exponentiates every entry in place.
pub fn exp_in_place(values: &mut [f32]) {
    for v in values.iter_mut() {
        *v = v.exp();
    }
}

/// Index of the largest entry. Equal maxima resolve to the lowest index.
pub fn argmax(values: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &v) in values.iter().enumerate() {
        match best {
            Some((_, b)) if v <= b => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    #[test]
    fn floor_log_zero_is_finite() {
        assert!(floor_log(0.0).is_finite());
        assert_eq!(floor_log(0.0), EPSILON.ln());
        assert_abs_diff_eq!(floor_log(1.0), 0.0, epsilon = 1e-15);
    }

    #[test]
    fn argmax_prefers_lower_index_on_ties() {
        assert_eq!(argmax(&[0.2, 0.4, 0.4]), Some(1));
        assert_eq!(argmax(&[0.9]), Some(0));
        assert_eq!(argmax(&[]), None);
    }

    #[test]
    fn log_then_exp_restores_positive_values() {
        let mut v = vec![0.25f32, 0.75];
        floor_log_in_place(&mut v);
        exp_in_place(&mut v);
        assert_relative_eq!(v[0], 0.25, epsilon = 1e-6);
        assert_relative_eq!(v[1], 0.75, epsilon = 1e-6);
    }
}
