//! Shared scaling and safety-check math: `clamp`, min-max normalization, and
//! the output-subset check used by the validation wrapper.

use std::collections::HashMap;

/// Clamp `v` into `[lo, hi]`.
pub fn clamp(v: f64, lo: f64, hi: f64) -> f64 {
    if v < lo {
        lo
    } else if v > hi {
        hi
    } else {
        v
    }
}

/// Min-max scale a set of weights into `[0, 1]`. If every value is equal
/// (including the empty/singleton case), every output maps to `0.0`.
pub fn min_max_scale(weights: &HashMap<String, f64>) -> HashMap<String, f64> {
    if weights.is_empty() {
        return HashMap::new();
    }
    let min = weights.values().cloned().fold(f64::INFINITY, f64::min);
    let max = weights.values().cloned().fold(f64::NEG_INFINITY, f64::max);
    if (max - min).abs() < f64::EPSILON {
        return weights.keys().map(|k| (k.clone(), 0.0)).collect();
    }
    weights
        .iter()
        .map(|(k, v)| (k.clone(), (v - min) / (max - min)))
        .collect()
}

/// `true` if every key in `output` also appears in `input` — the shrink-only
/// contract a filter step's output must satisfy.
pub fn is_output_subset_of_input<T>(
    input: &HashMap<String, T>,
    output: &HashMap<String, f64>,
) -> bool {
    output.keys().all(|k| input.contains_key(k))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_bounds() {
        assert_eq!(clamp(-1.0, 0.0, 1.0), 0.0);
        assert_eq!(clamp(2.0, 0.0, 1.0), 1.0);
        assert_eq!(clamp(0.5, 0.0, 1.0), 0.5);
    }

    #[test]
    fn min_max_scale_normal() {
        let mut w = HashMap::new();
        w.insert("a".to_string(), 0.0);
        w.insert("b".to_string(), 10.0);
        let scaled = min_max_scale(&w);
        assert_eq!(scaled["a"], 0.0);
        assert_eq!(scaled["b"], 1.0);
    }

    #[test]
    fn min_max_scale_all_equal_maps_to_zero() {
        let mut w = HashMap::new();
        w.insert("a".to_string(), 5.0);
        w.insert("b".to_string(), 5.0);
        let scaled = min_max_scale(&w);
        assert_eq!(scaled["a"], 0.0);
        assert_eq!(scaled["b"], 0.0);
    }

    #[test]
    fn min_max_scale_empty() {
        assert!(min_max_scale(&HashMap::new()).is_empty());
    }

    #[test]
    fn output_subset_detects_violation() {
        let mut input = HashMap::new();
        input.insert("a".to_string(), 1u8);
        let mut output = HashMap::new();
        output.insert("a".to_string(), 1.0);
        output.insert("ghost".to_string(), 1.0);
        assert!(!is_output_subset_of_input(&input, &output));
    }
}
