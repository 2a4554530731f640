//! Shared math helpers for the consolidation pipeline (§4.4): FNV-1a
//! fingerprint hashing, Jaccard/Dice similarity, and Sinkhorn-Knopp matrix
//! normalization. Kept free of any domain type so each phase module can be
//! tested against plain numbers and strings.

/// 32-bit FNV-1a, hex-formatted (§4.4.2 fingerprint hashing).
pub fn fnv1a_hex(input: &str) -> String {
    const OFFSET_BASIS: u32 = 0x811c_9dc5;
    const PRIME: u32 = 0x0100_0193;
    let mut hash = OFFSET_BASIS;
    for byte in input.as_bytes() {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(PRIME);
    }
    format!("{hash:08x}")
}

/// Jaccard similarity between two fingerprint sets (§4.4.2).
pub fn jaccard<T: Eq + std::hash::Hash>(a: &std::collections::HashSet<T>, b: &std::collections::HashSet<T>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    if union == 0.0 {
        0.0
    } else {
        intersection / union
    }
}

/// Lowercased, whitespace-collapsed character bigram set of `text`, used by
/// the Dice coefficient below (§4.4.3 "bigram-Dice(normalized text)").
fn normalized_bigrams(text: &str) -> Vec<String> {
    let normalized: String = text.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ");
    let chars: Vec<char> = normalized.chars().collect();
    if chars.len() < 2 {
        return vec![normalized];
    }
    chars.windows(2).map(|w| w.iter().collect()).collect()
}

/// Sorensen-Dice coefficient over character bigrams of normalized text
/// (§4.4.3). `2|A∩B| / (|A|+|B|)`.
pub fn bigram_dice(a: &str, b: &str) -> f64 {
    let bigrams_a = normalized_bigrams(a);
    let bigrams_b = normalized_bigrams(b);
    if bigrams_a.is_empty() && bigrams_b.is_empty() {
        return 1.0;
    }
    let mut remaining_b = bigrams_b.clone();
    let mut matches = 0usize;
    for bg in &bigrams_a {
        if let Some(pos) = remaining_b.iter().position(|x| x == bg) {
            remaining_b.remove(pos);
            matches += 1;
        }
    }
    (2.0 * matches as f64) / (bigrams_a.len() + bigrams_b.len()) as f64
}

/// Sinkhorn-Knopp doubly-stochastic normalization (§4.4.5, P10): repeatedly
/// rescale rows then columns to sum to 1 until the max row-sum deviation
/// from 1 drops below `tolerance` or `max_iterations` elapses.
pub fn sinkhorn_knopp(matrix: &[Vec<f64>], tolerance: f64, max_iterations: u32) -> Vec<Vec<f64>> {
    let n = matrix.len();
    if n == 0 {
        return Vec::new();
    }
    let mut m: Vec<Vec<f64>> = matrix.to_vec();

    for _ in 0..max_iterations {
        for row in &mut m {
            let sum: f64 = row.iter().sum();
            if sum > 0.0 {
                for v in row.iter_mut() {
                    *v /= sum;
                }
            }
        }
        for j in 0..n {
            let col_sum: f64 = m.iter().map(|row| row[j]).sum();
            if col_sum > 0.0 {
                for row in m.iter_mut() {
                    row[j] /= col_sum;
                }
            }
        }

        let max_deviation = m
            .iter()
            .map(|row| (row.iter().sum::<f64>() - 1.0).abs())
            .fold(0.0_f64, f64::max);
        if max_deviation < tolerance {
            break;
        }
    }
    m
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fnv1a_is_deterministic_and_matches_known_vector() {
        // FNV-1a 32-bit of the empty string is the offset basis itself.
        assert_eq!(fnv1a_hex(""), format!("{:08x}", 0x811c_9dc5_u32));
        assert_eq!(fnv1a_hex("u:bash"), fnv1a_hex("u:bash"));
        assert_ne!(fnv1a_hex("u:bash"), fnv1a_hex("u:grep"));
    }

    #[test]
    fn jaccard_identical_sets_is_one() {
        let a: std::collections::HashSet<&str> = ["x", "y"].into_iter().collect();
        assert_eq!(jaccard(&a, &a), 1.0);
    }

    #[test]
    fn jaccard_disjoint_sets_is_zero() {
        let a: std::collections::HashSet<&str> = ["x"].into_iter().collect();
        let b: std::collections::HashSet<&str> = ["y"].into_iter().collect();
        assert_eq!(jaccard(&a, &b), 0.0);
    }

    #[test]
    fn bigram_dice_identical_strings_is_one() {
        assert!((bigram_dice("uses four space indent", "uses four space indent") - 1.0).abs() < 1e-9);
    }

    #[test]
    fn bigram_dice_disjoint_strings_is_zero() {
        assert_eq!(bigram_dice("aaaa", "zzzz"), 0.0);
    }

    #[test]
    fn sinkhorn_knopp_produces_row_sums_near_one() {
        let m = vec![vec![1.0, 2.0], vec![3.0, 1.0]];
        let ds = sinkhorn_knopp(&m, 1e-6, 150);
        for row in &ds {
            let sum: f64 = row.iter().sum();
            assert!((sum - 1.0).abs() < 1e-3, "row sum {sum} not near 1");
        }
    }

    #[test]
    fn sinkhorn_knopp_on_empty_matrix_returns_empty() {
        let ds = sinkhorn_knopp(&[], 1e-6, 150);
        assert!(ds.is_empty());
    }
}
