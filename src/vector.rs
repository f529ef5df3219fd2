//! This is the vector math module
//! Provide dot product, magnitude, cosine distance and brute-force top-k search

use std::collections::HashMap;

/// Dot Product
/// dot_prod = sum(a[i] * b[i]) for i = 0..a.len()
/// Can only process vectors with same dimensions
/// Accumulates in f64 so large components do not overflow
pub fn dot_product(left: &[f32], right: &[f32]) -> Option<f64> {
    if left.len() != right.len() {
        return None;
    }

    let dot_prod = left.iter()
        .zip(right.iter())
        .map(|(&x, &y)| f64::from(x) * f64::from(y))
        .sum();

    Some(dot_prod)
}

/// Magnitude
/// ||vec|| = sqrt(sum(vec[i]^2))
pub fn magnitude(vector: &[f32]) -> f64 {
    vector.iter()
        .map(|&x| f64::from(x) * f64::from(x))
        .sum::<f64>()
        .sqrt()
}

/// Cosine Distance
/// dist = 1 - dot(a, b) / (||a|| * ||b||), in [0, 2], lower is closer
/// A zero vector on either side is as far as it gets: 1.0
pub fn cosine_distance(left: &[f32], right: &[f32]) -> Option<f32> {
    let dot = dot_product(left, right)?;

    let norm_l = magnitude(left);
    let norm_r = magnitude(right);
    if norm_l == 0.0 || norm_r == 0.0 {
        return Some(1.0);
    }

    Some((1.0 - dot / (norm_l * norm_r)) as f32)
}

/// Brute-force nearest neighbours of `query` among `candidates`.
///
/// Candidates whose dimension differs from the query are skipped. Returns at
/// most `top_k` `(key, distance)` pairs ordered by ascending distance. Order
/// among equal distances is unspecified.
pub fn nearest(candidates: &HashMap<String, Vec<f32>>, query: &[f32], top_k: usize) -> Vec<(String, f32)> {
    if top_k == 0 {
        return Vec::new();
    }

    // Sorted ascending, never longer than top_k
    let mut best: Vec<(&str, f32)> = Vec::with_capacity(top_k.min(candidates.len()) + 1);
    for (key, vector) in candidates {
        let Some(mut dist) = cosine_distance(query, vector) else {
            continue;
        };
        if dist.is_nan() {
            dist = f32::MAX;
        }

        if best.len() == top_k && dist >= best[top_k - 1].1 {
            continue;
        }
        let insert_index = best.partition_point(|&(_, d)| d <= dist);
        best.insert(insert_index, (key.as_str(), dist));
        best.truncate(top_k);
    }

    best.into_iter()
        .map(|(key, dist)| (key.to_string(), dist))
        .collect()
}
