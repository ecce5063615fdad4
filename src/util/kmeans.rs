use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Seeded K-Means clustering over embedding vectors.
///
/// Centroids are initialised with k-means++ from a fixed seed, so identical input
/// always yields identical assignments.
#[derive(Debug, Clone)]
pub struct KMeans {
    pub centroids: Vec<Vec<f32>>,
    pub assignments: Vec<usize>,
}

impl KMeans {
    /// Runs K-Means clustering.
    ///
    /// # Arguments
    /// * `data` - List of data points (vectors).
    /// * `k` - Number of clusters.
    /// * `max_iterations` - Maximum number of iterations.
    /// * `seed` - Seed for centroid initialisation.
    #[must_use]
    pub fn new(data: &[Vec<f32>], k: usize, max_iterations: usize, seed: u64) -> Self {
        if data.is_empty() || k == 0 {
            return Self {
                centroids: vec![],
                assignments: vec![],
            };
        }

        let k = k.min(data.len());
        let dim = data[0].len();
        let mut rng = StdRng::seed_from_u64(seed);

        let mut centroids = init_plus_plus(data, k, &mut rng);
        let mut assignments = vec![usize::MAX; data.len()];
        let mut iterations = 0;

        loop {
            iterations += 1;

            // E-step: assign points to nearest centroid, lowest index wins ties
            let new_assignments: Vec<usize> = data
                .iter()
                .map(|point| nearest_centroid(point, &centroids))
                .collect();

            let changed = new_assignments != assignments;
            assignments = new_assignments;
            if !changed || iterations > max_iterations {
                break;
            }

            // M-step: update centroids
            let mut sums = vec![vec![0.0_f32; dim]; k];
            let mut counts = vec![0_usize; k];
            for (point, &cluster) in data.iter().zip(&assignments) {
                for (sum, value) in sums[cluster].iter_mut().zip(point) {
                    *sum += value;
                }
                counts[cluster] += 1;
            }

            for (j, centroid) in centroids.iter_mut().enumerate() {
                if counts[j] == 0 {
                    // Keep the previous centroid; an empty cluster simply stays empty.
                    continue;
                }
                #[allow(clippy::cast_precision_loss)]
                let count = counts[j] as f32;
                for (value, sum) in centroid.iter_mut().zip(&sums[j]) {
                    *value = sum / count;
                }
            }
        }

        Self {
            centroids,
            assignments,
        }
    }
}

fn init_plus_plus(data: &[Vec<f32>], k: usize, rng: &mut StdRng) -> Vec<Vec<f32>> {
    let mut centroids = Vec::with_capacity(k);
    centroids.push(data[rng.random_range(0..data.len())].clone());

    while centroids.len() < k {
        let weights: Vec<f64> = data
            .iter()
            .map(|point| {
                centroids
                    .iter()
                    .map(|c| f64::from(distance_sq(point, c)))
                    .fold(f64::INFINITY, f64::min)
            })
            .collect();
        let total: f64 = weights.iter().sum();

        if total <= 0.0 {
            // Every remaining point coincides with a centroid.
            centroids.push(data[centroids.len() % data.len()].clone());
            continue;
        }

        let mut target = rng.random::<f64>() * total;
        let mut chosen = data.len() - 1;
        for (idx, weight) in weights.iter().enumerate() {
            if target < *weight {
                chosen = idx;
                break;
            }
            target -= weight;
        }
        centroids.push(data[chosen].clone());
    }

    centroids
}

fn nearest_centroid(point: &[f32], centroids: &[Vec<f32>]) -> usize {
    let mut min_dist_sq = f32::MAX;
    let mut best_cluster = 0;
    for (j, centroid) in centroids.iter().enumerate() {
        let dist_sq = distance_sq(point, centroid);
        if dist_sq < min_dist_sq {
            min_dist_sq = dist_sq;
            best_cluster = j;
        }
    }
    best_cluster
}

#[must_use]
pub fn distance_sq(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_blobs() -> Vec<Vec<f32>> {
        vec![
            vec![0.0, 0.1],
            vec![0.1, 0.0],
            vec![0.0, 0.0],
            vec![10.0, 10.1],
            vec![10.1, 10.0],
            vec![10.0, 10.0],
        ]
    }

    #[test]
    fn separates_well_separated_blobs() {
        let result = KMeans::new(&two_blobs(), 2, 50, 7);
        assert_eq!(result.assignments.len(), 6);
        assert_eq!(result.assignments[0], result.assignments[1]);
        assert_eq!(result.assignments[1], result.assignments[2]);
        assert_eq!(result.assignments[3], result.assignments[4]);
        assert_ne!(result.assignments[0], result.assignments[3]);
    }

    #[test]
    fn same_seed_same_assignments() {
        let data = two_blobs();
        let first = KMeans::new(&data, 3, 50, 11);
        let second = KMeans::new(&data, 3, 50, 11);
        assert_eq!(first.assignments, second.assignments);
    }

    #[test]
    fn empty_input_yields_empty_model() {
        let result = KMeans::new(&[], 3, 10, 1);
        assert!(result.centroids.is_empty());
        assert!(result.assignments.is_empty());
    }

    #[test]
    fn k_is_capped_by_point_count() {
        let data = vec![vec![1.0], vec![2.0]];
        let result = KMeans::new(&data, 5, 10, 1);
        assert_eq!(result.centroids.len(), 2);
    }
}
