//! Sample generation
//!
//! Every generator takes the RNG explicitly; callers seed one `StdRng` per
//! run so the same seed always yields the same sample.

use rand::Rng;
use rand_distr::{Distribution, Normal};
use taskbag_ipc::{BodyMeasurement, Sample};

/// Seed used when neither the command line nor the config gives one
pub const DEFAULT_SEED: u64 = 23;

/// Mean and standard deviation of adult height, in centimetres
pub const HEIGHT_CM: (f64, f64) = (168.0, 0.1);

/// Mean and standard deviation of adult weight, in kilograms
pub const WEIGHT_KG: (f64, f64) = (62.0, 0.4);

/// `size` vectors of `dims` components drawn uniformly from `[0, 1)`
pub fn draw_vectors<R: Rng + ?Sized>(size: usize, dims: usize, rng: &mut R) -> Sample {
    let points = (0..size)
        .map(|_| (0..dims).map(|_| rng.gen_range(0.0..1.0)).collect())
        .collect();
    Sample::Vectors(points)
}

/// `size` individuals with normally distributed height and weight.
///
/// All heights are drawn before any weight, so growing the population does
/// not shift the heights of the individuals already drawn.
pub fn draw_population<R: Rng + ?Sized>(size: usize, rng: &mut R) -> Sample {
    let (height, weight) = match (
        Normal::new(HEIGHT_CM.0, HEIGHT_CM.1),
        Normal::new(WEIGHT_KG.0, WEIGHT_KG.1),
    ) {
        (Ok(h), Ok(w)) => (h, w),
        // Constant parameters; a finite positive deviation always builds
        _ => return Sample::Population(Vec::new()),
    };

    let heights: Vec<f64> = (0..size).map(|_| height.sample(rng)).collect();
    let population = heights
        .into_iter()
        .map(|h| BodyMeasurement::new(h, weight.sample(rng)))
        .collect();
    Sample::Population(population)
}

/// Number of individuals in a population of `millions` million
pub fn population_size(millions: f64) -> usize {
    (millions * 1e6).round().max(0.0) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_vectors_in_unit_box() {
        let mut rng = StdRng::seed_from_u64(DEFAULT_SEED);
        let Sample::Vectors(points) = draw_vectors(50, 3, &mut rng) else {
            panic!("expected vectors");
        };
        assert_eq!(points.len(), 50);
        assert!(points.iter().all(|p| p.len() == 3));
        assert!(points.iter().flatten().all(|&x| (0.0..1.0).contains(&x)));
    }

    #[test]
    fn test_same_seed_same_sample() {
        let a = draw_population(100, &mut StdRng::seed_from_u64(DEFAULT_SEED));
        let b = draw_population(100, &mut StdRng::seed_from_u64(DEFAULT_SEED));
        let c = draw_population(100, &mut StdRng::seed_from_u64(DEFAULT_SEED + 1));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_population_is_plausible() {
        let mut rng = StdRng::seed_from_u64(DEFAULT_SEED);
        let Sample::Population(people) = draw_population(10_000, &mut rng) else {
            panic!("expected population");
        };
        let heights: Vec<f64> = people.iter().map(|p| p.height_cm).collect();
        let weights: Vec<f64> = people.iter().map(|p| p.weight_kg).collect();
        let mean_h = taskbag_stats::mean(&heights).unwrap();
        let mean_w = taskbag_stats::mean(&weights).unwrap();
        assert!((mean_h - 168.0).abs() < 0.01);
        assert!((mean_w - 62.0).abs() < 0.05);
    }

    #[test]
    fn test_population_size() {
        assert_eq!(population_size(1.0), 1_000_000);
        assert_eq!(population_size(0.001), 1_000);
        assert_eq!(population_size(-3.0), 0);
    }
}
