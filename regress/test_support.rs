//! Seeded synthetic cohorts shaped like the retinol study, for unit tests.

use crate::data::{Dataset, Observation, RowId};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

/// `n` patients with all fourteen columns filled. FAT tracks CALORIES closely
/// and RETPLASMA depends on AGE and ALCOHOL only.
pub fn synthetic_study(n: usize, seed: u64) -> Dataset {
    let mut rng = StdRng::seed_from_u64(seed);
    let noise = Normal::new(0.0, 1.0).unwrap();
    let observations = (1..=n)
        .map(|id| {
            let age = rng.gen_range(19.0..84.0);
            let calories = rng.gen_range(900.0..3200.0);
            let fat = 0.04 * calories + 4.0 * noise.sample(&mut rng);
            let alcohol = rng.gen_range(0.0..25.0);
            let values = [
                age,
                rng.gen_range(1..=2) as f64,
                rng.gen_range(1..=3) as f64,
                rng.gen_range(18.0..40.0),
                rng.gen_range(1..=3) as f64,
                calories,
                fat,
                rng.gen_range(4.0..30.0),
                alcohol,
                rng.gen_range(40.0..600.0),
                rng.gen_range(500.0..6000.0),
                rng.gen_range(300.0..2000.0),
                rng.gen_range(50.0..400.0),
                300.0 + 4.0 * age + 6.0 * alcohol + 40.0 * noise.sample(&mut rng),
            ];
            Observation::from_values(RowId::new(id).unwrap(), values).unwrap()
        })
        .collect();
    Dataset::from_observations(observations).unwrap()
}
