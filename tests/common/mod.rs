use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use std::fmt::Write as _;

pub const HEADER: &str = "AGE\tSEX\tSMOKSTAT\tQUETELET\tVITUSE\tCALORIES\tFAT\tFIBER\tALCOHOL\tCHOLESTEROL\tBETADIET\tRETDIET\tBETAPLASMA\tRETPLASMA";

/// Tab-separated cohort in the study layout, with a leading comment line.
/// FAT is nearly proportional to CALORIES; RETPLASMA depends on AGE and
/// ALCOHOL only.
pub fn cohort_tsv(n: usize, seed: u64) -> String {
    let mut rng = StdRng::seed_from_u64(seed);
    let noise = Normal::new(0.0, 1.0).unwrap();
    let mut text = String::from("# synthetic cohort\n");
    text.push_str(HEADER);
    text.push('\n');
    for _ in 0..n {
        let age: f64 = rng.gen_range(19.0..84.0);
        let calories: f64 = rng.gen_range(900.0..3200.0);
        let fat = 0.04 * calories + 4.0 * noise.sample(&mut rng);
        let alcohol: f64 = rng.gen_range(0.0..25.0);
        let ret = 300.0 + 4.0 * age + 6.0 * alcohol + 40.0 * noise.sample(&mut rng);
        writeln!(
            text,
            "{:.1}\t{}\t{}\t{:.3}\t{}\t{:.1}\t{:.2}\t{:.1}\t{:.2}\t{:.1}\t{:.0}\t{:.0}\t{:.0}\t{:.1}",
            age,
            rng.gen_range(1..=2),
            rng.gen_range(1..=3),
            rng.gen_range(18.0..40.0),
            rng.gen_range(1..=3),
            calories,
            fat,
            rng.gen_range(4.0..30.0),
            alcohol,
            rng.gen_range(40.0..600.0),
            rng.gen_range(500.0..6000.0),
            rng.gen_range(300.0..2000.0),
            rng.gen_range(50.0..400.0),
            ret
        )
        .unwrap();
    }
    text
}
