//! Encodes a randomly perturbed but smooth 1-D function and checks that the
//! fixed encoder still bounds its error, using a seeded PRNG the same way
//! the teacher's own integration tests generate reproducible synthetic
//! data (`rand_pcg::Pcg64` with a fixed seed, never an unseeded RNG).

use mfa::{Model, MfaInfo, PointSet};
use ndarray::Array2;
use rand::Rng;
use rand_pcg::Pcg64;

#[test]
fn fixed_encode_handles_small_random_noise_on_a_smooth_curve() {
    let mut rng = Pcg64::new(0xcafef00dd15ea5e5, 0xa02bdbf7bb3c0a7ac28fa16a64abf96);

    let n = 81;
    let mut domain = Array2::<f64>::zeros((n, 2));
    for i in 0..n {
        let x = f64::from(u32::try_from(i).unwrap()) / f64::from(u32::try_from(n - 1).unwrap());
        let noise: f64 = rng.gen_range(-1e-4..1e-4);
        domain[[i, 0]] = x;
        domain[[i, 1]] = x.sin() + noise;
    }
    let points = PointSet::new(domain, vec![n], 1).unwrap();

    let mut info = MfaInfo::new(1, false);
    info.set_degree(0, 3);
    info.set_nctrl_pts(0, 25);

    let model = Model::encode_fixed(&points, &info).unwrap();
    let err = model.range_error(&points).unwrap();
    assert!(err.max_abs_error < 1e-2, "{}", err.max_abs_error);
}
