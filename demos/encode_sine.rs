//! Fits a 1-D sine wave and reports the range error, the same kind of
//! end-to-end walkthrough the upstream project ships as a usage example
//! rather than a test.

use mfa::info::MfaInfo;
use mfa::point_set::PointSet;
use mfa::Model;
use ndarray::Array2;

fn main() -> anyhow::Result<()> {
    let n = 101;
    let mut domain = Array2::<f64>::zeros((n, 2));
    for i in 0..n {
        let x = f64::from(u32::try_from(i)?) / f64::from(u32::try_from(n - 1)?);
        domain[[i, 0]] = x;
        domain[[i, 1]] = (2.0 * std::f64::consts::PI * x).sin();
    }
    let points = PointSet::new(domain, vec![n], 1)?;

    let mut info = MfaInfo::new(1, true);
    info.set_degree(0, 3);
    info.set_nctrl_pts(0, 12);
    info.set_adaptive(1e-4, 20);

    let model = Model::encode_adaptive(&points, &info)?;
    let err = model.range_error(&points)?;

    println!("max abs error: {:.6}", err.max_abs_error);
    println!("rms error:     {:.6}", err.rms_error);
    println!("value at 0.5:  {:.6}", model.decode(&[0.5])?[0]);

    Ok(())
}
