use approx::assert_relative_eq;
use dcmri::fit::{cost, curve_fit, FitError, Metric, TrainOptions};
use dcmri::pk::conc_comp;
use dcmri::DcmriError;

fn step_input(t: &[f64]) -> Vec<f64> {
    t.iter().map(|&x| if x >= 10.0 { 1.0 } else { 0.0 }).collect()
}

#[test]
fn recovers_compartment_transit_time() {
    let t: Vec<f64> = (0..120).map(|i| i as f64).collect();
    let j = step_input(&t);
    let y = conc_comp(&j, 25.0, &t).unwrap();
    let model = |p: &[f64]| -> Result<Vec<f64>, DcmriError> { Ok(conc_comp(&j, p[0], &t)?) };
    let fit = curve_fit(
        model,
        &[5.0],
        &[(0.0, 100.0)],
        &y,
        None,
        &TrainOptions::default(),
    )
    .unwrap();
    assert_relative_eq!(fit.params[0], 25.0, max_relative = 1e-3);
    assert!(fit.iterations > 0);
}

#[test]
fn zero_weights_ignore_outliers() {
    let t: Vec<f64> = (0..50).map(|i| i as f64).collect();
    let mut y: Vec<f64> = t.iter().map(|x| 0.5 * x).collect();
    y[20] = 1e3;
    let mut w = vec![1.0; t.len()];
    w[20] = 0.0;
    let model =
        |p: &[f64]| -> Result<Vec<f64>, DcmriError> { Ok(t.iter().map(|x| p[0] * x).collect()) };
    let free = (f64::NEG_INFINITY, f64::INFINITY);
    let options = TrainOptions::default();
    let fit = curve_fit(model, &[1.0], &[free], &y, Some(w.as_slice()), &options).unwrap();
    assert_relative_eq!(fit.params[0], 0.5, max_relative = 1e-3);
}

#[test]
fn rejects_inconsistent_inputs() {
    let model = |p: &[f64]| -> Result<Vec<f64>, DcmriError> { Ok(vec![p[0]; 4]) };
    let options = TrainOptions::default();
    let err = curve_fit(model, &[1.0], &[(2.0, 0.0)], &[1.0; 4], None, &options).unwrap_err();
    assert!(matches!(err, DcmriError::Fit(FitError::InvalidBounds { .. })));
    let err = curve_fit(model, &[1.0], &[(0.0, 2.0)], &[1.0; 4], Some(&[1.0][..]), &options)
        .unwrap_err();
    assert!(matches!(err, DcmriError::Fit(FitError::DimensionMismatch { .. })));
}

#[test]
fn goodness_of_fit_metrics() {
    let y = [3.0, 4.0];
    let f = [3.0, 3.0];
    assert_relative_eq!(cost(&y, &f, Metric::Sse).unwrap(), 1.0);
    assert_relative_eq!(cost(&y, &f, Metric::Rms).unwrap(), (0.5f64).sqrt());
    assert_relative_eq!(cost(&y, &f, Metric::Nrms).unwrap(), 100.0 / 5.0);
}
