use approx::assert_relative_eq;
use dcmri::sig::{
    conc_lin, conc_src, conc_ss, conc_t2w, relax, signal_free, signal_lin, signal_spgr_multi,
    signal_ss, signal_ss_multi, MultiCompartment, SignalError, WaterExchange,
};
use nalgebra::DMatrix;
use ndarray::{Array1, Array2};

const TR: f64 = 0.005;
const FA: f64 = 15.0;

fn tissue(fw: WaterExchange) -> MultiCompartment {
    MultiCompartment::constant(vec![0.3, 0.7], &[1.0, 2.0]).with_exchange(fw)
}

#[test]
fn weak_and_strong_exchange_reach_the_limits() {
    let none = signal_ss_multi(1.0, &tissue(WaterExchange::None), TR, FA).unwrap();
    let fast = signal_ss_multi(1.0, &tissue(WaterExchange::Fast), TR, FA).unwrap();
    let weak = WaterExchange::uniform(1e-12, 2).unwrap();
    let strong = WaterExchange::uniform(1e8, 2).unwrap();
    let weak = signal_ss_multi(1.0, &tissue(weak), TR, FA).unwrap();
    let strong = signal_ss_multi(1.0, &tissue(strong), TR, FA).unwrap();
    assert_relative_eq!(weak[0], none[0], max_relative = 1e-6);
    assert_relative_eq!(strong[0], fast[0], max_relative = 1e-5);
}

#[test]
fn mixed_finite_and_infinite_exchange_is_rejected() {
    let inf = f64::INFINITY;
    let flows = DMatrix::from_row_slice(3, 3, &[0.0, 1.0, inf, 1.0, 0.0, 1.0, 1.0, 1.0, 0.0]);
    let tissue = MultiCompartment::constant(vec![0.2, 0.3, 0.5], &[1.0, 1.0, 1.0])
        .with_exchange(WaterExchange::Flows(flows));
    assert!(signal_ss_multi(1.0, &tissue, TR, FA).is_err());
}

#[test]
fn mismatched_dimensions_are_rejected() {
    let tissue = MultiCompartment::constant(vec![0.2, 0.3, 0.5], &[1.0, 1.0]);
    assert!(signal_ss_multi(1.0, &tissue, TR, FA).is_err());
}

#[test]
fn steady_state_signal_inverts_to_concentration() {
    let (t10, r1) = (1.2, 4.5);
    let conc = [0.0, 0.0, 0.5, 1.0, 2.0, 0.3];
    let rates = relax(&conc, 1.0 / t10, r1);
    let s: Vec<f64> = rates.iter().map(|&r| signal_ss(150.0, r, TR, FA, None)).collect();
    let c = conc_ss(&s, TR, FA, t10, r1, 2).unwrap();
    for (a, b) in c.iter().zip(&conc) {
        assert_relative_eq!(*a, *b, epsilon = 1e-9);
    }
}

#[test]
fn saturation_recovery_and_linear_invert() {
    let (t10, r1, tc) = (1.0, 5.0, 0.2);
    let conc = [0.0, 0.4, 1.5];
    let rates = relax(&conc, 1.0 / t10, r1);
    let s: Vec<f64> = rates.iter().map(|&r| signal_free(10.0, r, tc, 90.0, None)).collect();
    let c = conc_src(&s, tc, t10, r1, 1).unwrap();
    for (a, b) in c.iter().zip(&conc) {
        assert_relative_eq!(*a, *b, epsilon = 1e-9);
    }
    let s: Vec<f64> = rates.iter().map(|&r| signal_lin(r, 3.0, None)).collect();
    let c = conc_lin(&s, t10, r1, 1).unwrap();
    for (a, b) in c.iter().zip(&conc) {
        assert_relative_eq!(*a, *b, epsilon = 1e-12);
    }
}

#[test]
fn unphysical_signal_maps_to_zero_relaxation() {
    let (t10, r1) = (1.0, 5.0);
    let s = [1.0, 1.0, 1e6];
    let c = conc_ss(&s, TR, FA, t10, r1, 2).unwrap();
    assert_relative_eq!(c[2], -1.0 / (t10 * r1), epsilon = 1e-12);
}

fn relative_distance(a: &Array1<f64>, b: &Array1<f64>) -> f64 {
    let diff = (a - b).mapv(|x| x * x).sum().sqrt();
    diff / b.mapv(|x| x * x).sum().sqrt()
}

fn with_outflow(off: f64) -> MultiCompartment {
    let n = 5;
    let flows = DMatrix::from_row_slice(2, 2, &[0.1, off, off, 1.0]);
    MultiCompartment::new(vec![0.5, 0.5], Array2::ones((2, n)))
        .with_inflow(Array2::ones((2, n)))
        .with_exchange(WaterExchange::Flows(flows))
}

#[test]
fn reference_rates_calibrate_to_s0() {
    let exchanges = [
        WaterExchange::Fast,
        WaterExchange::None,
        WaterExchange::uniform(1.0, 2).unwrap(),
    ];
    for fw in exchanges {
        let tissue = MultiCompartment::constant(vec![0.5, 0.5], &[1.0, 1.0])
            .with_exchange(fw)
            .with_reference(vec![1.0, 1.0]);
        let s = signal_ss_multi(5.0, &tissue, 1.0, 45.0).unwrap();
        assert_relative_eq!(s[0], 5.0, max_relative = 1e-9);
    }
}

#[test]
fn inflow_with_outflow_reaches_fast_limit() {
    let fast = signal_ss_multi(1.0, &with_outflow(f64::INFINITY), 1.0, 10.0).unwrap();
    let large = signal_ss_multi(1.0, &with_outflow(1e6), 1.0, 10.0).unwrap();
    assert_eq!(fast.len(), 5);
    assert!(relative_distance(&large, &fast) < 1e-6);
}

#[test]
fn inflow_with_outflow_reaches_no_exchange_limit() {
    let none = signal_ss_multi(1.0, &with_outflow(0.0), 1.0, 10.0).unwrap();
    let small = signal_ss_multi(1.0, &with_outflow(1e-6), 1.0, 10.0).unwrap();
    assert!(relative_distance(&small, &none) < 1e-5);
}

#[test]
fn finite_and_infinite_flows_between_two_compartments_are_rejected() {
    let flows = DMatrix::from_row_slice(2, 2, &[0.1, 1e6, f64::INFINITY, 1.0]);
    let tissue = MultiCompartment::new(vec![0.5, 0.5], Array2::ones((2, 5)))
        .with_inflow(Array2::ones((2, 5)))
        .with_exchange(WaterExchange::Flows(flows));
    let err = signal_ss_multi(1.0, &tissue, 1.0, 10.0).unwrap_err();
    assert_eq!(err, SignalError::MixedExchange);
    let err = signal_spgr_multi(1.0, &tissue, 1.0, 1.0, 10.0, None).unwrap_err();
    assert_eq!(err, SignalError::MixedExchange);
}

#[test]
fn spgr_rejects_inconsistent_tissues() {
    let tissue = MultiCompartment::constant(vec![0.2, 0.3, 0.5], &[1.0, 1.0]);
    let err = signal_spgr_multi(1.0, &tissue, 1.0, 1.0, 10.0, None).unwrap_err();
    assert!(matches!(err, SignalError::ShapeMismatch { .. }));

    let tissue = MultiCompartment::constant(vec![0.5, 0.5], &[1.0, 1.0])
        .with_exchange(WaterExchange::Flows(DMatrix::from_element(3, 3, 1.0)));
    let err = signal_spgr_multi(1.0, &tissue, 1.0, 1.0, 10.0, None).unwrap_err();
    assert!(matches!(err, SignalError::ShapeMismatch { .. }));

    let tissue = MultiCompartment::constant(vec![0.5, 0.5], &[1.0, 1.0])
        .with_inflow(Array2::ones((2, 3)));
    let err = signal_spgr_multi(1.0, &tissue, 1.0, 1.0, 10.0, None).unwrap_err();
    assert!(matches!(err, SignalError::ShapeMismatch { .. }));
}

#[test]
fn infinite_echo_time_gives_zero_concentration() {
    let s = [1.0; 10];
    let c = conc_t2w(&s, f64::INFINITY, 1.0, 1).unwrap();
    assert!(c.iter().all(|&x| x == 0.0));
}
