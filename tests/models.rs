use approx::assert_relative_eq;
use dcmri::prelude::*;

fn train_on_fake(options: FakeTissueOptions) -> Tissue {
    let data = fake_tissue(&options).unwrap();
    let mut tissue = Tissue::new(options.tissue.clone(), &data.time, &data.aif).unwrap();
    tissue
        .train(&data.time, &data.roi, &TrainOptions::default())
        .unwrap();
    tissue
}

#[test]
fn extended_tofts_recovers_noise_free_truth() {
    let options = FakeTissueOptions::default().with_tissue(
        TissueOptions::new(Kinetics::HF).with_baseline(10),
        &[("vp", 0.05), ("Ktrans", 0.01), ("ve", 0.3)],
    );
    let tissue = train_on_fake(options);
    let v = tissue.params(&["vp", "Ktrans", "ve"]).unwrap();
    assert_relative_eq!(v[0], 0.05, max_relative = 1e-2);
    assert_relative_eq!(v[1], 0.01, max_relative = 1e-2);
    assert_relative_eq!(v[2], 0.3, max_relative = 1e-2);
}

#[test]
fn weakly_vascularised_fit_under_noise() {
    let options = FakeTissueOptions::default()
        .with_tissue(
            TissueOptions::new(Kinetics::WV).with_baseline(10),
            &[("Ktrans", 0.005), ("ve", 0.25)],
        )
        .with_cnr(50.0)
        .with_seed(3);
    let tissue = train_on_fake(options);
    let v = tissue.params(&["Ktrans", "ve"]).unwrap();
    assert_relative_eq!(v[0], 0.005, max_relative = 0.2);
    assert_relative_eq!(v[1], 0.25, max_relative = 0.2);
    let rows = tissue.export_params().unwrap();
    let ktrans = rows.iter().find(|r| r.parameter == "Ktrans").unwrap();
    assert!(ktrans.stdev > 0.0);
}

#[test]
fn exported_parameters_fill_a_table() {
    let data = fake_tissue(&FakeTissueOptions::default()).unwrap();
    let mut table = ParamTable::new();
    table.push("001", "baseline", &data.truth);
    assert_eq!(table.value("001", "baseline", "Fp"), Some(0.1));
    assert_eq!(table.len(), data.truth.len());
}

#[test]
fn options_load_from_json() {
    let json = r#"{
        "kinetics": "2CX",
        "water_exchange": "RF",
        "sequence": { "type": "SteadyState", "tr": 0.004, "fa": 20.0 },
        "hct": 0.4
    }"#;
    let options: TissueOptions = serde_json::from_str(json).unwrap();
    assert_eq!(options.kinetics, Kinetics::TwoCX);
    assert_eq!(options.water_exchange.to_string(), "RF");
    assert_eq!(options.r10, TissueOptions::default().r10);
    let time: Vec<f64> = (0..100).map(|i| i as f64).collect();
    let aif = aif_parker(&time, 10.0);
    let tissue = Tissue::new(options, &time, &aif).unwrap();
    assert!(tissue.parameters().contains("PSe"));
    assert!(!tissue.parameters().contains("PSc"));
}

#[test]
fn restricted_exchange_needs_compartmental_kinetics() {
    let time: Vec<f64> = (0..100).map(|i| i as f64).collect();
    let aif = aif_parker(&time, 10.0);
    let regime: WaterExchangeRegime = "RR".parse().unwrap();
    let options = TissueOptions::new(Kinetics::FX).with_water_exchange(regime);
    assert!(Tissue::new(options, &time, &aif).is_err());
}

#[test]
fn liver_uptake_from_population_input() {
    let time: Vec<f64> = (0..300).map(|i| 2.0 * i as f64).collect();
    let aif = aif_parker(&time, 20.0);
    let options = LiverOptions::default().with_baseline(5);
    let mut truth = Liver::new(options.clone(), &time, &aif).unwrap();
    truth.set_params(&[("S0", 50.0), ("khe", 0.02), ("ve", 0.25)]).unwrap();
    let signal = truth.predict(&time).unwrap();

    let mut liver = Liver::new(options, &time, &aif).unwrap();
    for symbol in ["Te", "De", "Th"] {
        liver.parameters_mut().set_free(symbol, false).unwrap();
    }
    liver.train(&time, &signal, &TrainOptions::default()).unwrap();
    let v = liver.params(&["khe", "ve", "S0"]).unwrap();
    assert_relative_eq!(v[0], 0.02, max_relative = 1e-2);
    assert_relative_eq!(v[1], 0.25, max_relative = 1e-2);
    assert_relative_eq!(v[2], 50.0, max_relative = 1e-9);
    assert!(liver.cost(&time, &signal, Metric::Nrms).unwrap() < 0.1);
}

#[test]
fn kidney_filtration_from_population_input() {
    let time: Vec<f64> = (0..150).map(|i| 2.0 * i as f64).collect();
    let aif = aif_parker(&time, 20.0);
    let options = KidneyOptions::default().with_baseline(5);
    let mut truth = Kidney::new(options.clone(), &time, &aif).unwrap();
    truth.set_params(&[("S0", 80.0), ("FF", 0.15)]).unwrap();
    let signal = truth.predict(&time).unwrap();

    let mut kidney = Kidney::new(options, &time, &aif).unwrap();
    for symbol in ["Fp", "vp", "Tt"] {
        kidney.parameters_mut().set_free(symbol, false).unwrap();
    }
    kidney.train(&time, &signal, &TrainOptions::default()).unwrap();
    let gfr = kidney.params(&["GFR"]).unwrap()[0];
    assert_relative_eq!(gfr, 0.15 * 0.03 * 150.0, max_relative = 1e-2);
}

fn samples(start: f64, n: usize, dt: f64) -> Vec<f64> {
    (0..n).map(|i| start + dt * i as f64).collect()
}

#[test]
fn two_scan_training_recovers_second_bolus_and_uptake() {
    let options = AortaLiverOptions::default()
        .with_second_scan(300.0, 0.1)
        .with_baseline(4);
    let times = vec![
        Scan::times(samples(0.0, 90, 3.0), samples(0.0, 90, 3.0)),
        Scan::times(samples(300.0, 90, 3.0), samples(300.0, 90, 3.0)),
    ];
    let mut truth = AortaLiver::two_scan(options.clone()).unwrap();
    truth
        .set_params(&[
            ("S0a", 200.0),
            ("S0l", 100.0),
            ("S0a2", 180.0),
            ("S0l2", 90.0),
            ("BAT2", 336.0),
            ("khe", 0.01),
        ])
        .unwrap();
    let data = truth.predict(&times).unwrap();

    let mut model = AortaLiver::two_scan(options).unwrap();
    for symbol in ["BAT", "CO", "Thl", "Dhl", "To", "Eb", "Te", "De", "ve", "Th"] {
        model.parameters_mut().set_free(symbol, false).unwrap();
    }
    // the second liver baseline carries uptake from the first bolus
    model.parameters_mut().set_free("S0l2", true).unwrap();
    let fit = model.train(&data, &TrainOptions::default()).unwrap();
    assert!(fit.iterations > 0);
    let v = model.params(&["BAT2", "khe", "S0a2", "S0l2"]).unwrap();
    assert_relative_eq!(v[0], 336.0, max_relative = 2e-3);
    assert_relative_eq!(v[1], 0.01, max_relative = 1e-2);
    assert_relative_eq!(v[2], 180.0, max_relative = 1e-2);
    assert_relative_eq!(v[3], 90.0, max_relative = 1e-2);
    assert!(model.cost(&data, Metric::Nrms).unwrap() < 0.1);
}
