use std::path::PathBuf;

use approx::assert_relative_eq;
use dcmri::data::{read_curves, DataError, ParamTable};
use dcmri::prelude::*;

fn scratch(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("dcmri-{}-{name}", std::process::id()))
}

#[test]
fn fit_curves_read_from_file() {
    let data = fake_tissue(&FakeTissueOptions::default()).unwrap();
    let mut text = String::from("# synthetic scan\nTIME,aif,tissue\n");
    for i in 0..data.time.len() {
        text.push_str(&format!("{},{},{}\n", data.time[i], data.aif[i], data.roi[i]));
    }
    let path = scratch("curves.csv");
    std::fs::write(&path, text).unwrap();
    let curves = read_curves(&path).unwrap();
    std::fs::remove_file(&path).unwrap();

    let time = curves.time();
    let aif = curves.roi("aif").unwrap();
    let roi = curves.roi("tissue").unwrap();
    let mut tissue = Tissue::new(FakeTissueOptions::default().tissue, time, aif).unwrap();
    tissue.train(time, roi, &TrainOptions::default()).unwrap();
    let ve = tissue.params(&["ve"]).unwrap()[0];
    assert_relative_eq!(ve, 0.2, max_relative = 2e-2);

    let mut table = ParamTable::new();
    table.push("synthetic", "1", &tissue.export_params().unwrap());
    let path = scratch("params.csv");
    table.write_csv(&path).unwrap();
    let back = ParamTable::from_csv(&path).unwrap();
    std::fs::remove_file(&path).unwrap();
    assert_eq!(back, table);
}

#[test]
fn missing_file_is_an_io_error() {
    let err = read_curves(scratch("does-not-exist.csv")).unwrap_err();
    assert!(matches!(err, DataError::Io(_)));
}
