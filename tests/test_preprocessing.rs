//! Integration test: cleaning, splitting, scaling and selection

use flowsentry::ingest::{FlowColumn, FlowTable};
use flowsentry::preprocessing::{
    stratified_split, test_count, DatasetCleaner, FeatureSelector, Scaler, ScalerType, SelectionStrategy,
    UNSEEN_CATEGORY,
};
use ndarray::Axis;
use polars::prelude::*;
use std::collections::HashSet;

fn flows(n: usize) -> FlowTable {
    FlowTable::from_columns(vec![
        FlowColumn::numeric("flow_duration", (0..n).map(|i| Some(i as f64)).collect()),
        FlowColumn::numeric("idle_mean", vec![Some(7.0); n]),
        FlowColumn::numeric("fwd_pkts_s", (0..n).map(|i| if i == 3 { Some(f64::INFINITY) } else { Some((i % 4) as f64) }).collect()),
        FlowColumn::text("service", (0..n).map(|i| Some(["http", "dns"][i % 2].to_string())).collect()),
        FlowColumn::text("src_ip", (0..n).map(|i| Some(format!("10.0.0.{}", i))).collect()),
        FlowColumn::text("label", (0..n).map(|i| Some(["BENIGN", "SYN"][i % 2].to_string())).collect()),
    ])
    .unwrap()
}

#[test]
fn test_constant_column_is_dropped() {
    let mut cleaner = DatasetCleaner::new("label");
    let x = cleaner.fit_transform(&flows(20)).unwrap();

    let columns = cleaner.feature_columns();
    assert!(!columns.contains(&"idle_mean".to_string()));
    assert_eq!(cleaner.dropped_constant(), ["idle_mean".to_string()]);
    assert_eq!(x.ncols(), columns.len());
}

#[test]
fn test_identifiers_and_target_never_become_features() {
    let mut cleaner = DatasetCleaner::new("label");
    cleaner.fit(&flows(20)).unwrap();

    let columns = cleaner.feature_columns();
    assert!(!columns.contains(&"src_ip".to_string()));
    assert!(!columns.contains(&"label".to_string()));
    assert!(cleaner.excluded().contains(&"src_ip".to_string()));
}

#[test]
fn test_non_finite_cells_are_imputed() {
    let mut cleaner = DatasetCleaner::new("label");
    let x = cleaner.fit_transform(&flows(20)).unwrap();
    assert!(x.iter().all(|v| v.is_finite()));
}

#[test]
fn test_transform_clips_to_training_bounds() {
    let mut cleaner = DatasetCleaner::new("label");
    cleaner.fit(&flows(20)).unwrap();
    let bounds = cleaner
        .column_stats()
        .iter()
        .find(|s| s.name == "flow_duration")
        .cloned()
        .unwrap();

    let mut probe = flows(2);
    probe.remove_column("flow_duration");
    probe
        .push_column(FlowColumn::numeric("flow_duration", vec![Some(1e12), Some(-1e12)]))
        .unwrap();
    let x = cleaner.transform(&probe).unwrap();
    let j = cleaner.feature_columns().iter().position(|c| c == "flow_duration").unwrap();

    assert_eq!(x[[0, j]], bounds.upper);
    assert_eq!(x[[1, j]], bounds.lower);
}

#[test]
fn test_unseen_category_gets_reserved_code() {
    let mut cleaner = DatasetCleaner::new("label");
    cleaner.fit(&flows(20)).unwrap();
    let encoder = cleaner.encoders().get("service").unwrap();
    assert_eq!(encoder.encode(Some("smtp")), UNSEEN_CATEGORY);
}

#[test]
fn test_stratified_split_covers_every_row() {
    let labels: Vec<usize> = (0..1000).map(|i| i % 3).collect();
    let split = stratified_split(&labels, 3, 0.2, 42);

    assert!(split.stratified);
    assert_eq!(split.test.len(), test_count(1000, 0.2));
    let train: HashSet<usize> = split.train.iter().copied().collect();
    let test: HashSet<usize> = split.test.iter().copied().collect();
    assert!(train.is_disjoint(&test));
    assert_eq!(train.len() + test.len(), 1000);
    for class in 0..3 {
        let population = labels.iter().filter(|&&c| c == class).count() as f64 / 1000.0;
        let held_out = split.test.iter().filter(|&&i| labels[i] == class).count() as f64 / split.test.len() as f64;
        assert!((population - held_out).abs() <= 0.02);
    }
}

#[test]
fn test_singleton_class_falls_back_to_shuffle() {
    // five classes, the last with a single row
    let mut labels: Vec<usize> = (0..40).map(|i| i % 4).collect();
    labels.push(4);
    let split = stratified_split(&labels, 5, 0.2, 42);

    assert!(!split.stratified);
    assert_eq!(split.train.len() + split.test.len(), labels.len());
    assert_eq!(split, stratified_split(&labels, 5, 0.2, 42));
}

#[test]
fn test_scaler_fitted_on_train_replays_on_test() {
    let table = flows(40);
    let labels: Vec<usize> = (0..40).map(|i| i % 2).collect();
    let split = stratified_split(&labels, 2, 0.25, 7);

    let mut cleaner = DatasetCleaner::new("label");
    let x_train = cleaner.fit_transform(&table.take_rows(&split.train)).unwrap();
    let x_test = cleaner.transform(&table.take_rows(&split.test)).unwrap();

    let mut scaler = Scaler::new(ScalerType::Standard);
    let train_scaled = scaler.fit_transform(&x_train).unwrap();
    let test_scaled = scaler.transform(&x_test).unwrap();

    let means = train_scaled.mean_axis(Axis(0)).unwrap();
    assert!(means.iter().all(|m| m.abs() < 1e-9));
    assert_eq!(test_scaled.ncols(), train_scaled.ncols());
    assert_eq!(scaler.n_features(), x_train.ncols());
}

#[test]
fn test_selection_keeps_top_k_in_column_order() {
    let n = 60;
    let table = FlowTable::from_columns(vec![
        FlowColumn::numeric("noise_a", (0..n).map(|i| Some(((i * 7) % 11) as f64)).collect()),
        FlowColumn::numeric("signal", (0..n).map(|i| Some((i % 2) as f64 * 10.0 + (i % 3) as f64 * 0.1)).collect()),
        FlowColumn::numeric("noise_b", (0..n).map(|i| Some(((i * 5) % 13) as f64)).collect()),
        FlowColumn::text("label", (0..n).map(|i| Some(["BENIGN", "SYN"][i % 2].to_string())).collect()),
    ])
    .unwrap();
    let y: Vec<usize> = (0..n).map(|i| i % 2).collect();

    let mut cleaner = DatasetCleaner::new("label");
    let x = cleaner.fit_transform(&table).unwrap();
    let mut selector = FeatureSelector::new(SelectionStrategy::FClassif, 1);
    let reduced = selector.fit_transform(&x, &y, 2).unwrap();

    assert_eq!(reduced.ncols(), 1);
    let names = selector.selected_names(&cleaner.feature_columns()).unwrap();
    assert_eq!(names, vec!["signal".to_string()]);
}

#[test]
fn test_feature_matrix_is_deterministic() {
    let df = df!(
        "flow_duration" => &[10.0, 250.0, 31.0, 4000.0, 55.0, 62.0],
        "tot_fwd_pkts" => &[1.0, 3.0, 2.0, 80.0, 4.0, 2.0],
        "service" => &["http", "dns", "http", "ssh", "dns", "http"],
        "label" => &["BENIGN", "SYN", "BENIGN", "SYN", "BENIGN", "SYN"]
    )
    .unwrap();
    let table = FlowTable::from_dataframe(&df).unwrap();

    let first = DatasetCleaner::new("label").fit_transform(&table).unwrap();
    let second = DatasetCleaner::new("label").fit_transform(&table).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.ncols(), 3);
}
