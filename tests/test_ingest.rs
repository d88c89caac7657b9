//! Integration test: source discovery, schema reconciliation and sampling

use flowsentry::error::FlowError;
use flowsentry::ingest::{IngestOptions, SourceIngestor, SOURCE_COLUMN};
use flowsentry::schema::{LabelVocabulary, SchemaMap};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn write(dir: &Path, name: &str, contents: &str) {
    fs::write(dir.join(name), contents).unwrap();
}

fn ingestor(cap: usize) -> SourceIngestor {
    let options = IngestOptions { max_samples_per_file: cap, ..Default::default() };
    SourceIngestor::new(SchemaMap::default(), options)
}

#[test]
fn test_headers_reconcile_before_concatenation() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "a.csv", " Flow Packets/s, Flow Duration, Label\n10.5,100,BENIGN\n20.0,200,DDoS\n");
    write(dir.path(), "b.csv", "flow_pkts_s,flow_duration,label\n30.0,300,Syn\n");

    let data = ingestor(1000).load_dir(dir.path()).unwrap();
    let table = &data.table;

    assert_eq!(table.n_rows(), 3);
    assert_eq!(table.numeric_values("flow_pkts_s").unwrap(), vec![10.5, 20.0, 30.0]);
    assert!(!table.contains("flow_packets/s"));
    assert_eq!(data.sources, vec!["a".to_string(), "b".to_string()]);

    let provenance = table.text_values(SOURCE_COLUMN).unwrap();
    assert_eq!(provenance[0].as_deref(), Some("a"));
    assert_eq!(provenance[2].as_deref(), Some("b"));
}

#[test]
fn test_columns_missing_from_one_source_are_filled() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "a.csv", "flow_duration,tot_fwd_pkts,label\n1,2,BENIGN\n");
    write(dir.path(), "b.csv", "flow_duration,label\n5,SYN\n");

    let table = ingestor(1000).load_dir(dir.path()).unwrap().table;
    let column = table.column("tot_fwd_pkts").unwrap();
    assert_eq!(column.values.number_at(0), Some(2.0));
    assert_eq!(column.values.number_at(1), None);
}

#[test]
fn test_alternative_label_column_is_renamed() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "flows.csv", "flow_duration,Attack\n1,normal\n2,syn\n");

    let table = ingestor(1000).load_dir(dir.path()).unwrap().table;
    assert!(table.contains("label"));
    assert!(!table.contains("attack"));
}

#[test]
fn test_unlabelled_source_is_skipped() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "good.csv", "flow_duration,label\n1,BENIGN\n2,SYN\n");
    write(dir.path(), "nolabel.csv", "flow_duration,bytes\n1,2\n");

    let data = ingestor(1000).load_dir(dir.path()).unwrap();
    assert_eq!(data.sources, vec!["good".to_string()]);
    assert_eq!(data.skipped.len(), 1);
    assert!(data.skipped[0].path.ends_with("nolabel.csv"));
}

#[test]
fn test_no_usable_sources() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "nolabel.csv", "flow_duration,bytes\n1,2\n");
    write(dir.path(), "notes.txt", "not a csv\n");

    match ingestor(1000).load_dir(dir.path()) {
        Err(FlowError::NoUsableSources(path)) => assert_eq!(path, dir.path()),
        other => panic!("expected NoUsableSources, got {:?}", other.map(|d| d.sources)),
    }
}

#[test]
fn test_oversized_source_is_sampled_per_class() {
    let dir = TempDir::new().unwrap();
    let mut csv = String::from("flow_duration,label\n");
    for i in 0..100 {
        let label = if i < 80 { "BENIGN" } else { "SYN" };
        csv.push_str(&format!("{},{}\n", i, label));
    }
    write(dir.path(), "big.csv", &csv);

    let table = ingestor(20).load_dir(dir.path()).unwrap().table;
    assert_eq!(table.n_rows(), 20);

    let labels = table.text_values("label").unwrap();
    let syn = labels.iter().filter(|l| l.as_deref() == Some("SYN")).count();
    assert_eq!(syn, 10);

    // surviving rows keep their relative order
    let durations = table.numeric_values("flow_duration").unwrap();
    assert!(durations.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn test_sampling_is_deterministic() {
    let dir = TempDir::new().unwrap();
    let mut csv = String::from("flow_duration,label\n");
    for i in 0..60 {
        csv.push_str(&format!("{},{}\n", i, ["BENIGN", "SYN", "UDP"][i % 3]));
    }
    write(dir.path(), "big.csv", &csv);

    let first = ingestor(15).load_dir(dir.path()).unwrap().table;
    let second = ingestor(15).load_dir(dir.path()).unwrap().table;
    assert_eq!(first.numeric_values("flow_duration"), second.numeric_values("flow_duration"));
}

#[test]
fn test_labels_standardize_to_vocabulary() {
    let vocab = LabelVocabulary::default();
    let raw = vec![Some("normal".to_string()), Some("DDoS".to_string()), Some("ddos".to_string())];
    let standardized = vocab.standardize(&raw);
    assert_eq!(
        standardized,
        vec![Some("BENIGN".to_string()), Some("UDP".to_string()), Some("UDP".to_string())]
    );
}
