//! Column-name reconciliation across heterogeneous flow exports

use crate::ingest::FlowTable;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, warn};

/// Canonical name of the label column produced by the label-token rule
pub const LABEL_COLUMN: &str = "label";

/// Raw export names (CIC-family) and their canonical feature names
const STATIC_TABLE: &[(&str, &str)] = &[
    ("Flow Duration", "flow_duration"),
    ("Flow Bytes/s", "flow_byts_s"),
    ("Flow Packets/s", "flow_pkts_s"),
    ("Fwd Packets/s", "fwd_pkts_s"),
    ("Bwd Packets/s", "bwd_pkts_s"),
    ("Total Fwd Packets", "tot_fwd_pkts"),
    ("Total Backward Packets", "tot_bwd_pkts"),
    ("Total Length of Fwd Packets", "totlen_fwd_pkts"),
    ("Total Length of Bwd Packets", "totlen_bwd_pkts"),
    ("Fwd Packet Length Max", "fwd_pkt_len_max"),
    ("Fwd Packet Length Min", "fwd_pkt_len_min"),
    ("Fwd Packet Length Mean", "fwd_pkt_len_mean"),
    ("Fwd Packet Length Std", "fwd_pkt_len_std"),
    ("Bwd Packet Length Max", "bwd_pkt_len_max"),
    ("Bwd Packet Length Min", "bwd_pkt_len_min"),
    ("Bwd Packet Length Mean", "bwd_pkt_len_mean"),
    ("Bwd Packet Length Std", "bwd_pkt_len_std"),
    ("Packet Length Max", "pkt_len_max"),
    ("Packet Length Min", "pkt_len_min"),
    ("Packet Length Mean", "pkt_len_mean"),
    ("Packet Length Std", "pkt_len_std"),
    ("Packet Length Variance", "pkt_len_var"),
    ("Flow IAT Mean", "flow_iat_mean"),
    ("Flow IAT Std", "flow_iat_std"),
    ("Flow IAT Max", "flow_iat_max"),
    ("Flow IAT Min", "flow_iat_min"),
    ("Fwd IAT Total", "fwd_iat_tot"),
    ("Fwd IAT Mean", "fwd_iat_mean"),
    ("Fwd IAT Std", "fwd_iat_std"),
    ("Fwd IAT Max", "fwd_iat_max"),
    ("Fwd IAT Min", "fwd_iat_min"),
    ("Bwd IAT Total", "bwd_iat_tot"),
    ("Bwd IAT Mean", "bwd_iat_mean"),
    ("Bwd IAT Std", "bwd_iat_std"),
    ("Bwd IAT Max", "bwd_iat_max"),
    ("Bwd IAT Min", "bwd_iat_min"),
    ("FIN Flag Count", "fin_flag_cnt"),
    ("SYN Flag Count", "syn_flag_cnt"),
    ("RST Flag Count", "rst_flag_cnt"),
    ("PSH Flag Count", "psh_flag_cnt"),
    ("ACK Flag Count", "ack_flag_cnt"),
    ("URG Flag Count", "urg_flag_cnt"),
    ("CWE Flag Count", "cwe_flag_cnt"),
    ("ECE Flag Count", "ece_flag_cnt"),
    ("Down/Up Ratio", "down_up_ratio"),
    ("Average Packet Size", "pkt_size_avg"),
    ("Avg Fwd Segment Size", "fwd_seg_size_avg"),
    ("Avg Bwd Segment Size", "bwd_seg_size_avg"),
    ("Init_Win_bytes_forward", "init_fwd_win_byts"),
    ("Init_Win_bytes_backward", "init_bwd_win_byts"),
    ("act_data_pkt_fwd", "fwd_act_data_pkts"),
    ("min_seg_size_forward", "fwd_seg_size_min"),
    ("Active Mean", "active_mean"),
    ("Active Std", "active_std"),
    ("Active Max", "active_max"),
    ("Active Min", "active_min"),
    ("Idle Mean", "idle_mean"),
    ("Idle Std", "idle_std"),
    ("Idle Max", "idle_max"),
    ("Idle Min", "idle_min"),
    ("Source IP", "src_ip"),
    ("Destination IP", "dst_ip"),
    ("Source Port", "src_port"),
    ("Destination Port", "dst_port"),
    ("Protocol", "protocol"),
    ("Timestamp", "timestamp"),
    ("Label", "label"),
];

/// How a raw column name was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    /// Found in the static table
    Direct,
    /// Matched an ordered substring rule
    Pattern,
    /// Whole-name label token (`class`, `attack`, `type`)
    LabelToken,
    /// No rule applied; the normalized name is kept
    PassThrough,
}

/// Substring rule: every fragment must occur in the normalized name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternRule {
    pub fragments: Vec<String>,
    pub canonical: String,
}

impl PatternRule {
    fn new(fragments: &[&str], canonical: &str) -> Self {
        Self {
            fragments: fragments.iter().map(|f| f.to_string()).collect(),
            canonical: canonical.to_string(),
        }
    }

    fn matches(&self, name: &str) -> bool {
        self.fragments.iter().all(|f| name.contains(f.as_str()))
    }
}

/// Trim, replace spaces with underscores and lower-case a raw column name
pub fn normalize_name(raw: &str) -> String {
    raw.trim().replace(' ', "_").to_lowercase()
}

/// Ordered raw-name → canonical-name mapping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaMap {
    direct: BTreeMap<String, String>,
    patterns: Vec<PatternRule>,
    label_tokens: Vec<String>,
}

impl Default for SchemaMap {
    fn default() -> Self {
        let mut direct = BTreeMap::new();
        for (raw, canonical) in STATIC_TABLE {
            direct.insert(normalize_name(raw), canonical.to_string());
            // canonical names resolve to themselves
            direct.insert(canonical.to_string(), canonical.to_string());
        }

        Self {
            direct,
            patterns: vec![
                PatternRule::new(&["source", "ip"], "src_ip"),
                PatternRule::new(&["destination", "ip"], "dst_ip"),
                PatternRule::new(&["source", "port"], "src_port"),
                PatternRule::new(&["destination", "port"], "dst_port"),
            ],
            label_tokens: vec!["class".into(), "attack".into(), "type".into()],
        }
    }
}

impl SchemaMap {
    /// Add or override a direct mapping
    pub fn with_mapping(mut self, raw: &str, canonical: &str) -> Self {
        self.direct.insert(normalize_name(raw), canonical.to_string());
        self
    }

    /// Resolve one raw column name
    pub fn resolve(&self, raw: &str) -> (String, Resolution) {
        let name = normalize_name(raw);

        if let Some(canonical) = self.direct.get(&name) {
            return (canonical.clone(), Resolution::Direct);
        }
        if let Some(rule) = self.patterns.iter().find(|r| r.matches(&name)) {
            return (rule.canonical.clone(), Resolution::Pattern);
        }
        if self.label_tokens.iter().any(|t| *t == name) {
            return (LABEL_COLUMN.to_string(), Resolution::LabelToken);
        }
        (name, Resolution::PassThrough)
    }

    /// Canonical name for a raw column name
    pub fn canonical_name(&self, raw: &str) -> String {
        self.resolve(raw).0
    }

    /// Rename every column of `table` to its canonical name.
    ///
    /// When several raw columns collapse onto one canonical name the first
    /// keeps it and the rest are dropped.
    pub fn normalize(&self, table: FlowTable) -> FlowTable {
        let n_rows = table.n_rows();
        let mut taken = HashSet::new();
        let mut columns = Vec::with_capacity(table.n_cols());

        for mut column in table.into_columns() {
            let (canonical, resolution) = self.resolve(&column.name);
            if resolution == Resolution::PassThrough {
                debug!(column = %column.name, "unmapped column passed through");
            }
            if !taken.insert(canonical.clone()) {
                warn!(column = %column.name, canonical = %canonical, "duplicate canonical column dropped");
                continue;
            }
            column.name = canonical;
            columns.push(column);
        }

        FlowTable::from_parts(columns, n_rows)
    }

    /// Raw names in `names` that no rule maps
    pub fn unmapped<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        names
            .into_iter()
            .filter(|n| self.resolve(n).1 == Resolution::PassThrough)
            .map(normalize_name)
            .collect()
    }

    /// Number of direct entries
    pub fn len(&self) -> usize {
        self.direct.len()
    }

    pub fn is_empty(&self) -> bool {
        self.direct.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::FlowColumn;

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name(" Flow Packets/s "), "flow_packets/s");
        assert_eq!(normalize_name("Label"), "label");
    }

    #[test]
    fn test_static_table_resolves_raw_and_canonical() {
        let map = SchemaMap::default();
        assert_eq!(map.canonical_name("Flow Packets/s"), "flow_pkts_s");
        assert_eq!(map.canonical_name("flow_pkts_s"), "flow_pkts_s");
        assert_eq!(map.canonical_name(" Total Fwd Packets"), "tot_fwd_pkts");
        assert_eq!(map.canonical_name("CWE Flag Count"), "cwe_flag_cnt");
    }

    #[test]
    fn test_pattern_rules_in_order() {
        let map = SchemaMap::default();
        assert_eq!(map.resolve("Src IP Source_IP_Addr"), ("src_ip".to_string(), Resolution::Pattern));
        assert_eq!(map.canonical_name("destination_ip_address"), "dst_ip");
        assert_eq!(map.canonical_name("source port number"), "src_port");
        assert_eq!(map.canonical_name("DestinationPort"), "dst_port");
    }

    #[test]
    fn test_label_tokens_match_whole_name() {
        let map = SchemaMap::default();
        assert_eq!(map.resolve("Class").0, "label");
        assert_eq!(map.resolve("attack").1, Resolution::LabelToken);
        assert_eq!(map.resolve("service_type"), ("service_type".to_string(), Resolution::PassThrough));
    }

    #[test]
    fn test_resolution_is_stable() {
        let map = SchemaMap::default();
        for raw in ["Flow Packets/s", "Weird Column", "Source IP", "type"] {
            let once = map.canonical_name(raw);
            assert_eq!(map.canonical_name(&once), once);
        }
    }

    #[test]
    fn test_unknown_columns_map_to_themselves() {
        let map = SchemaMap::default();
        assert_eq!(map.canonical_name("my_feature"), "my_feature");
        assert_eq!(map.unmapped(["my_feature", "Label"]), vec!["my_feature".to_string()]);
    }

    #[test]
    fn test_normalize_table_drops_duplicates() {
        let table = FlowTable::from_columns(vec![
            FlowColumn::numeric("Flow Packets/s", vec![Some(1.0)]),
            FlowColumn::numeric("flow_pkts_s", vec![Some(2.0)]),
            FlowColumn::text(" Label", vec![Some("BENIGN".into())]),
        ])
        .unwrap();

        let out = SchemaMap::default().normalize(table);
        assert_eq!(out.column_names(), vec!["flow_pkts_s", "label"]);
        assert_eq!(out.numeric_values("flow_pkts_s").unwrap(), vec![1.0]);
    }
}
