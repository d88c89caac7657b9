//! Declarative derivations over canonical flow columns
//!
//! Each [`DerivationRule`] names the columns it needs and a per-row function.
//! A rule fires only when its inputs are present in the table, so the same
//! table of rules replays identically on a full training set or on a single
//! inference row.

use crate::ingest::{FlowColumn, FlowTable};
use tracing::debug;

/// Ports treated as common service ports
pub const COMMON_SERVICE_PORTS: [f64; 10] =
    [80.0, 443.0, 22.0, 21.0, 25.0, 53.0, 110.0, 995.0, 993.0, 143.0];

/// Highest well-known port number
pub const WELL_KNOWN_PORT_MAX: f64 = 1024.0;

/// TCP flag counters considered by the flag rule
pub const FLAG_COLUMNS: [&str; 6] = [
    "fin_flag_cnt",
    "syn_flag_cnt",
    "rst_flag_cnt",
    "psh_flag_cnt",
    "ack_flag_cnt",
    "urg_flag_cnt",
];

/// Input requirement of a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inputs {
    /// Every listed column must be present
    All(&'static [&'static str]),
    /// At least `n` of the listed columns must be present; only those are passed
    AtLeast(usize, &'static [&'static str]),
}

impl Inputs {
    /// Present input columns, or `None` when the requirement is not met
    fn resolve(&self, table: &FlowTable) -> Option<Vec<&'static str>> {
        match *self {
            Inputs::All(cols) => cols.iter().all(|c| table.contains(c)).then(|| cols.to_vec()),
            Inputs::AtLeast(n, cols) => {
                let present: Vec<&'static str> =
                    cols.iter().copied().filter(|c| table.contains(c)).collect();
                (present.len() >= n).then_some(present)
            }
        }
    }
}

/// Per-row derivation: input values (NaN when missing) → output values
pub type DeriveFn = fn(&[f64], &mut [f64]);

/// One declarative feature derivation
#[derive(Debug, Clone, Copy)]
pub struct DerivationRule {
    pub outputs: &'static [&'static str],
    pub inputs: Inputs,
    pub derive: DeriveFn,
}

fn indicator(cond: bool) -> f64 {
    if cond { 1.0 } else { 0.0 }
}

fn fwd_bwd_ratio(v: &[f64], out: &mut [f64]) {
    out[0] = v[0] / (v[1] + 1.0);
}

fn bwd_fwd_ratio(v: &[f64], out: &mut [f64]) {
    out[0] = v[1] / (v[0] + 1.0);
}

fn smoothed_mean_size(v: &[f64], out: &mut [f64]) {
    out[0] = v[0] / (v[1] + 1.0);
}

fn flow_efficiency(v: &[f64], out: &mut [f64]) {
    out[0] = v[0] * v[1];
}

fn flag_summary(v: &[f64], out: &mut [f64]) {
    out[0] = v.iter().filter(|x| !x.is_nan()).sum();
    out[1] = v.iter().filter(|&&x| x > 0.0).count() as f64;
}

fn protocol_one_hot(v: &[f64], out: &mut [f64]) {
    out[0] = indicator(v[0] == 6.0);
    out[1] = indicator(v[0] == 17.0);
    out[2] = indicator(v[0] == 1.0);
}

fn port_indicators(port: f64, out: &mut [f64]) {
    out[0] = indicator(port <= WELL_KNOWN_PORT_MAX);
    out[1] = indicator(COMMON_SERVICE_PORTS.contains(&port));
}

fn src_port_indicators(v: &[f64], out: &mut [f64]) {
    port_indicators(v[0], out);
}

fn dst_port_indicators(v: &[f64], out: &mut [f64]) {
    port_indicators(v[1], out);
}

// Port indicators are derived only when both endpoints are known
const PORT_COLUMNS: [&str; 2] = ["src_port", "dst_port"];

/// Rules applied to canonical flow tables, in order
pub const FLOW_RULES: &[DerivationRule] = &[
    DerivationRule {
        outputs: &["fwd_bwd_ratio"],
        inputs: Inputs::All(&["tot_fwd_pkts", "tot_bwd_pkts"]),
        derive: fwd_bwd_ratio,
    },
    DerivationRule {
        outputs: &["bwd_fwd_ratio"],
        inputs: Inputs::All(&["tot_fwd_pkts", "tot_bwd_pkts"]),
        derive: bwd_fwd_ratio,
    },
    DerivationRule {
        outputs: &["avg_fwd_pkt_size"],
        inputs: Inputs::All(&["totlen_fwd_pkts", "tot_fwd_pkts"]),
        derive: smoothed_mean_size,
    },
    DerivationRule {
        outputs: &["avg_bwd_pkt_size"],
        inputs: Inputs::All(&["totlen_bwd_pkts", "tot_bwd_pkts"]),
        derive: smoothed_mean_size,
    },
    DerivationRule {
        outputs: &["flow_efficiency"],
        inputs: Inputs::All(&["flow_pkts_s", "flow_duration"]),
        derive: flow_efficiency,
    },
    DerivationRule {
        outputs: &["total_flags", "flag_diversity"],
        inputs: Inputs::AtLeast(2, &FLAG_COLUMNS),
        derive: flag_summary,
    },
    DerivationRule {
        outputs: &["is_tcp", "is_udp", "is_icmp"],
        inputs: Inputs::All(&["protocol"]),
        derive: protocol_one_hot,
    },
    DerivationRule {
        outputs: &["src_is_wellknown", "src_is_common"],
        inputs: Inputs::All(&PORT_COLUMNS),
        derive: src_port_indicators,
    },
    DerivationRule {
        outputs: &["dst_is_wellknown", "dst_is_common"],
        inputs: Inputs::All(&PORT_COLUMNS),
        derive: dst_port_indicators,
    },
];

/// Applies a table of derivation rules
#[derive(Debug, Clone, Copy)]
pub struct FeatureEngineer {
    rules: &'static [DerivationRule],
}

impl Default for FeatureEngineer {
    fn default() -> Self {
        Self::new()
    }
}

impl FeatureEngineer {
    pub fn new() -> Self {
        Self { rules: FLOW_RULES }
    }

    /// Use a custom rule table
    pub fn with_rules(rules: &'static [DerivationRule]) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[DerivationRule] {
        self.rules
    }

    /// Output columns the rules would add to `table`
    pub fn planned_outputs(&self, table: &FlowTable) -> Vec<&'static str> {
        self.rules
            .iter()
            .filter(|r| r.inputs.resolve(table).is_some())
            .flat_map(|r| r.outputs.iter().copied())
            .filter(|o| !table.contains(o))
            .collect()
    }

    /// Add every derivable column. Existing columns are never overwritten.
    pub fn engineer(&self, table: FlowTable) -> FlowTable {
        let mut table = table;
        let n_rows = table.n_rows();
        let mut added = 0usize;

        for rule in self.rules {
            let Some(inputs) = rule.inputs.resolve(&table) else {
                continue;
            };
            if rule.outputs.iter().all(|o| table.contains(o)) {
                continue;
            }

            let input_values: Vec<Vec<f64>> = inputs
                .iter()
                .map(|c| table.numeric_values(c).unwrap_or_else(|| vec![f64::NAN; n_rows]))
                .collect();

            let mut outputs = vec![Vec::with_capacity(n_rows); rule.outputs.len()];
            let mut row_in = vec![0.0; inputs.len()];
            let mut row_out = vec![0.0; rule.outputs.len()];
            for i in 0..n_rows {
                for (slot, col) in row_in.iter_mut().zip(&input_values) {
                    *slot = col[i];
                }
                (rule.derive)(&row_in, &mut row_out);
                for (col, &v) in outputs.iter_mut().zip(&row_out) {
                    col.push((!v.is_nan()).then_some(v));
                }
            }

            for (name, values) in rule.outputs.iter().zip(outputs) {
                if table.contains(name) {
                    continue;
                }
                // lengths match by construction and the name is fresh
                if table.push_column(FlowColumn::numeric(*name, values)).is_ok() {
                    added += 1;
                }
            }
        }

        debug!(added, "engineered features");
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(cols: Vec<(&str, Vec<f64>)>) -> FlowTable {
        FlowTable::from_columns(
            cols.into_iter()
                .map(|(n, v)| FlowColumn::numeric(n, v.into_iter().map(Some).collect()))
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_ratio_smoothing() {
        let t = table(vec![("tot_fwd_pkts", vec![4.0, 0.0]), ("tot_bwd_pkts", vec![1.0, 0.0])]);
        let out = FeatureEngineer::new().engineer(t);
        assert_eq!(out.numeric_values("fwd_bwd_ratio").unwrap(), vec![2.0, 0.0]);
        assert_eq!(out.numeric_values("bwd_fwd_ratio").unwrap(), vec![0.2, 0.0]);
    }

    #[test]
    fn test_missing_inputs_skip_rule() {
        let t = table(vec![("tot_fwd_pkts", vec![1.0])]);
        let out = FeatureEngineer::new().engineer(t);
        assert_eq!(out.column_names(), vec!["tot_fwd_pkts"]);
    }

    #[test]
    fn test_flags_need_two_columns() {
        let one = table(vec![("syn_flag_cnt", vec![1.0])]);
        assert!(!FeatureEngineer::new().engineer(one).contains("total_flags"));

        let two = table(vec![("syn_flag_cnt", vec![1.0, 0.0]), ("ack_flag_cnt", vec![2.0, 0.0])]);
        let out = FeatureEngineer::new().engineer(two);
        assert_eq!(out.numeric_values("total_flags").unwrap(), vec![3.0, 0.0]);
        assert_eq!(out.numeric_values("flag_diversity").unwrap(), vec![2.0, 0.0]);
    }

    #[test]
    fn test_protocol_and_ports() {
        let t = table(vec![
            ("protocol", vec![6.0, 17.0, 1.0]),
            ("src_port", vec![51000.0, 22.0, 2000.0]),
            ("dst_port", vec![443.0, 8080.0, 53.0]),
        ]);
        let out = FeatureEngineer::new().engineer(t);
        assert_eq!(out.numeric_values("is_tcp").unwrap(), vec![1.0, 0.0, 0.0]);
        assert_eq!(out.numeric_values("is_udp").unwrap(), vec![0.0, 1.0, 0.0]);
        assert_eq!(out.numeric_values("is_icmp").unwrap(), vec![0.0, 0.0, 1.0]);
        assert_eq!(out.numeric_values("dst_is_wellknown").unwrap(), vec![1.0, 0.0, 1.0]);
        assert_eq!(out.numeric_values("dst_is_common").unwrap(), vec![1.0, 0.0, 1.0]);
        assert_eq!(out.numeric_values("src_is_wellknown").unwrap(), vec![0.0, 1.0, 0.0]);
        assert_eq!(out.numeric_values("src_is_common").unwrap(), vec![0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_port_indicators_need_both_ports() {
        for name in PORT_COLUMNS {
            let out = FeatureEngineer::new().engineer(table(vec![(name, vec![80.0, 40000.0])]));
            for indicator in ["src_is_wellknown", "src_is_common", "dst_is_wellknown", "dst_is_common"] {
                assert!(!out.contains(indicator), "{indicator} derived from {name} alone");
            }
        }
    }

    #[test]
    fn test_single_row_replay_matches_batch() {
        let batch = table(vec![
            ("tot_fwd_pkts", vec![3.0, 10.0]),
            ("tot_bwd_pkts", vec![2.0, 0.0]),
            ("flow_pkts_s", vec![0.5, 7.0]),
            ("flow_duration", vec![100.0, 3.0]),
        ]);
        let engineer = FeatureEngineer::new();
        let full = engineer.engineer(batch.clone());
        let row = engineer.engineer(batch.take_rows(&[1]));
        for name in full.column_names() {
            let a = full.numeric_values(&name).unwrap()[1];
            let b = row.numeric_values(&name).unwrap()[0];
            assert_eq!(a.to_bits(), b.to_bits(), "column {name}");
        }
    }

    #[test]
    fn test_existing_output_not_recomputed() {
        let t = table(vec![("protocol", vec![6.0]), ("is_tcp", vec![0.0])]);
        let out = FeatureEngineer::new().engineer(t);
        assert_eq!(out.numeric_values("is_tcp").unwrap(), vec![0.0]);
        assert_eq!(out.numeric_values("is_udp").unwrap(), vec![0.0]);
    }
}
