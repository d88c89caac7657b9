//! Label vocabulary and standardization

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Raw (normalized) token → canonical label
const COLLAPSE_TABLE: &[(&str, &str)] = &[
    ("BENIGN", "BENIGN"),
    ("NORMAL", "BENIGN"),
    ("DNS", "DNS"),
    ("NTP", "NTP"),
    ("HTTP", "HTTP"),
    ("LDAP", "LDAP"),
    ("MSSQL", "MSSQL"),
    ("NETBIOS", "NetBIOS"),
    ("NETBIOS_NAME_SERVICE", "NetBIOS"),
    ("PORTMAP", "Portmap"),
    ("RECURSIVE_GET", "RECURSIVE_GET"),
    ("SLOWLORIS", "SLOWLORIS"),
    ("SLOW_POST", "SLOW_POST"),
    ("SYN", "SYN"),
    ("UDP", "UDP"),
    ("UDPLAG", "UDPLag"),
    ("DDOS", "UDP"),
    ("ATTACK", "UDP"),
    ("FLOOD", "UDP"),
];

/// Trim, upper-case and underscore internal whitespace runs
pub fn normalize_token(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .to_uppercase()
}

/// Closed label vocabulary with a many-to-one collapsing table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelVocabulary {
    table: BTreeMap<String, String>,
}

impl Default for LabelVocabulary {
    fn default() -> Self {
        Self {
            table: COLLAPSE_TABLE
                .iter()
                .map(|(raw, canonical)| (raw.to_string(), canonical.to_string()))
                .collect(),
        }
    }
}

impl LabelVocabulary {
    /// Canonical members of the vocabulary
    pub fn members(&self) -> BTreeSet<&str> {
        self.table.values().map(String::as_str).collect()
    }

    /// True when `label` is a canonical member
    pub fn contains(&self, label: &str) -> bool {
        self.table.values().any(|v| v == label)
    }

    /// Standardize one token. `None` for blank tokens.
    ///
    /// Unmapped tokens pass through in normalized form. Canonical members
    /// normalize back onto table keys, so the mapping is idempotent.
    pub fn standardize_one(&self, raw: &str) -> Option<String> {
        let token = normalize_token(raw);
        if token.is_empty() {
            return None;
        }
        Some(self.table.get(&token).cloned().unwrap_or(token))
    }

    /// Standardize a label vector
    pub fn standardize(&self, labels: &[Option<String>]) -> Vec<Option<String>> {
        labels
            .iter()
            .map(|l| l.as_deref().and_then(|s| self.standardize_one(s)))
            .collect()
    }

    /// Distinct standardized labels that are not vocabulary members
    pub fn pass_through<'a>(&self, labels: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        let unknown: BTreeSet<String> = labels
            .into_iter()
            .filter(|l| !self.contains(l))
            .map(str::to_string)
            .collect();
        unknown.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owned(labels: &[&str]) -> Vec<Option<String>> {
        labels.iter().map(|s| Some(s.to_string())).collect()
    }

    #[test]
    fn test_collapsing_table() {
        let vocab = LabelVocabulary::default();
        let out = vocab.standardize(&owned(&["normal", "DDoS", "ddos"]));
        assert_eq!(out, owned(&["BENIGN", "UDP", "UDP"]));
    }

    #[test]
    fn test_mixed_case_members() {
        let vocab = LabelVocabulary::default();
        assert_eq!(vocab.standardize_one(" netbios name service ").as_deref(), Some("NetBIOS"));
        assert_eq!(vocab.standardize_one("UdpLag").as_deref(), Some("UDPLag"));
        assert_eq!(vocab.standardize_one("portmap").as_deref(), Some("Portmap"));
    }

    #[test]
    fn test_pass_through_is_normalized() {
        let vocab = LabelVocabulary::default();
        assert_eq!(vocab.standardize_one(" DrDoS_SNMP ").as_deref(), Some("DRDOS_SNMP"));
        assert_eq!(vocab.standardize_one("   "), None);
    }

    #[test]
    fn test_idempotent() {
        let vocab = LabelVocabulary::default();
        for raw in [
            "normal", "BENIGN", "NetBIOS", "netbios_name_service", "UDPLag", "Portmap",
            "flood", "Web Attack", "drdos_ntp", "Syn",
        ] {
            let once = vocab.standardize_one(raw).unwrap();
            let twice = vocab.standardize_one(&once).unwrap();
            assert_eq!(once, twice, "standardize not idempotent for {raw}");
        }
    }

    #[test]
    fn test_pass_through_listing() {
        let vocab = LabelVocabulary::default();
        let unknown = vocab.pass_through(["BENIGN", "DRDOS_SNMP", "UDP", "DRDOS_SNMP"]);
        assert_eq!(unknown, vec!["DRDOS_SNMP".to_string()]);
    }
}
