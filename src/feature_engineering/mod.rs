//! Feature engineering over canonical flow tables

mod flow_features;

pub use flow_features::{
    DerivationRule, DeriveFn, FeatureEngineer, Inputs, COMMON_SERVICE_PORTS, FLAG_COLUMNS,
    FLOW_RULES, WELL_KNOWN_PORT_MAX,
};
