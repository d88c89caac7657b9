//! Data preprocessing module
//!
//! Fitted transforms between the canonical flow table and the learners:
//! - Category encoding, imputation, constant-column removal and outlier
//!   clipping ([`DatasetCleaner`])
//! - Feature scaling (robust, min-max, standard)
//! - Supervised feature selection
//! - Stratified train/test split over row indices
//!
//! Every transform is fitted on training rows only and replays its frozen
//! parameters on test and inference data.

mod cleaner;
mod encoder;
pub mod feature_selection;
mod scaler;
mod split;

pub use cleaner::{is_excluded, ColumnStats, DatasetCleaner, IDENTIFIER_COLUMNS, IQR_FACTOR};
pub use encoder::{CategoryEncoder, UNSEEN_CATEGORY};
pub use feature_selection::{FeatureSelector, SelectionStrategy, RFE_ESTIMATORS};
pub use scaler::{Scaler, ScalerType};
pub use split::{stratified_split, test_count, SplitOutcome};
