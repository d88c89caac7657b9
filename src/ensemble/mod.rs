//! Ensemble methods module
//!
//! Soft voting over already-fitted candidate models.

mod voting;

pub use voting::SoftVotingEnsemble;
