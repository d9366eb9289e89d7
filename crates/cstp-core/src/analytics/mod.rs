// crates/cstp-core/src/analytics/mod.rs
// ============================================================================
// Module: Decision Analytics
// Description: Calibration, drift, reason-type, and ready-queue analytics.
// Purpose: Side-effect-free aggregations over the reviewed decision corpus.
// Dependencies: crate::core
// ============================================================================

//! ## Overview
//! All analytics read the same reviewed-decision set with the shared filter
//! taxonomy and are side-effect-free. Engines take the current moment as a
//! parameter so tests can pin time.

/// Confidence-versus-outcome statistics.
pub mod calibration;
/// Recent-versus-historical drift detection.
pub mod drift;
/// Ready-queue work discovery.
pub mod ready;
/// Per-reason-type calibration and diversity.
pub mod reason_stats;

pub use calibration::CalibrationStats;
pub use calibration::calculate_calibration;
pub use calibration::calibration_buckets;
pub use drift::DriftReport;
pub use drift::DriftRequest;
pub use drift::check_drift;
pub use ready::ReadyRequest;
pub use ready::ReadyResponse;
pub use ready::ready_actions;
pub use reason_stats::ReasonStatsReport;
pub use reason_stats::reason_stats;
