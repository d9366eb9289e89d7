// crates/cstp-core/src/core/mod.rs
// ============================================================================
// Module: CSTP Core Data Model
// Description: Identifiers, enumerations, decision records, and time helpers.
// Purpose: Group the persistent data model under one namespace.
// Dependencies: serde, time
// ============================================================================

//! ## Overview
//! The core data model: strongly typed identifiers, closed vocabularies,
//! the decision record with its owned sub-entities, and wall-clock helpers.

/// Decision records and owned sub-entities.
pub mod decision;
/// Closed domain vocabularies.
pub mod enums;
/// Strongly typed identifiers.
pub mod identifiers;
/// Timestamp parsing, formatting, and age arithmetic.
pub mod time;

pub use decision::BridgeDefinition;
pub use decision::BridgeMethod;
pub use decision::DecisionRecord;
pub use decision::Deliberation;
pub use decision::DeliberationInput;
pub use decision::DeliberationStep;
pub use decision::PreDecisionProtocol;
pub use decision::Reason;
pub use decision::RelatedDecision;
pub use enums::BridgeSide;
pub use enums::Category;
pub use enums::CompactionLevel;
pub use enums::DecisionStatus;
pub use enums::Direction;
pub use enums::EdgeType;
pub use enums::GuardrailAction;
pub use enums::MentalState;
pub use enums::Outcome;
pub use enums::Priority;
pub use enums::ReasonType;
pub use enums::RetrievalMode;
pub use enums::Stakes;
pub use identifiers::AgentId;
pub use identifiers::DecisionId;
pub use identifiers::TrackerKey;
