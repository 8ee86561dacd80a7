/// Per-cycle interpretation for the pollen monitoring service.
///
/// This module turns one verbatim upstream snapshot into annotated
/// observations: allergen labels resolved to canonical identities, severity
/// codes and risk values mapped onto named levels, forecast sequences built.
/// Identity assignment and lifecycle decisions are left to `reconcile`.
///
/// Submodules:
/// - `observations`: snapshot → ordered list of `Observation`s.

pub mod observations;

pub use observations::{InterpretedSnapshot, Interpreter, Observation};
