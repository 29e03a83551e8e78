//! Source readiness state

use serde::Serialize;

/// Readiness of the source attached to a path
///
/// Transitions are driven by protocol handlers and static source workers;
/// the path only stores and reports the value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SourceState {
    /// No usable source
    #[default]
    NotReady,
    /// A source is attached or connecting but not delivering media yet
    Creating,
    /// The source is delivering media
    Ready,
}
