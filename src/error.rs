//! Engine error taxonomy.

use crate::graph::PatchError;
use std::fmt;

#[derive(Debug)]
pub enum EngineError {
    /// The output device or context could not be created
    Initialization(String),
    /// The device was suspended and could not be resumed
    Resume(String),
    /// A background asset was missing or undecodable
    AssetLoad { name: String, reason: String },
    /// Graph construction or mutation failed
    Graph(PatchError),
    /// A control value was outside what the tool accepts
    InvalidParameter { name: &'static str, value: String },
    /// Offline rendering or encoding failed
    Export(String),
    /// Engine configuration could not be parsed or is inconsistent
    Config(String),
}

impl EngineError {
    pub fn invalid(name: &'static str, value: impl fmt::Display) -> Self {
        EngineError::InvalidParameter {
            name,
            value: value.to_string(),
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Initialization(msg) => write!(f, "Audio output could not be initialized: {msg}"),
            EngineError::Resume(msg) => write!(f, "Audio output could not be resumed: {msg}"),
            EngineError::AssetLoad { name, reason } => write!(f, "Could not load asset '{name}': {reason}"),
            EngineError::Graph(e) => write!(f, "Graph error: {e}"),
            EngineError::InvalidParameter { name, value } => write!(f, "Invalid value for {name}: {value}"),
            EngineError::Export(msg) => write!(f, "Export failed: {msg}"),
            EngineError::Config(msg) => write!(f, "Invalid configuration: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Graph(e) => Some(e),
            _ => None,
        }
    }
}

impl From<PatchError> for EngineError {
    fn from(e: PatchError) -> Self {
        EngineError::Graph(e)
    }
}

impl From<hound::Error> for EngineError {
    fn from(e: hound::Error) -> Self {
        EngineError::Export(e.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_context() {
        let e = EngineError::AssetLoad {
            name: "rain.wav".into(),
            reason: "not found".into(),
        };
        assert_eq!(e.to_string(), "Could not load asset 'rain.wav': not found");

        let e = EngineError::invalid("volume", 140);
        assert_eq!(e.to_string(), "Invalid value for volume: 140");
    }

    #[test]
    fn test_patch_error_is_source() {
        use std::error::Error;
        let e: EngineError = PatchError::InvalidNode.into();
        assert!(e.source().is_some());
    }
}
