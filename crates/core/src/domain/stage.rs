// Pipeline stages of a single delivery

use serde::{Deserialize, Serialize};

/// Per-worker stage machine:
/// `Idle -> Fetching -> Decoding -> Encoding -> Persisting -> Idle`.
///
/// A failure in any non-idle stage is logged with the stage it happened in and
/// the worker returns to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineStage {
    Idle,
    Fetching,
    Decoding,
    Encoding,
    Persisting,
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineStage::Idle => write!(f, "IDLE"),
            PipelineStage::Fetching => write!(f, "FETCHING"),
            PipelineStage::Decoding => write!(f, "DECODING"),
            PipelineStage::Encoding => write!(f, "ENCODING"),
            PipelineStage::Persisting => write!(f, "PERSISTING"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_matches_serialized_name() {
        for stage in [
            PipelineStage::Idle,
            PipelineStage::Fetching,
            PipelineStage::Decoding,
            PipelineStage::Encoding,
            PipelineStage::Persisting,
        ] {
            let json = serde_json::to_string(&stage).unwrap();
            assert_eq!(json, format!("\"{}\"", stage));
        }
    }
}
