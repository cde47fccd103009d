//! Per-loop annotations attached to loop header blocks.
use dass_utils::Id;
use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// A pending request to search for the interchange depth of a loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterchangeRequest {
    /// Search for the largest legal depth.
    Auto,
    /// Verify exactly this depth.
    Depth(u32),
}

impl Display for InterchangeRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InterchangeRequest::Auto => write!(f, "auto"),
            InterchangeRequest::Depth(d) => write!(f, "{d}"),
        }
    }
}

/// Metadata of the loop headed by the block that carries it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopMetadata {
    /// User visible loop name.
    pub name: Option<Id>,
    pub interchange_check: Option<InterchangeRequest>,
    /// Committed interchange depth.
    pub interchange: Option<u32>,
    /// The loop still needs a throughput check before it can be made
    /// static.
    pub cdfg_check: bool,
}

impl LoopMetadata {
    pub fn named<S: Into<Id>>(name: S) -> Self {
        LoopMetadata {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    /// Replace a pending check request with the committed `depth`. Committing
    /// the same depth again leaves the metadata unchanged.
    pub fn commit_interchange(&mut self, depth: u32) {
        self.interchange_check = None;
        self.interchange = Some(depth);
    }

    pub fn is_empty(&self) -> bool {
        *self == LoopMetadata::default()
    }
}

impl Display for LoopMetadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut parts = vec![];
        if let Some(name) = self.name {
            parts.push(format!("name=\"{name}\""));
        }
        if let Some(req) = self.interchange_check {
            parts.push(format!("interchange.check={req}"));
        }
        if let Some(depth) = self.interchange {
            parts.push(format!("interchange={depth}"));
        }
        if self.cdfg_check {
            parts.push("cdfg_check".to_string());
        }
        write!(f, "!{{{}}}", parts.join(", "))
    }
}
