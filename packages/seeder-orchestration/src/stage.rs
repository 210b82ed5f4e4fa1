use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};

/// Pipeline stage identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    /// Stage 1: create orders in the remote order API
    RemoteOrder,
    /// Stage 2: create (or wait for) the downstream database entities
    DownstreamEntity,
    /// Optional stage 3: one grouping record over all stage-2 entities
    Grouping,
}

impl StageId {
    pub const ALL: [StageId; 3] = [
        StageId::RemoteOrder,
        StageId::DownstreamEntity,
        StageId::Grouping,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageId::RemoteOrder => "remote_order",
            StageId::DownstreamEntity => "downstream_entity",
            StageId::Grouping => "grouping",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "remote_order" => Ok(StageId::RemoteOrder),
            "downstream_entity" => Ok(StageId::DownstreamEntity),
            "grouping" => Ok(StageId::Grouping),
            _ => Err(EngineError::parse(format!("Invalid stage ID: {}", s))),
        }
    }

    /// 1-based position in the pipeline, as shown to operators.
    pub fn number(&self) -> u8 {
        match self {
            StageId::RemoteOrder => 1,
            StageId::DownstreamEntity => 2,
            StageId::Grouping => 3,
        }
    }
}

impl std::fmt::Display for StageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_id_roundtrip() {
        for stage in StageId::ALL {
            assert_eq!(StageId::from_str(stage.as_str()).unwrap(), stage);
        }
        assert!(StageId::from_str("L1_IR").is_err());
    }

    #[test]
    fn test_stage_order() {
        assert!(StageId::RemoteOrder < StageId::DownstreamEntity);
        assert_eq!(StageId::Grouping.number(), 3);
    }
}
