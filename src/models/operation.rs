use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical operations carried through the emission queues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Submit a document for authorization
    Emit,
    /// Ask the authority for the current status of a document
    Query,
    /// Register a document event (e.g. correction letter)
    Event,
    /// Cancel an authorized document
    Void,
}

impl Operation {
    pub const ALL: [Operation; 4] = [
        Operation::Emit,
        Operation::Query,
        Operation::Event,
        Operation::Void,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Emit => "emit",
            Self::Query => "query",
            Self::Event => "event",
            Self::Void => "void",
        }
    }

    /// Whether the operation creates the document record (as opposed to
    /// appending a sub-record to an existing one)
    pub fn is_emission(&self) -> bool {
        matches!(self, Self::Emit)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "emit" => Ok(Self::Emit),
            "query" => Ok(Self::Query),
            "event" => Ok(Self::Event),
            "void" => Ok(Self::Void),
            _ => Err(format!("Invalid operation: {s}")),
        }
    }
}

/// Priority tier controlling routing, concurrency and TTL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Normal,
    Low,
}

impl Priority {
    /// All tiers, highest first
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Normal, Priority::Low];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
        }
    }

    /// Scheduling rank; larger is served first
    pub fn rank(&self) -> u8 {
        match self {
            Self::High => 3,
            Self::Normal => 2,
            Self::Low => 1,
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::Normal
    }
}

impl PartialOrd for Priority {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Priority {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "high" => Ok(Self::High),
            "normal" => Ok(Self::Normal),
            "low" => Ok(Self::Low),
            _ => Err(format!("Invalid priority: {s}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);

        let mut tiers = vec![Priority::Low, Priority::High, Priority::Normal];
        tiers.sort_by(|a, b| b.cmp(a));
        assert_eq!(tiers, Priority::ALL.to_vec());
    }

    #[test]
    fn test_operation_string_conversion() {
        assert_eq!(Operation::Void.to_string(), "void");
        assert_eq!("event".parse::<Operation>().unwrap(), Operation::Event);
        assert!("refund".parse::<Operation>().is_err());

        let json = serde_json::to_string(&Priority::Low).unwrap();
        assert_eq!(json, "\"low\"");
    }
}
