//! Channel sharing mode preference.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// How connections should be mapped onto broker instances.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModePreference {
    /// Share one broker when the transport multiplexes connections.
    #[default]
    Auto,
    /// Always share one broker across connections.
    Shared,
    /// Give every connection a private broker.
    Isolated,
}

impl ModePreference {
    /// Lowercase name as used in settings and on the command line.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Shared => "shared",
            Self::Isolated => "isolated",
        }
    }
}

impl fmt::Display for ModePreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModePreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "shared" => Ok(Self::Shared),
            "isolated" => Ok(Self::Isolated),
            other => Err(format!("unknown mode '{other}' (expected auto, shared or isolated)")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_auto() {
        assert_eq!(ModePreference::default(), ModePreference::Auto);
    }

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!("Shared".parse::<ModePreference>().unwrap(), ModePreference::Shared);
        assert_eq!("ISOLATED".parse::<ModePreference>().unwrap(), ModePreference::Isolated);
    }

    #[test]
    fn parse_rejects_unknown() {
        let err = "dedicated".parse::<ModePreference>().unwrap_err();
        assert!(err.contains("dedicated"));
    }

    #[test]
    fn serde_lowercase() {
        let json = serde_json::to_string(&ModePreference::Isolated).unwrap();
        assert_eq!(json, "\"isolated\"");
    }
}
