//! The resumability checkpoint stored in the cross-reference comment on the target.
//!
//! Wire format: `"{revision}[;{phase}]*"`. Phase names are relation processor names.
//! The format is shared with earlier runs and must stay stable.

use std::{fmt, str::FromStr};

use indexmap::IndexSet;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SyncTokenError {
    #[error("sync token is empty")]
    Empty,
    #[error("invalid revision {raw:?} in sync token")]
    InvalidRevision { raw: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SyncToken {
    pub revision: i64,
    pub completed_phases: IndexSet<String>,
}

impl SyncToken {
    pub fn new(revision: i64) -> Self {
        Self {
            revision,
            completed_phases: IndexSet::new(),
        }
    }

    pub fn with_phases<I, S>(revision: i64, phases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            revision,
            completed_phases: phases.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether every phase in `enabled` was recorded as completed.
    pub fn covers<'a>(&self, enabled: impl IntoIterator<Item = &'a str>) -> bool {
        enabled
            .into_iter()
            .all(|phase| self.completed_phases.contains(phase))
    }

    pub fn clear_phases(&mut self) {
        self.completed_phases.clear();
    }
}

impl FromStr for SyncToken {
    type Err = SyncTokenError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let mut parts = raw.trim().split(';');
        let revision_part = parts
            .next()
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .ok_or(SyncTokenError::Empty)?;
        let revision = revision_part
            .parse::<i64>()
            .map_err(|_| SyncTokenError::InvalidRevision {
                raw: revision_part.to_owned(),
            })?;
        let completed_phases = parts
            .map(str::trim)
            .filter(|phase| !phase.is_empty())
            .map(str::to_owned)
            .collect();
        Ok(Self {
            revision,
            completed_phases,
        })
    }
}

impl fmt::Display for SyncToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.revision)?;
        for phase in &self.completed_phases {
            write!(f, ";{phase}")?;
        }
        Ok(())
    }
}
