//! Projection data sources.
//!
//! The odds engine only reads weekly team data; where it comes from is
//! behind the `ProjectionSource` trait. `JsonProjectionSource` reads one
//! file per week from a directory, which is what the binary uses.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::types::{BookError, MatchupInput};

/// Read-only supplier of weekly matchups and team scoring data.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProjectionSource: Send + Sync {
    /// All matchups scheduled for `week`, with both teams' inputs.
    async fn matchups(&self, week: u32) -> Result<Vec<MatchupInput>, BookError>;
}

/// Loads `week_<n>.json` (a JSON array of matchups) from a directory.
pub struct JsonProjectionSource {
    dir: PathBuf,
}

impl JsonProjectionSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for_week(&self, week: u32) -> PathBuf {
        self.dir.join(format!("week_{week}.json"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl ProjectionSource for JsonProjectionSource {
    async fn matchups(&self, week: u32) -> Result<Vec<MatchupInput>, BookError> {
        let path = self.path_for_week(week);
        let json = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| BookError::Source(format!("failed to read {}: {e}", path.display())))?;
        let matchups: Vec<MatchupInput> = serde_json::from_str(&json)
            .map_err(|e| BookError::Source(format!("failed to parse {}: {e}", path.display())))?;

        debug!(path = %path.display(), week, count = matchups.len(), "Loaded projections");
        Ok(matchups)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
