//! Target list file reader.
//!
//! The file holds one URL per line. Blank lines are ignored and surrounding
//! whitespace is trimmed. The file is read fresh on every cycle so edits take
//! effect without a restart.

use std::io;
use std::path::Path;
use tracing::{debug, error};

/// Read targets from `path`, in file order
pub async fn read_targets(path: &Path) -> io::Result<Vec<String>> {
    let content = tokio::fs::read_to_string(path).await?;
    Ok(parse_targets(&content))
}

/// Read targets, treating an unreadable file as an empty list
pub async fn load_targets(path: &Path) -> Vec<String> {
    match read_targets(path).await {
        Ok(targets) => {
            debug!("Loaded {} targets from {}", targets.len(), path.display());
            targets
        }
        Err(e) => {
            error!("Error reading {}: {}", path.display(), e);
            Vec::new()
        }
    }
}

fn parse_targets(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
