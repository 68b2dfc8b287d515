//! Persistence of the final JSON artifact.
//!
//! A thin collaborator over [`Stats::serialize`](crate::stats::Stats): the
//! aggregator produces the serializable form, this module writes it to disk
//! under a timestamped name.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::info;

use crate::stats::FinalReport;

/// File name for a report written now: `loadsmith_results_YYYYMMDD_HHMMSS.json`.
pub fn results_file_name() -> String {
    format!(
        "loadsmith_results_{}.json",
        Local::now().format("%Y%m%d_%H%M%S")
    )
}

/// Write the report into `dir`, returning the path of the file written.
pub fn write_results(report: &FinalReport, dir: &Path) -> io::Result<PathBuf> {
    let path = dir.join(results_file_name());
    let json = serde_json::to_string_pretty(report)?;
    fs::write(&path, json)?;
    info!(path = %path.display(), "Wrote results file");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_results_file_name_shape() {
        let name = results_file_name();
        assert!(name.starts_with("loadsmith_results_"));
        assert!(name.ends_with(".json"));
        // loadsmith_results_ + YYYYMMDD + _ + HHMMSS + .json
        assert_eq!(name.len(), "loadsmith_results_".len() + 8 + 1 + 6 + ".json".len());
    }
}
