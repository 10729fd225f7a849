//! Result files and batch summaries.

use std::fs;
use std::path::{Path, PathBuf};

use admm_core::EvaluationResult;
use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;

/// One row of a batch run.
#[derive(Debug, Clone, Serialize)]
pub struct BatchEntry {
    pub path: PathBuf,
    pub status: String,
    pub combined_score: f64,
    pub iters: usize,
    pub result: Value,
}

impl BatchEntry {
    pub fn new(path: PathBuf, result: &EvaluationResult) -> Self {
        Self {
            path,
            status: result.status().to_string(),
            combined_score: result.combined_score,
            iters: result.metrics.iters,
            result: result.to_json(),
        }
    }
}

/// Best score first; ties broken by fewer iterations, then by path.
pub fn rank(entries: &mut [BatchEntry]) {
    entries.sort_by(|a, b| {
        b.combined_score
            .total_cmp(&a.combined_score)
            .then(a.iters.cmp(&b.iters))
            .then_with(|| a.path.cmp(&b.path))
    });
}

/// `*.rho` files directly inside `dir`, sorted by name.
pub fn candidate_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to read directory {}", dir.display()))? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "rho") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

pub fn print_ranking(entries: &[BatchEntry]) {
    println!("\n{:<4} {:<40} {:<18} {:>8} {:>12}", "#", "Candidate", "Status", "Iters", "Score");
    println!("{:-<86}", "");
    for (i, entry) in entries.iter().enumerate() {
        let name = entry
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        println!(
            "{:<4} {:<40} {:<18} {:>8} {:>12.6}",
            i + 1,
            name,
            entry.status,
            entry.iters,
            entry.combined_score
        );
    }
    println!("{:-<86}", "");
}

pub fn save_json<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, score: f64, iters: usize) -> BatchEntry {
        BatchEntry {
            path: PathBuf::from(name),
            status: "CONVERGED".to_string(),
            combined_score: score,
            iters,
            result: Value::Null,
        }
    }

    #[test]
    fn test_rank_orders_by_score_then_iters() {
        let mut entries = vec![
            entry("b.rho", 0.01, 50),
            entry("a.rho", 0.0, 0),
            entry("c.rho", 0.02, 25),
            entry("d.rho", 0.01, 40),
        ];
        rank(&mut entries);
        let names: Vec<_> = entries.iter().map(|e| e.path.to_string_lossy().into_owned()).collect();
        assert_eq!(names, ["c.rho", "d.rho", "b.rho", "a.rho"]);
    }
}
