//! Report Module
//!
//! End-of-sweep tally and the summary report printed by the binary.

use crate::result_log::{RunRecord, RunStatus, SweepArtifacts};
use shared_utils::format_duration;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct SweepSummary {
    pub total: usize,
    pub counts: HashMap<RunStatus, usize>,
    /// `(label, error)` for every failed item, in sweep order
    pub errors: Vec<(String, String)>,
    pub duration: Duration,
}

impl SweepSummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, record: &RunRecord) {
        self.total += 1;
        *self.counts.entry(record.status).or_insert(0) += 1;
        if !record.status.is_success() {
            let label = format!("[{:04}] {} @ {}", record.index, record.file, record.param);
            let error = record
                .error
                .clone()
                .unwrap_or_else(|| record.status.as_str().to_string());
            self.errors.push((label, error));
        }
    }

    pub fn count(&self, status: RunStatus) -> usize {
        self.counts.get(&status).copied().unwrap_or(0)
    }

    pub fn succeeded(&self) -> usize {
        self.count(RunStatus::Success)
    }

    pub fn failed(&self) -> usize {
        self.total - self.succeeded()
    }

    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            (self.succeeded() as f64 / self.total as f64) * 100.0
        }
    }
}

pub fn print_summary_report(summary: &SweepSummary, artifacts: &SweepArtifacts) {
    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                 📊 Threshold Sweep Summary                   ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  🎬 Work items:           {:>10}                         ║", summary.total);
    println!("║  ✅ Succeeded:            {:>10}                         ║", summary.succeeded());
    for status in RunStatus::ALL.iter().filter(|s| !s.is_success()) {
        let count = summary.count(*status);
        if count > 0 {
            println!("║  ❌ {:<22}{:>10}                         ║", status.as_str(), count);
        }
    }
    println!("║  📈 Success rate:         {:>9.1}%                         ║", summary.success_rate());
    println!("║  ⏱️  Total time:           {:>10}                         ║", format_duration(summary.duration));
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!("📝 Text log:  {}", artifacts.text_log.display());
    println!("📦 JSON:      {}", artifacts.json.display());

    if !summary.errors.is_empty() {
        println!();
        println!("❌ Failed items:");
        println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        for (label, error) in &summary.errors {
            println!("   {} → {}", label, error.lines().next().unwrap_or_default());
        }
    }
}
