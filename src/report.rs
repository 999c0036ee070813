//! Markdown report rendering
//!
//! Thin output shim over a ranked priority list: summary counts plus a
//! top-20 table.

use crate::prioritize::TestPriority;
use std::path::Path;

/// Rows shown in the ranked table
const TOP_N: usize = 20;

/// Render the selection report as Markdown
pub fn render(priorities: &[TestPriority]) -> String {
    let high = priorities.iter().filter(|p| p.priority_score > 0.7).count();
    let medium = priorities
        .iter()
        .filter(|p| (0.3..=0.7).contains(&p.priority_score))
        .count();
    let low = priorities.iter().filter(|p| p.priority_score < 0.3).count();

    let mut out = String::new();
    out.push_str("# Test Selection Report\n\n");
    out.push_str("## Summary\n\n");
    out.push_str(&format!("- Total tests analyzed: {}\n", priorities.len()));
    out.push_str(&format!("- High priority tests: {high}\n"));
    out.push_str(&format!("- Medium priority tests: {medium}\n"));
    out.push_str(&format!("- Low priority tests: {low}\n\n"));

    out.push_str(&format!("## Top {TOP_N} Priority Tests\n\n"));
    out.push_str("| Rank | Test Name | Priority | Failure Prob | Reason |\n");
    out.push_str("|------|-----------|----------|--------------|--------|\n");

    for (rank, p) in priorities.iter().take(TOP_N).enumerate() {
        out.push_str(&format!(
            "| {} | `{}` | {:.3} | {:.3} | {} |\n",
            rank + 1,
            p.test_name,
            p.priority_score,
            p.failure_probability,
            p.reason
        ));
    }

    out
}

/// Write the report to a file
pub fn write_report(priorities: &[TestPriority], output: &Path) -> std::io::Result<()> {
    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(output, render(priorities))?;
    tracing::info!(path = %output.display(), "report written");
    Ok(())
}
