//! Change extraction from version-control history
//!
//! Wraps git subprocess calls with an explicit timeout. Unavailability of the
//! tool is a typed soft failure: callers degrade to an empty change set
//! rather than aborting the pipeline. A nonzero git exit (no history, not a
//! repository) yields an empty list, matching the "no changes" contract.

use std::collections::BTreeSet;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Default ceiling for one git invocation
const DEFAULT_VCS_TIMEOUT: Duration = Duration::from_secs(10);

/// Soft failures from the version-control layer
#[derive(Error, Debug)]
pub enum VcsError {
    #[error("version control tool unavailable: {0}")]
    ToolUnavailable(String),

    #[error("version control invocation exceeded {0:?}")]
    Timeout(Duration),
}

/// One contiguous change region within a file diff
#[derive(Debug, Clone)]
pub struct Hunk {
    /// Old-range spec from the hunk header, e.g. `-12,3`
    pub old_range: String,
    /// New-range spec from the hunk header, e.g. `+12,4`
    pub new_range: String,
    pub changes: Vec<LineChange>,
}

/// A single added or removed line inside a hunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineChange {
    Added(String),
    Removed(String),
}

/// Per-file diff statistics
#[derive(Debug, Clone)]
pub struct FileDiff {
    pub file_path: String,
    pub lines_added: u64,
    pub lines_removed: u64,
    /// Overlap of additions and removals, treated as in-place edits
    pub lines_modified: u64,
    pub hunks: Vec<Hunk>,
}

/// Extracts changed files and diff statistics from a git repository
#[derive(Debug, Clone)]
pub struct DiffExtractor {
    repo_path: PathBuf,
    timeout: Duration,
}

impl DiffExtractor {
    pub fn new(repo_path: impl Into<PathBuf>) -> Self {
        Self {
            repo_path: repo_path.into(),
            timeout: DEFAULT_VCS_TIMEOUT,
        }
    }

    /// Override the per-invocation timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Whether the working directory is inside a git repository
    pub fn is_repo(&self) -> bool {
        matches!(self.run_git(&["rev-parse", "--git-dir"]), Ok(Some(_)))
    }

    /// Source files changed between two revisions, in diff order
    ///
    /// Returns an empty list (not an error) when the repository has no
    /// history for the requested range.
    pub fn changed_files(&self, base: &str, head: &str) -> Result<Vec<String>, VcsError> {
        let output = self.run_git(&["diff", "--name-only", base, head])?;
        Ok(match output {
            Some(stdout) => source_files(&stdout),
            None => Vec::new(),
        })
    }

    /// Modified tracked files plus untracked files, filtered to source files
    pub fn uncommitted_changes(&self) -> Result<Vec<String>, VcsError> {
        let mut files = Vec::new();

        if let Some(stdout) = self.run_git(&["diff", "--name-only", "HEAD"])? {
            files.extend(source_files(&stdout));
        }
        if let Some(stdout) = self.run_git(&["ls-files", "--others", "--exclude-standard"])? {
            files.extend(source_files(&stdout));
        }

        Ok(files)
    }

    /// Diff statistics for one file between two revisions
    pub fn diff_stats(
        &self,
        file_path: &str,
        base: &str,
        head: &str,
    ) -> Result<Option<FileDiff>, VcsError> {
        let output = self.run_git(&["diff", "--unified=0", base, head, "--", file_path])?;
        Ok(output.map(|stdout| parse_diff(file_path, &stdout)))
    }

    /// Change magnitude in [0, 1]: total changed lines capped at 100
    pub fn change_magnitude(&self, file_path: &str) -> f64 {
        match self.diff_stats(file_path, "HEAD~1", "HEAD") {
            Ok(Some(diff)) => {
                let total = diff.lines_added + diff.lines_removed;
                (total as f64 / 100.0).min(1.0)
            }
            Ok(None) => 0.0,
            Err(e) => {
                tracing::debug!(file = file_path, error = %e, "change magnitude unavailable");
                0.0
            }
        }
    }

    /// Line numbers touched in the new revision, derived from hunk new-ranges
    pub fn changed_line_numbers(&self, file_path: &str) -> BTreeSet<u64> {
        let diff = match self.diff_stats(file_path, "HEAD~1", "HEAD") {
            Ok(Some(diff)) => diff,
            Ok(None) => return BTreeSet::new(),
            Err(e) => {
                tracing::debug!(file = file_path, error = %e, "changed lines unavailable");
                return BTreeSet::new();
            }
        };

        let mut lines = BTreeSet::new();
        for hunk in &diff.hunks {
            if let Some((start, count)) = parse_range(&hunk.new_range) {
                lines.extend(start..start + count);
            }
        }
        lines
    }

    /// Run git with a hard deadline, returning stdout on success
    ///
    /// `Ok(None)` means git ran but exited nonzero (e.g. no history).
    fn run_git(&self, args: &[&str]) -> Result<Option<String>, VcsError> {
        let mut child = Command::new("git")
            .args(args)
            .current_dir(&self.repo_path)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| VcsError::ToolUnavailable(e.to_string()))?;

        // Drain stdout on a separate thread so a large diff cannot fill the
        // pipe and wedge the child past the deadline.
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| VcsError::ToolUnavailable("stdout not captured".to_string()))?;
        let reader = std::thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = stdout.read_to_end(&mut buf);
            buf
        });

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {
                    if Instant::now() >= deadline {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(VcsError::Timeout(self.timeout));
                    }
                    std::thread::sleep(Duration::from_millis(10));
                }
                Err(e) => return Err(VcsError::ToolUnavailable(e.to_string())),
            }
        };

        let stdout = reader.join().unwrap_or_default();
        if status.success() {
            Ok(Some(String::from_utf8_lossy(&stdout).into_owned()))
        } else {
            tracing::debug!(?args, code = ?status.code(), "git exited nonzero");
            Ok(None)
        }
    }
}

/// Filter command output lines down to source files
fn source_files(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && line.ends_with(".py"))
        .map(String::from)
        .collect()
}

/// Parse `git diff --unified=0` output into per-file statistics
pub fn parse_diff(file_path: &str, diff_output: &str) -> FileDiff {
    let mut lines_added = 0u64;
    let mut lines_removed = 0u64;
    let mut hunks: Vec<Hunk> = Vec::new();
    let mut current: Option<Hunk> = None;

    for line in diff_output.lines() {
        if line.starts_with("@@") {
            if let Some(hunk) = current.take() {
                hunks.push(hunk);
            }
            // Header shape: @@ -old_start,old_count +new_start,new_count @@
            let spec = line.split("@@").nth(1).unwrap_or("").trim();
            let mut parts = spec.split_whitespace();
            current = Some(Hunk {
                old_range: parts.next().unwrap_or("").to_string(),
                new_range: parts.next().unwrap_or("").to_string(),
                changes: Vec::new(),
            });
        } else if line.starts_with('+') && !line.starts_with("+++") {
            lines_added += 1;
            if let Some(hunk) = current.as_mut() {
                hunk.changes.push(LineChange::Added(line[1..].to_string()));
            }
        } else if line.starts_with('-') && !line.starts_with("---") {
            lines_removed += 1;
            if let Some(hunk) = current.as_mut() {
                hunk.changes.push(LineChange::Removed(line[1..].to_string()));
            }
        }
    }
    if let Some(hunk) = current {
        hunks.push(hunk);
    }

    FileDiff {
        file_path: file_path.to_string(),
        lines_added,
        lines_removed,
        lines_modified: lines_added.min(lines_removed),
        hunks,
    }
}

/// Parse a hunk range spec like `+12,3` or `+12` into (start, count)
fn parse_range(range: &str) -> Option<(u64, u64)> {
    let spec = range.strip_prefix('+')?;
    let mut parts = spec.split(',');
    let start: u64 = parts.next()?.parse().ok()?;
    let count: u64 = match parts.next() {
        Some(count) => count.parse().ok()?,
        None => 1,
    };
    Some((start, count))
}

/// Degrade a soft VCS failure to an empty change set, logging the cause
pub fn degrade_to_empty(result: Result<Vec<String>, VcsError>) -> Vec<String> {
    match result {
        Ok(files) => files,
        Err(e) => {
            tracing::warn!(error = %e, "version control unavailable, treating as no changes");
            Vec::new()
        }
    }
}
