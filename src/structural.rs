//! Structural snapshot of one Python source file
//!
//! Line-based scan extracting functions, classes, import targets, and a
//! cyclomatic-complexity estimate: 1 per element, +1 per branch, loop, or
//! exception handler, +1 per boolean connective, +1 per comprehension.
//!
//! `compare` flags an element as modified when its line-span length changed.
//! This is a deliberate precision limitation (a same-size edit goes
//! undetected), not semantic diffing.

use std::collections::BTreeSet;
use std::path::Path;

/// Kind of a top-level or nested code element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Function,
    Class,
}

/// One extracted function or class
#[derive(Debug, Clone)]
pub struct CodeElement {
    pub name: String,
    pub kind: ElementKind,
    /// 1-based first line of the element
    pub line_start: usize,
    /// 1-based last line of the element body
    pub line_end: usize,
    pub complexity: u32,
}

impl CodeElement {
    /// Number of lines spanned by the element
    pub fn span(&self) -> usize {
        self.line_end.saturating_sub(self.line_start)
    }
}

/// Structural snapshot for one source file at one revision
#[derive(Debug, Clone)]
pub struct FileSnapshot {
    pub file_path: String,
    pub functions: Vec<CodeElement>,
    pub classes: Vec<CodeElement>,
    pub imports: BTreeSet<String>,
    pub total_lines: usize,
    pub complexity_score: u32,
}

/// Outcome of analyzing a source file
///
/// A closed set handled exhaustively at call sites: a parse failure is logged
/// and degrades the caller, it never propagates as a fatal error.
#[derive(Debug)]
pub enum ParseResult {
    Parsed(Box<FileSnapshot>),
    /// File exists but could not be read or decoded
    Unreadable(String),
    Missing,
}

impl ParseResult {
    /// The snapshot, if parsing succeeded
    pub fn snapshot(self) -> Option<FileSnapshot> {
        match self {
            Self::Parsed(snapshot) => Some(*snapshot),
            Self::Unreadable(_) | Self::Missing => None,
        }
    }
}

/// Structural diff between two snapshots of the same file
#[derive(Debug, Clone, Default)]
pub struct StructuralDiff {
    pub file_path: String,
    pub functions_added: Vec<String>,
    pub functions_removed: Vec<String>,
    pub functions_modified: Vec<String>,
    pub classes_added: Vec<String>,
    pub classes_removed: Vec<String>,
    pub classes_modified: Vec<String>,
    pub imports_added: Vec<String>,
    pub imports_removed: Vec<String>,
    /// Absolute difference in total line count
    pub lines_changed: usize,
    pub complexity_delta: i64,
}

impl StructuralDiff {
    /// Names of every added, removed, or modified function and class
    pub fn changed_elements(&self) -> BTreeSet<String> {
        let mut changed = BTreeSet::new();
        for group in [
            &self.functions_added,
            &self.functions_removed,
            &self.functions_modified,
            &self.classes_added,
            &self.classes_removed,
            &self.classes_modified,
        ] {
            changed.extend(group.iter().cloned());
        }
        changed
    }
}

/// Analyzes Python source structure without executing it
#[derive(Debug, Default)]
pub struct StructuralAnalyzer;

impl StructuralAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Analyze a source file into a snapshot
    pub fn analyze(&self, path: &Path) -> ParseResult {
        if !path.exists() {
            return ParseResult::Missing;
        }

        match std::fs::read_to_string(path) {
            Ok(source) => ParseResult::Parsed(Box::new(self.analyze_source(
                &path.to_string_lossy(),
                &source,
            ))),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to read source file");
                ParseResult::Unreadable(e.to_string())
            }
        }
    }

    /// Analyze source text directly
    pub fn analyze_source(&self, file_path: &str, source: &str) -> FileSnapshot {
        let lines: Vec<&str> = source.lines().collect();
        let mut functions = Vec::new();
        let mut classes = Vec::new();
        let mut imports = BTreeSet::new();

        for (i, line) in lines.iter().enumerate() {
            let code = strip_comment(line);
            let trimmed = code.trim_start();

            if let Some(name) = def_name(trimmed) {
                let line_end = element_end(&lines, i, indent_of(code));
                let complexity = complexity_of(&lines[i..line_end]);
                functions.push(CodeElement {
                    name,
                    kind: ElementKind::Function,
                    line_start: i + 1,
                    line_end,
                    complexity,
                });
            } else if let Some(name) = class_name(trimmed) {
                let line_end = element_end(&lines, i, indent_of(code));
                let complexity = complexity_of(&lines[i..line_end]);
                classes.push(CodeElement {
                    name,
                    kind: ElementKind::Class,
                    line_start: i + 1,
                    line_end,
                    complexity,
                });
            } else {
                extract_imports(trimmed, &mut imports);
            }
        }

        let complexity_score = functions.iter().map(|f| f.complexity).sum::<u32>()
            + classes.iter().map(|c| c.complexity).sum::<u32>();

        FileSnapshot {
            file_path: file_path.to_string(),
            total_lines: lines.len(),
            functions,
            classes,
            imports,
            complexity_score,
        }
    }

    /// Compare two snapshots of the same file
    pub fn compare(&self, old: &FileSnapshot, new: &FileSnapshot) -> StructuralDiff {
        let (functions_added, functions_removed, functions_modified) =
            diff_elements(&old.functions, &new.functions);
        let (classes_added, classes_removed, classes_modified) =
            diff_elements(&old.classes, &new.classes);

        StructuralDiff {
            file_path: new.file_path.clone(),
            functions_added,
            functions_removed,
            functions_modified,
            classes_added,
            classes_removed,
            classes_modified,
            imports_added: new.imports.difference(&old.imports).cloned().collect(),
            imports_removed: old.imports.difference(&new.imports).cloned().collect(),
            lines_changed: new.total_lines.abs_diff(old.total_lines),
            complexity_delta: i64::from(new.complexity_score) - i64::from(old.complexity_score),
        }
    }
}

/// Compare element lists by name; modified iff the span length changed
fn diff_elements(
    old: &[CodeElement],
    new: &[CodeElement],
) -> (Vec<String>, Vec<String>, Vec<String>) {
    use std::collections::BTreeMap;

    let old_by_name: BTreeMap<&str, &CodeElement> =
        old.iter().map(|e| (e.name.as_str(), e)).collect();
    let new_by_name: BTreeMap<&str, &CodeElement> =
        new.iter().map(|e| (e.name.as_str(), e)).collect();

    let added = new_by_name
        .keys()
        .filter(|name| !old_by_name.contains_key(**name))
        .map(|s| (*s).to_string())
        .collect();
    let removed = old_by_name
        .keys()
        .filter(|name| !new_by_name.contains_key(**name))
        .map(|s| (*s).to_string())
        .collect();
    let modified = old_by_name
        .iter()
        .filter_map(|(name, old_elem)| {
            new_by_name
                .get(name)
                .filter(|new_elem| new_elem.span() != old_elem.span())
                .map(|_| (*name).to_string())
        })
        .collect();

    (added, removed, modified)
}

fn indent_of(line: &str) -> usize {
    line.chars().take_while(|c| *c == ' ' || *c == '\t').count()
}

/// Strip a trailing `#` comment; naive about `#` inside string literals
fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(pos) => &line[..pos],
        None => line,
    }
}

/// Function name if the line opens a `def` / `async def`
fn def_name(trimmed: &str) -> Option<String> {
    let rest = trimmed
        .strip_prefix("async def ")
        .or_else(|| trimmed.strip_prefix("def "))?;
    let name: String = rest
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_')
        .collect();
    (!name.is_empty()).then_some(name)
}

/// Class name if the line opens a `class`
fn class_name(trimmed: &str) -> Option<String> {
    let rest = trimmed.strip_prefix("class ")?;
    let name: String = rest
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_')
        .collect();
    (!name.is_empty()).then_some(name)
}

/// 1-based exclusive end line of the element starting at `start`
///
/// The body is every following line indented deeper than the header,
/// blank lines included while the block continues.
fn element_end(lines: &[&str], start: usize, header_indent: usize) -> usize {
    let mut end = start + 1;
    for (j, line) in lines.iter().enumerate().skip(start + 1) {
        if line.trim().is_empty() {
            continue;
        }
        if indent_of(line) > header_indent {
            end = j + 1;
        } else {
            break;
        }
    }
    end
}

/// Cyclomatic complexity estimate for a block of lines
fn complexity_of(lines: &[&str]) -> u32 {
    let mut complexity = 1u32;

    for line in lines {
        let code = strip_comment(line);
        let trimmed = code.trim_start();

        for keyword in ["if", "elif", "while", "for", "except"] {
            if starts_with_keyword(trimmed, keyword) {
                complexity += 1;
            }
        }

        // Each boolean connective contributes one path
        complexity += count_occurrences(trimmed, " and ") + count_occurrences(trimmed, " or ");

        // Comprehensions: `for` appearing mid-line rather than as a statement
        complexity += count_occurrences(trimmed, " for ");
    }

    complexity
}

fn starts_with_keyword(trimmed: &str, keyword: &str) -> bool {
    match trimmed.strip_prefix(keyword) {
        Some(rest) => rest
            .chars()
            .next()
            .is_none_or(|c| c == ' ' || c == '(' || c == ':'),
        None => false,
    }
}

fn count_occurrences(haystack: &str, needle: &str) -> u32 {
    haystack.matches(needle).count() as u32
}

/// Parse `import` / `from ... import ...` targets out of one line
fn extract_imports(trimmed: &str, imports: &mut BTreeSet<String>) {
    if let Some(rest) = trimmed.strip_prefix("import ") {
        for part in rest.split(',') {
            let target = part.trim().split(" as ").next().unwrap_or("").trim();
            if !target.is_empty() {
                imports.insert(target.to_string());
            }
        }
    } else if let Some(rest) = trimmed.strip_prefix("from ") {
        if let Some((module, names)) = rest.split_once(" import ") {
            let module = module.trim().trim_start_matches('.');
            for part in names.split(',') {
                let name = part.trim().split(" as ").next().unwrap_or("").trim();
                if name.is_empty() {
                    continue;
                }
                if module.is_empty() {
                    imports.insert(name.to_string());
                } else {
                    imports.insert(format!("{module}.{name}"));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
import os
from auth import login, logout

def validate(value):
    if value and value > 0:
        return True
    return False

class Session:
    def start(self):
        for attempt in range(3):
            try:
                self.connect()
            except ConnectionError:
                continue
        return [x for x in self.events if x]
";

    #[test]
    fn test_analyze_source_elements() {
        let analyzer = StructuralAnalyzer::new();
        let snapshot = analyzer.analyze_source("sample.py", SAMPLE);

        let names: Vec<&str> = snapshot.functions.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["validate", "start"]);
        assert_eq!(snapshot.classes.len(), 1);
        assert_eq!(snapshot.classes[0].name, "Session");
    }

    #[test]
    fn test_analyze_source_imports() {
        let analyzer = StructuralAnalyzer::new();
        let snapshot = analyzer.analyze_source("sample.py", SAMPLE);

        assert!(snapshot.imports.contains("os"));
        assert!(snapshot.imports.contains("auth.login"));
        assert!(snapshot.imports.contains("auth.logout"));
    }

    #[test]
    fn test_import_aliases() {
        let analyzer = StructuralAnalyzer::new();
        let snapshot =
            analyzer.analyze_source("x.py", "import numpy as np, json\nfrom db import conn as c\n");

        assert!(snapshot.imports.contains("numpy"));
        assert!(snapshot.imports.contains("json"));
        assert!(snapshot.imports.contains("db.conn"));
    }

    #[test]
    fn test_complexity_counts_branches() {
        let analyzer = StructuralAnalyzer::new();
        let snapshot = analyzer.analyze_source("sample.py", SAMPLE);

        // validate: base 1 + if + `and` connective
        let validate = &snapshot.functions[0];
        assert_eq!(validate.complexity, 3);

        // start: base 1 + for + except + comprehension `for`
        let start = &snapshot.functions[1];
        assert_eq!(start.complexity, 4);
    }

    #[test]
    fn test_class_complexity_includes_methods() {
        let analyzer = StructuralAnalyzer::new();
        let snapshot = analyzer.analyze_source("sample.py", SAMPLE);

        // Session spans the whole start() body
        assert!(snapshot.classes[0].complexity >= snapshot.functions[1].complexity);
        assert_eq!(
            snapshot.complexity_score,
            snapshot.functions.iter().map(|f| f.complexity).sum::<u32>()
                + snapshot.classes[0].complexity
        );
    }

    #[test]
    fn test_element_spans() {
        let analyzer = StructuralAnalyzer::new();
        let snapshot = analyzer.analyze_source("sample.py", SAMPLE);

        let validate = &snapshot.functions[0];
        assert_eq!(validate.line_start, 4);
        assert_eq!(validate.line_end, 7);
    }

    #[test]
    fn test_missing_file() {
        let analyzer = StructuralAnalyzer::new();
        assert!(matches!(
            analyzer.analyze(Path::new("/nonexistent/file.py")),
            ParseResult::Missing
        ));
    }

    #[test]
    fn test_compare_added_removed() {
        let analyzer = StructuralAnalyzer::new();
        let old = analyzer.analyze_source("x.py", "def a():\n    pass\n");
        let new = analyzer.analyze_source("x.py", "def b():\n    pass\n");

        let diff = analyzer.compare(&old, &new);
        assert_eq!(diff.functions_added, vec!["b"]);
        assert_eq!(diff.functions_removed, vec!["a"]);
        assert!(diff.functions_modified.is_empty());
    }

    #[test]
    fn test_compare_modified_by_span() {
        let analyzer = StructuralAnalyzer::new();
        let old = analyzer.analyze_source("x.py", "def a():\n    pass\n");
        let new = analyzer.analyze_source("x.py", "def a():\n    x = 1\n    return x\n");

        let diff = analyzer.compare(&old, &new);
        assert_eq!(diff.functions_modified, vec!["a"]);
        assert_eq!(diff.lines_changed, 1);
    }

    #[test]
    fn test_compare_same_span_not_modified() {
        // Same line count means the heuristic cannot see the edit
        let analyzer = StructuralAnalyzer::new();
        let old = analyzer.analyze_source("x.py", "def a():\n    return 1\n");
        let new = analyzer.analyze_source("x.py", "def a():\n    return 2\n");

        let diff = analyzer.compare(&old, &new);
        assert!(diff.functions_modified.is_empty());
    }

    #[test]
    fn test_compare_imports() {
        let analyzer = StructuralAnalyzer::new();
        let old = analyzer.analyze_source("x.py", "import os\n");
        let new = analyzer.analyze_source("x.py", "import sys\n");

        let diff = analyzer.compare(&old, &new);
        assert_eq!(diff.imports_added, vec!["sys"]);
        assert_eq!(diff.imports_removed, vec!["os"]);
    }

    #[test]
    fn test_changed_elements_union() {
        let diff = StructuralDiff {
            functions_added: vec!["a".into()],
            functions_modified: vec!["b".into()],
            classes_removed: vec!["C".into()],
            ..Default::default()
        };
        let changed = diff.changed_elements();
        assert_eq!(changed.len(), 3);
        assert!(changed.contains("a") && changed.contains("b") && changed.contains("C"));
    }

    #[test]
    fn test_comments_ignored() {
        let analyzer = StructuralAnalyzer::new();
        let snapshot = analyzer.analyze_source("x.py", "# def fake():\ndef real():\n    pass\n");
        assert_eq!(snapshot.functions.len(), 1);
        assert_eq!(snapshot.functions[0].name, "real");
    }
}
