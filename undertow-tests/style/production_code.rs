//! Production code enforcement
//!
//! Library and binary sources must not silence dead-code warnings or unwrap.
//! Everything from the first `#[cfg(test)]` or `#[cfg(all(test, ..))]` of a
//! file onwards is test code, as are the shared test data modules.

use std::fs;
use std::path::{Path, PathBuf};

const TEST_ONLY_FILES: &[&str] = &["test_data.rs", "test_fixtures.rs"];

const FORBIDDEN: &[(&str, &str)] = &[
    ("allow(dead_code)", "dead code allowance"),
    (".unwrap()", "unwrap in production code"),
    (".expect(", "expect in production code"),
];

#[derive(Debug)]
struct Violation {
    path: PathBuf,
    line: usize,
    rule: &'static str,
    text: String,
}

fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(".."))
}

fn source_dirs() -> Vec<PathBuf> {
    let root = workspace_root();
    ["undertow-core", "undertow-web", "undertow-supervisor", "undertow-cli"]
        .iter()
        .map(|krate| root.join(krate).join("src"))
        .collect()
}

fn collect_rust_files(dir: &Path, files: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_rust_files(&path, files);
        } else if path.extension().is_some_and(|ext| ext == "rs") {
            files.push(path);
        }
    }
}

fn is_test_only(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| TEST_ONLY_FILES.contains(&name))
}

fn check_source(path: &Path, content: &str) -> Vec<Violation> {
    let mut violations = Vec::new();
    for (index, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.starts_with("#[cfg(test)]") || trimmed.starts_with("#[cfg(all(test,") {
            break;
        }
        if trimmed.starts_with("//") {
            continue;
        }
        for (pattern, rule) in FORBIDDEN {
            if trimmed.contains(pattern) {
                violations.push(Violation {
                    path: path.to_path_buf(),
                    line: index + 1,
                    rule,
                    text: trimmed.to_string(),
                });
            }
        }
    }
    violations
}

#[test]
fn test_production_code_has_no_forbidden_patterns() {
    let mut files = Vec::new();
    for dir in source_dirs() {
        collect_rust_files(&dir, &mut files);
    }
    assert!(!files.is_empty(), "no sources found under {}", workspace_root().display());

    let violations: Vec<Violation> = files
        .iter()
        .filter(|path| !is_test_only(path))
        .flat_map(|path| {
            let content = fs::read_to_string(path).unwrap();
            check_source(path, &content)
        })
        .collect();

    for violation in &violations {
        eprintln!(
            "{}:{}: {} - {}",
            violation.path.display(),
            violation.line,
            violation.rule,
            violation.text
        );
    }
    assert!(violations.is_empty(), "{} style violations", violations.len());
}

#[test]
fn test_checker_stops_at_test_module() {
    let source = "fn a() -> u8 { 1 }\n#[cfg(test)]\nmod tests { fn b() { Some(1).unwrap(); } }\n";
    assert!(check_source(Path::new("a.rs"), source).is_empty());

    let bad = "#[allow(dead_code)]\nfn a() { Some(1).unwrap(); }\n";
    let found = check_source(Path::new("b.rs"), bad);
    assert_eq!(found.len(), 2);
    assert_eq!(found[1].line, 2);
}
