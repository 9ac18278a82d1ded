//! Compiler output parsing
//!
//! Recognizes rustc, gcc/clang-style, MSBuild and Python traceback diagnostics.
//! Output order is discovery order; exact duplicates (MSBuild repeats its errors in
//! the summary) are dropped after their first occurrence.

use kiln_core::{Diagnostic, Severity};
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

struct Patterns {
    rustc_header: Regex,
    rustc_location: Regex,
    gcc: Regex,
    msbuild: Regex,
    python_location: Regex,
    python_error: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        rustc_header: Regex::new(r"^(error|warning)(?:\[([A-Z]\d+)\])?: (.+)$")
            .expect("valid regex"),
        rustc_location: Regex::new(r"^\s*--> (.+?):(\d+):(\d+)\s*$").expect("valid regex"),
        gcc: Regex::new(r"^(.+?):(\d+):(\d+): (fatal error|error|warning|note): (.+)$")
            .expect("valid regex"),
        msbuild: Regex::new(
            r"^\s*(.+?)\((\d+),(\d+)\): (error|warning) ([A-Z]+\d+): (.+?)(?: \[[^\]]+\])?\s*$",
        )
        .expect("valid regex"),
        python_location: Regex::new(r#"^\s*File "(.+?)", line (\d+)"#).expect("valid regex"),
        python_error: Regex::new(r"^(\w*(?:Error|Exception)): (.+)$").expect("valid regex"),
    })
}

/// Parse build output into diagnostics, making paths relative to `root`
pub fn parse_diagnostics(output: &str, root: &Path) -> Vec<Diagnostic> {
    let p = patterns();
    let mut diagnostics: Vec<Diagnostic> = Vec::new();

    // rustc prints the message first and the location on a following line
    let mut pending_rustc: Option<(Severity, Option<String>, String)> = None;
    let mut pending_python: Option<(String, usize)> = None;

    for line in output.lines() {
        if let Some(caps) = p.rustc_header.captures(line) {
            let severity = caps[1].parse().unwrap_or(Severity::Error);
            pending_rustc = Some((
                severity,
                caps.get(2).map(|m| m.as_str().to_string()),
                caps[3].to_string(),
            ));
            continue;
        }

        if let Some(caps) = p.rustc_location.captures(line) {
            if let Some((severity, code, message)) = pending_rustc.take() {
                let diag = Diagnostic {
                    file: relative_path(&caps[1], root),
                    line: caps[2].parse().unwrap_or(0),
                    column: caps[3].parse().unwrap_or(0),
                    severity,
                    code,
                    message,
                };
                push_unique(&mut diagnostics, diag);
            }
            continue;
        }

        if let Some(caps) = p.msbuild.captures(line) {
            let diag = Diagnostic {
                file: relative_path(&caps[1], root),
                line: caps[2].parse().unwrap_or(0),
                column: caps[3].parse().unwrap_or(0),
                severity: caps[4].parse().unwrap_or(Severity::Error),
                code: Some(caps[5].to_string()),
                message: caps[6].to_string(),
            };
            push_unique(&mut diagnostics, diag);
            continue;
        }

        if let Some(caps) = p.gcc.captures(line) {
            let diag = Diagnostic {
                file: relative_path(&caps[1], root),
                line: caps[2].parse().unwrap_or(0),
                column: caps[3].parse().unwrap_or(0),
                severity: caps[4].parse().unwrap_or(Severity::Error),
                code: None,
                message: caps[5].to_string(),
            };
            push_unique(&mut diagnostics, diag);
            continue;
        }

        if let Some(caps) = p.python_location.captures(line) {
            pending_python = Some((caps[1].to_string(), caps[2].parse().unwrap_or(0)));
            continue;
        }

        if let Some(caps) = p.python_error.captures(line) {
            if let Some((file, line_no)) = pending_python.take() {
                let diag = Diagnostic {
                    file: relative_path(&file, root),
                    line: line_no,
                    column: 0,
                    severity: Severity::Error,
                    code: Some(caps[1].to_string()),
                    message: caps[2].to_string(),
                };
                push_unique(&mut diagnostics, diag);
            }
        }
    }

    diagnostics
}

fn push_unique(diagnostics: &mut Vec<Diagnostic>, diag: Diagnostic) {
    if !diagnostics.contains(&diag) {
        diagnostics.push(diag);
    }
}

fn relative_path(raw: &str, root: &Path) -> String {
    let raw = raw.trim();
    let path = Path::new(raw);
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative.to_string_lossy().replace('\\', "/")
}
