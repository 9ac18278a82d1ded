//! Prompt builders for planning, diagnosis and chat

use kiln_core::{Diagnostic, ModificationMode};

/// Lines of context shown on each side of a diagnosed line
const FIX_CONTEXT_LINES: usize = 8;

/// Maximum project files listed in a planning prompt
const MAX_LISTED_FILES: usize = 200;

pub const PLAN_SYSTEM_PROMPT: &str = "You are a careful software engineer editing a project \
on disk. Answer only with change blocks. Never touch files outside the project.";

pub const FIX_LINE_SYSTEM_PROMPT: &str = "You repair compiler errors one line at a time. \
Answer with exactly one <fix> block containing the corrected line.";

pub const FIX_FILE_SYSTEM_PROMPT: &str = "You repair compiler errors one diagnostic at a time. \
Answer with exactly one <fix> block containing the complete corrected file.";

/// System prompt matching what [`build_fix_prompt`] asks for in `mode`
pub fn fix_system_prompt(mode: ModificationMode) -> &'static str {
    match mode {
        ModificationMode::Replace => FIX_FILE_SYSTEM_PROMPT,
        ModificationMode::Splice => FIX_LINE_SYSTEM_PROMPT,
    }
}

pub const CHAT_SYSTEM_PROMPT: &str = "You are a helpful assistant for a software project. \
Answer in plain prose.";

/// Prompt asking the model to turn a request into change blocks
pub fn build_plan_prompt(request: &str, files: &[String], mode: ModificationMode) -> String {
    let mut prompt = String::new();

    prompt.push_str("## Request\n\n");
    prompt.push_str(request.trim());
    prompt.push_str("\n\n");

    if !files.is_empty() {
        prompt.push_str("## Project Files\n\n");
        for file in files.iter().take(MAX_LISTED_FILES) {
            prompt.push_str("- ");
            prompt.push_str(file);
            prompt.push('\n');
        }
        if files.len() > MAX_LISTED_FILES {
            prompt.push_str(&format!(
                "- ... and {} more\n",
                files.len() - MAX_LISTED_FILES
            ));
        }
        prompt.push('\n');
    }

    prompt.push_str(
        r#"## Output Format

Emit one block per edit, in the order they should be applied.

Create a file:
<create_file>
<path>relative/path.ext</path>
<overwrite>false</overwrite>
<content>
full file content
</content>
</create_file>

Modify a file:
<modify_file>
<path>relative/path.ext</path>
<change>
<lines>START-END</lines>
<content>
replacement lines
</content>
</change>
</modify_file>

A <change> may use <search>exact text</search> instead of <lines>.

Add a dependency:
<add_reference>name@version</add_reference>
"#,
    );

    if mode == ModificationMode::Replace {
        prompt.push_str(
            "\nModified files are rewritten from the concatenated <content> of their changes, \
so each <modify_file> must carry the complete new file.\n",
        );
    }

    prompt
}

/// Prompt asking for the fix of one diagnostic
///
/// `file_content` is the current text of the diagnosed file, if readable. In
/// [`ModificationMode::Splice`] the answer replaces the diagnosed line; in
/// [`ModificationMode::Replace`] it replaces the whole file, so the full file is shown
/// and the full corrected file is requested.
pub fn build_fix_prompt(
    diagnostic: &Diagnostic,
    file_content: Option<&str>,
    mode: ModificationMode,
) -> String {
    let mut prompt = format!("## Diagnostic\n\n{}\n\n", diagnostic);

    match mode {
        ModificationMode::Splice => {
            if let Some(content) = file_content {
                push_context(&mut prompt, diagnostic, content);
            }
            prompt.push_str(&format!(
                "Reply with the corrected text for line {} only:\n<fix>\ncorrected line\n</fix>\n\
If no single-line fix exists, reply with an empty <fix></fix>.\n",
                diagnostic.line
            ));
        }
        ModificationMode::Replace => {
            let Some(content) = file_content else {
                prompt.push_str(&format!(
                    "{} could not be read. Reply with an empty <fix></fix>.\n",
                    diagnostic.file
                ));
                return prompt;
            };
            push_numbered(&mut prompt, diagnostic, content, 1, content.lines().count());
            prompt.push_str(&format!(
                "The reply replaces {} entirely. Reply with the complete corrected file, \
every line included, not just line {}:\n<fix>\ncomplete file content\n</fix>\n\
If you cannot fix it, reply with an empty <fix></fix>.\n",
                diagnostic.file, diagnostic.line
            ));
        }
    }
    prompt
}

fn push_context(prompt: &mut String, diagnostic: &Diagnostic, content: &str) {
    let line = diagnostic.line.max(1);
    let first = line.saturating_sub(FIX_CONTEXT_LINES).max(1);
    let last = (line + FIX_CONTEXT_LINES).min(content.lines().count());
    push_numbered(prompt, diagnostic, content, first, last);
}

/// Lines `first..=last` of `content`, the diagnosed line marked with `>`
fn push_numbered(
    prompt: &mut String,
    diagnostic: &Diagnostic,
    content: &str,
    first: usize,
    last: usize,
) {
    let lines: Vec<&str> = content.lines().collect();
    let line = diagnostic.line.max(1);

    prompt.push_str(&format!("## {} (lines {}-{})\n\n```\n", diagnostic.file, first, last));
    for number in first..=last {
        let marker = if number == line { ">" } else { " " };
        if let Some(text) = lines.get(number.saturating_sub(1)) {
            prompt.push_str(&format!("{}{:>5} | {}\n", marker, number, text));
        }
    }
    prompt.push_str("```\n\n");
}

/// Prompt for a conversational answer with no project edits
pub fn build_chat_prompt(question: &str) -> String {
    format!(
        "{}\n\nDo not emit file or change blocks; this answer will not be applied.",
        question.trim()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_prompt_lists_files() {
        let files = vec!["src/lib.rs".to_string(), "Cargo.toml".to_string()];
        let prompt = build_plan_prompt("add a logger", &files, ModificationMode::Splice);
        assert!(prompt.contains("add a logger"));
        assert!(prompt.contains("- src/lib.rs"));
        assert!(prompt.contains("<create_file>"));
        assert!(!prompt.contains("complete new file"));
    }

    #[test]
    fn test_plan_prompt_replace_mode_note() {
        let prompt = build_plan_prompt("x", &[], ModificationMode::Replace);
        assert!(prompt.contains("complete new file"));
        assert!(!prompt.contains("## Project Files"));
    }

    #[test]
    fn test_fix_prompt_marks_line() {
        let content = (1..=20).map(|n| format!("line {}", n)).collect::<Vec<_>>().join("\n");
        let diag = Diagnostic::error("src/main.rs", 10, "mismatched types").with_code("E0308");
        let prompt = build_fix_prompt(&diag, Some(&content), ModificationMode::Splice);

        assert!(prompt.contains("E0308"));
        assert!(prompt.contains(">   10 | line 10"));
        assert!(prompt.contains("    2 | line 2"));
        assert!(!prompt.contains("| line 1\n"));
        assert!(prompt.contains("line 10 only"));
    }

    #[test]
    fn test_fix_prompt_without_file() {
        let diag = Diagnostic::error("gone.rs", 3, "missing");
        let prompt = build_fix_prompt(&diag, None, ModificationMode::Splice);
        assert!(!prompt.contains("```"));
        assert!(prompt.contains("<fix>"));
    }

    #[test]
    fn test_fix_prompt_replace_mode_requests_whole_file() {
        let content = "fn a() {}\nfn b() { let y: u32 = \"1\"; }\nfn c() {}\n";
        let diag = Diagnostic::error("src/lib.rs", 2, "mismatched types");
        let prompt = build_fix_prompt(&diag, Some(content), ModificationMode::Replace);

        assert!(prompt.contains("complete corrected file"));
        assert!(!prompt.contains("line 2 only"));
        assert!(prompt.contains("    1 | fn a() {}"));
        assert!(prompt.contains(">    2 | fn b()"));
        assert!(prompt.contains("    3 | fn c() {}"));
        assert_eq!(fix_system_prompt(ModificationMode::Replace), FIX_FILE_SYSTEM_PROMPT);
        assert!(FIX_FILE_SYSTEM_PROMPT.contains("complete corrected file"));
    }

    #[test]
    fn test_fix_prompt_replace_mode_unreadable_file() {
        let diag = Diagnostic::error("gone.rs", 3, "missing");
        let prompt = build_fix_prompt(&diag, None, ModificationMode::Replace);
        assert!(prompt.contains("could not be read"));
        assert!(prompt.contains("<fix></fix>"));
        assert_eq!(fix_system_prompt(ModificationMode::Splice), FIX_LINE_SYSTEM_PROMPT);
    }
}
