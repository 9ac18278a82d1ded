//! Parse model output into change-sets and fixes
//!
//! The model answers with XML blocks:
//! - `<create_file><path>..</path><overwrite>true</overwrite><content>..</content></create_file>`
//! - `<modify_file><path>..</path><change><lines>3-5</lines><content>..</content></change></modify_file>`
//!   (a change may use `<search>..</search>` instead of `<lines>`)
//! - `<add_reference>name</add_reference>`
//! - `<fix>..</fix>` for a single-line repair
//!
//! Blocks are returned in the order they appear. Malformed blocks are skipped
//! with a warning rather than failing the whole answer.

use kiln_core::{ChangeItem, ChangeSet, CodeChange, FileCreation, FileModification, ReferenceAddition};

const BLOCK_TAGS: [&str; 3] = ["create_file", "modify_file", "add_reference"];

/// Parse every change block in `text`, preserving order
pub fn parse_change_set(text: &str) -> ChangeSet {
    let mut items = Vec::new();
    let mut remaining = text;

    while let Some((tag, start)) = next_block(remaining) {
        let open = format!("<{}>", tag);
        let close = format!("</{}>", tag);
        let body_start = start + open.len();

        let Some(end) = remaining[body_start..].find(&close) else {
            tracing::warn!("Unterminated <{}> block in model output", tag);
            break;
        };
        let body = &remaining[body_start..body_start + end];

        match parse_block(tag, body) {
            Some(item) => items.push(item),
            None => tracing::warn!("Skipping malformed <{}> block", tag),
        }

        remaining = &remaining[body_start + end + close.len()..];
    }

    ChangeSet { items }
}

/// Extract the replacement line from a `<fix>` block, or an empty string
pub fn parse_fix(text: &str) -> String {
    extract_tag_content(text, "fix")
        .map(|fix| fix.trim_matches(|c| c == '\n' || c == '\r').to_string())
        .unwrap_or_default()
}

/// Earliest opening tag among the known block kinds
fn next_block(text: &str) -> Option<(&'static str, usize)> {
    BLOCK_TAGS
        .iter()
        .filter_map(|tag| text.find(&format!("<{}>", tag)).map(|pos| (*tag, pos)))
        .min_by_key(|(_, pos)| *pos)
}

fn parse_block(tag: &str, body: &str) -> Option<ChangeItem> {
    match tag {
        "create_file" => {
            let path = extract_tag_content(body, "path")?.trim().to_string();
            if path.is_empty() {
                return None;
            }
            let overwrite = extract_tag_content(body, "overwrite")
                .map(|v| v.trim().eq_ignore_ascii_case("true"))
                .unwrap_or(false);
            let content = strip_leading_newline(&extract_tag_content(body, "content")?);
            Some(ChangeItem::Create(FileCreation {
                path,
                content,
                overwrite,
            }))
        }
        "modify_file" => {
            let path = extract_tag_content(body, "path")?.trim().to_string();
            if path.is_empty() {
                return None;
            }
            let changes: Vec<CodeChange> = extract_all(body, "change")
                .iter()
                .filter_map(|change| parse_code_change(change))
                .collect();
            if changes.is_empty() {
                return None;
            }
            Some(ChangeItem::Modify(FileModification { path, changes }))
        }
        "add_reference" => {
            let name = body.trim();
            if name.is_empty() {
                return None;
            }
            Some(ChangeItem::Reference(ReferenceAddition {
                name: name.to_string(),
            }))
        }
        _ => None,
    }
}

fn parse_code_change(body: &str) -> Option<CodeChange> {
    let content = strip_leading_newline(&extract_tag_content(body, "content")?);

    if let Some(lines) = extract_tag_content(body, "lines") {
        let (start, end) = parse_line_range(&lines)?;
        return Some(CodeChange::at_lines(start, end, content));
    }

    let pattern = extract_tag_content(body, "search")?;
    if pattern.is_empty() {
        return None;
    }
    Some(CodeChange::at_pattern(pattern, content))
}

/// "7" or "3-5"; lines are 1-based and the range must not be reversed
fn parse_line_range(raw: &str) -> Option<(usize, usize)> {
    let raw = raw.trim();
    let (start, end) = match raw.split_once('-') {
        Some((a, b)) => (a.trim().parse().ok()?, b.trim().parse().ok()?),
        None => {
            let line = raw.parse().ok()?;
            (line, line)
        }
    };
    (start >= 1 && end >= start).then_some((start, end))
}

fn strip_leading_newline(s: &str) -> String {
    s.strip_prefix("\r\n")
        .or_else(|| s.strip_prefix('\n'))
        .unwrap_or(s)
        .to_string()
}

fn extract_tag_content(text: &str, tag: &str) -> Option<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = text.find(&open)? + open.len();
    let end = text[start..].find(&close)?;
    Some(text[start..start + end].to_string())
}

fn extract_all<'a>(text: &'a str, tag: &str) -> Vec<&'a str> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let mut found = Vec::new();
    let mut remaining = text;

    while let Some(start) = remaining.find(&open) {
        let body_start = start + open.len();
        let Some(end) = remaining[body_start..].find(&close) else {
            break;
        };
        found.push(&remaining[body_start..body_start + end]);
        remaining = &remaining[body_start + end + close.len()..];
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::ChangeTarget;

    #[test]
    fn test_blocks_in_document_order() {
        let output = r#"
Here is the plan.
<add_reference>serde</add_reference>
<create_file>
<path>src/widget.rs</path>
<content>
pub struct Widget;
</content>
</create_file>
<modify_file>
<path>src/lib.rs</path>
<change><lines>1-2</lines><content>pub mod widget;</content></change>
<change><search>fn old()</search><content>fn new()</content></change>
</modify_file>
"#;
        let set = parse_change_set(output);
        let kinds: Vec<_> = set.items.iter().map(|i| i.kind()).collect();
        assert_eq!(kinds, vec!["reference", "create", "modify"]);

        match &set.items[1] {
            ChangeItem::Create(c) => {
                assert_eq!(c.path, "src/widget.rs");
                assert_eq!(c.content, "pub struct Widget;\n");
                assert!(!c.overwrite);
            }
            other => panic!("unexpected item {:?}", other),
        }

        match &set.items[2] {
            ChangeItem::Modify(m) => {
                assert_eq!(m.changes.len(), 2);
                assert_eq!(m.changes[0].target, ChangeTarget::Lines { start: 1, end: 2 });
                assert_eq!(
                    m.changes[1].target,
                    ChangeTarget::Search {
                        pattern: "fn old()".to_string()
                    }
                );
            }
            other => panic!("unexpected item {:?}", other),
        }
    }

    #[test]
    fn test_overwrite_flag() {
        let set = parse_change_set(
            "<create_file><path>a.txt</path><overwrite>TRUE</overwrite><content>x</content></create_file>",
        );
        match &set.items[0] {
            ChangeItem::Create(c) => assert!(c.overwrite),
            other => panic!("unexpected item {:?}", other),
        }
    }

    #[test]
    fn test_malformed_blocks_skipped() {
        let output = "<create_file><content>no path</content></create_file>\
                      <modify_file><path>a.rs</path><change><lines>5-2</lines><content>x</content></change></modify_file>\
                      <add_reference>  </add_reference>\
                      <add_reference>regex@1.10</add_reference>";
        let set = parse_change_set(output);
        assert_eq!(set.len(), 1);
        assert_eq!(set.items[0].target(), "regex@1.10");
    }

    #[test]
    fn test_no_blocks_is_empty() {
        assert!(parse_change_set("I could not find anything to change.").is_empty());
    }

    #[test]
    fn test_unterminated_block_stops() {
        let set = parse_change_set("<add_reference>a</add_reference><create_file><path>x</path>");
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_parse_fix() {
        assert_eq!(parse_fix("<fix>\n    let x = 1;\n</fix>"), "    let x = 1;");
        assert_eq!(parse_fix("no idea"), "");
    }

    #[test]
    fn test_line_range() {
        assert_eq!(parse_line_range("7"), Some((7, 7)));
        assert_eq!(parse_line_range(" 3 - 5 "), Some((3, 5)));
        assert_eq!(parse_line_range("0"), None);
        assert_eq!(parse_line_range("x-2"), None);
    }
}
