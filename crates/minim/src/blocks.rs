use ahash::AHashMap;

use crate::{
    action::SourceLine,
    error::{ErrorKind, RunError},
};

/// One logical line: physical lines joined until brackets and quotes
/// balance. `line` still carries string placeholders; `line_og` has the
/// original string bodies restored for diagnostics and shell commands.
#[derive(Debug, Clone)]
pub(crate) struct CodePart {
    pub line: String,
    pub line_og: String,
    pub indent: usize,
    /// 0-based number of the first physical line.
    pub number: usize,
    /// Child block this line links to, once the tree is built.
    pub target_node: Option<String>,
}

/// The indentation tree: every run of deeper-indented lines became a named
/// block, and `root` names the block holding the top-level lines.
#[derive(Debug)]
pub(crate) struct BlockTree {
    pub nodes: AHashMap<String, Vec<CodePart>>,
    pub root: String,
}

/// Splits source on unescaped quotes after processing `\"`, `\\`, `\n` and
/// `\r` escapes. Even-indexed parts are code, odd-indexed parts are string
/// bodies.
fn split_quoted(source: &str) -> Vec<String> {
    let mut parts = vec![String::new()];
    let mut rest = source;
    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix("\\\"") {
            parts.last_mut().expect("non-empty").push('"');
            rest = after;
        } else if let Some(after) = rest.strip_prefix("\\\\") {
            parts.last_mut().expect("non-empty").push('\\');
            rest = after;
        } else if let Some(after) = rest.strip_prefix("\\n") {
            parts.last_mut().expect("non-empty").push('\n');
            rest = after;
        } else if let Some(after) = rest.strip_prefix("\\r") {
            parts.last_mut().expect("non-empty").push('\r');
            rest = after;
        } else if let Some(after) = rest.strip_prefix('"') {
            parts.push(String::new());
            rest = after;
        } else {
            let ch = rest.chars().next().expect("rest is non-empty");
            parts.last_mut().expect("non-empty").push(ch);
            rest = &rest[ch.len_utf8()..];
        }
    }
    parts
}

/// Replaces every string literal with a `_str_<N>` placeholder, returning
/// the de-stringed source and the placeholder map. Fails with `lex` when a
/// string is unterminated.
pub(crate) fn extract_strings(source: &str) -> Result<(String, AHashMap<String, String>), RunError> {
    let parts = split_quoted(source);
    if parts.len() % 2 == 0 {
        return Err(RunError::new(
            ErrorKind::Lex,
            "unterminated string literal",
            "lex",
            SourceLine::synthetic(source.lines().last().unwrap_or_default()),
        ));
    }
    let mut map = AHashMap::new();
    let mut out: Vec<String> = Vec::with_capacity(parts.len());
    for (n, part) in parts.into_iter().enumerate() {
        if n % 2 == 0 {
            out.push(part);
        } else {
            let name = format!("_str_{}", n / 2);
            out.push(name.clone());
            map.insert(name, part);
        }
    }
    Ok((out.join("\""), map))
}

/// Drops everything from `#` to end of line. Runs on de-stringed source, so
/// `#` inside string literals is safe.
pub(crate) fn strip_comments(source: &str) -> String {
    source
        .lines()
        .map(|line| line.split('#').next().unwrap_or_default())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Restores string placeholders inside a logical line for diagnostics.
fn fill_strings(line: &str, map: &AHashMap<String, String>) -> String {
    let mut out = String::new();
    for (n, part) in line.split('"').enumerate() {
        if n > 0 {
            out.push('"');
        }
        if n % 2 == 1 {
            if let Some(body) = map.get(part) {
                out.push_str(body);
                continue;
            }
        }
        out.push_str(part);
    }
    out
}

/// Leading-space count of the first physical line of a buffer.
fn indent_of(text: &str) -> usize {
    text.chars().take_while(|c| *c == ' ').count()
}

/// Accumulates physical lines into logical lines: a line run stays open
/// while any of `[] {} ()` or quotes are unbalanced.
fn logical_lines(source: &str, string_map: &AHashMap<String, String>) -> Vec<CodePart> {
    let mut parts = Vec::new();
    let mut buffer: Vec<&str> = Vec::new();
    let (mut open_br, mut close_br) = (0usize, 0usize);
    let (mut open_par, mut close_par) = (0usize, 0usize);
    let (mut open_cur, mut close_cur) = (0usize, 0usize);
    let mut quotes = 0usize;

    for (ln, line) in source.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        open_br += line.matches('[').count();
        close_br += line.matches(']').count();
        open_par += line.matches('(').count();
        close_par += line.matches(')').count();
        open_cur += line.matches('{').count();
        close_cur += line.matches('}').count();
        quotes += line.matches('"').count();
        buffer.push(line);
        let balanced = open_br == close_br && open_par == close_par && open_cur == close_cur && quotes % 2 == 0;
        if !balanced {
            continue;
        }
        let joined_raw = buffer.join("\n");
        let trimmed: Vec<&str> = buffer.iter().map(|l| l.trim()).collect();
        let line_text = trimmed.join("\n");
        parts.push(CodePart {
            line_og: fill_strings(&line_text, string_map),
            indent: indent_of(&joined_raw),
            number: ln + 1 - buffer.len(),
            target_node: None,
            line: line_text,
        });
        buffer.clear();
    }
    parts
}

/// Groups runs of deeper-indented lines into named child blocks.
///
/// Repeatedly takes the deepest indentation level present, finds a line
/// whose successor sits at that level with strictly greater indentation,
/// and moves the consecutive run at that level into a fresh `_node_<N>`
/// block linked from the predecessor. What remains at the end is the root
/// block.
pub(crate) fn build_tree(
    source: &str,
    string_map: &AHashMap<String, String>,
    node_counter: &mut u64,
) -> BlockTree {
    let mut parts = logical_lines(source, string_map);
    let mut nodes: AHashMap<String, Vec<CodePart>> = AHashMap::new();

    loop {
        let maximal = parts.iter().map(|p| p.indent).max().unwrap_or(0);
        if maximal == 0 {
            break;
        }
        let start = (0..parts.len().saturating_sub(1)).find(|&n| {
            parts[n + 1].indent > parts[n].indent && parts[n + 1].indent == maximal
        });
        let Some(start) = start else {
            // stray indentation with no shallower predecessor; treat what is
            // left as top-level
            break;
        };
        let mut body_end = start + 1;
        while body_end < parts.len() && parts[body_end].indent == maximal {
            body_end += 1;
        }
        let name = format!("_node_{}", *node_counter);
        *node_counter += 1;
        let body: Vec<CodePart> = parts.drain(start + 1..body_end).collect();
        nodes.insert(name.clone(), body);
        parts[start].target_node = Some(name);
    }

    let root = format!("_node_{}", *node_counter);
    *node_counter += 1;
    nodes.insert(root.clone(), parts);
    BlockTree { nodes, root }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strings_are_extracted_and_escapes_processed() {
        let (code, map) = extract_strings(r#"a = "x\"y" + "z""#).unwrap();
        assert_eq!(code, "a = \"_str_0\" + \"_str_1\"");
        assert_eq!(map["_str_0"], "x\"y");
        assert_eq!(map["_str_1"], "z");
    }

    #[test]
    fn newline_escape_becomes_real_newline() {
        let (_, map) = extract_strings(r#"s = "a\nb""#).unwrap();
        assert_eq!(map["_str_0"], "a\nb");
    }

    #[test]
    fn unterminated_string_fails_with_lex() {
        let err = extract_strings("a = \"oops").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Lex);
    }

    #[test]
    fn comments_are_stripped_outside_strings() {
        let (code, _) = extract_strings("a = \"#keep\" # drop\nb = 2").unwrap();
        let stripped = strip_comments(&code);
        assert_eq!(stripped, "a = \"_str_0\" \nb = 2");
    }

    #[test]
    fn bracket_continuation_joins_lines() {
        let parts = logical_lines("l = [1,\n  2]\nx = 3", &AHashMap::new());
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].line, "l = [1,\n2]");
        assert_eq!(parts[0].number, 0);
        assert_eq!(parts[1].number, 2);
    }

    #[test]
    fn tree_groups_indented_runs() {
        let mut counter = 0;
        let tree = build_tree("if x:\n  a = 1\n  b = 2\nc = 3", &AHashMap::new(), &mut counter);
        // one child block plus the root
        assert_eq!(tree.nodes.len(), 2);
        let root = &tree.nodes[&tree.root];
        assert_eq!(root.len(), 2);
        let child_name = root[0].target_node.clone().expect("if line links a child");
        assert_eq!(tree.nodes[&child_name].len(), 2);
        assert!(root[1].target_node.is_none());
    }

    #[test]
    fn nested_blocks_resolve_deepest_first() {
        let mut counter = 0;
        let src = "if a:\n  if b:\n    x = 1\n  y = 2\nz = 3";
        let tree = build_tree(src, &AHashMap::new(), &mut counter);
        assert_eq!(tree.nodes.len(), 3);
        let root = &tree.nodes[&tree.root];
        let outer = root[0].target_node.clone().expect("outer link");
        let outer_block = &tree.nodes[&outer];
        assert_eq!(outer_block.len(), 2);
        let inner = outer_block[0].target_node.clone().expect("inner link");
        assert_eq!(tree.nodes[&inner].len(), 1);
    }

    #[test]
    fn block_names_are_unique_across_compiles() {
        let mut counter = 0;
        let first = build_tree("if a:\n  x = 1", &AHashMap::new(), &mut counter);
        let second = build_tree("if b:\n  y = 2", &AHashMap::new(), &mut counter);
        for name in first.nodes.keys() {
            assert!(!second.nodes.contains_key(name), "duplicate block name {name}");
        }
    }
}
