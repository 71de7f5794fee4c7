use std::{fmt::Write as _, sync::Arc};

use ahash::AHashMap;

use crate::{
    action::{Action, LineCompiler, SourceLine},
    blocks::{build_tree, extract_strings, strip_comments},
    error::RunError,
    lex::{tokenize, Tok},
};

/// The compiled program: a map of block name to action list, plus the name
/// of the root block holding the top-level lines.
///
/// Blocks sit behind `Arc` because the evaluator re-enters them (loops,
/// function bodies) while holding the map mutably. Block names stay unique
/// for the life of a session because the node counter that produced them
/// lives outside (`Machine` threads it through successive compiles), so REPL
/// lines and `source`d files can merge their blocks into one map.
#[derive(Debug, Clone, Default)]
pub(crate) struct CodeMap {
    pub blocks: AHashMap<String, Arc<Vec<Action>>>,
    pub root: String,
}

impl CodeMap {
    /// Merges another compiled unit into this map and adopts its root.
    pub fn absorb(&mut self, other: Self) {
        self.blocks.extend(other.blocks);
        self.root = other.root;
    }

    /// Renders every block for the `-debug` dump, root first.
    #[must_use]
    pub fn dump(&self) -> String {
        let mut names: Vec<&String> = self.blocks.keys().collect();
        names.sort();
        let mut out = String::new();
        for name in names {
            let marker = if *name == self.root { " (root)" } else { "" };
            let _ = writeln!(out, "{name}{marker}:");
            for action in self.blocks[name].iter() {
                let _ = writeln!(out, "  {}", action.describe());
            }
        }
        out
    }
}

/// Compiles source text into a block map.
///
/// The pipeline: normalise newlines, extract string literals, strip
/// comments, build the indentation tree, then compile each logical line to
/// actions. Each line is followed by one `GC` action (the collection
/// trigger, and the spacer that puts an `else` at offset +2 from its `if`).
pub(crate) fn compile(source: &str, node_counter: &mut u64) -> Result<CodeMap, RunError> {
    let source = source.replace("\r\n", "\n");
    let (destrung, string_map) = extract_strings(&source)?;
    let destrung = strip_comments(&destrung);
    let tree = build_tree(&destrung, &string_map, node_counter);

    let mut blocks = AHashMap::with_capacity(tree.nodes.len());
    for (name, parts) in tree.nodes {
        let mut node_acts: Vec<Action> = Vec::new();
        for part in parts {
            let mut toks = tokenize(&part.line);
            if let Some(child) = &part.target_node {
                toks.push(Tok::Link(child.clone()));
            }
            let sl = Arc::new(SourceLine {
                text: part.line_og.clone(),
                number: part.number,
            });
            // shell lines keep only the marker; the raw text is re-read from
            // the source line at run time
            if toks.first() == Some(&Tok::Doll) {
                toks.truncate(1);
            }
            let acts = LineCompiler::new().compile(toks, &sl);
            node_acts.extend(acts);
            node_acts.push(Action::new("", "GC", [], &sl));
        }
        restore_strings(&mut node_acts, &string_map);
        blocks.insert(name, Arc::new(node_acts));
    }

    Ok(CodeMap {
        blocks,
        root: tree.root,
    })
}

/// Swaps quoted string placeholders inside action arguments back to the
/// actual string bodies (still quoted), so `const` sees the real text.
fn restore_strings(actions: &mut [Action], string_map: &AHashMap<String, String>) {
    for action in actions {
        for arg in &mut action.args {
            if arg.len() >= 2 && arg.starts_with('"') && arg.ends_with('"') {
                if let Some(body) = string_map.get(&arg[1..arg.len() - 1]) {
                    *arg = format!("\"{body}\"");
                }
            }
        }
    }
}
