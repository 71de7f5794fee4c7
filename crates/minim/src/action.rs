use std::sync::Arc;

use smallvec::SmallVec;

use crate::lex::Tok;

/// One textual source line: the original text (strings restored) and its
/// 0-based line number. Every action keeps a reference for diagnostics, and
/// the `$`/`$$` actions re-derive the raw command text from it, so the
/// compiler guarantees it is always populated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLine {
    pub text: String,
    pub number: usize,
}

impl SourceLine {
    /// A synthetic line for errors that have no source position (lexical
    /// failures, embedding requests).
    #[must_use]
    pub fn synthetic(text: &str) -> Arc<Self> {
        Arc::new(Self {
            text: text.to_owned(),
            number: 0,
        })
    }
}

/// One three-address instruction.
///
/// `op` is a string: a reserved operation name, an operator symbol, or the
/// name of the function a call action invokes. `target` is the destination
/// variable, or a block name for control headers, or empty for statements.
#[derive(Debug, Clone)]
pub struct Action {
    pub target: String,
    pub op: String,
    pub args: SmallVec<[String; 3]>,
    pub source: Arc<SourceLine>,
}

impl Action {
    pub(crate) fn new(
        target: impl Into<String>,
        op: impl Into<String>,
        args: impl IntoIterator<Item = String>,
        source: &Arc<SourceLine>,
    ) -> Self {
        Self {
            target: target.into(),
            op: op.into(),
            args: args.into_iter().collect(),
            source: Arc::clone(source),
        }
    }

    /// Renders the `target <-[op]- args` form used by the `-debug` dump.
    #[must_use]
    pub fn describe(&self) -> String {
        format!(
            "{target} <-[{op}]- {args}",
            target = self.target,
            op = self.op,
            args = self.args.join(", ")
        )
    }
}

/// Compiles one logical line's tokens into an ordered action list.
///
/// Fresh temporaries (`_temp_<N>`) are introduced per reduction step; the
/// counter resets per line, so invariant C1 (no action reads a temp a
/// strictly earlier action of the same line did not write) holds by
/// construction.
pub(crate) struct LineCompiler {
    temp_n: usize,
}

/// Operator precedence levels, tightest first. The reduction loop always
/// reduces the leftmost operator of the tightest level present, which yields
/// left-associative grouping within a level.
fn op_level(tok: &Tok) -> Option<u8> {
    Some(match tok {
        Tok::Not => 0,
        Tok::Sub | Tok::Dot => 1,
        Tok::Caret => 2,
        Tok::Star | Tok::Div | Tok::FloorDiv | Tok::Percent => 3,
        Tok::Plus | Tok::Minus => 4,
        Tok::EqEq | Tok::NotEq | Tok::Less | Tok::Greater => 5,
        Tok::Or | Tok::And => 6,
        _ => return None,
    })
}

/// Splits a token run on top-level commas, ignoring commas nested inside
/// parens, brackets, or curlies.
fn comma_args(tokens: &[Tok]) -> Vec<Vec<Tok>> {
    let mut args = Vec::new();
    let mut buffer = Vec::new();
    let mut level = 0i32;
    for tok in tokens {
        match tok {
            Tok::Comma if level == 0 => {
                args.push(std::mem::take(&mut buffer));
            }
            Tok::OpenPar | Tok::OpenCur | Tok::OpenBr => {
                level += 1;
                buffer.push(tok.clone());
            }
            Tok::ClosePar | Tok::CloseCur | Tok::CloseBr => {
                level -= 1;
                buffer.push(tok.clone());
            }
            _ => buffer.push(tok.clone()),
        }
    }
    if !buffer.is_empty() {
        args.push(buffer);
    }
    args
}

/// Finds the outermost-leftmost parenthesised group.
fn paren_outer(tokens: &[Tok]) -> Option<(usize, usize)> {
    let start = tokens.iter().position(|t| *t == Tok::OpenPar)?;
    let mut level = 0i32;
    for (n, tok) in tokens.iter().enumerate().skip(start + 1) {
        match tok {
            Tok::ClosePar if level == 0 => return Some((start, n)),
            Tok::OpenPar => level += 1,
            Tok::ClosePar => level -= 1,
            _ => {}
        }
    }
    None
}

/// Finds the outermost-leftmost curly group.
fn curly_outer(tokens: &[Tok]) -> Option<(usize, usize)> {
    let start = tokens.iter().position(|t| *t == Tok::OpenCur)?;
    let mut level = 0i32;
    for (n, tok) in tokens.iter().enumerate().skip(start + 1) {
        match tok {
            Tok::CloseCur if level == 0 => return Some((start, n)),
            Tok::OpenCur => level += 1,
            Tok::CloseCur => level -= 1,
            _ => {}
        }
    }
    None
}

/// Finds the leftmost bracket group (with its matching close).
fn bracket_where(tokens: &[Tok]) -> Option<(usize, usize)> {
    let start = tokens.iter().position(|t| *t == Tok::OpenBr)?;
    let mut level = 0i32;
    for (n, tok) in tokens.iter().enumerate().skip(start) {
        match tok {
            Tok::OpenBr => level += 1,
            Tok::CloseBr => {
                level -= 1;
                if level == 0 {
                    return Some((start, n));
                }
            }
            _ => {}
        }
    }
    None
}

/// True when the tokens end in `: LINK` and begin with the given keyword,
/// i.e. they form a control header for a child block.
fn is_header(tokens: &[Tok], keyword: &str) -> bool {
    tokens.len() > 1
        && tokens[0].is_word(keyword)
        && matches!(tokens.last(), Some(Tok::Link(_)))
        && matches!(tokens.get(tokens.len() - 2), Some(Tok::Colon))
}

fn link_target(tokens: &[Tok]) -> String {
    match tokens.last() {
        Some(Tok::Link(name)) => name.clone(),
        _ => String::new(),
    }
}

impl LineCompiler {
    pub fn new() -> Self {
        Self { temp_n: 0 }
    }

    fn temp(&mut self) -> String {
        let name = format!("_temp_{}", self.temp_n);
        self.temp_n += 1;
        name
    }

    /// Compiles an expression and returns the name holding its result,
    /// appending any produced actions. A lone constant gets a `const` action
    /// into a fresh temporary; a lone word is used directly.
    fn reduce_to_name(&mut self, tokens: &[Tok], actions: &mut Vec<Action>, sl: &Arc<SourceLine>) -> String {
        let actlet = self.compile(tokens.to_vec(), sl);
        if actlet.is_empty() {
            match tokens.first() {
                Some(Tok::Word(w)) => w.clone(),
                Some(Tok::Const(c)) => {
                    let name = self.temp();
                    actions.push(Action::new(name.clone(), "const", [c.clone()], sl));
                    name
                }
                _ => String::new(),
            }
        } else {
            let target = actlet[actlet.len() - 1].target.clone();
            actions.extend(actlet);
            target
        }
    }

    /// Compiles a control-header condition (the tokens between the keyword
    /// and the trailing `: LINK`). An empty condition means an argless
    /// `switch`/`case` and yields a `true` constant.
    fn header_cond(&mut self, inner: &[Tok], actions: &mut Vec<Action>, sl: &Arc<SourceLine>) -> String {
        if inner.is_empty() {
            let name = self.temp();
            actions.push(Action::new(name.clone(), "const", ["true".to_owned()], sl));
            return name;
        }
        self.reduce_to_name(inner, actions, sl)
    }

    /// Rewrites compound assignment `x OP= e` into `x = x OP e`.
    fn rewrite_compound(tokens: Vec<Tok>) -> Vec<Tok> {
        let eq_id = tokens
            .iter()
            .position(|t| matches!(t, Tok::Eq | Tok::RebindEq));
        let Some(eq_id) = eq_id else { return tokens };
        if eq_id == 0 || op_level(&tokens[eq_id - 1]).is_none() {
            return tokens;
        }
        let modifier = tokens[eq_id - 1].clone();
        let target: Vec<Tok> = tokens[..eq_id - 1].to_vec();
        let tail: Vec<Tok> = tokens[eq_id + 1..].to_vec();
        let mut out = target.clone();
        out.push(tokens[eq_id].clone());
        out.extend(target);
        out.push(modifier);
        out.extend(tail);
        out
    }

    /// The main compilation routine: repeatedly rewrites the token list by
    /// the first applicable rule until only a result name remains, then
    /// attaches assignment-target handling.
    #[expect(clippy::too_many_lines, reason = "one arm per syntactic form, like the dispatch it feeds")]
    pub fn compile(&mut self, tokens: Vec<Tok>, sl: &Arc<SourceLine>) -> Vec<Action> {
        let mut actions: Vec<Action> = Vec::new();
        let mut tokens = Self::rewrite_compound(tokens);

        // split off assignment targets
        let mut rebind = false;
        let mut targets: Vec<String> = Vec::new();
        let mut targets_tok: Vec<Vec<Tok>> = Vec::new();
        if let Some(eq_id) = tokens
            .iter()
            .position(|t| matches!(t, Tok::Eq | Tok::RebindEq))
        {
            rebind = matches!(tokens[eq_id], Tok::RebindEq);
            targets_tok = comma_args(&tokens[..eq_id]);
            for group in &targets_tok {
                if let Some(text) = group.first().and_then(Tok::text) {
                    targets.push(text.to_owned());
                }
            }
            tokens.drain(..=eq_id);
        }

        loop {
            // shell lines keep their raw text; everything after `$` is
            // parsed at run time
            if sl.text.trim_start().starts_with('$') || tokens.contains(&Tok::Doll) {
                let mut action = Action::new(self.temp(), "$", [], sl);
                if let Some(first) = targets.first() {
                    action.op = "$$".to_owned();
                    action.target.clone_from(first);
                }
                actions.push(action);
                return actions;
            }

            if is_header(&tokens, "repeat")
                || is_header(&tokens, "if")
                || is_header(&tokens, "switch")
                || is_header(&tokens, "case")
            {
                let keyword = tokens[0].word().expect("header keyword").to_owned();
                let cond = self.header_cond(&tokens[1..tokens.len() - 2], &mut actions, sl);
                actions.push(Action::new(link_target(&tokens), keyword, [cond.clone()], sl));
                tokens = vec![Tok::Word(cond)];
                continue;
            }
            if is_header(&tokens, "error") {
                let target = link_target(&tokens);
                let args = comma_args(&tokens[1..tokens.len() - 2]);
                let vs: Vec<String> = args
                    .iter()
                    .take(2)
                    .filter_map(|arg| arg.first().and_then(Tok::text).map(ToOwned::to_owned))
                    .collect();
                actions.push(Action::new(target.clone(), "error", vs, sl));
                tokens = vec![Tok::Word(target)];
                continue;
            }
            if is_header(&tokens, "while") {
                let target = link_target(&tokens);
                actions.push(Action::new(target.clone(), "while_start", [], sl));
                let cond = self.header_cond(&tokens[1..tokens.len() - 2], &mut actions, sl);
                actions.push(Action::new(target, "while", [cond.clone()], sl));
                tokens = vec![Tok::Word(cond)];
                continue;
            }
            if is_header(&tokens, "for") {
                let mut vs: Vec<String> = Vec::new();
                for arg in comma_args(&tokens[1..tokens.len() - 2]) {
                    let Some(arrow) = arg.iter().position(|t| *t == Tok::RArrow) else {
                        continue;
                    };
                    let source_name = self.reduce_to_name(&arg[..arrow], &mut actions, sl);
                    let bind_name = arg
                        .get(arrow + 1)
                        .and_then(Tok::text)
                        .unwrap_or_default()
                        .to_owned();
                    vs.push(source_name);
                    vs.push(bind_name);
                }
                actions.push(Action::new(link_target(&tokens), "for", vs, sl));
                tokens = Vec::new();
                continue;
            }
            if is_header(&tokens, "pool") {
                let mut vs: Vec<String> = Vec::new();
                for (n, tok) in tokens.iter().enumerate() {
                    if *tok == Tok::RArrow {
                        vs.push(tokens[n - 1].text().unwrap_or_default().to_owned());
                        vs.push(tokens[n + 1].text().unwrap_or_default().to_owned());
                    }
                }
                vs.push("Nothing".to_owned());
                for (n, tok) in tokens.iter().enumerate() {
                    if *tok == Tok::LArrow {
                        vs.push(tokens[n - 1].text().unwrap_or_default().to_owned());
                        vs.push(tokens[n + 1].text().unwrap_or_default().to_owned());
                    }
                }
                actions.push(Action::new(link_target(&tokens), "pool", vs, sl));
                tokens = Vec::new();
                continue;
            }
            if is_header(&tokens, "process") {
                let mut vs: Vec<String> = Vec::new();
                for (n, tok) in tokens.iter().enumerate() {
                    if *tok == Tok::LArrow {
                        vs.push(tokens[n - 1].text().unwrap_or_default().to_owned());
                        vs.push(tokens[n + 1].text().unwrap_or_default().to_owned());
                    }
                }
                actions.push(Action::new(link_target(&tokens), "process", vs, sl));
                tokens = Vec::new();
                continue;
            }
            // a standalone `left <- right` line declares an output flow for
            // the enclosing pool body; it is a no-op when executed
            if tokens.len() == 3 && tokens[1] == Tok::LArrow {
                let left = tokens[0].text().unwrap_or_default().to_owned();
                let right = tokens[2].text().unwrap_or_default().to_owned();
                actions.push(Action::new("", "<-", [left, right], sl));
                tokens = Vec::new();
                continue;
            }
            if paren_outer(&tokens).is_some() {
                let (start, end) = paren_outer(&tokens).expect("checked above");
                let inner = tokens[start + 1..end].to_vec();
                let name = self.reduce_to_name(&inner, &mut actions, sl);
                tokens.splice(start..=end, [Tok::Word(name)]);
                continue;
            }
            if tokens.len() > 1 && curly_outer(&tokens).is_some() {
                let (start, end) = curly_outer(&tokens).expect("checked above");
                let mut vs: Vec<String> = Vec::new();
                for arg in comma_args(&tokens[start + 1..end]) {
                    let Some(sep) = arg.iter().position(|t| *t == Tok::Colon) else {
                        continue;
                    };
                    let key = self.reduce_to_name(&arg[..sep], &mut actions, sl);
                    let val = self.reduce_to_name(&arg[sep + 1..], &mut actions, sl);
                    vs.push(key);
                    vs.push(val);
                }
                let name = self.temp();
                actions.push(Action::new(name.clone(), "pair", vs, sl));
                tokens.splice(start..=end, [Tok::Word(name)]);
                continue;
            }
            if tokens.len() > 1 && bracket_where(&tokens).is_some() {
                let (start, end) = bracket_where(&tokens).expect("checked above");
                // `<typename>.[...]` is a typed array literal; the type name
                // arrives as `name SUB` after the field rewrite
                let dtype = (start >= 2 && tokens[start - 1] == Tok::Dot)
                    .then(|| tokens[start - 2].text())
                    .flatten()
                    .and_then(|name| {
                        use std::str::FromStr;
                        crate::value::Kind::from_str(name).ok()
                    });
                let mut vs: Vec<String> = Vec::new();
                for arg in comma_args(&tokens[start + 1..end]) {
                    vs.push(self.reduce_to_name(&arg, &mut actions, sl));
                }
                let name = self.temp();
                if let Some(kind) = dtype {
                    let type_name = self.temp();
                    actions.push(Action::new(
                        type_name.clone(),
                        "const",
                        [format!("b.{}", kind as u8)],
                        sl,
                    ));
                    let mut args = vec![type_name];
                    args.extend(vs);
                    actions.push(Action::new(name.clone(), "array", args, sl));
                    tokens.splice(start - 2..=end, [Tok::Word(name)]);
                } else {
                    actions.push(Action::new(name.clone(), "list", vs, sl));
                    tokens.splice(start..=end, [Tok::Word(name)]);
                }
                continue;
            }
            if is_header(&tokens, "func") {
                let func_name = tokens[1].text().unwrap_or_default().to_owned();
                let mut func_args = vec![func_name];
                for arg in comma_args(&tokens[2..tokens.len() - 2]) {
                    if let Some(param) = arg.first().and_then(Tok::text) {
                        func_args.push(param.to_owned());
                    }
                }
                let target = link_target(&tokens);
                actions.push(Action::new(target.clone(), "func", func_args, sl));
                tokens = vec![Tok::Word(target)];
                continue;
            }
            if is_header(&tokens, "else") {
                actions.push(Action::new(link_target(&tokens), "else", [], sl));
                tokens = Vec::new();
                continue;
            }
            if !tokens.is_empty() && tokens[0].is_word("return") {
                let mut vs: Vec<String> = Vec::new();
                for arg in comma_args(&tokens[1..]) {
                    vs.push(self.reduce_to_name(&arg, &mut actions, sl));
                }
                let name = self.temp();
                actions.push(Action::new(name.clone(), "return", vs, sl));
                tokens = vec![Tok::Word(name)];
                continue;
            }
            if let Some(ind) = tokens.iter().rposition(|t| *t == Tok::Act) {
                let Some(callee) = tokens.get(ind + 1).and_then(Tok::text).map(ToOwned::to_owned) else {
                    break;
                };
                let mut vs: Vec<String> = Vec::new();
                for arg in comma_args(&tokens[ind + 2..]) {
                    vs.push(self.reduce_to_name(&arg, &mut actions, sl));
                }
                let name = self.temp();
                actions.push(Action::new(name.clone(), callee, vs, sl));
                tokens.truncate(ind);
                tokens.push(Tok::Word(name));
                continue;
            }
            if tokens.len() == 2
                && matches!(tokens[0], Tok::Word(_))
                && matches!(tokens[1], Tok::PlusPlus | Tok::MinusMinus)
            {
                let name = tokens[0].text().expect("word").to_owned();
                let op = if tokens[1] == Tok::PlusPlus { "++" } else { "--" };
                actions.push(Action::new(name.clone(), op, [name.clone()], sl));
                tokens = vec![Tok::Word(name)];
                continue;
            }
            if let Some(ind) = (0..=6u8)
                .find_map(|level| tokens.iter().position(|t| op_level(t) == Some(level)))
            {
                if ind == 0 || ind + 1 >= tokens.len() {
                    break;
                }
                let op = tokens[ind].binary_op().expect("leveled token is an operator");
                let operand = |compiler: &mut Self, tok: &Tok, actions: &mut Vec<Action>| match tok {
                    Tok::Word(w) => w.clone(),
                    other => {
                        let name = compiler.temp();
                        let payload = other.text().unwrap_or_default().to_owned();
                        actions.push(Action::new(name.clone(), "const", [payload], sl));
                        name
                    }
                };
                let left = tokens[ind - 1].clone();
                let right = tokens[ind + 1].clone();
                let v0 = operand(self, &left, &mut actions);
                let v1 = operand(self, &right, &mut actions);
                let name = self.temp();
                actions.push(Action::new(name.clone(), op, [v0, v1], sl));
                tokens.splice(ind - 1..=ind + 1, [Tok::Word(name)]);
                continue;
            }
            break;
        }

        if targets.is_empty() {
            return actions;
        }

        // nested assignment: any target containing an index chain compiles
        // to a `sub` action (container, value, index0, index1, ...)
        let mut deep = false;
        for group in &targets_tok {
            if !group.contains(&Tok::Sub) {
                continue;
            }
            let mut nest: Vec<Vec<Tok>> = Vec::new();
            let mut rest = group.clone();
            while let Some(split) = rest.iter().position(|t| *t == Tok::Sub) {
                nest.push(rest[..split].to_vec());
                rest = rest[split + 1..].to_vec();
            }
            nest.push(rest);
            let item = self.reduce_to_name(&tokens[..1.min(tokens.len())], &mut actions, sl);
            let container = nest[0]
                .first()
                .and_then(Tok::text)
                .unwrap_or_default()
                .to_owned();
            let mut ind_names = vec![container, item];
            for expr in &nest[1..] {
                ind_names.push(self.reduce_to_name(expr, &mut actions, sl));
            }
            actions.push(Action::new("", "sub", ind_names, sl));
            deep = true;
        }
        if deep {
            return actions;
        }

        let value_name = |compiler: &mut Self, actions: &mut Vec<Action>| -> String {
            if let Some(last) = actions.last() {
                last.target.clone()
            } else {
                match tokens.first() {
                    Some(Tok::Word(w)) => w.clone(),
                    Some(other) => {
                        let name = compiler.temp();
                        let payload = other.text().unwrap_or_default().to_owned();
                        actions.push(Action::new(name.clone(), "const", [payload], sl));
                        name
                    }
                    None => String::new(),
                }
            }
        };

        if targets.len() == 1 {
            let op = if rebind { "&=" } else { "=" };
            let source_name = value_name(self, &mut actions);
            actions.push(Action::new(targets[0].clone(), op, [source_name], sl));
        } else {
            // tuple destructuring: one integer-indexed read per target
            let iterable = value_name(self, &mut actions);
            for (n, target) in targets.iter().enumerate() {
                let index_name = self.temp();
                actions.push(Action::new(index_name.clone(), "const", [n.to_string()], sl));
                actions.push(Action::new(
                    target.clone(),
                    "'",
                    [iterable.clone(), index_name],
                    sl,
                ));
            }
        }
        actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lex::tokenize;

    fn compile_line(text: &str) -> Vec<Action> {
        let sl = Arc::new(SourceLine {
            text: text.to_owned(),
            number: 0,
        });
        LineCompiler::new().compile(tokenize(text), &sl)
    }

    fn shapes(actions: &[Action]) -> Vec<(String, String)> {
        actions
            .iter()
            .map(|a| (a.op.clone(), a.target.clone()))
            .collect()
    }

    #[test]
    fn simple_assignment() {
        let acts = compile_line("x = 3");
        assert_eq!(
            shapes(&acts),
            vec![
                ("const".to_owned(), "_temp_0".to_owned()),
                ("=".to_owned(), "x".to_owned()),
            ]
        );
        assert_eq!(acts[0].args[0], "3");
    }

    #[test]
    fn binary_reduction_is_left_associative() {
        let acts = compile_line("x = a - b + c");
        let ops: Vec<&str> = acts.iter().map(|a| a.op.as_str()).collect();
        assert_eq!(ops, vec!["-", "+", "="]);
        // the subtraction feeds the addition
        assert_eq!(acts[1].args[0], acts[0].target);
    }

    #[test]
    fn precedence_reduces_multiplication_first() {
        let acts = compile_line("x = a + b * c");
        let ops: Vec<&str> = acts.iter().map(|a| a.op.as_str()).collect();
        assert_eq!(ops, vec!["*", "+", "="]);
    }

    #[test]
    fn call_with_arguments() {
        let acts = compile_line("a = !len my_list, 11");
        let ops: Vec<&str> = acts.iter().map(|a| a.op.as_str()).collect();
        assert_eq!(ops, vec!["const", "len", "="]);
        assert_eq!(acts[1].args.to_vec(), vec!["my_list".to_owned(), "_temp_0".to_owned()]);
    }

    #[test]
    fn nested_calls_reduce_rightmost_first() {
        let acts = compile_line("!print !len l");
        let ops: Vec<&str> = acts.iter().map(|a| a.op.as_str()).collect();
        assert_eq!(ops, vec!["len", "print"]);
        assert_eq!(acts[1].args[0], acts[0].target);
    }

    #[test]
    fn compound_assignment_rewrites() {
        let acts = compile_line("a += 3");
        let ops: Vec<&str> = acts.iter().map(|a| a.op.as_str()).collect();
        assert_eq!(ops, vec!["const", "+", "="]);
        assert_eq!(acts[1].args[0], "a");
        assert_eq!(acts[2].target, "a");
    }

    #[test]
    fn list_literal() {
        let acts = compile_line("l = [3, 1, 2]");
        let ops: Vec<&str> = acts.iter().map(|a| a.op.as_str()).collect();
        assert_eq!(ops, vec!["const", "const", "const", "list", "="]);
        assert_eq!(acts[3].args.len(), 3);
    }

    #[test]
    fn typed_array_literal() {
        let acts = compile_line("a = int.[1, 2]");
        let array = acts.iter().find(|a| a.op == "array").expect("array action");
        // first argument selects the dtype via a byte constant
        let type_const = acts
            .iter()
            .find(|a| a.target == array.args[0])
            .expect("dtype const");
        assert_eq!(type_const.args[0], "b.1");
    }

    #[test]
    fn pair_literal() {
        let acts = compile_line("p = {\"_str_0\": 1}");
        let pair = acts.iter().find(|a| a.op == "pair").expect("pair action");
        assert_eq!(pair.args.len(), 2);
    }

    #[test]
    fn deep_assignment_compiles_to_sub() {
        let acts = compile_line("p'\"_str_0\" = 7");
        let sub = acts.iter().find(|a| a.op == "sub").expect("sub action");
        assert_eq!(sub.args[0], "p");
        assert_eq!(sub.args.len(), 3);
        assert!(sub.target.is_empty());
    }

    #[test]
    fn destructuring_emits_indexed_reads() {
        let acts = compile_line("a, b = l");
        let reads: Vec<&Action> = acts.iter().filter(|a| a.op == "'").collect();
        assert_eq!(reads.len(), 2);
        assert_eq!(reads[0].target, "a");
        assert_eq!(reads[1].target, "b");
    }

    #[test]
    fn postfix_increment() {
        let acts = compile_line("n++");
        assert_eq!(shapes(&acts), vec![("++".to_owned(), "n".to_owned())]);
    }

    #[test]
    fn shell_line_keeps_raw_text() {
        let sl = Arc::new(SourceLine {
            text: "$ls -la".to_owned(),
            number: 4,
        });
        let acts = LineCompiler::new().compile(vec![Tok::Doll], &sl);
        assert_eq!(acts.len(), 1);
        assert_eq!(acts[0].op, "$");
        assert_eq!(acts[0].source.text, "$ls -la");
    }

    #[test]
    fn shell_capture_line_targets_variable() {
        let acts = compile_line("out = $ date");
        assert_eq!(acts.len(), 1);
        assert_eq!(acts[0].op, "$$");
        assert_eq!(acts[0].target, "out");
    }

    #[test]
    fn header_compiles_condition_then_branch() {
        let sl = Arc::new(SourceLine {
            text: "if 1==2:".to_owned(),
            number: 0,
        });
        let mut toks = tokenize("if 1==2:");
        toks.push(Tok::Link("_node_0".to_owned()));
        let acts = LineCompiler::new().compile(toks, &sl);
        let ops: Vec<&str> = acts.iter().map(|a| a.op.as_str()).collect();
        assert_eq!(ops, vec!["const", "const", "==", "if"]);
        assert_eq!(acts.last().unwrap().target, "_node_0");
    }

    #[test]
    fn while_emits_start_marker_before_condition() {
        let sl = Arc::new(SourceLine {
            text: "while a < 3:".to_owned(),
            number: 0,
        });
        let mut toks = tokenize("while a < 3:");
        toks.push(Tok::Link("_node_1".to_owned()));
        let acts = LineCompiler::new().compile(toks, &sl);
        assert_eq!(acts[0].op, "while_start");
        assert_eq!(acts.last().unwrap().op, "while");
        assert_eq!(acts[0].target, acts.last().unwrap().target);
    }

    #[test]
    fn pool_header_splits_flows_at_sentinel() {
        let sl = Arc::new(SourceLine {
            text: "pool xs->x, ys<-y:".to_owned(),
            number: 0,
        });
        let mut toks = tokenize("pool xs->x, ys<-y:");
        toks.push(Tok::Link("_node_2".to_owned()));
        let acts = LineCompiler::new().compile(toks, &sl);
        assert_eq!(acts.len(), 1);
        assert_eq!(
            acts[0].args.to_vec(),
            vec!["xs".to_owned(), "x".to_owned(), "Nothing".to_owned(), "ys".to_owned(), "y".to_owned()]
        );
    }

    #[test]
    fn process_header_names_list_and_result() {
        let sl = Arc::new(SourceLine {
            text: "process results <- r:".to_owned(),
            number: 0,
        });
        let mut toks = tokenize("process results <- r:");
        toks.push(Tok::Link("_node_3".to_owned()));
        let acts = LineCompiler::new().compile(toks, &sl);
        assert_eq!(acts.len(), 1);
        assert_eq!(acts[0].op, "process");
        assert_eq!(acts[0].args.to_vec(), vec!["results".to_owned(), "r".to_owned()]);
    }

    #[test]
    fn func_header_collects_parameters() {
        let sl = Arc::new(SourceLine {
            text: "func add a, b:".to_owned(),
            number: 0,
        });
        let mut toks = tokenize("func add a, b:");
        toks.push(Tok::Link("_node_4".to_owned()));
        let acts = LineCompiler::new().compile(toks, &sl);
        assert_eq!(acts.len(), 1);
        assert_eq!(acts[0].op, "func");
        assert_eq!(
            acts[0].args.to_vec(),
            vec!["add".to_owned(), "a".to_owned(), "b".to_owned()]
        );
    }

    #[test]
    fn return_with_two_values() {
        let acts = compile_line("return a, 1");
        let ret = acts.iter().find(|a| a.op == "return").expect("return action");
        assert_eq!(ret.args.len(), 2);
    }
}
