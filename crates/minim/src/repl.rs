use crate::{
    error::RunError,
    interp::Machine,
    io::SharedPrint,
    value::Object,
};

/// Keyword prefixes that open an indented entry: a line mentioning one keeps
/// the REPL collecting continuation lines until a dedented, balanced line
/// arrives.
const BLOCK_KEYWORDS: &[&str] = &[
    "if ", "while ", "pool ", "else", "for ", "func ", "process ", "repeat ", "switch ", "case ", "error ",
];

/// Outcome of feeding one physical line to the session.
#[derive(Debug, PartialEq, Eq)]
pub enum Feed {
    /// Keep reading continuation lines.
    More,
    /// One or more complete sources are ready to execute.
    Ready(Vec<String>),
}

/// A persistent interactive session: one machine whose compiled blocks and
/// root-frame variables accumulate across entries.
///
/// Lines are aggregated until bracket and quote counts balance and
/// indentation returns to zero; completed entries compile into the session
/// machine and run, echoing the value of the last expression.
pub struct ReplSession {
    machine: Machine,
    buffer: Vec<String>,
    /// Whether the open entry was opened by a block keyword (closed by
    /// dedent) rather than by unbalanced brackets (closed by balance).
    block_entry: bool,
    brackets: i64,
    parens: i64,
    curlies: i64,
    quotes: u64,
}

impl ReplSession {
    pub fn new(out: SharedPrint) -> Result<Self, RunError> {
        Ok(Self {
            machine: Machine::with_print("", out)?,
            buffer: Vec::new(),
            block_entry: false,
            brackets: 0,
            parens: 0,
            curlies: 0,
            quotes: 0,
        })
    }

    pub fn machine_mut(&mut self) -> &mut Machine {
        &mut self.machine
    }

    fn count(&mut self, line: &str) {
        self.brackets += line.matches('[').count() as i64 - line.matches(']').count() as i64;
        self.parens += line.matches('(').count() as i64 - line.matches(')').count() as i64;
        self.curlies += line.matches('{').count() as i64 - line.matches('}').count() as i64;
        self.quotes += line.matches('"').count() as u64;
    }

    fn balanced(&self) -> bool {
        self.brackets <= 0 && self.parens <= 0 && self.curlies <= 0 && self.quotes % 2 == 0
    }

    fn reset_counts(&mut self) {
        self.brackets = 0;
        self.parens = 0;
        self.curlies = 0;
        self.quotes = 0;
    }

    fn opens_block(line: &str) -> bool {
        BLOCK_KEYWORDS.iter().any(|kw| line.contains(kw))
    }

    /// Feeds one physical line. Returns the completed sources once the
    /// entry closes: bracket continuations close as soon as counts balance,
    /// keyword blocks close on a dedented (or blank) balanced line, which
    /// then starts fresh on its own.
    pub fn feed(&mut self, line: &str) -> Feed {
        if self.buffer.is_empty() {
            self.count(line);
            if self.balanced() && !Self::opens_block(line) {
                self.reset_counts();
                if line.trim().is_empty() {
                    return Feed::Ready(Vec::new());
                }
                return Feed::Ready(vec![line.to_owned()]);
            }
            self.block_entry = Self::opens_block(line);
            self.buffer.push(line.to_owned());
            return Feed::More;
        }

        if self.block_entry {
            if line.starts_with(' ') || !self.balanced() {
                self.count(line);
                self.buffer.push(line.to_owned());
                return Feed::More;
            }
            // dedented and balanced: the entry is complete, and the new
            // line starts fresh
            let entry = self.buffer.join("\n");
            self.buffer.clear();
            self.reset_counts();
            self.block_entry = false;
            let mut ready = vec![entry];
            match self.feed(line) {
                Feed::Ready(more) => ready.extend(more),
                Feed::More => {}
            }
            return Feed::Ready(ready);
        }

        self.count(line);
        self.buffer.push(line.to_owned());
        if self.balanced() {
            let entry = self.buffer.join("\n");
            self.buffer.clear();
            self.reset_counts();
            return Feed::Ready(vec![entry]);
        }
        Feed::More
    }

    /// Compiles and runs one complete entry, returning the echo text for the
    /// last expression (if any).
    pub fn execute(&mut self, source: &str) -> Result<Option<String>, RunError> {
        self.machine.compile_more(source)?;
        let root = self.machine.code_root();
        let result = self.machine.run_block(&root);
        // a top-level `return` must not wedge the session
        self.machine.cur_mut().halt = false;
        result?;
        Ok(self.echo_for(&root))
    }

    /// Picks the value to echo: the target of the entry's last non-GC
    /// action, skipping statements that already produced output.
    fn echo_for(&self, root: &str) -> Option<String> {
        let actions = self.machine.code.blocks.get(root)?;
        let last = actions.iter().rev().find(|a| a.op != "GC")?;
        if matches!(last.op.as_str(), "print" | "out" | "source") {
            return None;
        }
        if last.target.is_empty() || self.machine.code.blocks.contains_key(&last.target) {
            return None;
        }
        let obj = self
            .machine
            .frames
            .first()?
            .store
            .extract_of(&last.target)
            .unwrap_or(Object::Noth);
        Some(obj.repr())
    }
}
