use std::{
    cmp::Ordering,
    str::FromStr,
    sync::{
        atomic::{AtomicU64, Ordering as AtomicOrdering},
        Arc, OnceLock,
    },
};

use ahash::AHashSet;
use bigdecimal::{BigDecimal, RoundingMode};
use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{FromPrimitive, Signed, ToPrimitive, Zero};
use regex::Regex;

use crate::{
    action::Action,
    builtins,
    compile::{compile, CodeMap},
    error::{ErrorKind, RunError, RunResult},
    io::{shared, SharedPrint, StdPrint},
    pool, process,
    process::PendingProcess,
    shell,
    store::Store,
    value::{Func, Kind, List, Object, Pair, Pointer, Value},
};

/// Interpreter ids are process-global so pointers can tell frames apart
/// across machines (pool workers, background processes). Id 0 is reserved
/// for the nil pointer.
static NEXT_INTERP_ID: AtomicU64 = AtomicU64::new(1);

fn next_interp_id() -> u64 {
    NEXT_INTERP_ID.fetch_add(1, AtomicOrdering::Relaxed)
}

/// Actions that introduce or capture names rather than reading them; the
/// evaluator skips the name-existence check for their arguments.
const PROTECTED_ACTIONS: &[&str] = &["for", "const", "pool", "error", "func", "process", "<-"];

/// One execution frame: a full interpreter with its own value store and a
/// process-unique id, chained to its caller through the machine's frame
/// stack for upward name resolution.
#[derive(Debug)]
pub(crate) struct Frame {
    pub id: u64,
    pub store: Store,
    /// Names copied down from an ancestor on first touch. Kept separate so
    /// `&=` and `id` can still locate the declared owner.
    pub imported: AHashSet<String>,
    pub halt: bool,
}

impl Frame {
    fn new() -> Self {
        let id = next_interp_id();
        Self {
            id,
            store: Store::new(id),
            imported: AHashSet::new(),
            halt: false,
        }
    }
}

/// A machine executes compiled blocks against a stack of frames.
///
/// Function calls push frames onto this stack; `pool` workers and `process`
/// children get machines of their own, seeded with a deep snapshot of the
/// parent's visible names.
pub struct Machine {
    pub(crate) code: CodeMap,
    pub(crate) frames: Vec<Frame>,
    pub(crate) out: SharedPrint,
    pub(crate) pending: Vec<PendingProcess>,
    pub(crate) node_counter: u64,
    pub(crate) safe_mode: bool,
    /// Non-zero while inside an `error` block; suppresses diagnostics.
    pub(crate) catch_depth: u32,
    pub(crate) host_args: Vec<String>,
}

impl Machine {
    /// Compiles `source` and prepares a machine printing to stdout.
    pub fn new(source: &str) -> Result<Self, RunError> {
        Self::with_print(source, shared(StdPrint))
    }

    /// Compiles `source` with a caller-supplied output writer.
    pub fn with_print(source: &str, out: SharedPrint) -> Result<Self, RunError> {
        let mut node_counter = 0;
        let code = compile(source, &mut node_counter)?;
        let mut machine = Self {
            code,
            frames: vec![Frame::new()],
            out,
            pending: Vec::new(),
            node_counter,
            safe_mode: false,
            catch_depth: 0,
            host_args: Vec::new(),
        };
        machine.seed_root();
        Ok(machine)
    }

    /// An empty machine used as the shell for worker snapshots.
    pub(crate) fn bare(out: SharedPrint) -> Self {
        Self {
            code: CodeMap::default(),
            frames: vec![Frame::new()],
            out,
            pending: Vec::new(),
            node_counter: 0,
            safe_mode: false,
            catch_depth: 0,
            host_args: Vec::new(),
        }
    }

    /// Installs the built-in function table and the `Nothing` sentinel into
    /// the root frame.
    fn seed_root(&mut self) {
        let store = &mut self.frames[0].store;
        for name in builtins::BUILTIN_NAMES {
            store.save(name, Value::Func(Func::builtin(name)));
        }
        store.save("Nothing", Value::Noth);
        store.last_live = store.slots.len();
    }

    pub fn set_safe_mode(&mut self, on: bool) {
        self.safe_mode = on;
    }

    pub fn set_host_args(&mut self, args: Vec<String>) {
        self.host_args = args;
    }

    /// Renders the compiled blocks (the `-debug` dump).
    #[must_use]
    pub fn dump_actions(&self) -> String {
        self.code.dump()
    }

    /// Deep-reads a variable visible from the current frame.
    #[must_use]
    pub fn var_object(&self, name: &str) -> Option<Object> {
        for frame in self.frames.iter().rev() {
            if let Some(obj) = frame.store.extract_of(name) {
                return Some(obj);
            }
        }
        None
    }

    /// Compiles more source into this machine; the new unit's root becomes
    /// the current root. Used by the REPL, the `source` built-in, and the
    /// embedding interface.
    pub fn compile_more(&mut self, source: &str) -> Result<(), RunError> {
        let unit = compile(source, &mut self.node_counter)?;
        self.code.absorb(unit);
        Ok(())
    }

    /// Runs the root block to completion, then waits for outstanding
    /// background processes and integrates their results.
    pub fn run(&mut self) -> Result<(), RunError> {
        let root = self.code.root.clone();
        let result = self.run_block(&root);
        process::reap(self, true);
        result
    }

    pub(crate) fn cur(&self) -> &Frame {
        self.frames.last().expect("at least the root frame")
    }

    pub(crate) fn cur_mut(&mut self) -> &mut Frame {
        self.frames.last_mut().expect("at least the root frame")
    }

    pub(crate) fn fail(&self, action: &Action, kind: ErrorKind, message: impl Into<String>) -> RunError {
        RunError::new(kind, message, action.op.clone(), Arc::clone(&action.source))
    }

    /// Validates argument count against an inclusive range; `max` of `None`
    /// means unbounded.
    pub(crate) fn check_argn(&self, action: &Action, min: usize, max: Option<usize>) -> RunResult<()> {
        let n = action.args.len();
        let ok = match max {
            Some(max) if min == max => n == min,
            Some(max) => n >= min && n <= max,
            None => n >= min,
        };
        if ok {
            Ok(())
        } else {
            let expected = match max {
                Some(max) if min == max => format!("expected {min}"),
                Some(max) => format!("expected between {min} and {max}"),
                None => format!("expected not less than {min}"),
            };
            Err(self.fail(
                action,
                ErrorKind::ArgCount,
                format!("{n} arguments were provided, {expected}!"),
            ))
        }
    }

    /// Validates that argument `index` has one of the allowed kinds.
    pub(crate) fn check_kind(&self, action: &Action, index: usize, allowed: &[Kind]) -> RunResult<()> {
        let name = &action.args[index];
        let kind = self.cur().store.kind_of(name).unwrap_or(Kind::Noth);
        if allowed.contains(&kind) {
            return Ok(());
        }
        let allowed_names: Vec<&str> = allowed.iter().map(|k| (*k).into()).collect();
        Err(self.fail(
            action,
            ErrorKind::ArgType,
            format!(
                "argument {index} ({name}) is {kind}, must be one of: [{allowed}]!",
                allowed = allowed_names.join(", ")
            ),
        ))
    }

    /// Shallow read of a name in the current frame. The existence check has
    /// already imported or rejected missing names.
    pub(crate) fn fetch(&self, action: &Action, name: &str) -> RunResult<Value> {
        self.cur()
            .store
            .value_of(name)
            .ok_or_else(|| self.fail(action, ErrorKind::Undeclared, format!("Undeclared variable: {name}")))
    }

    /// Deep read of a name in the current frame.
    pub(crate) fn fetch_obj(&self, action: &Action, name: &str) -> RunResult<Object> {
        self.cur()
            .store
            .extract_of(name)
            .ok_or_else(|| self.fail(action, ErrorKind::Undeclared, format!("Undeclared variable: {name}")))
    }

    pub(crate) fn save(&mut self, name: &str, value: Value) {
        self.cur_mut().store.save(name, value);
    }

    pub(crate) fn save_object(&mut self, name: &str, obj: &Object) {
        self.cur_mut().store.save_object(name, obj);
    }

    pub(crate) fn write_out(&self, text: &str) {
        self.out.lock().expect("print writer poisoned").write(text);
    }

    /// Renders a name visible from the current frame, for interpolation.
    pub(crate) fn lookup_render(&self, name: &str) -> Option<String> {
        for frame in self.frames.iter().rev() {
            if let Some(obj) = frame.store.extract_of(name) {
                return Some(obj.render());
            }
        }
        None
    }

    /// Makes `name` resolvable in the current frame, importing a deep copy
    /// from the nearest ancestor that declares it. Returns false when the
    /// name resolves nowhere.
    pub(crate) fn ensure_name(&mut self, name: &str) -> bool {
        if self.cur().store.names.contains_key(name) {
            return true;
        }
        let upper = self.frames.len().saturating_sub(1);
        for i in (0..upper).rev() {
            if let Some(obj) = self.frames[i].store.extract_of(name) {
                let cur = self.cur_mut();
                cur.store.save_object(name, &obj);
                cur.imported.insert(name.to_owned());
                return true;
            }
        }
        false
    }

    /// The frame that natively declares `name` (import caches skipped),
    /// falling back to any frame that has it at all.
    pub(crate) fn owner_frame(&self, name: &str) -> Option<usize> {
        let native = (0..self.frames.len())
            .rev()
            .find(|&i| self.frames[i].store.names.contains_key(name) && !self.frames[i].imported.contains(name));
        native.or_else(|| {
            (0..self.frames.len())
                .rev()
                .find(|&i| self.frames[i].store.names.contains_key(name))
        })
    }

    pub(crate) fn frame_by_interp(&self, interp: u64) -> Option<usize> {
        self.frames.iter().position(|f| f.id == interp)
    }

    pub(crate) fn frame_at(&self, idx: usize) -> &Frame {
        &self.frames[idx]
    }

    /// Writes a deep value through a slot of an arbitrary frame, rewriting
    /// the slot entry in place so the slot index stays valid for referers.
    pub(crate) fn write_through(&mut self, frame_idx: usize, addr: usize, obj: &Object) {
        let store = &mut self.frames[frame_idx].store;
        let value = store.value_from(obj);
        store.write_slot(addr, value);
    }

    pub(crate) fn code_root(&self) -> String {
        self.code.root.clone()
    }

    /// Builds a child machine seeded with a deep snapshot of every
    /// non-temporary name visible from the current frame (outer frames
    /// first, inner overriding). Used by pool workers and processes.
    pub(crate) fn snapshot_child(&self) -> Self {
        let mut child = Self::bare(Arc::clone(&self.out));
        child.code = self.code.clone();
        child.safe_mode = self.safe_mode;
        child.catch_depth = self.catch_depth;
        child.host_args = self.host_args.clone();
        for frame in &self.frames {
            let mut names: Vec<&String> = frame
                .store
                .names
                .keys()
                .filter(|n| !n.starts_with("_temp_"))
                .collect();
            names.sort();
            for name in names {
                if let Some(obj) = frame.store.extract_of(name) {
                    child.frames[0].store.save_object(name, &obj);
                }
            }
        }
        let store = &mut child.frames[0].store;
        store.last_live = store.slots.len();
        child
    }

    // ------------------------------------------------------------------
    // the core loop
    // ------------------------------------------------------------------

    /// Executes the named block on the current frame. Returns the error that
    /// halted execution, if any.
    pub(crate) fn run_block(&mut self, node: &str) -> RunResult<()> {
        let Some(actions) = self.code.blocks.get(node).map(Arc::clone) else {
            // a block name that never came out of the compiler
            return Ok(());
        };
        let mut focus = 0;
        while focus < actions.len() && !self.cur().halt {
            process::reap(self, false);
            let step_result = self
                .ensure_action_args(&actions[focus])
                .and_then(|()| self.step(node, &actions, focus));
            match step_result {
                Ok(next) => focus = next,
                Err(mut err) => match self.find_catcher(&actions, focus + 1, &err) {
                    Some(catch_idx) => {
                        self.capture_error(&actions[catch_idx], &err);
                        focus = catch_idx + 1;
                    }
                    None => {
                        if self.catch_depth == 0 && !err.reported {
                            eprintln!("{err}");
                            err.reported = true;
                        }
                        return Err(err);
                    }
                },
            }
        }
        Ok(())
    }

    /// The name-existence check: every argument must resolve in this frame
    /// or an ancestor (actions that introduce names are exempt). Resolved
    /// ancestors are imported into the local frame.
    fn ensure_action_args(&mut self, action: &Action) -> RunResult<()> {
        if PROTECTED_ACTIONS.contains(&action.op.as_str()) {
            return Ok(());
        }
        for arg in &action.args {
            if !self.ensure_name(arg) {
                return Err(self.fail(action, ErrorKind::Undeclared, format!("Undeclared variable: {arg}")));
            }
        }
        Ok(())
    }

    /// Scans forward for a call-form `error` action on the same source line
    /// as the failing action.
    fn find_catcher(&self, actions: &[Action], from: usize, err: &RunError) -> Option<usize> {
        (from..actions.len()).find(|&n| {
            let a = &actions[n];
            a.op == "error"
                && Arc::ptr_eq(&a.source, &err.source)
                && !self.code.blocks.contains_key(&a.target)
        })
    }

    /// Builds the `{line, source, action, type, message}` descriptor pair.
    fn error_descriptor(err: &RunError) -> Object {
        Object::Pair(vec![
            ("str:line".to_owned(), Object::Int(BigInt::from(err.line()))),
            ("str:source".to_owned(), Object::Str(err.source.text.clone())),
            ("str:action".to_owned(), Object::Str(err.action.clone())),
            ("str:type".to_owned(), Object::Str(err.kind.to_string())),
            ("str:message".to_owned(), Object::Str(err.message.clone())),
        ])
    }

    /// Fills a call-form `error` catcher: the last argument receives the
    /// descriptor pair and the target is set to true.
    fn capture_error(&mut self, catcher: &Action, err: &RunError) {
        if let Some(capture) = catcher.args.last() {
            let desc = Self::error_descriptor(err);
            self.save_object(&capture.clone(), &desc);
        }
        if !catcher.target.is_empty() {
            self.save(&catcher.target.clone(), Value::Bool(true));
        }
    }

    /// Executes one action and returns the next instruction offset.
    #[expect(clippy::too_many_lines, reason = "one arm per reserved operation")]
    fn step(&mut self, node: &str, actions: &Arc<Vec<Action>>, focus: usize) -> RunResult<usize> {
        let action = actions[focus].clone();
        match action.op.as_str() {
            "const" => {
                self.check_argn(&action, 1, Some(1))?;
                let value = parse_const(&action.args[0]);
                self.save(&action.target, value);
            }
            "=" => {
                self.check_argn(&action, 1, Some(1))?;
                let value = self.fetch(&action, &action.args[0])?;
                self.save(&action.target, value);
            }
            "&=" => self.rebind(&action)?,
            "+" | "-" | "*" | "/" | "//" | "%" | "^" => self.arith(&action)?,
            "==" | "!=" | "<" | ">" => self.compare(&action)?,
            "and" | "or" => self.logic(&action)?,
            "not" => {
                self.check_argn(&action, 2, Some(2))?;
                self.check_kind(&action, 1, &[Kind::Bool])?;
                let Value::Bool(b) = self.fetch(&action, &action.args[1])? else {
                    unreachable!()
                };
                self.save(&action.target, Value::Bool(!b));
            }
            "'" => self.index_read(&action)?,
            "''" => self.index_lvalue(&action)?,
            "sub" => self.nested_assign(&action)?,
            "deep" => {
                self.check_argn(&action, 2, Some(2))?;
                let value = self.fetch(&action, &action.args[1])?;
                self.save(&action.args[0].clone(), value);
            }
            // container literals share the built-in construction paths
            "pair" | "list" | "array" => builtins::dispatch(self, &action.op.clone(), &action)?,
            "++" | "--" => {
                self.check_argn(&action, 1, Some(1))?;
                self.check_kind(&action, 0, &[Kind::Int])?;
                let Value::Int(i) = self.fetch(&action, &action.args[0])? else {
                    unreachable!()
                };
                let delta = if action.op == "++" { 1 } else { -1 };
                self.save(&action.target, Value::Int(i + delta));
            }
            "if" => {
                self.check_argn(&action, 1, Some(1))?;
                self.check_kind(&action, 0, &[Kind::Bool])?;
                let Value::Bool(cond) = self.fetch(&action, &action.args[0])? else {
                    unreachable!()
                };
                let has_else = focus + 2 < actions.len() && actions[focus + 2].op == "else";
                if cond {
                    self.run_block(&action.target)?;
                    return Ok(if has_else { focus + 3 } else { focus + 1 });
                }
                if has_else {
                    let else_target = actions[focus + 2].target.clone();
                    self.run_block(&else_target)?;
                    return Ok(focus + 3);
                }
            }
            "while" => {
                self.check_argn(&action, 1, Some(1))?;
                self.check_kind(&action, 0, &[Kind::Bool])?;
                let Value::Bool(cond) = self.fetch(&action, &action.args[0])? else {
                    unreachable!()
                };
                if cond {
                    self.run_block(&action.target)?;
                    // rewind to the matching start marker; its condition
                    // actions re-execute on the way back down
                    let start = (0..focus)
                        .rev()
                        .find(|&n| actions[n].op == "while_start")
                        .unwrap_or(focus);
                    return Ok(start + 1);
                }
                if focus + 2 < actions.len() && actions[focus + 2].op == "else" {
                    let else_target = actions[focus + 2].target.clone();
                    self.run_block(&else_target)?;
                    return Ok(focus + 3);
                }
            }
            // flow declarations are read by the pool setup, not executed
            "while_start" | "else" | "<-" => {}
            "switch" => {
                self.check_argn(&action, 1, Some(1))?;
                let value = self.fetch(&action, &action.args[0])?;
                let case_name = format!("_case{}", action.target);
                self.save(&case_name, value);
                self.run_block(&action.target)?;
                self.cur_mut().store.remove_name(&case_name);
            }
            "case" => {
                self.check_argn(&action, 1, Some(1))?;
                let case_name = format!("_case{node}");
                if !self.ensure_name(&case_name) {
                    return Err(self.fail(&action, ErrorKind::Undeclared, "case outside of a switch block"));
                }
                let probe = self.fetch_obj(&action, &action.args[0])?;
                let subject = self.fetch_obj(&action, &case_name)?;
                if objects_equal(&probe, &subject) {
                    self.run_block(&action.target)?;
                    // first matching case wins; skip the rest of the body
                    return Ok(actions.len());
                }
            }
            "for" => self.run_for(&action)?,
            "repeat" => {
                self.check_argn(&action, 1, Some(1))?;
                self.check_kind(&action, 0, &[Kind::Int])?;
                let Value::Int(times) = self.fetch(&action, &action.args[0])? else {
                    unreachable!()
                };
                let times = times.to_u64().unwrap_or(0);
                for _ in 0..times {
                    if self.cur().halt {
                        break;
                    }
                    self.run_block(&action.target)?;
                }
            }
            "func" => {
                self.check_argn(&action, 1, None)?;
                let func = Func {
                    name: action.args[0].clone(),
                    node: action.target.clone(),
                    params: action.args[1..].to_vec(),
                };
                self.save(&action.args[0].clone(), Value::Func(func));
            }
            "return" => {
                if action.args.len() == 1 {
                    let value = self.fetch(&action, &action.args[0])?;
                    self.save("_return_", value);
                } else if action.args.len() > 1 {
                    let mut list = List::default();
                    for arg in &action.args {
                        let value = self.fetch(&action, arg)?;
                        let frame_id = self.cur().id;
                        let slot = self.cur_mut().store.alloc(value);
                        list.ids.push(Pointer::new(slot, frame_id));
                    }
                    self.save("_return_", Value::List(list));
                }
                self.cur_mut().halt = true;
            }
            "error" => self.run_error(&action)?,
            "$" | "$$" => self.run_shell(&action)?,
            "GC" => self.cur_mut().store.gc_tick(),
            "pool" => pool::run_pool(self, &action)?,
            "process" => process::spawn(self, &action)?,
            _ => self.dispatch_call(&action)?,
        }
        Ok(focus + 1)
    }

    /// `x &= v`: writes through to the nearest ancestor frame that natively
    /// declares `x`, invalidating any local cached copy; with no declared
    /// owner the write lands locally.
    fn rebind(&mut self, action: &Action) -> RunResult<()> {
        self.check_argn(action, 1, Some(1))?;
        let value = self.fetch_obj(action, &action.args[0])?;
        let target = action.target.clone();
        let cur_idx = self.frames.len() - 1;
        match self.owner_frame(&target) {
            Some(owner) if owner != cur_idx => {
                self.frames[owner].store.save_object(&target, &value);
                if self.frames[cur_idx].imported.remove(&target) {
                    self.frames[cur_idx].store.remove_name(&target);
                }
            }
            _ => self.save_object(&target, &value),
        }
        Ok(())
    }

    fn arith(&mut self, action: &Action) -> RunResult<()> {
        self.check_argn(action, 2, Some(2))?;
        let a = self.fetch(action, &action.args[0])?;
        let b = self.fetch(action, &action.args[1])?;
        let (a, b) = equalize(a, b);
        let op = action.op.as_str();
        let result = match (a, b) {
            (Value::Int(a), Value::Int(b)) => int_arith(self, action, op, &a, &b)?,
            (Value::Float(a), Value::Float(b)) => float_arith(self, action, op, &a, &b)?,
            (Value::Byte(a), Value::Byte(b)) => byte_arith(self, action, op, a, b)?,
            (Value::Str(a), Value::Str(b)) => {
                if op == "+" {
                    Value::Str(a + &b)
                } else {
                    return Err(self.fail(action, ErrorKind::ArgType, format!("operator {op} does not apply to str")));
                }
            }
            (a, b) => {
                return Err(self.fail(
                    action,
                    ErrorKind::ArgType,
                    format!(
                        "operator {op} does not apply to {lhs} and {rhs}",
                        lhs = a.kind(),
                        rhs = b.kind()
                    ),
                ));
            }
        };
        self.save(&action.target, result);
        Ok(())
    }

    fn compare(&mut self, action: &Action) -> RunResult<()> {
        self.check_argn(action, 2, Some(2))?;
        let op = action.op.as_str();
        let lhs_kind = self.cur().store.kind_of(&action.args[0]).unwrap_or(Kind::Noth);
        let rhs_kind = self.cur().store.kind_of(&action.args[1]).unwrap_or(Kind::Noth);
        if matches!(lhs_kind, Kind::List | Kind::Pair) || matches!(rhs_kind, Kind::List | Kind::Pair) {
            if op == "<" || op == ">" {
                return Err(self.fail(action, ErrorKind::ArgType, format!("operator {op} does not apply to {lhs_kind}")));
            }
            let a = self.fetch_obj(action, &action.args[0])?;
            let b = self.fetch_obj(action, &action.args[1])?;
            let eq = objects_equal(&a, &b);
            self.save(&action.target, Value::Bool(if op == "==" { eq } else { !eq }));
            return Ok(());
        }
        let a = self.fetch(action, &action.args[0])?;
        let b = self.fetch(action, &action.args[1])?;
        let (a, b) = equalize(a, b);
        let result = match (&a, &b) {
            (Value::Int(x), Value::Int(y)) => ordered(op, x.cmp(y)),
            (Value::Float(x), Value::Float(y)) => ordered(op, x.cmp(y)),
            (Value::Byte(x), Value::Byte(y)) => ordered(op, x.cmp(y)),
            (Value::Str(x), Value::Str(y)) if op == "==" || op == "!=" => Some((x == y) == (op == "==")),
            (Value::Bool(x), Value::Bool(y)) if op == "==" || op == "!=" => Some((x == y) == (op == "==")),
            _ => match op {
                // kinds that cannot be equalised are simply unequal
                "==" => Some(false),
                "!=" => Some(true),
                _ => None,
            },
        };
        match result {
            Some(b) => {
                self.save(&action.target, Value::Bool(b));
                Ok(())
            }
            None => Err(self.fail(
                action,
                ErrorKind::ArgType,
                format!("operator {op} does not apply to {kind}", kind = a.kind()),
            )),
        }
    }

    fn logic(&mut self, action: &Action) -> RunResult<()> {
        self.check_argn(action, 2, Some(2))?;
        self.check_kind(action, 0, &[Kind::Bool])?;
        self.check_kind(action, 1, &[Kind::Bool])?;
        let Value::Bool(a) = self.fetch(action, &action.args[0])? else {
            unreachable!()
        };
        let Value::Bool(b) = self.fetch(action, &action.args[1])? else {
            unreachable!()
        };
        let result = if action.op == "and" { a && b } else { a || b };
        self.save(&action.target, Value::Bool(result));
        Ok(())
    }

    /// `'`: index read. Strings index by rune, lists by position (or by a
    /// list of positions, gathering a sub-list), pairs by encoded key.
    fn index_read(&mut self, action: &Action) -> RunResult<()> {
        self.check_argn(action, 2, Some(2))?;
        let container = self.fetch(action, &action.args[0])?;
        match container {
            Value::Str(s) => {
                let index = self.index_int(action, 1)?;
                let chars: Vec<char> = s.chars().collect();
                let idx = wrap_index(index, chars.len())
                    .ok_or_else(|| self.fail(action, ErrorKind::Index, format!("string index out of range: {index}")))?;
                self.save(&action.target, Value::Str(chars[idx].to_string()));
            }
            Value::List(list) => {
                if self.cur().store.kind_of(&action.args[1]) == Some(Kind::List) {
                    // gather: a list index produces a sub-list
                    let Value::List(indices) = self.fetch(action, &action.args[1])? else {
                        unreachable!()
                    };
                    let mut gathered = List::default();
                    for ptr in &indices.ids {
                        let idx_obj = self.element_object(action, *ptr)?;
                        let Object::Int(i) = idx_obj else {
                            return Err(self.fail(action, ErrorKind::ArgType, "list index lists must hold ints"));
                        };
                        let i = i.to_i64().unwrap_or(i64::MAX);
                        let idx = wrap_index(i, list.ids.len())
                            .ok_or_else(|| self.fail(action, ErrorKind::Index, format!("list index out of range: {i}")))?;
                        gathered.ids.push(list.ids[idx]);
                    }
                    self.save(&action.target, Value::List(gathered));
                } else {
                    let index = self.index_int(action, 1)?;
                    let idx = wrap_index(index, list.ids.len())
                        .ok_or_else(|| self.fail(action, ErrorKind::Index, format!("list index out of range: {index}")))?;
                    let value = self.element_value(action, list.ids[idx])?;
                    self.save(&action.target, value);
                }
            }
            Value::Pair(pair) => {
                let key = self.fetch_obj(action, &action.args[1])?.encode_key();
                let Some(ptr) = pair.ids.get(&key).copied() else {
                    return Err(self.fail(action, ErrorKind::Index, format!("missing pair key: {key}")));
                };
                let value = self.element_value(action, ptr)?;
                self.save(&action.target, value);
            }
            other => {
                return Err(self.fail(
                    action,
                    ErrorKind::ArgType,
                    format!("cannot index into {kind}", kind = other.kind()),
                ));
            }
        }
        Ok(())
    }

    /// `''`: rebinds the destination name directly to the container's
    /// element slot; later writes through that name mutate in place.
    fn index_lvalue(&mut self, action: &Action) -> RunResult<()> {
        self.check_argn(action, 2, Some(2))?;
        let container = self.fetch(action, &action.args[0])?;
        let ptr = match container {
            Value::List(list) => {
                let index = self.index_int(action, 1)?;
                let idx = wrap_index(index, list.ids.len())
                    .ok_or_else(|| self.fail(action, ErrorKind::Index, format!("list index out of range: {index}")))?;
                list.ids[idx]
            }
            Value::Pair(pair) => {
                let key = self.fetch_obj(action, &action.args[1])?.encode_key();
                pair.ids
                    .get(&key)
                    .copied()
                    .ok_or_else(|| self.fail(action, ErrorKind::Index, format!("missing pair key: {key}")))?
            }
            other => {
                return Err(self.fail(
                    action,
                    ErrorKind::ArgType,
                    format!("cannot take an element reference into {kind}", kind = other.kind()),
                ));
            }
        };
        if ptr.interp != self.cur().id {
            return Err(self.fail(action, ErrorKind::Id, "element belongs to another interpreter"));
        }
        let target = action.target.clone();
        self.cur_mut().store.names.insert(target, ptr.addr);
        Ok(())
    }

    /// `sub`: recursive nested assignment through a chain of indices.
    fn nested_assign(&mut self, action: &Action) -> RunResult<()> {
        self.check_argn(action, 3, None)?;
        let container = &action.args[0];
        if !self.ensure_name(container) {
            return Err(self.fail(action, ErrorKind::Undeclared, format!("Undeclared variable: {container}")));
        }
        let value = self.fetch(action, &action.args[1])?;
        let mut slot = self
            .cur()
            .store
            .slot_of(container)
            .expect("ensured above");
        let indices = &action.args[2..];
        for (n, index_name) in indices.iter().enumerate() {
            let last = n + 1 == indices.len();
            let holder = self.cur().store.value_at(slot);
            match holder {
                Value::List(list) => {
                    let index_value = self.fetch(action, index_name)?;
                    let Value::Int(i) = index_value else {
                        return Err(self.fail(action, ErrorKind::ArgType, "list indices must be ints"));
                    };
                    let i = i.to_i64().unwrap_or(i64::MAX);
                    let idx = wrap_index(i, list.ids.len())
                        .ok_or_else(|| self.fail(action, ErrorKind::Index, format!("list index out of range: {i}")))?;
                    let ptr = list.ids[idx];
                    if ptr.interp != self.cur().id {
                        return Err(self.fail(action, ErrorKind::Id, "element belongs to another interpreter"));
                    }
                    if last {
                        self.cur_mut().store.write_slot(ptr.addr, value.clone());
                        return Ok(());
                    }
                    slot = ptr.addr;
                }
                Value::Pair(mut pair) => {
                    let key = self.fetch_obj(action, index_name)?.encode_key();
                    match pair.ids.get(&key).copied() {
                        Some(ptr) => {
                            if ptr.interp != self.cur().id {
                                return Err(self.fail(action, ErrorKind::Id, "element belongs to another interpreter"));
                            }
                            if last {
                                self.cur_mut().store.write_slot(ptr.addr, value.clone());
                                return Ok(());
                            }
                            slot = ptr.addr;
                        }
                        None => {
                            // missing pair keys are created on the way down
                            let frame_id = self.cur().id;
                            let fresh = if last {
                                self.cur_mut().store.alloc(value.clone())
                            } else {
                                self.cur_mut().store.alloc(Value::Pair(Pair::default()))
                            };
                            pair.ids.insert(key, Pointer::new(fresh, frame_id));
                            self.cur_mut().store.write_slot(slot, Value::Pair(pair));
                            if last {
                                return Ok(());
                            }
                            slot = fresh;
                        }
                    }
                }
                other => {
                    return Err(self.fail(
                        action,
                        ErrorKind::ArgType,
                        format!("cannot assign into {kind}", kind = other.kind()),
                    ));
                }
            }
        }
        Ok(())
    }

    /// `for`: lockstep iteration over one or more sequences, each privately
    /// copied first so body mutation cannot derange iteration.
    fn run_for(&mut self, action: &Action) -> RunResult<()> {
        let mut sources: Vec<String> = Vec::new();
        let mut binds: Vec<String> = Vec::new();
        let mut length: Option<usize> = None;
        for chunk in action.args.chunks(2) {
            if chunk.len() < 2 {
                break;
            }
            let (src, bind) = (&chunk[0], &chunk[1]);
            if !self.ensure_name(src) {
                return Err(self.fail(action, ErrorKind::Undeclared, format!("Undeclared variable: {src}")));
            }
            let value = self.fetch(action, src)?;
            let len = match &value {
                Value::Span(span) => span.length,
                Value::Str(s) => s.chars().count(),
                Value::List(list) => list.ids.len(),
                other => {
                    return Err(self.fail(
                        action,
                        ErrorKind::ArgType,
                        format!("cannot iterate over {kind}", kind = other.kind()),
                    ));
                }
            };
            length = Some(length.map_or(len, |l| l.min(len)));
            let copy_name = format!("_for{target}_{src}", target = action.target);
            self.save(&copy_name, value);
            sources.push(copy_name);
            binds.push(bind.clone());
        }
        let length = length.unwrap_or(0);
        for idx in 0..length {
            if self.cur().halt {
                break;
            }
            for (src, bind) in sources.iter().zip(&binds) {
                let value = self.fetch(action, src)?;
                let element = match value {
                    Value::Span(span) => self
                        .cur()
                        .store
                        .arena_scalar(span.dtype, span.start + idx)
                        .unwrap_or(Value::Noth),
                    Value::Str(s) => Value::Str(s.chars().nth(idx).map(String::from).unwrap_or_default()),
                    Value::List(list) => self.element_value(action, list.ids[idx])?,
                    _ => Value::Noth,
                };
                self.save(bind, element);
            }
            self.run_block(&action.target)?;
        }
        for src in &sources {
            self.cur_mut().store.remove_name(src);
        }
        Ok(())
    }

    /// `error`: the try construct. Block form runs the linked child block
    /// with suppression; call form only reports "no error" (errors on the
    /// same line jump into it through the catcher scan instead).
    fn run_error(&mut self, action: &Action) -> RunResult<()> {
        if self.code.blocks.contains_key(&action.target) {
            self.catch_depth += 1;
            let result = self.run_block(&action.target.clone());
            self.catch_depth -= 1;
            match result {
                Ok(()) => match action.args.len() {
                    0 => {}
                    1 => self.save(&action.args[0].clone(), Value::Bool(false)),
                    _ => {
                        self.save(&action.args[0].clone(), Value::Bool(false));
                        self.save(&action.args[1].clone(), Value::Noth);
                    }
                },
                Err(err) => match action.args.len() {
                    0 => {}
                    1 => self.save(&action.args[0].clone(), Value::Bool(true)),
                    _ => {
                        self.save(&action.args[0].clone(), Value::Bool(true));
                        let desc = Self::error_descriptor(&err);
                        self.save_object(&action.args[1].clone(), &desc);
                    }
                },
            }
            return Ok(());
        }
        // call form, reached without a runtime error on this line
        if let Some(capture) = action.args.last() {
            self.save(&capture.clone(), Value::Bool(false));
        }
        if !action.target.is_empty() {
            self.save(&action.target.clone(), Value::Bool(false));
        }
        Ok(())
    }

    /// `$` / `$$`: interpolates and word-splits the raw shell text of the
    /// source line, then runs it, optionally capturing combined output.
    fn run_shell(&mut self, action: &Action) -> RunResult<()> {
        if self.safe_mode {
            return Err(self.fail(action, ErrorKind::Permission, "shell commands are disabled in safe mode"));
        }
        let raw = action
            .source
            .text
            .split_once('$')
            .map(|(_, rest)| rest.trim().to_owned())
            .unwrap_or_default();
        if raw.is_empty() {
            return Err(self.fail(action, ErrorKind::Sys, "empty shell command"));
        }
        let interpolated = shell::interpolate(&raw, |name| self.lookup_render(name));
        let words = shell::split_words(&interpolated);
        let capture = action.op == "$$";
        match shell::execute(&words, capture) {
            Ok(Some(output)) => {
                self.save(&action.target, Value::Str(output));
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(message) => Err(self.fail(action, ErrorKind::Sys, format!("Error executing command: {message}"))),
        }
    }

    /// Dispatches a call action: builtin functions by name, user functions
    /// by descending into their body block on a fresh frame.
    fn dispatch_call(&mut self, action: &Action) -> RunResult<()> {
        let callee = action.op.clone();
        if !self.ensure_name(&callee) {
            return Err(self.fail(action, ErrorKind::Undeclared, format!("Undeclared function: {callee}")));
        }
        let Some(Value::Func(func)) = self.cur().store.value_of(&callee) else {
            return Err(self.fail(action, ErrorKind::Undeclared, format!("{callee} is not a function")));
        };
        // a failed call leaves the destination defined-but-valueless
        if !action.target.is_empty() {
            self.save(&action.target, Value::Noth);
        }
        if func.is_builtin() {
            return builtins::dispatch(self, &func.name, action);
        }
        self.call_user(action, &func)
    }

    /// Calls a user function: arguments deep-copy into a fresh frame (a
    /// variadic tail gathers extras into a list bound to the last
    /// parameter), the body runs, and list/pair results deep-copy back.
    fn call_user(&mut self, action: &Action, func: &Func) -> RunResult<()> {
        if action.args.len() < func.params.len() {
            return Err(self.fail(
                action,
                ErrorKind::ArgCount,
                format!(
                    "{n} arguments were provided, expected {m}!",
                    n = action.args.len(),
                    m = func.params.len()
                ),
            ));
        }
        let mut bound: Vec<(String, Object)> = Vec::with_capacity(func.params.len());
        if func.params.is_empty() && !action.args.is_empty() {
            return Err(self.fail(
                action,
                ErrorKind::ArgCount,
                format!("{n} arguments were provided, expected 0!", n = action.args.len()),
            ));
        }
        for (n, param) in func.params.iter().enumerate() {
            let last = n + 1 == func.params.len();
            if last && action.args.len() > func.params.len() {
                // variadic tail
                let mut extras = Vec::new();
                for arg in &action.args[n..] {
                    extras.push(self.fetch_obj(action, arg)?);
                }
                bound.push((param.clone(), Object::List(extras)));
            } else {
                bound.push((param.clone(), self.fetch_obj(action, &action.args[n])?));
            }
        }

        let mut frame = Frame::new();
        for (param, obj) in &bound {
            frame.store.save_object(param, obj);
        }
        frame.store.last_live = frame.store.slots.len();
        self.frames.push(frame);
        let result = self.run_block(&func.node);
        let callee = self.frames.pop().expect("callee frame");
        result?;
        let returned = callee.store.extract_of("_return_").unwrap_or(Object::Noth);
        if !action.target.is_empty() {
            self.save_object(&action.target.clone(), &returned);
        }
        Ok(())
    }

    // helpers -----------------------------------------------------------

    /// Reads an integer index argument as i64.
    fn index_int(&self, action: &Action, arg: usize) -> RunResult<i64> {
        match self.fetch(action, &action.args[arg])? {
            Value::Int(i) => Ok(i.to_i64().unwrap_or(i64::MAX)),
            other => Err(self.fail(
                action,
                ErrorKind::ArgType,
                format!("index must be int, got {kind}", kind = other.kind()),
            )),
        }
    }

    /// Shallow element read through a local pointer.
    fn element_value(&self, action: &Action, ptr: Pointer) -> RunResult<Value> {
        if ptr.interp != self.cur().id || ptr.addr >= self.cur().store.slots.len() {
            return Err(self.fail(action, ErrorKind::Id, "element belongs to another interpreter"));
        }
        Ok(self.cur().store.value_at(ptr.addr))
    }

    /// Deep element read through a local pointer.
    fn element_object(&self, action: &Action, ptr: Pointer) -> RunResult<Object> {
        if ptr.interp != self.cur().id || ptr.addr >= self.cur().store.slots.len() {
            return Err(self.fail(action, ErrorKind::Id, "element belongs to another interpreter"));
        }
        Ok(self.cur().store.extract(ptr.addr))
    }
}

/// Widens a mixed numeric pair: int meets float as float, byte meets int or
/// float as the wider kind. Everything else passes through unchanged.
pub(crate) fn equalize(a: Value, b: Value) -> (Value, Value) {
    match (a.kind(), b.kind()) {
        (Kind::Int | Kind::Byte, Kind::Float) => (widen_to_float(a), b),
        (Kind::Float, Kind::Int | Kind::Byte) => (a, widen_to_float(b)),
        (Kind::Byte, Kind::Int) => (widen_to_int(a), b),
        (Kind::Int, Kind::Byte) => (a, widen_to_int(b)),
        _ => (a, b),
    }
}

fn widen_to_float(v: Value) -> Value {
    match v {
        Value::Int(x) => Value::Float(BigDecimal::from(x)),
        Value::Byte(x) => Value::Float(BigDecimal::from(u32::from(x))),
        other => other,
    }
}

fn widen_to_int(v: Value) -> Value {
    match v {
        Value::Byte(x) => Value::Int(BigInt::from(x)),
        other => other,
    }
}

fn int_to_float(x: &BigInt) -> BigDecimal {
    BigDecimal::from(x.clone())
}

fn ordered(op: &str, ordering: Ordering) -> Option<bool> {
    Some(match op {
        "==" => ordering == Ordering::Equal,
        "!=" => ordering != Ordering::Equal,
        "<" => ordering == Ordering::Less,
        ">" => ordering == Ordering::Greater,
        _ => return None,
    })
}

/// Deep structural equality with numeric equalisation at the scalar level.
pub(crate) fn objects_equal(a: &Object, b: &Object) -> bool {
    match (a, b) {
        (Object::Int(x), Object::Float(y)) | (Object::Float(y), Object::Int(x)) => int_to_float(x) == *y,
        (Object::Byte(x), Object::Int(y)) | (Object::Int(y), Object::Byte(x)) => BigInt::from(*x) == *y,
        (Object::List(xs), Object::List(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| objects_equal(x, y))
        }
        (Object::Pair(xs), Object::Pair(ys)) => {
            xs.len() == ys.len()
                && xs.iter().all(|(key, x)| {
                    ys.iter()
                        .find(|(other, _)| other == key)
                        .is_some_and(|(_, y)| objects_equal(x, y))
                })
        }
        _ => a == b,
    }
}

/// Applies negative wraparound and bounds-checks an index.
fn wrap_index(index: i64, len: usize) -> Option<usize> {
    let len_i = i64::try_from(len).ok()?;
    let wrapped = if index < 0 { index + len_i } else { index };
    (0..len_i).contains(&wrapped).then(|| wrapped as usize)
}

fn const_int_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new("^-?[0-9]+$").expect("int regex is valid"))
}

fn const_float_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^-?[0-9]+\.[0-9]+$").expect("float regex is valid"))
}

fn const_byte_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^-?b\.[0-9]+$").expect("byte regex is valid"))
}

/// Parses a `const` action payload: int, float, byte, bool, otherwise the
/// text between the surrounding quotes.
pub(crate) fn parse_const(payload: &str) -> Value {
    if const_float_regex().is_match(payload) {
        return BigDecimal::from_str(payload).map_or(Value::Noth, Value::Float);
    }
    if const_byte_regex().is_match(payload) {
        let digits = payload.trim_start_matches('-').trim_start_matches("b.");
        let n = digits.parse::<u64>().unwrap_or(0);
        return Value::Byte((n % 256) as u8);
    }
    if const_int_regex().is_match(payload) {
        return BigInt::from_str(payload).map_or(Value::Noth, Value::Int);
    }
    if payload == "true" || payload == "false" {
        return Value::Bool(payload == "true");
    }
    if payload.len() >= 2 && payload.starts_with('"') && payload.ends_with('"') {
        return Value::Str(payload[1..payload.len() - 1].to_owned());
    }
    Value::Str(payload.to_owned())
}

fn int_arith(m: &Machine, action: &Action, op: &str, a: &BigInt, b: &BigInt) -> RunResult<Value> {
    Ok(match op {
        "+" => Value::Int(a + b),
        "-" => Value::Int(a - b),
        "*" => Value::Int(a * b),
        "/" => {
            if b.is_zero() {
                return Err(m.fail(action, ErrorKind::ZeroDivision, "division by zero"));
            }
            Value::Float(int_to_float(a) / int_to_float(b))
        }
        "//" => {
            if b.is_zero() {
                return Err(m.fail(action, ErrorKind::ZeroDivision, "division by zero"));
            }
            Value::Int(a.div_floor(b))
        }
        "%" => {
            if b.is_zero() {
                return Err(m.fail(action, ErrorKind::ZeroDivision, "division by zero"));
            }
            Value::Int(a.mod_floor(b))
        }
        "^" => match (b.is_negative(), b.to_u32()) {
            (false, Some(exp)) => Value::Int(num_traits::pow::pow(a.clone(), exp as usize)),
            _ => {
                // negative or oversized exponents widen to the float path
                return float_arith(m, action, op, &int_to_float(a), &int_to_float(b));
            }
        },
        _ => unreachable!("unknown arithmetic op {op}"),
    })
}

fn float_arith(m: &Machine, action: &Action, op: &str, a: &BigDecimal, b: &BigDecimal) -> RunResult<Value> {
    Ok(match op {
        "+" => Value::Float(a + b),
        "-" => Value::Float(a - b),
        "*" => Value::Float(a * b),
        "/" => {
            if b.is_zero() {
                return Err(m.fail(action, ErrorKind::ZeroDivision, "division by zero"));
            }
            Value::Float(a / b)
        }
        "//" => {
            if b.is_zero() {
                return Err(m.fail(action, ErrorKind::ZeroDivision, "division by zero"));
            }
            let q = (a / b).with_scale_round(0, RoundingMode::Down);
            let (digits, _) = q.as_bigint_and_exponent();
            Value::Int(digits)
        }
        "%" => {
            if b.is_zero() {
                return Err(m.fail(action, ErrorKind::ZeroDivision, "division by zero"));
            }
            let q = (a / b).with_scale_round(0, RoundingMode::Down);
            Value::Float(a - q * b)
        }
        "^" => {
            let (Some(base), Some(exp)) = (a.to_f64(), b.to_f64()) else {
                return Err(m.fail(action, ErrorKind::Value, "exponent out of range"));
            };
            let raised = base.powf(exp);
            match BigDecimal::from_f64(raised) {
                Some(v) => Value::Float(v),
                None => return Err(m.fail(action, ErrorKind::Value, "power produced no finite value")),
            }
        }
        _ => unreachable!("unknown arithmetic op {op}"),
    })
}

fn byte_arith(m: &Machine, action: &Action, op: &str, a: u8, b: u8) -> RunResult<Value> {
    Ok(match op {
        "+" => Value::Byte(a.wrapping_add(b)),
        "-" => Value::Byte(a.wrapping_sub(b)),
        "*" => Value::Byte(a.wrapping_mul(b)),
        "/" | "//" => {
            if b == 0 {
                return Err(m.fail(action, ErrorKind::ZeroDivision, "division by zero"));
            }
            Value::Byte(a / b)
        }
        "%" => {
            if b == 0 {
                return Err(m.fail(action, ErrorKind::ZeroDivision, "division by zero"));
            }
            Value::Byte(a % b)
        }
        "^" => Value::Byte(a.wrapping_pow(u32::from(b))),
        _ => unreachable!("unknown arithmetic op {op}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn const_parsing_covers_all_literal_classes() {
        assert!(matches!(parse_const("42"), Value::Int(_)));
        assert!(matches!(parse_const("-3"), Value::Int(_)));
        assert!(matches!(parse_const("1.5"), Value::Float(_)));
        assert!(matches!(parse_const("b.7"), Value::Byte(7)));
        assert!(matches!(parse_const("true"), Value::Bool(true)));
        assert!(matches!(parse_const("\"hi\""), Value::Str(s) if s == "hi"));
    }

    #[test]
    fn wrap_index_applies_negative_wraparound() {
        assert_eq!(wrap_index(-1, 3), Some(2));
        assert_eq!(wrap_index(0, 3), Some(0));
        assert_eq!(wrap_index(3, 3), None);
        assert_eq!(wrap_index(-4, 3), None);
    }

    #[test]
    fn equalize_widens_numeric_pairs() {
        let (a, b) = equalize(Value::Int(BigInt::from(2)), Value::Float(BigDecimal::from(3)));
        assert!(matches!(a, Value::Float(_)));
        assert!(matches!(b, Value::Float(_)));
        let (a, b) = equalize(Value::Byte(4), Value::Int(BigInt::from(1)));
        assert!(matches!(a, Value::Int(_)));
        assert!(matches!(b, Value::Int(_)));
    }

    #[test]
    fn objects_equal_crosses_numeric_kinds() {
        assert!(objects_equal(
            &Object::Int(BigInt::from(3)),
            &Object::Float(BigDecimal::from(3))
        ));
        assert!(!objects_equal(
            &Object::Int(BigInt::from(3)),
            &Object::Str("3".to_owned())
        ));
    }
}
