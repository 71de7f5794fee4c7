use std::{cmp::Ordering, env, fs, io::BufRead as _, path::Path};

use bigdecimal::BigDecimal;
use num_bigint::BigInt;
use num_traits::{FromPrimitive, ToPrimitive};
use rand::Rng as _;
use regex::Regex;

use crate::{
    action::Action,
    error::{ErrorKind, RunError, RunResult},
    interp::{objects_equal, Machine},
    shell,
    value::{ArrayData, Kind, List, Object, Pair, Pointer, Span, Value},
};

/// Every built-in function name, installed into the root frame at machine
/// start so built-ins resolve like ordinary function values.
pub(crate) const BUILTIN_NAMES: &[&str] = &[
    "print", "out", "len", "append", "pop", "sort", "range", "type", "convert", "has", "index",
    "split", "join", "replace", "to_upper", "to_lower", "itc", "cti", "fmt", "ternary", "rand",
    "input", "env", "system", "read", "write", "isdir", "mkdir", "rm", "chdir", "exit", "id",
    "value", "except", "source", "re_match", "re_find", "list", "pair", "array",
];

/// Dispatches one built-in call. Every built-in validates arity and argument
/// kinds before doing anything else.
#[expect(clippy::too_many_lines, reason = "one arm per built-in")]
pub(crate) fn dispatch(m: &mut Machine, name: &str, action: &Action) -> RunResult<()> {
    match name {
        "print" => {
            let rendered = render_args(m, action)?;
            m.write_out(&format!("{}\n", rendered.join(" ")));
        }
        "out" => {
            let rendered = render_args(m, action)?;
            m.write_out(&rendered.join(" "));
        }
        "len" => {
            m.check_argn(action, 1, Some(1))?;
            m.check_kind(action, 0, &[Kind::Str, Kind::List, Kind::Span, Kind::Pair, Kind::Arr])?;
            let len = match m.fetch(action, &action.args[0])? {
                Value::Str(s) => s.chars().count(),
                Value::List(list) => list.ids.len(),
                Value::Span(span) => span.length,
                Value::Pair(pair) => pair.ids.len(),
                Value::Arr(arr) => arr.len(),
                _ => unreachable!(),
            };
            m.save(&action.target, Value::Int(BigInt::from(len)));
        }
        "append" => {
            m.check_argn(action, 2, Some(2))?;
            m.check_kind(action, 0, &[Kind::List])?;
            let Value::List(mut list) = m.fetch(action, &action.args[0])? else {
                unreachable!()
            };
            let item = m.fetch(action, &action.args[1])?;
            let frame_id = m.cur().id;
            let slot = m.cur_mut().store.alloc(item);
            list.ids.push(Pointer::new(slot, frame_id));
            m.save(&action.target, Value::List(list));
        }
        "pop" => {
            m.check_argn(action, 1, Some(2))?;
            m.check_kind(action, 0, &[Kind::List])?;
            let Value::List(mut list) = m.fetch(action, &action.args[0])? else {
                unreachable!()
            };
            if list.ids.is_empty() {
                return Err(m.fail(action, ErrorKind::Index, "pop from an empty list"));
            }
            let at = if action.args.len() == 2 {
                let Value::Int(i) = m.fetch(action, &action.args[1])? else {
                    return Err(m.fail(action, ErrorKind::ArgType, "pop index must be int"));
                };
                let i = i.to_i64().unwrap_or(i64::MAX);
                let len = list.ids.len() as i64;
                let wrapped = if i < 0 { i + len } else { i };
                if !(0..len).contains(&wrapped) {
                    return Err(m.fail(action, ErrorKind::Index, format!("list index out of range: {i}")));
                }
                wrapped as usize
            } else {
                list.ids.len() - 1
            };
            list.ids.remove(at);
            m.save(&action.target, Value::List(list));
        }
        "sort" => {
            m.check_argn(action, 1, Some(1))?;
            m.check_kind(action, 0, &[Kind::List])?;
            let Object::List(mut items) = m.fetch_obj(action, &action.args[0])? else {
                unreachable!()
            };
            for window in items.windows(2) {
                if scalar_ord(&window[0], &window[1]).is_none() {
                    return Err(m.fail(action, ErrorKind::ArgType, "list elements are not comparable"));
                }
            }
            items.sort_by(|a, b| scalar_ord(a, b).unwrap_or(Ordering::Equal));
            m.save_object(&action.target, &Object::List(items));
        }
        "range" => {
            m.check_argn(action, 1, Some(1))?;
            m.check_kind(action, 0, &[Kind::Int])?;
            let Value::Int(n) = m.fetch(action, &action.args[0])? else {
                unreachable!()
            };
            let n = n.to_u64().unwrap_or(0) as usize;
            let store = &mut m.cur_mut().store;
            let start = store.ints.len();
            for i in 0..n {
                store.ints.push(BigInt::from(i));
            }
            m.save(
                &action.target,
                Value::Span(Span {
                    dtype: Kind::Int,
                    start,
                    length: n,
                }),
            );
        }
        "list" => {
            let mut list = List::default();
            for arg in &action.args {
                let value = m.fetch(action, arg)?;
                let frame_id = m.cur().id;
                let slot = m.cur_mut().store.alloc(value);
                list.ids.push(Pointer::new(slot, frame_id));
            }
            m.save(&action.target, Value::List(list));
        }
        "pair" => {
            let mut pair = Pair::default();
            for chunk in action.args.chunks(2) {
                if chunk.len() < 2 {
                    break;
                }
                let key = m.fetch_obj(action, &chunk[0])?.encode_key();
                let value = m.fetch(action, &chunk[1])?;
                let frame_id = m.cur().id;
                let slot = m.cur_mut().store.alloc(value);
                pair.ids.insert(key, Pointer::new(slot, frame_id));
            }
            m.save(&action.target, Value::Pair(pair));
        }
        "array" => {
            m.check_argn(action, 1, None)?;
            m.check_kind(action, 0, &[Kind::Byte])?;
            let Value::Byte(type_byte) = m.fetch(action, &action.args[0])? else {
                unreachable!()
            };
            let dtype = Kind::from_byte(type_byte).unwrap_or(Kind::Noth);
            let mut arr = ArrayData::empty(dtype);
            for arg in &action.args[1..] {
                let obj = m.fetch_obj(action, arg)?;
                if !arr.push(&obj) {
                    return Err(m.fail(
                        action,
                        ErrorKind::ArgType,
                        format!(
                            "array of type {dtype}, appended item of type {got}",
                            dtype = arr.dtype(),
                            got = obj.kind()
                        ),
                    ));
                }
            }
            m.save(&action.target, Value::Arr(arr));
        }
        "type" => {
            m.check_argn(action, 1, Some(1))?;
            let kind = m.cur().store.kind_of(&action.args[0]).unwrap_or(Kind::Noth);
            m.save(&action.target, Value::Str(kind.to_string()));
        }
        "convert" => {
            m.check_argn(action, 2, Some(2))?;
            convert(m, action)?;
        }
        "has" => {
            m.check_argn(action, 2, Some(2))?;
            m.check_kind(action, 0, &[Kind::List, Kind::Str, Kind::Pair])?;
            let found = match m.fetch(action, &action.args[0])? {
                Value::Str(s) => {
                    let Object::Str(needle) = m.fetch_obj(action, &action.args[1])? else {
                        return Err(m.fail(action, ErrorKind::ArgType, "has on a str needs a str"));
                    };
                    s.contains(&needle)
                }
                Value::List(_) => {
                    let Object::List(items) = m.fetch_obj(action, &action.args[0])? else {
                        unreachable!()
                    };
                    let needle = m.fetch_obj(action, &action.args[1])?;
                    items.iter().any(|item| objects_equal(item, &needle))
                }
                Value::Pair(pair) => {
                    let key = m.fetch_obj(action, &action.args[1])?.encode_key();
                    pair.ids.contains_key(&key)
                }
                _ => unreachable!(),
            };
            m.save(&action.target, Value::Bool(found));
        }
        "index" => {
            m.check_argn(action, 2, Some(2))?;
            m.check_kind(action, 0, &[Kind::List, Kind::Str])?;
            let position: i64 = match m.fetch(action, &action.args[0])? {
                Value::Str(s) => {
                    let Object::Str(needle) = m.fetch_obj(action, &action.args[1])? else {
                        return Err(m.fail(action, ErrorKind::ArgType, "index on a str needs a str"));
                    };
                    match s.find(&needle) {
                        Some(byte_pos) => s[..byte_pos].chars().count() as i64,
                        None => -1,
                    }
                }
                Value::List(_) => {
                    let Object::List(items) = m.fetch_obj(action, &action.args[0])? else {
                        unreachable!()
                    };
                    let needle = m.fetch_obj(action, &action.args[1])?;
                    items
                        .iter()
                        .position(|item| objects_equal(item, &needle))
                        .map_or(-1, |p| p as i64)
                }
                _ => unreachable!(),
            };
            m.save(&action.target, Value::Int(BigInt::from(position)));
        }
        "split" => {
            m.check_argn(action, 2, Some(2))?;
            m.check_kind(action, 0, &[Kind::Str])?;
            m.check_kind(action, 1, &[Kind::Str])?;
            let (Value::Str(s), Value::Str(sep)) = (
                m.fetch(action, &action.args[0])?,
                m.fetch(action, &action.args[1])?,
            ) else {
                unreachable!()
            };
            let parts: Vec<Object> = s.split(&sep).map(|p| Object::Str(p.to_owned())).collect();
            m.save_object(&action.target, &Object::List(parts));
        }
        "join" => {
            m.check_argn(action, 2, Some(2))?;
            m.check_kind(action, 0, &[Kind::List])?;
            m.check_kind(action, 1, &[Kind::Str])?;
            let Object::List(items) = m.fetch_obj(action, &action.args[0])? else {
                unreachable!()
            };
            let Value::Str(sep) = m.fetch(action, &action.args[1])? else {
                unreachable!()
            };
            let parts: Vec<String> = items.iter().map(Object::render).collect();
            m.save(&action.target, Value::Str(parts.join(&sep)));
        }
        "replace" => {
            m.check_argn(action, 3, Some(3))?;
            for i in 0..3 {
                m.check_kind(action, i, &[Kind::Str])?;
            }
            let (Value::Str(s), Value::Str(from), Value::Str(to)) = (
                m.fetch(action, &action.args[0])?,
                m.fetch(action, &action.args[1])?,
                m.fetch(action, &action.args[2])?,
            ) else {
                unreachable!()
            };
            m.save(&action.target, Value::Str(s.replace(&from, &to)));
        }
        "to_upper" | "to_lower" => {
            m.check_argn(action, 1, Some(1))?;
            m.check_kind(action, 0, &[Kind::Str])?;
            let Value::Str(s) = m.fetch(action, &action.args[0])? else {
                unreachable!()
            };
            let out = if name == "to_upper" { s.to_uppercase() } else { s.to_lowercase() };
            m.save(&action.target, Value::Str(out));
        }
        "itc" => {
            m.check_argn(action, 1, Some(1))?;
            m.check_kind(action, 0, &[Kind::Int])?;
            let Value::Int(code) = m.fetch(action, &action.args[0])? else {
                unreachable!()
            };
            let ch = code
                .to_u32()
                .and_then(char::from_u32)
                .ok_or_else(|| m.fail(action, ErrorKind::Value, "not a valid character code"))?;
            m.save(&action.target, Value::Str(ch.to_string()));
        }
        "cti" => {
            m.check_argn(action, 1, Some(1))?;
            m.check_kind(action, 0, &[Kind::Str])?;
            let Value::Str(s) = m.fetch(action, &action.args[0])? else {
                unreachable!()
            };
            let ch = s
                .chars()
                .next()
                .ok_or_else(|| m.fail(action, ErrorKind::Value, "cti of an empty string"))?;
            m.save(&action.target, Value::Int(BigInt::from(ch as u32)));
        }
        "fmt" => {
            m.check_argn(action, 1, Some(1))?;
            m.check_kind(action, 0, &[Kind::Str])?;
            let Value::Str(s) = m.fetch(action, &action.args[0])? else {
                unreachable!()
            };
            let out = shell::interpolate(&s, |key| m.lookup_render(key));
            m.save(&action.target, Value::Str(out));
        }
        "ternary" => {
            m.check_argn(action, 3, Some(3))?;
            m.check_kind(action, 0, &[Kind::Bool])?;
            let Value::Bool(cond) = m.fetch(action, &action.args[0])? else {
                unreachable!()
            };
            let chosen = if cond { &action.args[1] } else { &action.args[2] };
            let value = m.fetch(action, chosen)?;
            m.save(&action.target, value);
        }
        "rand" => {
            m.check_argn(action, 0, Some(1))?;
            if action.args.is_empty() {
                let x: f64 = rand::thread_rng().gen();
                let value = BigDecimal::from_f64(x)
                    .ok_or_else(|| m.fail(action, ErrorKind::Value, "random draw was not finite"))?;
                m.save(&action.target, Value::Float(value));
            } else {
                m.check_kind(action, 0, &[Kind::Int])?;
                let Value::Int(n) = m.fetch(action, &action.args[0])? else {
                    unreachable!()
                };
                let bound = n
                    .to_u64()
                    .filter(|&b| b > 0)
                    .ok_or_else(|| m.fail(action, ErrorKind::Value, "rand bound must be a positive int"))?;
                let drawn = rand::thread_rng().gen_range(0..bound);
                m.save(&action.target, Value::Int(BigInt::from(drawn)));
            }
        }
        "input" => {
            m.check_argn(action, 0, Some(1))?;
            if !action.args.is_empty() {
                m.check_kind(action, 0, &[Kind::Str])?;
                let Value::Str(prompt) = m.fetch(action, &action.args[0])? else {
                    unreachable!()
                };
                m.write_out(&prompt);
            }
            let mut line = String::new();
            let read = std::io::stdin().lock().read_line(&mut line);
            match read {
                Ok(0) | Err(_) => return Err(m.fail(action, ErrorKind::Interrupt, "keyboard interrupt!")),
                Ok(_) => {
                    let trimmed = line.trim_end_matches(['\n', '\r']).to_owned();
                    m.save(&action.target, Value::Str(trimmed));
                }
            }
        }
        "env" => {
            m.check_argn(action, 1, Some(2))?;
            m.check_kind(action, 0, &[Kind::Str])?;
            let Value::Str(key) = m.fetch(action, &action.args[0])? else {
                unreachable!()
            };
            if action.args.len() == 2 {
                if m.safe_mode {
                    return Err(m.fail(action, ErrorKind::Permission, "environment writes are disabled in safe mode"));
                }
                m.check_kind(action, 1, &[Kind::Str])?;
                let Value::Str(value) = m.fetch(action, &action.args[1])? else {
                    unreachable!()
                };
                env::set_var(key, value);
            } else {
                let value = env::var(&key).unwrap_or_default();
                m.save(&action.target, Value::Str(value));
            }
        }
        "system" => {
            m.check_argn(action, 1, Some(1))?;
            m.check_kind(action, 0, &[Kind::Str])?;
            let Value::Str(what) = m.fetch(action, &action.args[0])? else {
                unreachable!()
            };
            match what.as_str() {
                "os" => m.save(&action.target, Value::Str(env::consts::OS.to_owned())),
                "version" => m.save(&action.target, Value::Str(env!("CARGO_PKG_VERSION").to_owned())),
                "args" => {
                    let args: Vec<Object> = m.host_args.iter().map(|a| Object::Str(a.clone())).collect();
                    m.save_object(&action.target, &Object::List(args));
                }
                "cwd" => match env::current_dir() {
                    Ok(dir) => m.save(&action.target, Value::Str(dir.to_string_lossy().into_owned())),
                    Err(err) => return Err(m.fail(action, ErrorKind::Sys, err.to_string())),
                },
                other => {
                    return Err(m.fail(action, ErrorKind::Value, format!("unknown system query: {other}")));
                }
            }
        }
        "read" => {
            m.check_argn(action, 1, Some(1))?;
            m.check_kind(action, 0, &[Kind::Str])?;
            let Value::Str(path) = m.fetch(action, &action.args[0])? else {
                unreachable!()
            };
            match fs::read_to_string(&path) {
                Ok(text) => m.save(&action.target, Value::Str(text)),
                Err(err) => return Err(m.fail(action, ErrorKind::File, format!("{path}: {err}"))),
            }
        }
        "write" => {
            m.check_argn(action, 2, Some(2))?;
            if m.safe_mode {
                return Err(m.fail(action, ErrorKind::Permission, "write is disabled in safe mode"));
            }
            m.check_kind(action, 0, &[Kind::Str])?;
            m.check_kind(action, 1, &[Kind::Str])?;
            let (Value::Str(path), Value::Str(content)) = (
                m.fetch(action, &action.args[0])?,
                m.fetch(action, &action.args[1])?,
            ) else {
                unreachable!()
            };
            if let Err(err) = fs::write(&path, content) {
                return Err(m.fail(action, ErrorKind::File, format!("{path}: {err}")));
            }
        }
        "isdir" => {
            m.check_argn(action, 1, Some(1))?;
            m.check_kind(action, 0, &[Kind::Str])?;
            let Value::Str(path) = m.fetch(action, &action.args[0])? else {
                unreachable!()
            };
            m.save(&action.target, Value::Bool(Path::new(&path).is_dir()));
        }
        "mkdir" => {
            m.check_argn(action, 1, Some(1))?;
            if m.safe_mode {
                return Err(m.fail(action, ErrorKind::Permission, "mkdir is disabled in safe mode"));
            }
            m.check_kind(action, 0, &[Kind::Str])?;
            let Value::Str(path) = m.fetch(action, &action.args[0])? else {
                unreachable!()
            };
            if let Err(err) = fs::create_dir_all(&path) {
                return Err(m.fail(action, ErrorKind::File, format!("{path}: {err}")));
            }
        }
        "rm" => {
            m.check_argn(action, 1, Some(1))?;
            if m.safe_mode {
                return Err(m.fail(action, ErrorKind::Permission, "rm is disabled in safe mode"));
            }
            m.check_kind(action, 0, &[Kind::Str])?;
            let Value::Str(path) = m.fetch(action, &action.args[0])? else {
                unreachable!()
            };
            let result = if Path::new(&path).is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            if let Err(err) = result {
                return Err(m.fail(action, ErrorKind::File, format!("{path}: {err}")));
            }
        }
        "chdir" => {
            m.check_argn(action, 1, Some(1))?;
            m.check_kind(action, 0, &[Kind::Str])?;
            let Value::Str(path) = m.fetch(action, &action.args[0])? else {
                unreachable!()
            };
            if let Err(err) = env::set_current_dir(&path) {
                return Err(m.fail(action, ErrorKind::File, format!("{path}: {err}")));
            }
        }
        "exit" => {
            m.check_argn(action, 0, Some(1))?;
            let code = if action.args.is_empty() {
                0
            } else {
                m.check_kind(action, 0, &[Kind::Int])?;
                let Value::Int(code) = m.fetch(action, &action.args[0])? else {
                    unreachable!()
                };
                code.to_i32().unwrap_or(1)
            };
            std::process::exit(code);
        }
        "id" => builtin_id(m, action)?,
        "value" => builtin_value(m, action)?,
        "except" => {
            m.check_argn(action, 1, Some(2))?;
            m.check_kind(action, 0, &[Kind::Str])?;
            let Value::Str(kind_name) = m.fetch(action, &action.args[0])? else {
                unreachable!()
            };
            let message = if action.args.len() == 2 {
                m.check_kind(action, 1, &[Kind::Str])?;
                let Value::Str(msg) = m.fetch(action, &action.args[1])? else {
                    unreachable!()
                };
                msg
            } else {
                String::new()
            };
            return Err(RunError::new(
                ErrorKind::from_user(&kind_name),
                message,
                "except",
                std::sync::Arc::clone(&action.source),
            ));
        }
        "source" => {
            m.check_argn(action, 1, Some(1))?;
            m.check_kind(action, 0, &[Kind::Str])?;
            let Value::Str(path) = m.fetch(action, &action.args[0])? else {
                unreachable!()
            };
            let text = fs::read_to_string(&path)
                .map_err(|err| m.fail(action, ErrorKind::File, format!("{path}: {err}")))?;
            m.compile_more(&text)?;
            let root = m.code_root();
            m.run_block(&root)?;
        }
        "re_match" | "re_find" => {
            m.check_argn(action, 2, Some(2))?;
            m.check_kind(action, 0, &[Kind::Str])?;
            m.check_kind(action, 1, &[Kind::Str])?;
            let (Value::Str(pattern), Value::Str(text)) = (
                m.fetch(action, &action.args[0])?,
                m.fetch(action, &action.args[1])?,
            ) else {
                unreachable!()
            };
            let re = Regex::new(&pattern).map_err(|err| m.fail(action, ErrorKind::Regex, err.to_string()))?;
            if name == "re_match" {
                m.save(&action.target, Value::Bool(re.is_match(&text)));
            } else {
                let found: Vec<Object> = re
                    .find_iter(&text)
                    .map(|mat| Object::Str(mat.as_str().to_owned()))
                    .collect();
                m.save_object(&action.target, &Object::List(found));
            }
        }
        other => {
            return Err(m.fail(action, ErrorKind::Undeclared, format!("Undeclared function: {other}")));
        }
    }
    Ok(())
}

/// Renders every argument of a `print`/`out` call.
fn render_args(m: &Machine, action: &Action) -> RunResult<Vec<String>> {
    action
        .args
        .iter()
        .map(|arg| m.fetch_obj(action, arg).map(|obj| obj.render()))
        .collect()
}

/// `id(name)`: a pointer to the declared owner's slot. `id(name, ptr)`:
/// writes the named value through the pointer, in place.
fn builtin_id(m: &mut Machine, action: &Action) -> RunResult<()> {
    m.check_argn(action, 1, Some(2))?;
    if action.args.len() == 1 {
        let name = &action.args[0];
        let owner = m
            .owner_frame(name)
            .ok_or_else(|| m.fail(action, ErrorKind::Undeclared, format!("Undeclared variable: {name}")))?;
        let frame = m.frame_at(owner);
        let addr = frame
            .store
            .slot_of(name)
            .ok_or_else(|| m.fail(action, ErrorKind::Undeclared, format!("Undeclared variable: {name}")))?;
        let ptr = Pointer::new(addr, frame.id);
        m.save(&action.target, Value::Id(ptr));
        return Ok(());
    }
    m.check_kind(action, 1, &[Kind::Id])?;
    let Value::Id(ptr) = m.fetch(action, &action.args[1])? else {
        unreachable!()
    };
    if ptr.is_nil() {
        return Err(m.fail(action, ErrorKind::Id, "nil pointer"));
    }
    let obj = m.fetch_obj(action, &action.args[0])?;
    let Some(frame_idx) = m.frame_by_interp(ptr.interp) else {
        return Err(m.fail(action, ErrorKind::Id, "pointer target interpreter no longer exists"));
    };
    if ptr.addr >= m.frame_at(frame_idx).store.slots.len() {
        return Err(m.fail(action, ErrorKind::Id, "invalid value id: higher than available memory"));
    }
    m.write_through(frame_idx, ptr.addr, &obj);
    Ok(())
}

/// `value(ptr)`: dereferences a pointer, reading across the frame chain.
fn builtin_value(m: &mut Machine, action: &Action) -> RunResult<()> {
    m.check_argn(action, 1, Some(1))?;
    m.check_kind(action, 0, &[Kind::Id])?;
    let Value::Id(ptr) = m.fetch(action, &action.args[0])? else {
        return Err(m.fail(action, ErrorKind::Id, "error retrieving data from provided id"));
    };
    if ptr.is_nil() {
        return Err(m.fail(action, ErrorKind::Id, "nil pointer"));
    }
    let Some(frame_idx) = m.frame_by_interp(ptr.interp) else {
        return Err(m.fail(action, ErrorKind::Id, "pointer target interpreter no longer exists"));
    };
    let frame = m.frame_at(frame_idx);
    if ptr.addr >= frame.store.slots.len() {
        return Err(m.fail(action, ErrorKind::Id, "invalid value id: higher than available memory"));
    }
    let obj = frame.store.extract(ptr.addr);
    m.save_object(&action.target, &obj);
    Ok(())
}

/// `convert(value, exemplar)`: converts the first argument to the kind of
/// the second.
fn convert(m: &mut Machine, action: &Action) -> RunResult<()> {
    let target_kind = m.cur().store.kind_of(&action.args[1]).unwrap_or(Kind::Noth);
    let source = m.fetch_obj(action, &action.args[0])?;
    if source.kind() == target_kind {
        let value = m.fetch(action, &action.args[0])?;
        m.save(&action.target, value);
        return Ok(());
    }
    let converted = match (target_kind, &source) {
        (Kind::Str, _) => Some(Value::Str(source.render())),
        (Kind::Int, Object::Float(x)) => {
            let (digits, _) = x.with_scale_round(0, bigdecimal::RoundingMode::Down).as_bigint_and_exponent();
            Some(Value::Int(digits))
        }
        (Kind::Int, Object::Byte(b)) => Some(Value::Int(BigInt::from(*b))),
        (Kind::Int, Object::Str(s)) => s.trim().parse::<BigInt>().ok().map(Value::Int),
        (Kind::Int, Object::Bool(b)) => Some(Value::Int(BigInt::from(i32::from(*b)))),
        (Kind::Float, Object::Int(i)) => Some(Value::Float(BigDecimal::from(i.clone()))),
        (Kind::Float, Object::Byte(b)) => Some(Value::Float(BigDecimal::from(u32::from(*b)))),
        (Kind::Float, Object::Str(s)) => s.trim().parse::<BigDecimal>().ok().map(Value::Float),
        (Kind::Byte, Object::Int(i)) => {
            let masked = (i.magnitude() % 256u32).to_u8().unwrap_or(0);
            Some(Value::Byte(masked))
        }
        (Kind::Byte, Object::Float(x)) => x.to_i64().map(|v| Value::Byte((v.rem_euclid(256)) as u8)),
        (Kind::List, Object::Arr(_)) => {
            let Object::Arr(arr) = source.clone() else { unreachable!() };
            let items = array_items(&arr);
            let value = m.cur_mut().store.value_from(&Object::List(items));
            Some(value)
        }
        _ => None,
    };
    match converted {
        Some(value) => {
            m.save(&action.target, value);
            Ok(())
        }
        None => Err(m.fail(
            action,
            ErrorKind::ArgType,
            format!("cannot convert {from} to {target_kind}", from = source.kind()),
        )),
    }
}

/// Flattens a typed array into scalar objects.
fn array_items(arr: &ArrayData) -> Vec<Object> {
    match arr {
        ArrayData::Noth => Vec::new(),
        ArrayData::Ints(v) => v.iter().cloned().map(Object::Int).collect(),
        ArrayData::Floats(v) => v.iter().cloned().map(Object::Float).collect(),
        ArrayData::Strs(v) => v.iter().cloned().map(Object::Str).collect(),
        ArrayData::Bools(v) => v.iter().copied().map(Object::Bool).collect(),
        ArrayData::Bytes(v) => v.iter().copied().map(Object::Byte).collect(),
    }
}

/// Total order over comparable scalars: numerics by value, strings
/// lexically, bools with false first. `None` marks incomparable pairs.
fn scalar_ord(a: &Object, b: &Object) -> Option<Ordering> {
    fn numeric(obj: &Object) -> Option<BigDecimal> {
        match obj {
            Object::Int(i) => Some(BigDecimal::from(i.clone())),
            Object::Float(x) => Some(x.clone()),
            Object::Byte(b) => Some(BigDecimal::from(u32::from(*b))),
            _ => None,
        }
    }
    if let (Some(x), Some(y)) = (numeric(a), numeric(b)) {
        return Some(x.cmp(&y));
    }
    match (a, b) {
        (Object::Str(x), Object::Str(y)) => Some(x.cmp(y)),
        (Object::Bool(x), Object::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}
