use ahash::AHashSet;
use num_traits::ToPrimitive;
use serde::Deserialize;
use serde_json::{Map, Number, Value as Json};

use crate::{
    action::SourceLine,
    error::{ErrorKind, RunError},
    interp::Machine,
    value::{render_float, ArrayData, Object},
};

/// An embedding request: run `code`, then report the named variables.
#[derive(Debug, Deserialize)]
struct EmbedRequest {
    #[serde(default)]
    variables: Vec<String>,
    code: String,
}

/// Compiles and runs an embedding request against the machine, returning a
/// JSON object mapping the requested variable names to their values.
///
/// Ints and floats come out as JSON numbers where representable (decimal
/// strings otherwise); lists and pairs recurse. With `forget`, the blocks
/// compiled for this request are pruned afterwards, so the machine's block
/// map does not grow across calls.
pub fn run_request(machine: &mut Machine, request: &str, forget: bool) -> Result<String, RunError> {
    let request: EmbedRequest = serde_json::from_str(request).map_err(|err| {
        RunError::new(
            ErrorKind::Json,
            format!("invalid embed request: {err}"),
            "embed",
            SourceLine::synthetic("embed request"),
        )
    })?;

    let blocks_before: AHashSet<String> = machine.code.blocks.keys().cloned().collect();
    let root_before = machine.code_root();

    machine.compile_more(&request.code)?;
    let root = machine.code_root();
    let run_result = machine.run_block(&root);
    machine.cur_mut().halt = false;

    if forget {
        machine.code.blocks.retain(|name, _| blocks_before.contains(name));
        machine.code.root = root_before;
    }
    run_result?;

    let mut response = Map::new();
    for name in &request.variables {
        let value = machine.var_object(name).unwrap_or(Object::Noth);
        response.insert(name.clone(), object_to_json(&value));
    }
    Ok(Json::Object(response).to_string())
}

/// Converts a deep value to JSON.
fn object_to_json(obj: &Object) -> Json {
    match obj {
        Object::Noth => Json::Null,
        Object::Int(i) => match i.to_i64() {
            Some(v) => Json::Number(Number::from(v)),
            None => Json::String(i.to_string()),
        },
        Object::Float(x) => match x.to_f64().and_then(Number::from_f64) {
            Some(n) => Json::Number(n),
            None => Json::String(render_float(x)),
        },
        Object::Str(s) => Json::String(s.clone()),
        Object::Bool(b) => Json::Bool(*b),
        Object::Byte(b) => Json::Number(Number::from(*b)),
        Object::Func(f) => Json::String(format!("func.{}", f.name)),
        Object::Id(p) => Json::String(format!("id.{p}")),
        Object::Arr(arr) => Json::Array(array_to_json(arr)),
        Object::List(items) => Json::Array(items.iter().map(object_to_json).collect()),
        Object::Pair(entries) => {
            let mut map = Map::new();
            for (key, value) in entries {
                let bare = key.split_once(':').map_or(key.as_str(), |(_, rest)| rest);
                map.insert(bare.to_owned(), object_to_json(value));
            }
            Json::Object(map)
        }
    }
}

fn array_to_json(arr: &ArrayData) -> Vec<Json> {
    match arr {
        ArrayData::Noth => Vec::new(),
        ArrayData::Ints(v) => v
            .iter()
            .map(|i| i.to_i64().map_or_else(|| Json::String(i.to_string()), |n| Json::Number(Number::from(n))))
            .collect(),
        ArrayData::Floats(v) => v
            .iter()
            .map(|x| {
                x.to_f64()
                    .and_then(Number::from_f64)
                    .map_or_else(|| Json::String(render_float(x)), Json::Number)
            })
            .collect(),
        ArrayData::Strs(v) => v.iter().map(|s| Json::String(s.clone())).collect(),
        ArrayData::Bools(v) => v.iter().map(|b| Json::Bool(*b)).collect(),
        ArrayData::Bytes(v) => v.iter().map(|b| Json::Number(Number::from(*b))).collect(),
    }
}
