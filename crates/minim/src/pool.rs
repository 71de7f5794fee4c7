use std::thread;

use crossbeam_channel::bounded;
use log::debug;

use crate::{
    action::Action,
    error::{ErrorKind, RunResult},
    interp::Machine,
    value::{Kind, List, Object, Pointer, Value},
};

/// The two flows of a pool header, parsed back out of the action's argument
/// encoding: `(left, right)` pairs before the `Nothing` sentinel are inputs
/// (`list -> element`), pairs after it are outputs (`list <- element`).
struct Flows {
    input_lefts: Vec<String>,
    input_rights: Vec<String>,
    output_lefts: Vec<String>,
    output_rights: Vec<String>,
}

fn parse_flows(action: &Action) -> Flows {
    let mut flows = Flows {
        input_lefts: Vec::new(),
        input_rights: Vec::new(),
        output_lefts: Vec::new(),
        output_rights: Vec::new(),
    };
    let mut after_sentinel = false;
    let mut i = 0;
    while i < action.args.len() {
        let left = &action.args[i];
        if left == "Nothing" {
            after_sentinel = true;
            i += 1;
            continue;
        }
        let right = action.args.get(i + 1).cloned().unwrap_or_default();
        if after_sentinel {
            flows.output_lefts.push(left.clone());
            flows.output_rights.push(right);
        } else {
            flows.input_lefts.push(left.clone());
            flows.input_rights.push(right);
        }
        i += 2;
    }
    flows
}

/// Contiguous per-worker chunk bounds over `total` elements: rounded to even
/// out remainders, never leaving gaps or overlaps.
fn chunk_bounds(total: usize, workers: usize) -> Vec<(usize, usize)> {
    let step = total as f64 / workers as f64;
    let mut bounds = Vec::with_capacity(workers);
    let mut focus = 0.0f64;
    for _ in 0..workers {
        let start = (focus.round() as usize).min(total);
        let end = ((focus + step).round() as usize).min(total);
        bounds.push((start, end.max(start)));
        focus += step;
    }
    // rounding drift must never drop the tail
    if let Some(last) = bounds.last_mut() {
        last.1 = total.max(last.0);
    }
    bounds
}

/// Data-parallel scatter/run/gather.
///
/// Input lists are sliced into contiguous chunks, one worker machine per
/// host core iterates its chunks in lockstep running the body block, and the
/// parent joins the completion channels in worker order before concatenating
/// the output lists. The concatenation preserves the input order across
/// workers; a body error skips that element's outputs and the worker
/// continues.
pub(crate) fn run_pool(m: &mut Machine, action: &Action) -> RunResult<()> {
    let mut flows = parse_flows(action);
    // output flows may also be declared by `left <- right` lines at the top
    // of the body block
    if let Some(body) = m.code.blocks.get(&action.target) {
        for declared in body.iter().filter(|a| a.op == "<-") {
            if declared.args.len() == 2 && !flows.output_lefts.contains(&declared.args[0]) {
                flows.output_lefts.push(declared.args[0].clone());
                flows.output_rights.push(declared.args[1].clone());
            }
        }
    }
    if flows.input_lefts.is_empty() {
        return Err(m.fail(action, ErrorKind::ArgCount, "pool requires at least one input list"));
    }
    for left in &flows.input_lefts {
        if !m.ensure_name(left) {
            return Err(m.fail(
                action,
                ErrorKind::Undeclared,
                format!("undeclared variable in pool statement: {left}"),
            ));
        }
        if m.cur().store.kind_of(left) != Some(Kind::List) {
            return Err(m.fail(
                action,
                ErrorKind::ArgType,
                format!("non-list input in pool statement: {left}"),
            ));
        }
    }

    // deep-read the inputs once; workers only ever see their own slice
    let mut inputs: Vec<Vec<Object>> = Vec::with_capacity(flows.input_lefts.len());
    for left in &flows.input_lefts {
        let Object::List(items) = m.fetch_obj(action, left)? else {
            unreachable!("validated above")
        };
        inputs.push(items);
    }

    let workers = num_cpus::get().max(1);
    let total = inputs[0].len();
    let bounds = chunk_bounds(total, workers);
    debug!(
        "pool: {total} elements over {workers} workers into {target}",
        target = action.target
    );

    let mut receivers = Vec::with_capacity(workers);
    for &(start, end) in &bounds {
        let mut child = m.snapshot_child();
        // the chunk shadows the full input list under the same name
        for (j, left) in flows.input_lefts.iter().enumerate() {
            let chunk_end = end.min(inputs[j].len());
            let chunk = inputs[j][start.min(chunk_end)..chunk_end].to_vec();
            child.frames[0].store.save_object(left, &Object::List(chunk));
        }
        for left in &flows.output_lefts {
            child.frames[0].store.save_object(left, &Object::List(Vec::new()));
        }

        let target = action.target.clone();
        let input_lefts = flows.input_lefts.clone();
        let input_rights = flows.input_rights.clone();
        let output_lefts = flows.output_lefts.clone();
        let output_rights = flows.output_rights.clone();
        let (tx, rx) = bounded(1);
        thread::spawn(move || {
            let mut w = child;
            let len = input_lefts
                .iter()
                .filter_map(|left| match w.frames[0].store.extract_of(left) {
                    Some(Object::List(items)) => Some(items.len()),
                    _ => None,
                })
                .min()
                .unwrap_or(0);
            for idx in 0..len {
                for (j, left) in input_lefts.iter().enumerate() {
                    let element = match w.frames[0].store.extract_of(left) {
                        Some(Object::List(items)) => items.get(idx).cloned().unwrap_or(Object::Noth),
                        _ => Object::Noth,
                    };
                    w.frames[0].store.save_object(&input_rights[j], &element);
                }
                if w.run_block(&target).is_err() {
                    // an erroring element contributes no outputs
                    continue;
                }
                for (j, left) in output_lefts.iter().enumerate() {
                    let Some(produced) = w.frames[0].store.extract_of(&output_rights[j]) else {
                        continue;
                    };
                    append_local(&mut w, left, &produced);
                }
            }
            let _ = tx.send(w);
        });
        receivers.push(rx);
    }

    // wait on every worker's completion channel in declaration order
    let mut finished: Vec<Machine> = Vec::with_capacity(workers);
    for rx in receivers {
        if let Ok(worker) = rx.recv() {
            finished.push(worker);
        }
    }

    // concatenate worker-by-worker, preserving input order
    for left in &flows.output_lefts {
        let mut merged: Vec<Object> = Vec::new();
        for worker in &finished {
            if let Some(Object::List(items)) = worker.frames[0].store.extract_of(left) {
                merged.extend(items);
            }
        }
        m.save_object(left, &Object::List(merged));
    }
    Ok(())
}

/// Appends a deep value to a list variable of the worker's root frame.
fn append_local(w: &mut Machine, list_name: &str, obj: &Object) {
    let store = &mut w.frames[0].store;
    let value = store.value_from(obj);
    let slot = store.alloc(value);
    let id = store.id;
    let mut list = match store.value_of(list_name) {
        Some(Value::List(list)) => list,
        _ => List::default(),
    };
    list.ids.push(Pointer::new(slot, id));
    store.save(list_name, Value::List(list));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunks_cover_everything_without_overlap() {
        for total in [0usize, 1, 3, 7, 100] {
            for workers in [1usize, 2, 3, 8] {
                let bounds = chunk_bounds(total, workers);
                assert_eq!(bounds.len(), workers);
                assert_eq!(bounds[0].0, 0);
                assert_eq!(bounds[workers - 1].1, total);
                for pair in bounds.windows(2) {
                    assert_eq!(pair[0].1, pair[1].0, "gap or overlap at {pair:?}");
                }
            }
        }
    }
}
