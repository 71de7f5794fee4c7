use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, TryRecvError};
use log::debug;

use crate::{
    action::Action,
    error::{ErrorKind, RunResult},
    interp::Machine,
    value::{Kind, List, Object, Pointer, Value},
};

/// One outstanding background child: where its result goes, how to hear
/// about it, and the thread to join once it has spoken.
pub(crate) struct PendingProcess {
    /// The frame that owns the destination list.
    frame_id: u64,
    list_name: String,
    rx: Receiver<Option<Object>>,
    handle: Option<JoinHandle<()>>,
}

/// `process list <- name:` spawns a child machine running the linked block
/// against a snapshot of the parent's names. On completion the child's
/// `name` value is appended to the parent-owned `list`; the parent reaps at
/// safe points between actions and drains the stragglers when the root block
/// finishes.
pub(crate) fn spawn(m: &mut Machine, action: &Action) -> RunResult<()> {
    if action.args.len() < 2 {
        return Err(m.fail(
            action,
            ErrorKind::ArgCount,
            "process needs a result list and a result name",
        ));
    }
    let list_name = action.args[0].clone();
    let result_name = action.args[1].clone();

    // the destination is parent-owned; create it before the child exists
    if m.cur().store.kind_of(&list_name) != Some(Kind::List) {
        m.save(&list_name, Value::List(List::default()));
    }

    let child = m.snapshot_child();
    let target = action.target.clone();
    let (tx, rx) = unbounded();
    debug!("process: spawning {target} into {list_name}");
    let handle = thread::spawn(move || {
        let mut w = child;
        let _ = w.run_block(&target);
        let result = w.frames[0].store.extract_of(&result_name);
        let _ = tx.send(result);
    });
    m.pending.push(PendingProcess {
        frame_id: m.cur().id,
        list_name,
        rx,
        handle: Some(handle),
    });
    Ok(())
}

/// Checks outstanding children; non-blocking between actions, blocking when
/// the root block drains. Each finished child's result value is appended to
/// the owning frame's destination list (children whose owner frame has
/// already returned are dropped).
pub(crate) fn reap(m: &mut Machine, blocking: bool) {
    if m.pending.is_empty() {
        return;
    }
    let mut results: Vec<(u64, String, Option<Object>)> = Vec::new();
    let mut pending = std::mem::take(&mut m.pending);
    pending.retain_mut(|p| {
        let received = if blocking {
            // a dropped sender means the child died; treat it as finished
            p.rx.recv().ok()
        } else {
            match p.rx.try_recv() {
                Ok(result) => Some(result),
                Err(TryRecvError::Empty) => return true,
                Err(TryRecvError::Disconnected) => Some(None),
            }
        };
        let Some(result) = received else {
            if blocking {
                if let Some(handle) = p.handle.take() {
                    let _ = handle.join();
                }
                return false;
            }
            return true;
        };
        if let Some(handle) = p.handle.take() {
            let _ = handle.join();
        }
        results.push((p.frame_id, p.list_name.clone(), result));
        false
    });
    m.pending = pending;

    for (frame_id, list_name, result) in results {
        let Some(result) = result else { continue };
        let Some(frame_idx) = m.frame_by_interp(frame_id) else {
            debug!("process: owner frame of {list_name} is gone, dropping result");
            continue;
        };
        let store = &mut m.frames[frame_idx].store;
        let value = store.value_from(&result);
        let slot = store.alloc(value);
        let id = store.id;
        let mut list = match store.value_of(&list_name) {
            Some(Value::List(list)) => list,
            _ => List::default(),
        };
        list.ids.push(Pointer::new(slot, id));
        store.save(&list_name, Value::List(list));
    }
}
