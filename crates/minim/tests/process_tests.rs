//! Background process children: results integrate into the parent-owned
//! list at safe points, and outstanding children are drained when the root
//! block finishes.

use minim::{shared, Machine, NoPrint, Object};
use num_bigint::BigInt;

fn run_machine(source: &str) -> Machine {
    let mut machine = Machine::with_print(source, shared(NoPrint)).expect("compiles");
    machine.run().expect("runs without error");
    machine
}

#[test]
fn process_result_lands_in_the_parent_list() {
    let machine = run_machine("process results <- r:\n  r = 21 * 2\ndone = 1");
    let results = machine.var_object("results").expect("list exists");
    assert_eq!(results, Object::List(vec![Object::Int(BigInt::from(42))]));
}

#[test]
fn multiple_processes_all_integrate() {
    let source = "process rs <- r:\n  r = 1\nprocess rs <- r:\n  r = 2\ndone = 1";
    let machine = run_machine(source);
    let Some(Object::List(items)) = machine.var_object("rs") else {
        panic!("rs must be a list");
    };
    assert_eq!(items.len(), 2);
    let mut values: Vec<i64> = items
        .iter()
        .map(|item| match item {
            Object::Int(i) => i.try_into().expect("small int"),
            other => panic!("unexpected element {other:?}"),
        })
        .collect();
    values.sort_unstable();
    assert_eq!(values, vec![1, 2]);
}

#[test]
fn process_sees_a_snapshot_of_parent_variables() {
    let source = "base = 40\nprocess rs <- r:\n  r = base + 2\nbase = 0";
    let machine = run_machine(source);
    let Some(Object::List(items)) = machine.var_object("rs") else {
        panic!("rs must be a list");
    };
    assert_eq!(items.len(), 1);
    // the child computed against its snapshot, whichever value it saw, and
    // never shared mutable state with the parent
    assert!(matches!(&items[0], Object::Int(i) if *i == BigInt::from(42) || *i == BigInt::from(2)));
}

#[test]
fn stragglers_drain_when_the_root_block_finishes() {
    let machine = run_machine("process rs <- r:\n  r = 5");
    let results = machine.var_object("rs").expect("created at spawn");
    assert_eq!(results, Object::List(vec![Object::Int(BigInt::from(5))]));
}

#[test]
fn process_can_produce_containers() {
    let machine = run_machine("process rs <- r:\n  r = [1, {\"k\": 2}]\ndone = 1");
    let Some(Object::List(items)) = machine.var_object("rs") else {
        panic!("rs must be a list");
    };
    assert_eq!(
        items,
        vec![Object::List(vec![
            Object::Int(BigInt::from(1)),
            Object::Pair(vec![("str:k".to_owned(), Object::Int(BigInt::from(2)))]),
        ])]
    );
}
