//! Worker-pool behavior: order preservation, output arity, multi-flow
//! headers, and error skipping.

use minim::run_capture;

fn run(source: &str) -> String {
    run_capture(source).expect("program runs without error")
}

/// A pure body mapping an input list equals the sequential map, whatever the
/// worker count.
#[test]
fn pool_preserves_input_order() {
    let source = "xs = [1, 2, 3, 4]\n\
                  pool xs->x:\n\
                  \x20\x20ys<-y\n\
                  \x20\x20y = x*x\n\
                  !print ys";
    assert_eq!(run(source), "[1, 4, 9, 16]\n");
}

#[test]
fn pool_output_length_matches_input_length() {
    let source = "xs = [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]\n\
                  pool xs->x:\n\
                  \x20\x20ys<-y\n\
                  \x20\x20y = x + 1\n\
                  !print !len ys\n\
                  !print ys";
    assert_eq!(
        run(source),
        "13\n[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13]\n"
    );
}

#[test]
fn pool_runs_two_inputs_in_lockstep() {
    let source = "xs = [1, 2, 3]\n\
                  ws = [10, 20, 30]\n\
                  pool xs->x, ws->w:\n\
                  \x20\x20zs<-z\n\
                  \x20\x20z = x + w\n\
                  !print zs";
    assert_eq!(run(source), "[11, 22, 33]\n");
}

#[test]
fn pool_collects_multiple_outputs() {
    let source = "xs = [1, 2, 3]\n\
                  pool xs->x:\n\
                  \x20\x20sq<-a\n\
                  \x20\x20cu<-b\n\
                  \x20\x20a = x*x\n\
                  \x20\x20b = x*x*x\n\
                  !print sq\n\
                  !print cu";
    assert_eq!(run(source), "[1, 4, 9]\n[1, 8, 27]\n");
}

/// Workers see the parent's functions through their snapshot.
#[test]
fn pool_workers_call_parent_functions() {
    let source = "func double x:\n\
                  \x20\x20return x * 2\n\
                  xs = [1, 2, 3]\n\
                  pool xs->x:\n\
                  \x20\x20ys<-y\n\
                  \x20\x20y = !double x\n\
                  !print ys";
    assert_eq!(run(source), "[2, 4, 6]\n");
}

/// An element whose body errors contributes nothing; the worker continues
/// with the next element.
#[test]
fn pool_skips_erroring_elements() {
    let source = "xs = [1, 0, 2]\n\
                  pool xs->x:\n\
                  \x20\x20ys<-y\n\
                  \x20\x20y = 10 // x\n\
                  !print ys";
    assert_eq!(run(source), "[10, 5]\n");
}

/// Pool inputs must be declared lists.
#[test]
fn pool_rejects_non_list_inputs() {
    let source = "xs = 5\n\
                  pool xs->x:\n\
                  \x20\x20ys<-y\n\
                  \x20\x20y = x";
    let err = run_capture(source).expect_err("non-list input must fail");
    assert_eq!(err.kind, minim::ErrorKind::ArgType);
}

/// An empty input produces empty outputs without spinning up useful work.
#[test]
fn pool_handles_empty_input() {
    let source = "xs = []\n\
                  pool xs->x:\n\
                  \x20\x20ys<-y\n\
                  \x20\x20y = x\n\
                  !print ys\n\
                  !print !len ys";
    assert_eq!(run(source), "[]\n0\n");
}
