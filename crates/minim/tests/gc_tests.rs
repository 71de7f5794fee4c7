//! Collection behavior observed through running programs: enough loop
//! iterations tick the per-line collection gate past its maximum, so these
//! programs run across at least one collection.

use minim::run_capture;

fn run(source: &str) -> String {
    run_capture(source).expect("program runs without error")
}

/// Reachable values compare equal before and after collections.
#[test]
fn named_values_survive_collections() {
    let source = "l = [1, 2, [3, \"x\"]]\n\
                  p = {\"k\": l, \"n\": 1.5}\n\
                  n = 0\n\
                  while n < 150:\n\
                  \x20\x20junk = [n, n, n]\n\
                  \x20\x20n = n + 1\n\
                  !print l\n\
                  !print p\n\
                  !print n";
    assert_eq!(
        run(source),
        "[1, 2, [3, \"x\"]]\n{\"k\": [1, 2, [3, \"x\"]], \"n\": 1.5}\n150\n"
    );
}

/// A pointer to a still-rooted value dereferences to the same value after
/// collections.
#[test]
fn live_pointer_survives_collections() {
    let source = "x = 7\n\
                  i = !id x\n\
                  n = 0\n\
                  while n < 150:\n\
                  \x20\x20junk = [n]\n\
                  \x20\x20n = n + 1\n\
                  !print !value i";
    assert_eq!(run(source), "7\n");
}

/// A pointer whose target became unreachable is cleared to nil; deref then
/// fails with the id kind.
#[test]
fn dangling_pointer_is_cleared_after_collection() {
    let source = "t = [1]\n\
                  i = !id t\n\
                  t = \"swap\"\n\
                  n = 0\n\
                  while n < 150:\n\
                  \x20\x20junk = n + 1\n\
                  \x20\x20n = n + 1\n\
                  !error (!value i), e\n\
                  !print e'\"type\"";
    assert_eq!(run(source), "id\n");
}

/// Functions keep working after their function value has been copied by the
/// collector.
#[test]
fn functions_survive_collections() {
    let source = "func inc x:\n\
                  \x20\x20return x + 1\n\
                  n = 0\n\
                  while n < 150:\n\
                  \x20\x20n = !inc n\n\
                  !print n";
    assert_eq!(run(source), "150\n");
}

/// Mutation through an element write sticks across collections because the
/// container's element slots are traced, not rebuilt from scratch.
#[test]
fn element_writes_persist_across_collections() {
    let source = "m = {\"xs\": [0, 0, 0]}\n\
                  m'\"xs\"'1 = 5\n\
                  n = 0\n\
                  while n < 150:\n\
                  \x20\x20junk = \"garbage\" + \"text\"\n\
                  \x20\x20n = n + 1\n\
                  !print m'\"xs\"";
    assert_eq!(run(source), "[0, 5, 0]\n");
}
