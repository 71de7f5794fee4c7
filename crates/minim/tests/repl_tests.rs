//! Interactive-session behavior through the public API: continuation
//! aggregation, persistent state, echoes, and error recovery.

use minim::{shared, CollectStringPrint, Feed, ReplSession};

fn session_with_capture() -> (ReplSession, std::sync::Arc<std::sync::Mutex<String>>) {
    let writer = CollectStringPrint::new();
    let buffer = writer.buffer();
    let session = ReplSession::new(shared(writer)).expect("empty program compiles");
    (session, buffer)
}

#[test]
fn function_defined_interactively_is_callable_later() {
    let (mut session, _buffer) = session_with_capture();
    let entries = match session.feed("func add a, b:") {
        Feed::More => {
            session.feed("  return a + b");
            match session.feed("") {
                Feed::Ready(entries) => entries,
                Feed::More => panic!("blank line should close the entry"),
            }
        }
        Feed::Ready(_) => panic!("function header should open an entry"),
    };
    for entry in entries {
        session.execute(&entry).expect("definition runs");
    }
    let echo = session.execute("!add 20, 22").expect("call runs");
    assert_eq!(echo.as_deref(), Some("42"));
}

#[test]
fn printed_output_goes_to_the_writer_not_the_echo() {
    let (mut session, buffer) = session_with_capture();
    let echo = session.execute("!print \"hello\"").expect("runs");
    assert_eq!(echo, None);
    assert_eq!(buffer.lock().unwrap().as_str(), "hello\n");
}

#[test]
fn session_survives_runtime_errors() {
    let (mut session, _buffer) = session_with_capture();
    session.execute("x = 10").expect("assignment runs");
    session.execute("y = 1 // 0").expect_err("division by zero fails");
    let echo = session.execute("x + 1").expect("session still works");
    assert_eq!(echo.as_deref(), Some("11"));
}

#[test]
fn multi_entry_feed_keeps_the_dedented_line() {
    let (mut session, buffer) = session_with_capture();
    session.feed("if true:");
    session.feed("  !print \"inside\"");
    let Feed::Ready(entries) = session.feed("!print \"after\"") else {
        panic!("dedent should close the block entry")
    };
    assert_eq!(entries.len(), 2);
    for entry in entries {
        session.execute(&entry).expect("runs");
    }
    assert_eq!(buffer.lock().unwrap().as_str(), "inside\nafter\n");
}

#[test]
fn bracket_continuation_builds_one_value() {
    let (mut session, _buffer) = session_with_capture();
    session.feed("l = [1,");
    let Feed::Ready(entries) = session.feed("     2, 3]") else {
        panic!("closing bracket should complete the entry")
    };
    assert_eq!(entries.len(), 1);
    let echo = session.execute(&entries[0]).expect("runs");
    assert_eq!(echo.as_deref(), Some("[1, 2, 3]"));
}
