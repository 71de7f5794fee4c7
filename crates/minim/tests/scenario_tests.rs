//! End-to-end programs exercising the front end, the store, and the
//! evaluator together, checked by their printed output.

use minim::run_capture;

fn run(source: &str) -> String {
    run_capture(source).expect("program runs without error")
}

#[test]
fn user_function_with_float_power() {
    let out = run("func sqrt x:\n  return x^0.5\n!print !sqrt 9");
    assert_eq!(out, "3\n");
}

#[test]
fn if_else_takes_the_false_branch() {
    let out = run("if 1==2:\n  !print \"eq\"\nelse:\n  !print \"uneq\"");
    assert_eq!(out, "uneq\n");
}

#[test]
fn if_takes_the_true_branch_and_skips_else() {
    let out = run("if 2==2:\n  !print \"eq\"\nelse:\n  !print \"uneq\"");
    assert_eq!(out, "eq\n");
}

#[test]
fn sort_builtin_orders_a_list() {
    let out = run("l = [3,1,2]\n!print !sort l");
    assert_eq!(out, "[1, 2, 3]\n");
}

#[test]
fn pair_write_and_read_by_key() {
    let out = run("p = {\"a\": 1, \"b\": 2}\np'\"a\" = 7\n!print p'\"a\"");
    assert_eq!(out, "7\n");
}

#[test]
fn raise_inside_error_call_reports_the_kind() {
    let out = run("!error (!except \"type\", \"bad\"), e\n!print e'\"type\"");
    assert_eq!(out, "type\n");
}

#[test]
fn arithmetic_widens_int_to_float() {
    let out = run("!print 1 + 2.5");
    assert_eq!(out, "3.5\n");
}

#[test]
fn integer_division_stays_integer() {
    let out = run("!print 7 // 2\n!print 7 % 2\n!print 7 / 2");
    assert_eq!(out, "3\n1\n3.5\n");
}

#[test]
fn big_integers_do_not_overflow() {
    let out = run("!print 2^100");
    assert_eq!(out, "1267650600228229401496703205376\n");
}

#[test]
fn string_concat_and_helpers() {
    let out = run("a = \"min\" + \"im\"\n!print !to_upper a\n!print !len a");
    assert_eq!(out, "MINIM\n5\n");
}

#[test]
fn negative_string_index_wraps() {
    let out = run("s = \"abc\"\n!print s'-1");
    assert_eq!(out, "c\n");
}

#[test]
fn list_index_out_of_range_is_an_index_error() {
    let out = run("l = [1, 2]\n!error (l'5), e\n!print e'\"type\"");
    assert_eq!(out, "index\n");
}

#[test]
fn while_loop_counts() {
    let out = run("n = 0\nwhile n < 3:\n  !print n\n  n = n + 1");
    assert_eq!(out, "0\n1\n2\n");
}

#[test]
fn for_iterates_a_list_and_a_range_in_lockstep() {
    let out = run("l = [10, 20, 30]\nfor !range 3 -> i, l -> x:\n  !print i, x");
    assert_eq!(out, "0 10\n1 20\n2 30\n");
}

#[test]
fn for_lockstep_stops_at_the_shortest() {
    let out = run("a = [1, 2, 3]\nb = [4, 5]\nfor a -> x, b -> y:\n  !print x, y");
    assert_eq!(out, "1 4\n2 5\n");
}

#[test]
fn repeat_runs_the_block_n_times() {
    let out = run("repeat 3:\n  !print \"tick\"");
    assert_eq!(out, "tick\ntick\ntick\n");
}

#[test]
fn switch_runs_the_first_matching_case() {
    let source = "x = 2\nswitch x:\n  case 1:\n    !print \"one\"\n  case 2:\n    !print \"two\"\n  case 3:\n    !print \"three\"";
    assert_eq!(run(source), "two\n");
}

#[test]
fn compound_assignment_updates_in_place() {
    let out = run("a = 10\na += 5\na -= 1\n!print a");
    assert_eq!(out, "14\n");
}

#[test]
fn postfix_increment_and_decrement() {
    let out = run("n = 5\nn++\nn++\nn--\n!print n");
    assert_eq!(out, "6\n");
}

#[test]
fn destructuring_assignment_reads_by_position() {
    let out = run("l = [7, 8]\na, b = l\n!print a, b");
    assert_eq!(out, "7 8\n");
}

#[test]
fn field_access_reads_pair_entries() {
    let out = run("obj = {\"name\": \"minim\"}\n!print obj.name");
    assert_eq!(out, "minim\n");
}

#[test]
fn nested_containers_print_recursively() {
    let out = run("l = [1, [2, 3], {\"k\": 4}]\n!print l");
    assert_eq!(out, "[1, [2, 3], {\"k\": 4}]\n");
}

#[test]
fn nested_assignment_through_two_levels() {
    let out = run("m = {\"xs\": [1, 2, 3]}\nm'\"xs\"'1 = 9\n!print m'\"xs\"");
    assert_eq!(out, "[1, 9, 3]\n");
}

#[test]
fn missing_pair_keys_are_created_on_assignment() {
    let out = run("p = {\"a\": 1}\np'\"b\" = 2\n!print p'\"b\"");
    assert_eq!(out, "2\n");
}

#[test]
fn callee_mutation_does_not_leak_to_caller() {
    let source = "func poke l:\n  l'0 = 99\n  return l'0\nxs = [1, 2]\n!print !poke xs\n!print xs";
    assert_eq!(run(source), "99\n[1, 2]\n");
}

#[test]
fn variadic_tail_gathers_extras() {
    let source = "func tail first, rest:\n  return rest\n!print !tail 1, 2, 3, 4";
    assert_eq!(run(source), "[2, 3, 4]\n");
}

#[test]
fn multi_value_return_comes_back_as_a_list() {
    let source = "func pairup a, b:\n  return a, b\n!print !pairup 1, 2";
    assert_eq!(run(source), "[1, 2]\n");
}

#[test]
fn rebind_writes_to_the_outer_scope() {
    let source = "counter = 0\nfunc bump:\n  counter &= 10\n  return counter\n!bump\n!print counter";
    assert_eq!(run(source), "10\n");
}

#[test]
fn functions_capture_outer_names_by_value() {
    let source = "base = 100\nfunc offset x:\n  return base + x\n!print !offset 5";
    assert_eq!(run(source), "105\n");
}

#[test]
fn byte_literals_and_wraparound() {
    let out = run("b = b.250\n!print b + b.10");
    assert_eq!(out, "b.4\n");
}

#[test]
fn typed_array_literal_renders_with_its_dtype() {
    let out = run("a = int.[1, 2, 3]\n!print a");
    assert_eq!(out, "int.[1, 2, 3]\n");
}

#[test]
fn id_and_value_round_trip() {
    let out = run("x = 7\ni = !id x\n!print !value i");
    assert_eq!(out, "7\n");
}

#[test]
fn id_write_through_updates_the_owner() {
    let out = run("x = 1\ni = !id x\ny = 42\n!id y, i\n!print x");
    assert_eq!(out, "42\n");
}

#[test]
fn ternary_and_logic_operators() {
    let out = run("!print !ternary (1 < 2 and true), \"yes\", \"no\"");
    assert_eq!(out, "yes\n");
}

#[test]
fn not_negates_a_condition() {
    let out = run("x = false\nif not x:\n  !print \"flipped\"");
    assert_eq!(out, "flipped\n");
}

#[test]
fn unary_minus_in_expressions() {
    let out = run("x = 5\ny = -x + 1\n!print y");
    assert_eq!(out, "-4\n");
}

#[test]
fn has_and_index_builtins() {
    let out = run("l = [4, 5, 6]\n!print !has l, 5\n!print !index l, 6\n!print !index l, 9");
    assert_eq!(out, "true\n2\n-1\n");
}

#[test]
fn split_and_join_round_trip() {
    let out = run("parts = !split \"a,b,c\", \",\"\n!print parts\n!print !join parts, \"-\"");
    assert_eq!(out, "[\"a\", \"b\", \"c\"]\na-b-c\n");
}

#[test]
fn fmt_interpolates_variables() {
    let out = run("name = \"world\"\n!print !fmt \"hello {name}\"");
    assert_eq!(out, "hello world\n");
}

#[test]
fn convert_between_kinds() {
    let out = run("x = 3.9\n!print !convert x, 1\ns = \"12\"\n!print (!convert s, 1) + 1");
    assert_eq!(out, "3\n13\n");
}

#[test]
fn comments_and_blank_lines_are_ignored() {
    let out = run("# leading comment\n\nx = 1 # trailing\n\n!print x");
    assert_eq!(out, "1\n");
}

#[test]
fn string_escapes_reach_the_value() {
    let out = run("!print \"line1\\nline2\"");
    assert_eq!(out, "line1\nline2\n");
}

#[test]
fn noth_prints_as_nothing() {
    let out = run("!print Nothing");
    assert_eq!(out, "Nothing\n");
}
