// End-to-end prompt sessions: parse, commit, load and run.
use crate::common::{declare_ok, eval_int, session};
use kiln::{CompilationResult, ExecutionResult, Value};

#[test]
fn test_recursive_function() {
    let interp = session();
    declare_ok(
        &interp,
        "long fact(long n) { if (n <= 1) return 1; return n * fact(n - 1); }",
    );
    assert_eq!(eval_int(&interp, "fact(10)"), Some(3628800));
}

#[test]
fn test_loops_and_locals() {
    let interp = session();
    declare_ok(
        &interp,
        "int sum(int n) { int s = 0; while (n > 0) { s = s + n; n = n - 1; } return s; }",
    );
    assert_eq!(eval_int(&interp, "sum(100)"), Some(5050));
}

#[test]
fn test_globals_are_shared_across_fragments() {
    let interp = session();
    declare_ok(&interp, "int counter = 0;");
    declare_ok(&interp, "int bump() { counter = counter + 1; return counter; }");
    assert_eq!(interp.execute("bump();"), CompilationResult::Success);
    assert_eq!(interp.execute("bump();"), CompilationResult::Success);
    assert_eq!(eval_int(&interp, "counter"), Some(2));
}

#[test]
fn test_prompt_declarations_become_globals() {
    let interp = session();
    assert_eq!(interp.process("int x = 6; int y = x * 7;").0, CompilationResult::Success);
    assert_eq!(interp.process("y").1, Value::Int(42));
    assert_eq!(interp.process("y;").1, Value::Void);
}

#[test]
fn test_division_by_zero_yields_zero() {
    let interp = session();
    declare_ok(&interp, "int zero = 0;");
    assert_eq!(eval_int(&interp, "7 / zero"), Some(0));
    assert_eq!(eval_int(&interp, "7 % zero"), Some(0));
    declare_ok(&interp, "int folded = 7 / 0;");
    assert_eq!(eval_int(&interp, "folded"), Some(0));
}

#[test]
fn test_min_divided_by_minus_one_wraps() {
    let interp = session();
    assert_eq!(
        eval_int(&interp, "(-9223372036854775807 - 1) / -1"),
        Some(i64::MIN)
    );
    assert_eq!(eval_int(&interp, "(-9223372036854775807 - 1) % -1"), Some(0));
    declare_ok(&interp, "long quot(long a, long b) { return a / b; }");
    declare_ok(&interp, "long rem(long a, long b) { return a % b; }");
    assert_eq!(
        interp.run_function("quot", &[i64::MIN, -1]),
        (ExecutionResult::Success, Value::Int(i64::MIN))
    );
    assert_eq!(
        interp.run_function("rem", &[i64::MIN, -1]),
        (ExecutionResult::Success, Value::Int(0))
    );
    assert_eq!(interp.run_function("quot", &[i64::MIN, 2]).1, Value::Int(i64::MIN / 2));
}

#[test]
fn test_macros_substitute_at_the_prompt() {
    let interp = session();
    declare_ok(&interp, "#define WIDTH 40 + 2");
    assert_eq!(interp.macro_value("WIDTH").as_deref(), Some("40 + 2"));
    assert_eq!(eval_int(&interp, "WIDTH"), Some(42));
    declare_ok(&interp, "#undef WIDTH");
    assert_eq!(interp.macro_value("WIDTH"), None);
    assert_eq!(interp.evaluate("WIDTH").0, CompilationResult::Failure);
}

#[test]
fn test_parse_then_emit() {
    let interp = session();
    assert_eq!(interp.parse("int late(int a) { return a + 1; }"), CompilationResult::Success);
    let id = interp.last_transaction().unwrap();
    assert!(interp.address_of_global("late").is_none());
    assert_eq!(interp.emit_all_decls(id), ExecutionResult::Success);
    assert!(interp.address_of_global("late").is_some());
    assert_eq!(
        interp.run_function("late", &[41]),
        (ExecutionResult::Success, Value::Int(42))
    );
    // A second emit has nothing left to do.
    assert_eq!(interp.emit_all_decls(id), ExecutionResult::Success);
}

#[test]
fn test_emit_reports_unresolved_symbols() {
    let interp = session();
    declare_ok(&interp, "int missing(int a);");
    assert_eq!(interp.parse("int user() { return missing(1); }"), CompilationResult::Success);
    let id = interp.last_transaction().unwrap();
    assert_eq!(interp.emit_all_decls(id), ExecutionResult::UnresolvedSymbols);
    assert!(interp.address_of_global("user").is_none());
}

#[test]
fn test_compile_function_if_unique() {
    let interp = session();
    let first = interp.compile_function("one", "int one() { return 1; }", true);
    assert!(first.is_some());
    let history = interp.parser().all_transactions().len();
    assert_eq!(
        interp.compile_function("one", "int one() { return 1; }", true),
        first
    );
    assert_eq!(interp.parser().all_transactions().len(), history);
}

#[test]
fn test_load_file() {
    let dir = std::env::temp_dir().join(format!("kiln-load-file-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("defs.c");
    std::fs::write(&path, "int triple(int a) {\n  return a * 3;\n}\nint nine = 9;\n").unwrap();

    let interp = session();
    assert_eq!(interp.load_file(&path).unwrap(), CompilationResult::Success);
    assert_eq!(eval_int(&interp, "triple(nine)"), Some(27));
    assert!(interp.load_file(&dir.join("absent.c")).is_err());
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_pushed_transaction_runs_static_init_on_pop() {
    let interp = session();
    declare_ok(&interp, "int base = 10;");
    let guard = interp.push_transaction();
    declare_ok(&interp, "int derived = base * 2;");
    declare_ok(&interp, "int twice_derived() { return derived * 2; }");
    assert!(interp.address_of_global("derived").is_none());
    let prt = guard.pop();
    assert_eq!(prt.result, kiln::ParseResult::Success);
    // Ctors already ran on pop; running them again is a no-op.
    let id = prt.transaction.unwrap();
    assert_eq!(interp.run_static_init_on_transaction(id), ExecutionResult::Success);
    assert_eq!(eval_int(&interp, "twice_derived()"), Some(40));
}
