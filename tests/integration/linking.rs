// Symbol resolution between transactions, sessions and the host process.
use crate::common::{declare_ok, eval_int, session};
use kiln::{CompilationResult, InvocationOptions, Value};

#[test]
fn test_inline_function_is_shared() {
    let interp = session();
    declare_ok(&interp, "inline int sq(int x) { return x * x; }");
    declare_ok(&interp, "int a(int v) { return sq(v) + 1; }");
    declare_ok(&interp, "int b(int v) { return sq(v) - 1; }");
    assert_eq!(interp.run_function("a", &[3]).1, Value::Int(10));
    assert_eq!(interp.run_function("b", &[3]).1, Value::Int(8));
}

#[test]
fn test_private_copy_survives_owner_unload() {
    let interp = session();
    declare_ok(&interp, "inline int sq(int x) { return x * x; }");
    let owner = interp.last_transaction().unwrap();
    declare_ok(&interp, "int a(int v) { return sq(v); }");

    interp.unload_transaction(owner).unwrap();
    assert_eq!(interp.run_function("a", &[4]).1, Value::Int(16));
    // The private copy took over the symbol.
    assert!(interp.address_of_global("sq").is_some());
}

#[test]
fn test_large_inline_function_is_imported() {
    let opts = InvocationOptions {
        weak_inline_threshold: 1,
        ..InvocationOptions::default()
    };
    let interp = kiln::Interpreter::with_minic(opts).unwrap();
    declare_ok(&interp, "inline int sq(int x) { return x * x; }");
    let owner = interp.last_transaction().unwrap();
    declare_ok(&interp, "int a(int v) { return sq(v); }");
    assert_eq!(interp.run_function("a", &[5]).1, Value::Int(25));
    // `a` links against the owner's copy, which therefore stays.
    assert!(interp.unload_transaction(owner).is_err());
}

#[test]
fn test_host_function() {
    let interp = session();
    declare_ok(&interp, "long labs(long v);");
    assert_eq!(eval_int(&interp, "labs(-5)"), Some(5));
}

#[test]
fn test_host_lookup_can_be_disabled() {
    let interp = session();
    interp.host_lookup_policy().set_skip_host_lookup(true);
    declare_ok(&interp, "long labs(long v);");
    assert_eq!(interp.evaluate("labs(-5)").0, CompilationResult::Failure);
    interp.host_lookup_policy().set_skip_host_lookup(false);
    assert_eq!(eval_int(&interp, "labs(-5)"), Some(5));
}

#[test]
fn test_injected_definition() {
    let interp = session();
    let labs = interp.address_of_global("labs").expect("labs in host");
    declare_ok(&interp, "long magnitude(long v);");
    assert_eq!(interp.add_or_replace_definition("magnitude", labs), None);
    assert_eq!(eval_int(&interp, "magnitude(-9)"), Some(9));
}

#[test]
fn test_missing_symbol_fails_the_fragment() {
    let interp = session();
    declare_ok(&interp, "int nowhere_to_be_found(int a);");
    let before = interp.parser().all_transactions();
    assert_eq!(interp.evaluate("nowhere_to_be_found(1)").0, CompilationResult::Failure);
    assert_eq!(interp.parser().all_transactions(), before);
    assert!(interp
        .take_diagnostics()
        .iter()
        .any(|d| d.message.contains("nowhere_to_be_found")));
}

#[test]
fn test_child_session_sees_parent_symbols() {
    let parent = session();
    declare_ok(&parent, "int shared(int v) { return v + 100; }");
    let child = parent.new_minic_child(InvocationOptions::default()).unwrap();
    assert!(child
        .host_lookup_policy()
        .is_shared_with(parent.host_lookup_policy()));

    declare_ok(&child, "int shared(int v);");
    assert_eq!(eval_int(&child, "shared(1)"), Some(101));
    // The parent knows nothing about the child.
    declare_ok(&child, "int only_child() { return 7; }");
    assert!(parent.address_of_global("only_child").is_none());
}

#[test]
fn test_parent_code_stays_while_child_uses_it() {
    let parent = session();
    declare_ok(&parent, "int g() { return 3; }");
    let child = parent.new_minic_child(InvocationOptions::default()).unwrap();
    declare_ok(&child, "int g(); int h() { return g(); }");

    assert_eq!(parent.unload(1), 0);
    assert_eq!(child.run_function("h", &[]).1, Value::Int(3));

    assert_eq!(child.unload(1), 1);
    assert_eq!(parent.unload(1), 1);
    assert!(parent.address_of_global("g").is_none());
}
