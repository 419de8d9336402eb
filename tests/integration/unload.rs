// Unloading transactions and redoing them.
use crate::common::{declare_ok, eval_int, session};
use kiln::error::{LoadError, UnloadError};
use kiln::{CompilationResult, ExecutionResult, Value};

#[test]
fn test_unload_then_redefine() {
    let interp = session();
    declare_ok(&interp, "int f() { return 1; }");
    assert_eq!(interp.run_function("f", &[]).1, Value::Int(1));
    assert_eq!(interp.unload(1), 1);
    assert!(interp.address_of_global("f").is_none());
    assert_eq!(
        interp.run_function("f", &[]).0,
        ExecutionResult::UnknownFunction
    );
    declare_ok(&interp, "int f() { return 2; }");
    assert_eq!(interp.run_function("f", &[]).1, Value::Int(2));
}

#[test]
fn test_unload_undoes_prompt_evaluations() {
    let interp = session();
    declare_ok(&interp, "int g = 3;");
    assert_eq!(eval_int(&interp, "g * 2"), Some(6));
    assert_eq!(eval_int(&interp, "g * 3"), Some(9));
    assert_eq!(interp.parser().all_transactions().len(), 3);
    assert_eq!(interp.unload(2), 2);
    assert_eq!(interp.parser().all_transactions().len(), 1);
    assert_eq!(eval_int(&interp, "g"), Some(3));
}

#[test]
fn test_unload_more_than_history() {
    let interp = session();
    declare_ok(&interp, "int a = 1;");
    declare_ok(&interp, "int b = 2;");
    assert_eq!(interp.unload(5), 2);
    assert_eq!(interp.first_transaction(), None);
    assert_eq!(interp.unload(1), 0);
}

#[test]
fn test_used_definition_cannot_be_unloaded() {
    let interp = session();
    declare_ok(&interp, "int base() { return 40; }");
    let base = interp.last_transaction().unwrap();
    declare_ok(&interp, "int user() { return base() + 2; }");

    let err = interp.unload_transaction(base).unwrap_err();
    assert!(matches!(err, UnloadError::Load(LoadError::InUse { .. })), "{}", err);
    // Nothing changed.
    assert_eq!(interp.run_function("user", &[]).1, Value::Int(42));
    assert_eq!(interp.parser().all_transactions().len(), 2);

    // Newest first works.
    assert_eq!(interp.unload(2), 2);
    assert_eq!(interp.declare("int base = 1;"), CompilationResult::Success);
}

#[test]
fn test_unload_out_of_order() {
    let interp = session();
    declare_ok(&interp, "int base() { return 1; }");
    declare_ok(&interp, "int user() { return base(); }");
    let user = interp.last_transaction().unwrap();
    declare_ok(&interp, "int other = 5;");
    // With `user` gone nothing imports from `base` any more.
    interp.unload_transaction(user).unwrap();
    assert_eq!(interp.unload(2), 2);
    assert_eq!(interp.first_transaction(), None);
}

#[test]
fn test_nested_transaction_cannot_be_unloaded_alone() {
    let interp = session();
    let guard = interp.push_transaction();
    declare_ok(&interp, "int inner = 1;");
    let nested = {
        let parser = interp.parser();
        let outer = parser.arena().get(guard.transaction().unwrap()).unwrap();
        outer.last_nested().unwrap()
    };
    let root = guard.pop().transaction.unwrap();
    assert!(matches!(
        interp.unload_transaction(nested),
        Err(UnloadError::Nested { .. })
    ));
    interp.unload_transaction(root).unwrap();
    assert!(interp.address_of_global("inner").is_none());
}

#[test]
fn test_unknown_transaction() {
    let interp = session();
    declare_ok(&interp, "int a = 1;");
    let id = interp.last_transaction().unwrap();
    interp.unload_transaction(id).unwrap();
    assert!(matches!(
        interp.unload_transaction(id),
        Err(UnloadError::Unknown(_))
    ));
}
