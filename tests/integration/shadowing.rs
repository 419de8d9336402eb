// Redefinition at the prompt when the session allows it.
use crate::common::{declare_ok, eval_int, session, shadowing_session};
use kiln::{CompilationResult, RuntimeOptions, Value};

#[test]
fn test_function_redefinition_replaces_lookup() {
    let interp = shadowing_session();
    declare_ok(&interp, "int f() { return 1; }");
    assert_eq!(interp.run_function("f", &[]).1, Value::Int(1));
    declare_ok(&interp, "int f() { return 2; }");
    assert_eq!(interp.run_function("f", &[]).1, Value::Int(2));
    assert_eq!(eval_int(&interp, "f() + 10"), Some(12));
}

#[test]
fn test_old_users_keep_old_definition() {
    let interp = shadowing_session();
    declare_ok(&interp, "int v = 1;");
    declare_ok(&interp, "int get_v() { return v; }");
    declare_ok(&interp, "int v = 5;");
    assert_eq!(interp.run_function("get_v", &[]).1, Value::Int(1));
    assert_eq!(eval_int(&interp, "v"), Some(5));
}

#[test]
fn test_unloading_redefinition_restores_previous() {
    let interp = shadowing_session();
    declare_ok(&interp, "int f() { return 1; }");
    declare_ok(&interp, "int f() { return 2; }");
    let second = interp.last_transaction().unwrap();
    interp.unload_transaction(second).unwrap();
    assert_eq!(interp.run_function("f", &[]).1, Value::Int(1));
}

#[test]
fn test_redefinition_toggles_at_runtime() {
    let interp = session();
    declare_ok(&interp, "int g = 1;");
    assert_eq!(interp.declare("int g = 2;"), CompilationResult::Failure);

    interp.set_runtime_options(RuntimeOptions {
        allow_redefinition: true,
    });
    assert!(interp.runtime_options().allow_redefinition);
    declare_ok(&interp, "int g = 2;");
    assert_eq!(eval_int(&interp, "g"), Some(2));

    interp.set_runtime_options(RuntimeOptions::default());
    assert_eq!(interp.declare("int g = 3;"), CompilationResult::Failure);
}

#[test]
fn test_prompt_locals_shadow_across_lines() {
    let interp = shadowing_session();
    assert_eq!(interp.process("int x = 1;").0, CompilationResult::Success);
    assert_eq!(interp.process("int x = 2;").0, CompilationResult::Success);
    assert_eq!(interp.process("x").1, Value::Int(2));
}
