// Diagnostics reported by failed fragments, drained through the session.
use crate::common::{declare_ok, session};
use kiln::diag::Level;
use kiln::{CompilationResult, Value};

#[test]
fn test_errors_are_buffered_until_taken() {
    let interp = session();
    assert_eq!(interp.declare("int f() { return y; }"), CompilationResult::Failure);
    let diags = interp.take_diagnostics();
    assert!(diags
        .iter()
        .any(|d| d.level == Level::Error && d.message.contains("undeclared identifier 'y'")));
    assert!(interp.take_diagnostics().is_empty());
}

#[test]
fn test_redefinition_is_reported() {
    let interp = session();
    declare_ok(&interp, "int g = 1;");
    interp.take_diagnostics();
    assert_eq!(interp.declare("int g = 2;"), CompilationResult::Failure);
    let diags = interp.take_diagnostics();
    assert!(diags.iter().any(|d| d.message.contains("redefinition of 'g'")));
}

#[test]
fn test_unbalanced_input_is_rejected() {
    let interp = session();
    assert_eq!(interp.process("int f() { return 1; )"), (CompilationResult::Failure, Value::Invalid));
    assert!(!interp.take_diagnostics().is_empty());
    // The validator starts over after a mismatch.
    assert_eq!(interp.process("1 + 1").1, Value::Int(2));
}
