// Prompt input validation and printable values.
use kiln::interpreter::{InputValidator, ValidationResult};
use kiln::{ExecutionResult, Value};

#[test]
fn test_balanced_lines_complete_immediately() {
    let mut v = InputValidator::new();
    assert_eq!(v.validate("int x = (1 + 2) * 3;"), ValidationResult::Complete);
    assert_eq!(v.take_input(), "int x = (1 + 2) * 3;");
    assert!(!v.is_pending());
}

#[test]
fn test_open_brace_spans_lines() {
    let mut v = InputValidator::new();
    assert_eq!(v.validate("int f() {"), ValidationResult::Incomplete);
    assert!(v.is_pending());
    assert_eq!(v.validate("  return 1;"), ValidationResult::Incomplete);
    assert_eq!(v.validate("}"), ValidationResult::Complete);
    let text = v.take_input();
    assert!(text.starts_with("int f() {"));
    assert!(text.trim_end().ends_with('}'));
}

#[test]
fn test_brackets_in_comments_are_ignored() {
    let mut v = InputValidator::new();
    assert_eq!(v.validate("int a = 1; // {"), ValidationResult::Complete);
    v.take_input();
    assert_eq!(v.validate("int b = 2; /* ( [ "), ValidationResult::Incomplete);
    assert_eq!(v.validate("*/"), ValidationResult::Complete);
}

#[test]
fn test_mismatch_resets() {
    let mut v = InputValidator::new();
    assert_eq!(v.validate("f(]"), ValidationResult::Mismatch);
    assert!(!v.is_pending());
    assert_eq!(v.validate("g()"), ValidationResult::Complete);
}

#[test]
fn test_value_display() {
    assert_eq!(Value::Int(-3).to_string(), "(long) -3");
    assert_eq!(Value::Void.to_string(), "(void)");
    assert!(!Value::default().is_valid());
    assert_eq!(Value::Int(7).as_i64(), Some(7));
    assert!(ExecutionResult::UnresolvedSymbols.is_error());
    assert!(!ExecutionResult::NoCodeGen.is_error());
}
