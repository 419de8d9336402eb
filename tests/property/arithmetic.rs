// Property tests for generated arithmetic.
//
// Compiled code, constant folding and Rust's wrapping arithmetic must agree.

use crate::common::{declare_ok, session};
use kiln::Value;
use proptest::prelude::*;

fn expected(op: &str, a: i64, b: i64) -> i64 {
    match op {
        "+" => a.wrapping_add(b),
        "-" => a.wrapping_sub(b),
        "*" => a.wrapping_mul(b),
        "/" if b == 0 => 0,
        "%" if b == 0 => 0,
        "/" => a.wrapping_div(b),
        "%" => a.wrapping_rem(b),
        "<" => (a < b) as i64,
        "==" => (a == b) as i64,
        _ => unreachable!(),
    }
}

fn arb_op() -> impl Strategy<Value = &'static str> {
    prop::sample::select(vec!["+", "-", "*", "/", "%", "<", "=="])
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn compiled_matches_rust(op in arb_op(), a in -10_000i64..10_000, b in -100i64..100) {
        let interp = session();
        declare_ok(&interp, &format!("long op(long a, long b) {{ return a {} b; }}", op));
        prop_assert_eq!(
            interp.run_function("op", &[a, b]).1,
            Value::Int(expected(op, a, b))
        );
    }

    #[test]
    fn division_edges_never_trap(
        a in prop_oneof![Just(i64::MIN), Just(i64::MAX), any::<i64>()],
        b in prop_oneof![Just(-1i64), Just(0i64), Just(1i64), any::<i64>()],
    ) {
        let interp = session();
        declare_ok(&interp, "long quot(long a, long b) { return a / b; }");
        declare_ok(&interp, "long rem(long a, long b) { return a % b; }");
        prop_assert_eq!(interp.run_function("quot", &[a, b]).1, Value::Int(expected("/", a, b)));
        prop_assert_eq!(interp.run_function("rem", &[a, b]).1, Value::Int(expected("%", a, b)));
    }

    #[test]
    fn folded_matches_compiled(op in arb_op(), a in 0i64..10_000, b in -100i64..100) {
        let interp = session();
        // `b` may be negative, so parenthesize it for the folded form.
        declare_ok(&interp, &format!("long folded = {} {} ({});", a, op, b));
        declare_ok(&interp, &format!("long op(long a, long b) {{ return a {} b; }}", op));
        let folded = interp.evaluate("folded").1;
        prop_assert_eq!(folded, interp.run_function("op", &[a, b]).1);
    }
}
