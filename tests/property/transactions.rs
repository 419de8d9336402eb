// Property tests for transaction isolation.
//
// A failed fragment must leave no trace, and unloading must return the
// session to exactly the state it had before.

use crate::common::{declare_ok, session};
use kiln::{CompilationResult, Value};
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn failed_fragment_changes_nothing(values in prop::collection::vec(-1000i64..1000, 1..6)) {
        let interp = session();
        for (i, v) in values.iter().enumerate() {
            declare_ok(&interp, &format!("long g{} = {};", i, v));
        }
        let history = interp.parser().all_transactions();

        // The new global is valid; the redefinition of g0 sinks the fragment.
        let bad = format!("long fresh = 1; long g0 = {};", values[0] + 1);
        prop_assert_eq!(interp.declare(&bad), CompilationResult::Failure);

        prop_assert_eq!(interp.parser().all_transactions(), history);
        prop_assert!(interp.parser().decls().lookup("fresh").is_none());
        prop_assert!(interp.address_of_global("fresh").is_none());
        for (i, v) in values.iter().enumerate() {
            prop_assert_eq!(interp.evaluate(&format!("g{}", i)).1, Value::Int(*v));
        }
    }

    #[test]
    fn unload_then_redo_is_identical(values in prop::collection::vec(-1000i64..1000, 1..6)) {
        let interp = session();
        for (i, v) in values.iter().enumerate() {
            declare_ok(&interp, &format!("long f{}() {{ return {}; }}", i, v));
        }
        prop_assert_eq!(interp.unload(values.len()), values.len());
        prop_assert!(interp.first_transaction().is_none());
        for i in 0..values.len() {
            let name = format!("f{}", i);
            prop_assert!(interp.address_of_global(&name).is_none());
        }

        for (i, v) in values.iter().enumerate() {
            declare_ok(&interp, &format!("long f{}() {{ return {}; }}", i, v));
        }
        for (i, v) in values.iter().enumerate() {
            prop_assert_eq!(interp.run_function(&format!("f{}", i), &[]).1, Value::Int(*v));
        }
    }

    #[test]
    fn history_is_ordered(count in 1usize..8) {
        let interp = session();
        for i in 0..count {
            declare_ok(&interp, &format!("int h{} = {};", i, i));
        }
        let history = interp.parser().all_transactions();
        prop_assert_eq!(history.len(), count);
        prop_assert!(history.windows(2).all(|w| w[0] < w[1]));
        let parser = interp.parser();
        for w in history.windows(2) {
            prop_assert_eq!(parser.arena().get(w[0]).and_then(|t| t.next()), Some(w[1]));
        }
    }
}
