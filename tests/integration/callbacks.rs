// Transaction notifications delivered to session callbacks.
use crate::common::{declare_ok, record_events, session, Event};
use kiln::CompilationResult;

#[test]
fn test_commit_rollback_and_unload_are_reported() {
    let interp = session();
    let log = record_events(&interp);

    declare_ok(&interp, "int a = 1;");
    let a = interp.last_transaction().unwrap();
    assert_eq!(interp.declare("int a = 2;"), CompilationResult::Failure);
    assert_eq!(interp.unload(1), 1);

    let events = log.borrow().clone();
    assert_eq!(events.len(), 3, "{:?}", events);
    assert_eq!(events[0], Event::Committed(a));
    assert!(matches!(events[1], Event::RolledBack(id) if id != a));
    assert_eq!(events[2], Event::Unloaded(a));
}

#[test]
fn test_removed_callbacks_see_nothing() {
    let interp = session();
    let log = record_events(&interp);
    declare_ok(&interp, "int a = 1;");
    interp.set_callbacks(None);
    declare_ok(&interp, "int b = 1;");
    assert_eq!(log.borrow().len(), 1);
}

#[test]
fn test_nested_commits_are_reported_with_their_root() {
    let interp = session();
    let log = record_events(&interp);
    let outer = {
        let push = interp.push_transaction();
        declare_ok(&interp, "int a = 1;");
        declare_ok(&interp, "int b = 2;");
        assert!(log.borrow().is_empty());
        let outer = push.transaction().unwrap();
        push.pop();
        outer
    };
    let events = log.borrow().clone();
    assert_eq!(events.len(), 3, "{:?}", events);
    assert!(events[..2]
        .iter()
        .all(|e| matches!(e, Event::Committed(id) if *id != outer)));
    assert_eq!(events[2], Event::Committed(outer));
}

#[test]
fn test_failed_root_reports_no_nested_commit() {
    let interp = session();
    let log = record_events(&interp);
    {
        let push = interp.push_transaction();
        declare_ok(&interp, "int a = 1;");
        assert_eq!(interp.declare("int b = c;"), CompilationResult::Failure);
        push.pop();
    }
    let events = log.borrow().clone();
    assert!(!events.is_empty());
    assert!(events.iter().all(|e| matches!(e, Event::RolledBack(_))), "{:?}", events);
    assert!(interp.address_of_global("a").is_none());
}
