// Session history: commit order, successor links, and transaction states
// as seen through the public session API.
use crate::common::{declare_ok, session};
use kiln::{CompilationResult, State};

#[test]
fn test_history_follows_commit_order() {
    let interp = session();
    assert_eq!(interp.first_transaction(), None);
    declare_ok(&interp, "int a = 1;");
    declare_ok(&interp, "int b = 2;");
    declare_ok(&interp, "int c = 3;");

    let parser = interp.parser();
    let history = parser.all_transactions();
    assert_eq!(history.len(), 3);
    assert_eq!(interp.first_transaction(), Some(history[0]));
    assert_eq!(interp.last_transaction(), Some(history[2]));
    assert!(history.windows(2).all(|w| w[0] < w[1]));

    let arena = parser.arena();
    for pair in history.windows(2) {
        assert_eq!(arena.get(pair[0]).unwrap().next(), Some(pair[1]));
    }
    assert_eq!(arena.get(history[2]).unwrap().next(), None);
    for id in &history {
        let t = arena.get(*id).unwrap();
        assert_eq!(t.state(), State::Committed);
        assert!(!t.is_nested());
        assert!(t.resource().is_some());
    }
}

#[test]
fn test_failed_fragment_is_not_in_history() {
    let interp = session();
    declare_ok(&interp, "int a = 1;");
    assert_eq!(interp.declare("int a = 1;"), CompilationResult::Failure);
    assert_eq!(interp.declare("int b = ;"), CompilationResult::Failure);
    assert_eq!(interp.parser().all_transactions().len(), 1);
    assert_eq!(interp.current_transaction(), None);
}

#[test]
fn test_prototype_only_fragment_has_no_code() {
    let interp = session();
    declare_ok(&interp, "int later(int x);");
    let id = interp.last_transaction().unwrap();
    let parser = interp.parser();
    let t = parser.arena().get(id).unwrap();
    assert_eq!(t.state(), State::Committed);
    assert!(t.resource().is_none());
    assert_eq!(t.decls().len(), 1);
}

#[test]
fn test_unload_relinks_history() {
    let interp = session();
    declare_ok(&interp, "int a = 1;");
    declare_ok(&interp, "int b = 2;");
    declare_ok(&interp, "int c = 3;");
    let history = interp.parser().all_transactions();

    interp.unload_transaction(history[1]).unwrap();
    let parser = interp.parser();
    assert_eq!(parser.all_transactions(), vec![history[0], history[2]]);
    assert_eq!(parser.arena().get(history[0]).unwrap().next(), Some(history[2]));
    assert!(parser.decls().lookup("b").is_none());
    assert!(parser.decls().lookup("c").is_some());
}

#[test]
fn test_structure_dump_lists_every_transaction() {
    let interp = session();
    declare_ok(&interp, "int a = 1;");
    declare_ok(&interp, "int b = 2;");
    let mut out = String::new();
    interp.print_transaction_structure(&mut out).unwrap();
    for id in interp.parser().all_transactions() {
        assert!(out.contains(&id.to_string()), "missing {} in:\n{}", id, out);
    }
}

#[test]
fn test_blank_prompt_line_commits_empty_transaction() {
    let interp = session();
    assert!(interp.parser().all_transactions().is_empty());
    let (result, value) = interp.process("   ");
    assert_eq!(result, CompilationResult::Success);
    assert_eq!(value, kiln::Value::Invalid);

    let parser = interp.parser();
    let history = parser.all_transactions();
    assert_eq!(history.len(), 1);
    let t = parser.arena().get(history[0]).unwrap();
    assert_eq!(t.state(), State::Committed);
    assert!(t.is_empty());
    assert!(t.resource().is_none());
}
