//! Session-level configuration behavior: SET / SET LOCAL scoping across
//! commit and abort, RESET semantics, and the worker handoff payload.

use relcat::guc::serialize::{estimate_serialized_size, restore, serialize};
use relcat::guc::{GucAction, GucContext, GucRegistry, GucSource};

fn session() -> GucRegistry {
    GucRegistry::builtin()
}

fn set(r: &mut GucRegistry, name: &str, value: &str, action: GucAction) {
    r.set_config_option(name, Some(value), GucContext::UserSet, GucSource::Session, action, true)
        .unwrap();
}

fn show(r: &GucRegistry, name: &str) -> String {
    r.get_config_option(name, false, false).unwrap().unwrap()
}

#[test]
fn set_survives_commit_and_rolls_back_on_abort() {
    let mut r = session();
    set(&mut r, "work_mem", "8MB", GucAction::Set);
    r.end_transaction(true);
    assert_eq!(show(&r, "work_mem"), "8MB");

    set(&mut r, "work_mem", "32MB", GucAction::Set);
    r.end_transaction(false);
    assert_eq!(show(&r, "work_mem"), "8MB");
}

#[test]
fn set_local_never_survives_the_transaction() {
    for is_commit in [true, false] {
        let mut r = session();
        set(&mut r, "work_mem", "8MB", GucAction::Local);
        assert_eq!(show(&r, "work_mem"), "8MB");
        r.end_transaction(is_commit);
        assert_eq!(show(&r, "work_mem"), "4MB");
    }
}

#[test]
fn set_then_set_local_unwinds_to_pretransaction_value() {
    // the full matrix the scope stack must honor
    for is_commit in [true, false] {
        let mut r = session();
        set(&mut r, "work_mem", "8MB", GucAction::Set);
        r.end_transaction(true);

        set(&mut r, "work_mem", "16MB", GucAction::Set);
        set(&mut r, "work_mem", "1MB", GucAction::Local);
        assert_eq!(show(&r, "work_mem"), "1MB");
        r.end_transaction(is_commit);
        assert_eq!(show(&r, "work_mem"), "8MB");
    }
}

#[test]
fn set_local_then_set_commits_the_set() {
    let mut r = session();
    set(&mut r, "work_mem", "1MB", GucAction::Local);
    set(&mut r, "work_mem", "16MB", GucAction::Set);
    r.end_transaction(true);
    assert_eq!(show(&r, "work_mem"), "16MB");
}

#[test]
fn subtransaction_scoping() {
    let mut r = session();
    set(&mut r, "application_name", "outer", GucAction::Set);

    r.begin_nested();
    set(&mut r, "application_name", "inner", GucAction::Set);
    assert_eq!(show(&r, "application_name"), "inner");
    r.end_nested(true); // inner commit keeps the value for now
    assert_eq!(show(&r, "application_name"), "inner");

    r.begin_nested();
    set(&mut r, "application_name", "doomed", GucAction::Set);
    r.end_nested(false); // inner abort restores
    assert_eq!(show(&r, "application_name"), "inner");

    r.end_transaction(false); // whole transaction aborts
    assert_eq!(show(&r, "application_name"), "");
}

#[test]
fn reset_returns_to_boot_value_and_is_transactional() {
    let mut r = session();
    set(&mut r, "enable_seqscan", "off", GucAction::Set);
    r.end_transaction(true);

    r.set_config_option("enable_seqscan", None, GucContext::UserSet, GucSource::Session, GucAction::Set, true)
        .unwrap();
    assert_eq!(show(&r, "enable_seqscan"), "on");
    r.end_transaction(false);
    // aborted RESET: the off value is back
    assert_eq!(show(&r, "enable_seqscan"), "off");
}

#[test]
fn report_notices_flow_through_transaction_end() {
    let mut r = session();
    set(&mut r, "application_name", "worker-1", GucAction::Set);
    r.take_report_notices();

    // abort reverts the reported variable: that change is reported too
    set(&mut r, "application_name", "worker-2", GucAction::Set);
    r.take_report_notices();
    r.end_transaction(false);
    let notices = r.take_report_notices();
    assert_eq!(notices, vec![("application_name".to_string(), String::new())]);
}

#[test]
fn worker_payload_round_trips_a_whole_session() {
    let mut leader = session();
    set(&mut leader, "work_mem", "64MB", GucAction::Set);
    set(&mut leader, "search_path", "app,public", GucAction::Set);
    set(&mut leader, "session_authorization", "alice", GucAction::Set);
    set(&mut leader, "role", "auditor", GucAction::Set);
    leader.end_transaction(true);

    let payload = serialize(&leader);
    assert_eq!(payload.len(), estimate_serialized_size(&leader));

    let mut worker = session();
    restore(&mut worker, &payload).unwrap();
    for name in ["work_mem", "search_path", "session_authorization", "role"] {
        assert_eq!(show(&worker, name), show(&leader, name), "mismatch for {}", name);
    }
    // untouched variables stay at their defaults and were not serialized
    assert_eq!(show(&worker, "statement_timeout"), "0");
}

#[test]
fn superuser_only_values_are_gated_on_read() {
    let mut b = relcat::guc::GucRegistryBuilder::new();
    let var = b.define_string(
        "audit.log_directory",
        GucContext::Superuser,
        "Location of the audit log.",
        "/secure/audit",
    );
    var.flags.superuser_show_only = true;
    let r = b.build();

    assert!(r.get_config_option("audit.log_directory", false, true).is_err());
    assert_eq!(
        r.get_config_option("audit.log_directory", false, false).unwrap().unwrap(),
        "/secure/audit"
    );
    let masked = r.show_all(false);
    let row = masked.iter().find(|(n, _, _)| n == "audit.log_directory").unwrap();
    assert_eq!(row.1, "<superuser only>");
}
