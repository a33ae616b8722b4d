mod common;

use aps_engine::run_schedule;
use common::*;

#[test]
fn two_step_lot_schedules_back_to_back() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("store.sqlite3");
    let conn = open_seeded(&db);

    insert_machine(&conn, "m1", "G1");
    insert_machine(&conn, "m2", "G2");
    insert_lot(&conn, "L1", 1, Some(at(24 * 60)));
    insert_op(&conn, "L1", "STEP1", "G1", 10, 1);
    insert_op(&conn, "L1", "STEP2", "G2", 20, 2);

    let summary = run_schedule(&makespan_config(db.clone(), dir.path().join("out"))).unwrap();
    assert!(summary.has_solution);
    assert_eq!(summary.waves_total, 1);
    assert_eq!(summary.waves_failed, 0);

    let (s1_in, s1_out, s1_machine) = planned_fields(&conn, "L1", "STEP1");
    assert_eq!(s1_in, Some(at(0)));
    assert_eq!(s1_out, Some(at(10)));
    assert_eq!(s1_machine, Some("m1".to_string()));

    let (s2_in, s2_out, s2_machine) = planned_fields(&conn, "L1", "STEP2");
    assert_eq!(s2_in, Some(at(10)));
    assert_eq!(s2_out, Some(at(30)));
    assert_eq!(s2_machine, Some("m2".to_string()));
}

#[test]
fn wip_prefix_shifts_the_normal_successor() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("store.sqlite3");
    let conn = open_seeded(&db);

    insert_machine(&conn, "m1", "G1");
    insert_machine(&conn, "m2", "G2");
    insert_lot(&conn, "L1", 1, None);
    // Checked in 4 minutes before the origin with 10 minutes of work: 6 remain.
    insert_wip_op(&conn, "L1", "STEP1", "G1", 10, 1, "m1", at(-4));
    insert_op(&conn, "L1", "STEP2", "G2", 5, 2);

    let wip_before = planned_fields(&conn, "L1", "STEP1");
    run_schedule(&makespan_config(db.clone(), dir.path().join("out"))).unwrap();

    // The WIP step is never rewritten.
    assert_eq!(planned_fields(&conn, "L1", "STEP1"), wip_before);

    // Its successor starts when the remaining work ends.
    let (s2_in, s2_out, s2_machine) = planned_fields(&conn, "L1", "STEP2");
    assert_eq!(s2_in, Some(at(6)));
    assert_eq!(s2_out, Some(at(11)));
    assert_eq!(s2_machine, Some("m2".to_string()));
}

#[test]
fn qtime_gap_is_respected_under_pressure() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("store.sqlite3");
    let conn = open_seeded(&db);

    insert_machine(&conn, "m3", "G3");
    insert_machine(&conn, "m4", "G4");
    insert_lot(&conn, "L1", 1, None);
    insert_op(&conn, "L1", "STEP3", "G3", 100, 1);
    insert_op(&conn, "L1", "STEP4", "G4", 50, 2);
    // m4 is blocked long enough that STEP3 must not finish too early.
    insert_unavailable(&conn, "m4", at(0), at(350), "PM");

    let summary = run_schedule(&makespan_config(db.clone(), dir.path().join("out"))).unwrap();
    assert!(summary.has_solution);

    let (_, s3_out, _) = planned_fields(&conn, "L1", "STEP3");
    let (s4_in, _, _) = planned_fields(&conn, "L1", "STEP4");
    let s3_out = s3_out.unwrap();
    let s4_in = s4_in.unwrap();

    assert!(s4_in >= at(350), "STEP4 started inside the PM window: {}", s4_in);
    assert!((s4_in - s3_out).num_minutes() <= 200, "Q-time gap violated: {} .. {}", s3_out, s4_in);
}

#[test]
fn unavailability_pushes_the_start() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("store.sqlite3");
    let conn = open_seeded(&db);

    insert_machine(&conn, "m1", "G1");
    insert_lot(&conn, "L1", 1, None);
    insert_op(&conn, "L1", "STEP1", "G1", 60, 1);
    insert_unavailable(&conn, "m1", at(0), at(30), "PM");

    run_schedule(&makespan_config(db.clone(), dir.path().join("out"))).unwrap();

    let (s_in, s_out, machine) = planned_fields(&conn, "L1", "STEP1");
    assert!(s_in.unwrap() >= at(30), "operation started inside the PM window: {:?}", s_in);
    assert_eq!((s_out.unwrap() - s_in.unwrap()).num_minutes(), 60);
    assert_eq!(machine, Some("m1".to_string()));
}

#[test]
fn single_member_group_is_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("store.sqlite3");
    let conn = open_seeded(&db);

    insert_machine(&conn, "only-machine", "G1");
    insert_lot(&conn, "L1", 1, None);
    insert_op(&conn, "L1", "STEP1", "G1", 15, 1);

    run_schedule(&makespan_config(db.clone(), dir.path().join("out"))).unwrap();
    let (_, _, machine) = planned_fields(&conn, "L1", "STEP1");
    assert_eq!(machine, Some("only-machine".to_string()));
}

#[test]
fn empty_store_is_a_clean_no_op() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("store.sqlite3");
    let _conn = open_seeded(&db);

    let out = dir.path().join("out");
    let summary = run_schedule(&makespan_config(db, out.clone())).unwrap();

    assert_eq!(summary.waves_total, 0);
    assert_eq!(summary.lots_loaded, 0);
    assert!(!summary.has_solution);
    assert!(!out.exists(), "no artifacts expected for an empty lot set");
}

#[test]
fn release_time_holds_back_the_first_step() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("store.sqlite3");
    let conn = open_seeded(&db);

    insert_machine(&conn, "m1", "G1");
    conn.execute(
        "INSERT INTO Lots (LotId, Priority, LotCreateDate) VALUES ('L1', 1, ?1)",
        rusqlite::params![at(45)],
    )
    .unwrap();
    insert_op(&conn, "L1", "STEP1", "G1", 10, 1);

    run_schedule(&makespan_config(db.clone(), dir.path().join("out"))).unwrap();
    let (s_in, _, _) = planned_fields(&conn, "L1", "STEP1");
    assert!(s_in.unwrap() >= at(45), "release time ignored: {:?}", s_in);
}
