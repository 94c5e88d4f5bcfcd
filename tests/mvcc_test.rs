mod common;

use colstore::{LockMode, TmResult, Transaction};

use crate::common::{insert_sequence, int_row, new_int_table, scan_ints, setup};
use colstore::utils::HandyRwLock;

#[test]
fn uncommitted_insert_is_invisible_to_others() {
    let _guard = setup();

    let table_rc = new_int_table("mvcc_insert.db", 1);
    let table = table_rc.rl();

    let writer = Transaction::new();
    table.insert_row(&writer, &int_row(&[7])).unwrap();

    // a concurrent snapshot sees nothing
    let reader = Transaction::new();
    assert_eq!(table.visible_count(&reader).unwrap(), 0);
    reader.commit().unwrap();

    // the writer sees its own row
    assert_eq!(table.visible_count(&writer).unwrap(), 1);
    writer.commit().unwrap();

    // a snapshot taken after commit sees it
    assert_eq!(scan_ints(&table), vec![vec![Some(7)]]);
}

#[test]
fn snapshot_taken_before_commit_stays_blind() {
    let _guard = setup();

    let table_rc = new_int_table("mvcc_snapshot.db", 1);
    let table = table_rc.rl();

    let writer = Transaction::new();
    table.insert_row(&writer, &int_row(&[1])).unwrap();

    let early_reader = Transaction::new();
    writer.commit().unwrap();

    // the reader's snapshot predates the commit
    assert_eq!(table.visible_count(&early_reader).unwrap(), 0);
    early_reader.commit().unwrap();
}

#[test]
fn abort_rolls_back_inserts() {
    let _guard = setup();

    let table_rc = new_int_table("mvcc_abort.db", 1);
    let table = table_rc.rl();

    insert_sequence(&table, 1..3);

    let tx = Transaction::new();
    table.insert_row(&tx, &int_row(&[100])).unwrap();
    table.insert_row(&tx, &int_row(&[101])).unwrap();
    tx.abort().unwrap();

    let rows = scan_ints(&table);
    assert_eq!(rows, vec![vec![Some(1)], vec![Some(2)]]);

    table.check_integrity();
}

#[test]
fn abort_restores_a_deleted_row() {
    let _guard = setup();

    let table_rc = new_int_table("mvcc_undo_delete.db", 1);
    let table = table_rc.rl();

    let tids = insert_sequence(&table, 1..4);

    let tx = Transaction::new();
    assert_eq!(table.delete_row(&tx, tids[1]).unwrap(), TmResult::Ok);
    tx.abort().unwrap();

    let rows = scan_ints(&table);
    assert_eq!(rows.len(), 3);
}

#[test]
fn deleters_race_to_being_modified_then_updated() {
    let _guard = setup();

    let table_rc = new_int_table("mvcc_race.db", 1);
    let table = table_rc.rl();

    let tids = insert_sequence(&table, 1..2);

    let first = Transaction::new();
    assert_eq!(table.delete_row(&first, tids[0]).unwrap(), TmResult::Ok);

    // while the first delete is in flight: BeingModified
    let second = Transaction::new();
    assert_eq!(
        table.delete_row(&second, tids[0]).unwrap(),
        TmResult::BeingModified
    );
    second.commit().unwrap();

    first.commit().unwrap();

    // after it commits: Updated
    let third = Transaction::new();
    assert_eq!(
        table.delete_row(&third, tids[0]).unwrap(),
        TmResult::Updated
    );
    third.commit().unwrap();
}

#[test]
fn row_lock_blocks_concurrent_delete() {
    let _guard = setup();

    let table_rc = new_int_table("mvcc_lock.db", 1);
    let table = table_rc.rl();

    let tids = insert_sequence(&table, 1..2);

    let locker = Transaction::new();
    assert_eq!(
        table
            .lock_row(&locker, tids[0], LockMode::Exclusive)
            .unwrap(),
        TmResult::Ok
    );

    let deleter = Transaction::new();
    assert_eq!(
        table.delete_row(&deleter, tids[0]).unwrap(),
        TmResult::BeingModified
    );
    deleter.commit().unwrap();

    // locks do not hide the row from anyone
    let reader = Transaction::new();
    assert_eq!(table.visible_count(&reader).unwrap(), 1);
    reader.commit().unwrap();

    locker.commit().unwrap();

    // a lock leaves the row behind once its holder commits
    let after = Transaction::new();
    assert_eq!(table.delete_row(&after, tids[0]).unwrap(), TmResult::Ok);
    after.commit().unwrap();
}

#[test]
fn update_conflict_reports_updated_and_kills_the_new_version() {
    let _guard = setup();

    let table_rc = new_int_table("mvcc_update_race.db", 1);
    let table = table_rc.rl();

    let tids = insert_sequence(&table, 1..2);

    // a committed delete wins before our update's own check
    let winner = Transaction::new();
    assert_eq!(table.delete_row(&winner, tids[0]).unwrap(), TmResult::Ok);
    winner.commit().unwrap();

    let loser = Transaction::new();
    let (result, newtid) = table.update_row(&loser, tids[0], &int_row(&[9])).unwrap();
    assert_eq!(result, TmResult::Updated);
    assert!(newtid.is_none());
    loser.commit().unwrap();

    // no half-updated version leaked out
    assert!(scan_ints(&table).is_empty());
}

#[test]
fn self_delete_reports_self_modified() {
    let _guard = setup();

    let table_rc = new_int_table("mvcc_self.db", 1);
    let table = table_rc.rl();

    let tx = Transaction::new();
    let tid = table.insert_row(&tx, &int_row(&[5])).unwrap();
    assert_eq!(table.delete_row(&tx, tid).unwrap(), TmResult::Ok);
    assert_eq!(
        table.delete_row(&tx, tid).unwrap(),
        TmResult::SelfModified
    );
    tx.commit().unwrap();

    assert!(scan_ints(&table).is_empty());
}

#[test]
fn frozen_rows_are_immediately_visible() {
    let _guard = setup();

    let table_rc = new_int_table("mvcc_frozen.db", 1);
    let table = table_rc.rl();

    let writer = Transaction::new();
    table
        .multi_insert_frozen(&writer, &[int_row(&[1]), int_row(&[2])])
        .unwrap();

    // no commit needed, frozen rows carry no undo record
    let reader = Transaction::new();
    assert_eq!(table.visible_count(&reader).unwrap(), 2);
    reader.commit().unwrap();
    writer.commit().unwrap();
}
