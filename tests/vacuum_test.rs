mod common;

use colstore::{btree::page_cache::PageCache, Tid, TmResult, Transaction};

use crate::common::{insert_sequence, new_int_table, scan_ints, setup};
use colstore::utils::HandyRwLock;

#[test]
fn range_delete_then_vacuum_empties_the_table() {
    let _guard = setup();
    PageCache::set_page_size(2048);

    let table_rc = new_int_table("vacuum_range.db", 1);
    let table = table_rc.rl();

    // rows 10000..=15000, then delete every one of them
    let tids = insert_sequence(&table, 10_000..15_001);
    assert_eq!(tids.len(), 5001);

    let tx = Transaction::new();
    for tid in &tids {
        assert_eq!(table.delete_row(&tx, *tid).unwrap(), TmResult::Ok);
    }
    tx.commit().unwrap();

    assert!(scan_ints(&table).is_empty());

    let removed = table.vacuum().unwrap();
    assert_eq!(removed, 5001);

    // nothing dead remains, and nothing comes back
    let (dead, next) = table.collect_dead_tids(Tid::MIN).unwrap();
    assert!(dead.is_empty());
    assert!(next.is_none());
    assert!(scan_ints(&table).is_empty());

    table.check_integrity();
}

#[test]
fn vacuum_keeps_survivors_intact() {
    let _guard = setup();
    PageCache::set_page_size(2048);

    let table_rc = new_int_table("vacuum_partial.db", 2);
    let table = table_rc.rl();

    let tids = insert_sequence(&table, 1..1001);

    // delete every even row
    let tx = Transaction::new();
    for (idx, tid) in tids.iter().enumerate() {
        if idx % 2 == 1 {
            table.delete_row(&tx, *tid).unwrap();
        }
    }
    tx.commit().unwrap();

    let removed = table.vacuum().unwrap();
    assert_eq!(removed, 500);

    let rows = scan_ints(&table);
    assert_eq!(rows.len(), 500);
    for (idx, row) in rows.iter().enumerate() {
        let i = idx as i64 * 2 + 1;
        assert_eq!(row, &vec![Some(i), Some(i + 1)]);
    }

    table.check_integrity();
}

#[test]
fn mark_dead_is_idempotent() {
    let _guard = setup();

    let table_rc = new_int_table("vacuum_markdead.db", 1);
    let table = table_rc.rl();

    let tids = insert_sequence(&table, 1..6);

    table.tid_mark_dead(tids[2]).unwrap();
    table.tid_mark_dead(tids[2]).unwrap();

    let rows = scan_ints(&table);
    assert_eq!(rows.len(), 4);

    let (dead, _) = table.collect_dead_tids(Tid::MIN).unwrap();
    assert_eq!(dead, vec![tids[2]]);

    table.check_integrity();
}

#[test]
fn collect_dead_tids_respects_the_budget() {
    let _guard = setup();
    colstore::btree::vacuum::set_dead_tids_budget(80); // ten tids per round

    let table_rc = new_int_table("vacuum_budget.db", 1);
    let table = table_rc.rl();

    let tids = insert_sequence(&table, 1..101);
    for tid in &tids {
        table.tid_mark_dead(*tid).unwrap();
    }

    let mut start = Tid::MIN;
    let mut rounds = 0;
    let mut collected = Vec::new();
    loop {
        let (dead, next) = table.collect_dead_tids(start).unwrap();
        collected.extend(dead.iter().cloned());
        rounds += 1;
        match next {
            Some(n) => start = n,
            None => break,
        }
        assert!(rounds < 1000, "collection does not terminate");
    }

    assert_eq!(collected, tids);
    assert!(rounds >= 10, "budget was not enforced (rounds: {})", rounds);
}

#[test]
fn vacuum_on_a_clean_table_is_a_no_op() {
    let _guard = setup();

    let table_rc = new_int_table("vacuum_noop.db", 2);
    let table = table_rc.rl();

    insert_sequence(&table, 1..51);
    assert_eq!(table.vacuum().unwrap(), 0);
    assert_eq!(scan_ints(&table).len(), 50);

    table.check_integrity();
}
