mod common;

use colstore::{Datum, TmResult, Transaction};

use crate::common::{int_row, new_int_table, scan_ints, scan_with_tids, setup};
use colstore::utils::HandyRwLock;

#[test]
fn insert_delete_update_round_trip() {
    let _guard = setup();

    let table_rc = new_int_table("crud.db", 3);
    let table = table_rc.rl();

    // ten rows (i, i+1, i+2)
    let tx = Transaction::new();
    for i in 1..=10i64 {
        table
            .insert_row(&tx, &int_row(&[i, i + 1, i + 2]))
            .unwrap();
    }
    tx.commit().unwrap();

    let rows = scan_ints(&table);
    assert_eq!(rows.len(), 10);
    for (idx, row) in rows.iter().enumerate() {
        let i = idx as i64 + 1;
        assert_eq!(row, &vec![Some(i), Some(i + 1), Some(i + 2)]);
    }

    // DELETE WHERE c2 = 5
    let victim = scan_with_tids(&table)
        .into_iter()
        .find(|(_, r)| r[1] == Some(5))
        .map(|(tid, _)| tid)
        .unwrap();

    let tx = Transaction::new();
    assert_eq!(table.delete_row(&tx, victim).unwrap(), TmResult::Ok);
    tx.commit().unwrap();

    let rows = scan_ints(&table);
    assert_eq!(rows.len(), 9);
    assert!(rows
        .iter()
        .all(|r| r != &vec![Some(4), Some(5), Some(6)]));

    // UPDATE SET c2 = 100 WHERE c1 = 8
    let target = scan_with_tids(&table)
        .into_iter()
        .find(|(_, r)| r[0] == Some(8))
        .map(|(tid, _)| tid)
        .unwrap();

    let tx = Transaction::new();
    let (result, newtid) = table
        .update_row(&tx, target, &int_row(&[8, 100, 10]))
        .unwrap();
    assert_eq!(result, TmResult::Ok);
    assert!(newtid.is_some());
    tx.commit().unwrap();

    let rows = scan_ints(&table);
    assert_eq!(rows.len(), 9);
    assert_eq!(
        rows.iter()
            .filter(|r| *r == &vec![Some(8), Some(100), Some(10)])
            .count(),
        1
    );
    assert!(rows
        .iter()
        .all(|r| r != &vec![Some(8), Some(9), Some(10)]));

    table.check_integrity();
}

#[test]
fn null_positions_are_preserved() {
    let _guard = setup();

    let table_rc = new_int_table("nulls.db", 2);
    let table = table_rc.rl();

    let tx = Transaction::new();
    table
        .insert_row(&tx, &vec![Some(Datum::Int(1)), None])
        .unwrap();
    table
        .insert_row(&tx, &vec![None, Some(Datum::Int(2))])
        .unwrap();
    tx.commit().unwrap();

    let rows = scan_ints(&table);
    assert_eq!(rows, vec![vec![Some(1), None], vec![None, Some(2)]]);

    // UPDATE SET c1 = 1, c2 = NULL on both rows
    let tids: Vec<_> = scan_with_tids(&table)
        .into_iter()
        .map(|(tid, _)| tid)
        .collect();
    let tx = Transaction::new();
    for tid in tids {
        let (result, _) = table
            .update_row(&tx, tid, &vec![Some(Datum::Int(1)), None])
            .unwrap();
        assert_eq!(result, TmResult::Ok);
    }
    tx.commit().unwrap();

    let rows = scan_ints(&table);
    assert_eq!(rows, vec![vec![Some(1), None], vec![Some(1), None]]);
}

#[test]
fn fetch_row_by_tid() {
    let _guard = setup();

    let table_rc = new_int_table("fetch.db", 2);
    let table = table_rc.rl();

    let tids = crate::common::insert_sequence(&table, 1..6);

    let tx = Transaction::new();
    let row = table.fetch_row(&tx, tids[2]).unwrap().unwrap();
    assert_eq!(crate::common::as_ints(&row), vec![Some(3), Some(4)]);

    // a tid nobody assigned
    let ghost = colstore::Tid::new(1_000_000).unwrap();
    assert!(table.fetch_row(&tx, ghost).unwrap().is_none());
    tx.commit().unwrap();

    // deleted rows stop being fetchable
    let tx = Transaction::new();
    table.delete_row(&tx, tids[2]).unwrap();
    tx.commit().unwrap();

    let tx = Transaction::new();
    assert!(table.fetch_row(&tx, tids[2]).unwrap().is_none());
    tx.commit().unwrap();
}

#[test]
fn bitmap_fetch_set() {
    let _guard = setup();

    let table_rc = new_int_table("bitmap.db", 2);
    let table = table_rc.rl();

    let tids = crate::common::insert_sequence(&table, 1..11);

    let tx = Transaction::new();
    table.delete_row(&tx, tids[4]).unwrap();
    tx.commit().unwrap();

    let wanted = vec![tids[0], tids[4], tids[9]];
    let tx = Transaction::new();
    let rows = table.fetch_rows(&tx, &wanted).unwrap();
    tx.commit().unwrap();

    // the deleted tid silently drops out
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].0, tids[0]);
    assert_eq!(rows[1].0, tids[9]);
    assert_eq!(crate::common::as_ints(&rows[1].1), vec![Some(10), Some(11)]);
}

#[test]
fn add_column_reads_default_for_old_rows() {
    let _guard = setup();

    let table_rc = new_int_table("addcol.db", 1);
    let table = table_rc.rl();

    crate::common::insert_sequence(&table, 1..4);

    table
        .add_column("c2", colstore::ColumnType::Int, Some(Datum::Int(42)))
        .unwrap();

    let tx = Transaction::new();
    table
        .insert_row(&tx, &int_row(&[10, 11]))
        .unwrap();
    tx.commit().unwrap();

    let rows = scan_ints(&table);
    assert_eq!(
        rows,
        vec![
            vec![Some(1), Some(42)],
            vec![Some(2), Some(42)],
            vec![Some(3), Some(42)],
            vec![Some(10), Some(11)],
        ]
    );

    table.check_integrity();
}
