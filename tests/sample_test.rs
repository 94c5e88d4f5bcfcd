mod common;

use colstore::{TmResult, Transaction};

use crate::common::{insert_sequence, new_int_table, setup};
use colstore::utils::HandyRwLock;

/// 300 rows, even ids deleted; the samplers only ever see the odd ones.
fn odd_survivor_table(name: &str) -> colstore::types::Pod<colstore::ColumnarTable> {
    let table_rc = new_int_table(name, 1);
    {
        let table = table_rc.rl();
        let tids = insert_sequence(&table, 1..301);

        let tx = Transaction::new();
        for (idx, tid) in tids.iter().enumerate() {
            if (idx + 1) % 2 == 0 {
                assert_eq!(table.delete_row(&tx, *tid).unwrap(), TmResult::Ok);
            }
        }
        tx.commit().unwrap();
    }
    table_rc
}

#[test]
fn system_sample_returns_whole_blocks_of_visible_rows() {
    let _guard = setup();

    let table_rc = odd_survivor_table("sample_system.db");
    let table = table_rc.rl();

    // all tids share one block here, so a block either contributes
    // every visible (odd) tuple or nothing at all
    let tx = Transaction::new();
    let sampled = table.sample_scan_system(&tx, 50.0, 0).unwrap();
    assert!(sampled.len() == 0 || sampled.len() == 150);
    for (_, row) in &sampled {
        assert_eq!(row[0].as_ref().unwrap().get_int() % 2, 1);
    }

    // full-rate sampling is just the scan
    let all = table.sample_scan_system(&tx, 100.0, 0).unwrap();
    assert_eq!(all.len(), 150);

    let none = table.sample_scan_system(&tx, 0.0, 0).unwrap();
    assert!(none.is_empty());
    tx.commit().unwrap();
}

#[test]
fn bernoulli_sample_flips_a_coin_per_tuple() {
    let _guard = setup();

    let table_rc = odd_survivor_table("sample_bernoulli.db");
    let table = table_rc.rl();

    let tx = Transaction::new();
    let sampled = table.sample_scan_bernoulli(&tx, 50.0, 7).unwrap();

    // a per-tuple sample of 150 tuples at 50% is neither empty nor full
    assert!(sampled.len() > 0 && sampled.len() < 150);
    for (_, row) in &sampled {
        assert_eq!(row[0].as_ref().unwrap().get_int() % 2, 1);
    }

    let all = table.sample_scan_bernoulli(&tx, 100.0, 7).unwrap();
    assert_eq!(all.len(), 150);
    tx.commit().unwrap();
}

#[test]
fn analyze_reports_counts_and_null_fractions() {
    let _guard = setup();

    let table_rc = new_int_table("sample_analyze.db", 2);
    let table = table_rc.rl();

    let tx = Transaction::new();
    for i in 0..100i64 {
        let c2 = if i % 4 == 0 {
            None
        } else {
            Some(colstore::Datum::Int(i))
        };
        table
            .insert_row(&tx, &vec![Some(colstore::Datum::Int(i)), c2])
            .unwrap();
    }
    tx.commit().unwrap();

    let tx = Transaction::new();
    let stats = table.analyze(&tx, 100.0, 1).unwrap();
    tx.commit().unwrap();

    assert_eq!(stats.row_count, 100);
    assert!(stats.pages > 0);
    assert_eq!(stats.null_frac[0], 0.0);
    assert!((stats.null_frac[1] - 0.25).abs() < 1e-9);
}

#[test]
fn repeatable_seed_repeats_the_sample() {
    let _guard = setup();

    let table_rc = odd_survivor_table("sample_repeat.db");
    let table = table_rc.rl();

    let tx = Transaction::new();
    let a = table.sample_scan_bernoulli(&tx, 50.0, 42).unwrap();
    let b = table.sample_scan_bernoulli(&tx, 50.0, 42).unwrap();
    let tids_a: Vec<_> = a.iter().map(|(t, _)| *t).collect();
    let tids_b: Vec<_> = b.iter().map(|(t, _)| *t).collect();
    assert_eq!(tids_a, tids_b);

    let c = table.sample_scan_system(&tx, 50.0, 9).unwrap();
    let d = table.sample_scan_system(&tx, 50.0, 9).unwrap();
    assert_eq!(
        c.iter().map(|(t, _)| *t).collect::<Vec<_>>(),
        d.iter().map(|(t, _)| *t).collect::<Vec<_>>()
    );
    tx.commit().unwrap();
}
