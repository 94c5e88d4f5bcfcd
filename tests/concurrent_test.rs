mod common;

use std::thread;

use colstore::{
    types::Pod, ColumnarTable, Datum, Tid, TmResult, Transaction,
};

use crate::common::{new_int_table, scan_ints, setup};
use colstore::utils::HandyRwLock;

// Insert one tuple into the table
fn inserter(value: i64, table_rc: &Pod<ColumnarTable>, s: &crossbeam::channel::Sender<Tid>) {
    let tx = Transaction::new();
    let tid = {
        let table = table_rc.rl();
        table
            .insert_row(&tx, &vec![Some(Datum::Int(value))])
            .unwrap()
    };
    tx.commit().unwrap();

    s.send(tid).unwrap();
}

// Delete one previously inserted tuple, retrying while its writer's
// delete conflicts are in flight
fn deleter(table_rc: &Pod<ColumnarTable>, r: &crossbeam::channel::Receiver<Tid>) {
    let tid = r.recv().unwrap();

    loop {
        let tx = Transaction::new();
        let result = {
            let table = table_rc.rl();
            table.delete_row(&tx, tid).unwrap()
        };
        tx.commit().unwrap();

        match result {
            TmResult::Ok => return,
            TmResult::BeingModified => thread::yield_now(),
            other => panic!("unexpected delete outcome: {:?}", other),
        }
    }
}

/// Interleaved inserts and deletes from many threads; every inserted
/// tuple is deleted exactly once, so the table must come out empty.
#[test]
fn concurrent_insert_delete() {
    let _guard = setup();

    let table_rc = new_int_table("concurrent.db", 1);

    let (sender, receiver) = crossbeam::channel::unbounded();

    let mut threads = vec![];
    for i in 0..8 {
        // thread local copies
        let local_table = table_rc.clone();
        let local_sender = sender.clone();

        let insert_worker =
            thread::spawn(move || inserter(i, &local_table, &local_sender));
        threads.push(insert_worker);

        let local_table = table_rc.clone();
        let local_receiver = receiver.clone();

        let delete_worker = thread::spawn(move || deleter(&local_table, &local_receiver));
        threads.push(delete_worker);
    }

    for handle in threads {
        handle.join().unwrap();
    }

    let table = table_rc.rl();
    assert!(scan_ints(&table).is_empty());
    table.check_integrity();
}

/// Concurrent readers see a stable snapshot while writers append.
#[test]
fn readers_are_not_disturbed_by_writers() {
    let _guard = setup();

    let table_rc = new_int_table("concurrent_scan.db", 1);
    {
        let table = table_rc.rl();
        crate::common::insert_sequence(&table, 1..201);
    }

    let mut threads = vec![];

    for _ in 0..4 {
        let local_table = table_rc.clone();
        threads.push(thread::spawn(move || {
            let tx = Transaction::new();
            let n = {
                let table = local_table.rl();
                table.visible_count(&tx).unwrap()
            };
            tx.commit().unwrap();
            assert_eq!(n, 200);
        }));
    }

    for i in 0..4 {
        let local_table = table_rc.clone();
        threads.push(thread::spawn(move || {
            let tx = Transaction::new();
            {
                let table = local_table.rl();
                table
                    .insert_row(&tx, &vec![Some(Datum::Int(1000 + i))])
                    .unwrap();
            }
            tx.commit().unwrap();
        }));
    }

    for handle in threads {
        handle.join().unwrap();
    }

    let table = table_rc.rl();
    assert_eq!(scan_ints(&table).len(), 204);
    table.check_integrity();
}
