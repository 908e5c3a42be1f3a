// SPDX-FileCopyrightText: 2026 Serialite Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Queue ordering under many plain OS-thread submitters, without a runtime.

use futures::executor::block_on;
use proptest::prelude::*;
use serialite_core::Connection;
use serialite_storage::{OperationQueue, QueueOptions};
use serialite_test_utils::RecordingConnection;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn every_submission_runs_once_in_id_order(per_thread in prop::collection::vec(1usize..20, 1..6)) {
        let conn = RecordingConnection::new();
        let log = conn.log();
        let queue = OperationQueue::spawn(conn, QueueOptions::default()).unwrap();

        let submitters: Vec<_> = per_thread
            .iter()
            .map(|&n| {
                let queue = queue.clone();
                std::thread::spawn(move || {
                    let pending: Vec<_> = (0..n)
                        .map(|_| {
                            queue
                                .enqueue(|ctx| {
                                    let sql = format!("op {}", ctx.id());
                                    ctx.connection().execute(&sql, &[])
                                })
                                .unwrap()
                        })
                        .collect();
                    for p in pending {
                        block_on(p).unwrap();
                    }
                })
            })
            .collect();
        for submitter in submitters {
            submitter.join().unwrap();
        }
        block_on(queue.shutdown()).unwrap();

        let ids: Vec<u64> = log
            .statements()
            .iter()
            .map(|s| s.trim_start_matches("op ").parse().unwrap())
            .collect();
        prop_assert_eq!(ids.len(), per_thread.iter().sum::<usize>());
        prop_assert!(ids.windows(2).all(|w| w[0] < w[1]));
        prop_assert_eq!(log.close_count(), 1);
    }
}
