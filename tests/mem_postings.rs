use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use tsdb_index::postings::{expand_postings, intersect};
use tsdb_index::{all_postings_key, Label, Labels, MemPostings, Postings, Stat};

fn series(pairs: &[(&str, &str)]) -> Labels {
    Labels::from_pairs(pairs.iter().copied())
}

#[test]
fn bulk_load_is_sorted_by_ensure_order() {
    let p = MemPostings::new_unordered();
    let lset = series(&[("__name__", "up")]);
    p.add(3, &lset);
    p.add(1, &lset);
    p.add(2, &lset);

    assert_eq!(expand_postings(&mut p.get("__name__", "up")).expect("expand"), vec![3, 1, 2]);
    p.ensure_order();
    assert!(p.is_ordered());
    assert_eq!(expand_postings(&mut p.get("__name__", "up")).expect("expand"), vec![1, 2, 3]);

    // A second call is a no-op.
    p.ensure_order_with_workers(4);
    assert_eq!(expand_postings(&mut p.all()).expect("expand"), vec![1, 2, 3]);
}

#[test]
fn many_lists_sorted_across_workers() {
    let p = MemPostings::new_unordered();
    // Enough distinct pairs for several sort batches.
    for id in (0..2000u64).rev() {
        p.add(id, &series(&[("shard", format!("{}", id % 700).as_str()), ("job", "api")]));
    }
    p.ensure_order_with_workers(3);

    for value in p.label_values("shard") {
        let ids = expand_postings(&mut p.get("shard", &value)).expect("expand");
        assert!(ids.windows(2).all(|w| w[0] < w[1]), "shard={value}");
    }
    let all = expand_postings(&mut p.all()).expect("expand");
    assert_eq!(all, (0..2000u64).collect::<Vec<_>>());
}

#[test]
fn concurrent_adds_and_reads() {
    let p = Arc::new(MemPostings::new());
    let mut handles = Vec::new();
    for t in 0..4u64 {
        let p = Arc::clone(&p);
        handles.push(thread::spawn(move || {
            for i in 0..500u64 {
                let id = i * 4 + t;
                p.add(id, &series(&[("__name__", "req"), ("even", if id % 2 == 0 { "y" } else { "n" })]));
                // Snapshots taken mid-load are always sorted.
                let ids = expand_postings(&mut p.get("__name__", "req")).expect("expand");
                assert!(ids.windows(2).all(|w| w[0] < w[1]));
            }
        }));
    }
    for h in handles {
        h.join().expect("worker");
    }

    let all = expand_postings(&mut p.all()).expect("expand");
    assert_eq!(all, (0..2000u64).collect::<Vec<_>>());
    let mut even = intersect(vec![p.get("__name__", "req"), p.get("even", "y")]);
    let even = expand_postings(&mut even).expect("expand");
    assert_eq!(even, (0..2000u64).step_by(2).collect::<Vec<_>>());
}

#[test]
fn delete_removes_ids_everywhere() {
    let p = MemPostings::new();
    for id in 0..10 {
        p.add(id, &series(&[("a", "x"), ("b", id.to_string().as_str())]));
    }
    let deleted: HashSet<u64> = [1, 3, 5, 7, 9].into_iter().collect();
    p.delete(&deleted);

    assert_eq!(expand_postings(&mut p.get("a", "x")).expect("expand"), vec![0, 2, 4, 6, 8]);
    assert_eq!(expand_postings(&mut p.all()).expect("expand"), vec![0, 2, 4, 6, 8]);
    assert_eq!(p.label_values("b"), ["0", "2", "4", "6", "8"]);
    assert!(p.get("b", "3").is_empty_sentinel());

    // Deleting nothing changes nothing.
    p.delete(&HashSet::new());
    assert_eq!(p.label_names(), ["a", "b"]);
}

#[test]
fn iter_visits_every_list() {
    let p = MemPostings::new();
    p.add(1, &series(&[("a", "1"), ("b", "1")]));
    p.add(2, &series(&[("a", "1"), ("b", "2")]));

    let mut seen = Vec::new();
    p.iter(|name, value, mut list| {
        seen.push((Label::new(name, value), expand_postings(&mut list)?));
        Ok(())
    })
    .expect("iter");
    seen.sort();
    assert_eq!(
        seen,
        vec![
            (all_postings_key(), vec![1, 2]),
            (Label::new("a", "1"), vec![1, 2]),
            (Label::new("b", "1"), vec![1]),
            (Label::new("b", "2"), vec![2]),
        ]
    );

    // The first error stops iteration.
    let mut calls = 0;
    let res = p.iter(|_, _, _| {
        calls += 1;
        Err(tsdb_index::Error::Cancelled)
    });
    assert!(matches!(res, Err(tsdb_index::Error::Cancelled)));
    assert_eq!(calls, 1);
}

#[test]
fn stats_are_sorted_descending_and_capped() {
    let p = MemPostings::new();
    let mut id = 0;
    // metric_i has i + 1 series; 12 metrics overflow the top-10 cap.
    for m in 0..12u64 {
        for inst in 0..=m {
            p.add(
                id,
                &series(&[
                    ("__name__", format!("metric_{m:02}").as_str()),
                    ("instance", format!("i{inst}").as_str()),
                ]),
            );
            id += 1;
        }
    }

    let stats = p.stats("__name__");
    assert_eq!(stats.cardinality_metrics_stats.len(), 10);
    assert_eq!(stats.cardinality_metrics_stats[0], Stat::new("metric_11", 12));
    assert_eq!(stats.cardinality_metrics_stats[9], Stat::new("metric_02", 3));
    for list in [
        &stats.cardinality_metrics_stats,
        &stats.cardinality_label_stats,
        &stats.label_value_stats,
        &stats.label_value_pairs_stats,
    ] {
        assert!(list.windows(2).all(|w| w[0].count >= w[1].count));
    }

    assert_eq!(
        stats.cardinality_label_stats,
        vec![Stat::new("__name__", 12), Stat::new("instance", 12)]
    );
    // Ties on count rank the smaller name first; i0 belongs to every metric.
    assert_eq!(stats.label_value_pairs_stats[0], Stat::new("__name__=metric_11", 12));
    assert_eq!(stats.label_value_pairs_stats[1], Stat::new("instance=i0", 12));
    assert_eq!(stats.num_label_pairs, 24);
}
