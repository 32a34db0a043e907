// Copyright The ackflow Authors
// SPDX-License-Identifier: Apache-2.0

#![allow(missing_docs)]

//! Algebraic operator laws, checked end to end with `run`.

use ackflow_engine::flowable::{range, Flowable};

#[test]
fn test_map_fusion() {
    let composed = range(0..20)
        .map(|x| x + 1)
        .map(|x| x * 3)
        .run()
        .expect("run");
    let fused = range(0..20).map(|x| (x + 1) * 3).run().expect("run");
    assert_eq!(composed, fused);
}

#[test]
fn test_filter_fusion() {
    let composed = range(0..50)
        .filter(|x| x % 2 == 0)
        .filter(|x| x % 3 == 0)
        .run()
        .expect("run");
    let fused = range(0..50)
        .filter(|x| x % 2 == 0 && x % 3 == 0)
        .run()
        .expect("run");
    assert_eq!(composed, fused);
}

#[test]
fn test_to_list_is_idempotent() {
    let once = range(0..5).to_list().run().expect("run");
    assert_eq!(once, vec![vec![0, 1, 2, 3, 4]]);

    let twice = range(0..5).to_list().to_list().run().expect("run");
    assert_eq!(twice, vec![vec![vec![0, 1, 2, 3, 4]]]);
}

#[test]
fn test_zip_length_is_the_minimum() {
    let left = Flowable::from_iterable((0..7).collect::<Vec<i64>>());
    let right = Flowable::from_iterable((0..4).collect::<Vec<i64>>());
    let pairs = left.zip(&right).run().expect("run");
    assert_eq!(pairs.len(), 4);
    assert_eq!(pairs, vec![(0, 0), (1, 1), (2, 2), (3, 3)]);
}

#[test]
fn test_merge_is_a_multiset_union() {
    let left = Flowable::from_iterable(vec![1, 3, 5]);
    let right = Flowable::from_iterable(vec![2, 4, 6]);
    let mut merged = left.merge(&right).run().expect("run");
    merged.sort_unstable();
    assert_eq!(merged, vec![1, 2, 3, 4, 5, 6]);
}

#[test]
fn test_scan_reduce_agree_on_the_last_value() {
    let scanned = range(0..10)
        .scan(|acc, x| acc + x, 0)
        .run()
        .expect("run");
    let reduced = range(0..10).reduce(|acc, x| acc + x, 0).run().expect("run");
    assert_eq!(scanned.last().copied(), reduced.first().copied());
}

#[test]
fn test_concat_preserves_per_source_order() {
    let a = Flowable::from_iterable(vec![1, 2]);
    let b = Flowable::from_iterable(vec![3]);
    let c = Flowable::from_iterable(vec![4, 5]);
    let result = a.concat(&[b, c]).run().expect("run");
    assert_eq!(result, vec![1, 2, 3, 4, 5]);
}

#[test]
fn test_pairwise_and_zip_with_index() {
    let pairs = range(0..4).pairwise().run().expect("run");
    assert_eq!(pairs, vec![(0, 1), (1, 2), (2, 3)]);

    let indexed = range(5..8).zip_with_index().run().expect("run");
    assert_eq!(indexed, vec![(5, 0), (6, 1), (7, 2)]);
}

#[test]
fn test_flat_map_concatenates_inner_streams() {
    let result = range(0..3)
        .flat_map(|x| Flowable::from_iterable(vec![x * 10, x * 10 + 1]))
        .run()
        .expect("run");
    assert_eq!(result, vec![0, 1, 10, 11, 20, 21]);
}

#[test]
fn test_filter_with_index_and_map_to_iterator() {
    let evens = range(10..20)
        .filter_with_index(|idx, _| idx % 2 == 0)
        .run()
        .expect("run");
    assert_eq!(evens, vec![10, 12, 14, 16, 18]);

    let doubled = range(0..3)
        .map_to_iterator(|x| {
            Box::new(std::iter::repeat_n(x, 2)) as ackflow_engine::batch::BatchIter<i64>
        })
        .run()
        .expect("run");
    assert_eq!(doubled, vec![0, 0, 1, 1, 2, 2]);
}
