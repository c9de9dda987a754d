use std::collections::BTreeSet;

use tsdb_index::postings::{
    empty_postings, expand_postings, intersect, merge, without, BigEndianPostings, ListPostings,
};
use tsdb_index::{Postings, SeriesRef};

struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.0 >> 33
    }
}

fn random_set(rng: &mut Lcg, max: u64, density: u64) -> BTreeSet<SeriesRef> {
    (0..max).filter(|_| rng.next() % 100 < density).collect()
}

fn list<'a>(set: &BTreeSet<SeriesRef>) -> Box<dyn Postings + 'a> {
    Box::new(ListPostings::new(set.iter().copied().collect()))
}

fn encoded(set: &BTreeSet<SeriesRef>) -> Vec<u8> {
    set.iter().flat_map(|&v| (v as u32).to_be_bytes()).collect()
}

fn sorted(set: BTreeSet<SeriesRef>) -> Vec<SeriesRef> {
    set.into_iter().collect()
}

#[test]
fn combinators_match_set_operations() {
    let mut rng = Lcg(0x5eed);
    for round in 0..50 {
        let a = random_set(&mut rng, 2000, 30);
        let b = random_set(&mut rng, 2000, 50);
        let c = random_set(&mut rng, 2000, 10);

        let mut p = intersect(vec![list(&a), list(&b), list(&c)]);
        let expected: BTreeSet<_> = a.intersection(&b).copied().collect();
        let expected: BTreeSet<_> = expected.intersection(&c).copied().collect();
        assert_eq!(expand_postings(&mut p).expect("intersect"), sorted(expected), "round {round}");

        let mut p = merge(vec![list(&a), list(&b), list(&c)]);
        let expected: BTreeSet<_> = a.iter().chain(&b).chain(&c).copied().collect();
        assert_eq!(expand_postings(&mut p).expect("merge"), sorted(expected), "round {round}");

        let mut p = without(list(&a), list(&b));
        let expected: BTreeSet<_> = a.difference(&b).copied().collect();
        assert_eq!(expand_postings(&mut p).expect("without"), sorted(expected), "round {round}");
    }
}

#[test]
fn intersect_and_merge_commute() {
    let mut rng = Lcg(99);
    let a = random_set(&mut rng, 5000, 20);
    let b = random_set(&mut rng, 5000, 40);

    let ab = expand_postings(&mut intersect(vec![list(&a), list(&b)])).expect("ab");
    let ba = expand_postings(&mut intersect(vec![list(&b), list(&a)])).expect("ba");
    assert_eq!(ab, ba);

    let ab = expand_postings(&mut merge(vec![list(&a), list(&b)])).expect("ab");
    let ba = expand_postings(&mut merge(vec![list(&b), list(&a)])).expect("ba");
    assert_eq!(ab, ba);

    // Grouping does not matter either.
    let c = random_set(&mut rng, 5000, 60);
    let mut left = merge(vec![merge(vec![list(&a), list(&b)]), list(&c)]);
    let mut right = merge(vec![list(&a), merge(vec![list(&b), list(&c)])]);
    assert_eq!(
        expand_postings(&mut left).expect("(a|b)|c"),
        expand_postings(&mut right).expect("a|(b|c)")
    );

    let mut left = intersect(vec![intersect(vec![list(&a), list(&b)]), list(&c)]);
    let mut right = intersect(vec![list(&a), intersect(vec![list(&b), list(&c)])]);
    let inter = expand_postings(&mut left).expect("(a&b)&c");
    assert!(!inter.is_empty());
    assert_eq!(inter, expand_postings(&mut right).expect("a&(b&c)"));
}

#[test]
fn nested_combinators() {
    let mut rng = Lcg(7);
    let a = random_set(&mut rng, 3000, 40);
    let b = random_set(&mut rng, 3000, 40);
    let c = random_set(&mut rng, 3000, 40);
    let d = random_set(&mut rng, 3000, 5);

    // (a | b) & c \ d
    let mut p = without(
        intersect(vec![merge(vec![list(&a), list(&b)]), list(&c)]),
        list(&d),
    );
    let expected: BTreeSet<_> = a
        .union(&b)
        .filter(|v| c.contains(v) && !d.contains(v))
        .copied()
        .collect();
    assert_eq!(expand_postings(&mut p).expect("nested"), sorted(expected));
}

#[test]
fn seek_agrees_with_linear_scan() {
    let mut rng = Lcg(1234);
    let a = random_set(&mut rng, 4000, 25);
    let b = random_set(&mut rng, 4000, 25);
    let union: BTreeSet<_> = a.union(&b).copied().collect();
    let inter: BTreeSet<_> = a.intersection(&b).copied().collect();
    let diff: BTreeSet<_> = a.difference(&b).copied().collect();
    let raw = encoded(&a);

    let mut targets: Vec<SeriesRef> = (0..40).map(|_| rng.next() % 4100).collect();
    targets.sort_unstable();

    let cases: Vec<(Box<dyn Postings + '_>, &BTreeSet<SeriesRef>)> = vec![
        (list(&a), &a),
        (Box::new(BigEndianPostings::new(&raw)), &a),
        (merge(vec![list(&a), list(&b)]), &union),
        (intersect(vec![list(&a), list(&b)]), &inter),
        (without(list(&a), list(&b)), &diff),
    ];
    for (mut p, set) in cases {
        for &t in &targets {
            match set.range(t..).next() {
                Some(&want) => {
                    assert!(p.seek(t), "seek {t}");
                    assert_eq!(p.at(), want, "seek {t}");
                    // Seeking backwards stays put.
                    assert!(p.seek(0));
                    assert_eq!(p.at(), want);
                }
                None => {
                    assert!(!p.seek(t), "seek {t} past the end");
                    break;
                }
            }
        }
    }
}

#[test]
fn big_endian_matches_list() {
    let mut rng = Lcg(31);
    let a = random_set(&mut rng, 10_000, 15);
    let raw = encoded(&a);
    let mut be = BigEndianPostings::new(&raw);
    assert_eq!(expand_postings(&mut be).expect("expand"), sorted(a));
}

#[test]
fn empty_inputs() {
    let a: BTreeSet<SeriesRef> = (0..10).collect();
    assert!(intersect(Vec::new()).is_empty_sentinel());
    assert!(merge(Vec::new()).is_empty_sentinel());
    assert!(intersect(vec![list(&a), empty_postings()]).is_empty_sentinel());

    let mut p = merge(vec![list(&a), empty_postings()]);
    assert_eq!(expand_postings(&mut p).expect("merge"), sorted(a.clone()));

    let mut p = without(list(&a), list(&a));
    assert!(expand_postings(&mut p).expect("without").is_empty());
}
