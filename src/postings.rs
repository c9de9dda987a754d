//! Postings algebra: sorted series-reference iterators and their set operations.
//!
//! Every iterator yields ascending, duplicate-free references once `next` has
//! been called. `seek` advances to the first reference `>=` the target and
//! never moves backwards. After `next` or `seek` returns `false` neither may be
//! called again; `err` stays valid.

use std::cmp::Ordering;
use std::collections::binary_heap::PeekMut;
use std::collections::BinaryHeap;

use crate::encoding::be32;
use crate::{Error, Result};

pub type SeriesRef = u64;

pub trait Postings {
    /// Advances to the next reference.
    fn next(&mut self) -> bool;

    /// Advances to the first reference `>= v`. A no-op if already there.
    fn seek(&mut self, v: SeriesRef) -> bool;

    /// Current reference. Only meaningful after `next`/`seek` returned `true`.
    fn at(&self) -> SeriesRef;

    fn err(&self) -> Option<&Error> {
        None
    }

    /// True only for [`EmptyPostings`], letting combinators short-circuit.
    fn is_empty_sentinel(&self) -> bool {
        false
    }
}

impl<P: Postings + ?Sized> Postings for Box<P> {
    fn next(&mut self) -> bool {
        (**self).next()
    }

    fn seek(&mut self, v: SeriesRef) -> bool {
        (**self).seek(v)
    }

    fn at(&self) -> SeriesRef {
        (**self).at()
    }

    fn err(&self) -> Option<&Error> {
        (**self).err()
    }

    fn is_empty_sentinel(&self) -> bool {
        (**self).is_empty_sentinel()
    }
}

/// Drains `p` into a vector.
pub fn expand_postings<P: Postings + ?Sized>(p: &mut P) -> Result<Vec<SeriesRef>> {
    let mut res = Vec::new();
    while p.next() {
        res.push(p.at());
    }
    match p.err() {
        Some(err) => Err(err.clone()),
        None => Ok(res),
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyPostings;

impl Postings for EmptyPostings {
    fn next(&mut self) -> bool {
        false
    }

    fn seek(&mut self, _v: SeriesRef) -> bool {
        false
    }

    fn at(&self) -> SeriesRef {
        0
    }

    fn is_empty_sentinel(&self) -> bool {
        true
    }
}

pub fn empty_postings<'a>() -> Box<dyn Postings + 'a> {
    Box::new(EmptyPostings)
}

/// Yields nothing and reports a fixed error.
#[derive(Debug, Clone)]
pub struct ErrPostings {
    err: Error,
}

impl Postings for ErrPostings {
    fn next(&mut self) -> bool {
        false
    }

    fn seek(&mut self, _v: SeriesRef) -> bool {
        false
    }

    fn at(&self) -> SeriesRef {
        0
    }

    fn err(&self) -> Option<&Error> {
        Some(&self.err)
    }
}

pub fn err_postings<'a>(err: Error) -> Box<dyn Postings + 'a> {
    Box::new(ErrPostings { err })
}

/// Postings over an owned, sorted list.
#[derive(Debug, Clone, Default)]
pub struct ListPostings {
    list: Vec<SeriesRef>,
    pos: usize,
    cur: Option<SeriesRef>,
}

impl ListPostings {
    pub fn new(list: Vec<SeriesRef>) -> Self {
        Self {
            list,
            pos: 0,
            cur: None,
        }
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }
}

impl Postings for ListPostings {
    fn next(&mut self) -> bool {
        match self.list.get(self.pos) {
            Some(&v) => {
                self.cur = Some(v);
                self.pos += 1;
                true
            }
            None => {
                self.cur = None;
                false
            }
        }
    }

    fn seek(&mut self, v: SeriesRef) -> bool {
        if self.cur.is_some_and(|cur| cur >= v) {
            return true;
        }
        let rest = &self.list[self.pos..];
        let i = rest.partition_point(|&x| x < v);
        if i < rest.len() {
            self.cur = Some(rest[i]);
            self.pos += i + 1;
            true
        } else {
            self.pos = self.list.len();
            self.cur = None;
            false
        }
    }

    fn at(&self) -> SeriesRef {
        self.cur.unwrap_or(0)
    }
}

/// Postings decoded on the fly from a list of big-endian 4-byte references.
#[derive(Debug, Clone)]
pub struct BigEndianPostings<'a> {
    list: &'a [u8],
    cur: Option<u32>,
}

impl<'a> BigEndianPostings<'a> {
    pub fn new(list: &'a [u8]) -> Self {
        Self { list, cur: None }
    }

    fn value(&self, i: usize) -> u32 {
        be32(&self.list[i * 4..])
    }
}

impl Postings for BigEndianPostings<'_> {
    fn next(&mut self) -> bool {
        if self.list.len() >= 4 {
            self.cur = Some(be32(self.list));
            self.list = &self.list[4..];
            return true;
        }
        self.list = &[];
        false
    }

    fn seek(&mut self, v: SeriesRef) -> bool {
        if self.cur.is_some_and(|cur| u64::from(cur) >= v) {
            return true;
        }
        let num = self.list.len() / 4;
        let (mut lo, mut hi) = (0, num);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if u64::from(self.value(mid)) < v {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        if lo < num {
            let j = lo * 4;
            self.cur = Some(be32(&self.list[j..]));
            self.list = &self.list[j + 4..];
            return true;
        }
        self.list = &[];
        false
    }

    fn at(&self) -> SeriesRef {
        self.cur.map_or(0, u64::from)
    }
}

/// Intersection of all inputs. Any statically empty input makes the result empty.
pub fn intersect<'a>(mut its: Vec<Box<dyn Postings + 'a>>) -> Box<dyn Postings + 'a> {
    match its.len() {
        0 => return empty_postings(),
        1 => return its.swap_remove(0),
        _ => {}
    }
    if its.iter().any(|p| p.is_empty_sentinel()) {
        return empty_postings();
    }
    Box::new(IntersectPostings { arr: its, cur: 0 })
}

pub struct IntersectPostings<'a> {
    arr: Vec<Box<dyn Postings + 'a>>,
    cur: SeriesRef,
}

impl IntersectPostings<'_> {
    // Seeks every child to the running maximum until they all agree.
    fn ratchet(&mut self) -> bool {
        'outer: loop {
            for p in self.arr.iter_mut() {
                if !p.seek(self.cur) {
                    return false;
                }
                if p.at() > self.cur {
                    self.cur = p.at();
                    continue 'outer;
                }
            }
            return true;
        }
    }
}

impl Postings for IntersectPostings<'_> {
    fn next(&mut self) -> bool {
        for p in self.arr.iter_mut() {
            if !p.next() {
                return false;
            }
            if p.at() > self.cur {
                self.cur = p.at();
            }
        }
        self.ratchet()
    }

    fn seek(&mut self, v: SeriesRef) -> bool {
        self.cur = self.cur.max(v);
        self.ratchet()
    }

    fn at(&self) -> SeriesRef {
        self.cur
    }

    fn err(&self) -> Option<&Error> {
        self.arr.iter().find_map(|p| p.err())
    }
}

/// Sorted, deduplicated union of all inputs.
pub fn merge<'a>(mut its: Vec<Box<dyn Postings + 'a>>) -> Box<dyn Postings + 'a> {
    match its.len() {
        0 => empty_postings(),
        1 => its.swap_remove(0),
        _ => match MergedPostings::new(its) {
            Some(merged) => Box::new(merged),
            None => empty_postings(),
        },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeState {
    /// Children are primed but no value has been handed out yet.
    Uninitialized,
    Initialized,
    Exhausted,
}

// Orders children by their current value, smallest on top of the max-heap.
struct HeapEntry<'a>(Box<dyn Postings + 'a>);

impl PartialEq for HeapEntry<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.0.at() == other.0.at()
    }
}

impl Eq for HeapEntry<'_> {}

impl PartialOrd for HeapEntry<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        other.0.at().cmp(&self.0.at())
    }
}

pub struct MergedPostings<'a> {
    heap: BinaryHeap<HeapEntry<'a>>,
    state: MergeState,
    cur: SeriesRef,
    err: Option<Error>,
}

impl<'a> MergedPostings<'a> {
    /// Primes every child with one `next`. Returns `None` when all inputs are
    /// empty without error.
    fn new(its: Vec<Box<dyn Postings + 'a>>) -> Option<Self> {
        let mut entries = Vec::with_capacity(its.len());
        for mut it in its {
            if it.next() {
                entries.push(HeapEntry(it));
            } else if let Some(err) = it.err() {
                return Some(Self {
                    heap: BinaryHeap::new(),
                    state: MergeState::Exhausted,
                    cur: 0,
                    err: Some(err.clone()),
                });
            }
        }
        if entries.is_empty() {
            return None;
        }
        Some(Self {
            heap: BinaryHeap::from(entries),
            state: MergeState::Uninitialized,
            cur: 0,
            err: None,
        })
    }

    pub fn state(&self) -> MergeState {
        self.state
    }

    fn fail(&mut self, err: Error) -> bool {
        self.err = Some(err);
        self.state = MergeState::Exhausted;
        false
    }
}

// Drops the exhausted top child, returning its error if it had one.
fn pop_exhausted(top: PeekMut<'_, HeapEntry<'_>>) -> Option<Error> {
    PeekMut::pop(top).0.err().cloned()
}

impl Postings for MergedPostings<'_> {
    fn next(&mut self) -> bool {
        match self.state {
            MergeState::Exhausted => return false,
            MergeState::Uninitialized => {
                return match self.heap.peek() {
                    Some(top) => {
                        self.cur = top.0.at();
                        self.state = MergeState::Initialized;
                        true
                    }
                    None => {
                        self.state = MergeState::Exhausted;
                        false
                    }
                };
            }
            MergeState::Initialized => {}
        }

        loop {
            let Some(mut top) = self.heap.peek_mut() else {
                self.state = MergeState::Exhausted;
                return false;
            };
            if top.0.next() {
                drop(top);
            } else if let Some(err) = pop_exhausted(top) {
                return self.fail(err);
            }
            match self.heap.peek() {
                None => {
                    self.state = MergeState::Exhausted;
                    return false;
                }
                Some(top) if top.0.at() != self.cur => {
                    self.cur = top.0.at();
                    return true;
                }
                Some(_) => {}
            }
        }
    }

    fn seek(&mut self, v: SeriesRef) -> bool {
        match self.state {
            MergeState::Exhausted => return false,
            MergeState::Uninitialized => {
                if !self.next() {
                    return false;
                }
            }
            MergeState::Initialized => {}
        }

        while self.cur < v {
            let Some(mut top) = self.heap.peek_mut() else {
                self.state = MergeState::Exhausted;
                return false;
            };
            if top.0.seek(v) {
                drop(top);
            } else if let Some(err) = pop_exhausted(top) {
                return self.fail(err);
            }
            match self.heap.peek() {
                Some(top) => self.cur = top.0.at(),
                None => {
                    self.state = MergeState::Exhausted;
                    return false;
                }
            }
        }
        true
    }

    fn at(&self) -> SeriesRef {
        self.cur
    }

    fn err(&self) -> Option<&Error> {
        self.err.as_ref()
    }
}

/// References in `full` that are not in `drop`.
pub fn without<'a>(
    full: Box<dyn Postings + 'a>,
    drop: Box<dyn Postings + 'a>,
) -> Box<dyn Postings + 'a> {
    if full.is_empty_sentinel() {
        return empty_postings();
    }
    if drop.is_empty_sentinel() {
        return full;
    }
    Box::new(RemovedPostings {
        full,
        remove: drop,
        cur: 0,
        initialized: false,
        fok: false,
        rok: false,
    })
}

pub struct RemovedPostings<'a> {
    full: Box<dyn Postings + 'a>,
    remove: Box<dyn Postings + 'a>,
    cur: SeriesRef,
    initialized: bool,
    fok: bool,
    rok: bool,
}

impl Postings for RemovedPostings<'_> {
    fn next(&mut self) -> bool {
        if !self.initialized {
            self.fok = self.full.next();
            self.rok = self.remove.next();
            self.initialized = true;
        }
        loop {
            if !self.fok {
                return false;
            }
            if !self.rok {
                self.cur = self.full.at();
                self.fok = self.full.next();
                return true;
            }
            let (fcur, rcur) = (self.full.at(), self.remove.at());
            match fcur.cmp(&rcur) {
                Ordering::Less => {
                    self.cur = fcur;
                    self.fok = self.full.next();
                    return true;
                }
                // Jump the removal list forward instead of stepping it.
                Ordering::Greater => self.rok = self.remove.seek(fcur),
                Ordering::Equal => self.fok = self.full.next(),
            }
        }
    }

    fn seek(&mut self, v: SeriesRef) -> bool {
        if self.initialized && self.cur >= v {
            return true;
        }
        if self.initialized {
            // Exhausted children must not be advanced again.
            self.fok = self.fok && self.full.seek(v);
            self.rok = self.rok && self.remove.seek(v);
        } else {
            self.fok = self.full.seek(v);
            self.rok = self.remove.seek(v);
            self.initialized = true;
        }
        self.next()
    }

    fn at(&self) -> SeriesRef {
        self.cur
    }

    fn err(&self) -> Option<&Error> {
        self.full.err().or_else(|| self.remove.err())
    }
}
