//! Closed/half-open interval algebra over an arbitrary ordered key.
//!
//! `Series::read` walks revisions newest-first and "wins" the portion of
//! the query range each commit still covers, narrowing what's left after
//! each step. That narrowing is an interval subtraction: given the range
//! still unmasked and the range a commit claims, split the unmasked range
//! into the pieces that remain. Index keys (floats, strings, tuples of
//! both) have no general successor function, so endpoints carry an
//! explicit inclusive/exclusive tag instead of relying on one.

use std::cmp::Ordering as CmpOrdering;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Bound<K> {
    NegInf,
    Incl(K),
    Excl(K),
    PosInf,
}

#[derive(PartialEq, Eq, PartialOrd, Ord)]
enum Edge<'a, K> {
    NegInf,
    At(&'a K, i8),
    PosInf,
}

impl<K: Ord> Bound<K> {
    /// Compare two bounds as if both were the lower edge of an interval.
    pub fn cmp_as_lo(&self, other: &Self) -> CmpOrdering {
        self.edge_lo().cmp(&other.edge_lo())
    }

    fn edge_lo(&self) -> Edge<'_, K> {
        match self {
            Bound::NegInf => Edge::NegInf,
            Bound::Incl(k) => Edge::At(k, -1),
            Bound::Excl(k) => Edge::At(k, 1),
            Bound::PosInf => Edge::PosInf,
        }
    }

    fn edge_hi(&self) -> Edge<'_, K> {
        match self {
            Bound::NegInf => Edge::NegInf,
            Bound::Excl(k) => Edge::At(k, -1),
            Bound::Incl(k) => Edge::At(k, 1),
            Bound::PosInf => Edge::PosInf,
        }
    }
}

fn complement_as_hi<K: Clone>(lo: &Bound<K>) -> Option<Bound<K>> {
    match lo {
        Bound::NegInf => None,
        Bound::Incl(k) => Some(Bound::Excl(k.clone())),
        Bound::Excl(k) => Some(Bound::Incl(k.clone())),
        Bound::PosInf => Some(Bound::PosInf),
    }
}

fn complement_as_lo<K: Clone>(hi: &Bound<K>) -> Option<Bound<K>> {
    match hi {
        Bound::PosInf => None,
        Bound::Incl(k) => Some(Bound::Excl(k.clone())),
        Bound::Excl(k) => Some(Bound::Incl(k.clone())),
        Bound::NegInf => Some(Bound::NegInf),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interval<K> {
    pub lo: Bound<K>,
    pub hi: Bound<K>,
}

impl<K: Ord + Clone> Interval<K> {
    pub fn full() -> Self {
        Interval {
            lo: Bound::NegInf,
            hi: Bound::PosInf,
        }
    }

    pub fn closed(lo: K, hi: K) -> Self {
        Interval {
            lo: Bound::Incl(lo),
            hi: Bound::Incl(hi),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lo.edge_lo().cmp(&self.hi.edge_hi()) == CmpOrdering::Greater
    }

    pub fn intersect(&self, other: &Self) -> Option<Self> {
        let lo = if self.lo.edge_lo() >= other.lo.edge_lo() {
            self.lo.clone()
        } else {
            other.lo.clone()
        };
        let hi = if self.hi.edge_hi() <= other.hi.edge_hi() {
            self.hi.clone()
        } else {
            other.hi.clone()
        };
        let out = Interval { lo, hi };
        if out.is_empty() {
            None
        } else {
            Some(out)
        }
    }

    /// Remove the portion of `self` covered by `cover`, returning the 0, 1
    /// or 2 disjoint pieces of `self` left unmasked.
    pub fn subtract(&self, cover: &Self) -> Vec<Self> {
        let overlap = match self.intersect(cover) {
            Some(o) => o,
            None => return vec![self.clone()],
        };
        let mut out = Vec::with_capacity(2);
        if let Some(left_hi) = complement_as_hi(&overlap.lo) {
            let left = Interval {
                lo: self.lo.clone(),
                hi: left_hi,
            };
            if !left.is_empty() {
                out.push(left);
            }
        }
        if let Some(right_lo) = complement_as_lo(&overlap.hi) {
            let right = Interval {
                lo: right_lo,
                hi: self.hi.clone(),
            };
            if !right.is_empty() {
                out.push(right);
            }
        }
        out
    }
}

/// Subtract `cover` from every interval in `remaining`, in place.
pub fn subtract_all<K: Ord + Clone>(remaining: &[Interval<K>], cover: &Interval<K>) -> Vec<Interval<K>> {
    remaining.iter().flat_map(|r| r.subtract(cover)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_overlap_leaves_nothing() {
        let whole = Interval::closed(0i64, 10);
        let cover = Interval::closed(0i64, 10);
        assert!(whole.subtract(&cover).is_empty());
    }

    #[test]
    fn middle_cut_leaves_two_pieces() {
        let whole = Interval::closed(0i64, 10);
        let cover = Interval::closed(4i64, 6);
        let pieces = whole.subtract(&cover);
        assert_eq!(
            pieces,
            vec![
                Interval {
                    lo: Bound::Incl(0),
                    hi: Bound::Excl(4)
                },
                Interval {
                    lo: Bound::Excl(6),
                    hi: Bound::Incl(10)
                },
            ]
        );
    }

    #[test]
    fn left_cut_leaves_right_remainder_only() {
        let whole = Interval::closed(0i64, 10);
        let cover = Interval::closed(-5i64, 5);
        let pieces = whole.subtract(&cover);
        assert_eq!(
            pieces,
            vec![Interval {
                lo: Bound::Excl(5),
                hi: Bound::Incl(10)
            }]
        );
    }

    #[test]
    fn disjoint_cover_leaves_self_untouched() {
        let whole = Interval::closed(0i64, 10);
        let cover = Interval::closed(20i64, 30);
        assert_eq!(whole.subtract(&cover), vec![whole]);
    }

    #[test]
    fn full_range_is_whittled_down_by_successive_covers() {
        let mut remaining = vec![Interval::<i64>::full()];
        remaining = subtract_all(&remaining, &Interval::closed(100, 200));
        assert_eq!(remaining.len(), 2);
        remaining = subtract_all(&remaining, &Interval::closed(-50, 300));
        assert!(remaining.is_empty());
    }
}
