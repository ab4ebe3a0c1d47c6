//! Merge and inner product (spec §4.7).
//!
//! Both walk two already hash-ordered iterators in lockstep, advancing
//! whichever side has the smaller fingerprint (or both, on a tie) — the same
//! merge-join shape as any sorted-merge step. `merge_all` and `magnitude`
//! (SPEC_FULL §10.6) are built on top of these in [`crate::filter`], since
//! they need to construct and own a destination filter.

use std::cmp::Ordering;

use crate::iter::Element;

/// Destination of [`merge`]: anything that can accept fingerprint/count
/// pairs in non-decreasing hash order. `CountingQuotientFilter` implements
/// this with a fast append path that skips the general insert scan, since
/// the merge itself already guarantees the order invariant (spec I1) holds.
pub trait MergeSink {
    type Error;
    fn append(&mut self, hash: u64, count: u64) -> Result<(), Self::Error>;
}

/// Ordered walk of `a` and `b`, writing `(hash, count_a + count_b)` to `dst`
/// via ordered appends.
///
/// Requires `a` and `b` to already be in non-decreasing hash order (i.e.
/// produced by [`crate::iter::Iter`] over filters sharing hash mode and `r`,
/// per spec §4.7). Satisfies the merge-sum law:
/// `count(merge(a,b), k, v) = count(a,k,v) + count(b,k,v)`.
pub fn merge<A, B, S>(mut a: A, mut b: B, dst: &mut S) -> Result<(), S::Error>
where
    A: Iterator<Item = Element>,
    B: Iterator<Item = Element>,
    S: MergeSink,
{
    let mut cur_a = a.next();
    let mut cur_b = b.next();
    loop {
        match (cur_a, cur_b) {
            (Some(ea), Some(eb)) => match ea.hash.cmp(&eb.hash) {
                Ordering::Less => {
                    dst.append(ea.hash, ea.count)?;
                    cur_a = a.next();
                }
                Ordering::Greater => {
                    dst.append(eb.hash, eb.count)?;
                    cur_b = b.next();
                }
                Ordering::Equal => {
                    dst.append(ea.hash, ea.count + eb.count)?;
                    cur_a = a.next();
                    cur_b = b.next();
                }
            },
            (Some(ea), None) => {
                dst.append(ea.hash, ea.count)?;
                cur_a = a.next();
            }
            (None, Some(eb)) => {
                dst.append(eb.hash, eb.count)?;
                cur_b = b.next();
            }
            (None, None) => return Ok(()),
        }
    }
}

/// Walks `a` and `b` simultaneously, summing `count_a * count_b` wherever
/// their fingerprints match. Symmetric (`inner(a,b) = inner(b,a)`); `u128`
/// because two `u64` counts multiplied and summed across a large filter can
/// exceed `u64::MAX`.
pub fn inner_product<A, B>(mut a: A, mut b: B) -> u128
where
    A: Iterator<Item = Element>,
    B: Iterator<Item = Element>,
{
    let mut cur_a = a.next();
    let mut cur_b = b.next();
    let mut total: u128 = 0;
    loop {
        match (cur_a, cur_b) {
            (Some(ea), Some(eb)) => match ea.hash.cmp(&eb.hash) {
                Ordering::Less => cur_a = a.next(),
                Ordering::Greater => cur_b = b.next(),
                Ordering::Equal => {
                    total += ea.count as u128 * eb.count as u128;
                    cur_a = a.next();
                    cur_b = b.next();
                }
            },
            _ => return total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn el(hash: u64, count: u64) -> Element {
        Element {
            start_slot: 0,
            hash,
            count,
            key_value: None,
        }
    }

    #[derive(Default)]
    struct VecSink(Vec<(u64, u64)>);

    impl MergeSink for VecSink {
        type Error = std::convert::Infallible;
        fn append(&mut self, hash: u64, count: u64) -> Result<(), Self::Error> {
            self.0.push((hash, count));
            Ok(())
        }
    }

    #[test]
    fn merge_interleaves_unique_elements() {
        let a = vec![el(1, 1), el(3, 1)].into_iter();
        let b = vec![el(2, 1), el(4, 1)].into_iter();
        let mut dst = VecSink::default();
        merge(a, b, &mut dst).unwrap();
        assert_eq!(dst.0, vec![(1, 1), (2, 1), (3, 1), (4, 1)]);
    }

    #[test]
    fn merge_sums_counts_on_matching_hash() {
        let a = vec![el(5, 3)].into_iter();
        let b = vec![el(5, 4)].into_iter();
        let mut dst = VecSink::default();
        merge(a, b, &mut dst).unwrap();
        assert_eq!(dst.0, vec![(5, 7)]);
    }

    #[test]
    fn inner_product_sums_products_on_matching_hash() {
        let a = vec![el(1, 2), el(2, 3), el(3, 5)].into_iter();
        let b = vec![el(2, 7), el(3, 1), el(4, 9)].into_iter();
        assert_eq!(inner_product(a, b), 2 * 7 + 5 * 1);
    }

    #[test]
    fn inner_product_is_symmetric() {
        let a1 = vec![el(1, 2), el(2, 3)].into_iter();
        let b1 = vec![el(2, 7), el(3, 9)].into_iter();
        let a2 = vec![el(2, 7), el(3, 9)].into_iter();
        let b2 = vec![el(1, 2), el(2, 3)].into_iter();
        assert_eq!(inner_product(a1, b1), inner_product(a2, b2));
    }

    #[test]
    fn inner_product_with_self_is_sum_of_squares() {
        let elements = vec![el(1, 2), el(2, 3), el(3, 5)];
        let a = elements.clone().into_iter();
        let b = elements.into_iter();
        assert_eq!(inner_product(a, b), 2 * 2 + 3 * 3 + 5 * 5);
    }

    fn to_sorted_elements(pairs: Vec<(u64, u16)>) -> Vec<Element> {
        let mut map = std::collections::BTreeMap::new();
        for (hash, count) in pairs {
            let count = count as u64 % 100 + 1;
            *map.entry(hash).or_insert(0u64) += count;
        }
        map.into_iter().map(|(hash, count)| el(hash, count)).collect()
    }

    use quickcheck_macros::quickcheck;

    #[quickcheck]
    fn merge_sums_counts_per_hash(pairs_a: Vec<(u64, u16)>, pairs_b: Vec<(u64, u16)>) -> bool {
        let a = to_sorted_elements(pairs_a);
        let b = to_sorted_elements(pairs_b);
        let count_in = |elements: &[Element], hash: u64| {
            elements.iter().find(|e| e.hash == hash).map_or(0, |e| e.count)
        };

        let mut dst = VecSink::default();
        merge(a.clone().into_iter(), b.clone().into_iter(), &mut dst).unwrap();

        a.iter()
            .chain(b.iter())
            .map(|e| e.hash)
            .all(|hash| {
                let merged = dst.0.iter().find(|(h, _)| *h == hash).map_or(0, |(_, c)| *c);
                merged == count_in(&a, hash) + count_in(&b, hash)
            })
    }

    #[quickcheck]
    fn inner_product_is_symmetric_for_arbitrary_input(pairs_a: Vec<(u64, u16)>, pairs_b: Vec<(u64, u16)>) -> bool {
        let a = to_sorted_elements(pairs_a);
        let b = to_sorted_elements(pairs_b);
        inner_product(a.clone().into_iter(), b.clone().into_iter())
            == inner_product(b.into_iter(), a.into_iter())
    }
}
