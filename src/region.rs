//! Pixel areas as sets of non-overlapping rectangles.
//!
//! [`Region`] is a plain value: operations return new regions and never mutate their inputs. The
//! rectangle decomposition they produce is correct but not minimal; two regions covering the same
//! pixels compare equal regardless of how they are split up.

use std::fmt;

use serde::Serialize;

/// Axis-aligned rectangle in pixel coordinates.
///
/// Rectangles with a non-positive width or height are degenerate and cover no pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn from_size(width: i32, height: i32) -> Self {
        Self::new(0, 0, width, height)
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    pub fn right(&self) -> i32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.height
    }

    pub fn area(&self) -> i64 {
        if self.is_empty() {
            0
        } else {
            i64::from(self.width) * i64::from(self.height)
        }
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        !self.is_empty() && self.x <= x && x < self.right() && self.y <= y && y < self.bottom()
    }

    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        if self.is_empty() || other.is_empty() {
            return None;
        }

        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());

        let rect = Rect::new(x, y, right - x, bottom - y);
        (!rect.is_empty()).then_some(rect)
    }

    pub fn translate(&self, dx: i32, dy: i32) -> Rect {
        Rect::new(self.x + dx, self.y + dy, self.width, self.height)
    }

    /// Smallest rectangle containing both.
    pub fn merge(&self, other: &Rect) -> Rect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }

        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let right = self.right().max(other.right());
        let bottom = self.bottom().max(other.bottom());
        Rect::new(x, y, right - x, bottom - y)
    }

    /// Pushes the parts of `self` not covered by `hole` into `out`.
    ///
    /// Produces at most four pieces: full-width bands above and below the hole, then the left and
    /// right remainders alongside it.
    fn subtract_into(&self, hole: &Rect, out: &mut Vec<Rect>) {
        let Some(inter) = self.intersection(hole) else {
            if !self.is_empty() {
                out.push(*self);
            }
            return;
        };

        let pieces = [
            Rect::new(self.x, self.y, self.width, inter.y - self.y),
            Rect::new(self.x, inter.bottom(), self.width, self.bottom() - inter.bottom()),
            Rect::new(self.x, inter.y, inter.x - self.x, inter.height),
            Rect::new(inter.right(), inter.y, self.right() - inter.right(), inter.height),
        ];
        out.extend(pieces.into_iter().filter(|r| !r.is_empty()));
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}+{}+{}", self.width, self.height, self.x, self.y)
    }
}

/// A set of pixels, stored as non-overlapping, non-empty rectangles.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Region {
    rects: Vec<Rect>,
}

impl Region {
    pub const fn empty() -> Self {
        Self { rects: Vec::new() }
    }

    pub fn from_rect(rect: Rect) -> Self {
        if rect.is_empty() {
            Self::empty()
        } else {
            Self { rects: vec![rect] }
        }
    }

    /// Builds a region from possibly overlapping rectangles.
    pub fn from_rects(rects: impl IntoIterator<Item = Rect>) -> Self {
        rects
            .into_iter()
            .fold(Self::empty(), |acc, rect| acc.union(&Self::from_rect(rect)))
    }

    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }

    pub fn rects(&self) -> &[Rect] {
        &self.rects
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Rect> {
        self.rects.iter()
    }

    /// Number of pixels covered.
    pub fn area(&self) -> i64 {
        self.rects.iter().map(Rect::area).sum()
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        self.rects.iter().any(|r| r.contains(x, y))
    }

    /// Bounding box, or `None` for an empty region.
    pub fn bounds(&self) -> Option<Rect> {
        let (first, rest) = self.rects.split_first()?;
        Some(rest.iter().fold(*first, |acc, r| acc.merge(r)))
    }

    pub fn union(&self, other: &Region) -> Region {
        if self.is_empty() {
            return other.clone();
        }
        if other.is_empty() {
            return self.clone();
        }

        // Whatever of `other` is not already covered is disjoint from `self`.
        let extra = other.difference(self);
        let mut rects = Vec::with_capacity(self.rects.len() + extra.rects.len());
        rects.extend_from_slice(&self.rects);
        rects.extend(extra.rects);
        Region { rects }
    }

    pub fn difference(&self, other: &Region) -> Region {
        let mut current = self.rects.clone();
        let mut next = Vec::new();

        for hole in &other.rects {
            if current.is_empty() {
                break;
            }
            for rect in &current {
                rect.subtract_into(hole, &mut next);
            }
            std::mem::swap(&mut current, &mut next);
            next.clear();
        }

        Region { rects: current }
    }

    pub fn intersection(&self, other: &Region) -> Region {
        // Both inputs are disjoint sets, so their pairwise intersections are disjoint too.
        let rects = self
            .rects
            .iter()
            .flat_map(|a| other.rects.iter().filter_map(move |b| a.intersection(b)))
            .collect();
        Region { rects }
    }

    pub fn translate(&self, dx: i32, dy: i32) -> Region {
        Region {
            rects: self.rects.iter().map(|r| r.translate(dx, dy)).collect(),
        }
    }

    /// Adds a rectangle in place.
    pub fn add_rect(&mut self, rect: Rect) {
        if rect.is_empty() {
            return;
        }
        *self = self.union(&Region::from_rect(rect));
    }

    /// Empties the region, returning what it held.
    pub fn take(&mut self) -> Region {
        std::mem::take(self)
    }
}

impl PartialEq for Region {
    fn eq(&self, other: &Self) -> bool {
        self.area() == other.area() && self.difference(other).is_empty()
    }
}

impl Eq for Region {}

impl From<Rect> for Region {
    fn from(rect: Rect) -> Self {
        Region::from_rect(rect)
    }
}

impl FromIterator<Rect> for Region {
    fn from_iter<T: IntoIterator<Item = Rect>>(iter: T) -> Self {
        Region::from_rects(iter)
    }
}

impl<'a> IntoIterator for &'a Region {
    type Item = &'a Rect;
    type IntoIter = std::slice::Iter<'a, Rect>;

    fn into_iter(self) -> Self::IntoIter {
        self.rects.iter()
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut rects = self.rects.clone();
        rects.sort_by_key(|r| (r.y, r.x, r.height, r.width));

        f.write_str("[")?;
        for (i, rect) in rects.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{rect}")?;
        }
        f.write_str("]")
    }
}

#[cfg(test)]
mod tests {
    use insta::assert_snapshot;
    use proptest::prelude::*;

    use super::*;

    fn arbitrary_rect() -> impl Strategy<Value = Rect> {
        (-20..40, -20..40, 0..30, 0..30).prop_map(|(x, y, w, h)| Rect::new(x, y, w, h))
    }

    fn arbitrary_region() -> impl Strategy<Value = Region> {
        prop::collection::vec(arbitrary_rect(), 0..6).prop_map(Region::from_rects)
    }

    fn assert_disjoint(region: &Region) {
        for (i, a) in region.rects().iter().enumerate() {
            assert!(!a.is_empty(), "empty rect {a} kept in {region}");
            for b in &region.rects()[i + 1..] {
                assert!(a.intersection(b).is_none(), "{a} overlaps {b}");
            }
        }
    }

    #[test]
    fn subtract_hole_in_the_middle() {
        let outer = Region::from_rect(Rect::new(0, 0, 10, 10));
        let hole = Region::from_rect(Rect::new(3, 3, 4, 4));
        let ring = outer.difference(&hole);

        assert_eq!(ring.area(), 100 - 16);
        assert!(!ring.contains(5, 5));
        assert!(ring.contains(0, 0));
        assert!(ring.contains(9, 9));
        assert_snapshot!(ring, @"[10x3+0+0, 3x4+0+3, 3x4+7+3, 10x3+0+7]");
    }

    #[test]
    fn union_of_overlapping_squares() {
        let a = Region::from_rect(Rect::new(0, 0, 10, 10));
        let b = Region::from_rect(Rect::new(5, 5, 10, 10));
        let u = a.union(&b);

        assert_eq!(u.area(), 100 + 100 - 25);
        assert_eq!(u.bounds(), Some(Rect::new(0, 0, 15, 15)));
        assert_disjoint(&u);
    }

    #[test]
    fn degenerate_rects_are_empty() {
        assert!(Region::from_rect(Rect::new(4, 4, 0, 10)).is_empty());
        assert!(Region::from_rect(Rect::new(4, 4, 10, -1)).is_empty());
        assert_eq!(Region::empty().bounds(), None);
    }

    #[test]
    fn intersection_clips() {
        let a = Region::from_rect(Rect::new(0, 0, 10, 10));
        let b = Region::from_rect(Rect::new(8, -2, 10, 5));
        assert_eq!(a.intersection(&b), Region::from_rect(Rect::new(8, 0, 2, 3)));
    }

    #[test]
    fn equality_ignores_decomposition() {
        let split = Region::from_rects([Rect::new(0, 0, 5, 10), Rect::new(5, 0, 5, 10)]);
        let whole = Region::from_rect(Rect::new(0, 0, 10, 10));
        assert_eq!(split, whole);
        assert_ne!(split, Region::from_rect(Rect::new(0, 0, 10, 9)));
    }

    proptest! {
        #[test]
        fn self_difference_is_empty(a in arbitrary_region(), b in arbitrary_region()) {
            let u = a.union(&b);
            prop_assert!(u.difference(&u).is_empty());
        }

        #[test]
        fn union_with_empty_is_identity(a in arbitrary_region()) {
            prop_assert_eq!(a.union(&Region::empty()), a.clone());
            prop_assert_eq!(Region::empty().union(&a), a);
        }

        #[test]
        fn translate_distributes_over_union(
            a in arbitrary_region(),
            b in arbitrary_region(),
            dx in -50..50,
            dy in -50..50,
        ) {
            let lhs = a.union(&b).translate(dx, dy);
            let rhs = a.translate(dx, dy).union(&b.translate(dx, dy));
            prop_assert_eq!(lhs, rhs);
        }

        #[test]
        fn translate_distributes_over_difference(
            a in arbitrary_region(),
            b in arbitrary_region(),
            dx in -50..50,
            dy in -50..50,
        ) {
            let lhs = a.difference(&b).translate(dx, dy);
            let rhs = a.translate(dx, dy).difference(&b.translate(dx, dy));
            prop_assert_eq!(lhs, rhs);
        }

        #[test]
        fn operations_keep_rects_disjoint(a in arbitrary_region(), b in arbitrary_region()) {
            assert_disjoint(&a.union(&b));
            assert_disjoint(&a.difference(&b));
            assert_disjoint(&a.intersection(&b));
        }

        #[test]
        fn inclusion_exclusion(a in arbitrary_region(), b in arbitrary_region()) {
            let u = a.union(&b).area();
            let i = a.intersection(&b).area();
            prop_assert_eq!(u + i, a.area() + b.area());
        }

        #[test]
        fn pointwise_membership(
            a in arbitrary_region(),
            b in arbitrary_region(),
            x in -25..75,
            y in -25..75,
        ) {
            let (in_a, in_b) = (a.contains(x, y), b.contains(x, y));
            prop_assert_eq!(a.union(&b).contains(x, y), in_a || in_b);
            prop_assert_eq!(a.difference(&b).contains(x, y), in_a && !in_b);
            prop_assert_eq!(a.intersection(&b).contains(x, y), in_a && in_b);
        }
    }
}
