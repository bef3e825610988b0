//! Ray-path filters.
//!
//! A filter decides which finished rays are worth keeping, based on the
//! sequence of face numbers the ray crossed. Filters are plain values: the
//! accept rules are a tagged enum and symmetry expansion is a pure function
//! of the rule set and the crystal's symmetry group, cached per crystal.

use crate::pool::{RaySegHandle, RaySegmentPool};
use crate::Crystal;
use std::collections::HashSet;

/// Accept rule of a [`RayPathFilter`].
#[derive(Debug, Clone)]
pub enum FilterKind {
    /// Accept every ray.
    All,
    /// Accept rays whose face-number sequence matches one of the listed
    /// paths exactly (after symmetry expansion).
    Specific { paths: Vec<Vec<i32>> },
    /// Accept rays by entry face, exit face and/or number of surface hits.
    /// Empty face lists and `hits: None` leave that aspect unconstrained.
    /// Entry and exit faces are matched literally, without symmetry
    /// expansion: expanding them independently would lose the pairing and
    /// accept any same-block combination.
    General {
        enter: Vec<i32>,
        exit: Vec<i32>,
        hits: Option<usize>,
    },
}

#[derive(Debug, Clone)]
pub struct RayPathFilter {
    kind: FilterKind,
    /// Expand paths under the crystal's basal rotational symmetry.
    pub apply_rotation: bool,
    /// Expand paths under the prism reflection symmetry (basal flip).
    pub apply_mirror: bool,
    expanded_paths: HashSet<Vec<i32>>,
    cached_fold: Option<u32>,
}

impl RayPathFilter {
    pub fn new(kind: FilterKind) -> Self {
        Self {
            kind,
            apply_rotation: true,
            apply_mirror: true,
            expanded_paths: HashSet::new(),
            cached_fold: None,
        }
    }

    pub fn accept_all() -> Self {
        Self::new(FilterKind::All)
    }

    pub fn kind(&self) -> &FilterKind {
        &self.kind
    }

    /// Expands the whitelist paths into all symmetry-equivalent sequences of
    /// `crystal`. Cached; recomputed only when the symmetry fold changes.
    pub fn apply_symmetry(&mut self, crystal: &Crystal) {
        let fold = crystal.rotation_fold();
        if self.cached_fold == Some(fold) {
            return;
        }
        self.expanded_paths.clear();

        if let FilterKind::Specific { paths } = &self.kind {
            let rotations = if self.apply_rotation { fold } else { 1 };
            let mirrors: &[bool] = if self.apply_mirror {
                &[false, true]
            } else {
                &[false]
            };
            for path in paths {
                for r in 0..rotations {
                    for &mirror in mirrors {
                        let mapped: Vec<i32> = path
                            .iter()
                            .map(|&f| map_face_number(f, fold, r, mirror))
                            .collect();
                        self.expanded_paths.insert(mapped);
                    }
                }
            }
        }
        self.cached_fold = Some(fold);
    }

    /// Tests the face-number path of `segment` against the accept rules.
    ///
    /// [`RayPathFilter::apply_symmetry`] must have run for this crystal.
    pub fn filter(
        &self,
        pool: &RaySegmentPool,
        crystal: &Crystal,
        segment: RaySegHandle,
    ) -> bool {
        match &self.kind {
            FilterKind::All => true,
            FilterKind::Specific { .. } => {
                let path = collect_path(pool, crystal, segment);
                self.expanded_paths.contains(&path)
            }
            FilterKind::General { enter, exit, hits } => {
                let path = collect_path(pool, crystal, segment);
                if path.is_empty() {
                    return false;
                }
                if let Some(n) = hits
                    && path.len() - 1 != *n
                {
                    return false;
                }
                if !enter.is_empty() && !enter.contains(&path[0]) {
                    return false;
                }
                if !exit.is_empty() && !exit.contains(path.last().unwrap()) {
                    return false;
                }
                true
            }
        }
    }
}

/// Face numbers crossed by the ray, entry first.
///
/// Walks the `prev` chain from `segment` back to the root.
pub fn collect_path(
    pool: &RaySegmentPool,
    crystal: &Crystal,
    segment: RaySegHandle,
) -> Vec<i32> {
    let mut path = Vec::new();
    let mut current = Some(segment);
    while let Some(handle) = current {
        let seg = pool.get(handle);
        if seg.face_id >= 0 {
            path.push(crystal.face_number(seg.face_id as usize));
        }
        current = seg.prev;
    }
    path.reverse();
    path
}

/// Image of a face number under one symmetry operation of the crystal.
///
/// `rotation` steps around the main axis, optionally composed with the
/// basal flip (which swaps the basal faces, mirrors the prism order and
/// exchanges the upper and lower pyramidal blocks). Face numbers outside
/// the conventional blocks are left untouched.
fn map_face_number(number: i32, fold: u32, rotation: u32, mirror: bool) -> i32 {
    let fold = fold as i32;
    let rotation = rotation as i32;
    let rotate = |offset: i32| -> i32 { (offset + rotation).rem_euclid(fold) };
    let reflect = |offset: i32| -> i32 { (fold - offset).rem_euclid(fold) };

    let (base, offset) = match number {
        1 => return if mirror { 2 } else { 1 },
        2 => return if mirror { 1 } else { 2 },
        n if (3..3 + fold).contains(&n) => (3, n - 3),
        n if (13..13 + fold).contains(&n) => (13, n - 13),
        n if (23..23 + fold).contains(&n) => (23, n - 23),
        n => return n,
    };

    let (base, offset) = if mirror {
        let flipped_base = match base {
            13 => 23,
            23 => 13,
            b => b,
        };
        (flipped_base, reflect(offset))
    } else {
        (base, offset)
    };
    base + rotate(offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Vec3;

    fn chain(pool: &mut RaySegmentPool, crystal: &Crystal, numbers: &[i32]) -> RaySegHandle {
        // Builds a prev-linked chain whose segments originate at triangles
        // with the given face numbers.
        let mut prev: Option<RaySegHandle> = None;
        for &number in numbers {
            let face = (0..crystal.total_faces())
                .find(|&f| crystal.face_number(f) == number)
                .expect("face number not present");
            let h = pool.acquire(Vec3::zero(), Vec3::new(0., 0., 1.), 1.0, face as i32);
            pool.get_mut(h).prev = prev;
            prev = Some(h);
        }
        prev.unwrap()
    }

    #[test]
    fn test_collect_path_order() {
        let crystal = Crystal::hex_prism(0.4);
        let mut pool = RaySegmentPool::new();
        let leaf = chain(&mut pool, &crystal, &[3, 1, 5]);
        assert_eq!(collect_path(&pool, &crystal, leaf), vec![3, 1, 5]);
    }

    #[test]
    fn test_accept_all() {
        let crystal = Crystal::hex_prism(0.4);
        let mut pool = RaySegmentPool::new();
        let leaf = chain(&mut pool, &crystal, &[3, 5]);
        let mut filter = RayPathFilter::accept_all();
        filter.apply_symmetry(&crystal);
        assert!(filter.filter(&pool, &crystal, leaf));
    }

    #[test]
    fn test_specific_rotation_expansion() {
        let crystal = Crystal::hex_prism(0.4);
        let mut pool = RaySegmentPool::new();

        let mut filter = RayPathFilter::new(FilterKind::Specific {
            paths: vec![vec![3, 5]],
        });
        filter.apply_mirror = false;
        filter.apply_symmetry(&crystal);

        // Rotated variants of the 22-degree prism path are accepted...
        for (enter, exit) in [(3, 5), (4, 6), (5, 7), (8, 4)] {
            let leaf = chain(&mut pool, &crystal, &[enter, exit]);
            assert!(
                filter.filter(&pool, &crystal, leaf),
                "{enter}-{exit} should be accepted"
            );
        }
        // ...an unrelated path is not.
        let leaf = chain(&mut pool, &crystal, &[3, 4]);
        assert!(!filter.filter(&pool, &crystal, leaf));
        // Neither is the mirrored variant when mirror symmetry is off.
        let leaf = chain(&mut pool, &crystal, &[3, 7]);
        assert!(!filter.filter(&pool, &crystal, leaf));
    }

    #[test]
    fn test_specific_mirror_expansion() {
        let crystal = Crystal::hex_prism(0.4);
        let mut pool = RaySegmentPool::new();

        let mut filter = RayPathFilter::new(FilterKind::Specific {
            paths: vec![vec![1, 3, 2]],
        });
        filter.apply_symmetry(&crystal);

        // Basal flip swaps the basal faces.
        let leaf = chain(&mut pool, &crystal, &[2, 3, 1]);
        assert!(filter.filter(&pool, &crystal, leaf));
    }

    #[test]
    fn test_general_hits_and_faces() {
        let crystal = Crystal::hex_prism(0.4);
        let mut pool = RaySegmentPool::new();

        let mut filter = RayPathFilter::new(FilterKind::General {
            enter: vec![3],
            exit: vec![5],
            hits: Some(1),
        });
        filter.apply_symmetry(&crystal);

        let leaf = chain(&mut pool, &crystal, &[3, 5]);
        assert!(filter.filter(&pool, &crystal, leaf));

        // Entry and exit faces are literal: a rotated pair does not match.
        let leaf = chain(&mut pool, &crystal, &[4, 6]);
        assert!(!filter.filter(&pool, &crystal, leaf));

        // Wrong hit count
        let leaf = chain(&mut pool, &crystal, &[3, 1, 5]);
        assert!(!filter.filter(&pool, &crystal, leaf));
    }

    #[test]
    fn test_general_unconstrained_aspects() {
        let crystal = Crystal::hex_prism(0.4);
        let mut pool = RaySegmentPool::new();

        let mut filter = RayPathFilter::new(FilterKind::General {
            enter: Vec::new(),
            exit: vec![5],
            hits: None,
        });
        filter.apply_symmetry(&crystal);

        // Any path ending at face 5 is accepted regardless of length.
        let leaf = chain(&mut pool, &crystal, &[3, 1, 2, 5]);
        assert!(filter.filter(&pool, &crystal, leaf));
        let leaf = chain(&mut pool, &crystal, &[3, 1, 2, 6]);
        assert!(!filter.filter(&pool, &crystal, leaf));
    }

    #[test]
    fn test_symmetry_cache_recomputed_per_fold() {
        let hex = Crystal::hex_prism(0.4);
        let cubic = Crystal::cubic_pyramid(0.3, 0.3);
        let mut pool = RaySegmentPool::new();

        let mut filter = RayPathFilter::new(FilterKind::Specific {
            paths: vec![vec![13, 23]],
        });
        filter.apply_mirror = false;
        filter.apply_symmetry(&hex);
        filter.apply_symmetry(&cubic);

        // Under 4-fold symmetry the rotation wraps at 4 steps.
        let leaf = chain(&mut pool, &cubic, &[16, 26]);
        assert!(filter.filter(&pool, &cubic, leaf));
    }
}
