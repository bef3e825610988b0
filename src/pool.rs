//! Arena storage for ray segments.
//!
//! The segment graph of a trace run is a tree with parent back-edges. All
//! segments live in a chunked pool and refer to each other through opaque
//! handles (index + generation), so clearing the pool between wavelengths is
//! O(1) on metadata while chunk memory is retained for the next pass.

use crate::Vec3;
use crate::geom::rotation::AxisRotation;

/// Number of segment slots per chunk.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Stable handle to a segment in a [`RaySegmentPool`].
///
/// Valid from `acquire` until the next `clear` of the owning pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RaySegHandle {
    index: u32,
    generation: u32,
}

/// One straight-line flight of a photon packet.
#[derive(Debug, Clone)]
pub struct RaySegment {
    /// Entry point (the surface event the segment starts from).
    pub pt: Vec3,
    /// Unit flight direction.
    pub dir: Vec3,
    /// Packet weight in `[0, 1]`.
    pub w: f64,
    /// Triangle the segment originates from.
    pub face_id: i32,
    /// True once the segment has left the crystal.
    pub is_finished: bool,
    pub prev: Option<RaySegHandle>,
    pub next_reflect: Option<RaySegHandle>,
    pub next_refract: Option<RaySegHandle>,
    /// Index of the root [`RayInfo`]; set for every segment of a ray tree.
    pub root: Option<usize>,
}

/// Per-ray bookkeeping carried by the tree root only.
#[derive(Debug, Clone)]
pub struct RayInfo {
    /// Sampled main-axis rotation of the crystal this ray entered.
    pub main_axis: AxisRotation,
    /// Exit segment of the previous scatter pass, if any.
    pub prev_ray_segment: Option<RaySegHandle>,
    /// Root segment of this ray.
    pub first_ray_segment: RaySegHandle,
}

/// Grow-only chunked allocator handing out stable segment handles.
pub struct RaySegmentPool {
    chunks: Vec<Vec<RaySegment>>,
    used: usize,
    generation: u32,
}

impl RaySegmentPool {
    pub fn new() -> Self {
        Self {
            chunks: Vec::new(),
            used: 0,
            generation: 0,
        }
    }

    /// Number of live segments.
    pub fn len(&self) -> usize {
        self.used
    }

    pub fn is_empty(&self) -> bool {
        self.used == 0
    }

    /// Allocates a fresh segment with unattached relations.
    pub fn acquire(&mut self, pt: Vec3, dir: Vec3, w: f64, face_id: i32) -> RaySegHandle {
        let chunk_idx = self.used / CHUNK_SIZE;
        if chunk_idx == self.chunks.len() {
            self.chunks.push(Vec::with_capacity(CHUNK_SIZE));
        }
        self.chunks[chunk_idx].push(RaySegment {
            pt,
            dir,
            w,
            face_id,
            is_finished: false,
            prev: None,
            next_reflect: None,
            next_refract: None,
            root: None,
        });
        let handle = RaySegHandle {
            index: self.used as u32,
            generation: self.generation,
        };
        self.used += 1;
        handle
    }

    /// Resets the occupancy cursor; chunk memory is retained.
    ///
    /// All previously issued handles become stale.
    pub fn clear(&mut self) {
        for chunk in &mut self.chunks {
            chunk.clear();
        }
        self.used = 0;
        self.generation = self.generation.wrapping_add(1);
    }

    /// Borrows the segment behind a live handle, or `None` for a stale one.
    pub fn try_get(&self, handle: RaySegHandle) -> Option<&RaySegment> {
        if handle.generation != self.generation {
            return None;
        }
        let idx = handle.index as usize;
        self.chunks.get(idx / CHUNK_SIZE)?.get(idx % CHUNK_SIZE)
    }

    /// Borrows the segment behind a handle.
    ///
    /// Panics on a handle from a previous generation; use
    /// [`RaySegmentPool::try_get`] at trust boundaries.
    pub fn get(&self, handle: RaySegHandle) -> &RaySegment {
        self.try_get(handle).expect("stale ray segment handle")
    }

    pub fn get_mut(&mut self, handle: RaySegHandle) -> &mut RaySegment {
        assert_eq!(
            handle.generation, self.generation,
            "stale ray segment handle"
        );
        let idx = handle.index as usize;
        &mut self.chunks[idx / CHUNK_SIZE][idx % CHUNK_SIZE]
    }
}

impl Default for RaySegmentPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acquire_n(pool: &mut RaySegmentPool, n: usize) -> Vec<RaySegHandle> {
        (0..n)
            .map(|i| {
                pool.acquire(
                    Vec3::new(i as f64, 0., 0.),
                    Vec3::new(0., 0., 1.),
                    1.0,
                    i as i32,
                )
            })
            .collect()
    }

    #[test]
    fn test_acquire_and_get() {
        let mut pool = RaySegmentPool::new();
        let h = pool.acquire(Vec3::new(1., 2., 3.), Vec3::new(0., 0., 1.), 0.5, 7);
        let seg = pool.get(h);
        assert_eq!(seg.pt, Vec3::new(1., 2., 3.));
        assert_eq!(seg.face_id, 7);
        assert!(!seg.is_finished);
        assert!(seg.prev.is_none() && seg.next_reflect.is_none() && seg.next_refract.is_none());
    }

    #[test]
    fn test_handles_stable_across_chunk_growth() {
        let mut pool = RaySegmentPool::new();
        let handles = acquire_n(&mut pool, CHUNK_SIZE + 100);
        assert_eq!(pool.len(), CHUNK_SIZE + 100);

        // Early handles still resolve to the same data after a new chunk
        // has been appended.
        assert_eq!(pool.get(handles[0]).face_id, 0);
        assert_eq!(pool.get(handles[10]).pt.x, 10.0);
        assert_eq!(pool.get(handles[CHUNK_SIZE]).face_id, CHUNK_SIZE as i32);
    }

    #[test]
    fn test_clear_invalidates_handles() {
        let mut pool = RaySegmentPool::new();
        let handles = acquire_n(&mut pool, 10);
        pool.clear();
        assert_eq!(pool.len(), 0);
        assert!(pool.try_get(handles[3]).is_none());

        // Memory is reused: the next acquire starts at index 0 again.
        let h = pool.acquire(Vec3::zero(), Vec3::new(0., 0., 1.), 1.0, 0);
        assert!(pool.try_get(h).is_some());
        assert!(pool.try_get(handles[0]).is_none(), "Old generation stays dead");
    }

    #[test]
    fn test_relations_unattached_after_clear() {
        let mut pool = RaySegmentPool::new();
        let a = pool.acquire(Vec3::zero(), Vec3::new(0., 0., 1.), 1.0, 0);
        let b = pool.acquire(Vec3::zero(), Vec3::new(0., 0., 1.), 0.5, 1);
        pool.get_mut(b).prev = Some(a);
        pool.get_mut(a).next_reflect = Some(b);

        pool.clear();
        let c = pool.acquire(Vec3::zero(), Vec3::new(0., 0., 1.), 1.0, 2);
        let seg = pool.get(c);
        assert!(seg.prev.is_none());
        assert!(seg.next_reflect.is_none());
    }

    #[test]
    #[should_panic(expected = "stale ray segment handle")]
    fn test_get_panics_on_stale_handle() {
        let mut pool = RaySegmentPool::new();
        let h = pool.acquire(Vec3::zero(), Vec3::new(0., 0., 1.), 1.0, 0);
        pool.clear();
        let _ = pool.get(h);
    }
}
