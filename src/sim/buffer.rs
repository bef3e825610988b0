//! Double-buffered structure-of-arrays storage for in-flight rays.
//!
//! Buffer `[0]` holds the current ray generation, buffer `[1]` their
//! children: the reflected child of input slot `i` lands at `2i`, the
//! refracted one at `2i+1`. Keeping each component in its own flat array
//! lets the surface-hit and propagate kernels run over plain slices.

use crate::Vec3;
use crate::pool::RaySegHandle;

/// Grow-only SoA ray buffers.
pub struct SimulationBuffer {
    /// Event points, 3 floats per slot.
    pub pt: [Vec<f64>; 2],
    /// Flight directions, 3 floats per slot.
    pub dir: [Vec<f64>; 2],
    /// Packet weights.
    pub w: [Vec<f64>; 2],
    /// Originating triangle per slot; -1 marks an escaped ray.
    pub face_id: [Vec<i32>; 2],
    /// Pool handle of the segment stored for each slot.
    pub ray_seg: [Vec<Option<RaySegHandle>>; 2],
    capacity: usize,
}

impl SimulationBuffer {
    pub fn new() -> Self {
        Self {
            pt: [Vec::new(), Vec::new()],
            dir: [Vec::new(), Vec::new()],
            w: [Vec::new(), Vec::new()],
            face_id: [Vec::new(), Vec::new()],
            ray_seg: [Vec::new(), Vec::new()],
            capacity: 0,
        }
    }

    /// Slots available in each of the two buffers.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Grows both buffers to hold at least `min_slots` slots.
    ///
    /// Existing slot data is preserved; the buffers never shrink.
    pub fn ensure(&mut self, min_slots: usize) {
        if min_slots <= self.capacity {
            return;
        }
        for i in 0..2 {
            self.pt[i].resize(min_slots * 3, 0.0);
            self.dir[i].resize(min_slots * 3, 0.0);
            self.w[i].resize(min_slots, 0.0);
            self.face_id[i].resize(min_slots, -1);
            self.ray_seg[i].resize(min_slots, None);
        }
        self.capacity = min_slots;
    }

    /// Reads the point or direction triple of `slot`.
    pub fn read_vec3(data: &[f64], slot: usize) -> Vec3 {
        Vec3::new(data[slot * 3], data[slot * 3 + 1], data[slot * 3 + 2])
    }

    /// Writes the point or direction triple of `slot`.
    pub fn write_vec3(data: &mut [f64], slot: usize, v: Vec3) {
        data[slot * 3] = v.x;
        data[slot * 3 + 1] = v.y;
        data[slot * 3 + 2] = v.z;
    }
}

impl Default for SimulationBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// World-frame entry rays of one scatter pass.
pub struct EnterRayData {
    /// Propagation directions in the world frame.
    pub dir: Vec<Vec3>,
    /// Exit segment of the previous pass feeding each ray (None on the
    /// first pass).
    pub prev: Vec<Option<RaySegHandle>>,
}

impl EnterRayData {
    pub fn new() -> Self {
        Self {
            dir: Vec::new(),
            prev: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.dir.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dir.is_empty()
    }

    /// Grows to at least `n` rays; keeps existing entries.
    pub fn ensure(&mut self, n: usize) {
        if self.dir.len() < n {
            self.dir.resize(n, Vec3::zero());
            self.prev.resize(n, None);
        }
    }

    pub fn clean(&mut self) {
        self.dir.clear();
        self.prev.clear();
    }
}

impl Default for EnterRayData {
    fn default() -> Self {
        Self::new()
    }
}
