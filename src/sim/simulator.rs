//! Per-wavelength Monte-Carlo driver.
//!
//! One `start` call traces the full ray population for the current
//! wavelength: sun rays are seeded inside the solar cap, rotated into each
//! sampled crystal frame, traced through the recursive reflect/refract loop
//! and optionally chained into further scatter passes. The trace step fans
//! out over disjoint ray stripes on the rayon pool; every phase that draws
//! random numbers uses a stripe-local RNG derived from the master seed, so
//! results do not depend on the number of worker threads.

use crate::Crystal;
use crate::Vec3;
use crate::geom::rotation::{self, AxisRotation};
use crate::geom::sampler;
use crate::optics;
use crate::pool::{RayInfo, RaySegHandle, RaySegmentPool};
use crate::sim::buffer::{EnterRayData, SimulationBuffer};
use crate::sim::config::{AxisDistribution, BUFFER_FACTOR, DistributionKind, ProjectContext};
use crate::sim::filter::RayPathFilter;
use rand::Rng;
use rand::rngs::StdRng;
use rayon::prelude::*;
use std::f64::consts::TAU;
use std::sync::Arc;

/// Snapshot of the trace loop handed to progress callbacks.
#[derive(Debug, Clone, Copy)]
pub struct TraceProgress {
    /// Scatter pass being traced (0-based).
    pub pass: usize,
    pub total_passes: usize,
    /// Recursion step just finished (0-based).
    pub step: usize,
    pub max_steps: usize,
    /// Rays still alive after the step.
    pub alive_rays: usize,
}

pub struct Simulator {
    context: ProjectContext,
    pool: RaySegmentPool,
    buffer: SimulationBuffer,
    enter_rays: EnterRayData,
    ray_infos: Vec<RayInfo>,
    /// Exit segments collected per scatter pass.
    exit_segments: Vec<Vec<RaySegHandle>>,
    final_segments: Vec<RaySegHandle>,
    /// Filters resolved per (pass, crystal) slot, symmetry cache included.
    pass_filters: Vec<Vec<RayPathFilter>>,
    total_ray_num: usize,
    active_ray_num: usize,
    enter_ray_offset: usize,
    current_wavelength: Option<usize>,
    /// Weight still alive when the recursion limit cut the trace off.
    discarded_weight: f64,
    master_seed: u64,
    rng_stream: u64,
}

impl Simulator {
    pub fn new(context: ProjectContext) -> Self {
        let master_seed = context.seed.unwrap_or_else(rand::random);
        let pass_filters = context
            .scatter_passes
            .iter()
            .map(|pass| {
                pass.crystals
                    .iter()
                    .map(|c| context.filter(c.filter_id))
                    .collect()
            })
            .collect();
        Self {
            context,
            pool: RaySegmentPool::new(),
            buffer: SimulationBuffer::new(),
            enter_rays: EnterRayData::new(),
            ray_infos: Vec::new(),
            exit_segments: Vec::new(),
            final_segments: Vec::new(),
            pass_filters,
            total_ray_num: 0,
            active_ray_num: 0,
            enter_ray_offset: 0,
            current_wavelength: None,
            discarded_weight: 0.0,
            master_seed,
            rng_stream: 0,
        }
    }

    pub fn context(&self) -> &ProjectContext {
        &self.context
    }

    pub fn pool(&self) -> &RaySegmentPool {
        &self.pool
    }

    /// Selects the wavelength traced by the next `start`; out-of-range
    /// indices deselect and make `start` a no-op.
    pub fn set_wavelength_index(&mut self, index: usize) {
        self.current_wavelength = if index < self.context.wavelengths.len() {
            Some(index)
        } else {
            None
        };
    }

    pub fn current_wavelength(&self) -> Option<f64> {
        self.current_wavelength
            .map(|i| self.context.wavelengths[i].wavelength)
    }

    /// Runs the full per-wavelength state machine.
    pub fn start(&mut self) {
        self.start_with_progress(|_| {});
    }

    /// Like [`Simulator::start`], reporting after every recursion step.
    pub fn start_with_progress<F>(&mut self, mut report: F)
    where
        F: FnMut(&TraceProgress),
    {
        // Reset
        self.ray_infos.clear();
        self.exit_segments.clear();
        self.final_segments.clear();
        self.pool.clear();
        self.enter_rays.clean();
        self.enter_ray_offset = 0;
        self.discarded_weight = 0.0;
        self.rng_stream = 0;

        let Some(wavelength_index) = self.current_wavelength else {
            return;
        };
        let n_ice = optics::refractive_index(self.context.wavelengths[wavelength_index].wavelength);

        self.total_ray_num = self.context.init_ray_num;
        self.init_sun_rays();

        let total_passes = self.context.scatter_passes.len();
        for pass_idx in 0..total_passes {
            self.exit_segments.push(Vec::with_capacity(self.total_ray_num * 2));

            let crystal_refs = self.context.scatter_passes[pass_idx].crystals.clone();
            for (ci, c) in crystal_refs.iter().enumerate() {
                let Some(ctx) = self.context.crystal(c.crystal_id) else {
                    continue;
                };
                let crystal = Arc::clone(&ctx.crystal);
                let axis_dist = ctx.axis;

                self.active_ray_num = (c.population * self.total_ray_num as f64) as usize;
                if self.active_ray_num == 0 {
                    continue;
                }
                self.buffer.ensure(self.active_ray_num * BUFFER_FACTOR);
                self.init_entry_rays(&crystal, &axis_dist);
                self.enter_ray_offset += self.active_ray_num;
                self.trace_rays(&crystal, n_ice, pass_idx, ci, total_passes, &mut report);
            }

            if pass_idx + 1 < total_passes {
                let probability = self.context.scatter_passes[pass_idx].probability;
                self.restore_result_rays(probability);
            }
            self.enter_ray_offset = 0;
        }

        if let Some(last) = self.exit_segments.last() {
            self.final_segments.extend_from_slice(last);
        }
    }

    /// Read-only view of the final ray segments of the last run.
    pub fn final_ray_segments(&self) -> &[RaySegHandle] {
        &self.final_segments
    }

    /// Exit segments collected per scatter pass during the last run.
    pub fn exit_ray_segments(&self) -> &[Vec<RaySegHandle>] {
        &self.exit_segments
    }

    /// Root bookkeeping record of a segment's ray tree.
    pub fn ray_info(&self, segment: RaySegHandle) -> Option<&RayInfo> {
        let root = self.pool.try_get(segment)?.root?;
        self.ray_infos.get(root)
    }

    /// Weight discarded because the recursion limit was reached with rays
    /// still alive.
    pub fn discarded_weight(&self) -> f64 {
        self.discarded_weight
    }

    /// Final outgoing directions rotated back into the world frame, with
    /// their packet weights.
    pub fn final_directions(&self) -> Vec<(Vec3, f64)> {
        self.final_segments
            .iter()
            .filter_map(|&h| {
                let seg = self.pool.try_get(h)?;
                let info = self.ray_infos.get(seg.root?)?;
                Some((rotation::rotate_z_back(&info.main_axis, seg.dir), seg.w))
            })
            .collect()
    }

    /// The `(pt, dir, w)` chain of one ray from entry to the given segment.
    pub fn ray_path(&self, segment: RaySegHandle) -> Vec<(Vec3, Vec3, f64)> {
        let mut path = Vec::new();
        let mut current = Some(segment);
        while let Some(handle) = current {
            let Some(seg) = self.pool.try_get(handle) else {
                break;
            };
            path.push((seg.pt, seg.dir, seg.w));
            current = seg.prev;
        }
        path.reverse();
        path
    }

    /// All final ray paths; the debug companion of
    /// [`Simulator::final_directions`].
    pub fn collect_ray_paths(&self) -> Vec<Vec<(Vec3, Vec3, f64)>> {
        self.final_segments
            .iter()
            .map(|&h| self.ray_path(h))
            .collect()
    }

    fn next_stream(&mut self) -> u64 {
        let stream = self.rng_stream;
        self.rng_stream += 1;
        stream
    }

    /// Seeds `total_ray_num` sun rays uniformly inside the solar cap, in
    /// the world frame.
    fn init_sun_rays(&mut self) {
        let total = self.total_ray_num;
        self.enter_rays.ensure(total);
        let sun_ray_dir = self.context.sun.ray_direction();
        let half_angle = (self.context.sun.diameter_deg / 2.0).to_radians();
        let stripe = stripe_len(total);
        let stream = self.next_stream();
        let master = self.master_seed;

        self.enter_rays.dir[..total]
            .par_chunks_mut(stripe)
            .enumerate()
            .for_each(|(stripe_idx, chunk)| {
                let mut rng = sampler::stripe_rng(master, stripe_idx as u64, stream);
                for d in chunk {
                    *d = sampler::uniform_cap_dir(&mut rng, sun_ray_dir, half_angle);
                }
            });
        for prev in &mut self.enter_rays.prev[..total] {
            *prev = None;
        }
    }

    /// Fills buffer 0 with entry rays for one crystal population: sampled
    /// axis rotation, crystal-frame direction, entry face and entry point.
    fn init_entry_rays(&mut self, crystal: &Crystal, axis_dist: &AxisDistribution) {
        let active = self.active_ray_num;
        let offset = self.enter_ray_offset;
        let stripe = stripe_len(active);
        let stream = self.next_stream();
        let master = self.master_seed;
        let total_faces = crystal.total_faces();

        let mut axes = vec![AxisRotation::new(0., 0., 0.); active];
        {
            let [pt0, _] = &mut self.buffer.pt;
            let [dir0, _] = &mut self.buffer.dir;
            let [w0, _] = &mut self.buffer.w;
            let [face0, _] = &mut self.buffer.face_id;
            let enter_dir = &self.enter_rays.dir;
            let enter_prev = &self.enter_rays.prev;
            let pool = &self.pool;

            pt0[..active * 3]
                .par_chunks_mut(stripe * 3)
                .zip(dir0[..active * 3].par_chunks_mut(stripe * 3))
                .zip(w0[..active].par_chunks_mut(stripe))
                .zip(face0[..active].par_chunks_mut(stripe))
                .zip(axes.par_chunks_mut(stripe))
                .enumerate()
                .for_each(|(stripe_idx, ((((pt_c, dir_c), w_c), face_c), axes_c))| {
                    let mut rng = sampler::stripe_rng(master, stripe_idx as u64, stream);
                    let mut prob = vec![0.0; total_faces];
                    for k in 0..axes_c.len() {
                        let ray_idx = stripe_idx * stripe + k;
                        let axis = sample_axis(&mut rng, axis_dist);
                        let dir = rotation::rotate_z(&axis, enter_dir[offset + ray_idx]);

                        for (face, p) in prob.iter_mut().enumerate() {
                            let normal = crystal.normal(face);
                            let area = crystal.area(face);
                            *p = if area > 0.0 && normal.length() > 0.5 {
                                (-normal.dot(dir) * area).max(0.0)
                            } else {
                                0.0
                            };
                        }

                        match sampler::sample_discrete(&mut rng, &prob) {
                            Some(face) => {
                                let (v0, v1, v2) = crystal.triangle(face);
                                let pt = sampler::uniform_triangle_point(&mut rng, v0, v1, v2);
                                let w = enter_prev[offset + ray_idx]
                                    .map(|h| pool.get(h).w)
                                    .unwrap_or(1.0);
                                SimulationBuffer::write_vec3(pt_c, k, pt);
                                SimulationBuffer::write_vec3(dir_c, k, dir);
                                w_c[k] = w;
                                face_c[k] = face as i32;
                            }
                            None => {
                                // No face catches this direction; dead ray.
                                SimulationBuffer::write_vec3(pt_c, k, Vec3::zero());
                                SimulationBuffer::write_vec3(dir_c, k, dir);
                                w_c[k] = 0.0;
                                face_c[k] = 0;
                            }
                        }
                        axes_c[k] = axis;
                    }
                });
        }

        // Segment acquisition stays single-threaded so pool order is
        // deterministic.
        for i in 0..active {
            let pt = SimulationBuffer::read_vec3(&self.buffer.pt[0], i);
            let dir = SimulationBuffer::read_vec3(&self.buffer.dir[0], i);
            let w = self.buffer.w[0][i];
            let face = self.buffer.face_id[0][i];
            let prev = self.enter_rays.prev[offset + i];

            let handle = self.pool.acquire(pt, dir, w, face);
            self.ray_infos.push(RayInfo {
                main_axis: axes[i],
                prev_ray_segment: prev,
                first_ray_segment: handle,
            });
            self.pool.get_mut(handle).root = Some(self.ray_infos.len() - 1);
            self.buffer.ray_seg[0][i] = Some(handle);
        }
    }

    /// The recursive trace loop for one crystal population.
    fn trace_rays<F>(
        &mut self,
        crystal: &Crystal,
        n_ice: f64,
        pass_idx: usize,
        crystal_idx: usize,
        total_passes: usize,
        report: &mut F,
    ) where
        F: FnMut(&TraceProgress),
    {
        self.pass_filters[pass_idx][crystal_idx].apply_symmetry(crystal);

        let max_recursion = self.context.max_recursion;
        for step in 0..max_recursion {
            if self.active_ray_num == 0 {
                break;
            }
            let active = self.active_ray_num;
            if self.buffer.capacity() < active * 2 {
                self.buffer.ensure(active * BUFFER_FACTOR);
            }
            let stripe = stripe_len(active);

            {
                let [pt0, pt1] = &mut self.buffer.pt;
                let [dir0, dir1] = &mut self.buffer.dir;
                let [w0, w1] = &mut self.buffer.w;
                let [face0, face1] = &mut self.buffer.face_id;

                dir0[..active * 3]
                    .par_chunks(stripe * 3)
                    .zip(face0[..active].par_chunks(stripe))
                    .zip(w0[..active].par_chunks(stripe))
                    .zip(pt0[..active * 3].par_chunks(stripe * 3))
                    .zip(dir1[..active * 6].par_chunks_mut(stripe * 6))
                    .zip(w1[..active * 2].par_chunks_mut(stripe * 2))
                    .zip(pt1[..active * 6].par_chunks_mut(stripe * 6))
                    .zip(face1[..active * 2].par_chunks_mut(stripe * 2))
                    .for_each(
                        |(
                            ((((((dir_c, face_c), w_c), pt_c), dir1_c), w1_c), pt1_c),
                            face1_c,
                        )| {
                            let num = w_c.len();
                            optics::hit_surface(
                                crystal, n_ice, num, dir_c, face_c, w_c, dir1_c, w1_c,
                            );
                            optics::propagate(
                                crystal,
                                num * 2,
                                pt_c,
                                dir1_c,
                                w1_c,
                                face_c,
                                pt1_c,
                                face1_c,
                            );
                        },
                    );
            }

            self.store_ray_segments(crystal, pass_idx, crystal_idx);
            self.refresh_buffer();

            report(&TraceProgress {
                pass: pass_idx,
                total_passes,
                step,
                max_steps: max_recursion,
                alive_rays: self.active_ray_num,
            });
        }

        // Rays still alive at the recursion limit are discarded; their
        // weight is small by construction but tracked for accounting.
        for i in 0..self.active_ray_num {
            self.discarded_weight += self.buffer.w[0][i];
        }
        self.active_ray_num = 0;
    }

    /// Turns the child slots of buffer 1 into pool segments, links them to
    /// their parents and collects exit candidates. Single-threaded so that
    /// segment acquisition order is deterministic.
    fn store_ray_segments(&mut self, crystal: &Crystal, pass_idx: usize, crystal_idx: usize) {
        let active = self.active_ray_num;
        let prop_min_w = self.context.prop_min_w;

        for i in 0..active * 2 {
            let w = self.buffer.w[1][i];
            if w <= 0.0 {
                // Refracted child under total internal reflection.
                self.buffer.ray_seg[1][i] = None;
                continue;
            }
            let Some(parent_handle) = self.buffer.ray_seg[0][i / 2] else {
                self.buffer.ray_seg[1][i] = None;
                continue;
            };

            let pt = SimulationBuffer::read_vec3(&self.buffer.pt[0], i / 2);
            let dir = SimulationBuffer::read_vec3(&self.buffer.dir[1], i);
            let face = self.buffer.face_id[0][i / 2];
            let finished = self.buffer.face_id[1][i] < 0;

            let handle = self.pool.acquire(pt, dir, w, face);
            let root = self.pool.get(parent_handle).root;
            {
                let seg = self.pool.get_mut(handle);
                seg.is_finished = finished;
                seg.prev = Some(parent_handle);
                seg.root = root;
            }
            {
                let parent = self.pool.get_mut(parent_handle);
                if i % 2 == 0 {
                    parent.next_reflect = Some(handle);
                } else {
                    parent.next_refract = Some(handle);
                }
            }
            self.buffer.ray_seg[1][i] = Some(handle);

            let filter = &self.pass_filters[pass_idx][crystal_idx];
            if !filter.filter(&self.pool, crystal, handle) {
                continue;
            }
            if (finished || w < prop_min_w)
                && let Some(exit) = self.exit_segments.last_mut()
            {
                exit.push(handle);
            }
        }
    }

    /// Compacts buffer 1 into buffer 0, keeping only live slots.
    fn refresh_buffer(&mut self) {
        let active = self.active_ray_num;
        let prop_min_w = self.context.prop_min_w;
        let [pt0, pt1] = &mut self.buffer.pt;
        let [dir0, dir1] = &mut self.buffer.dir;
        let [w0, w1] = &mut self.buffer.w;
        let [face0, face1] = &mut self.buffer.face_id;
        let [seg0, seg1] = &mut self.buffer.ray_seg;

        let mut idx = 0;
        for i in 0..active * 2 {
            if face1[i] >= 0 && w1[i] > prop_min_w {
                pt0[idx * 3..idx * 3 + 3].copy_from_slice(&pt1[i * 3..i * 3 + 3]);
                dir0[idx * 3..idx * 3 + 3].copy_from_slice(&dir1[i * 3..i * 3 + 3]);
                w0[idx] = w1[i];
                face0[idx] = face1[i];
                seg0[idx] = seg1[i];
                idx += 1;
            }
        }
        self.active_ray_num = idx;
    }

    /// Routes the finished rays of the pass that just ended: each survivor
    /// either leaves the simulation as a final ray or re-enters the next
    /// pass, with probability `probability`. Re-entering rays are shuffled.
    fn restore_result_rays(&mut self, probability: f64) {
        let exit_len = self.exit_segments.last().map_or(0, |e| e.len());
        self.buffer.ensure(exit_len * 2);
        self.enter_rays.ensure(exit_len);

        let stream = self.next_stream();
        let mut rng = sampler::stripe_rng(self.master_seed, 0, stream);
        let scat_min_w = self.context.scat_min_w;

        let mut idx = 0;
        if let Some(exit) = self.exit_segments.last() {
            for &handle in exit {
                let seg = self.pool.get(handle);
                if !seg.is_finished || seg.w < scat_min_w {
                    continue;
                }
                if rng.gen_range(0.0..1.0) > probability {
                    self.final_segments.push(handle);
                    continue;
                }
                let Some(info) = seg.root.and_then(|r| self.ray_infos.get(r)) else {
                    continue;
                };
                self.enter_rays.dir[idx] = rotation::rotate_z_back(&info.main_axis, seg.dir);
                self.enter_rays.prev[idx] = Some(handle);
                idx += 1;
            }
        }
        self.total_ray_num = idx;

        // Fisher-Yates pass so crystal populations of the next pass see an
        // unbiased slice of the re-entering rays.
        for i in 0..idx {
            let j = i + rng.gen_range(0..(idx - i));
            self.enter_rays.dir.swap(i, j);
            self.enter_rays.prev.swap(i, j);
        }
    }
}

/// Worker stripe length for `active` rays.
fn stripe_len(active: usize) -> usize {
    (active / 100).max(10)
}

fn sample_axis(rng: &mut StdRng, dist: &AxisDistribution) -> AxisRotation {
    let (lon, lat) = match dist.zenith_dist {
        DistributionKind::Uniform => {
            let d = sampler::uniform_sphere_dir(rng);
            (d.y.atan2(d.x), d.z.asin())
        }
        DistributionKind::Gauss => {
            let lat = sampler::gaussian_zenith_latitude(
                rng,
                dist.zenith_mean_deg.to_radians(),
                dist.zenith_std_deg.to_radians(),
            );
            (rng.gen_range(0.0..TAU), lat)
        }
    };
    let roll = match dist.roll_dist {
        DistributionKind::Uniform => rng.gen_range(0.0..TAU),
        DistributionKind::Gauss => sampler::gaussian_roll(
            rng,
            dist.roll_mean_deg.to_radians(),
            dist.roll_std_deg.to_radians(),
        ),
    };
    AxisRotation::new(lon, lat, roll)
}
