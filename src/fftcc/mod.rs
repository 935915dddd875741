//! FFT-accelerated cross correlation (FFT-CC): integer-pixel displacement
//! search in the spectral domain.
//!
//! Per POI, the reference and target neighbourhoods are zero-meaned,
//! forward transformed, conjugate-multiplied, and inverse transformed;
//! the argmax of the resulting correlation surface decodes to the
//! integer displacement that best aligns the two windows. The estimate
//! usually seeds the ICGN refiner, but chaining is the caller's choice.
//!
//! FFT windows are 2r on each side (even, transform-friendly), unlike
//! the (2r+1)-sized centred subsets used by ICGN.
//!
//! Sampling is unchecked: the caller must keep every POI far enough from
//! the borders that the window plus the initial guess stays inside both
//! images.

mod scratch;

use std::sync::Mutex;

use log::{debug, info};
use rayon::prelude::*;
use rustfft::FftPlanner;

use crate::error::{Result, SubsetMatchingError};
use crate::geometry::{Point2D, Point3D};
use crate::image::{Image2D, Image3D};
use crate::poi::{Poi2D, Poi3D};
use scratch::{FftScratch2D, FftScratch3D};

/// Linear interpolation of the first index where a correlation profile
/// drops through `ratio`, scanning from `start` by `step`.
fn half_peak_crossing(ratio: f32, start: i32, limit: i32, step: i32, get: impl Fn(i32) -> f32) -> f32 {
    for i in 0..limit.max(0) {
        let x1 = start + step * i;
        let x2 = x1 + step;
        let g1 = get(x1);
        let g2 = get(x2);
        if g1 > ratio && g2 <= ratio {
            return x2 as f32 - (x2 - x1) as f32 * (ratio - g2) / (g1 - g2);
        }
    }
    0.0
}

pub struct Fftcc2D<'a> {
    radius_x: usize,
    radius_y: usize,
    pool: rayon::ThreadPool,
    scratch: Vec<Mutex<FftScratch2D>>,
    ref_img: Option<&'a Image2D>,
    tar_img: Option<&'a Image2D>,
}

impl<'a> Fftcc2D<'a> {
    pub fn new(radius_x: usize, radius_y: usize, thread_number: usize) -> Result<Self> {
        if radius_x < 2 || radius_y < 2 {
            return Err(SubsetMatchingError::InvalidParameter(
                "subset radii must be at least 2".into(),
            ));
        }
        if thread_number == 0 {
            return Err(SubsetMatchingError::InvalidParameter(
                "thread_number must be at least 1".into(),
            ));
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(thread_number)
            .build()
            .map_err(|e| SubsetMatchingError::ThreadPoolBuild(e.to_string()))?;

        // The planner is only touched here, on the constructing thread.
        let mut planner = FftPlanner::new();
        let scratch = (0..thread_number)
            .map(|_| Mutex::new(FftScratch2D::new(&mut planner, radius_x, radius_y)))
            .collect();

        info!(
            "FFT-CC 2D estimator ready: {}x{} window, {} worker(s)",
            2 * radius_x,
            2 * radius_y,
            thread_number
        );

        Ok(Self {
            radius_x,
            radius_y,
            pool,
            scratch,
            ref_img: None,
            tar_img: None,
        })
    }

    /// Attach the reference/target pair for subsequent compute calls.
    pub fn set_images(&mut self, ref_img: &'a Image2D, tar_img: &'a Image2D) {
        self.ref_img = Some(ref_img);
        self.tar_img = Some(tar_img);
    }

    fn images(&self) -> Result<(&'a Image2D, &'a Image2D)> {
        match (self.ref_img, self.tar_img) {
            (Some(r), Some(t)) => Ok((r, t)),
            _ => Err(SubsetMatchingError::ImagesNotSet),
        }
    }

    fn scratch_slot(&self) -> Result<&Mutex<FftScratch2D>> {
        let tid = rayon::current_thread_index().unwrap_or(0);
        self.scratch
            .get(tid)
            .ok_or(SubsetMatchingError::ThreadIdOverLimit {
                tid,
                pool_size: self.scratch.len(),
            })
    }

    /// Estimate the integer-pixel displacement of one POI, starting from
    /// the (u, v) already stored in its deformation record.
    pub fn compute(&self, poi: &mut Poi2D) -> Result<()> {
        let (ref_img, tar_img) = self.images()?;
        let mut guard = self
            .scratch_slot()?
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let inst = &mut *guard;

        let width = inst.width();
        let height = inst.height();
        let size = (width * height) as f32;
        let u0 = poi.deformation.u;
        let v0 = poi.deformation.v;

        // Fill both windows; the target one is shifted by the initial guess.
        let mut ref_mean = 0.0;
        let mut tar_mean = 0.0;
        for r in 0..height {
            for c in 0..width {
                let ref_x = poi.x + c as i32 - self.radius_x as i32;
                let ref_y = poi.y + r as i32 - self.radius_y as i32;
                let rv = ref_img.value(ref_y as usize, ref_x as usize);
                let tv = tar_img.value(
                    (ref_y as f32 + v0) as usize,
                    (ref_x as f32 + u0) as usize,
                );
                let i = r * width + c;
                inst.ref_spec[i].re = rv;
                inst.ref_spec[i].im = 0.0;
                inst.tar_spec[i].re = tv;
                inst.tar_spec[i].im = 0.0;
                ref_mean += rv;
                tar_mean += tv;
            }
        }
        ref_mean /= size;
        tar_mean /= size;

        let mut ref_norm = 0.0;
        let mut tar_norm = 0.0;
        for i in 0..width * height {
            inst.ref_spec[i].re -= ref_mean;
            inst.tar_spec[i].re -= tar_mean;
            ref_norm += inst.ref_spec[i].re * inst.ref_spec[i].re;
            tar_norm += inst.tar_spec[i].re * inst.tar_spec[i].re;
        }

        inst.forward_ref();
        inst.forward_tar();

        for i in 0..width * height {
            inst.cross[i] = inst.ref_spec[i].conj() * inst.tar_spec[i];
        }

        inst.inverse_cross();

        let mut peak = f32::NEG_INFINITY;
        let mut peak_index = 0;
        for (i, c) in inst.cross.iter().enumerate() {
            if c.re > peak {
                peak = c.re;
                peak_index = i;
            }
        }

        let mut du = (peak_index % width) as i32;
        let mut dv = (peak_index / width) as i32;
        if du > self.radius_x as i32 {
            du -= width as i32;
        }
        if dv > self.radius_y as i32 {
            dv -= height as i32;
        }

        poi.deformation.u = du as f32 + u0;
        poi.deformation.v = dv as f32 + v0;
        poi.result.u0 = u0;
        poi.result.v0 = v0;
        // The inverse transform carries a factor of the window size.
        poi.result.zncc = peak / size / (ref_norm * tar_norm).sqrt();
        Ok(())
    }

    /// Batch form: one parallel task per POI, results written in place.
    pub fn compute_batch(&self, pois: &mut [Poi2D]) -> Result<()> {
        self.pool
            .install(|| pois.par_iter_mut().try_for_each(|poi| self.compute(poi)))?;
        debug!("FFT-CC processed {} POI(s)", pois.len());
        Ok(())
    }

    /// Speckle-size diagnostic: full width of the autocorrelation peak at
    /// `half_peak_ratio`, per axis. Used to pick subset radii, not inside
    /// the correlation loop.
    pub fn speckle_size(&self, poi: &Poi2D, half_peak_ratio: f32) -> Result<Point2D> {
        let (ref_img, _) = self.images()?;
        let mut guard = self
            .scratch_slot()?
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let inst = &mut *guard;

        let width = inst.width();
        let height = inst.height();
        let size = (width * height) as f32;

        let mut ref_mean = 0.0;
        for r in 0..height {
            for c in 0..width {
                let x = poi.x + c as i32 - self.radius_x as i32;
                let y = poi.y + r as i32 - self.radius_y as i32;
                let v = ref_img.value(y as usize, x as usize);
                inst.ref_spec[r * width + c].re = v;
                inst.ref_spec[r * width + c].im = 0.0;
                ref_mean += v;
            }
        }
        ref_mean /= size;

        let mut ref_norm = 0.0;
        for i in 0..width * height {
            inst.ref_spec[i].re -= ref_mean;
            ref_norm += inst.ref_spec[i].re * inst.ref_spec[i].re;
        }

        // Autocorrelation: correlate the window against itself.
        inst.forward_ref();
        for i in 0..width * height {
            let s = inst.ref_spec[i];
            inst.cross[i] = s.conj() * s;
        }
        inst.inverse_cross();

        // Normalise to a unit peak and shift it to the window centre.
        let x0 = self.radius_x as i32 - 1;
        let y0 = self.radius_y as i32 - 1;
        let mut centered = vec![0.0f32; width * height];
        for i in 0..width * height {
            let mut shift_c = (i % width) as i32;
            let mut shift_r = (i / width) as i32;
            if shift_c > self.radius_x as i32 {
                shift_c -= width as i32;
            }
            if shift_r > self.radius_y as i32 {
                shift_r -= height as i32;
            }
            shift_c += x0;
            shift_r += y0;
            centered[(shift_r * width as i32 + shift_c) as usize] =
                inst.cross[i].re / size / ref_norm;
        }

        let row = |x: i32| centered[(y0 * width as i32 + x) as usize];
        let col = |y: i32| centered[(y * width as i32 + x0) as usize];

        // Scans stop one short of the window edge so the lookahead index
        // stays inside the centred grid.
        let rx1 = half_peak_crossing(half_peak_ratio, x0, x0 - 1, 1, row);
        let rx2 = half_peak_crossing(half_peak_ratio, x0, x0 - 1, -1, row);
        let ry1 = half_peak_crossing(half_peak_ratio, y0, y0 - 1, 1, col);
        let ry2 = half_peak_crossing(half_peak_ratio, y0, y0 - 1, -1, col);

        Ok(Point2D::new(rx1 - rx2, ry1 - ry2))
    }
}

pub struct Fftcc3D<'a> {
    radius_x: usize,
    radius_y: usize,
    radius_z: usize,
    pool: rayon::ThreadPool,
    scratch: Vec<Mutex<FftScratch3D>>,
    ref_vol: Option<&'a Image3D>,
    tar_vol: Option<&'a Image3D>,
}

impl<'a> Fftcc3D<'a> {
    pub fn new(
        radius_x: usize,
        radius_y: usize,
        radius_z: usize,
        thread_number: usize,
    ) -> Result<Self> {
        if radius_x < 2 || radius_y < 2 || radius_z < 2 {
            return Err(SubsetMatchingError::InvalidParameter(
                "subset radii must be at least 2".into(),
            ));
        }
        if thread_number == 0 {
            return Err(SubsetMatchingError::InvalidParameter(
                "thread_number must be at least 1".into(),
            ));
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(thread_number)
            .build()
            .map_err(|e| SubsetMatchingError::ThreadPoolBuild(e.to_string()))?;

        let mut planner = FftPlanner::new();
        let scratch = (0..thread_number)
            .map(|_| Mutex::new(FftScratch3D::new(&mut planner, radius_x, radius_y, radius_z)))
            .collect();

        info!(
            "FFT-CC 3D estimator ready: {}x{}x{} window, {} worker(s)",
            2 * radius_x,
            2 * radius_y,
            2 * radius_z,
            thread_number
        );

        Ok(Self {
            radius_x,
            radius_y,
            radius_z,
            pool,
            scratch,
            ref_vol: None,
            tar_vol: None,
        })
    }

    pub fn set_images(&mut self, ref_vol: &'a Image3D, tar_vol: &'a Image3D) {
        self.ref_vol = Some(ref_vol);
        self.tar_vol = Some(tar_vol);
    }

    fn volumes(&self) -> Result<(&'a Image3D, &'a Image3D)> {
        match (self.ref_vol, self.tar_vol) {
            (Some(r), Some(t)) => Ok((r, t)),
            _ => Err(SubsetMatchingError::ImagesNotSet),
        }
    }

    fn scratch_slot(&self) -> Result<&Mutex<FftScratch3D>> {
        let tid = rayon::current_thread_index().unwrap_or(0);
        self.scratch
            .get(tid)
            .ok_or(SubsetMatchingError::ThreadIdOverLimit {
                tid,
                pool_size: self.scratch.len(),
            })
    }

    pub fn compute(&self, poi: &mut Poi3D) -> Result<()> {
        let (ref_vol, tar_vol) = self.volumes()?;
        let mut guard = self
            .scratch_slot()?
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let inst = &mut *guard;

        let dim_x = inst.dim_x();
        let dim_y = inst.dim_y();
        let dim_z = inst.dim_z();
        let size = (dim_x * dim_y * dim_z) as f32;
        let u0 = poi.deformation.u;
        let v0 = poi.deformation.v;
        let w0 = poi.deformation.w;

        let mut ref_mean = 0.0;
        let mut tar_mean = 0.0;
        for s in 0..dim_z {
            for r in 0..dim_y {
                for c in 0..dim_x {
                    let ref_x = poi.x + c as i32 - self.radius_x as i32;
                    let ref_y = poi.y + r as i32 - self.radius_y as i32;
                    let ref_z = poi.z + s as i32 - self.radius_z as i32;
                    let rv = ref_vol.value(ref_z as usize, ref_y as usize, ref_x as usize);
                    let tv = tar_vol.value(
                        (ref_z as f32 + w0) as usize,
                        (ref_y as f32 + v0) as usize,
                        (ref_x as f32 + u0) as usize,
                    );
                    let i = (s * dim_y + r) * dim_x + c;
                    inst.ref_spec[i].re = rv;
                    inst.ref_spec[i].im = 0.0;
                    inst.tar_spec[i].re = tv;
                    inst.tar_spec[i].im = 0.0;
                    ref_mean += rv;
                    tar_mean += tv;
                }
            }
        }
        ref_mean /= size;
        tar_mean /= size;

        let mut ref_norm = 0.0;
        let mut tar_norm = 0.0;
        for i in 0..dim_x * dim_y * dim_z {
            inst.ref_spec[i].re -= ref_mean;
            inst.tar_spec[i].re -= tar_mean;
            ref_norm += inst.ref_spec[i].re * inst.ref_spec[i].re;
            tar_norm += inst.tar_spec[i].re * inst.tar_spec[i].re;
        }

        inst.forward_ref();
        inst.forward_tar();

        for i in 0..dim_x * dim_y * dim_z {
            inst.cross[i] = inst.ref_spec[i].conj() * inst.tar_spec[i];
        }

        inst.inverse_cross();

        let mut peak = f32::NEG_INFINITY;
        let mut peak_index = 0;
        for (i, c) in inst.cross.iter().enumerate() {
            if c.re > peak {
                peak = c.re;
                peak_index = i;
            }
        }

        let mut du = (peak_index % dim_x) as i32;
        let mut dv = ((peak_index / dim_x) % dim_y) as i32;
        let mut dw = (peak_index / (dim_x * dim_y)) as i32;
        if du > self.radius_x as i32 {
            du -= dim_x as i32;
        }
        if dv > self.radius_y as i32 {
            dv -= dim_y as i32;
        }
        if dw > self.radius_z as i32 {
            dw -= dim_z as i32;
        }

        poi.deformation.u = du as f32 + u0;
        poi.deformation.v = dv as f32 + v0;
        poi.deformation.w = dw as f32 + w0;
        poi.result.u0 = u0;
        poi.result.v0 = v0;
        poi.result.w0 = w0;
        poi.result.zncc = peak / size / (ref_norm * tar_norm).sqrt();
        Ok(())
    }

    pub fn compute_batch(&self, pois: &mut [Poi3D]) -> Result<()> {
        self.pool
            .install(|| pois.par_iter_mut().try_for_each(|poi| self.compute(poi)))?;
        debug!("FFT-CC processed {} POI(s)", pois.len());
        Ok(())
    }

    /// Speckle-size diagnostic along the three axes of the volume.
    pub fn speckle_size(&self, poi: &Poi3D, half_peak_ratio: f32) -> Result<Point3D> {
        let (ref_vol, _) = self.volumes()?;
        let mut guard = self
            .scratch_slot()?
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let inst = &mut *guard;

        let dim_x = inst.dim_x();
        let dim_y = inst.dim_y();
        let dim_z = inst.dim_z();
        let size = (dim_x * dim_y * dim_z) as f32;

        let mut ref_mean = 0.0;
        for s in 0..dim_z {
            for r in 0..dim_y {
                for c in 0..dim_x {
                    let x = poi.x + c as i32 - self.radius_x as i32;
                    let y = poi.y + r as i32 - self.radius_y as i32;
                    let z = poi.z + s as i32 - self.radius_z as i32;
                    let v = ref_vol.value(z as usize, y as usize, x as usize);
                    let i = (s * dim_y + r) * dim_x + c;
                    inst.ref_spec[i].re = v;
                    inst.ref_spec[i].im = 0.0;
                    ref_mean += v;
                }
            }
        }
        ref_mean /= size;

        let mut ref_norm = 0.0;
        for i in 0..dim_x * dim_y * dim_z {
            inst.ref_spec[i].re -= ref_mean;
            ref_norm += inst.ref_spec[i].re * inst.ref_spec[i].re;
        }

        inst.forward_ref();
        for i in 0..dim_x * dim_y * dim_z {
            let s = inst.ref_spec[i];
            inst.cross[i] = s.conj() * s;
        }
        inst.inverse_cross();

        let x0 = self.radius_x as i32 - 1;
        let y0 = self.radius_y as i32 - 1;
        let z0 = self.radius_z as i32 - 1;
        let mut centered = vec![0.0f32; dim_x * dim_y * dim_z];
        for i in 0..dim_x * dim_y * dim_z {
            let mut shift_x = (i % dim_x) as i32;
            let mut shift_y = ((i / dim_x) % dim_y) as i32;
            let mut shift_z = (i / (dim_x * dim_y)) as i32;
            if shift_x > self.radius_x as i32 {
                shift_x -= dim_x as i32;
            }
            if shift_y > self.radius_y as i32 {
                shift_y -= dim_y as i32;
            }
            if shift_z > self.radius_z as i32 {
                shift_z -= dim_z as i32;
            }
            shift_x += x0;
            shift_y += y0;
            shift_z += z0;
            let j = ((shift_z * dim_y as i32 + shift_y) * dim_x as i32 + shift_x) as usize;
            centered[j] = inst.cross[i].re / size / ref_norm;
        }

        let at = |z: i32, y: i32, x: i32| {
            centered[((z * dim_y as i32 + y) * dim_x as i32 + x) as usize]
        };

        let rx1 = half_peak_crossing(half_peak_ratio, x0, x0 - 1, 1, |x| at(z0, y0, x));
        let rx2 = half_peak_crossing(half_peak_ratio, x0, x0 - 1, -1, |x| at(z0, y0, x));
        let ry1 = half_peak_crossing(half_peak_ratio, y0, y0 - 1, 1, |y| at(z0, y, x0));
        let ry2 = half_peak_crossing(half_peak_ratio, y0, y0 - 1, -1, |y| at(z0, y, x0));
        let rz1 = half_peak_crossing(half_peak_ratio, z0, z0 - 1, 1, |z| at(z, y0, x0));
        let rz2 = half_peak_crossing(half_peak_ratio, z0, z0 - 1, -1, |z| at(z, y0, x0));

        Ok(Point3D::new(rx1 - rx2, ry1 - ry2, rz1 - rz2))
    }
}
