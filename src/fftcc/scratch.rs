//! Per-worker FFT scratch: pre-planned transforms plus spectra buffers.
//!
//! rustfft transforms are complex-to-complex and one-dimensional, so 2D
//! and 3D transforms are applied separably: rows in place, then each
//! remaining axis through a transpose round-trip. Plans are created once
//! by the estimator constructor (the planner is used from a single thread
//! there) and shared across scratch instances; buffers are per instance
//! so workers never contend.

use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

/// Transpose `src` (rows x cols) into `dst` (cols x rows).
fn transpose(src: &[Complex<f32>], dst: &mut [Complex<f32>], rows: usize, cols: usize) {
    for r in 0..rows {
        for c in 0..cols {
            dst[c * rows + r] = src[r * cols + c];
        }
    }
}

fn scratch_len(plans: &[&Arc<dyn Fft<f32>>]) -> usize {
    plans
        .iter()
        .map(|p| p.get_inplace_scratch_len())
        .max()
        .unwrap_or(0)
}

pub(crate) struct FftScratch2D {
    width: usize,
    height: usize,
    fft_x: Arc<dyn Fft<f32>>,
    fft_y: Arc<dyn Fft<f32>>,
    ifft_x: Arc<dyn Fft<f32>>,
    ifft_y: Arc<dyn Fft<f32>>,
    pub ref_spec: Vec<Complex<f32>>,
    pub tar_spec: Vec<Complex<f32>>,
    pub cross: Vec<Complex<f32>>,
    transpose_buf: Vec<Complex<f32>>,
    fft_work: Vec<Complex<f32>>,
}

impl FftScratch2D {
    pub fn new(planner: &mut FftPlanner<f32>, radius_x: usize, radius_y: usize) -> Self {
        let width = 2 * radius_x;
        let height = 2 * radius_y;
        let size = width * height;
        let fft_x = planner.plan_fft_forward(width);
        let fft_y = planner.plan_fft_forward(height);
        let ifft_x = planner.plan_fft_inverse(width);
        let ifft_y = planner.plan_fft_inverse(height);
        let work = scratch_len(&[&fft_x, &fft_y, &ifft_x, &ifft_y]);

        Self {
            width,
            height,
            fft_x,
            fft_y,
            ifft_x,
            ifft_y,
            ref_spec: vec![Complex::new(0.0, 0.0); size],
            tar_spec: vec![Complex::new(0.0, 0.0); size],
            cross: vec![Complex::new(0.0, 0.0); size],
            transpose_buf: vec![Complex::new(0.0, 0.0); size],
            fft_work: vec![Complex::new(0.0, 0.0); work],
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    fn fft_2d(
        buf: &mut [Complex<f32>],
        tmp: &mut [Complex<f32>],
        work: &mut [Complex<f32>],
        width: usize,
        height: usize,
        along_x: &Arc<dyn Fft<f32>>,
        along_y: &Arc<dyn Fft<f32>>,
    ) {
        // Rows are contiguous: one call transforms all of them.
        along_x.process_with_scratch(buf, work);
        transpose(buf, tmp, height, width);
        along_y.process_with_scratch(tmp, work);
        transpose(tmp, buf, width, height);
    }

    pub fn forward_ref(&mut self) {
        Self::fft_2d(
            &mut self.ref_spec,
            &mut self.transpose_buf,
            &mut self.fft_work,
            self.width,
            self.height,
            &self.fft_x,
            &self.fft_y,
        );
    }

    pub fn forward_tar(&mut self) {
        Self::fft_2d(
            &mut self.tar_spec,
            &mut self.transpose_buf,
            &mut self.fft_work,
            self.width,
            self.height,
            &self.fft_x,
            &self.fft_y,
        );
    }

    /// Inverse-transform the cross spectrum in place. The result is the
    /// unnormalised correlation surface; callers divide by `width * height`.
    pub fn inverse_cross(&mut self) {
        Self::fft_2d(
            &mut self.cross,
            &mut self.transpose_buf,
            &mut self.fft_work,
            self.width,
            self.height,
            &self.ifft_x,
            &self.ifft_y,
        );
    }
}

pub(crate) struct FftScratch3D {
    dim_x: usize,
    dim_y: usize,
    dim_z: usize,
    fft_x: Arc<dyn Fft<f32>>,
    fft_y: Arc<dyn Fft<f32>>,
    fft_z: Arc<dyn Fft<f32>>,
    ifft_x: Arc<dyn Fft<f32>>,
    ifft_y: Arc<dyn Fft<f32>>,
    ifft_z: Arc<dyn Fft<f32>>,
    pub ref_spec: Vec<Complex<f32>>,
    pub tar_spec: Vec<Complex<f32>>,
    pub cross: Vec<Complex<f32>>,
    transpose_buf: Vec<Complex<f32>>,
    fft_work: Vec<Complex<f32>>,
}

impl FftScratch3D {
    pub fn new(
        planner: &mut FftPlanner<f32>,
        radius_x: usize,
        radius_y: usize,
        radius_z: usize,
    ) -> Self {
        let dim_x = 2 * radius_x;
        let dim_y = 2 * radius_y;
        let dim_z = 2 * radius_z;
        let size = dim_x * dim_y * dim_z;
        let fft_x = planner.plan_fft_forward(dim_x);
        let fft_y = planner.plan_fft_forward(dim_y);
        let fft_z = planner.plan_fft_forward(dim_z);
        let ifft_x = planner.plan_fft_inverse(dim_x);
        let ifft_y = planner.plan_fft_inverse(dim_y);
        let ifft_z = planner.plan_fft_inverse(dim_z);
        let work = scratch_len(&[&fft_x, &fft_y, &fft_z, &ifft_x, &ifft_y, &ifft_z]);

        Self {
            dim_x,
            dim_y,
            dim_z,
            fft_x,
            fft_y,
            fft_z,
            ifft_x,
            ifft_y,
            ifft_z,
            ref_spec: vec![Complex::new(0.0, 0.0); size],
            tar_spec: vec![Complex::new(0.0, 0.0); size],
            cross: vec![Complex::new(0.0, 0.0); size],
            transpose_buf: vec![Complex::new(0.0, 0.0); size],
            fft_work: vec![Complex::new(0.0, 0.0); work],
        }
    }

    pub fn dim_x(&self) -> usize {
        self.dim_x
    }

    pub fn dim_y(&self) -> usize {
        self.dim_y
    }

    pub fn dim_z(&self) -> usize {
        self.dim_z
    }

    #[allow(clippy::too_many_arguments)]
    fn fft_3d(
        buf: &mut [Complex<f32>],
        tmp: &mut [Complex<f32>],
        work: &mut [Complex<f32>],
        dim_x: usize,
        dim_y: usize,
        dim_z: usize,
        along_x: &Arc<dyn Fft<f32>>,
        along_y: &Arc<dyn Fft<f32>>,
        along_z: &Arc<dyn Fft<f32>>,
    ) {
        // Along x: lines are contiguous through the whole volume.
        along_x.process_with_scratch(buf, work);

        // Along y: transpose each z-slab, transform, transpose back.
        let slab = dim_x * dim_y;
        for z in 0..dim_z {
            let s = &mut buf[z * slab..(z + 1) * slab];
            let t = &mut tmp[..slab];
            transpose(s, t, dim_y, dim_x);
            along_y.process_with_scratch(t, work);
            transpose(t, s, dim_x, dim_y);
        }

        // Along z: the volume viewed as dim_z rows of one slab each.
        transpose(buf, tmp, dim_z, slab);
        along_z.process_with_scratch(tmp, work);
        transpose(tmp, buf, slab, dim_z);
    }

    pub fn forward_ref(&mut self) {
        Self::fft_3d(
            &mut self.ref_spec,
            &mut self.transpose_buf,
            &mut self.fft_work,
            self.dim_x,
            self.dim_y,
            self.dim_z,
            &self.fft_x,
            &self.fft_y,
            &self.fft_z,
        );
    }

    pub fn forward_tar(&mut self) {
        Self::fft_3d(
            &mut self.tar_spec,
            &mut self.transpose_buf,
            &mut self.fft_work,
            self.dim_x,
            self.dim_y,
            self.dim_z,
            &self.fft_x,
            &self.fft_y,
            &self.fft_z,
        );
    }

    pub fn inverse_cross(&mut self) {
        Self::fft_3d(
            &mut self.cross,
            &mut self.transpose_buf,
            &mut self.fft_work,
            self.dim_x,
            self.dim_y,
            self.dim_z,
            &self.ifft_x,
            &self.ifft_y,
            &self.ifft_z,
        );
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn forward_then_inverse_restores_input() {
        let mut planner = FftPlanner::new();
        let mut scratch = FftScratch2D::new(&mut planner, 4, 4);
        let size = scratch.width() * scratch.height();
        for i in 0..size {
            scratch.cross[i] = Complex::new((i % 7) as f32 - 3.0, 0.0);
        }
        let original: Vec<Complex<f32>> = scratch.cross.clone();

        FftScratch2D::fft_2d(
            &mut scratch.cross,
            &mut scratch.transpose_buf,
            &mut scratch.fft_work,
            8,
            8,
            &scratch.fft_x,
            &scratch.fft_y,
        );
        scratch.inverse_cross();

        for (a, b) in scratch.cross.iter().zip(original.iter()) {
            assert_relative_eq!(a.re / size as f32, b.re, epsilon = 1e-3);
        }
    }

    #[test]
    fn dc_bin_is_the_sum() {
        let mut planner = FftPlanner::new();
        let mut scratch = FftScratch2D::new(&mut planner, 2, 2);
        for i in 0..16 {
            scratch.ref_spec[i] = Complex::new(1.0 + i as f32, 0.0);
        }
        let sum: f32 = scratch.ref_spec.iter().map(|c| c.re).sum();
        scratch.forward_ref();
        assert_relative_eq!(scratch.ref_spec[0].re, sum, epsilon = 1e-3);
    }
}
