//! Cubic B-spline reconstruction of the target image/volume.
//!
//! Preparation runs the standard recursive deconvolution (a causal plus
//! anticausal IIR pass, applied separably along every axis) over the whole
//! image once, turning pixel values into B-spline coefficients. Evaluation
//! at a real coordinate is then a 4x4 (or 4x4x4) weighted sum of
//! coefficients with the cubic basis. Evaluation outside the image is
//! undefined; support indices are clamped so stray border lookups stay
//! finite, but callers are expected to clip.

use crate::geometry::{Point2D, Point3D};
use crate::image::{Image2D, Image3D};

/// Pole of the cubic B-spline prefilter, sqrt(3) - 2.
const POLE: f32 = -0.267_949_2;
/// Per-axis gain (1 - z)(1 - 1/z) evaluated at the pole.
const GAIN: f32 = 6.0;

/// Causal + anticausal recursive filter turning samples into coefficients.
fn prefilter_line(line: &mut [f32]) {
    let n = line.len();
    if n < 2 {
        return;
    }

    for v in line.iter_mut() {
        *v *= GAIN;
    }

    // Causal pass; the first coefficient comes from the truncated series
    // with mirrored boundary (|pole|^14 is below f32 resolution).
    let horizon = n.min(14);
    let mut sum = line[0];
    let mut zn = POLE;
    for k in 1..horizon {
        sum += zn * line[k];
        zn *= POLE;
    }
    line[0] = sum;
    for k in 1..n {
        line[k] += POLE * line[k - 1];
    }

    // Anticausal pass.
    line[n - 1] = (POLE / (POLE * POLE - 1.0)) * (line[n - 1] + POLE * line[n - 2]);
    for k in (0..n - 1).rev() {
        line[k] = POLE * (line[k + 1] - line[k]);
    }
}

/// Cubic basis weights for the four coefficients around a sample point,
/// parameterised by the fractional offset t in [0, 1).
#[inline]
fn basis(t: f32) -> [f32; 4] {
    let s = 1.0 - t;
    let t2 = t * t;
    let t3 = t2 * t;
    [
        s * s * s / 6.0,
        (4.0 - 6.0 * t2 + 3.0 * t3) / 6.0,
        (1.0 + 3.0 * t + 3.0 * t2 - 3.0 * t3) / 6.0,
        t3 / 6.0,
    ]
}

#[inline]
fn clamp_index(i: i64, len: usize) -> usize {
    i.clamp(0, len as i64 - 1) as usize
}

#[derive(Debug, Clone)]
pub struct BicubicBspline {
    width: usize,
    height: usize,
    coef: Vec<f32>,
}

impl BicubicBspline {
    pub fn new(img: &Image2D) -> Self {
        let width = img.width();
        let height = img.height();
        let mut coef = img.data().to_vec();

        for row in coef.chunks_exact_mut(width) {
            prefilter_line(row);
        }
        let mut column = vec![0.0f32; height];
        for x in 0..width {
            for (y, c) in column.iter_mut().enumerate() {
                *c = coef[y * width + x];
            }
            prefilter_line(&mut column);
            for (y, c) in column.iter().enumerate() {
                coef[y * width + x] = *c;
            }
        }

        Self {
            width,
            height,
            coef,
        }
    }

    /// Reconstruct the image value at a real-valued coordinate.
    pub fn compute(&self, location: Point2D) -> f32 {
        let xf = location.x.floor();
        let yf = location.y.floor();
        let wx = basis(location.x - xf);
        let wy = basis(location.y - yf);
        let ix = xf as i64;
        let iy = yf as i64;

        let mut sum = 0.0;
        for (m, wym) in wy.iter().enumerate() {
            let y = clamp_index(iy - 1 + m as i64, self.height);
            let mut row_sum = 0.0;
            for (n, wxn) in wx.iter().enumerate() {
                let x = clamp_index(ix - 1 + n as i64, self.width);
                row_sum += wxn * self.coef[y * self.width + x];
            }
            sum += wym * row_sum;
        }
        sum
    }
}

#[derive(Debug, Clone)]
pub struct TricubicBspline {
    dim_x: usize,
    dim_y: usize,
    dim_z: usize,
    coef: Vec<f32>,
}

impl TricubicBspline {
    pub fn new(vol: &Image3D) -> Self {
        let dim_x = vol.dim_x();
        let dim_y = vol.dim_y();
        let dim_z = vol.dim_z();
        let mut coef = vol.data().to_vec();

        // Along x: lines are contiguous.
        for line in coef.chunks_exact_mut(dim_x) {
            prefilter_line(line);
        }
        // Along y within each z-slab.
        let mut line_y = vec![0.0f32; dim_y];
        for z in 0..dim_z {
            for x in 0..dim_x {
                for (y, c) in line_y.iter_mut().enumerate() {
                    *c = coef[(z * dim_y + y) * dim_x + x];
                }
                prefilter_line(&mut line_y);
                for (y, c) in line_y.iter().enumerate() {
                    coef[(z * dim_y + y) * dim_x + x] = *c;
                }
            }
        }
        // Along z.
        let mut line_z = vec![0.0f32; dim_z];
        for y in 0..dim_y {
            for x in 0..dim_x {
                for (z, c) in line_z.iter_mut().enumerate() {
                    *c = coef[(z * dim_y + y) * dim_x + x];
                }
                prefilter_line(&mut line_z);
                for (z, c) in line_z.iter().enumerate() {
                    coef[(z * dim_y + y) * dim_x + x] = *c;
                }
            }
        }

        Self {
            dim_x,
            dim_y,
            dim_z,
            coef,
        }
    }

    /// Reconstruct the volume value at a real-valued coordinate.
    pub fn compute(&self, location: Point3D) -> f32 {
        let xf = location.x.floor();
        let yf = location.y.floor();
        let zf = location.z.floor();
        let wx = basis(location.x - xf);
        let wy = basis(location.y - yf);
        let wz = basis(location.z - zf);
        let ix = xf as i64;
        let iy = yf as i64;
        let iz = zf as i64;

        let mut sum = 0.0;
        for (l, wzl) in wz.iter().enumerate() {
            let z = clamp_index(iz - 1 + l as i64, self.dim_z);
            let mut slab_sum = 0.0;
            for (m, wym) in wy.iter().enumerate() {
                let y = clamp_index(iy - 1 + m as i64, self.dim_y);
                let mut row_sum = 0.0;
                for (n, wxn) in wx.iter().enumerate() {
                    let x = clamp_index(ix - 1 + n as i64, self.dim_x);
                    row_sum += wxn * self.coef[(z * self.dim_y + y) * self.dim_x + x];
                }
                slab_sum += wym * row_sum;
            }
            sum += wzl * slab_sum;
        }
        sum
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    fn textured_image(width: usize, height: usize) -> Image2D {
        let data: Vec<f32> = (0..height)
            .flat_map(|y| {
                (0..width).map(move |x| {
                    128.0 + 60.0 * (0.35 * x as f32).sin() * (0.45 * y as f32).cos()
                })
            })
            .collect();
        Image2D::from_vec(width, height, data)
    }

    #[test]
    fn interpolation_reproduces_samples_at_integer_coordinates() {
        let img = textured_image(32, 32);
        let interp = BicubicBspline::new(&img);
        for y in 4..28 {
            for x in 4..28 {
                let v = interp.compute(Point2D::new(x as f32, y as f32));
                assert_relative_eq!(v, img.value(y, x), epsilon = 1e-2);
            }
        }
    }

    #[test]
    fn interpolation_is_exact_on_linear_ramps() {
        // Cubic B-splines reproduce polynomials up to degree 3; a linear
        // ramp must be recovered exactly away from the boundary.
        let width = 24;
        let height = 24;
        let data: Vec<f32> = (0..height)
            .flat_map(|y| (0..width).map(move |x| 2.0 * x as f32 + 0.5 * y as f32))
            .collect();
        let img = Image2D::from_vec(width, height, data);
        let interp = BicubicBspline::new(&img);

        for &(x, y) in &[(8.3, 9.7), (12.25, 11.5), (15.9, 6.1)] {
            let v = interp.compute(Point2D::new(x, y));
            assert_relative_eq!(v, 2.0 * x + 0.5 * y, epsilon = 1e-2);
        }
    }

    #[test]
    fn basis_weights_sum_to_one() {
        for &t in &[0.0, 0.25, 0.5, 0.75, 0.99] {
            let w = basis(t);
            assert_relative_eq!(w.iter().sum::<f32>(), 1.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn tricubic_is_exact_on_linear_fields() {
        let dim = 16;
        let data: Vec<f32> = (0..dim)
            .flat_map(|z| {
                (0..dim).flat_map(move |y| {
                    (0..dim).map(move |x| x as f32 + 2.0 * y as f32 - 0.5 * z as f32)
                })
            })
            .collect();
        let vol = Image3D::from_vec(dim, dim, dim, data);
        let interp = TricubicBspline::new(&vol);

        let p = Point3D::new(7.4, 8.6, 5.3);
        assert_relative_eq!(
            interp.compute(p),
            7.4 + 2.0 * 8.6 - 0.5 * 5.3,
            epsilon = 1e-2
        );
    }
}
