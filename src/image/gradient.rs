//! 4th-order central-difference gradients of the reference image.
//!
//! Stencil (1, -8, 0, 8, -1)/12 along each axis. The two rows/columns
//! nearest each border are left at zero; the estimators reject POIs whose
//! subsets reach that close to the boundary, so those samples are never
//! consumed.

use crate::image::{Image2D, Image3D};

#[derive(Debug, Clone)]
pub struct Gradient2D4 {
    width: usize,
    height: usize,
    gx: Vec<f32>,
    gy: Vec<f32>,
}

impl Gradient2D4 {
    pub fn new(img: &Image2D) -> Self {
        let width = img.width();
        let height = img.height();
        let mut gx = vec![0.0; width * height];
        let mut gy = vec![0.0; width * height];

        for y in 0..height {
            for x in 2..width.saturating_sub(2) {
                gx[y * width + x] = (img.value(y, x - 2) - 8.0 * img.value(y, x - 1)
                    + 8.0 * img.value(y, x + 1)
                    - img.value(y, x + 2))
                    / 12.0;
            }
        }
        for y in 2..height.saturating_sub(2) {
            for x in 0..width {
                gy[y * width + x] = (img.value(y - 2, x) - 8.0 * img.value(y - 1, x)
                    + 8.0 * img.value(y + 1, x)
                    - img.value(y + 2, x))
                    / 12.0;
            }
        }

        Self {
            width,
            height,
            gx,
            gy,
        }
    }

    #[inline]
    pub fn gradient_x(&self, y: usize, x: usize) -> f32 {
        self.gx[y * self.width + x]
    }

    #[inline]
    pub fn gradient_y(&self, y: usize, x: usize) -> f32 {
        self.gy[y * self.width + x]
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }
}

#[derive(Debug, Clone)]
pub struct Gradient3D4 {
    dim_x: usize,
    dim_y: usize,
    gx: Vec<f32>,
    gy: Vec<f32>,
    gz: Vec<f32>,
}

impl Gradient3D4 {
    pub fn new(vol: &Image3D) -> Self {
        let dim_x = vol.dim_x();
        let dim_y = vol.dim_y();
        let dim_z = vol.dim_z();
        let len = dim_x * dim_y * dim_z;
        let mut gx = vec![0.0; len];
        let mut gy = vec![0.0; len];
        let mut gz = vec![0.0; len];

        let idx = |z: usize, y: usize, x: usize| (z * dim_y + y) * dim_x + x;

        for z in 0..dim_z {
            for y in 0..dim_y {
                for x in 2..dim_x.saturating_sub(2) {
                    gx[idx(z, y, x)] = (vol.value(z, y, x - 2) - 8.0 * vol.value(z, y, x - 1)
                        + 8.0 * vol.value(z, y, x + 1)
                        - vol.value(z, y, x + 2))
                        / 12.0;
                }
            }
        }
        for z in 0..dim_z {
            for y in 2..dim_y.saturating_sub(2) {
                for x in 0..dim_x {
                    gy[idx(z, y, x)] = (vol.value(z, y - 2, x) - 8.0 * vol.value(z, y - 1, x)
                        + 8.0 * vol.value(z, y + 1, x)
                        - vol.value(z, y + 2, x))
                        / 12.0;
                }
            }
        }
        for z in 2..dim_z.saturating_sub(2) {
            for y in 0..dim_y {
                for x in 0..dim_x {
                    gz[idx(z, y, x)] = (vol.value(z - 2, y, x) - 8.0 * vol.value(z - 1, y, x)
                        + 8.0 * vol.value(z + 1, y, x)
                        - vol.value(z + 2, y, x))
                        / 12.0;
                }
            }
        }

        Self {
            dim_x,
            dim_y,
            gx,
            gy,
            gz,
        }
    }

    #[inline]
    pub fn gradient_x(&self, z: usize, y: usize, x: usize) -> f32 {
        self.gx[(z * self.dim_y + y) * self.dim_x + x]
    }

    #[inline]
    pub fn gradient_y(&self, z: usize, y: usize, x: usize) -> f32 {
        self.gy[(z * self.dim_y + y) * self.dim_x + x]
    }

    #[inline]
    pub fn gradient_z(&self, z: usize, y: usize, x: usize) -> f32 {
        self.gz[(z * self.dim_y + y) * self.dim_x + x]
    }
}
