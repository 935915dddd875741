//! Subsets: the (2r+1)-sized neighbourhoods extracted around each POI.

use crate::geometry::{Point2D, Point3D};
use crate::image::{Image2D, Image3D};

#[derive(Debug, Clone)]
pub struct Subset2D {
    pub center: Point2D,
    pub radius_x: usize,
    pub radius_y: usize,
    width: usize,
    height: usize,
    data: Vec<f32>,
}

impl Subset2D {
    pub fn new(center: Point2D, radius_x: usize, radius_y: usize) -> Self {
        let width = 2 * radius_x + 1;
        let height = 2 * radius_y + 1;
        Self {
            center,
            radius_x,
            radius_y,
            width,
            height,
            data: vec![0.0; width * height],
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn value(&self, r: usize, c: usize) -> f32 {
        self.data[r * self.width + c]
    }

    #[inline]
    pub fn set(&mut self, r: usize, c: usize, value: f32) {
        self.data[r * self.width + c] = value;
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Copy the neighbourhood around `center` out of the image. The whole
    /// (2r+1) window must lie inside the image; estimators reject POIs
    /// that violate this before calling.
    pub fn fill(&mut self, img: &Image2D) {
        let x0 = self.center.x as i64 - self.radius_x as i64;
        let y0 = self.center.y as i64 - self.radius_y as i64;
        for r in 0..self.height {
            for c in 0..self.width {
                let v = img.value((y0 + r as i64) as usize, (x0 + c as i64) as usize);
                self.data[r * self.width + c] = v;
            }
        }
    }

    /// Subtract the mean in place and return the L2 norm of the residual.
    pub fn zero_mean_norm(&mut self) -> f32 {
        let n = self.data.len() as f32;
        let mean = self.data.iter().sum::<f32>() / n;
        let mut squared_sum = 0.0;
        for v in self.data.iter_mut() {
            *v -= mean;
            squared_sum += *v * *v;
        }
        squared_sum.sqrt()
    }
}

#[derive(Debug, Clone)]
pub struct Subset3D {
    pub center: Point3D,
    pub radius_x: usize,
    pub radius_y: usize,
    pub radius_z: usize,
    dim_x: usize,
    dim_y: usize,
    dim_z: usize,
    data: Vec<f32>,
}

impl Subset3D {
    pub fn new(center: Point3D, radius_x: usize, radius_y: usize, radius_z: usize) -> Self {
        let dim_x = 2 * radius_x + 1;
        let dim_y = 2 * radius_y + 1;
        let dim_z = 2 * radius_z + 1;
        Self {
            center,
            radius_x,
            radius_y,
            radius_z,
            dim_x,
            dim_y,
            dim_z,
            data: vec![0.0; dim_x * dim_y * dim_z],
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

    #[inline]
    pub fn value(&self, s: usize, r: usize, c: usize) -> f32 {
        self.data[(s * self.dim_y + r) * self.dim_x + c]
    }

    #[inline]
    pub fn set(&mut self, s: usize, r: usize, c: usize, value: f32) {
        self.data[(s * self.dim_y + r) * self.dim_x + c] = value;
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn fill(&mut self, vol: &Image3D) {
        let x0 = self.center.x as i64 - self.radius_x as i64;
        let y0 = self.center.y as i64 - self.radius_y as i64;
        let z0 = self.center.z as i64 - self.radius_z as i64;
        for s in 0..self.dim_z {
            for r in 0..self.dim_y {
                for c in 0..self.dim_x {
                    let v = vol.value(
                        (z0 + s as i64) as usize,
                        (y0 + r as i64) as usize,
                        (x0 + c as i64) as usize,
                    );
                    self.data[(s * self.dim_y + r) * self.dim_x + c] = v;
                }
            }
        }
    }

    pub fn zero_mean_norm(&mut self) -> f32 {
        let n = self.data.len() as f32;
        let mean = self.data.iter().sum::<f32>() / n;
        let mut squared_sum = 0.0;
        for v in self.data.iter_mut() {
            *v -= mean;
            squared_sum += *v * *v;
        }
        squared_sum.sqrt()
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn fill_copies_the_centered_window() {
        let data: Vec<f32> = (0..25).map(|i| i as f32).collect();
        let img = Image2D::from_vec(5, 5, data);
        let mut subset = Subset2D::new(Point2D::new(2.0, 2.0), 1, 1);
        subset.fill(&img);
        assert_eq!(subset.value(0, 0), 6.0);
        assert_eq!(subset.value(1, 1), 12.0);
        assert_eq!(subset.value(2, 2), 18.0);
    }

    #[test]
    fn zero_mean_norm_centers_the_subset() {
        let img = Image2D::from_vec(3, 3, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0]);
        let mut subset = Subset2D::new(Point2D::new(1.0, 1.0), 1, 1);
        subset.fill(&img);
        let norm = subset.zero_mean_norm();

        let residual_sum: f32 = subset.data().iter().sum();
        assert_relative_eq!(residual_sum, 0.0, epsilon = 1e-4);
        // Values 1..=9 have mean 5 and squared residual sum 60.
        assert_relative_eq!(norm, 60.0f32.sqrt(), epsilon = 1e-4);
    }

    #[test]
    fn zero_mean_norm_3d() {
        let data: Vec<f32> = (0..27).map(|i| i as f32).collect();
        let vol = Image3D::from_vec(3, 3, 3, data);
        let mut subset = Subset3D::new(Point3D::new(1.0, 1.0, 1.0), 1, 1, 1);
        subset.fill(&vol);
        subset.zero_mean_norm();
        let residual_sum: f32 = subset.data().iter().sum();
        assert_relative_eq!(residual_sum, 0.0, epsilon = 1e-3);
    }
}
