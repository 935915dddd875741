//! Dense grayscale image and volume containers.
//!
//! These are plain row-major (and slab-major) `f32` grids. During a
//! compute call they are only ever read, so estimators borrow them
//! immutably and share them freely across worker threads. Lookups are
//! raw array accesses: callers clip coordinates before indexing.

pub mod gradient;
pub mod interp;
pub mod subset;

#[derive(Debug, Clone)]
pub struct Image2D {
    width: usize,
    height: usize,
    data: Vec<f32>,
}

impl Image2D {
    /// Wrap a row-major pixel buffer. Panics when the buffer length does
    /// not match `width * height`.
    pub fn from_vec(width: usize, height: usize, data: Vec<f32>) -> Self {
        assert_eq!(
            data.len(),
            width * height,
            "pixel buffer length must equal width * height"
        );
        Self {
            width,
            height,
            data,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn value(&self, y: usize, x: usize) -> f32 {
        self.data[y * self.width + x]
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }
}

#[derive(Debug, Clone)]
pub struct Image3D {
    dim_x: usize,
    dim_y: usize,
    dim_z: usize,
    data: Vec<f32>,
}

impl Image3D {
    /// Wrap a voxel buffer laid out with x fastest, then y, then z.
    pub fn from_vec(dim_x: usize, dim_y: usize, dim_z: usize, data: Vec<f32>) -> Self {
        assert_eq!(
            data.len(),
            dim_x * dim_y * dim_z,
            "voxel buffer length must equal dim_x * dim_y * dim_z"
        );
        Self {
            dim_x,
            dim_y,
            dim_z,
            data,
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
    pub fn value(&self, z: usize, y: usize, x: usize) -> f32 {
        self.data[(z * self.dim_y + y) * self.dim_x + x]
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }
}
