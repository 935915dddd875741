//! Points of interest and their per-POI diagnostic records.
//!
//! A POI owns the current deformation estimate (which doubles as the
//! initial guess on input) and a result record the estimators fill in.
//! Estimators mutate POIs in place; the list itself is owned by the
//! caller.

/// Marker written to `zncc` when a POI is rejected before iteration:
/// subset leaves the image, or the initial guess contains NaN.
pub const ZNCC_OUT_OF_IMAGE: f32 = -1.0;

/// Marker for subsets whose zero-mean norm is too small to correlate
/// (near-constant grayscale, or a rank-deficient Hessian).
pub const ZNCC_DEGENERATE: f32 = -2.0;

/// Subsets with a zero-mean norm below this are treated as textureless.
pub const MIN_ZERO_MEAN_NORM: f32 = 1e-10;

/// Full 2D deformation record. Second-order fields are carried even when
/// only first-order estimators run, so the same POI list can be chained
/// through estimators of different orders.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeformationVector2D {
    pub u: f32,
    pub ux: f32,
    pub uy: f32,
    pub uxx: f32,
    pub uxy: f32,
    pub uyy: f32,
    pub v: f32,
    pub vx: f32,
    pub vy: f32,
    pub vxx: f32,
    pub vxy: f32,
    pub vyy: f32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DeformationVector3D {
    pub u: f32,
    pub ux: f32,
    pub uy: f32,
    pub uz: f32,
    pub v: f32,
    pub vx: f32,
    pub vy: f32,
    pub vz: f32,
    pub w: f32,
    pub wx: f32,
    pub wy: f32,
    pub wz: f32,
}

/// Diagnostic summary of one estimator pass over a POI.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoiResult2D {
    /// Initial displacement guess the pass started from.
    pub u0: f32,
    pub v0: f32,
    /// Final correlation quality, or a rejection marker.
    pub zncc: f32,
    pub iteration: u32,
    /// Final increment norm when iteration stopped.
    pub convergence: f32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PoiResult3D {
    pub u0: f32,
    pub v0: f32,
    pub w0: f32,
    pub zncc: f32,
    pub iteration: u32,
    pub convergence: f32,
}

#[derive(Debug, Clone, Default)]
pub struct Poi2D {
    pub x: i32,
    pub y: i32,
    pub deformation: DeformationVector2D,
    pub result: PoiResult2D,
}

impl Poi2D {
    pub fn new(x: i32, y: i32) -> Self {
        Self {
            x,
            y,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Poi3D {
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub deformation: DeformationVector3D,
    pub result: PoiResult3D,
}

impl Poi3D {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self {
            x,
            y,
            z,
            ..Default::default()
        }
    }
}
