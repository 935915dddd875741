//! Inverse-compositional Gauss-Newton (ICGN) sub-pixel refinement.
//!
//! The reference-side quantities (subset, steepest-descent rows, Hessian)
//! are assembled once per POI; each iteration only reconstructs the
//! target subset through the current warp, forms the error image and
//! solves for a parameter increment, which is composed *inversely* onto
//! the current warp. Keeping the Hessian constant across iterations is
//! the whole point of the inverse-compositional formulation.
//!
//! Three variants: first and second order in 2D (sharing one estimator,
//! parameterised over [`shape::Shape2D`]) and first order in 3D.

pub mod shape;

use std::marker::PhantomData;
use std::sync::Mutex;

use log::{debug, info};
use nalgebra::DMatrix;
use rayon::prelude::*;

use crate::error::{Result, SubsetMatchingError};
use crate::geometry::{Deformation3D1, Point2D, Point3D};
use crate::image::gradient::{Gradient2D4, Gradient3D4};
use crate::image::interp::{BicubicBspline, TricubicBspline};
use crate::image::subset::{Subset2D, Subset3D};
use crate::image::{Image2D, Image3D};
use crate::poi::{Poi2D, Poi3D, MIN_ZERO_MEAN_NORM, ZNCC_DEGENERATE, ZNCC_OUT_OF_IMAGE};
use shape::{FirstOrder, SecondOrder, Shape2D};

/// First-order 2D estimator (6 parameters).
pub type Icgn2D1<'a> = Icgn2D<'a, FirstOrder>;
/// Second-order 2D estimator (12 parameters).
pub type Icgn2D2<'a> = Icgn2D<'a, SecondOrder>;

struct Prepared2D {
    gradient: Gradient2D4,
    interp: BicubicBspline,
}

struct Scratch2D {
    ref_subset: Subset2D,
    tar_subset: Subset2D,
    error_img: Vec<f32>,
    sd_img: Vec<f32>,
    hessian: DMatrix<f32>,
    numerator: Vec<f32>,
    dp: Vec<f32>,
}

impl Scratch2D {
    fn new(radius_x: usize, radius_y: usize, param_count: usize) -> Self {
        let width = 2 * radius_x + 1;
        let height = 2 * radius_y + 1;
        Self {
            ref_subset: Subset2D::new(Point2D::default(), radius_x, radius_y),
            tar_subset: Subset2D::new(Point2D::default(), radius_x, radius_y),
            error_img: vec![0.0; width * height],
            sd_img: vec![0.0; width * height * param_count],
            hessian: DMatrix::zeros(param_count, param_count),
            numerator: vec![0.0; param_count],
            dp: vec![0.0; param_count],
        }
    }
}

pub struct Icgn2D<'a, S: Shape2D> {
    radius_x: usize,
    radius_y: usize,
    conv_criterion: f32,
    stop_condition: u32,
    pool: rayon::ThreadPool,
    scratch: Vec<Mutex<Scratch2D>>,
    ref_img: Option<&'a Image2D>,
    tar_img: Option<&'a Image2D>,
    prepared: Option<Prepared2D>,
    _shape: PhantomData<S>,
}

impl<'a, S: Shape2D> Icgn2D<'a, S> {
    pub fn new(
        radius_x: usize,
        radius_y: usize,
        conv_criterion: f32,
        stop_condition: u32,
        thread_number: usize,
    ) -> Result<Self> {
        if radius_x == 0 || radius_y == 0 {
            return Err(SubsetMatchingError::InvalidParameter(
                "subset radii must be at least 1".into(),
            ));
        }
        if stop_condition == 0 {
            return Err(SubsetMatchingError::InvalidParameter(
                "stop_condition must allow at least one iteration".into(),
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
        let scratch = (0..thread_number)
            .map(|_| Mutex::new(Scratch2D::new(radius_x, radius_y, S::PARAM_COUNT)))
            .collect();

        info!(
            "ICGN 2D estimator ready: {}x{} subset, {} parameter(s), {} worker(s)",
            2 * radius_x + 1,
            2 * radius_y + 1,
            S::PARAM_COUNT,
            thread_number
        );

        Ok(Self {
            radius_x,
            radius_y,
            conv_criterion,
            stop_condition,
            pool,
            scratch,
            ref_img: None,
            tar_img: None,
            prepared: None,
            _shape: PhantomData,
        })
    }

    /// Attach a reference/target pair. Invalidates earlier `prepare` work.
    pub fn set_images(&mut self, ref_img: &'a Image2D, tar_img: &'a Image2D) {
        self.ref_img = Some(ref_img);
        self.tar_img = Some(tar_img);
        self.prepared = None;
    }

    /// Adjust the convergence settings between batches.
    pub fn set_iteration(&mut self, conv_criterion: f32, stop_condition: u32) {
        self.conv_criterion = conv_criterion;
        self.stop_condition = stop_condition;
    }

    /// Seed the convergence settings from a previously computed POI.
    pub fn set_iteration_from_poi(&mut self, poi: &Poi2D) {
        self.conv_criterion = poi.result.convergence;
        self.stop_condition = poi.result.iteration;
    }

    /// Compute reference gradients and target spline coefficients. Must be
    /// called once per attached image pair before `compute`.
    pub fn prepare(&mut self) -> Result<()> {
        let (ref_img, tar_img) = match (self.ref_img, self.tar_img) {
            (Some(r), Some(t)) => (r, t),
            _ => return Err(SubsetMatchingError::ImagesNotSet),
        };
        self.prepared = Some(Prepared2D {
            gradient: Gradient2D4::new(ref_img),
            interp: BicubicBspline::new(tar_img),
        });
        info!(
            "ICGN 2D prepared: {}x{} reference gradients, target spline coefficients",
            ref_img.width(),
            ref_img.height()
        );
        Ok(())
    }

    fn scratch_slot(&self) -> Result<&Mutex<Scratch2D>> {
        let tid = rayon::current_thread_index().unwrap_or(0);
        self.scratch
            .get(tid)
            .ok_or(SubsetMatchingError::ThreadIdOverLimit {
                tid,
                pool_size: self.scratch.len(),
            })
    }

    /// Refine one POI in place, starting from the deformation stored on it.
    pub fn compute(&self, poi: &mut Poi2D) -> Result<()> {
        let prepared = self.prepared.as_ref().ok_or(SubsetMatchingError::NotPrepared)?;
        let ref_img = self.ref_img.ok_or(SubsetMatchingError::ImagesNotSet)?;

        let rx = self.radius_x as i32;
        let ry = self.radius_y as i32;
        if poi.x - rx < 0
            || poi.y - ry < 0
            || poi.x + rx > ref_img.width() as i32 - 1
            || poi.y + ry > ref_img.height() as i32 - 1
            || poi.deformation.u.is_nan()
            || poi.deformation.v.is_nan()
        {
            poi.result.zncc = ZNCC_OUT_OF_IMAGE;
            return Ok(());
        }

        let mut guard = self
            .scratch_slot()?
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let inst = &mut *guard;

        let width = 2 * self.radius_x + 1;
        let height = 2 * self.radius_y + 1;
        let p_count = S::PARAM_COUNT;

        inst.ref_subset.center = Point2D::new(poi.x as f32, poi.y as f32);
        inst.ref_subset.fill(ref_img);
        let ref_mean_norm = inst.ref_subset.zero_mean_norm();
        if ref_mean_norm < MIN_ZERO_MEAN_NORM {
            poi.result.zncc = ZNCC_DEGENERATE;
            return Ok(());
        }

        // Steepest-descent rows and the constant Hessian, from reference
        // gradients only.
        inst.hessian.fill(0.0);
        for r in 0..height {
            for c in 0..width {
                let x_local = c as i32 - rx;
                let y_local = r as i32 - ry;
                let x_global = (poi.x + x_local) as usize;
                let y_global = (poi.y + y_local) as usize;
                let gx = prepared.gradient.gradient_x(y_global, x_global);
                let gy = prepared.gradient.gradient_y(y_global, x_global);

                let row = &mut inst.sd_img[(r * width + c) * p_count..][..p_count];
                S::sd_row(gx, gy, x_local as f32, y_local as f32, row);
                for i in 0..p_count {
                    for j in 0..p_count {
                        inst.hessian[(i, j)] += row[i] * row[j];
                    }
                }
            }
        }

        let inv_hessian = match inst.hessian.clone().try_inverse() {
            Some(m) => m,
            None => {
                // Subset lacks texture along some direction.
                poi.result.zncc = ZNCC_DEGENERATE;
                return Ok(());
            }
        };

        inst.tar_subset.center = inst.ref_subset.center;

        let u0 = poi.deformation.u;
        let v0 = poi.deformation.v;
        let mut p_current = S::initial(poi);

        let mut iteration = 0u32;
        let mut dp_norm = f32::MAX;
        let mut znssd;
        loop {
            iteration += 1;

            // Reconstruct the target subset through the current warp.
            for r in 0..height {
                for c in 0..width {
                    let local = Point2D::new(c as f32 - rx as f32, r as f32 - ry as f32);
                    let warped = S::warp(&p_current, local);
                    let global = inst.tar_subset.center + warped;
                    inst.tar_subset.set(r, c, prepared.interp.compute(global));
                }
            }
            let tar_mean_norm = inst.tar_subset.zero_mean_norm();
            if tar_mean_norm < MIN_ZERO_MEAN_NORM {
                poi.result.zncc = ZNCC_DEGENERATE;
                return Ok(());
            }

            // Error image and ZNSSD.
            let scale = ref_mean_norm / tar_mean_norm;
            let mut squared_sum = 0.0;
            for i in 0..width * height {
                let e = inst.tar_subset.data()[i] * scale - inst.ref_subset.data()[i];
                inst.error_img[i] = e;
                squared_sum += e * e;
            }
            znssd = squared_sum / (ref_mean_norm * ref_mean_norm);

            // Right-hand side and increment.
            inst.numerator.iter_mut().for_each(|n| *n = 0.0);
            for i in 0..width * height {
                let row = &inst.sd_img[i * p_count..][..p_count];
                let e = inst.error_img[i];
                for k in 0..p_count {
                    inst.numerator[k] += row[k] * e;
                }
            }
            for i in 0..p_count {
                let mut acc = 0.0;
                for j in 0..p_count {
                    acc += inv_hessian[(i, j)] * inst.numerator[j];
                }
                inst.dp[i] = acc;
            }

            let p_increment = S::increment(&inst.dp);
            if !S::compose_inverse(&mut p_current, &p_increment) {
                break;
            }
            dp_norm = S::convergence_norm(&p_increment, self.radius_x as f32, self.radius_y as f32);

            if iteration >= self.stop_condition || dp_norm < self.conv_criterion {
                break;
            }
        }

        S::store(&p_current, poi);
        poi.result.u0 = u0;
        poi.result.v0 = v0;
        poi.result.zncc = 0.5 * (2.0 - znssd);
        poi.result.iteration = iteration;
        poi.result.convergence = dp_norm;
        Ok(())
    }

    /// Batch form: one parallel task per POI, results written in place.
    pub fn compute_batch(&self, pois: &mut [Poi2D]) -> Result<()> {
        self.pool
            .install(|| pois.par_iter_mut().try_for_each(|poi| self.compute(poi)))?;
        debug!("ICGN 2D refined {} POI(s)", pois.len());
        Ok(())
    }
}

struct Prepared3D {
    gradient: Gradient3D4,
    interp: TricubicBspline,
}

struct Scratch3D {
    ref_subset: Subset3D,
    tar_subset: Subset3D,
    error_img: Vec<f32>,
    sd_img: Vec<f32>,
    hessian: DMatrix<f32>,
    numerator: Vec<f32>,
    dp: Vec<f32>,
}

const PARAM_COUNT_3D1: usize = 12;

impl Scratch3D {
    fn new(radius_x: usize, radius_y: usize, radius_z: usize) -> Self {
        let dim_x = 2 * radius_x + 1;
        let dim_y = 2 * radius_y + 1;
        let dim_z = 2 * radius_z + 1;
        let size = dim_x * dim_y * dim_z;
        Self {
            ref_subset: Subset3D::new(Point3D::default(), radius_x, radius_y, radius_z),
            tar_subset: Subset3D::new(Point3D::default(), radius_x, radius_y, radius_z),
            error_img: vec![0.0; size],
            sd_img: vec![0.0; size * PARAM_COUNT_3D1],
            hessian: DMatrix::zeros(PARAM_COUNT_3D1, PARAM_COUNT_3D1),
            numerator: vec![0.0; PARAM_COUNT_3D1],
            dp: vec![0.0; PARAM_COUNT_3D1],
        }
    }
}

/// First-order 3D estimator for volumetric correlation (12 parameters).
pub struct Icgn3D1<'a> {
    radius_x: usize,
    radius_y: usize,
    radius_z: usize,
    conv_criterion: f32,
    stop_condition: u32,
    pool: rayon::ThreadPool,
    scratch: Vec<Mutex<Scratch3D>>,
    ref_vol: Option<&'a Image3D>,
    tar_vol: Option<&'a Image3D>,
    prepared: Option<Prepared3D>,
}

impl<'a> Icgn3D1<'a> {
    pub fn new(
        radius_x: usize,
        radius_y: usize,
        radius_z: usize,
        conv_criterion: f32,
        stop_condition: u32,
        thread_number: usize,
    ) -> Result<Self> {
        if radius_x == 0 || radius_y == 0 || radius_z == 0 {
            return Err(SubsetMatchingError::InvalidParameter(
                "subset radii must be at least 1".into(),
            ));
        }
        if stop_condition == 0 {
            return Err(SubsetMatchingError::InvalidParameter(
                "stop_condition must allow at least one iteration".into(),
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
        let scratch = (0..thread_number)
            .map(|_| Mutex::new(Scratch3D::new(radius_x, radius_y, radius_z)))
            .collect();

        info!(
            "ICGN 3D estimator ready: {}x{}x{} subset, {} worker(s)",
            2 * radius_x + 1,
            2 * radius_y + 1,
            2 * radius_z + 1,
            thread_number
        );

        Ok(Self {
            radius_x,
            radius_y,
            radius_z,
            conv_criterion,
            stop_condition,
            pool,
            scratch,
            ref_vol: None,
            tar_vol: None,
            prepared: None,
        })
    }

    pub fn set_images(&mut self, ref_vol: &'a Image3D, tar_vol: &'a Image3D) {
        self.ref_vol = Some(ref_vol);
        self.tar_vol = Some(tar_vol);
        self.prepared = None;
    }

    pub fn set_iteration(&mut self, conv_criterion: f32, stop_condition: u32) {
        self.conv_criterion = conv_criterion;
        self.stop_condition = stop_condition;
    }

    pub fn set_iteration_from_poi(&mut self, poi: &Poi3D) {
        self.conv_criterion = poi.result.convergence;
        self.stop_condition = poi.result.iteration;
    }

    pub fn prepare(&mut self) -> Result<()> {
        let (ref_vol, tar_vol) = match (self.ref_vol, self.tar_vol) {
            (Some(r), Some(t)) => (r, t),
            _ => return Err(SubsetMatchingError::ImagesNotSet),
        };
        self.prepared = Some(Prepared3D {
            gradient: Gradient3D4::new(ref_vol),
            interp: TricubicBspline::new(tar_vol),
        });
        info!(
            "ICGN 3D prepared: {}x{}x{} reference gradients, target spline coefficients",
            ref_vol.dim_x(),
            ref_vol.dim_y(),
            ref_vol.dim_z()
        );
        Ok(())
    }

    fn scratch_slot(&self) -> Result<&Mutex<Scratch3D>> {
        let tid = rayon::current_thread_index().unwrap_or(0);
        self.scratch
            .get(tid)
            .ok_or(SubsetMatchingError::ThreadIdOverLimit {
                tid,
                pool_size: self.scratch.len(),
            })
    }

    pub fn compute(&self, poi: &mut Poi3D) -> Result<()> {
        let prepared = self.prepared.as_ref().ok_or(SubsetMatchingError::NotPrepared)?;
        let ref_vol = self.ref_vol.ok_or(SubsetMatchingError::ImagesNotSet)?;

        let rx = self.radius_x as i32;
        let ry = self.radius_y as i32;
        let rz = self.radius_z as i32;
        if poi.x - rx < 0
            || poi.y - ry < 0
            || poi.z - rz < 0
            || poi.x + rx > ref_vol.dim_x() as i32 - 1
            || poi.y + ry > ref_vol.dim_y() as i32 - 1
            || poi.z + rz > ref_vol.dim_z() as i32 - 1
            || poi.deformation.u.is_nan()
            || poi.deformation.v.is_nan()
            || poi.deformation.w.is_nan()
        {
            poi.result.zncc = ZNCC_OUT_OF_IMAGE;
            return Ok(());
        }

        let mut guard = self
            .scratch_slot()?
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let inst = &mut *guard;

        let dim_x = 2 * self.radius_x + 1;
        let dim_y = 2 * self.radius_y + 1;
        let dim_z = 2 * self.radius_z + 1;
        let size = dim_x * dim_y * dim_z;

        inst.ref_subset.center = Point3D::new(poi.x as f32, poi.y as f32, poi.z as f32);
        inst.ref_subset.fill(ref_vol);
        let ref_mean_norm = inst.ref_subset.zero_mean_norm();
        if ref_mean_norm < MIN_ZERO_MEAN_NORM {
            poi.result.zncc = ZNCC_DEGENERATE;
            return Ok(());
        }

        inst.hessian.fill(0.0);
        for s in 0..dim_z {
            for r in 0..dim_y {
                for c in 0..dim_x {
                    let x_local = c as i32 - rx;
                    let y_local = r as i32 - ry;
                    let z_local = s as i32 - rz;
                    let x_global = (poi.x + x_local) as usize;
                    let y_global = (poi.y + y_local) as usize;
                    let z_global = (poi.z + z_local) as usize;
                    let gx = prepared.gradient.gradient_x(z_global, y_global, x_global);
                    let gy = prepared.gradient.gradient_y(z_global, y_global, x_global);
                    let gz = prepared.gradient.gradient_z(z_global, y_global, x_global);

                    let idx = (s * dim_y + r) * dim_x + c;
                    let row = &mut inst.sd_img[idx * PARAM_COUNT_3D1..][..PARAM_COUNT_3D1];
                    let (x, y, z) = (x_local as f32, y_local as f32, z_local as f32);
                    row[0] = gx;
                    row[1] = gx * x;
                    row[2] = gx * y;
                    row[3] = gx * z;
                    row[4] = gy;
                    row[5] = gy * x;
                    row[6] = gy * y;
                    row[7] = gy * z;
                    row[8] = gz;
                    row[9] = gz * x;
                    row[10] = gz * y;
                    row[11] = gz * z;
                    for i in 0..PARAM_COUNT_3D1 {
                        for j in 0..PARAM_COUNT_3D1 {
                            inst.hessian[(i, j)] += row[i] * row[j];
                        }
                    }
                }
            }
        }

        let inv_hessian = match inst.hessian.clone().try_inverse() {
            Some(m) => m,
            None => {
                poi.result.zncc = ZNCC_DEGENERATE;
                return Ok(());
            }
        };

        inst.tar_subset.center = inst.ref_subset.center;

        let u0 = poi.deformation.u;
        let v0 = poi.deformation.v;
        let w0 = poi.deformation.w;
        let d = &poi.deformation;
        let mut p_current = Deformation3D1::new(
            d.u, d.ux, d.uy, d.uz, d.v, d.vx, d.vy, d.vz, d.w, d.wx, d.wy, d.wz,
        );

        let mut iteration = 0u32;
        let mut dp_norm = f32::MAX;
        let mut znssd;
        loop {
            iteration += 1;

            for s in 0..dim_z {
                for r in 0..dim_y {
                    for c in 0..dim_x {
                        let local = Point3D::new(
                            c as f32 - rx as f32,
                            r as f32 - ry as f32,
                            s as f32 - rz as f32,
                        );
                        let warped = p_current.warp(local);
                        let global = inst.tar_subset.center + warped;
                        inst.tar_subset.set(s, r, c, prepared.interp.compute(global));
                    }
                }
            }
            let tar_mean_norm = inst.tar_subset.zero_mean_norm();
            if tar_mean_norm < MIN_ZERO_MEAN_NORM {
                poi.result.zncc = ZNCC_DEGENERATE;
                return Ok(());
            }

            let scale = ref_mean_norm / tar_mean_norm;
            let mut squared_sum = 0.0;
            for i in 0..size {
                let e = inst.tar_subset.data()[i] * scale - inst.ref_subset.data()[i];
                inst.error_img[i] = e;
                squared_sum += e * e;
            }
            znssd = squared_sum / (ref_mean_norm * ref_mean_norm);

            inst.numerator.iter_mut().for_each(|n| *n = 0.0);
            for i in 0..size {
                let row = &inst.sd_img[i * PARAM_COUNT_3D1..][..PARAM_COUNT_3D1];
                let e = inst.error_img[i];
                for k in 0..PARAM_COUNT_3D1 {
                    inst.numerator[k] += row[k] * e;
                }
            }
            for i in 0..PARAM_COUNT_3D1 {
                let mut acc = 0.0;
                for j in 0..PARAM_COUNT_3D1 {
                    acc += inv_hessian[(i, j)] * inst.numerator[j];
                }
                inst.dp[i] = acc;
            }

            let p_increment = Deformation3D1::new(
                inst.dp[0],
                inst.dp[1],
                inst.dp[2],
                inst.dp[3],
                inst.dp[4],
                inst.dp[5],
                inst.dp[6],
                inst.dp[7],
                inst.dp[8],
                inst.dp[9],
                inst.dp[10],
                inst.dp[11],
            );
            if !p_current.compose_inverse(&p_increment) {
                break;
            }
            // Only the translational components enter the exit test in
            // the volumetric variant.
            dp_norm = (p_increment.u * p_increment.u
                + p_increment.v * p_increment.v
                + p_increment.w * p_increment.w)
                .sqrt();

            if iteration >= self.stop_condition || dp_norm < self.conv_criterion {
                break;
            }
        }

        poi.deformation.u = p_current.u;
        poi.deformation.ux = p_current.ux;
        poi.deformation.uy = p_current.uy;
        poi.deformation.uz = p_current.uz;
        poi.deformation.v = p_current.v;
        poi.deformation.vx = p_current.vx;
        poi.deformation.vy = p_current.vy;
        poi.deformation.vz = p_current.vz;
        poi.deformation.w = p_current.w;
        poi.deformation.wx = p_current.wx;
        poi.deformation.wy = p_current.wy;
        poi.deformation.wz = p_current.wz;

        poi.result.u0 = u0;
        poi.result.v0 = v0;
        poi.result.w0 = w0;
        poi.result.zncc = 0.5 * (2.0 - znssd);
        poi.result.iteration = iteration;
        poi.result.convergence = dp_norm;
        Ok(())
    }

    pub fn compute_batch(&self, pois: &mut [Poi3D]) -> Result<()> {
        self.pool
            .install(|| pois.par_iter_mut().try_for_each(|poi| self.compute(poi)))?;
        debug!("ICGN 3D refined {} POI(s)", pois.len());
        Ok(())
    }
}
