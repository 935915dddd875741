//! Shape-function parameterisation of the 2D ICGN estimator.
//!
//! The first- and second-order variants share the whole iteration
//! skeleton; everything order-specific sits behind this small trait:
//! parameter count, steepest-descent rows, warp/compose delegation, the
//! radius-weighted convergence norm, and POI load/store.

use crate::geometry::{Deformation2D1, Deformation2D2, Point2D};
use crate::poi::Poi2D;

pub trait Shape2D: Send + Sync + 'static {
    const PARAM_COUNT: usize;
    type Deformation: Clone + Send;

    /// Load the initial guess for this order from a POI record.
    fn initial(poi: &Poi2D) -> Self::Deformation;

    /// Steepest-descent row at a subset-local coordinate, written into
    /// `row` (length `PARAM_COUNT`).
    fn sd_row(gx: f32, gy: f32, x: f32, y: f32, row: &mut [f32]);

    fn increment(dp: &[f32]) -> Self::Deformation;

    fn warp(p: &Self::Deformation, local: Point2D) -> Point2D;

    fn compose_inverse(current: &mut Self::Deformation, increment: &Self::Deformation) -> bool;

    /// Radius-weighted L2 norm of an increment, the iteration exit test.
    fn convergence_norm(increment: &Self::Deformation, radius_x: f32, radius_y: f32) -> f32;

    /// Write the refined parameters back into the POI record.
    fn store(p: &Self::Deformation, poi: &mut Poi2D);
}

/// Affine shape function, 6 parameters.
pub struct FirstOrder;

impl Shape2D for FirstOrder {
    const PARAM_COUNT: usize = 6;
    type Deformation = Deformation2D1;

    fn initial(poi: &Poi2D) -> Deformation2D1 {
        let d = &poi.deformation;
        Deformation2D1::new(d.u, d.ux, d.uy, d.v, d.vx, d.vy)
    }

    fn sd_row(gx: f32, gy: f32, x: f32, y: f32, row: &mut [f32]) {
        row[0] = gx;
        row[1] = gx * x;
        row[2] = gx * y;
        row[3] = gy;
        row[4] = gy * x;
        row[5] = gy * y;
    }

    fn increment(dp: &[f32]) -> Deformation2D1 {
        Deformation2D1::new(dp[0], dp[1], dp[2], dp[3], dp[4], dp[5])
    }

    fn warp(p: &Deformation2D1, local: Point2D) -> Point2D {
        p.warp(local)
    }

    fn compose_inverse(current: &mut Deformation2D1, increment: &Deformation2D1) -> bool {
        current.compose_inverse(increment)
    }

    fn convergence_norm(inc: &Deformation2D1, radius_x: f32, radius_y: f32) -> f32 {
        let rx2 = radius_x * radius_x;
        let ry2 = radius_y * radius_y;
        (inc.u * inc.u
            + inc.v * inc.v
            + (inc.ux * inc.ux + inc.vx * inc.vx) * rx2
            + (inc.uy * inc.uy + inc.vy * inc.vy) * ry2)
            .sqrt()
    }

    fn store(p: &Deformation2D1, poi: &mut Poi2D) {
        poi.deformation.u = p.u;
        poi.deformation.ux = p.ux;
        poi.deformation.uy = p.uy;
        poi.deformation.v = p.v;
        poi.deformation.vx = p.vx;
        poi.deformation.vy = p.vy;
    }
}

/// Quadratic shape function, 12 parameters.
pub struct SecondOrder;

impl Shape2D for SecondOrder {
    const PARAM_COUNT: usize = 12;
    type Deformation = Deformation2D2;

    fn initial(poi: &Poi2D) -> Deformation2D2 {
        // Seeded from the first-order fields (FFT-CC or a first-order
        // pass); quadratic terms start at zero.
        let d = &poi.deformation;
        Deformation2D2::from_first_order(&Deformation2D1::new(d.u, d.ux, d.uy, d.v, d.vx, d.vy))
    }

    fn sd_row(gx: f32, gy: f32, x: f32, y: f32, row: &mut [f32]) {
        let xx = 0.5 * x * x;
        let xy = x * y;
        let yy = 0.5 * y * y;
        row[0] = gx;
        row[1] = gx * x;
        row[2] = gx * y;
        row[3] = gx * xx;
        row[4] = gx * xy;
        row[5] = gx * yy;
        row[6] = gy;
        row[7] = gy * x;
        row[8] = gy * y;
        row[9] = gy * xx;
        row[10] = gy * xy;
        row[11] = gy * yy;
    }

    fn increment(dp: &[f32]) -> Deformation2D2 {
        Deformation2D2::new(
            dp[0], dp[1], dp[2], dp[3], dp[4], dp[5], dp[6], dp[7], dp[8], dp[9], dp[10], dp[11],
        )
    }

    fn warp(p: &Deformation2D2, local: Point2D) -> Point2D {
        p.warp(local)
    }

    fn compose_inverse(current: &mut Deformation2D2, increment: &Deformation2D2) -> bool {
        current.compose_inverse(increment)
    }

    fn convergence_norm(inc: &Deformation2D2, radius_x: f32, radius_y: f32) -> f32 {
        let rx2 = radius_x * radius_x;
        let ry2 = radius_y * radius_y;
        (inc.u * inc.u
            + inc.v * inc.v
            + (inc.ux * inc.ux + inc.vx * inc.vx) * rx2
            + (inc.uy * inc.uy + inc.vy * inc.vy) * ry2
            + (inc.uxx * inc.uxx + inc.vxx * inc.vxx) * rx2 * rx2 / 4.0
            + (inc.uyy * inc.uyy + inc.vyy * inc.vyy) * ry2 * ry2 / 4.0
            + (inc.uxy * inc.uxy + inc.vxy * inc.vxy) * rx2 * ry2)
            .sqrt()
    }

    fn store(p: &Deformation2D2, poi: &mut Poi2D) {
        poi.deformation.u = p.u;
        poi.deformation.ux = p.ux;
        poi.deformation.uy = p.uy;
        poi.deformation.uxx = p.uxx;
        poi.deformation.uxy = p.uxy;
        poi.deformation.uyy = p.uyy;
        poi.deformation.v = p.v;
        poi.deformation.vx = p.vx;
        poi.deformation.vy = p.vy;
        poi.deformation.vxx = p.vxx;
        poi.deformation.vxy = p.vxy;
        poi.deformation.vyy = p.vyy;
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn first_order_sd_row_layout() {
        let mut row = [0.0f32; 6];
        FirstOrder::sd_row(2.0, 3.0, 4.0, 5.0, &mut row);
        assert_eq!(row, [2.0, 8.0, 10.0, 3.0, 12.0, 15.0]);
    }

    #[test]
    fn second_order_sd_row_layout() {
        let mut row = [0.0f32; 12];
        SecondOrder::sd_row(2.0, 3.0, 4.0, 5.0, &mut row);
        // gx terms: 1, x, y, x^2/2, xy, y^2/2.
        assert_eq!(&row[..6], &[2.0, 8.0, 10.0, 16.0, 40.0, 25.0]);
        assert_eq!(&row[6..], &[3.0, 12.0, 15.0, 24.0, 60.0, 37.5]);
    }

    #[test]
    fn convergence_norm_weights_displacement_gradients_by_radius() {
        let inc = FirstOrder::increment(&[0.0, 0.1, 0.0, 0.0, 0.0, 0.0]);
        assert_relative_eq!(
            FirstOrder::convergence_norm(&inc, 10.0, 20.0),
            1.0,
            epsilon = 1e-5
        );

        let inc = FirstOrder::increment(&[3.0, 0.0, 0.0, 4.0, 0.0, 0.0]);
        assert_relative_eq!(
            FirstOrder::convergence_norm(&inc, 16.0, 16.0),
            5.0,
            epsilon = 1e-5
        );
    }
}
