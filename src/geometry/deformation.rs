//! Shape-function parameter vectors and their homogeneous warp matrices.
//!
//! Each deformation keeps two synchronised representations: the scalar
//! fields and a homogeneous warp matrix applying the same local map. The
//! matrix form is what makes the inverse-compositional update possible:
//! `W(p) <- W(p) * W(dp)^-1` composes correctly for any shape-function
//! order, while a component-wise scalar update does not beyond order 1.
//!
//! The 6x6 second-order matrix acts on the extended monomial vector
//! (x^2, xy, y^2, x, y, 1); its top three rows carry the warped monomials
//! truncated at second order so that matrix multiplication equals map
//! composition to the order of the shape function.

use nalgebra::{Matrix3, Matrix4, Matrix6};

use crate::geometry::{Point2D, Point3D};

/// First-order (affine) 2D shape function: (u, ux, uy, v, vx, vy).
#[derive(Debug, Clone)]
pub struct Deformation2D1 {
    pub u: f32,
    pub ux: f32,
    pub uy: f32,
    pub v: f32,
    pub vx: f32,
    pub vy: f32,
    warp_matrix: Matrix3<f32>,
}

impl Default for Deformation2D1 {
    fn default() -> Self {
        Self::new(0.0, 0.0, 0.0, 0.0, 0.0, 0.0)
    }
}

impl Deformation2D1 {
    pub fn new(u: f32, ux: f32, uy: f32, v: f32, vx: f32, vy: f32) -> Self {
        let mut p = Self {
            u,
            ux,
            uy,
            v,
            vx,
            vy,
            warp_matrix: Matrix3::identity(),
        };
        p.rebuild_warp();
        p
    }

    pub fn from_params(dp: &[f32; 6]) -> Self {
        Self::new(dp[0], dp[1], dp[2], dp[3], dp[4], dp[5])
    }

    pub fn params(&self) -> [f32; 6] {
        [self.u, self.ux, self.uy, self.v, self.vx, self.vy]
    }

    pub fn warp_matrix(&self) -> &Matrix3<f32> {
        &self.warp_matrix
    }

    fn rebuild_warp(&mut self) {
        self.warp_matrix = Matrix3::new(
            1.0 + self.ux,
            self.uy,
            self.u,
            self.vx,
            1.0 + self.vy,
            self.v,
            0.0,
            0.0,
            1.0,
        );
    }

    /// Refresh the scalar fields from the warp matrix. Exact inverse of
    /// `rebuild_warp`.
    fn sync_from_warp(&mut self) {
        self.u = self.warp_matrix[(0, 2)];
        self.ux = self.warp_matrix[(0, 0)] - 1.0;
        self.uy = self.warp_matrix[(0, 1)];
        self.v = self.warp_matrix[(1, 2)];
        self.vx = self.warp_matrix[(1, 0)];
        self.vy = self.warp_matrix[(1, 1)] - 1.0;
    }

    /// Map a subset-local coordinate into target-local space.
    pub fn warp(&self, local: Point2D) -> Point2D {
        let m = &self.warp_matrix;
        Point2D::new(
            m[(0, 0)] * local.x + m[(0, 1)] * local.y + m[(0, 2)],
            m[(1, 0)] * local.x + m[(1, 1)] * local.y + m[(1, 2)],
        )
    }

    /// Inverse-compositional update: `W(p) <- W(p) * W(dp)^-1`.
    ///
    /// Returns false when the increment warp is singular, which only
    /// happens for wildly divergent updates; callers stop iterating then.
    pub fn compose_inverse(&mut self, increment: &Self) -> bool {
        match increment.warp_matrix.try_inverse() {
            Some(inv) => {
                self.warp_matrix *= inv;
                self.sync_from_warp();
                true
            }
            None => false,
        }
    }
}

/// Second-order (quadratic) 2D shape function, 12 parameters.
#[derive(Debug, Clone)]
pub struct Deformation2D2 {
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
    warp_matrix: Matrix6<f32>,
}

impl Default for Deformation2D2 {
    fn default() -> Self {
        Self::from_params(&[0.0; 12])
    }
}

impl Deformation2D2 {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        u: f32,
        ux: f32,
        uy: f32,
        uxx: f32,
        uxy: f32,
        uyy: f32,
        v: f32,
        vx: f32,
        vy: f32,
        vxx: f32,
        vxy: f32,
        vyy: f32,
    ) -> Self {
        let mut p = Self {
            u,
            ux,
            uy,
            uxx,
            uxy,
            uyy,
            v,
            vx,
            vy,
            vxx,
            vxy,
            vyy,
            warp_matrix: Matrix6::identity(),
        };
        p.rebuild_warp();
        p
    }

    pub fn from_params(dp: &[f32; 12]) -> Self {
        Self::new(
            dp[0], dp[1], dp[2], dp[3], dp[4], dp[5], dp[6], dp[7], dp[8], dp[9], dp[10], dp[11],
        )
    }

    /// Promote a first-order deformation (second-order terms zero).
    pub fn from_first_order(p: &Deformation2D1) -> Self {
        Self::new(
            p.u, p.ux, p.uy, 0.0, 0.0, 0.0, p.v, p.vx, p.vy, 0.0, 0.0, 0.0,
        )
    }

    pub fn params(&self) -> [f32; 12] {
        [
            self.u, self.ux, self.uy, self.uxx, self.uxy, self.uyy, self.v, self.vx, self.vy,
            self.vxx, self.vxy, self.vyy,
        ]
    }

    pub fn warp_matrix(&self) -> &Matrix6<f32> {
        &self.warp_matrix
    }

    fn rebuild_warp(&mut self) {
        let (u, ux, uy, uxx, uxy, uyy) = (self.u, self.ux, self.uy, self.uxx, self.uxy, self.uyy);
        let (v, vx, vy, vxx, vxy, vyy) = (self.v, self.vx, self.vy, self.vxx, self.vxy, self.vyy);

        let m = &mut self.warp_matrix;
        // Row 0: x'^2 truncated at second order.
        m[(0, 0)] = (1.0 + ux) * (1.0 + ux) + u * uxx;
        m[(0, 1)] = 2.0 * (1.0 + ux) * uy + 2.0 * u * uxy;
        m[(0, 2)] = uy * uy + u * uyy;
        m[(0, 3)] = 2.0 * u * (1.0 + ux);
        m[(0, 4)] = 2.0 * u * uy;
        m[(0, 5)] = u * u;
        // Row 1: x'y'.
        m[(1, 0)] = (1.0 + ux) * vx + 0.5 * (u * vxx + v * uxx);
        m[(1, 1)] = (1.0 + ux) * (1.0 + vy) + uy * vx + u * vxy + v * uxy;
        m[(1, 2)] = uy * (1.0 + vy) + 0.5 * (u * vyy + v * uyy);
        m[(1, 3)] = u * vx + v * (1.0 + ux);
        m[(1, 4)] = u * (1.0 + vy) + v * uy;
        m[(1, 5)] = u * v;
        // Row 2: y'^2.
        m[(2, 0)] = vx * vx + v * vxx;
        m[(2, 1)] = 2.0 * vx * (1.0 + vy) + 2.0 * v * vxy;
        m[(2, 2)] = (1.0 + vy) * (1.0 + vy) + v * vyy;
        m[(2, 3)] = 2.0 * v * vx;
        m[(2, 4)] = 2.0 * v * (1.0 + vy);
        m[(2, 5)] = v * v;
        // Row 3: x'.
        m[(3, 0)] = 0.5 * uxx;
        m[(3, 1)] = uxy;
        m[(3, 2)] = 0.5 * uyy;
        m[(3, 3)] = 1.0 + ux;
        m[(3, 4)] = uy;
        m[(3, 5)] = u;
        // Row 4: y'.
        m[(4, 0)] = 0.5 * vxx;
        m[(4, 1)] = vxy;
        m[(4, 2)] = 0.5 * vyy;
        m[(4, 3)] = vx;
        m[(4, 4)] = 1.0 + vy;
        m[(4, 5)] = v;
        // Row 5: homogeneous 1.
        m[(5, 0)] = 0.0;
        m[(5, 1)] = 0.0;
        m[(5, 2)] = 0.0;
        m[(5, 3)] = 0.0;
        m[(5, 4)] = 0.0;
        m[(5, 5)] = 1.0;
    }

    fn sync_from_warp(&mut self) {
        let m = &self.warp_matrix;
        self.uxx = 2.0 * m[(3, 0)];
        self.uxy = m[(3, 1)];
        self.uyy = 2.0 * m[(3, 2)];
        self.ux = m[(3, 3)] - 1.0;
        self.uy = m[(3, 4)];
        self.u = m[(3, 5)];
        self.vxx = 2.0 * m[(4, 0)];
        self.vxy = m[(4, 1)];
        self.vyy = 2.0 * m[(4, 2)];
        self.vx = m[(4, 3)];
        self.vy = m[(4, 4)] - 1.0;
        self.v = m[(4, 5)];
    }

    pub fn warp(&self, local: Point2D) -> Point2D {
        let m = &self.warp_matrix;
        let q = [
            local.x * local.x,
            local.x * local.y,
            local.y * local.y,
            local.x,
            local.y,
            1.0,
        ];
        let mut x = 0.0;
        let mut y = 0.0;
        for (i, qi) in q.iter().enumerate() {
            x += m[(3, i)] * qi;
            y += m[(4, i)] * qi;
        }
        Point2D::new(x, y)
    }

    pub fn compose_inverse(&mut self, increment: &Self) -> bool {
        match increment.warp_matrix.try_inverse() {
            Some(inv) => {
                self.warp_matrix *= inv;
                self.sync_from_warp();
                true
            }
            None => false,
        }
    }
}

/// First-order 3D shape function, 12 parameters.
#[derive(Debug, Clone)]
pub struct Deformation3D1 {
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
    warp_matrix: Matrix4<f32>,
}

impl Default for Deformation3D1 {
    fn default() -> Self {
        Self::from_params(&[0.0; 12])
    }
}

impl Deformation3D1 {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        u: f32,
        ux: f32,
        uy: f32,
        uz: f32,
        v: f32,
        vx: f32,
        vy: f32,
        vz: f32,
        w: f32,
        wx: f32,
        wy: f32,
        wz: f32,
    ) -> Self {
        let mut p = Self {
            u,
            ux,
            uy,
            uz,
            v,
            vx,
            vy,
            vz,
            w,
            wx,
            wy,
            wz,
            warp_matrix: Matrix4::identity(),
        };
        p.rebuild_warp();
        p
    }

    pub fn from_params(dp: &[f32; 12]) -> Self {
        Self::new(
            dp[0], dp[1], dp[2], dp[3], dp[4], dp[5], dp[6], dp[7], dp[8], dp[9], dp[10], dp[11],
        )
    }

    pub fn params(&self) -> [f32; 12] {
        [
            self.u, self.ux, self.uy, self.uz, self.v, self.vx, self.vy, self.vz, self.w, self.wx,
            self.wy, self.wz,
        ]
    }

    pub fn warp_matrix(&self) -> &Matrix4<f32> {
        &self.warp_matrix
    }

    fn rebuild_warp(&mut self) {
        self.warp_matrix = Matrix4::new(
            1.0 + self.ux,
            self.uy,
            self.uz,
            self.u,
            self.vx,
            1.0 + self.vy,
            self.vz,
            self.v,
            self.wx,
            self.wy,
            1.0 + self.wz,
            self.w,
            0.0,
            0.0,
            0.0,
            1.0,
        );
    }

    fn sync_from_warp(&mut self) {
        let m = &self.warp_matrix;
        self.ux = m[(0, 0)] - 1.0;
        self.uy = m[(0, 1)];
        self.uz = m[(0, 2)];
        self.u = m[(0, 3)];
        self.vx = m[(1, 0)];
        self.vy = m[(1, 1)] - 1.0;
        self.vz = m[(1, 2)];
        self.v = m[(1, 3)];
        self.wx = m[(2, 0)];
        self.wy = m[(2, 1)];
        self.wz = m[(2, 2)] - 1.0;
        self.w = m[(2, 3)];
    }

    pub fn warp(&self, local: Point3D) -> Point3D {
        let m = &self.warp_matrix;
        Point3D::new(
            m[(0, 0)] * local.x + m[(0, 1)] * local.y + m[(0, 2)] * local.z + m[(0, 3)],
            m[(1, 0)] * local.x + m[(1, 1)] * local.y + m[(1, 2)] * local.z + m[(1, 3)],
            m[(2, 0)] * local.x + m[(2, 1)] * local.y + m[(2, 2)] * local.z + m[(2, 3)],
        )
    }

    pub fn compose_inverse(&mut self, increment: &Self) -> bool {
        match increment.warp_matrix.try_inverse() {
            Some(inv) => {
                self.warp_matrix *= inv;
                self.sync_from_warp();
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn warp_round_trip_2d1() {
        let params = [0.37, 0.012, -0.02, -1.4, 0.005, 0.03];
        let mut p = Deformation2D1::from_params(&params);
        p.sync_from_warp();
        for (a, b) in p.params().iter().zip(params.iter()) {
            assert_relative_eq!(a, b, epsilon = 1e-6);
        }
    }

    #[test]
    fn warp_round_trip_2d2() {
        let params = [
            0.37, 0.012, -0.02, 0.001, -0.002, 0.0005, -1.4, 0.005, 0.03, -0.0003, 0.0008, 0.0011,
        ];
        let mut p = Deformation2D2::from_params(&params);
        p.sync_from_warp();
        for (a, b) in p.params().iter().zip(params.iter()) {
            assert_relative_eq!(a, b, epsilon = 1e-6);
        }
    }

    #[test]
    fn warp_round_trip_3d1() {
        let params = [
            0.37, 0.012, -0.02, 0.004, -1.4, 0.005, 0.03, -0.006, 2.2, 0.001, -0.003, 0.002,
        ];
        let mut p = Deformation3D1::from_params(&params);
        p.sync_from_warp();
        for (a, b) in p.params().iter().zip(params.iter()) {
            assert_relative_eq!(a, b, epsilon = 1e-6);
        }
    }

    #[test]
    fn warp_2d1_closed_form() {
        let p = Deformation2D1::new(1.5, 0.1, 0.2, -0.5, 0.05, -0.1);
        let q = p.warp(Point2D::new(2.0, 3.0));
        assert_relative_eq!(q.x, 1.5 + 1.1 * 2.0 + 0.2 * 3.0, epsilon = 1e-6);
        assert_relative_eq!(q.y, -0.5 + 0.05 * 2.0 + 0.9 * 3.0, epsilon = 1e-6);
    }

    #[test]
    fn matrix_product_composes_affine_maps() {
        let p = Deformation2D1::new(1.5, 0.1, 0.2, -0.5, 0.05, -0.1);
        let q = Deformation2D1::new(-0.7, -0.03, 0.01, 0.9, 0.02, 0.07);
        let composed = p.warp_matrix() * q.warp_matrix();

        let local = Point2D::new(3.0, -2.0);
        let direct = p.warp(q.warp(local));
        let via_matrix = Point2D::new(
            composed[(0, 0)] * local.x + composed[(0, 1)] * local.y + composed[(0, 2)],
            composed[(1, 0)] * local.x + composed[(1, 1)] * local.y + composed[(1, 2)],
        );
        assert_relative_eq!(direct.x, via_matrix.x, epsilon = 1e-4);
        assert_relative_eq!(direct.y, via_matrix.y, epsilon = 1e-4);
    }

    #[test]
    fn second_order_matrix_composes_affine_embeddings_exactly() {
        // With vanishing quadratic terms the monomial lift is exact, so
        // matrix multiplication must equal map composition exactly.
        let p = Deformation2D2::new(
            1.5, 0.1, 0.2, 0.0, 0.0, 0.0, -0.5, 0.05, -0.1, 0.0, 0.0, 0.0,
        );
        let q = Deformation2D2::new(
            -0.7, -0.03, 0.01, 0.0, 0.0, 0.0, 0.9, 0.02, 0.07, 0.0, 0.0, 0.0,
        );
        let composed = p.warp_matrix() * q.warp_matrix();

        let local = Point2D::new(1.3, -0.8);
        let direct = p.warp(q.warp(local));
        let lift = [
            local.x * local.x,
            local.x * local.y,
            local.y * local.y,
            local.x,
            local.y,
            1.0,
        ];
        let mut via_x = 0.0;
        let mut via_y = 0.0;
        for (i, qi) in lift.iter().enumerate() {
            via_x += composed[(3, i)] * qi;
            via_y += composed[(4, i)] * qi;
        }
        assert_relative_eq!(direct.x, via_x, epsilon = 1e-4);
        assert_relative_eq!(direct.y, via_y, epsilon = 1e-4);
    }

    #[test]
    fn compose_inverse_with_identity_is_noop() {
        let mut p = Deformation2D1::new(1.5, 0.1, 0.2, -0.5, 0.05, -0.1);
        let before = p.params();
        assert!(p.compose_inverse(&Deformation2D1::default()));
        for (a, b) in p.params().iter().zip(before.iter()) {
            assert_relative_eq!(a, b, epsilon = 1e-6);
        }
    }

    #[test]
    fn compose_inverse_undoes_matching_increment() {
        // Composing with the inverse of itself must return to identity.
        let mut p = Deformation3D1::new(
            0.4, 0.01, -0.02, 0.03, -0.6, 0.005, 0.015, -0.01, 1.1, 0.002, 0.004, -0.006,
        );
        let inc = p.clone();
        assert!(p.compose_inverse(&inc));
        for a in p.params() {
            assert_relative_eq!(a, 0.0, epsilon = 1e-5);
        }
    }
}
