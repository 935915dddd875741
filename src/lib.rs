//! Subset Matching Library
//!
//! Subset-based digital image correlation (DIC) and digital volume
//! correlation (DVC): given a reference and a deformed target image (or
//! volume) and a list of points of interest, estimate at each point the
//! displacement and deformation gradients that best map the reference
//! neighbourhood onto the target.
//!
//! ## Pipeline
//!
//! The two estimators are independent and usually chained:
//!
//! 1. **FFT-CC** (`fftcc::Fftcc2D`, `fftcc::Fftcc3D`): integer-pixel
//!    displacement via zero-normalised cross correlation in the spectral
//!    domain. Fast, used as the initial guess.
//! 2. **ICGN** (`icgn::Icgn2D1`, `icgn::Icgn2D2`, `icgn::Icgn3D1`):
//!    inverse-compositional Gauss-Newton refinement to sub-pixel accuracy
//!    (Baker & Matthews, IJCV 2004). First- and second-order shape
//!    functions in 2D, first-order in 3D. The Hessian is assembled once
//!    per point from reference gradients; increments are composed onto
//!    the warp through its homogeneous matrix inverse.
//!
//! Both estimators process POI batches in parallel, one rayon task per
//! point, with a fixed pool of per-worker scratch buffers sized at
//! construction so the hot path never allocates.
//!
//! ## Usage sketch
//!
//! ```no_run
//! use subset_matching::{Fftcc2D, Icgn2D1, Image2D, Poi2D};
//!
//! # fn main() -> subset_matching::Result<()> {
//! let ref_img = Image2D::from_vec(256, 256, vec![0.0; 256 * 256]);
//! let tar_img = Image2D::from_vec(256, 256, vec![0.0; 256 * 256]);
//! let mut pois = vec![Poi2D::new(128, 128)];
//!
//! let mut fftcc = Fftcc2D::new(16, 16, 4)?;
//! fftcc.set_images(&ref_img, &tar_img);
//! fftcc.compute_batch(&mut pois)?;
//!
//! let mut icgn = Icgn2D1::new(16, 16, 0.001, 10, 4)?;
//! icgn.set_images(&ref_img, &tar_img);
//! icgn.prepare()?;
//! icgn.compute_batch(&mut pois)?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod fftcc;
pub mod geometry;
pub mod icgn;
pub mod image;
pub mod poi;

pub use error::{Result, SubsetMatchingError};
pub use fftcc::{Fftcc2D, Fftcc3D};
pub use geometry::{Deformation2D1, Deformation2D2, Deformation3D1, Point2D, Point3D};
pub use icgn::{Icgn2D1, Icgn2D2, Icgn3D1};
pub use image::{Image2D, Image3D};
pub use poi::{Poi2D, Poi3D};
