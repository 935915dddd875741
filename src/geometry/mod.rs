pub mod deformation;
pub mod point;

pub use deformation::{Deformation2D1, Deformation2D2, Deformation3D1};
pub use point::{Point2D, Point3D};
