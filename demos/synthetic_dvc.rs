//! End-to-end 3D run on a synthetic speckle volume pair: FFT-CC finds the
//! integer-voxel displacement, ICGN refines it to sub-voxel accuracy.
//!
//! Run with `cargo run --example synthetic_dvc`.

use subset_matching::{Fftcc3D, Icgn3D1, Image3D, Poi3D};

const DIM: usize = 64;
const SHIFT: (f32, f32, f32) = (2.3, -1.6, 0.4);

fn speckle_volume(dx: f32, dy: f32, dz: f32) -> Image3D {
    let data: Vec<f32> = (0..DIM)
        .flat_map(|z| {
            (0..DIM).flat_map(move |y| {
                (0..DIM).map(move |x| {
                    let xf = x as f32 - dx;
                    let yf = y as f32 - dy;
                    let zf = z as f32 - dz;
                    128.0
                        + 40.0 * (0.4 * xf).sin() * (0.35 * yf).cos() * (0.3 * zf).sin()
                        + 25.0 * (0.28 * xf + 0.22 * yf - 0.31 * zf).cos()
                })
            })
        })
        .collect();
    Image3D::from_vec(DIM, DIM, DIM, data)
}

fn main() -> subset_matching::Result<()> {
    env_logger::init();

    let ref_vol = speckle_volume(0.0, 0.0, 0.0);
    let tar_vol = speckle_volume(SHIFT.0, SHIFT.1, SHIFT.2);

    let mut pois: Vec<Poi3D> = (0..3)
        .flat_map(|k| {
            (0..3).flat_map(move |j| {
                (0..3).map(move |i| Poi3D::new(20 + 12 * i, 20 + 12 * j, 20 + 12 * k))
            })
        })
        .collect();

    let mut fftcc = Fftcc3D::new(8, 8, 8, 4)?;
    fftcc.set_images(&ref_vol, &tar_vol);
    fftcc.compute_batch(&mut pois)?;

    let mut icgn = Icgn3D1::new(8, 8, 8, 0.001, 10, 4)?;
    icgn.set_images(&ref_vol, &tar_vol);
    icgn.prepare()?;
    icgn.compute_batch(&mut pois)?;

    println!(
        "applied shift: ({:+.2}, {:+.2}, {:+.2})",
        SHIFT.0, SHIFT.1, SHIFT.2
    );
    println!("  x    y    z         u         v         w     zncc  iters");
    for poi in &pois {
        println!(
            "{:>4} {:>4} {:>4} {:>9.4} {:>9.4} {:>9.4} {:>8.5} {:>6}",
            poi.x,
            poi.y,
            poi.z,
            poi.deformation.u,
            poi.deformation.v,
            poi.deformation.w,
            poi.result.zncc,
            poi.result.iteration
        );
    }

    Ok(())
}
