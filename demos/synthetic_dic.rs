//! End-to-end 2D run on a synthetic speckle pair: FFT-CC seeds a grid of
//! POIs, ICGN refines them to sub-pixel accuracy, and the displacement
//! table is printed. The generated pair is also written out as PNGs for
//! inspection.
//!
//! Run with `cargo run --example synthetic_dic`.

use subset_matching::{Fftcc2D, Icgn2D1, Image2D, Poi2D};

const WIDTH: usize = 256;
const HEIGHT: usize = 256;
const SHIFT: (f32, f32) = (3.4, -2.6);

fn speckle_image(dx: f32, dy: f32) -> Image2D {
    let data: Vec<f32> = (0..HEIGHT)
        .flat_map(|y| {
            (0..WIDTH).map(move |x| {
                let xf = x as f32 - dx;
                let yf = y as f32 - dy;
                128.0
                    + 50.0 * (0.21 * xf).sin() * (0.17 * yf).cos()
                    + 30.0 * (0.11 * xf + 0.23 * yf).sin()
                    + 20.0 * (0.33 * xf - 0.08 * yf).cos()
            })
        })
        .collect();
    Image2D::from_vec(WIDTH, HEIGHT, data)
}

fn save_png(img: &Image2D, path: &str) {
    let buf: Vec<u8> = img.data().iter().map(|&v| v.clamp(0.0, 255.0) as u8).collect();
    let gray = image::GrayImage::from_raw(img.width() as u32, img.height() as u32, buf)
        .expect("buffer size matches dimensions");
    if let Err(e) = gray.save(path) {
        eprintln!("could not save {path}: {e}");
    }
}

fn main() -> subset_matching::Result<()> {
    env_logger::init();

    let ref_img = speckle_image(0.0, 0.0);
    let tar_img = speckle_image(SHIFT.0, SHIFT.1);
    save_png(&ref_img, "synthetic_ref.png");
    save_png(&tar_img, "synthetic_tar.png");

    let mut pois: Vec<Poi2D> = (0..8)
        .flat_map(|j| (0..8).map(move |i| Poi2D::new(48 + 20 * i, 48 + 20 * j)))
        .collect();

    let mut fftcc = Fftcc2D::new(16, 16, 4)?;
    fftcc.set_images(&ref_img, &tar_img);
    fftcc.compute_batch(&mut pois)?;

    let seed = fftcc.speckle_size(&pois[27], 0.5)?;
    println!(
        "speckle size at ({}, {}): {:.2} x {:.2} px",
        pois[27].x, pois[27].y, seed.x, seed.y
    );

    let mut icgn = Icgn2D1::new(16, 16, 0.001, 10, 4)?;
    icgn.set_images(&ref_img, &tar_img);
    icgn.prepare()?;
    icgn.compute_batch(&mut pois)?;

    println!("applied shift: ({:+.2}, {:+.2})", SHIFT.0, SHIFT.1);
    println!("  x    y         u         v     zncc  iters");
    for poi in &pois {
        println!(
            "{:>4} {:>4} {:>9.4} {:>9.4} {:>8.5} {:>6}",
            poi.x, poi.y, poi.deformation.u, poi.deformation.v, poi.result.zncc,
            poi.result.iteration
        );
    }

    let mean_u = pois.iter().map(|p| p.deformation.u).sum::<f32>() / pois.len() as f32;
    let mean_v = pois.iter().map(|p| p.deformation.v).sum::<f32>() / pois.len() as f32;
    println!("mean displacement: ({mean_u:+.4}, {mean_v:+.4})");

    Ok(())
}
