//! Integer-pixel displacement recovery through the FFT-CC estimators.

use subset_matching::{Fftcc2D, Fftcc3D, Image2D, Image3D, Poi2D, Poi3D, SubsetMatchingError};

/// Smooth multi-frequency texture, shifted by (dx, dy).
fn textured_image(width: usize, height: usize, dx: f32, dy: f32) -> Image2D {
    let data: Vec<f32> = (0..height)
        .flat_map(|y| {
            (0..width).map(move |x| {
                let xf = x as f32 - dx;
                let yf = y as f32 - dy;
                128.0
                    + 50.0 * (0.21 * xf).sin() * (0.17 * yf).cos()
                    + 30.0 * (0.11 * xf + 0.23 * yf).sin()
                    + 20.0 * (0.47 * xf - 0.29 * yf).cos()
            })
        })
        .collect();
    Image2D::from_vec(width, height, data)
}

/// Pseudo-random texture that tiles with period 32, shifted by (dx, dy).
/// A 32-periodic pattern matches the 2r = 32 correlation window, so the
/// circular correlation is an exact cyclic shift and ZNCC reaches 1.
fn tiled_image(width: usize, height: usize, dx: i64, dy: i64) -> Image2D {
    let tile = |x: i64, y: i64| -> f32 {
        let xm = (x - dx).rem_euclid(32);
        let ym = (y - dy).rem_euclid(32);
        ((xm * 7919 + ym * 104_729 + xm * ym * 13) % 251) as f32
    };
    let data: Vec<f32> = (0..height as i64)
        .flat_map(|y| (0..width as i64).map(move |x| tile(x, y)))
        .collect();
    Image2D::from_vec(width, height, data)
}

#[test]
fn integer_shift_is_recovered_exactly() {
    let ref_img = textured_image(128, 128, 0.0, 0.0);
    let tar_img = textured_image(128, 128, 3.0, -2.0);

    let mut fftcc = Fftcc2D::new(16, 16, 2).unwrap();
    fftcc.set_images(&ref_img, &tar_img);

    let mut poi = Poi2D::new(64, 64);
    fftcc.compute(&mut poi).unwrap();

    assert_eq!(poi.deformation.u, 3.0);
    assert_eq!(poi.deformation.v, -2.0);
    assert!(
        poi.result.zncc > 0.8,
        "zncc = {} too low for a clean shift",
        poi.result.zncc
    );
}

#[test]
fn cyclic_shift_reaches_unit_zncc() {
    let ref_img = tiled_image(128, 128, 0, 0);
    let tar_img = tiled_image(128, 128, 3, -2);

    let mut fftcc = Fftcc2D::new(16, 16, 1).unwrap();
    fftcc.set_images(&ref_img, &tar_img);

    let mut poi = Poi2D::new(64, 64);
    fftcc.compute(&mut poi).unwrap();

    assert_eq!(poi.deformation.u, 3.0);
    assert_eq!(poi.deformation.v, -2.0);
    assert!(
        poi.result.zncc > 0.999,
        "cyclic shift should correlate perfectly, got {}",
        poi.result.zncc
    );
}

#[test]
fn initial_guess_offsets_the_search_window() {
    // A 13-pixel shift is outside the +-16 search range from zero, but a
    // guess of 10 leaves only 3 pixels for the correlation to find.
    let ref_img = textured_image(160, 160, 0.0, 0.0);
    let tar_img = textured_image(160, 160, 13.0, 0.0);

    let mut fftcc = Fftcc2D::new(16, 16, 1).unwrap();
    fftcc.set_images(&ref_img, &tar_img);

    let mut poi = Poi2D::new(80, 80);
    poi.deformation.u = 10.0;
    fftcc.compute(&mut poi).unwrap();

    assert_eq!(poi.deformation.u, 13.0);
    assert_eq!(poi.deformation.v, 0.0);
    assert_eq!(poi.result.u0, 10.0);
}

#[test]
fn batch_matches_serial_bitwise() {
    let ref_img = textured_image(160, 160, 0.0, 0.0);
    let tar_img = textured_image(160, 160, 3.0, -2.0);

    let mut fftcc = Fftcc2D::new(16, 16, 4).unwrap();
    fftcc.set_images(&ref_img, &tar_img);

    let mut batch: Vec<Poi2D> = (0..4)
        .flat_map(|j| (0..4).map(move |i| Poi2D::new(48 + 20 * i, 48 + 20 * j)))
        .collect();
    let mut serial = batch.clone();

    fftcc.compute_batch(&mut batch).unwrap();
    for poi in serial.iter_mut() {
        fftcc.compute(poi).unwrap();
    }

    for (a, b) in batch.iter().zip(serial.iter()) {
        assert_eq!(a.deformation.u.to_bits(), b.deformation.u.to_bits());
        assert_eq!(a.deformation.v.to_bits(), b.deformation.v.to_bits());
        assert_eq!(a.result.zncc.to_bits(), b.result.zncc.to_bits());
    }
}

#[test]
fn repeated_runs_are_deterministic() {
    let ref_img = textured_image(128, 128, 0.0, 0.0);
    let tar_img = textured_image(128, 128, -4.0, 5.0);

    let mut fftcc = Fftcc2D::new(16, 16, 2).unwrap();
    fftcc.set_images(&ref_img, &tar_img);

    let pois: Vec<Poi2D> = (0..6).map(|i| Poi2D::new(40 + 8 * i, 64)).collect();
    let mut first = pois.clone();
    let mut second = pois.clone();
    fftcc.compute_batch(&mut first).unwrap();
    fftcc.compute_batch(&mut second).unwrap();

    for (a, b) in first.iter().zip(second.iter()) {
        assert_eq!(a.result.zncc.to_bits(), b.result.zncc.to_bits());
        assert_eq!(a.deformation.u.to_bits(), b.deformation.u.to_bits());
    }
}

#[test]
fn compute_without_images_is_an_error() {
    let fftcc = Fftcc2D::new(16, 16, 1).unwrap();
    let mut poi = Poi2D::new(64, 64);
    assert!(matches!(
        fftcc.compute(&mut poi),
        Err(SubsetMatchingError::ImagesNotSet)
    ));
}

#[test]
fn foreign_worker_index_over_pool_limit_fails() {
    // A single-slot estimator driven from a wider external pool: workers
    // with index >= 1 must fail loudly instead of sharing slot 0.
    let ref_img = textured_image(128, 128, 0.0, 0.0);
    let tar_img = textured_image(128, 128, 1.0, 0.0);

    let mut fftcc = Fftcc2D::new(16, 16, 1).unwrap();
    fftcc.set_images(&ref_img, &tar_img);

    let external = rayon::ThreadPoolBuilder::new()
        .num_threads(3)
        .build()
        .unwrap();
    let results = external.broadcast(|_| {
        let mut poi = Poi2D::new(64, 64);
        fftcc.compute(&mut poi)
    });

    assert!(results.iter().any(|r| matches!(
        r,
        Err(SubsetMatchingError::ThreadIdOverLimit { .. })
    )));
    assert!(results.iter().any(|r| r.is_ok()));
}

#[test]
fn speckle_size_matches_autocorrelation_width() {
    // A Gaussian blob of sigma = 1.8 has an autocorrelation full width of
    // ~6 pixels at half peak.
    let width = 128;
    let height = 128;
    let sigma = 1.8f32;
    let data: Vec<f32> = (0..height)
        .flat_map(|y| {
            (0..width).map(move |x| {
                let dx = x as f32 - 64.0;
                let dy = y as f32 - 64.0;
                100.0 * (-(dx * dx + dy * dy) / (2.0 * sigma * sigma)).exp()
            })
        })
        .collect();
    let img = Image2D::from_vec(width, height, data);

    let mut fftcc = Fftcc2D::new(16, 16, 1).unwrap();
    fftcc.set_images(&img, &img);

    let poi = Poi2D::new(64, 64);
    let speckle = fftcc.speckle_size(&poi, 0.5).unwrap();

    assert!(
        (speckle.x - 6.0).abs() < 0.5,
        "speckle width x = {}, expected ~6",
        speckle.x
    );
    assert!(
        (speckle.y - 6.0).abs() < 0.5,
        "speckle width y = {}, expected ~6",
        speckle.y
    );
}

/// 16-periodic pseudo-random volume, shifted by (dx, dy, dz).
fn tiled_volume(dim: usize, dx: i64, dy: i64, dz: i64) -> Image3D {
    let tile = |x: i64, y: i64, z: i64| -> f32 {
        let xm = (x - dx).rem_euclid(16);
        let ym = (y - dy).rem_euclid(16);
        let zm = (z - dz).rem_euclid(16);
        ((xm * 7919 + ym * 104_729 + zm * 1299_709 + xm * ym * zm) % 241) as f32
    };
    let data: Vec<f32> = (0..dim as i64)
        .flat_map(|z| {
            (0..dim as i64).flat_map(move |y| (0..dim as i64).map(move |x| tile(x, y, z)))
        })
        .collect();
    Image3D::from_vec(dim, dim, dim, data)
}

#[test]
fn volume_shift_is_recovered_exactly() {
    let ref_vol = tiled_volume(48, 0, 0, 0);
    let tar_vol = tiled_volume(48, 2, -1, 3);

    let mut fftcc = Fftcc3D::new(8, 8, 8, 2).unwrap();
    fftcc.set_images(&ref_vol, &tar_vol);

    let mut poi = Poi3D::new(24, 24, 24);
    fftcc.compute(&mut poi).unwrap();

    assert_eq!(poi.deformation.u, 2.0);
    assert_eq!(poi.deformation.v, -1.0);
    assert_eq!(poi.deformation.w, 3.0);
    assert!(
        poi.result.zncc > 0.999,
        "cyclic volume shift should correlate perfectly, got {}",
        poi.result.zncc
    );
}
