use deconvolver::Grid;

/// Smooth synthetic test image: a gentle diagonal ramp with a soft bump in
/// the middle, values well inside the 8-bit range.
pub fn smooth_blob(width: usize, height: usize) -> Grid {
    let mut grid = Grid::zeros(&[width, height]).expect("valid extents");
    let cx = (width as f64 - 1.0) / 2.0;
    let cy = (height as f64 - 1.0) / 2.0;
    let spread = (width.max(height) as f64) / 3.0;
    for x in 0..width {
        for y in 0..height {
            let ramp = 60.0 + 40.0 * (x as f64 + y as f64) / (width + height) as f64;
            let dx = x as f64 - cx;
            let dy = y as f64 - cy;
            let bump = 120.0 * (-(dx * dx + dy * dy) / (2.0 * spread * spread)).exp();
            grid.set(&[x as isize, y as isize], ramp + bump);
        }
    }
    grid
}

/// Mean absolute difference between two equally shaped grids.
pub fn mean_abs_error(a: &Grid, b: &Grid) -> f64 {
    assert_eq!(a.extents(), b.extents(), "grids must share a shape");
    let n = a.len() as f64;
    a.data()
        .iter()
        .zip(b.data())
        .map(|(x, y)| (x - y).abs())
        .sum::<f64>()
        / n
}
