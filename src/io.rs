//! I/O helpers for the demo binary: grayscale images as grids, JSON reports.
//!
//! - `load_grayscale_grid`: read a PNG into a rank-2 grid of `0..=255`.
//! - `save_grayscale_grid`: write a rank-2 grid back to a grayscale PNG,
//!   clamping to the 8-bit range.
//! - `write_json_file`: pretty-print a serializable value to disk.
//! - `psnr`: peak signal-to-noise ratio on the 8-bit scale.

use std::fs;
use std::path::Path;

use image::GrayImage;
use serde::Serialize;

use crate::grid::Grid;

/// Load an image from disk as a grid indexed `[x, y]` with values `0..=255`.
pub fn load_grayscale_grid(path: &Path) -> Result<Grid, String> {
    let img = image::open(path)
        .map_err(|e| format!("Failed to open {}: {e}", path.display()))?
        .into_luma8();
    let width = img.width() as usize;
    let height = img.height() as usize;
    let mut grid = Grid::zeros(&[width, height])
        .map_err(|e| format!("Bad image dimensions {width}x{height}: {e}"))?;
    for y in 0..height {
        for x in 0..width {
            let v = img.get_pixel(x as u32, y as u32).0[0];
            grid.set(&[x as isize, y as isize], v as f64);
        }
    }
    Ok(grid)
}

/// Write a rank-2 grid to a grayscale PNG, clamping values to `0..=255`.
pub fn save_grayscale_grid(path: &Path, grid: &Grid) -> Result<(), String> {
    if grid.rank() != 2 {
        return Err(format!("expected a rank-2 grid, got rank {}", grid.rank()));
    }
    let width = grid.extents()[0];
    let height = grid.extents()[1];
    let mut img = GrayImage::new(width as u32, height as u32);
    for y in 0..height {
        for x in 0..width {
            let v = grid.get(&[x as isize, y as isize]).clamp(0.0, 255.0);
            img.put_pixel(x as u32, y as u32, image::Luma([v.round() as u8]));
        }
    }
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create {}: {e}", parent.display()))?;
        }
    }
    img.save(path)
        .map_err(|e| format!("Failed to write {}: {e}", path.display()))
}

/// Pretty-print a serializable value to a JSON file.
pub fn write_json_file<T: Serialize>(path: &Path, value: &T) -> Result<(), String> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| format!("Failed to serialize JSON: {e}"))?;
    fs::write(path, json).map_err(|e| format!("Failed to write {}: {e}", path.display()))
}

/// Peak signal-to-noise ratio between two equally shaped grids, with the
/// 8-bit peak of 255.
pub fn psnr(a: &Grid, b: &Grid) -> f64 {
    debug_assert_eq!(a.extents(), b.extents());
    let n = a.len() as f64;
    let mse: f64 = a
        .data()
        .iter()
        .zip(b.data())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        / n;
    if mse <= f64::EPSILON {
        return f64::INFINITY;
    }
    10.0 * (255.0 * 255.0 / mse).log10()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn psnr_of_identical_grids_is_infinite() {
        let g = Grid::from_vec(&[2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        assert!(psnr(&g, &g).is_infinite());
    }

    #[test]
    fn psnr_decreases_with_error() {
        let a = Grid::from_vec(&[2, 2], vec![100.0; 4]).unwrap();
        let mut b = a.clone();
        b.data_mut()[0] += 5.0;
        let mut c = a.clone();
        c.data_mut()[0] += 50.0;
        assert!(psnr(&a, &b) > psnr(&a, &c));
    }
}
