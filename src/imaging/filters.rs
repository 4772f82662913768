use image::{GrayImage, Luma};

const NEIGHBOURS: [(i64, i64); 8] = [
    (-1, 0),
    (1, 0),
    (0, -1),
    (0, 1),
    (1, 1),
    (1, -1),
    (-1, -1),
    (-1, 1),
];

/// Sliding-window re-thresholding of a plane, in place.
///
/// For every pixel `(i, j)` (row, column) the window spans rows
/// `max(i-1, 0)..i+m-1` and columns `max(j-1, 0)..j+n-1`, clipped to the
/// plane. Each of the pixel's 8 neighbours is then set to the window
/// maximum if it is at least `threshold` times the window mean, and to the
/// window minimum otherwise. Pixels are visited row-major and later windows
/// see earlier writes.
pub fn slide_and_construct(plane: &mut GrayImage, m: usize, n: usize, threshold: f64) {
    let rows = plane.height() as i64;
    let cols = plane.width() as i64;
    let (row_extent, col_extent) = (m as i64 - 1, n as i64 - 1);

    for i in 0..rows {
        for j in 0..cols {
            let row_range = (i - 1).max(0)..(i + row_extent).min(rows);
            let col_range = (j - 1).max(0)..(j + col_extent).min(cols);
            if row_range.is_empty() || col_range.is_empty() {
                continue;
            }

            let mut sum = 0u64;
            let mut max = u8::MIN;
            let mut min = u8::MAX;
            for r in row_range.clone() {
                for c in col_range.clone() {
                    let value = plane.get_pixel(c as u32, r as u32)[0];
                    sum += value as u64;
                    max = max.max(value);
                    min = min.min(value);
                }
            }
            let count = (row_range.end - row_range.start) * (col_range.end - col_range.start);
            let cutoff = sum as f64 / count as f64 * threshold;

            for (di, dj) in NEIGHBOURS {
                let (r, c) = (i + di, j + dj);
                if r < 0 || c < 0 || r >= rows || c >= cols {
                    continue;
                }
                let pixel = plane.get_pixel_mut(c as u32, r as u32);
                *pixel = if pixel[0] as f64 >= cutoff {
                    Luma([max])
                } else {
                    Luma([min])
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkerboard_collapses_to_window_max() {
        let mut plane = GrayImage::from_raw(2, 2, vec![10, 0, 0, 10]).unwrap();

        slide_and_construct(&mut plane, 2, 2, 1.0);

        assert_eq!(plane.into_raw(), vec![10, 10, 10, 10]);
    }

    #[test]
    fn constant_plane_is_unchanged() {
        let mut plane = GrayImage::from_pixel(6, 5, Luma([42]));

        slide_and_construct(&mut plane, 4, 4, 0.95);

        assert!(plane.pixels().all(|p| p[0] == 42));
    }

    #[test]
    fn values_stay_within_the_original_set() {
        let original = vec![3, 2, 3, 8, 5, 5, 9, 7, 10, 11, 8, 6, 4, 5, 9, 10];
        let mut plane = GrayImage::from_raw(4, 4, original.clone()).unwrap();

        slide_and_construct(&mut plane, 4, 4, 0.95);

        assert!(plane.pixels().all(|p| original.contains(&p[0])));
    }
}
