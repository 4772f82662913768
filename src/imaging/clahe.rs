use image::{GrayImage, Luma};

const BINS: usize = 256;

/// Contrast-limited adaptive histogram equalisation.
///
/// The plane is split into a `tiles = [rows, cols]` grid; each tile gets a
/// clipped-histogram equalisation lookup table and every pixel is mapped by
/// bilinear interpolation between the tables of the four nearest tile
/// centers. `clip_limit` is relative to the mean bin height of a tile.
pub fn clahe(plane: &GrayImage, clip_limit: f32, tiles: [u32; 2]) -> GrayImage {
    let (width, height) = plane.dimensions();
    if width == 0 || height == 0 {
        return plane.clone();
    }

    let tile_height = height.div_ceil(tiles[0].clamp(1, height));
    let tile_width = width.div_ceil(tiles[1].clamp(1, width));
    let tile_rows = height.div_ceil(tile_height);
    let tile_cols = width.div_ceil(tile_width);

    let luts: Vec<Vec<[u8; BINS]>> = (0..tile_rows)
        .map(|ty| {
            (0..tile_cols)
                .map(|tx| {
                    let y0 = ty * tile_height;
                    let x0 = tx * tile_width;
                    let y1 = (y0 + tile_height).min(height);
                    let x1 = (x0 + tile_width).min(width);
                    tile_lut(plane, [y0, y1], [x0, x1], clip_limit)
                })
                .collect()
        })
        .collect();

    let neighbours = |position: u32, size: u32, count: u32| {
        let f = (position as f32 + 0.5) / size as f32 - 0.5;
        let lower = f.floor().clamp(0.0, (count - 1) as f32);
        let upper = (lower + 1.0).min((count - 1) as f32);
        let weight = (f - lower).clamp(0.0, 1.0);
        (lower as usize, upper as usize, weight)
    };

    GrayImage::from_fn(width, height, |x, y| {
        let value = plane.get_pixel(x, y)[0] as usize;
        let (top, bottom, wy) = neighbours(y, tile_height, tile_rows);
        let (left, right, wx) = neighbours(x, tile_width, tile_cols);

        let upper_row = luts[top][left][value] as f32 * (1.0 - wx) + luts[top][right][value] as f32 * wx;
        let lower_row =
            luts[bottom][left][value] as f32 * (1.0 - wx) + luts[bottom][right][value] as f32 * wx;
        let mapped = upper_row * (1.0 - wy) + lower_row * wy;

        Luma([mapped.round().clamp(0.0, 255.0) as u8])
    })
}

fn tile_lut(plane: &GrayImage, rows: [u32; 2], cols: [u32; 2], clip_limit: f32) -> [u8; BINS] {
    let mut histogram = [0u32; BINS];
    for y in rows[0]..rows[1] {
        for x in cols[0]..cols[1] {
            histogram[plane.get_pixel(x, y)[0] as usize] += 1;
        }
    }

    let area = (rows[1] - rows[0]) * (cols[1] - cols[0]);
    let limit = ((clip_limit * area as f32 / BINS as f32) as u32).max(1);

    let mut excess = 0;
    for bin in histogram.iter_mut() {
        if *bin > limit {
            excess += *bin - limit;
            *bin = limit;
        }
    }

    let share = excess / BINS as u32;
    let remainder = (excess % BINS as u32) as usize;
    for (i, bin) in histogram.iter_mut().enumerate() {
        *bin += share + u32::from(i < remainder);
    }

    let mut lut = [0u8; BINS];
    let mut cdf = 0u32;
    for (value, bin) in histogram.iter().enumerate() {
        cdf += bin;
        lut[value] = ((cdf as f32 * 255.0 / area as f32).round()).min(255.0) as u8;
    }
    lut
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_plane_stays_constant() {
        let plane = GrayImage::from_pixel(32, 24, Luma([90]));

        let equalised = clahe(&plane, 2.0, [8, 8]);

        let first = equalised.get_pixel(0, 0)[0];
        assert!(equalised.pixels().all(|p| p[0] == first));
    }

    #[test]
    fn low_contrast_gradient_is_stretched() {
        let plane = GrayImage::from_fn(64, 64, |x, _| Luma([100 + (x / 4) as u8]));

        let equalised = clahe(&plane, 4.0, [2, 2]);

        let spread = |p: &GrayImage| {
            let max = p.pixels().map(|p| p[0]).max().unwrap();
            let min = p.pixels().map(|p| p[0]).min().unwrap();
            max - min
        };
        assert_eq!(equalised.dimensions(), plane.dimensions());
        assert!(spread(&equalised) > spread(&plane));
    }

    #[test]
    fn more_tiles_than_pixels_is_tolerated() {
        let plane = GrayImage::from_fn(3, 2, |x, y| Luma([(x * 40 + y * 10) as u8]));

        let equalised = clahe(&plane, 2.0, [8, 8]);

        assert_eq!(equalised.dimensions(), (3, 2));
    }
}
