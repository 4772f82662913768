//! Window arithmetic for cutting patches out of large planes.

use derive_new::new;
use image::GrayImage;
use serde::{Deserialize, Serialize};

/// A half-open `[row_from, row_to) x [col_from, col_to)` window.
#[derive(new, Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Window {
    pub row_from: usize,
    pub row_to: usize,
    pub col_from: usize,
    pub col_to: usize,
}

impl Window {
    pub fn shape(&self) -> [usize; 2] {
        [self.row_to - self.row_from, self.col_to - self.col_from]
    }

    pub fn as_array(&self) -> [usize; 4] {
        [self.row_from, self.row_to, self.col_from, self.col_to]
    }
}

/// A window expanded by some context, clipped to the plane, along with the
/// mirror padding still needed to reach the full expanded size.
#[derive(new, Clone, Copy, Debug, PartialEq, Eq)]
pub struct MirrorPatch {
    pub window: Window,
    /// `[top, bottom, left, right]`
    pub pads: [usize; 4],
}

/// Start positions `0, step, 2*step, ...` along one axis; the last window is
/// pulled back so it ends on the border.
fn axis_starts(length: usize, size: usize, step: usize) -> Vec<usize> {
    let last = length.saturating_sub(size);
    let mut starts: Vec<usize> = (0..length)
        .step_by(step.max(1))
        .map(|start| start.min(last))
        .collect();
    starts.dedup();
    starts
}

/// Tiles a `shape = [rows, cols]` plane with `patch` sized windows every
/// `offset` pixels. Every pixel is covered when `offset <= patch`.
pub fn chunk_indices(shape: [usize; 2], patch: [usize; 2], offset: [usize; 2]) -> Vec<Window> {
    let rows = axis_starts(shape[0], patch[0], offset[0]);
    let cols = axis_starts(shape[1], patch[1], offset[1]);

    rows.iter()
        .flat_map(|&row| {
            cols.iter().map(move |&col| {
                Window::new(
                    row,
                    (row + patch[0]).min(shape[0]),
                    col,
                    (col + patch[1]).min(shape[1]),
                )
            })
        })
        .collect()
}

/// One `patch` sized window centered on each `(row, col)` point, shifted to
/// lie inside the plane.
pub fn chunk_indices_by_index<I>(shape: [usize; 2], patch: [usize; 2], centers: I) -> Vec<Window>
where
    I: IntoIterator<Item = (usize, usize)>,
{
    let place = |center: usize, size: usize, length: usize| {
        let start = center.saturating_sub(size / 2).min(length.saturating_sub(size));
        (start, (start + size).min(length))
    };

    centers
        .into_iter()
        .map(|(row, col)| {
            let (row_from, row_to) = place(row, patch[0], shape[0]);
            let (col_from, col_to) = place(col, patch[1], shape[1]);
            Window::new(row_from, row_to, col_from, col_to)
        })
        .collect()
}

/// Grows `window` by `expand_by = [rows, cols]` on every side. The part that
/// falls outside the plane is reported as padding.
pub fn expand_and_mirror_patch(
    shape: [usize; 2],
    window: Window,
    expand_by: [usize; 2],
) -> MirrorPatch {
    let [er, ec] = expand_by;

    let top = er.saturating_sub(window.row_from);
    let bottom = (window.row_to + er).saturating_sub(shape[0]);
    let left = ec.saturating_sub(window.col_from);
    let right = (window.col_to + ec).saturating_sub(shape[1]);

    MirrorPatch::new(
        Window::new(
            window.row_from.saturating_sub(er),
            (window.row_to + er).min(shape[0]),
            window.col_from.saturating_sub(ec),
            (window.col_to + ec).min(shape[1]),
        ),
        [top, bottom, left, right],
    )
}

pub fn crop(plane: &GrayImage, window: Window) -> GrayImage {
    let [rows, cols] = window.shape();
    image::imageops::crop_imm(
        plane,
        window.col_from as u32,
        window.row_from as u32,
        cols as u32,
        rows as u32,
    )
    .to_image()
}

/// Index into `0..length` mirrored around the borders without repeating the
/// edge pixel, as `-1 -> 1` and `length -> length - 2`.
fn reflect(index: i64, length: usize) -> usize {
    if length <= 1 {
        return 0;
    }
    let period = 2 * (length as i64 - 1);
    let folded = index.rem_euclid(period);
    if folded >= length as i64 {
        (period - folded) as usize
    } else {
        folded as usize
    }
}

/// Pads a plane by `[top, bottom, left, right]` mirrored pixels.
pub fn reflect_pad(plane: &GrayImage, pads: [usize; 4]) -> GrayImage {
    let [top, bottom, left, right] = pads;
    if pads == [0; 4] {
        return plane.clone();
    }

    let (width, height) = plane.dimensions();
    GrayImage::from_fn(
        width + (left + right) as u32,
        height + (top + bottom) as u32,
        |x, y| {
            let source_x = reflect(x as i64 - left as i64, width as usize);
            let source_y = reflect(y as i64 - top as i64, height as usize);
            *plane.get_pixel(source_x as u32, source_y as u32)
        },
    )
}

/// Cuts `window` expanded by `expand_by`, mirroring whatever falls outside
/// the plane. The result is always `window.shape() + 2 * expand_by`.
pub fn mirrored_crop(plane: &GrayImage, window: Window, expand_by: [usize; 2]) -> GrayImage {
    let shape = [plane.height() as usize, plane.width() as usize];
    let patch = expand_and_mirror_patch(shape, window, expand_by);

    reflect_pad(&crop(plane, patch.window), patch.pads)
}

/// Reverses the row order (upside down).
pub fn flip_rows(plane: &GrayImage) -> GrayImage {
    image::imageops::flip_vertical(plane)
}

/// Reverses the column order (left to right).
pub fn flip_cols(plane: &GrayImage) -> GrayImage {
    image::imageops::flip_horizontal(plane)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn chunks_cover_the_plane_without_leaving_it() {
        let windows = chunk_indices([10, 7], [4, 4], [4, 4]);

        assert_eq!(windows.len(), 3 * 2);
        assert!(windows.iter().all(|w| w.shape() == [4, 4]));
        assert!(windows.iter().all(|w| w.row_to <= 10 && w.col_to <= 7));
        assert!(windows.contains(&Window::new(6, 10, 3, 7)));

        let covered: usize = (0..10)
            .flat_map(|r| (0..7).map(move |c| (r, c)))
            .filter(|&(r, c)| {
                windows
                    .iter()
                    .any(|w| (w.row_from..w.row_to).contains(&r) && (w.col_from..w.col_to).contains(&c))
            })
            .count();
        assert_eq!(covered, 70);
    }

    #[test]
    fn chunk_by_index_shifts_windows_inside() {
        let windows = chunk_indices_by_index([20, 20], [6, 6], vec![(0, 0), (10, 10), (19, 18)]);

        assert_eq!(windows[0], Window::new(0, 6, 0, 6));
        assert_eq!(windows[1], Window::new(7, 13, 7, 13));
        assert_eq!(windows[2], Window::new(14, 20, 14, 20));
    }

    #[test]
    fn expansion_reports_missing_context_as_padding() {
        let patch = expand_and_mirror_patch([10, 10], Window::new(0, 4, 6, 10), [2, 3]);

        assert_eq!(patch.window, Window::new(0, 6, 3, 10));
        assert_eq!(patch.pads, [2, 0, 0, 3]);
    }

    #[test]
    fn reflect_padding_skips_the_edge() {
        let plane = GrayImage::from_raw(3, 1, vec![1, 2, 3]).unwrap();

        let padded = reflect_pad(&plane, [0, 0, 2, 2]);

        assert_eq!(padded.into_raw(), vec![3, 2, 1, 2, 3, 2, 1]);
    }

    #[test]
    fn flips_reverse_one_axis() {
        let plane = GrayImage::from_raw(2, 2, vec![1, 2, 3, 4]).unwrap();

        assert_eq!(flip_rows(&plane).into_raw(), vec![3, 4, 1, 2]);
        assert_eq!(flip_cols(&plane).into_raw(), vec![2, 1, 4, 3]);
    }

    #[test]
    fn mirrored_crop_has_expanded_shape() {
        let plane = GrayImage::from_fn(8, 8, |x, y| Luma([(x + 8 * y) as u8]));

        let patch = mirrored_crop(&plane, Window::new(0, 4, 4, 8), [2, 2]);

        assert_eq!(patch.dimensions(), (8, 8));
        // row -1 mirrors row 1, column 8 mirrors column 6
        assert_eq!(patch.get_pixel(2, 1)[0], 8 + 4);
        assert_eq!(patch.get_pixel(6, 2)[0], 6);
    }
}
