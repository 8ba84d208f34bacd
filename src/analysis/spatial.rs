use crate::core::{Centroid, CropWindow};
use ndarray::ArrayView2;

/// Centre of mass of each spatial footprint.
///
/// `spatial` is pixels × cells with pixels in column-major order over the
/// cropped field of view (`dims` = rows, cols). The crop offset is added back
/// so centroids are reported in full-frame coordinates. A footprint with no
/// weight yields NaN coordinates.
pub fn centers_of_mass(
    spatial: ArrayView2<'_, f64>,
    dims: (usize, usize),
    crop: &CropWindow,
) -> Vec<Centroid> {
    let (rows, _) = dims;
    spatial
        .columns()
        .into_iter()
        .map(|footprint| {
            let mut total = 0.0;
            let mut sum_x = 0.0;
            let mut sum_y = 0.0;
            for (idx, w) in footprint.iter().enumerate() {
                if *w == 0.0 {
                    continue;
                }
                let y = (idx % rows.max(1)) as f64;
                let x = (idx / rows.max(1)) as f64;
                total += w;
                sum_x += w * x;
                sum_y += w * y;
            }
            if total == 0.0 {
                Centroid {
                    x: f64::NAN,
                    y: f64::NAN,
                }
            } else {
                Centroid {
                    x: sum_x / total + crop.x_start as f64,
                    y: sum_y / total + crop.y_start as f64,
                }
            }
        })
        .collect()
}
