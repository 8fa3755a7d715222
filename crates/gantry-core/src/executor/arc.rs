use crate::hal::ArcSpec;
use gantry_gcode::{Axes, LineWords, Plane, Status, WordFlags};

/// Largest accepted difference between the start and end radius of an
/// offset-mode arc, in millimeters.
pub const RADIUS_TOLERANCE: f64 = 0.002;

/// Resolves the center of a G2/G3 move from `start` to `target`.
///
/// With an `R` word the center is solved from the chord; a negative radius
/// selects the arc longer than a half circle. Otherwise `I`/`J`/`K` give
/// the center and both ends must lie on the same circle.
pub fn resolve(
    start: &Axes,
    target: &Axes,
    words: &LineWords,
    plane: Plane,
    clockwise: bool,
) -> Result<ArcSpec, Status> {
    let axes = plane.axes();
    let (offset_a, offset_b) = plane.offsets();
    let x = target[axes.0] - start[axes.0];
    let y = target[axes.1] - start[axes.1];

    let (center, radius) = if words.has(WordFlags::R) {
        radius_center(x, y, words.r, clockwise)?
    } else {
        let center = (words.ijk[offset_a], words.ijk[offset_b]);
        let radius = center.0.hypot(center.1);
        let end_radius = (x - center.0).hypot(y - center.1);
        if (radius - end_radius).abs() > RADIUS_TOLERANCE {
            return Err(Status::InvalidTarget);
        }
        (center, radius)
    };

    Ok(ArcSpec {
        center,
        radius,
        axes,
        clockwise,
    })
}

fn radius_center(x: f64, y: f64, r: f64, clockwise: bool) -> Result<((f64, f64), f64), Status> {
    if x == 0.0 && y == 0.0 {
        return Err(Status::InvalidTarget);
    }

    let chord_sq = x * x + y * y;
    let h = 4.0 * r * r - chord_sq;
    if h < 0.0 {
        return Err(Status::ArcRadiusError);
    }

    let mut factor = -(h / chord_sq).sqrt();
    if !clockwise {
        factor = -factor;
    }
    if r < 0.0 {
        factor = -factor;
    }

    let center = ((x - y * factor) / 2.0, (y + x * factor) / 2.0);
    Ok((center, r.abs()))
}
