use crate::coordinate::Coordinate;

pub const EARTH_RADIUS_M: f64 = 6_372_800.0;

pub fn haversine_m(p1: Coordinate, p2: Coordinate) -> f64 {
    let d_lat = (p2.lat() - p1.lat()).to_radians();
    let d_lon = (p2.lng() - p1.lng()).to_radians();
    let lat1 = p1.lat().to_radians();
    let lat2 = p2.lat().to_radians();

    let a = f64::sin(d_lat / 2.).powi(2)
        + f64::cos(lat1) * f64::cos(lat2) * f64::sin(d_lon / 2.).powi(2);
    let c = 2. * f64::asin(f64::sqrt(a.min(1.)));

    EARTH_RADIUS_M * c
}

/// Initial bearing from `from` to `to` in degrees, normalized to [0, 360).
pub fn bearing_deg(from: Coordinate, to: Coordinate) -> f64 {
    let lat1 = from.lat().to_radians();
    let lat2 = to.lat().to_radians();
    let d_lon = (to.lng() - from.lng()).to_radians();

    let y = d_lon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * d_lon.cos();

    (y.atan2(x).to_degrees() + 360.) % 360.
}

/// Signed difference `to - from` between two bearings, in (-180, 180].
pub fn bearing_delta(from: f64, to: f64) -> f64 {
    let mut delta = (to - from) % 360.;
    if delta > 180. {
        delta -= 360.;
    } else if delta <= -180. {
        delta += 360.;
    }
    delta
}

pub fn path_length_m(path: &[Coordinate]) -> f64 {
    path.windows(2).map(|w| haversine_m(w[0], w[1])).sum()
}

/// Where a point lands on a polyline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathProjection {
    /// Index of the segment start vertex.
    pub segment: usize,
    /// Position along that segment, 0 at its start and 1 at its end.
    pub fraction: f64,
    /// Distance between the point and the polyline.
    pub offset_m: f64,
    /// Distance along the polyline from its first vertex to the projection.
    pub along_m: f64,
}

/// Projects `point` onto the closest segment of `path`.
///
/// Segments are flattened with an equirectangular approximation centred on
/// the point, which is accurate to well under a meter at campus scale.
pub fn project_onto_path(point: Coordinate, path: &[Coordinate]) -> Option<PathProjection> {
    match path {
        [] => None,
        [only] => Some(PathProjection {
            segment: 0,
            fraction: 0.,
            offset_m: haversine_m(point, *only),
            along_m: 0.,
        }),
        _ => {
            let cos_lat = point.lat().to_radians().cos();
            let to_local = |c: Coordinate| {
                (
                    (c.lng() - point.lng()).to_radians() * cos_lat * EARTH_RADIUS_M,
                    (c.lat() - point.lat()).to_radians() * EARTH_RADIUS_M,
                )
            };

            let mut best: Option<PathProjection> = None;
            let mut walked = 0.;

            for (i, w) in path.windows(2).enumerate() {
                let (ax, ay) = to_local(w[0]);
                let (bx, by) = to_local(w[1]);
                let (dx, dy) = (bx - ax, by - ay);
                let len_sq = dx * dx + dy * dy;

                let t = if len_sq == 0. {
                    0.
                } else {
                    (-(ax * dx + ay * dy) / len_sq).clamp(0., 1.)
                };

                let (cx, cy) = (ax + t * dx, ay + t * dy);
                let offset_m = (cx * cx + cy * cy).sqrt();
                let segment_len = haversine_m(w[0], w[1]);

                if best.map_or(true, |b| offset_m < b.offset_m) {
                    best = Some(PathProjection {
                        segment: i,
                        fraction: t,
                        offset_m,
                        along_m: walked + t * segment_len,
                    });
                }

                walked += segment_len;
            }

            best
        }
    }
}
