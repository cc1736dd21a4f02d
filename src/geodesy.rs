//! Small-distance geodesy helpers shared by the drift filter, the estimators
//! and dead reckoning.

/// Mean Earth radius [m]
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Meters per degree of latitude (flat-earth approximation)
pub const METERS_PER_DEGREE_LAT: f64 = 111_111.0;

/// Below this |cos(lat)| the longitude offset is undefined (poles).
const MIN_COS_LAT: f64 = 1e-9;

/// Great-circle distance between two points [m].
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).max(0.0).sqrt());
    EARTH_RADIUS_M * c
}

/// Move a point `distance_m` along `heading_deg` (clockwise from north).
///
/// Flat-earth approximation, valid for the few tens of meters covered between
/// fixes. The longitude offset is skipped at the poles.
pub fn offset_position(lat: f64, lon: f64, distance_m: f64, heading_deg: f64) -> (f64, f64) {
    let heading = heading_deg.to_radians();
    let d_lat = distance_m * heading.cos() / METERS_PER_DEGREE_LAT;
    let cos_lat = lat.to_radians().cos();
    let d_lon = if cos_lat.abs() < MIN_COS_LAT {
        0.0
    } else {
        distance_m * heading.sin() / (METERS_PER_DEGREE_LAT * cos_lat)
    };
    (lat + d_lat, lon + d_lon)
}

/// Decompose ground speed + heading into (vel_lat, vel_lng) [deg/s].
pub fn velocity_components(speed_mps: f64, heading_deg: f64, lat: f64) -> (f64, f64) {
    let heading = heading_deg.to_radians();
    let v_lat = speed_mps * heading.cos() / METERS_PER_DEGREE_LAT;
    let cos_lat = lat.to_radians().cos();
    let v_lng = if cos_lat.abs() < MIN_COS_LAT {
        0.0
    } else {
        speed_mps * heading.sin() / (METERS_PER_DEGREE_LAT * cos_lat)
    };
    (v_lat, v_lng)
}

/// Convert a standard deviation in meters to a variance in degrees².
pub fn meters_std_to_deg_var(std_m: f64) -> f64 {
    let std_deg = std_m / METERS_PER_DEGREE_LAT;
    std_deg * std_deg
}

/// Wrap any angle into [0, 360).
pub fn normalize_heading(deg: f64) -> f64 {
    let wrapped = deg.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360.0 for tiny negative inputs
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}
