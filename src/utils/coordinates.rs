use crate::utils::constants::EARTH_RADIUS_KM;

/// Calculate the great-circle distance in kilometres between two points using
/// the haversine formula.
///
/// NaN in any coordinate yields NaN.
///
/// # Examples
/// ```
/// use tempo_validation::utils::haversine_distance;
///
/// let km = haversine_distance(40.7128, -74.0060, 39.9526, -75.1652);
/// assert!((km - 129.6).abs() < 1.0);
/// ```
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);

    // Rounding can push `a` marginally above 1 for antipodal points.
    // Written as a comparison so NaN is not swallowed the way `f64::min` would.
    let a = if a > 1.0 { 1.0 } else { a };
    let c = 2.0 * a.sqrt().asin();

    EARTH_RADIUS_KM * c
}

/// Distances from one point to many points given as parallel coordinate slices.
///
/// The output has the length of the shorter of `lats` and `lons`.
pub fn haversine_to_many(lat: f64, lon: f64, lats: &[f64], lons: &[f64]) -> Vec<f64> {
    lats.iter()
        .zip(lons)
        .map(|(&lat2, &lon2)| haversine_distance(lat, lon, lat2, lon2))
        .collect()
}

/// Element-wise distances between two sets of points given as parallel slices.
pub fn haversine_pairwise(lats1: &[f64], lons1: &[f64], lats2: &[f64], lons2: &[f64]) -> Vec<f64> {
    lats1
        .iter()
        .zip(lons1)
        .zip(lats2.iter().zip(lons2))
        .map(|((&lat1, &lon1), (&lat2, &lon2))| haversine_distance(lat1, lon1, lat2, lon2))
        .collect()
}

/// True when both values are finite and inside the WGS84 latitude/longitude ranges
pub fn is_valid_coordinate(latitude: f64, longitude: f64) -> bool {
    latitude.is_finite()
        && longitude.is_finite()
        && (-90.0..=90.0).contains(&latitude)
        && (-180.0..=180.0).contains(&longitude)
}
