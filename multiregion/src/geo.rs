//! Location to region policy
//!
//! The geospatial index itself is external and reached through
//! [`RegionIndex`]. This module maps its region names onto LoRaWAN plans
//! and decides which plan a GPS fix belongs to.

use heapless::Vec;

use crate::{config::GeoConfig, lorawan::region::Region};

/// Region identifier of the geospatial index, 0 = no region
pub type GeoRegionId = u16;

/// Most candidates a nearest-region query returns
pub const MAX_NEAREST: usize = 8;

/// Candidate returned by a nearest-region query
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NearestRegion {
    /// Index region identifier
    pub id: GeoRegionId,
    /// Index region name, e.g. `"AS923-1"`
    pub name: &'static str,
    /// Distance from the query point in kilometres
    pub distance_km: f32,
}

/// Geospatial region lookup
pub trait RegionIndex {
    /// Region containing the point, 0 if none
    fn lat_lng_to_region(&self, lat: f64, lon: f64) -> GeoRegionId;

    /// Regions found within `rings` cells of the point, nearest first
    fn find_nearest_regions(&self, lat: f64, lon: f64, rings: u8) -> Vec<NearestRegion, MAX_NEAREST>;

    /// Name of an index region
    fn region_name(&self, id: GeoRegionId) -> &'static str;
}

/// LoRaWAN plan for an index region name. All AS923 sub-plans collapse to
/// [`Region::AS923`].
pub fn region_from_name(name: &str) -> Option<Region> {
    let region = match name {
        "AS923-1" | "AS923-1B" | "AS923-1C" | "AS923-2" | "AS923-3" | "AS923-4" => Region::AS923,
        "US915" => Region::US915,
        "EU868" => Region::EU868,
        "AU915" => Region::AU915,
        "CN470" => Region::CN470,
        "CN779" => Region::CN779,
        "KR920" => Region::KR920,
        "IN865" => Region::IN865,
        "RU864" => Region::RU864,
        "EU433" => Region::EU433,
        _ => return None,
    };
    Some(region)
}

/// Whether a GPS fix is usable
pub fn valid_coordinates(lat: f32, lon: f32) -> bool {
    lat.is_finite() && lon.is_finite() && (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon)
}

/// Region for a GPS fix.
///
/// A direct hit in the index wins. Outside every region the search widens
/// one ring at a time up to `config.max_rings` and takes the nearest
/// mapped candidate within `config.max_distance_km`. With nothing found
/// `current` is returned.
pub fn detect_region<G: RegionIndex>(
    index: &G,
    config: &GeoConfig,
    lat: f32,
    lon: f32,
    current: Option<Region>,
) -> Option<Region> {
    let (lat, lon) = (lat as f64, lon as f64);

    let id = index.lat_lng_to_region(lat, lon);
    if id != 0 {
        let name = index.region_name(id);
        return match region_from_name(name) {
            Some(region) => {
                debug!("Location inside {} -> {}", name, region.name());
                Some(region)
            }
            None => {
                info!("Unknown index region {}, keeping current", name);
                current
            }
        };
    }

    for rings in 1..=config.max_rings {
        let candidates = index.find_nearest_regions(lat, lon, rings);
        if candidates.is_empty() {
            continue;
        }
        let nearest = candidates
            .iter()
            .filter(|c| c.distance_km < config.max_distance_km)
            .filter_map(|c| region_from_name(c.name).map(|r| (r, c)))
            .min_by(|(_, a), (_, b)| a.distance_km.total_cmp(&b.distance_km));
        return match nearest {
            Some((region, candidate)) => {
                debug!(
                    "Outside regions, nearest {} at {} km ({} rings)",
                    candidate.name, candidate.distance_km, rings
                );
                Some(region)
            }
            None => {
                debug!("No mapped region within range, keeping current");
                current
            }
        };
    }

    debug!("No region found near fix, keeping current");
    current
}

#[cfg(test)]
mod tests {
    use super::*;

    /// One region hit for the exact point (1, 1); a ring search that only
    /// finds candidates from ring 2 on.
    struct Fixed {
        nearest: &'static [(GeoRegionId, &'static str, f32)],
    }

    impl RegionIndex for Fixed {
        fn lat_lng_to_region(&self, lat: f64, lon: f64) -> GeoRegionId {
            if lat == 1.0 && lon == 1.0 {
                3
            } else {
                0
            }
        }

        fn find_nearest_regions(&self, _lat: f64, _lon: f64, rings: u8) -> Vec<NearestRegion, MAX_NEAREST> {
            let mut out = Vec::new();
            if rings >= 2 {
                for &(id, name, distance_km) in self.nearest {
                    let _ = out.push(NearestRegion { id, name, distance_km });
                }
            }
            out
        }

        fn region_name(&self, id: GeoRegionId) -> &'static str {
            match id {
                3 => "AS923-2",
                _ => "",
            }
        }
    }

    #[test]
    fn as923_subplans_collapse() {
        for name in ["AS923-1", "AS923-1B", "AS923-1C", "AS923-2", "AS923-3", "AS923-4"] {
            assert_eq!(region_from_name(name), Some(Region::AS923));
        }
        assert_eq!(region_from_name("EU868"), Some(Region::EU868));
        assert_eq!(region_from_name("CD900-1A"), None);
    }

    #[test]
    fn direct_hit_wins() {
        let index = Fixed { nearest: &[] };
        let region = detect_region(&index, &GeoConfig::default(), 1.0, 1.0, Some(Region::US915));
        assert_eq!(region, Some(Region::AS923));
    }

    #[test]
    fn nearest_mapped_candidate_within_cap() {
        let index = Fixed {
            nearest: &[(9, "CD900-1A", 10.0), (7, "KR920", 120.0), (8, "EU868", 80.0)],
        };
        let region = detect_region(&index, &GeoConfig::default(), 0.0, 0.0, Some(Region::US915));
        assert_eq!(region, Some(Region::EU868));
    }

    #[test]
    fn nothing_within_cap_keeps_current() {
        let index = Fixed {
            nearest: &[(7, "KR920", 650.0)],
        };
        let region = detect_region(&index, &GeoConfig::default(), 0.0, 0.0, Some(Region::US915));
        assert_eq!(region, Some(Region::US915));

        let narrow = GeoConfig { max_rings: 1, ..GeoConfig::default() };
        let index = Fixed {
            nearest: &[(7, "KR920", 5.0)],
        };
        assert_eq!(detect_region(&index, &narrow, 0.0, 0.0, None), None);
    }

    #[test]
    fn coordinate_ranges() {
        assert!(valid_coordinates(37.77, -122.42));
        assert!(valid_coordinates(-90.0, 180.0));
        assert!(!valid_coordinates(90.5, 0.0));
        assert!(!valid_coordinates(0.0, -180.1));
        assert!(!valid_coordinates(f32::NAN, 0.0));
    }
}
