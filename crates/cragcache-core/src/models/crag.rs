//! Crag models and their offline metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Earth radius used by the Web Mercator projection (EPSG:3857), in metres.
const WEB_MERCATOR_RADIUS: f64 = 6_378_137.0;

/// Latitude limit of the Web Mercator projection.
const WEB_MERCATOR_MAX_LAT: f64 = 85.051_128_78;

/// An axis-aligned bounding box. Geographic boxes are in degrees,
/// projected boxes in Web Mercator metres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl BoundingBox {
    /// Smallest box containing every `(lng, lat)` pair, or `None` when empty.
    pub fn from_coords<I>(coords: I) -> Option<Self>
    where
        I: IntoIterator<Item = (f64, f64)>,
    {
        let mut iter = coords.into_iter();
        let (lng, lat) = iter.next()?;
        let mut bbox = Self {
            west: lng,
            south: lat,
            east: lng,
            north: lat,
        };
        for (lng, lat) in iter {
            bbox.west = bbox.west.min(lng);
            bbox.east = bbox.east.max(lng);
            bbox.south = bbox.south.min(lat);
            bbox.north = bbox.north.max(lat);
        }
        Some(bbox)
    }

    /// Grow the box by `degrees` on every side.
    pub fn padded(&self, degrees: f64) -> Self {
        Self {
            west: self.west - degrees,
            south: self.south - degrees,
            east: self.east + degrees,
            north: self.north + degrees,
        }
    }

    /// Project a geographic box to Web Mercator metres.
    pub fn to_web_mercator(&self) -> Self {
        let (west, south) = project(self.west, self.south);
        let (east, north) = project(self.east, self.north);
        Self {
            west,
            south,
            east,
            north,
        }
    }

    pub fn contains(&self, lng: f64, lat: f64) -> bool {
        lng >= self.west && lng <= self.east && lat >= self.south && lat <= self.north
    }
}

fn project(lng: f64, lat: f64) -> (f64, f64) {
    let lat = lat.clamp(-WEB_MERCATOR_MAX_LAT, WEB_MERCATOR_MAX_LAT);
    let x = WEB_MERCATOR_RADIUS * lng.to_radians();
    let y = WEB_MERCATOR_RADIUS * (std::f64::consts::FRAC_PI_4 + lat.to_radians() / 2.0).tan().ln();
    (x, y)
}

/// Identifies a crag downloaded for offline use.
///
/// Overwritten on re-download and deleted when the offline copy is removed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CragMeta {
    pub id: String,
    pub name: String,
    pub downloaded_at: DateTime<Utc>,
    pub bounds: BoundingBox,
    pub projected_bounds: BoundingBox,
    /// Asset cache key (request URL) of the map screenshot, if one was cached.
    pub screenshot_url: Option<String>,
    pub screenshot_updated_at: Option<DateTime<Utc>>,
}

impl CragMeta {
    pub fn age_minutes(&self) -> i64 {
        (Utc::now() - self.downloaded_at).num_minutes()
    }

    pub fn age_display(&self) -> String {
        let minutes = self.age_minutes();
        if minutes < 1 {
            // Also covers clock skew
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            let hours = minutes / 60;
            if minutes % 60 >= 30 {
                format!("{}h ago", hours + 1)
            } else {
                format!("{}h ago", hours)
            }
        } else {
            let days = minutes / 1440;
            if (minutes % 1440) / 60 >= 12 {
                format!("{}d ago", days + 1)
            } else {
                format!("{}d ago", days)
            }
        }
    }
}

/// Descriptive attributes of a crag, as stored in the `crags` table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CragRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub slug: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    #[serde(default)]
    pub region_id: Option<String>,
    #[serde(default)]
    pub region_name: Option<String>,
    #[serde(default)]
    pub access_notes: Option<String>,
    #[serde(default)]
    pub rock_type: Option<String>,
    /// Boundary polygon as `[lng, lat]` pairs.
    #[serde(default)]
    pub boundary: Option<Vec<[f64; 2]>>,
}

impl CragRecord {
    /// Geographic bounds from the boundary polygon, falling back to the
    /// crag's own coordinates.
    pub fn bounds(&self) -> Option<BoundingBox> {
        if let Some(ref boundary) = self.boundary {
            if let Some(bbox) = BoundingBox::from_coords(boundary.iter().map(|p| (p[0], p[1]))) {
                return Some(bbox);
            }
        }
        match (self.longitude, self.latitude) {
            (Some(lng), Some(lat)) => BoundingBox::from_coords([(lng, lat)]),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn meta_aged(minutes: i64) -> CragMeta {
        let bounds = BoundingBox {
            west: 0.0,
            south: 0.0,
            east: 1.0,
            north: 1.0,
        };
        CragMeta {
            id: "c1".to_string(),
            name: "Test".to_string(),
            downloaded_at: Utc::now() - Duration::minutes(minutes),
            bounds,
            projected_bounds: bounds.to_web_mercator(),
            screenshot_url: None,
            screenshot_updated_at: None,
        }
    }

    #[test]
    fn test_age_display() {
        assert_eq!(meta_aged(0).age_display(), "just now");
        assert_eq!(meta_aged(5).age_display(), "5m ago");
        assert_eq!(meta_aged(95).age_display(), "2h ago");
        assert_eq!(meta_aged(60 * 24 * 3 + 60).age_display(), "3d ago");
    }

    #[test]
    fn test_bounds_from_boundary() {
        let crag = CragRecord {
            id: "c1".to_string(),
            name: "Les Pres".to_string(),
            boundary: Some(vec![[-2.6, 49.4], [-2.5, 49.5], [-2.55, 49.45]]),
            ..Default::default()
        };
        let bbox = crag.bounds().unwrap();
        assert_eq!(bbox.west, -2.6);
        assert_eq!(bbox.east, -2.5);
        assert_eq!(bbox.south, 49.4);
        assert_eq!(bbox.north, 49.5);
    }

    #[test]
    fn test_bounds_fallback_to_point() {
        let crag = CragRecord {
            id: "c1".to_string(),
            name: "Solo".to_string(),
            latitude: Some(49.45),
            longitude: Some(-2.58),
            ..Default::default()
        };
        let bbox = crag.bounds().unwrap();
        assert!(bbox.contains(-2.58, 49.45));
        assert!(CragRecord::default().bounds().is_none());
    }

    #[test]
    fn test_web_mercator_origin() {
        let bbox = BoundingBox {
            west: 0.0,
            south: 0.0,
            east: 180.0,
            north: 0.0,
        };
        let projected = bbox.to_web_mercator();
        assert!(projected.west.abs() < 1e-6);
        assert!(projected.south.abs() < 1e-6);
        assert!((projected.east - 20_037_508.342_789_244).abs() < 1e-3);
    }
}
