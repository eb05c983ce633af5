//! Route photos and the route-line overlays drawn on them.

use serde::{Deserialize, Serialize};

/// A point in image pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn midpoint(&self, other: &Point) -> Point {
        Point {
            x: (self.x + other.x) / 2.0,
            y: (self.y + other.y) / 2.0,
        }
    }
}

/// Summary of the climb a route line is linked to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClimbSummary {
    pub id: String,
    pub name: String,
    pub grade: Option<String>,
    #[serde(default)]
    pub route_type: Option<String>,
}

/// One route drawn over a photo.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteLine {
    pub id: String,
    #[serde(default)]
    pub points: Vec<Point>,
    #[serde(default = "default_color")]
    pub color: String,
    /// Embedded as `climbs` by the backend's resource embedding.
    #[serde(default, alias = "climbs")]
    pub climb: Option<ClimbSummary>,
}

fn default_color() -> String {
    "#ff0000".to_string()
}

/// A route photo belonging to a crag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRecord {
    pub id: String,
    pub crag_id: String,
    pub url: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    #[serde(default)]
    pub verification_count: i64,
    #[serde(default)]
    pub flag_count: i64,
    #[serde(default)]
    pub route_lines: Vec<RouteLine>,
}

impl ImageRecord {
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        match (self.width, self.height) {
            (Some(w), Some(h)) => Some((w, h)),
            _ => None,
        }
    }

    pub fn coordinates(&self) -> Option<(f64, f64)> {
        match (self.longitude, self.latitude) {
            (Some(lng), Some(lat)) => Some((lng, lat)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_line_from_backend_embedding() {
        let json = r#"{
            "id": "r1",
            "points": [{"x": 1, "y": 2}, {"x": 3.5, "y": 4}],
            "climbs": {"id": "cl1", "name": "Arête", "grade": "6a"}
        }"#;
        let line: RouteLine = serde_json::from_str(json).unwrap();
        assert_eq!(line.points.len(), 2);
        assert_eq!(line.color, "#ff0000");
        assert_eq!(line.climb.unwrap().name, "Arête");
    }

    #[test]
    fn test_midpoint() {
        let mid = Point::new(0.0, 0.0).midpoint(&Point::new(10.0, 5.0));
        assert_eq!(mid, Point::new(5.0, 2.5));
    }
}
