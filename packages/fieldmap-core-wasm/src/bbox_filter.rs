use crate::geojson_features::{Feature, Geometry, Position};

/// Axis-aligned extent in geographic degrees
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x_min: f64,
    pub y_min: f64,
    pub x_max: f64,
    pub y_max: f64,
}

impl Default for BoundingBox {
    fn default() -> Self {
        BoundingBox::empty()
    }
}

impl BoundingBox {
    /// Box that contains nothing; extending it with a point yields that point.
    pub fn empty() -> Self {
        BoundingBox {
            x_min: f64::INFINITY,
            y_min: f64::INFINITY,
            x_max: f64::NEG_INFINITY,
            y_max: f64::NEG_INFINITY,
        }
    }

    pub fn from_positions<'a>(positions: impl IntoIterator<Item = &'a Position>) -> Self {
        let mut bbox = BoundingBox::empty();
        for p in positions {
            bbox.extend(p);
        }
        bbox
    }

    /// Extent of every coordinate of every feature
    pub fn from_features(features: &[Feature]) -> Self {
        let mut bbox = BoundingBox::empty();
        for feature in features {
            for p in feature.geometry.iter().flat_map(Geometry::positions) {
                bbox.extend(&p);
            }
        }
        bbox
    }

    pub fn extend(&mut self, p: &Position) {
        self.x_min = self.x_min.min(p.x);
        self.y_min = self.y_min.min(p.y);
        self.x_max = self.x_max.max(p.x);
        self.y_max = self.y_max.max(p.y);
    }

    pub fn is_empty(&self) -> bool {
        self.x_min > self.x_max || self.y_min > self.y_max
    }

    // Edges count as inside
    pub fn contains(&self, p: &Position) -> bool {
        p.x >= self.x_min && p.x <= self.x_max && p.y >= self.y_min && p.y <= self.y_max
    }

    pub fn overlaps(&self, other: &BoundingBox) -> bool {
        if self.is_empty() || other.is_empty() {
            return false;
        }
        !(other.x_max < self.x_min
            || other.x_min > self.x_max
            || other.y_max < self.y_min
            || other.y_min > self.y_max)
    }
}

/// Signed shoelace area: positive for counter-clockwise rings,
/// negative for clockwise ones.
pub fn ring_signed_area(ring: &[Position]) -> f64 {
    let n = ring.len();
    if n < 3 {
        return 0.0;
    }
    let mut area = 0.0;
    for i in 0..n {
        let j = (i + 1) % n;
        area += ring[i].x * ring[j].y - ring[j].x * ring[i].y;
    }
    area * 0.5
}

// Ray casting; points exactly on an edge may land on either side
pub fn is_point_in_ring(point: &Position, ring: &[Position]) -> bool {
    let mut inside = false;
    let n = ring.len();
    if n < 3 {
        return false;
    }

    for i in 0..n {
        let j = (i + 1) % n;
        let (xi, yi) = (ring[i].x, ring[i].y);
        let (xj, yj) = (ring[j].x, ring[j].y);

        let crosses = ((yi > point.y) != (yj > point.y))
            && (point.x < (xj - xi) * (point.y - yi) / (yj - yi) + xi);
        if crosses {
            inside = !inside;
        }
    }

    inside
}
