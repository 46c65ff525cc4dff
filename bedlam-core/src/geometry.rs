//! 2D/3D primitives used by the scene and the arrangement engine.
//!
//! Everything is `f64` millimetres. The 2D side (polygons, hulls, calipers)
//! exists to answer one question: what footprint does a placed object throw
//! onto the bed?

/// A 2D point / vector, in millimetres.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}
impl Point {
    #[must_use]
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
    #[must_use]
    pub fn rotated(self, angle: f64) -> Self {
        let (sin, cos) = angle.sin_cos();
        Self {
            x: self.x * cos - self.y * sin,
            y: self.x * sin + self.y * cos,
        }
    }
}
impl std::ops::Add for Point {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}
impl std::ops::Sub for Point {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }
}

/// A 3D point / vector, in millimetres.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}
impl Vec3 {
    pub const ZERO: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };
    #[must_use]
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
    #[must_use]
    pub fn splat(v: f64) -> Self {
        Self::new(v, v, v)
    }
    /// Drop the z component.
    #[must_use]
    pub fn xy(self) -> Point {
        Point::new(self.x, self.y)
    }
}

/// Placement of an instance: mirror, then scale, then XYZ euler rotation,
/// then translation. Mirror components are `1.0` or `-1.0`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Transform3 {
    pub translation: Vec3,
    /// Euler angles in radians, applied X, then Y, then Z.
    pub rotation: Vec3,
    pub scale: Vec3,
    pub mirror: Vec3,
}
impl Default for Transform3 {
    fn default() -> Self {
        Self {
            translation: Vec3::ZERO,
            rotation: Vec3::ZERO,
            scale: Vec3::splat(1.0),
            mirror: Vec3::splat(1.0),
        }
    }
}
impl Transform3 {
    #[must_use]
    pub fn apply(&self, p: Vec3) -> Vec3 {
        let p = Vec3::new(
            p.x * self.scale.x * self.mirror.x,
            p.y * self.scale.y * self.mirror.y,
            p.z * self.scale.z * self.mirror.z,
        );
        // X
        let (sx, cx) = self.rotation.x.sin_cos();
        let p = Vec3::new(p.x, p.y * cx - p.z * sx, p.y * sx + p.z * cx);
        // Y
        let (sy, cy) = self.rotation.y.sin_cos();
        let p = Vec3::new(p.x * cy + p.z * sy, p.y, -p.x * sy + p.z * cy);
        // Z
        let (sz, cz) = self.rotation.z.sin_cos();
        let p = Vec3::new(p.x * cz - p.y * sz, p.x * sz + p.y * cz, p.z);
        p + self.translation
    }
}
impl std::ops::Add for Vec3 {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

/// Axis-aligned 2D box. `min > max` means empty.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BoundingBox {
    pub min: Point,
    pub max: Point,
}
impl Default for BoundingBox {
    fn default() -> Self {
        Self {
            min: Point::new(f64::INFINITY, f64::INFINITY),
            max: Point::new(f64::NEG_INFINITY, f64::NEG_INFINITY),
        }
    }
}
impl BoundingBox {
    #[must_use]
    pub fn of(points: impl IntoIterator<Item = Point>) -> Self {
        let mut bb = Self::default();
        for p in points {
            bb.merge(p);
        }
        bb
    }
    pub fn merge(&mut self, p: Point) {
        self.min.x = self.min.x.min(p.x);
        self.min.y = self.min.y.min(p.y);
        self.max.x = self.max.x.max(p.x);
        self.max.y = self.max.y.max(p.y);
    }
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y
    }
    #[must_use]
    pub fn width(&self) -> f64 {
        (self.max.x - self.min.x).max(0.0)
    }
    #[must_use]
    pub fn height(&self) -> f64 {
        (self.max.y - self.min.y).max(0.0)
    }
    #[must_use]
    pub fn center(&self) -> Point {
        Point::new(
            (self.min.x + self.max.x) * 0.5,
            (self.min.y + self.max.y) * 0.5,
        )
    }
    /// Grow by `d` on every side. Negative `d` shrinks.
    #[must_use]
    pub fn inflated(&self, d: f64) -> Self {
        Self {
            min: Point::new(self.min.x - d, self.min.y - d),
            max: Point::new(self.max.x + d, self.max.y + d),
        }
    }
    #[must_use]
    pub fn translated(&self, d: Point) -> Self {
        Self {
            min: self.min + d,
            max: self.max + d,
        }
    }
    /// The same box, moved so its min corner sits at `pos`.
    #[must_use]
    pub fn at(&self, pos: Point) -> Self {
        self.translated(pos - self.min)
    }
    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        self.min.x < other.max.x
            && other.min.x < self.max.x
            && self.min.y < other.max.y
            && other.min.y < self.max.y
    }
    #[must_use]
    pub fn contains_box(&self, other: &Self) -> bool {
        self.min.x <= other.min.x
            && self.min.y <= other.min.y
            && self.max.x >= other.max.x
            && self.max.y >= other.max.y
    }
}

/// A simple polygon, counter-clockwise, implicitly closed.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Polygon {
    pub points: Vec<Point>,
}
impl Polygon {
    #[must_use]
    pub fn new(points: Vec<Point>) -> Self {
        Self { points }
    }
    /// Axis-aligned rectangle from `(0, 0)` to `(w, h)`.
    #[must_use]
    pub fn rectangle(w: f64, h: f64) -> Self {
        Self::new(vec![
            Point::new(0.0, 0.0),
            Point::new(w, 0.0),
            Point::new(w, h),
            Point::new(0.0, h),
        ])
    }
    #[must_use]
    pub fn bounding_box(&self) -> BoundingBox {
        BoundingBox::of(self.points.iter().copied())
    }
    /// Signed area via the shoelace formula. Positive when counter-clockwise.
    #[must_use]
    pub fn area(&self) -> f64 {
        let n = self.points.len();
        if n < 3 {
            return 0.0;
        }
        let mut acc = 0.0;
        for i in 0..n {
            let a = self.points[i];
            let b = self.points[(i + 1) % n];
            acc += a.x * b.y - b.x * a.y;
        }
        acc * 0.5
    }
    #[must_use]
    pub fn rotated(&self, angle: f64) -> Self {
        Self::new(self.points.iter().map(|p| p.rotated(angle)).collect())
    }
    #[must_use]
    pub fn translated(&self, d: Point) -> Self {
        Self::new(self.points.iter().map(|&p| p + d).collect())
    }
    /// A polygon is degenerate if it has fewer than three vertices, any
    /// non-finite coordinate, or (numerically) zero area.
    #[must_use]
    pub fn is_degenerate(&self) -> bool {
        self.points.len() < 3
            || self
                .points
                .iter()
                .any(|p| !p.x.is_finite() || !p.y.is_finite())
            || self.area().abs() < 1e-9
    }
}

fn cross(o: Point, a: Point, b: Point) -> f64 {
    (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x)
}

/// Convex hull of a point cloud, as a counter-clockwise polygon.
/// Collinear points on the hull boundary are dropped. Fewer than three
/// distinct input points yield a degenerate polygon.
#[must_use]
pub fn convex_hull(points: &[Point]) -> Polygon {
    let mut pts: Vec<Point> = points.to_vec();
    pts.sort_by(|a, b| a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y)));
    pts.dedup_by(|a, b| a.x == b.x && a.y == b.y);
    if pts.len() < 3 {
        return Polygon::new(pts);
    }
    // Andrew monotone chain: lower then upper.
    let mut lower: Vec<Point> = Vec::with_capacity(pts.len());
    for &p in &pts {
        while lower.len() >= 2 && cross(lower[lower.len() - 2], lower[lower.len() - 1], p) <= 0.0 {
            lower.pop();
        }
        lower.push(p);
    }
    let mut upper: Vec<Point> = Vec::with_capacity(pts.len());
    for &p in pts.iter().rev() {
        while upper.len() >= 2 && cross(upper[upper.len() - 2], upper[upper.len() - 1], p) <= 0.0 {
            upper.pop();
        }
        upper.push(p);
    }
    // Endpoints of each chain repeat as the start of the other.
    lower.pop();
    upper.pop();
    lower.extend(upper);
    Polygon::new(lower)
}

/// Minimum-area oriented bounding box of a convex polygon, found by
/// rotating calipers over the hull edges.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct MinAreaBoundingBox {
    angle: f64,
    width: f64,
    height: f64,
}
impl MinAreaBoundingBox {
    /// `hull` must already be convex (see [`convex_hull`]). A degenerate
    /// input yields a zero-size box with angle 0.
    #[must_use]
    pub fn from_hull(hull: &Polygon) -> Self {
        let n = hull.points.len();
        if n < 3 {
            let bb = hull.bounding_box();
            return Self {
                angle: 0.0,
                width: bb.width().max(0.0),
                height: bb.height().max(0.0),
            };
        }
        let mut best = Self {
            angle: 0.0,
            width: f64::INFINITY,
            height: f64::INFINITY,
        };
        let mut best_area = f64::INFINITY;
        for i in 0..n {
            let a = hull.points[i];
            let b = hull.points[(i + 1) % n];
            let edge_angle = (b.y - a.y).atan2(b.x - a.x);
            // Rotate so this edge lies along +X, then measure the AABB.
            let bb = hull.rotated(-edge_angle).bounding_box();
            let area = bb.width() * bb.height();
            if area < best_area {
                best_area = area;
                best = Self {
                    angle: -edge_angle,
                    width: bb.width(),
                    height: bb.height(),
                };
            }
        }
        best
    }
    /// Rotation that, applied to the source polygon, aligns this box with
    /// the axes.
    #[must_use]
    pub fn angle_to_x(&self) -> f64 {
        self.angle
    }
    #[must_use]
    pub fn width(&self) -> f64 {
        self.width
    }
    #[must_use]
    pub fn height(&self) -> f64 {
        self.height
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn hull_of_square_with_interior_points() {
        let pts = [
            Point::new(0.0, 0.0),
            Point::new(2.0, 0.0),
            Point::new(2.0, 2.0),
            Point::new(0.0, 2.0),
            // Interior and boundary points must not survive.
            Point::new(1.0, 1.0),
            Point::new(1.0, 0.0),
        ];
        let hull = convex_hull(&pts);
        assert_eq!(hull.points.len(), 4);
        assert!((hull.area() - 4.0).abs() < 1e-12);
    }

    #[test]
    fn hull_of_collinear_points_is_degenerate() {
        let pts = [
            Point::new(0.0, 0.0),
            Point::new(1.0, 1.0),
            Point::new(2.0, 2.0),
        ];
        let hull = convex_hull(&pts);
        assert!(hull.is_degenerate());
    }

    #[test]
    fn calipers_find_rotated_rectangle() {
        // A 4x1 rectangle rotated by 30 degrees. The minimum box must
        // recover the original extents, not the axis-aligned ones.
        let angle = 30f64.to_radians();
        let rect = Polygon::rectangle(4.0, 1.0).rotated(angle);
        let hull = convex_hull(&rect.points);
        let obb = MinAreaBoundingBox::from_hull(&hull);
        let (w, h) = (obb.width().max(obb.height()), obb.width().min(obb.height()));
        assert!((w - 4.0).abs() < 1e-9, "{w}");
        assert!((h - 1.0).abs() < 1e-9, "{h}");
        // Undoing the found angle must axis-align the rectangle.
        let realigned = hull.rotated(obb.angle_to_x()).bounding_box();
        assert!((realigned.width() * realigned.height() - 4.0).abs() < 1e-9);
    }

    #[test]
    fn transform_order() {
        let t = Transform3 {
            translation: Vec3::new(10.0, 0.0, 0.0),
            rotation: Vec3::new(0.0, 0.0, std::f64::consts::FRAC_PI_2),
            scale: Vec3::splat(2.0),
            mirror: Vec3::splat(1.0),
        };
        // (1, 0, 0) -> scale (2, 0, 0) -> rotZ (0, 2, 0) -> translate (10, 2, 0)
        let p = t.apply(Vec3::new(1.0, 0.0, 0.0));
        assert!((p.x - 10.0).abs() < 1e-12);
        assert!((p.y - 2.0).abs() < 1e-12);
        assert!(p.z.abs() < 1e-12);
    }
}
