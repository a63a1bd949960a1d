use serde::{Deserialize, Serialize};

pub type AnnotationId = u64;

pub type Rgba = [u8; 4];

/// Radius used to hit-test and bound stamps
pub const STAMP_RADIUS: f32 = 14.0;
/// Footprint of a reference-image chip, anchored at its top-left corner
pub const CHIP_SIZE: (f32, f32) = (72.0, 48.0);

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance_to(self, other: Point) -> f32 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        (dx * dx + dy * dy).sqrt()
    }

    pub fn offset(self, dx: f32, dy: f32) -> Self {
        Self::new(self.x + dx, self.y + dy)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct RectData {
    pub min: Point,
    pub max: Point,
}

impl RectData {
    pub fn from_center(center: Point, width: f32, height: f32) -> Self {
        Self {
            min: center.offset(-width * 0.5, -height * 0.5),
            max: center.offset(width * 0.5, height * 0.5),
        }
    }

    pub fn normalize(self) -> Self {
        let min_x = self.min.x.min(self.max.x);
        let min_y = self.min.y.min(self.max.y);
        let max_x = self.min.x.max(self.max.x);
        let max_y = self.min.y.max(self.max.y);
        Self {
            min: Point { x: min_x, y: min_y },
            max: Point { x: max_x, y: max_y },
        }
    }

    pub fn width(self) -> f32 {
        (self.max.x - self.min.x).abs()
    }

    pub fn height(self) -> f32 {
        (self.max.y - self.min.y).abs()
    }

    pub fn center(self) -> Point {
        Point::new((self.min.x + self.max.x) * 0.5, (self.min.y + self.max.y) * 0.5)
    }

    pub fn expand(self, amount: f32) -> Self {
        let norm = self.normalize();
        Self {
            min: norm.min.offset(-amount, -amount),
            max: norm.max.offset(amount, amount),
        }
    }

    pub fn contains(self, point: Point) -> bool {
        let norm = self.normalize();
        point.x >= norm.min.x && point.x <= norm.max.x && point.y >= norm.min.y && point.y <= norm.max.y
    }

    pub fn union(self, other: RectData) -> Self {
        let a = self.normalize();
        let b = other.normalize();
        Self {
            min: Point::new(a.min.x.min(b.min.x), a.min.y.min(b.min.y)),
            max: Point::new(a.max.x.max(b.max.x), a.max.y.max(b.max.y)),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum Handle {
    TopLeft,
    Top,
    TopRight,
    Right,
    BottomRight,
    Bottom,
    BottomLeft,
    Left,
    LineStart,
    LineEnd,
}

/// Shape tools selectable for `add_shape`
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum ShapeKind {
    Rectangle,
    Circle,
    Line,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum Shape {
    Rectangle { rect: RectData },
    Circle { rect: RectData },
    Line { from: Point, to: Point },
}

/// Pixels attached to a reference chip
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ImageHandle {
    /// Raw bytes pasted or dropped by the user, base64 in JSON
    Inline {
        #[serde(with = "inline_bytes")]
        bytes: Vec<u8>,
        mime: Option<String>,
    },
    /// A blob already in storage
    Stored { storage_ref: String },
}

mod inline_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Annotation {
    pub id: AnnotationId,
    pub kind: AnnotationKind,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnnotationKind {
    Path {
        points: Vec<Point>,
        stroke_width: f32,
        color: Rgba,
    },
    Shape {
        shape: Shape,
        stroke_width: f32,
        color: Rgba,
    },
    Stamp {
        anchor: Point,
        text: Option<String>,
        icon: Option<String>,
    },
    Reference {
        anchor: Point,
        image: ImageHandle,
        caption: Option<String>,
    },
}

impl Annotation {
    /// Empty stamps and single-point strokes are discarded before the next
    /// interaction starts.
    pub fn is_transient(&self) -> bool {
        match &self.kind {
            AnnotationKind::Path { points, .. } => points.len() <= 1,
            AnnotationKind::Stamp { text, .. } => {
                text.as_deref().map_or(true, |text| text.trim().is_empty())
            }
            AnnotationKind::Shape { .. } | AnnotationKind::Reference { .. } => false,
        }
    }

    /// Whether this annotation is painted into the generation mask
    pub fn is_maskable(&self) -> bool {
        matches!(
            self.kind,
            AnnotationKind::Path { .. } | AnnotationKind::Shape { .. }
        )
    }

    pub fn bounds(&self) -> RectData {
        match &self.kind {
            AnnotationKind::Path {
                points,
                stroke_width,
                ..
            } => {
                let first = points.first().copied().unwrap_or(Point::new(0.0, 0.0));
                let mut rect = RectData {
                    min: first,
                    max: first,
                };
                for point in points.iter().skip(1) {
                    rect = rect.union(RectData {
                        min: *point,
                        max: *point,
                    });
                }
                rect.expand(stroke_width * 0.5)
            }
            AnnotationKind::Shape {
                shape,
                stroke_width,
                ..
            } => match shape {
                Shape::Rectangle { rect } | Shape::Circle { rect } => {
                    rect.expand(stroke_width * 0.5)
                }
                Shape::Line { from, to } => RectData {
                    min: *from,
                    max: *to,
                }
                .expand(stroke_width * 0.5),
            },
            AnnotationKind::Stamp { anchor, text, .. } => {
                let marker = RectData::from_center(*anchor, STAMP_RADIUS * 2.0, STAMP_RADIUS * 2.0);
                match text.as_deref() {
                    Some(text) if !text.is_empty() => {
                        // Rough label footprint to the right of the marker
                        let width = (text.chars().count() as f32 * 8.0).max(16.0);
                        let label = RectData {
                            min: anchor.offset(STAMP_RADIUS, -10.0),
                            max: anchor.offset(STAMP_RADIUS + width, 10.0),
                        };
                        marker.union(label)
                    }
                    _ => marker,
                }
            }
            AnnotationKind::Reference { anchor, .. } => RectData {
                min: *anchor,
                max: anchor.offset(CHIP_SIZE.0, CHIP_SIZE.1),
            },
        }
    }

    pub fn contains(&self, point: Point, tolerance: f32) -> bool {
        match &self.kind {
            AnnotationKind::Path {
                points,
                stroke_width,
                ..
            } => {
                let reach = tolerance + stroke_width * 0.5;
                match points.as_slice() {
                    [] => false,
                    [only] => only.distance_to(point) <= reach,
                    _ => points
                        .windows(2)
                        .any(|pair| distance_to_segment(point, pair[0], pair[1]) <= reach),
                }
            }
            AnnotationKind::Shape {
                shape,
                stroke_width,
                ..
            } => match shape {
                Shape::Rectangle { rect } => rect.expand(tolerance + stroke_width * 0.5).contains(point),
                Shape::Circle { rect } => {
                    let r = rect.expand(tolerance + stroke_width * 0.5);
                    let center = r.center();
                    let rx = r.width() * 0.5;
                    let ry = r.height() * 0.5;
                    if rx <= 0.1 || ry <= 0.1 {
                        return false;
                    }
                    let nx = (point.x - center.x) / rx;
                    let ny = (point.y - center.y) / ry;
                    nx * nx + ny * ny <= 1.0
                }
                Shape::Line { from, to } => {
                    distance_to_segment(point, *from, *to) <= tolerance + stroke_width * 0.5
                }
            },
            AnnotationKind::Stamp { .. } | AnnotationKind::Reference { .. } => {
                self.bounds().expand(tolerance).contains(point)
            }
        }
    }

    pub fn move_by(&mut self, dx: f32, dy: f32) {
        let move_point = |p: &mut Point| {
            p.x += dx;
            p.y += dy;
        };
        match &mut self.kind {
            AnnotationKind::Path { points, .. } => points.iter_mut().for_each(move_point),
            AnnotationKind::Shape { shape, .. } => match shape {
                Shape::Rectangle { rect } | Shape::Circle { rect } => {
                    move_point(&mut rect.min);
                    move_point(&mut rect.max);
                }
                Shape::Line { from, to } => {
                    move_point(from);
                    move_point(to);
                }
            },
            AnnotationKind::Stamp { anchor, .. } | AnnotationKind::Reference { anchor, .. } => {
                move_point(anchor)
            }
        }
    }

    pub fn handles(&self) -> Vec<(Handle, Point)> {
        let AnnotationKind::Shape { shape, .. } = &self.kind else {
            return vec![];
        };
        match shape {
            Shape::Line { from, to } => vec![(Handle::LineStart, *from), (Handle::LineEnd, *to)],
            Shape::Rectangle { rect } | Shape::Circle { rect } => {
                let r = rect.normalize();
                let c = r.center();
                vec![
                    (Handle::TopLeft, r.min),
                    (Handle::Top, Point::new(c.x, r.min.y)),
                    (Handle::TopRight, Point::new(r.max.x, r.min.y)),
                    (Handle::Right, Point::new(r.max.x, c.y)),
                    (Handle::BottomRight, r.max),
                    (Handle::Bottom, Point::new(c.x, r.max.y)),
                    (Handle::BottomLeft, Point::new(r.min.x, r.max.y)),
                    (Handle::Left, Point::new(r.min.x, c.y)),
                ]
            }
        }
    }

    /// Move the edges owned by `handle` to `to`. Boxes never shrink below
    /// `min_size` on either axis; line endpoints follow the pointer exactly.
    pub fn resize_from_handle(&mut self, handle: Handle, to: Point, min_size: f32) {
        let AnnotationKind::Shape { shape, .. } = &mut self.kind else {
            return;
        };
        match shape {
            Shape::Line { from, to: end } => match handle {
                Handle::LineStart => *from = to,
                Handle::LineEnd => *end = to,
                _ => {}
            },
            Shape::Rectangle { rect } | Shape::Circle { rect } => {
                let r = rect.normalize();
                let (mut min, mut max) = (r.min, r.max);
                let moves_left = matches!(handle, Handle::TopLeft | Handle::BottomLeft | Handle::Left);
                let moves_right = matches!(handle, Handle::TopRight | Handle::BottomRight | Handle::Right);
                let moves_top = matches!(handle, Handle::TopLeft | Handle::TopRight | Handle::Top);
                let moves_bottom =
                    matches!(handle, Handle::BottomLeft | Handle::BottomRight | Handle::Bottom);

                if moves_left {
                    min.x = to.x.min(max.x - min_size);
                }
                if moves_right {
                    max.x = to.x.max(min.x + min_size);
                }
                if moves_top {
                    min.y = to.y.min(max.y - min_size);
                }
                if moves_bottom {
                    max.y = to.y.max(min.y + min_size);
                }
                *rect = RectData { min, max };
            }
        }
    }

    /// Editable label of a stamp or reference chip
    pub fn text(&self) -> Option<&str> {
        match &self.kind {
            AnnotationKind::Stamp { text, .. } => text.as_deref(),
            AnnotationKind::Reference { caption, .. } => caption.as_deref(),
            _ => None,
        }
    }
}

fn distance_to_segment(point: Point, a: Point, b: Point) -> f32 {
    let abx = b.x - a.x;
    let aby = b.y - a.y;
    let apx = point.x - a.x;
    let apy = point.y - a.y;
    let ab_len_sq = abx * abx + aby * aby;
    if ab_len_sq <= f32::EPSILON {
        return a.distance_to(point);
    }
    let t = ((apx * abx + apy * aby) / ab_len_sq).clamp(0.0, 1.0);
    let projection = Point::new(a.x + abx * t, a.y + aby * t);
    point.distance_to(projection)
}
