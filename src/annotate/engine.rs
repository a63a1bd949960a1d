/// Pointer-driven annotation editor for a single image
///
/// One engine exists per open image. It owns that image's annotation list
/// while the user edits it and reports every change as an `Update`, so the
/// caller can stream live previews and persist settled lists.
///
/// Interaction states:
/// - idle → drawing (freehand) → idle on release
/// - idle → placing (shape/stamp tools) → idle with the new entity active
/// - idle → dragging / resizing → idle on release
///
/// A drag or resize whose pointer never travels past the configured
/// threshold is treated as a click and only activates the entity.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::annotation::{
    Annotation, AnnotationId, AnnotationKind, Handle, ImageHandle, Point, RectData, Rgba, Shape,
    ShapeKind,
};
use crate::config::Config;
use crate::error::{EditorError, Result};
use crate::state::history::UndoHistory;
use crate::state::library::RecordStore;
use crate::state::workspace::Workspace;

/// Size of a shape placed with a single click
pub const PLACED_SHAPE_SIZE: (f32, f32) = (120.0, 80.0);
pub const PLACED_LINE_LENGTH: f32 = 120.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tool {
    Select,
    Freehand,
    Rectangle,
    Circle,
    Line,
    Stamp,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Style {
    pub color: Rgba,
    pub stroke_width: f32,
}

impl Default for Style {
    fn default() -> Self {
        Self {
            color: [229, 62, 62, 255],
            stroke_width: 6.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EngineSettings {
    pub history_limit: usize,
    pub drag_threshold: f32,
    pub min_shape_size: f32,
    pub hit_tolerance: f32,
    pub handle_radius: f32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            history_limit: 50,
            drag_threshold: 5.0,
            min_shape_size: 10.0,
            hit_tolerance: 6.0,
            handle_radius: 8.0,
        }
    }
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            history_limit: config.history_limit,
            drag_threshold: config.drag_threshold_px,
            min_shape_size: config.min_shape_size,
            ..Self::default()
        }
    }
}

/// What a handler did to the annotation list
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Update {
    Unchanged,
    /// In-progress change; render it but do not persist
    Live,
    /// Settled list; render and persist
    Committed,
}

/// Public view of the interaction state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Drawing,
    Dragging,
    Resizing,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TransformMode {
    Drag,
    Resize(Handle),
}

/// The single in-progress session; empty when idle
#[derive(Clone, Debug)]
enum Session {
    Drawing {
        points: Vec<Point>,
    },
    Transform {
        id: AnnotationId,
        mode: TransformMode,
        start: Point,
        original: Annotation,
        /// Furthest the pointer has been from `start`
        max_travel: f32,
    },
}

pub struct AnnotationEngine {
    image_id: String,
    annotations: Vec<Annotation>,
    history: UndoHistory<Vec<Annotation>>,
    session: Option<Session>,
    selected: Option<AnnotationId>,
    /// Entity open for inline text editing
    active: Option<AnnotationId>,
    tool: Tool,
    style: Style,
    settings: EngineSettings,
    next_id: AnnotationId,
}

impl AnnotationEngine {
    pub fn new(image_id: impl Into<String>, annotations: Vec<Annotation>, settings: EngineSettings) -> Self {
        let next_id = annotations.iter().map(|a| a.id).max().unwrap_or(0) + 1;
        Self {
            image_id: image_id.into(),
            history: UndoHistory::new(annotations.clone(), settings.history_limit),
            annotations,
            session: None,
            selected: None,
            active: None,
            tool: Tool::Select,
            style: Style::default(),
            settings,
            next_id,
        }
    }

    pub fn image_id(&self) -> &str {
        &self.image_id
    }

    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    /// Write the current list back to the image it belongs to. Live
    /// updates only reach the workspace; commits are persisted as well.
    pub fn sync(&self, update: Update, workspace: &mut Workspace, store: &dyn RecordStore) -> Result<()> {
        match update {
            Update::Unchanged => Ok(()),
            Update::Live => workspace.set_annotations(&self.image_id, self.annotations.clone()),
            Update::Committed => {
                workspace.set_annotations(&self.image_id, self.annotations.clone())?;
                store.save_annotations(&self.image_id, &self.annotations)
            }
        }
    }

    pub fn selected(&self) -> Option<AnnotationId> {
        self.selected
    }

    pub fn active(&self) -> Option<AnnotationId> {
        self.active
    }

    pub fn tool(&self) -> Tool {
        self.tool
    }

    pub fn style(&self) -> Style {
        self.style
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    pub fn phase(&self) -> Phase {
        match &self.session {
            None => Phase::Idle,
            Some(Session::Drawing { .. }) => Phase::Drawing,
            Some(Session::Transform {
                mode: TransformMode::Drag,
                ..
            }) => Phase::Dragging,
            Some(Session::Transform {
                mode: TransformMode::Resize(_),
                ..
            }) => Phase::Resizing,
        }
    }

    /// Points of the stroke being drawn, for preview rendering
    pub fn drawing_preview(&self) -> Option<&[Point]> {
        match &self.session {
            Some(Session::Drawing { points }) => Some(points),
            _ => None,
        }
    }

    pub fn set_tool(&mut self, tool: Tool) {
        self.tool = tool;
    }

    pub fn find(&self, id: AnnotationId) -> Option<&Annotation> {
        self.annotations.iter().find(|a| a.id == id)
    }

    fn find_mut(&mut self, id: AnnotationId) -> Option<&mut Annotation> {
        self.annotations.iter_mut().find(|a| a.id == id)
    }

    fn next_annotation_id(&mut self) -> AnnotationId {
        let id = self.next_id;
        self.next_id = self.next_id.saturating_add(1);
        id
    }

    fn commit(&mut self) {
        self.history.push_snapshot(self.annotations.clone());
    }

    fn ensure_idle(&self) -> Result<()> {
        if self.session.is_some() {
            return Err(EditorError::SessionActive);
        }
        Ok(())
    }

    /// Drop empty stamps and dot strokes left over from the last
    /// interaction. Folded into the current snapshot, not a new undo step.
    fn prune_transient(&mut self) -> bool {
        let before = self.annotations.len();
        self.annotations.retain(|a| !a.is_transient());
        if self.annotations.len() == before {
            return false;
        }
        debug!(
            "Pruned {} transient annotation(s) on {}",
            before - self.annotations.len(),
            self.image_id
        );
        let remaining = |id: Option<AnnotationId>, list: &[Annotation]| {
            id.filter(|id| list.iter().any(|a| a.id == *id))
        };
        self.selected = remaining(self.selected, &self.annotations);
        self.active = remaining(self.active, &self.annotations);
        self.history.amend(self.annotations.clone());
        true
    }

    fn pick(&self, point: Point) -> Option<AnnotationId> {
        self.annotations
            .iter()
            .rev()
            .find(|a| a.contains(point, self.settings.hit_tolerance))
            .map(|a| a.id)
    }

    fn pick_handle(&self, point: Point) -> Option<(AnnotationId, Handle)> {
        let id = self.selected?;
        let annotation = self.find(id)?;
        annotation
            .handles()
            .into_iter()
            .find(|(_, at)| at.distance_to(point) <= self.settings.handle_radius)
            .map(|(handle, _)| (id, handle))
    }

    // ========== Pointer session ==========

    pub fn pointer_down(&mut self, point: Point) -> Result<Update> {
        self.ensure_idle()?;
        let pruned = self.prune_transient();
        let settled = if pruned { Update::Committed } else { Update::Unchanged };

        if self.tool == Tool::Freehand {
            self.active = None;
            self.session = Some(Session::Drawing { points: vec![point] });
            return Ok(settled);
        }

        let target = self
            .pick_handle(point)
            .map(|(id, handle)| (id, TransformMode::Resize(handle)))
            .or_else(|| self.pick(point).map(|id| (id, TransformMode::Drag)));

        if let Some((id, mode)) = target {
            if let Some(original) = self.find(id).cloned() {
                self.selected = Some(id);
                self.active = None;
                self.session = Some(Session::Transform {
                    id,
                    mode,
                    start: point,
                    original,
                    max_travel: 0.0,
                });
                return Ok(settled);
            }
        }

        match self.tool {
            Tool::Rectangle => {
                self.place_shape(ShapeKind::Rectangle, point);
                Ok(Update::Committed)
            }
            Tool::Circle => {
                self.place_shape(ShapeKind::Circle, point);
                Ok(Update::Committed)
            }
            Tool::Line => {
                self.place_shape(ShapeKind::Line, point);
                Ok(Update::Committed)
            }
            Tool::Stamp => {
                self.place_stamp(point, None, None);
                Ok(Update::Committed)
            }
            Tool::Select | Tool::Freehand => {
                self.selected = None;
                self.active = None;
                Ok(settled)
            }
        }
    }

    pub fn pointer_move(&mut self, point: Point) -> Update {
        match self.session.as_mut() {
            None => return Update::Unchanged,
            Some(Session::Drawing { points }) => {
                if points.last() == Some(&point) {
                    return Update::Unchanged;
                }
                points.push(point);
                return Update::Live;
            }
            Some(Session::Transform { .. }) => {}
        }
        self.apply_transform(point);
        Update::Live
    }

    pub fn pointer_up(&mut self, point: Point) -> Update {
        let Some(session) = self.session.take() else {
            return Update::Unchanged;
        };

        match session {
            Session::Drawing { mut points } => {
                if points.last() != Some(&point) {
                    points.push(point);
                }
                if points.len() <= 1 {
                    return Update::Unchanged;
                }
                let id = self.next_annotation_id();
                self.annotations.push(Annotation {
                    id,
                    kind: AnnotationKind::Path {
                        points,
                        stroke_width: self.style.stroke_width,
                        color: self.style.color,
                    },
                });
                self.commit();
                Update::Committed
            }
            transform @ Session::Transform { .. } => {
                self.session = Some(transform);
                self.apply_transform(point);
                let Some(Session::Transform {
                    id,
                    original,
                    max_travel,
                    ..
                }) = self.session.take()
                else {
                    return Update::Unchanged;
                };

                if max_travel <= self.settings.drag_threshold {
                    // A tap: keep the geometry, open the entity for editing
                    if let Some(annotation) = self.find_mut(id) {
                        *annotation = original;
                    }
                    self.active = Some(id);
                    return Update::Live;
                }

                self.active = None;
                self.commit();
                Update::Committed
            }
        }
    }

    /// Abort the current session, restoring any transformed entity
    pub fn cancel_session(&mut self) -> Update {
        match self.session.take() {
            None => Update::Unchanged,
            Some(Session::Drawing { .. }) => Update::Live,
            Some(Session::Transform { id, original, .. }) => {
                if let Some(annotation) = self.find_mut(id) {
                    *annotation = original;
                }
                Update::Live
            }
        }
    }

    fn apply_transform(&mut self, point: Point) {
        let min_size = self.settings.min_shape_size;
        let Some(Session::Transform {
            id,
            mode,
            start,
            original,
            max_travel,
        }) = self.session.as_mut()
        else {
            return;
        };

        *max_travel = max_travel.max(start.distance_to(point));
        let mut updated = original.clone();
        match *mode {
            TransformMode::Drag => updated.move_by(point.x - start.x, point.y - start.y),
            TransformMode::Resize(handle) => updated.resize_from_handle(handle, point, min_size),
        }

        let id = *id;
        if let Some(annotation) = self.find_mut(id) {
            *annotation = updated;
        }
    }

    // ========== Discrete mutators ==========

    fn place_shape(&mut self, kind: ShapeKind, at: Point) -> AnnotationId {
        let shape = match kind {
            ShapeKind::Rectangle => Shape::Rectangle {
                rect: RectData::from_center(at, PLACED_SHAPE_SIZE.0, PLACED_SHAPE_SIZE.1),
            },
            ShapeKind::Circle => Shape::Circle {
                rect: RectData::from_center(at, PLACED_SHAPE_SIZE.0, PLACED_SHAPE_SIZE.1),
            },
            ShapeKind::Line => Shape::Line {
                from: at,
                to: at.offset(PLACED_LINE_LENGTH, 0.0),
            },
        };
        let id = self.next_annotation_id();
        self.annotations.push(Annotation {
            id,
            kind: AnnotationKind::Shape {
                shape,
                stroke_width: self.style.stroke_width,
                color: self.style.color,
            },
        });
        self.selected = Some(id);
        self.active = Some(id);
        self.commit();
        id
    }

    fn place_stamp(&mut self, at: Point, text: Option<String>, icon: Option<String>) -> AnnotationId {
        let id = self.next_annotation_id();
        self.annotations.push(Annotation {
            id,
            kind: AnnotationKind::Stamp {
                anchor: at,
                text,
                icon,
            },
        });
        self.selected = Some(id);
        self.active = Some(id);
        self.commit();
        id
    }

    pub fn add_shape(&mut self, kind: ShapeKind, at: Point) -> Result<AnnotationId> {
        self.ensure_idle()?;
        self.prune_transient();
        Ok(self.place_shape(kind, at))
    }

    pub fn add_stamp(&mut self, at: Point, text: Option<String>, icon: Option<String>) -> Result<AnnotationId> {
        self.ensure_idle()?;
        self.prune_transient();
        Ok(self.place_stamp(at, text, icon))
    }

    pub fn add_reference(&mut self, at: Point, image: ImageHandle, caption: Option<String>) -> Result<AnnotationId> {
        self.ensure_idle()?;
        self.prune_transient();
        let id = self.next_annotation_id();
        self.annotations.push(Annotation {
            id,
            kind: AnnotationKind::Reference {
                anchor: at,
                image,
                caption,
            },
        });
        self.selected = Some(id);
        self.active = Some(id);
        self.commit();
        Ok(id)
    }

    pub fn delete(&mut self, id: AnnotationId) -> Result<()> {
        self.ensure_idle()?;
        let before = self.annotations.len();
        self.annotations.retain(|a| a.id != id);
        if self.annotations.len() == before {
            return Err(EditorError::AnnotationNotFound(id));
        }
        if self.selected == Some(id) {
            self.selected = None;
        }
        if self.active == Some(id) {
            self.active = None;
        }
        self.commit();
        Ok(())
    }

    /// Set a stamp's text or a reference chip's caption
    pub fn set_text(&mut self, id: AnnotationId, value: impl Into<String>) -> Result<()> {
        let value = value.into();
        let annotation = self.find_mut(id).ok_or(EditorError::AnnotationNotFound(id))?;
        let changed = match &mut annotation.kind {
            AnnotationKind::Stamp { text, .. } | AnnotationKind::Reference { caption: text, .. } => {
                let next = Some(value.trim().to_string()).filter(|v| !v.is_empty());
                if *text == next {
                    false
                } else {
                    *text = next;
                    true
                }
            }
            _ => false,
        };
        if changed {
            self.commit();
        }
        Ok(())
    }

    /// Change the drawing style, restyling the selected stroke or shape
    pub fn set_style(&mut self, style: Style) -> Update {
        self.style = style;
        let Some(id) = self.selected else {
            return Update::Unchanged;
        };
        let changed = match self.find_mut(id).map(|a| &mut a.kind) {
            Some(AnnotationKind::Path {
                stroke_width, color, ..
            })
            | Some(AnnotationKind::Shape {
                stroke_width, color, ..
            }) => {
                let changed = *stroke_width != style.stroke_width || *color != style.color;
                *stroke_width = style.stroke_width;
                *color = style.color;
                changed
            }
            _ => false,
        };
        if changed && self.session.is_none() {
            self.commit();
            return Update::Committed;
        }
        Update::Unchanged
    }

    pub fn select(&mut self, id: Option<AnnotationId>) {
        self.selected = id.filter(|id| self.find(*id).is_some());
    }

    pub fn clear_active(&mut self) {
        self.active = None;
    }

    // ========== History ==========

    pub fn undo(&mut self) -> Update {
        self.cancel_session();
        match self.history.undo() {
            Some(snapshot) => {
                self.restore(snapshot);
                Update::Committed
            }
            None => Update::Unchanged,
        }
    }

    pub fn redo(&mut self) -> Update {
        self.cancel_session();
        match self.history.redo() {
            Some(snapshot) => {
                self.restore(snapshot);
                Update::Committed
            }
            None => Update::Unchanged,
        }
    }

    fn restore(&mut self, snapshot: Vec<Annotation>) {
        self.annotations = snapshot;
        self.selected = None;
        self.active = None;
    }
}
