/// Focus tracking across grouped rows
///
/// Left/Right move within a row, Up/Down jump between rows keeping the
/// column where possible.

use std::collections::BTreeSet;

use crate::state::data::Row;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Left,
    Right,
    Up,
    Down,
}

#[derive(Debug, Clone, Default)]
pub struct SelectionNavigator {
    focus: Option<String>,
    /// Multi-selection; always contains the focus when one is set
    selected: BTreeSet<String>,
}

impl SelectionNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn focused(&self) -> Option<&str> {
        self.focus.as_deref()
    }

    pub fn selected(&self) -> impl Iterator<Item = &str> {
        self.selected.iter().map(String::as_str)
    }

    /// Row and column of an image
    pub fn locate(id: &str, rows: &[Row]) -> Option<(usize, usize)> {
        rows.iter().enumerate().find_map(|(r, row)| {
            row.images
                .iter()
                .position(|image| image.id == id)
                .map(|c| (r, c))
        })
    }

    /// Focus a single image, replacing the selection
    pub fn focus(&mut self, id: impl Into<String>) {
        let id = id.into();
        self.selected.clear();
        self.selected.insert(id.clone());
        self.focus = Some(id);
    }

    /// Add or remove an image from the selection without moving focus away
    /// from the remaining ones.
    pub fn toggle(&mut self, id: &str) {
        if self.selected.remove(id) {
            if self.focus.as_deref() == Some(id) {
                self.focus = self.selected.iter().next_back().cloned();
            }
        } else {
            self.selected.insert(id.to_string());
            self.focus = Some(id.to_string());
        }
    }

    pub fn clear(&mut self) {
        self.focus = None;
        self.selected.clear();
    }

    /// Move focus; returns the newly focused id. With no focus, the first
    /// image of the first row is focused.
    pub fn navigate(&mut self, direction: Direction, rows: &[Row]) -> Option<&str> {
        let current = self.focus.as_deref().and_then(|id| Self::locate(id, rows));
        let (row, col) = match current {
            None => (0, 0),
            Some((row, col)) => match direction {
                Direction::Left => (row, col.saturating_sub(1)),
                Direction::Right => (row, col + 1),
                Direction::Up => (row.saturating_sub(1), col),
                Direction::Down => (row + 1, col),
            },
        };

        let target_row = rows.get(row.min(rows.len().saturating_sub(1)))?;
        let last = target_row.images.len().checked_sub(1)?;
        let id = target_row.images[col.min(last)].id.clone();
        self.focus(id);
        self.focused()
    }

    /// Drop focus and selection entries that no longer exist after a reload
    pub fn retain_existing(&mut self, rows: &[Row]) {
        self.selected
            .retain(|id| rows.iter().any(|row| row.contains(id)));
        let focus_gone = self
            .focus
            .as_ref()
            .is_some_and(|focus| !self.selected.contains(focus));
        if focus_gone {
            self.focus = self.selected.iter().next_back().cloned();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::data::ImageEntity;

    fn rows() -> Vec<Row> {
        let make = |ids: &[&str]| Row {
            key: ids[0].to_string(),
            title: ids[0].to_string(),
            created_at: chrono::Utc::now(),
            images: ids
                .iter()
                .map(|id| ImageEntity::upload(*id, "x", 10, 10))
                .collect(),
        };
        vec![make(&["a", "b", "c"]), make(&["d"]), make(&["e", "f"])]
    }

    #[test]
    fn test_navigate_within_and_across_rows() {
        let rows = rows();
        let mut nav = SelectionNavigator::new();
        assert_eq!(nav.navigate(Direction::Right, &rows), Some("a"));
        assert_eq!(nav.navigate(Direction::Right, &rows), Some("b"));
        assert_eq!(nav.navigate(Direction::Right, &rows), Some("c"));
        assert_eq!(nav.navigate(Direction::Right, &rows), Some("c"));
        assert_eq!(nav.navigate(Direction::Down, &rows), Some("d"));
        assert_eq!(nav.navigate(Direction::Down, &rows), Some("e"));
        assert_eq!(nav.navigate(Direction::Down, &rows), Some("e"));
        assert_eq!(nav.navigate(Direction::Up, &rows), Some("d"));
    }

    #[test]
    fn test_locate() {
        let rows = rows();
        assert_eq!(SelectionNavigator::locate("f", &rows), Some((2, 1)));
        assert_eq!(SelectionNavigator::locate("zz", &rows), None);
    }

    #[test]
    fn test_toggle_and_retain() {
        let mut nav = SelectionNavigator::new();
        nav.focus("a");
        nav.toggle("b");
        assert_eq!(nav.selected().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(nav.focused(), Some("b"));

        nav.toggle("b");
        assert_eq!(nav.focused(), Some("a"));

        let mut rows = rows();
        rows[0].images.remove(0);
        nav.retain_existing(&rows);
        assert_eq!(nav.focused(), None);
    }

    #[test]
    fn test_empty_rows() {
        let mut nav = SelectionNavigator::new();
        assert_eq!(nav.navigate(Direction::Down, &[]), None);
    }
}
