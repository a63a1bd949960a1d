/// Bounded undo/redo history of full snapshots
///
/// The stack always holds at least one entry (the baseline). Pushing past
/// the limit drops the oldest snapshot; pushing after an undo discards the
/// redo tail.

#[derive(Clone, Debug)]
pub struct UndoHistory<T: Clone> {
    stack: Vec<T>,
    cursor: usize,
    limit: usize,
}

impl<T: Clone + PartialEq> UndoHistory<T> {
    pub fn new(initial: T, limit: usize) -> Self {
        Self {
            stack: vec![initial],
            cursor: 0,
            limit: limit.max(1),
        }
    }

    pub fn push_snapshot(&mut self, value: T) {
        if self.cursor + 1 < self.stack.len() {
            self.stack.truncate(self.cursor + 1);
        }
        self.stack.push(value);
        if self.stack.len() > self.limit {
            let overflow = self.stack.len() - self.limit;
            self.stack.drain(..overflow);
        }
        self.cursor = self.stack.len() - 1;
    }

    /// Rewrite the snapshot at the cursor without adding an undo step.
    /// Collapses into the previous entry when the rewrite makes them equal.
    /// The redo tail is kept.
    pub fn amend(&mut self, value: T) {
        if self.stack[self.cursor] == value {
            return;
        }
        if self.cursor > 0 && self.stack[self.cursor - 1] == value {
            self.stack.remove(self.cursor);
            self.cursor -= 1;
        } else {
            self.stack[self.cursor] = value;
        }
    }

    pub fn current(&self) -> &T {
        &self.stack[self.cursor]
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn can_undo(&self) -> bool {
        self.cursor > 0
    }

    pub fn can_redo(&self) -> bool {
        self.cursor + 1 < self.stack.len()
    }

    pub fn undo(&mut self) -> Option<T> {
        if !self.can_undo() {
            return None;
        }
        self.cursor -= 1;
        Some(self.stack[self.cursor].clone())
    }

    pub fn redo(&mut self) -> Option<T> {
        if !self.can_redo() {
            return None;
        }
        self.cursor += 1;
        Some(self.stack[self.cursor].clone())
    }

}
