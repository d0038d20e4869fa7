//! Index-based binary min-heap over an arena of merge cursors.

/// Min-heap of indexes into an arena of items.
///
/// Items never move; the heap only reorders their indexes. An item can be
/// popped, advanced in place through [`MergeQueue::get_mut`] and pushed
/// back by index.
#[derive(Debug)]
pub struct MergeQueue<T: Ord> {
    items: Vec<T>,
    heap: Vec<usize>,
}

impl<T: Ord> MergeQueue<T> {
    /// Wrap `items`. The heap starts empty.
    pub fn new(items: Vec<T>) -> Self {
        let capacity = items.len();
        MergeQueue {
            items,
            heap: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn get(&self, idx: usize) -> &T {
        &self.items[idx]
    }

    /// Mutable access to an item. The item must not be in the heap while
    /// its ordering key changes.
    pub fn get_mut(&mut self, idx: usize) -> &mut T {
        &mut self.items[idx]
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    /// Index of the smallest queued item.
    pub fn peek(&self) -> Option<usize> {
        self.heap.first().copied()
    }

    pub fn push(&mut self, idx: usize) {
        debug_assert!(idx < self.items.len());
        self.heap.push(idx);
        self.sift_up(self.heap.len() - 1);
    }

    /// Remove and return the index of the smallest queued item.
    pub fn pop(&mut self) -> Option<usize> {
        if self.heap.is_empty() {
            return None;
        }
        let top = self.heap.swap_remove(0);
        if !self.heap.is_empty() {
            self.sift_down(0);
        }
        Some(top)
    }

    fn less(&self, a: usize, b: usize) -> bool {
        self.items[self.heap[a]] < self.items[self.heap[b]]
    }

    fn sift_up(&mut self, mut pos: usize) {
        while pos > 0 {
            let parent = (pos - 1) / 2;
            if !self.less(pos, parent) {
                break;
            }
            self.heap.swap(pos, parent);
            pos = parent;
        }
    }

    fn sift_down(&mut self, mut pos: usize) {
        let len = self.heap.len();
        loop {
            let left = 2 * pos + 1;
            if left >= len {
                break;
            }
            let right = left + 1;
            let child = if right < len && self.less(right, left) {
                right
            } else {
                left
            };
            if !self.less(child, pos) {
                break;
            }
            self.heap.swap(pos, child);
            pos = child;
        }
    }
}
