use super::errors::QueueError;
use std::{
    cmp::Ordering,
    fmt,
    sync::Arc,
};
use parking_lot::RwLock;


/// Ordering policy owned by a [`PriorityQueue`].
///
/// `Ordering::Less` means `a` is served before `b`.
pub trait Comparator<T>: Send + Sync {
    fn compare(&self, a: &T, b: &T) -> Ordering;
}

impl<T, F> Comparator<T> for F
where
    F: Fn(&T, &T) -> Ordering + Send + Sync,
{
    #[inline]
    fn compare(&self, a: &T, b: &T) -> Ordering {
        self(a, b)
    }
}

/// Array-backed binary heap of shared handles behind its own reader/writer lock.
///
/// Mutations take the write lock, `len`/`is_empty`/`peek_at` take the read lock.
/// Indices handed out by [`len`](Self::len) are only meaningful while the caller
/// prevents concurrent mutation by other means (the pool does this with its
/// state lock).
pub struct PriorityQueue<T> {
    heap: RwLock<Vec<Arc<T>>>,
    comparator: Box<dyn Comparator<T>>,
}

impl<T> PriorityQueue<T> {
    pub fn new<C>(comparator: C) -> Self
    where
        C: Comparator<T> + 'static,
    {
        Self {
            heap: RwLock::new(Vec::new()),
            comparator: Box::new(comparator),
        }
    }

    pub fn push(&self, item: Arc<T>) {
        let mut heap = self.heap.write();
        heap.push(item);
        let last = heap.len() - 1;
        self.sift_up(&mut heap, last);
    }

    /// Removes and returns the root. Never blocks on an empty queue.
    pub fn pop(&self) -> Option<Arc<T>> {
        let mut heap = self.heap.write();
        if heap.is_empty() {
            return None;
        }

        let last = heap.len() - 1;
        heap.swap(0, last);
        let root = heap.pop();
        if !heap.is_empty() {
            self.sift_down(&mut heap, 0);
        }
        root
    }

    pub fn peek(&self) -> Option<Arc<T>> {
        self.heap.read().first().cloned()
    }

    /// Entry at `index` of the backing array (heap order, not sorted order).
    pub fn peek_at(&self, index: usize) -> Result<Arc<T>, QueueError> {
        let heap = self.heap.read();
        heap.get(index)
            .cloned()
            .ok_or(QueueError::IndexOutOfRange { index, len: heap.len() })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.heap.read().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.heap.read().is_empty()
    }

    /// Removes every entry matching `pred` in one write-locked pass and restores
    /// heap order for the rest.
    ///
    /// `pred` runs under the write lock, so whatever it marks on an entry is
    /// visible to nobody else before the entry has left the queue.
    pub fn extract_where<F>(&self, mut pred: F) -> Vec<Arc<T>>
    where
        F: FnMut(&T) -> bool,
    {
        let mut heap = self.heap.write();
        let (extracted, kept): (Vec<_>, Vec<_>) = heap
            .drain(..)
            .partition(|item| pred(&**item));

        *heap = kept;
        if !extracted.is_empty() {
            self.heapify(&mut heap);
        }
        extracted
    }

    /// Empties the queue, handing the removed entries back to the caller.
    pub fn clear(&self) -> Vec<Arc<T>> {
        std::mem::take(&mut *self.heap.write())
    }

    #[inline]
    fn precedes(&self, a: &T, b: &T) -> bool {
        self.comparator.compare(a, b) == Ordering::Less
    }

    fn sift_up(&self, heap: &mut [Arc<T>], mut index: usize) {
        while index > 0 {
            let parent = (index - 1) / 2;
            if !self.precedes(&heap[index], &heap[parent]) {
                break;
            }
            heap.swap(index, parent);
            index = parent;
        }
    }

    fn sift_down(&self, heap: &mut [Arc<T>], mut index: usize) {
        let len = heap.len();
        loop {
            let left = 2 * index + 1;
            let right = left + 1;
            let mut first = index;

            if left < len && self.precedes(&heap[left], &heap[first]) {
                first = left;
            }
            if right < len && self.precedes(&heap[right], &heap[first]) {
                first = right;
            }
            if first == index {
                return;
            }
            heap.swap(index, first);
            index = first;
        }
    }

    fn heapify(&self, heap: &mut [Arc<T>]) {
        for index in (0..heap.len() / 2).rev() {
            self.sift_down(heap, index);
        }
    }
}

impl<T> fmt::Debug for PriorityQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PriorityQueue")
            .field("len", &self.len())
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn min_queue() -> PriorityQueue<u32> {
        PriorityQueue::new(|a: &u32, b: &u32| a.cmp(b))
    }

    fn drain(queue: &PriorityQueue<u32>) -> Vec<u32> {
        std::iter::from_fn(|| queue.pop()).map(|v| *v).collect()
    }

    #[test]
    fn pops_smallest_first() {
        let queue = min_queue();
        for v in [300, 100, 200, 50, 400] {
            queue.push(Arc::new(v));
        }

        assert_eq!(queue.len(), 5);
        assert_eq!(queue.peek().map(|v| *v), Some(50));
        assert_eq!(drain(&queue), vec![50, 100, 200, 300, 400]);
        assert!(queue.is_empty());
    }

    #[test]
    fn pop_on_empty_returns_none() {
        let queue = min_queue();
        assert!(queue.pop().is_none());
        assert!(queue.peek().is_none());
    }

    #[test]
    fn injected_comparator_controls_order() {
        let queue = PriorityQueue::new(|a: &u32, b: &u32| b.cmp(a));
        for v in [1, 5, 3] {
            queue.push(Arc::new(v));
        }
        assert_eq!(std::iter::from_fn(|| queue.pop()).map(|v| *v).collect::<Vec<_>>(), vec![5, 3, 1]);
    }

    #[test]
    fn peek_at_is_checked() {
        let queue = min_queue();
        queue.push(Arc::new(7));

        assert_eq!(*queue.peek_at(0).unwrap(), 7);
        assert_eq!(
            queue.peek_at(1).unwrap_err(),
            QueueError::IndexOutOfRange { index: 1, len: 1 }
        );
    }

    #[test]
    fn extract_where_keeps_heap_order() {
        let queue = min_queue();
        for v in 0..20u32 {
            queue.push(Arc::new((v * 7) % 20));
        }

        let mut extracted: Vec<u32> = queue
            .extract_where(|v| v % 3 == 0)
            .into_iter()
            .map(|v| *v)
            .collect();
        extracted.sort_unstable();

        assert_eq!(extracted, vec![0, 3, 6, 9, 12, 15, 18]);
        let rest = drain(&queue);
        assert_eq!(rest, vec![1, 2, 4, 5, 7, 8, 10, 11, 13, 14, 16, 17, 19]);
    }

    #[test]
    fn extract_where_without_matches_leaves_queue_intact() {
        let queue = min_queue();
        for v in [4, 2, 9] {
            queue.push(Arc::new(v));
        }
        assert!(queue.extract_where(|_| false).is_empty());
        assert_eq!(drain(&queue), vec![2, 4, 9]);
    }

    #[test]
    fn clear_returns_everything() {
        let queue = min_queue();
        for v in [4, 2, 9] {
            queue.push(Arc::new(v));
        }
        assert_eq!(queue.clear().len(), 3);
        assert!(queue.is_empty());
    }

    #[test]
    fn concurrent_pushes_are_all_kept() {
        let queue = Arc::new(min_queue());
        let threads: Vec<_> = (0..4u32)
            .map(|t| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for i in 0..250 {
                        queue.push(Arc::new(t * 1000 + i));
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        let values = drain(&queue);
        assert_eq!(values.len(), 1000);
        assert!(values.windows(2).all(|w| w[0] <= w[1]));
    }
}
