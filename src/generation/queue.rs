use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub path: String,
    pub attempts: u32,
}

impl QueueEntry {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            attempts: 0,
        }
    }
}

/// FIFO of pending images. Failed entries go back to the tail so the rest
/// of the batch is not held up behind a retry.
#[derive(Debug, Default)]
pub struct GenerationQueue {
    entries: VecDeque<QueueEntry>,
}

impl GenerationQueue {
    pub fn from_paths<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            entries: paths.into_iter().map(QueueEntry::new).collect(),
        }
    }

    pub fn push_back(&mut self, entry: QueueEntry) {
        self.entries.push_back(entry);
    }

    pub fn pop_front(&mut self) -> Option<QueueEntry> {
        self.entries.pop_front()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requeue_goes_to_tail() {
        let mut queue = GenerationQueue::from_paths(["a.png", "b.png", "c.png"]);
        assert_eq!(queue.len(), 3);

        let mut first = queue.pop_front().unwrap();
        assert_eq!(first.path, "a.png");
        first.attempts += 1;
        queue.push_back(first);

        let order: Vec<_> = std::iter::from_fn(|| queue.pop_front())
            .map(|e| (e.path, e.attempts))
            .collect();
        assert_eq!(
            order,
            vec![
                ("b.png".to_string(), 0),
                ("c.png".to_string(), 0),
                ("a.png".to_string(), 1)
            ]
        );
        assert!(queue.is_empty());
    }
}
