// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::VecDeque;

/// Keeps the most recent `capacity` items, dropping the oldest first.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TailBuffer<T> {
    data: VecDeque<T>,
    capacity: usize,
}

impl<T> TailBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        let data = VecDeque::with_capacity(capacity);
        Self { data, capacity }
    }

    pub fn push(&mut self, item: T) {
        if self.capacity == 0 {
            return;
        }

        if self.data.len() == self.capacity {
            self.data.pop_front();
        }
        self.data.push_back(item);
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.data.iter()
    }

    pub fn into_vec(self) -> Vec<T> {
        self.data.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tail_buffer() {
        let mut buf = TailBuffer::new(5);
        assert!(buf.is_empty());

        for i in 1..=3 {
            buf.push(i);
        }
        assert_eq!(buf.iter().copied().collect::<Vec<_>>(), vec![1, 2, 3]);

        buf.push(4);
        buf.push(5);
        assert_eq!(buf.len(), 5);

        for i in 6..=8 {
            buf.push(i);
        }
        assert_eq!(buf.into_vec(), vec![4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_zero_capacity() {
        let mut buf = TailBuffer::new(0);
        buf.push("line");
        assert!(buf.is_empty());
    }
}
