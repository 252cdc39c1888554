//! Bounded FIFO with overwrite-oldest eviction.

use std::collections::VecDeque;

/// Fixed-capacity ring buffer. Pushing past capacity evicts the oldest
/// element; reads are either a non-destructive snapshot (`peek`) or a
/// snapshot plus atomic clear (`drain`).
#[derive(Debug)]
pub struct RingBuffer<T> {
	items: VecDeque<T>,
	capacity: usize,
}

impl<T: Clone> RingBuffer<T> {
	/// Capacity is fixed for the lifetime of the buffer and clamped to 1.
	pub fn new(capacity: usize) -> Self {
		let capacity = capacity.max(1);
		Self {
			items: VecDeque::with_capacity(capacity),
			capacity,
		}
	}

	pub fn push(&mut self, item: T) {
		if self.items.len() == self.capacity {
			self.items.pop_front();
		}
		self.items.push_back(item);
	}

	/// Ordered snapshot, oldest first.
	pub fn peek(&self) -> Vec<T> {
		self.items.iter().cloned().collect()
	}

	/// Ordered snapshot, emptying the buffer.
	pub fn drain(&mut self) -> Vec<T> {
		self.items.drain(..).collect()
	}

	pub fn len(&self) -> usize {
		self.items.len()
	}

	pub fn is_empty(&self) -> bool {
		self.items.is_empty()
	}

	pub fn capacity(&self) -> usize {
		self.capacity
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn keeps_last_capacity_items_in_push_order() {
		for capacity in 1..=8usize {
			for pushes in 0..=20usize {
				let mut ring = RingBuffer::new(capacity);
				for i in 0..pushes {
					ring.push(i);
				}
				let snapshot = ring.peek();
				assert_eq!(snapshot.len(), pushes.min(capacity));
				let expected: Vec<usize> =
					(pushes.saturating_sub(capacity)..pushes).collect();
				assert_eq!(snapshot, expected, "capacity={capacity} pushes={pushes}");
			}
		}
	}

	#[test]
	fn eviction_scenario() {
		let mut ring = RingBuffer::new(3);
		for i in [1, 2, 3, 4] {
			ring.push(i);
		}
		assert_eq!(ring.peek(), vec![2, 3, 4]);
	}

	#[test]
	fn drain_then_peek_is_empty() {
		let mut ring = RingBuffer::new(4);
		ring.push("a");
		ring.push("b");
		assert_eq!(ring.drain(), vec!["a", "b"]);
		assert!(ring.peek().is_empty());
		assert!(ring.is_empty());
	}

	#[test]
	fn peek_does_not_consume() {
		let mut ring = RingBuffer::new(2);
		ring.push(1);
		assert_eq!(ring.peek(), vec![1]);
		assert_eq!(ring.peek(), vec![1]);
		assert_eq!(ring.len(), 1);
	}

	#[test]
	fn zero_capacity_clamps_to_one() {
		let mut ring = RingBuffer::new(0);
		assert_eq!(ring.capacity(), 1);
		ring.push(1);
		ring.push(2);
		assert_eq!(ring.peek(), vec![2]);
	}
}
