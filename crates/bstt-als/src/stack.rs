//! Left/right stacks of partial contractions
//!
//! A [`StackPair`] holds one slot per bond: `left[i]` contracts everything
//! left of position `i`, the right stack is stored in reverse so its top
//! belongs to the current core. Slots not yet visited by a sweep are `None`.
//! Between moves `left.len() + right.len() == order + 1`.

use crate::error::{AlsError, Result};

#[derive(Debug, Clone)]
pub struct StackPair<T> {
    left: Vec<Option<T>>,
    right: Vec<Option<T>>,
}

impl<T> StackPair<T> {
    /// Stacks for a train whose core sits at `order - 1`
    ///
    /// The left stack holds its seed followed by `order - 1` placeholders,
    /// the right stack only its seed.
    pub fn new(order: usize, left_seed: T, right_seed: T) -> Self {
        let mut left = Vec::with_capacity(order);
        left.push(Some(left_seed));
        left.extend((1..order).map(|_| None));
        Self {
            left,
            right: vec![Some(right_seed)],
        }
    }

    pub fn push_left(&mut self, entry: T) {
        self.left.push(Some(entry));
    }

    pub fn push_right(&mut self, entry: T) {
        self.right.push(Some(entry));
    }

    /// Drop the top of the left stack, placeholder or not
    pub fn pop_left(&mut self) -> Option<T> {
        self.left.pop().flatten()
    }

    pub fn pop_right(&mut self) -> Option<T> {
        self.right.pop().flatten()
    }

    pub fn left_top(&self) -> Result<&T> {
        self.left.last().and_then(Option::as_ref).ok_or(AlsError::MissingStack {
            side: "left",
            position: self.left.len().saturating_sub(1),
        })
    }

    pub fn right_top(&self) -> Result<&T> {
        let position = self.left.len().saturating_sub(1);
        self.right
            .last()
            .and_then(Option::as_ref)
            .ok_or(AlsError::MissingStack {
                side: "right",
                position,
            })
    }

    pub fn left_top_mut(&mut self) -> Result<&mut T> {
        let position = self.left.len().saturating_sub(1);
        self.left
            .last_mut()
            .and_then(Option::as_mut)
            .ok_or(AlsError::MissingStack {
                side: "left",
                position,
            })
    }

    pub fn right_top_mut(&mut self) -> Result<&mut T> {
        let position = self.left.len().saturating_sub(1);
        self.right
            .last_mut()
            .and_then(Option::as_mut)
            .ok_or(AlsError::MissingStack {
                side: "right",
                position,
            })
    }

    /// Every slot of both stacks is materialized
    pub fn is_valid(&self) -> bool {
        self.left.iter().chain(self.right.iter()).all(Option::is_some)
    }

    /// The length invariant `left + right == order + 1`
    pub fn check_len(&self, order: usize) -> bool {
        self.left.len() + self.right.len() == order + 1
    }

    pub fn left(&self) -> &[Option<T>] {
        &self.left
    }

    pub fn right(&self) -> &[Option<T>] {
        &self.right
    }

    /// Number of left slots, placeholders included
    pub fn left_len(&self) -> usize {
        self.left.len()
    }

    pub fn right_len(&self) -> usize {
        self.right.len()
    }
}
