//! Append-only output buffer with cheap clones.
//!
//! Lines are collected in a small tail and sealed into shared chunks once the
//! tail is full. Cloning copies the tail and bumps a reference count, so a
//! snapshot of a task costs the same no matter how much it has printed.

use serde::{Serialize, Serializer};
use std::fmt;
use std::ops::Index;
use std::sync::Arc;

/// Lines per sealed chunk.
const CHUNK_LINES: usize = 128;

/// Ordered lines of one output stream of a task.
#[derive(Clone, Default)]
pub struct OutputLines {
    sealed: Arc<Vec<Arc<[String]>>>,
    tail: Vec<String>,
    len: usize,
}

impl OutputLines {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, line: impl Into<String>) {
        self.tail.push(line.into());
        self.len += 1;
        if self.tail.len() == CHUNK_LINES {
            let chunk: Arc<[String]> = std::mem::take(&mut self.tail).into();
            Arc::make_mut(&mut self.sealed).push(chunk);
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, index: usize) -> Option<&String> {
        if index >= self.len {
            return None;
        }
        let (chunk, offset) = (index / CHUNK_LINES, index % CHUNK_LINES);
        match self.sealed.get(chunk) {
            Some(lines) => lines.get(offset),
            None => self.tail.get(offset),
        }
    }

    pub fn last(&self) -> Option<&String> {
        self.len.checked_sub(1).and_then(|index| self.get(index))
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.iter_from(0)
    }

    /// Lines starting at `start`, without walking the ones before it.
    pub fn iter_from(&self, start: usize) -> impl Iterator<Item = &String> {
        let first_chunk = start / CHUNK_LINES;
        let skip = start.min(self.len) - first_chunk.min(self.sealed.len()) * CHUNK_LINES;
        self.sealed
            .iter()
            .skip(first_chunk)
            .flat_map(|chunk| chunk.iter())
            .chain(self.tail.iter())
            .skip(skip)
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.iter().cloned().collect()
    }
}

impl Index<usize> for OutputLines {
    type Output = String;

    fn index(&self, index: usize) -> &String {
        match self.get(index) {
            Some(line) => line,
            None => panic!("line {index} out of range for {} lines", self.len),
        }
    }
}

impl<'a> IntoIterator for &'a OutputLines {
    type Item = &'a String;
    type IntoIter = Box<dyn Iterator<Item = &'a String> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}

impl<S: Into<String>> FromIterator<S> for OutputLines {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut lines = Self::new();
        for line in iter {
            lines.push(line);
        }
        lines
    }
}

impl fmt::Debug for OutputLines {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl PartialEq for OutputLines {
    fn eq(&self, other: &Self) -> bool {
        self.len == other.len && self.iter().eq(other.iter())
    }
}

impl<S: AsRef<str>> PartialEq<Vec<S>> for OutputLines {
    fn eq(&self, other: &Vec<S>) -> bool {
        self.len == other.len() && self.iter().zip(other).all(|(a, b)| a == b.as_ref())
    }
}

impl Serialize for OutputLines {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}
