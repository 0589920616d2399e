use std::collections::VecDeque;
use std::iter::FusedIterator;

use crate::error::Result;

/// In-memory sequence of successful elements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultSource<T> {
    items: VecDeque<T>,
}

impl<T> ResultSource<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items: items.into(),
        }
    }
}

impl<T> Iterator for ResultSource<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        self.items.pop_front().map(Ok)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.items.len(), Some(self.items.len()))
    }
}

impl<T> FusedIterator for ResultSource<T> {}

/// Drains `lhs` completely, then `rhs`.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultCombiner<L, R> {
    lhs: L,
    rhs: R,
    lhs_done: bool,
}

impl<L, R> ResultCombiner<L, R> {
    pub fn new(lhs: L, rhs: R) -> Self {
        Self {
            lhs,
            rhs,
            lhs_done: false,
        }
    }
}

impl<L, R, T> Iterator for ResultCombiner<L, R>
where
    L: Iterator<Item = Result<T>>,
    R: Iterator<Item = Result<T>>,
{
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.lhs_done {
            match self.lhs.next() {
                Some(item) => return Some(item),
                None => self.lhs_done = true,
            }
        }
        self.rhs.next()
    }
}

/// Keeps the elements `predicate` accepts. Errors always pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultFilter<I, P> {
    upstream: I,
    predicate: P,
}

impl<I, P> ResultFilter<I, P> {
    pub fn new(upstream: I, predicate: P) -> Self {
        Self {
            upstream,
            predicate,
        }
    }
}

impl<I, P, T> Iterator for ResultFilter<I, P>
where
    I: Iterator<Item = Result<T>>,
    P: FnMut(&T) -> bool,
{
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.upstream.next()? {
                Ok(item) if !(self.predicate)(&item) => continue,
                other => return Some(other),
            }
        }
    }
}

/// Yields at most `n` elements and never pulls more than that from upstream.
/// Errors count toward the limit.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultLimiter<I> {
    upstream: I,
    limit: usize,
    remaining: usize,
}

impl<I> ResultLimiter<I> {
    pub fn new(upstream: I, limit: usize) -> Self {
        Self {
            upstream,
            limit,
            remaining: limit,
        }
    }

    pub fn max_items(&self) -> usize {
        self.limit
    }
}

impl<I, T> Iterator for ResultLimiter<I>
where
    I: Iterator<Item = Result<T>>,
{
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let item = self.upstream.next();
        self.remaining = match item {
            Some(_) => self.remaining - 1,
            None => 0,
        };
        item
    }
}

impl<I, T> FusedIterator for ResultLimiter<I> where I: Iterator<Item = Result<T>> {}

/// Pairs every successful element with its position.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultIndexed<I> {
    upstream: I,
    position: usize,
}

impl<I> ResultIndexed<I> {
    pub fn new(upstream: I) -> Self {
        Self {
            upstream,
            position: 0,
        }
    }
}

impl<I, T> Iterator for ResultIndexed<I>
where
    I: Iterator<Item = Result<T>>,
{
    type Item = Result<(usize, T)>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.upstream.next()?;
        Some(item.map(|value| {
            let position = self.position;
            self.position += 1;
            (position, value)
        }))
    }
}
