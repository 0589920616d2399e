use std::collections::HashSet;
use std::iter::FusedIterator;

use crate::error::Result;
use crate::pipeline::{key_names, Group};
use crate::types::{KeyedRow, Value};

/// Reduces chunked groups back to rows.
///
/// * No filter keys: every row of every group, in order.
/// * One filter key: the first row of each group.
/// * Several filter keys `k0..km`: the first row of a group is always kept.
///   Row `i >= 1` is kept while its values over the prefix `k0..k(p-1)`,
///   with `p = min(i, m)`, equal those of the previously kept row; the first
///   mismatch ends the group.
#[derive(Debug, Clone)]
pub struct ResultReducer<I, T> {
    upstream: I,
    keys: Vec<String>,
    group: std::vec::IntoIter<T>,
    position: usize,
    previous: Vec<Value>,
}

impl<I, T> ResultReducer<I, T> {
    pub fn new<K>(upstream: I, keys: K) -> Self
    where
        K: IntoIterator,
        K::Item: Into<String>,
    {
        Self {
            upstream,
            keys: key_names(keys),
            group: Vec::new().into_iter(),
            position: 0,
            previous: Vec::new(),
        }
    }

    fn end_group(&mut self) {
        self.group = Vec::new().into_iter();
    }
}

impl<I, T> ResultReducer<I, T>
where
    T: KeyedRow,
{
    /// Decides whether the next row of the current group is yielded.
    fn admit(&mut self, row: &T) -> bool {
        let position = self.position;
        self.position += 1;
        match self.keys.len() {
            0 => true,
            1 => {
                self.end_group();
                true
            }
            len => {
                let values = row.key_values(&self.keys);
                let prefix = position.min(len - 1);
                let keep = position == 0 || values[..prefix] == self.previous[..prefix];
                if keep {
                    self.previous = values;
                } else {
                    self.end_group();
                }
                keep
            }
        }
    }
}

impl<I, T> Iterator for ResultReducer<I, T>
where
    I: Iterator<Item = Result<Group<T>>>,
    T: KeyedRow,
{
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            while let Some(row) = self.group.next() {
                if self.admit(&row) {
                    return Some(Ok(row));
                }
            }
            match self.upstream.next()? {
                Ok((_, rows)) => {
                    self.group = rows.into_iter();
                    self.position = 0;
                }
                Err(err) => return Some(Err(err)),
            }
        }
    }
}

impl<I: PartialEq, T> PartialEq for ResultReducer<I, T> {
    fn eq(&self, other: &Self) -> bool {
        self.upstream == other.upstream && self.keys == other.keys
    }
}

/// Keeps the first element of every distinct projection over `keys`.
/// With no keys every element passes.
#[derive(Debug, Clone)]
pub struct ResultReducerByKeys<I, T> {
    upstream: I,
    keys: Vec<String>,
    seen: HashSet<Vec<Value>>,
    _rows: std::marker::PhantomData<fn() -> T>,
}

impl<I, T> ResultReducerByKeys<I, T> {
    pub fn new<K>(upstream: I, keys: K) -> Self
    where
        K: IntoIterator,
        K::Item: Into<String>,
    {
        Self {
            upstream,
            keys: key_names(keys),
            seen: HashSet::new(),
            _rows: std::marker::PhantomData,
        }
    }
}

impl<I, T> Iterator for ResultReducerByKeys<I, T>
where
    I: Iterator<Item = Result<T>>,
    T: KeyedRow,
{
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.keys.is_empty() {
            return self.upstream.next();
        }
        loop {
            match self.upstream.next()? {
                Ok(row) => {
                    if self.seen.insert(row.key_values(&self.keys)) {
                        return Some(Ok(row));
                    }
                }
                Err(err) => return Some(Err(err)),
            }
        }
    }
}

impl<I, T> FusedIterator for ResultReducerByKeys<I, T>
where
    I: FusedIterator<Item = Result<T>>,
    T: KeyedRow,
{
}

impl<I: PartialEq, T> PartialEq for ResultReducerByKeys<I, T> {
    fn eq(&self, other: &Self) -> bool {
        self.upstream == other.upstream && self.keys == other.keys
    }
}
