//! Lazy result pipeline.
//!
//! Every stage is an [`Iterator`] over `Result<T>`: nothing is pulled from
//! upstream until the stage itself is asked for an element, element order is
//! never changed, and `Err` items pass through untouched. Stages compare
//! equal when their constructor arguments do; the paginator compares by the
//! identity of its first-page observation.
//!
//! Blocking happens only in [`ResultPaginator`], which waits on page
//! observations. Use [`ResultPaginator::into_stream`] from async code.

mod chunker;
mod ops;
mod paginator;
mod reducer;

pub use chunker::ResultChunker;
pub use ops::{ResultCombiner, ResultFilter, ResultIndexed, ResultLimiter, ResultSource};
pub use paginator::{to_record, RecordPaginator, ResultPaginator};
pub use reducer::{ResultReducer, ResultReducerByKeys};

use crate::error::Result;
use crate::types::{KeyedRow, Value};

/// One run of consecutive rows sharing the same key projection.
pub type Group<T> = (Vec<Value>, Vec<T>);

pub(crate) fn key_names<K>(keys: K) -> Vec<String>
where
    K: IntoIterator,
    K::Item: Into<String>,
{
    keys.into_iter().map(Into::into).collect()
}

/// Pipeline combinators for any sequence of results.
pub trait ResultSequence<T>: Iterator<Item = Result<T>> + Sized {
    /// Groups consecutive elements with equal values over `keys`.
    fn chunk_by<K>(self, keys: K) -> ResultChunker<Self, T>
    where
        T: KeyedRow,
        K: IntoIterator,
        K::Item: Into<String>,
    {
        ResultChunker::new(self, keys)
    }

    /// Drops elements whose values over `keys` were already seen.
    fn dedup_by_keys<K>(self, keys: K) -> ResultReducerByKeys<Self, T>
    where
        T: KeyedRow,
        K: IntoIterator,
        K::Item: Into<String>,
    {
        ResultReducerByKeys::new(self, keys)
    }

    fn filter_rows<P>(self, predicate: P) -> ResultFilter<Self, P>
    where
        P: FnMut(&T) -> bool,
    {
        ResultFilter::new(self, predicate)
    }

    fn limit(self, n: usize) -> ResultLimiter<Self> {
        ResultLimiter::new(self, n)
    }

    /// Yields every element of `self`, then every element of `rhs`.
    fn combine<R>(self, rhs: R) -> ResultCombiner<Self, R>
    where
        R: Iterator<Item = Result<T>>,
    {
        ResultCombiner::new(self, rhs)
    }

    fn with_index(self) -> ResultIndexed<Self> {
        ResultIndexed::new(self)
    }

    /// Collects every element, stopping at the first error.
    fn to_list(self) -> Result<Vec<T>> {
        self.collect()
    }
}

impl<I, T> ResultSequence<T> for I where I: Iterator<Item = Result<T>> {}

/// Combinators for sequences of chunked groups.
pub trait GroupSequence<U>: Iterator<Item = Result<Group<U>>> + Sized {
    /// Reduces chunked groups; see [`ResultReducer`].
    fn reduce_groups<K>(self, keys: K) -> ResultReducer<Self, U>
    where
        U: KeyedRow,
        K: IntoIterator,
        K::Item: Into<String>,
    {
        ResultReducer::new(self, keys)
    }
}

impl<I, U> GroupSequence<U> for I where I: Iterator<Item = Result<Group<U>>> {}
