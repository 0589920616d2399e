use std::iter::FusedIterator;

use crate::error::Result;
use crate::pipeline::{key_names, Group};
use crate::types::KeyedRow;

/// Groups consecutive elements whose projection over the cluster keys is
/// equal. Grouping is positional: `[A, A, B, A]` gives three groups.
#[derive(Debug, Clone)]
pub struct ResultChunker<I, T> {
    upstream: I,
    keys: Vec<String>,
    lookahead: Option<Result<T>>,
    done: bool,
}

impl<I, T> ResultChunker<I, T> {
    pub fn new<K>(upstream: I, keys: K) -> Self
    where
        K: IntoIterator,
        K::Item: Into<String>,
    {
        Self {
            upstream,
            keys: key_names(keys),
            lookahead: None,
            done: false,
        }
    }
}

impl<I, T> ResultChunker<I, T>
where
    I: Iterator<Item = Result<T>>,
{
    fn pull(&mut self) -> Option<Result<T>> {
        if let Some(item) = self.lookahead.take() {
            return Some(item);
        }
        if self.done {
            return None;
        }
        let item = self.upstream.next();
        if item.is_none() {
            self.done = true;
        }
        item
    }
}

impl<I, T> Iterator for ResultChunker<I, T>
where
    I: Iterator<Item = Result<T>>,
    T: KeyedRow,
{
    type Item = Result<Group<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        let first = match self.pull()? {
            Ok(row) => row,
            Err(err) => return Some(Err(err)),
        };
        let key = first.key_values(&self.keys);
        let mut rows = vec![first];
        while let Some(item) = self.pull() {
            match item {
                Ok(row) if row.key_values(&self.keys) == key => rows.push(row),
                other => {
                    // Starts the next group, or surfaces an error after this one.
                    self.lookahead = Some(other);
                    break;
                }
            }
        }
        Some(Ok((key, rows)))
    }
}

impl<I, T> FusedIterator for ResultChunker<I, T>
where
    I: Iterator<Item = Result<T>>,
    T: KeyedRow,
{
}

impl<I: PartialEq, T> PartialEq for ResultChunker<I, T> {
    fn eq(&self, other: &Self) -> bool {
        self.upstream == other.upstream && self.keys == other.keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::pipeline::{ResultSequence, ResultSource};
    use crate::types::{Row, Value};

    fn row(cluster: &str, id: i64) -> Row {
        Row::new().with("cluster", cluster).with("id", id)
    }

    fn ids(rows: &[Row]) -> Vec<i64> {
        rows.iter()
            .map(|row| match row.get("id") {
                Some(Value::Int(id)) => *id,
                other => panic!("unexpected id {other:?}"),
            })
            .collect()
    }

    #[test]
    fn grouping_is_positional() {
        let source = ResultSource::new(vec![row("A", 1), row("A", 2), row("B", 3), row("A", 4)]);
        let groups = source.chunk_by(["cluster"]).to_list().unwrap();
        let shape: Vec<(Vec<Value>, Vec<i64>)> = groups
            .iter()
            .map(|(key, rows)| (key.clone(), ids(rows)))
            .collect();
        assert_eq!(
            shape,
            vec![
                (vec![Value::from("A")], vec![1, 2]),
                (vec![Value::from("B")], vec![3]),
                (vec![Value::from("A")], vec![4]),
            ]
        );
    }

    #[test]
    fn empty_upstream_yields_no_groups() {
        let mut chunker = ResultSource::<Row>::new(vec![]).chunk_by(["cluster"]);
        assert!(chunker.next().is_none());
        assert!(chunker.next().is_none());
    }

    #[test]
    fn error_closes_the_current_group_first() {
        let upstream = vec![
            Ok(row("A", 1)),
            Err(Error::Stopped),
            Ok(row("A", 2)),
        ];
        let mut chunker = ResultChunker::new(upstream.into_iter(), ["cluster"]);
        let (_, first) = chunker.next().unwrap().unwrap();
        assert_eq!(ids(&first), vec![1]);
        assert!(matches!(chunker.next(), Some(Err(Error::Stopped))));
        let (_, second) = chunker.next().unwrap().unwrap();
        assert_eq!(ids(&second), vec![2]);
        assert!(chunker.next().is_none());
    }

    #[test]
    fn equality_is_structural() {
        let a = ResultSource::new(vec![row("A", 1)]).chunk_by(["cluster"]);
        let b = ResultSource::new(vec![row("A", 1)]).chunk_by(["cluster"]);
        let c = ResultSource::new(vec![row("A", 1)]).chunk_by(["id"]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
