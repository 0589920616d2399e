use std::fmt;
use std::iter::FusedIterator;
use std::sync::Arc;

use futures_util::Stream;

use crate::error::Result;
use crate::metrics::{Operation, Telemetry, Timer};
use crate::observation::Observation;
use crate::types::{ExecutionInfo, Page, Record, Row};

/// Pairs a row with the metadata of the page it arrived on.
pub fn to_record(row: Row, info: &Arc<ExecutionInfo>) -> Record {
    Record {
        row,
        info: info.clone(),
    }
}

/// Paginator yielding [`Record`]s.
pub type RecordPaginator = ResultPaginator<fn(Row, &Arc<ExecutionInfo>) -> Record>;

/// Walks a paged read lazily, one page at a time.
///
/// Single pass: once the last page is consumed, or a page fails, every
/// further call to `next` returns `None`. Nothing is fetched before the first
/// call.
#[derive(Clone)]
pub struct ResultPaginator<F> {
    first: Observation<Page>,
    current: Option<Observation<Page>>,
    buffered: std::vec::IntoIter<Row>,
    info: Arc<ExecutionInfo>,
    on_page: F,
    telemetry: Option<Telemetry>,
}

impl<F> ResultPaginator<F> {
    pub fn new(first: Observation<Page>, on_page: F) -> Self {
        Self {
            first: first.clone(),
            current: Some(first),
            buffered: Vec::new().into_iter(),
            info: Arc::new(ExecutionInfo::default()),
            on_page,
            telemetry: None,
        }
    }

    /// Records a page-fetch timing event for every page waited on.
    pub fn with_telemetry(mut self, telemetry: Telemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Observation of the first page.
    pub fn first_page(&self) -> &Observation<Page> {
        &self.first
    }

    /// Returns `true` once no page remains to be fetched or buffered.
    pub fn is_exhausted(&self) -> bool {
        self.current.is_none() && self.buffered.as_slice().is_empty()
    }

    fn load(&mut self, timer: Timer, outcome: Result<Page>) -> Result<()> {
        match outcome {
            Ok(page) => {
                let (rows, info, next) = page.into_parts();
                if let Some(telemetry) = &self.telemetry {
                    telemetry.record(&timer.finish(rows.len(), None));
                }
                self.buffered = rows.into_iter();
                self.info = Arc::new(info);
                self.current = next;
                Ok(())
            }
            Err(err) => {
                if let Some(telemetry) = &self.telemetry {
                    telemetry.record(&timer.finish(0, Some(err.clone())));
                }
                tracing::warn!(error = %err, "page fetch failed");
                Err(err)
            }
        }
    }
}

impl<F, T> ResultPaginator<F>
where
    F: FnMut(Row, &Arc<ExecutionInfo>) -> T,
{
    fn take_buffered(&mut self) -> Option<T> {
        let row = self.buffered.next()?;
        Some((self.on_page)(row, &self.info))
    }

    async fn next_async(&mut self) -> Option<Result<T>> {
        loop {
            if let Some(item) = self.take_buffered() {
                return Some(Ok(item));
            }
            let current = self.current.take()?;
            let timer = Timer::start(Operation::PageFetch, None);
            let outcome = current.await;
            if let Err(err) = self.load(timer, outcome) {
                return Some(Err(err));
            }
        }
    }

    /// Same page walk as an async stream; awaits pages instead of blocking.
    pub fn into_stream(self) -> impl Stream<Item = Result<T>> {
        futures_util::stream::unfold(self, |mut paginator| async move {
            let item = paginator.next_async().await?;
            Some((item, paginator))
        })
    }
}

impl<F, T> Iterator for ResultPaginator<F>
where
    F: FnMut(Row, &Arc<ExecutionInfo>) -> T,
{
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.take_buffered() {
                return Some(Ok(item));
            }
            let current = self.current.take()?;
            let timer = Timer::start(Operation::PageFetch, None);
            let outcome = current.get();
            if let Err(err) = self.load(timer, outcome) {
                return Some(Err(err));
            }
        }
    }
}

impl<F, T> FusedIterator for ResultPaginator<F> where F: FnMut(Row, &Arc<ExecutionInfo>) -> T {}

impl<F> PartialEq for ResultPaginator<F> {
    fn eq(&self, other: &Self) -> bool {
        self.first == other.first
    }
}

impl<F> fmt::Debug for ResultPaginator<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultPaginator")
            .field("first", &self.first)
            .field("exhausted", &self.is_exhausted())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::metrics::ClientMetrics;
    use crate::types::Value;
    use futures_util::StreamExt;

    fn row(id: i64) -> Row {
        Row::new().with("id", id)
    }

    fn info(tag: &str) -> ExecutionInfo {
        ExecutionInfo {
            warnings: vec![tag.to_string()],
            ..ExecutionInfo::default()
        }
    }

    fn two_pages() -> Observation<Page> {
        let second = Observation::resolved(Page::last(vec![row(3)], info("p2")));
        Observation::resolved(Page::with_next(vec![row(1), row(2)], info("p1"), second))
    }

    fn id(row: Row, _: &Arc<ExecutionInfo>) -> Value {
        row.get("id").cloned().unwrap_or(Value::Null)
    }

    #[test]
    fn walks_pages_in_order_then_stays_exhausted() {
        let mut paginator = ResultPaginator::new(two_pages(), id);
        let ids: Vec<Value> = paginator.by_ref().map(|item| item.unwrap()).collect();
        assert_eq!(ids, vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        assert!(paginator.is_exhausted());
        assert!(paginator.next().is_none());
        assert!(paginator.next().is_none());
    }

    #[test]
    fn records_carry_their_page_metadata() {
        let records: Vec<Record> = ResultPaginator::new(two_pages(), to_record)
            .map(|item| item.unwrap())
            .collect();
        let tags: Vec<&str> = records
            .iter()
            .map(|record| record.info.warnings[0].as_str())
            .collect();
        assert_eq!(tags, vec!["p1", "p1", "p2"]);
    }

    #[test]
    fn nothing_is_fetched_before_iteration() {
        let (first, completer) = Observation::pending();
        let mut paginator = ResultPaginator::new(first, id);
        assert!(!paginator.is_exhausted());
        completer.succeed(Page::last(vec![row(7)], ExecutionInfo::default()));
        assert_eq!(paginator.next().unwrap().unwrap(), Value::Int(7));
        assert!(paginator.next().is_none());
    }

    #[test]
    fn failed_page_yields_one_error_then_ends() {
        let failed = Observation::failed(Error::execution(anyhow::anyhow!("read timeout")));
        let first = Observation::resolved(Page::with_next(vec![row(1)], info("p1"), failed));
        let metrics = Arc::new(ClientMetrics::default());
        let mut paginator =
            ResultPaginator::new(first, id).with_telemetry(Telemetry::new(metrics.clone()));

        assert_eq!(paginator.next().unwrap().unwrap(), Value::Int(1));
        assert!(matches!(paginator.next(), Some(Err(Error::Execution(_)))));
        assert!(paginator.next().is_none());

        let snap = metrics.snapshot();
        assert_eq!((snap.pages, snap.page_failures, snap.page_rows), (2, 1, 1));
    }

    #[test]
    fn equality_follows_first_page_identity() {
        let first = two_pages();
        let a = ResultPaginator::new(first.clone(), id);
        let b = ResultPaginator::new(first.clone(), id);
        assert_eq!(a.first_page(), &first);
        let c = ResultPaginator::new(two_pages(), id);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn stream_yields_the_same_rows() {
        let ids: Vec<Value> = ResultPaginator::new(two_pages(), id)
            .into_stream()
            .map(|item| item.unwrap())
            .collect()
            .await;
        assert_eq!(ids, vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
    }
}
