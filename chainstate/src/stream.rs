//! Streaming query execution.
//!
//! Multi-record queries never buffer their result set. A storage collaborator
//! hands back a [`RecordStream`] that is already ordered according to the
//! request's [`StreamingFindOptions`]; [`StreamingQuery::execute`] drives that
//! stream from a producer task into a bounded channel, and the transport pulls
//! from the channel through [`json_array`].
//!
//! The producer enforces the options it owns: records not strictly beyond the
//! `since` cursor are dropped and at most `limit` records are forwarded. It
//! stops pulling as soon as the consumer goes away, so an abandoned request
//! releases the collaborator's cursor promptly.

use std::fmt;

use futures::stream::{BoxStream, Stream, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::params::ValidationError;
use crate::service::FetchError;

/// Lazily produced, ordered records from a collaborator.
pub type RecordStream<T> = BoxStream<'static, Result<T, FetchError>>;

/// Field a streamed query is ordered and resumed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PagingField {
    /// The record's natural key (txid, block hash, outpoint, address).
    Id,
    /// Block height, or mint height for coins.
    Height,
    /// Block timestamp in unix seconds.
    Time,
}

impl PagingField {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "id" | "_id" | "txid" | "hash" | "address" => Some(Self::Id),
            "height" | "blockHeight" | "mintHeight" => Some(Self::Height),
            "time" | "blockTime" | "blockTimeNormalized" => Some(Self::Time),
            _ => None,
        }
    }

    const fn is_numeric(self) -> bool {
        matches!(self, Self::Height | Self::Time)
    }
}

impl fmt::Display for PagingField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Id => "id",
            Self::Height => "height",
            Self::Time => "time",
        })
    }
}

/// Position of a record along a [`PagingField`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Cursor {
    Int(i64),
    Text(String),
}

/// Records that can be ordered and resumed by cursor.
pub trait Pageable {
    /// Paging fields this record type can be ordered by.
    const PAGING: &'static [PagingField];
    /// Field used when the request names none.
    const DEFAULT_PAGING: PagingField;

    /// The record's position along `field`, if it has one.
    fn cursor(&self, field: PagingField) -> Option<Cursor>;
}

/// Sort direction of a streamed query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    #[default]
    Descending,
}

/// Borrowed, unparsed pagination arguments as they arrive on the wire.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawPaging<'a> {
    pub limit: Option<&'a str>,
    pub since: Option<&'a str>,
    pub direction: Option<&'a str>,
    pub paging: Option<&'a str>,
}

/// Ordering, bound and resumption point of a streamed query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamingFindOptions {
    pub paging: PagingField,
    pub direction: Direction,
    /// Exclusive lower (ascending) or upper (descending) bound.
    pub since: Option<Cursor>,
    /// `None` means unbounded.
    pub limit: Option<u64>,
}

impl StreamingFindOptions {
    /// Default options for records of type `T`: unbounded, newest first.
    #[must_use]
    pub const fn unbounded<T: Pageable>() -> Self {
        Self {
            paging: T::DEFAULT_PAGING,
            direction: Direction::Descending,
            since: None,
            limit: None,
        }
    }

    /// Validates raw pagination arguments for records of type `T`.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] for a malformed limit or direction, a
    /// paging field `T` cannot be ordered by, or a `since` value that does not
    /// fit the paging field.
    pub fn parse<T: Pageable>(raw: RawPaging<'_>) -> Result<Self, ValidationError> {
        let mut options = Self::unbounded::<T>();

        if let Some(paging) = raw.paging {
            options.paging = PagingField::parse(paging)
                .filter(|field| T::PAGING.contains(field))
                .ok_or_else(|| ValidationError::malformed("paging", paging))?;
        }

        if let Some(direction) = raw.direction {
            options.direction = match direction.trim() {
                "1" => Direction::Ascending,
                "-1" => Direction::Descending,
                _ => return Err(ValidationError::malformed("direction", direction)),
            };
        }

        if let Some(limit) = raw.limit {
            let limit: u64 = limit
                .trim()
                .parse()
                .map_err(|_| ValidationError::malformed("limit", limit))?;
            options.limit = (limit > 0).then_some(limit);
        }

        if let Some(since) = raw.since {
            options.since = Some(if options.paging.is_numeric() {
                since
                    .trim()
                    .parse()
                    .map(Cursor::Int)
                    .map_err(|_| ValidationError::malformed("since", since))?
            } else {
                Cursor::Text(since.to_owned())
            });
        }

        Ok(options)
    }

    /// Builder-style limit setter.
    #[must_use]
    pub const fn with_limit(mut self, limit: Option<u64>) -> Self {
        self.limit = limit;
        self
    }

    /// Whether `record` lies strictly beyond the `since` cursor.
    ///
    /// Records without a value for the paging field never satisfy a cursor.
    pub fn is_beyond<T: Pageable>(&self, record: &T) -> bool {
        let Some(since) = &self.since else {
            return true;
        };
        record
            .cursor(self.paging)
            .is_some_and(|cursor| match self.direction {
                Direction::Ascending => cursor > *since,
                Direction::Descending => cursor < *since,
            })
    }
}

/// Spawns streamed queries on the runtime.
#[derive(Debug, Clone)]
pub struct StreamingQuery {
    buffer: usize,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl StreamingQuery {
    /// `buffer` bounds how many records may wait for the consumer.
    #[must_use]
    pub fn new(buffer: usize, shutdown: CancellationToken) -> Self {
        Self {
            buffer: buffer.max(1),
            shutdown,
            tasks: TaskTracker::new(),
        }
    }

    /// Spawns producers on `tasks` so shutdown can wait for them.
    #[must_use]
    pub fn with_tracker(mut self, tasks: TaskTracker) -> Self {
        self.tasks = tasks;
        self
    }

    /// Starts pulling `source` and returns the consumer side.
    ///
    /// The returned stream yields records in source order, ends after `limit`
    /// records or when the source is exhausted, and ends with an `Err` item
    /// when the source fails or the process shuts down mid-stream.
    pub fn execute<T>(
        &self,
        source: RecordStream<T>,
        options: &StreamingFindOptions,
    ) -> ReceiverStream<Result<T, FetchError>>
    where
        T: Pageable + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(self.buffer);
        self.tasks.spawn(produce(
            source,
            options.clone(),
            tx,
            self.shutdown.clone(),
        ));
        ReceiverStream::new(rx)
    }
}

async fn produce<T>(
    mut source: RecordStream<T>,
    options: StreamingFindOptions,
    tx: mpsc::Sender<Result<T, FetchError>>,
    shutdown: CancellationToken,
) where
    T: Pageable + Send,
{
    let mut emitted: u64 = 0;
    loop {
        if options.limit.is_some_and(|limit| emitted >= limit) {
            break;
        }
        let next = tokio::select! {
            biased;
            () = tx.closed() => {
                debug!(emitted, "stream consumer went away");
                break;
            }
            () = shutdown.cancelled() => {
                // Waits for room: a dropped terminal error would let the
                // consumer close the array as if it were complete.
                let interrupted = FetchError::new("stream interrupted by shutdown");
                if tx.send(Err(interrupted)).await.is_err() {
                    debug!(emitted, "stream consumer went away");
                }
                break;
            }
            next = source.next() => next,
        };
        match next {
            None => break,
            Some(Ok(record)) => {
                if !options.is_beyond(&record) {
                    continue;
                }
                if tx.send(Ok(record)).await.is_err() {
                    debug!(emitted, "stream consumer went away");
                    break;
                }
                emitted += 1;
            }
            Some(Err(error)) => {
                warn!(%error, emitted, "collaborator failed mid-stream");
                let _ = tx.send(Err(error)).await;
                break;
            }
        }
    }
    debug!(emitted, "stream finished");
}

enum Framing<S> {
    Open(S),
    Records(S, bool),
    Closed,
}

/// Frames a record stream as the chunks of a JSON array.
///
/// A complete stream produces `[`, comma separated records and `]`. An `Err`
/// item ends the output with that error and without the closing bracket, so
/// a truncated body can never be mistaken for a complete one.
pub fn json_array<S, T>(records: S) -> impl Stream<Item = Result<Vec<u8>, FetchError>> + Send
where
    S: Stream<Item = Result<T, FetchError>> + Send + Unpin,
    T: Serialize + Send,
{
    futures::stream::unfold(Framing::Open(records), |state| async move {
        match state {
            Framing::Open(records) => Some((Ok(b"[".to_vec()), Framing::Records(records, true))),
            Framing::Records(mut records, first) => match records.next().await {
                Some(Ok(record)) => {
                    let mut chunk = if first { Vec::new() } else { vec![b','] };
                    match serde_json::to_writer(&mut chunk, &record) {
                        Ok(()) => Some((Ok(chunk), Framing::Records(records, false))),
                        Err(e) => Some((Err(FetchError::with("failed to encode record", e)), Framing::Closed)),
                    }
                }
                Some(Err(error)) => Some((Err(error), Framing::Closed)),
                None => Some((Ok(b"]".to_vec()), Framing::Closed)),
            },
            Framing::Closed => None,
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use futures::stream;
    use serde::Serialize;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize)]
    struct Item {
        n: i64,
    }

    impl Pageable for Item {
        const PAGING: &'static [PagingField] = &[PagingField::Height];
        const DEFAULT_PAGING: PagingField = PagingField::Height;

        fn cursor(&self, _field: PagingField) -> Option<Cursor> {
            Some(Cursor::Int(self.n))
        }
    }

    fn items(ns: impl IntoIterator<Item = i64>) -> RecordStream<Item> {
        let items: Vec<_> = ns.into_iter().map(|n| Ok(Item { n })).collect();
        stream::iter(items).boxed()
    }

    fn executor() -> StreamingQuery {
        StreamingQuery::new(4, CancellationToken::new())
    }

    async fn collect(rx: ReceiverStream<Result<Item, FetchError>>) -> Vec<Result<i64, String>> {
        rx.map(|r| r.map(|i| i.n).map_err(|e| e.to_string()))
            .collect()
            .await
    }

    fn ascending() -> StreamingFindOptions {
        StreamingFindOptions::parse::<Item>(RawPaging {
            direction: Some("1"),
            ..RawPaging::default()
        })
        .expect("valid")
    }

    #[test]
    fn parse_defaults_to_unbounded_descending() {
        let options = StreamingFindOptions::parse::<Item>(RawPaging::default()).expect("valid");
        assert_eq!(options, StreamingFindOptions::unbounded::<Item>());
        assert_eq!(options.direction, Direction::Descending);
    }

    #[test]
    fn parse_treats_zero_limit_as_unbounded() {
        let options = StreamingFindOptions::parse::<Item>(RawPaging {
            limit: Some("0"),
            ..RawPaging::default()
        })
        .expect("valid");
        assert_eq!(options.limit, None);
    }

    #[test]
    fn parse_rejects_malformed_values() {
        let bad = [
            RawPaging { limit: Some("ten"), ..RawPaging::default() },
            RawPaging { limit: Some("-3"), ..RawPaging::default() },
            RawPaging { direction: Some("up"), ..RawPaging::default() },
            RawPaging { paging: Some("txid"), ..RawPaging::default() },
            RawPaging { paging: Some("colour"), ..RawPaging::default() },
            RawPaging { since: Some("12a"), ..RawPaging::default() },
        ];
        for raw in bad {
            assert!(
                StreamingFindOptions::parse::<Item>(raw).is_err(),
                "{raw:?} should be rejected"
            );
        }
    }

    #[test]
    fn since_is_exclusive_in_both_directions() {
        let mut options = ascending();
        options.since = Some(Cursor::Int(5));
        assert!(!options.is_beyond(&Item { n: 5 }));
        assert!(options.is_beyond(&Item { n: 6 }));

        options.direction = Direction::Descending;
        assert!(!options.is_beyond(&Item { n: 5 }));
        assert!(options.is_beyond(&Item { n: 4 }));
    }

    #[tokio::test]
    async fn emits_in_source_order_and_respects_limit() {
        let options = ascending().with_limit(Some(3));
        let out = collect(executor().execute(items(1..=10), &options)).await;
        assert_eq!(out, vec![Ok(1), Ok(2), Ok(3)]);
    }

    #[tokio::test]
    async fn resuming_from_last_cursor_yields_the_next_record() {
        let options = ascending().with_limit(Some(3));
        let first = collect(executor().execute(items(1..=10), &options)).await;
        let last = *first.last().expect("three records").as_ref().expect("ok");

        let mut resumed = ascending().with_limit(Some(1));
        resumed.since = Some(Cursor::Int(last));
        let next = collect(executor().execute(items(1..=10), &resumed)).await;
        assert_eq!(next, vec![Ok(4)]);
    }

    #[tokio::test]
    async fn source_failure_ends_stream_after_partial_output() {
        let source = stream::iter(vec![
            Ok(Item { n: 1 }),
            Ok(Item { n: 2 }),
            Err(FetchError::new("cursor died")),
            Ok(Item { n: 3 }),
        ])
        .boxed();
        let out = collect(executor().execute(source, &ascending())).await;
        assert_eq!(out, vec![Ok(1), Ok(2), Err("cursor died".to_owned())]);
    }

    #[tokio::test]
    async fn producers_run_on_the_given_tracker() {
        let tasks = TaskTracker::new();
        let executor = executor().with_tracker(tasks.clone());
        let out = collect(executor.execute(items(1..=3), &ascending())).await;
        assert_eq!(out.len(), 3);
        tasks.close();
        tokio::time::timeout(Duration::from_secs(1), tasks.wait())
            .await
            .expect("producer finished");
    }

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn dropping_the_consumer_releases_the_source() {
        let released = Arc::new(AtomicBool::new(false));
        let guard = DropFlag(Arc::clone(&released));
        let source = stream::repeat_with(move || {
            let _keep = &guard;
            Ok(Item { n: 1 })
        })
        .boxed();

        let mut rx = executor().execute(source, &StreamingFindOptions::unbounded::<Item>());
        assert!(rx.next().await.is_some());
        drop(rx);

        for _ in 0..100 {
            if released.load(Ordering::SeqCst) {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("source was not dropped after the consumer went away");
    }

    #[tokio::test]
    async fn shutdown_terminates_with_an_error() {
        let shutdown = CancellationToken::new();
        let executor = StreamingQuery::new(1, shutdown.clone());
        shutdown.cancel();
        let source = stream::pending().boxed();
        let out = collect(executor.execute(source, &ascending())).await;
        assert_eq!(out.len(), 1);
        assert!(out[0].is_err());
    }

    #[tokio::test]
    async fn shutdown_with_a_full_buffer_still_truncates_the_array() {
        let shutdown = CancellationToken::new();
        let executor = StreamingQuery::new(1, shutdown.clone());
        let mut n = 0;
        let source = stream::repeat_with(move || {
            n += 1;
            Ok(Item { n })
        })
        .boxed();

        let rx = executor.execute(source, &StreamingFindOptions::unbounded::<Item>());
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        shutdown.cancel();

        let chunks: Vec<_> = json_array(rx).collect().await;
        assert!(chunks.last().is_some_and(Result::is_err));
        let body: Vec<u8> = chunks.into_iter().filter_map(Result::ok).flatten().collect();
        assert!(!body.ends_with(b"]"));
    }

    async fn frame(source: Vec<Result<Item, FetchError>>) -> (String, bool) {
        let chunks: Vec<_> = json_array(stream::iter(source)).collect().await;
        let failed = chunks.iter().any(Result::is_err);
        let body = chunks
            .into_iter()
            .filter_map(Result::ok)
            .flatten()
            .collect::<Vec<u8>>();
        (String::from_utf8(body).expect("utf8"), failed)
    }

    #[tokio::test]
    async fn frames_a_complete_json_array() {
        let (body, failed) = frame(vec![Ok(Item { n: 1 }), Ok(Item { n: 2 })]).await;
        assert!(!failed);
        assert_eq!(body, r#"[{"n":1},{"n":2}]"#);

        let (empty, _) = frame(vec![]).await;
        assert_eq!(empty, "[]");
    }

    #[tokio::test]
    async fn truncated_stream_is_not_valid_json() {
        let (body, failed) = frame(vec![Ok(Item { n: 1 }), Err(FetchError::new("boom"))]).await;
        assert!(failed);
        assert_eq!(body, r#"[{"n":1}"#);
        assert!(serde_json::from_str::<serde_json::Value>(&body).is_err());
    }
}
