// Combination strategies over asynchronous sources
//
// Every combinator here is a plain function from boxed sources to one boxed
// future or stream. Dropping the returned value drops (and so cancels) every
// source it still holds.

use crate::api::ApiError;
use futures::future::{self, BoxFuture};
use futures::stream::{self, BoxStream, StreamExt};
use std::task::{ready, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

pub type SourceFuture<T> = BoxFuture<'static, Result<T, ApiError>>;
pub type SourceStream<T> = BoxStream<'static, Result<T, ApiError>>;

enum Side<L, R> {
    Left(L),
    Right(R),
}

/// Turns a single-valued source into a one-item stream.
pub fn single<T: Send + 'static>(source: SourceFuture<T>) -> SourceStream<T> {
    stream::once(source).boxed()
}

/// Emits 0, 1, 2, ... once per `period`, starting one period from now.
pub fn interval_stream(period: Duration) -> BoxStream<'static, u64> {
    let period = period.max(Duration::from_millis(1));
    let ticker = tokio::time::interval_at(Instant::now() + period, period);
    stream::unfold((ticker, 0u64), |(mut ticker, count)| async move {
        ticker.tick().await;
        Some((count, (ticker, count + 1)))
    })
    .boxed()
}

pub(crate) fn receiver_stream<T: Send + 'static>(
    receiver: mpsc::UnboundedReceiver<T>,
) -> BoxStream<'static, T> {
    stream::unfold(receiver, |mut receiver| async move {
        receiver.recv().await.map(|item| (item, receiver))
    })
    .boxed()
}

// Ends the stream right after its first error (or its natural end)
fn terminate_on_error<T: Send + 'static>(mut source: SourceStream<T>) -> SourceStream<T> {
    let mut finished = false;
    stream::poll_fn(move |cx| {
        if finished {
            return Poll::Ready(None);
        }
        let next = ready!(source.poll_next_unpin(cx));
        if !matches!(next, Some(Ok(_))) {
            finished = true;
        }
        Poll::Ready(next)
    })
    .boxed()
}

/// Resolves with whichever source settles first, success or failure, and
/// drops the others. Sources ready in the same poll are tie-broken by the
/// lowest index.
pub async fn race_first<T: Send + 'static>(sources: Vec<SourceFuture<T>>) -> Result<T, ApiError> {
    if sources.is_empty() {
        return Err(ApiError::NoSources);
    }

    let (result, winner, losers) = future::select_all(sources).await;
    debug!(winner, cancelled = losers.len(), "race settled");
    drop(losers);
    result
}

/// Waits for every source, then combines the results in source order.
/// The first failure wins and the remaining sources are dropped.
pub async fn all_then_combine<T, R, F>(sources: Vec<SourceFuture<T>>, combine: F) -> Result<R, ApiError>
where
    T: Send + 'static,
    F: FnOnce(Vec<T>) -> R,
{
    let results = future::try_join_all(sources).await?;
    Ok(combine(results))
}

pub async fn zip_with<A, B, R, F>(
    first: SourceFuture<A>,
    second: SourceFuture<B>,
    combine: F,
) -> Result<R, ApiError>
where
    A: Send + 'static,
    B: Send + 'static,
    F: FnOnce(A, B) -> R,
{
    let (a, b) = future::try_join(first, second).await?;
    Ok(combine(a, b))
}

/// Relays items from every source as they arrive. Completes once all sources
/// complete; the first error ends the merged stream.
pub fn merge_as_available<T: Send + 'static>(sources: Vec<SourceStream<T>>) -> SourceStream<T> {
    terminate_on_error(stream::select_all(sources).boxed())
}

/// Subscribes to each source only after the previous one completed.
pub fn concat<T: Send + 'static>(sources: Vec<SourceStream<T>>) -> SourceStream<T> {
    terminate_on_error(stream::iter(sources).flatten().boxed())
}

/// Like [`merge_as_available`], but a failing source only stops itself. The
/// failures are held back and yielded once every source has finished.
pub fn error_deferred_merge<T: Send + 'static>(sources: Vec<SourceStream<T>>) -> SourceStream<T> {
    let mut merged = stream::select_all(sources.into_iter().map(terminate_on_error));
    let mut errors = Vec::new();
    let mut finished = false;

    stream::poll_fn(move |cx| loop {
        if finished {
            return Poll::Ready(None);
        }
        match ready!(merged.poll_next_unpin(cx)) {
            Some(Ok(item)) => return Poll::Ready(Some(Ok(item))),
            Some(Err(error)) => {
                warn!(%error, "source failed, deferring until the others finish");
                errors.push(error);
            }
            None => {
                finished = true;
                return Poll::Ready(ApiError::from_many(std::mem::take(&mut errors)).map(Err));
            }
        }
    })
    .boxed()
}

/// Emits `combine(left, right)` whenever either input changes, once both
/// have produced a value. Only the freshest pair is ever used.
pub fn combine_latest<A, B, R, F>(
    mut left: BoxStream<'static, A>,
    mut right: BoxStream<'static, B>,
    mut combine: F,
) -> BoxStream<'static, R>
where
    A: Send + 'static,
    B: Send + 'static,
    R: Send + 'static,
    F: FnMut(&A, &B) -> R + Send + 'static,
{
    let mut latest_left: Option<A> = None;
    let mut latest_right: Option<B> = None;
    let mut left_done = false;
    let mut right_done = false;
    // Alternate which side is polled first so a busy input cannot starve the other
    let mut right_first = false;

    stream::poll_fn(move |cx| loop {
        let starved = (left_done && latest_left.is_none()) || (right_done && latest_right.is_none());
        if starved || (left_done && right_done) {
            return Poll::Ready(None);
        }

        let mut updated = false;
        for poll_right in [right_first, !right_first] {
            if updated {
                break;
            }
            if poll_right && !right_done {
                match right.poll_next_unpin(cx) {
                    Poll::Ready(Some(value)) => {
                        latest_right = Some(value);
                        updated = true;
                    }
                    Poll::Ready(None) => right_done = true,
                    Poll::Pending => {}
                }
            } else if !poll_right && !left_done {
                match left.poll_next_unpin(cx) {
                    Poll::Ready(Some(value)) => {
                        latest_left = Some(value);
                        updated = true;
                    }
                    Poll::Ready(None) => left_done = true,
                    Poll::Pending => {}
                }
            }
        }

        if updated {
            right_first = !right_first;
            if let (Some(a), Some(b)) = (&latest_left, &latest_right) {
                return Poll::Ready(Some(combine(a, b)));
            }
            continue;
        }

        if left_done || right_done {
            // A side just finished; re-evaluate the end condition
            let starved =
                (left_done && latest_left.is_none()) || (right_done && latest_right.is_none());
            if starved || (left_done && right_done) {
                return Poll::Ready(None);
            }
        }
        return Poll::Pending;
    })
    .boxed()
}

/// Relays the items of the most recent inner stream. A new inner stream
/// replaces (and drops) the previous one.
pub fn switch_on_next<T: Send + 'static>(
    mut outer: BoxStream<'static, BoxStream<'static, T>>,
) -> BoxStream<'static, T> {
    let mut current: Option<BoxStream<'static, T>> = None;
    let mut outer_done = false;

    stream::poll_fn(move |cx| loop {
        if !outer_done {
            match outer.poll_next_unpin(cx) {
                Poll::Ready(Some(inner)) => {
                    if current.is_some() {
                        debug!("switching to newer inner stream");
                    }
                    current = Some(inner);
                    continue;
                }
                Poll::Ready(None) => outer_done = true,
                Poll::Pending => {}
            }
        }

        let Some(inner) = current.as_mut() else {
            return if outer_done { Poll::Ready(None) } else { Poll::Pending };
        };

        match inner.poll_next_unpin(cx) {
            Poll::Ready(Some(item)) => return Poll::Ready(Some(item)),
            Poll::Ready(None) => {
                current = None;
                if outer_done {
                    return Poll::Ready(None);
                }
                // outer was already polled and is pending
                return Poll::Pending;
            }
            Poll::Pending => return Poll::Pending,
        }
    })
    .boxed()
}

/// Pairs left and right items whose windows overlap. Each item opens a window
/// of the length given by its window function at the moment it arrives; an
/// item arriving at the exact instant a window closes still falls inside it.
pub fn join<L, R, O, WL, WR, F>(
    left: BoxStream<'static, L>,
    right: BoxStream<'static, R>,
    left_window: WL,
    right_window: WR,
    mut selector: F,
) -> BoxStream<'static, O>
where
    L: Send + 'static,
    R: Send + 'static,
    O: Send + 'static,
    WL: Fn(&L) -> Duration + Send + 'static,
    WR: Fn(&R) -> Duration + Send + 'static,
    F: FnMut(&L, &R) -> O + Send + 'static,
{
    let merged = stream::select(left.map(Side::Left), right.map(Side::Right));
    let mut lefts: Vec<(L, Instant)> = Vec::new();
    let mut rights: Vec<(R, Instant)> = Vec::new();

    merged
        .flat_map(move |side| {
            let now = Instant::now();
            lefts.retain(|(_, closes_at)| *closes_at >= now);
            rights.retain(|(_, closes_at)| *closes_at >= now);

            let pairs: Vec<O> = match side {
                Side::Left(item) => {
                    let pairs = rights.iter().map(|(r, _)| selector(&item, r)).collect();
                    let closes_at = now + left_window(&item);
                    lefts.push((item, closes_at));
                    pairs
                }
                Side::Right(item) => {
                    let pairs = lefts.iter().map(|(l, _)| selector(l, &item)).collect();
                    let closes_at = now + right_window(&item);
                    rights.push((item, closes_at));
                    pairs
                }
            };
            stream::iter(pairs)
        })
        .boxed()
}

/// Like [`join`], but every left item gets one sub-stream carrying all right
/// items inside its window. The sub-stream closes when the left window
/// expires or both inputs end. Must be called within a tokio runtime.
pub fn group_join<L, R, WL, WR>(
    left: BoxStream<'static, L>,
    right: BoxStream<'static, R>,
    left_window: WL,
    right_window: WR,
) -> BoxStream<'static, (L, BoxStream<'static, R>)>
where
    L: Send + 'static,
    R: Clone + Send + 'static,
    WL: Fn(&L) -> Duration + Send + 'static,
    WR: Fn(&R) -> Duration + Send + 'static,
{
    let (groups_tx, groups_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let mut merged = stream::select(left.map(Side::Left), right.map(Side::Right));
        let mut open_groups: Vec<(Instant, mpsc::UnboundedSender<R>)> = Vec::new();
        let mut rights: Vec<(R, Instant)> = Vec::new();

        loop {
            let next_close = open_groups.iter().map(|(closes_at, _)| *closes_at).min();

            tokio::select! {
                biased;

                _ = groups_tx.closed() => break,

                event = merged.next() => {
                    let now = Instant::now();
                    open_groups.retain(|(closes_at, group)| *closes_at >= now && !group.is_closed());
                    rights.retain(|(_, closes_at)| *closes_at >= now);

                    match event {
                        None => break,
                        Some(Side::Left(item)) => {
                            let (group_tx, group_rx) = mpsc::unbounded_channel();
                            for (r, _) in &rights {
                                let _ = group_tx.send(r.clone());
                            }
                            open_groups.push((now + left_window(&item), group_tx));
                            if groups_tx.send((item, receiver_stream(group_rx))).is_err() {
                                break;
                            }
                        }
                        Some(Side::Right(item)) => {
                            for (_, group) in &open_groups {
                                let _ = group.send(item.clone());
                            }
                            rights.push((item.clone(), now + right_window(&item)));
                        }
                    }
                }

                _ = async {
                    match next_close {
                        Some(at) => tokio::time::sleep_until(at).await,
                        None => future::pending::<()>().await,
                    }
                } => {
                    let now = Instant::now();
                    open_groups.retain(|(closes_at, _)| *closes_at > now);
                }
            }
        }
        debug!("group join finished");
    });

    receiver_stream(groups_rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    fn delayed<T: Send + 'static>(ms: u64, result: Result<T, ApiError>) -> SourceFuture<T> {
        async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            result
        }
        .boxed()
    }

    fn tracked<T: Send + 'static>(
        ms: u64,
        result: Result<T, ApiError>,
        dropped: Arc<AtomicBool>,
    ) -> SourceFuture<T> {
        async move {
            let _flag = DropFlag(dropped);
            tokio::time::sleep(Duration::from_millis(ms)).await;
            result
        }
        .boxed()
    }

    // Emits each item at the given offset (ms) from creation
    fn timed<T: Send + 'static>(events: Vec<(u64, Result<T, ApiError>)>) -> SourceStream<T> {
        let start = Instant::now();
        stream::iter(events)
            .then(move |(at, item)| async move {
                tokio::time::sleep_until(start + Duration::from_millis(at)).await;
                item
            })
            .boxed()
    }

    #[tokio::test(start_paused = true)]
    async fn test_race_first_keeps_quickest_and_drops_rest() {
        let slow_dropped = Arc::new(AtomicBool::new(false));
        let sources = vec![
            delayed(100, Ok("earth")),
            tracked(300, Ok("mars"), slow_dropped.clone()),
        ];

        let winner = race_first(sources).await.unwrap();
        assert_eq!(winner, "earth");
        assert!(slow_dropped.load(Ordering::SeqCst), "Slower source should be cancelled");
    }

    #[tokio::test(start_paused = true)]
    async fn test_race_first_relays_earliest_failure() {
        let sources = vec![
            delayed(100, Ok(1)),
            delayed(10, Err(ApiError::Timeout(10))),
        ];
        assert_eq!(race_first(sources).await, Err(ApiError::Timeout(10)));
    }

    #[tokio::test]
    async fn test_race_first_ties_go_to_lowest_index() {
        let sources: Vec<SourceFuture<u32>> = vec![
            future::ready(Ok(1)).boxed(),
            future::ready(Ok(2)).boxed(),
        ];
        assert_eq!(race_first(sources).await, Ok(1));
        assert_eq!(race_first::<u32>(vec![]).await, Err(ApiError::NoSources));
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_then_combine_concatenates_in_source_order() {
        // The first source finishes last; order still follows the sources
        let sources = vec![delayed(200, Ok(vec![1, 2])), delayed(50, Ok(vec![3, 4]))];
        let combined = all_then_combine(sources, |parts| parts.concat()).await;
        assert_eq!(combined, Ok(vec![1, 2, 3, 4]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_then_combine_fails_fast() {
        let straggler_dropped = Arc::new(AtomicBool::new(false));
        let sources = vec![
            tracked(5_000, Ok(vec![1]), straggler_dropped.clone()),
            delayed(10, Err(ApiError::NetworkError("offline".into()))),
        ];

        let started = Instant::now();
        let result = all_then_combine(sources, |parts| parts.concat()).await;
        assert_eq!(result, Err(ApiError::NetworkError("offline".into())));
        assert!(started.elapsed() < Duration::from_millis(5_000));
        assert!(straggler_dropped.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zip_with_pairs_both_results() {
        let zipped = zip_with(delayed(20, Ok(2)), delayed(10, Ok("b")), |a, b| {
            format!("{}{}", a, b)
        })
        .await;
        assert_eq!(zipped, Ok("2b".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_merge_relays_in_arrival_order() {
        let a = timed(vec![(0, Ok("A0")), (2000, Ok("A2"))]);
        let b = timed(vec![(1000, Ok("B1"))]);

        let items: Vec<_> = merge_as_available(vec![a, b]).collect().await;
        assert_eq!(items, vec![Ok("A0"), Ok("B1"), Ok("A2")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_merge_stops_at_first_error() {
        let a = timed(vec![(0, Ok(1)), (3000, Ok(2))]);
        let b = timed(vec![(1000, Err(ApiError::Timeout(1000)))]);

        let items: Vec<_> = merge_as_available(vec![a, b]).collect().await;
        assert_eq!(items, vec![Ok(1), Err(ApiError::Timeout(1000))]);
    }

    #[tokio::test]
    async fn test_merge_of_nothing_completes() {
        let items: Vec<Result<u32, ApiError>> = merge_as_available(vec![]).collect().await;
        assert!(items.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concat_waits_for_previous_source() {
        let slow = timed(vec![(500, Ok(1)), (600, Ok(2))]);
        let fast = timed(vec![(0, Ok(3))]);

        let items: Vec<_> = concat(vec![slow, fast]).collect().await;
        assert_eq!(items, vec![Ok(1), Ok(2), Ok(3)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_deferred_merge_surfaces_error_last() {
        let failing = single(delayed(0, Err(ApiError::Other("experimental".into()))));
        let slow = single(delayed(3000, Ok("mars")));
        let fast = single(delayed(1000, Ok("earth")));

        let items: Vec<_> = error_deferred_merge(vec![failing, slow, fast]).collect().await;
        assert_eq!(
            items,
            vec![
                Ok("earth"),
                Ok("mars"),
                Err(ApiError::Other("experimental".into()))
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_deferred_merge_collects_every_failure() {
        let sources = vec![
            timed(vec![(0, Ok(1)), (10, Err(ApiError::Timeout(1))), (20, Ok(99))]),
            timed(vec![(5, Err(ApiError::Timeout(2)))]),
        ];

        let items: Vec<_> = error_deferred_merge(sources).collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0], Ok(1));
        assert_eq!(
            items[1],
            Err(ApiError::Composite(vec![
                ApiError::Timeout(2),
                ApiError::Timeout(1)
            ]))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_combine_latest_uses_freshest_pair() {
        let toggles = timed(vec![(0, Ok(false)), (300, Ok(true))]).map(|r| r.unwrap()).boxed();
        let counts = timed(vec![(100, Ok(1u32)), (200, Ok(3u32))]).map(|r| r.unwrap()).boxed();

        let pairs: Vec<_> = combine_latest(toggles, counts, |t, c| (*t, *c)).collect().await;
        assert_eq!(pairs, vec![(false, 1), (false, 3), (true, 3)]);
    }

    #[tokio::test]
    async fn test_combine_latest_ends_when_a_side_never_emits() {
        let empty = stream::empty::<u32>().boxed();
        let values = stream::iter(vec![1u32, 2]).boxed();
        let pairs: Vec<u32> = combine_latest(empty, values, |a, b| a + b).collect().await;
        assert!(pairs.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_switch_on_next_drops_stale_inner() {
        let outer = interval_stream(Duration::from_millis(3000))
            .map(|outer_tick| {
                interval_stream(Duration::from_millis(1000))
                    .map(move |inner_tick| (outer_tick, inner_tick))
                    .boxed()
            })
            .boxed();

        let relayed: Vec<_> = switch_on_next(outer).take(5).collect().await;
        // The first inner reaches its third tick exactly when the outer ticks
        // again; the outer wins and the stale inner is dropped
        assert_eq!(relayed, vec![(0, 0), (0, 1), (1, 0), (1, 1), (2, 0)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_pairs_coincident_ticks() {
        let left = interval_stream(Duration::from_millis(1000))
            .map(|n| format!("SOURCE-1 {}", n))
            .boxed();
        let right = interval_stream(Duration::from_millis(3000))
            .map(|n| format!("SOURCE-2 {}", n))
            .boxed();

        let pairs: Vec<_> = join(
            left,
            right,
            |_| Duration::ZERO,
            |_| Duration::ZERO,
            |l, r| format!("{}, {}", l, r),
        )
        .take(2)
        .collect()
        .await;

        assert_eq!(
            pairs,
            vec!["SOURCE-1 2, SOURCE-2 0", "SOURCE-1 5, SOURCE-2 1"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_matches_every_open_window() {
        let left = timed(vec![(0, Ok("a")), (50, Ok("b"))]).map(|r| r.unwrap()).boxed();
        let right = timed(vec![(80, Ok("x")), (500, Ok("y"))]).map(|r| r.unwrap()).boxed();

        let pairs: Vec<_> = join(
            left,
            right,
            |_| Duration::from_millis(100),
            |_| Duration::ZERO,
            |l, r| format!("{}{}", l, r),
        )
        .collect()
        .await;

        assert_eq!(pairs, vec!["ax", "bx"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_group_join_groups_right_items_per_left_window() {
        let left = timed(vec![(0, Ok("L0")), (1000, Ok("L1")), (5000, Ok("L2"))])
            .map(|r| r.unwrap())
            .boxed();
        let right = timed(vec![(500, Ok("R0")), (1200, Ok("R1"))])
            .map(|r| r.unwrap())
            .boxed();

        let flattened: Vec<_> = group_join(
            left,
            right,
            |_| Duration::from_millis(600),
            |_| Duration::from_millis(1000),
        )
        .flat_map(|(l, group)| group.map(move |r| format!("{}+{}", l, r)))
        .collect()
        .await;

        // L0 sees R0 inside its window; L1 sees R0 still open and R1 as it
        // arrives; R's have all closed by the time L2 arrives
        assert_eq!(flattened, vec!["L0+R0", "L1+R0", "L1+R1"]);
    }
}
