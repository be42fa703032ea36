//! Long-lived watch sessions.
//!
//! A session is an independent task looping over (snapshot, wait) cycles:
//! mark the notifier version seen, query revisions past the cursor, emit
//! them in id order, and wait on the hub only when the query came back
//! empty. The outbound channel is bounded, so a slow consumer blocks the
//! session before it reads more rows; nothing is ever dropped.
use crate::{
    codec,
    error::Result,
    store::{Filter, Store},
};
use futures::{channel::mpsc, SinkExt, Stream};
use minka_core::{
    watch::{Bookmark, WatchEvent},
    DynamicObject, ListOptions,
};
use std::{
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Where a session begins
pub(crate) enum WatchStart {
    /// Emit the current state as `ADDED` events, then follow changes
    Snapshot,
    /// Resume strictly after an explicit revision
    Cursor(i64),
}

/// An ordered stream of watch events for one table.
///
/// Dropping the stream cancels the session.
#[derive(Debug)]
pub struct WatchStream {
    rx: mpsc::Receiver<WatchEvent<DynamicObject>>,
}

impl Stream for WatchStream {
    type Item = WatchEvent<DynamicObject>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.rx).poll_next(cx)
    }
}

pub(crate) fn spawn(store: Store, filter: Filter, opts: ListOptions, start: WatchStart) -> WatchStream {
    let (tx, rx) = mpsc::channel(store.config.watch_buffer);
    tokio::spawn(session(store, filter, opts, start, tx));
    WatchStream { rx }
}

type EventSender = mpsc::Sender<WatchEvent<DynamicObject>>;

async fn session(
    store: Store,
    filter: Filter,
    opts: ListOptions,
    start: WatchStart,
    mut tx: EventSender,
) {
    if let Err(err) = run(&store, &filter, &opts, start, &mut tx).await {
        warn!(table = %store.table.def.table_name(), error = %err, "watch session failed");
        let _ = tx.send(WatchEvent::Error(err.into_response())).await;
    }
    // dropping tx closes the stream
}

/// Send an event, applying backpressure; `false` means the consumer went
/// away and the session should end
async fn send(tx: &mut EventSender, event: WatchEvent<DynamicObject>) -> bool {
    tx.send(event).await.is_ok()
}

async fn run(
    store: &Store,
    filter: &Filter,
    opts: &ListOptions,
    start: WatchStart,
    tx: &mut EventSender,
) -> Result<()> {
    let batch = i64::from(store.config.watch_batch);
    let predicates = filter.predicates(&store.table);
    let deadline = opts
        .timeout
        .map(|secs| Instant::now() + Duration::from_secs(u64::from(secs)));
    let mut rx = store.table.hub.subscribe();

    // the initial-events-end condition from the watch contract
    let bookmark_on_start = opts.send_initial_events || (opts.bookmarks && opts.wants_latest());

    let mut cursor = match start {
        WatchStart::Cursor(rv) => rv,
        WatchStart::Snapshot => {
            let snapshot = store.snapshot_id().await?;
            let mut after: Option<(String, String)> = None;
            loop {
                let after_ref = after.as_ref().map(|(ns, n)| (ns.as_str(), n.as_str()));
                let rows = store.current_page(snapshot, &predicates, after_ref, batch).await?;
                let exhausted = (rows.len() as i64) < batch;
                for rev in &rows {
                    let value = rev.parse()?;
                    if filter.matches(&value) {
                        let object = codec::decode_value(value, rev.id)?;
                        if !send(tx, WatchEvent::Added(object)).await {
                            return Ok(());
                        }
                    }
                }
                if exhausted {
                    break;
                }
                after = rows.last().map(|r| (r.namespace.clone(), r.name.clone()));
            }
            snapshot
        }
    };

    if bookmark_on_start
        && !send(tx, WatchEvent::Bookmark(Bookmark::initial_events_end(cursor))).await
    {
        return Ok(());
    }
    debug!(table = %store.table.def.table_name(), cursor, "watch session started");

    loop {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return Ok(());
        }
        // mark the notifier version seen *before* querying so a commit
        // landing between query and wait still wakes us
        rx.borrow_and_update();
        let rows = store.since(cursor, &predicates, batch).await?;
        if rows.is_empty() {
            let mut wait = store.config.progress_interval;
            if let Some(d) = deadline {
                wait = wait.min(d.saturating_duration_since(Instant::now()));
            }
            tokio::select! {
                _ = store.table.shutdown.cancelled() => return Ok(()),
                changed = rx.changed() => {
                    if changed.is_err() {
                        return Ok(());
                    }
                }
                _ = tokio::time::sleep(wait) => {
                    if deadline.is_some_and(|d| Instant::now() >= d) {
                        return Ok(());
                    }
                    if (opts.bookmarks || opts.progress_notify)
                        && !send(tx, WatchEvent::Bookmark(Bookmark::at(cursor))).await
                    {
                        return Ok(());
                    }
                }
            }
            continue;
        }
        for rev in rows {
            cursor = rev.id;
            let value = rev.parse()?;
            if !filter.matches(&value) {
                continue;
            }
            let event = rev.event(value)?;
            if !send(tx, event).await {
                return Ok(());
            }
        }
    }
}
