//! Update Subscriber
//!
//! Wraps the remote push feed in a cancellable, fused sequence bound to a
//! [`Scope`]. The sequence ends in exactly one of two terminal values:
//! `Stopped` when the scope is cancelled, `Failed` when the connection breaks.

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Result, SyncError};
use crate::model::{Selector, UpdateEvent};
use crate::provider::{UpdateFeed, WorkspaceApi};
use crate::scope::Scope;

/// How an update sequence ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamEnd {
    /// The owning scope was cancelled.
    Stopped,
    /// The remote feed errored or went away.
    Failed(SyncError),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamItem {
    Update(UpdateEvent),
    End(StreamEnd),
}

/// A live subscription. Not restartable: once it has ended every further call
/// to [`UpdateStream::next`] returns the same terminal value.
pub struct UpdateStream {
    feed: Option<UpdateFeed>,
    selector: Selector,
    cancel: CancellationToken,
    ended: Option<StreamEnd>,
}

impl UpdateStream {
    fn new(feed: UpdateFeed, selector: Selector, cancel: CancellationToken) -> Self {
        Self {
            feed: Some(feed),
            selector,
            cancel,
            ended: None,
        }
    }

    /// Wait for the next event or the terminal value.
    pub async fn next(&mut self) -> StreamItem {
        loop {
            if let Some(end) = &self.ended {
                return StreamItem::End(end.clone());
            }
            let Some(feed) = self.feed.as_mut() else {
                return self.finish(StreamEnd::Stopped);
            };

            let item = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                item = feed.next() => Some(item),
            };

            match item {
                None => return self.finish(StreamEnd::Stopped),
                Some(Some(Ok(event))) => {
                    if self.selector.matches(&event.session_id) {
                        return StreamItem::Update(event);
                    }
                    debug!(session = %event.session_id, "update outside selector dropped");
                }
                Some(Some(Err(e))) => return self.finish(StreamEnd::Failed(e)),
                Some(None) => {
                    return self.finish(StreamEnd::Failed(SyncError::SubscriptionBroken(
                        "update feed closed by remote".to_string(),
                    )));
                }
            }
        }
    }

    pub fn is_ended(&self) -> bool {
        self.ended.is_some()
    }

    fn finish(&mut self, end: StreamEnd) -> StreamItem {
        // Dropping the feed releases the remote subscription.
        self.feed = None;
        self.ended = Some(end.clone());
        StreamItem::End(end)
    }
}

/// Open a subscription bound to `scope`.
pub async fn subscribe<A: WorkspaceApi>(
    scope: &Scope,
    api: &A,
    selector: Selector,
) -> Result<UpdateStream> {
    let feed = scope.run(api.subscribe_updates(&selector)).await??;
    debug!(selector = %selector, "subscribed to updates");
    Ok(UpdateStream::new(feed, selector, scope.token()))
}
