//! Scope Tree
//!
//! Hierarchical cancellation contexts. A scope is an explicit handle that is
//! passed to every operation needing cancellation; there is no ambient
//! "current scope".
//!
//! Terminating a scope terminates every descendant first, then runs the
//! scope's own termination callbacks, each exactly once. Work bound to a
//! terminated scope is rejected with [`SyncError::ScopeTerminated`].

use std::future::Future;
use std::sync::{Arc, Mutex, Weak};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Result, SyncError};

type TerminationCallback = Box<dyn FnOnce() + Send + 'static>;

struct ScopeInner {
    token: CancellationToken,
    parent: Option<Weak<ScopeInner>>,
    state: Mutex<ScopeState>,
}

/// Children are held strongly so a subtree whose handles were all dropped is
/// still reached by an ancestor's termination. A child removes itself from
/// its parent when it terminates on its own.
#[derive(Default)]
struct ScopeState {
    terminated: bool,
    callbacks: Vec<TerminationCallback>,
    children: Vec<Arc<ScopeInner>>,
}

impl ScopeInner {
    fn lock(&self) -> std::sync::MutexGuard<'_, ScopeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// A node in the cancellation tree. Cloning yields another handle to the same node.
#[derive(Clone)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl Scope {
    /// A new top-level scope, typically tied to a UI view's visibility.
    pub fn root() -> Self {
        Self::with_token(CancellationToken::new(), None)
    }

    fn with_token(token: CancellationToken, parent: Option<Weak<ScopeInner>>) -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                token,
                parent,
                state: Mutex::new(ScopeState::default()),
            }),
        }
    }

    /// Create a nested scope. The child can be terminated on its own; terminating
    /// `self` terminates the child.
    pub fn create_child(&self) -> Result<Scope> {
        let mut state = self.inner.lock();
        if state.terminated || self.inner.token.is_cancelled() {
            return Err(SyncError::ScopeTerminated);
        }
        let child = Scope::with_token(
            self.inner.token.child_token(),
            Some(Arc::downgrade(&self.inner)),
        );
        state.children.push(child.inner.clone());
        Ok(child)
    }

    /// Register a callback to run once when this scope terminates.
    pub fn on_termination<F>(&self, callback: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.inner.lock();
        if state.terminated {
            return Err(SyncError::ScopeTerminated);
        }
        state.callbacks.push(Box::new(callback));
        Ok(())
    }

    /// Terminate this scope and all of its descendants. Idempotent.
    pub fn terminate(&self) {
        let (callbacks, children) = {
            let mut state = self.inner.lock();
            if state.terminated {
                return;
            }
            state.terminated = true;
            (
                std::mem::take(&mut state.callbacks),
                std::mem::take(&mut state.children),
            )
        };

        self.inner.token.cancel();

        // A no-op when the parent is the one terminating: it already took its
        // children list.
        if let Some(parent) = self.inner.parent.as_ref().and_then(Weak::upgrade) {
            parent
                .lock()
                .children
                .retain(|c| !Arc::ptr_eq(c, &self.inner));
        }

        for child in children {
            Scope { inner: child }.terminate();
        }

        debug!(callbacks = callbacks.len(), "scope terminated");
        for callback in callbacks {
            callback();
        }
    }

    pub fn is_alive(&self) -> bool {
        !self.inner.token.is_cancelled()
    }

    /// Resolves once this scope (or any ancestor) has been terminated.
    pub async fn cancelled(&self) {
        self.inner.token.cancelled().await
    }

    /// A cancellation token that fires when this scope terminates.
    pub fn token(&self) -> CancellationToken {
        self.inner.token.clone()
    }

    /// Race `fut` against termination. Returns `Err(ScopeTerminated)` if the
    /// scope is already dead or dies before `fut` completes.
    pub async fn run<F>(&self, fut: F) -> Result<F::Output>
    where
        F: Future,
    {
        if !self.is_alive() {
            return Err(SyncError::ScopeTerminated);
        }
        tokio::select! {
            biased;
            _ = self.inner.token.cancelled() => Err(SyncError::ScopeTerminated),
            out = fut => Ok(out),
        }
    }

    /// Spawn a task bound to this scope. The task stops at its next suspension
    /// point once the scope terminates and is aborted by the termination callback.
    pub fn spawn<F>(&self, fut: F) -> Result<JoinHandle<()>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if !self.is_alive() {
            return Err(SyncError::ScopeTerminated);
        }
        let token = self.inner.token.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => {}
                _ = fut => {}
            }
        });
        let abort = handle.abort_handle();
        if let Err(e) = self.on_termination(move || abort.abort()) {
            handle.abort();
            return Err(e);
        }
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn counter() -> (Arc<AtomicUsize>, impl FnOnce() + Send + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        (count, move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn terminate_runs_callbacks_once() {
        let scope = Scope::root();
        let (count, cb) = counter();
        scope.on_termination(cb).unwrap();

        scope.terminate();
        scope.terminate();

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!scope.is_alive());
    }

    #[test]
    fn parent_termination_cascades_to_descendants() {
        let root = Scope::root();
        let child = root.create_child().unwrap();
        let grandchild = child.create_child().unwrap();
        let (count, cb) = counter();
        grandchild.on_termination(cb).unwrap();

        root.terminate();

        assert!(!child.is_alive());
        assert!(!grandchild.is_alive());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cascade_reaches_subtree_whose_handles_were_dropped() {
        let root = Scope::root();
        let (count, cb) = counter();
        let grandchild = {
            let child = root.create_child().unwrap();
            child.create_child().unwrap()
        };
        grandchild.on_termination(cb).unwrap();

        root.terminate();

        assert!(!grandchild.is_alive());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cascade_reaches_unreferenced_grandchild_callbacks() {
        let root = Scope::root();
        let (count, cb) = counter();
        {
            let child = root.create_child().unwrap();
            let grandchild = child.create_child().unwrap();
            grandchild.on_termination(cb).unwrap();
        }

        root.terminate();

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn terminated_child_is_released_by_parent() {
        let root = Scope::root();
        let child = root.create_child().unwrap();
        assert_eq!(root.inner.lock().children.len(), 1);

        child.terminate();

        assert!(root.inner.lock().children.is_empty());
        assert!(root.is_alive());
    }

    #[test]
    fn child_termination_leaves_parent_alive() {
        let root = Scope::root();
        let child = root.create_child().unwrap();
        let (count, cb) = counter();
        root.on_termination(cb).unwrap();

        child.terminate();

        assert!(root.is_alive());
        assert_eq!(count.load(Ordering::SeqCst), 0);
        // Terminating the parent later must not re-run the child's callbacks.
        root.terminate();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn terminated_scope_rejects_new_work() {
        let root = Scope::root();
        root.terminate();

        assert_eq!(root.create_child().unwrap_err(), SyncError::ScopeTerminated);
        assert_eq!(
            root.on_termination(|| {}).unwrap_err(),
            SyncError::ScopeTerminated
        );
    }

    #[test]
    fn child_of_dead_parent_is_rejected() {
        let root = Scope::root();
        let child = root.create_child().unwrap();
        root.terminate();
        assert!(child.create_child().is_err());
    }

    #[tokio::test]
    async fn spawn_rejected_on_dead_scope() {
        let root = Scope::root();
        root.terminate();
        assert!(root.spawn(async {}).is_err());
    }

    #[tokio::test]
    async fn run_returns_terminated_when_cancelled_mid_flight() {
        let scope = Scope::root();
        let s = scope.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            s.terminate();
        });

        let out = scope
            .run(tokio::time::sleep(Duration::from_secs(30)))
            .await;
        assert_eq!(out.unwrap_err(), SyncError::ScopeTerminated);
    }

    #[tokio::test]
    async fn run_passes_through_output() {
        let scope = Scope::root();
        assert_eq!(scope.run(async { 7 }).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn spawned_task_stops_on_parent_termination() {
        let root = Scope::root();
        let child = root.create_child().unwrap();
        let handle = child
            .spawn(async {
                tokio::time::sleep(Duration::from_secs(30)).await;
            })
            .unwrap();

        root.terminate();

        let joined = tokio::time::timeout(Duration::from_secs(1), handle).await;
        assert!(joined.is_ok(), "task should unwind promptly");
    }

    #[tokio::test]
    async fn cancelled_resolves_after_terminate() {
        let scope = Scope::root();
        let child = scope.create_child().unwrap();
        scope.terminate();
        tokio::time::timeout(Duration::from_secs(1), child.cancelled())
            .await
            .expect("child cancellation should resolve");
    }
}
