//! Typed extension points
//!
//! Three hook kinds, each an ordered list of named taps:
//! - [`SyncHook`]: every tap runs, no result
//! - [`BailHook`]: taps run in order until one returns `Some`
//! - [`WaterfallHook`]: each tap transforms the accumulator and passes it on
//!
//! Taps are snapshotted before a call, so a tap may register further taps or
//! re-enter the component that owns the hook without deadlocking.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

struct Tap<F: ?Sized> {
    name: Arc<str>,
    f: Arc<F>,
}

impl<F: ?Sized> Clone for Tap<F> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            f: Arc::clone(&self.f),
        }
    }
}

struct Taps<F: ?Sized> {
    taps: RwLock<Vec<Tap<F>>>,
}

impl<F: ?Sized> Taps<F> {
    fn new() -> Self {
        Self {
            taps: RwLock::new(Vec::new()),
        }
    }

    fn push(&self, name: &str, f: Arc<F>) {
        self.taps.write().push(Tap {
            name: Arc::from(name),
            f,
        });
    }

    fn snapshot(&self) -> Vec<Arc<F>> {
        self.taps.read().iter().map(|t| Arc::clone(&t.f)).collect()
    }

    fn untap(&self, name: &str) -> usize {
        let mut taps = self.taps.write();
        let before = taps.len();
        taps.retain(|t| t.name.as_ref() != name);
        before - taps.len()
    }

    fn names(&self) -> Vec<Arc<str>> {
        self.taps.read().iter().map(|t| Arc::clone(&t.name)).collect()
    }

    fn len(&self) -> usize {
        self.taps.read().len()
    }
}

type SyncFn<A> = dyn Fn(&A) + Send + Sync;
type BailFn<A, R> = dyn Fn(&A) -> Option<R> + Send + Sync;
type WaterfallFn<T, A> = dyn Fn(T, &A) -> T + Send + Sync;

/// Fire-all hook
pub struct SyncHook<A: ?Sized> {
    taps: Taps<SyncFn<A>>,
}

impl<A: ?Sized> SyncHook<A> {
    pub fn new() -> Self {
        Self { taps: Taps::new() }
    }

    pub fn tap(&self, name: &str, f: impl Fn(&A) + Send + Sync + 'static) {
        self.taps.push(name, Arc::new(f));
    }

    pub fn call(&self, args: &A) {
        for tap in self.taps.snapshot() {
            tap(args);
        }
    }

    /// Remove every tap registered under `name`, returning how many were removed
    pub fn untap(&self, name: &str) -> usize {
        self.taps.untap(name)
    }

    pub fn is_used(&self) -> bool {
        self.taps.len() > 0
    }

    pub fn tap_names(&self) -> Vec<Arc<str>> {
        self.taps.names()
    }
}

/// First-`Some`-wins hook
pub struct BailHook<A: ?Sized, R> {
    taps: Taps<BailFn<A, R>>,
}

impl<A: ?Sized, R> BailHook<A, R> {
    pub fn new() -> Self {
        Self { taps: Taps::new() }
    }

    pub fn tap(&self, name: &str, f: impl Fn(&A) -> Option<R> + Send + Sync + 'static) {
        self.taps.push(name, Arc::new(f));
    }

    pub fn call(&self, args: &A) -> Option<R> {
        self.taps.snapshot().into_iter().find_map(|tap| tap(args))
    }

    pub fn untap(&self, name: &str) -> usize {
        self.taps.untap(name)
    }

    pub fn is_used(&self) -> bool {
        self.taps.len() > 0
    }
}

/// Fold hook: `init -> tap1 -> tap2 -> ...`
pub struct WaterfallHook<T, A: ?Sized = ()> {
    taps: Taps<WaterfallFn<T, A>>,
}

impl<T, A: ?Sized> WaterfallHook<T, A> {
    pub fn new() -> Self {
        Self { taps: Taps::new() }
    }

    pub fn tap(&self, name: &str, f: impl Fn(T, &A) -> T + Send + Sync + 'static) {
        self.taps.push(name, Arc::new(f));
    }

    pub fn call(&self, init: T, args: &A) -> T {
        self.taps
            .snapshot()
            .into_iter()
            .fold(init, |acc, tap| tap(acc, args))
    }

    pub fn untap(&self, name: &str) -> usize {
        self.taps.untap(name)
    }

    pub fn is_used(&self) -> bool {
        self.taps.len() > 0
    }
}

impl<A: ?Sized> Default for SyncHook<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: ?Sized, R> Default for BailHook<A, R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, A: ?Sized> Default for WaterfallHook<T, A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: ?Sized> fmt::Debug for SyncHook<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncHook")
            .field("taps", &self.taps.names())
            .finish()
    }
}

impl<A: ?Sized, R> fmt::Debug for BailHook<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BailHook")
            .field("taps", &self.taps.names())
            .finish()
    }
}

impl<T, A: ?Sized> fmt::Debug for WaterfallHook<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaterfallHook")
            .field("taps", &self.taps.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn sync_hook_runs_every_tap_in_order() {
        let hook: SyncHook<str> = SyncHook::new();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));

        for name in ["a", "b", "c"] {
            let seen = Arc::clone(&seen);
            hook.tap(name, move |arg: &str| seen.lock().push(format!("{name}:{arg}")));
        }

        hook.call("x");
        assert_eq!(*seen.lock(), vec!["a:x", "b:x", "c:x"]);
    }

    #[test]
    fn bail_hook_stops_at_first_some() {
        let hook: BailHook<i32, &'static str> = BailHook::new();
        let late_calls = Arc::new(AtomicUsize::new(0));

        hook.tap("none", |_| None);
        hook.tap("first", |n| (*n > 0).then_some("positive"));
        let late = Arc::clone(&late_calls);
        hook.tap("late", move |_| {
            late.fetch_add(1, Ordering::SeqCst);
            Some("late")
        });

        assert_eq!(hook.call(&5), Some("positive"));
        assert_eq!(late_calls.load(Ordering::SeqCst), 0);
        assert_eq!(hook.call(&-1), Some("late"));
        assert_eq!(late_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn waterfall_hook_folds() {
        let hook: WaterfallHook<i32, i32> = WaterfallHook::new();
        hook.tap("add", |acc, n| acc + n);
        hook.tap("double", |acc, _| acc * 2);

        assert_eq!(hook.call(1, &3), 8);
    }

    #[test]
    fn empty_hooks_are_identity() {
        let bail: BailHook<(), u8> = BailHook::new();
        let fold: WaterfallHook<u8> = WaterfallHook::new();
        assert_eq!(bail.call(&()), None);
        assert_eq!(fold.call(7, &()), 7);
        assert!(!bail.is_used());
    }

    #[test]
    fn taps_can_register_taps_during_call() {
        let hook = Arc::new(SyncHook::<()>::new());
        let inner = Arc::clone(&hook);
        hook.tap("outer", move |_| inner.tap("added", |_| {}));

        hook.call(&());
        assert_eq!(hook.tap_names().len(), 2);
    }

    #[test]
    fn untap_removes_by_name() {
        let hook: SyncHook<()> = SyncHook::new();
        hook.tap("a", |_| {});
        hook.tap("a", |_| {});
        hook.tap("b", |_| {});
        assert_eq!(hook.untap("a"), 2);
        assert_eq!(hook.tap_names().len(), 1);
    }
}
