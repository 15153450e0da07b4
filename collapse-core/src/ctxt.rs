/*!
The [`Ctxt`] type.

Context is a caller-scoped key/value map used for log correlation (request
ids, tenant ids, trace ids) that must follow a logical request across
thread hops even though the value that satisfies it is produced on some
unrelated executor thread.

Modeled on `emit_core::ctxt::Ctxt`'s stack-of-frames shape, but narrowed to
a concrete string map: this crate doesn't need the teacher's lifetime-erased
`Props`/`Value` machinery, since it never captures arbitrary structured
event data, only a diagnostic snapshot to reinstall around a callback.
*/

use std::{cell::RefCell, collections::BTreeMap};

/**
An immutable snapshot of the diagnostic context active at some point in
time, captured at subscription and reinstated at each emission.
*/
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextSnapshot(BTreeMap<String, String>);

impl ContextSnapshot {
    /**
    An empty snapshot.
    */
    pub fn empty() -> Self {
        ContextSnapshot(BTreeMap::new())
    }

    /**
    Read a value from the snapshot.
    */
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /**
    Iterate the key/value pairs in the snapshot.
    */
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/**
Storage for ambient diagnostic properties.

A [`Ctxt`] is modeled as a stack: [`Ctxt::snapshot`] captures the
properties visible on the calling thread right now, and [`Ctxt::restore`]
temporarily installs a previously-captured snapshot so code running
inside the returned guard observes it, regardless of which thread that
code actually runs on.
*/
pub trait Ctxt: Send + Sync + 'static {
    /**
    Capture the properties active on the current thread.
    */
    fn snapshot(&self) -> ContextSnapshot;

    /**
    Install `snapshot` as current on this thread until the returned
    guard is dropped, at which point the prior frame is restored.
    */
    fn restore(&self, snapshot: &ContextSnapshot) -> ContextGuard;
}

/**
A guard that restores the previously-active context frame on drop.

Obtained from [`Ctxt::restore`]. Must be dropped on the same thread it
was created on.
*/
#[must_use = "the context frame is only active while this guard is held"]
pub struct ContextGuard {
    pop: Option<Box<dyn FnOnce() + Send>>,
}

impl ContextGuard {
    fn new(pop: impl FnOnce() + Send + 'static) -> Self {
        ContextGuard { pop: Some(Box::new(pop)) }
    }

    /**
    A no-op guard, for [`Ctxt`] implementations with nothing to restore.
    */
    pub fn noop() -> Self {
        ContextGuard { pop: None }
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        if let Some(pop) = self.pop.take() {
            pop();
        }
    }
}

thread_local! {
    static FRAMES: RefCell<Vec<BTreeMap<String, String>>> = RefCell::new(vec![BTreeMap::new()]);
}

/**
The default [`Ctxt`]: a per-thread stack of frames, set explicitly by
callers via [`ThreadLocalCtxt::set`] and propagated by this crate's
collapser and resilient cache through [`Ctxt::snapshot`] /
[`Ctxt::restore`] at each scheduler hop.

This is the "explicit" propagation mode: snapshots are taken at
subscription time at designated propagation points, rather than at flow
construction time (the "per-operator" mode some reactive frameworks use,
where later mutations aren't observed).
*/
#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadLocalCtxt;

impl ThreadLocalCtxt {
    /**
    Set a key in the current thread's active frame.
    */
    pub fn set(key: impl Into<String>, value: impl Into<String>) {
        FRAMES.with(|frames| {
            frames
                .borrow_mut()
                .last_mut()
                .expect("frame stack is never empty")
                .insert(key.into(), value.into());
        });
    }

    /**
    Remove a key from the current thread's active frame.
    */
    pub fn remove(key: &str) {
        FRAMES.with(|frames| {
            frames
                .borrow_mut()
                .last_mut()
                .expect("frame stack is never empty")
                .remove(key);
        });
    }
}

impl Ctxt for ThreadLocalCtxt {
    fn snapshot(&self) -> ContextSnapshot {
        FRAMES.with(|frames| {
            ContextSnapshot(
                frames
                    .borrow()
                    .last()
                    .expect("frame stack is never empty")
                    .clone(),
            )
        })
    }

    fn restore(&self, snapshot: &ContextSnapshot) -> ContextGuard {
        let pushed = snapshot.0.clone();
        FRAMES.with(|frames| frames.borrow_mut().push(pushed));

        ContextGuard::new(|| {
            FRAMES.with(|frames| {
                frames.borrow_mut().pop();
            });
        })
    }
}
