//! Per-flow propagation of the current activity and baggage.
//!
//! A [`Context`] is an immutable snapshot. Each thread keeps a stack of
//! attached contexts; [`Context::attach`] pushes one and the returned
//! [`ContextGuard`] pops it again. Async flows carry their context on the
//! future itself (see [`FutureContextExt`]) and re-attach it on every poll, so
//! two tasks sharing a worker thread never see each other's activity.

use crate::lmt_warn;
use crate::trace::SpanState;
use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::hash::{BuildHasherDefault, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;

mod future_ext;

pub use future_ext::{FutureContextExt, WithContext};

thread_local! {
    static CURRENT_CONTEXT: RefCell<ContextStack> = RefCell::new(ContextStack::default());
}

/// An execution-scoped collection of values.
#[derive(Clone, Default)]
pub struct Context {
    pub(crate) activity: Option<Arc<SpanState>>,
    entries: Option<Arc<EntryMap>>,
    suppress_telemetry: bool,
}

type EntryMap = HashMap<TypeId, Arc<dyn Any + Sync + Send>, BuildHasherDefault<IdHasher>>;

impl Context {
    /// An empty context: no activity, no baggage.
    pub fn new() -> Self {
        Context::default()
    }

    /// A clone of the context attached to the current thread.
    pub fn current() -> Self {
        Self::map_current(|cx| cx.clone())
    }

    /// Apply `f` to the current context without cloning it.
    pub fn map_current<T>(f: impl FnOnce(&Context) -> T) -> T {
        CURRENT_CONTEXT.with(|cx| f(&cx.borrow().current_cx))
    }

    /// The current context with `value` added.
    pub fn current_with_value<T: 'static + Send + Sync>(value: T) -> Self {
        Self::map_current(|cx| cx.with_value(value))
    }

    /// Look up a value by type.
    pub fn get<T: 'static>(&self) -> Option<&T> {
        self.entries
            .as_ref()?
            .get(&TypeId::of::<T>())?
            .downcast_ref()
    }

    /// A copy of this context with `value` added, replacing any value of the
    /// same type.
    pub fn with_value<T: 'static + Send + Sync>(&self, value: T) -> Self {
        let mut entries = self
            .entries
            .as_ref()
            .map(|current| (**current).clone())
            .unwrap_or_default();
        entries.insert(TypeId::of::<T>(), Arc::new(value));
        Context {
            activity: self.activity.clone(),
            entries: Some(Arc::new(entries)),
            suppress_telemetry: self.suppress_telemetry,
        }
    }

    pub(crate) fn with_activity(&self, activity: Arc<SpanState>) -> Self {
        Context {
            activity: Some(activity),
            entries: self.entries.clone(),
            suppress_telemetry: self.suppress_telemetry,
        }
    }

    /// Whether this context has an activity that has not been stopped yet.
    pub fn has_active_activity(&self) -> bool {
        self.activity.as_ref().is_some_and(|a| a.is_recording())
    }

    /// Make this the current context of the calling thread until the guard is
    /// dropped.
    pub fn attach(self) -> ContextGuard {
        let cx_pos = CURRENT_CONTEXT.with(|cx| cx.borrow_mut().push(self));

        ContextGuard {
            cx_pos,
            _marker: PhantomData,
        }
    }

    /// Whether records produced under this context are ignored.
    #[inline]
    pub fn is_telemetry_suppressed(&self) -> bool {
        self.suppress_telemetry
    }

    /// A copy of this context that suppresses telemetry.
    pub fn with_telemetry_suppressed(&self) -> Self {
        Context {
            activity: self.activity.clone(),
            entries: self.entries.clone(),
            suppress_telemetry: true,
        }
    }

    /// Suppress telemetry on this thread until the guard is dropped.
    pub fn enter_telemetry_suppressed_scope() -> ContextGuard {
        Self::map_current(|cx| cx.with_telemetry_suppressed()).attach()
    }

    /// Whether the current context suppresses telemetry.
    #[inline]
    pub fn is_current_telemetry_suppressed() -> bool {
        Self::map_current(|cx| cx.is_telemetry_suppressed())
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_struct("Context");
        match &self.activity {
            Some(activity) => dbg.field("activity", &activity.span_id()),
            None => dbg.field("activity", &"None"),
        };
        dbg.field(
            "entries count",
            &self.entries.as_ref().map_or(0, |e| e.len()),
        )
        .field("suppress_telemetry", &self.suppress_telemetry)
        .finish()
    }
}

/// Restores the previous context when dropped.
#[derive(Debug)]
pub struct ContextGuard {
    cx_pos: u16,
    // !Send: the position refers to this thread's stack.
    _marker: PhantomData<*const ()>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        let pos = self.cx_pos;
        if pos > ContextStack::BASE_POS && pos < ContextStack::MAX_POS {
            CURRENT_CONTEXT.with(|stack| stack.borrow_mut().pop_id(pos));
        }
    }
}

#[derive(Clone, Default, Debug)]
struct IdHasher(u64);

impl Hasher for IdHasher {
    fn write(&mut self, _: &[u8]) {
        unreachable!("TypeId calls write_u64");
    }

    #[inline]
    fn write_u64(&mut self, id: u64) {
        self.0 = id;
    }

    #[inline]
    fn finish(&self) -> u64 {
        self.0
    }
}

/// Attached contexts of one thread. `stack[i]` holds the context that was
/// current before the guard with position `i + 1` was handed out.
struct ContextStack {
    current_cx: Context,
    stack: Vec<Option<Context>>,
    _marker: PhantomData<*const ()>,
}

impl ContextStack {
    const BASE_POS: u16 = 0;
    const MAX_POS: u16 = u16::MAX;
    const INITIAL_CAPACITY: usize = 8;

    fn push(&mut self, cx: Context) -> u16 {
        let next_pos = self.stack.len() + 1;
        if next_pos < usize::from(ContextStack::MAX_POS) {
            let previous = std::mem::replace(&mut self.current_cx, cx);
            self.stack.push(Some(previous));
            next_pos as u16
        } else {
            lmt_warn!(
                name: "Context.AttachFailed",
                message = format!(
                    "context stack is full ({} entries), current context left unchanged",
                    ContextStack::MAX_POS
                )
            );
            ContextStack::MAX_POS
        }
    }

    fn pop_id(&mut self, pos: u16) {
        let len = self.stack.len() as u16;
        if pos == len {
            // Holes left by guards dropped out of order are skipped.
            while let Some(None) = self.stack.last() {
                _ = self.stack.pop();
            }
            if let Some(Some(previous)) = self.stack.pop() {
                self.current_cx = previous;
            }
        } else if pos < len {
            // Out of order: forget the context this guard attached.
            _ = self.stack[pos as usize].take();
        } else {
            lmt_warn!(
                name: "Context.PopOutOfBounds",
                position = pos,
                stack_length = len
            );
        }
    }
}

impl Default for ContextStack {
    fn default() -> Self {
        ContextStack {
            current_cx: Context::default(),
            stack: Vec::with_capacity(ContextStack::INITIAL_CAPACITY),
            _marker: PhantomData,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct ValueA(u64);
    #[derive(Debug, PartialEq)]
    struct ValueB(&'static str);

    #[test]
    fn nested_attach_restores_in_order() {
        let _outer = Context::new().with_value(ValueA(1)).attach();
        assert_eq!(Context::current().get::<ValueA>(), Some(&ValueA(1)));
        {
            let _inner = Context::current_with_value(ValueB("inner")).attach();
            assert_eq!(Context::current().get::<ValueA>(), Some(&ValueA(1)));
            assert_eq!(Context::current().get::<ValueB>(), Some(&ValueB("inner")));
        }
        assert_eq!(Context::current().get::<ValueB>(), None);
        assert_eq!(Context::current().get::<ValueA>(), Some(&ValueA(1)));
    }

    #[test]
    fn out_of_order_drop_skips_the_dropped_context() {
        let first = Context::new().with_value(ValueA(1)).attach();
        let second = Context::new().with_value(ValueA(2)).attach();
        let third = Context::new().with_value(ValueA(3)).attach();

        drop(second);
        assert_eq!(Context::current().get::<ValueA>(), Some(&ValueA(3)));

        drop(third);
        assert_eq!(Context::current().get::<ValueA>(), Some(&ValueA(1)));

        drop(first);
        assert_eq!(Context::current().get::<ValueA>(), None);
    }

    #[test]
    fn suppression_scope_ends_with_its_guard() {
        assert!(!Context::is_current_telemetry_suppressed());
        {
            let _guard = Context::enter_telemetry_suppressed_scope();
            assert!(Context::is_current_telemetry_suppressed());
        }
        assert!(!Context::is_current_telemetry_suppressed());
    }

    #[test]
    fn contexts_do_not_leak_across_threads() {
        let _guard = Context::new().with_value(ValueA(7)).attach();
        let seen = std::thread::spawn(|| Context::current().get::<ValueA>().is_some())
            .join()
            .unwrap();
        assert!(!seen);
    }
}
