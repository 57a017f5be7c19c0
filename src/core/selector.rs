//! Memoized selectors over declared inputs.
//!
//! A [`Selector`] is built once, stored as a field next to the state it
//! reads, and invoked through [`Selector::evaluate`]:
//!
//! 1. run the input producer, giving the current input tuple
//! 2. compare it with the previous tuple using [`Memo::same`]
//! 3. unchanged: hand back the cached output (same `Arc`, combinator not run)
//! 4. changed (or first call): run the combinator, cache inputs and output
//!
//! Inputs that are themselves selector outputs compare by `Arc` identity, so
//! an unchanged upstream selector never triggers a downstream recompute.
//!
//! **Contract**: the combinator may only depend on what the producer
//! declares. Anything it reads on the side is invisible to the cache and
//! goes stale.

use log::trace;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Input sameness for memoization.
///
/// Scalars compare by value, shared objects by `Arc` identity.
pub trait Memo {
    fn same(&self, other: &Self) -> bool;
}

impl Memo for f64 {
    #[inline]
    fn same(&self, other: &Self) -> bool {
        self == other
    }
}

impl Memo for u64 {
    #[inline]
    fn same(&self, other: &Self) -> bool {
        self == other
    }
}

impl Memo for bool {
    #[inline]
    fn same(&self, other: &Self) -> bool {
        self == other
    }
}

impl Memo for () {
    #[inline]
    fn same(&self, _other: &Self) -> bool {
        true
    }
}

impl<T: ?Sized> Memo for Arc<T> {
    #[inline]
    fn same(&self, other: &Self) -> bool {
        Arc::ptr_eq(self, other)
    }
}

impl<T: Memo> Memo for Option<T> {
    #[inline]
    fn same(&self, other: &Self) -> bool {
        match (self, other) {
            (Some(a), Some(b)) => a.same(b),
            (None, None) => true,
            _ => false,
        }
    }
}

macro_rules! impl_memo_tuple {
    ($($name:ident : $idx:tt),+) => {
        impl<$($name: Memo),+> Memo for ($($name,)+) {
            #[inline]
            fn same(&self, other: &Self) -> bool {
                $(self.$idx.same(&other.$idx))&&+
            }
        }
    };
}

impl_memo_tuple!(A: 0);
impl_memo_tuple!(A: 0, B: 1);
impl_memo_tuple!(A: 0, B: 1, C: 2);
impl_memo_tuple!(A: 0, B: 1, C: 2, D: 3);
impl_memo_tuple!(A: 0, B: 1, C: 2, D: 3, E: 4);

type Producer<C, I> = Box<dyn Fn(&C) -> I + Send + Sync>;
type Combinator<C, I, O> = Box<dyn Fn(&C, &I) -> O + Send + Sync>;

struct Cached<I, O> {
    inputs: I,
    output: O,
}

/// Memoized derivation over the context `C`.
///
/// The context is only borrowed for the duration of `evaluate()`; the
/// selector keeps no reference to it.
pub struct Selector<C, I, O> {
    name: &'static str,
    inputs: Producer<C, I>,
    combine: Combinator<C, I, O>,
    cache: Mutex<Option<Cached<I, O>>>,
    recomputations: AtomicU64,
}

impl<C, I, O> std::fmt::Debug for Selector<C, I, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Selector")
            .field("name", &self.name)
            .field("recomputations", &self.recomputations())
            .finish()
    }
}

impl<C, I, O> Selector<C, I, O>
where
    I: Memo,
    O: Clone,
{
    /// # Example
    /// ```ignore
    /// let doubled = Selector::new(
    ///     "doubled",
    ///     |s: &State| s.value,
    ///     |_s: &State, v: &f64| v * 2.0,
    /// );
    /// assert_eq!(doubled.evaluate(&state), state.value * 2.0);
    /// ```
    pub fn new<P, F>(name: &'static str, inputs: P, combine: F) -> Self
    where
        P: Fn(&C) -> I + Send + Sync + 'static,
        F: Fn(&C, &I) -> O + Send + Sync + 'static,
    {
        Self {
            name,
            inputs: Box::new(inputs),
            combine: Box::new(combine),
            cache: Mutex::new(None),
            recomputations: AtomicU64::new(0),
        }
    }

    /// Current output, recomputed only if an input changed.
    pub fn evaluate(&self, ctx: &C) -> O {
        let inputs = (self.inputs)(ctx);

        if let Some(cached) = self.cache.lock().unwrap_or_else(|e| e.into_inner()).as_ref()
            && cached.inputs.same(&inputs)
        {
            return cached.output.clone();
        }

        // Lock released while the combinator runs: it may evaluate other selectors
        let output = (self.combine)(ctx, &inputs);
        let n = self.recomputations.fetch_add(1, Ordering::Relaxed) + 1;
        trace!("Selector '{}': recomputed (#{})", self.name, n);

        *self.cache.lock().unwrap_or_else(|e| e.into_inner()) = Some(Cached {
            inputs,
            output: output.clone(),
        });
        output
    }

    /// Forget the cached value; the next `evaluate()` recomputes.
    pub fn invalidate(&self) {
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).take();
    }
}

impl<C, I, O> Selector<C, I, O> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// How many times the combinator has run
    pub fn recomputations(&self) -> u64 {
        self.recomputations.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct State {
        a: Mutex<f64>,
        b: Mutex<Option<Arc<Vec<u32>>>>,
    }

    impl State {
        fn new() -> Self {
            Self {
                a: Mutex::new(1.0),
                b: Mutex::new(None),
            }
        }
        fn a(&self) -> f64 {
            *self.a.lock().unwrap()
        }
        fn b(&self) -> Option<Arc<Vec<u32>>> {
            self.b.lock().unwrap().clone()
        }
    }

    #[test]
    fn test_unchanged_inputs_return_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let sel = Selector::new("sum", |s: &State| s.a(), move |_s: &State, a: &f64| {
            c.fetch_add(1, Ordering::SeqCst);
            Arc::new(*a + 1.0)
        });

        let state = State::new();
        let first = sel.evaluate(&state);
        let second = sel.evaluate(&state);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(sel.recomputations(), 1);

        *state.a.lock().unwrap() = 5.0;
        let third = sel.evaluate(&state);
        assert_eq!(*third, 6.0);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_object_inputs_compare_by_identity() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let sel = Selector::new("len", |s: &State| s.b(), move |_s: &State, b: &Option<Arc<Vec<u32>>>| {
            c.fetch_add(1, Ordering::SeqCst);
            b.as_ref().map(|v| v.len()).unwrap_or(0) as u64
        });

        let state = State::new();
        assert_eq!(sel.evaluate(&state), 0);
        assert_eq!(sel.evaluate(&state), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let v = Arc::new(vec![1, 2]);
        *state.b.lock().unwrap() = Some(Arc::clone(&v));
        assert_eq!(sel.evaluate(&state), 2);
        assert_eq!(sel.evaluate(&state), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // Equal content, new allocation: recompute
        *state.b.lock().unwrap() = Some(Arc::new(vec![1, 2]));
        sel.evaluate(&state);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    struct Graph {
        state: State,
        base: Selector<Graph, (f64,), Arc<f64>>,
        derived: Selector<Graph, (Arc<f64>,), Arc<String>>,
    }

    #[test]
    fn test_composed_selector_skips_when_upstream_unchanged() {
        let derived_calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&derived_calls);

        let graph = Graph {
            state: State::new(),
            // Rounds the input, so several inputs map to one output
            base: Selector::new(
                "rounded",
                |g: &Graph| (g.state.a(),),
                |_g: &Graph, (a,): &(f64,)| Arc::new(a.floor()),
            ),
            derived: Selector::new(
                "label",
                |g: &Graph| (g.base.evaluate(g),),
                move |_g: &Graph, (v,): &(Arc<f64>,)| {
                    c.fetch_add(1, Ordering::SeqCst);
                    Arc::new(format!("v={}", v))
                },
            ),
        };

        assert_eq!(*graph.derived.evaluate(&graph), "v=1");
        assert_eq!(derived_calls.load(Ordering::SeqCst), 1);

        // Upstream input changes, upstream output is recomputed to a new Arc
        *graph.state.a.lock().unwrap() = 1.5;
        graph.derived.evaluate(&graph);
        assert_eq!(graph.base.recomputations(), 2);
        assert_eq!(derived_calls.load(Ordering::SeqCst), 2);

        // Nothing changed anywhere: neither recomputes
        graph.derived.evaluate(&graph);
        assert_eq!(graph.base.recomputations(), 2);
        assert_eq!(derived_calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_nan_input_always_recomputes() {
        let sel = Selector::new("nan", |_: &()| f64::NAN, |_: &(), _: &f64| ());
        sel.evaluate(&());
        sel.evaluate(&());
        assert_eq!(sel.recomputations(), 2);
    }

    #[test]
    fn test_invalidate() {
        let sel = Selector::new("const", |_: &()| (), |_: &(), _: &()| 42u64);
        assert_eq!(sel.evaluate(&()), 42);
        sel.invalidate();
        assert_eq!(sel.evaluate(&()), 42);
        assert_eq!(sel.recomputations(), 2);
        assert_eq!(sel.name(), "const");
    }

    #[test]
    fn test_tuple_memo() {
        let a = Arc::new(1u32);
        assert!((1.0f64, Some(Arc::clone(&a)), true).same(&(1.0f64, Some(Arc::clone(&a)), true)));
        assert!(!(1.0f64, Some(Arc::clone(&a))).same(&(1.0f64, Some(Arc::new(1u32)))));
        assert!(!(Some(2u64),).same(&(None,)));
    }
}
