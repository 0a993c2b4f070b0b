#![forbid(unsafe_code)]

//! Statically typed dependency vectors.
//!
//! A controller re-evaluates when its dependency vector changes. Vectors are
//! fixed-shape tuples rather than runtime-length arrays, so a shape mismatch
//! between two evaluations is a compile error instead of a runtime defect,
//! and element-wise comparison is type-checked.
//!
//! # Invariants
//!
//! 1. Two vectors are unchanged iff every positional pair compares equal.
//! 2. `()` is the empty vector and is always unchanged (manual and timed
//!    reloads only).
//! 3. Comparison never inspects more than the tuple's own elements.

/// A fixed-arity dependency vector.
///
/// Implemented for tuples of arity 0 through 8 whose elements are
/// `PartialEq + Clone`.
pub trait Deps: Clone + 'static {
    /// Whether this vector is unchanged relative to `previous`.
    fn unchanged(&self, previous: &Self) -> bool;
}

impl Deps for () {
    fn unchanged(&self, _previous: &Self) -> bool {
        true
    }
}

macro_rules! impl_deps_tuple {
    ($(($cur:ident, $prev:ident)),+) => {
        impl<$($cur,)+> Deps for ($($cur,)+)
        where
            $($cur: PartialEq + Clone + 'static,)+
        {
            #[allow(non_snake_case)]
            fn unchanged(&self, previous: &Self) -> bool {
                let ($($cur,)+) = self;
                let ($($prev,)+) = previous;
                $($cur == $prev)&&+
            }
        }
    };
}

impl_deps_tuple!((A, A2));
impl_deps_tuple!((A, A2), (B, B2));
impl_deps_tuple!((A, A2), (B, B2), (C, C2));
impl_deps_tuple!((A, A2), (B, B2), (C, C2), (D, D2));
impl_deps_tuple!((A, A2), (B, B2), (C, C2), (D, D2), (E, E2));
impl_deps_tuple!((A, A2), (B, B2), (C, C2), (D, D2), (E, E2), (F, F2));
impl_deps_tuple!(
    (A, A2),
    (B, B2),
    (C, C2),
    (D, D2),
    (E, E2),
    (F, F2),
    (G, G2)
);
impl_deps_tuple!(
    (A, A2),
    (B, B2),
    (C, C2),
    (D, D2),
    (E, E2),
    (F, F2),
    (G, G2),
    (H, H2)
);

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
