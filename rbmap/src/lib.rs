//! An ordered associative container backed by a red-black tree.
//!
//! Nodes live in an index arena owned by the map, so parent back-links are
//! plain handles and there is no reference cycle to manage. Keys are ordered
//! by a caller-supplied comparator ([`Compare`]); for `Ord` keys the
//! [`NaturalOrder`] default applies. Optional release hooks take ownership of
//! removed keys/values for resources the map does not own outright.

#![deny(rust_2018_idioms)]

mod arena;
mod map;

pub use map::{Compare, InsertError, NaturalOrder, RbMap};
