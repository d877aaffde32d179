//! Physical properties of relational operators.
//!
//! The only physical property tracked is the output ordering, see [`OrderSpec`]. A
//! [`RequiredProperty`] additionally carries a limit hint: a parent that reads at most
//! `limit` rows tells its child so, which allows an ordered child to stop early or an
//! enforcer to become a top-n.

use std::fmt::Debug;
use std::hash::Hash;

mod order;
pub use order::*;
mod physical;
pub use physical::*;

pub trait PhysicalProp: Debug + Hash {
    /// Tests whether `self`, as a provided property, satisfies `required`.
    fn satisfies(&self, required: &Self) -> bool;
}
