//! Defines cost model.

mod factors;
pub use factors::*;

use std::cmp::Ordering;
use std::fmt::{Display, Formatter};

use derive_more::{Add, AddAssign, Sub, SubAssign, Sum};

pub const INF: Cost = Cost(f64::INFINITY);
pub const ZERO: Cost = Cost(0.0);

#[derive(Copy, Clone, Debug, PartialOrd, PartialEq, Add, Sub, Sum, AddAssign, SubAssign)]
pub struct Cost(f64);

impl From<f64> for Cost {
    fn from(c: f64) -> Self {
        Cost(c)
    }
}

impl Cost {
    pub fn value(&self) -> f64 {
        self.0
    }

    /// Total order used to rank candidates, NaN sorts last.
    pub fn total_cmp(&self, other: &Cost) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl Display for Cost {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

/// Inputs of a per operator cost estimate.
#[derive(Debug, Clone)]
pub struct CostContext {
    /// Estimated output rows of each input.
    pub input_rows: Vec<f64>,
    /// Accumulated cost of each input.
    pub input_costs: Vec<Cost>,
    /// Estimated output rows of the operator itself.
    pub output_rows: f64,
    /// Rows the parent is going to read, if bounded.
    pub limit: Option<u64>,
    pub join_concurrency: usize,
}

impl CostContext {
    pub fn input_rows(&self, idx: usize) -> f64 {
        self.input_rows.get(idx).copied().unwrap_or(0.0)
    }

    pub fn total_input_rows(&self) -> f64 {
        self.input_rows.iter().sum()
    }
}
