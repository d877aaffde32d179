//! Per row cost factors.

/// Cost of evaluating one row in a cpu bound operator.
pub const CPU_FACTOR: f64 = 0.9;
/// Cost of reading one row with a forward scan.
pub const SCAN_FACTOR: f64 = 2.0;
/// Cost of reading one row with a backward scan.
pub const DESC_SCAN_FACTOR: f64 = 3.0;
/// Extra cost of fetching one table row for an index entry.
pub const LOOKUP_FACTOR: f64 = 4.0;
/// Cost of inserting one row into a hash table.
pub const HASH_TABLE_FACTOR: f64 = 1.2;
/// Cost of a hash aggregation per input row.
pub const HASH_AGG_FACTOR: f64 = 1.5;

/// Fraction of rows assumed to pass one filter.
pub const SELECTION_FACTOR: f64 = 0.8;
/// Fraction of distinct group values assumed when no ndv is known.
pub const DISTINCT_FACTOR: f64 = 0.8;
/// Fraction of rows assumed to match one equality access condition.
pub const EQUAL_ACCESS_FACTOR: f64 = 0.01;
/// Fraction of rows assumed to match one range access condition.
pub const RANGE_ACCESS_FACTOR: f64 = 0.33;
