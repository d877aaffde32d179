//! Plan representations.
//!
//! A [`LogicalPlan`] is an arena of nodes indexed by [`PlanNodeId`]: rules rewrite it in
//! place, replacing a subtree is swapping an id in the input list of its parent. A
//! [`PhysicalPlan`] is an immutable tree of reference counted nodes, since the converter
//! shares memoized subplans between candidates.

mod explain;
pub use explain::*;
mod logical;
pub use logical::*;
mod physical;
pub use physical::*;
mod schema;
pub use schema::*;

pub type PlanNodeId = u32;
pub type ColumnId = u32;

/// Hands out plan node and column ids. Ids are never reused within one optimization.
#[derive(Debug, Default, Clone)]
pub struct IdAllocator {
    next_plan_node_id: PlanNodeId,
    next_column_id: ColumnId,
}

impl IdAllocator {
    pub fn next_plan_node_id(&mut self) -> PlanNodeId {
        let id = self.next_plan_node_id;
        self.next_plan_node_id += 1;
        id
    }

    pub fn next_column_id(&mut self) -> ColumnId {
        let id = self.next_column_id;
        self.next_column_id += 1;
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocator_counters_are_independent() {
        let mut ids = IdAllocator::default();
        assert_eq!(0, ids.next_plan_node_id());
        assert_eq!(0, ids.next_column_id());
        assert_eq!(1, ids.next_column_id());
        assert_eq!(1, ids.next_plan_node_id());
    }
}
