use std::collections::HashSet;
use std::ops::{Index, IndexMut};

use anyhow::{bail, Context};
use smallvec::SmallVec;

use crate::error::{OptResult, OptimizerError};
use crate::expr::ColumnRef;
use crate::operator::{LogicalOperator, OperatorTrait};
use crate::plan::{ColumnId, IdAllocator, PlanNodeId, Schema};
use crate::rules::derive_keys;

pub type PlanNodeInputs = SmallVec<[PlanNodeId; 2]>;

/// One node of a logical plan.
#[derive(Clone, Debug, PartialEq)]
pub struct LogicalNode {
    id: PlanNodeId,
    operator: LogicalOperator,
    inputs: PlanNodeInputs,
    schema: Schema,
}

impl LogicalNode {
    pub fn id(&self) -> PlanNodeId {
        self.id
    }

    pub fn operator(&self) -> &LogicalOperator {
        &self.operator
    }

    pub fn inputs(&self) -> &[PlanNodeId] {
        &self.inputs
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }
}

/// A logical plan stored as an arena of nodes.
///
/// Nodes are never removed: a node dropped by a rewrite simply becomes unreachable from the
/// root. Slots are indexed by plan node id, so ids must come from the allocator of the
/// optimization that owns the plan.
#[derive(Clone, Debug, Default)]
pub struct LogicalPlan {
    nodes: Vec<LogicalNode>,
    root: PlanNodeId,
    /// Unique keys are maintained once key info construction has run.
    key_info_built: bool,
}

impl Index<PlanNodeId> for LogicalPlan {
    type Output = LogicalNode;

    fn index(&self, id: PlanNodeId) -> &LogicalNode {
        &self.nodes[id as usize]
    }
}

impl IndexMut<PlanNodeId> for LogicalPlan {
    fn index_mut(&mut self, id: PlanNodeId) -> &mut LogicalNode {
        &mut self.nodes[id as usize]
    }
}

impl LogicalPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node on top of `inputs` and derives its schema.
    pub fn add_node<I>(
        &mut self,
        ids: &mut IdAllocator,
        operator: LogicalOperator,
        inputs: I,
    ) -> OptResult<PlanNodeId>
    where
        I: IntoIterator<Item = PlanNodeId>,
    {
        let id = ids.next_plan_node_id();
        if id as usize != self.nodes.len() {
            bail!(OptimizerError::Internal(format!(
                "plan node id {id} doesn't match arena slot {}",
                self.nodes.len()
            )));
        }
        let inputs: PlanNodeInputs = inputs.into_iter().collect();
        let schema = {
            let input_schemas: Vec<&Schema> = inputs.iter().map(|i| self.schema(*i)).collect();
            operator
                .derive_schema(&input_schemas)
                .with_context(|| format!("Failed to derive schema of {}", operator.as_ref()))?
        };
        self.nodes.push(LogicalNode {
            id,
            operator,
            inputs,
            schema,
        });
        if self.key_info_built {
            let keys = derive_keys(self, id, self.schema(id));
            self.set_keys(id, keys);
        }
        Ok(id)
    }

    pub fn root(&self) -> PlanNodeId {
        self.root
    }

    pub fn set_root(&mut self, root: PlanNodeId) {
        self.root = root;
    }

    pub fn operator(&self, id: PlanNodeId) -> &LogicalOperator {
        &self[id].operator
    }

    /// Mutable access that leaves the schema untouched, for changes that can't affect it.
    pub(crate) fn operator_mut(&mut self, id: PlanNodeId) -> &mut LogicalOperator {
        &mut self[id].operator
    }

    /// Replaces the operator of a node, its schema is derived again.
    pub fn set_operator(&mut self, id: PlanNodeId, operator: LogicalOperator) -> OptResult<()> {
        self[id].operator = operator;
        self.derive_schema(id)
    }

    pub fn inputs(&self, id: PlanNodeId) -> &[PlanNodeId] {
        &self[id].inputs
    }

    pub fn input(&self, id: PlanNodeId, idx: usize) -> OptResult<PlanNodeId> {
        match self[id].inputs.get(idx) {
            Some(input) => Ok(*input),
            None => bail!(OptimizerError::Internal(format!(
                "plan node {id} has no input {idx}"
            ))),
        }
    }

    pub fn set_inputs<I: IntoIterator<Item = PlanNodeId>>(&mut self, id: PlanNodeId, inputs: I) {
        self[id].inputs = inputs.into_iter().collect();
    }

    pub fn set_input(&mut self, id: PlanNodeId, idx: usize, input: PlanNodeId) {
        self[id].inputs[idx] = input;
    }

    pub fn schema(&self, id: PlanNodeId) -> &Schema {
        &self[id].schema
    }

    pub fn output_schema(&self) -> &Schema {
        self.schema(self.root)
    }

    pub fn key_info_built(&self) -> bool {
        self.key_info_built
    }

    pub(crate) fn set_key_info_built(&mut self) {
        self.key_info_built = true;
    }

    pub(crate) fn set_keys(&mut self, id: PlanNodeId, keys: Vec<Vec<ColumnId>>) {
        self[id].schema.set_keys(keys);
    }

    /// Derives the schema of one node from the current schemas of its inputs.
    pub fn derive_schema(&mut self, id: PlanNodeId) -> OptResult<()> {
        let mut schema = {
            let node = &self[id];
            let input_schemas: Vec<&Schema> =
                node.inputs.iter().map(|i| self.schema(*i)).collect();
            node.operator.derive_schema(&input_schemas)?
        };
        if self.key_info_built {
            schema.set_keys(derive_keys(self, id, &schema));
        }
        self[id].schema = schema;
        Ok(())
    }

    /// Derives every reachable schema again, inputs first.
    pub fn derive_schemas(&mut self) -> OptResult<()> {
        for id in self.post_order() {
            self.derive_schema(id)?;
        }
        Ok(())
    }

    /// Reachable nodes, inputs before their parents.
    pub fn post_order(&self) -> Vec<PlanNodeId> {
        let mut order = vec![];
        self.post_order_from(self.root, &mut order);
        order
    }

    fn post_order_from(&self, id: PlanNodeId, order: &mut Vec<PlanNodeId>) {
        for input in self.inputs(id) {
            self.post_order_from(*input, order);
        }
        order.push(id);
    }

    /// Nodes of the subtree rooted at `id`, parents first.
    pub fn subtree(&self, id: PlanNodeId) -> Vec<PlanNodeId> {
        let mut nodes = vec![];
        let mut stack = vec![id];
        while let Some(node) = stack.pop() {
            nodes.push(node);
            stack.extend(self.inputs(node).iter().rev());
        }
        nodes
    }

    /// Correlated references to columns of `outer` made anywhere below `id`.
    pub fn correlated_columns(&self, id: PlanNodeId, outer: &HashSet<ColumnId>) -> Vec<ColumnRef> {
        let mut columns = vec![];
        for node in self.subtree(id) {
            for expr in self.operator(node).expressions() {
                expr.collect_correlated(&mut columns);
            }
        }
        columns.retain(|c| outer.contains(&c.id));
        columns
    }

    /// Every correlated reference made below `id`.
    pub fn all_correlated_columns(&self, id: PlanNodeId) -> Vec<ColumnRef> {
        let mut columns = vec![];
        for node in self.subtree(id) {
            for expr in self.operator(node).expressions() {
                expr.collect_correlated(&mut columns);
            }
        }
        columns
    }
}
