use std::sync::Arc;

use crate::cost::Cost;
use crate::operator::PhysicalOperator;
use crate::plan::{PlanNodeId, Schema};
use crate::properties::OrderSpec;

pub type PhysicalNodeRef = Arc<PhysicalNode>;

/// One node of a physical plan.
#[derive(Debug, Clone, PartialEq)]
pub struct PhysicalNode {
    id: PlanNodeId,
    operator: PhysicalOperator,
    inputs: Vec<PhysicalNodeRef>,
    schema: Schema,
    /// Estimated output rows.
    rows: f64,
    /// Cost of the node including its inputs.
    cost: Cost,
    order: OrderSpec,
}

impl PhysicalNode {
    pub fn id(&self) -> PlanNodeId {
        self.id
    }

    pub fn operator(&self) -> &PhysicalOperator {
        &self.operator
    }

    pub fn inputs(&self) -> &[PhysicalNodeRef] {
        &self.inputs
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn rows(&self) -> f64 {
        self.rows
    }

    pub fn cost(&self) -> Cost {
        self.cost
    }

    pub fn order(&self) -> &OrderSpec {
        &self.order
    }

    /// Copy of this node reading `inputs` instead.
    pub fn with_inputs(&self, inputs: Vec<PhysicalNodeRef>) -> PhysicalNode {
        PhysicalNode {
            inputs,
            ..self.clone()
        }
    }
}

pub struct PhysicalNodeBuilder {
    node: PhysicalNode,
}

impl PhysicalNodeBuilder {
    pub fn new(id: PlanNodeId, operator: PhysicalOperator, schema: Schema) -> Self {
        Self {
            node: PhysicalNode {
                id,
                operator,
                inputs: vec![],
                schema,
                rows: 0.0,
                cost: Cost::from(0.0),
                order: OrderSpec::default(),
            },
        }
    }

    pub fn add_inputs<I>(mut self, inputs: I) -> Self
    where
        I: IntoIterator<Item = PhysicalNodeRef>,
    {
        self.node.inputs.extend(inputs);
        self
    }

    pub fn with_rows(mut self, rows: f64) -> Self {
        self.node.rows = rows;
        self
    }

    pub fn with_cost(mut self, cost: Cost) -> Self {
        self.node.cost = cost;
        self
    }

    pub fn with_order(mut self, order: OrderSpec) -> Self {
        self.node.order = order;
        self
    }

    pub fn build(self) -> PhysicalNode {
        self.node
    }
}

/// An executable plan.
#[derive(Debug, Clone, PartialEq)]
pub struct PhysicalPlan {
    root: PhysicalNodeRef,
}

impl PhysicalPlan {
    pub fn new(root: PhysicalNodeRef) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &PhysicalNodeRef {
        &self.root
    }

    pub fn schema(&self) -> &Schema {
        self.root.schema()
    }

    pub fn cost(&self) -> Cost {
        self.root.cost()
    }

    /// Nodes in depth first order, parents first.
    pub fn nodes(&self) -> Vec<PhysicalNodeRef> {
        let mut nodes = vec![];
        let mut stack = vec![self.root.clone()];
        while let Some(node) = stack.pop() {
            stack.extend(node.inputs().iter().rev().cloned());
            nodes.push(node);
        }
        nodes
    }
}
