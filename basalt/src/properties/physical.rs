use crate::properties::{OrderSpec, PhysicalProp};

/// Property a parent requires from the physical plan of its child.
#[derive(Hash, Debug, Clone, Eq, PartialEq, Default)]
pub struct RequiredProperty {
    pub sort: OrderSpec,
    /// The parent reads at most this many rows.
    pub limit: Option<u64>,
}

/// Operator appended on top of a child plan to make it satisfy a required property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Enforcer {
    Sort(OrderSpec),
    TopN { sort: OrderSpec, count: u64 },
}

impl RequiredProperty {
    pub fn new(sort: OrderSpec, limit: Option<u64>) -> Self {
        Self { sort, limit }
    }

    pub fn sorted(sort: OrderSpec) -> Self {
        Self { sort, limit: None }
    }

    pub fn is_empty(&self) -> bool {
        self.sort.is_empty() && self.limit.is_none()
    }

    pub fn without_limit(&self) -> Self {
        Self::sorted(self.sort.clone())
    }

    /// When `provided` doesn't meet the required ordering, returns the enforcer to append.
    pub(crate) fn enforcer(&self, provided: &OrderSpec) -> Option<Enforcer> {
        if provided.satisfies(&self.sort) {
            return None;
        }
        Some(match self.limit {
            Some(count) => Enforcer::TopN {
                sort: self.sort.clone(),
                count,
            },
            None => Enforcer::Sort(self.sort.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::properties::SortColumn;

    #[test]
    fn test_enforcer() {
        let sort = OrderSpec::new(vec![SortColumn::asc(1)]);
        let required = RequiredProperty::sorted(sort.clone());
        assert_eq!(None, required.enforcer(&sort));
        assert_eq!(
            Some(Enforcer::Sort(sort.clone())),
            required.enforcer(&OrderSpec::default())
        );
        let required = RequiredProperty::new(sort.clone(), Some(10));
        assert_eq!(
            Some(Enforcer::TopN { sort, count: 10 }),
            required.enforcer(&OrderSpec::default())
        );
        assert_eq!(None, RequiredProperty::default().enforcer(&OrderSpec::default()));
    }
}
