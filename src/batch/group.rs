use std::collections::HashMap;

use rust_decimal::Decimal;

use crate::batch::request::BatchRequest;
use crate::client::RequestContext;
use crate::models::Priority;

/// Requests sharing operation, role and branch, flushed together.
#[derive(Debug)]
pub struct BatchGroup {
    pub operation: String,
    pub role: String,
    pub branch_id: Option<String>,
    pub members: Vec<BatchRequest>,
}

impl BatchGroup {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn total_cost(&self) -> Decimal {
        self.members.iter().map(|m| m.cost_estimate).sum()
    }

    pub fn average_priority(&self) -> f64 {
        if self.members.is_empty() {
            return 0.0;
        }
        let total: u32 = self.members.iter().map(|m| m.priority.weight() as u32).sum();
        total as f64 / self.members.len() as f64
    }

    pub fn highest_priority(&self) -> Priority {
        self.members
            .iter()
            .map(|m| m.priority)
            .max()
            .unwrap_or_default()
    }

    /// Context handed to the handler: shared role and branch, the most urgent priority.
    pub fn context(&self) -> RequestContext {
        RequestContext {
            role: self.role.clone(),
            branch_id: self.branch_id.clone(),
            priority: self.highest_priority(),
            timeout: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct Grouping {
    pub groups: Vec<BatchGroup>,
    /// Members beyond a group's size cap; these run individually right away.
    pub overflow: Vec<BatchRequest>,
}

/// Partition by (operation, role, branch), keeping first-seen order.
pub fn group_requests(
    pending: Vec<BatchRequest>,
    max_batch_size: impl Fn(&str) -> usize,
) -> Grouping {
    let mut grouping = Grouping::default();
    let mut index: HashMap<(String, String, Option<String>), usize> = HashMap::new();

    for request in pending {
        let key = (
            request.operation.clone(),
            request.role.clone(),
            request.branch_id.clone(),
        );
        let slot = *index.entry(key).or_insert_with(|| {
            grouping.groups.push(BatchGroup {
                operation: request.operation.clone(),
                role: request.role.clone(),
                branch_id: request.branch_id.clone(),
                members: Vec::new(),
            });
            grouping.groups.len() - 1
        });

        let group = &mut grouping.groups[slot];
        if group.members.len() < max_batch_size(&group.operation).max(1) {
            group.members.push(request);
        } else {
            grouping.overflow.push(request);
        }
    }

    grouping
}
