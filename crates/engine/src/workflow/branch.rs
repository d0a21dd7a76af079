//! Conditional branch selection.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::expression::Expression;

/// A candidate path out of a decision point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionalBranch {
    pub name: String,

    /// Guard expression. A branch without one is the default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
}

impl ConditionalBranch {
    pub fn new(name: impl Into<String>, when: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            when: Some(when.into()),
        }
    }

    pub fn default_branch(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            when: None,
        }
    }
}

/// First branch whose guard holds, else the first default branch.
///
/// Guards that fail to parse are logged and treated as unmet.
pub fn select_branch<'a>(
    branches: &'a [ConditionalBranch],
    context: &HashMap<String, Value>,
) -> Option<&'a ConditionalBranch> {
    let guarded = branches.iter().find(|branch| match &branch.when {
        Some(source) => match Expression::parse(source) {
            Ok(expr) => expr.evaluate(context),
            Err(e) => {
                warn!(branch = %branch.name, error = %e, "Ignoring branch with invalid guard");
                false
            }
        },
        None => false,
    });

    guarded.or_else(|| branches.iter().find(|branch| branch.when.is_none()))
}
