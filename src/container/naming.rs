//! Container naming

use crate::models::Scope;

/// `{app}-{name}-{user|system}`; a pure function so it can be recomputed after restarts
pub fn container_name(app_name: &str, name: &str, scope: Scope) -> String {
    format!("{}-{}-{}", app_name, name, scope.as_str())
}
