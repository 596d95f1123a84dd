//! Identifier helpers.

use uuid::Uuid;

/// Fresh envelope/instance id, collision-free for a broker lifetime.
#[must_use]
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Fresh task-graph id.
#[must_use]
pub fn new_graph_id() -> String {
    format!("graph-{}", Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        assert_ne!(new_id(), new_id());
        assert!(new_graph_id().starts_with("graph-"));
    }
}
