//! Create-vs-update routing for display identifiers.

use std::collections::HashSet;

/// Display identifiers already materialized by the caller during this
/// process lifetime. Reset on every restart: whether the caller kept a
/// placeholder for an old id across a re-run is unknowable from here, so
/// after a restart every id routes as a fresh create.
#[derive(Debug, Default)]
pub struct DisplayRegistry {
    seen: HashSet<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayRoute {
    Create,
    Update,
}

impl DisplayRegistry {
    pub fn route(&mut self, display_id: Option<&str>) -> DisplayRoute {
        match display_id {
            Some(id) if self.seen.contains(id) => DisplayRoute::Update,
            Some(id) => {
                self.seen.insert(id.to_string());
                DisplayRoute::Create
            }
            None => DisplayRoute::Create,
        }
    }

    pub fn reset(&mut self) {
        self.seen.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_id_routes_create_then_update() {
        let mut registry = DisplayRegistry::default();
        assert_eq!(registry.route(Some("abc")), DisplayRoute::Create);
        assert_eq!(registry.route(Some("abc")), DisplayRoute::Update);
        assert_eq!(registry.route(Some("abc")), DisplayRoute::Update);
    }

    #[test]
    fn anonymous_content_always_creates() {
        let mut registry = DisplayRegistry::default();
        assert_eq!(registry.route(None), DisplayRoute::Create);
        assert_eq!(registry.route(None), DisplayRoute::Create);
    }

    #[test]
    fn reset_forgets_every_id() {
        let mut registry = DisplayRegistry::default();
        registry.route(Some("abc"));
        registry.reset();
        assert_eq!(registry.route(Some("abc")), DisplayRoute::Create);
    }
}
