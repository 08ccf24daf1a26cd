use super::common::camelize;
use super::{Candidate, ExtractionContext, Extractor};
use crate::live::{LiveObject, RouteEntry};
use crate::unit::{via, Dependency, DependencyKind, ExtractedUnit, UnitType};
use anyhow::Result;
use serde_json::Value;

/// Framework-internal routes (active storage, mailbox conductor, ...)
const INTERNAL_PREFIXES: &[&str] = &["/rails/", "/recede_historical_location", "/resume_historical_location", "/refresh_historical_location"];

/// Routing table entries; only available with live reflection
pub struct RouteExtractor;

fn route_source(route: &RouteEntry) -> String {
    let verb = if route.verb.is_empty() { "match" } else { route.verb.as_str() };
    let mut line = format!("{} \"{}\"", verb.to_lowercase(), route.path);
    if let (Some(controller), Some(action)) = (&route.controller, &route.action) {
        line.push_str(&format!(", to: \"{}#{}\"", controller, action));
    }
    if let Some(name) = &route.name {
        line.push_str(&format!(", as: \"{}\"", name));
    }
    line.push('\n');
    line
}

impl Extractor for RouteExtractor {
    fn name(&self) -> &'static str {
        "routes"
    }

    fn discover(&self, ctx: &ExtractionContext) -> Result<Vec<Candidate>> {
        if !ctx.registry().is_available() {
            return Ok(Vec::new());
        }
        Ok(ctx
            .registry()
            .all_routes()
            .into_iter()
            .filter(|r| !INTERNAL_PREFIXES.iter().any(|p| r.path.starts_with(p)))
            .map(|r| Candidate::Live(LiveObject::Route(r)))
            .collect())
    }

    fn try_extract(&self, _ctx: &ExtractionContext, candidate: &Candidate) -> Result<Option<ExtractedUnit>> {
        let Candidate::Live(LiveObject::Route(route)) = candidate else {
            return Ok(None);
        };

        let mut unit = ExtractedUnit::new(UnitType::Route, route.identifier(), None).with_source(route_source(route));
        let controller_class = route
            .controller
            .as_deref()
            .filter(|c| !c.is_empty())
            .map(|c| format!("{}Controller", camelize(c)));
        if let Some(class) = &controller_class {
            unit.add_dependency(Dependency::new(DependencyKind::Controller, class.clone(), via::ROUTE));
        }

        unit.set_metadata("verb", route.verb.to_uppercase());
        unit.set_metadata("path", route.path.clone());
        unit.set_metadata("controller", route.controller.clone());
        unit.set_metadata("controller_class", controller_class);
        unit.set_metadata("action", route.action.clone());
        unit.set_metadata("name", route.name.clone());
        unit.set_metadata("constraints", Value::Object(route.constraints.clone()));
        Ok(Some(unit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::test_support::{context, live_context};
    use crate::source::MemorySourceReader;
    use serde_json::json;

    #[test]
    fn test_routes_link_to_controllers() {
        let ctx = live_context(
            MemorySourceReader::new(),
            json!({"routes": [
                {"verb": "GET", "path": "/admin/orders/:id(.:format)", "controller": "admin/orders", "action": "show", "name": "admin_order"},
                {"verb": "", "path": "/health", "controller": null, "action": null},
                {"verb": "GET", "path": "/rails/active_storage/blobs/:signed_id", "controller": "active_storage/blobs", "action": "show"}
            ]}),
        );
        let units = RouteExtractor.extract_all(&ctx).unwrap();
        assert_eq!(units.len(), 2);

        let show = &units[0];
        assert_eq!(show.identifier, "GET /admin/orders/:id(.:format)");
        assert_eq!(show.metadata["controller_class"], "Admin::OrdersController");
        assert_eq!(show.dependencies()[0].target, "Admin::OrdersController");
        assert_eq!(show.dependencies()[0].via, "route");
        assert_eq!(
            show.source_code,
            "get \"/admin/orders/:id(.:format)\", to: \"admin/orders#show\", as: \"admin_order\"\n"
        );

        assert_eq!(units[1].identifier, "ANY /health");
        assert!(units[1].dependencies().is_empty());
    }

    #[test]
    fn test_no_routes_without_reflection() {
        let ctx = context(MemorySourceReader::new());
        assert!(RouteExtractor.extract_all(&ctx).unwrap().is_empty());
    }
}
