use super::common::{
    calls_named, class_unit, dsl_calls, method_chunks, public_methods, read_source, string_option,
    symbol_list_option, underscore, without_self,
};
use super::{Candidate, ExtractionContext, Extractor};
use crate::parser::DeclarationKind;
use crate::scanner::ScanLabels;
use crate::unit::{via, Dependency, DependencyKind, ExtractedUnit, UnitType};
use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;

const CONTROLLER_GLOBS: &[&str] = &["app/controllers/**/*_controller.rb"];

const FILTERS: &[&str] = &[
    "before_action",
    "after_action",
    "around_action",
    "prepend_before_action",
    "append_before_action",
    "skip_before_action",
    "skip_after_action",
    "skip_around_action",
];

static COMPONENT_RENDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\brender\s*\(?\s*((?:[A-Z]\w*::)*[A-Z]\w*Component)\.(?:new|with_collection)\b").unwrap());
static RESCUE_FROM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*rescue_from\s+([A-Z][\w:]*)").unwrap());
static LAYOUT: Lazy<Regex> = Lazy::new(|| Regex::new(r#"(?m)^\s*layout\s+["'](\w[\w/]*)["']"#).unwrap());

/// Request controllers: public actions, filter chains, rendered components
pub struct ControllerExtractor;

impl Extractor for ControllerExtractor {
    fn name(&self) -> &'static str {
        "controllers"
    }

    fn discover(&self, ctx: &ExtractionContext) -> Result<Vec<Candidate>> {
        Ok(ctx
            .reader()
            .glob(CONTROLLER_GLOBS)?
            .into_iter()
            .map(Candidate::File)
            .collect())
    }

    fn try_extract(&self, ctx: &ExtractionContext, candidate: &Candidate) -> Result<Option<ExtractedUnit>> {
        let Candidate::File(path) = candidate else {
            return Ok(None);
        };
        let source = read_source(ctx, path)?;
        let Some(decl) = ctx.parser().primary_declaration(&source) else {
            return Ok(None);
        };
        if decl.kind != DeclarationKind::Class || !decl.name.ends_with("Controller") {
            return Ok(None);
        }

        let actions = public_methods(ctx, &source, &decl.name);
        let calls = dsl_calls(&source);
        let filters: Vec<_> = calls_named(&calls, FILTERS)
            .map(|c| {
                json!({
                    "type": c.keyword,
                    "methods": c.symbols,
                    "only": symbol_list_option(&c.options, "only"),
                    "except": symbol_list_option(&c.options, "except"),
                    "if": string_option(&c.options, "if"),
                })
            })
            .collect();
        let rescues: Vec<&str> = RESCUE_FROM
            .captures_iter(&source)
            .filter_map(|c| c.get(1).map(|m| m.as_str()))
            .collect();
        let layout = LAYOUT.captures(&source).and_then(|c| c.get(1)).map(|m| m.as_str());

        let route_prefix = underscore(decl.name.trim_end_matches("Controller"));
        let routes: Vec<_> = ctx
            .registry()
            .all_routes()
            .into_iter()
            .filter(|r| r.controller.as_deref() == Some(route_prefix.as_str()))
            .map(|r| json!({"verb": r.verb, "path": r.path, "action": r.action}))
            .collect();

        let mut unit = class_unit(ctx, UnitType::Controller, path, &decl).with_source(source.as_str());
        unit.extend_dependencies(
            COMPONENT_RENDER
                .captures_iter(&source)
                .filter_map(|c| c.get(1))
                .map(|m| Dependency::new(DependencyKind::Component, m.as_str(), via::RENDER)),
        );
        let scanned = ctx.scanner().scan_all(&source, &ScanLabels::default());
        unit.extend_dependencies(without_self(scanned, &decl.name));

        unit.set_metadata("superclass", decl.superclass.clone());
        unit.set_metadata(
            "actions",
            actions.iter().map(|a| a.name.clone()).collect::<Vec<_>>(),
        );
        unit.set_metadata("filters", filters);
        unit.set_metadata("rescue_from", json!(rescues));
        unit.set_metadata("layout", layout);
        unit.set_metadata("routes", routes);

        if unit.needs_chunking(ctx.chunk_threshold()) {
            for chunk in method_chunks(&decl.name, "action", &actions) {
                unit.add_chunk(chunk);
            }
        }
        Ok(Some(unit))
    }
}
