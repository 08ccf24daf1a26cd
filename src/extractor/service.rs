use super::common::{class_unit, method_chunks, public_methods, read_source, without_self};
use super::{Candidate, ExtractionContext, Extractor};
use crate::scanner::ScanLabels;
use crate::unit::{via, Dependency, DependencyKind, ExtractedUnit, UnitType};
use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;

const SERVICE_GLOBS: &[&str] = &["app/services/**/*.rb", "app/interactors/**/*.rb", "app/operations/**/*.rb"];
const ENTRY_POINTS: &[&str] = &["call", "perform", "execute", "run", "process"];

static INITIALIZE_PARAMS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*def\s+initialize\s*\(?([^)\n]*)\)?").unwrap());

/// Service objects: entry points, constructor arguments and collaborators
pub struct ServiceExtractor;

impl Extractor for ServiceExtractor {
    fn name(&self) -> &'static str {
        "services"
    }

    fn discover(&self, ctx: &ExtractionContext) -> Result<Vec<Candidate>> {
        Ok(ctx
            .reader()
            .glob(SERVICE_GLOBS)?
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

        let definitions = ctx.parser().definitions(&source);
        let own: Vec<_> = definitions
            .iter()
            .filter(|m| m.owner.as_deref() == Some(decl.name.as_str()))
            .cloned()
            .collect();
        let mut entry_points: Vec<String> = own
            .iter()
            .filter(|m| ENTRY_POINTS.contains(&m.name.as_str()))
            .map(|m| if m.singleton { format!("self.{}", m.name) } else { m.name.clone() })
            .collect();
        entry_points.dedup();
        // A file with no entry point and no public behaviour is a plain helper
        let public = public_methods(ctx, &source, &decl.name);
        if entry_points.is_empty() && public.is_empty() && own.iter().all(|m| !m.singleton) {
            return Ok(None);
        }

        let params: Vec<String> = INITIALIZE_PARAMS
            .captures(&source)
            .and_then(|c| c.get(1))
            .map(|m| {
                m.as_str()
                    .split(',')
                    .map(|p| p.trim().trim_end_matches(':').to_string())
                    .filter(|p| !p.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let mut unit = class_unit(ctx, UnitType::Service, path, &decl).with_source(source.as_str());
        if let Some(parent) = decl.superclass.as_deref().filter(|s| s.ends_with("Service")) {
            unit.add_dependency(Dependency::new(DependencyKind::Service, parent, via::INHERITANCE));
        }
        let scanned = ctx.scanner().scan_all(&source, &ScanLabels::default());
        unit.extend_dependencies(without_self(scanned, &decl.name));

        unit.set_metadata("superclass", decl.superclass.clone());
        unit.set_metadata("entry_points", entry_points);
        unit.set_metadata(
            "public_methods",
            public.iter().map(|m| m.name.clone()).collect::<Vec<_>>(),
        );
        unit.set_metadata("initialize_params", params);
        unit.set_metadata("method_count", own.len());

        if unit.needs_chunking(ctx.chunk_threshold()) {
            for chunk in method_chunks(&decl.name, "method", &own) {
                unit.add_chunk(chunk);
            }
        }
        Ok(Some(unit))
    }
}
