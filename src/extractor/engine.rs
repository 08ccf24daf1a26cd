use super::common::read_source;
use super::{Candidate, ExtractionContext, Extractor};
use crate::live::LiveObject;
use crate::unit::{via, Dependency, DependencyKind, ExtractedUnit, UnitType};
use anyhow::Result;

/// Mounted engines and rack apps, from live reflection
pub struct EngineExtractor;

impl Extractor for EngineExtractor {
    fn name(&self) -> &'static str {
        "engines"
    }

    fn discover(&self, ctx: &ExtractionContext) -> Result<Vec<Candidate>> {
        if !ctx.registry().is_available() {
            return Ok(Vec::new());
        }
        Ok(ctx
            .registry()
            .engine_mounts()
            .into_iter()
            .map(|e| Candidate::Live(LiveObject::Engine(e)))
            .collect())
    }

    fn try_extract(&self, ctx: &ExtractionContext, candidate: &Candidate) -> Result<Option<ExtractedUnit>> {
        let Candidate::Live(LiveObject::Engine(engine)) = candidate else {
            return Ok(None);
        };

        // Engines defined inside the repository get their real source
        let local = engine
            .source_location
            .as_deref()
            .map(|p| ctx.reader().relative(p).to_path_buf())
            .filter(|p| ctx.reader().exists(p));
        let source = match &local {
            Some(path) => read_source(ctx, path)?,
            None => format!("mount {} => \"{}\"\n", engine.name, engine.mount_path),
        };

        let mut unit = ExtractedUnit::new(UnitType::Engine, engine.name.clone(), local.as_deref())
            .with_namespace(engine.name.rsplit_once("::").map(|(ns, _)| ns.to_string()))
            .with_source(source)
            .with_metadata("mount_path", engine.mount_path.clone())
            .with_metadata("local", local.is_some());
        unit.add_dependency(Dependency::new(
            DependencyKind::Route,
            format!("ANY {}", engine.mount_path),
            via::MOUNT,
        ));
        Ok(Some(unit))
    }
}
