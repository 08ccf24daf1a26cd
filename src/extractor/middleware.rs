use super::common::underscore;
use super::{Candidate, ExtractionContext, Extractor};
use crate::live::LiveObject;
use crate::unit::{ExtractedUnit, UnitType};
use anyhow::Result;
use serde_json::json;
use std::path::PathBuf;

pub const MIDDLEWARE_STACK_IDENTIFIER: &str = "MiddlewareStack";

const CUSTOM_MIDDLEWARE_DIRS: &[&str] = &["app/middleware", "lib/middleware", "app/middlewares"];

/// The ordered request middleware stack as a single unit
pub struct MiddlewareExtractor;

impl Extractor for MiddlewareExtractor {
    fn name(&self) -> &'static str {
        "middleware"
    }

    fn discover(&self, ctx: &ExtractionContext) -> Result<Vec<Candidate>> {
        if !ctx.registry().is_available() {
            return Ok(Vec::new());
        }
        let entries = ctx.registry().middleware_entries();
        if entries.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![Candidate::Live(LiveObject::Middleware(entries))])
    }

    fn try_extract(&self, ctx: &ExtractionContext, candidate: &Candidate) -> Result<Option<ExtractedUnit>> {
        let Candidate::Live(LiveObject::Middleware(entries)) = candidate else {
            return Ok(None);
        };

        let mut source = String::from("# Middleware stack, outermost first\n");
        let mut layers = Vec::with_capacity(entries.len());
        for (position, entry) in entries.iter().enumerate() {
            if entry.args.is_empty() {
                source.push_str(&format!("use {}\n", entry.name));
            } else {
                source.push_str(&format!("use {}, {}\n", entry.name, entry.args.join(", ")));
            }
            let location = CUSTOM_MIDDLEWARE_DIRS
                .iter()
                .map(|dir| PathBuf::from(format!("{}/{}.rb", dir, underscore(&entry.name))))
                .find(|path| ctx.reader().exists(path));
            layers.push(json!({
                "position": position,
                "name": entry.name,
                "args": entry.args,
                "custom": location.is_some(),
                "source_location": location,
            }));
        }

        let unit = ExtractedUnit::new(UnitType::Middleware, MIDDLEWARE_STACK_IDENTIFIER, None)
            .with_source(source)
            .with_metadata("middleware_count", entries.len())
            .with_metadata("middleware", layers);
        Ok(Some(unit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::test_support::{context, live_context};
    use crate::source::MemorySourceReader;

    #[test]
    fn test_stack_is_one_ordered_unit() {
        let ctx = live_context(
            MemorySourceReader::new().with_file("app/middleware/request_tagger.rb", "class RequestTagger\nend\n"),
            json!({"middleware": [
                {"name": "ActionDispatch::HostAuthorization"},
                {"name": "Rack::Runtime"},
                {"name": "RequestTagger", "args": ["header: \"X-Request-Tag\""]}
            ]}),
        );
        let units = MiddlewareExtractor.extract_all(&ctx).unwrap();
        assert_eq!(units.len(), 1);

        let unit = &units[0];
        assert_eq!(unit.identifier, "MiddlewareStack");
        assert_eq!(unit.metadata["middleware_count"], 3);
        assert_eq!(unit.metadata["middleware"][1]["name"], "Rack::Runtime");
        assert_eq!(unit.metadata["middleware"][2]["custom"], true);
        assert_eq!(unit.metadata["middleware"][2]["source_location"], "app/middleware/request_tagger.rb");
        assert!(unit.source_code.contains("use RequestTagger, header: \"X-Request-Tag\"\n"));
    }

    #[test]
    fn test_static_run_has_no_stack() {
        let ctx = context(MemorySourceReader::new());
        assert!(MiddlewareExtractor.extract_all(&ctx).unwrap().is_empty());
    }
}
