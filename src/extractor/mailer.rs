use super::common::{class_unit, method_chunks, public_methods, read_source, string_option, without_self};
use super::{Candidate, ExtractionContext, Extractor};
use crate::parser::DeclarationKind;
use crate::scanner::ScanLabels;
use crate::unit::{ExtractedUnit, UnitType};
use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;

const MAILER_GLOBS: &[&str] = &["app/mailers/**/*.rb"];
const MAILER_BASES: &[&str] = &["ActionMailer::Base", "ApplicationMailer"];

static DEFAULTS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\s*default\s+(.+)$").unwrap());
static LAYOUT: Lazy<Regex> = Lazy::new(|| Regex::new(r#"(?m)^\s*layout\s+["'](\w[\w/]*)["']"#).unwrap());

pub struct MailerExtractor;

impl Extractor for MailerExtractor {
    fn name(&self) -> &'static str {
        "mailers"
    }

    fn discover(&self, ctx: &ExtractionContext) -> Result<Vec<Candidate>> {
        Ok(ctx
            .reader()
            .glob(MAILER_GLOBS)?
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
        let is_mailer = decl.name.ends_with("Mailer")
            || decl
                .superclass
                .as_deref()
                .map_or(false, |sc| MAILER_BASES.contains(&sc) || sc.ends_with("Mailer"));
        if decl.kind != DeclarationKind::Class || !is_mailer {
            return Ok(None);
        }

        let actions = public_methods(ctx, &source, &decl.name);
        let defaults = DEFAULTS
            .captures(&source)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string());
        let default_from = defaults.as_deref().and_then(|d| string_option(d, "from"));
        let layout = LAYOUT.captures(&source).and_then(|c| c.get(1)).map(|m| m.as_str());

        let mut unit = class_unit(ctx, UnitType::Mailer, path, &decl).with_source(source.as_str());
        let scanned = ctx.scanner().scan_all(&source, &ScanLabels::default());
        unit.extend_dependencies(without_self(scanned, &decl.name));

        unit.set_metadata("superclass", decl.superclass.clone());
        unit.set_metadata(
            "actions",
            actions.iter().map(|a| a.name.clone()).collect::<Vec<_>>(),
        );
        unit.set_metadata("default_from", default_from);
        unit.set_metadata("layout", layout);

        if unit.needs_chunking(ctx.chunk_threshold()) {
            for chunk in method_chunks(&decl.name, "action", &actions) {
                unit.add_chunk(chunk);
            }
        }
        Ok(Some(unit))
    }
}
