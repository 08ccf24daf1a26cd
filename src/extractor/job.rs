use super::common::{class_unit, method_chunks, read_source, symbol_option, string_option, without_self};
use super::{Candidate, ExtractionContext, Extractor};
use crate::live::{LiveClass, LiveObject};
use crate::scanner::ScanLabels;
use crate::unit::{via, ExtractedUnit, UnitType};
use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use std::path::Path;

const JOB_GLOBS: &[&str] = &["app/jobs/**/*.rb", "app/workers/**/*.rb", "app/sidekiq/**/*.rb"];
const JOB_BASES: &[&str] = &["ActiveJob::Base", "ApplicationJob"];

static QUEUE_AS: Lazy<Regex> = Lazy::new(|| Regex::new(r#"(?m)^\s*queue_as\s+[:"']?(\w+)"#).unwrap());
static SIDEKIQ_OPTIONS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\s*sidekiq_options\s+(.+)$").unwrap());
static RETRY_RULE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*(retry_on|discard_on)\s+([A-Z][\w:]*(?:\s*,\s*[A-Z][\w:]*)*)(.*)$").unwrap());
static SIDEKIQ_MIXIN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*include\s+Sidekiq::(?:Job|Worker)\b").unwrap());
static PERFORM_PARAMS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\s*def\s+perform\s*\(?([^)\n]*)\)?").unwrap());

/// Background jobs: queue, retry policy, perform signature, what they touch
pub struct JobExtractor;

impl JobExtractor {
    fn extract_file(&self, ctx: &ExtractionContext, path: &Path, live: Option<&LiveClass>) -> Result<Option<ExtractedUnit>> {
        let source = read_source(ctx, path)?;
        if !source.contains("def perform") {
            return Ok(None);
        }
        let Some(decl) = ctx.parser().primary_declaration(&source) else {
            return Ok(None);
        };

        let sidekiq = SIDEKIQ_MIXIN.is_match(&source);
        let sidekiq_options = SIDEKIQ_OPTIONS
            .captures(&source)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string());
        let queue = QUEUE_AS
            .captures(&source)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .or_else(|| {
                let options = sidekiq_options.as_deref()?;
                symbol_option(options, "queue").or_else(|| string_option(options, "queue"))
            })
            .or_else(|| live.and_then(|c| c.options.get("queue_name")).and_then(Value::as_str).map(str::to_string));
        let retry_rules: Vec<Value> = RETRY_RULE
            .captures_iter(&source)
            .filter_map(|c| {
                Some(json!({
                    "type": c.get(1)?.as_str(),
                    "exceptions": c.get(2)?.as_str().split(',').map(str::trim).collect::<Vec<_>>(),
                    "options": c.get(3).map_or("", |m| m.as_str()).trim().trim_start_matches(',').trim(),
                }))
            })
            .collect();
        let perform_params: Vec<String> = PERFORM_PARAMS
            .captures(&source)
            .and_then(|c| c.get(1))
            .map(|m| {
                m.as_str()
                    .split(',')
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let mut unit = class_unit(ctx, UnitType::Job, path, &decl).with_source(source.as_str());
        let labels = ScanLabels::default().with_job(via::ENQUEUE);
        let scanned = ctx.scanner().scan_all(&source, &labels);
        unit.extend_dependencies(without_self(scanned, &decl.name));

        let methods: Vec<_> = ctx
            .parser()
            .definitions(&source)
            .into_iter()
            .filter(|m| m.owner.as_deref() == Some(decl.name.as_str()))
            .collect();

        unit.set_metadata("superclass", decl.superclass.clone());
        unit.set_metadata("backend", if sidekiq { "sidekiq" } else { "active_job" });
        unit.set_metadata("queue", queue.unwrap_or_else(|| "default".to_string()));
        unit.set_metadata("retry_rules", retry_rules);
        unit.set_metadata("sidekiq_options", sidekiq_options);
        unit.set_metadata("perform_params", perform_params);
        if let Some(class) = live {
            unit.set_metadata("reflection", Value::Object(class.options.clone()));
        }

        if unit.needs_chunking(ctx.chunk_threshold()) {
            for chunk in method_chunks(&decl.name, "method", &methods) {
                unit.add_chunk(chunk);
            }
        }
        Ok(Some(unit))
    }

    fn runtime_only(&self, class: &LiveClass) -> ExtractedUnit {
        let superclass = class.superclass.as_deref().unwrap_or("ApplicationJob");
        let queue = class
            .options
            .get("queue_name")
            .and_then(Value::as_str)
            .unwrap_or("default");
        ExtractedUnit::new(UnitType::Job, class.name.clone(), None)
            .with_namespace(class.name.rsplit_once("::").map(|(ns, _)| ns.to_string()))
            .with_source(format!("# runtime-only job\nclass {} < {}\nend\n", class.name, superclass))
            .with_metadata("backend", "active_job")
            .with_metadata("queue", queue)
            .with_metadata("runtime_only", true)
            .with_metadata("reflection", Value::Object(class.options.clone()))
    }
}

impl Extractor for JobExtractor {
    fn name(&self) -> &'static str {
        "jobs"
    }

    fn discover(&self, ctx: &ExtractionContext) -> Result<Vec<Candidate>> {
        let mut candidates = Vec::new();
        if ctx.registry().is_available() {
            candidates.extend(
                ctx.registry()
                    .subclasses_of("ActiveJob::Base")
                    .into_iter()
                    .filter(|c| !JOB_BASES.contains(&c.name.as_str()))
                    .map(|c| Candidate::Live(LiveObject::Class(c))),
            );
        }
        candidates.extend(ctx.reader().glob(JOB_GLOBS)?.into_iter().map(Candidate::File));
        Ok(candidates)
    }

    fn try_extract(&self, ctx: &ExtractionContext, candidate: &Candidate) -> Result<Option<ExtractedUnit>> {
        match candidate {
            Candidate::File(path) => self.extract_file(ctx, path, None),
            Candidate::Live(LiveObject::Class(class)) => {
                if let Some(location) = &class.source_location {
                    let relative = ctx.reader().relative(location);
                    if ctx.reader().exists(relative) {
                        if let Some(unit) = self.extract_file(ctx, relative, Some(class))? {
                            return Ok(Some(unit));
                        }
                    }
                }
                Ok(Some(self.runtime_only(class)))
            }
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::test_support::{context, live_context};
    use crate::source::MemorySourceReader;
    use crate::unit::DependencyKind;
    use std::path::PathBuf;

    const RECEIPT_JOB: &str = r#"class ReceiptJob < ApplicationJob
  queue_as :mailers
  retry_on Net::ReadTimeout, Timeout::Error, wait: 5.seconds, attempts: 3
  discard_on ActiveJob::DeserializationError

  def perform(order_id, resend = false)
    order = Order.find(order_id)
    ReceiptMailer.receipt(order).deliver_now
    AnalyticsJob.perform_later("receipt", order_id)
  end
end
"#;

    const SYNC_WORKER: &str = r#"class SyncWorker
  include Sidekiq::Job
  sidekiq_options queue: :critical, retry: 5

  def perform(id)
    InventoryService.call(id)
  end
end
"#;

    fn reader() -> MemorySourceReader {
        MemorySourceReader::new()
            .with_file("app/jobs/receipt_job.rb", RECEIPT_JOB)
            .with_file("app/jobs/application_job.rb", "class ApplicationJob < ActiveJob::Base\nend\n")
            .with_file("app/workers/sync_worker.rb", SYNC_WORKER)
            .with_file("app/models/order.rb", "class Order < ApplicationRecord\nend\n")
    }

    #[test]
    fn test_active_job_metadata() {
        let ctx = context(reader());
        let unit = JobExtractor
            .extract_one(&ctx, &Candidate::File(PathBuf::from("app/jobs/receipt_job.rb")))
            .unwrap();
        assert_eq!(unit.metadata["backend"], "active_job");
        assert_eq!(unit.metadata["queue"], "mailers");
        assert_eq!(unit.metadata["perform_params"], json!(["order_id", "resend = false"]));
        let rules = unit.metadata["retry_rules"].as_array().unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0]["exceptions"], json!(["Net::ReadTimeout", "Timeout::Error"]));
        assert_eq!(rules[0]["options"], "wait: 5.seconds, attempts: 3");
        assert_eq!(rules[1]["type"], "discard_on");
    }

    #[test]
    fn test_enqueued_jobs_are_labelled() {
        let ctx = context(reader());
        let unit = JobExtractor
            .extract_one(&ctx, &Candidate::File(PathBuf::from("app/jobs/receipt_job.rb")))
            .unwrap();
        let deps: Vec<(DependencyKind, &str, &str)> = unit
            .dependencies()
            .iter()
            .map(|d| (d.kind, d.target.as_str(), d.via.as_str()))
            .collect();
        assert_eq!(
            deps,
            vec![
                (DependencyKind::Model, "Order", "code_reference"),
                (DependencyKind::Job, "AnalyticsJob", "enqueue"),
                (DependencyKind::Mailer, "ReceiptMailer", "code_reference"),
            ]
        );
    }

    #[test]
    fn test_sidekiq_worker() {
        let ctx = context(reader());
        let unit = JobExtractor
            .extract_one(&ctx, &Candidate::File(PathBuf::from("app/workers/sync_worker.rb")))
            .unwrap();
        assert_eq!(unit.identifier, "SyncWorker");
        assert_eq!(unit.metadata["backend"], "sidekiq");
        assert_eq!(unit.metadata["queue"], "critical");
        assert_eq!(unit.dependencies()[0].target, "InventoryService");
    }

    #[test]
    fn test_base_class_without_perform_is_skipped() {
        let ctx = context(reader());
        let candidate = Candidate::File(PathBuf::from("app/jobs/application_job.rb"));
        assert!(JobExtractor.try_extract(&ctx, &candidate).unwrap().is_none());
    }

    #[test]
    fn test_live_job_prefers_source_and_falls_back_to_reflection() {
        let ctx = live_context(
            reader(),
            json!({"classes": [
                {"name": "ApplicationJob", "superclass": "ActiveJob::Base"},
                {"name": "ReceiptJob", "superclass": "ApplicationJob", "source_location": "app/jobs/receipt_job.rb"},
                {"name": "GemJob", "superclass": "ApplicationJob", "options": {"queue_name": "low"}}
            ]}),
        );
        let units = JobExtractor.extract_all(&ctx).unwrap();
        let ids: Vec<&str> = units.iter().map(|u| u.identifier.as_str()).collect();
        assert_eq!(ids, vec!["ReceiptJob", "GemJob", "ReceiptJob", "SyncWorker"]);
        assert_eq!(units[0].metadata["queue"], "mailers");
        assert_eq!(units[1].metadata["queue"], "low");
        assert_eq!(units[1].metadata["runtime_only"], true);
    }
}
