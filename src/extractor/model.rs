use super::common::{
    calls_named, class_unit, classify, camelize, dsl_calls, included_modules, method_chunks, pluralize,
    read_source, string_option, symbol_option, underscore, without_self, DslCall,
};
use super::{Candidate, ExtractionContext, Extractor};
use crate::live::{LiveClass, LiveObject};
use crate::parser::DeclarationKind;
use crate::scanner::ScanLabels;
use crate::unit::{via, Dependency, DependencyKind, ExtractedUnit, UnitChunk, UnitType};
use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};

const MODEL_GLOBS: &[&str] = &["app/models/**/*.rb"];
const RECORD_BASES: &[&str] = &["ActiveRecord::Base", "ApplicationRecord"];

const ASSOCIATIONS: &[&str] = &["belongs_to", "has_many", "has_one", "has_and_belongs_to_many"];
const CALLBACKS: &[&str] = &[
    "before_validation",
    "after_validation",
    "before_save",
    "around_save",
    "after_save",
    "before_create",
    "around_create",
    "after_create",
    "before_update",
    "around_update",
    "after_update",
    "before_destroy",
    "around_destroy",
    "after_destroy",
    "after_commit",
    "after_rollback",
    "after_create_commit",
    "after_update_commit",
    "after_destroy_commit",
    "after_save_commit",
    "after_initialize",
    "after_find",
];
const VALIDATIONS: &[&str] = &[
    "validates",
    "validates_presence_of",
    "validates_uniqueness_of",
    "validates_associated",
    "validates_format_of",
    "validates_length_of",
    "validates_numericality_of",
    "validates_inclusion_of",
];

static TABLE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"self\.table_name\s*=\s*["']([\w.]+)["']"#).unwrap());
static SCHEMA_COLUMN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^\s*t\.(\w+)\s+["'](\w+)["'](.*)$"#).unwrap());

/// ActiveRecord models: associations, callbacks, validations, scopes,
/// schema columns and inlined concerns
pub struct ModelExtractor;

impl ModelExtractor {
    fn extract_live(&self, ctx: &ExtractionContext, class: &LiveClass) -> Result<Option<ExtractedUnit>> {
        if let Some(location) = &class.source_location {
            let relative = ctx.reader().relative(location).to_path_buf();
            if ctx.reader().exists(&relative) {
                let source = read_source(ctx, &relative)?;
                if let Some(mut unit) = self.extract_source(ctx, &relative, &source, true)? {
                    unit.set_metadata("reflection", Value::Object(class.options.clone()));
                    return Ok(Some(unit));
                }
            }
        }

        // Loaded at runtime but its file is not readable: describe it from reflection alone
        let superclass = class.superclass.as_deref().unwrap_or("ApplicationRecord");
        let source = format!("# runtime-only model\nclass {} < {}\nend\n", class.name, superclass);
        let mut unit = ExtractedUnit::new(UnitType::Model, class.name.clone(), None)
            .with_namespace(class.name.rsplit_once("::").map(|(ns, _)| ns.to_string()))
            .with_source(source)
            .with_metadata("runtime_only", true)
            .with_metadata("reflection", Value::Object(class.options.clone()));

        let reflected = class
            .options
            .get("associations")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for association in &reflected {
            let target = association
                .get("class_name")
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| association.get("name").and_then(Value::as_str).map(classify));
            if let Some(target) = target {
                unit.add_dependency(Dependency::new(DependencyKind::Model, target, via::ASSOCIATION));
            }
        }
        unit.set_metadata("associations", Value::Array(reflected));
        Ok(Some(unit))
    }

    fn extract_source(
        &self,
        ctx: &ExtractionContext,
        path: &Path,
        source: &str,
        known_model: bool,
    ) -> Result<Option<ExtractedUnit>> {
        if !source.contains("class ") {
            return Ok(None);
        }
        let Some(decl) = ctx.parser().primary_declaration(source) else {
            return Ok(None);
        };
        if decl.kind != DeclarationKind::Class || source.contains("self.abstract_class = true") {
            return Ok(None);
        }
        let inherits_record = decl
            .superclass
            .as_deref()
            .map_or(false, |sc| RECORD_BASES.contains(&sc));
        if !(known_model || inherits_record || ctx.models().contains(&decl.name)) {
            return Ok(None);
        }

        let calls = dsl_calls(source);
        let mut unit = class_unit(ctx, UnitType::Model, path, &decl);

        let (associations, association_deps) = associations(&calls);
        let callbacks: Vec<Value> = calls_named(&calls, CALLBACKS)
            .map(|c| json!({"type": c.keyword, "methods": c.symbols, "options": c.options}))
            .collect();
        let mut validations: Vec<Value> = calls_named(&calls, VALIDATIONS)
            .map(|c| json!({"type": c.keyword, "attributes": c.symbols, "options": c.options}))
            .collect();
        validations.extend(
            calls_named(&calls, &["validate"]).map(|c| json!({"type": "custom", "methods": c.symbols})),
        );
        let scopes: Vec<&str> = calls_named(&calls, &["scope"])
            .flat_map(|c| c.symbols.first())
            .map(String::as_str)
            .collect();

        let table_name = TABLE_NAME
            .captures(source)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| default_table_name(&decl.name));
        let columns = ctx
            .schema()
            .map(|schema| schema_columns(schema, &table_name))
            .unwrap_or_default();

        let concerns = inline_concerns(ctx, source);

        let mut composite = String::new();
        if !columns.is_empty() {
            composite.push_str(&format!("# == Schema Information\n# Table name: {}\n#\n", table_name));
            for (name, column_type, options) in &columns {
                composite.push_str(&format!("#  {:<24} :{} {}\n", name, column_type, options).trim_end());
                composite.push('\n');
            }
            composite.push_str("#\n");
        }
        composite.push_str(source);
        for (name, concern_path, concern_source) in &concerns {
            composite.push_str(&format!(
                "\n# --- inlined concern: {} ({}) ---\n{}",
                name,
                concern_path.display(),
                concern_source
            ));
        }

        unit = unit.with_source(composite);
        unit.extend_dependencies(association_deps);
        unit.extend_dependencies(concerns.iter().map(|(name, _, _)| {
            Dependency::new(DependencyKind::Concern, name.clone(), via::INCLUSION)
        }));
        let scanned = ctx.scanner().scan_all(source, &ScanLabels::default());
        unit.extend_dependencies(without_self(scanned, &decl.name));

        let methods: Vec<_> = ctx
            .parser()
            .definitions(source)
            .into_iter()
            .filter(|m| m.owner.as_deref() == Some(decl.name.as_str()))
            .collect();

        unit.set_metadata("superclass", decl.superclass.clone());
        unit.set_metadata("associations", associations);
        unit.set_metadata("callbacks", callbacks);
        unit.set_metadata("validations", validations);
        unit.set_metadata("scopes", json!(scopes));
        unit.set_metadata("table_name", table_name);
        unit.set_metadata(
            "columns",
            columns
                .iter()
                .map(|(name, column_type, _)| json!({"name": name, "type": column_type}))
                .collect::<Vec<_>>(),
        );
        unit.set_metadata(
            "concerns",
            concerns.iter().map(|(name, _, _)| name.clone()).collect::<Vec<_>>(),
        );
        unit.set_metadata("method_count", methods.len());

        if unit.needs_chunking(ctx.chunk_threshold()) {
            let summary: String = calls
                .iter()
                .filter(|c| {
                    let k = c.keyword.as_str();
                    ASSOCIATIONS.contains(&k) || CALLBACKS.contains(&k) || VALIDATIONS.contains(&k) || k == "scope"
                })
                .filter_map(|c| source.lines().nth(c.line - 1))
                .map(str::trim)
                .collect::<Vec<_>>()
                .join("\n");
            if !summary.is_empty() {
                unit.add_chunk(UnitChunk::new("summary", format!("{}#summary", decl.name), summary, Map::new()));
            }
            for chunk in method_chunks(&decl.name, "method", &methods) {
                unit.add_chunk(chunk);
            }
        }

        Ok(Some(unit))
    }
}

fn associations(calls: &[DslCall]) -> (Vec<Value>, Vec<Dependency>) {
    let mut metadata = Vec::new();
    let mut deps = Vec::new();
    for call in calls_named(calls, ASSOCIATIONS) {
        let Some(name) = call.symbols.first() else {
            continue;
        };
        let plural = matches!(call.keyword.as_str(), "has_many" | "has_and_belongs_to_many");
        let target = string_option(&call.options, "class_name")
            .unwrap_or_else(|| if plural { classify(name) } else { camelize(name) });
        let polymorphic = call.options.contains("polymorphic: true");
        metadata.push(json!({
            "type": call.keyword,
            "name": name,
            "target": if polymorphic { Value::Null } else { json!(target) },
            "through": symbol_option(&call.options, "through"),
            "options": call.options,
        }));
        if !polymorphic {
            deps.push(Dependency::new(DependencyKind::Model, target, via::ASSOCIATION));
        }
    }
    (metadata, deps)
}

fn default_table_name(class_name: &str) -> String {
    let last = class_name.rsplit("::").next().unwrap_or(class_name);
    pluralize(&underscore(last))
}

/// `(name, type, options)` for each column of `create_table "<table>"`
fn schema_columns(schema: &str, table: &str) -> Vec<(String, String, String)> {
    let lines: Vec<&str> = schema.lines().collect();
    let header = [format!("create_table \"{}\"", table), format!("create_table '{}'", table)];
    let Some(start) = lines
        .iter()
        .position(|l| header.iter().any(|h| l.trim_start().starts_with(h.as_str())))
    else {
        return Vec::new();
    };
    lines[start + 1..]
        .iter()
        .take_while(|l| l.trim() != "end")
        .filter_map(|l| SCHEMA_COLUMN.captures(l))
        .filter_map(|c| {
            Some((
                c.get(2)?.as_str().to_string(),
                c.get(1)?.as_str().to_string(),
                c.get(3).map_or("", |m| m.as_str()).trim().trim_start_matches(',').trim().to_string(),
            ))
        })
        .collect()
}

/// Included modules that live in `app/models/concerns`, with their source
fn inline_concerns(ctx: &ExtractionContext, source: &str) -> Vec<(String, PathBuf, String)> {
    included_modules(source)
        .into_iter()
        .filter_map(|name| {
            let path = PathBuf::from(format!("app/models/concerns/{}.rb", underscore(&name)));
            if !ctx.reader().exists(&path) {
                return None;
            }
            match ctx.reader().read(&path) {
                Ok(text) => Some((name, path, text)),
                Err(e) => {
                    tracing::warn!("Failed to inline concern {}: {}", name, e);
                    None
                }
            }
        })
        .collect()
}

impl Extractor for ModelExtractor {
    fn name(&self) -> &'static str {
        "models"
    }

    fn discover(&self, ctx: &ExtractionContext) -> Result<Vec<Candidate>> {
        let mut candidates = Vec::new();
        if ctx.registry().is_available() {
            for class in ctx.registry().subclasses_of("ActiveRecord::Base") {
                let is_abstract = class
                    .options
                    .get("abstract_class")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                if !is_abstract && !RECORD_BASES.contains(&class.name.as_str()) {
                    candidates.push(Candidate::Live(LiveObject::Class(class)));
                }
            }
        }
        candidates.extend(ctx.reader().glob(MODEL_GLOBS)?.into_iter().map(Candidate::File));
        Ok(candidates)
    }

    fn try_extract(&self, ctx: &ExtractionContext, candidate: &Candidate) -> Result<Option<ExtractedUnit>> {
        match candidate {
            Candidate::Live(LiveObject::Class(class)) => self.extract_live(ctx, class),
            Candidate::File(path) => {
                let source = read_source(ctx, path)?;
                self.extract_source(ctx, path, &source, false)
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

    const ORDER: &str = r#"class Order < ApplicationRecord
  include Trackable

  belongs_to :user
  belongs_to :owner, polymorphic: true
  has_many :line_items, dependent: :destroy
  has_one :receipt, class_name: "Billing::Receipt"

  validates :total, :currency, presence: true
  validate :within_limit

  before_save :normalize_currency
  after_commit :notify, on: :create

  scope :recent, -> { where("created_at > ?", 1.week.ago) }

  def notify
    ReceiptJob.perform_later(id)
    OrderMailer.confirmation(self).deliver_later
  end

  private

  def normalize_currency
    self.currency = currency.upcase
  end
end
"#;

    const SCHEMA: &str = r#"ActiveRecord::Schema.define(version: 2024_01_01) do
  create_table "orders", force: :cascade do |t|
    t.decimal "total", precision: 10
    t.string "currency"
  end
  create_table "users" do |t|
    t.string "email"
  end
end
"#;

    fn reader() -> MemorySourceReader {
        MemorySourceReader::new()
            .with_file("app/models/order.rb", ORDER)
            .with_file("app/models/user.rb", "class User < ApplicationRecord\n  has_many :orders\nend\n")
            .with_file("app/models/line_item.rb", "class LineItem < ApplicationRecord\n  belongs_to :order\nend\n")
            .with_file("app/models/concerns/trackable.rb", "module Trackable\n  extend ActiveSupport::Concern\nend\n")
            .with_file("app/models/money.rb", "class Money\n  def to_s; end\nend\n")
            .with_file("db/schema.rb", SCHEMA)
    }

    #[test]
    fn test_extracts_model_structure() {
        let ctx = context(reader());
        let unit = ModelExtractor
            .extract_one(&ctx, &Candidate::File(PathBuf::from("app/models/order.rb")))
            .unwrap();

        assert_eq!(unit.identifier, "Order");
        assert_eq!(unit.unit_type, UnitType::Model);
        let associations = unit.metadata["associations"].as_array().unwrap();
        assert_eq!(associations.len(), 4);
        assert_eq!(associations[1]["target"], Value::Null);
        assert_eq!(associations[2]["target"], "LineItem");
        assert_eq!(unit.metadata["scopes"], json!(["recent"]));
        assert_eq!(unit.metadata["callbacks"].as_array().unwrap().len(), 2);
        assert_eq!(unit.metadata["validations"].as_array().unwrap().len(), 2);
        assert_eq!(unit.metadata["table_name"], "orders");
        assert_eq!(unit.metadata["columns"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_dependencies_prefer_association_label() {
        let ctx = context(reader());
        let unit = ModelExtractor
            .extract_one(&ctx, &Candidate::File(PathBuf::from("app/models/order.rb")))
            .unwrap();

        let deps: Vec<(&str, &str)> = unit
            .dependencies()
            .iter()
            .map(|d| (d.target.as_str(), d.via.as_str()))
            .collect();
        assert_eq!(
            deps,
            vec![
                ("User", "association"),
                ("LineItem", "association"),
                ("Billing::Receipt", "association"),
                ("Trackable", "inclusion"),
                ("ReceiptJob", "code_reference"),
                ("OrderMailer", "code_reference"),
            ]
        );
        assert!(unit.dependencies_are_unique());
    }

    #[test]
    fn test_composite_source_has_schema_and_concern() {
        let ctx = context(reader());
        let unit = ModelExtractor
            .extract_one(&ctx, &Candidate::File(PathBuf::from("app/models/order.rb")))
            .unwrap();
        assert!(unit.source_code.starts_with("# == Schema Information\n# Table name: orders"));
        assert!(unit.source_code.contains("# --- inlined concern: Trackable"));
        assert!(unit.source_code.contains("extend ActiveSupport::Concern"));
    }

    #[test]
    fn test_plain_ruby_class_is_not_a_model() {
        let ctx = context(reader());
        let extractor = ModelExtractor;
        assert!(extractor
            .extract_one(&ctx, &Candidate::File(PathBuf::from("app/models/money.rb")))
            .is_none());
        assert!(extractor
            .extract_one(&ctx, &Candidate::File(PathBuf::from("app/models/concerns/trackable.rb")))
            .is_none());
    }

    #[test]
    fn test_large_model_is_chunked() {
        let ctx = context(reader()).with_chunk_threshold(10);
        let unit = ModelExtractor
            .extract_one(&ctx, &Candidate::File(PathBuf::from("app/models/order.rb")))
            .unwrap();
        let ids: Vec<&str> = unit.chunks().iter().map(|c| c.identifier.as_str()).collect();
        assert_eq!(ids, vec!["Order#summary", "Order#notify", "Order#normalize_currency"]);
        assert!(!unit.source_code.is_empty());
    }

    #[test]
    fn test_runtime_only_model_uses_reflection() {
        let ctx = live_context(
            MemorySourceReader::new(),
            json!({"classes": [
                {"name": "ApplicationRecord", "superclass": "ActiveRecord::Base", "options": {"abstract_class": true}},
                {"name": "Audit", "superclass": "ApplicationRecord",
                 "options": {"associations": [{"macro": "belongs_to", "name": "user"}]}}
            ]}),
        );
        let extractor = ModelExtractor;
        let units = extractor.extract_all(&ctx).unwrap();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].identifier, "Audit");
        assert!(units[0].file_path.is_none());
        assert_eq!(units[0].metadata["runtime_only"], true);
        assert_eq!(units[0].dependencies()[0].target, "User");
    }
}
