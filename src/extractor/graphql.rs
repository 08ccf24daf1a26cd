use super::common::{read_source, without_self};
use super::{Candidate, ExtractionContext, Extractor};
use crate::live::{LiveObject, SchemaType};
use crate::scanner::ScanLabels;
use crate::unit::{via, Dependency, DependencyKind, ExtractedUnit, UnitChunk, UnitType};
use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::{json, Map};
use std::path::Path;

const GRAPHQL_GLOBS: &[&str] = &[
    "app/graphql/types/**/*.rb",
    "app/graphql/mutations/**/*.rb",
    "app/graphql/resolvers/**/*.rb",
];
const BUILTIN_SCALARS: &[&str] = &["String", "Int", "Float", "Boolean", "ID"];
/// Types with more fields than this are always split per field
const FIELD_CHUNK_THRESHOLD: usize = 20;

static FIELD_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*(field|argument)\s*\(?\s*:(\w+)(.*)$").unwrap());
static GRAPHQL_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r#"(?m)^\s*graphql_name\s*\(?\s*["'](\w+)["']"#).unwrap());
static TYPE_CONSTANT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b((?:[A-Z]\w*::)*[A-Z]\w*)").unwrap());
static RESOLVER_OPTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:resolver|mutation|extras):\s*((?:[A-Z]\w*::)*[A-Z]\w*)").unwrap());

#[derive(Debug, Clone, Serialize)]
struct Field {
    name: String,
    #[serde(rename = "type")]
    field_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    resolver: Option<String>,
    #[serde(skip)]
    source: String,
}

/// Typed-API schema types: objects, inputs, enums, mutations, resolvers
pub struct GraphqlTypeExtractor;

impl GraphqlTypeExtractor {
    fn extract_runtime(&self, ctx: &ExtractionContext, schema_type: &SchemaType) -> Result<ExtractedUnit> {
        let local = schema_type
            .source_location
            .as_deref()
            .map(|p| ctx.reader().relative(p).to_path_buf())
            .filter(|p| ctx.reader().exists(p));

        let fields: Vec<Field> = schema_type
            .fields
            .iter()
            .map(|f| Field {
                name: f.name.clone(),
                field_type: Some(f.field_type.clone()),
                resolver: f.resolver.clone(),
                source: format!("  {}: {}", f.name, f.field_type),
            })
            .collect();

        let source = match &local {
            Some(path) => read_source(ctx, path)?,
            None => {
                let exposed = schema_type.graphql_name.as_deref().unwrap_or(&schema_type.name);
                let body: Vec<&str> = fields.iter().map(|f| f.source.as_str()).collect();
                format!("{} {} {{\n{}\n}}\n", schema_type.kind.to_lowercase(), exposed, body.join("\n"))
            }
        };

        let mut unit = ExtractedUnit::new(UnitType::GraphqlType, schema_type.name.clone(), local.as_deref())
            .with_namespace(schema_type.name.rsplit_once("::").map(|(ns, _)| ns.to_string()))
            .with_source(source.as_str());

        let names = ctx.graphql_names();
        let referenced = fields
            .iter()
            .filter_map(|f| f.field_type.as_deref())
            .map(base_type_name)
            .filter(|t| !BUILTIN_SCALARS.contains(t))
            .map(|t| names.get(t).cloned().unwrap_or_else(|| t.to_string()));
        let resolvers = fields.iter().filter_map(|f| f.resolver.clone());
        link(ctx, &mut unit, referenced.chain(resolvers).collect(), &source);

        let exposed = schema_type.graphql_name.clone().unwrap_or_else(|| default_graphql_name(&schema_type.name));
        finish(ctx, &mut unit, &schema_type.kind.to_lowercase(), &exposed, &fields)?;
        unit.set_metadata("runtime", true);
        Ok(unit)
    }

    fn extract_static(&self, ctx: &ExtractionContext, path: &Path) -> Result<Option<ExtractedUnit>> {
        let source = read_source(ctx, path)?;
        let Some(decl) = ctx.parser().primary_declaration(&source) else {
            return Ok(None);
        };
        let Some(kind) = kind_of(decl.superclass.as_deref(), &decl.name, &source) else {
            return Ok(None);
        };

        let fields: Vec<Field> = source.lines().filter_map(parse_field).collect();
        let exposed = GRAPHQL_NAME
            .captures(&source)
            .map(|c| c[1].to_string())
            .unwrap_or_else(|| default_graphql_name(&decl.name));

        let mut unit = ExtractedUnit::new(UnitType::GraphqlType, decl.name.clone(), Some(ctx.reader().relative(path)))
            .with_namespace(decl.namespace())
            .with_source(source.as_str());

        let referenced: Vec<String> = fields
            .iter()
            .filter_map(|f| f.field_type.as_deref())
            .map(base_type_name)
            .filter(|t| !BUILTIN_SCALARS.contains(t) && !t.starts_with("GraphQL::"))
            .map(str::to_string)
            .chain(fields.iter().filter_map(|f| f.resolver.clone()))
            .filter(|t| *t != decl.name)
            .collect();
        link(ctx, &mut unit, referenced, &source);

        unit.set_metadata("superclass", decl.superclass.clone());
        finish(ctx, &mut unit, kind, &exposed, &fields)?;
        unit.set_metadata("runtime", false);
        Ok(Some(unit))
    }
}

/// `[Types::ItemType!]!` -> `Types::ItemType`
fn base_type_name(type_expr: &str) -> &str {
    type_expr.trim_matches(|c: char| c == '[' || c == ']' || c == '!' || c.is_whitespace())
}

/// `Types::OrderType` -> `Order`
fn default_graphql_name(class_name: &str) -> String {
    let last = class_name.rsplit("::").next().unwrap_or(class_name);
    last.strip_suffix("Type").filter(|s| !s.is_empty()).unwrap_or(last).to_string()
}

fn kind_of(superclass: Option<&str>, name: &str, source: &str) -> Option<&'static str> {
    let base = superclass.unwrap_or("");
    let kind = if base.ends_with("InputObject") {
        "input_object"
    } else if base.ends_with("Enum") {
        "enum"
    } else if base.ends_with("Union") {
        "union"
    } else if base.ends_with("Scalar") {
        "scalar"
    } else if base.ends_with("Mutation") || base.ends_with("RelayClassicMutation") {
        "mutation"
    } else if base.ends_with("Resolver") {
        "resolver"
    } else if base.ends_with("Object") || base.ends_with("BaseType") {
        "object"
    } else if source.contains("GraphQL::Schema::Interface") {
        "interface"
    } else if name.ends_with("Type") && source.contains("field ") {
        "object"
    } else {
        return None;
    };
    Some(kind)
}

fn parse_field(line: &str) -> Option<Field> {
    let caps = FIELD_LINE.captures(line)?;
    if &caps[1] != "field" {
        return None;
    }
    let rest = caps[3].trim_start().trim_start_matches(',').trim_start();
    let field_type = if rest.starts_with('[') {
        rest.find(']').map(|end| rest[..=end].to_string())
    } else {
        TYPE_CONSTANT
            .captures(rest)
            .filter(|c| c.get(0).map_or(false, |m| m.start() == 0))
            .map(|c| c[1].to_string())
    };
    let resolver = RESOLVER_OPTION.captures(rest).map(|c| c[1].to_string());
    Some(Field {
        name: caps[2].to_string(),
        field_type,
        resolver,
        source: line.trim_end().to_string(),
    })
}

/// Schema type and resolver references, then the model the type exposes,
/// then whatever the body itself mentions
fn link(ctx: &ExtractionContext, unit: &mut ExtractedUnit, referenced: Vec<String>, source: &str) {
    let identifier = unit.identifier.clone();
    unit.extend_dependencies(
        referenced
            .into_iter()
            .filter(|t| *t != identifier)
            .map(|t| Dependency::new(DependencyKind::GraphqlType, t, via::CODE_REFERENCE)),
    );
    let backing_model = default_graphql_name(&identifier);
    if ctx.models().contains(&backing_model) {
        unit.add_dependency(Dependency::new(DependencyKind::Model, backing_model, via::CODE_REFERENCE));
    }
    let scanned = ctx.scanner().scan_all(source, &ScanLabels::default());
    unit.extend_dependencies(without_self(scanned, &identifier));
}

fn finish(ctx: &ExtractionContext, unit: &mut ExtractedUnit, kind: &str, exposed: &str, fields: &[Field]) -> Result<()> {
    unit.set_metadata("kind", kind);
    unit.set_metadata("graphql_name", exposed);
    unit.set_metadata("field_count", fields.len());
    unit.set_metadata("fields", serde_json::to_value(fields)?);

    if fields.len() > FIELD_CHUNK_THRESHOLD || unit.needs_chunking(ctx.chunk_threshold()) {
        for field in fields {
            let mut metadata = Map::new();
            metadata.insert("field".to_string(), json!(field.name));
            metadata.insert("type".to_string(), json!(field.field_type));
            unit.add_chunk(UnitChunk::new(
                "field",
                format!("{}.{}", unit.identifier, field.name),
                field.source.clone(),
                metadata,
            ));
        }
    }
    Ok(())
}

impl Extractor for GraphqlTypeExtractor {
    fn name(&self) -> &'static str {
        "graphql"
    }

    fn discover(&self, ctx: &ExtractionContext) -> Result<Vec<Candidate>> {
        let mut candidates = Vec::new();
        if ctx.registry().is_available() {
            candidates.extend(
                ctx.registry()
                    .schema_types()
                    .into_iter()
                    .filter(|t| !t.name.starts_with("__") && !BUILTIN_SCALARS.contains(&t.name.as_str()))
                    .map(|t| Candidate::Live(LiveObject::SchemaType(t))),
            );
        }
        candidates.extend(ctx.reader().glob(GRAPHQL_GLOBS)?.into_iter().map(Candidate::File));
        Ok(candidates)
    }

    fn try_extract(&self, ctx: &ExtractionContext, candidate: &Candidate) -> Result<Option<ExtractedUnit>> {
        match candidate {
            Candidate::Live(LiveObject::SchemaType(schema_type)) => self.extract_runtime(ctx, schema_type).map(Some),
            Candidate::File(path) => self.extract_static(ctx, path),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::test_support::{context, live_context};
    use crate::source::MemorySourceReader;
    use std::path::PathBuf;

    const ORDER_TYPE: &str = r#"module Types
  class OrderType < Types::BaseObject
    graphql_name "Order"

    field :id, ID, null: false
    field :total, Float, null: false
    field :user, Types::UserType, null: false
    field :line_items, [Types::LineItemType], null: false
    field :related, resolver: Resolvers::RelatedOrdersResolver

    def related_count
      Order.where(user_id: object.user_id).count
    end
  end
end
"#;

    fn reader() -> MemorySourceReader {
        MemorySourceReader::new()
            .with_file("app/graphql/types/order_type.rb", ORDER_TYPE)
            .with_file("app/graphql/types/base_object.rb", "module Types\n  class BaseObject < GraphQL::Schema::Object\n  end\nend\n")
            .with_file("app/graphql/types/helpers.rb", "module Types\n  module Helpers\n  end\nend\n")
            .with_file("app/models/order.rb", "class Order < ApplicationRecord\nend\n")
    }

    #[test]
    fn test_static_type_fields_and_dependencies() {
        let ctx = context(reader());
        let unit = GraphqlTypeExtractor
            .extract_one(&ctx, &Candidate::File(PathBuf::from("app/graphql/types/order_type.rb")))
            .unwrap();

        assert_eq!(unit.identifier, "Types::OrderType");
        assert_eq!(unit.metadata["kind"], "object");
        assert_eq!(unit.metadata["graphql_name"], "Order");
        assert_eq!(unit.metadata["field_count"], 5);
        assert_eq!(unit.metadata["fields"][3]["type"], "[Types::LineItemType]");
        assert_eq!(unit.metadata["fields"][4]["type"], serde_json::Value::Null);

        let deps: Vec<(DependencyKind, &str)> =
            unit.dependencies().iter().map(|d| (d.kind, d.target.as_str())).collect();
        assert_eq!(
            deps,
            vec![
                (DependencyKind::GraphqlType, "Types::UserType"),
                (DependencyKind::GraphqlType, "Types::LineItemType"),
                (DependencyKind::GraphqlType, "Resolvers::RelatedOrdersResolver"),
                (DependencyKind::Model, "Order"),
            ]
        );
    }

    #[test]
    fn test_base_classes_and_helpers_are_recognized_or_skipped() {
        let ctx = context(reader());
        let extractor = GraphqlTypeExtractor;
        let base = extractor
            .extract_one(&ctx, &Candidate::File(PathBuf::from("app/graphql/types/base_object.rb")))
            .unwrap();
        assert_eq!(base.metadata["kind"], "object");
        assert!(extractor
            .try_extract(&ctx, &Candidate::File(PathBuf::from("app/graphql/types/helpers.rb")))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_runtime_types_resolve_schema_names() {
        let ctx = live_context(
            MemorySourceReader::new().with_file("app/models/order.rb", "class Order < ApplicationRecord\nend\n"),
            serde_json::json!({"schema_types": [
                {"name": "Types::OrderType", "graphql_name": "Order", "kind": "OBJECT",
                 "fields": [{"name": "id", "type": "ID!"}, {"name": "user", "type": "User!"}]},
                {"name": "Types::UserType", "graphql_name": "User", "kind": "OBJECT", "fields": []},
                {"name": "__Schema", "kind": "OBJECT"}
            ]}),
        );
        let units = GraphqlTypeExtractor.extract_all(&ctx).unwrap();
        let ids: Vec<&str> = units.iter().map(|u| u.identifier.as_str()).collect();
        assert_eq!(ids, vec!["Types::OrderType", "Types::UserType"]);

        let order = &units[0];
        assert_eq!(order.source_code, "object Order {\n  id: ID!\n  user: User!\n}\n");
        assert_eq!(order.dependencies()[0].target, "Types::UserType");
        assert_eq!(order.dependencies()[1].target, "Order");
        assert_eq!(order.metadata["runtime"], true);
    }

    #[test]
    fn test_wide_types_are_chunked_per_field() {
        let mut source = String::from("module Types\n  class WideType < Types::BaseObject\n");
        for i in 0..25 {
            source.push_str(&format!("    field :f{}, String, null: true\n", i));
        }
        source.push_str("  end\nend\n");
        let ctx = context(MemorySourceReader::new().with_file("app/graphql/types/wide_type.rb", source));
        let unit = GraphqlTypeExtractor
            .extract_one(&ctx, &Candidate::File(PathBuf::from("app/graphql/types/wide_type.rb")))
            .unwrap();
        assert_eq!(unit.chunks().len(), 25);
        assert_eq!(unit.chunks()[0].identifier, "Types::WideType.f0");
    }
}
