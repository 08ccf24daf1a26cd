use super::common::{block_end, camelize, classify, read_source, string_option, symbol_option};
use super::{Candidate, ExtractionContext, Extractor};
use crate::unit::{via, Dependency, DependencyKind, ExtractedUnit, UnitType};
use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

const FACTORY_GLOBS: &[&str] = &["spec/factories/**/*.rb", "test/factories/**/*.rb"];

static FACTORY_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^\s*factory\s*\(?\s*(?::(\w+)|["'](\w+)["'])(.*)$"#).unwrap());
static CLASS_CONSTANT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bclass:\s*([A-Z][\w:]*)").unwrap());
static TRAIT_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*trait\s*\(?\s*:(\w+)").unwrap());
static ASSOCIATION_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*association\s*\(?\s*:(\w+)(.*)$").unwrap());
static BARE_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*([a-z_]\w*)\s*$").unwrap());
static ATTRIBUTE_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:sequence\s*\(\s*:(\w+)|([a-z_]\w*)\s*(?:\{|do\b))").unwrap());

#[derive(Debug, Clone)]
struct FactoryDefinition {
    name: String,
    class_name: Option<String>,
    parent: Option<String>,
    start: usize,
    end: usize,
}

#[derive(Debug, Default)]
struct FactoryBody {
    traits: Vec<String>,
    attributes: Vec<String>,
    /// `(factory name, association name)` pairs, in order
    associations: Vec<(String, String)>,
}

fn factory_definitions(lines: &[&str]) -> Vec<FactoryDefinition> {
    let mut found = Vec::new();
    let mut open: Vec<(String, usize)> = Vec::new();
    for (idx, line) in lines.iter().enumerate() {
        while open.last().map_or(false, |(_, end)| idx > *end) {
            open.pop();
        }
        let Some(caps) = FACTORY_LINE.captures(line) else {
            continue;
        };
        let name = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str()).to_string();
        let options = caps.get(3).map_or("", |m| m.as_str());
        let class_name = string_option(options, "class")
            .or_else(|| CLASS_CONSTANT.captures(options).map(|c| c[1].to_string()));
        let parent = symbol_option(options, "parent").or_else(|| open.last().map(|(name, _)| name.clone()));
        let end = block_end(lines, idx);
        open.push((name.clone(), end));
        found.push(FactoryDefinition {
            name,
            class_name,
            parent,
            start: idx,
            end,
        });
    }
    found
}

/// Lines belonging directly to a factory, nested factories skipped
fn factory_body(ctx: &ExtractionContext, lines: &[&str], def: &FactoryDefinition) -> FactoryBody {
    let mut body = FactoryBody::default();
    let mut idx = def.start + 1;
    while idx < def.end {
        let line = lines[idx];
        if FACTORY_LINE.is_match(line) {
            idx = block_end(lines, idx) + 1;
            continue;
        }
        if let Some(caps) = TRAIT_LINE.captures(line) {
            body.traits.push(caps[1].to_string());
            idx = block_end(lines, idx) + 1;
            continue;
        }
        if let Some(caps) = ASSOCIATION_LINE.captures(line) {
            let name = caps[1].to_string();
            let factory = symbol_option(&caps[2], "factory").unwrap_or_else(|| name.clone());
            body.associations.push((factory, name));
        } else if let Some(caps) = BARE_WORD.captures(line) {
            // Implicit association: a bare attribute named after a known model
            let name = &caps[1];
            if name != "end" && ctx.models().contains(&camelize(name)) {
                body.associations.push((name.to_string(), name.to_string()));
            }
        } else if let Some(caps) = ATTRIBUTE_LINE.captures(line) {
            if let Some(m) = caps.get(1).or_else(|| caps.get(2)) {
                let name = m.as_str();
                if !["trait", "factory", "after", "before", "callback", "transient", "initialize_with", "to_create"]
                    .contains(&name)
                {
                    body.attributes.push(name.to_string());
                }
            }
        }
        idx += 1;
    }
    body
}

/// Test-data factories, one unit per `factory` definition
pub struct FactoryExtractor;

impl FactoryExtractor {
    fn units_for_file(&self, ctx: &ExtractionContext, path: &Path, source: &str) -> Vec<ExtractedUnit> {
        let lines: Vec<&str> = source.lines().collect();
        let definitions = factory_definitions(&lines);

        definitions
            .iter()
            .map(|def| {
                let model = model_for(def, &definitions);
                let body = factory_body(ctx, &lines, def);
                let text = lines[def.start..=def.end.min(lines.len().saturating_sub(1))].join("\n");

                let mut unit = ExtractedUnit::new(UnitType::Factory, def.name.clone(), Some(ctx.reader().relative(path)))
                    .with_source(text.as_str());
                unit.add_dependency(Dependency::new(DependencyKind::Model, model.clone(), via::TEST_COVERAGE));
                if let Some(parent) = &def.parent {
                    unit.add_dependency(Dependency::new(DependencyKind::Factory, parent.clone(), via::INHERITANCE));
                }
                unit.extend_dependencies(
                    body.associations
                        .iter()
                        .filter(|(factory, _)| *factory != def.name)
                        .map(|(factory, _)| Dependency::new(DependencyKind::Factory, factory.clone(), via::ASSOCIATION)),
                );

                unit.set_metadata("model_class", model);
                unit.set_metadata("parent", def.parent.clone());
                unit.set_metadata("traits", body.traits);
                unit.set_metadata("attributes", body.attributes);
                unit.set_metadata(
                    "associations",
                    body.associations
                        .iter()
                        .map(|(factory, name)| serde_json::json!({"name": name, "factory": factory}))
                        .collect::<Vec<_>>(),
                );
                unit
            })
            .collect()
    }
}

/// Explicit class, else the parent factory's class, else the camelized name
fn model_for(def: &FactoryDefinition, all: &[FactoryDefinition]) -> String {
    if let Some(class_name) = &def.class_name {
        return class_name.clone();
    }
    let mut current = def;
    let mut hops = 0;
    while let Some(parent) = current.parent.as_deref() {
        let Some(next) = all.iter().find(|d| d.name == parent) else {
            break;
        };
        if let Some(class_name) = &next.class_name {
            return class_name.clone();
        }
        current = next;
        hops += 1;
        if hops > all.len() {
            break;
        }
    }
    classify(&current.name)
}

impl Extractor for FactoryExtractor {
    fn name(&self) -> &'static str {
        "factories"
    }

    fn discover(&self, ctx: &ExtractionContext) -> Result<Vec<Candidate>> {
        Ok(ctx.reader().glob(FACTORY_GLOBS)?.into_iter().map(Candidate::File).collect())
    }

    fn try_extract(&self, ctx: &ExtractionContext, candidate: &Candidate) -> Result<Option<ExtractedUnit>> {
        Ok(self.try_extract_many(ctx, candidate)?.into_iter().next())
    }

    fn try_extract_many(&self, ctx: &ExtractionContext, candidate: &Candidate) -> Result<Vec<ExtractedUnit>> {
        let Candidate::File(path) = candidate else {
            return Ok(Vec::new());
        };
        let source = read_source(ctx, path)?;
        if !source.contains("factory") {
            return Ok(Vec::new());
        }
        Ok(self.units_for_file(ctx, path, &source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::test_support::context;
    use crate::source::MemorySourceReader;
    use serde_json::json;

    const FACTORIES: &str = r#"FactoryBot.define do
  factory :order do
    user
    association :shipping_address, factory: :address
    sequence(:number) { |n| "R#{n}" }
    total { 10 }

    trait :paid do
      state { "paid" }
    end

    factory :big_order do
      total { 10_000 }
    end
  end

  factory :admin, class: "User" do
    email { "admin@example.com" }
  end

  factory :super_admin, parent: :admin do
    role { "super" }
  end
end
"#;

    fn units() -> Vec<ExtractedUnit> {
        let ctx = context(
            MemorySourceReader::new()
                .with_file("spec/factories/orders.rb", FACTORIES)
                .with_file("app/models/user.rb", "class User < ApplicationRecord\nend\n")
                .with_file("app/models/order.rb", "class Order < ApplicationRecord\nend\n"),
        );
        FactoryExtractor.extract_all(&ctx).unwrap()
    }

    #[test]
    fn test_one_unit_per_factory() {
        let units = units();
        let ids: Vec<&str> = units.iter().map(|u| u.identifier.as_str()).collect();
        assert_eq!(ids, vec!["order", "big_order", "admin", "super_admin"]);
        assert!(units.iter().all(|u| u.unit_type == UnitType::Factory));
    }

    #[test]
    fn test_order_factory_body() {
        let units = units();
        let order = &units[0];
        assert_eq!(order.metadata["model_class"], "Order");
        assert_eq!(order.metadata["traits"], json!(["paid"]));
        assert_eq!(order.metadata["attributes"], json!(["number", "total"]));
        let deps: Vec<(DependencyKind, &str, &str)> = order
            .dependencies()
            .iter()
            .map(|d| (d.kind, d.target.as_str(), d.via.as_str()))
            .collect();
        assert_eq!(
            deps,
            vec![
                (DependencyKind::Model, "Order", "test_coverage"),
                (DependencyKind::Factory, "user", "association"),
                (DependencyKind::Factory, "address", "association"),
            ]
        );
    }

    #[test]
    fn test_class_resolution_follows_parents() {
        let units = units();
        assert_eq!(units[1].metadata["model_class"], "Order");
        assert_eq!(units[1].metadata["parent"], "order");
        assert_eq!(units[2].metadata["model_class"], "User");
        assert_eq!(units[3].metadata["model_class"], "User");
        assert_eq!(units[3].dependencies()[1].target, "admin");
    }
}
