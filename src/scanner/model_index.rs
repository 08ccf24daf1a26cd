use crate::live::LiveRegistry;
use crate::parser::{CodeParser, DeclarationKind};
use crate::source::SourceReader;
use regex::Regex;
use std::collections::BTreeSet;

pub(crate) const MODEL_GLOBS: &[&str] = &["app/models/**/*.rb"];

const RECORD_BASES: &[&str] = &["ActiveRecord::Base", "ApplicationRecord"];

/// Immutable set of known model class names with one precompiled matcher.
///
/// Built once at the start of a run and shared by reference; scanning a file
/// costs one regex pass regardless of how many models exist.
#[derive(Debug, Clone)]
pub struct ModelNameIndex {
    names: BTreeSet<String>,
    pattern: Option<Regex>,
}

impl ModelNameIndex {
    pub fn new<I>(names: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let names: BTreeSet<String> = names.into_iter().filter(|n| !n.is_empty()).collect();

        let mut ordered: Vec<&String> = names.iter().collect();
        // Longest first so `Billing::Invoice` wins over `Invoice`
        ordered.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

        let pattern = if ordered.is_empty() {
            None
        } else {
            let alternation = ordered
                .iter()
                .map(|name| regex::escape(name))
                .collect::<Vec<_>>()
                .join("|");
            match Regex::new(&format!(r"\b(?:{})\b", alternation)) {
                Ok(re) => Some(re),
                Err(e) => {
                    tracing::warn!("Failed to compile model name pattern: {}", e);
                    None
                }
            }
        };

        Self { names, pattern }
    }

    pub fn empty() -> Self {
        Self::new(std::iter::empty())
    }

    /// Collect model names from live reflection and from `app/models`.
    ///
    /// Abstract classes (`abstract_class: true` in reflection options, or
    /// `self.abstract_class = true` in source) are excluded. Static
    /// subclasses of already-known models (single-table inheritance) are
    /// picked up by iterating to a fixed point.
    pub fn discover(
        reader: &dyn SourceReader,
        registry: &dyn LiveRegistry,
        parser: &CodeParser,
    ) -> Self {
        let mut names = BTreeSet::new();

        if registry.is_available() {
            for class in registry.subclasses_of("ActiveRecord::Base") {
                let is_abstract = class
                    .options
                    .get("abstract_class")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                if !is_abstract && !RECORD_BASES.contains(&class.name.as_str()) {
                    names.insert(class.name);
                }
            }
        }

        let paths = match reader.glob(MODEL_GLOBS) {
            Ok(paths) => paths,
            Err(e) => {
                tracing::warn!("Model discovery glob failed: {}", e);
                Vec::new()
            }
        };

        let mut declared = Vec::new();
        for path in paths {
            let source = match reader.read(&path) {
                Ok(source) => source,
                Err(e) => {
                    tracing::warn!("Skipping {:?} during model discovery: {}", path, e);
                    continue;
                }
            };
            if source.contains("self.abstract_class = true") {
                continue;
            }
            if let Some(decl) = parser.primary_declaration(&source) {
                if decl.kind == DeclarationKind::Class {
                    declared.push((decl.name, decl.superclass.unwrap_or_default()));
                }
            }
        }

        loop {
            let before = names.len();
            for (name, superclass) in &declared {
                let is_record = RECORD_BASES.contains(&superclass.as_str())
                    || superclass.ends_with("Record")
                    || names.contains(superclass);
                if is_record && !RECORD_BASES.contains(&name.as_str()) {
                    names.insert(name.clone());
                }
            }
            if names.len() == before {
                break;
            }
        }

        tracing::debug!("Discovered {} model names", names.len());
        Self::new(names)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// Every model-name occurrence in `source`, in order (duplicates kept)
    pub fn find_all<'s>(&'s self, source: &'s str) -> impl Iterator<Item = &'s str> + 's {
        self.pattern
            .iter()
            .flat_map(move |re| re.find_iter(source).map(|m| m.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::live::{RegistrySnapshot, SnapshotRegistry, NullRegistry};
    use crate::source::MemorySourceReader;
    use serde_json::json;

    #[test]
    fn test_empty_index_matches_nothing() {
        let index = ModelNameIndex::empty();
        assert!(index.is_empty());
        assert_eq!(index.find_all("User.find(1)").count(), 0);
    }

    #[test]
    fn test_word_boundaries_and_longest_first() {
        let index = ModelNameIndex::new(
            ["User", "Invoice", "Billing::Invoice"].iter().map(|s| s.to_string()),
        );
        let found: Vec<&str> = index
            .find_all("UserService.call(User.first, Billing::Invoice.last, Invoices)")
            .collect();
        assert_eq!(found, vec!["User", "Billing::Invoice"]);
    }

    #[test]
    fn test_discover_from_static_sources() {
        let reader = MemorySourceReader::new()
            .with_file("app/models/application_record.rb", "class ApplicationRecord < ActiveRecord::Base\n  self.abstract_class = true\nend\n")
            .with_file("app/models/user.rb", "class User < ApplicationRecord\nend\n")
            .with_file("app/models/admin.rb", "class Admin < User\nend\n")
            .with_file("app/models/billing/invoice.rb", "module Billing\n  class Invoice < ApplicationRecord\n  end\nend\n")
            .with_file("app/models/concerns/trackable.rb", "module Trackable\nend\n")
            .with_file("app/models/plain.rb", "class Plain\nend\n");

        let index = ModelNameIndex::discover(&reader, &NullRegistry, &CodeParser::new());
        let names: Vec<&str> = index.names().collect();
        assert_eq!(names, vec!["Admin", "Billing::Invoice", "User"]);
    }

    #[test]
    fn test_discover_merges_live_classes() {
        let snapshot: RegistrySnapshot = serde_json::from_value(json!({
            "classes": [
                {"name": "ApplicationRecord", "superclass": "ActiveRecord::Base", "options": {"abstract_class": true}},
                {"name": "Order", "superclass": "ApplicationRecord"},
                {"name": "Base", "superclass": "ApplicationRecord", "options": {"abstract_class": true}}
            ]
        }))
        .unwrap();
        let registry = SnapshotRegistry::new(snapshot);
        let reader = MemorySourceReader::new().with_file("app/models/user.rb", "class User < ApplicationRecord\nend\n");

        let index = ModelNameIndex::discover(&reader, &registry, &CodeParser::new());
        assert!(index.contains("Order"));
        assert!(index.contains("User"));
        assert!(!index.contains("Base"));
        assert_eq!(index.len(), 2);
    }
}
