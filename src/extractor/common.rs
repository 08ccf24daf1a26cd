//! Text helpers shared by the recognizers: DSL line scanning, Ruby naming
//! conventions, block boundaries and per-method chunking.

use super::ExtractionContext;
use crate::parser::{ClassDeclaration, MethodDefinition};
use crate::unit::{Dependency, ExtractedUnit, UnitChunk, UnitType};
use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Map};
use std::path::Path;

static DSL_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[ \t]*([a-z_][a-z0-9_]*[!?]?)[ \t]*\(?[ \t]*(:[A-Za-z_]\w*[?!]?.*)$").unwrap()
});

static VISIBILITY_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*(private|protected)[ \t]*$").unwrap());

static BLOCK_OPENER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:class|module|def|if|unless|case|while|until|begin|for)\b|\bdo(?:\s*\|[^|]*\|)?\s*(?:#.*)?$").unwrap()
});

static INCLUDE_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*(?:include|extend|prepend)[ \t]+([A-Z][\w:]*)").unwrap());

/// A class-body DSL call such as `has_many :orders, dependent: :destroy`
#[derive(Debug, Clone, PartialEq)]
pub struct DslCall {
    pub keyword: String,
    /// Leading symbol arguments, without the colon
    pub symbols: Vec<String>,
    /// Everything after the leading symbols
    pub options: String,
    /// 1-based
    pub line: usize,
}

pub fn read_source(ctx: &ExtractionContext, path: &Path) -> Result<String> {
    ctx.reader()
        .read(path)
        .with_context(|| format!("Failed to read {}", path.display()))
}

/// Every line that looks like `keyword :sym[, :sym...][, options]`
pub fn dsl_calls(source: &str) -> Vec<DslCall> {
    DSL_LINE
        .captures_iter(source)
        .filter_map(|caps| {
            let keyword = caps.get(1)?;
            let rest = caps.get(2)?.as_str().trim_end().trim_end_matches(')');
            let line = source[..keyword.start()].matches('\n').count() + 1;
            let (symbols, options) = split_leading_symbols(rest);
            Some(DslCall {
                keyword: keyword.as_str().to_string(),
                symbols,
                options,
                line,
            })
        })
        .collect()
}

pub fn calls_named<'a>(calls: &'a [DslCall], keywords: &'a [&'a str]) -> impl Iterator<Item = &'a DslCall> + 'a {
    calls.iter().filter(move |c| keywords.contains(&c.keyword.as_str()))
}

fn split_leading_symbols(rest: &str) -> (Vec<String>, String) {
    let mut symbols = Vec::new();
    let mut remaining = rest.trim();
    while let Some(stripped) = remaining.strip_prefix(':') {
        let end = stripped
            .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == '?' || c == '!'))
            .unwrap_or(stripped.len());
        if end == 0 {
            break;
        }
        let after = stripped[end..].trim_start();
        // `:a => b` is a hash-rocket option, not a symbol argument
        if after.starts_with("=>") {
            break;
        }
        symbols.push(stripped[..end].to_string());
        remaining = after.strip_prefix(',').map(str::trim_start).unwrap_or(after);
        if !after.starts_with(',') {
            break;
        }
    }
    (symbols, remaining.to_string())
}

/// Value of a string option: `key: "Value"` or `:key => "Value"`
pub fn string_option(options: &str, key: &str) -> Option<String> {
    let value = option_start(options, key)?;
    let quote = value.chars().next().filter(|c| *c == '"' || *c == '\'')?;
    let inner = &value[1..];
    inner.find(quote).map(|end| inner[..end].to_string())
}

/// Value of a symbol option: `key: :value` or `:key => :value`
pub fn symbol_option(options: &str, key: &str) -> Option<String> {
    let value = option_start(options, key)?.strip_prefix(':')?;
    let end = value
        .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == '?' || c == '!'))
        .unwrap_or(value.len());
    (end > 0).then(|| value[..end].to_string())
}

/// Symbols listed for a key: `only: [:show, :edit]` or `only: :show`
pub fn symbol_list_option(options: &str, key: &str) -> Vec<String> {
    let Some(value) = option_start(options, key) else {
        return Vec::new();
    };
    if let Some(list) = value.strip_prefix('[') {
        let list = list.split(']').next().unwrap_or("");
        symbols_in(list)
    } else {
        symbol_option(options, key).into_iter().collect()
    }
}

/// Every `:symbol` in a fragment, in order
pub fn symbols_in(text: &str) -> Vec<String> {
    static SYMBOL: Lazy<Regex> = Lazy::new(|| Regex::new(r":([A-Za-z_]\w*[?!]?)").unwrap());
    SYMBOL
        .captures_iter(text)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

fn option_start<'a>(options: &'a str, key: &str) -> Option<&'a str> {
    let modern = format!("{}:", key);
    let rocket = format!(":{}", key);
    let mut search = 0;
    while search < options.len() {
        let rest = &options[search..];
        let (at, len, is_rocket) = match (rest.find(&modern), rest.find(&rocket)) {
            (Some(a), Some(b)) if b < a => (b, rocket.len(), true),
            (Some(a), _) => (a, modern.len(), false),
            (None, Some(b)) => (b, rocket.len(), true),
            (None, None) => return None,
        };
        let absolute = search + at;
        let boundary = absolute == 0
            || !options[..absolute]
                .chars()
                .last()
                .map_or(false, |c| c.is_alphanumeric() || c == '_');
        let after = options[absolute + len..].trim_start();
        if boundary {
            if !is_rocket {
                return Some(after);
            }
            if let Some(value) = after.strip_prefix("=>") {
                return Some(value.trim_start());
            }
        }
        search = absolute + len;
    }
    None
}

/// `line_item` -> `LineItem`, `admin/orders` -> `Admin::Orders`
pub fn camelize(name: &str) -> String {
    name.split('/')
        .map(|segment| {
            segment
                .split('_')
                .filter(|part| !part.is_empty())
                .map(|part| {
                    let mut chars = part.chars();
                    match chars.next() {
                        Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                        None => String::new(),
                    }
                })
                .collect::<String>()
        })
        .collect::<Vec<_>>()
        .join("::")
}

/// `Admin::LineItem` -> `admin/line_item`
pub fn underscore(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for segment in name.split("::").filter(|s| !s.is_empty()) {
        if !out.is_empty() {
            out.push('/');
        }
        let chars: Vec<char> = segment.chars().collect();
        for (i, c) in chars.iter().enumerate() {
            if c.is_uppercase() {
                let prev_lower = i > 0 && (chars[i - 1].is_lowercase() || chars[i - 1].is_ascii_digit());
                let next_lower = chars.get(i + 1).map_or(false, |n| n.is_lowercase());
                if i > 0 && (prev_lower || (next_lower && chars[i - 1].is_uppercase())) {
                    out.push('_');
                }
                out.extend(c.to_lowercase());
            } else {
                out.push(*c);
            }
        }
    }
    out
}

/// Naive English singular for association names
pub fn singularize(word: &str) -> String {
    if let Some(stem) = word.strip_suffix("ies") {
        format!("{}y", stem)
    } else if ["sses", "shes", "ches", "xes", "zes"].iter().any(|s| word.ends_with(s)) {
        word[..word.len() - 2].to_string()
    } else if word.ends_with('s') && !word.ends_with("ss") && !word.ends_with("us") {
        word[..word.len() - 1].to_string()
    } else {
        word.to_string()
    }
}

/// Naive English plural for table names
pub fn pluralize(word: &str) -> String {
    let vowel_before_y = word
        .chars()
        .rev()
        .nth(1)
        .map_or(false, |c| "aeiou".contains(c));
    if word.ends_with('y') && !vowel_before_y {
        format!("{}ies", &word[..word.len() - 1])
    } else if ["s", "x", "z", "ch", "sh"].iter().any(|s| word.ends_with(s)) {
        format!("{}es", word)
    } else {
        format!("{}s", word)
    }
}

/// Association name to class name: `line_items` -> `LineItem`
pub fn classify(name: &str) -> String {
    camelize(&singularize(name))
}

/// Index (0-based) of the line closing the block opened on `start`.
///
/// Counts `do`/keyword openers against `end` lines; good enough for
/// conventionally formatted DSL blocks.
pub fn block_end(lines: &[&str], start: usize) -> usize {
    let mut depth = 0usize;
    for (idx, line) in lines.iter().enumerate().skip(start) {
        let trimmed = strip_comment(line).trim();
        if trimmed.is_empty() {
            continue;
        }
        if BLOCK_OPENER.is_match(trimmed) && !is_one_liner(trimmed) {
            depth += 1;
        }
        if trimmed == "end" || trimmed.starts_with("end ") || trimmed.starts_with("end.") || trimmed == "}" {
            depth = depth.saturating_sub(1);
            if depth == 0 {
                return idx;
            }
        }
        if depth == 0 {
            return idx;
        }
    }
    lines.len().saturating_sub(1)
}

fn is_one_liner(trimmed: &str) -> bool {
    trimmed.ends_with(" end") || trimmed.ends_with(";end")
}

fn strip_comment(line: &str) -> &str {
    match line.find(" #") {
        Some(idx) if !line[..idx].contains('"') && !line[..idx].contains('\'') => &line[..idx],
        _ => {
            if line.trim_start().starts_with('#') {
                ""
            } else {
                line
            }
        }
    }
}

/// 1-based line of the first bare `private`/`protected`, if any
pub fn first_non_public_line(source: &str) -> Option<usize> {
    VISIBILITY_LINE
        .find(source)
        .map(|m| source[..m.start()].matches('\n').count() + 1)
}

/// Public instance methods defined directly on `owner`
pub fn public_methods(ctx: &ExtractionContext, source: &str, owner: &str) -> Vec<MethodDefinition> {
    let boundary = first_non_public_line(source).unwrap_or(usize::MAX);
    ctx.parser()
        .definitions(source)
        .into_iter()
        .filter(|m| !m.singleton && m.owner.as_deref() == Some(owner) && m.start_line < boundary)
        .collect()
}

/// Modules mixed in with `include`/`extend`/`prepend`
pub fn included_modules(source: &str) -> Vec<String> {
    let mut found: Vec<String> = INCLUDE_LINE
        .captures_iter(source)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .collect();
    found.dedup();
    found
}

/// Skeleton unit for a class-shaped file: identifier, namespace, origin
pub fn class_unit(
    ctx: &ExtractionContext,
    unit_type: UnitType,
    path: &Path,
    decl: &ClassDeclaration,
) -> ExtractedUnit {
    ExtractedUnit::new(unit_type, decl.name.clone(), Some(ctx.reader().relative(path)))
        .with_namespace(decl.namespace())
}

/// Drop dependencies that point back at the unit itself
pub fn without_self(deps: Vec<Dependency>, identifier: &str) -> Vec<Dependency> {
    deps.into_iter().filter(|d| d.target != identifier).collect()
}

/// One chunk per method, each carrying its line range
pub fn method_chunks(unit_identifier: &str, chunk_type: &str, methods: &[MethodDefinition]) -> Vec<UnitChunk> {
    methods
        .iter()
        .map(|method| {
            let mut metadata = Map::new();
            metadata.insert("method".to_string(), json!(method.name));
            metadata.insert("start_line".to_string(), json!(method.start_line));
            metadata.insert("end_line".to_string(), json!(method.end_line));
            UnitChunk::new(
                chunk_type,
                format!("{}#{}", unit_identifier, method.name),
                method.source.clone(),
                metadata,
            )
        })
        .collect()
}
