use super::common::{block_end, read_source, symbols_in};
use super::{Candidate, ExtractionContext, Extractor};
use crate::scanner::ScanLabels;
use crate::unit::{via, Dependency, DependencyKind, ExtractedUnit, UnitType};
use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::path::Path;

const RAKE_GLOBS: &[&str] = &["lib/tasks/**/*.rake"];

static NAMESPACE_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^\s*namespace\s*\(?\s*(?::(\w+)|["'](\w+)["'])"#).unwrap());
static DESC_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"^\s*desc\s*\(?\s*["'](.*)["']"#).unwrap());
static TASK_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^\s*task\s*\(?\s*(?::(\w+)|["'](\w+)["']|(\w+):)(.*)$"#).unwrap());
static QUOTED_TASK: Lazy<Regex> = Lazy::new(|| Regex::new(r#"["']([\w:]+)["']"#).unwrap());
static TASK_INVOKE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"Rake::Task\[\s*["']([\w:]+)["']\s*\]\.(?:invoke|execute|reenable)"#).unwrap());

/// A task definition found while walking a rake file
#[derive(Debug, Clone)]
struct TaskDefinition {
    name: String,
    namespace: Vec<String>,
    description: Option<String>,
    arguments: Vec<String>,
    prerequisites: Vec<String>,
    start: usize,
    end: usize,
    desc_line: Option<usize>,
}

impl TaskDefinition {
    fn full_name(&self) -> String {
        self.namespace
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(self.name.as_str()))
            .collect::<Vec<_>>()
            .join(":")
    }
}

fn task_definitions(source: &str) -> Vec<TaskDefinition> {
    let lines: Vec<&str> = source.lines().collect();
    let mut scopes: Vec<(String, usize)> = Vec::new();
    let mut pending_desc: Option<(String, usize)> = None;
    let mut tasks = Vec::new();

    let mut idx = 0;
    while idx < lines.len() {
        while scopes.last().map_or(false, |(_, end)| idx > *end) {
            scopes.pop();
        }
        let line = lines[idx];

        if let Some(caps) = NAMESPACE_LINE.captures(line) {
            let name = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
            scopes.push((name.to_string(), block_end(&lines, idx)));
        } else if let Some(caps) = DESC_LINE.captures(line) {
            pending_desc = Some((caps[1].to_string(), idx));
        } else if let Some(caps) = TASK_LINE.captures(line) {
            let modern = caps.get(3).is_some();
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .or_else(|| caps.get(3))
                .map_or("", |m| m.as_str())
                .to_string();
            let rest = caps.get(4).map_or("", |m| m.as_str());
            let rest = rest.split(" do").next().unwrap_or(rest);
            let (args_part, prereq_part) = match rest.find("=>") {
                Some(at) => (&rest[..at], &rest[at + 2..]),
                None if modern => ("", rest),
                None => (rest, ""),
            };
            let mut prerequisites = symbols_in(&QUOTED_TASK.replace_all(prereq_part, ""));
            prerequisites.extend(
                QUOTED_TASK
                    .captures_iter(prereq_part)
                    .map(|c| c[1].to_string()),
            );
            prerequisites.retain(|p| p != "environment");

            let end = block_end(&lines, idx);
            let (description, desc_line) = match pending_desc.take() {
                Some((text, at)) => (Some(text), Some(at)),
                None => (None, None),
            };
            tasks.push(TaskDefinition {
                name,
                namespace: scopes.iter().map(|(name, _)| name.clone()).collect(),
                description,
                arguments: symbols_in(args_part),
                prerequisites,
                start: idx,
                end,
                desc_line,
            });
            idx = end + 1;
            continue;
        }
        idx += 1;
    }
    tasks
}

/// Resolve a prerequisite the way rake does: innermost enclosing scope first
fn resolve_prerequisite(prerequisite: &str, scope: &[String], defined: &HashSet<String>) -> String {
    for depth in (1..=scope.len()).rev() {
        let candidate = format!("{}:{}", scope[..depth].join(":"), prerequisite);
        if defined.contains(&candidate) {
            return candidate;
        }
    }
    prerequisite.to_string()
}

/// Rake tasks, one unit per task with its full `namespace:name`
pub struct RakeTaskExtractor;

impl RakeTaskExtractor {
    fn units_for_file(&self, ctx: &ExtractionContext, path: &Path, source: &str) -> Vec<ExtractedUnit> {
        let lines: Vec<&str> = source.lines().collect();
        let tasks = task_definitions(source);
        let defined: HashSet<String> = tasks.iter().map(TaskDefinition::full_name).collect();

        tasks
            .iter()
            .map(|task| {
                let identifier = task.full_name();
                let from = task.desc_line.unwrap_or(task.start);
                let body = lines[from..=task.end.min(lines.len().saturating_sub(1))].join("\n");

                let mut unit = ExtractedUnit::new(UnitType::RakeTask, identifier.clone(), Some(ctx.reader().relative(path)))
                    .with_namespace(Some(task.namespace.join(":")))
                    .with_source(body.as_str());
                let prerequisites: Vec<String> = task
                    .prerequisites
                    .iter()
                    .map(|p| resolve_prerequisite(p, &task.namespace, &defined))
                    .collect();
                unit.extend_dependencies(
                    prerequisites
                        .iter()
                        .filter(|p| **p != identifier)
                        .map(|p| Dependency::new(DependencyKind::RakeTask, p.clone(), via::TASK_PREREQUISITE)),
                );
                unit.extend_dependencies(
                    TASK_INVOKE
                        .captures_iter(&body)
                        .map(|c| resolve_prerequisite(&c[1], &task.namespace, &defined))
                        .filter(|target| *target != identifier)
                        .map(|target| Dependency::new(DependencyKind::RakeTask, target, via::CODE_REFERENCE)),
                );
                unit.extend_dependencies(ctx.scanner().scan_all(&body, &ScanLabels::default()));

                unit.set_metadata("task_name", task.name.clone());
                unit.set_metadata("description", task.description.clone());
                unit.set_metadata("arguments", task.arguments.clone());
                unit.set_metadata("prerequisites", prerequisites);
                unit.set_metadata("start_line", task.start + 1);
                unit
            })
            .collect()
    }
}

impl Extractor for RakeTaskExtractor {
    fn name(&self) -> &'static str {
        "rake_tasks"
    }

    fn discover(&self, ctx: &ExtractionContext) -> Result<Vec<Candidate>> {
        Ok(ctx.reader().glob(RAKE_GLOBS)?.into_iter().map(Candidate::File).collect())
    }

    fn try_extract(&self, ctx: &ExtractionContext, candidate: &Candidate) -> Result<Option<ExtractedUnit>> {
        Ok(self.try_extract_many(ctx, candidate)?.into_iter().next())
    }

    fn try_extract_many(&self, ctx: &ExtractionContext, candidate: &Candidate) -> Result<Vec<ExtractedUnit>> {
        let Candidate::File(path) = candidate else {
            return Ok(Vec::new());
        };
        let source = read_source(ctx, path)?;
        Ok(self.units_for_file(ctx, path, &source))
    }
}
