use super::common::{block_end, dsl_calls, read_source, symbol_list_option, symbol_option, symbols_in, without_self};
use super::{Candidate, ExtractionContext, Extractor};
use crate::parser::DeclarationKind;
use crate::scanner::ScanLabels;
use crate::unit::{via, Dependency, DependencyKind, ExtractedUnit, UnitType};
use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeSet;

const STATE_MACHINE_GLOBS: &[&str] = &["app/models/**/*.rb"];

static MACHINE_OPENER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(aasm|state_machine)\b(.*?)\s*\bdo(?:\s*\|[^|]*\|)?\s*$").unwrap());
static EVENT_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*event\s+:(\w+[?!]?)").unwrap());
static TRANSITION_PAIR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\[[^\]]*\]|:\w+|\w+)(?:\s*=>|:)\s*(\[[^\]]*\]|:\w+)").unwrap());

const NON_STATE_KEYS: &[&str] = &["if", "unless", "on", "guard", "after", "before"];

#[derive(Debug, Clone, Serialize)]
struct Transition {
    from: Vec<String>,
    to: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    guard: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct Event {
    name: String,
    transitions: Vec<Transition>,
}

#[derive(Debug, Clone, Serialize)]
struct Machine {
    dsl: String,
    attribute: String,
    initial: Option<String>,
    states: Vec<String>,
    events: Vec<Event>,
    #[serde(skip)]
    start_line: usize,
    #[serde(skip)]
    end_line: usize,
}

/// Scan a class body for `aasm` and `state_machine` blocks
fn machines(source: &str) -> Vec<Machine> {
    let lines: Vec<&str> = source.lines().collect();
    let mut found = Vec::new();
    let mut idx = 0;
    while idx < lines.len() {
        let Some(caps) = MACHINE_OPENER.captures(lines[idx]) else {
            idx += 1;
            continue;
        };
        let dsl = caps.get(1).map_or("", |m| m.as_str()).to_string();
        let args = caps.get(2).map_or("", |m| m.as_str()).trim();
        let end = block_end(&lines, idx);
        found.push(parse_machine(&lines, idx, end, dsl, args));
        idx = end + 1;
    }
    found
}

fn parse_machine(lines: &[&str], start: usize, end: usize, dsl: String, args: &str) -> Machine {
    let (attribute, mut initial) = if dsl == "aasm" {
        (symbol_option(args, "column").unwrap_or_else(|| "aasm_state".to_string()), None)
    } else {
        let attribute = symbols_in(args.split(',').next().unwrap_or(""))
            .into_iter()
            .next()
            .unwrap_or_else(|| "state".to_string());
        (attribute, symbol_option(args, "initial"))
    };

    let mut states: Vec<String> = Vec::new();
    let mut events = Vec::new();
    let mut idx = start + 1;
    while idx < end {
        let line = lines[idx];
        if let Some(caps) = EVENT_LINE.captures(line) {
            let event_end = block_end(lines, idx).min(end);
            let transitions = lines[idx..=event_end]
                .iter()
                .flat_map(|l| transitions_in(l))
                .collect();
            events.push(Event {
                name: caps[1].to_string(),
                transitions,
            });
            idx = event_end + 1;
            continue;
        }
        if let Some(call) = dsl_calls(line).into_iter().find(|c| c.keyword == "state" || c.keyword == "states") {
            if initial.is_none() && call.options.contains("initial: true") {
                initial = call.symbols.first().cloned();
            }
            states.extend(call.symbols);
        }
        idx += 1;
    }

    // Initial state first, then declared, then any only named by transitions
    let mut seen = BTreeSet::new();
    let mut ordered = Vec::new();
    let transition_states = events
        .iter()
        .flat_map(|e: &Event| &e.transitions)
        .flat_map(|t| t.from.iter().chain(&t.to))
        .cloned();
    for state in initial.iter().cloned().chain(states).chain(transition_states) {
        if state != "any" && state != "all" && seen.insert(state.clone()) {
            ordered.push(state);
        }
    }

    Machine {
        dsl,
        attribute,
        initial,
        states: ordered,
        events,
        start_line: start + 1,
        end_line: end + 1,
    }
}

fn transitions_in(line: &str) -> Vec<Transition> {
    let trimmed = line.trim_start();
    if let Some(rest) = trimmed.strip_prefix("transitions ") {
        return vec![Transition {
            from: symbol_list_option(rest, "from"),
            to: symbol_list_option(rest, "to"),
            guard: symbol_option(rest, "guard").or_else(|| symbol_option(rest, "if")),
        }];
    }
    let Some(at) = trimmed.find("transition ") else {
        return Vec::new();
    };
    let rest = &trimmed[at + "transition ".len()..];
    let guard = symbol_option(rest, "if");
    TRANSITION_PAIR
        .captures_iter(rest)
        .filter(|caps| !NON_STATE_KEYS.contains(&caps[1].trim_start_matches(':')))
        .map(|caps| Transition {
            from: state_list(&caps[1]),
            to: state_list(&caps[2]),
            guard: guard.clone(),
        })
        .collect()
}

fn state_list(fragment: &str) -> Vec<String> {
    if fragment.starts_with('[') || fragment.starts_with(':') {
        symbols_in(fragment)
    } else {
        vec![fragment.to_string()]
    }
}

/// State machines declared on a model, one unit per host class
pub struct StateMachineExtractor;

impl Extractor for StateMachineExtractor {
    fn name(&self) -> &'static str {
        "state_machines"
    }

    fn discover(&self, ctx: &ExtractionContext) -> Result<Vec<Candidate>> {
        Ok(ctx
            .reader()
            .glob(STATE_MACHINE_GLOBS)?
            .into_iter()
            .map(Candidate::File)
            .collect())
    }

    fn try_extract(&self, ctx: &ExtractionContext, candidate: &Candidate) -> Result<Option<ExtractedUnit>> {
        let Candidate::File(path) = candidate else {
            return Ok(None);
        };
        let source = read_source(ctx, path)?;
        if !source.contains("aasm") && !source.contains("state_machine") {
            return Ok(None);
        }
        let Some(decl) = ctx.parser().primary_declaration(&source) else {
            return Ok(None);
        };
        if decl.kind != DeclarationKind::Class {
            return Ok(None);
        }
        let found = machines(&source);
        if found.is_empty() {
            return Ok(None);
        }

        let lines: Vec<&str> = source.lines().collect();
        let mut body = format!("# State machines of {}\n", decl.name);
        for machine in &found {
            body.push_str(&lines[machine.start_line - 1..machine.end_line].join("\n"));
            body.push('\n');
        }

        let identifier = format!("{}::StateMachine", decl.name);
        let mut unit = ExtractedUnit::new(UnitType::StateMachine, identifier.clone(), Some(ctx.reader().relative(path)))
            .with_namespace(Some(decl.name.clone()))
            .with_source(body.as_str());
        unit.add_dependency(Dependency::new(DependencyKind::Model, decl.name.clone(), via::STATE_MACHINE));
        let labels = ScanLabels::default().with_job(via::CALLBACK).with_mailer(via::CALLBACK);
        let scanned = ctx.scanner().scan_all(&body, &labels);
        unit.extend_dependencies(without_self(scanned, &identifier));

        unit.set_metadata("host_class", decl.name.clone());
        unit.set_metadata("dsl", found[0].dsl.clone());
        unit.set_metadata("state_count", found.iter().map(|m| m.states.len()).sum::<usize>());
        unit.set_metadata("event_count", found.iter().map(|m| m.events.len()).sum::<usize>());
        unit.set_metadata("machines", serde_json::to_value(&found)?);
        Ok(Some(unit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::test_support::context;
    use crate::source::MemorySourceReader;
    use serde_json::json;
    use std::path::PathBuf;

    const AASM_ORDER: &str = r#"class Order < ApplicationRecord
  include AASM

  aasm column: :status do
    state :pending, initial: true
    state :paid, :shipped
    state :cancelled

    event :pay do
      after { ReceiptJob.perform_later(id) }
      transitions from: :pending, to: :paid, guard: :payable?
    end

    event :cancel do
      transitions from: [:pending, :paid], to: :cancelled
    end
  end
end
"#;

    const STATE_MACHINE_VEHICLE: &str = r#"class Vehicle < ApplicationRecord
  state_machine :state, initial: :parked do
    event :ignite do
      transition parked: :idling
    end

    event :park do
      transition [:idling, :first_gear] => :parked, if: :seatbelt_on?
    end

    state :first_gear, value: 1
  end
end
"#;

    fn ctx() -> ExtractionContext {
        context(
            MemorySourceReader::new()
                .with_file("app/models/order.rb", AASM_ORDER)
                .with_file("app/models/vehicle.rb", STATE_MACHINE_VEHICLE)
                .with_file("app/models/user.rb", "class User < ApplicationRecord\nend\n"),
        )
    }

    #[test]
    fn test_aasm_machine() {
        let ctx = ctx();
        let unit = StateMachineExtractor
            .extract_one(&ctx, &Candidate::File(PathBuf::from("app/models/order.rb")))
            .unwrap();

        assert_eq!(unit.identifier, "Order::StateMachine");
        let machine = &unit.metadata["machines"][0];
        assert_eq!(machine["dsl"], "aasm");
        assert_eq!(machine["attribute"], "status");
        assert_eq!(machine["initial"], "pending");
        assert_eq!(machine["states"], json!(["pending", "paid", "shipped", "cancelled"]));
        assert_eq!(machine["events"][0]["transitions"][0]["guard"], "payable?");
        assert_eq!(machine["events"][1]["transitions"][0]["from"], json!(["pending", "paid"]));
        assert_eq!(unit.metadata["event_count"], 2);
    }

    #[test]
    fn test_host_model_dependency_comes_first() {
        let ctx = ctx();
        let unit = StateMachineExtractor
            .extract_one(&ctx, &Candidate::File(PathBuf::from("app/models/order.rb")))
            .unwrap();
        let deps: Vec<(&str, &str)> = unit
            .dependencies()
            .iter()
            .map(|d| (d.target.as_str(), d.via.as_str()))
            .collect();
        assert_eq!(deps, vec![("Order", "state_machine"), ("ReceiptJob", "callback")]);
    }

    #[test]
    fn test_state_machine_gem_dsl() {
        let ctx = ctx();
        let unit = StateMachineExtractor
            .extract_one(&ctx, &Candidate::File(PathBuf::from("app/models/vehicle.rb")))
            .unwrap();
        let machine = &unit.metadata["machines"][0];
        assert_eq!(machine["attribute"], "state");
        assert_eq!(machine["initial"], "parked");
        assert_eq!(machine["events"][0]["transitions"][0]["from"], json!(["parked"]));
        assert_eq!(machine["events"][0]["transitions"][0]["to"], json!(["idling"]));
        let park = &machine["events"][1]["transitions"];
        assert_eq!(park.as_array().unwrap().len(), 1);
        assert_eq!(park[0]["from"], json!(["idling", "first_gear"]));
        assert_eq!(park[0]["guard"], "seatbelt_on?");
        assert_eq!(machine["states"], json!(["parked", "first_gear", "idling"]));
    }

    #[test]
    fn test_model_without_machine_is_skipped() {
        let ctx = ctx();
        let candidate = Candidate::File(PathBuf::from("app/models/user.rb"));
        assert!(StateMachineExtractor.try_extract(&ctx, &candidate).unwrap().is_none());
    }
}
