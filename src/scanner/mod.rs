//! Shared dependency scanners.
//!
//! Four conventional cross-reference scans (models, services, jobs, mailers)
//! reused by nearly every extractor. The model scan matches against the set
//! of known model names compiled once per run into a single alternation.

mod model_index;

pub use model_index::ModelNameIndex;

use crate::unit::{via, Dependency, DependencyKind};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;

static SERVICE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b((?:[A-Z]\w*::)*[A-Z]\w*Service)(?:\.|::[a-z_])").unwrap()
});

static JOB_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b((?:[A-Z]\w*::)*[A-Z]\w*Job)\.(?:perform_later|perform_now|perform_async|perform_in|perform_at|set)\b",
    )
    .unwrap()
});

static MAILER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b((?:[A-Z]\w*::)*[A-Z]\w*Mailer)\.").unwrap());

/// `via` label per scan category for [`DependencyScanner::scan_all`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanLabels {
    pub model: &'static str,
    pub service: &'static str,
    pub job: &'static str,
    pub mailer: &'static str,
}

impl Default for ScanLabels {
    fn default() -> Self {
        Self {
            model: via::CODE_REFERENCE,
            service: via::CODE_REFERENCE,
            job: via::CODE_REFERENCE,
            mailer: via::CODE_REFERENCE,
        }
    }
}

impl ScanLabels {
    pub fn with_model(mut self, label: &'static str) -> Self {
        self.model = label;
        self
    }

    pub fn with_service(mut self, label: &'static str) -> Self {
        self.service = label;
        self
    }

    pub fn with_job(mut self, label: &'static str) -> Self {
        self.job = label;
        self
    }

    pub fn with_mailer(mut self, label: &'static str) -> Self {
        self.mailer = label;
        self
    }
}

/// Stateless scanner over source text; cheap to share across threads
#[derive(Debug, Clone)]
pub struct DependencyScanner {
    models: Arc<ModelNameIndex>,
}

impl DependencyScanner {
    pub fn new(models: Arc<ModelNameIndex>) -> Self {
        Self { models }
    }

    pub fn model_index(&self) -> &ModelNameIndex {
        &self.models
    }

    pub fn scan_models(&self, source: &str, via: &str) -> Vec<Dependency> {
        dedup(
            self.models
                .find_all(source)
                .map(|name| Dependency::new(DependencyKind::Model, name, via)),
        )
    }

    pub fn scan_services(&self, source: &str, via: &str) -> Vec<Dependency> {
        capture_all(&SERVICE_PATTERN, source, DependencyKind::Service, via)
    }

    pub fn scan_jobs(&self, source: &str, via: &str) -> Vec<Dependency> {
        capture_all(&JOB_PATTERN, source, DependencyKind::Job, via)
    }

    pub fn scan_mailers(&self, source: &str, via: &str) -> Vec<Dependency> {
        capture_all(&MAILER_PATTERN, source, DependencyKind::Mailer, via)
    }

    /// All four scans, union deduplicated by `(type, target)`
    pub fn scan_all(&self, source: &str, labels: &ScanLabels) -> Vec<Dependency> {
        let found = self
            .scan_models(source, labels.model)
            .into_iter()
            .chain(self.scan_services(source, labels.service))
            .chain(self.scan_jobs(source, labels.job))
            .chain(self.scan_mailers(source, labels.mailer));
        dedup(found)
    }
}

fn capture_all(pattern: &Regex, source: &str, kind: DependencyKind, via: &str) -> Vec<Dependency> {
    dedup(
        pattern
            .captures_iter(source)
            .filter_map(|caps| caps.get(1))
            .map(|m| Dependency::new(kind, m.as_str(), via)),
    )
}

/// First-seen dedup by `(type, target)`
pub fn dedup<I>(dependencies: I) -> Vec<Dependency>
where
    I: IntoIterator<Item = Dependency>,
{
    let mut seen = HashSet::new();
    dependencies
        .into_iter()
        .filter(|dep| seen.insert((dep.kind, dep.target.clone())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scanner(models: &[&str]) -> DependencyScanner {
        DependencyScanner::new(Arc::new(ModelNameIndex::new(
            models.iter().map(|m| m.to_string()),
        )))
    }

    #[test]
    fn test_repeated_service_calls_yield_one_dependency() {
        let deps = scanner(&[]).scan_services("UserService.call(1); UserService.call(2)", via::CODE_REFERENCE);
        assert_eq!(
            deps,
            vec![Dependency::new(DependencyKind::Service, "UserService", "code_reference")]
        );
    }

    #[test]
    fn test_namespaced_service_and_constructor() {
        let deps = scanner(&[]).scan_services(
            "Billing::ChargeService::new(order).run\nSyncService.perform",
            via::CODE_REFERENCE,
        );
        let targets: Vec<&str> = deps.iter().map(|d| d.target.as_str()).collect();
        assert_eq!(targets, vec!["Billing::ChargeService", "SyncService"]);
    }

    #[test]
    fn test_service_constant_reference_is_ignored() {
        assert!(scanner(&[])
            .scan_services("rescue PaymentService::Error", via::CODE_REFERENCE)
            .is_empty());
    }

    #[test]
    fn test_job_requires_enqueue_call() {
        let source = "ReceiptJob.perform_later(order)\nReceiptJob.new\nCleanupJob.set(wait: 1).perform_later";
        let deps = scanner(&[]).scan_jobs(source, via::ENQUEUE);
        let targets: Vec<&str> = deps.iter().map(|d| d.target.as_str()).collect();
        assert_eq!(targets, vec!["ReceiptJob", "CleanupJob"]);
        assert!(deps.iter().all(|d| d.via == via::ENQUEUE));
    }

    #[test]
    fn test_mailer_requires_method_call() {
        let deps = scanner(&[]).scan_mailers(
            "OrderMailer.confirmation(order).deliver_later\nclass X < ApplicationMailer",
            via::CODE_REFERENCE,
        );
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].target, "OrderMailer");
    }

    #[test]
    fn test_scan_all_applies_labels_per_category() {
        let source = "user = User.find(id)\nNotifyService.call(user)\nUserMailer.welcome(user)";
        let labels = ScanLabels::default().with_model(via::DELEGATION);
        let deps = scanner(&["User", "Order"]).scan_all(source, &labels);

        assert_eq!(deps.len(), 3);
        assert_eq!(deps[0], Dependency::new(DependencyKind::Model, "User", via::DELEGATION));
        assert_eq!(deps[1].via, via::CODE_REFERENCE);
        assert_eq!(deps[2].kind, DependencyKind::Mailer);
    }

    #[test]
    fn test_scan_all_is_idempotent() {
        let scanner = scanner(&["Order", "LineItem"]);
        let source = "Order.where(x).each { |o| LineItem.create!(order: o) }\nSyncJob.perform_later(1)";
        let first = scanner.scan_all(source, &ScanLabels::default());
        let second = scanner.scan_all(source, &ScanLabels::default());
        assert_eq!(first, second);
        assert_eq!(first.len(), 3);
    }
}
