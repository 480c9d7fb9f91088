//! Running catalog entries and reporting outcomes.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use libtest_mimic::{Failed, Trial};
use serde::Serialize;

use crate::rules::{self, Disposition, NOT_VERIFIED_REASON, Rule};
use crate::{SubscriberWhiteboxVerification, TestEnvironment};

/// Result of running one catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum Outcome {
    Passed,
    Failed(String),
    Skipped(String),
}

impl Outcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// `[rule 2.3]`, `[rule 2.9, 2.10]`, or `[setup]` for entries covering no rule.
fn rule_label(rules: &[&str]) -> String {
    if rules.is_empty() {
        "[setup]".to_string()
    } else {
        format!("[rule {}]", rules.join(", "))
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "scenario panicked".to_string()
    }
}

/// Run one entry in a fresh environment.
///
/// The scenario runs under `catch_unwind`; a passing scenario must also leave
/// no asynchronous violation behind.
pub fn run_rule<V: SubscriberWhiteboxVerification>(verification: &V, rule: &Rule<V>) -> Outcome {
    let span = tracing::info_span!("rule", name = rule.name);
    let _enter = span.enter();

    let Some(run) = rule.run else {
        tracing::debug!("not verified");
        return Outcome::Skipped(NOT_VERIFIED_REASON.to_string());
    };

    let env = TestEnvironment::new(verification.config());
    let result = panic::catch_unwind(AssertUnwindSafe(|| run(verification, &env)));

    let outcome = match result {
        Ok(Ok(())) => match env.verify_no_async_errors() {
            Ok(()) => Outcome::Passed,
            Err(violation) => Outcome::Failed(format!("{} {violation}", rule_label(rule.rules))),
        },
        Ok(Err(violation)) => {
            Outcome::Failed(format!("{} {violation}", rule_label(rule.rules)))
        }
        Err(payload) => Outcome::Failed(format!(
            "{} {}",
            rule_label(rule.rules),
            panic_message(payload.as_ref())
        )),
    };

    match &outcome {
        Outcome::Failed(reason) => tracing::info!(%reason, "failed"),
        _ => tracing::debug!("passed"),
    }
    outcome
}

/// Outcome of one entry within a run.
#[derive(Debug, Clone, Serialize)]
pub struct RuleReport {
    pub name: &'static str,
    pub rules: &'static [&'static str],
    pub disposition: Disposition,
    #[serde(flatten)]
    pub outcome: Outcome,
    pub duration_ms: u64,
}

/// Outcomes of a whole run against one subject.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub subject: String,
    pub rules: Vec<RuleReport>,
}

impl RunReport {
    /// True unless a required entry failed.
    pub fn is_success(&self) -> bool {
        !self
            .rules
            .iter()
            .any(|r| r.disposition == Disposition::Required && r.outcome.is_failure())
    }

    pub fn passed(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Passed))
    }

    pub fn failed(&self) -> usize {
        self.count(Outcome::is_failure)
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Skipped(_)))
    }

    fn count(&self, pred: impl Fn(&Outcome) -> bool) -> usize {
        self.rules.iter().filter(|r| pred(&r.outcome)).count()
    }

    pub fn get(&self, name: &str) -> Option<&RuleReport> {
        self.rules.iter().find(|r| r.name == name)
    }
}

/// Run `selected` entries, in order.
pub fn run_rules<V: SubscriberWhiteboxVerification>(
    verification: &V,
    subject: impl Into<String>,
    selected: impl IntoIterator<Item = Rule<V>>,
) -> RunReport {
    let rules = selected
        .into_iter()
        .map(|rule| {
            let start = Instant::now();
            let outcome = run_rule(verification, &rule);
            RuleReport {
                name: rule.name,
                rules: rule.rules,
                disposition: rule.disposition,
                outcome,
                duration_ms: start.elapsed().as_millis() as u64,
            }
        })
        .collect();
    RunReport {
        subject: subject.into(),
        rules,
    }
}

/// Run the whole catalog.
pub fn run_all<V: SubscriberWhiteboxVerification>(
    verification: &V,
    subject: impl Into<String>,
) -> RunReport {
    run_rules(verification, subject, rules::catalog::<V>())
}

/// One libtest-mimic trial per catalog entry.
///
/// Not-verified entries become ignored trials.
pub fn trials<V: SubscriberWhiteboxVerification>(verification: Arc<V>) -> Vec<Trial> {
    rules::catalog::<V>()
        .into_iter()
        .map(|rule| {
            let ignored = !rule.is_required();
            let verification = verification.clone();
            Trial::test(rule.name, move || match run_rule(verification.as_ref(), &rule) {
                Outcome::Failed(reason) => Err(Failed::from(reason)),
                Outcome::Passed | Outcome::Skipped(_) => Ok(()),
            })
            .with_ignored_flag(ignored)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Violation;
    use crate::probe::WhiteboxSubscriberProbe;
    use rstreams::{Publisher, Subscriber};

    struct Nothing;

    impl SubscriberWhiteboxVerification for Nothing {
        type Item = u32;

        fn create_subscriber(
            &self,
            _probe: Arc<WhiteboxSubscriberProbe<u32>>,
        ) -> Arc<dyn Subscriber<u32>> {
            unreachable!()
        }

        fn create_helper_publisher(&self, _elements: u64) -> Arc<dyn Publisher<u32>> {
            unreachable!()
        }
    }

    fn rule(rules: &'static [&'static str], run: rules::Scenario<Nothing>) -> Rule<Nothing> {
        Rule {
            name: "probe",
            rules,
            description: "",
            disposition: Disposition::Required,
            run: Some(run),
        }
    }

    #[test]
    fn test_failure_reason_names_rule() {
        let outcome = run_rule(
            &Nothing,
            &rule(&["3.8"], |_, _| Err(Violation::Mismatch("boom".into()))),
        );
        assert_eq!(outcome, Outcome::Failed("[rule 3.8] boom".into()));
    }

    #[test]
    fn test_pending_async_violation_fails_passing_scenario() {
        let outcome = run_rule(
            &Nothing,
            &rule(&["2.3"], |_, env| {
                env.flop(Violation::IllegalReentrancy("late".into()));
                Ok(())
            }),
        );
        match outcome {
            Outcome::Failed(reason) => {
                assert!(reason.starts_with("[rule 2.3] 1 asynchronous violation(s)"))
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn test_panicking_scenario_is_a_failure() {
        let outcome = run_rule(&Nothing, &rule(&[], |_, _| panic!("kaboom")));
        assert_eq!(outcome, Outcome::Failed("[setup] kaboom".into()));
    }

    #[test]
    fn test_not_verified_is_skipped() {
        let skipped = Rule::<Nothing> {
            name: "untested",
            rules: &["2.2"],
            description: "",
            disposition: Disposition::NotVerified,
            run: None,
        };
        assert!(matches!(run_rule(&Nothing, &skipped), Outcome::Skipped(_)));
    }

    #[test]
    fn test_run_report_success_ignores_skips() {
        let report = run_rules(
            &Nothing,
            "nothing",
            vec![
                rule(&["2.1"], |_, _| Ok(())),
                Rule {
                    name: "untested",
                    rules: &["2.2"],
                    description: "",
                    disposition: Disposition::NotVerified,
                    run: None,
                },
            ],
        );
        assert!(report.is_success());
        assert_eq!((report.passed(), report.failed(), report.skipped()), (1, 0, 1));

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["rules"][0]["outcome"], "passed");
        assert_eq!(json["rules"][1]["outcome"], "skipped");
        assert_eq!(json["rules"][1]["disposition"], "not_verified");
    }
}
