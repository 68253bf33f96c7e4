//! Decision explainer: turns a `Decision` plus its resolved history into a
//! multi-line human-readable narrative.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::decision::DecisionStore;
use crate::models::{Decision, PipelineResult, ResourceKind};

fn resource_kind_word(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::Compute => "compute host request",
        ResourceKind::Volume => "volume request",
        ResourceKind::Share => "share request",
        ResourceKind::BareMetal => "bare-metal request",
        ResourceKind::Pod => "pod",
    }
}

fn coarsen_duration(d: chrono::Duration) -> String {
    let secs = d.num_seconds().max(0);
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else {
        format!("{}h", secs / 3600)
    }
}

fn join_with_and(items: &[String]) -> String {
    match items {
        [] => String::new(),
        [a] => a.clone(),
        [a, b] => format!("{a} and {b}"),
        _ => {
            let (last, rest) = items.split_last().expect("non-empty");
            format!("{}, and {last}", rest.join(", "))
        }
    }
}

fn order_hosts(weights: &HashMap<String, f64>) -> Vec<String> {
    let mut hosts: Vec<String> = weights.keys().cloned().collect();
    hosts.sort_by(|a, b| {
        weights[b]
            .partial_cmp(&weights[a])
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.cmp(b))
    });
    hosts
}

/// Re-sums the aggregation, as `Pipeline::run` does, but with `skip_step`'s
/// score contribution zeroed out (its filtering effect on membership is
/// kept, since that's structural rather than a score).
fn counterfactual_winner(result: &PipelineResult, skip_step: &str) -> Option<String> {
    let mut aggregated = result.normalized_in_weights.clone();
    for step in &result.step_results {
        if step.skipped {
            continue;
        }
        let mut next = HashMap::with_capacity(aggregated.len());
        for (subject, weight) in &aggregated {
            if let Some(delta) = step.activations.get(subject) {
                let applied = if step.step_key == skip_step { 0.0 } else { *delta };
                next.insert(subject.clone(), weight + applied);
            }
        }
        aggregated = next;
    }
    order_hosts(&aggregated).into_iter().next()
}

fn precedence_line(decision: &Decision, history: &[Decision]) -> String {
    let word = resource_kind_word(decision.resource_kind);
    if decision.precedence == 0 {
        format!("Initial placement of the {word}")
    } else {
        let previous_target = history
            .last()
            .and_then(|d| d.result.target_host.clone())
            .unwrap_or_else(|| "(n/a)".to_string());
        let current_target = decision
            .result
            .target_host
            .clone()
            .unwrap_or_else(|| "(n/a)".to_string());
        format!(
            "Decision #{} for this {word}. Previous target host was '{previous_target}', now it's '{current_target}'",
            decision.precedence + 1
        )
    }
}

/// Bounds a raw aggregated score into `(-1, 1)` for display. Ordering is
/// decided on the raw score elsewhere; this is a comparability transform
/// only, applied at the narrative layer.
fn display_score(raw: f64) -> f64 {
    raw.tanh()
}

fn winner_analysis_line(decision: &Decision) -> String {
    let result = &decision.result;
    let n = result.ordered_hosts.len();
    let Some(winner) = &result.target_host else {
        return format!("No host selected ({n} evaluated)");
    };
    let winner_score = display_score(result.aggregated_out_weights.get(winner).copied().unwrap_or(0.0));
    let gap = result.ordered_hosts.get(1).map(|runner_up| {
        let runner_up_score = display_score(result.aggregated_out_weights.get(runner_up).copied().unwrap_or(0.0));
        winner_score - runner_up_score
    });
    match gap {
        Some(gap) => format!("Selected '{winner}' with score {winner_score:.2}, {gap:.2} ahead of runner-up ({n} evaluated)"),
        None => format!("Selected '{winner}' with score {winner_score:.2}, no runner-up ({n} evaluated)"),
    }
}

fn input_favored_host(result: &PipelineResult) -> Option<(String, &HashMap<String, f64>)> {
    let source = if !result.raw_in_weights.is_empty() {
        &result.raw_in_weights
    } else {
        &result.normalized_in_weights
    };
    source
        .iter()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(Ordering::Equal))
        .map(|(k, _)| (k.clone(), source))
}

fn input_comparison_line(decision: &Decision) -> String {
    let result = &decision.result;
    let Some(winner) = &result.target_host else {
        return "No winner to compare against input weights".to_string();
    };
    let Some((favored, source)) = input_favored_host(result) else {
        return "No input weights recorded".to_string();
    };
    let out = display_score(result.aggregated_out_weights.get(winner).copied().unwrap_or(0.0));
    if &favored == winner {
        let raw = source.get(winner).copied().unwrap_or(0.0);
        format!("Input choice confirmed ({raw:.2}->{out:.2})")
    } else {
        let raw = source.get(&favored).copied().unwrap_or(0.0);
        format!("Input favored {favored}, final winner {winner} ({raw:.2}->{out:.2})")
    }
}

fn critical_steps_line(decision: &Decision) -> String {
    let result = &decision.result;
    let n = result.step_results.len();
    if n == 0 {
        return "driven by input only (no pipeline steps ran)".to_string();
    }
    let applied: Vec<&str> = result
        .step_results
        .iter()
        .filter(|s| !s.skipped)
        .map(|s| s.step_key.as_str())
        .collect();
    let mut critical = Vec::new();
    for step_key in &applied {
        if counterfactual_winner(result, step_key) != result.target_host {
            critical.push(step_key.to_string());
        }
    }
    if critical.is_empty() {
        format!("driven by input only (all {n} step(s) are non-critical)")
    } else if critical.len() == applied.len() {
        format!("requires all {n} pipeline step(s)")
    } else {
        format!("driven by {}/{n} step(s): {}", critical.len(), join_with_and(&critical))
    }
}

fn first_step_removing(result: &PipelineResult, host: &str) -> Option<String> {
    let mut present = true;
    for step in &result.step_results {
        if step.skipped {
            continue;
        }
        if present && !step.activations.contains_key(host) {
            return Some(step.step_key.clone());
        }
        present = step.activations.contains_key(host);
    }
    None
}

fn deleted_hosts_line(decision: &Decision) -> String {
    let result = &decision.result;
    let total_in = result.raw_in_weights.len().max(result.normalized_in_weights.len());
    let survived = result.aggregated_out_weights.len();
    let filtered = total_in.saturating_sub(survived);
    if filtered == 0 {
        return "0 hosts filtered".to_string();
    }
    match input_favored_host(result) {
        Some((favored, _)) if !result.aggregated_out_weights.contains_key(&favored) => {
            match first_step_removing(result, &favored) {
                Some(step) => format!("{filtered} hosts filtered (including input winner {favored}, removed by {step})"),
                None => format!("{filtered} hosts filtered (including input winner {favored})"),
            }
        }
        _ => format!("{filtered} hosts filtered"),
    }
}

struct ChainGroup {
    host: String,
    count: u32,
    last_time: DateTime<Utc>,
}

fn chain_line(decision: &Decision, history: &[Decision]) -> String {
    let mut timeline: Vec<&Decision> = history.iter().collect();
    timeline.push(decision);

    let mut groups: Vec<ChainGroup> = Vec::new();
    for d in &timeline {
        let host = d.result.target_host.clone().unwrap_or_else(|| "(n/a)".to_string());
        match groups.last_mut() {
            Some(last) if last.host == host => {
                last.count += 1;
                last.last_time = d.creation_time;
            }
            _ => groups.push(ChainGroup {
                host,
                count: 1,
                last_time: d.creation_time,
            }),
        }
    }

    let now = decision.creation_time;
    let mut seen = HashSet::new();
    let mut loop_detected = false;
    let mut prev: Option<&str> = None;
    for g in &groups {
        if let Some(p) = prev {
            if p != g.host && seen.contains(&g.host) {
                loop_detected = true;
            }
        }
        seen.insert(g.host.clone());
        prev = Some(&g.host);
    }

    let parts: Vec<String> = groups
        .iter()
        .map(|g| {
            let age = coarsen_duration(now.signed_duration_since(g.last_time));
            if g.count > 1 {
                format!("{} ({age}; {} decisions)", g.host, g.count)
            } else {
                format!("{} ({age})", g.host)
            }
        })
        .collect();

    let prefix = if loop_detected { "Chain (loop detected): " } else { "Chain: " };
    format!("{prefix}{}", parts.join(" -> "))
}

/// Resolves `decision.history` through `store` (dangling refs surface as
/// `(n/a)` rather than erroring) and assembles the full narrative.
pub async fn explain(decision: &Decision, store: &dyn DecisionStore) -> String {
    let mut history = Vec::with_capacity(decision.history.len());
    for reference in &decision.history {
        match store.get(&reference.namespace, &reference.name).await {
            Ok(Some(d)) => history.push(d),
            _ => log::debug!("dangling decision history reference: {}/{}", reference.namespace, reference.name),
        }
    }
    history.sort_by_key(|d| d.creation_time);

    [
        precedence_line(decision, &history),
        winner_analysis_line(decision),
        input_comparison_line(decision),
        critical_steps_line(decision),
        deleted_hosts_line(decision),
        chain_line(decision, &history),
    ]
    .join("\n")
}
