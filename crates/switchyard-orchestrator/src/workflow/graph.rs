use super::model::WorkflowDefinition;
use super::predicate;
use std::collections::{HashMap, HashSet};
use switchyard_core::{SwitchyardError, SwitchyardResult};

/// Reject definitions that could never execute correctly: no steps,
/// duplicate step names, unknown or self dependencies, dependency cycles
/// and malformed `runIf`/`skipIf` predicates.
pub fn validate_definition(definition: &WorkflowDefinition) -> SwitchyardResult<()> {
    if definition.steps.is_empty() {
        return Err(SwitchyardError::ValidationFailure(format!(
            "workflow '{}' has no steps",
            definition.name
        )));
    }

    let mut names = HashSet::new();
    for step in &definition.steps {
        if step.name.trim().is_empty() {
            return Err(SwitchyardError::ValidationFailure(
                "step name must not be empty".to_string(),
            ));
        }
        if !names.insert(step.name.as_str()) {
            return Err(SwitchyardError::ValidationFailure(format!(
                "duplicate step name '{}'",
                step.name
            )));
        }
    }

    for step in &definition.steps {
        for dep in &step.dependencies {
            if dep == &step.name {
                return Err(SwitchyardError::ValidationFailure(format!(
                    "step '{}' depends on itself",
                    step.name
                )));
            }
            if !names.contains(dep.as_str()) {
                return Err(SwitchyardError::ValidationFailure(format!(
                    "step '{}' depends on unknown step '{dep}'",
                    step.name
                )));
            }
        }
    }

    for step in &definition.steps {
        let conditions = [&step.conditions.run_if, &step.conditions.skip_if];
        for expr in conditions.into_iter().flatten() {
            predicate::check(expr).map_err(|e| {
                SwitchyardError::ValidationFailure(format!("step '{}': {e}", step.name))
            })?;
        }
    }

    if let Some(name) = find_cycle(definition) {
        return Err(SwitchyardError::ValidationFailure(format!(
            "dependency cycle through step '{name}'"
        )));
    }
    Ok(())
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Done,
}

/// Name of a step that sits on a dependency cycle, if any.
fn find_cycle(definition: &WorkflowDefinition) -> Option<String> {
    let edges: HashMap<&str, Vec<&str>> = definition
        .steps
        .iter()
        .map(|s| {
            (
                s.name.as_str(),
                s.dependencies.iter().map(String::as_str).collect(),
            )
        })
        .collect();

    let mut marks: HashMap<&str, Mark> = HashMap::new();
    for step in &definition.steps {
        let root = step.name.as_str();
        if marks.contains_key(root) {
            continue;
        }
        // Explicit stack of (node, index of the next dependency to visit);
        // chain length is bounded only by the number of steps.
        let mut stack = vec![(root, 0usize)];
        marks.insert(root, Mark::InProgress);
        while let Some((node, next)) = stack.last_mut() {
            let deps = edges.get(*node).map(Vec::as_slice).unwrap_or_default();
            match deps.get(*next) {
                Some(&dep) => {
                    *next += 1;
                    match marks.get(dep) {
                        Some(Mark::InProgress) => return Some(dep.to_string()),
                        Some(Mark::Done) => {}
                        None => {
                            marks.insert(dep, Mark::InProgress);
                            stack.push((dep, 0));
                        }
                    }
                }
                None => {
                    marks.insert(*node, Mark::Done);
                    stack.pop();
                }
            }
        }
    }
    None
}
