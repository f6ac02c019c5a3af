//! Validation rules for routes and pipelines.
//!
//! Applied on every create/update path. Violations are collected into
//! structured field errors rather than failing on the first problem.

use serde::{Deserialize, Serialize};
use shunt_state::Layer;

/// One validation problem, tied to the field that caused it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationIssue {
    pub field: String,
    pub message: String,
}

impl ValidationIssue {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Validate a route name. Uniqueness against existing names is checked
/// separately by the service (it needs store access).
pub fn validate_route_name(name: &str) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    let trimmed = name.trim();
    if trimmed.is_empty() {
        issues.push(ValidationIssue::new("name", "route name must not be empty"));
    }
    if trimmed.len() > 128 {
        issues.push(ValidationIssue::new(
            "name",
            "route name must be at most 128 characters",
        ));
    }
    issues
}

/// Validate a pipeline's layers: unique levels, non-empty targets,
/// target fields filled in.
pub fn validate_layers(layers: &[Layer]) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    let mut seen_levels = std::collections::HashSet::new();

    for (i, layer) in layers.iter().enumerate() {
        if !seen_levels.insert(layer.level) {
            issues.push(ValidationIssue::new(
                format!("layers[{i}].level"),
                format!("duplicate layer level {}", layer.level),
            ));
        }
        if layer.targets.is_empty() {
            issues.push(ValidationIssue::new(
                format!("layers[{i}].targets"),
                "layer must have at least one target",
            ));
        }
        for (j, target) in layer.targets.iter().enumerate() {
            if target.id.trim().is_empty() {
                issues.push(ValidationIssue::new(
                    format!("layers[{i}].targets[{j}].id"),
                    "target id must not be empty",
                ));
            }
            if target.credential_id.trim().is_empty() {
                issues.push(ValidationIssue::new(
                    format!("layers[{i}].targets[{j}].credential_id"),
                    "credential id must not be empty",
                ));
            }
            if target.model.trim().is_empty() {
                issues.push(ValidationIssue::new(
                    format!("layers[{i}].targets[{j}].model"),
                    "model must not be empty",
                ));
            }
        }
    }
    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use shunt_state::{LoadStrategy, Target};

    fn target(id: &str) -> Target {
        Target {
            id: id.to_string(),
            credential_id: "cred-1".into(),
            model: "gpt-test".into(),
            weight: 1,
            enabled: true,
        }
    }

    fn layer(level: i32, targets: Vec<Target>) -> Layer {
        Layer {
            level,
            strategy: LoadStrategy::RoundRobin,
            cooldown_seconds: 0,
            targets,
        }
    }

    #[test]
    fn empty_name_rejected() {
        assert!(!validate_route_name("").is_empty());
        assert!(!validate_route_name("   ").is_empty());
        assert!(validate_route_name("fast").is_empty());
    }

    #[test]
    fn oversized_name_rejected() {
        let name = "x".repeat(200);
        assert!(!validate_route_name(&name).is_empty());
    }

    #[test]
    fn duplicate_levels_rejected() {
        let layers = vec![layer(1, vec![target("a")]), layer(1, vec![target("b")])];
        let issues = validate_layers(&layers);
        assert_eq!(issues.len(), 1);
        assert!(issues[0].field.contains("level"));
    }

    #[test]
    fn empty_layer_rejected() {
        let issues = validate_layers(&[layer(1, vec![])]);
        assert_eq!(issues.len(), 1);
        assert!(issues[0].message.contains("at least one target"));
    }

    #[test]
    fn blank_target_fields_rejected() {
        let mut bad = target("");
        bad.model = " ".into();
        let issues = validate_layers(&[layer(1, vec![bad])]);
        assert_eq!(issues.len(), 2);
    }

    #[test]
    fn valid_pipeline_passes() {
        let layers = vec![
            layer(1, vec![target("a"), target("b")]),
            layer(2, vec![target("c")]),
        ];
        assert!(validate_layers(&layers).is_empty());
    }
}
