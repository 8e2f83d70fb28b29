//! Validate stage
//!
//! Checks a transformed component without consulting the oracle. A report is
//! informational: it drives corrective retries and ends up in the result, but
//! never causes a component's text to be discarded.

use crate::component::{Component, ComponentId, ComponentRole};
use crate::decompose::{syntax, DecompositionError, SourceDialect};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use tree_sitter::Node;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    EmptyOutput,
    SyntaxError,
    ResidualSourceCall,
    MissingTargetCall,
    MissingAwait,
    TransformFailed,
}

/// One finding of a validation pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub kind: IssueKind,
    pub description: String,
    pub severity: Severity,
    /// 1-based line in the transformed text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
}

impl Issue {
    pub fn new(kind: IssueKind, severity: Severity, description: impl Into<String>) -> Self {
        Self {
            kind,
            description: description.into(),
            severity,
            line: None,
        }
    }

    pub fn error(kind: IssueKind, description: impl Into<String>) -> Self {
        Self::new(kind, Severity::Error, description)
    }

    pub fn warning(kind: IssueKind, description: impl Into<String>) -> Self {
        Self::new(kind, Severity::Warning, description)
    }

    pub fn at_line(mut self, line: usize) -> Self {
        self.line = Some(line);
        self
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let severity = match self.severity {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        match self.line {
            Some(line) => write!(f, "{} (line {}): {}", severity, line, self.description),
            None => write!(f, "{}: {}", severity, self.description),
        }
    }
}

/// Outcome of validating one component's transformed text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub component_id: ComponentId,
    /// True when no issue has error severity
    pub valid: bool,
    pub issues: Vec<Issue>,
}

impl ValidationReport {
    pub fn from_issues(component_id: ComponentId, issues: Vec<Issue>) -> Self {
        let valid = !issues.iter().any(|i| i.severity == Severity::Error);
        Self {
            component_id,
            valid,
            issues,
        }
    }

    pub fn errors(&self) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(|i| i.severity == Severity::Error)
    }

    /// Issues rendered one per line, for corrective context and stubs.
    pub fn summaries(&self) -> Vec<String> {
        self.issues.iter().map(|i| i.to_string()).collect()
    }
}

/// Contract for validators. Must not call the oracle.
pub trait Validator: Send + Sync {
    fn validate(
        &self,
        component: &Component,
        transformed: &str,
        dialect: SourceDialect,
    ) -> ValidationReport;
}

/// Structural checks over the transformed text's syntax tree.
#[derive(Debug, Clone, Default)]
pub struct StructuralValidator;

impl StructuralValidator {
    pub fn new() -> Self {
        Self
    }
}

const SOURCE_FRAMEWORK_OBJECTS: &[&str] = &["cy", "Cypress"];
const TEST_CALLS: &[&str] = &["test", "test.only", "test.skip"];

#[derive(Default)]
struct Facts {
    residual: Vec<(String, usize)>,
    calls: BTreeSet<String>,
    defines_function: bool,
    uses_page: bool,
    has_await: bool,
}

impl Facts {
    fn collect(node: Node<'_>, source: &str, facts: &mut Facts) {
        match node.kind() {
            "member_expression" => {
                if let Some(object) = node.child_by_field_name("object") {
                    let object_text = syntax::text(object, source);
                    if object.kind() == "identifier" {
                        if SOURCE_FRAMEWORK_OBJECTS.contains(&object_text) {
                            let shown: String = syntax::text(node, source).chars().take(40).collect();
                            facts
                                .residual
                                .push((shown, node.start_position().row + 1));
                        } else if object_text == "page" {
                            facts.uses_page = true;
                        }
                    }
                }
            }
            "call_expression" => {
                if let Some(function) = node.child_by_field_name("function") {
                    facts.calls.insert(syntax::text(function, source).to_string());
                }
            }
            "await_expression" => facts.has_await = true,
            "function_declaration" | "function_expression" | "function" | "arrow_function"
            | "method_definition" | "generator_function_declaration" => {
                facts.defines_function = true
            }
            _ => {}
        }
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            Self::collect(child, source, facts);
        }
    }
}

impl Validator for StructuralValidator {
    fn validate(
        &self,
        component: &Component,
        transformed: &str,
        dialect: SourceDialect,
    ) -> ValidationReport {
        let id = component.id.clone();
        if transformed.trim().is_empty() {
            return ValidationReport::from_issues(
                id,
                vec![Issue::error(IssueKind::EmptyOutput, "transformed text is empty")],
            );
        }

        let tree = match syntax::parse(transformed, dialect) {
            Ok(tree) => tree,
            Err(e) => {
                return ValidationReport::from_issues(
                    id,
                    vec![Issue::error(IssueKind::SyntaxError, e.to_string())],
                )
            }
        };

        let mut issues = Vec::new();
        if let Err(DecompositionError::Malformed { reason, line, .. }) =
            syntax::check(&tree, transformed)
        {
            issues.push(
                Issue::error(IssueKind::SyntaxError, format!("does not parse: {}", reason))
                    .at_line(line),
            );
        }

        let mut facts = Facts::default();
        Facts::collect(tree.root_node(), transformed, &mut facts);

        for (expr, line) in &facts.residual {
            issues.push(
                Issue::error(
                    IssueKind::ResidualSourceCall,
                    format!("untranslated source-framework call `{}`", expr),
                )
                .at_line(*line),
            );
        }

        match component.role {
            ComponentRole::Test => {
                if !TEST_CALLS.iter().any(|c| facts.calls.contains(*c)) {
                    issues.push(Issue::error(
                        IssueKind::MissingTargetCall,
                        "expected a `test(...)` block",
                    ));
                }
            }
            ComponentRole::Hook(hook) => {
                if !facts.calls.contains(hook.target_call()) {
                    issues.push(Issue::error(
                        IssueKind::MissingTargetCall,
                        format!("expected a `{}(...)` hook", hook.target_call()),
                    ));
                }
            }
            ComponentRole::Command => {
                if !facts.defines_function {
                    issues.push(Issue::error(
                        IssueKind::MissingTargetCall,
                        "custom command translation defines no function",
                    ));
                }
            }
            ComponentRole::Statement => {}
        }

        if facts.uses_page && !facts.has_await {
            issues.push(Issue::warning(
                IssueKind::MissingAwait,
                "`page` is used but nothing is awaited",
            ));
        }

        ValidationReport::from_issues(id, issues)
    }
}
