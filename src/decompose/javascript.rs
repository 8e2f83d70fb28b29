//! Cypress test file decomposer for JavaScript and TypeScript sources.
//!
//! Walks the program and every suite body in source order:
//! - `describe`/`context` with a function body → scope frame, body is walked
//! - `it`/`specify` → test block
//! - `before`/`beforeEach`/`after`/`afterEach` → hook block
//! - `Cypress.Commands.add|overwrite` → command (also listed as a custom command)
//! - `import` → recorded, not a component
//! - anything else → statement
//!
//! Leading comments are kept with the component that follows them, or with
//! the suite header when a suite follows. Comments closing a suite body or the
//! file become a statement of their own.

use super::syntax;
use super::{Decomposer, Decomposition, DecompositionError, SourceDialect};
use crate::component::{
    Component, ComponentKind, ComponentRole, CustomCommand, Hook, LineSpan, ScopeFrame,
    SourceImport,
};
use tree_sitter::Node;

const LABEL_WIDTH: usize = 60;

/// Decomposer backed by the tree-sitter JavaScript/TypeScript grammars.
#[derive(Debug, Clone, Copy, Default)]
pub struct JavaScriptDecomposer;

impl JavaScriptDecomposer {
    pub fn new() -> Self {
        Self
    }
}

impl Decomposer for JavaScriptDecomposer {
    fn decompose(
        &self,
        source: &str,
        dialect: SourceDialect,
    ) -> Result<Decomposition, DecompositionError> {
        let tree = syntax::parse(source, dialect)?;
        syntax::check(&tree, source)?;

        let mut walker = Walker {
            source,
            out: Decomposition::default(),
            suites: 0,
        };
        let mut scope = Vec::new();
        walker.walk_body(tree.root_node(), &mut scope);

        let mut decomposition = walker.out;
        link_dependencies(&mut decomposition);
        Ok(decomposition)
    }
}

/// How a call statement participates in decomposition.
enum CallShape {
    Suite(ScopeFrame),
    Test,
    Hook(Hook),
    Command,
    Other,
}

struct Walker<'s> {
    source: &'s str,
    out: Decomposition,
    /// Suites seen so far; gives every scope frame its own identity
    suites: usize,
}

impl<'s> Walker<'s> {
    fn walk_body(&mut self, container: Node<'_>, scope: &mut Vec<ScopeFrame>) {
        let mut cursor = container.walk();
        let children: Vec<Node<'_>> = container.named_children(&mut cursor).collect();

        // (start byte, 0-based row) of pending leading comments
        let mut leading: Option<(usize, usize)> = None;
        // (end byte, 0-based row) of the last pending comment
        let mut comment_end = (0, 0);

        for node in children {
            match node.kind() {
                "comment" => {
                    leading.get_or_insert((node.start_byte(), node.start_position().row));
                    comment_end = (node.end_byte(), node.end_position().row);
                    continue;
                }
                "empty_statement" => continue,
                "import_statement" => {
                    leading = None;
                    self.record_import(node);
                    continue;
                }
                _ => {}
            }

            let start = leading
                .take()
                .unwrap_or((node.start_byte(), node.start_position().row));

            let Some(call) = statement_call(node) else {
                self.push_statement(node, start, scope);
                continue;
            };

            match self.classify(call) {
                CallShape::Suite(mut frame) => match callback_body(call) {
                    Some(body) => {
                        frame = frame.with_index(self.suites);
                        self.suites += 1;
                        if start.0 < node.start_byte() {
                            let comment = self.source[start.0..node.start_byte()].trim_end();
                            frame = frame.with_leading_comment(dedent(comment));
                        }
                        scope.push(frame);
                        self.walk_body(body, scope);
                        scope.pop();
                    }
                    None => self.push_statement(node, start, scope),
                },
                CallShape::Test => {
                    let label = format!("{}({})", self.callee(call), self.title(call));
                    self.push(
                        ComponentKind::Block,
                        ComponentRole::Test,
                        label,
                        node,
                        start,
                        scope,
                    );
                }
                CallShape::Hook(hook) => {
                    let label = self.callee(call).to_string();
                    self.push(
                        ComponentKind::Block,
                        ComponentRole::Hook(hook),
                        label,
                        node,
                        start,
                        scope,
                    );
                }
                CallShape::Command => {
                    let name = unquote(&self.title(call)).to_string();
                    let label = format!("{}('{}')", self.callee(call), name);
                    let id = self.push(
                        ComponentKind::Command,
                        ComponentRole::Command,
                        label,
                        node,
                        start,
                        scope,
                    );
                    let params = self.callback_params(call);
                    self.out.custom_commands.push(CustomCommand {
                        name,
                        params,
                        component_id: id,
                        line: start.1 + 1,
                    });
                }
                CallShape::Other => self.push_statement(node, start, scope),
            }
        }

        if let Some(start) = leading {
            let text = &self.source[start.0..comment_end.0];
            let label = text.lines().next().unwrap_or("").trim().to_string();
            self.push_span(
                ComponentKind::Statement,
                ComponentRole::Statement,
                label,
                start,
                comment_end,
                scope,
            );
        }
    }

    fn classify(&self, call: Node<'_>) -> CallShape {
        let callee = self.callee(call);
        if callee == "Cypress.Commands.add" || callee == "Cypress.Commands.overwrite" {
            return CallShape::Command;
        }
        if let Some(hook) = Hook::from_callee(callee) {
            return CallShape::Hook(hook);
        }

        let (base, modifier) = match callee.split_once('.') {
            Some((base, modifier)) => (base, Some(modifier)),
            None => (callee, None),
        };
        match base {
            "describe" | "context" => {
                let mut frame = ScopeFrame::new(self.title(call));
                if let Some(m) = modifier {
                    frame = frame.with_modifier(m);
                }
                CallShape::Suite(frame)
            }
            "it" | "specify" => CallShape::Test,
            _ => CallShape::Other,
        }
    }

    fn callee(&self, call: Node<'_>) -> &'s str {
        call.child_by_field_name("function")
            .map(|f| syntax::text(f, self.source).trim())
            .unwrap_or("")
    }

    /// First argument as written (the suite/test title or command name).
    fn title(&self, call: Node<'_>) -> String {
        arguments(call)
            .into_iter()
            .next()
            .map(|arg| syntax::text(arg, self.source).to_string())
            .unwrap_or_default()
    }

    fn callback_params(&self, call: Node<'_>) -> Vec<String> {
        let Some(callback) = callback(call) else {
            return Vec::new();
        };
        if let Some(single) = callback.child_by_field_name("parameter") {
            return vec![syntax::text(single, self.source).to_string()];
        }
        let Some(params) = callback.child_by_field_name("parameters") else {
            return Vec::new();
        };
        let mut cursor = params.walk();
        params
            .named_children(&mut cursor)
            .filter(|p| p.kind() != "comment")
            .map(|p| syntax::text(p, self.source).to_string())
            .collect()
    }

    fn push_statement(&mut self, node: Node<'_>, start: (usize, usize), scope: &[ScopeFrame]) {
        let text = syntax::text(node, self.source);
        let first_line = text.lines().next().unwrap_or("").trim();
        let label = if first_line.chars().count() > LABEL_WIDTH {
            let cut: String = first_line.chars().take(LABEL_WIDTH).collect();
            format!("{}…", cut)
        } else {
            first_line.to_string()
        };
        self.push(
            ComponentKind::Statement,
            ComponentRole::Statement,
            label,
            node,
            start,
            scope,
        );
    }

    fn push(
        &mut self,
        kind: ComponentKind,
        role: ComponentRole,
        label: String,
        node: Node<'_>,
        start: (usize, usize),
        scope: &[ScopeFrame],
    ) -> crate::component::ComponentId {
        let end = (node.end_byte(), node.end_position().row);
        self.push_span(kind, role, label, start, end, scope)
    }

    /// Push the source between `start` and `end`, both (byte, 0-based row).
    fn push_span(
        &mut self,
        kind: ComponentKind,
        role: ComponentRole,
        label: String,
        start: (usize, usize),
        end: (usize, usize),
        scope: &[ScopeFrame],
    ) -> crate::component::ComponentId {
        let order = self.out.components.len();
        let text = &self.source[start.0..end.0];
        let component = Component::new(kind, role, order, text)
            .with_label(label)
            .with_scope(scope.to_vec())
            .with_span(LineSpan {
                start: start.1 + 1,
                end: end.1 + 1,
            });
        let id = component.id.clone();
        self.out.components.push(component);
        id
    }

    fn record_import(&mut self, node: Node<'_>) {
        let module = node
            .child_by_field_name("source")
            .map(|s| unquote(syntax::text(s, self.source)).to_string())
            .unwrap_or_default();
        self.out.imports.push(SourceImport {
            module,
            text: syntax::text(node, self.source).to_string(),
            line: node.start_position().row + 1,
        });
    }
}

/// The call expression of an expression statement, if that is what it is.
fn statement_call(node: Node<'_>) -> Option<Node<'_>> {
    if node.kind() != "expression_statement" {
        return None;
    }
    let mut cursor = node.walk();
    let expr = node.named_children(&mut cursor).next()?;
    (expr.kind() == "call_expression").then_some(expr)
}

fn arguments(call: Node<'_>) -> Vec<Node<'_>> {
    let Some(args) = call.child_by_field_name("arguments") else {
        return Vec::new();
    };
    let mut cursor = args.walk();
    args.named_children(&mut cursor)
        .filter(|a| a.kind() != "comment")
        .collect()
}

/// The last function-valued argument of a call.
fn callback(call: Node<'_>) -> Option<Node<'_>> {
    arguments(call).into_iter().rev().find(|a| {
        matches!(
            a.kind(),
            "arrow_function" | "function_expression" | "function"
        )
    })
}

/// Statement block body of the call's callback.
fn callback_body(call: Node<'_>) -> Option<Node<'_>> {
    let body = callback(call)?.child_by_field_name("body")?;
    (body.kind() == "statement_block").then_some(body)
}

/// Strip the indentation of a comment block cut from a nested position.
fn dedent(comment: &str) -> String {
    comment
        .lines()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n")
}

fn unquote(s: &str) -> &str {
    s.trim()
        .trim_matches(|c| c == '\'' || c == '"' || c == '`')
}

/// Fill in the informational dependency sets.
///
/// A component calling `cy.<name>(` depends on the command declaring `<name>`;
/// a test depends on every hook whose scope encloses it.
fn link_dependencies(decomposition: &mut Decomposition) {
    let hooks: Vec<_> = decomposition
        .components
        .iter()
        .filter(|c| matches!(c.role, ComponentRole::Hook(_)))
        .map(|c| (c.id.clone(), c.scope.clone()))
        .collect();
    let commands: Vec<_> = decomposition
        .custom_commands
        .iter()
        .map(|c| (c.component_id.clone(), format!("cy.{}(", c.name)))
        .collect();

    for component in &mut decomposition.components {
        for (command_id, call) in &commands {
            if *command_id != component.id && component.source_text.contains(call.as_str()) {
                component.dependencies.insert(command_id.clone());
            }
        }
        if component.role == ComponentRole::Test {
            for (hook_id, hook_scope) in &hooks {
                if component.scope.starts_with(hook_scope) {
                    component.dependencies.insert(hook_id.clone());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPEC: &str = r#"/// <reference types="cypress" />
import { users } from '../fixtures/users';
import 'cypress-file-upload';

Cypress.Commands.add('login', (email, password) => {
  cy.get('#email').type(email);
  cy.get('#password').type(password);
});

describe('Login page', () => {
  beforeEach(() => {
    cy.visit('/login');
  });

  // happy path
  it('logs in', () => {
    cy.login(users[0].email, 'secret');
    cy.url().should('include', '/home');
  });

  context.only('with bad input', () => {
    it('shows an error', () => {
      cy.get('button').click();
    });
  });
});

const timeout = 1000;
"#;

    fn decompose(src: &str) -> Decomposition {
        JavaScriptDecomposer::new()
            .decompose(src, SourceDialect::JavaScript)
            .unwrap()
    }

    #[test]
    fn components_follow_source_order() {
        let d = decompose(SPEC);
        let roles: Vec<_> = d.components.iter().map(|c| c.role).collect();
        assert_eq!(
            roles,
            vec![
                ComponentRole::Command,
                ComponentRole::Hook(Hook::BeforeEach),
                ComponentRole::Test,
                ComponentRole::Test,
                ComponentRole::Statement,
            ]
        );
        for (i, c) in d.components.iter().enumerate() {
            assert_eq!(c.order, i);
        }
    }

    #[test]
    fn suites_become_scope_frames() {
        let d = decompose(SPEC);
        let nested = &d.components[3];
        assert_eq!(nested.scope.len(), 2);
        assert_eq!(nested.scope[0].title, "'Login page'");
        assert_eq!(nested.scope[1].title, "'with bad input'");
        assert_eq!(nested.scope[1].modifier.as_deref(), Some("only"));
        assert!(d.components[4].scope.is_empty());
    }

    #[test]
    fn custom_commands_are_surfaced() {
        let d = decompose(SPEC);
        assert_eq!(d.custom_commands.len(), 1);
        let cmd = &d.custom_commands[0];
        assert_eq!(cmd.name, "login");
        assert_eq!(cmd.params, vec!["email".to_string(), "password".to_string()]);
        assert_eq!(cmd.component_id, d.components[0].id);
    }

    #[test]
    fn imports_are_recorded_not_componentized() {
        let d = decompose(SPEC);
        let modules: Vec<_> = d.imports.iter().map(|i| i.module.as_str()).collect();
        assert_eq!(modules, vec!["../fixtures/users", "cypress-file-upload"]);
        assert!(d
            .components
            .iter()
            .all(|c| !c.source_text.starts_with("import")));
    }

    #[test]
    fn leading_comments_stay_with_their_component() {
        let d = decompose(SPEC);
        let test = &d.components[2];
        assert!(test.source_text.starts_with("// happy path"));
        assert_eq!(test.label, "it('logs in')");
    }

    #[test]
    fn dependencies_link_commands_and_hooks() {
        let d = decompose(SPEC);
        let command = d.components[0].id.clone();
        let hook = d.components[1].id.clone();
        assert!(d.components[2].dependencies.contains(&command));
        assert!(d.components[2].dependencies.contains(&hook));
        assert!(d.components[3].dependencies.contains(&hook));
        assert!(!d.components[3].dependencies.contains(&command));
    }

    #[test]
    fn malformed_input_fails_with_locator() {
        let err = JavaScriptDecomposer::new()
            .decompose("describe('x', () => {\n  it('y', () => {\n", SourceDialect::JavaScript)
            .unwrap_err();
        assert!(matches!(err, DecompositionError::Malformed { .. }));
    }

    #[test]
    fn empty_input_yields_no_components() {
        let d = decompose("");
        assert!(d.is_empty());
    }

    #[test]
    fn sibling_suites_with_one_title_get_distinct_frames() {
        let src = "describe('cart', () => {\n  it('one', () => {});\n});\n\ndescribe('cart', () => {\n  beforeEach(() => {});\n  it('two', () => {});\n});\n";
        let d = decompose(src);
        assert_eq!(d.components.len(), 3);
        let (one, hook, two) = (&d.components[0], &d.components[1], &d.components[2]);
        assert_eq!(one.scope[0].title, two.scope[0].title);
        assert_ne!(one.scope, two.scope);
        assert_eq!(hook.scope, two.scope);
        assert!(two.dependencies.contains(&hook.id));
        assert!(!one.dependencies.contains(&hook.id));
    }

    #[test]
    fn comments_above_a_suite_go_to_its_frame() {
        let src = "// Checkout flows, see JIRA-12\n  // second line\ndescribe('cart', () => {\n  it('one', () => {});\n});\n";
        let d = decompose(src);
        assert_eq!(d.components.len(), 1);
        assert_eq!(
            d.components[0].scope[0].leading_comment.as_deref(),
            Some("// Checkout flows, see JIRA-12\n// second line")
        );
        assert!(!d.components[0].source_text.contains("JIRA-12"));
    }

    #[test]
    fn trailing_comments_become_statements() {
        let src = "describe('cart', () => {\n  it('one', () => {});\n  // end of cart\n});\n// trailing note\n";
        let d = decompose(src);
        assert_eq!(d.components.len(), 3);

        let inner = &d.components[1];
        assert_eq!(inner.role, ComponentRole::Statement);
        assert_eq!(inner.source_text, "// end of cart");
        assert_eq!(inner.scope.len(), 1);

        let outer = &d.components[2];
        assert_eq!(outer.role, ComponentRole::Statement);
        assert_eq!(outer.source_text, "// trailing note");
        assert!(outer.scope.is_empty());
        assert_eq!(outer.span.start, 5);
    }
}
