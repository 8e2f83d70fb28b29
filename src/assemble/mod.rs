//! Assembler
//!
//! Reinserts every component's final text at its `order` position, rebuilds
//! the suite hierarchy from the components' scope frames and synthesizes the
//! import block once. A component without usable output becomes a commented
//! stub, so every component occupies exactly one slot and the artifact still
//! parses.

mod imports;

use crate::component::{Component, ComponentId, ScopeFrame, SourceImport};
use imports::{ImportSet, hoist, parse_one};
use serde::{Deserialize, Serialize};

/// Target-framework layout conventions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutHints {
    /// Boilerplate import emitted once at the top
    pub framework_import: String,
    /// Call that opens a suite group, e.g. `test.describe`
    pub group_call: String,
    pub indent: String,
    /// Marker on the first line of every stub
    pub stub_marker: String,
    /// Source-framework modules whose imports are dropped (`<name>` and `<name>-*`)
    pub source_framework_modules: Vec<String>,
}

impl LayoutHints {
    pub fn playwright() -> Self {
        Self {
            framework_import: "import { test, expect } from '@playwright/test';".to_string(),
            group_call: "test.describe".to_string(),
            indent: "  ".to_string(),
            stub_marker: "TESTPORT-STUB".to_string(),
            source_framework_modules: vec!["cypress".to_string()],
        }
    }

    fn is_source_framework(&self, module: &str) -> bool {
        self.source_framework_modules.iter().any(|name| {
            module == name
                || module
                    .strip_prefix(name.as_str())
                    .is_some_and(|rest| rest.starts_with('-') || rest.starts_with('/'))
        })
    }
}

impl Default for LayoutHints {
    fn default() -> Self {
        Self::playwright()
    }
}

/// What a component contributes to the artifact.
#[derive(Debug, Clone, PartialEq)]
pub enum Placement {
    /// Final transformed text
    Converted(String),
    /// No usable output; rendered as a stub carrying the reason and issues
    Stub { reason: String, issues: Vec<String> },
}

/// One component together with its placement.
#[derive(Debug, Clone)]
pub struct AssemblyPart<'a> {
    pub component: &'a Component,
    pub placement: Placement,
}

/// The reassembled output file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub text: String,
    /// Import statements at the top of `text`, in order
    pub imports: Vec<String>,
    /// Component ids in placement order
    pub placements: Vec<ComponentId>,
    pub stub_count: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Assembler {
    hints: LayoutHints,
}

impl Assembler {
    pub fn new(hints: LayoutHints) -> Self {
        Self { hints }
    }

    pub fn hints(&self) -> &LayoutHints {
        &self.hints
    }

    pub fn assemble(&self, mut parts: Vec<AssemblyPart<'_>>, source_imports: &[SourceImport]) -> Artifact {
        parts.sort_by_key(|p| p.component.order);

        let mut imports = ImportSet::default();
        let mut raw_imports: Vec<String> = Vec::new();
        if let Some(decl) = parse_one(&self.hints.framework_import) {
            imports.add(decl);
        }
        for import in source_imports {
            if self.hints.is_source_framework(&import.module) {
                continue;
            }
            match parse_one(&import.text) {
                Some(decl) => imports.add(decl),
                None => raw_imports.push(import.text.clone()),
            }
        }

        let mut body = Body::new(&self.hints);
        let mut placements = Vec::with_capacity(parts.len());
        let mut stub_count = 0;
        for part in &parts {
            body.enter(&part.component.scope);
            let text = match &part.placement {
                Placement::Converted(text) => {
                    let (decls, rest) = hoist(text);
                    for decl in decls {
                        if !self.hints.is_source_framework(&decl.module) {
                            imports.add(decl);
                        }
                    }
                    dedent_tail(&rest)
                }
                Placement::Stub { reason, issues } => {
                    stub_count += 1;
                    self.stub(part.component, reason, issues)
                }
            };
            body.push_block(&text);
            placements.push(part.component.id.clone());
        }
        body.enter(&[]);

        let mut import_lines = imports.render();
        import_lines.extend(raw_imports);

        let mut text = import_lines.join("\n");
        if !body.lines.is_empty() {
            text.push_str("\n\n");
            text.push_str(&body.lines.join("\n"));
        }
        text.push('\n');

        tracing::debug!(
            components = placements.len(),
            stubs = stub_count,
            imports = import_lines.len(),
            "artifact assembled"
        );

        Artifact {
            text,
            imports: import_lines,
            placements,
            stub_count,
        }
    }

    /// Commented-out placeholder for a component without usable output.
    fn stub(&self, component: &Component, reason: &str, issues: &[String]) -> String {
        let one_line = |s: &str| s.split_whitespace().collect::<Vec<_>>().join(" ");
        let mut lines = vec![format!(
            "// {} {} {}: {}",
            self.hints.stub_marker,
            component.id,
            one_line(&component.label),
            one_line(reason)
        )];
        for issue in issues {
            lines.push(format!("// issue: {}", one_line(issue)));
        }
        for line in dedent_tail(&component.source_text).lines() {
            if line.is_empty() {
                lines.push("//".to_string());
            } else {
                lines.push(format!("// {}", line));
            }
        }
        lines.join("\n")
    }
}

/// Output lines plus the currently open suite frames.
struct Body<'h> {
    hints: &'h LayoutHints,
    open: Vec<ScopeFrame>,
    lines: Vec<String>,
}

impl<'h> Body<'h> {
    fn new(hints: &'h LayoutHints) -> Self {
        Self {
            hints,
            open: Vec::new(),
            lines: Vec::new(),
        }
    }

    fn indent(&self, depth: usize) -> String {
        self.hints.indent.repeat(depth)
    }

    /// Blank line between siblings, not right after an opening brace.
    fn gap(&mut self) {
        if let Some(last) = self.lines.last() {
            if !last.is_empty() && !last.ends_with('{') {
                self.lines.push(String::new());
            }
        }
    }

    /// Close and open group wrappers until `scope` is the open scope.
    fn enter(&mut self, scope: &[ScopeFrame]) {
        let common = self
            .open
            .iter()
            .zip(scope)
            .take_while(|(a, b)| a == b)
            .count();
        while self.open.len() > common {
            self.open.pop();
            let line = format!("{}}});", self.indent(self.open.len()));
            self.lines.push(line);
        }
        for frame in &scope[common..] {
            self.gap();
            let call = match &frame.modifier {
                Some(modifier) => format!("{}.{}", self.hints.group_call, modifier),
                None => self.hints.group_call.clone(),
            };
            let indent = self.indent(self.open.len());
            if let Some(comment) = &frame.leading_comment {
                for line in comment.lines() {
                    self.lines.push(format!("{}{}", indent, line));
                }
            }
            self.lines.push(format!("{}{}({}, () => {{", indent, call, frame.title));
            self.open.push(frame.clone());
        }
    }

    fn push_block(&mut self, text: &str) {
        self.gap();
        let indent = self.indent(self.open.len());
        for line in text.lines() {
            if line.trim().is_empty() {
                self.lines.push(String::new());
            } else {
                self.lines.push(format!("{}{}", indent, line));
            }
        }
    }
}

/// Remove the indentation shared by every line after the first.
///
/// Source text cut from a nested position starts at column 0 on its first
/// line but keeps the original indentation on the rest. Indentation is
/// counted in characters; any Unicode whitespace counts as one column.
fn dedent_tail(text: &str) -> String {
    let text = text.trim_matches('\n');
    let mut lines = text.lines();
    let Some(first) = lines.next() else {
        return String::new();
    };
    let rest: Vec<&str> = lines.collect();
    let shared = rest
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.chars().take_while(|c| c.is_whitespace()).count())
        .min()
        .unwrap_or(0);

    let mut out = vec![first.trim_end().to_string()];
    for line in rest {
        if line.trim().is_empty() {
            out.push(String::new());
        } else {
            let cut = line
                .char_indices()
                .nth(shared)
                .map_or(line.len(), |(i, _)| i);
            out.push(line[cut..].trim_end().to_string());
        }
    }
    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{ComponentKind, ComponentRole, Hook};

    fn block(order: usize, role: ComponentRole, text: &str, scope: Vec<ScopeFrame>) -> Component {
        Component::new(ComponentKind::Block, role, order, text).with_scope(scope)
    }

    fn converted<'a>(component: &'a Component, text: &str) -> AssemblyPart<'a> {
        AssemblyPart {
            component,
            placement: Placement::Converted(text.to_string()),
        }
    }

    #[test]
    fn rebuilds_suite_hierarchy_in_order() {
        let outer = ScopeFrame::new("'Login'");
        let inner = ScopeFrame::new("'errors'").with_modifier("only");
        let hook = block(0, ComponentRole::Hook(Hook::BeforeEach), "beforeEach(() => {})", vec![outer.clone()]);
        let t1 = block(1, ComponentRole::Test, "it('a', () => {})", vec![outer.clone()]);
        let t2 = block(2, ComponentRole::Test, "it('b', () => {})", vec![outer.clone(), inner]);

        // Deliberately out of order
        let parts = vec![
            converted(&t2, "test('b', async ({ page }) => {\n  await page.click('button');\n});"),
            converted(&hook, "test.beforeEach(async ({ page }) => {\n  await page.goto('/login');\n});"),
            converted(&t1, "test('a', async () => {});"),
        ];
        let artifact = Assembler::default().assemble(parts, &[]);

        let expected = "\
import { test, expect } from '@playwright/test';

test.describe('Login', () => {
  test.beforeEach(async ({ page }) => {
    await page.goto('/login');
  });

  test('a', async () => {});

  test.describe.only('errors', () => {
    test('b', async ({ page }) => {
      await page.click('button');
    });
  });
});
";
        assert_eq!(artifact.text, expected);
        assert_eq!(
            artifact.placements,
            vec![hook.id.clone(), t1.id.clone(), t2.id.clone()]
        );
        assert_eq!(artifact.stub_count, 0);
    }

    #[test]
    fn failed_components_become_commented_stubs() {
        let t = block(
            0,
            ComponentRole::Test,
            "it('x', () => {\n      cy.visit('/');\n    });",
            vec![],
        )
        .with_label("it('x')");
        let parts = vec![AssemblyPart {
            component: &t,
            placement: Placement::Stub {
                reason: "oracle rejected input: unsupported".to_string(),
                issues: vec!["error: untranslated `cy.visit`".to_string()],
            },
        }];
        let artifact = Assembler::default().assemble(parts, &[]);

        assert_eq!(artifact.stub_count, 1);
        assert!(artifact
            .text
            .contains("// TESTPORT-STUB block-0 it('x'): oracle rejected input: unsupported"));
        assert!(artifact.text.contains("// issue: error: untranslated `cy.visit`"));
        assert!(artifact.text.contains("//   cy.visit('/');\n// });"));
        for line in artifact.text.lines().skip(2) {
            assert!(line.starts_with("//"), "uncommented stub line: {}", line);
        }
    }

    #[test]
    fn imports_are_hoisted_merged_and_filtered() {
        let t = block(0, ComponentRole::Test, "it('a', () => {})", vec![]);
        let parts = vec![converted(
            &t,
            "import { test, type Page } from '@playwright/test';\nimport { login } from './support/login';\n\ntest('a', async () => {});",
        )];
        let source_imports = vec![
            SourceImport {
                module: "../fixtures/users".to_string(),
                text: "import { users } from '../fixtures/users';".to_string(),
                line: 1,
            },
            SourceImport {
                module: "cypress-file-upload".to_string(),
                text: "import 'cypress-file-upload';".to_string(),
                line: 2,
            },
        ];
        let artifact = Assembler::default().assemble(parts, &source_imports);

        assert_eq!(
            artifact.imports,
            vec![
                "import { test, expect, type Page } from '@playwright/test';".to_string(),
                "import { users } from '../fixtures/users';".to_string(),
                "import { login } from './support/login';".to_string(),
            ]
        );
        assert!(!artifact.text.contains("cypress-file-upload"));
        assert!(artifact.text.ends_with("test('a', async () => {});\n"));
    }

    #[test]
    fn source_framework_detection() {
        let hints = LayoutHints::playwright();
        assert!(hints.is_source_framework("cypress"));
        assert!(hints.is_source_framework("cypress-real-events"));
        assert!(hints.is_source_framework("cypress/types"));
        assert!(!hints.is_source_framework("cypress_helpers_local"));
        assert!(!hints.is_source_framework("@playwright/test"));
    }

    #[test]
    fn dedent_tail_normalizes_nested_source() {
        assert_eq!(
            dedent_tail("it('x', () => {\n      a();\n    });"),
            "it('x', () => {\n  a();\n});"
        );
        assert_eq!(dedent_tail("single line"), "single line");
    }

    #[test]
    fn empty_input_yields_only_boilerplate() {
        let artifact = Assembler::default().assemble(Vec::new(), &[]);
        assert_eq!(artifact.text, "import { test, expect } from '@playwright/test';\n");
        assert!(artifact.placements.is_empty());
    }

    #[test]
    fn dedent_tail_counts_unicode_whitespace_as_columns() {
        // U+00A0 is two bytes in UTF-8 but one column
        let text = "test('x', async ({ page }) => {\n\u{a0}\u{a0}await page.goto('/');\n   await page.goto('/x'); });";
        assert_eq!(
            dedent_tail(text),
            "test('x', async ({ page }) => {\nawait page.goto('/');\n await page.goto('/x'); });"
        );
    }

    #[test]
    fn stub_of_nbsp_indented_source_assembles() {
        let t = block(0, ComponentRole::Test, "it('x', () => {\n\u{a0}\u{a0}cy.visit('/');\n   });", vec![]);
        let parts = vec![AssemblyPart {
            component: &t,
            placement: Placement::Stub {
                reason: "refused".to_string(),
                issues: Vec::new(),
            },
        }];
        let artifact = Assembler::default().assemble(parts, &[]);
        assert_eq!(artifact.stub_count, 1);
        assert!(artifact.text.contains("// cy.visit('/');"));
    }

    #[test]
    fn sibling_suites_with_the_same_title_stay_apart() {
        let first = ScopeFrame::new("'cart'").with_index(0);
        let second = ScopeFrame::new("'cart'").with_index(1);
        let one = block(0, ComponentRole::Test, "it('one', () => {})", vec![first]);
        let hook = block(1, ComponentRole::Hook(Hook::BeforeEach), "beforeEach(() => {})", vec![second.clone()]);
        let two = block(2, ComponentRole::Test, "it('two', () => {})", vec![second]);
        let parts = vec![
            converted(&one, "test('one', async () => {});"),
            converted(&hook, "test.beforeEach(async () => {});"),
            converted(&two, "test('two', async () => {});"),
        ];
        let artifact = Assembler::default().assemble(parts, &[]);

        let expected = "\
import { test, expect } from '@playwright/test';

test.describe('cart', () => {
  test('one', async () => {});
});

test.describe('cart', () => {
  test.beforeEach(async () => {});

  test('two', async () => {});
});
";
        assert_eq!(artifact.text, expected);
    }

    #[test]
    fn suite_comments_precede_the_group_call() {
        let frame = ScopeFrame::new("'cart'").with_leading_comment("// Checkout flows\n// see JIRA-12");
        let t = block(0, ComponentRole::Test, "it('a', () => {})", vec![frame]);
        let artifact = Assembler::default().assemble(vec![converted(&t, "test('a', async () => {});")], &[]);
        assert!(artifact
            .text
            .contains("// Checkout flows\n// see JIRA-12\ntest.describe('cart', () => {"));
    }
}
