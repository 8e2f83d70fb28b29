//! Component data model
//!
//! A component is one independently transformable unit extracted from a
//! source file. Components are produced once by decomposition and are
//! immutable afterwards; everything downstream refers to them by id.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Deterministic component identifier (`<kind>-<order>`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComponentId(String);

impl ComponentId {
    pub fn new(kind: ComponentKind, order: usize) -> Self {
        Self(format!("{}-{}", kind.as_str(), order))
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Structural kind of a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    /// A callback-bodied unit such as a test or a hook
    Block,
    /// Any other top-level or suite-level statement
    Statement,
    /// A custom command declaration
    Command,
}

impl ComponentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Block => "block",
            Self::Statement => "statement",
            Self::Command => "command",
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle hook declared inside a suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Hook {
    Before,
    BeforeEach,
    After,
    AfterEach,
}

impl Hook {
    /// Recognize a hook from the callee name used in the source file.
    pub fn from_callee(name: &str) -> Option<Self> {
        match name {
            "before" => Some(Self::Before),
            "beforeEach" => Some(Self::BeforeEach),
            "after" => Some(Self::After),
            "afterEach" => Some(Self::AfterEach),
            _ => None,
        }
    }

    /// The call a translated hook is expected to contain.
    pub fn target_call(&self) -> &'static str {
        match self {
            Self::Before => "test.beforeAll",
            Self::BeforeEach => "test.beforeEach",
            Self::After => "test.afterAll",
            Self::AfterEach => "test.afterEach",
        }
    }
}

/// What a component does in the test file. Selects the stage instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentRole {
    Test,
    Hook(Hook),
    Statement,
    Command,
}

impl ComponentRole {
    /// Stable identifier of the instruction set the oracle is given for this role.
    pub fn instructions(&self) -> &'static str {
        match self {
            Self::Test => "translate-test",
            Self::Hook(_) => "translate-hook",
            Self::Statement => "translate-statement",
            Self::Command => "translate-custom-command",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Test => "test",
            Self::Hook(_) => "hook",
            Self::Statement => "statement",
            Self::Command => "command",
        }
    }
}

/// One enclosing suite (`describe`/`context`) of a component.
///
/// Frames are equal only when they come from the same suite: two sibling
/// suites with the same title differ in `index`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopeFrame {
    /// Title argument exactly as written in the source (quotes included)
    pub title: String,
    /// Suite modifier such as `only` or `skip`
    pub modifier: Option<String>,
    /// Position of the suite among all suites of the file, in source order
    #[serde(default)]
    pub index: usize,
    /// Comments written directly above the suite
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leading_comment: Option<String>,
}

impl ScopeFrame {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            modifier: None,
            index: 0,
            leading_comment: None,
        }
    }

    pub fn with_modifier(mut self, modifier: impl Into<String>) -> Self {
        self.modifier = Some(modifier.into());
        self
    }

    pub fn with_index(mut self, index: usize) -> Self {
        self.index = index;
        self
    }

    pub fn with_leading_comment(mut self, comment: impl Into<String>) -> Self {
        self.leading_comment = Some(comment.into());
        self
    }
}

/// 1-based inclusive line range in the input file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineSpan {
    pub start: usize,
    pub end: usize,
}

/// An independently transformable unit of a source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub id: ComponentId,
    pub kind: ComponentKind,
    pub role: ComponentRole,
    /// Short human-readable name, e.g. `it('logs in')`
    pub label: String,
    pub source_text: String,
    /// Informational only; components are transformed independently
    pub dependencies: BTreeSet<ComponentId>,
    /// Reinsertion position in the assembled output
    pub order: usize,
    /// Enclosing suites, outermost first
    pub scope: Vec<ScopeFrame>,
    pub span: LineSpan,
}

impl Component {
    pub fn new(
        kind: ComponentKind,
        role: ComponentRole,
        order: usize,
        source_text: impl Into<String>,
    ) -> Self {
        let source_text = source_text.into();
        let lines = source_text.lines().count().max(1);
        Self {
            id: ComponentId::new(kind, order),
            kind,
            role,
            label: format!("{} #{}", kind, order),
            source_text,
            dependencies: BTreeSet::new(),
            order,
            scope: Vec::new(),
            span: LineSpan {
                start: 1,
                end: lines,
            },
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_scope(mut self, scope: Vec<ScopeFrame>) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_span(mut self, span: LineSpan) -> Self {
        self.span = span;
        self
    }

    pub fn depends_on(mut self, id: ComponentId) -> Self {
        self.dependencies.insert(id);
        self
    }
}

/// A custom command declared outside the standard grammar
/// (`Cypress.Commands.add('login', (user) => { ... })`).
///
/// Surfaced alongside the components because translating calls to it needs
/// special handling in the stage instructions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomCommand {
    pub name: String,
    pub params: Vec<String>,
    pub component_id: ComponentId,
    pub line: usize,
}

/// An `import` statement found in the source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceImport {
    /// Module specifier without quotes
    pub module: String,
    pub text: String,
    pub line: usize,
}
