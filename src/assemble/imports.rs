//! Import hoisting and merging.

use regex::Regex;
use std::sync::OnceLock;

fn import_statement() -> &'static Regex {
    static IMPORT: OnceLock<Regex> = OnceLock::new();
    IMPORT.get_or_init(|| {
        // `[^;'"]` spans newlines, so multi-line named imports match whole
        Regex::new(
            r#"(?m)^[ \t]*import\s+(?:(type)\s+)?(?:([^;'"]*?)\s*from\s*)?['"]([^'"]+)['"][ \t]*;?[ \t]*(?:\r?\n|$)"#,
        )
        .expect("import pattern is valid")
    })
}

/// One parsed `import` declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ImportDecl {
    pub module: String,
    pub type_only: bool,
    pub default: Option<String>,
    pub namespace: Option<String>,
    pub named: Vec<String>,
}

impl ImportDecl {
    fn parse(type_only: bool, clause: Option<&str>, module: &str) -> Self {
        let mut decl = Self {
            module: module.to_string(),
            type_only,
            default: None,
            namespace: None,
            named: Vec::new(),
        };
        let Some(clause) = clause.map(str::trim).filter(|c| !c.is_empty()) else {
            return decl;
        };

        let (head, braces) = match (clause.find('{'), clause.rfind('}')) {
            (Some(open), Some(close)) if open < close => {
                (&clause[..open], Some(&clause[open + 1..close]))
            }
            _ => (clause, None),
        };
        if let Some(inner) = braces {
            decl.named = inner
                .split(',')
                .map(|s| s.split_whitespace().collect::<Vec<_>>().join(" "))
                .filter(|s| !s.is_empty())
                .collect();
        }
        for part in head.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            match part.strip_prefix('*') {
                Some(rest) => {
                    let name = rest.trim().trim_start_matches("as").trim();
                    decl.namespace = Some(name.to_string());
                }
                None => decl.default = Some(part.to_string()),
            }
        }
        decl
    }

    pub fn is_side_effect(&self) -> bool {
        self.default.is_none() && self.namespace.is_none() && self.named.is_empty()
    }

    fn key(&self) -> (String, bool) {
        (self.module.clone(), self.type_only)
    }

    fn merge(&mut self, other: ImportDecl) {
        if self.default.is_none() {
            self.default = other.default;
        }
        if self.namespace.is_none() {
            self.namespace = other.namespace;
        }
        for name in other.named {
            if !self.named.contains(&name) {
                self.named.push(name);
            }
        }
    }

    /// Render as one or two statements (a namespace import cannot share a
    /// statement with named specifiers).
    pub fn render(&self) -> Vec<String> {
        let keyword = if self.type_only { "import type" } else { "import" };
        if self.is_side_effect() {
            return vec![format!("{} '{}';", keyword, self.module)];
        }

        let mut lines = Vec::new();
        let mut head: Vec<String> = Vec::new();
        if let Some(default) = &self.default {
            head.push(default.clone());
        }
        match (&self.namespace, self.named.is_empty()) {
            (Some(ns), true) => head.push(format!("* as {}", ns)),
            (Some(ns), false) => {
                lines.push(format!("{} * as {} from '{}';", keyword, ns, self.module));
                head.push(format!("{{ {} }}", self.named.join(", ")));
            }
            (None, false) => head.push(format!("{{ {} }}", self.named.join(", "))),
            (None, true) => {}
        }
        if !head.is_empty() {
            lines.insert(
                0,
                format!("{} {} from '{}';", keyword, head.join(", "), self.module),
            );
        }
        lines
    }
}

/// Split `text` into its import declarations and the remaining code.
pub(crate) fn hoist(text: &str) -> (Vec<ImportDecl>, String) {
    let mut decls = Vec::new();
    for caps in import_statement().captures_iter(text) {
        let module = caps.get(3).map(|m| m.as_str()).unwrap_or_default();
        decls.push(ImportDecl::parse(
            caps.get(1).is_some(),
            caps.get(2).map(|m| m.as_str()),
            module,
        ));
    }
    let rest = import_statement().replace_all(text, "");
    (decls, rest.trim_matches('\n').to_string())
}

/// Parse a single import statement.
pub(crate) fn parse_one(text: &str) -> Option<ImportDecl> {
    hoist(text).0.into_iter().next()
}

/// Ordered, de-duplicating set of imports; same-module declarations merge.
#[derive(Debug, Default)]
pub(crate) struct ImportSet {
    decls: Vec<ImportDecl>,
}

impl ImportSet {
    pub fn add(&mut self, decl: ImportDecl) {
        match self.decls.iter_mut().find(|d| d.key() == decl.key()) {
            Some(existing) => existing.merge(decl),
            None => self.decls.push(decl),
        }
    }

    pub fn render(&self) -> Vec<String> {
        self.decls.iter().flat_map(|d| d.render()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hoists_single_and_multi_line_imports() {
        let text = "import { test } from '@playwright/test';\nimport {\n  login,\n  logout\n} from './helpers';\n\ntest('a', async () => {});\n";
        let (decls, rest) = hoist(text);
        assert_eq!(decls.len(), 2);
        assert_eq!(decls[0].named, vec!["test"]);
        assert_eq!(decls[1].module, "./helpers");
        assert_eq!(decls[1].named, vec!["login", "logout"]);
        assert_eq!(rest, "test('a', async () => {});");
    }

    #[test]
    fn code_mentioning_import_is_left_alone() {
        let text = "test('imports', async () => {\n  const m = await import('./x');\n});";
        let (decls, rest) = hoist(text);
        assert!(decls.is_empty());
        assert_eq!(rest, text);
    }

    #[test]
    fn parses_default_namespace_and_side_effect() {
        let d = parse_one("import users, { admin as root } from '../fixtures/users';").unwrap();
        assert_eq!(d.default.as_deref(), Some("users"));
        assert_eq!(d.named, vec!["admin as root"]);

        let ns = parse_one("import * as path from 'path';").unwrap();
        assert_eq!(ns.namespace.as_deref(), Some("path"));

        let side = parse_one("import './setup';").unwrap();
        assert!(side.is_side_effect());
        assert_eq!(side.render(), vec!["import './setup';"]);
    }

    #[test]
    fn same_module_named_imports_merge() {
        let mut set = ImportSet::default();
        set.add(parse_one("import { test, expect } from '@playwright/test';").unwrap());
        set.add(parse_one("import { expect, type Page } from '@playwright/test';").unwrap());
        set.add(parse_one("import { test } from \"@playwright/test\"").unwrap());
        assert_eq!(
            set.render(),
            vec!["import { test, expect, type Page } from '@playwright/test';"]
        );
    }

    #[test]
    fn type_only_imports_stay_separate() {
        let mut set = ImportSet::default();
        set.add(parse_one("import { test } from '@playwright/test';").unwrap());
        set.add(parse_one("import type { Page } from '@playwright/test';").unwrap());
        assert_eq!(set.render().len(), 2);
    }

    #[test]
    fn namespace_with_named_renders_two_statements() {
        let mut set = ImportSet::default();
        set.add(parse_one("import * as fs from 'fs';").unwrap());
        set.add(parse_one("import { readFileSync } from 'fs';").unwrap());
        assert_eq!(
            set.render(),
            vec![
                "import { readFileSync } from 'fs';".to_string(),
                "import * as fs from 'fs';".to_string(),
            ]
        );
    }
}
