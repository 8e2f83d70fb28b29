//! Thin tree-sitter helpers shared by the decomposer and the validator.

use super::{DecompositionError, SourceDialect};
use tree_sitter::{Language, Node, Parser, Tree};

fn language(dialect: SourceDialect) -> Language {
    match dialect {
        SourceDialect::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
        SourceDialect::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
    }
}

/// Parse `source` into a syntax tree. The tree may still contain error nodes.
pub(crate) fn parse(source: &str, dialect: SourceDialect) -> Result<Tree, DecompositionError> {
    let mut parser = Parser::new();
    parser
        .set_language(&language(dialect))
        .map_err(|e| DecompositionError::ParserUnavailable(e.to_string()))?;
    parser.parse(source, None).ok_or(DecompositionError::NoTree)
}

/// Depth-first search for the first error or missing node.
pub(crate) fn first_error(node: Node<'_>) -> Option<Node<'_>> {
    if !node.has_error() {
        return None;
    }
    if node.is_error() || node.is_missing() {
        return Some(node);
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if let Some(found) = first_error(child) {
            return Some(found);
        }
    }
    Some(node)
}

/// Describe the first syntax problem of a tree as a `Malformed` error.
pub(crate) fn check(tree: &Tree, source: &str) -> Result<(), DecompositionError> {
    let Some(node) = first_error(tree.root_node()) else {
        return Ok(());
    };
    let position = node.start_position();
    let reason = if node.is_missing() {
        format!("missing `{}`", node.kind())
    } else {
        let text = node.utf8_text(source.as_bytes()).unwrap_or("");
        let snippet: String = text.chars().take(24).collect();
        format!("unexpected `{}`", snippet.trim())
    };
    Err(DecompositionError::Malformed {
        reason,
        line: position.row + 1,
        column: position.column + 1,
    })
}

/// Source text of a node.
pub(crate) fn text<'a>(node: Node<'_>, source: &'a str) -> &'a str {
    &source[node.byte_range()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_formed_source_passes() {
        let src = "describe('a', () => { it('b', () => {}) })\n";
        let tree = parse(src, SourceDialect::JavaScript).unwrap();
        assert!(check(&tree, src).is_ok());
    }

    #[test]
    fn unbalanced_braces_are_malformed() {
        let src = "describe('a', () => {\n  it('b', () => {\n";
        let tree = parse(src, SourceDialect::JavaScript).unwrap();
        let err = check(&tree, src).unwrap_err();
        assert!(matches!(err, DecompositionError::Malformed { .. }));
        assert!(err.location().is_some());
    }

    #[test]
    fn typescript_annotations_parse() {
        let src = "const user: string = 'a';\n";
        let tree = parse(src, SourceDialect::TypeScript).unwrap();
        assert!(check(&tree, src).is_ok());
    }
}
