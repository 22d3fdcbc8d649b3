use crate::compiler::errors::{CompileError, CompileErrorKind};
use tree_sitter::{Parser, Tree};

/// Tree-sitter parser wrapper for the script language.
pub struct ScriptParser {
    parser: Parser,
}

impl ScriptParser {
    pub fn new() -> Result<Self, CompileError> {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_javascript::LANGUAGE.into())
            .map_err(|_| CompileError::global(CompileErrorKind::ParserInit))?;
        Ok(Self { parser })
    }

    /// Parse source code into a tree-sitter Tree.
    pub fn parse(&mut self, source: &str) -> Result<Tree, CompileError> {
        self.parser
            .parse(source, None)
            .ok_or_else(|| CompileError::global(CompileErrorKind::ParseFailed))
    }

    /// Parse source code and return the tree along with the source.
    pub fn parse_with_source<'a>(
        &mut self,
        source: &'a str,
    ) -> Result<ParsedSource<'a>, CompileError> {
        let tree = self.parse(source)?;
        Ok(ParsedSource { source, tree })
    }
}

/// A parsed script with its tree-sitter tree.
pub struct ParsedSource<'a> {
    pub source: &'a str,
    pub tree: Tree,
}

impl<'a> ParsedSource<'a> {
    pub fn root_node(&self) -> tree_sitter::Node<'_> {
        self.tree.root_node()
    }

    pub fn has_errors(&self) -> bool {
        self.tree.root_node().has_error()
    }

    /// The first ERROR or MISSING node in document order, as a compile error.
    pub fn first_error(&self) -> Option<CompileError> {
        if !self.has_errors() {
            return None;
        }
        find_error(self.tree.root_node()).map(|node| {
            let kind = if node.is_missing() {
                CompileErrorKind::Missing(node.kind().to_string())
            } else {
                CompileErrorKind::Syntax
            };
            CompileError::at(kind, node, self.source)
        })
    }

    pub fn node_text(&self, node: tree_sitter::Node<'_>) -> &'a str {
        &self.source[node.byte_range()]
    }
}

fn find_error(node: tree_sitter::Node<'_>) -> Option<tree_sitter::Node<'_>> {
    if node.is_error() || node.is_missing() {
        return Some(node);
    }
    if !node.has_error() {
        return None;
    }

    let mut cursor = node.walk();
    let children: Vec<_> = node.children(&mut cursor).collect();
    children.into_iter().find_map(find_error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_valid_script() {
        let mut parser = ScriptParser::new().unwrap();
        let parsed = parser
            .parse_with_source("function f() { return 1; } f();")
            .unwrap();

        assert!(!parsed.has_errors());
        assert_eq!(parsed.root_node().kind(), "program");
    }

    #[test]
    fn parse_invalid_script() {
        let mut parser = ScriptParser::new().unwrap();
        let parsed = parser.parse_with_source("function f( { return 1; }").unwrap();

        assert!(parsed.has_errors());
        let error = parsed.first_error().unwrap();
        assert_eq!(error.line, 1);
    }
}
