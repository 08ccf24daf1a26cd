pub mod code_parser;

pub use code_parser::CodeParser;

use sha2::{Digest, Sha256};

/// Content address for change detection (hex SHA-256)
pub fn hash_content(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// A `def` found in a source file, with its exact text
#[derive(Debug, Clone, PartialEq)]
pub struct MethodDefinition {
    pub name: String,
    /// Fully-qualified name of the enclosing class or module
    pub owner: Option<String>,
    /// `def self.name`
    pub singleton: bool,
    pub start_line: usize,
    pub end_line: usize,
    pub source: String,
}

/// Kind of a constant declaration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclarationKind {
    Class,
    Module,
}

/// A `class` or `module` declaration
#[derive(Debug, Clone, PartialEq)]
pub struct ClassDeclaration {
    pub kind: DeclarationKind,
    /// Fully-qualified, including enclosing modules
    pub name: String,
    pub superclass: Option<String>,
    pub start_line: usize,
    pub end_line: usize,
}

impl ClassDeclaration {
    /// Enclosing module path, e.g. `Admin` for `Admin::UsersController`
    pub fn namespace(&self) -> Option<String> {
        self.name
            .rsplit_once("::")
            .map(|(namespace, _)| namespace.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_content_is_stable() {
        assert_eq!(hash_content("abc"), hash_content("abc"));
        assert_ne!(hash_content("abc"), hash_content("abd"));
        assert_eq!(
            hash_content(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_namespace_of_nested_class() {
        let decl = ClassDeclaration {
            kind: DeclarationKind::Class,
            name: "Admin::Billing::InvoicesController".to_string(),
            superclass: None,
            start_line: 1,
            end_line: 2,
        };
        assert_eq!(decl.namespace().as_deref(), Some("Admin::Billing"));
    }
}
