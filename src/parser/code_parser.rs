use super::{ClassDeclaration, DeclarationKind, MethodDefinition};
use anyhow::{Context, Result};
use tree_sitter::{Language, Node, Parser, Tree};

/// Ruby parser using tree-sitter for exact method and class boundaries.
///
/// Most recognizers work on raw text with regexes; this service is for the
/// few that need one method's precise source range.
pub struct CodeParser {
    language: Language,
}

impl CodeParser {
    pub fn new() -> Self {
        Self {
            language: tree_sitter_ruby::language(),
        }
    }

    fn parse_tree(&self, source: &str) -> Result<Tree> {
        let mut parser = Parser::new();
        parser
            .set_language(self.language)
            .context("Failed to set language")?;

        parser.parse(source, None).context("Failed to parse code")
    }

    /// Every `def` in the source, in source order
    pub fn definitions(&self, source: &str) -> Vec<MethodDefinition> {
        let tree = match self.parse_tree(source) {
            Ok(tree) => tree,
            Err(e) => {
                tracing::debug!("Ruby parse failed: {}", e);
                return Vec::new();
            }
        };

        let mut methods = Vec::new();
        let mut scope = Vec::new();
        collect_methods(tree.root_node(), source, &mut scope, &mut methods);
        methods
    }

    /// Source range of the first method named `name` (instance methods win
    /// over singleton methods of the same name)
    pub fn method_source(&self, source: &str, name: &str) -> Option<MethodDefinition> {
        let definitions = self.definitions(source);
        definitions
            .iter()
            .find(|m| m.name == name && !m.singleton)
            .or_else(|| definitions.iter().find(|m| m.name == name))
            .cloned()
    }

    /// Every `class`/`module` declaration with fully-qualified names
    pub fn class_declarations(&self, source: &str) -> Vec<ClassDeclaration> {
        let tree = match self.parse_tree(source) {
            Ok(tree) => tree,
            Err(e) => {
                tracing::debug!("Ruby parse failed: {}", e);
                return Vec::new();
            }
        };

        let mut declarations = Vec::new();
        let mut scope = Vec::new();
        collect_declarations(tree.root_node(), source, &mut scope, &mut declarations);
        declarations
    }

    /// The first class declared in the file, or the first module if the file
    /// declares no class
    pub fn primary_declaration(&self, source: &str) -> Option<ClassDeclaration> {
        let declarations = self.class_declarations(source);
        declarations
            .iter()
            .find(|d| d.kind == DeclarationKind::Class)
            .or_else(|| declarations.last())
            .cloned()
    }
}

impl Default for CodeParser {
    fn default() -> Self {
        Self::new()
    }
}

fn node_text<'a>(node: Node, source: &'a str) -> &'a str {
    &source[node.start_byte()..node.end_byte()]
}

fn qualify(scope: &[String], name: &str) -> String {
    if scope.is_empty() || name.starts_with("::") {
        name.trim_start_matches("::").to_string()
    } else {
        format!("{}::{}", scope.join("::"), name)
    }
}

fn declaration_kind(kind: &str) -> Option<DeclarationKind> {
    match kind {
        "class" => Some(DeclarationKind::Class),
        "module" => Some(DeclarationKind::Module),
        _ => None,
    }
}

fn collect_declarations(
    node: Node,
    source: &str,
    scope: &mut Vec<String>,
    out: &mut Vec<ClassDeclaration>,
) {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        let Some(kind) = declaration_kind(child.kind()) else {
            collect_declarations(child, source, scope, out);
            continue;
        };
        let Some(name_node) = child.child_by_field_name("name") else {
            continue;
        };
        let name = qualify(scope, node_text(name_node, source));
        let superclass = child
            .child_by_field_name("superclass")
            .map(|sc| superclass_name(sc, source));

        out.push(ClassDeclaration {
            kind,
            name: name.clone(),
            superclass,
            start_line: child.start_position().row + 1,
            end_line: child.end_position().row + 1,
        });

        let outer = std::mem::take(scope);
        scope.extend(name.split("::").map(str::to_string));
        collect_declarations(child, source, scope, out);
        *scope = outer;
    }
}

fn superclass_name(node: Node, source: &str) -> String {
    let mut cursor = node.walk();
    let named = node.named_children(&mut cursor).next();
    match named {
        Some(inner) => node_text(inner, source).to_string(),
        None => node_text(node, source).trim_start_matches('<').trim().to_string(),
    }
}

fn collect_methods(
    node: Node,
    source: &str,
    scope: &mut Vec<String>,
    out: &mut Vec<MethodDefinition>,
) {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        match child.kind() {
            "method" | "singleton_method" => {
                if let Some(name_node) = child.child_by_field_name("name") {
                    out.push(MethodDefinition {
                        name: node_text(name_node, source).to_string(),
                        owner: (!scope.is_empty()).then(|| scope.join("::")),
                        singleton: child.kind() == "singleton_method",
                        start_line: child.start_position().row + 1,
                        end_line: child.end_position().row + 1,
                        source: node_text(child, source).to_string(),
                    });
                }
            }
            kind if declaration_kind(kind).is_some() => {
                let Some(name_node) = child.child_by_field_name("name") else {
                    continue;
                };
                let name = qualify(scope, node_text(name_node, source));
                let outer = std::mem::take(scope);
                scope.extend(name.split("::").map(str::to_string));
                collect_methods(child, source, scope, out);
                *scope = outer;
            }
            _ => collect_methods(child, source, scope, out),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONTROLLER: &str = r#"
module Admin
  class OrdersController < ApplicationController
    before_action :load_order

    def index
      @orders = Order.all
    end

    def show
      render :show
    end

    def self.show
      :class_level
    end

    private

    def load_order
      @order = Order.find(params[:id])
    end
  end
end
"#;

    #[test]
    fn test_definitions_in_source_order() {
        let parser = CodeParser::new();
        let names: Vec<String> = parser
            .definitions(CONTROLLER)
            .into_iter()
            .map(|m| m.name)
            .collect();
        assert_eq!(names, vec!["index", "show", "show", "load_order"]);
    }

    #[test]
    fn test_method_source_prefers_instance_method() {
        let parser = CodeParser::new();
        let show = parser.method_source(CONTROLLER, "show").unwrap();
        assert!(!show.singleton);
        assert!(show.source.starts_with("def show"));
        assert!(show.source.contains("render :show"));
        assert!(show.source.trim_end().ends_with("end"));
        assert_eq!(show.owner.as_deref(), Some("Admin::OrdersController"));
        assert_eq!(show.start_line, 10);
        assert_eq!(show.end_line, 12);
    }

    #[test]
    fn test_missing_method_is_none() {
        let parser = CodeParser::new();
        assert!(parser.method_source(CONTROLLER, "destroy").is_none());
    }

    #[test]
    fn test_class_declarations_are_qualified() {
        let parser = CodeParser::new();
        let decls = parser.class_declarations(CONTROLLER);
        assert_eq!(decls.len(), 2);
        assert_eq!(decls[0].name, "Admin");
        assert_eq!(decls[0].kind, DeclarationKind::Module);
        assert_eq!(decls[1].name, "Admin::OrdersController");
        assert_eq!(decls[1].superclass.as_deref(), Some("ApplicationController"));

        let primary = parser.primary_declaration(CONTROLLER).unwrap();
        assert_eq!(primary.name, "Admin::OrdersController");
    }

    #[test]
    fn test_sibling_classes_do_not_nest() {
        let parser = CodeParser::new();
        let source = "module A\n  class B\n  end\n  class C\n  end\nend\nclass D\nend\n";
        let names: Vec<String> = parser
            .class_declarations(source)
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["A", "A::B", "A::C", "D"]);
    }

    #[test]
    fn test_malformed_source_does_not_panic() {
        let parser = CodeParser::new();
        let defs = parser.definitions("class Broken\n  def oops(\n");
        assert!(defs.len() <= 1);
    }
}
