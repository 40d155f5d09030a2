// ABOUTME: Expression auto-display rewrite for submitted Python snippets
// ABOUTME: Prints the repr of a trailing bare expression, mimicking an interactive shell

use tree_sitter::{Node, Parser};

/// Hidden variable holding the value of the trailing expression
const RESULT_VAR: &str = "__last_res__";

/// Statement kinds that are parsed as expression statements but must not be displayed
const NON_DISPLAY_KINDS: &[&str] = &["assignment", "augmented_assignment", "yield"];

/// Rewrite `code` so its final top-level bare expression is printed.
///
/// Anything that does not parse cleanly, or does not end in a bare
/// expression, is returned unchanged.
pub fn wrap_code(code: &str) -> String {
    match trailing_expression(code) {
        Some((start, end)) => format!(
            "{prefix}{var} = {expr}\nif {var} is not None:\n    print(repr({var})){suffix}",
            prefix = &code[..start],
            var = RESULT_VAR,
            expr = &code[start..end],
            suffix = &code[end..],
        ),
        None => code.to_string(),
    }
}

/// Byte range of the last top-level statement when it is a displayable expression
fn trailing_expression(code: &str) -> Option<(usize, usize)> {
    let mut parser = Parser::new();
    parser.set_language(tree_sitter_python::language()).ok()?;

    let tree = parser.parse(code, None)?;
    let root = tree.root_node();
    if root.has_error() {
        return None;
    }

    let mut cursor = root.walk();
    let last = root
        .named_children(&mut cursor)
        .filter(|node| node.kind() != "comment")
        .last()?;

    if !is_displayable(&last) {
        return None;
    }

    Some((last.start_byte(), last.end_byte()))
}

fn is_displayable(statement: &Node) -> bool {
    if statement.kind() != "expression_statement" {
        return false;
    }

    match statement.named_child(0) {
        Some(first) => !NON_DISPLAY_KINDS.contains(&first.kind()),
        None => false,
    }
}
