//! Graphviz rendering of a computation graph
//!
//! Render the output with `dot -Tsvg graph.dot -o graph.svg`.

use std::{fmt::Write as _, fs, io, path::Path};

use crate::values::Value;

/// DOT source for the graph below `root`: one record per value, one ellipse per operation
pub fn to_dot(root: &Value) -> String {
    let mut out = String::from("digraph G {\n  rankdir=LR;\n");
    for value in root.topological_order() {
        let id = value.id();
        // writing to a String cannot fail
        let _ = writeln!(
            out,
            "  v{} [shape=record, label=\"{{ data {:.4} | grad {:.4} }}\"];",
            id,
            value.data(),
            value.grad()
        );
        if let Some(op) = value.backprop_fn() {
            let _ = writeln!(out, "  op{} [label=\"{}\"];", id, op.symbol());
            let _ = writeln!(out, "  op{} -> v{};", id, id);
            for child in value.children() {
                let _ = writeln!(out, "  v{} -> op{};", child.id(), id);
            }
        }
    }
    out.push_str("}\n");
    out
}

/// Writes [`to_dot`] of `root` to `path`
pub fn draw_dot(root: &Value, path: impl AsRef<Path>) -> io::Result<()> {
    fs::write(path.as_ref(), to_dot(root))?;
    log::info!("Computation graph saved to '{}'.", path.as_ref().display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_dot() {
        let a = Value::new(2.0);
        let b = Value::new(3.0);
        let c = (&a * &b).relu();
        c.backward();

        let dot = to_dot(&c);
        assert!(dot.starts_with("digraph G {"));
        assert!(dot.contains(&format!(
            "v{} [shape=record, label=\"{{ data 2.0000 | grad 3.0000 }}\"]",
            a.id()
        )));
        assert!(dot.contains("[label=\"*\"]"));
        assert!(dot.contains("[label=\"relu\"]"));
        assert!(dot.contains(&format!("v{} -> op{}", b.id(), c.children()[0].id())));
        // a, b, a * b and relu(a * b)
        assert_eq!(dot.matches("shape=record").count(), 4);
    }
}
