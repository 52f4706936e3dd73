//! Placeholder engine.
//!
//! Sources are parsed once into a node tree and rendered any number of
//! times against a JSON context.

use serde_json::Value;
use std::borrow::Cow;

/// How substituted values are written into the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escape {
    /// Write values verbatim.
    None,
    /// HTML-escape values.
    Html,
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Text(String),
    Var(String),
    If {
        cond: String,
        then: Vec<Node>,
        otherwise: Vec<Node>,
    },
    Each {
        path: String,
        body: Vec<Node>,
    },
}

#[derive(Debug)]
enum Block {
    Root,
    If(String),
    Each(String),
}

#[derive(Debug)]
struct Frame {
    block: Block,
    nodes: Vec<Node>,
    otherwise: Option<Vec<Node>>,
}

impl Frame {
    fn new(block: Block) -> Self {
        Self {
            block,
            nodes: Vec::new(),
            otherwise: None,
        }
    }

    fn push(&mut self, node: Node) {
        match &mut self.otherwise {
            Some(otherwise) => otherwise.push(node),
            None => self.nodes.push(node),
        }
    }
}

/// A parsed template source.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledTemplate {
    nodes: Vec<Node>,
}

impl CompiledTemplate {
    /// Parses a template source.
    ///
    /// Fails on unbalanced or misplaced block tags. An unterminated `{{` is
    /// kept as literal text.
    pub fn compile(source: &str) -> Result<Self, String> {
        let mut stack = vec![Frame::new(Block::Root)];
        let mut rest = source;

        while let Some(start) = rest.find("{{") {
            let Some(len) = rest[start + 2..].find("}}") else {
                break;
            };
            if start > 0 {
                top(&mut stack).push(Node::Text(rest[..start].to_string()));
            }
            let tag = rest[start + 2..start + 2 + len].trim();
            rest = &rest[start + 2 + len + 2..];

            if let Some(cond) = tag.strip_prefix("#if ") {
                stack.push(Frame::new(Block::If(cond.trim().to_string())));
            } else if let Some(path) = tag.strip_prefix("#each ") {
                stack.push(Frame::new(Block::Each(path.trim().to_string())));
            } else if tag == "else" {
                let frame = top(&mut stack);
                if !matches!(frame.block, Block::If(_)) || frame.otherwise.is_some() {
                    return Err("{{else}} outside of an {{#if}} block".to_string());
                }
                frame.otherwise = Some(Vec::new());
            } else if tag == "/if" || tag == "/each" {
                let frame = match stack.pop() {
                    Some(frame) if !matches!(frame.block, Block::Root) => frame,
                    _ => return Err(format!("unexpected {{{{{}}}}}", tag)),
                };
                let node = match (frame.block, tag) {
                    (Block::If(cond), "/if") => Node::If {
                        cond,
                        then: frame.nodes,
                        otherwise: frame.otherwise.unwrap_or_default(),
                    },
                    (Block::Each(path), "/each") => Node::Each {
                        path,
                        body: frame.nodes,
                    },
                    (block, _) => {
                        return Err(format!("{{{{{}}}}} closed by {{{{{}}}}}", describe(&block), tag))
                    }
                };
                top(&mut stack).push(node);
            } else {
                top(&mut stack).push(Node::Var(tag.to_string()));
            }
        }

        if !rest.is_empty() {
            top(&mut stack).push(Node::Text(rest.to_string()));
        }

        if let [_, .., open] = stack.as_slice() {
            return Err(format!("unclosed {{{{{}}}}}", describe(&open.block)));
        }

        let root = stack.pop().map(|frame| frame.nodes).unwrap_or_default();
        Ok(Self { nodes: root })
    }

    /// Renders against `context`.
    pub fn render(&self, context: &Value, escape: Escape) -> String {
        let mut out = String::new();
        let mut scope = Scope {
            root: context,
            items: Vec::new(),
        };
        render_nodes(&self.nodes, &mut scope, escape, &mut out);
        out
    }
}

fn describe(block: &Block) -> String {
    match block {
        Block::Root => String::new(),
        Block::If(cond) => format!("#if {}", cond),
        Block::Each(path) => format!("#each {}", path),
    }
}

fn top(stack: &mut [Frame]) -> &mut Frame {
    let last = stack.len() - 1;
    &mut stack[last]
}

struct Scope<'a> {
    root: &'a Value,
    items: Vec<(&'a Value, usize)>,
}

impl<'a> Scope<'a> {
    fn resolve(&self, path: &str) -> Option<Cow<'a, Value>> {
        if path == "@index" {
            let &(_, index) = self.items.last()?;
            return Some(Cow::Owned(Value::from(index)));
        }
        if let Some(rest) = path.strip_prefix("@item") {
            let &(item, _) = self.items.last()?;
            return match rest.strip_prefix('.') {
                Some(field) => lookup(item, field).map(Cow::Borrowed),
                None if rest.is_empty() => Some(Cow::Borrowed(item)),
                None => None,
            };
        }
        lookup(self.root, path).map(Cow::Borrowed)
    }
}

fn render_nodes<'a>(nodes: &[Node], scope: &mut Scope<'a>, escape: Escape, out: &mut String) {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Var(path) => {
                if let Some(value) = scope.resolve(path) {
                    let text = display_value(&value);
                    match escape {
                        Escape::Html => out.push_str(&escape_html(&text)),
                        Escape::None => out.push_str(&text),
                    }
                }
            }
            Node::If {
                cond,
                then,
                otherwise,
            } => {
                let truthy = scope.resolve(cond).is_some_and(|v| is_truthy(&v));
                let branch = if truthy { then } else { otherwise };
                render_nodes(branch, scope, escape, out);
            }
            Node::Each { path, body } => {
                let Some(Cow::Borrowed(Value::Array(items))) = scope.resolve(path) else {
                    continue;
                };
                for (index, item) in items.iter().enumerate() {
                    scope.items.push((item, index));
                    render_nodes(body, scope, escape, out);
                    scope.items.pop();
                }
            }
        }
    }
}

/// Looks up a dotted path. Numeric segments index into arrays.
pub(crate) fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Truthiness used by `{{#if}}`: non-null, non-false, non-zero and
/// non-empty strings, arrays and objects.
pub(crate) fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::Null | Value::Object(_) => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) => items
            .iter()
            .map(display_value)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", "),
    }
}

/// Escapes the five HTML-significant characters.
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn render(source: &str, context: Value) -> String {
        CompiledTemplate::compile(source)
            .unwrap()
            .render(&context, Escape::Html)
    }

    #[test]
    fn test_substitutes_simple_and_dotted_paths() {
        let out = render(
            "Hi {{name}}, see {{event.title}} at {{event.venue.city}}",
            json!({"name": "Ada", "event": {"title": "RustConf", "venue": {"city": "Montreal"}}}),
        );
        assert_eq!(out, "Hi Ada, see RustConf at Montreal");
    }

    #[test]
    fn test_unknown_placeholder_is_empty() {
        assert_eq!(render("[{{missing}}][{{a.b.c}}]", json!({"a": 1})), "[][]");
    }

    #[test]
    fn test_if_else() {
        let source = "{{#if vip}}gold{{else}}standard{{/if}}";
        assert_eq!(render(source, json!({"vip": true})), "gold");
        assert_eq!(render(source, json!({"vip": 0})), "standard");
        assert_eq!(render(source, json!({"vip": ""})), "standard");
        assert_eq!(render(source, json!({"vip": []})), "standard");
        assert_eq!(render(source, json!({"vip": {}})), "standard");
        assert_eq!(render(source, json!({})), "standard");
        assert_eq!(render(source, json!({"vip": "yes"})), "gold");
    }

    #[test]
    fn test_nested_if() {
        let source = "{{#if a}}A{{#if b}}B{{/if}}{{/if}}";
        assert_eq!(render(source, json!({"a": true, "b": true})), "AB");
        assert_eq!(render(source, json!({"a": true})), "A");
        assert_eq!(render(source, json!({"b": true})), "");
    }

    #[test]
    fn test_each_with_item_fields_and_index() {
        let source = "{{#each people}}{{@index}}:{{@item.name}};{{/each}}";
        let out = render(source, json!({"people": [{"name": "Ada"}, {"name": "Grace"}]}));
        assert_eq!(out, "0:Ada;1:Grace;");
    }

    #[test]
    fn test_each_scalar_items_and_root_access() {
        let source = "{{#each tags}}{{site}}/{{@item}} {{/each}}";
        let out = render(source, json!({"site": "x", "tags": ["a", "b"]}));
        assert_eq!(out, "x/a x/b ");
    }

    #[test]
    fn test_nested_each_uses_innermost_item() {
        let source = "{{#each groups}}[{{@item.name}}:{{#each members}}{{@item}}{{/each}}]{{/each}}";
        let context = json!({
            "groups": [{"name": "g1"}, {"name": "g2"}],
            "members": ["m"]
        });
        assert_eq!(render(source, context), "[g1:m][g2:m]");
    }

    #[test]
    fn test_if_on_item_field_inside_each() {
        let source = "{{#each items}}{{#if @item.done}}x{{else}}o{{/if}}{{/each}}";
        let out = render(source, json!({"items": [{"done": true}, {"done": false}]}));
        assert_eq!(out, "xo");
    }

    #[test]
    fn test_each_over_non_array_renders_nothing() {
        assert_eq!(render("{{#each x}}y{{/each}}", json!({"x": "str"})), "");
    }

    #[test]
    fn test_values_are_escaped_in_html_mode() {
        let compiled = CompiledTemplate::compile("<b>{{name}}</b>").unwrap();
        let context = json!({"name": "<script>\"x\" & 'y'</script>"});
        assert_eq!(
            compiled.render(&context, Escape::Html),
            "<b>&lt;script&gt;&quot;x&quot; &amp; &#39;y&#39;&lt;/script&gt;</b>"
        );
        assert_eq!(
            compiled.render(&context, Escape::None),
            "<b><script>\"x\" & 'y'</script></b>"
        );
    }

    #[test]
    fn test_unterminated_tag_is_literal() {
        assert_eq!(render("a {{b", json!({})), "a {{b");
    }

    #[test]
    fn test_syntax_errors() {
        assert!(CompiledTemplate::compile("{{#if a}}x").is_err());
        assert!(CompiledTemplate::compile("x{{/if}}").is_err());
        assert!(CompiledTemplate::compile("{{#if a}}x{{/each}}").is_err());
        assert!(CompiledTemplate::compile("{{else}}").is_err());
        assert!(CompiledTemplate::compile("{{#each a}}{{else}}{{/each}}").is_err());
    }

    #[test]
    fn test_scalar_display() {
        let out = render(
            "{{n}} {{f}} {{b}} {{list}} {{nul}}",
            json!({"n": 3, "f": 1.5, "b": false, "list": [1, "two"], "nul": null}),
        );
        assert_eq!(out, "3 1.5 false 1, two ");
    }
}
