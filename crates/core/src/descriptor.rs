//! Metadata document model.
//!
//! The source's metadata file is an XML document: one `source` element,
//! zero or more `package` elements (file patterns, embeds, plugin
//! overrides, dependencies) and a `changelog`. The tree is mutated
//! throughout a build session (plugins insert `depend` elements, the
//! version coordinator annotates the changelog) and serialized once,
//! right before archiving.
//!
//! Nodes live in an arena and are addressed by stable [`NodeId`]s, so
//! plugins can hold on to an id across mutations without aliasing the
//! tree itself. Document order is preserved; `insert_first_child`
//! exists because automatic dependencies must serialize before the
//! manually declared ones.

use std::fs;
use std::path::Path;

use crate::classify::PatternRule;
use crate::plugin::PluginOverride;
use crate::{BuildError, Result};

/// Stable handle to one element in a [`Document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

#[derive(Debug, Clone)]
struct Node {
    tag: String,
    attrs: Vec<(String, String)>,
    text: String,
    children: Vec<NodeId>,
}

/// Arena-backed XML document.
#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Node>,
    root: NodeId,
}

impl Document {
    /// Create a document holding only a root element.
    pub fn new(root_tag: &str) -> Self {
        let root = Node {
            tag: root_tag.to_string(),
            attrs: Vec::new(),
            text: String::new(),
            children: Vec::new(),
        };
        Self {
            nodes: vec![root],
            root: NodeId(0),
        }
    }

    /// Parse an XML document without metadata validation.
    pub fn parse(input: &str) -> Result<Self> {
        Parser::new(input).document()
    }

    /// Read and validate a metadata file.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(BuildError::NotFound(path.to_path_buf()));
        }
        let text = fs::read_to_string(path)?;
        load_metadata(&text)
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn tag(&self, id: NodeId) -> &str {
        &self.node(id).tag
    }

    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        self.node(id)
            .attrs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Attribute value, or `default` when absent.
    pub fn attr_or<'a>(&'a self, id: NodeId, name: &str, default: &'a str) -> &'a str {
        self.attr(id, name).unwrap_or(default)
    }

    pub fn set_attr(&mut self, id: NodeId, name: &str, value: &str) {
        let attrs = &mut self.nodes[id.0].attrs;
        match attrs.iter_mut().find(|(n, _)| n == name) {
            Some((_, v)) => *v = value.to_string(),
            None => attrs.push((name.to_string(), value.to_string())),
        }
    }

    pub fn text(&self, id: NodeId) -> &str {
        &self.node(id).text
    }

    pub fn set_text(&mut self, id: NodeId, text: &str) {
        self.nodes[id.0].text = text.to_string();
    }

    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.node(id).children.clone()
    }

    /// Child elements of `id` with the given tag, in document order.
    pub fn child_elements(&self, id: NodeId, tag: &str) -> Vec<NodeId> {
        self.node(id)
            .children
            .iter()
            .copied()
            .filter(|&c| self.tag(c) == tag)
            .collect()
    }

    pub fn first_child(&self, id: NodeId, tag: &str) -> Option<NodeId> {
        self.node(id)
            .children
            .iter()
            .copied()
            .find(|&c| self.tag(c) == tag)
    }

    /// Create a detached element; attach it with `append_child` or
    /// `insert_first_child`.
    pub fn create_element(&mut self, tag: &str) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            tag: tag.to_string(),
            attrs: Vec::new(),
            text: String::new(),
            children: Vec::new(),
        });
        id
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        self.nodes[parent.0].children.push(child);
    }

    pub fn insert_first_child(&mut self, parent: NodeId, child: NodeId) {
        self.nodes[parent.0].children.insert(0, child);
    }

    /// The `source` element.
    pub fn source_element(&self) -> Option<NodeId> {
        self.first_child(self.root, "source")
    }

    /// All `package` elements, in document order.
    pub fn package_elements(&self) -> Vec<NodeId> {
        self.child_elements(self.root, "package")
    }

    pub fn package_named(&self, name: &str) -> Option<NodeId> {
        self.package_elements()
            .into_iter()
            .find(|&p| self.attr(p, "name") == Some(name))
    }

    /// First `changelog` entry, newest by convention.
    pub fn changelog_entry(&self) -> Option<NodeId> {
        let changelog = self.first_child(self.root, "changelog")?;
        self.first_child(changelog, "entry")
    }

    /// Serialize the whole tree.
    pub fn to_xml(&self) -> String {
        let mut out = String::from("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
        self.write_node(self.root, 0, &mut out);
        out
    }

    fn write_node(&self, id: NodeId, depth: usize, out: &mut String) {
        let node = self.node(id);
        let indent = "  ".repeat(depth);
        out.push_str(&indent);
        out.push('<');
        out.push_str(&node.tag);
        for (name, value) in &node.attrs {
            out.push(' ');
            out.push_str(name);
            out.push_str("=\"");
            out.push_str(&escape(value));
            out.push('"');
        }
        if node.text.is_empty() && node.children.is_empty() {
            out.push_str("/>\n");
            return;
        }
        out.push('>');
        if node.children.is_empty() {
            out.push_str(&escape(&node.text));
        } else {
            out.push('\n');
            if !node.text.is_empty() {
                out.push_str(&indent);
                out.push_str("  ");
                out.push_str(&escape(&node.text));
                out.push('\n');
            }
            for &child in &node.children {
                self.write_node(child, depth + 1, out);
            }
            out.push_str(&indent);
        }
        out.push_str("</");
        out.push_str(&node.tag);
        out.push_str(">\n");
    }
}

/// Parse and validate a metadata document: exactly one `source` element
/// with a name, and uniquely named `package` elements.
pub fn load_metadata(text: &str) -> Result<Document> {
    let doc = Document::parse(text)?;

    let sources = doc.child_elements(doc.root(), "source");
    if sources.len() != 1 {
        return Err(BuildError::MalformedDescriptor(format!(
            "expected exactly one <source> element, found {}",
            sources.len()
        )));
    }
    if doc.attr(sources[0], "name").is_none_or(str::is_empty) {
        return Err(BuildError::MalformedDescriptor(
            "<source> element has no name".to_string(),
        ));
    }

    let mut seen = Vec::new();
    for pkg in doc.package_elements() {
        let Some(name) = doc.attr(pkg, "name") else {
            return Err(BuildError::MalformedDescriptor(
                "<package> element has no name".to_string(),
            ));
        };
        if seen.contains(&name.to_string()) {
            return Err(BuildError::MalformedDescriptor(format!(
                "duplicate package name '{}'",
                name
            )));
        }
        seen.push(name.to_string());
    }

    Ok(doc)
}

/// Ordered `<files pattern="…" exclude="…"/>` rules of a package.
pub fn pattern_rules(doc: &Document, pkg: NodeId) -> Vec<PatternRule> {
    doc.child_elements(pkg, "files")
        .into_iter()
        .map(|f| PatternRule {
            pattern: doc.attr_or(f, "pattern", "*").to_string(),
            exclude: doc.attr_or(f, "exclude", "false") == "true",
        })
        .collect()
}

/// Ordered `<embed from="…" to="…"/>` rules, unrendered.
pub fn embed_rules(doc: &Document, pkg: NodeId) -> Vec<(String, String)> {
    doc.child_elements(pkg, "embed")
        .into_iter()
        .map(|e| {
            (
                doc.attr_or(e, "from", "").to_string(),
                doc.attr_or(e, "to", "").to_string(),
            )
        })
        .collect()
}

/// Ordered `<plugin name="…" enable="…"/>` overrides of a package.
pub fn plugin_overrides(doc: &Document, pkg: NodeId) -> Vec<PluginOverride> {
    doc.child_elements(pkg, "plugin")
        .into_iter()
        .map(|p| PluginOverride {
            name: doc.attr_or(p, "name", "").to_string(),
            enable: doc.attr_or(p, "enable", "true") == "true",
        })
        .collect()
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

struct Parser<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            data: input.as_bytes(),
            pos: 0,
        }
    }

    fn err(&self, msg: &str) -> BuildError {
        BuildError::MalformedDescriptor(format!("{} at byte {}", msg, self.pos))
    }

    fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    fn starts_with(&self, s: &str) -> bool {
        self.data[self.pos..].starts_with(s.as_bytes())
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\r' | b'\n')) {
            self.pos += 1;
        }
    }

    /// Skip `<?…?>` declarations and `<!--…-->` comments.
    fn skip_misc(&mut self) -> Result<()> {
        loop {
            self.skip_ws();
            if self.starts_with("<?") {
                self.skip_until("?>")?;
            } else if self.starts_with("<!--") {
                self.skip_until("-->")?;
            } else {
                return Ok(());
            }
        }
    }

    fn skip_until(&mut self, end: &str) -> Result<()> {
        while self.pos < self.data.len() {
            if self.starts_with(end) {
                self.pos += end.len();
                return Ok(());
            }
            self.pos += 1;
        }
        Err(self.err("unterminated markup"))
    }

    fn name(&mut self) -> Result<String> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == b'-' || c == b'_' || c == b'.')
        {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(self.err("expected a name"));
        }
        Ok(String::from_utf8_lossy(&self.data[start..self.pos]).into_owned())
    }

    fn document(&mut self) -> Result<Document> {
        self.skip_misc()?;
        if self.peek() != Some(b'<') {
            return Err(self.err("expected root element"));
        }
        let mut doc = Document {
            nodes: Vec::new(),
            root: NodeId(0),
        };
        let root = self.element(&mut doc)?;
        doc.root = root;
        self.skip_misc()?;
        if self.pos != self.data.len() {
            return Err(self.err("trailing content after root element"));
        }
        Ok(doc)
    }

    /// Parse one element, `pos` sitting on its `<`.
    fn element(&mut self, doc: &mut Document) -> Result<NodeId> {
        self.pos += 1; // '<'
        let tag = self.name()?;
        let id = NodeId(doc.nodes.len());
        doc.nodes.push(Node {
            tag: tag.clone(),
            attrs: Vec::new(),
            text: String::new(),
            children: Vec::new(),
        });

        loop {
            self.skip_ws();
            match self.peek() {
                Some(b'/') if self.starts_with("/>") => {
                    self.pos += 2;
                    return Ok(id);
                }
                Some(b'>') => {
                    self.pos += 1;
                    break;
                }
                Some(_) => {
                    let name = self.name()?;
                    self.skip_ws();
                    if self.peek() != Some(b'=') {
                        return Err(self.err("expected '=' in attribute"));
                    }
                    self.pos += 1;
                    let value = self.quoted()?;
                    doc.nodes[id.0].attrs.push((name, value));
                }
                None => return Err(self.err("unterminated element")),
            }
        }

        // Content: text and child elements until the matching close tag.
        loop {
            let text = self.text_run();
            if !text.trim().is_empty() {
                let node_text = &mut doc.nodes[id.0].text;
                if !node_text.is_empty() {
                    node_text.push(' ');
                }
                node_text.push_str(text.trim());
            }
            if self.starts_with("</") {
                self.pos += 2;
                let close = self.name()?;
                if close != tag {
                    return Err(self.err(&format!("mismatched close tag </{}>", close)));
                }
                self.skip_ws();
                if self.peek() != Some(b'>') {
                    return Err(self.err("expected '>' in close tag"));
                }
                self.pos += 1;
                return Ok(id);
            } else if self.starts_with("<!--") {
                self.skip_until("-->")?;
            } else if self.peek() == Some(b'<') {
                let child = self.element(doc)?;
                doc.nodes[id.0].children.push(child);
            } else {
                return Err(self.err("unterminated element content"));
            }
        }
    }

    fn quoted(&mut self) -> Result<String> {
        self.skip_ws();
        let quote = match self.peek() {
            Some(q @ (b'"' | b'\'')) => q,
            _ => return Err(self.err("expected quoted attribute value")),
        };
        self.pos += 1;
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c == quote {
                let raw = String::from_utf8_lossy(&self.data[start..self.pos]).into_owned();
                self.pos += 1;
                return Ok(unescape(&raw));
            }
            self.pos += 1;
        }
        Err(self.err("unterminated attribute value"))
    }

    /// Raw character data up to the next `<` (or end of input).
    fn text_run(&mut self) -> String {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c == b'<' {
                break;
            }
            self.pos += 1;
        }
        unescape(&String::from_utf8_lossy(&self.data[start..self.pos]))
    }
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(idx) = rest.find('&') {
        out.push_str(&rest[..idx]);
        rest = &rest[idx..];
        let entity = [
            ("&amp;", '&'),
            ("&lt;", '<'),
            ("&gt;", '>'),
            ("&quot;", '"'),
            ("&apos;", '\''),
        ]
        .iter()
        .find(|(e, _)| rest.starts_with(e));
        match entity {
            Some((e, c)) => {
                out.push(*c);
                rest = &rest[e.len()..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0"?>
<metadata>
  <source name="foo" devel="true"/>
  <package name="foo" arch="any">
    <files pattern="*"/>
    <files pattern="*.debug" exclude="true"/>
    <plugin name="shlibdeps" enable="true"/>
  </package>
  <changelog>
    <entry version="1.0">First release</entry>
  </changelog>
</metadata>
"#;

    #[test]
    fn test_parse_sample() {
        let doc = load_metadata(SAMPLE).unwrap();
        let source = doc.source_element().unwrap();
        assert_eq!(doc.attr(source, "name"), Some("foo"));
        assert_eq!(doc.attr(source, "devel"), Some("true"));

        let packages = doc.package_elements();
        assert_eq!(packages.len(), 1);
        let rules = pattern_rules(&doc, packages[0]);
        assert_eq!(rules.len(), 2);
        assert!(!rules[0].exclude);
        assert!(rules[1].exclude);

        let entry = doc.changelog_entry().unwrap();
        assert_eq!(doc.attr(entry, "version"), Some("1.0"));
        assert_eq!(doc.text(entry), "First release");
    }

    #[test]
    fn test_missing_source_is_malformed() {
        let err = load_metadata("<metadata><package name=\"p\"/></metadata>").unwrap_err();
        assert!(matches!(err, BuildError::MalformedDescriptor(_)));
    }

    #[test]
    fn test_duplicate_package_names_rejected() {
        let text = r#"<metadata>
  <source name="s"/>
  <package name="p"/>
  <package name="p"/>
</metadata>"#;
        let err = load_metadata(text).unwrap_err();
        assert!(matches!(err, BuildError::MalformedDescriptor(_)));
    }

    #[test]
    fn test_insert_first_child_orders_before_existing() {
        let mut doc = load_metadata(SAMPLE).unwrap();
        let pkg = doc.package_elements()[0];
        let depend = doc.create_element("depend");
        doc.set_attr(depend, "string", "libbar>=1.0");
        doc.insert_first_child(pkg, depend);

        let children = doc.children(pkg);
        assert_eq!(doc.tag(children[0]), "depend");
        assert_eq!(doc.tag(children[1]), "files");
    }

    #[test]
    fn test_roundtrip_preserves_structure() {
        let doc = load_metadata(SAMPLE).unwrap();
        let again = load_metadata(&doc.to_xml()).unwrap();
        let pkg = again.package_elements()[0];
        assert_eq!(pattern_rules(&again, pkg).len(), 2);
        assert_eq!(plugin_overrides(&again, pkg).len(), 1);
        assert_eq!(
            again.attr(again.changelog_entry().unwrap(), "version"),
            Some("1.0")
        );
    }

    #[test]
    fn test_attribute_escaping_roundtrip() {
        let mut doc = Document::new("metadata");
        let src = doc.create_element("source");
        let root = doc.root();
        doc.set_attr(src, "name", "a&b<c>\"d\"");
        doc.append_child(root, src);
        let again = Document::parse(&doc.to_xml()).unwrap();
        let src = again.first_child(again.root(), "source").unwrap();
        assert_eq!(again.attr(src, "name"), Some("a&b<c>\"d\""));
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let err = Document::from_file(Path::new("/nonexistent/metadata.xml")).unwrap_err();
        assert!(matches!(err, BuildError::NotFound(_)));
    }

    #[test]
    fn test_syntax_error_reported() {
        let err = Document::parse("<metadata><source name=foo/></metadata>").unwrap_err();
        assert!(matches!(err, BuildError::MalformedDescriptor(_)));
    }
}
