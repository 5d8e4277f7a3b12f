//! Best-effort recovery of hierarchical outlines from message content.
//!
//! Two sources are tried: structured JSON (in metadata, the whole content,
//! a fenced block or a brace-delimited span) and, for content already tagged
//! as a mind map, a loose Markdown outline of headings and bullets. Nothing
//! here fails; an unrecoverable input yields `None`.
//!
//! [`render`] produces the normalized text form (`# Root` followed by
//! two-space indented bullets) which parses back to the same tree.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use sl_base::constants::{MIND_MAP_DEFAULT_ROOT, MIND_MAP_MAX_DEPTH};
use sl_base::content::MindMapNode;

static RE_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(#{1,6})\s+(.+)$").expect("invalid RE_HEADING regex"));
static RE_BULLET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([ \t]*)(?:[-*+•]|\d+[.)])\s+(.+)$").expect("invalid RE_BULLET regex"));
static RE_FENCED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json)?\s*\n(.*?)```").expect("invalid RE_FENCED regex"));

const WRAPPER_KEYS: &[&str] = &["mind_map", "mindmap", "mind_map_data", "root", "tree"];
const TITLE_KEYS: &[&str] = &["title", "name", "label", "topic", "text", "central_topic"];
const CHILD_KEYS: &[&str] = &["children", "nodes", "items", "subtopics", "branches"];

/// Bullets nest below any heading level.
const BULLET_BASE: usize = 10;

/// Full extraction: structured JSON first, then a text outline.
pub fn extract(content: &str, metadata: Option<&Value>) -> Option<MindMapNode> {
    extract_structured(content, metadata).or_else(|| parse_outline(content))
}

/// Structured JSON only. Safe to run over content of any type.
pub fn extract_structured(content: &str, metadata: Option<&Value>) -> Option<MindMapNode> {
    if let Some(tree) = metadata.and_then(tree_from_value) {
        return Some(tree);
    }
    let trimmed = content.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed)
        && let Some(tree) = tree_from_value(&value)
    {
        return Some(tree);
    }
    for caps in RE_FENCED.captures_iter(content) {
        if let Ok(value) = serde_json::from_str::<Value>(caps[1].trim())
            && let Some(tree) = tree_from_value(&value)
        {
            return Some(tree);
        }
    }
    let (start, end) = (trimmed.find('{')?, trimmed.rfind('}')?);
    if start >= end {
        return None;
    }
    serde_json::from_str::<Value>(&trimmed[start..=end]).ok().as_ref().and_then(tree_from_value)
}

/// A tree from a decoded JSON value, if it has at least one edge.
pub fn tree_from_value(value: &Value) -> Option<MindMapNode> {
    let tree = match value {
        Value::Array(items) => {
            let children: Vec<MindMapNode> = items.iter().filter_map(|v| node_from_value(v, 1)).collect();
            MindMapNode::with_children(MIND_MAP_DEFAULT_ROOT, children)
        }
        _ => node_from_value(value, 0)?,
    };
    (tree.node_count() >= 2).then_some(tree)
}

fn node_from_value(value: &Value, depth: usize) -> Option<MindMapNode> {
    if depth >= MIND_MAP_MAX_DEPTH {
        return None;
    }
    match value {
        Value::String(s) => {
            let title = clean_title(s);
            (!title.is_empty()).then(|| MindMapNode::new(title))
        }
        Value::Object(map) => {
            for key in WRAPPER_KEYS {
                if let Some(inner) = map.get(*key).filter(|v| v.is_object())
                    && let Some(node) = node_from_value(inner, depth)
                {
                    return Some(node);
                }
            }
            let title = TITLE_KEYS
                .iter()
                .find_map(|k| map.get(*k).and_then(Value::as_str))
                .map(clean_title)
                .filter(|t| !t.is_empty());
            let children: Vec<MindMapNode> = CHILD_KEYS
                .iter()
                .find_map(|k| map.get(*k).and_then(Value::as_array))
                .map(|items| items.iter().filter_map(|v| node_from_value(v, depth + 1)).collect())
                .unwrap_or_default();
            match title {
                Some(title) => Some(MindMapNode::with_children(title, children)),
                None if !children.is_empty() => Some(MindMapNode::with_children(MIND_MAP_DEFAULT_ROOT, children)),
                None => None,
            }
        }
        _ => None,
    }
}

fn clean_title(raw: &str) -> String {
    raw.replace("**", "").split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Outline item: nesting key and title. Headings use their level, bullets
/// `BULLET_BASE` plus their indent width.
fn outline_item(line: &str) -> Option<(usize, String)> {
    if let Some(caps) = RE_HEADING.captures(line.trim_end()) {
        return Some((caps[1].len(), clean_title(&caps[2])));
    }
    let caps = RE_BULLET.captures(line.trim_end())?;
    let indent: usize = caps[1].chars().map(|c| if c == '\t' { 2 } else { 1 }).sum();
    Some((BULLET_BASE + indent, clean_title(&caps[2])))
}

fn attach(stack: &mut [(usize, MindMapNode)], roots: &mut Vec<MindMapNode>, node: MindMapNode) {
    match stack.last_mut() {
        Some((_, parent)) => parent.children.push(node),
        None => roots.push(node),
    }
}

/// Parse headings and bullets into a tree. Prose lines are ignored.
pub fn parse_outline(content: &str) -> Option<MindMapNode> {
    let mut stack: Vec<(usize, MindMapNode)> = Vec::new();
    let mut roots: Vec<MindMapNode> = Vec::new();

    for (key, title) in content.lines().filter_map(outline_item) {
        if title.is_empty() {
            continue;
        }
        while stack.last().is_some_and(|(k, _)| *k >= key) || stack.len() >= MIND_MAP_MAX_DEPTH {
            let Some((_, done)) = stack.pop() else { break };
            attach(&mut stack, &mut roots, done);
        }
        stack.push((key, MindMapNode::new(title)));
    }
    while let Some((_, done)) = stack.pop() {
        attach(&mut stack, &mut roots, done);
    }

    let tree = match roots.len() {
        0 => return None,
        1 => roots.pop()?,
        _ => MindMapNode::with_children(MIND_MAP_DEFAULT_ROOT, roots),
    };
    (tree.node_count() >= 2).then_some(tree)
}

/// Normalized text form of a tree.
pub fn render(root: &MindMapNode) -> String {
    let mut out = format!("# {}", root.title);
    for child in &root.children {
        render_branch(child, 0, &mut out);
    }
    out
}

fn render_branch(node: &MindMapNode, depth: usize, out: &mut String) {
    out.push('\n');
    out.push_str(&"  ".repeat(depth));
    out.push_str("- ");
    out.push_str(&node.title);
    for child in &node.children {
        render_branch(child, depth + 1, out);
    }
}
