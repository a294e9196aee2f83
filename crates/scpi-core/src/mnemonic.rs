//! Hierarchical command mnemonics and placeholder substitution.
//!
//! Command templates such as
//! `CONFigure:BLUetooth:MEASurement<Instance>:HDR:LIMit:P8H:DEVM` carry
//! `<Name>` placeholders for repeated capabilities. Every placeholder must be
//! bound before the command is sent; an unbound one is a
//! [`ScpiError::MissingInstanceBinding`] raised before any I/O.
//!
//! [`CommandTree`] stores the generated catalogue as an arena of groups. A
//! group knows its parent by index only, so the tree has a single owner and
//! no reference cycles. The tree is fixed once built; children are found by
//! name.

use crate::conversions::matches_mnemonic;
use crate::error::{ScpiError, ScpiResult};
use std::collections::BTreeMap;

/// SCPI header separator.
pub const SEPARATOR: char = ':';

/// Placeholder bindings, e.g. `Instance -> 1`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bindings(BTreeMap<String, String>);

impl Bindings {
    /// Empty set of bindings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.set(name, value);
        self
    }

    /// Bind `name`, replacing any earlier value.
    pub fn set(&mut self, name: impl Into<String>, value: impl ToString) {
        self.0.insert(name.into(), value.to_string());
    }

    /// Bound value of `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// True when nothing is bound.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Copy entries from `other` that are not bound here yet.
    pub fn fill_from(&mut self, other: &Bindings) {
        for (k, v) in &other.0 {
            self.0.entry(k.clone()).or_insert_with(|| v.clone());
        }
    }

    /// Bindings in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Names of all placeholders in a template, in order of appearance.
pub fn placeholders(template: &str) -> ScpiResult<Vec<String>> {
    let mut names = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find('<') {
        let after = &rest[start + 1..];
        let end = after.find('>').ok_or_else(|| ScpiError::MalformedTemplate {
            template: template.to_string(),
            reason: "unterminated '<'".to_string(),
        })?;
        let name = &after[..end];
        if name.is_empty() || name.contains('<') {
            return Err(ScpiError::MalformedTemplate {
                template: template.to_string(),
                reason: format!("invalid placeholder '<{}>'", name),
            });
        }
        names.push(name.to_string());
        rest = &after[end + 1..];
    }
    Ok(names)
}

/// Substitute every `<Name>` in `template` from `bindings`.
pub fn compose(template: &str, bindings: &Bindings) -> ScpiResult<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    for name in placeholders(template)? {
        let token = format!("<{}>", name);
        let start = rest.find(&token).unwrap_or(rest.len());
        out.push_str(&rest[..start]);
        let value = bindings
            .get(&name)
            .ok_or_else(|| ScpiError::MissingInstanceBinding {
                placeholder: name.clone(),
                template: template.to_string(),
            })?;
        out.push_str(value);
        rest = &rest[(start + token.len()).min(rest.len())..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Segment name with placeholders removed (`MEASurement<Instance>` -> `MEASurement`).
fn base_name(segment: &str) -> String {
    let mut out = String::new();
    let mut depth = 0;
    for c in segment.chars() {
        match c {
            '<' => depth += 1,
            '>' if depth > 0 => depth -= 1,
            _ if depth == 0 => out.push(c),
            _ => {}
        }
    }
    out
}

/// Opaque handle of a group inside a [`CommandTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupId(usize);

#[derive(Debug, Clone)]
struct GroupNode {
    segment: String,
    parent: Option<GroupId>,
    children: Vec<GroupId>,
    defaults: Bindings,
}

/// Arena of command groups built from a static catalogue.
#[derive(Debug, Clone, Default)]
pub struct CommandTree {
    nodes: Vec<GroupNode>,
    roots: Vec<GroupId>,
}

impl CommandTree {
    /// Empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a tree from full mnemonic templates.
    ///
    /// Shared prefixes are merged, so
    /// `A:B:C` and `A:B:D` produce one `A:B` group with two children.
    pub fn from_catalogue(paths: &[&str]) -> ScpiResult<Self> {
        let mut tree = Self::new();
        for path in paths {
            tree.insert_path(path)?;
        }
        Ok(tree)
    }

    /// Insert a full template, returning the leaf group.
    pub fn insert_path(&mut self, path: &str) -> ScpiResult<GroupId> {
        placeholders(path)?;
        let segments: Vec<&str> = path.trim_start_matches(SEPARATOR).split(SEPARATOR).collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(ScpiError::MalformedTemplate {
                template: path.to_string(),
                reason: "empty header segment".to_string(),
            });
        }

        let mut parent = None;
        for segment in segments {
            parent = Some(self.add_group(parent, segment));
        }
        parent.ok_or_else(|| ScpiError::MalformedTemplate {
            template: path.to_string(),
            reason: "empty template".to_string(),
        })
    }

    /// Add a group under `parent` (or as a root), reusing an identical one.
    pub fn add_group(&mut self, parent: Option<GroupId>, segment: &str) -> GroupId {
        let siblings = match parent {
            Some(p) => &self.nodes[p.0].children,
            None => &self.roots,
        };
        if let Some(existing) = siblings
            .iter()
            .find(|id| self.nodes[id.0].segment == segment)
        {
            return *existing;
        }

        let id = GroupId(self.nodes.len());
        self.nodes.push(GroupNode {
            segment: segment.to_string(),
            parent,
            children: Vec::new(),
            defaults: Bindings::new(),
        });
        match parent {
            Some(p) => self.nodes[p.0].children.push(id),
            None => self.roots.push(id),
        }
        id
    }

    fn find_in(&self, candidates: &[GroupId], name: &str) -> Option<GroupId> {
        let wanted = base_name(name);
        candidates
            .iter()
            .copied()
            .find(|id| matches_mnemonic(&wanted, &base_name(&self.nodes[id.0].segment)))
    }

    /// Top-level groups, in insertion order.
    pub fn roots(&self) -> &[GroupId] {
        &self.roots
    }

    /// Top-level group by name (long or short form).
    pub fn root(&self, name: &str) -> Option<GroupId> {
        self.find_in(&self.roots, name)
    }

    /// Child group by name (long or short form, placeholders ignored).
    pub fn child(&self, parent: GroupId, name: &str) -> Option<GroupId> {
        self.find_in(&self.nodes[parent.0].children, name)
    }

    /// Resolve a `:`-separated path to a group.
    pub fn lookup(&self, path: &str) -> ScpiResult<GroupId> {
        let unknown = || ScpiError::UnknownCommand(path.to_string());
        let mut segments = path.trim_start_matches(SEPARATOR).split(SEPARATOR);
        let first = segments.next().ok_or_else(unknown)?;
        let mut current = self.root(first).ok_or_else(unknown)?;
        for segment in segments {
            current = self.child(current, segment).ok_or_else(unknown)?;
        }
        Ok(current)
    }

    /// Parent group, `None` for a root.
    pub fn parent(&self, id: GroupId) -> Option<GroupId> {
        self.nodes[id.0].parent
    }

    /// Mnemonic segment of this group as declared in the catalogue.
    pub fn segment(&self, id: GroupId) -> &str {
        &self.nodes[id.0].segment
    }

    /// Direct child groups in insertion order.
    pub fn children(&self, id: GroupId) -> &[GroupId] {
        &self.nodes[id.0].children
    }

    /// True for a group without children.
    pub fn is_leaf(&self, id: GroupId) -> bool {
        self.nodes[id.0].children.is_empty()
    }

    fn ancestry(&self, id: GroupId) -> Vec<GroupId> {
        let mut chain = vec![id];
        let mut current = id;
        while let Some(parent) = self.nodes[current.0].parent {
            chain.push(parent);
            current = parent;
        }
        chain.reverse();
        chain
    }

    /// Full template of a group, segments joined with `:`.
    pub fn template(&self, id: GroupId) -> String {
        self.ancestry(id)
            .iter()
            .map(|g| self.nodes[g.0].segment.as_str())
            .collect::<Vec<_>>()
            .join(":")
    }

    /// Set a default binding used when callers do not bind `name` themselves.
    ///
    /// Defaults apply to the group and everything below it.
    pub fn set_default(&mut self, id: GroupId, name: impl Into<String>, value: impl ToString) {
        self.nodes[id.0].defaults.set(name, value);
    }

    /// Compose the command for a group.
    ///
    /// Call-site bindings win; otherwise the nearest group default along the
    /// path from `id` to the root is used.
    pub fn compose(&self, id: GroupId, bindings: &Bindings) -> ScpiResult<String> {
        let mut resolved = bindings.clone();
        let mut current = Some(id);
        while let Some(g) = current {
            resolved.fill_from(&self.nodes[g.0].defaults);
            current = self.nodes[g.0].parent;
        }
        compose(&self.template(id), &resolved)
    }

    /// Templates of all leaf groups, in insertion order.
    pub fn leaf_templates(&self) -> Vec<String> {
        (0..self.nodes.len())
            .map(GroupId)
            .filter(|id| self.is_leaf(*id))
            .map(|id| self.template(id))
            .collect()
    }

    /// Number of groups.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True for a tree without groups.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
