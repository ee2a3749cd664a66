//! Parse trees
//!
//! Two tree shapes live here.  [`ParseTree`] is the arena the decoder
//! grows: rule nodes over symbol nodes over literal characters, with
//! child links for traversal and parent links for the router's
//! rule-path queries.  [`SourceTree`] is the flat form an external
//! parse-tree provider hands to the encoder, and [`WrappedTree`] is
//! its rewrite with left-recursive nestings collapsed into the linear
//! shape the parser network actually traces.

use crate::tools::Stack;

pub type NodeId = usize;

/// Decoder-built tree node payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TreeNodeKind {
    /// parser rule instance
    Rule { rule: usize },
    /// lexer rule instance (a token or one of its sub-rules)
    Symbol { rule: usize },
    /// single decoded character
    Literal { ch: char }
}

#[derive(Debug)]
pub struct TreeNode {
    pub kind: TreeNodeKind,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>
}

/// Arena-allocated parse tree owned by one decode call.
#[derive(Default)]
pub struct ParseTree {
    nodes: Vec<TreeNode>
}

impl ParseTree {
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    pub fn add(&mut self, kind: TreeNodeKind, parent: Option<NodeId>) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(TreeNode { kind, parent, children: Vec::new() });
        if let Some(p) = parent {
            self.nodes[p].children.push(id);
        }
        id
    }

    /// append `child` to `parent` without a back link; the decoder uses
    /// this for token nodes spawned from parser context, whose rule
    /// path must not leak into the surrounding parser rules
    pub fn add_detached(&mut self, kind: TreeNodeKind, parent: NodeId) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(TreeNode { kind, parent: None, children: Vec::new() });
        self.nodes[parent].children.push(id);
        id
    }

    pub fn node(&self, id: NodeId) -> &TreeNode {
        &self.nodes[id]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// rule indices on the path from `id` up to its root, following
    /// parent links as far as they reach
    pub fn path_rules(&self, id: NodeId) -> std::collections::HashSet<usize> {
        let mut rules = std::collections::HashSet::new();
        let mut cursor = Some(id);
        while let Some(at) = cursor {
            let node = &self.nodes[at];
            match node.kind {
                TreeNodeKind::Rule { rule } | TreeNodeKind::Symbol { rule } => {
                    rules.insert(rule);
                }
                TreeNodeKind::Literal { .. } => {}
            }
            cursor = node.parent;
        }
        rules
    }

    /// concatenate the literal characters in document order
    pub fn render(&self, root: NodeId) -> String {
        let mut out = String::new();
        let mut stack: Stack<NodeId> = Stack::new();
        stack.push(root);
        while !stack.is_empty() {
            let node = &self.nodes[stack.pop()];
            for &child in node.children.iter().rev() {
                stack.push(child);
            }
            if let TreeNodeKind::Literal { ch } = node.kind {
                out.push(ch);
            }
        }
        out
    }
}

/// Encoder-side input: the external parse tree reduced to what the
/// encoder consumes.  Token nodes carry the token type and the exact
/// text the lexer produced for them.
#[derive(Clone, Debug)]
pub enum SourceNode {
    Rule { rule: usize, children: Vec<NodeId> },
    Token { token_type: i32, text: String }
}

#[derive(Default)]
pub struct SourceTree {
    nodes: Vec<SourceNode>
}

impl SourceTree {
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }
    pub fn rule(&mut self, rule: usize, children: Vec<NodeId>) -> NodeId {
        self.nodes.push(SourceNode::Rule { rule, children });
        self.nodes.len() - 1
    }
    pub fn token(&mut self, token_type: i32, text: &str) -> NodeId {
        self.nodes.push(SourceNode::Token { token_type, text: text.to_string() });
        self.nodes.len() - 1
    }
    pub fn node(&self, id: NodeId) -> &SourceNode {
        &self.nodes[id]
    }
    /// document-order concatenation of all token texts under `root`
    pub fn render(&self, root: NodeId) -> String {
        let mut out = String::new();
        let mut stack: Stack<NodeId> = Stack::new();
        stack.push(root);
        while !stack.is_empty() {
            match self.node(stack.pop()) {
                SourceNode::Rule { children, .. } => {
                    for &child in children.iter().rev() {
                        stack.push(child);
                    }
                }
                SourceNode::Token { text, .. } => out.push_str(text)
            }
        }
        out
    }
}

struct WrappedNode {
    source: NodeId,
    parent: Option<usize>,
    children: Vec<usize>
}

/// The source tree rewritten so that no rule node's first child shares
/// its rule index: a left-recursive nesting is spliced into its parent,
/// matching the iterative loop the parser network uses for such rules.
pub struct WrappedTree<'t> {
    source: &'t SourceTree,
    nodes: Vec<WrappedNode>,
    root: usize
}

impl<'t> WrappedTree<'t> {
    pub fn new(source: &'t SourceTree, root: NodeId) -> Self {
        let mut tree = Self { source, nodes: Vec::new(), root: 0 };
        tree.root = tree.wrap(root);
        tree.eliminate_left_recursion();
        tree
    }

    fn wrap(&mut self, source_root: NodeId) -> usize {
        let root = self.nodes.len();
        self.nodes.push(WrappedNode { source: source_root, parent: None, children: Vec::new() });
        let mut stack: Stack<usize> = Stack::new();
        stack.push(root);
        while !stack.is_empty() {
            let id = stack.pop();
            if let SourceNode::Rule { children, .. } = self.source.node(self.nodes[id].source) {
                for &child in children.clone().iter() {
                    let wrapped = self.nodes.len();
                    self.nodes.push(WrappedNode { source: child, parent: Some(id), children: Vec::new() });
                    self.nodes[id].children.push(wrapped);
                    stack.push(wrapped);
                }
            }
        }
        root
    }

    pub fn root(&self) -> usize {
        self.root
    }

    pub fn children(&self, id: usize) -> &[usize] {
        &self.nodes[id].children
    }

    pub fn is_rule(&self, id: usize) -> bool {
        matches!(self.source.node(self.nodes[id].source), SourceNode::Rule { .. })
    }

    /// rule index; panics when called on a token node (caller bug)
    pub fn rule_index(&self, id: usize) -> usize {
        match self.source.node(self.nodes[id].source) {
            SourceNode::Rule { rule, .. } => *rule,
            SourceNode::Token { .. } => panic!("token node has no rule index")
        }
    }

    /// token type and text; panics when called on a rule node
    pub fn token(&self, id: usize) -> (i32, &str) {
        match self.source.node(self.nodes[id].source) {
            SourceNode::Token { token_type, text } => (*token_type, text.as_str()),
            SourceNode::Rule { .. } => panic!("rule node is not a token")
        }
    }

    fn is_left_recursive(&self, id: usize) -> bool {
        if !self.is_rule(id) {
            return false;
        }
        match self.nodes[id].parent {
            Some(parent) if self.is_rule(parent) => {
                self.rule_index(parent) == self.rule_index(id)
            }
            _ => false
        }
    }

    fn is_first_child(&self, id: usize) -> bool {
        match self.nodes[id].parent {
            Some(parent) => self.nodes[parent].children.first() == Some(&id),
            None => false
        }
    }

    fn eliminate_left_recursion(&mut self) {
        let mut stack: Stack<usize> = Stack::new();
        stack.push(self.root);
        while !stack.is_empty() {
            let node = stack.pop();
            if !self.is_rule(node) || self.nodes[node].children.is_empty() {
                continue;
            }
            let first_child = self.nodes[node].children[0];
            if self.is_rule(first_child) && self.is_left_recursive(first_child) {
                // dig down to the innermost nesting first
                stack.push(first_child);
                continue;
            }
            if self.is_left_recursive(node) && self.is_first_child(node) {
                // splice this node's children into the parent's slot
                let parent = self.nodes[node].parent.expect("recursive node has a parent");
                let lifted = std::mem::take(&mut self.nodes[node].children);
                for &child in &lifted {
                    self.nodes[child].parent = Some(parent);
                }
                let tail: Vec<usize> = self.nodes[parent].children[1..].to_vec();
                let mut merged = lifted;
                merged.extend(tail);
                self.nodes[parent].children = merged;
                stack.push(parent);
                continue;
            }
            for &child in self.nodes[node].children.iter().rev() {
                stack.push(child);
            }
        }
    }
}

#[test]
fn render_concatenates_in_document_order() {
    let mut tree = ParseTree::new();
    let root = tree.add(TreeNodeKind::Rule { rule: 0 }, None);
    let sym = tree.add(TreeNodeKind::Symbol { rule: 1 }, Some(root));
    tree.add(TreeNodeKind::Literal { ch: 'a' }, Some(sym));
    tree.add(TreeNodeKind::Literal { ch: 'b' }, Some(sym));
    let other = tree.add(TreeNodeKind::Symbol { rule: 2 }, Some(root));
    tree.add(TreeNodeKind::Literal { ch: '!' }, Some(other));
    assert_eq!(tree.render(root), "ab!");
}

#[test]
fn path_rules_stops_at_detached_nodes() {
    let mut tree = ParseTree::new();
    let root = tree.add(TreeNodeKind::Rule { rule: 0 }, None);
    let inner = tree.add(TreeNodeKind::Rule { rule: 3 }, Some(root));
    let sym = tree.add_detached(TreeNodeKind::Symbol { rule: 5 }, inner);
    let sub = tree.add(TreeNodeKind::Symbol { rule: 6 }, Some(sym));

    let parser_path = tree.path_rules(inner);
    assert_eq!(parser_path, [0, 3].into_iter().collect());
    // the token subtree sees only lexer rules
    let lexer_path = tree.path_rules(sub);
    assert_eq!(lexer_path, [5, 6].into_iter().collect());
}

#[test]
fn wrapping_flattens_left_recursion() {
    // expr(expr(expr(A), B), C) collapses to expr(A, B, C)
    let mut source = SourceTree::new();
    let a = source.token(1, "a");
    let b = source.token(2, "b");
    let c = source.token(3, "c");
    let innermost = source.rule(7, vec![a]);
    let middle = source.rule(7, vec![innermost, b]);
    let root = source.rule(7, vec![middle, c]);

    let wrapped = WrappedTree::new(&source, root);
    let top = wrapped.root();
    assert_eq!(wrapped.rule_index(top), 7);
    let children: Vec<(i32, String)> = wrapped
        .children(top)
        .iter()
        .map(|&ch| {
            let (token_type, text) = wrapped.token(ch);
            (token_type, text.to_string())
        })
        .collect();
    assert_eq!(
        children,
        vec![(1, "a".to_string()), (2, "b".to_string()), (3, "c".to_string())]
    );
}

#[test]
fn wrapping_keeps_non_recursive_nesting() {
    let mut source = SourceTree::new();
    let a = source.token(1, "x");
    let inner = source.rule(2, vec![a]);
    let root = source.rule(1, vec![inner]);
    let wrapped = WrappedTree::new(&source, root);
    assert_eq!(wrapped.children(wrapped.root()).len(), 1);
    let child = wrapped.children(wrapped.root())[0];
    assert_eq!(wrapped.rule_index(child), 2);
    assert_eq!(wrapped.children(child).len(), 1);
}

#[test]
fn deep_recursion_collapses_fully() {
    // e(e(e(e(t),+,t),+,t),+,t) -> e with 7 children
    let mut source = SourceTree::new();
    let mut node = {
        let t = source.token(9, "t");
        source.rule(4, vec![t])
    };
    for _ in 0..3 {
        let plus = source.token(5, "+");
        let t = source.token(9, "t");
        node = source.rule(4, vec![node, plus, t]);
    }
    let wrapped = WrappedTree::new(&source, node);
    assert_eq!(wrapped.children(wrapped.root()).len(), 7);
    assert!(wrapped.children(wrapped.root()).iter().all(|&ch| !wrapped.is_rule(ch)));
}
