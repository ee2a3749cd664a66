//! ATN walkers
//!
//! The encoder walks a wrapped parse tree against the parser network,
//! using the tree's children to resolve every choice, and records the
//! resolved decisions into the bit stream (the lexer matcher supplies
//! the paths for terminals).  The decoder walks the networks the other
//! way, consuming decisions to grow a parse tree, asking the router
//! whenever the chromosome has nothing left to say.  Repair is a decode
//! whose write-back stream re-records every decision actually taken.
//!
//! All decode entry points honor the walker deadline and return empty
//! results once it passes.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use log::{debug, trace};

use crate::atn::{Grammar, StateKind, Transition, TOKEN_EOF};
use crate::intervals::IntervalSet;
use crate::matcher::match_text;
use crate::route::{Learner, RouteEdge, Router};
use crate::stream::{Decoder, Encoder};
use crate::tools::{Queue, Stack};
use crate::tree::{NodeId, ParseTree, SourceTree, TreeNodeKind, WrappedTree};
use crate::mutation;

/// code point for a decision index drawn from a label
fn label_char(code: u32) -> char {
    char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER)
}

struct TraceEdge {
    state: usize,
    choice: usize,
    cursor: usize
}

/// One grammar's encoder/decoder facade.  Routers persist across calls,
/// so repeated decodes of the same grammar keep refining their routes.
pub struct Walker<'g> {
    grammar: &'g Grammar,
    parser_routers: std::collections::HashMap<usize, Arc<Router>>,
    lexer_routers: std::collections::HashMap<usize, Arc<Router>>,
    deadline: Option<Instant>
}

impl<'g> Walker<'g> {
    pub fn new(grammar: &'g Grammar) -> Self {
        Self {
            grammar,
            parser_routers: std::collections::HashMap::new(),
            lexer_routers: std::collections::HashMap::new(),
            deadline: None
        }
    }

    /// absolute instant after which decode work aborts with empty output
    pub fn set_deadline(&mut self, deadline: Instant) {
        self.deadline = Some(deadline);
    }

    fn exceeded_deadline(&self) -> bool {
        self.deadline.map_or(false, |deadline| Instant::now() > deadline)
    }

    /// Encode a parse tree into a chromosome.
    pub fn encode(&self, tree: &SourceTree, root: NodeId) -> Vec<u8> {
        let wrapped = WrappedTree::new(tree, root);
        let mut encoder = Encoder::new();
        let mut stack: Stack<usize> = Stack::new();
        stack.push(wrapped.root());
        while !stack.is_empty() {
            let node = stack.pop();
            if wrapped.is_rule(node) {
                self.encode_parser_rule(&mut encoder, &wrapped, node);
                for &child in wrapped.children(node).iter().rev() {
                    stack.push(child);
                }
            } else {
                let (token_type, text) = wrapped.token(node);
                self.encode_lexer_symbol(&mut encoder, token_type, text);
            }
        }
        encoder.bytes()
    }

    /// Find the unique child-consistent path through the rule's network
    /// by backtracking DFS, then replay it and record each multi-choice
    /// decision.  Panics when the tree does not fit the grammar (the
    /// tree provider's contract).
    fn encode_parser_rule(&self, encoder: &mut Encoder, wrapped: &WrappedTree, node: usize) {
        let atn = &self.grammar.parser;
        let rule = wrapped.rule_index(node);
        let children = wrapped.children(node);

        let mut state = atn.rule_start(rule);
        let mut cursor = 0usize;
        let mut choice = 0usize;
        let mut trace_stack: Stack<TraceEdge> = Stack::new();

        loop {
            let kind = atn.state(state).kind;
            if kind == StateKind::RuleStop && cursor == children.len() {
                break;
            }
            let fanout = atn.state(state).transitions.len();
            if choice >= fanout || kind == StateKind::RuleStop {
                let edge = trace_stack.pop();
                state = edge.state;
                choice = edge.choice + 1;
                cursor = edge.cursor;
                continue;
            }

            let accepted = match &atn.state(state).transitions[choice] {
                Transition::Rule { rule: sub_rule, follow, .. } => {
                    if cursor < children.len()
                        && wrapped.is_rule(children[cursor])
                        && wrapped.rule_index(children[cursor]) == *sub_rule
                    {
                        trace_stack.push(TraceEdge { state, choice, cursor });
                        state = *follow;
                        cursor += 1;
                        choice = 0;
                        true
                    } else {
                        false
                    }
                }
                Transition::Atom { target, label } => {
                    if cursor < children.len()
                        && !wrapped.is_rule(children[cursor])
                        && wrapped.token(children[cursor]).0 == *label
                    {
                        trace_stack.push(TraceEdge { state, choice, cursor });
                        state = *target;
                        cursor += 1;
                        choice = 0;
                        true
                    } else {
                        false
                    }
                }
                Transition::Set { target, set } => {
                    let matches = cursor < children.len() && !wrapped.is_rule(children[cursor]) && {
                        let token_type = wrapped.token(children[cursor]).0;
                        token_type >= 0 && set.contains(token_type as u32)
                    };
                    if matches {
                        trace_stack.push(TraceEdge { state, choice, cursor });
                        state = *target;
                        cursor += 1;
                        choice = 0;
                        true
                    } else {
                        false
                    }
                }
                other => {
                    trace_stack.push(TraceEdge { state, choice, cursor });
                    state = other.target();
                    choice = 0;
                    true
                }
            };
            if !accepted {
                choice += 1;
            }
        }

        let mut edges = Vec::with_capacity(trace_stack.len());
        while !trace_stack.is_empty() {
            edges.push(trace_stack.pop());
        }
        edges.reverse();

        let mut header_set = false;
        for edge in &edges {
            let fanout = atn.state(edge.state).transitions.len();
            if fanout > 1 {
                if !header_set {
                    encoder.write_rule_header(rule, atn.num_rules(), false);
                    header_set = true;
                }
                encoder.encode(edge.choice, fanout);
            }
            if let Transition::Set { set, .. } = &atn.state(edge.state).transitions[edge.choice] {
                if set.len() > 1 {
                    if !header_set {
                        encoder.write_rule_header(rule, atn.num_rules(), false);
                        header_set = true;
                    }
                    let token_type = wrapped.token(children[edge.cursor]).0;
                    encoder.encode(set.index_of(token_type as u32), set.len());
                }
            }
        }
    }

    /// Match the token's text against its lexer rule and emit the
    /// trace's decisions, sub-rule traces in breadth-first order.
    /// End-of-input tokens carry no decisions and are skipped.
    fn encode_lexer_symbol(&self, encoder: &mut Encoder, token_type: i32, text: &str) {
        if token_type == TOKEN_EOF {
            return;
        }
        let atn = &self.grammar.lexer;
        let lexer_rule = (token_type - 1) as usize;
        let chars: Vec<char> = text.chars().collect();
        let trace = match match_text(atn, &chars, atn.rule_start(lexer_rule)) {
            Some(trace) => trace,
            None => panic!("token text {:?} does not match lexer rule {}", text, lexer_rule)
        };

        let mut next_traces: Queue<crate::matcher::LexerTrace> = Queue::new();
        next_traces.enqueue(trace);
        while !next_traces.is_empty() {
            let trace = next_traces.dequeue();
            let mut header_set = false;
            for edge in &trace.edges {
                let segment_rule = atn.state(trace.edges[0].state).rule;
                let fanout = atn.state(edge.state).transitions.len();
                if fanout > 1 {
                    if !header_set {
                        encoder.write_rule_header(segment_rule, atn.num_rules(), true);
                        header_set = true;
                    }
                    encoder.encode(edge.choice, fanout);
                }
                let label = match &atn.state(edge.state).transitions[edge.choice] {
                    Transition::NotSet { set, .. } => Some(set.complement()),
                    Transition::Set { set, .. } | Transition::Range { set, .. } => Some(set.clone()),
                    Transition::Wildcard { .. } => Some(IntervalSet::new().complement()),
                    _ => None
                };
                if let Some(label) = label {
                    if label.len() > 1 {
                        if !header_set {
                            encoder.write_rule_header(segment_rule, atn.num_rules(), true);
                            header_set = true;
                        }
                        let ch = trace.text[edge.cursor] as u32;
                        encoder.encode(label.index_of(ch), label.len());
                    }
                }
            }
            for sub_trace in trace.sub_traces {
                next_traces.enqueue(sub_trace);
            }
        }
    }

    /// Decode a chromosome into text.
    pub fn decode(&mut self, data: &[u8]) -> String {
        let mut decoder = self.decoder_for(data, false);
        let mut tree = ParseTree::new();
        let Some(root) = self.assemble_tree(&mut decoder, &mut tree) else {
            return String::new();
        };
        self.tree_to_string(&tree, root)
    }

    /// Decode a chromosome into text and the canonical re-encoding of
    /// every decision taken along the way.
    pub fn decode_with_repair(&mut self, data: &[u8]) -> (String, Vec<u8>) {
        let mut decoder = self.decoder_for(data, true);
        let mut tree = ParseTree::new();
        let Some(root) = self.assemble_tree(&mut decoder, &mut tree) else {
            return (String::new(), Vec::new());
        };
        let repaired = decoder.write_back_bytes().unwrap_or_default();
        (self.tree_to_string(&tree, root), repaired)
    }

    /// Canonicalize a chromosome: decode it and keep only the
    /// re-encoding.  Empty on deadline.
    pub fn repair(&mut self, data: &[u8]) -> Vec<u8> {
        let mut decoder = self.decoder_for(data, true);
        let mut tree = ParseTree::new();
        if self.assemble_tree(&mut decoder, &mut tree).is_none() {
            return Vec::new();
        }
        decoder.write_back_bytes().unwrap_or_default()
    }

    /// Mutate a chromosome (byte level, grammar independent).
    pub fn mutate(&self, data: &[u8], seed: u64) -> Vec<u8> {
        mutation::mutate(data, seed)
    }

    /// Cross two chromosomes over (byte level, grammar independent).
    pub fn crossover(&self, data1: &[u8], data2: &[u8], seed: u64) -> Vec<u8> {
        mutation::crossover(data1, data2, seed)
    }

    fn decoder_for(&self, data: &[u8], write_back: bool) -> Decoder {
        Decoder::new(
            data,
            self.grammar.parser.num_rules(),
            self.grammar.lexer.num_rules(),
            write_back
        )
    }

    /// Grow the tree from the grammar's start rule, depth first: decode
    /// a node's rule, then push its children.  `None` when the deadline
    /// passes mid-way.
    fn assemble_tree(&mut self, decoder: &mut Decoder, tree: &mut ParseTree) -> Option<NodeId> {
        let root = tree.add(TreeNodeKind::Rule { rule: 0 }, None);
        let mut stack: Stack<NodeId> = Stack::new();
        stack.push(root);
        while !stack.is_empty() {
            if self.exceeded_deadline() {
                debug!("deadline exceeded while assembling the tree");
                return None;
            }
            let node = stack.pop();
            match tree.node(node).kind {
                TreeNodeKind::Rule { .. } => self.decode_parser_rule(decoder, tree, node),
                TreeNodeKind::Symbol { .. } => self.decode_lexer_symbol(decoder, tree, node),
                TreeNodeKind::Literal { .. } => {}
            }
            for &child in tree.node(node).children.iter().rev() {
                stack.push(child);
            }
        }
        Some(root)
    }

    fn decode_parser_rule(&mut self, decoder: &mut Decoder, tree: &mut ParseTree, node: NodeId) {
        let atn = &self.grammar.parser;
        let rule = match tree.node(node).kind {
            TreeNodeKind::Rule { rule } => rule,
            _ => panic!("parser decode on a non-rule node")
        };
        decoder.init(rule, false);
        trace!("parser rule {}: {}", rule, if decoder.is_exhausted() { "extension stream" } else { "recorded bits" });

        let router = Arc::clone(
            self.parser_routers
                .entry(rule)
                .or_insert_with(|| Arc::new(Router::new(rule, atn.rule_stop(rule))))
        );
        let learner = Learner::spawn(Arc::clone(&router));

        let mut state = atn.rule_start(rule);
        let mut prev: Option<(usize, usize)> = None;
        let mut rules: Vec<usize> = Vec::new();
        let mut root_path_rules: Option<HashSet<usize>> = None;

        while atn.state(state).kind != StateKind::RuleStop {
            if self.exceeded_deadline() {
                learner.barrier();
                return;
            }

            let fanout = atn.state(state).transitions.len();
            let choice = if fanout > 1 {
                if let Some((prev_state, prev_choice)) = prev {
                    learner.send(RouteEdge {
                        src: prev_state,
                        dest: state,
                        choice: prev_choice,
                        fanout: atn.state(prev_state).transitions.len(),
                        rules: std::mem::take(&mut rules)
                    });
                }
                let choice = if !decoder.is_exhausted() {
                    decoder.decode(fanout)
                } else {
                    let roots = root_path_rules.get_or_insert_with(|| tree.path_rules(node));
                    learner.barrier();
                    let routed = router.route(atn, state, roots, decoder);
                    decoder.record_choice(routed, fanout);
                    routed
                };
                prev = Some((state, choice));
                rules.clear();
                choice
            } else {
                0
            };

            let transition = &atn.state(state).transitions[choice];
            match transition {
                Transition::Rule { rule: sub_rule, follow, .. } => {
                    tree.add(TreeNodeKind::Rule { rule: *sub_rule }, Some(node));
                    rules.push(*sub_rule);
                    state = *follow;
                    continue;
                }
                Transition::Atom { label, .. } => {
                    if *label != TOKEN_EOF {
                        tree.add_detached(TreeNodeKind::Symbol { rule: (*label - 1) as usize }, node);
                    }
                }
                Transition::Set { set, .. } => {
                    let token_type = set.get(decoder.decode(set.len()));
                    tree.add_detached(TreeNodeKind::Symbol { rule: token_type as usize - 1 }, node);
                }
                Transition::Range { .. } => {
                    panic!("range transitions do not occur in parser networks");
                }
                _ => {}
            }
            state = transition.target();
        }

        if let Some((prev_state, prev_choice)) = prev {
            learner.send(RouteEdge {
                src: prev_state,
                dest: state,
                choice: prev_choice,
                fanout: atn.state(prev_state).transitions.len(),
                rules: std::mem::take(&mut rules)
            });
        }
        learner.barrier();
    }

    fn decode_lexer_symbol(&mut self, decoder: &mut Decoder, tree: &mut ParseTree, node: NodeId) {
        let atn = &self.grammar.lexer;
        let rule = match tree.node(node).kind {
            TreeNodeKind::Symbol { rule } => rule,
            _ => panic!("lexer decode on a non-symbol node")
        };
        decoder.init(rule, true);
        trace!("lexer rule {}: {}", rule, if decoder.is_exhausted() { "extension stream" } else { "recorded bits" });

        let router = Arc::clone(
            self.lexer_routers
                .entry(rule)
                .or_insert_with(|| Arc::new(Router::new(rule, atn.rule_stop(rule))))
        );
        let learner = Learner::spawn(Arc::clone(&router));

        let mut state = atn.rule_start(rule);
        let mut prev: Option<(usize, usize)> = None;
        let mut rules: Vec<usize> = Vec::new();
        let mut root_path_rules: Option<HashSet<usize>> = None;

        while atn.state(state).kind != StateKind::RuleStop {
            if self.exceeded_deadline() {
                learner.barrier();
                return;
            }

            let fanout = atn.state(state).transitions.len();
            let choice = if fanout > 1 {
                if let Some((prev_state, prev_choice)) = prev {
                    learner.send(RouteEdge {
                        src: prev_state,
                        dest: state,
                        choice: prev_choice,
                        fanout: atn.state(prev_state).transitions.len(),
                        rules: std::mem::take(&mut rules)
                    });
                }
                let choice = if !decoder.is_exhausted() {
                    decoder.decode(fanout)
                } else {
                    let roots = root_path_rules.get_or_insert_with(|| tree.path_rules(node));
                    learner.barrier();
                    let routed = router.route(atn, state, roots, decoder);
                    decoder.record_choice(routed, fanout);
                    routed
                };
                prev = Some((state, choice));
                rules.clear();
                choice
            } else {
                0
            };

            let transition = &atn.state(state).transitions[choice];
            match transition {
                Transition::Rule { rule: sub_rule, follow, .. } => {
                    tree.add(TreeNodeKind::Symbol { rule: *sub_rule }, Some(node));
                    rules.push(*sub_rule);
                    state = *follow;
                    continue;
                }
                Transition::Atom { label, .. } => {
                    tree.add(TreeNodeKind::Literal { ch: label_char(*label as u32) }, Some(node));
                }
                // a NotSet label is resolved through its complement
                Transition::NotSet { set, .. } => {
                    let complement = set.complement();
                    let ch = label_char(complement.get(decoder.decode(complement.len())));
                    tree.add(TreeNodeKind::Literal { ch }, Some(node));
                }
                Transition::Set { set, .. } | Transition::Range { set, .. } => {
                    let ch = label_char(set.get(decoder.decode(set.len())));
                    tree.add(TreeNodeKind::Literal { ch }, Some(node));
                }
                // wildcard admits the full character range
                Transition::Wildcard { .. } => {
                    let full = IntervalSet::new().complement();
                    let ch = label_char(full.get(decoder.decode(full.len())));
                    tree.add(TreeNodeKind::Literal { ch }, Some(node));
                }
                Transition::Epsilon { .. } => {}
            }
            state = transition.target();
        }

        if let Some((prev_state, prev_choice)) = prev {
            learner.send(RouteEdge {
                src: prev_state,
                dest: state,
                choice: prev_choice,
                fanout: atn.state(prev_state).transitions.len(),
                rules: std::mem::take(&mut rules)
            });
        }
        learner.barrier();
    }

    /// Flatten the tree's literals into the decoded text, abandoning
    /// the walk if the deadline passes.
    fn tree_to_string(&self, tree: &ParseTree, root: NodeId) -> String {
        let mut out = String::new();
        let mut stack: Stack<NodeId> = Stack::new();
        stack.push(root);
        while !stack.is_empty() {
            if self.exceeded_deadline() {
                return String::new();
            }
            let node = tree.node(stack.pop());
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
