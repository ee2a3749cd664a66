//! Choice routing for exhausted chromosomes
//!
//! Once a chromosome runs out of recorded bits the decoder still has
//! to pick transitions, and picking them blindly walks straight into
//! recursion blow-ups.  Each rule gets a router that learns, from every
//! decode pass, which choice at which state leads where and whether it
//! crosses rules (none, foreign ones, or the rule itself).  Routing is
//! then a categorical shortest-path search toward the rule's stop
//! state that prefers rule-free paths, then unexplored edges, then
//! transitive recursion, and self-recursion only as a last resort.
//!
//! Learning runs on a background consumer fed over a channel; a `None`
//! item is a barrier the producer waits on before reading the tables.

use std::collections::{HashMap, HashSet};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;

use log::{debug, trace};

use crate::atn::Atn;
use crate::stream::Decoder;
use crate::tools::{Queue, Stack};

const ZERO: usize = 0;
const NON_RECURSIVE: usize = 1;
const RECURSIVE: usize = 2;

/// What the decoder observed between two consecutive multi-choice
/// states: taking `choice` at `src` eventually reached `dest`, crossing
/// `rules` on the way.  `fanout` is the choice count of `src`, carried
/// so the learner needs no grammar access.
pub struct RouteEdge {
    pub src: usize,
    pub dest: usize,
    pub choice: usize,
    pub fanout: usize,
    pub rules: Vec<usize>
}

struct RouteOptions {
    choice_to_next_state: Vec<Option<usize>>,
    not_visited_choices: Vec<usize>,
    bucket_to_choices: [Vec<usize>; 3],
    non_recursive_choice_rules: HashMap<usize, HashSet<usize>>
}

impl RouteOptions {
    fn new(fanout: usize) -> Self {
        Self {
            choice_to_next_state: vec![None; fanout],
            not_visited_choices: (0..fanout).collect(),
            bucket_to_choices: [Vec::new(), Vec::new(), Vec::new()],
            non_recursive_choice_rules: HashMap::new()
        }
    }
}

struct RouterTables {
    state_to_options: HashMap<usize, RouteOptions>,
    next_choices: Stack<usize>
}

/// Per-rule routing state.  Observations accumulate across every
/// decode of the rule within one walker lifetime.
pub struct Router {
    rule: usize,
    stop_state: usize,
    inner: Mutex<RouterTables>
}

impl Router {
    pub fn new(rule: usize, stop_state: usize) -> Self {
        Self {
            rule,
            stop_state,
            inner: Mutex::new(RouterTables {
                state_to_options: HashMap::new(),
                next_choices: Stack::new()
            })
        }
    }

    /// Integrate one observed edge.  Only the first observation of a
    /// (state, choice) pair classifies it; a choice never changes its
    /// bucket afterwards.
    pub fn learn(&self, edge: RouteEdge) {
        let mut tables = self.inner.lock().expect("router lock");
        let options = tables
            .state_to_options
            .entry(edge.src)
            .or_insert_with(|| RouteOptions::new(edge.fanout));

        let found = match options.not_visited_choices.iter().position(|&c| c == edge.choice) {
            Some(at) => at,
            None => return
        };
        options.not_visited_choices.swap_remove(found);

        let bucket = if edge.rules.is_empty() {
            ZERO
        } else if edge.rules.contains(&self.rule) {
            RECURSIVE
        } else {
            NON_RECURSIVE
        };
        options.bucket_to_choices[bucket].push(edge.choice);
        options.choice_to_next_state[edge.choice] = Some(edge.dest);
        if bucket == NON_RECURSIVE {
            options
                .non_recursive_choice_rules
                .insert(edge.choice, edge.rules.iter().copied().collect());
        }
    }

    /// Pick the choice to take at `state`, given the rule indices on
    /// the current tree path.  Emits a whole path's worth of choices
    /// into an internal buffer and replays them on subsequent calls.
    pub fn route(
        &self,
        atn: &Atn,
        state: usize,
        root_path_rules: &HashSet<usize>,
        decoder: &mut Decoder
    ) -> usize {
        let mut tables = self.inner.lock().expect("router lock");
        if !tables.next_choices.is_empty() {
            return tables.next_choices.pop();
        }

        let fanout = atn.state(state).transitions.len();
        if !tables.state_to_options.contains_key(&state) {
            // nothing learned here yet, provoke learning with an
            // arbitrary choice
            let choice = decoder.prng_int63() as usize % fanout;
            trace!("rule {}: unlearned state {}, random choice {}", self.rule, state, choice);
            return choice;
        }

        // Categorical shortest-path search toward the stop state:
        // 1. rule-free paths, depth first
        // 2. the shallowest node with unexplored choices
        // 3. transitively recursive paths, breadth first
        // 4. self-recursive paths, breadth first
        let mut search = PriorityQueue::new(state);
        let mut current = Some(search.push_node(state, usize::MAX, 0, None));
        let found = loop {
            if let Some(at) = current {
                if search.node(at).state == self.stop_state {
                    break at;
                }
            }
            if search.zero_nodes.is_empty() {
                if let Some(best) = search.best_not_visited {
                    break best;
                }
            }
            match current {
                Some(at) => {
                    current = search.evaluate(at, &tables.state_to_options, root_path_rules, decoder)
                }
                None => {
                    // the learned subgraph is a dead end from here
                    let choice = decoder.prng_int63() as usize % fanout;
                    debug!("rule {}: search dead end at state {}, random choice {}", self.rule, state, choice);
                    return choice;
                }
            }
        };

        if search.node(found).state != self.stop_state {
            // head for the unexplored edge so the next decode learns it
            let options = &tables.state_to_options[&search.node(found).state];
            let pick = options.not_visited_choices
                [decoder.prng_int63() as usize % options.not_visited_choices.len()];
            tables.next_choices.push(pick);
        }
        let mut at = found;
        while let Some(prev) = search.node(at).prev {
            tables.next_choices.push(search.node(at).prev_choice);
            at = prev;
        }
        trace!("rule {}: routed {} choices from state {}", self.rule, tables.next_choices.len(), state);
        tables.next_choices.pop()
    }
}

struct RouteNode {
    depth: usize,
    state: usize,
    prev_choice: usize,
    prev: Option<usize>
}

/// The strictly categorical queue behind [`Router::route`]: three
/// containers plus the named best-unexplored slot, never a scored heap.
struct PriorityQueue {
    arena: Vec<RouteNode>,
    zero_nodes: Stack<usize>,
    transitive_recursive_nodes: Queue<usize>,
    self_recursive_nodes: Queue<usize>,
    visited_states: HashSet<usize>,
    best_not_visited: Option<usize>
}

impl PriorityQueue {
    fn new(initial_state: usize) -> Self {
        Self {
            arena: Vec::new(),
            zero_nodes: Stack::new(),
            transitive_recursive_nodes: Queue::new(),
            self_recursive_nodes: Queue::new(),
            visited_states: [initial_state].into_iter().collect(),
            best_not_visited: None
        }
    }

    fn push_node(&mut self, state: usize, prev_choice: usize, depth: usize, prev: Option<usize>) -> usize {
        self.arena.push(RouteNode { depth, state, prev_choice, prev });
        self.arena.len() - 1
    }

    fn node(&self, at: usize) -> &RouteNode {
        &self.arena[at]
    }

    /// Expand one node: enqueue its learned successors into the bucket
    /// containers, then dequeue the next node by category.
    fn evaluate(
        &mut self,
        at: usize,
        state_to_options: &HashMap<usize, RouteOptions>,
        root_path_rules: &HashSet<usize>,
        decoder: &mut Decoder
    ) -> Option<usize> {
        let state = self.arena[at].state;
        let depth = self.arena[at].depth;
        if let Some(options) = state_to_options.get(&state) {
            if !options.not_visited_choices.is_empty() {
                let best_depth = self.best_not_visited.map(|b| self.arena[b].depth);
                if best_depth.map_or(true, |d| depth < d) {
                    self.best_not_visited = Some(at);
                }
            }

            let seed = decoder.prng_int63() as usize;
            for bucket in ZERO..=RECURSIVE {
                let n = options.bucket_to_choices[bucket].len();
                for k in 0..n {
                    let next_choice = options.bucket_to_choices[bucket][(seed + k) % n];
                    let next_state = match options.choice_to_next_state[next_choice] {
                        Some(s) => s,
                        None => continue
                    };
                    if self.visited_states.contains(&next_state) {
                        continue;
                    }
                    self.visited_states.insert(next_state);
                    let next_node = self.push_node(next_state, next_choice, depth + 1, Some(at));
                    match bucket {
                        ZERO => self.zero_nodes.push(next_node),
                        NON_RECURSIVE => {
                            let crossed = options.non_recursive_choice_rules.get(&next_choice);
                            let transitive = crossed.map_or(false, |rules| {
                                root_path_rules.iter().any(|r| rules.contains(r))
                            });
                            if transitive {
                                self.transitive_recursive_nodes.enqueue(next_node);
                            } else {
                                // crosses only unrelated rules, as cheap as rule-free
                                self.zero_nodes.push(next_node);
                            }
                        }
                        _ => self.self_recursive_nodes.enqueue(next_node)
                    }
                }
            }
        }

        if !self.zero_nodes.is_empty() {
            return Some(self.zero_nodes.pop());
        }
        if self.best_not_visited.is_some() {
            return self.best_not_visited;
        }
        if !self.transitive_recursive_nodes.is_empty() {
            return Some(self.transitive_recursive_nodes.dequeue());
        }
        if !self.self_recursive_nodes.is_empty() {
            return Some(self.self_recursive_nodes.dequeue());
        }
        None
    }
}

/// Handle to one background learning pass.  Edges stream to a consumer
/// thread; `barrier` flushes the channel so the producer can read the
/// router's tables.  Dropping the handle lets the consumer drain and
/// exit.
pub struct Learner {
    tx: mpsc::Sender<Option<RouteEdge>>,
    ack: mpsc::Receiver<()>
}

impl Learner {
    pub fn spawn(router: Arc<Router>) -> Self {
        let (tx, rx) = mpsc::channel::<Option<RouteEdge>>();
        let (ack_tx, ack_rx) = mpsc::channel::<()>();
        thread::spawn(move || {
            for item in rx {
                match item {
                    Some(edge) => router.learn(edge),
                    None => {
                        // barrier: everything sent before this is integrated
                        let _ = ack_tx.send(());
                    }
                }
            }
        });
        Self { tx, ack: ack_rx }
    }

    pub fn send(&self, edge: RouteEdge) {
        let _ = self.tx.send(Some(edge));
    }

    /// block until all previously sent edges are visible in the tables
    pub fn barrier(&self) {
        if self.tx.send(None).is_ok() {
            let _ = self.ack.recv();
        }
    }
}

#[cfg(test)]
use crate::atn::{AtnBuilder, StateKind, Transition};

/// three states with fan-out 3 wired to a stop state; the labels do
/// not matter for routing, only the learned edges do
#[cfg(test)]
fn scaffold() -> Atn {
    let mut builder = AtnBuilder::new();
    let start = builder.state(StateKind::RuleStart, 0);
    let a = builder.state(StateKind::Basic, 0);
    let b = builder.state(StateKind::Basic, 0);
    let stop = builder.state(StateKind::RuleStop, 0);
    for target in [a, b, stop] {
        builder.epsilon(start, target);
        builder.epsilon(a, target);
        builder.epsilon(b, target);
    }
    builder.build().unwrap()
}

#[cfg(test)]
fn decoder() -> Decoder {
    Decoder::new(&[], 1, 1, false)
}

#[test]
fn unlearned_state_returns_any_choice() {
    let atn = scaffold();
    let router = Router::new(0, atn.rule_stop(0));
    let mut decoder = decoder();
    for _ in 0..16 {
        assert!(router.route(&atn, 0, &HashSet::new(), &mut decoder) < 3);
    }
}

#[test]
fn prefers_the_rule_free_path_to_stop() {
    let atn = scaffold();
    let stop = atn.rule_stop(0);
    let router = Router::new(0, stop);
    // all three choices at state 0 learned: 0 -> a (recursive),
    // 1 -> b (foreign rules), 2 -> stop (rule-free)
    router.learn(RouteEdge { src: 0, dest: 1, choice: 0, fanout: 3, rules: vec![0] });
    router.learn(RouteEdge { src: 0, dest: 2, choice: 1, fanout: 3, rules: vec![4, 5] });
    router.learn(RouteEdge { src: 0, dest: stop, choice: 2, fanout: 3, rules: vec![] });
    let mut decoder = decoder();
    for _ in 0..8 {
        assert_eq!(router.route(&atn, 0, &HashSet::new(), &mut decoder), 2);
    }
}

#[test]
fn first_observation_wins() {
    let atn = scaffold();
    let stop = atn.rule_stop(0);
    let router = Router::new(0, stop);
    router.learn(RouteEdge { src: 0, dest: stop, choice: 2, fanout: 3, rules: vec![] });
    // a later, contradictory observation of the same choice is ignored
    router.learn(RouteEdge { src: 0, dest: 1, choice: 2, fanout: 3, rules: vec![0] });
    router.learn(RouteEdge { src: 0, dest: 1, choice: 0, fanout: 3, rules: vec![0] });
    router.learn(RouteEdge { src: 0, dest: 2, choice: 1, fanout: 3, rules: vec![0] });
    let mut decoder = decoder();
    assert_eq!(router.route(&atn, 0, &HashSet::new(), &mut decoder), 2);
}

#[test]
fn explores_unvisited_choices_before_recursing() {
    let atn = scaffold();
    let stop = atn.rule_stop(0);
    let router = Router::new(0, stop);
    // only a self-recursive choice is known; the two unexplored
    // choices must win over taking the recursion
    router.learn(RouteEdge { src: 0, dest: 1, choice: 0, fanout: 3, rules: vec![0] });
    let mut decoder = decoder();
    let choice = router.route(&atn, 0, &HashSet::new(), &mut decoder);
    assert!(choice == 1 || choice == 2);
}

#[test]
fn transitive_recursion_ranks_below_detours() {
    let atn = scaffold();
    let stop = atn.rule_stop(0);
    let router = Router::new(0, stop);
    // choice 0 crosses rule 7 (on the tree path), choice 1 detours
    // over state 2 which continues rule-free to stop
    router.learn(RouteEdge { src: 0, dest: 1, choice: 0, fanout: 3, rules: vec![7] });
    router.learn(RouteEdge { src: 0, dest: 2, choice: 1, fanout: 3, rules: vec![4] });
    router.learn(RouteEdge { src: 0, dest: 1, choice: 2, fanout: 3, rules: vec![0] });
    router.learn(RouteEdge { src: 2, dest: stop, choice: 0, fanout: 3, rules: vec![] });
    let root_path: HashSet<usize> = [7].into_iter().collect();
    let mut decoder = decoder();
    assert_eq!(router.route(&atn, 0, &root_path, &mut decoder), 1);
    // the buffered continuation steps rule-free to the stop state
    assert_eq!(router.route(&atn, 2, &root_path, &mut decoder), 0);
}

#[test]
fn learner_barrier_makes_edges_visible() {
    let atn = scaffold();
    let stop = atn.rule_stop(0);
    let router = Arc::new(Router::new(0, stop));
    let learner = Learner::spawn(Arc::clone(&router));
    for choice in 0..3 {
        learner.send(RouteEdge {
            src: 0,
            dest: if choice == 2 { stop } else { choice + 1 },
            choice,
            fanout: 3,
            rules: if choice == 2 { vec![] } else { vec![0] }
        });
    }
    learner.barrier();
    let mut decoder = decoder();
    assert_eq!(router.route(&atn, 0, &HashSet::new(), &mut decoder), 2);
}
