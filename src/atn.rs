//! Grammar graph
//!
//! An augmented transition network is the grammar as the walkers see
//! it: one finite-state machine per rule, wired together by rule
//! transitions.  The graph is built once per grammar through
//! [`AtnBuilder`], validated, and then shared read-only by every
//! encoder, decoder and matcher.

use num_traits::FromPrimitive;

use crate::intervals::IntervalSet;
use crate::Error;

/// Token type of the synthetic end-of-input token.
pub const TOKEN_EOF: i32 = -1;

/// State classification, with the numeric codes grammar serializations
/// use for it.  The walkers only branch on `RuleStart` and `RuleStop`;
/// the rest is carried so adapters can round-trip their grammars.
#[derive(Clone, Copy, Debug, PartialEq, Eq, num_derive::FromPrimitive)]
pub enum StateKind {
    Basic = 1,
    RuleStart = 2,
    BlockStart = 3,
    PlusBlockStart = 4,
    StarBlockStart = 5,
    TokenStart = 6,
    RuleStop = 7,
    BlockEnd = 8,
    StarLoopBack = 9,
    StarLoopEntry = 10,
    PlusLoopBack = 11,
    LoopEnd = 12
}

impl StateKind {
    /// decode a serialized state-type code
    pub fn from_code(code: u8) -> Option<Self> {
        Self::from_u8(code)
    }
}

/// One outgoing edge of a state.
///
/// `Atom` labels are `i32` because parser atoms may carry [`TOKEN_EOF`];
/// every other label is a non-negative code set.
#[derive(Clone, Debug)]
pub enum Transition {
    Epsilon { target: usize },
    Atom { target: usize, label: i32 },
    Range { target: usize, set: IntervalSet },
    Set { target: usize, set: IntervalSet },
    NotSet { target: usize, set: IntervalSet },
    Rule { rule: usize, target: usize, follow: usize },
    Wildcard { target: usize }
}

impl Transition {
    /// the state this edge leads to (for rule calls, the sub-rule start)
    pub fn target(&self) -> usize {
        match *self {
            Transition::Epsilon { target } => target,
            Transition::Atom { target, .. } => target,
            Transition::Range { target, .. } => target,
            Transition::Set { target, .. } => target,
            Transition::NotSet { target, .. } => target,
            Transition::Rule { target, .. } => target,
            Transition::Wildcard { target } => target
        }
    }
}

#[derive(Clone, Debug)]
pub struct State {
    pub id: usize,
    pub kind: StateKind,
    pub rule: usize,
    pub transitions: Vec<Transition>
}

/// A validated, immutable transition network.
#[derive(Clone, Debug)]
pub struct Atn {
    states: Vec<State>,
    rule_start: Vec<usize>,
    rule_stop: Vec<usize>
}

impl Atn {
    pub fn num_rules(&self) -> usize {
        self.rule_start.len()
    }
    pub fn num_states(&self) -> usize {
        self.states.len()
    }
    pub fn state(&self, id: usize) -> &State {
        &self.states[id]
    }
    /// entry state of a rule's sub-machine
    pub fn rule_start(&self, rule: usize) -> usize {
        self.rule_start[rule]
    }
    /// exit state of a rule's sub-machine
    pub fn rule_stop(&self, rule: usize) -> usize {
        self.rule_stop[rule]
    }
}

/// Constructive surface for grammar adapters (and tests).
///
/// States are appended in any order; `build` checks that every rule
/// `0..n` has exactly one start and one stop state and that all
/// transition targets exist.
#[derive(Default)]
pub struct AtnBuilder {
    states: Vec<State>
}

impl AtnBuilder {
    pub fn new() -> Self {
        Self { states: Vec::new() }
    }
    /// append a state, returning its id
    pub fn state(&mut self, kind: StateKind, rule: usize) -> usize {
        let id = self.states.len();
        self.states.push(State { id, kind, rule, transitions: Vec::new() });
        id
    }
    pub fn transition(&mut self, from: usize, transition: Transition) -> &mut Self {
        self.states[from].transitions.push(transition);
        self
    }
    pub fn epsilon(&mut self, from: usize, target: usize) -> &mut Self {
        self.transition(from, Transition::Epsilon { target })
    }
    pub fn build(self) -> Result<Atn, Error> {
        let num_rules = match self.states.iter().map(|s| s.rule + 1).max() {
            Some(n) => n,
            None => return Err(Error::EmptyGrammar)
        };
        let mut rule_start = vec![usize::MAX; num_rules];
        let mut rule_stop = vec![usize::MAX; num_rules];
        for state in &self.states {
            match state.kind {
                StateKind::RuleStart | StateKind::TokenStart => {
                    if rule_start[state.rule] != usize::MAX {
                        return Err(Error::MalformedGrammar("duplicate rule start state"));
                    }
                    rule_start[state.rule] = state.id;
                }
                StateKind::RuleStop => {
                    if rule_stop[state.rule] != usize::MAX {
                        return Err(Error::MalformedGrammar("duplicate rule stop state"));
                    }
                    rule_stop[state.rule] = state.id;
                }
                _ => {}
            }
        }
        if rule_start.contains(&usize::MAX) || rule_stop.contains(&usize::MAX) {
            return Err(Error::MalformedGrammar("rule without start or stop state"));
        }
        for state in &self.states {
            for transition in &state.transitions {
                if transition.target() >= self.states.len() {
                    return Err(Error::MalformedGrammar("transition target out of range"));
                }
                if let Transition::Rule { rule, follow, .. } = *transition {
                    if rule >= num_rules {
                        return Err(Error::MalformedGrammar("rule transition to unknown rule"));
                    }
                    if follow >= self.states.len() {
                        return Err(Error::MalformedGrammar("follow state out of range"));
                    }
                }
            }
        }
        Ok(Atn { states: self.states, rule_start, rule_stop })
    }
}

/// The parser and lexer networks of one grammar.
pub struct Grammar {
    pub parser: Atn,
    pub lexer: Atn
}

impl Grammar {
    pub fn new(parser: Atn, lexer: Atn) -> Result<Self, Error> {
        if parser.num_rules() == 0 || lexer.num_rules() == 0 {
            return Err(Error::EmptyGrammar);
        }
        Ok(Self { parser, lexer })
    }
}

#[test]
fn builds_minimal_rule() {
    let mut builder = AtnBuilder::new();
    let start = builder.state(StateKind::RuleStart, 0);
    let stop = builder.state(StateKind::RuleStop, 0);
    builder.epsilon(start, stop);
    let atn = builder.build().unwrap();
    assert_eq!(atn.num_rules(), 1);
    assert_eq!(atn.rule_start(0), start);
    assert_eq!(atn.rule_stop(0), stop);
    assert_eq!(atn.state(start).transitions.len(), 1);
}

#[test]
fn rejects_missing_stop_state() {
    let mut builder = AtnBuilder::new();
    builder.state(StateKind::RuleStart, 0);
    assert!(matches!(builder.build(), Err(Error::MalformedGrammar(_))));
}

#[test]
fn rejects_dangling_target() {
    let mut builder = AtnBuilder::new();
    let start = builder.state(StateKind::RuleStart, 0);
    builder.state(StateKind::RuleStop, 0);
    builder.epsilon(start, 99);
    assert!(matches!(builder.build(), Err(Error::MalformedGrammar(_))));
}

#[test]
fn state_kind_codes_round_trip() {
    assert_eq!(StateKind::from_code(2), Some(StateKind::RuleStart));
    assert_eq!(StateKind::from_code(7), Some(StateKind::RuleStop));
    assert_eq!(StateKind::from_code(10), Some(StateKind::StarLoopEntry));
    assert_eq!(StateKind::from_code(0), None);
    assert_eq!(StateKind::from_code(13), None);
}

#[test]
fn token_start_opens_a_lexer_rule() {
    let mut builder = AtnBuilder::new();
    let start = builder.state(StateKind::TokenStart, 0);
    let stop = builder.state(StateKind::RuleStop, 0);
    builder.transition(start, Transition::Atom { target: stop, label: 'x' as i32 });
    let atn = builder.build().unwrap();
    assert_eq!(atn.rule_start(0), start);
}
