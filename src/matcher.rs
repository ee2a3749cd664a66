//! Lexer path matcher
//!
//! Given a token's text and the start state of its lexer rule, find
//! one path through the lexer network that consumes exactly that text.
//! The search is a backtracking DFS; the hard part is rule transitions,
//! whose consumed length is unknown up front.  For those the matcher
//! computes all candidate sub-matches of every possible length once,
//! memoized per (state, choice, cursor), and retries the same choice
//! with the next candidate before giving up on it.
//!
//! A failed match is benign and returns `None`.

use std::collections::HashMap;

use rayon::prelude::*;

use crate::atn::{Atn, StateKind, Transition};
use crate::tools::Stack;

/// One edge of a matched path.
#[derive(Clone, Debug)]
pub struct LexerTraceEdge {
    pub state: usize,
    pub choice: usize,
    pub cursor: usize,
    sub_trace_len: usize
}

/// A path consuming `text`, with the sub-paths matched by nested rule
/// transitions in the order they were entered.
#[derive(Clone, Debug)]
pub struct LexerTrace {
    pub text: Vec<char>,
    pub edges: Vec<LexerTraceEdge>,
    pub sub_traces: Vec<LexerTrace>
}

/// All successful sub-matches of `text[cursor..i]` for every candidate
/// end `i`, longest on top.  Candidates are independent, so they are
/// evaluated on the worker pool, one task per length.
fn compute_rule_matches(atn: &Atn, text: &[char], cursor: usize, state: usize) -> Stack<LexerTrace> {
    let solutions: Vec<Option<LexerTrace>> = (cursor + 1..=text.len())
        .into_par_iter()
        .map(|i| match_text(atn, &text[cursor..i], state))
        .collect();
    let mut stack = Stack::new();
    for solution in solutions.into_iter().flatten() {
        stack.push(solution);
    }
    stack
}

/// Match `text` from `state`, returning one full trace or `None`.
pub fn match_text(atn: &Atn, text: &[char], start: usize) -> Option<LexerTrace> {
    let mut state = start;
    let mut cursor = 0usize;
    let mut choice = 0usize;
    let mut trace_stack: Stack<LexerTraceEdge> = Stack::new();
    let mut sub_traces: Vec<LexerTrace> = Vec::new();
    let mut rule_matches: HashMap<(usize, usize, usize), Stack<LexerTrace>> = HashMap::new();

    loop {
        let kind = atn.state(state).kind;
        if kind == StateKind::RuleStop && cursor == text.len() {
            break;
        }
        let fanout = atn.state(state).transitions.len();

        // dead end: backtrack, or report the mismatch
        if choice >= fanout || kind == StateKind::RuleStop {
            if trace_stack.is_empty() {
                return None;
            }
            let edge = trace_stack.pop();
            state = edge.state;
            choice = edge.choice + 1;
            cursor = edge.cursor;
            // when more sub-match candidates remain for this edge, retry
            // the same choice with the next candidate instead
            if let Some(candidates) = rule_matches.get(&(edge.state, edge.choice, cursor)) {
                if !candidates.is_empty() {
                    choice = edge.choice;
                }
            }
            // abandon the sub-traces collected past the popped edge
            sub_traces.truncate(edge.sub_trace_len);
            continue;
        }

        let accepted = match &atn.state(state).transitions[choice] {
            Transition::Rule { target, follow, .. } => {
                let mut taken = false;
                if cursor < text.len() {
                    let candidates = rule_matches
                        .entry((state, choice, cursor))
                        .or_insert_with(|| compute_rule_matches(atn, text, cursor, *target));
                    if !candidates.is_empty() {
                        let trace = candidates.pop();
                        trace_stack.push(LexerTraceEdge {
                            state,
                            choice,
                            cursor,
                            sub_trace_len: sub_traces.len()
                        });
                        cursor += trace.text.len();
                        sub_traces.push(trace);
                        state = *follow;
                        choice = 0;
                        taken = true;
                    }
                }
                taken
            }
            Transition::Atom { target, label } => {
                if cursor < text.len() && text[cursor] as i32 == *label {
                    trace_stack.push(LexerTraceEdge { state, choice, cursor, sub_trace_len: sub_traces.len() });
                    state = *target;
                    cursor += 1;
                    choice = 0;
                    true
                } else {
                    false
                }
            }
            Transition::NotSet { target, set } => {
                if cursor < text.len() && set.complement().contains(text[cursor] as u32) {
                    trace_stack.push(LexerTraceEdge { state, choice, cursor, sub_trace_len: sub_traces.len() });
                    state = *target;
                    cursor += 1;
                    choice = 0;
                    true
                } else {
                    false
                }
            }
            Transition::Set { target, set } | Transition::Range { target, set } => {
                if cursor < text.len() && set.contains(text[cursor] as u32) {
                    trace_stack.push(LexerTraceEdge { state, choice, cursor, sub_trace_len: sub_traces.len() });
                    state = *target;
                    cursor += 1;
                    choice = 0;
                    true
                } else {
                    false
                }
            }
            Transition::Wildcard { target } => {
                // any single character
                if cursor < text.len() {
                    trace_stack.push(LexerTraceEdge { state, choice, cursor, sub_trace_len: sub_traces.len() });
                    state = *target;
                    cursor += 1;
                    choice = 0;
                    true
                } else {
                    false
                }
            }
            Transition::Epsilon { target } => {
                trace_stack.push(LexerTraceEdge { state, choice, cursor, sub_trace_len: sub_traces.len() });
                state = *target;
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
    Some(LexerTrace { text: text.to_vec(), edges, sub_traces })
}

#[cfg(test)]
use crate::atn::AtnBuilder;
#[cfg(test)]
use crate::intervals::IntervalSet;

#[cfg(test)]
fn chars(text: &str) -> Vec<char> {
    text.chars().collect()
}

/// rule 0: 'a' 'b'
#[cfg(test)]
fn literal_pair() -> Atn {
    let mut builder = AtnBuilder::new();
    let start = builder.state(StateKind::RuleStart, 0);
    let mid = builder.state(StateKind::Basic, 0);
    let end = builder.state(StateKind::Basic, 0);
    let stop = builder.state(StateKind::RuleStop, 0);
    builder.transition(start, Transition::Atom { target: mid, label: 'a' as i32 });
    builder.transition(mid, Transition::Atom { target: end, label: 'b' as i32 });
    builder.epsilon(end, stop);
    builder.build().unwrap()
}

#[test]
fn matches_exact_literals() {
    let atn = literal_pair();
    let trace = match_text(&atn, &chars("ab"), atn.rule_start(0)).unwrap();
    assert_eq!(trace.text, chars("ab"));
    assert!(trace.sub_traces.is_empty());
    // start, mid and end each contribute one edge
    assert_eq!(trace.edges.len(), 3);
}

#[test]
fn rejects_short_and_long_input() {
    let atn = literal_pair();
    assert!(match_text(&atn, &chars("a"), atn.rule_start(0)).is_none());
    assert!(match_text(&atn, &chars("abc"), atn.rule_start(0)).is_none());
    assert!(match_text(&atn, &chars("xb"), atn.rule_start(0)).is_none());
}

/// rule 0: [0-9]+ as a loop with a two-way choice state
#[cfg(test)]
fn digits() -> Atn {
    let mut builder = AtnBuilder::new();
    let start = builder.state(StateKind::RuleStart, 0);
    let body = builder.state(StateKind::Basic, 0);
    let loop_state = builder.state(StateKind::Basic, 0);
    let stop = builder.state(StateKind::RuleStop, 0);
    builder.transition(start, Transition::Range {
        target: loop_state,
        set: IntervalSet::range('0' as u32, '9' as u32 + 1)
    });
    builder.epsilon(loop_state, body);
    builder.epsilon(loop_state, stop);
    builder.transition(body, Transition::Range {
        target: loop_state,
        set: IntervalSet::range('0' as u32, '9' as u32 + 1)
    });
    builder.build().unwrap()
}

#[test]
fn loops_consume_repetitions() {
    let atn = digits();
    for text in ["7", "42", "0123456789"] {
        let trace = match_text(&atn, &chars(text), atn.rule_start(0));
        assert!(trace.is_some(), "should match {:?}", text);
    }
    assert!(match_text(&atn, &chars("12x"), atn.rule_start(0)).is_none());
    assert!(match_text(&atn, &chars(""), atn.rule_start(0)).is_none());
}

/// rule 0: LETTER LETTER, rule 1 (LETTER): [a-z]
#[cfg(test)]
fn nested_rule() -> Atn {
    let mut builder = AtnBuilder::new();
    let start = builder.state(StateKind::RuleStart, 0);
    let mid = builder.state(StateKind::Basic, 0);
    let end = builder.state(StateKind::Basic, 0);
    let stop = builder.state(StateKind::RuleStop, 0);
    let letter_start = builder.state(StateKind::RuleStart, 1);
    let letter_end = builder.state(StateKind::Basic, 1);
    let letter_stop = builder.state(StateKind::RuleStop, 1);
    builder.transition(letter_start, Transition::Set {
        target: letter_end,
        set: IntervalSet::range('a' as u32, 'z' as u32 + 1)
    });
    builder.epsilon(letter_end, letter_stop);
    builder.transition(start, Transition::Rule { rule: 1, target: letter_start, follow: mid });
    builder.transition(mid, Transition::Rule { rule: 1, target: letter_start, follow: end });
    builder.epsilon(end, stop);
    builder.build().unwrap()
}

#[test]
fn nested_rules_record_sub_traces() {
    let atn = nested_rule();
    let trace = match_text(&atn, &chars("ok"), atn.rule_start(0)).unwrap();
    assert_eq!(trace.sub_traces.len(), 2);
    assert_eq!(trace.sub_traces[0].text, chars("o"));
    assert_eq!(trace.sub_traces[1].text, chars("k"));
    assert!(match_text(&atn, &chars("o"), atn.rule_start(0)).is_none());
}

/// rule 0: REST 'x' where rule 1 (REST) is 'x'* — the sub-match must
/// give one character back for the outer rule to finish
#[cfg(test)]
fn greedy_overlap() -> Atn {
    let mut builder = AtnBuilder::new();
    let start = builder.state(StateKind::RuleStart, 0);
    let after = builder.state(StateKind::Basic, 0);
    let end = builder.state(StateKind::Basic, 0);
    let stop = builder.state(StateKind::RuleStop, 0);
    let rest_start = builder.state(StateKind::RuleStart, 1);
    let rest_loop = builder.state(StateKind::Basic, 1);
    let rest_stop = builder.state(StateKind::RuleStop, 1);
    builder.transition(rest_start, Transition::Atom { target: rest_loop, label: 'x' as i32 });
    builder.epsilon(rest_loop, rest_start);
    builder.epsilon(rest_loop, rest_stop);
    builder.transition(start, Transition::Rule { rule: 1, target: rest_start, follow: after });
    builder.transition(after, Transition::Atom { target: end, label: 'x' as i32 });
    builder.epsilon(end, stop);
    builder.build().unwrap()
}

#[test]
fn backtracks_into_shorter_sub_matches() {
    let atn = greedy_overlap();
    let trace = match_text(&atn, &chars("xxx"), atn.rule_start(0)).unwrap();
    // the nested rule must settle for two of the three characters
    assert_eq!(trace.sub_traces.len(), 1);
    assert_eq!(trace.sub_traces[0].text, chars("xx"));
}
