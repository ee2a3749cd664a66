//! End-to-end walker properties over a small expression grammar:
//! statements of the form `expr ;` where an expression is a chain of
//! terms joined by `+`/`-` and a term is a number, an identifier or a
//! parenthesized expression.  The lexer builds numbers from a digit
//! loop and identifiers from a letter fragment rule.

use std::time::{Duration, Instant};

use atncodec::tree::SourceTree;
use atncodec::{AtnBuilder, Grammar, IntervalSet, StateKind, Transition, Walker};

const NUM: i32 = 1;
const ID: i32 = 2;
const PLUS: i32 = 3;
const MINUS: i32 = 4;
const LPAREN: i32 = 5;
const RPAREN: i32 = 6;
const SEMI: i32 = 7;

const LETTER_RULE: usize = 7;

fn digits() -> IntervalSet {
    IntervalSet::range('0' as u32, '9' as u32 + 1)
}

fn letters() -> IntervalSet {
    IntervalSet::range('a' as u32, 'z' as u32 + 1)
}

/// stmt: expr ';' ;  expr: term (('+'|'-') term)* ;
/// term: NUM | ID | '(' expr ')' ;
fn parser_atn() -> atncodec::Atn {
    let mut b = AtnBuilder::new();
    // stmt
    let s_start = b.state(StateKind::RuleStart, 0);
    let s1 = b.state(StateKind::Basic, 0);
    let s2 = b.state(StateKind::Basic, 0);
    let s3 = b.state(StateKind::Basic, 0);
    let s_stop = b.state(StateKind::RuleStop, 0);
    // expr
    let e_start = b.state(StateKind::RuleStart, 1);
    let e1 = b.state(StateKind::Basic, 1);
    let e_loop = b.state(StateKind::StarLoopEntry, 1);
    let e2 = b.state(StateKind::Basic, 1);
    let e3 = b.state(StateKind::Basic, 1);
    let e_end = b.state(StateKind::LoopEnd, 1);
    let e_stop = b.state(StateKind::RuleStop, 1);
    // term
    let t_start = b.state(StateKind::RuleStart, 2);
    let t_alt = b.state(StateKind::BlockStart, 2);
    let t1 = b.state(StateKind::Basic, 2);
    let t2 = b.state(StateKind::Basic, 2);
    let t_end = b.state(StateKind::BlockEnd, 2);
    let t_stop = b.state(StateKind::RuleStop, 2);

    b.epsilon(s_start, s1);
    b.transition(s1, Transition::Rule { rule: 1, target: e_start, follow: s2 });
    b.transition(s2, Transition::Atom { target: s3, label: SEMI });
    b.epsilon(s3, s_stop);

    b.epsilon(e_start, e1);
    b.transition(e1, Transition::Rule { rule: 2, target: t_start, follow: e_loop });
    b.epsilon(e_loop, e2);
    b.epsilon(e_loop, e_end);
    let operators = {
        let mut set = IntervalSet::new();
        set.push(PLUS as u32, MINUS as u32 + 1);
        set
    };
    b.transition(e2, Transition::Set { target: e3, set: operators });
    b.transition(e3, Transition::Rule { rule: 2, target: t_start, follow: e_loop });
    b.epsilon(e_end, e_stop);

    b.epsilon(t_start, t_alt);
    b.transition(t_alt, Transition::Atom { target: t_end, label: NUM });
    b.transition(t_alt, Transition::Atom { target: t_end, label: ID });
    b.transition(t_alt, Transition::Atom { target: t1, label: LPAREN });
    b.transition(t1, Transition::Rule { rule: 1, target: e_start, follow: t2 });
    b.transition(t2, Transition::Atom { target: t_end, label: RPAREN });
    b.epsilon(t_end, t_stop);

    b.build().unwrap()
}

/// NUM: [0-9]+ ;  ID: LETTER (LETTER | [0-9])* ;  fragment LETTER: [a-z] ;
/// plus one single-character rule per operator token
fn lexer_atn() -> atncodec::Atn {
    let mut b = AtnBuilder::new();
    // NUM (rule 0)
    let n_start = b.state(StateKind::RuleStart, 0);
    let n_loop = b.state(StateKind::Basic, 0);
    let n_stop = b.state(StateKind::RuleStop, 0);
    // ID (rule 1)
    let i_start = b.state(StateKind::RuleStart, 1);
    let i_loop = b.state(StateKind::Basic, 1);
    let i_stop = b.state(StateKind::RuleStop, 1);
    // single-character tokens (rules 2..=6), built from the serialized
    // state-kind codes the way a grammar adapter would
    let mut singles = Vec::new();
    for (rule, ch) in [(2usize, '+'), (3, '-'), (4, '('), (5, ')'), (6, ';')] {
        let start = b.state(StateKind::from_code(2).unwrap(), rule);
        let mid = b.state(StateKind::from_code(1).unwrap(), rule);
        let stop = b.state(StateKind::from_code(7).unwrap(), rule);
        singles.push((start, mid, stop, ch));
    }
    // LETTER fragment (rule 7)
    let l_start = b.state(StateKind::RuleStart, LETTER_RULE);
    let l_mid = b.state(StateKind::Basic, LETTER_RULE);
    let l_stop = b.state(StateKind::RuleStop, LETTER_RULE);

    b.transition(n_start, Transition::Range { target: n_loop, set: digits() });
    b.transition(n_loop, Transition::Range { target: n_loop, set: digits() });
    b.epsilon(n_loop, n_stop);

    b.transition(i_start, Transition::Rule { rule: LETTER_RULE, target: l_start, follow: i_loop });
    b.transition(i_loop, Transition::Rule { rule: LETTER_RULE, target: l_start, follow: i_loop });
    b.transition(i_loop, Transition::Range { target: i_loop, set: digits() });
    b.epsilon(i_loop, i_stop);

    for (start, mid, stop, ch) in singles {
        b.transition(start, Transition::Atom { target: mid, label: ch as i32 });
        b.epsilon(mid, stop);
    }

    b.transition(l_start, Transition::Set { target: l_mid, set: letters() });
    b.epsilon(l_mid, l_stop);

    b.build().unwrap()
}

fn grammar() -> Grammar {
    Grammar::new(parser_atn(), lexer_atn()).unwrap()
}

fn far_deadline() -> Instant {
    Instant::now() + Duration::from_secs(5)
}

fn term_num(src: &mut SourceTree, text: &str) -> usize {
    let token = src.token(NUM, text);
    src.rule(2, vec![token])
}

fn term_id(src: &mut SourceTree, text: &str) -> usize {
    let token = src.token(ID, text);
    src.rule(2, vec![token])
}

/// stmt( expr( parts... ) ';' )
fn stmt(src: &mut SourceTree, expr_parts: Vec<usize>) -> usize {
    let expr = src.rule(1, expr_parts);
    let semi = src.token(SEMI, ";");
    src.rule(0, vec![expr, semi])
}

fn sum_statement() -> (SourceTree, usize) {
    // "1+20-ab3;"
    let mut src = SourceTree::new();
    let first = term_num(&mut src, "1");
    let plus = src.token(PLUS, "+");
    let second = term_num(&mut src, "20");
    let minus = src.token(MINUS, "-");
    let third = term_id(&mut src, "ab3");
    let root = stmt(&mut src, vec![first, plus, second, minus, third]);
    (src, root)
}

fn nested_statement() -> (SourceTree, usize) {
    // "(a+1);"
    let mut src = SourceTree::new();
    let id = term_id(&mut src, "a");
    let plus = src.token(PLUS, "+");
    let num = term_num(&mut src, "1");
    let inner_expr = src.rule(1, vec![id, plus, num]);
    let lparen = src.token(LPAREN, "(");
    let rparen = src.token(RPAREN, ")");
    let paren_term = src.rule(2, vec![lparen, inner_expr, rparen]);
    let root = stmt(&mut src, vec![paren_term]);
    (src, root)
}

#[test]
fn roundtrip_renders_identically() {
    let grammar = grammar();
    let mut cases: Vec<(SourceTree, usize)> = vec![sum_statement(), nested_statement()];
    {
        // "7;"
        let mut src = SourceTree::new();
        let term = term_num(&mut src, "7");
        let root = stmt(&mut src, vec![term]);
        cases.push((src, root));
    }
    for (src, root) in &cases {
        let encoded = Walker::new(&grammar).encode(src, *root);
        let mut decoder = Walker::new(&grammar);
        decoder.set_deadline(far_deadline());
        assert_eq!(decoder.decode(&encoded), src.render(*root));
    }
}

#[test]
fn encoding_is_deterministic() {
    let grammar = grammar();
    let (src, root) = sum_statement();
    let first = Walker::new(&grammar).encode(&src, root);
    let second = Walker::new(&grammar).encode(&src, root);
    assert_eq!(first, second);
    assert!(!first.is_empty());
}

#[test]
fn left_recursive_trees_encode_like_flat_ones() {
    let grammar = grammar();
    // flat: expr(term, '+', term); nested: expr(expr(term), '+', term)
    let mut flat = SourceTree::new();
    let a = term_num(&mut flat, "3");
    let plus = flat.token(PLUS, "+");
    let b = term_num(&mut flat, "4");
    let flat_root = stmt(&mut flat, vec![a, plus, b]);

    let mut nested = SourceTree::new();
    let a = term_num(&mut nested, "3");
    let inner = nested.rule(1, vec![a]);
    let plus = nested.token(PLUS, "+");
    let b = term_num(&mut nested, "4");
    let nested_root = stmt(&mut nested, vec![inner, plus, b]);

    let flat_bytes = Walker::new(&grammar).encode(&flat, flat_root);
    let nested_bytes = Walker::new(&grammar).encode(&nested, nested_root);
    assert_eq!(flat_bytes, nested_bytes);
}

#[test]
fn decode_is_total_over_arbitrary_bytes() {
    let grammar = grammar();
    let inputs: Vec<Vec<u8>> = vec![
        vec![],
        vec![0x00],
        vec![0xff; 16],
        vec![0xdd, 0x00, 0xdd, 0x00, 0xdd, 0x00],
        (0..32u8).map(|v| v.wrapping_mul(37).wrapping_add(11)).collect(),
        (0..64u8).map(|v| v.wrapping_mul(201)).collect()
    ];
    for input in &inputs {
        let mut walker = Walker::new(&grammar);
        walker.set_deadline(far_deadline());
        let text = walker.decode(input);
        assert!(!text.is_empty(), "input {:02x?} decoded to nothing", input);
        assert!(text.ends_with(';'), "decoded {:?} is not a statement", text);
    }
}

#[test]
fn repair_is_idempotent() {
    let grammar = grammar();
    let inputs: Vec<Vec<u8>> = vec![
        vec![],
        vec![0x42; 8],
        (0..32u8).map(|v| v.wrapping_mul(97).wrapping_add(3)).collect()
    ];
    for input in &inputs {
        let mut first = Walker::new(&grammar);
        first.set_deadline(far_deadline());
        let repaired = first.repair(input);

        let mut second = Walker::new(&grammar);
        second.set_deadline(far_deadline());
        assert_eq!(second.repair(&repaired), repaired);
    }
}

#[test]
fn repair_preserves_rendering() {
    let grammar = grammar();
    let inputs: Vec<Vec<u8>> = vec![
        vec![0x07, 0x9b, 0xe2],
        (0..32u8).map(|v| v.wrapping_mul(53).wrapping_add(29)).collect()
    ];
    for input in &inputs {
        let mut first = Walker::new(&grammar);
        first.set_deadline(far_deadline());
        let (text, repaired) = first.decode_with_repair(input);

        let mut second = Walker::new(&grammar);
        second.set_deadline(far_deadline());
        assert_eq!(second.decode(&repaired), text);
    }
}

#[test]
fn corruption_at_any_byte_keeps_chromosomes_decodable() {
    let grammar = grammar();
    let (src, root) = sum_statement();
    let encoded = Walker::new(&grammar).encode(&src, root);
    for at in 0..encoded.len() {
        let mut corrupted = encoded.clone();
        corrupted[at] ^= 0x55;
        let mut walker = Walker::new(&grammar);
        walker.set_deadline(far_deadline());
        let text = walker.decode(&corrupted);
        assert!(!text.is_empty(), "corruption at byte {} broke decoding", at);
    }
}

#[test]
fn mutated_chromosomes_stay_decodable() {
    let grammar = grammar();
    let (src, root) = sum_statement();
    let encoded = Walker::new(&grammar).encode(&src, root);
    for seed in 0..24u64 {
        let mutated = atncodec::mutate(&encoded, seed);
        let crossed = atncodec::crossover(&mutated, &encoded, seed);
        let mut walker = Walker::new(&grammar);
        walker.set_deadline(far_deadline());
        assert!(!walker.decode(&crossed).is_empty());
    }
}

#[test]
fn expired_deadline_yields_empty_results() {
    let grammar = grammar();
    let past = Instant::now()
        .checked_sub(Duration::from_millis(10))
        .unwrap_or_else(Instant::now);
    let mut walker = Walker::new(&grammar);
    walker.set_deadline(past);
    assert_eq!(walker.decode(&[0xab; 32]), "");
    assert_eq!(walker.repair(&[0xab; 32]), Vec::<u8>::new());
    let (text, repaired) = walker.decode_with_repair(&[0xab; 32]);
    assert_eq!(text, "");
    assert!(repaired.is_empty());
}
