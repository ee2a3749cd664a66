//! Wire protocol
//!
//! Length-prefixed, big-endian request protocol used by dispatching
//! servers to drive the codec.  A request opens with a liveness
//! handshake, then a one-byte mask of wanted operations, then the
//! payloads the mask implies.  Replies are length-prefixed buffers; a
//! deadline-exceeded operation replies an empty buffer, which clients
//! treat as a failed attempt.
//!
//! The functions here are generic over the stream so unix sockets and
//! in-memory duplexes both work; listening, accepting and process
//! management belong to the embedding server.

use std::io::{Read, Write};
use std::time::{Duration, Instant};

use crate::atn::Grammar;
use crate::mutation;
use crate::walker::Walker;
use crate::Error;

pub const ARE_YOU_ALIVE: u8 = 0xd5;
pub const YES_I_AM_ALIVE: u8 = 0x2a;

pub const CROSSOVER_BIT: u8 = 0b0000_0001;
pub const MUTATE_BIT: u8 = 0b0000_0010;
pub const DECODE_BIT: u8 = 0b0000_0100;
pub const ENCODE_BIT: u8 = 0b0000_1000;

fn read_u32<S: Read>(stream: &mut S) -> std::io::Result<u32> {
    let mut buf = [0u8; 4];
    stream.read_exact(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

fn read_u64<S: Read>(stream: &mut S) -> std::io::Result<u64> {
    let mut buf = [0u8; 8];
    stream.read_exact(&mut buf)?;
    Ok(u64::from_be_bytes(buf))
}

fn write_buffer<S: Write>(stream: &mut S, data: &[u8]) -> std::io::Result<()> {
    stream.write_all(&(data.len() as u32).to_be_bytes())?;
    stream.write_all(data)
}

/// Serve one request on `stream`.  `timeout` bounds the walker work,
/// not the socket I/O; transport deadlines are the caller's concern.
pub fn handle_request<S: Read + Write>(
    stream: &mut S,
    timeout: Duration,
    grammar: &Grammar
) -> Result<(), Error> {
    let mut buf = [0u8; 5];

    // only answer clients that know the handshake
    stream.read_exact(&mut buf[..1])?;
    if buf[0] != ARE_YOU_ALIVE {
        return Err(Error::Handshake);
    }
    stream.write_all(&[YES_I_AM_ALIVE])?;

    stream.read_exact(&mut buf)?;
    let wanted = buf[0];
    let length = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize;
    let mut data1 = vec![0u8; length];
    stream.read_exact(&mut data1)?;

    let mut result: Vec<u8> = Vec::new();

    if wanted & CROSSOVER_BIT != 0 {
        let length = read_u32(stream)? as usize;
        let mut data2 = vec![0u8; length];
        stream.read_exact(&mut data2)?;
        let seed = read_u64(stream)?;
        result = mutation::crossover(&data1, &data2, seed);
    }

    if wanted & MUTATE_BIT != 0 {
        let seed = read_u64(stream)?;
        result = if wanted & CROSSOVER_BIT != 0 {
            mutation::mutate(&result, seed)
        } else {
            mutation::mutate(&data1, seed)
        };
    }

    let transformed = wanted & (CROSSOVER_BIT | MUTATE_BIT) != 0;

    if wanted & DECODE_BIT != 0 {
        let mut walker = Walker::new(grammar);
        walker.set_deadline(Instant::now() + timeout);
        let input = if transformed { &result } else { &data1 };
        if wanted & ENCODE_BIT != 0 {
            let (decoded, encoded) = walker.decode_with_repair(input);
            write_buffer(stream, decoded.as_bytes())?;
            write_buffer(stream, &encoded)?;
        } else {
            let decoded = walker.decode(input);
            write_buffer(stream, decoded.as_bytes())?;
            write_buffer(stream, &[])?;
        }
        return Ok(());
    }

    if wanted & ENCODE_BIT != 0 {
        // encode alone means: repair the chromosome
        let mut walker = Walker::new(grammar);
        walker.set_deadline(Instant::now() + timeout);
        let input = if transformed { &result } else { &data1 };
        write_buffer(stream, &walker.repair(input))?;
        return Ok(());
    }

    if transformed {
        write_buffer(stream, &result)?;
    }
    Ok(())
}

/// What a request produced.  Fields stay `None` when the transfer broke
/// off after the handshake; such an attempt is discarded, not retried.
#[derive(Debug, Default)]
pub struct Reply {
    pub decoded: Option<Vec<u8>>,
    pub encoded: Option<Vec<u8>>
}

/// Issue one request on `stream`.  A handshake failure is an error (the
/// server is likely down and worth restarting); failures past the
/// handshake yield a partial [`Reply`].
pub fn send_request<S: Read + Write>(
    stream: &mut S,
    data1: &[u8],
    data2: &[u8],
    wanted: u8,
    seed_crossover: u64,
    seed_mutation: u64
) -> Result<Reply, Error> {
    let mut buf = [0u8; 5];
    let mut reply = Reply::default();

    if stream.write_all(&[ARE_YOU_ALIVE]).is_err() {
        return Err(Error::Handshake);
    }
    if stream.read_exact(&mut buf[..1]).is_err() || buf[0] != YES_I_AM_ALIVE {
        return Err(Error::Handshake);
    }

    buf[0] = wanted;
    buf[1..5].copy_from_slice(&(data1.len() as u32).to_be_bytes());
    if stream.write_all(&buf).is_err() {
        return Err(Error::Handshake);
    }
    if stream.write_all(data1).is_err() {
        return Ok(reply);
    }

    if wanted & CROSSOVER_BIT != 0 {
        if stream.write_all(&(data2.len() as u32).to_be_bytes()).is_err() {
            return Err(Error::Handshake);
        }
        if stream.write_all(data2).is_err() {
            return Ok(reply);
        }
        if stream.write_all(&seed_crossover.to_be_bytes()).is_err() {
            return Ok(reply);
        }
    }

    if wanted & MUTATE_BIT != 0 {
        if stream.write_all(&seed_mutation.to_be_bytes()).is_err() {
            return Ok(reply);
        }
    }

    if wanted & DECODE_BIT != 0 {
        let Ok(length) = read_u32(stream) else { return Ok(reply) };
        let mut decoded = vec![0u8; length as usize];
        if stream.read_exact(&mut decoded).is_err() {
            return Ok(reply);
        }
        reply.decoded = Some(decoded);
    }

    if wanted & (CROSSOVER_BIT | MUTATE_BIT | ENCODE_BIT) != 0 {
        let Ok(length) = read_u32(stream) else { return Ok(reply) };
        let mut encoded = vec![0u8; length as usize];
        if stream.read_exact(&mut encoded).is_err() {
            return Ok(reply);
        }
        reply.encoded = Some(encoded);
    }
    Ok(reply)
}

#[cfg(test)]
use crate::atn::{AtnBuilder, StateKind, Transition};
#[cfg(test)]
use std::io::Cursor;

/// in-memory request/response stream for driving the handler
#[cfg(test)]
struct Mock {
    input: Cursor<Vec<u8>>,
    output: Vec<u8>
}

#[cfg(test)]
impl Mock {
    fn new(request: Vec<u8>) -> Self {
        Self { input: Cursor::new(request), output: Vec::new() }
    }
}

#[cfg(test)]
impl Read for Mock {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.input.read(buf)
    }
}

#[cfg(test)]
impl Write for Mock {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.output.write(buf)
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// parser: rule 0 = one token; lexer: rule 0 = 'a'
#[cfg(test)]
fn tiny_grammar() -> Grammar {
    let mut parser = AtnBuilder::new();
    let start = parser.state(StateKind::RuleStart, 0);
    let mid = parser.state(StateKind::Basic, 0);
    let stop = parser.state(StateKind::RuleStop, 0);
    parser.transition(start, Transition::Atom { target: mid, label: 1 });
    parser.epsilon(mid, stop);

    let mut lexer = AtnBuilder::new();
    let start = lexer.state(StateKind::RuleStart, 0);
    let mid = lexer.state(StateKind::Basic, 0);
    let stop = lexer.state(StateKind::RuleStop, 0);
    lexer.transition(start, Transition::Atom { target: mid, label: 'a' as i32 });
    lexer.epsilon(mid, stop);

    Grammar::new(parser.build().unwrap(), lexer.build().unwrap()).unwrap()
}

#[test]
fn mutate_request_round_trips() {
    let data = vec![1u8, 2, 3, 4, 5];
    let seed = 99u64;
    let mut request = vec![ARE_YOU_ALIVE, MUTATE_BIT];
    request.extend_from_slice(&(data.len() as u32).to_be_bytes());
    request.extend_from_slice(&data);
    request.extend_from_slice(&seed.to_be_bytes());

    let grammar = tiny_grammar();
    let mut stream = Mock::new(request);
    handle_request(&mut stream, Duration::from_millis(500), &grammar).unwrap();

    assert_eq!(stream.output[0], YES_I_AM_ALIVE);
    let length = u32::from_be_bytes(stream.output[1..5].try_into().unwrap()) as usize;
    let payload = &stream.output[5..5 + length];
    assert_eq!(payload, mutation::mutate(&data, seed));
}

#[test]
fn crossover_then_mutate_chains_results() {
    let data1 = vec![10u8, 11, 12];
    let data2 = vec![20u8, 21, 22, 23];
    let mut request = vec![ARE_YOU_ALIVE, CROSSOVER_BIT | MUTATE_BIT];
    request.extend_from_slice(&(data1.len() as u32).to_be_bytes());
    request.extend_from_slice(&data1);
    request.extend_from_slice(&(data2.len() as u32).to_be_bytes());
    request.extend_from_slice(&data2);
    request.extend_from_slice(&7u64.to_be_bytes());
    request.extend_from_slice(&8u64.to_be_bytes());

    let grammar = tiny_grammar();
    let mut stream = Mock::new(request);
    handle_request(&mut stream, Duration::from_millis(500), &grammar).unwrap();

    let length = u32::from_be_bytes(stream.output[1..5].try_into().unwrap()) as usize;
    let payload = &stream.output[5..5 + length];
    let expected = mutation::mutate(&mutation::crossover(&data1, &data2, 7), 8);
    assert_eq!(payload, expected);
}

#[test]
fn decode_request_replies_text_and_empty_reencoding() {
    let mut request = vec![ARE_YOU_ALIVE, DECODE_BIT];
    request.extend_from_slice(&0u32.to_be_bytes());

    let grammar = tiny_grammar();
    let mut stream = Mock::new(request);
    handle_request(&mut stream, Duration::from_millis(500), &grammar).unwrap();

    let length = u32::from_be_bytes(stream.output[1..5].try_into().unwrap()) as usize;
    assert_eq!(&stream.output[5..5 + length], b"a");
    let tail = &stream.output[5 + length..];
    assert_eq!(u32::from_be_bytes(tail.try_into().unwrap()), 0);
}

#[test]
fn rejects_unknown_handshake() {
    let grammar = tiny_grammar();
    let mut stream = Mock::new(vec![0x00]);
    assert!(matches!(
        handle_request(&mut stream, Duration::from_millis(500), &grammar),
        Err(Error::Handshake)
    ));
    assert!(stream.output.is_empty());
}

#[test]
fn client_and_server_speak_over_a_socket_pair() {
    use std::os::unix::net::UnixStream;

    let (mut client, mut server) = UnixStream::pair().unwrap();
    let handle = std::thread::spawn(move || {
        let grammar = tiny_grammar();
        handle_request(&mut server, Duration::from_millis(500), &grammar)
    });

    let data = vec![3u8, 1, 4, 1, 5];
    let reply = send_request(&mut client, &data, &[], MUTATE_BIT, 0, 42).unwrap();
    assert_eq!(reply.encoded.unwrap(), mutation::mutate(&data, 42));
    assert!(reply.decoded.is_none());
    handle.join().unwrap().unwrap();
}

#[test]
fn client_detects_a_mute_server() {
    let mut stream = Mock::new(vec![0x00]);
    assert!(matches!(
        send_request(&mut stream, &[1, 2], &[], MUTATE_BIT, 0, 0),
        Err(Error::Handshake)
    ));
}
