//! Chromosome mutation and crossover
//!
//! Both operators work on the raw bytes, never on decoded structure;
//! the decoder's modulo reduction and header re-alignment absorb
//! whatever damage they do.  They are total over every input size and
//! deterministic for a given seed.

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

/// Bounded integer source over a seeded 63-bit stream.
///
/// Draws only as many bits as the boundary needs and rejects values
/// past the boundary, so small boundaries do not burn through the
/// stream.
pub struct ChromosomePrng {
    rng: StdRng,
    number: u64,
    available: u32
}

impl ChromosomePrng {
    pub fn new(seed: u64) -> Self {
        Self { rng: StdRng::seed_from_u64(seed), number: 0, available: 0 }
    }

    /// uniform value in `[0, boundary)`, panics for a zero boundary
    pub fn int(&mut self, boundary: usize) -> usize {
        if boundary < 1 {
            panic!("boundary must be greater than or equal to 1");
        }
        if boundary == 1 {
            return 0;
        }
        let max_number = (boundary - 1) as u64;
        let required_bits = 64 - max_number.leading_zeros();
        let mask = u64::MAX >> (64 - required_bits);

        loop {
            let x;
            if self.available < required_bits {
                let new_number = self.rng.next_u64() >> 1;
                x = (self.number | (new_number << self.available)) & mask;
                self.number = new_number >> (required_bits - self.available);
                self.available = 63 - required_bits + self.available;
            } else {
                x = self.number & mask;
                self.available -= required_bits;
                self.number >>= required_bits;
            }
            if x <= max_number {
                return x as usize;
            }
        }
    }
}

/// Apply a short random burst of byte-level edits.  Empty input passes
/// through untouched.
pub fn mutate(data: &[u8], seed: u64) -> Vec<u8> {
    if data.is_empty() {
        return Vec::new();
    }

    let mut prng = ChromosomePrng::new(seed);
    let mut mdata = Vec::with_capacity(data.len() << 1);
    mdata.extend_from_slice(data);

    let mut i = 0;
    while i <= prng.int(8) {
        match prng.int(4) {
            // set a byte to a random value, XOR avoids no-ops
            0 => {
                let j = prng.int(mdata.len());
                mdata[j] ^= prng.int(256) as u8;
            }
            // add or subtract a small number on a bit-reversed byte, so
            // arithmetic lands on the value bits instead of the padding
            1 => {
                let j = prng.int(mdata.len());
                let x = prng.int(16) as u8 + 1;
                if prng.int(2) == 0 {
                    mdata[j] = (mdata[j].reverse_bits().wrapping_add(x)).reverse_bits();
                } else {
                    mdata[j] = (mdata[j].reverse_bits().wrapping_sub(x)).reverse_bits();
                }
            }
            // flip 1, 2, 4 or 8 neighbouring bits at a random offset
            2 => {
                let num_bits = 1 << prng.int(4);
                let j = prng.int(mdata.len());
                mdata[j] ^= (((1u16 << num_bits) - 1) as u8) << prng.int(9 - num_bits);
            }
            // clone a random substring, inserting or overwriting at a
            // random position
            _ => {
                let j = prng.int(mdata.len() + 1);
                let a = prng.int(mdata.len());
                let b = a + prng.int(mdata.len() - a) + 1;
                let clone: Vec<u8> = mdata[a..b].to_vec();
                if prng.int(2) == 0 {
                    // insert
                    mdata.splice(j..j, clone);
                } else {
                    // overwrite, growing the buffer when the clone runs
                    // past the end
                    if mdata.len() < j + clone.len() {
                        mdata.resize(j + clone.len(), 0);
                    }
                    mdata[j..j + clone.len()].copy_from_slice(&clone);
                }
            }
        }
        i += 1;
    }
    mdata
}

/// Splice two chromosomes at one or two random cut points.  If either
/// side is empty the two are concatenated.
pub fn crossover(data1: &[u8], data2: &[u8], seed: u64) -> Vec<u8> {
    if data1.is_empty() || data2.is_empty() {
        let mut cdata = Vec::with_capacity(data1.len() + data2.len());
        cdata.extend_from_slice(data1);
        cdata.extend_from_slice(data2);
        return cdata;
    }

    let mut prng = ChromosomePrng::new(seed);

    if data1.len() < 2 || data2.len() < 2 || prng.int(2) == 0 {
        // single point: data1[..a] ++ data2[b..]
        let a = prng.int(data1.len()) + 1;
        let b = prng.int(data2.len());
        let mut cdata = Vec::with_capacity(a + data2.len() - b);
        cdata.extend_from_slice(&data1[..a]);
        cdata.extend_from_slice(&data2[b..]);
        cdata
    } else {
        // two point: data1[..a1] ++ data2[b1..b2] ++ data1[a2..]
        let a1 = prng.int(data1.len() - 1) + 1;
        let a2 = a1 + prng.int(data1.len() - a1);
        let b1 = prng.int(data2.len());
        let b2 = b1 + prng.int(data2.len() - b1) + 1;
        let mut cdata = Vec::with_capacity(a1 + b2 - b1 + data1.len() - a2);
        cdata.extend_from_slice(&data1[..a1]);
        cdata.extend_from_slice(&data2[b1..b2]);
        cdata.extend_from_slice(&data1[a2..]);
        cdata
    }
}

#[test]
fn bounded_draws_stay_in_range() {
    let mut prng = ChromosomePrng::new(99);
    for boundary in [1usize, 2, 3, 7, 8, 255, 256, 5000] {
        for _ in 0..200 {
            assert!(prng.int(boundary) < boundary);
        }
    }
}

#[test]
fn prng_is_deterministic() {
    let mut first = ChromosomePrng::new(1234);
    let mut second = ChromosomePrng::new(1234);
    for boundary in [2usize, 17, 300, 9, 2, 64] {
        assert_eq!(first.int(boundary), second.int(boundary));
    }
}

#[test]
fn mutate_empty_passes_through() {
    assert_eq!(mutate(&[], 42), Vec::<u8>::new());
}

#[test]
fn mutate_is_total_and_deterministic() {
    for size in [1usize, 2, 3, 7, 16, 64, 255] {
        let data: Vec<u8> = (0..size).map(|v| v as u8).collect();
        for seed in 0..64u64 {
            let first = mutate(&data, seed);
            let second = mutate(&data, seed);
            assert_eq!(first, second);
            assert!(!first.is_empty());
        }
    }
}

#[test]
fn mutate_changes_something_usually() {
    let data = vec![0u8; 32];
    let mutated: Vec<bool> = (0..32u64).map(|seed| mutate(&data, seed) != data).collect();
    assert!(mutated.iter().filter(|&&changed| changed).count() > 16);
}

#[test]
fn crossover_concatenates_when_one_side_empty() {
    assert_eq!(crossover(&[1, 2, 3], &[], 7), vec![1, 2, 3]);
    assert_eq!(crossover(&[], &[4, 5], 7), vec![4, 5]);
    assert_eq!(crossover(&[], &[], 7), Vec::<u8>::new());
}

#[test]
fn crossover_is_total_and_deterministic() {
    for (n1, n2) in [(1usize, 1usize), (1, 5), (5, 1), (2, 2), (16, 64), (255, 3)] {
        let data1: Vec<u8> = (0..n1).map(|v| v as u8).collect();
        let data2: Vec<u8> = (0..n2).map(|v| (v + 100) as u8).collect();
        for seed in 0..64u64 {
            let first = crossover(&data1, &data2, seed);
            let second = crossover(&data1, &data2, seed);
            assert_eq!(first, second);
            assert!(!first.is_empty());
            assert!(first.len() <= n1 + n2);
        }
    }
}

#[test]
fn single_point_keeps_a_prefix_of_the_first_parent() {
    let data1 = vec![9u8; 8];
    let data2 = vec![7u8; 8];
    for seed in 0..32u64 {
        let child = crossover(&data1, &data2, seed);
        assert!(child[0] == 9 || child[0] == 7);
        // every byte still comes from one of the parents
        assert!(child.iter().all(|&b| b == 9 || b == 7));
    }
}
