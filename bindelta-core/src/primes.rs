//! Per-mnemonic prime assignment.
//!
//! Every mnemonic maps to a small prime; the product of the primes of all
//! instructions in a region is an order-independent content signature. Two
//! regions with the same multiset of mnemonics share the signature no matter
//! how the instructions are scheduled.

use std::sync::OnceLock;

use crate::hash::sdbm_hash;

/// Number of primes in the table. Collisions between mnemonics hashing to
/// the same slot are acceptable; the signature is a heuristic, not an
/// identity.
const TABLE_SIZE: usize = 1024;

static PRIME_TABLE: OnceLock<Vec<u64>> = OnceLock::new();

fn prime_table() -> &'static [u64] {
    PRIME_TABLE.get_or_init(|| {
        let mut primes: Vec<u64> = Vec::with_capacity(TABLE_SIZE);
        let mut candidate: u64 = 2;
        while primes.len() < TABLE_SIZE {
            if primes.iter().take_while(|p| *p * *p <= candidate).all(|p| candidate % p != 0) {
                primes.push(candidate);
            }
            candidate += 1;
        }
        primes
    })
}

/// Returns the prime assigned to a mnemonic.
pub fn mnemonic_prime(mnemonic: &str) -> u64 {
    let table = prime_table();
    table[sdbm_hash(mnemonic.as_bytes()) as usize % table.len()]
}

/// Wrapping product of a sequence of primes. The result is stable under
/// reordering because multiplication modulo 2^64 is commutative.
pub fn prime_product(primes: impl IntoIterator<Item = u64>) -> u64 {
    primes.into_iter().fold(1u64, |acc, p| acc.wrapping_mul(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_starts_with_small_primes() {
        let table = prime_table();
        assert_eq!(&table[..8], &[2, 3, 5, 7, 11, 13, 17, 19]);
        assert_eq!(table.len(), TABLE_SIZE);
    }

    #[test]
    fn mnemonic_primes_are_stable() {
        assert_eq!(mnemonic_prime("mov"), mnemonic_prime("mov"));
        assert!(mnemonic_prime("mov") >= 2);
    }

    #[test]
    fn product_is_order_independent() {
        let forward = prime_product([mnemonic_prime("mov"), mnemonic_prime("call")]);
        let backward = prime_product([mnemonic_prime("call"), mnemonic_prime("mov")]);
        assert_eq!(forward, backward);
    }
}
