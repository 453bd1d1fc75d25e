//! Shuffle sharding of flows onto queues.
//!
//! A flow's identity is hashed to 64 bits and the hash is consumed as a mixed-radix number to
//! deal a "hand" of distinct queue indexes out of the "deck" of all queues. Two flows only
//! collide completely when their whole hands match, which is far rarer than sharing one queue.

use crate::config::{required_entropy_bits, MAX_HASH_BITS};
use crate::error::{ConfigError, ConfigResult};
use fnv::FnvHasher;
use std::hash::Hasher;

/// Deals hands of `hand_size` distinct cards from a deck of `deck_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dealer {
    deck_size: usize,
    hand_size: usize,
}

impl Dealer {
    pub fn new(deck_size: usize, hand_size: usize) -> ConfigResult<Self> {
        if hand_size == 0 || hand_size > deck_size {
            return Err(ConfigError::InvalidHandSize {
                hand_size,
                queues: deck_size,
            });
        }
        if required_entropy_bits(deck_size, hand_size) > MAX_HASH_BITS {
            return Err(ConfigError::InsufficientEntropy {
                hand_size,
                queues: deck_size,
                max_bits: MAX_HASH_BITS,
            });
        }
        Ok(Self {
            deck_size,
            hand_size,
        })
    }

    pub fn deck_size(&self) -> usize {
        self.deck_size
    }

    pub fn hand_size(&self) -> usize {
        self.hand_size
    }

    /// Call `pick` once per card of the hand selected by `hash`.
    ///
    /// Each step takes the remainder modulo the number of cards still in the deck, then shifts
    /// it past every card already dealt so the hand never repeats a card.
    pub fn deal(&self, mut hash: u64, mut pick: impl FnMut(usize)) {
        let mut remainders = Vec::with_capacity(self.hand_size);
        for i in 0..self.hand_size {
            let remaining = (self.deck_size - i) as u64;
            remainders.push((hash % remaining) as usize);
            hash /= remaining;
        }

        for i in 0..self.hand_size {
            let mut card = remainders[i];
            for j in (1..=i).rev() {
                if card >= remainders[j - 1] {
                    card += 1;
                }
            }
            pick(card);
        }
    }

    pub fn deal_into_hand(&self, hash: u64) -> Vec<usize> {
        let mut hand = Vec::with_capacity(self.hand_size);
        self.deal(hash, |card| hand.push(card));
        hand
    }
}

/// Stable 64-bit FNV-1a hash of a flow identity.
pub fn hash_flow(schema: &str, distinguisher: &str) -> u64 {
    let mut hasher = FnvHasher::default();
    hasher.write(schema.as_bytes());
    hasher.write(distinguisher.as_bytes());
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn hands_are_distinct_and_in_range() {
        for (deck, hand) in [(8, 3), (4, 4), (16, 5), (128, 6)] {
            let dealer = Dealer::new(deck, hand).unwrap();
            for hash in (0..50_000u64).map(|h| h * 7919) {
                let cards = dealer.deal_into_hand(hash);
                assert_eq!(cards.len(), hand);
                assert!(cards.iter().all(|&c| c < deck));
                let unique: HashSet<_> = cards.iter().collect();
                assert_eq!(unique.len(), hand, "hash {hash} dealt {cards:?}");
            }
        }
    }

    #[test]
    fn dealing_is_deterministic() {
        let dealer = Dealer::new(8, 3).unwrap();
        assert_eq!(dealer.deal_into_hand(12345), vec![1, 4, 6]);
        let h = hash_flow("global-default", "alice");
        assert_eq!(dealer.deal_into_hand(h), dealer.deal_into_hand(h));
    }

    #[test]
    fn hand_of_one_is_hash_mod_deck() {
        let dealer = Dealer::new(10, 1).unwrap();
        assert_eq!(dealer.deal_into_hand(1234), vec![4]);
    }

    #[test]
    fn rejects_bad_shapes() {
        assert!(Dealer::new(4, 0).is_err());
        assert!(Dealer::new(4, 5).is_err());
        assert!(Dealer::new(1 << 20, 4).is_err());
    }

    #[test]
    fn flow_hash_depends_on_both_parts() {
        assert_ne!(hash_flow("a", "b"), hash_flow("a", "c"));
        assert_ne!(hash_flow("a", "b"), hash_flow("x", "b"));
    }
}
