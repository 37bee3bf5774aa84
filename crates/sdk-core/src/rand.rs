// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Deterministic randomness, seeded from the invocation id.
//!
//! Every retry of an invocation observes the same random sequence, so
//! random values are safe to use without journaling them. There is
//! deliberately no way to reseed the source.

use sha2::{Digest, Sha256};
use uuid::Uuid;

/// xoshiro256** state, seeded from the SHA-256 digest of the invocation id.
#[derive(Debug)]
pub(crate) struct RandomSource {
    state: [u64; 4],
}

impl RandomSource {
    pub(crate) fn new(invocation_id: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(invocation_id);
        let digest = hasher.finalize();

        let word = |i: usize| u64::from_le_bytes(digest[i * 8..(i + 1) * 8].try_into().unwrap());
        RandomSource {
            state: [word(0), word(1), word(2), word(3)],
        }
    }

    pub(crate) fn next_u64(&mut self) -> u64 {
        let result = rotl(self.state[0].wrapping_add(self.state[3]), 23)
            .wrapping_add(self.state[0]);

        let t = self.state[1] << 17;

        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];

        self.state[2] ^= t;

        self.state[3] = rotl(self.state[3], 45);

        result
    }

    pub(crate) fn next_f64(&mut self) -> f64 {
        // Drop the top 11 bits so the mantissa fits exactly.
        (self.next_u64() << 11 >> 11) as f64 / (1u64 << 53) as f64
    }

    pub(crate) fn next_uuid(&mut self) -> Uuid {
        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&self.next_u64().to_le_bytes());
        bytes[8..].copy_from_slice(&self.next_u64().to_le_bytes());
        bytes[6] = (bytes[6] & 0x0f) | 0x40; // Version 4
        bytes[8] = (bytes[8] & 0x3f) | 0x80; // Variant is 10
        Uuid::from_bytes(bytes)
    }
}

const fn rotl(x: u64, k: u32) -> u64 {
    x.rotate_left(k)
}
