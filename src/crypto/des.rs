//! Feistel block cipher used by the QRC lyric format.
//!
//! This is a transcription of the DES variant embedded in the backend's own
//! client, composed into the usual three-pass EDE construction. The
//! permutation, expansion, S-box and key-schedule tables are constant data
//! carried over verbatim: the remote service produced the ciphertext with
//! exactly these tables (two S-box entries differ from textbook DES), so any
//! "fix" breaks decryption. Not a security primitive — interoperability only.

use super::CipherError;

pub const BLOCK_LEN: usize = 8;

/// Whether a key schedule is consumed in encryption or decryption order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Encrypt,
    Decrypt,
}

#[rustfmt::skip]
const SBOX: [[u32; 64]; 8] = [
    [
        14, 4, 13, 1, 2, 15, 11, 8, 3, 10, 6, 12, 5, 9, 0, 7,
        0, 15, 7, 4, 14, 2, 13, 1, 10, 6, 12, 11, 9, 5, 3, 8,
        4, 1, 14, 8, 13, 6, 2, 11, 15, 12, 9, 7, 3, 10, 5, 0,
        15, 12, 8, 2, 4, 9, 1, 7, 5, 11, 3, 14, 10, 0, 6, 13,
    ],
    [
        15, 1, 8, 14, 6, 11, 3, 4, 9, 7, 2, 13, 12, 0, 5, 10,
        3, 13, 4, 7, 15, 2, 8, 15, 12, 0, 1, 10, 6, 9, 11, 5,
        0, 14, 7, 11, 10, 4, 13, 1, 5, 8, 12, 6, 9, 3, 2, 15,
        13, 8, 10, 1, 3, 15, 4, 2, 11, 6, 7, 12, 0, 5, 14, 9,
    ],
    [
        10, 0, 9, 14, 6, 3, 15, 5, 1, 13, 12, 7, 11, 4, 2, 8,
        13, 7, 0, 9, 3, 4, 6, 10, 2, 8, 5, 14, 12, 11, 15, 1,
        13, 6, 4, 9, 8, 15, 3, 0, 11, 1, 2, 12, 5, 10, 14, 7,
        1, 10, 13, 0, 6, 9, 8, 7, 4, 15, 14, 3, 11, 5, 2, 12,
    ],
    [
        7, 13, 14, 3, 0, 6, 9, 10, 1, 2, 8, 5, 11, 12, 4, 15,
        13, 8, 11, 5, 6, 15, 0, 3, 4, 7, 2, 12, 1, 10, 14, 9,
        10, 6, 9, 0, 12, 11, 7, 13, 15, 1, 3, 14, 5, 2, 8, 4,
        3, 15, 0, 6, 10, 10, 13, 8, 9, 4, 5, 11, 12, 7, 2, 14,
    ],
    [
        2, 12, 4, 1, 7, 10, 11, 6, 8, 5, 3, 15, 13, 0, 14, 9,
        14, 11, 2, 12, 4, 7, 13, 1, 5, 0, 15, 10, 3, 9, 8, 6,
        4, 2, 1, 11, 10, 13, 7, 8, 15, 9, 12, 5, 6, 3, 0, 14,
        11, 8, 12, 7, 1, 14, 2, 13, 6, 15, 0, 9, 10, 4, 5, 3,
    ],
    [
        12, 1, 10, 15, 9, 2, 6, 8, 0, 13, 3, 4, 14, 7, 5, 11,
        10, 15, 4, 2, 7, 12, 9, 5, 6, 1, 13, 14, 0, 11, 3, 8,
        9, 14, 15, 5, 2, 8, 12, 3, 7, 0, 4, 10, 1, 13, 11, 6,
        4, 3, 2, 12, 9, 5, 15, 10, 11, 14, 1, 7, 6, 0, 8, 13,
    ],
    [
        4, 11, 2, 14, 15, 0, 8, 13, 3, 12, 9, 7, 5, 10, 6, 1,
        13, 0, 11, 7, 4, 9, 1, 10, 14, 3, 5, 12, 2, 15, 8, 6,
        1, 4, 11, 13, 12, 3, 7, 14, 10, 15, 6, 8, 0, 5, 9, 2,
        6, 11, 13, 8, 1, 4, 10, 7, 9, 5, 0, 15, 14, 2, 3, 12,
    ],
    [
        13, 2, 8, 4, 6, 15, 11, 1, 10, 9, 3, 14, 5, 0, 12, 7,
        1, 15, 13, 8, 10, 3, 7, 4, 12, 5, 6, 11, 0, 14, 9, 2,
        7, 11, 4, 1, 9, 12, 14, 2, 0, 6, 10, 13, 15, 3, 5, 8,
        2, 1, 14, 7, 4, 10, 8, 13, 15, 12, 9, 0, 3, 5, 6, 11,
    ],
];

/// Initial permutation: source bit for each position of s0/s1, MSB first.
#[rustfmt::skip]
const IP_S0: [usize; 32] = [
    57, 49, 41, 33, 25, 17, 9, 1, 59, 51, 43, 35, 27, 19, 11, 3,
    61, 53, 45, 37, 29, 21, 13, 5, 63, 55, 47, 39, 31, 23, 15, 7,
];
#[rustfmt::skip]
const IP_S1: [usize; 32] = [
    56, 48, 40, 32, 24, 16, 8, 0, 58, 50, 42, 34, 26, 18, 10, 2,
    60, 52, 44, 36, 28, 20, 12, 4, 62, 54, 46, 38, 30, 22, 14, 6,
];

/// Final permutation, expressed as (output byte, base bit) pairs; each byte
/// interleaves four s1/s0 bit pairs starting at the base bit.
const FP_BYTE_ORDER: [(usize, u32); 8] = [
    (3, 7),
    (2, 6),
    (1, 5),
    (0, 4),
    (7, 3),
    (6, 2),
    (5, 1),
    (4, 0),
];

/// P permutation inside the round function: source bit for targets 0..=31.
#[rustfmt::skip]
const ROUND_PERM: [u32; 32] = [
    15, 6, 19, 20, 28, 11, 27, 16, 0, 14, 22, 25, 4, 17, 30, 9,
    1, 7, 23, 13, 31, 26, 2, 8, 18, 12, 29, 5, 21, 10, 3, 24,
];

const KEY_ROUND_SHIFT: [u32; 16] = [1, 1, 2, 2, 2, 2, 2, 2, 1, 2, 2, 2, 2, 2, 2, 1];
#[rustfmt::skip]
const KEY_PERM_C: [usize; 28] = [
    56, 48, 40, 32, 24, 16, 8, 0, 57, 49, 41, 33, 25, 17, 9, 1,
    58, 50, 42, 34, 26, 18, 10, 2, 59, 51, 43, 35,
];
#[rustfmt::skip]
const KEY_PERM_D: [usize; 28] = [
    62, 54, 46, 38, 30, 22, 14, 6, 61, 53, 45, 37, 29, 21, 13, 5,
    60, 52, 44, 36, 28, 20, 12, 4, 27, 19, 11, 3,
];
#[rustfmt::skip]
const KEY_COMPRESSION: [u32; 48] = [
    13, 16, 10, 23, 0, 4, 2, 27, 14, 5, 20, 9, 22, 18, 11, 3,
    25, 7, 15, 6, 26, 19, 12, 1, 40, 51, 30, 36, 46, 54, 29, 39,
    50, 44, 32, 47, 43, 48, 38, 55, 33, 52, 45, 41, 49, 35, 28, 31,
];

/// Extract bit `b` of a byte string (word-swapped numbering) shifted to `c`.
fn bitnum(a: &[u8], b: usize, c: u32) -> u32 {
    let byte_index = (b / 32) * 4 + 3 - (b % 32) / 8;
    if byte_index >= a.len() {
        return 0;
    }
    let bit = (u32::from(a[byte_index]) >> (7 - (b % 8))) & 1;
    bit << c
}

/// Extract bit `b` (counted from the MSB) of a word, shifted left to `c`.
fn bitnum_intr(a: u32, b: u32, c: u32) -> u32 {
    ((a >> (31 - b)) & 1) << c
}

/// Extract bit `b` of a word, moved to position `31 - c`.
fn bitnum_intl(a: u32, b: u32, c: u32) -> u32 {
    ((a << b) & 0x8000_0000) >> c
}

/// Reorder a 6-bit group into the row/column S-box index.
fn sbox_bit(a: u32) -> usize {
    ((a & 32) | ((a & 31) >> 1) | ((a & 1) << 4)) as usize
}

fn initial_permutation(input: &[u8; BLOCK_LEN]) -> (u32, u32) {
    let mut s0 = 0u32;
    let mut s1 = 0u32;
    for (i, (&b0, &b1)) in IP_S0.iter().zip(IP_S1.iter()).enumerate() {
        s0 |= bitnum(input, b0, 31 - i as u32);
        s1 |= bitnum(input, b1, 31 - i as u32);
    }
    (s0, s1)
}

fn inverse_permutation(s0: u32, s1: u32) -> [u8; BLOCK_LEN] {
    let mut data = [0u8; BLOCK_LEN];
    for &(idx, base) in &FP_BYTE_ORDER {
        let mut byte = 0u32;
        for k in 0..4 {
            byte |= bitnum_intr(s1, base + 8 * k, 7 - 2 * k);
            byte |= bitnum_intr(s0, base + 8 * k, 6 - 2 * k);
        }
        data[idx] = byte as u8;
    }
    data
}

/// The Feistel round function: expand to 48 bits, XOR the round key, run the
/// eight 6->4 bit S-boxes, permute.
fn round_fn(state: u32, key: &[u8; 6]) -> u32 {
    let t1 = bitnum_intl(state, 31, 0)
        | ((state & 0xf000_0000) >> 1)
        | bitnum_intl(state, 4, 5)
        | bitnum_intl(state, 3, 6)
        | ((state & 0x0f00_0000) >> 3)
        | bitnum_intl(state, 8, 11)
        | bitnum_intl(state, 7, 12)
        | ((state & 0x00f0_0000) >> 5)
        | bitnum_intl(state, 12, 17)
        | bitnum_intl(state, 11, 18)
        | ((state & 0x000f_0000) >> 7)
        | bitnum_intl(state, 16, 23);

    let t2 = bitnum_intl(state, 15, 0)
        | ((state & 0x0000_f000) << 15)
        | bitnum_intl(state, 20, 5)
        | bitnum_intl(state, 19, 6)
        | ((state & 0x0000_0f00) << 13)
        | bitnum_intl(state, 24, 11)
        | bitnum_intl(state, 23, 12)
        | ((state & 0x0000_00f0) << 11)
        | bitnum_intl(state, 28, 17)
        | bitnum_intl(state, 27, 18)
        | ((state & 0x0000_000f) << 9)
        | bitnum_intl(state, 0, 23);

    let mut lrg = [
        (t1 >> 24) & 0xff,
        (t1 >> 16) & 0xff,
        (t1 >> 8) & 0xff,
        (t2 >> 24) & 0xff,
        (t2 >> 16) & 0xff,
        (t2 >> 8) & 0xff,
    ];
    for (byte, &k) in lrg.iter_mut().zip(key.iter()) {
        *byte ^= u32::from(k);
    }

    let res_state = (SBOX[0][sbox_bit(lrg[0] >> 2)] << 28)
        | (SBOX[1][sbox_bit(((lrg[0] & 0x03) << 4) | (lrg[1] >> 4))] << 24)
        | (SBOX[2][sbox_bit(((lrg[1] & 0x0f) << 2) | (lrg[2] >> 6))] << 20)
        | (SBOX[3][sbox_bit(lrg[2] & 0x3f)] << 16)
        | (SBOX[4][sbox_bit(lrg[3] >> 2)] << 12)
        | (SBOX[5][sbox_bit(((lrg[3] & 0x03) << 4) | (lrg[4] >> 4))] << 8)
        | (SBOX[6][sbox_bit(((lrg[4] & 0x0f) << 2) | (lrg[5] >> 6))] << 4)
        | SBOX[7][sbox_bit(lrg[5] & 0x3f)];

    let mut out = 0u32;
    for (i, &b) in ROUND_PERM.iter().enumerate() {
        out |= bitnum_intl(res_state, b, i as u32);
    }
    out
}

/// 16 round keys of 48 bits each, six bytes per round.
#[derive(Debug, Clone)]
pub(crate) struct DesKey {
    rounds: [[u8; 6]; 16],
}

impl DesKey {
    /// Build the key schedule for one 8-byte subkey. `Mode::Decrypt` fills
    /// the rounds in reverse so the block routine stays a single forward
    /// pass either way.
    pub(crate) fn new(key: &[u8; BLOCK_LEN], mode: Mode) -> Self {
        let mut c = 0u32;
        let mut d = 0u32;
        for i in 0..28 {
            c |= bitnum(key, KEY_PERM_C[i], 31 - i as u32);
            d |= bitnum(key, KEY_PERM_D[i], 31 - i as u32);
        }

        let mut rounds = [[0u8; 6]; 16];
        for i in 0..16 {
            let shift = KEY_ROUND_SHIFT[i];
            c = ((c << shift) | (c >> (28 - shift))) & 0xffff_fff0;
            d = ((d << shift) | (d >> (28 - shift))) & 0xffff_fff0;

            let togen = match mode {
                Mode::Encrypt => i,
                Mode::Decrypt => 15 - i,
            };

            for j in 0..24 {
                rounds[togen][j / 8] |=
                    bitnum_intr(c, KEY_COMPRESSION[j], 7 - (j % 8) as u32) as u8;
            }
            for j in 24..48 {
                rounds[togen][j / 8] |=
                    bitnum_intr(d, KEY_COMPRESSION[j] - 27, 7 - (j % 8) as u32) as u8;
            }
        }

        Self { rounds }
    }
}

fn crypt_block(input: &[u8; BLOCK_LEN], key: &DesKey) -> [u8; BLOCK_LEN] {
    let (mut s0, mut s1) = initial_permutation(input);
    for round in 0..15 {
        let previous_s1 = s1;
        s1 = round_fn(s1, &key.rounds[round]) ^ s0;
        s0 = previous_s1;
    }
    s0 = round_fn(s1, &key.rounds[15]) ^ s0;
    inverse_permutation(s0, s1)
}

/// Three-pass composition over a 24-byte key split into k1, k2, k3.
///
/// Encryption runs E(k1) -> D(k2) -> E(k3) per block, decryption the exact
/// reverse. Input that is not a whole number of blocks is an error, never
/// truncated.
#[derive(Debug, Clone)]
pub struct TripleDes {
    passes: [DesKey; 3],
}

impl TripleDes {
    pub fn encrypt_key(key: &[u8; 24]) -> Self {
        let (k1, k2, k3) = split_key(key);
        Self {
            passes: [
                DesKey::new(&k1, Mode::Encrypt),
                DesKey::new(&k2, Mode::Decrypt),
                DesKey::new(&k3, Mode::Encrypt),
            ],
        }
    }

    pub fn decrypt_key(key: &[u8; 24]) -> Self {
        let (k1, k2, k3) = split_key(key);
        Self {
            passes: [
                DesKey::new(&k3, Mode::Decrypt),
                DesKey::new(&k2, Mode::Encrypt),
                DesKey::new(&k1, Mode::Decrypt),
            ],
        }
    }

    /// Run every 8-byte block of `data` through the three passes.
    pub fn apply(&self, data: &[u8]) -> Result<Vec<u8>, CipherError> {
        if data.len() % BLOCK_LEN != 0 {
            return Err(CipherError::RaggedLength(data.len()));
        }

        let mut out = Vec::with_capacity(data.len());
        for chunk in data.chunks_exact(BLOCK_LEN) {
            let mut block = [0u8; BLOCK_LEN];
            block.copy_from_slice(chunk);
            for pass in &self.passes {
                block = crypt_block(&block, pass);
            }
            out.extend_from_slice(&block);
        }
        Ok(out)
    }
}

fn split_key(key: &[u8; 24]) -> ([u8; 8], [u8; 8], [u8; 8]) {
    let mut k1 = [0u8; 8];
    let mut k2 = [0u8; 8];
    let mut k3 = [0u8; 8];
    k1.copy_from_slice(&key[0..8]);
    k2.copy_from_slice(&key[8..16]);
    k3.copy_from_slice(&key[16..24]);
    (k1, k2, k3)
}
