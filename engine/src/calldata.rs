//! Contract call data: ABI encoding and ephemeral key recovery
//!
//! The announcement event only carries keccak256(R), so the full ephemeral
//! key is read back from the call that emitted it. That call may arrive bare
//! or wrapped in a smart-account `execute`/`executeBatch` and/or a
//! meta-transaction envelope:
//!
//! ```text
//! executeMetaTransaction(user, execute(target, value, sendStealthPayment(..)), r, s, v)
//! ```

use crate::curve::{keccak256, COMPRESSED_PUBLIC_KEY_LEN};
use crate::types::{Address, ADDRESS_LEN};

pub const SEND_STEALTH_PAYMENT: &str = "sendStealthPayment(address,uint256,bytes)";
pub const EXECUTE: &str = "execute(address,uint256,bytes)";
pub const EXECUTE_BATCH: &str = "executeBatch(address[],uint256[],bytes[])";
pub const EXECUTE_META_TRANSACTION: &str =
    "executeMetaTransaction(address,bytes,bytes32,bytes32,uint8)";

/// Maximum number of wrapper calls unwrapped around the payment call
pub const MAX_CALL_DEPTH: usize = 4;

const WORD: usize = 32;
const SELECTOR_LEN: usize = 4;

pub type Selector = [u8; SELECTOR_LEN];

/// First four bytes of keccak256 of the canonical signature
pub fn selector(signature: &str) -> Selector {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

// ── encoding ────────────────────────────────────────────────────────────

fn address_word(address: &Address) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[WORD - ADDRESS_LEN..].copy_from_slice(address.as_bytes());
    word
}

fn uint_word(value: u128) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[16..].copy_from_slice(&value.to_be_bytes());
    word
}

fn usize_word(value: usize) -> [u8; WORD] {
    uint_word(value as u128)
}

fn padded_len(len: usize) -> usize {
    len.div_ceil(WORD) * WORD
}

/// `len || data || zero padding`
fn encode_bytes_tail(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(WORD + padded_len(data.len()));
    out.extend_from_slice(&usize_word(data.len()));
    out.extend_from_slice(data);
    out.resize(WORD + padded_len(data.len()), 0);
    out
}

/// Head words are either static values or the byte offset of a tail
enum Arg {
    Static([u8; WORD]),
    Dynamic(Vec<u8>),
}

fn encode_args(args: Vec<Arg>) -> Vec<u8> {
    let head_len = args.len() * WORD;
    let mut head = Vec::with_capacity(head_len);
    let mut tail = Vec::new();
    for arg in args {
        match arg {
            Arg::Static(word) => head.extend_from_slice(&word),
            Arg::Dynamic(bytes) => {
                head.extend_from_slice(&usize_word(head_len + tail.len()));
                tail.extend_from_slice(&bytes);
            }
        }
    }
    head.extend_from_slice(&tail);
    head
}

fn encode_call(signature: &str, args: Vec<Arg>) -> Vec<u8> {
    let mut out = selector(signature).to_vec();
    out.extend_from_slice(&encode_args(args));
    out
}

/// `sendStealthPayment(stealthAddress, amount, ephemeralPublicKey)`
pub fn encode_send_stealth_payment(
    stealth_address: &Address,
    amount: u128,
    ephemeral_public_key: &[u8],
) -> Vec<u8> {
    encode_call(
        SEND_STEALTH_PAYMENT,
        vec![
            Arg::Static(address_word(stealth_address)),
            Arg::Static(uint_word(amount)),
            Arg::Dynamic(encode_bytes_tail(ephemeral_public_key)),
        ],
    )
}

/// Smart-account `execute(target, value, data)`
pub fn encode_execute(target: &Address, value: u128, data: &[u8]) -> Vec<u8> {
    encode_call(
        EXECUTE,
        vec![
            Arg::Static(address_word(target)),
            Arg::Static(uint_word(value)),
            Arg::Dynamic(encode_bytes_tail(data)),
        ],
    )
}

/// Smart-account `executeBatch(targets, values, datas)`
pub fn encode_execute_batch(calls: &[(Address, u128, Vec<u8>)]) -> Vec<u8> {
    let mut targets = usize_word(calls.len()).to_vec();
    let mut values = usize_word(calls.len()).to_vec();
    for (target, value, _) in calls {
        targets.extend_from_slice(&address_word(target));
        values.extend_from_slice(&uint_word(*value));
    }

    // bytes[]: length, then one offset per element (relative to the offsets), then elements
    let mut datas = usize_word(calls.len()).to_vec();
    datas.extend_from_slice(&encode_args(
        calls
            .iter()
            .map(|(_, _, data)| Arg::Dynamic(encode_bytes_tail(data)))
            .collect(),
    ));

    encode_call(
        EXECUTE_BATCH,
        vec![
            Arg::Dynamic(targets),
            Arg::Dynamic(values),
            Arg::Dynamic(datas),
        ],
    )
}

/// Meta-transaction envelope relayed on behalf of `user`
pub fn encode_meta_transaction(
    user: &Address,
    function_signature: &[u8],
    r: &[u8; 32],
    s: &[u8; 32],
    v: u8,
) -> Vec<u8> {
    encode_call(
        EXECUTE_META_TRANSACTION,
        vec![
            Arg::Static(address_word(user)),
            Arg::Dynamic(encode_bytes_tail(function_signature)),
            Arg::Static(*r),
            Arg::Static(*s),
            Arg::Static(uint_word(v as u128)),
        ],
    )
}

// ── decoding ────────────────────────────────────────────────────────────

/// Bounds-checked view over ABI-encoded arguments
struct AbiReader<'a> {
    data: &'a [u8],
}

impl<'a> AbiReader<'a> {
    fn word_at(&self, offset: usize) -> Option<&'a [u8]> {
        self.data.get(offset..offset.checked_add(WORD)?)
    }

    fn word(&self, index: usize) -> Option<&'a [u8]> {
        self.word_at(index.checked_mul(WORD)?)
    }

    fn usize_at(&self, offset: usize) -> Option<usize> {
        let word = self.word_at(offset)?;
        // Anything above 2^64 cannot be an in-bounds offset or length
        if word[..WORD - 8].iter().any(|b| *b != 0) {
            return None;
        }
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&word[WORD - 8..]);
        usize::try_from(u64::from_be_bytes(bytes)).ok()
    }

    fn address(&self, index: usize) -> Option<Address> {
        let word = self.word(index)?;
        let mut out = [0u8; ADDRESS_LEN];
        out.copy_from_slice(&word[WORD - ADDRESS_LEN..]);
        Some(Address(out))
    }

    fn bytes_at(&self, offset: usize) -> Option<&'a [u8]> {
        let len = self.usize_at(offset)?;
        let start = offset.checked_add(WORD)?;
        self.data.get(start..start.checked_add(len)?)
    }

    /// Dynamic `bytes` argument in head slot `index`
    fn bytes(&self, index: usize) -> Option<&'a [u8]> {
        self.bytes_at(self.usize_at(index.checked_mul(WORD)?)?)
    }

    /// Dynamic `bytes[]` argument in head slot `index`
    fn bytes_array(&self, index: usize) -> Option<BytesArray<'a>> {
        let offset = self.usize_at(index.checked_mul(WORD)?)?;
        let count = self.usize_at(offset)?;
        let base = offset.checked_add(WORD)?;
        let elements = AbiReader {
            data: self.data.get(base..)?,
        };
        // Each element needs at least its offset word
        if count > elements.data.len() / WORD {
            return None;
        }
        Some(BytesArray {
            elements,
            count,
            next: 0,
        })
    }
}

/// Lazily decoded `bytes[]` elements
struct BytesArray<'a> {
    elements: AbiReader<'a>,
    count: usize,
    next: usize,
}

impl<'a> Iterator for BytesArray<'a> {
    type Item = Option<&'a [u8]>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.count {
            return None;
        }
        let offset = self.next * WORD;
        self.next += 1;
        Some(
            self.elements
                .usize_at(offset)
                .and_then(|at| self.elements.bytes_at(at)),
        )
    }
}

fn split_selector(input: &[u8]) -> Option<(Selector, AbiReader<'_>)> {
    if input.len() < SELECTOR_LEN {
        return None;
    }
    let (head, data) = input.split_at(SELECTOR_LEN);
    let mut sel = [0u8; SELECTOR_LEN];
    sel.copy_from_slice(head);
    Some((sel, AbiReader { data }))
}

/// Recover the ephemeral public key announced for `stealth_address`.
///
/// Unwraps meta-transaction and smart-account envelopes up to
/// [`MAX_CALL_DEPTH`] levels deep. Returns `None` for unknown selectors,
/// truncated data, or when no payment in the call targets `stealth_address`.
pub fn find_ephemeral_key(
    input: &[u8],
    stealth_address: &Address,
) -> Option<[u8; COMPRESSED_PUBLIC_KEY_LEN]> {
    let calls = KnownCalls::new();
    // Element offsets may alias one another, so nested batches are bounded by
    // a visit budget proportional to the input size rather than by depth alone
    let mut budget = 2 * (input.len() / WORD) + 2;
    find_at_depth(&calls, input, stealth_address, 0, &mut budget)
}

struct KnownCalls {
    send: Selector,
    execute: Selector,
    execute_batch: Selector,
    meta_transaction: Selector,
}

impl KnownCalls {
    fn new() -> Self {
        Self {
            send: selector(SEND_STEALTH_PAYMENT),
            execute: selector(EXECUTE),
            execute_batch: selector(EXECUTE_BATCH),
            meta_transaction: selector(EXECUTE_META_TRANSACTION),
        }
    }
}

fn spend(budget: &mut usize, cost: usize) -> Option<()> {
    *budget = budget.checked_sub(cost)?;
    Some(())
}

fn find_at_depth(
    calls: &KnownCalls,
    input: &[u8],
    stealth_address: &Address,
    depth: usize,
    budget: &mut usize,
) -> Option<[u8; COMPRESSED_PUBLIC_KEY_LEN]> {
    spend(budget, 1)?;
    let (sel, args) = split_selector(input)?;

    if sel == calls.send {
        if args.address(0)? != *stealth_address {
            return None;
        }
        return args.bytes(2)?.try_into().ok();
    }

    if depth >= MAX_CALL_DEPTH {
        return None;
    }

    if sel == calls.execute {
        find_at_depth(calls, args.bytes(2)?, stealth_address, depth + 1, budget)
    } else if sel == calls.meta_transaction {
        find_at_depth(calls, args.bytes(1)?, stealth_address, depth + 1, budget)
    } else if sel == calls.execute_batch {
        let elements = args.bytes_array(2)?;
        spend(budget, elements.count)?;
        for inner in elements {
            if let Some(key) = find_at_depth(calls, inner?, stealth_address, depth + 1, budget) {
                return Some(key);
            }
            if *budget == 0 {
                return None;
            }
        }
        None
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(fill: u8) -> [u8; 33] {
        let mut k = [fill; 33];
        k[0] = 0x02;
        k
    }

    fn stealth(fill: u8) -> Address {
        Address([fill; 20])
    }

    #[test]
    fn test_known_selectors() {
        // transfer(address,uint256)
        assert_eq!(selector("transfer(address,uint256)"), [0xa9, 0x05, 0x9c, 0xbb]);
        assert_ne!(selector(EXECUTE), selector(EXECUTE_BATCH));
    }

    #[test]
    fn test_send_payment_layout() {
        let data = encode_send_stealth_payment(&stealth(0x11), 1_000, &key(0xaa));
        // selector + 3 head words + length word + 2 padded data words
        assert_eq!(data.len(), 4 + 3 * 32 + 32 + 64);
        assert_eq!(&data[4 + 12..4 + 32], &[0x11; 20]);
        assert_eq!(data[4 + 2 * 32 - 1], 0xe8);
        assert_eq!(data[4 + 3 * 32 - 1], 0x60);
        assert_eq!(data[4 + 4 * 32 - 1], 33);
    }

    #[test]
    fn test_bare_call() {
        let data = encode_send_stealth_payment(&stealth(0x11), 5, &key(0xaa));
        assert_eq!(find_ephemeral_key(&data, &stealth(0x11)), Some(key(0xaa)));
        assert_eq!(find_ephemeral_key(&data, &stealth(0x22)), None);
    }

    #[test]
    fn test_execute_wrapper() {
        let inner = encode_send_stealth_payment(&stealth(0x11), 5, &key(0xaa));
        let data = encode_execute(&Address([0x99; 20]), 5, &inner);
        assert_eq!(find_ephemeral_key(&data, &stealth(0x11)), Some(key(0xaa)));
    }

    #[test]
    fn test_meta_transaction_wrapping_execute() {
        let inner = encode_send_stealth_payment(&stealth(0x11), 5, &key(0xaa));
        let execute = encode_execute(&Address([0x99; 20]), 0, &inner);
        let data =
            encode_meta_transaction(&Address([0x33; 20]), &execute, &[1u8; 32], &[2u8; 32], 27);
        assert_eq!(find_ephemeral_key(&data, &stealth(0x11)), Some(key(0xaa)));
    }

    #[test]
    fn test_batch_picks_matching_payment() {
        let calls = vec![
            (
                Address([0x99; 20]),
                1,
                encode_send_stealth_payment(&stealth(0x11), 1, &key(0xaa)),
            ),
            (Address([0x98; 20]), 0, b"unrelated call".to_vec()),
            (
                Address([0x99; 20]),
                2,
                encode_send_stealth_payment(&stealth(0x22), 2, &key(0xbb)),
            ),
        ];
        let data = encode_execute_batch(&calls);
        assert_eq!(find_ephemeral_key(&data, &stealth(0x11)), Some(key(0xaa)));
        assert_eq!(find_ephemeral_key(&data, &stealth(0x22)), Some(key(0xbb)));
        assert_eq!(find_ephemeral_key(&data, &stealth(0x33)), None);
    }

    #[test]
    fn test_unknown_selector_and_truncation() {
        assert_eq!(find_ephemeral_key(&[], &stealth(0x11)), None);
        assert_eq!(find_ephemeral_key(&[0xde, 0xad], &stealth(0x11)), None);

        let mut unknown = encode_send_stealth_payment(&stealth(0x11), 5, &key(0xaa));
        unknown[0] ^= 0xff;
        assert_eq!(find_ephemeral_key(&unknown, &stealth(0x11)), None);

        let data = encode_send_stealth_payment(&stealth(0x11), 5, &key(0xaa));
        for cut in [4, 36, 100, 4 + 4 * 32 + 10] {
            assert_eq!(find_ephemeral_key(&data[..cut], &stealth(0x11)), None, "cut {}", cut);
        }
    }

    #[test]
    fn test_wrong_key_length_is_ignored() {
        let data = encode_send_stealth_payment(&stealth(0x11), 5, &[0x02; 32]);
        assert_eq!(find_ephemeral_key(&data, &stealth(0x11)), None);
    }

    #[test]
    fn test_depth_limit() {
        let mut data = encode_send_stealth_payment(&stealth(0x11), 5, &key(0xaa));
        for _ in 0..MAX_CALL_DEPTH {
            data = encode_execute(&Address([0x99; 20]), 0, &data);
        }
        assert_eq!(find_ephemeral_key(&data, &stealth(0x11)), Some(key(0xaa)));

        let too_deep = encode_execute(&Address([0x99; 20]), 0, &data);
        assert_eq!(find_ephemeral_key(&too_deep, &stealth(0x11)), None);
    }

    /// executeBatch whose `count` element offsets all point at one `inner` blob
    fn aliased_batch(inner: &[u8], count: usize) -> Vec<u8> {
        let mut data = selector(EXECUTE_BATCH).to_vec();
        data.extend_from_slice(&usize_word(0x60));
        data.extend_from_slice(&usize_word(0x60));
        data.extend_from_slice(&usize_word(0x60));
        data.extend_from_slice(&usize_word(count));
        for _ in 0..count {
            data.extend_from_slice(&usize_word(count * WORD));
        }
        data.extend_from_slice(&usize_word(inner.len()));
        data.extend_from_slice(inner);
        data
    }

    #[test]
    fn test_aliased_nested_batches_are_bounded() {
        let mut data = vec![0u8; 4];
        for _ in 0..MAX_CALL_DEPTH {
            data = aliased_batch(&data, 80);
        }
        let started = std::time::Instant::now();
        assert_eq!(find_ephemeral_key(&data, &stealth(0x11)), None);
        assert!(started.elapsed() < std::time::Duration::from_secs(2));
    }

    #[test]
    fn test_aliased_batch_still_finds_payment() {
        // Aliasing alone is legal; a payment behind it is still found
        let inner = encode_send_stealth_payment(&stealth(0x11), 5, &key(0xaa));
        let data = aliased_batch(&inner, 3);
        assert_eq!(find_ephemeral_key(&data, &stealth(0x11)), Some(key(0xaa)));
    }

    #[test]
    fn test_hostile_batch_length() {
        let mut data = selector(EXECUTE_BATCH).to_vec();
        data.extend_from_slice(&usize_word(0x60));
        data.extend_from_slice(&usize_word(0x60));
        data.extend_from_slice(&usize_word(0x60));
        data.extend_from_slice(&usize_word(usize::MAX >> 8));
        assert_eq!(find_ephemeral_key(&data, &stealth(0x11)), None);
    }
}
