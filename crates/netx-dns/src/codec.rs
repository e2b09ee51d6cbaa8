//! Shared QNAME/TXT packing helpers used by both [`crate::DnsClient`] and
//! [`crate::DnsServer`].

use data_encoding::BASE32_NOPAD;

const LABEL_MAX: usize = 63;
const QNAME_MAX: usize = 253;

/// Packs `payload` as Base32-in-QNAME labels under `domain`, producing the
/// full QNAME string (without a trailing root dot; callers pass this to
/// `Name::from_ascii`).
pub(crate) fn encode_qname(payload: &[u8], domain: &str) -> String {
    let encoded = BASE32_NOPAD.encode(payload);
    let mut qname = String::with_capacity(encoded.len() + encoded.len() / LABEL_MAX + domain.len() + 1);
    for chunk in encoded.as_bytes().chunks(LABEL_MAX) {
        qname.push_str(std::str::from_utf8(chunk).expect("base32 alphabet is ASCII"));
        qname.push('.');
    }
    qname.push_str(domain);
    qname
}

/// Strips `domain` (case-insensitive) off the end of `qname`, concatenates
/// the remaining labels, and Base32-decodes them back to raw bytes. Returns
/// `None` if the suffix does not match.
pub(crate) fn decode_qname(qname: &str, domain: &str) -> Option<Vec<u8>> {
    let qname = qname.trim_end_matches('.');
    let domain = domain.trim_end_matches('.');

    let suffix_start = qname.len().checked_sub(domain.len())?;
    if !qname[suffix_start..].eq_ignore_ascii_case(domain) {
        return None;
    }
    let prefix = qname[..suffix_start].trim_end_matches('.');
    let encoded: String = prefix.split('.').collect();
    BASE32_NOPAD.decode(encoded.to_ascii_uppercase().as_bytes()).ok()
}

/// Splits `payload`'s Base32 encoding into chunks no longer than
/// `max_len` bytes each, for packing into TXT strings (each capped at 255
/// bytes per spec.md §4.7).
pub(crate) fn encode_txt_chunks(payload: &[u8], max_len: usize) -> Vec<String> {
    let encoded = BASE32_NOPAD.encode(payload);
    encoded
        .as_bytes()
        .chunks(max_len)
        .map(|chunk| std::str::from_utf8(chunk).expect("base32 alphabet is ASCII").to_string())
        .collect()
}

/// Concatenates TXT string chunks and Base32-decodes them back to the raw
/// payload.
pub(crate) fn decode_txt_chunks(chunks: &[impl AsRef<[u8]>]) -> Option<Vec<u8>> {
    let mut joined = String::new();
    for chunk in chunks {
        joined.push_str(std::str::from_utf8(chunk.as_ref()).ok()?);
    }
    BASE32_NOPAD.decode(joined.to_ascii_uppercase().as_bytes()).ok()
}

/// Solves `E + ceil(E/63) + len(domain) + 1 <= 253` for the largest encoded
/// (Base32) length `E`, then converts to a raw byte count via the 5/8
/// Base32 expansion ratio. This is [`crate::DnsClient`]'s `MaxWrite`.
pub(crate) fn max_write_for_domain(domain: &str) -> u16 {
    let domain_len = domain.len();
    let mut best_e = 0usize;
    for e in 1..=QNAME_MAX {
        let labels = e.div_ceil(LABEL_MAX);
        if e + labels + domain_len + 1 <= QNAME_MAX {
            best_e = e;
        } else {
            break;
        }
    }
    let raw_len = best_e * 5 / 8;
    u16::try_from(raw_len).unwrap_or(u16::MAX)
}
