//! CIP-37 base32 addresses
//!
//! `<prefix>:<payload+checksum>` where the prefix names the network
//! (`cfx` = 1029, `cfxtest` = 1, `net<id>` otherwise), the payload is a
//! version byte (0) followed by the 20 account bytes, and the checksum is a
//! 40-bit BCH code over the prefix and payload.

use std::fmt;

use crate::error::CustodyError;

const ALPHABET: &[u8; 32] = b"abcdefghjkmnprstuvwxyz0123456789";
const VERSION_BYTE: u8 = 0;
/// 34 payload characters plus 8 checksum characters
const ENCODED_LEN: usize = 42;
const CHECKSUM_LEN: usize = 8;

pub const MAINNET_ID: u64 = 1029;
pub const TESTNET_ID: u64 = 1;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("address has no network prefix")]
    MissingPrefix,
    #[error("invalid network prefix: {0}")]
    InvalidPrefix(String),
    #[error("mixed-case address")]
    MixedCase,
    #[error("invalid base32 character: {0}")]
    InvalidCharacter(char),
    #[error("invalid length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("checksum mismatch")]
    InvalidChecksum,
    #[error("unsupported version byte: {0}")]
    InvalidVersion(u8),
    #[error("address type option '{given}' does not match payload type '{actual}'")]
    TypeMismatch { given: String, actual: String },
    #[error("invalid hex address: {0}")]
    InvalidHex(String),
}

impl From<AddressError> for CustodyError {
    fn from(e: AddressError) -> Self {
        CustodyError::invalid_address(e.to_string())
    }
}

/// Address kind, taken from the first nibble of the account bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressType {
    User,
    Contract,
    Builtin,
    Null,
    Unknown,
}

impl AddressType {
    pub fn of(bytes: &[u8; 20]) -> Self {
        if bytes.iter().all(|b| *b == 0) {
            return AddressType::Null;
        }
        match bytes[0] >> 4 {
            0x1 => AddressType::User,
            0x8 => AddressType::Contract,
            0x0 => AddressType::Builtin,
            _ => AddressType::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AddressType::User => "user",
            AddressType::Contract => "contract",
            AddressType::Builtin => "builtin",
            AddressType::Null => "null",
            AddressType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for AddressType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded CIP-37 address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConfluxAddress {
    pub network_id: u64,
    pub bytes: [u8; 20],
}

impl ConfluxAddress {
    pub fn new(bytes: [u8; 20], network_id: u64) -> Self {
        Self { network_id, bytes }
    }

    /// Build from `0x` hex account bytes
    pub fn from_hex(hex_address: &str, network_id: u64) -> Result<Self, AddressError> {
        let stripped = hex_address.trim_start_matches("0x").trim_start_matches("0X");
        let decoded = hex::decode(stripped).map_err(|e| AddressError::InvalidHex(e.to_string()))?;
        let bytes: [u8; 20] = decoded
            .try_into()
            .map_err(|v: Vec<u8>| AddressError::InvalidHex(format!("expected 20 bytes, got {}", v.len())))?;
        Ok(Self::new(bytes, network_id))
    }

    pub fn address_type(&self) -> AddressType {
        AddressType::of(&self.bytes)
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.bytes))
    }

    pub fn encode(&self) -> String {
        encode(&self.bytes, self.network_id, false)
    }

    pub fn encode_verbose(&self) -> String {
        encode(&self.bytes, self.network_id, true)
    }
}

impl fmt::Display for ConfluxAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl std::str::FromStr for ConfluxAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode(s)
    }
}

pub fn network_prefix(network_id: u64) -> String {
    match network_id {
        MAINNET_ID => "cfx".to_string(),
        TESTNET_ID => "cfxtest".to_string(),
        id => format!("net{}", id),
    }
}

fn parse_prefix(prefix: &str) -> Result<u64, AddressError> {
    match prefix {
        "cfx" => Ok(MAINNET_ID),
        "cfxtest" => Ok(TESTNET_ID),
        other => {
            let id = other
                .strip_prefix("net")
                .and_then(|n| n.parse::<u64>().ok())
                .ok_or_else(|| AddressError::InvalidPrefix(other.to_string()))?;
            // the reserved ids have their own names
            if id == MAINNET_ID || id == TESTNET_ID || other != format!("net{}", id) {
                return Err(AddressError::InvalidPrefix(other.to_string()));
            }
            Ok(id)
        }
    }
}

/// Encode 20 account bytes for `network_id`
pub fn encode(bytes: &[u8; 20], network_id: u64, verbose: bool) -> String {
    let prefix = network_prefix(network_id);

    let mut raw = Vec::with_capacity(21);
    raw.push(VERSION_BYTE);
    raw.extend_from_slice(bytes);
    let payload = convert_bits_8_to_5(&raw);

    let mut checked: Vec<u8> = prefix_values(&prefix);
    checked.push(0);
    checked.extend_from_slice(&payload);
    checked.extend_from_slice(&[0u8; CHECKSUM_LEN]);
    let checksum = polymod(&checked);

    let mut body = String::with_capacity(ENCODED_LEN);
    for v in payload.iter().copied().chain((0..CHECKSUM_LEN).map(|i| ((checksum >> (5 * (7 - i))) & 31) as u8)) {
        body.push(ALPHABET[v as usize] as char);
    }

    if verbose {
        format!(
            "{}:TYPE.{}:{}",
            prefix.to_uppercase(),
            AddressType::of(bytes).as_str().to_uppercase(),
            body.to_uppercase()
        )
    } else {
        format!("{}:{}", prefix, body)
    }
}

/// Decode base32 or verbose form. All-lowercase or all-uppercase only.
pub fn decode(address: &str) -> Result<ConfluxAddress, AddressError> {
    let has_lower = address.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = address.chars().any(|c| c.is_ascii_uppercase());
    if has_lower && has_upper {
        return Err(AddressError::MixedCase);
    }
    let lower = address.to_ascii_lowercase();

    let parts: Vec<&str> = lower.split(':').collect();
    let (prefix, options, body) = match parts.as_slice() {
        [prefix, body] => (*prefix, None, *body),
        [prefix, options, body] => (*prefix, Some(*options), *body),
        _ => return Err(AddressError::MissingPrefix),
    };
    let network_id = parse_prefix(prefix)?;

    if body.len() != ENCODED_LEN {
        return Err(AddressError::InvalidLength {
            expected: ENCODED_LEN,
            actual: body.len(),
        });
    }

    let mut values = Vec::with_capacity(ENCODED_LEN);
    for c in body.chars() {
        let pos = ALPHABET
            .iter()
            .position(|a| *a as char == c)
            .ok_or(AddressError::InvalidCharacter(c))?;
        values.push(pos as u8);
    }

    let mut checked = prefix_values(prefix);
    checked.push(0);
    checked.extend_from_slice(&values);
    if polymod(&checked) != 0 {
        return Err(AddressError::InvalidChecksum);
    }

    let raw = convert_bits_5_to_8(&values[..ENCODED_LEN - CHECKSUM_LEN]);
    if raw.len() != 21 {
        return Err(AddressError::InvalidLength {
            expected: 21,
            actual: raw.len(),
        });
    }
    if raw[0] != VERSION_BYTE {
        return Err(AddressError::InvalidVersion(raw[0]));
    }

    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&raw[1..]);
    let decoded = ConfluxAddress { network_id, bytes };

    if let Some(options) = options {
        for option in options.split('.').collect::<Vec<_>>().chunks(2) {
            if let [key, value] = option {
                if *key == "type" && *value != decoded.address_type().as_str() {
                    return Err(AddressError::TypeMismatch {
                        given: value.to_string(),
                        actual: decoded.address_type().to_string(),
                    });
                }
            }
        }
    }

    Ok(decoded)
}

/// Low 5 bits of each prefix character
fn prefix_values(prefix: &str) -> Vec<u8> {
    prefix.bytes().map(|b| b & 0x1f).collect()
}

fn polymod(values: &[u8]) -> u64 {
    const GENERATORS: [u64; 5] = [
        0x98f2bc8e61,
        0x79b76d99e2,
        0xf33e5fb3c4,
        0xae2eabe2a8,
        0x1e4f43e470,
    ];

    let mut c: u64 = 1;
    for &d in values {
        let c0 = c >> 35;
        c = ((c & 0x07_ffff_ffff) << 5) ^ d as u64;
        for (i, g) in GENERATORS.iter().enumerate() {
            if (c0 >> i) & 1 == 1 {
                c ^= g;
            }
        }
    }
    c ^ 1
}

fn convert_bits_8_to_5(data: &[u8]) -> Vec<u8> {
    let mut acc: u32 = 0;
    let mut bits: u32 = 0;
    let mut out = Vec::with_capacity((data.len() * 8).div_ceil(5));
    for &b in data {
        acc = (acc << 8) | b as u32;
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(((acc >> bits) & 31) as u8);
        }
        acc &= (1 << bits) - 1;
    }
    if bits > 0 {
        out.push(((acc << (5 - bits)) & 31) as u8);
    }
    out
}

/// Padding bits are dropped
fn convert_bits_5_to_8(data: &[u8]) -> Vec<u8> {
    let mut acc: u32 = 0;
    let mut bits: u32 = 0;
    let mut out = Vec::with_capacity(data.len() * 5 / 8);
    for &v in data {
        acc = (acc << 5) | v as u32;
        bits += 5;
        while bits >= 8 {
            bits -= 8;
            out.push(((acc >> bits) & 0xff) as u8);
        }
        acc &= (1 << bits) - 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes(h: &str) -> [u8; 20] {
        ConfluxAddress::from_hex(h, MAINNET_ID).unwrap().bytes
    }

    #[test]
    fn test_known_vectors() {
        let cases = [
            (
                "85d80245dc02f5a89589e1f19c5c718e405b56cd",
                "cfx:acc7uawf5ubtnmezvhu9dhc6sghea0403y2dgpyfjp",
                "cfxtest:acc7uawf5ubtnmezvhu9dhc6sghea0403ywjz6wtpg",
            ),
            (
                "1a2f80341409639ea6a35bbcab8299066109aa55",
                "cfx:aarc9abycue0hhzgyrr53m6cxedgccrmmyybjgh4xg",
                "cfxtest:aarc9abycue0hhzgyrr53m6cxedgccrmmy8m50bu1p",
            ),
            (
                "106d49f8505410eb4e671d51f7d96d2c87807b09",
                "cfx:aajg4wt2mbmbb44sp6szd783ry0jtad5bea80xdy7p",
                "cfxtest:aajg4wt2mbmbb44sp6szd783ry0jtad5bemzfdf83g",
            ),
        ];
        for (hex_addr, main, test) in cases {
            let b = bytes(hex_addr);
            assert_eq!(encode(&b, MAINNET_ID, false), main);
            assert_eq!(encode(&b, TESTNET_ID, false), test);
            assert_eq!(decode(main).unwrap(), ConfluxAddress::new(b, MAINNET_ID));
            assert_eq!(decode(test).unwrap(), ConfluxAddress::new(b, TESTNET_ID));
        }
    }

    #[test]
    fn test_custom_network_and_null() {
        let b = bytes("85d80245dc02f5a89589e1f19c5c718e405b56cd");
        assert_eq!(encode(&b, 10086, false), "net10086:acc7uawf5ubtnmezvhu9dhc6sghea0403yxs6zve09");
        assert_eq!(decode("net10086:acc7uawf5ubtnmezvhu9dhc6sghea0403yxs6zve09").unwrap().network_id, 10086);

        let null = encode(&[0u8; 20], MAINNET_ID, false);
        assert_eq!(null, "cfx:aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa0sfbnjm2");
        assert_eq!(decode(&null).unwrap().address_type(), AddressType::Null);
    }

    #[test]
    fn test_verbose_form() {
        let b = bytes("1a2f80341409639ea6a35bbcab8299066109aa55");
        let verbose = encode(&b, MAINNET_ID, true);
        assert_eq!(verbose, "CFX:TYPE.USER:AARC9ABYCUE0HHZGYRR53M6CXEDGCCRMMYYBJGH4XG");
        assert_eq!(decode(&verbose).unwrap().bytes, b);

        // wrong type option
        let err = decode("CFX:TYPE.CONTRACT:AARC9ABYCUE0HHZGYRR53M6CXEDGCCRMMYYBJGH4XG").unwrap_err();
        assert!(matches!(err, AddressError::TypeMismatch { .. }));
    }

    #[test]
    fn test_address_types() {
        assert_eq!(AddressType::of(&bytes("1a2f80341409639ea6a35bbcab8299066109aa55")), AddressType::User);
        assert_eq!(AddressType::of(&bytes("85d80245dc02f5a89589e1f19c5c718e405b56cd")), AddressType::Contract);
        assert_eq!(AddressType::of(&bytes("0888000000000000000000000000000000000002")), AddressType::Builtin);
    }

    #[test]
    fn test_rejections() {
        assert_eq!(
            decode("cfx:aarc9abycue0hhzgyrr53m6cxedgccrmmyybjgh4xh").unwrap_err(),
            AddressError::InvalidChecksum
        );
        assert_eq!(
            decode("cfx:Aarc9abycue0hhzgyrr53m6cxedgccrmmyybjgh4xg").unwrap_err(),
            AddressError::MixedCase
        );
        assert!(matches!(
            decode("btc:aarc9abycue0hhzgyrr53m6cxedgccrmmyybjgh4xg").unwrap_err(),
            AddressError::InvalidPrefix(_)
        ));
        assert!(matches!(decode("net1029:aarc9abycue0hhzgyrr53m6cxedgccrmmyybjgh4xg"), Err(AddressError::InvalidPrefix(_))));
        assert!(matches!(decode("cfx:aarc9aby"), Err(AddressError::InvalidLength { .. })));
        assert!(matches!(
            decode("cfx:oarc9abycue0hhzgyrr53m6cxedgccrmmyybjgh4xg"),
            Err(AddressError::InvalidCharacter('o'))
        ));
        assert_eq!(decode("aarc9abycue0hhzgyrr53m6cxedgccrmmyybjgh4xg").unwrap_err(), AddressError::MissingPrefix);
    }
}
