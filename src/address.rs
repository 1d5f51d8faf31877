use std::net::Ipv4Addr;

use crate::error::InvalidAddress;
use crate::shared_types::AddressKey;

/// Encodes one line (newline already stripped) into its [`AddressKey`].
///
/// Only strict dotted-decimal text is accepted: four octets in `0..=255`,
/// no surrounding whitespace, no IPv6 forms.
pub(crate) fn encode(line: &[u8]) -> Result<AddressKey, InvalidAddress> {
    let text = std::str::from_utf8(line)
        .map_err(|_| InvalidAddress(String::from_utf8_lossy(line).into_owned()))?;
    encode_str(text)
}

pub(crate) fn encode_str(text: &str) -> Result<AddressKey, InvalidAddress> {
    text.parse::<Ipv4Addr>()
        .map(|addr| u32::from_be_bytes(addr.octets()))
        .map_err(|_| InvalidAddress(text.to_owned()))
}
