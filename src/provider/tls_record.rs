use super::ProviderError;

pub(crate) const HEADER_LEN: usize = 5;
pub(crate) const MAX_PLAINTEXT_LEN: usize = 16 * 1024;
pub(crate) const MAX_CIPHERTEXT_LEN: usize = MAX_PLAINTEXT_LEN + 2048;

const CONTENT_TYPE_CHANGE_CIPHER_SPEC: u8 = 20;
const CONTENT_TYPE_HEARTBEAT: u8 = 24;

/// Returns the length of the first complete record in `data`, or `None` if
/// more bytes are needed.
pub(crate) fn record_len(data: &[u8]) -> Result<Option<usize>, ProviderError> {
    if data.len() < HEADER_LEN {
        return Ok(None);
    }

    let content_type = data[0];
    if !(CONTENT_TYPE_CHANGE_CIPHER_SPEC..=CONTENT_TYPE_HEARTBEAT).contains(&content_type) {
        return Err(ProviderError::Protocol(format!(
            "invalid TLS record content type {content_type}"
        )));
    }

    let payload_len = u16::from_be_bytes([data[3], data[4]]) as usize;
    if payload_len > MAX_CIPHERTEXT_LEN {
        return Err(ProviderError::Protocol(format!(
            "TLS record length {payload_len} exceeds maximum {MAX_CIPHERTEXT_LEN}"
        )));
    }

    let total = HEADER_LEN + payload_len;
    Ok((data.len() >= total).then_some(total))
}
