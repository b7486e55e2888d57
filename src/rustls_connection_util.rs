use std::io::Cursor;

/// Hands every byte of `data` to `connection`, which must accept all of it.
#[inline]
pub fn feed_rustls_connection(
    connection: &mut rustls::Connection,
    data: &[u8],
) -> std::io::Result<()> {
    let mut cursor = Cursor::new(data);
    let mut i = 0;
    while i < data.len() {
        let n = connection.read_tls(&mut cursor).map_err(|e| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("failed to feed rustls connection: {e}"),
            )
        })?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!(
                    "rustls connection did not consume all bytes: fed {}/{} bytes",
                    i,
                    data.len()
                ),
            ));
        }
        i += n;
    }
    Ok(())
}

/// Collects every pending outgoing TLS byte.
pub fn drain_rustls_connection(
    connection: &mut rustls::Connection,
) -> std::io::Result<bytes::BytesMut> {
    use bytes::BufMut;

    let mut writer = bytes::BytesMut::new().writer();
    while connection.wants_write() {
        connection.write_tls(&mut writer)?;
    }
    Ok(writer.into_inner())
}
