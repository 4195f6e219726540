//! Payload decoders: file bytes to a kind-tagged, caller-ready value.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{json, Value};

/// Sniff the image format from its magic bytes and wrap the data as a
/// base64 payload keyed by mime type.
pub(crate) fn decode_image(data: &[u8]) -> Result<Value, String> {
    let format = image::guess_format(data).map_err(|_| "not a valid image".to_string())?;
    let encoded = STANDARD.encode(data);
    Ok(json!({
        "data": { (format.to_mime_type()): encoded },
        "metadata": {}
    }))
}

pub(crate) fn decode_html(data: &[u8]) -> Result<Value, String> {
    let html =
        std::str::from_utf8(data).map_err(|_| "html data is not valid utf-8".to_string())?;
    Ok(json!({
        "data": { "text/html": html },
        "metadata": {}
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\nrest-of-image";

    #[test]
    fn image_payload_is_keyed_by_mime_type() {
        let value = decode_image(PNG_MAGIC).unwrap();
        let data = value.get("data").unwrap().as_object().unwrap();
        assert!(data.contains_key("image/png"));
        assert_eq!(
            data["image/png"].as_str().unwrap(),
            STANDARD.encode(PNG_MAGIC)
        );
    }

    #[test]
    fn unrecognized_bytes_are_not_an_image() {
        assert!(decode_image(b"plain text").is_err());
    }

    #[test]
    fn html_payload_carries_the_text() {
        let value = decode_html(b"<b>bold</b>").unwrap();
        assert_eq!(value["data"]["text/html"], "<b>bold</b>");
    }

    #[test]
    fn non_utf8_html_is_rejected() {
        assert!(decode_html(&[0xff, 0xfe, 0x00]).is_err());
    }
}
