//! `multipart/x-mixed-replace` framing for MJPEG streams.
//!
//! Each part is
//!
//! ```text
//! --myboundary\r\n
//! Content-Type: image/jpeg\r\n
//! Content-Length: <N>\r\n
//! \r\n
//! <N bytes of JPEG>\r\n
//! ```
//!
//! Parts are delimited by the boundary parameter verbatim, without an extra
//! `--` prefix. Browsers and OBS browser sources accept this form.

use bytes::{Bytes, BytesMut};

/// Boundary parameter and part delimiter.
pub const BOUNDARY: &str = "--myboundary";

/// Response `Content-Type` for `/stream`.
pub const CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=--myboundary";

/// Header block of one part carrying `len` bytes of JPEG.
pub fn part_header(len: usize) -> String {
    format!("{BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {len}\r\n\r\n")
}

/// One complete part, assembled so it can be written as a single chunk.
pub fn encode_part(jpeg: &[u8]) -> Bytes {
    let header = part_header(jpeg.len());
    let mut part = BytesMut::with_capacity(header.len() + jpeg.len() + 2);
    part.extend_from_slice(header.as_bytes());
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n");
    part.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Split a part into (declared length, payload) using only the header.
    fn parse(part: &[u8]) -> (usize, &[u8]) {
        let end = part
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .expect("header terminator");
        let header = std::str::from_utf8(&part[..end]).unwrap();
        let mut lines = header.split("\r\n");
        assert_eq!(lines.next(), Some(BOUNDARY));
        assert_eq!(lines.next(), Some("Content-Type: image/jpeg"));
        let declared: usize = lines
            .next()
            .and_then(|l| l.strip_prefix("Content-Length: "))
            .unwrap()
            .parse()
            .unwrap();
        assert_eq!(lines.next(), None);

        let body = &part[end + 4..];
        assert!(body.ends_with(b"\r\n"));
        (declared, &body[..body.len() - 2])
    }

    #[test]
    fn content_type_names_the_delimiter() {
        assert_eq!(CONTENT_TYPE, format!("multipart/x-mixed-replace; boundary={BOUNDARY}"));
    }

    #[test]
    fn exact_header_bytes() {
        let part = encode_part(b"\xFF\xD8\xFF\xD9");
        assert_eq!(
            &part[..],
            b"--myboundary\r\nContent-Type: image/jpeg\r\nContent-Length: 4\r\n\r\n\xFF\xD8\xFF\xD9\r\n"
        );
    }

    #[test]
    fn declared_length_matches_payload() {
        for len in [0usize, 1, 2, 13, 4096, 1 << 20] {
            let jpeg: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let part = encode_part(&jpeg);
            let (declared, payload) = parse(&part);
            assert_eq!(declared, len);
            assert_eq!(payload, &jpeg[..]);
            assert_eq!(part.len(), part_header(len).len() + len + 2);
        }
    }

    #[test]
    fn empty_frame_is_well_formed() {
        let part = encode_part(b"");
        assert_eq!(
            &part[..],
            b"--myboundary\r\nContent-Type: image/jpeg\r\nContent-Length: 0\r\n\r\n\r\n"
        );
        let (declared, payload) = parse(&part);
        assert_eq!(declared, 0);
        assert!(payload.is_empty());
    }

    #[test]
    fn payload_bytes_are_not_escaped() {
        let jpeg = b"\r\n\r\n--myboundary\r\n";
        let part = encode_part(jpeg);
        let (declared, payload) = parse(&part);
        assert_eq!(declared, jpeg.len());
        assert_eq!(payload, jpeg);
    }
}
