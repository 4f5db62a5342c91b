use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use super::DATA_URI_PREFIX;
use crate::error::UploadError;

/// A parsed `data:[<media type>][;base64],<data>` string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataUri<'a> {
    pub media_type: &'a str,
    pub base64: bool,
    pub data: &'a str,
}

impl<'a> DataUri<'a> {
    pub fn parse(input: &'a str) -> Option<Self> {
        let rest = input.strip_prefix(DATA_URI_PREFIX)?;
        let (header, data) = rest.split_once(',')?;

        let (header, base64) = match header.strip_suffix(";base64") {
            Some(h) => (h, true),
            None => (header, false),
        };
        // Parameters such as `;charset=utf-8` are not part of the media type.
        let media_type = header.split(';').next().unwrap_or("");
        let media_type = if media_type.is_empty() {
            "text/plain"
        } else {
            media_type
        };

        Some(Self {
            media_type,
            base64,
            data,
        })
    }

    /// Header part including the trailing comma, e.g. `data:image/png;base64,`.
    pub fn header_of(input: &str) -> Option<&str> {
        let comma = input.find(',')?;
        input
            .starts_with(DATA_URI_PREFIX)
            .then(|| &input[..=comma])
    }

    pub fn decode(&self) -> Result<Vec<u8>, UploadError> {
        if self.base64 {
            // Some producers wrap base64 across lines.
            let compact: String = self.data.chars().filter(|c| !c.is_whitespace()).collect();
            STANDARD
                .decode(compact.as_bytes())
                .map_err(|e| UploadError::InvalidPayload(e.to_string()))
        } else {
            percent_decode(self.data)
        }
    }

    pub fn extension(&self) -> &'static str {
        match self.media_type {
            "image/png" => "png",
            "image/jpeg" | "image/jpg" => "jpg",
            "image/webp" => "webp",
            "image/gif" => "gif",
            "image/svg+xml" => "svg",
            "application/pdf" => "pdf",
            "text/plain" => "txt",
            _ => "bin",
        }
    }
}

/// `%XX` escapes become the byte they name; everything else is copied as is.
fn percent_decode(data: &str) -> Result<Vec<u8>, UploadError> {
    let bytes = data.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'%' {
            out.push(bytes[i]);
            i += 1;
            continue;
        }
        let escape = bytes
            .get(i + 1..i + 3)
            .filter(|hex| hex.iter().all(u8::is_ascii_hexdigit))
            .and_then(|hex| std::str::from_utf8(hex).ok())
            .and_then(|hex| u8::from_str_radix(hex, 16).ok())
            .ok_or_else(|| UploadError::InvalidPayload(format!("bad escape at byte {}", i)))?;
        out.push(escape);
        i += 3;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_base64_image() {
        let uri = DataUri::parse("data:image/png;base64,aGVsbG8=").unwrap();
        assert_eq!(uri.media_type, "image/png");
        assert!(uri.base64);
        assert_eq!(uri.decode().unwrap(), b"hello");
        assert_eq!(uri.extension(), "png");
    }

    #[test]
    fn test_parse_plain_with_params() {
        let uri = DataUri::parse("data:text/plain;charset=utf-8,hi there").unwrap();
        assert_eq!(uri.media_type, "text/plain");
        assert!(!uri.base64);
        assert_eq!(uri.decode().unwrap(), b"hi there");
    }

    #[test]
    fn test_plain_data_is_percent_decoded() {
        let uri = DataUri::parse("data:,a%20b").unwrap();
        assert_eq!(uri.decode().unwrap(), b"a b");

        let uri = DataUri::parse("data:text/plain,caf%C3%A9%2C%25").unwrap();
        assert_eq!(uri.decode().unwrap(), "café,%".as_bytes());
    }

    #[test]
    fn test_broken_escape_is_reported() {
        for bad in ["data:,100%", "data:,%4", "data:,%zz", "data:,%+1"] {
            let uri = DataUri::parse(bad).unwrap();
            assert!(matches!(uri.decode(), Err(UploadError::InvalidPayload(_))));
        }
    }

    #[test]
    fn test_parse_defaults_media_type() {
        let uri = DataUri::parse("data:,abc").unwrap();
        assert_eq!(uri.media_type, "text/plain");
    }

    #[test]
    fn test_rejects_non_data_uri() {
        assert!(DataUri::parse("https://cdn/a.png").is_none());
        assert!(DataUri::parse("data:image/png;base64").is_none());
    }

    #[test]
    fn test_invalid_base64_is_reported() {
        let uri = DataUri::parse("data:image/png;base64,@@@").unwrap();
        assert!(matches!(uri.decode(), Err(UploadError::InvalidPayload(_))));
    }

    #[test]
    fn test_header_of() {
        assert_eq!(
            DataUri::header_of("data:image/jpeg;base64,/9j/4AAQ"),
            Some("data:image/jpeg;base64,")
        );
        assert_eq!(DataUri::header_of("https://a,b"), None);
    }
}
