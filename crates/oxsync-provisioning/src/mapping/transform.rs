//! Value transforms for special-handling properties.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{Datelike, NaiveDate};
use url::Url;

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d.%m.%Y"];
const MIN_YEAR: i32 = 1900;
const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8, 0xFF];

/// Content type forwarded with image properties.
pub const JPEG_CONTENT_TYPE: &str = "image/jpeg";

/// Normalize `YYYY-MM-DD` or `DD.MM.YYYY` to `YYYY-MM-DD`.
pub fn normalize_date(raw: &str) -> Result<String, String> {
    let raw = raw.trim();
    let date = DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
        .ok_or_else(|| format!("unparsable date '{raw}'"))?;
    if date.year() < MIN_YEAR {
        return Err(format!("date '{raw}' is before {MIN_YEAR}"));
    }
    Ok(date.format("%Y-%m-%d").to_string())
}

/// Decode a base64 image and accept it only if it is a JPEG.
pub fn decode_jpeg(raw: &str) -> Result<Vec<u8>, String> {
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = STANDARD
        .decode(compact)
        .map_err(|e| format!("invalid base64 image: {e}"))?;
    if !bytes.starts_with(JPEG_MAGIC) {
        return Err(format!("unsupported image format ({})", sniff(&bytes)));
    }
    Ok(bytes)
}

fn sniff(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(b"\x89PNG") {
        "png"
    } else if bytes.starts_with(b"GIF8") {
        "gif"
    } else if bytes.starts_with(b"BM") {
        "bmp"
    } else {
        "unknown"
    }
}

/// Host, port and scheme of a mail server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerParts {
    pub server: String,
    pub port: u16,
    pub schema: String,
}

fn scheme_port(scheme: &str) -> Option<u16> {
    match scheme {
        "imap" => Some(143),
        "imaps" => Some(993),
        "smtp" => Some(25),
        "smtps" => Some(465),
        _ => None,
    }
}

/// Split a server value into its parts, filling gaps from `default`.
///
/// The value may be empty, a bare host, `host:port`, `:port` or a full URL.
/// A value without a host takes the host of `default`.
pub fn split_server_url(raw: Option<&str>, default: &Url) -> Result<ServerParts, String> {
    let raw = raw.map(str::trim).unwrap_or_default();
    let url = if raw.is_empty() {
        default.clone()
    } else {
        let (scheme, rest) = raw.split_once("://").unwrap_or((default.scheme(), raw));
        let authority = if rest.is_empty() || rest.starts_with(':') {
            format!("{}{rest}", default.host_str().unwrap_or_default())
        } else {
            rest.to_string()
        };
        Url::parse(&format!("{scheme}://{authority}"))
            .map_err(|e| format!("invalid server '{raw}': {e}"))?
    };

    let scheme = url.scheme().to_string();
    let server = url
        .host_str()
        .filter(|h| !h.is_empty())
        .or_else(|| default.host_str())
        .ok_or_else(|| format!("no host in '{raw}'"))?
        .to_string();
    let port = url
        .port()
        .or_else(|| {
            if scheme == default.scheme() {
                default.port()
            } else {
                None
            }
        })
        .or_else(|| scheme_port(&scheme))
        .ok_or_else(|| format!("no port known for scheme '{scheme}'"))?;

    Ok(ServerParts {
        server,
        port,
        schema: format!("{scheme}://"),
    })
}
