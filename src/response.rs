//! Request classification, path resolution, and response header construction.
//!
//! None of this module touches sockets; it turns `(method, uri)` bytes plus
//! a document root into a [`Plan`] the write actor can execute.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::error::ResolveError;

fn status_text(code: u16) -> &'static str {
    match code {
        200 => "Ok",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method not allowed",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

fn content_type(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    Some(match ext.as_str() {
        "html" => "text/html",
        "css" => "text/css",
        "js" => "application/javascript",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "swf" => "application/x-shockwave-flash",
        _ => return None,
    })
}

/// A fully-built response, ready for the write actor: the header block plus
/// an optional path to open for the body (only ever set for `GET` 200).
#[derive(Debug)]
pub struct Plan {
    pub headers: Vec<u8>,
    pub body_path: Option<PathBuf>,
}

/// Decodes `%HH` and `+` within a single path segment.
fn decode_segment(segment: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(segment.len());
    let mut i = 0;
    while i < segment.len() {
        match segment[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < segment.len() => {
                let hi = hex_digit(segment[i + 1])?;
                let lo = hex_digit(segment[i + 2])?;
                out.push((hi << 4) | lo);
                i += 3;
            }
            b'%' => return None,
            other => {
                out.push(other);
                i += 1;
            }
        }
    }
    Some(out)
}

fn hex_digit(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Strips any query/fragment, splits on `/`, and percent/plus-decodes each
/// segment. Returns `None` on malformed percent escapes or non-UTF-8 output.
pub fn decode_uri_path(uri: &[u8]) -> Option<Vec<String>> {
    let end = uri
        .iter()
        .position(|&b| b == b'?' || b == b'#')
        .unwrap_or(uri.len());
    let body = &uri[..end];

    body.split(|&b| b == b'/')
        .map(|segment| {
            let decoded = decode_segment(segment)?;
            String::from_utf8(decoded).ok()
        })
        .collect()
}

/// Resolves decoded path segments under `root`, enforcing that the result
/// is `root` or has `root` as a strict ancestor. Directories are retried
/// with `index.html` appended.
fn resolve_under_root(root: &Path, segments: &[String]) -> Result<Option<PathBuf>, ResolveError> {
    let mut candidate = root.to_path_buf();
    for segment in segments {
        if segment.is_empty() || segment == "." {
            continue;
        }
        candidate.push(segment);
    }

    let resolved = match candidate.canonicalize() {
        Ok(p) => p,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(ResolveError::Canonicalize(e)),
    };

    if resolved != *root && !resolved.starts_with(root) {
        return Ok(None);
    }

    let meta = match fs::metadata(&resolved) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(ResolveError::Stat(e)),
    };

    if meta.is_dir() {
        let with_index = resolved.join("index.html");
        return match with_index.canonicalize() {
            Ok(p) if p == *root || p.starts_with(root) => {
                if fs::metadata(&p).map(|m| m.is_file()).unwrap_or(false) {
                    Ok(Some(p))
                } else {
                    Ok(None)
                }
            }
            _ => Ok(None),
        };
    }

    if meta.is_file() {
        Ok(Some(resolved))
    } else {
        Ok(None)
    }
}

fn rfc1123_date(now: chrono::DateTime<Utc>) -> String {
    now.format("%a, %d %b %Y %H:%M:%S UTC").to_string()
}

/// Builds the header block for `code`, with `Content-Length`/`Content-Type`
/// present iff `body_len`/`mime` are `Some`.
fn build_headers(code: u16, body_len: Option<u64>, mime: Option<&str>) -> Vec<u8> {
    let mut out = Vec::with_capacity(256);
    out.extend_from_slice(format!("HTTP/1.1 {} {}\r\n", code, status_text(code)).as_bytes());
    out.extend_from_slice(format!("Date: {}\r\n", rfc1123_date(Utc::now())).as_bytes());
    out.extend_from_slice(b"Server: httpd.py\r\n");
    out.extend_from_slice(b"Connection: close\r\n");
    if let Some(len) = body_len {
        out.extend_from_slice(format!("Content-Length: {}\r\n", len).as_bytes());
    }
    if let Some(mime) = mime {
        out.extend_from_slice(format!("Content-Type: {}\r\n", mime).as_bytes());
    }
    out.extend_from_slice(b"\r\n");
    out
}

pub(crate) fn plain(code: u16) -> Plan {
    Plan {
        headers: build_headers(code, None, None),
        body_path: None,
    }
}

/// Classifies `(method, uri)` against `root` and builds the full response
/// plan. Any unexpected failure collapses to a 500 with empty body headers,
/// matching the error handling design — this function never returns `Err`.
pub fn plan_response(root: &Path, method: &[u8], uri: &[u8]) -> Plan {
    let is_get = method == b"GET";
    let is_head = method == b"HEAD";
    if !is_get && !is_head {
        return plain(405);
    }

    let segments = match decode_uri_path(uri) {
        Some(s) => s,
        None => return plain(500),
    };

    let resolved = match resolve_under_root(root, &segments) {
        Ok(r) => r,
        Err(_) => return plain(500),
    };

    let path = match resolved {
        Some(p) => p,
        None => {
            // Distinguish "escapes root" (403) from "doesn't exist" (404) by
            // re-checking the raw, non-canonicalized join against root.
            let mut candidate = root.to_path_buf();
            for segment in &segments {
                if !segment.is_empty() && segment != "." {
                    candidate.push(segment);
                }
            }
            return if path_escapes_lexically(root, &candidate) {
                plain(403)
            } else {
                plain(404)
            };
        }
    };

    let meta = match fs::metadata(&path) {
        Ok(m) => m,
        Err(_) => return plain(404),
    };

    if !meta.is_file() {
        return plain(404);
    }

    let mime = content_type(&path);
    let headers = build_headers(200, Some(meta.len()), mime);
    Plan {
        headers,
        body_path: if is_get { Some(path) } else { None },
    }
}

/// Lexical (no filesystem access) check for `..` segments climbing above
/// `root`, used only to classify a not-yet-existing path as 403 vs 404.
fn path_escapes_lexically(root: &Path, candidate: &Path) -> bool {
    use std::path::Component;
    let mut depth: i64 = 0;
    for component in candidate.strip_prefix(root).unwrap_or(candidate).components() {
        match component {
            Component::ParentDir => depth -= 1,
            Component::Normal(_) => depth += 1,
            _ => {}
        }
        if depth < 0 {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn decodes_percent_and_plus() {
        let segs = decode_uri_path(b"a%20b/c+d").unwrap();
        assert_eq!(segs, vec!["a b".to_string(), "c d".to_string()]);
    }

    #[test]
    fn strips_query_and_fragment() {
        let segs = decode_uri_path(b"foo?x=1#y").unwrap();
        assert_eq!(segs, vec!["foo".to_string()]);
    }

    #[test]
    fn serves_index_html_for_root() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("index.html"), b"Hello").unwrap();
        let root = dir.path().canonicalize().unwrap();

        let plan = plan_response(&root, b"GET", b"/");
        let text = String::from_utf8_lossy(&plan.headers);
        assert!(text.starts_with("HTTP/1.1 200 Ok\r\n"));
        assert!(text.contains("Content-Length: 5\r\n"));
        assert!(text.contains("Content-Type: text/html\r\n"));
        assert_eq!(plan.body_path, Some(root.join("index.html")));
    }

    #[test]
    fn head_never_opens_a_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("img.png"), vec![0u8; 1024]).unwrap();
        let root = dir.path().canonicalize().unwrap();

        let plan = plan_response(&root, b"HEAD", b"/img.png");
        let text = String::from_utf8_lossy(&plan.headers);
        assert!(text.contains("Content-Length: 1024"));
        assert!(text.contains("Content-Type: image/png"));
        assert!(plan.body_path.is_none());
    }

    #[test]
    fn rejects_path_escaping_root() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let plan = plan_response(&root, b"GET", b"/../etc/passwd");
        assert!(String::from_utf8_lossy(&plan.headers).starts_with("HTTP/1.1 403 Forbidden\r\n"));
    }

    #[test]
    fn missing_file_is_404() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let plan = plan_response(&root, b"GET", b"/nope");
        assert!(String::from_utf8_lossy(&plan.headers).starts_with("HTTP/1.1 404 Not Found\r\n"));
    }

    #[test]
    fn unsupported_method_is_405() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let plan = plan_response(&root, b"POST", b"/x");
        assert!(String::from_utf8_lossy(&plan.headers)
            .starts_with("HTTP/1.1 405 Method not allowed\r\n"));
    }
}
