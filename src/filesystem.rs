//! Helpers for filesystem manipulations

use crate::errors::{Result, Error};

use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

/// Normalizes a path.
///
/// The following operations are performed:
///
/// 1. Sequences of multiple `'/'` characters are collapsed into a single `'/'`.
/// 2. Any leading `'/'` is stripped. (If the request path doesn’t lead with a
///    slash, the path is ill-formed for our purposes and we return an `Err`).
/// 3. Percent-encoded bytes are decoded. Bogus percent-encoding, like `b"%bo"`,
///    will return `Err`.
/// 4. `.` segments are dropped, and a `..` segment anywhere is refused with
///    `Error::PathTraversal`; this runs after decoding, so `%2e%2e` is caught
///    too.
pub fn normalize_path(path: &[u8]) -> Result<Vec<u8>> {
    // Check for a leading `'/'`
    if path.first() != Some(&b'/') {
        return Err(Error::PathNotInOriginForm);
    }

    let mut decoded = Vec::with_capacity(path.len());
    let mut i = 1;

    while i < path.len() {
        match path[i] {
            b'%' => {
                if i + 2 >= path.len() {
                    return Err(Error::IllegalPercentEncoding);
                }

                let high_nybble = path[i + 1];
                let low_nybble = path[i + 2];

                if !is_hexit(high_nybble) || !is_hexit(low_nybble) {
                    return Err(Error::IllegalPercentEncoding);
                }

                decoded.push(from_hexit(high_nybble) << 4 |
                             from_hexit(low_nybble));

                i += 3;
            },
            b => {
                decoded.push(b);
                i += 1;
            }
        }
    }

    let mut buffer = Vec::with_capacity(decoded.len());
    for segment in decoded.split(|&b| b == b'/') {
        match segment {
            b"" | b"." => continue,
            b".." => return Err(Error::PathTraversal),
            _ => ()
        }

        if !buffer.is_empty() {
            buffer.push(b'/');
        }
        buffer.extend_from_slice(segment);
    }

    if decoded.last() == Some(&b'/') && !buffer.is_empty() {
        buffer.push(b'/');
    }

    Ok(buffer)
}

/// Joins a normalized relative path onto `root`.
pub fn resolve_under(root: &Path, relative: &[u8]) -> PathBuf {
    let relative = relative.strip_suffix(b"/").unwrap_or(relative);
    if relative.is_empty() {
        return root.to_path_buf();
    }
    root.join(OsStr::from_bytes(relative))
}

/// True if `candidate`, once symlinks are resolved, still lives inside
/// `root`. Paths that don't exist yet are judged by their parent directory.
pub fn is_contained(root: &Path, candidate: &Path) -> bool {
    let root = match root.canonicalize() {
        Ok(r) => r,
        Err(_) => return false
    };

    let probe = if candidate.exists() {
        candidate.canonicalize()
    } else {
        match candidate.parent() {
            Some(parent) => parent.canonicalize(),
            None => return false
        }
    };

    match probe {
        Ok(p) => p.starts_with(&root),
        Err(_) => false
    }
}

/// A fresh, empty directory for a test to play in
#[cfg(test)]
pub fn scratch_dir(tag: &str) -> PathBuf {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::{env, fs, process};

    static COUNTER: AtomicUsize = AtomicUsize::new(0);

    let dir = env::temp_dir().join(format!("webserv-{}-{}-{}", tag, process::id(),
                                           COUNTER.fetch_add(1, Ordering::SeqCst)));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}


/// Returns `true` iff the byte is a hexadecimal digit according to ASCII
fn is_hexit(x: u8) -> bool {
    x.is_ascii_hexdigit()
}

/// Converts from a hexadecimal digit to its value
fn from_hexit(x: u8) -> u8 {
    match x {
        b'0' ..= b'9' => x - b'0',
        b'A' ..= b'F' => x - b'A' + 10,
        b'a' ..= b'f' => x - b'a' + 10,
        _ => 0
    }
}

#[test]
fn from_hexit_works() {
    use std::char;

    for x in 0x0 .. 0x10 {
        assert_eq!(from_hexit(char::from_digit(x, 16).unwrap() as u8), x as u8);
    }
}
