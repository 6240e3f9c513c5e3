use crate::ScriptError;
use std::fs::File;
use std::io::Read;
use std::path::{MAIN_SEPARATOR, Path, PathBuf};

// make_script_filename()
// Scripts refer to other scripts either with an absolute path, relative to the directory of the
// referring script, or relative to the working directory.
pub(crate) fn make_script_filename(name: &str, base_filename: &Path) -> PathBuf {
    // both separators are accepted in scripts, whatever the platform
    let script_path: PathBuf = name
        .trim()
        .chars()
        .map(|c| if c == '/' || c == '\\' { MAIN_SEPARATOR } else { c })
        .collect::<String>()
        .into();

    if script_path.is_absolute() {
        return script_path;
    }
    match base_filename.parent().map(|basedir| basedir.join(&script_path)) {
        Some(beside_base) if beside_base.exists() => beside_base,
        _ => script_path,
    }
}

/// Load a script file and return its text with `\r` and `^Z` characters removed.
pub(crate) fn load(path: &Path) -> Result<Vec<u8>, ScriptError> {
    let mut file = File::open(path).map_err(|ioerror| ScriptError::FileOpenError {
        filename: path.to_path_buf(),
        ioerror,
    })?;
    let mut raw = Vec::new();
    file.read_to_end(&mut raw)
        .map_err(|ioerror| ScriptError::FileReadError {
            filename: path.to_path_buf(),
            ioerror,
        })?;

    let text = decode_raw_bytes(&raw);
    Ok(normalize(text.strip_prefix('\u{feff}').unwrap_or(&text)))
}

// normalize()
// Line ends are reduced to '\n' and the DOS end-of-file marker is dropped
pub(crate) fn normalize(text: &str) -> Vec<u8> {
    text.bytes().filter(|c| *c != b'\r' && *c != 0x1a).collect()
}

// utf16_order()
// Editors on windows like to store scripts as UTF-16. The BOM, or without it the position of the
// nul byte in the first character, gives the byte order.
fn utf16_order(raw: &[u8]) -> Option<fn([u8; 2]) -> u16> {
    if raw.len() < 2 || raw.len() % 2 != 0 {
        return None;
    }
    match (raw[0], raw[1]) {
        (0xfe, 0xff) => Some(u16::from_be_bytes),
        (0xff, 0xfe) => Some(u16::from_le_bytes),
        (0, second) if second != 0 => Some(u16::from_be_bytes),
        (first, 0) if first != 0 => Some(u16::from_le_bytes),
        _ => None,
    }
}

fn decode_raw_bytes(raw: &[u8]) -> String {
    if let Some(order) = utf16_order(raw) {
        let units: Vec<u16> = raw
            .chunks_exact(2)
            .map(|pair| order([pair[0], pair[1]]))
            .collect();
        if let Ok(text) = String::from_utf16(&units) {
            return text;
        }
    }
    match std::str::from_utf8(raw) {
        Ok(text) => text.to_string(),
        // Latin-1 maps every byte to the code point of the same value
        Err(_) => raw.iter().map(|c| char::from(*c)).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn load_nonexistent_file() {
        let result = load(Path::new("file/does/not/exist.xil"));
        assert!(matches!(result, Err(ScriptError::FileOpenError { .. })));
    }

    #[test]
    fn load_strips_carriage_returns() {
        let dir = tempdir().unwrap();
        let filename = dir.path().join("crlf.xil");
        let mut file = std::fs::File::create_new(&filename).unwrap();
        file.write_all(b"\xef\xbb\xbfMESSAGE(a)\r\nMESSAGE(b)\r\n\x1a").unwrap();

        let data = load(&filename).unwrap();
        assert_eq!(data, b"MESSAGE(a)\nMESSAGE(b)\n");
    }

    #[test]
    fn decode_utf16() {
        // little endian, with BOM
        let data: Vec<u8> = vec![0xff, 0xfe, 65, 0, 66, 0];
        assert_eq!(decode_raw_bytes(&data), String::from("\u{feff}AB"));
        // big endian
        let data: Vec<u8> = vec![0, 65, 0, 66];
        assert_eq!(decode_raw_bytes(&data), String::from("AB"));
    }

    #[test]
    fn decode_latin1() {
        let data: Vec<u8> = vec![0x41, 0xa9];
        assert_eq!(decode_raw_bytes(&data), String::from("A\u{00a9}"));
    }

    #[test]
    fn relative_script_names() {
        let dir = tempdir().unwrap();

        let base_filename = dir.path().join("main.xil");
        std::fs::File::create_new(&base_filename).unwrap();
        let subdir = dir.path().join("sub");
        std::fs::create_dir(&subdir).unwrap();
        std::fs::File::create_new(subdir.join("called.xil")).unwrap();

        let out = make_script_filename("sub/called.xil", &base_filename);
        let expected = subdir.join("called.xil").canonicalize().unwrap();
        assert_eq!(out.canonicalize().unwrap(), expected);

        // a file that does not exist next to the base is left relative to the working directory
        let out = make_script_filename("missing.xil", &base_filename);
        assert_eq!(out, PathBuf::from("missing.xil"));
    }
}
