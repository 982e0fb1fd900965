use std::fs;
use std::path::Path;

use regex::{Captures, Regex};
use tracing::debug;

use super::ConfigError;

/// Read a configuration file, strip a UTF-8 BOM and fall back to GBK
/// decoding for files that are not valid UTF-8.
pub fn load_text_file_with_guess_encoding(path: &Path) -> Result<String, ConfigError> {
    let mut bytes = fs::read(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    if bytes.starts_with(&[0xEF, 0xBB, 0xBF]) {
        bytes.drain(0..3);
    }

    match String::from_utf8(bytes) {
        Ok(content) => Ok(content),
        Err(err) => {
            debug!("{} is not valid UTF-8, decoding as GBK", path.display());
            let (cow, _, _) = encoding_rs::GBK.decode(err.as_bytes());
            Ok(cow.into_owned())
        }
    }
}

/// Replace `${VAR_NAME}` placeholders with environment values.
/// Unset variables are left as-is.
pub fn substitute_env_vars(content: &str) -> String {
    substitute_with(content, |name| std::env::var(name).ok())
}

pub(crate) fn substitute_with<F>(content: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let pattern = Regex::new(r"\$\{(\w+)\}").expect("placeholder pattern is valid");
    pattern
        .replace_all(content, |caps: &Captures| {
            lookup(&caps[1]).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// True when a value still carries an unresolved `${...}` placeholder.
pub fn has_placeholder(value: &str) -> bool {
    value.contains("${")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn substitutes_known_variables_and_keeps_unknown() {
        let out = substitute_with("a=${ONE} b=${MISSING}", |name| {
            (name == "ONE").then(|| "1".to_string())
        });
        assert_eq!(out, "a=1 b=${MISSING}");
        assert!(has_placeholder(&out));
    }

    #[test]
    fn strips_utf8_bom() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[0xEF, 0xBB, 0xBF]).unwrap();
        file.write_all(b"server: {}").unwrap();

        let content = load_text_file_with_guess_encoding(file.path()).unwrap();
        assert_eq!(content, "server: {}");
    }

    #[test]
    fn falls_back_to_gbk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        // "中文" in GBK
        file.write_all(&[0xD6, 0xD0, 0xCE, 0xC4]).unwrap();

        let content = load_text_file_with_guess_encoding(file.path()).unwrap();
        assert_eq!(content, "中文");
    }
}
