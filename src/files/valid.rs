//! File list validation by extension.

/// Files split into those whose type is accepted and those that aren't.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidatedFiles {
  pub valid: Vec<String>,
  pub invalid: Vec<String>,
}

/// Lower-cased text after the last `.`, or the whole path when there is none.
pub fn file_format(path: &str) -> String {
  let ext = match path.rfind('.') {
    Some(idx) => &path[idx + 1..],
    None => path,
  };
  ext.to_lowercase()
}

/// Whether the format of `path` contains any of `types`.
pub fn is_valid_file_type(path: &str, types: &[&str]) -> bool {
  let format = file_format(path);
  types.iter().any(|t| format.contains(t))
}

/// A `|`-separated list with no empty item. A single name is always valid.
pub fn is_valid_file_list(files: &str) -> bool {
  if files.is_empty() {
    return false;
  }

  !files.contains('|') || files.split('|').all(|item| !item.is_empty())
}

pub fn validate_files(files: &str, types: &[&str]) -> ValidatedFiles {
  if !is_valid_file_list(files) {
    return ValidatedFiles::default();
  }

  let (valid, invalid): (Vec<String>, Vec<String>) = files
    .split('|')
    .map(String::from)
    .partition(|file| types.is_empty() || is_valid_file_type(file, types));

  ValidatedFiles { valid, invalid }
}
