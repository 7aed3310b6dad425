use crate::error::{Error, Result};

/// Validate that an identifier is safe for use in node paths.
///
/// Group names and instance ids are interpolated into paths. Without
/// validation, a name like `../other-group` or `a/b` could address nodes
/// outside the group's subtree.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 128 {
        return Err(Error::InvalidState(
            "identifier must be 1-128 characters".to_string(),
        ));
    }
    if name == "." || name == ".." {
        return Err(Error::InvalidState(format!(
            "identifier {name:?} is reserved"
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(Error::InvalidState(format!(
            "identifier {name:?} contains invalid characters (only alphanumeric, dash, underscore, dot allowed)"
        )));
    }
    Ok(())
}

/// Validate a free-form name used as a single path segment.
///
/// Looser than [`validate_identifier`]: spaces, colons and other printable
/// characters are allowed, only what would change the path structure is not.
pub fn validate_segment(name: &str) -> Result<()> {
    if name.is_empty() || name.chars().count() > 255 {
        return Err(Error::InvalidState(
            "path segment must be 1-255 characters".to_string(),
        ));
    }
    if name == "." || name == ".." {
        return Err(Error::InvalidState(format!(
            "path segment {name:?} is reserved"
        )));
    }
    if name.contains('/') {
        return Err(Error::InvalidState(format!(
            "path segment {name:?} must not contain '/'"
        )));
    }
    Ok(())
}

/// Join path segments with `/`, collapsing duplicate separators at the seams.
pub fn join_path(base: &str, segment: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        segment.trim_start_matches('/')
    )
}

/// If `key` is a direct child of `path`, return the child's name.
pub fn child_name<'a>(path: &str, key: &'a str) -> Option<&'a str> {
    let prefix = format!("{}/", path.trim_end_matches('/'));
    let rest = key.strip_prefix(prefix.as_str())?;
    if rest.is_empty() || rest.contains('/') {
        None
    } else {
        Some(rest)
    }
}

/// Split a comma-separated connection string (`host:port,host:port`) into
/// endpoint URLs, defaulting the scheme to `http://`.
pub fn parse_endpoints(connect: &str) -> Vec<String> {
    connect
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            if s.contains("://") {
                s.to_string()
            } else {
                format!("http://{s}")
            }
        })
        .collect()
}
