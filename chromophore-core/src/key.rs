use std::fmt;

use crate::error::Error;

/// Addresses one member of a composite node.
///
/// Mappings are keyed by name and sequences by index. An index used on a
/// mapping is treated as its decimal name, and a name made only of digits
/// addresses a sequence element.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum Key {
    Name(String),
    Index(usize),
}

impl Key {
    /// Returns the sequence index this key denotes, if any.
    pub fn as_index(&self) -> Option<usize> {
        match self {
            Key::Index(i) => Some(*i),
            Key::Name(name) => parse_index(name),
        }
    }

    /// Returns the mapping name this key denotes.
    pub fn to_name(&self) -> String {
        match self {
            Key::Name(name) => name.clone(),
            Key::Index(i) => i.to_string(),
        }
    }
}

/// Canonical decimal only: "01" and "+1" are names, not indices.
fn parse_index(s: &str) -> Option<usize> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if s.len() > 1 && s.starts_with('0') {
        return None;
    }
    s.parse().ok()
}

impl From<&str> for Key {
    fn from(name: &str) -> Self {
        Key::Name(name.to_string())
    }
}

impl From<String> for Key {
    fn from(name: String) -> Self {
        Key::Name(name)
    }
}

impl From<&String> for Key {
    fn from(name: &String) -> Self {
        Key::Name(name.clone())
    }
}

impl From<usize> for Key {
    fn from(index: usize) -> Self {
        Key::Index(index)
    }
}

impl From<&Key> for Key {
    fn from(key: &Key) -> Self {
        key.clone()
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Name(name) => write!(f, "{:?}", name),
            Key::Index(i) => write!(f, "[{}]", i),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Name(name) => f.write_str(name),
            Key::Index(i) => write!(f, "{}", i),
        }
    }
}

/// Splits a textual path such as `settings.preferences.language` or
/// `userList[0].name` into keys.
///
/// Segments made only of digits become indices. An empty path yields no keys
/// and addresses the node the path is applied to.
pub fn parse_path(path: &str) -> Result<Vec<Key>, Error> {
    let mut keys = Vec::new();
    let path = path.trim();
    if path.is_empty() {
        return Ok(keys);
    }

    for segment in path.split('.') {
        let (name, mut rest) = match segment.find('[') {
            Some(pos) => segment.split_at(pos),
            None => (segment, ""),
        };
        if name.is_empty() && rest.is_empty() {
            return Err(Error::InvalidPath(path.to_string()));
        }
        if !name.is_empty() {
            keys.push(match parse_index(name) {
                Some(i) => Key::Index(i),
                None => Key::Name(name.to_string()),
            });
        }
        while !rest.is_empty() {
            let close = rest
                .find(']')
                .ok_or_else(|| Error::InvalidPath(path.to_string()))?;
            let index = parse_index(&rest[1..close])
                .ok_or_else(|| Error::InvalidPath(path.to_string()))?;
            keys.push(Key::Index(index));
            rest = &rest[close + 1..];
            if !rest.is_empty() && !rest.starts_with('[') {
                return Err(Error::InvalidPath(path.to_string()));
            }
        }
    }

    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_from_name() {
        assert_eq!(Key::from("3").as_index(), Some(3));
        assert_eq!(Key::from("03").as_index(), None);
        assert_eq!(Key::from("name").as_index(), None);
        assert_eq!(Key::from(7).to_name(), "7");
    }

    #[test]
    fn parse_dotted_path() {
        let keys = parse_path("settings.preferences.language").unwrap();
        assert_eq!(
            keys,
            vec![
                Key::from("settings"),
                Key::from("preferences"),
                Key::from("language")
            ]
        );
    }

    #[test]
    fn parse_bracketed_indices() {
        let keys = parse_path("userList[0].name").unwrap();
        assert_eq!(keys, vec![Key::from("userList"), Key::Index(0), Key::from("name")]);

        let keys = parse_path("grid[1][2]").unwrap();
        assert_eq!(keys, vec![Key::from("grid"), Key::Index(1), Key::Index(2)]);

        let keys = parse_path("tags.1").unwrap();
        assert_eq!(keys, vec![Key::from("tags"), Key::Index(1)]);
    }

    #[test]
    fn parse_empty_path() {
        assert!(parse_path("").unwrap().is_empty());
    }

    #[test]
    fn parse_malformed_paths() {
        assert!(parse_path("a..b").is_err());
        assert!(parse_path("tags[x]").is_err());
        assert!(parse_path("tags[1").is_err());
        assert!(parse_path("tags[1]x").is_err());
    }
}
