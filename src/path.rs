/// Hex element identifiers.
///
/// The component compiler addresses elements with dot-joined hexadecimal
/// segments ("10000000.20000000") instead of raw indices. Segments are spaced
/// `0x10000000` apart, leaving 268M slots between siblings so new elements can
/// be inserted without renumbering existing ids; compiler-emitted template
/// metadata stays valid across edits.
///
/// A `HexPath` is an *author-space* identifier: decoding it yields the
/// VNode-space index path of the element it names.
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{MinimactError, Result};

/// Gap between consecutive sibling ids.
pub const HEX_GAP: u32 = 0x10000000;

/// Stable element id, e.g. "10000000.20000000.30000000".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HexPath(pub String);

impl HexPath {
    /// The root (empty) id.
    pub fn root() -> Self {
        HexPath(String::new())
    }

    /// Build an id from raw segments.
    pub fn from_segments(segments: &[u32]) -> Self {
        if segments.is_empty() {
            return HexPath::root();
        }
        let path = segments
            .iter()
            .map(|seg| format!("{:08x}", seg))
            .collect::<Vec<_>>()
            .join(".");
        HexPath(path)
    }

    /// Append a child index.
    pub fn child(&self, index: usize) -> Self {
        let hex_value = (index as u32 + 1) * HEX_GAP;
        if self.0.is_empty() {
            HexPath(format!("{:08x}", hex_value))
        } else {
            HexPath(format!("{}.{:08x}", self.0, hex_value))
        }
    }

    /// Parent id, or `None` at the root.
    pub fn parent(&self) -> Option<Self> {
        if self.0.is_empty() {
            return None;
        }
        match self.0.rfind('.') {
            Some(last_dot) => Some(HexPath(self.0[..last_dot].to_string())),
            None => Some(HexPath::root()),
        }
    }

    /// True if `self` names an ancestor of `other` (proper prefix).
    pub fn is_ancestor_of(&self, other: &HexPath) -> bool {
        if self.0.is_empty() {
            return !other.0.is_empty();
        }
        other.0.len() > self.0.len()
            && other.0.starts_with(&self.0)
            && other.0.as_bytes()[self.0.len()] == b'.'
    }

    pub fn depth(&self) -> usize {
        if self.0.is_empty() {
            0
        } else {
            self.0.chars().filter(|&c| c == '.').count() + 1
        }
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Raw hex segments.
    pub fn segments(&self) -> Result<Vec<u32>> {
        if self.0.is_empty() {
            return Ok(Vec::new());
        }
        self.0
            .split('.')
            .map(|seg| {
                u32::from_str_radix(seg, 16).map_err(|_| MinimactError::InvalidHexPath(self.0.clone()))
            })
            .collect()
    }

    /// Decode into a VNode-space index path.
    ///
    /// Only compiler-emitted ids (aligned to `HEX_GAP`) decode; hand-inserted
    /// intermediate ids have no index equivalent.
    pub fn to_index_path(&self) -> Result<Vec<usize>> {
        self.segments()?
            .iter()
            .map(|&seg| {
                if seg == 0 || seg % HEX_GAP != 0 {
                    Err(MinimactError::InvalidHexPath(self.0.clone()))
                } else {
                    Ok((seg / HEX_GAP - 1) as usize)
                }
            })
            .collect()
    }
}

impl fmt::Display for HexPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for HexPath {
    fn from(s: &str) -> Self {
        HexPath(s.to_string())
    }
}

impl From<String> for HexPath {
    fn from(s: String) -> Self {
        HexPath(s)
    }
}

/// Encode a VNode-space index path as a compiler-style id.
pub fn index_path_to_hex(indices: &[usize]) -> HexPath {
    HexPath::from_segments(
        &indices
            .iter()
            .map(|&i| (i as u32 + 1) * HEX_GAP)
            .collect::<Vec<_>>(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_and_parent() {
        let root = HexPath::root();
        assert!(root.is_root());
        assert_eq!(root.depth(), 0);

        let child0 = root.child(0);
        assert_eq!(child0.as_str(), "10000000");

        let grandchild = child0.child(1);
        assert_eq!(grandchild.as_str(), "10000000.20000000");

        assert_eq!(grandchild.parent().unwrap(), child0);
        assert_eq!(child0.parent().unwrap(), root);
        assert!(root.parent().is_none());
    }

    #[test]
    fn test_index_round_trip() {
        let indices = vec![0, 1, 2];
        let hex = index_path_to_hex(&indices);
        assert_eq!(hex.as_str(), "10000000.20000000.30000000");
        assert_eq!(hex.to_index_path().unwrap(), indices);
    }

    #[test]
    fn test_unaligned_segment_rejected() {
        // Halfway between two compiler-assigned siblings.
        let inserted = HexPath::from("18000000");
        assert!(inserted.to_index_path().is_err());
        assert!(inserted.segments().is_ok());
    }

    #[test]
    fn test_ancestry() {
        let outer = HexPath::from("10000000");
        let inner = HexPath::from("10000000.30000000.20000000");
        let sibling = HexPath::from("20000000");

        assert!(outer.is_ancestor_of(&inner));
        assert!(!outer.is_ancestor_of(&sibling));
        assert!(!outer.is_ancestor_of(&outer));
        assert!(HexPath::root().is_ancestor_of(&outer));
        // "1000000f" shares the string prefix but is not a path ancestor.
        assert!(!outer.is_ancestor_of(&HexPath::from("1000000f")));
    }
}
