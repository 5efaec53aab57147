//! Field layouts: ordered dimension tags plus extents.

use crate::atm_error::AtmError;
use itertools::Itertools;
use std::fmt;

/// Tag describing what a layout dimension indexes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub enum FieldTag {
    /// Horizontal column (the partitioned dimension).
    Column,
    /// Vector component.
    Component,
    /// Vertical level midpoint.
    Level,
    /// Vertical level interface.
    InterfaceLevel,
}

impl fmt::Display for FieldTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FieldTag::Column => "COL",
            FieldTag::Component => "CMP",
            FieldTag::Level => "LEV",
            FieldTag::InterfaceLevel => "ILEV",
        };
        f.write_str(s)
    }
}

/// Coarse classification of a layout's tag shape.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LayoutType {
    Invalid,
    Scalar2D,
    Vector2D,
    Scalar3D,
    Vector3D,
}

/// Classify an ordered tag list.
pub fn get_layout_type(tags: &[FieldTag]) -> LayoutType {
    use FieldTag::*;
    match tags {
        [Column] => LayoutType::Scalar2D,
        [Column, Component] => LayoutType::Vector2D,
        [Column, Level] | [Column, InterfaceLevel] => LayoutType::Scalar3D,
        [Column, Component, Level] | [Column, Component, InterfaceLevel] => LayoutType::Vector3D,
        _ => LayoutType::Invalid,
    }
}

/// Ordered list of `(tag, extent)` pairs, stored row-major.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldLayout {
    tags: Vec<FieldTag>,
    dims: Vec<usize>,
}

impl FieldLayout {
    /// # Errors
    /// Returns `Err(InvalidLayout)` if `tags` and `dims` differ in length.
    pub fn new(tags: Vec<FieldTag>, dims: Vec<usize>) -> Result<Self, AtmError> {
        if tags.len() != dims.len() {
            return Err(AtmError::InvalidLayout(format!(
                "{} tags but {} dims",
                tags.len(),
                dims.len()
            )));
        }
        Ok(Self { tags, dims })
    }

    /// Internal constructor for callers that build tags and dims together.
    pub(crate) fn from_parts(tags: Vec<FieldTag>, dims: Vec<usize>) -> Self {
        debug_assert_eq!(tags.len(), dims.len());
        Self { tags, dims }
    }

    pub fn tags(&self) -> &[FieldTag] {
        &self.tags
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn dim(&self, i: usize) -> usize {
        self.dims[i]
    }

    pub fn size(&self) -> usize {
        self.dims.iter().product()
    }

    /// Number of values per entry of the leading dimension.
    pub fn column_size(&self) -> usize {
        self.dims.iter().skip(1).product()
    }

    pub fn layout_type(&self) -> LayoutType {
        get_layout_type(&self.tags)
    }

    pub fn has_tag(&self, tag: FieldTag) -> bool {
        self.tags.contains(&tag)
    }

    pub fn is_vector_layout(&self) -> bool {
        self.has_tag(FieldTag::Component)
    }

    /// Position of the vector (component) dimension, if any.
    pub fn vector_dim(&self) -> Option<usize> {
        self.tags.iter().position(|t| *t == FieldTag::Component)
    }

    /// Copy of this layout with dimension `i` resized to `n`.
    pub fn with_dim(&self, i: usize, n: usize) -> Self {
        let mut out = self.clone();
        out.dims[i] = n;
        out
    }

    /// Copy of this layout with dimension `i` removed.
    pub fn strip_dim(&self, i: usize) -> Self {
        let mut out = self.clone();
        out.tags.remove(i);
        out.dims.remove(i);
        out
    }

    /// Copy of this layout with a new dimension inserted at `pos`.
    pub fn insert_dim(&self, pos: usize, tag: FieldTag, n: usize) -> Self {
        let mut out = self.clone();
        out.tags.insert(pos, tag);
        out.dims.insert(pos, n);
        out
    }
}

impl fmt::Display for FieldLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<{}>({})",
            self.tags.iter().join(","),
            self.dims.iter().join(",")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use FieldTag::*;

    #[test]
    fn classify_tag_shapes() {
        assert_eq!(get_layout_type(&[Column]), LayoutType::Scalar2D);
        assert_eq!(get_layout_type(&[Column, Component]), LayoutType::Vector2D);
        assert_eq!(get_layout_type(&[Column, InterfaceLevel]), LayoutType::Scalar3D);
        assert_eq!(get_layout_type(&[Column, Component, Level]), LayoutType::Vector3D);
        assert_eq!(get_layout_type(&[Level, Column]), LayoutType::Invalid);
    }

    #[test]
    fn mismatched_tags_and_dims_fail() {
        assert!(FieldLayout::new(vec![Column, Level], vec![3]).is_err());
    }

    #[test]
    fn display_and_sizes() {
        let l = FieldLayout::new(vec![Column, Component, Level], vec![4, 3, 2]).unwrap();
        assert_eq!(l.to_string(), "<COL,CMP,LEV>(4,3,2)");
        assert_eq!(l.size(), 24);
        assert_eq!(l.column_size(), 6);
        assert_eq!(l.vector_dim(), Some(1));
        assert_eq!(l.strip_dim(1).dims(), &[4, 2]);
        assert_eq!(l.with_dim(0, 1).size(), 6);
    }
}
