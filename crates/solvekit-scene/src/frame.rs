use serde::{Deserialize, Serialize};

/// Tag given to frames created without explicit tags.
pub const TAG_NORMAL: &str = "normal";
/// Tag for frames with the highest solve priority.
pub const TAG_PRIMARY: &str = "primary";
/// Tag for frames with a secondary solve priority.
pub const TAG_SECONDARY: &str = "secondary";

/// A single time sample plus a set of tags.
///
/// Tags decide which solve steps consume the frame, see the frame filtering
/// in `solvekit-compile`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Frame {
    /// The frame number.
    pub number: i32,
    /// Ordered, de-duplicated tag names.
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Frame {
    /// Create a frame with the default `normal` tag.
    pub fn new(number: i32) -> Self {
        Self {
            number,
            tags: vec![TAG_NORMAL.to_string()],
        }
    }

    /// Create a frame with the given tags.
    pub fn with_tags<I, S>(number: i32, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut frame = Self {
            number,
            tags: Vec::new(),
        };
        for tag in tags {
            frame.add_tag(tag);
        }
        frame
    }

    /// Create a frame tagged as primary.
    pub fn primary(number: i32) -> Self {
        Self::with_tags(number, [TAG_PRIMARY])
    }

    /// Add a tag, ignoring tags already present.
    pub fn add_tag(&mut self, tag: impl Into<String>) {
        let tag = tag.into();
        if !self.tags.contains(&tag) {
            self.tags.push(tag);
        }
    }

    /// Returns true if the frame carries the tag.
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

impl From<i32> for Frame {
    fn from(number: i32) -> Self {
        Self::new(number)
    }
}
