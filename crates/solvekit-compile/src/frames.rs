use serde::{Deserialize, Serialize};
use solvekit_scene::{frame, Frame};

use crate::SolverError;

/// Tags a solve step uses frames with by default.
pub const DEFAULT_FRAME_USE_TAGS: [&str; 3] =
    [frame::TAG_PRIMARY, frame::TAG_SECONDARY, frame::TAG_NORMAL];

/// An ordered list of frames with unique frame numbers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Frame>", into = "Vec<Frame>")]
pub struct FrameList {
    frames: Vec<Frame>,
}

impl FrameList {
    /// Create an empty frame list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a frame list from frame numbers, tagged `normal`.
    pub fn from_numbers(numbers: impl IntoIterator<Item = i32>) -> Result<Self, SolverError> {
        let mut list = Self::new();
        for number in numbers {
            list.add(Frame::new(number))?;
        }
        Ok(list)
    }

    /// Append a frame.
    ///
    /// Fails with [`SolverError::NotValid`] if the frame number is already
    /// in the list.
    pub fn add(&mut self, frame: Frame) -> Result<(), SolverError> {
        if self.contains(frame.number) {
            return Err(SolverError::NotValid(format!(
                "Frame already added, cannot add again: {}",
                frame.number
            )));
        }
        self.frames.push(frame);
        Ok(())
    }

    /// Append several frames, stopping at the first duplicate.
    pub fn extend(&mut self, frames: impl IntoIterator<Item = Frame>) -> Result<(), SolverError> {
        frames.into_iter().try_for_each(|f| self.add(f))
    }

    /// Remove the frame with the given number, if present.
    pub fn remove(&mut self, number: i32) {
        self.frames.retain(|f| f.number != number);
    }

    /// Replace the whole list.
    pub fn set(&mut self, frames: impl IntoIterator<Item = Frame>) -> Result<(), SolverError> {
        self.clear();
        self.extend(frames)
    }

    /// Remove all frames.
    pub fn clear(&mut self) {
        self.frames.clear();
    }

    /// Returns true if a frame with the number is present.
    pub fn contains(&self, number: i32) -> bool {
        self.frames.iter().any(|f| f.number == number)
    }

    /// Number of frames.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Returns true if there are no frames.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Frames in insertion order.
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Frame numbers in insertion order.
    pub fn numbers(&self) -> Vec<i32> {
        self.frames.iter().map(|f| f.number).collect()
    }

    /// Iterate over the frames.
    pub fn iter(&self) -> std::slice::Iter<'_, Frame> {
        self.frames.iter()
    }
}

impl TryFrom<Vec<Frame>> for FrameList {
    type Error = SolverError;

    fn try_from(frames: Vec<Frame>) -> Result<Self, Self::Error> {
        let mut list = Self::new();
        list.extend(frames)?;
        Ok(list)
    }
}

impl From<FrameList> for Vec<Frame> {
    fn from(list: FrameList) -> Self {
        list.frames
    }
}

impl<'a> IntoIterator for &'a FrameList {
    type Item = &'a Frame;
    type IntoIter = std::slice::Iter<'a, Frame>;

    fn into_iter(self) -> Self::IntoIter {
        self.frames.iter()
    }
}

/// Frame numbers of the frames a step uses.
///
/// A frame is used when it has no tags, when `use_tags` is empty, or when
/// its tags and `use_tags` share a tag.
pub fn filter_by_tags(frames: &[Frame], use_tags: &[String]) -> Vec<i32> {
    frames
        .iter()
        .filter(|f| {
            use_tags.is_empty() || f.tags.is_empty() || use_tags.iter().any(|t| f.has_tag(t))
        })
        .map(|f| f.number)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_frame_rejected() -> Result<(), SolverError> {
        let mut list = FrameList::from_numbers([1, 5, 3])?;
        assert_eq!(list.numbers(), vec![1, 5, 3]);
        assert!(matches!(list.add(Frame::new(5)), Err(SolverError::NotValid(_))));
        assert_eq!(list.len(), 3);

        list.remove(5);
        list.remove(42);
        assert_eq!(list.numbers(), vec![1, 3]);

        list.set([Frame::new(7)])?;
        assert_eq!(list.numbers(), vec![7]);
        list.clear();
        assert!(list.is_empty());
        Ok(())
    }

    #[test]
    fn test_deserialize_rejects_duplicates() {
        let text = r#"[{"number": 1}, {"number": 1}]"#;
        assert!(serde_json::from_str::<FrameList>(text).is_err());
        let text = r#"[{"number": 1, "tags": ["primary"]}, {"number": 2}]"#;
        let list: Result<FrameList, _> = serde_json::from_str(text);
        assert!(matches!(list, Ok(l) if l.numbers() == vec![1, 2]));
    }

    #[test]
    fn test_filter_by_tags() {
        let frames = vec![
            Frame::with_tags(1, ["primary"]),
            Frame::with_tags(2, ["secondary"]),
            Frame::with_tags(3, Vec::<String>::new()),
        ];
        let use_tags = vec!["primary".to_string()];
        assert_eq!(filter_by_tags(&frames, &use_tags), vec![1, 3]);
        assert_eq!(filter_by_tags(&frames, &[]), vec![1, 2, 3]);
    }
}
