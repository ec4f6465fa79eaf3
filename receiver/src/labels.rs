//! Conversion of wire label pairs into canonical label sets.

use common::{Label, Labels};

use crate::proto;

impl From<proto::Label> for Label {
    fn from(label: proto::Label) -> Self {
        Label {
            name: label.name,
            value: label.value,
        }
    }
}

impl From<&proto::Label> for Label {
    fn from(label: &proto::Label) -> Self {
        Label::new(label.name.as_str(), label.value.as_str())
    }
}

/// Converts wire labels into the engine's canonical [`Labels`].
///
/// Names and values are kept byte for byte. Pairs are ordered by name, so
/// inputs that differ only in order normalize to equal sets. Duplicate or
/// malformed names pass through untouched for the engine to judge.
pub fn normalize<I>(labels: I) -> Labels
where
    I: IntoIterator,
    I::Item: Into<Label>,
{
    Labels::new(labels.into_iter().map(Into::into).collect())
}
