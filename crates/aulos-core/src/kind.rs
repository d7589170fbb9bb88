/// The kind of an elementary stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum StreamKind {
    Audio,
    Video,
    Subtitle,
}

impl StreamKind {
    /// All kinds, in a stable order.
    pub const ALL: [StreamKind; 3] = [StreamKind::Audio, StreamKind::Video, StreamKind::Subtitle];

    fn bit(self) -> u8 {
        match self {
            StreamKind::Audio => 1 << 0,
            StreamKind::Video => 1 << 1,
            StreamKind::Subtitle => 1 << 2,
        }
    }
}

/// A small set of [`StreamKind`]s.
///
/// Used wherever an operation names which tracks it affects (flush targets,
/// the active mask of a streaming session, discontinuity scopes).
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct StreamKindSet(u8);

impl StreamKindSet {
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    #[must_use]
    pub fn all() -> Self {
        StreamKind::ALL.iter().copied().collect()
    }

    #[must_use]
    pub fn contains(self, kind: StreamKind) -> bool {
        self.0 & kind.bit() != 0
    }

    pub fn insert(&mut self, kind: StreamKind) {
        self.0 |= kind.bit();
    }

    pub fn remove(&mut self, kind: StreamKind) {
        self.0 &= !kind.bit();
    }

    #[must_use]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub fn with(mut self, kind: StreamKind) -> Self {
        self.insert(kind);
        self
    }

    /// Iterate the contained kinds in stable order.
    pub fn iter(self) -> impl Iterator<Item = StreamKind> {
        StreamKind::ALL.into_iter().filter(move |k| self.contains(*k))
    }

    /// Raw bit representation, for storage in an atomic.
    #[must_use]
    pub fn bits(self) -> u8 {
        self.0
    }

    #[must_use]
    pub fn from_bits(bits: u8) -> Self {
        Self(bits & StreamKindSet::all().0)
    }
}

impl From<StreamKind> for StreamKindSet {
    fn from(kind: StreamKind) -> Self {
        Self(kind.bit())
    }
}

impl FromIterator<StreamKind> for StreamKindSet {
    fn from_iter<T: IntoIterator<Item = StreamKind>>(iter: T) -> Self {
        let mut set = Self::empty();
        for kind in iter {
            set.insert(kind);
        }
        set
    }
}

impl std::fmt::Debug for StreamKindSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_insert_remove() {
        let mut set = StreamKindSet::empty();
        assert!(set.is_empty());

        set.insert(StreamKind::Audio);
        set.insert(StreamKind::Video);
        assert!(set.contains(StreamKind::Audio));
        assert!(set.contains(StreamKind::Video));
        assert!(!set.contains(StreamKind::Subtitle));

        set.remove(StreamKind::Audio);
        assert!(!set.contains(StreamKind::Audio));
        assert!(!set.is_empty());
    }

    #[test]
    fn set_iter_is_stable() {
        let set = StreamKindSet::from(StreamKind::Video).with(StreamKind::Audio);
        let kinds: Vec<_> = set.iter().collect();
        assert_eq!(kinds, vec![StreamKind::Audio, StreamKind::Video]);
    }
}
