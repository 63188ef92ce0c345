//! Reduction of a diff list to a relationship verdict

use crate::compare::{ChangeKind, DiffItem};

/// Exit code for fatal errors
pub const EXIT_ERROR: i32 = 2;
/// Exit code after Ctrl-C (128 + SIGINT)
pub const EXIT_INTERRUPTED: i32 = 130;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Identical,
    Divergent,
    /// Everything in A is also in B, and B has more
    ASubsetOfB,
    BSubsetOfA,
}

impl Verdict {
    pub fn exit_code(self) -> i32 {
        match self {
            Verdict::Identical => 0,
            Verdict::Divergent => 1,
            Verdict::ASubsetOfB => 3,
            Verdict::BSubsetOfA => 4,
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            Verdict::Identical => "Directories are identical.",
            Verdict::Divergent => "Directories are divergent.",
            Verdict::ASubsetOfB => "Directory A is a subset of directory B.",
            Verdict::BSubsetOfA => "Directory B is a subset of directory A.",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    pub modified_files: usize,
    pub added_files: usize,
    pub removed_files: usize,
    pub added_dirs: usize,
    pub removed_dirs: usize,
}

impl Summary {
    pub fn from_items(items: &[DiffItem]) -> Self {
        let mut s = Summary::default();
        for item in items {
            match (item.kind, item.is_dir) {
                (ChangeKind::Modified, _) => s.modified_files += 1,
                (ChangeKind::Added, false) => s.added_files += 1,
                (ChangeKind::Added, true) => s.added_dirs += 1,
                (ChangeKind::Removed, false) => s.removed_files += 1,
                (ChangeKind::Removed, true) => s.removed_dirs += 1,
            }
        }
        s
    }

    pub fn has_added(&self) -> bool {
        self.added_files + self.added_dirs > 0
    }

    pub fn has_removed(&self) -> bool {
        self.removed_files + self.removed_dirs > 0
    }

    pub fn verdict(&self) -> Verdict {
        match (self.modified_files > 0, self.has_added(), self.has_removed()) {
            (false, false, false) => Verdict::Identical,
            (true, _, _) | (false, true, true) => Verdict::Divergent,
            (false, true, false) => Verdict::ASubsetOfB,
            (false, false, true) => Verdict::BSubsetOfA,
        }
    }
}

pub fn classify(items: &[DiffItem]) -> Verdict {
    Summary::from_items(items).verdict()
}
