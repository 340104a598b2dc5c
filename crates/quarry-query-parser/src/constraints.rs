use smallvec::SmallVec;

/// Constraint tokens extracted from a query. Every variant borrows from the
/// original query string, so parsing never allocates for the common case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint<'a> {
    /// `*.rs` -> Extension("rs")
    Extension(&'a str),

    /// `src/**/*.rs` -> Glob("src/**/*.rs")
    Glob(&'a str),

    /// `/src/` or `src/` -> PathSegment("src")
    PathSegment(&'a str),

    /// `type:rust` -> FileType("rust")
    FileType(&'a str),

    /// `status:modified` -> VcsStatus(Modified)
    VcsStatus(VcsStatusFilter),

    /// Bare text used only inside a negation: `!test` -> Not(Text("test"))
    Text(&'a str),

    /// `!*.rs` -> Not(Extension("rs")) - inverts the inner constraint
    Not(Box<Constraint<'a>>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VcsStatusFilter {
    Modified,
    Untracked,
    Staged,
    Unmodified,
}

/// Stack-allocated buffer for fuzzy text parts.
pub(crate) type TextPartsBuffer<'a> = SmallVec<[&'a str; 16]>;
