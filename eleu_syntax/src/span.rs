use std::{fmt::Display, rc::Rc};

/// Locates a lexeme or AST node in a source file.
///
/// Lines and columns are 1-based. The end column points one past the
/// last character of the covered text.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Span {
    pub file: Rc<str>,
    pub line_start: usize,
    pub col_start: usize,
    pub line_end: usize,
    pub col_end: usize,
}

impl Span {
    pub fn new(
        file: Rc<str>,
        line_start: usize,
        col_start: usize,
        line_end: usize,
        col_end: usize,
    ) -> Self {
        Self {
            file,
            line_start,
            col_start,
            line_end,
            col_end,
        }
    }

    pub fn empty() -> Self {
        Self::new(Rc::from(""), 0, 0, 0, 0)
    }

    pub fn is_empty(&self) -> bool {
        self.line_start == 0 && self.line_end == 0
    }

    /// Smallest span covering both `self` and `other`.
    pub fn union(&self, other: &Span) -> Span {
        if self.is_empty() {
            return other.clone();
        }
        if other.is_empty() {
            return self.clone();
        }
        let (line_start, col_start) =
            (self.line_start, self.col_start).min((other.line_start, other.col_start));
        let (line_end, col_end) =
            (self.line_end, self.col_end).max((other.line_end, other.col_end));
        Span::new(self.file.clone(), line_start, col_start, line_end, col_end)
    }

    /// Recovers the span from a diagnostic formatted as
    /// `file(ls,cs,le,ce): message`. Returns `None` for anything else.
    pub fn parse_hint(hint: &str) -> Option<Span> {
        let close = hint.find("): ")?;
        let open = hint[..close].rfind('(')?;
        let numbers = hint[open + 1..close]
            .split(',')
            .map(|n| n.trim().parse::<usize>())
            .collect::<Result<Vec<usize>, _>>()
            .ok()?;
        let [line_start, col_start, line_end, col_end] = numbers[..] else {
            return None;
        };
        Some(Span::new(
            Rc::from(&hint[..open]),
            line_start,
            col_start,
            line_end,
            col_end,
        ))
    }
}

impl Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}({},{},{},{})",
            self.file, self.line_start, self.col_start, self.line_end, self.col_end
        )
    }
}
