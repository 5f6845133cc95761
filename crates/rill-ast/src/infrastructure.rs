//! Span, node identity, and the `Spanned` wrapper

/// Source location for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn merge(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

/// Identity of an AST node, assigned by the front end.
///
/// The type checker's type table is keyed on this. Nodes synthesized after
/// type checking (e.g. during lowering) carry [`NodeId::SYNTH`] and are not
/// required to appear in the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl NodeId {
    /// Marker id for nodes created after type checking.
    pub const SYNTH: NodeId = NodeId(u32::MAX);
}

/// Monotonic [`NodeId`] source, one per translation unit.
#[derive(Debug, Default)]
pub struct IdGen {
    next: u32,
}

impl IdGen {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&mut self) -> NodeId {
        let id = NodeId(self.next);
        self.next += 1;
        id
    }
}

/// AST node with span and identity
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned<T> {
    pub node: T,
    pub span: Span,
    pub id: NodeId,
}

impl<T> Spanned<T> {
    pub fn new(node: T, span: Span, id: NodeId) -> Self {
        Self { node, span, id }
    }

    /// Wrap a node synthesized during lowering (dummy span, no table entry).
    pub fn synth(node: T) -> Self {
        Self {
            node,
            span: Span::default(),
            id: NodeId::SYNTH,
        }
    }
}
