//! The read-only parsed-program view the core consumes (spec.md §6, C1).
//!
//! This module is the only place the core commits to a concrete shape for
//! "the AST a parser produced" — the parser/lexer/AST-database themselves
//! are out of scope (spec.md §1). Everything downstream (extractor, CID
//! generators) is written against the `Snapshot` trait, not a concrete type,
//! so a real parser's snapshot can implement it without touching this crate.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

macro_rules! newtype_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub u32);
    };
}

newtype_id!(NodeId);
newtype_id!(DeclId);
newtype_id!(TokenId);
newtype_id!(StrId);

/// Byte-offset span into the source file a node came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: u32,
    pub end: u32,
}

/// Coarse node classification. The extractor (C2) only ever branches on
/// these variants; everything else about a node's shape lives on its `Decl`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Root,
    Module,
    Function,
    Struct,
    Enum,
    TypeAlias,
    Const,
    StructField,
    EnumVariant,
    /// Function/method body, `let`, `if`, loops, etc. Never part of the
    /// interface; always hashed by the semantic CID generator.
    Statement,
    /// Sub-expressions, call arguments, literals embedded in expressions.
    Expression,
    /// Bare literal nodes (numbers, strings, bools) outside of a constant's
    /// declared value.
    Literal,
    /// Anything the extractor doesn't recognize. Recursed into defensively
    /// per spec.md §4.2, never itself treated as an interface element.
    Unknown,
}

impl NodeKind {
    /// Container kinds the extractor recurses into looking for more
    /// declarations, vs. leaf statement/expression/literal kinds it skips
    /// without recursing (those never contain further declarations).
    pub fn is_container(&self) -> bool {
        !matches!(self, NodeKind::Statement | NodeKind::Expression | NodeKind::Literal)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Public,
    Private,
}

/// A type reference as it appears in a signature. The core does not type
/// check — a canonical textual/structural rendering (interned) is all CID
/// generation and interface comparison need.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeSig(pub StrId);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: StrId,
    pub type_sig: TypeSig,
    pub optional: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeParam {
    pub name: StrId,
    pub bounds: Vec<StrId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionDecl {
    pub name: StrId,
    pub visibility: Visibility,
    pub type_params: Vec<TypeParam>,
    pub params: Vec<Param>,
    pub return_type: Option<TypeSig>,
    /// Inline functions are interface per spec.md §4.2 edge cases.
    pub is_inline: bool,
    pub exported: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeDeclKind {
    Struct,
    Enum,
    Alias,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDecl {
    pub name: StrId,
    pub visibility: Visibility,
    pub kind: TypeDeclKind,
    pub type_params: Vec<TypeParam>,
    /// For an alias, the aliased type; `None` for struct/enum.
    pub aliased: Option<TypeSig>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstantDecl {
    pub name: StrId,
    pub visibility: Visibility,
    pub type_sig: TypeSig,
    /// True when the literal value is itself part of the contract (e.g. an
    /// array-length constant used in a type position). The extractor only
    /// reads `value` when this is set.
    pub participates_in_inference: bool,
    pub value: Option<StrId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleDecl {
    pub name: StrId,
    pub exported_symbols: Vec<StrId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDecl {
    pub name: StrId,
    pub visibility: Visibility,
    pub type_sig: TypeSig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantDecl {
    pub name: StrId,
    pub associated_type: Option<TypeSig>,
}

/// Everything the snapshot can attach to a declaration-bearing node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decl {
    Function(FunctionDecl),
    Type(TypeDecl),
    Constant(ConstantDecl),
    Module(ModuleDecl),
    StructField(FieldDecl),
    EnumVariant(VariantDecl),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    /// Present iff `kind` is one of the declaration-bearing kinds.
    pub decl: Option<DeclId>,
    /// Present on leaf nodes (statements/expressions/literals) that carry
    /// their own token text — the semantic CID generator's handle on
    /// "textual or tokenized representation" for body content.
    pub token: Option<TokenId>,
    pub children: Vec<NodeId>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub id: TokenId,
    pub text: StrId,
    pub span: Span,
}

/// Read-only view of a parsed program, per spec.md §6's consumed interface.
pub trait Snapshot {
    fn get_node(&self, id: NodeId) -> Option<Node>;
    fn get_decl(&self, id: DeclId) -> Option<Decl>;
    fn get_token(&self, id: TokenId) -> Option<Token>;
    /// `node.children(snapshot)` — resolved here rather than on `Node` itself
    /// since `Node` is a plain data snapshot, not a handle back into the
    /// owning store.
    fn children(&self, id: NodeId) -> Vec<NodeId>;
    fn decl_count(&self) -> u32;
    fn intern(&self, s: &str) -> StrId;
    fn resolve(&self, id: StrId) -> Option<&str>;
}

/// In-memory `Snapshot` used by this crate's own tests and anyone exercising
/// C2–C8 without a real parser. Not part of the production surface.
#[derive(Debug, Default)]
pub struct MockSnapshot {
    nodes: HashMap<NodeId, Node>,
    decls: HashMap<DeclId, Decl>,
    tokens: HashMap<TokenId, Token>,
    strings: Vec<String>,
    string_ids: HashMap<String, StrId>,
}

impl MockSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: Node) {
        self.nodes.insert(node.id, node);
    }

    pub fn add_decl(&mut self, id: DeclId, decl: Decl) {
        self.decls.insert(id, decl);
    }

    pub fn add_token(&mut self, token: Token) {
        self.tokens.insert(token.id, token);
    }
}

impl Snapshot for MockSnapshot {
    fn get_node(&self, id: NodeId) -> Option<Node> {
        self.nodes.get(&id).cloned()
    }

    fn get_decl(&self, id: DeclId) -> Option<Decl> {
        self.decls.get(&id).cloned()
    }

    fn get_token(&self, id: TokenId) -> Option<Token> {
        self.tokens.get(&id).cloned()
    }

    fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.nodes
            .get(&id)
            .map(|n| n.children.clone())
            .unwrap_or_default()
    }

    fn decl_count(&self) -> u32 {
        self.decls.len() as u32
    }

    fn intern(&self, s: &str) -> StrId {
        // `Snapshot::intern` is conceptually mutable (it grows the
        // interner); `MockSnapshot` is the test double, not production code,
        // so interior mutability via a cell would be overkill here. Callers
        // building a `MockSnapshot` intern everything up front with
        // `intern_mut` and then treat the snapshot as read-only, matching
        // how a real parser's interner is populated during parsing and
        // frozen by the time the core sees it.
        *self
            .string_ids
            .get(s)
            .unwrap_or_else(|| panic!("string {s:?} was never interned into this MockSnapshot"))
    }

    fn resolve(&self, id: StrId) -> Option<&str> {
        self.strings.get(id.0 as usize).map(|s| s.as_str())
    }
}

impl MockSnapshot {
    /// Intern a string ahead of time (see note on `intern` above).
    pub fn intern_mut(&mut self, s: &str) -> StrId {
        if let Some(&id) = self.string_ids.get(s) {
            return id;
        }
        let id = StrId(self.strings.len() as u32);
        self.strings.push(s.to_string());
        self.string_ids.insert(s.to_string(), id);
        id
    }
}
