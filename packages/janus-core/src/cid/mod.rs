//! CID generation (spec.md §4.3, C3).
//!
//! Both generators stream canonically-ordered data into a BLAKE3 hasher and
//! finalize to 32 bytes.

use byteorder::{LittleEndian, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::interface::{InterfaceElement, SignatureKind};
use crate::snapshot::{Node, NodeId, Snapshot, TypeParam, TypeSig};

/// A 256-bit BLAKE3 digest. Equality is byte-equality; ordering is
/// lexicographic byte order (spec.md §3), which `[u8; 32]`'s derived `Ord`
/// already gives for free.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Cid([u8; 32]);

impl Cid {
    pub fn from_hash(hash: blake3::Hash) -> Self {
        Cid(*hash.as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        let mut s = String::with_capacity(64);
        for byte in &self.0 {
            s.push_str(&format!("{byte:02x}"));
        }
        s
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != 64 {
            return None;
        }
        let mut out = [0u8; 32];
        for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
            let hex = std::str::from_utf8(chunk).ok()?;
            out[i] = u8::from_str_radix(hex, 16).ok()?;
        }
        Some(Cid(out))
    }
}

impl fmt::Debug for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cid({})", self.to_hex())
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for Cid {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Cid {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Cid::from_hex(&s).ok_or_else(|| serde::de::Error::custom("invalid 64-char hex CID"))
    }
}

macro_rules! cid_newtype {
    ($name:ident) => {
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub Cid);

        impl $name {
            pub fn to_hex(&self) -> String {
                self.0.to_hex()
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0.to_hex())
            }
        }
    };
}

cid_newtype!(InterfaceCid);
cid_newtype!(SemanticCid);
cid_newtype!(DependencyCid);

/// The BLAKE3 of the empty stream — the interface/semantic CID of a unit
/// with zero interface elements / zero content (spec.md §8 boundary case).
pub fn empty_cid() -> Cid {
    Cid::from_hash(blake3::Hasher::new().finalize())
}

fn write_len_prefixed(hasher: &mut blake3::Hasher, bytes: &[u8]) {
    let mut len_buf = Vec::with_capacity(4);
    len_buf.write_u32::<LittleEndian>(bytes.len() as u32).unwrap();
    hasher.update(&len_buf);
    hasher.update(bytes);
}

fn resolve<'a>(snapshot: &'a dyn Snapshot, id: crate::snapshot::StrId) -> &'a str {
    snapshot.resolve(id).unwrap_or("")
}

fn hash_name(hasher: &mut blake3::Hasher, snapshot: &dyn Snapshot, id: crate::snapshot::StrId) {
    write_len_prefixed(hasher, resolve(snapshot, id).as_bytes());
}

fn hash_type_sig(hasher: &mut blake3::Hasher, snapshot: &dyn Snapshot, t: &TypeSig) {
    hash_name(hasher, snapshot, t.0);
}

fn hash_type_params(hasher: &mut blake3::Hasher, snapshot: &dyn Snapshot, params: &[TypeParam]) {
    hasher.update(&(params.len() as u32).to_le_bytes());
    for p in params {
        hash_name(hasher, snapshot, p.name);
        hasher.update(&(p.bounds.len() as u32).to_le_bytes());
        for b in &p.bounds {
            hash_name(hasher, snapshot, *b);
        }
    }
}

/// Hash one interface element's kind tag plus its kind-specific signature
/// fields only — never a body, never a literal value (unless it
/// participates in type inference, already filtered by the extractor).
fn hash_element(hasher: &mut blake3::Hasher, snapshot: &dyn Snapshot, element: &InterfaceElement) {
    hasher.update(&[element.kind.tag()]);
    match &element.signature {
        SignatureKind::Function(f) => {
            hash_name(hasher, snapshot, f.name);
            hash_type_params(hasher, snapshot, &f.type_params);
            hasher.update(&(f.params.len() as u32).to_le_bytes());
            for p in &f.params {
                hash_name(hasher, snapshot, p.name);
                hash_type_sig(hasher, snapshot, &p.type_sig);
                hasher.update(&[p.optional as u8]);
            }
            match &f.return_type {
                Some(t) => {
                    hasher.update(&[1]);
                    hash_type_sig(hasher, snapshot, t);
                }
                None => hasher.update(&[0]),
            };
            hasher.update(&[f.exported as u8, f.is_inline as u8]);
        }
        SignatureKind::Constant(c) => {
            hash_name(hasher, snapshot, c.name);
            hash_type_sig(hasher, snapshot, &c.type_sig);
            match c.value {
                Some(v) => {
                    hasher.update(&[1]);
                    hash_name(hasher, snapshot, v);
                }
                None => hasher.update(&[0]),
            };
        }
        SignatureKind::Type(t) => {
            hash_name(hasher, snapshot, t.name);
            hasher.update(&[t.kind as u8]);
            hash_type_params(hasher, snapshot, &t.type_params);
            match &t.aliased {
                Some(a) => {
                    hasher.update(&[1]);
                    hash_type_sig(hasher, snapshot, a);
                }
                None => hasher.update(&[0]),
            };
        }
        SignatureKind::Module(m) => {
            hash_name(hasher, snapshot, m.name);
            hasher.update(&(m.exported_symbols.len() as u32).to_le_bytes());
            for s in &m.exported_symbols {
                hash_name(hasher, snapshot, *s);
            }
        }
        SignatureKind::StructField(f) => {
            hash_name(hasher, snapshot, f.name);
            hash_type_sig(hasher, snapshot, &f.type_sig);
        }
        SignatureKind::EnumVariant(v) => {
            hash_name(hasher, snapshot, v.name);
            match &v.associated_type {
                Some(t) => {
                    hasher.update(&[1]);
                    hash_type_sig(hasher, snapshot, t);
                }
                None => hasher.update(&[0]),
            };
        }
    }
}

/// Canonical sort key for interface elements: `(kind_tag, name_bytes)`
/// (spec.md §4.3). Total order computable from the elements alone, so CIDs
/// are deterministic regardless of traversal order.
fn sort_key<'a>(snapshot: &'a dyn Snapshot, e: &InterfaceElement) -> (u8, &'a str) {
    (e.kind.tag(), resolve(snapshot, e.signature.name()))
}

pub struct InterfaceCidGenerator;

impl InterfaceCidGenerator {
    /// Hash a unit's already-extracted interface elements. Does not re-walk
    /// the snapshot; callers run `extract_interface` first.
    pub fn generate(snapshot: &dyn Snapshot, elements: &[InterfaceElement]) -> InterfaceCid {
        let mut sorted: Vec<&InterfaceElement> = elements.iter().collect();
        sorted.sort_by(|a, b| sort_key(snapshot, a).cmp(&sort_key(snapshot, b)));

        let mut hasher = blake3::Hasher::new();
        for element in sorted {
            hash_element(&mut hasher, snapshot, element);
        }
        InterfaceCid(Cid::from_hash(hasher.finalize()))
    }
}

/// `DependencyCID` is structurally an `InterfaceCID` over the canonically
/// ordered multiset of a unit's direct interface-dependencies' interface
/// CIDs (spec.md §3). Canonical order here is simply CID byte order, since
/// `Cid` already has exactly the lexicographic `Ord` that ordering needs.
pub fn compute_dependency_cid(direct_interface_cids: &[InterfaceCid]) -> DependencyCid {
    let mut sorted = direct_interface_cids.to_vec();
    sorted.sort();
    let mut hasher = blake3::Hasher::new();
    for cid in &sorted {
        hasher.update(cid.0.as_bytes());
    }
    DependencyCid(Cid::from_hash(hasher.finalize()))
}

pub struct SemanticCidGenerator;

impl SemanticCidGenerator {
    /// Superset of `InterfaceCidGenerator`: walks the entire subtree rooted
    /// at `root` in source order (not canonically re-sorted — tree order is
    /// already deterministic), hashing every node's kind tag, its decl
    /// signature if any, and its token text if any. Equivalent interfaces
    /// with differing bodies produce equal `InterfaceCid`s but different
    /// `SemanticCid`s because the body's statement/expression/literal nodes
    /// (skipped entirely by the interface extractor) are visited here.
    pub fn generate(snapshot: &dyn Snapshot, root: NodeId) -> SemanticCid {
        let mut hasher = blake3::Hasher::new();
        walk(snapshot, root, &mut hasher);
        SemanticCid(Cid::from_hash(hasher.finalize()))
    }
}

fn walk(snapshot: &dyn Snapshot, id: NodeId, hasher: &mut blake3::Hasher) {
    let Some(node) = snapshot.get_node(id) else {
        return;
    };
    hash_node_header(snapshot, &node, hasher);
    for &child in &node.children {
        walk(snapshot, child, hasher);
    }
}

fn hash_node_header(snapshot: &dyn Snapshot, node: &Node, hasher: &mut blake3::Hasher) {
    hasher.update(&[node_kind_tag(node)]);
    if let Some(decl_id) = node.decl {
        if let Some(decl) = snapshot.get_decl(decl_id) {
            hash_decl_as_element(hasher, snapshot, &decl);
        }
    }
    if let Some(token_id) = node.token {
        if let Some(token) = snapshot.get_token(token_id) {
            hash_name(hasher, snapshot, token.text);
        }
    }
}

fn node_kind_tag(node: &Node) -> u8 {
    use crate::snapshot::NodeKind::*;
    match node.kind {
        Root => 0,
        Module => 1,
        Function => 2,
        Struct => 3,
        Enum => 4,
        TypeAlias => 5,
        Const => 6,
        StructField => 7,
        EnumVariant => 8,
        Statement => 9,
        Expression => 10,
        Literal => 11,
        Unknown => 12,
    }
}

fn hash_decl_as_element(
    hasher: &mut blake3::Hasher,
    snapshot: &dyn Snapshot,
    decl: &crate::snapshot::Decl,
) {
    use crate::snapshot::Decl::*;
    match decl {
        Function(f) => {
            hash_name(hasher, snapshot, f.name);
            hash_type_params(hasher, snapshot, &f.type_params);
            hasher.update(&(f.params.len() as u32).to_le_bytes());
            for p in &f.params {
                hash_name(hasher, snapshot, p.name);
                hash_type_sig(hasher, snapshot, &p.type_sig);
                hasher.update(&[p.optional as u8]);
            }
            if let Some(t) = &f.return_type {
                hasher.update(&[1]);
                hash_type_sig(hasher, snapshot, t);
            } else {
                hasher.update(&[0]);
            }
            hasher.update(&[f.visibility as u8, f.exported as u8, f.is_inline as u8]);
        }
        Type(t) => {
            hash_name(hasher, snapshot, t.name);
            hasher.update(&[t.kind as u8]);
            hash_type_params(hasher, snapshot, &t.type_params);
        }
        Constant(c) => {
            hash_name(hasher, snapshot, c.name);
            hash_type_sig(hasher, snapshot, &c.type_sig);
            if let Some(v) = c.value {
                hash_name(hasher, snapshot, v);
            }
        }
        Module(m) => {
            hash_name(hasher, snapshot, m.name);
        }
        StructField(f) => {
            hash_name(hasher, snapshot, f.name);
            hash_type_sig(hasher, snapshot, &f.type_sig);
        }
        EnumVariant(v) => {
            hash_name(hasher, snapshot, v.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{Decl, FunctionDecl, MockSnapshot, Node, NodeKind, Span, Visibility};

    fn function_unit(body_token: &str) -> (MockSnapshot, NodeId) {
        let mut snap = MockSnapshot::new();
        let name = snap.intern_mut("run");
        let tok = snap.intern_mut(body_token);
        snap.add_decl(
            crate::snapshot::DeclId(0),
            Decl::Function(FunctionDecl {
                name,
                visibility: Visibility::Public,
                type_params: vec![],
                params: vec![],
                return_type: None,
                is_inline: false,
                exported: true,
            }),
        );
        snap.add_node(Node {
            id: NodeId(2),
            kind: NodeKind::Literal,
            decl: None,
            token: Some(crate::snapshot::TokenId(0)),
            children: vec![],
            span: Span::default(),
        });
        snap.add_token(crate::snapshot::Token {
            id: crate::snapshot::TokenId(0),
            text: tok,
            span: Span::default(),
        });
        snap.add_node(Node {
            id: NodeId(1),
            kind: NodeKind::Function,
            decl: Some(crate::snapshot::DeclId(0)),
            token: None,
            children: vec![NodeId(2)],
            span: Span::default(),
        });
        snap.add_node(Node {
            id: NodeId(0),
            kind: NodeKind::Root,
            decl: None,
            token: None,
            children: vec![NodeId(1)],
            span: Span::default(),
        });
        (snap, NodeId(0))
    }

    #[test]
    fn same_interface_different_body_same_interface_cid_different_semantic_cid() {
        let (snap_a, root_a) = function_unit("1");
        let (snap_b, root_b) = function_unit("2");

        let elems_a = crate::interface::extract_interface(&snap_a, root_a);
        let elems_b = crate::interface::extract_interface(&snap_b, root_b);

        let iface_a = InterfaceCidGenerator::generate(&snap_a, &elems_a);
        let iface_b = InterfaceCidGenerator::generate(&snap_b, &elems_b);
        assert_eq!(iface_a, iface_b);

        let sem_a = SemanticCidGenerator::generate(&snap_a, root_a);
        let sem_b = SemanticCidGenerator::generate(&snap_b, root_b);
        assert_ne!(sem_a, sem_b);
    }

    #[test]
    fn empty_snapshot_yields_empty_stream_cid() {
        let snap = MockSnapshot::new();
        let elements = vec![];
        let iface = InterfaceCidGenerator::generate(&snap, &elements);
        assert_eq!(iface.0, empty_cid());
    }

    #[test]
    fn cid_ordering_is_lexicographic_byte_order() {
        let a = Cid([0u8; 32]);
        let mut b_bytes = [0u8; 32];
        b_bytes[31] = 1;
        let b = Cid(b_bytes);
        assert!(a < b);
    }

    #[test]
    fn hex_round_trips() {
        let cid = Cid::from_hash(blake3::hash(b"hello"));
        let hex = cid.to_hex();
        assert_eq!(Cid::from_hex(&hex), Some(cid));
    }
}
