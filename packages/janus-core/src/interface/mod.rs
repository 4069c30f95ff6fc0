//! Interface extraction (spec.md §4.2, C2).
//!
//! Walks a snapshot from a unit's root node and yields the set of
//! `InterfaceElement`s: signatures only, bodies and private declarations
//! excluded. The extractor never mutates the snapshot and never fails; a
//! dangling node id is simply skipped.

use crate::snapshot::{
    Decl, Node, NodeId, NodeKind, Snapshot, StrId, TypeDeclKind, TypeParam, TypeSig, Visibility,
};

/// Discriminant for an `InterfaceElement`, doubling as the CID generators'
/// canonical sort-key component and wire tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ElementKind {
    PublicFunction = 0,
    PublicConstant = 1,
    PublicType = 2,
    PublicModule = 3,
    PublicStructField = 4,
    PublicEnumVariant = 5,
}

impl ElementKind {
    pub fn tag(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSignature {
    pub name: StrId,
    pub type_params: Vec<TypeParam>,
    pub params: Vec<crate::snapshot::Param>,
    pub return_type: Option<TypeSig>,
    pub exported: bool,
    pub is_inline: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeSignature {
    pub name: StrId,
    pub kind: TypeDeclKind,
    pub type_params: Vec<TypeParam>,
    pub aliased: Option<TypeSig>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstantSignature {
    pub name: StrId,
    pub type_sig: TypeSig,
    /// Only set when the value participates in type inference; see
    /// `snapshot::ConstantDecl::participates_in_inference`.
    pub value: Option<StrId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleSignature {
    pub name: StrId,
    pub exported_symbols: Vec<StrId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructFieldSignature {
    pub name: StrId,
    pub type_sig: TypeSig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumVariantSignature {
    pub name: StrId,
    pub associated_type: Option<TypeSig>,
}

/// Kind-tagged signature union. Each variant carries exactly the fields
/// spec.md §4.2's policy names as part of the contract — nothing else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureKind {
    Function(FunctionSignature),
    Constant(ConstantSignature),
    Type(TypeSignature),
    Module(ModuleSignature),
    StructField(StructFieldSignature),
    EnumVariant(EnumVariantSignature),
}

impl SignatureKind {
    pub fn element_kind(&self) -> ElementKind {
        match self {
            SignatureKind::Function(_) => ElementKind::PublicFunction,
            SignatureKind::Constant(_) => ElementKind::PublicConstant,
            SignatureKind::Type(_) => ElementKind::PublicType,
            SignatureKind::Module(_) => ElementKind::PublicModule,
            SignatureKind::StructField(_) => ElementKind::PublicStructField,
            SignatureKind::EnumVariant(_) => ElementKind::PublicEnumVariant,
        }
    }

    pub fn name(&self) -> StrId {
        match self {
            SignatureKind::Function(f) => f.name,
            SignatureKind::Constant(c) => c.name,
            SignatureKind::Type(t) => t.name,
            SignatureKind::Module(m) => m.name,
            SignatureKind::StructField(f) => f.name,
            SignatureKind::EnumVariant(v) => v.name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceElement {
    pub decl_id: crate::snapshot::DeclId,
    pub kind: ElementKind,
    pub signature: SignatureKind,
    pub span: crate::snapshot::Span,
}

/// Walk `root` and collect every interface element reachable from it.
/// Result order is traversal order, not canonical order — callers that need
/// a deterministic hash input (the CID generators) sort it themselves.
pub fn extract_interface(snapshot: &dyn Snapshot, root: NodeId) -> Vec<InterfaceElement> {
    let mut out = Vec::new();
    walk(snapshot, root, &mut out);
    out
}

fn walk(snapshot: &dyn Snapshot, id: NodeId, out: &mut Vec<InterfaceElement>) {
    let Some(node) = snapshot.get_node(id) else {
        // Missing node: extraction skips silently (spec.md §4.2 Failure).
        return;
    };
    if !node.kind.is_container() {
        return;
    }
    emit_if_interface(snapshot, &node, out);
    for &child in &node.children {
        walk(snapshot, child, out);
    }
}

fn emit_if_interface(snapshot: &dyn Snapshot, node: &Node, out: &mut Vec<InterfaceElement>) {
    let Some(decl_id) = node.decl else { return };
    let Some(decl) = snapshot.get_decl(decl_id) else {
        return;
    };
    let signature = match decl {
        Decl::Function(f) if f.visibility == Visibility::Public => {
            SignatureKind::Function(FunctionSignature {
                name: f.name,
                type_params: f.type_params,
                params: f.params,
                return_type: f.return_type,
                exported: f.exported,
                is_inline: f.is_inline,
            })
        }
        Decl::Type(t) if t.visibility == Visibility::Public => {
            SignatureKind::Type(TypeSignature {
                name: t.name,
                kind: t.kind,
                type_params: t.type_params,
                aliased: t.aliased,
            })
        }
        Decl::Constant(c) if c.visibility == Visibility::Public => {
            SignatureKind::Constant(ConstantSignature {
                name: c.name,
                type_sig: c.type_sig,
                value: if c.participates_in_inference {
                    c.value
                } else {
                    None
                },
            })
        }
        Decl::Module(m) => SignatureKind::Module(ModuleSignature {
            name: m.name,
            exported_symbols: m.exported_symbols,
        }),
        Decl::StructField(f) if f.visibility == Visibility::Public => {
            SignatureKind::StructField(StructFieldSignature {
                name: f.name,
                type_sig: f.type_sig,
            })
        }
        Decl::EnumVariant(v) => SignatureKind::EnumVariant(EnumVariantSignature {
            name: v.name,
            associated_type: v.associated_type,
        }),
        // Private function/type/constant/field: not interface.
        _ => return,
    };
    out.push(InterfaceElement {
        decl_id,
        kind: signature.element_kind(),
        signature,
        span: node.span,
    });
}
