//! In-memory model of a loaded .NET assembly, reduced to what method patching needs.
//!
//! The model keeps type and method definitions with their editable [`MethodBody`], plus the
//! `TypeRef` and `MemberRef` rows a module uses to reach code in other assemblies. Resolution
//! is by name; reference import reuses matching rows before creating new ones so repeated
//! patch runs never grow the reference tables.

use crate::{
    metadata::{
        method::{MethodAccessFlags, MethodBody, MethodModifiers},
        token::{TableId, Token},
    },
    Error, Result,
};

/// Name under which the primary module of an assembly can always be addressed
pub const MAIN_MODULE: &str = "MainModule";

/// Calling convention flag for instance methods
const SIG_HASTHIS: u8 = 0x20;
/// Calling convention flag for generic methods
const SIG_GENERIC: u8 = 0x10;
/// `ELEMENT_TYPE_VOID`
const ELEMENT_TYPE_VOID: u8 = 0x01;

#[allow(non_snake_case)]
/// Type attribute flag constants for `TypeDef` entries, visibility subset.
pub mod TypeAttributes {
    /// Mask for extracting type visibility information.
    pub const VISIBILITY_MASK: u32 = 0x0000_0007;
    /// Type has no public scope (internal to assembly).
    pub const NOT_PUBLIC: u32 = 0x0000_0000;
    /// Type has public scope (visible outside assembly).
    pub const PUBLIC: u32 = 0x0000_0001;
    /// Nested type with public visibility.
    pub const NESTED_PUBLIC: u32 = 0x0000_0002;
    /// Type is a class.
    pub const CLASS: u32 = 0x0000_0000;
    /// Type is abstract.
    pub const ABSTRACT: u32 = 0x0000_0080;
    /// Type is sealed.
    pub const SEALED: u32 = 0x0000_0100;
}

/// A loaded assembly: its name and modules.
#[derive(Debug, Clone, PartialEq)]
pub struct CilAssembly {
    /// Simple assembly name, used as resolution scope when other modules reference it
    pub name: String,
    /// Modules in manifest order; the first one is the primary module
    pub modules: Vec<CilModule>,
    /// Value of the assembly's `TargetFrameworkAttribute`, if any
    pub target_framework: Option<String>,
}

impl CilAssembly {
    /// Creates an assembly with a single primary module of the same name
    #[must_use]
    pub fn new(name: &str) -> Self {
        CilAssembly {
            name: name.to_string(),
            modules: vec![CilModule::new(&format!("{name}.dll"))],
            target_framework: None,
        }
    }

    /// Returns the module called `name`; [`MAIN_MODULE`] selects the primary module.
    #[must_use]
    pub fn module(&self, name: &str) -> Option<&CilModule> {
        if name == MAIN_MODULE {
            return self.modules.first();
        }
        self.modules.iter().find(|module| module.name == name)
    }

    /// Mutable variant of [`CilAssembly::module`].
    ///
    /// # Errors
    /// Returns [`crate::Error::ModuleNotFound`] if no module matches.
    pub fn module_mut(&mut self, name: &str) -> Result<&mut CilModule> {
        let found = if name == MAIN_MODULE {
            self.modules.first_mut()
        } else {
            self.modules.iter_mut().find(|module| module.name == name)
        };
        found.ok_or_else(|| Error::ModuleNotFound(name.to_string()))
    }

    /// Returns true if the primary module still defines at least one type
    #[must_use]
    pub fn has_any_type(&self) -> bool {
        self.modules.first().is_some_and(CilModule::has_any_type)
    }
}

/// A single module with its type definitions and outward references.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CilModule {
    /// Module file name
    pub name: String,
    /// Type definitions in declaration order
    pub types: Vec<TypeDef>,
    /// Rows of the `TypeRef` table
    pub type_refs: Vec<TypeRef>,
    /// Rows of the `MemberRef` table
    pub member_refs: Vec<MemberRef>,
}

/// Position of a method inside a [`CilModule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodHandle {
    /// Index into [`CilModule::types`]
    pub type_index: usize,
    /// Index into [`TypeDef::methods`]
    pub method_index: usize,
}

/// A method in another assembly that a module is about to reference.
#[derive(Debug, Clone, Copy)]
pub struct ExternalMethod<'a> {
    /// Resolution scope: the simple name of the assembly defining the method
    pub scope: &'a str,
    /// Declaring type
    pub owner: &'a TypeDef,
    /// The method itself
    pub method: &'a MethodDef,
}

impl ExternalMethod<'_> {
    /// `Namespace.Type::Method`
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{}::{}", self.owner.full_name(), self.method.name)
    }

    /// Checks that the method can be called from any code position with an empty stack.
    ///
    /// # Errors
    /// Returns [`crate::Error::PatchMethodNotCallable`] naming the first violated requirement.
    pub fn ensure_injectable(&self) -> Result<()> {
        let reason = if !self.owner.is_public() {
            Some("declaring type is not public")
        } else if !self.method.is_public() {
            Some("method is not public")
        } else if !self.method.is_static() {
            Some("method is not static")
        } else if !self.method.is_parameterless_void() {
            Some("method must take no parameters and return void")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(Error::PatchMethodNotCallable {
                method: self.full_name(),
                reason: reason.to_string(),
            }),
            None => Ok(()),
        }
    }
}

impl CilModule {
    /// Creates an empty module
    #[must_use]
    pub fn new(name: &str) -> Self {
        CilModule {
            name: name.to_string(),
            ..CilModule::default()
        }
    }

    /// Returns true if the module defines at least one type
    #[must_use]
    pub fn has_any_type(&self) -> bool {
        !self.types.is_empty()
    }

    /// Index of the first type called `namespace.name`
    #[must_use]
    pub fn resolve_type(&self, namespace: &str, name: &str) -> Option<usize> {
        self.types
            .iter()
            .position(|ty| ty.namespace == namespace && ty.name == name)
    }

    /// Resolves `namespace.class::method`, first match by name.
    ///
    /// # Errors
    /// Returns [`crate::Error::TypeNotFound`] or [`crate::Error::MethodNotFound`].
    pub fn resolve(&self, namespace: &str, class: &str, method: &str) -> Result<MethodHandle> {
        let type_index =
            self.resolve_type(namespace, class)
                .ok_or_else(|| Error::TypeNotFound {
                    namespace: namespace.to_string(),
                    name: class.to_string(),
                })?;
        let ty = &self.types[type_index];
        let method_index = ty
            .resolve_method(method)
            .ok_or_else(|| Error::MethodNotFound {
                type_name: ty.full_name(),
                method: method.to_string(),
            })?;

        Ok(MethodHandle {
            type_index,
            method_index,
        })
    }

    /// Returns the type owning `handle`
    #[must_use]
    pub fn owner(&self, handle: MethodHandle) -> Option<&TypeDef> {
        self.types.get(handle.type_index)
    }

    /// Returns the method at `handle`
    #[must_use]
    pub fn method(&self, handle: MethodHandle) -> Option<&MethodDef> {
        self.types
            .get(handle.type_index)
            .and_then(|ty| ty.methods.get(handle.method_index))
    }

    /// Returns the method at `handle` for modification
    pub fn method_mut(&mut self, handle: MethodHandle) -> Option<&mut MethodDef> {
        self.types
            .get_mut(handle.type_index)
            .and_then(|ty| ty.methods.get_mut(handle.method_index))
    }

    /// `Namespace.Type::Method` for `handle`, or an empty string for stale handles
    #[must_use]
    pub fn method_name(&self, handle: MethodHandle) -> String {
        match (self.owner(handle), self.method(handle)) {
            (Some(ty), Some(method)) => format!("{}::{}", ty.full_name(), method.name),
            _ => String::new(),
        }
    }

    /// Looks up an existing `MemberRef` for `source` without creating anything.
    #[must_use]
    pub fn find_method_import(&self, source: &ExternalMethod<'_>) -> Option<Token> {
        let class = self.find_type_ref(source.scope, source.owner)?;
        self.member_refs
            .iter()
            .find(|member| {
                member.class == class
                    && member.name == source.method.name
                    && member.signature == source.method.signature
            })
            .map(|member| member.token)
    }

    /// Returns a `MemberRef` token for `source`, creating the `TypeRef` and `MemberRef` rows
    /// if the module does not reference it yet.
    ///
    /// # Errors
    /// Returns [`crate::Error::PatchMethodNotCallable`] if the method cannot be injected and
    /// [`crate::Error::Malformed`] if a reference table is full.
    pub fn import_method(&mut self, source: &ExternalMethod<'_>) -> Result<Token> {
        source.ensure_injectable()?;

        if let Some(token) = self.find_method_import(source) {
            return Ok(token);
        }

        let class = match self.find_type_ref(source.scope, source.owner) {
            Some(token) => token,
            None => {
                let token = next_token(TableId::TypeRef, self.type_refs.iter().map(|r| r.token))?;
                self.type_refs.push(TypeRef {
                    token,
                    scope: source.scope.to_string(),
                    namespace: source.owner.namespace.clone(),
                    name: source.owner.name.clone(),
                });
                token
            }
        };

        let token = next_token(TableId::MemberRef, self.member_refs.iter().map(|r| r.token))?;
        self.member_refs.push(MemberRef {
            token,
            class,
            name: source.method.name.clone(),
            signature: source.method.signature.clone(),
        });

        Ok(token)
    }

    fn find_type_ref(&self, scope: &str, owner: &TypeDef) -> Option<Token> {
        self.type_refs
            .iter()
            .find(|r| r.scope == scope && r.namespace == owner.namespace && r.name == owner.name)
            .map(|r| r.token)
    }
}

/// Token for the row after the highest existing row of `table`
fn next_token(table: TableId, existing: impl Iterator<Item = Token>) -> Result<Token> {
    let row = existing.map(|token| token.row()).max().unwrap_or(0) + 1;
    if row > 0x00FF_FFFF {
        return Err(malformed_error!("{} table is full", table));
    }
    Ok(Token::from_parts(table, row))
}

/// A type definition.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeDef {
    /// `TypeDef` token
    pub token: Token,
    /// Namespace, empty for the global namespace
    pub namespace: String,
    /// Simple name
    pub name: String,
    /// Raw `TypeAttributes`
    pub flags: u32,
    /// Methods in declaration order
    pub methods: Vec<MethodDef>,
}

impl TypeDef {
    /// `Namespace.Name`, or just `Name` in the global namespace
    #[must_use]
    pub fn full_name(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.namespace, self.name)
        }
    }

    /// Returns true for public top-level and nested-public types
    #[must_use]
    pub fn is_public(&self) -> bool {
        matches!(
            self.flags & TypeAttributes::VISIBILITY_MASK,
            TypeAttributes::PUBLIC | TypeAttributes::NESTED_PUBLIC
        )
    }

    /// Index of the first method called `name`
    #[must_use]
    pub fn resolve_method(&self, name: &str) -> Option<usize> {
        self.methods.iter().position(|method| method.name == name)
    }
}

/// A method definition.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodDef {
    /// `MethodDef` token
    pub token: Token,
    /// Method name
    pub name: String,
    /// Raw `MethodAttributes`
    pub flags: u32,
    /// Method signature blob
    pub signature: Vec<u8>,
    /// Implementation, absent for abstract, extern and runtime-provided methods
    pub body: Option<MethodBody>,
}

impl MethodDef {
    /// Returns true if the method is public
    #[must_use]
    pub fn is_public(&self) -> bool {
        MethodAccessFlags::from_method_flags(self.flags) == MethodAccessFlags::PUBLIC
    }

    /// Returns true if the method is static
    #[must_use]
    pub fn is_static(&self) -> bool {
        MethodModifiers::from_method_flags(self.flags).contains(MethodModifiers::STATIC)
    }

    /// Returns true if the signature is a non-generic, parameterless method returning `void`
    #[must_use]
    pub fn is_parameterless_void(&self) -> bool {
        match self.signature.as_slice() {
            [convention, 0x00, ELEMENT_TYPE_VOID] => convention & (SIG_HASTHIS | SIG_GENERIC) == 0,
            _ => false,
        }
    }
}

/// A row of the `TypeRef` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeRef {
    /// `TypeRef` token
    pub token: Token,
    /// Name of the assembly defining the type
    pub scope: String,
    /// Namespace of the referenced type
    pub namespace: String,
    /// Simple name of the referenced type
    pub name: String,
}

/// A row of the `MemberRef` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberRef {
    /// `MemberRef` token
    pub token: Token,
    /// `TypeRef` token of the declaring type
    pub class: Token,
    /// Member name
    pub name: String,
    /// Member signature blob
    pub signature: Vec<u8>,
}
