//! Builders shared by the unit tests.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Mutex,
};

use crate::{
    assembly::{Instruction, OpCode, Operand},
    compiler::{CompileOutput, CompileRequest, PatchCompiler},
    metadata::{
        method::{ExceptionHandler, ExceptionHandlerFlags, MethodBody},
        token::Token,
    },
    module::{CilAssembly, MethodDef, TypeAttributes, TypeDef},
};

/// public hidebysig
const PUBLIC_INSTANCE: u32 = 0x0086;
/// public static hidebysig
const PUBLIC_STATIC: u32 = 0x0096;
/// public abstract virtual hidebysig newslot
const PUBLIC_ABSTRACT: u32 = 0x05C6;

/// `void ()` with and without `this`
const SIG_INSTANCE_VOID: [u8; 3] = [0x20, 0x00, 0x01];
const SIG_STATIC_VOID: [u8; 3] = [0x00, 0x00, 0x01];

// Helper function to create a MethodDef
pub fn create_method(row: u32, name: &str, flags: u32, body: Option<MethodBody>) -> MethodDef {
    MethodDef {
        token: Token::new(0x0600_0000 + row),
        name: name.to_string(),
        flags,
        signature: if flags & 0x10 == 0 {
            SIG_INSTANCE_VOID.to_vec()
        } else {
            SIG_STATIC_VOID.to_vec()
        },
        body,
    }
}

// Helper function to create a public TypeDef
pub fn create_type(row: u32, namespace: &str, name: &str, methods: Vec<MethodDef>) -> TypeDef {
    TypeDef {
        token: Token::new(0x0200_0000 + row),
        namespace: namespace.to_string(),
        name: name.to_string(),
        flags: TypeAttributes::PUBLIC,
        methods,
    }
}

/// `if (godMode) return; health -= amount;` with an early and a final `ret`
pub fn take_damage_body() -> MethodBody {
    MethodBody::new(vec![
        Instruction::new(OpCode::Ldarg0),
        Instruction::with_operand(OpCode::Ldfld, Operand::Token(Token::new(0x0400_0001))),
        Instruction::branch(OpCode::BrfalseS, 4),
        Instruction::new(OpCode::Ret),
        Instruction::new(OpCode::Ldarg0),
        Instruction::new(OpCode::Dup),
        Instruction::with_operand(OpCode::Ldfld, Operand::Token(Token::new(0x0400_0002))),
        Instruction::new(OpCode::Ldarg1),
        Instruction::new(OpCode::Sub),
        Instruction::with_operand(OpCode::Stfld, Operand::Token(Token::new(0x0400_0002))),
        Instruction::new(OpCode::Ret),
    ])
}

/// `try { nop; leave END } finally { nop; endfinally } END: ret`
pub fn save_body() -> MethodBody {
    let mut body = MethodBody::new(vec![
        Instruction::new(OpCode::Nop),
        Instruction::branch(OpCode::LeaveS, 4),
        Instruction::new(OpCode::Nop),
        Instruction::new(OpCode::Endfinally),
        Instruction::new(OpCode::Ret),
    ]);
    body.exception_handlers.push(ExceptionHandler {
        flags: ExceptionHandlerFlags::FINALLY,
        try_start: 0,
        try_end: 2,
        handler_start: 2,
        handler_end: 4,
        filter_start: None,
        class_token: None,
    });
    body
}

/// `Assembly-CSharp` with a `Player` type: `TakeDamage` (two returns), `Save` (try/finally),
/// `Update` (single return) and the body-less `Serialize`
pub fn player_assembly() -> CilAssembly {
    let mut assembly = CilAssembly::new("Assembly-CSharp");
    assembly.modules[0].types.push(create_type(
        1,
        "",
        "Player",
        vec![
            create_method(1, "TakeDamage", PUBLIC_INSTANCE, Some(take_damage_body())),
            create_method(2, "Save", PUBLIC_INSTANCE, Some(save_body())),
            create_method(
                3,
                "Update",
                PUBLIC_INSTANCE,
                Some(MethodBody::new(vec![
                    Instruction::new(OpCode::Nop),
                    Instruction::new(OpCode::Ret),
                ])),
            ),
            create_method(4, "Serialize", PUBLIC_ABSTRACT, None),
        ],
    ));
    assembly
}

/// Compiled patch `GodMode` exposing `public static void P.M()`
pub fn patch_assembly() -> CilAssembly {
    let mut assembly = CilAssembly::new("GodMode");
    assembly.modules[0].types.push(create_type(
        1,
        "",
        "P",
        vec![create_method(
            1,
            "M",
            PUBLIC_STATIC,
            Some(MethodBody::new(vec![Instruction::new(OpCode::Ret)])),
        )],
    ));
    assembly
}

/// Compiler double that counts invocations and keeps the last request
pub struct RecordingCompiler {
    calls: AtomicUsize,
    last: Mutex<Option<CompileRequest>>,
    fail_with: Option<Vec<String>>,
}

impl RecordingCompiler {
    /// Succeeds with the source text as the binary
    pub fn succeeding() -> Self {
        RecordingCompiler {
            calls: AtomicUsize::new(0),
            last: Mutex::new(None),
            fail_with: None,
        }
    }

    /// Always reports the given diagnostics
    pub fn failing(diagnostics: &[&str]) -> Self {
        RecordingCompiler {
            fail_with: Some(diagnostics.iter().map(|d| (*d).to_string()).collect()),
            ..Self::succeeding()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<CompileRequest> {
        self.last.lock().unwrap().clone()
    }
}

impl PatchCompiler for RecordingCompiler {
    fn compile(&self, request: &CompileRequest) -> crate::Result<CompileOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last.lock().unwrap() = Some(request.clone());
        Ok(match &self.fail_with {
            Some(diagnostics) => CompileOutput::Diagnostics(diagnostics.clone()),
            None => CompileOutput::Binary(request.source.clone().into_bytes()),
        })
    }
}
