mod common;

use cilpatch::prelude::*;
use common::{method, patch_assembly, public_type, PUBLIC_INSTANCE};

/// `TakeDamage` as emitted by the compiler, tiny header
const TAKE_DAMAGE: [u8; 25] = [
    0x62, // tiny, 24 bytes
    0x02, // ldarg.0
    0x7B, 0x01, 0x00, 0x00, 0x04, // ldfld godMode
    0x2C, 0x01, // brfalse.s +1
    0x2A, // ret
    0x02, // ldarg.0
    0x25, // dup
    0x7B, 0x02, 0x00, 0x00, 0x04, // ldfld health
    0x03, // ldarg.1
    0x59, // sub
    0x7D, 0x02, 0x00, 0x00, 0x04, // stfld health
    0x2A, // ret
];

fn module_with(name: &str, body: MethodBody) -> CilModule {
    let mut module = CilModule::new("Assembly-CSharp.dll");
    module
        .types
        .push(public_type(1, "Player", vec![method(1, name, PUBLIC_INSTANCE, Some(body))]));
    module
}

fn inject_patch(
    module: &mut CilModule,
    name: &str,
    location: InjectionLocation,
) -> Result<InjectionOutcome> {
    let patch = patch_assembly("GodMode");
    let owner = &patch.modules[0].types[0];
    let external = ExternalMethod {
        scope: &patch.name,
        owner,
        method: &owner.methods[0],
    };
    let target = module.resolve("", "Player", name)?;
    inject(module, target, &external, location)
}

fn body_of(module: &CilModule, name: &str) -> Result<MethodBody> {
    let handle = module.resolve("", "Player", name)?;
    module
        .method(handle)
        .and_then(|m| m.body.clone())
        .ok_or_else(|| Error::NotPatchable(name.to_string()))
}

#[test]
fn postfix_reencodes_compiler_output() -> Result<()> {
    let mut module = module_with("TakeDamage", MethodBody::parse(&TAKE_DAMAGE)?);

    let outcome = inject_patch(&mut module, "TakeDamage", InjectionLocation::Postfix)?;
    assert_eq!(outcome, InjectionOutcome::Injected { count: 2 });

    let encoded = body_of(&module, "TakeDamage")?.encode()?;
    #[rustfmt::skip]
    let expected = [
        0x8A, // tiny, 34 bytes
        0x02,
        0x7B, 0x01, 0x00, 0x00, 0x04,
        0x2C, 0x06, // brfalse.s now skips the inserted call and the early ret
        0x28, 0x01, 0x00, 0x00, 0x0A, // call P::M
        0x2A,
        0x02,
        0x25,
        0x7B, 0x02, 0x00, 0x00, 0x04,
        0x03,
        0x59,
        0x7D, 0x02, 0x00, 0x00, 0x04,
        0x28, 0x01, 0x00, 0x00, 0x0A, // call P::M
        0x2A,
    ];
    assert_eq!(encoded, expected);

    let again = inject_patch(&mut module, "TakeDamage", InjectionLocation::Postfix)?;
    assert_eq!(again, InjectionOutcome::AlreadyPresent);
    assert_eq!(body_of(&module, "TakeDamage")?.encode()?, expected);
    Ok(())
}

#[test]
fn short_branch_grows_to_long_form() -> Result<()> {
    // ldarg.0; brtrue.s END; nop x123; ret; END: ret
    let mut instructions = vec![
        Instruction::new(OpCode::Ldarg0),
        Instruction::branch(OpCode::BrtrueS, 126),
    ];
    instructions.extend((0..123).map(|_| Instruction::new(OpCode::Nop)));
    instructions.push(Instruction::new(OpCode::Ret));
    instructions.push(Instruction::new(OpCode::Ret));
    let mut module = module_with("Tick", MethodBody::new(instructions));

    inject_patch(&mut module, "Tick", InjectionLocation::Postfix)?;

    let body = body_of(&module, "Tick")?;
    assert_eq!(body.instructions.len(), 129);
    assert_eq!(body.instructions[1].opcode, OpCode::Brtrue);
    assert_eq!(body.instructions[1].targets(), vec![127]);
    assert_eq!(body.instructions[127].opcode, OpCode::Call);

    let encoded = body.encode()?;
    // fat header: 12 bytes, then ldarg.0 and brtrue with a 4-byte displacement of 129
    assert_eq!(encoded[0] & 0x03, 0x03);
    assert_eq!(&encoded[12..18], &[0x02, 0x3A, 0x81, 0x00, 0x00, 0x00]);
    assert_eq!(encoded.len(), 12 + 141);
    Ok(())
}

#[test]
fn prefix_keeps_protected_regions() -> Result<()> {
    // try { nop; leave.s END } finally { nop; endfinally } END: ret
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
    let mut module = module_with("Save", MethodBody::parse(&body.encode()?)?);

    inject_patch(&mut module, "Save", InjectionLocation::Prefix)?;

    let patched = body_of(&module, "Save")?;
    assert!(patched.instructions[0].is_call_to(Token::new(0x0A00_0001)));
    let handler = &patched.exception_handlers[0];
    assert_eq!(
        (handler.try_start, handler.try_end, handler.handler_start, handler.handler_end),
        (1, 3, 3, 5)
    );
    assert_eq!(patched.instructions[2].targets(), vec![5]);

    // the rewritten body survives a trip through its binary form
    assert_eq!(MethodBody::parse(&patched.encode()?)?, patched);
    Ok(())
}

#[test]
fn postfix_without_return_is_rejected() -> Result<()> {
    // loop: br.s loop
    let mut module = module_with(
        "Spin",
        MethodBody::new(vec![Instruction::branch(OpCode::BrS, 0)]),
    );

    let result = inject_patch(&mut module, "Spin", InjectionLocation::Postfix);

    assert!(matches!(
        result,
        Err(Error::InstructionNotFound { opcode: "ret", .. })
    ));
    assert_eq!(body_of(&module, "Spin")?.instructions.len(), 1);
    Ok(())
}
