//! Idempotent insertion of patch calls into method bodies.
//!
//! [`inject`] adds a `call` to an external patch method either once at the entry of a target
//! method ([`InjectionLocation::Prefix`]) or in front of every `ret`
//! ([`InjectionLocation::Postfix`]). Running it again with the same patch finds the earlier
//! call and leaves the body alone.
//!
//! The body is edited on a copy: branches are expanded to their long forms, calls inserted,
//! and compact forms re-selected. The method is only updated once all steps succeeded.
//!
//! # Examples
//!
//! ```rust
//! use cilpatch::prelude::*;
//! use cilpatch::injection::{inject, InjectionOutcome};
//!
//! # fn run(game: &mut CilAssembly, patch: &CilAssembly) -> cilpatch::Result<()> {
//! let module = game.module_mut("MainModule")?;
//! let target = module.resolve("", "Player", "TakeDamage")?;
//!
//! let patch_module = &patch.modules[0];
//! let handle = patch_module.resolve("", "P", "M")?;
//! let external = ExternalMethod {
//!     scope: &patch.name,
//!     owner: &patch_module.types[handle.type_index],
//!     method: &patch_module.types[handle.type_index].methods[handle.method_index],
//! };
//!
//! match inject(module, target, &external, InjectionLocation::Postfix)? {
//!     InjectionOutcome::Injected { count } => println!("{count} calls added"),
//!     InjectionOutcome::AlreadyPresent => println!("already patched"),
//! }
//! # Ok(())
//! # }
//! ```

use tracing::{debug, info};

use crate::{
    assembly::Instruction,
    metadata::{method::MethodBody, token::Token},
    module::{CilModule, ExternalMethod, MethodHandle},
    patch::InjectionLocation,
    Error, Result,
};

/// What [`inject`] did to the target method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectionOutcome {
    /// `count` calls were inserted
    Injected {
        /// One for Prefix, one per `ret` for Postfix
        count: usize,
    },
    /// The body already calls the patch method at the requested location
    AlreadyPresent,
}

/// Inserts a call to `patch` into the method at `target`.
///
/// # Errors
/// - [`crate::Error::NotPatchable`] if the target has no body or an empty one
/// - [`crate::Error::PatchMethodNotCallable`] if `patch` is not `public static void M()` on a
///   public type
/// - [`crate::Error::InstructionNotFound`] for Postfix on a body without `ret`
/// - [`crate::Error::Malformed`] if the rewritten body cannot be laid out
///
/// The module is left unchanged on error, except that a failing layout may leave behind the
/// freshly imported reference rows.
pub fn inject(
    module: &mut CilModule,
    target: MethodHandle,
    patch: &ExternalMethod<'_>,
    location: InjectionLocation,
) -> Result<InjectionOutcome> {
    let target_name = module.method_name(target);
    let body = module
        .method(target)
        .ok_or_else(|| Error::MethodNotFound {
            type_name: module
                .owner(target)
                .map(|ty| ty.full_name())
                .unwrap_or_default(),
            method: format!("#{}", target.method_index),
        })?
        .body
        .as_ref()
        .filter(|body| !body.is_empty())
        .ok_or_else(|| Error::NotPatchable(target_name.clone()))?;

    patch.ensure_injectable()?;

    if let Some(existing) = module.find_method_import(patch) {
        if is_injected(body, existing, location) {
            info!(
                patch = %patch.full_name(),
                target = %target_name,
                "Method already patched at {}. Skipping", location
            );
            return Ok(InjectionOutcome::AlreadyPresent);
        }
    }

    if location == InjectionLocation::Postfix && body.return_indices().is_empty() {
        return Err(Error::InstructionNotFound {
            method: target_name,
            opcode: "ret",
        });
    }

    let mut edited = body.clone();
    let token = module.import_method(patch)?;
    let count = insert_calls(&mut edited, token, location)?;

    if let Some(method) = module.method_mut(target) {
        method.body = Some(edited);
    }

    info!(
        "Injected method {} into {} as {}",
        patch.full_name(),
        target_name,
        location
    );
    Ok(InjectionOutcome::Injected { count })
}

/// Returns true if `body` already calls `token` where an injection at `location` would put it.
///
/// Prefix checks the entry instruction. Postfix looks for the last call to `token`; a match at
/// the very first instruction only counts when a `ret` follows it, otherwise it is a Prefix call.
#[must_use]
pub fn is_injected(body: &MethodBody, token: Token, location: InjectionLocation) -> bool {
    let instructions = &body.instructions;
    match location {
        InjectionLocation::Prefix => instructions
            .first()
            .is_some_and(|first| first.is_call_to(token)),
        InjectionLocation::Postfix => instructions
            .iter()
            .rposition(|instruction| instruction.is_call_to(token))
            .is_some_and(|index| {
                index > 0
                    || instructions
                        .get(index + 1)
                        .is_some_and(Instruction::is_return)
            }),
    }
}

fn insert_calls(body: &mut MethodBody, token: Token, location: InjectionLocation) -> Result<usize> {
    body.simplify_macros();

    let count = match location {
        InjectionLocation::Prefix => {
            body.insert_before(0, Instruction::call(token))?;
            1
        }
        InjectionLocation::Postfix => {
            let returns = body.return_indices();
            // Highest index first so the remaining indices stay valid
            for &index in returns.iter().rev() {
                body.insert_before_redirect(index, Instruction::call(token))?;
            }
            returns.len()
        }
    };

    body.optimize_macros()?;
    debug!(count, instructions = body.instructions.len(), "Rewrote method body");
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::{OpCode, Operand},
        module::CilAssembly,
        test::{create_method, create_type, patch_assembly, player_assembly},
    };

    fn external(patch: &CilAssembly) -> ExternalMethod<'_> {
        let ty = &patch.modules[0].types[0];
        ExternalMethod {
            scope: &patch.name,
            owner: ty,
            method: &ty.methods[0],
        }
    }

    fn body(module: &CilModule, handle: MethodHandle) -> &MethodBody {
        module.method(handle).unwrap().body.as_ref().unwrap()
    }

    fn calls(body: &MethodBody, token: Token) -> Vec<usize> {
        body.instructions
            .iter()
            .enumerate()
            .filter(|(_, i)| i.is_call_to(token))
            .map(|(index, _)| index)
            .collect()
    }

    #[test]
    fn postfix_covers_every_return() -> Result<()> {
        let mut game = player_assembly();
        let patch = patch_assembly();
        let module = game.module_mut("MainModule")?;
        let target = module.resolve("", "Player", "TakeDamage")?;

        let outcome = inject(module, target, &external(&patch), InjectionLocation::Postfix)?;
        assert_eq!(outcome, InjectionOutcome::Injected { count: 2 });

        let token = module.find_method_import(&external(&patch)).unwrap();
        let body = body(module, target);
        assert_eq!(body.instructions.len(), 13);
        assert_eq!(calls(body, token), vec![3, 11]);
        assert_eq!(body.return_indices(), vec![4, 12]);
        assert_eq!(body.instructions[2].operand, Operand::Target(5));
        assert_eq!(body.instructions[2].opcode, OpCode::BrfalseS);
        Ok(())
    }

    #[test]
    fn postfix_rerun_is_noop() -> Result<()> {
        let mut game = player_assembly();
        let patch = patch_assembly();
        let module = game.module_mut("MainModule")?;
        let target = module.resolve("", "Player", "TakeDamage")?;

        inject(module, target, &external(&patch), InjectionLocation::Postfix)?;
        let snapshot = module.clone();
        let outcome = inject(module, target, &external(&patch), InjectionLocation::Postfix)?;

        assert_eq!(outcome, InjectionOutcome::AlreadyPresent);
        assert_eq!(module.types, snapshot.types);
        assert_eq!(module.member_refs.len(), 1);
        assert_eq!(module.type_refs.len(), 1);
        Ok(())
    }

    #[test]
    fn prefix_inserts_once() -> Result<()> {
        let mut game = player_assembly();
        let patch = patch_assembly();
        let module = game.module_mut("MainModule")?;
        let target = module.resolve("", "Player", "TakeDamage")?;

        let outcome = inject(module, target, &external(&patch), InjectionLocation::Prefix)?;
        assert_eq!(outcome, InjectionOutcome::Injected { count: 1 });
        let again = inject(module, target, &external(&patch), InjectionLocation::Prefix)?;
        assert_eq!(again, InjectionOutcome::AlreadyPresent);

        let token = module.find_method_import(&external(&patch)).unwrap();
        let body = body(module, target);
        assert_eq!(calls(body, token), vec![0]);
        assert_eq!(body.instructions.len(), 12);
        assert_eq!(body.instructions[3].operand, Operand::Target(5));
        Ok(())
    }

    #[test]
    fn prefix_then_postfix() -> Result<()> {
        let mut game = player_assembly();
        let patch = patch_assembly();
        let module = game.module_mut("MainModule")?;
        let target = module.resolve("", "Player", "Update")?;

        inject(module, target, &external(&patch), InjectionLocation::Prefix)?;
        let outcome = inject(module, target, &external(&patch), InjectionLocation::Postfix)?;

        assert_eq!(outcome, InjectionOutcome::Injected { count: 1 });
        let token = module.find_method_import(&external(&patch)).unwrap();
        assert_eq!(calls(body(module, target), token), vec![0, 2]);
        Ok(())
    }

    #[test]
    fn postfix_stays_outside_protected_region() -> Result<()> {
        let mut game = player_assembly();
        let patch = patch_assembly();
        let module = game.module_mut("MainModule")?;
        let target = module.resolve("", "Player", "Save")?;

        inject(module, target, &external(&patch), InjectionLocation::Postfix)?;

        let body = body(module, target);
        assert_eq!(body.instructions[1].opcode, OpCode::LeaveS);
        assert_eq!(body.instructions[1].operand, Operand::Target(4));
        assert!(body.instructions[4].opcode == OpCode::Call);
        let handler = &body.exception_handlers[0];
        assert_eq!((handler.try_start, handler.try_end), (0, 2));
        assert_eq!((handler.handler_start, handler.handler_end), (2, 4));
        Ok(())
    }

    #[test]
    fn prefix_lands_before_protected_region() -> Result<()> {
        let mut game = player_assembly();
        let patch = patch_assembly();
        let module = game.module_mut("MainModule")?;
        let target = module.resolve("", "Player", "Save")?;

        inject(module, target, &external(&patch), InjectionLocation::Prefix)?;

        let body = body(module, target);
        let handler = &body.exception_handlers[0];
        assert_eq!((handler.try_start, handler.try_end), (1, 3));
        assert_eq!((handler.handler_start, handler.handler_end), (3, 5));
        assert!(body.encode().is_ok());
        Ok(())
    }

    #[test]
    fn bodyless_method_is_rejected() -> Result<()> {
        let mut game = player_assembly();
        let patch = patch_assembly();
        let module = game.module_mut("MainModule")?;
        let target = module.resolve("", "Player", "Serialize")?;
        let snapshot = module.clone();

        let result = inject(module, target, &external(&patch), InjectionLocation::Prefix);

        assert!(matches!(result, Err(Error::NotPatchable(name)) if name == "Player::Serialize"));
        assert_eq!(module.types, snapshot.types);
        assert!(module.member_refs.is_empty());
        Ok(())
    }

    #[test]
    fn postfix_without_return() -> Result<()> {
        let mut game = player_assembly();
        let patch = patch_assembly();
        let module = game.module_mut("MainModule")?;
        module.types.push(create_type(
            2,
            "",
            "Loop",
            vec![create_method(
                5,
                "Spin",
                0x0096,
                Some(MethodBody::new(vec![
                    Instruction::new(OpCode::Nop),
                    Instruction::branch(OpCode::BrS, 0),
                ])),
            )],
        ));
        let target = module.resolve("", "Loop", "Spin")?;

        let result = inject(module, target, &external(&patch), InjectionLocation::Postfix);

        assert!(matches!(
            result,
            Err(Error::InstructionNotFound { opcode: "ret", .. })
        ));
        assert!(module.member_refs.is_empty());
        Ok(())
    }

    #[test]
    fn instance_patch_method_is_rejected() -> Result<()> {
        let mut game = player_assembly();
        let mut patch = patch_assembly();
        patch.modules[0].types[0].methods[0].flags &= !0x0010;
        let module = game.module_mut("MainModule")?;
        let target = module.resolve("", "Player", "Update")?;
        let snapshot = module.clone();

        let result = inject(module, target, &external(&patch), InjectionLocation::Prefix);

        assert!(matches!(result, Err(Error::PatchMethodNotCallable { .. })));
        assert_eq!(module.types, snapshot.types);
        Ok(())
    }

    #[test]
    fn detection_rules() {
        let token = Token::new(0x0A00_0001);
        let entry_only = MethodBody::new(vec![
            Instruction::call(token),
            Instruction::new(OpCode::Nop),
            Instruction::new(OpCode::Ret),
        ]);
        let before_return = MethodBody::new(vec![
            Instruction::call(token),
            Instruction::new(OpCode::Ret),
        ]);

        assert!(is_injected(&entry_only, token, InjectionLocation::Prefix));
        assert!(!is_injected(&entry_only, token, InjectionLocation::Postfix));
        assert!(is_injected(&before_return, token, InjectionLocation::Postfix));
        assert!(!is_injected(
            &entry_only,
            Token::new(0x0A00_0002),
            InjectionLocation::Prefix
        ));
    }

    #[test]
    fn postfix_on_return_only_body_is_idempotent() -> Result<()> {
        let mut game = player_assembly();
        let patch = patch_assembly();
        let module = game.module_mut("MainModule")?;
        let target = module.resolve("", "Player", "Update")?;
        module.method_mut(target).unwrap().body =
            Some(MethodBody::new(vec![Instruction::new(OpCode::Ret)]));

        let outcomes = (0..3)
            .map(|_| inject(module, target, &external(&patch), InjectionLocation::Postfix))
            .collect::<Result<Vec<_>>>()?;

        assert_eq!(
            outcomes,
            [
                InjectionOutcome::Injected { count: 1 },
                InjectionOutcome::AlreadyPresent,
                InjectionOutcome::AlreadyPresent
            ]
        );
        let token = module.member_refs[0].token;
        let body = body(module, target);
        assert_eq!(body.instructions.len(), 2);
        assert_eq!(calls(body, token), vec![0]);
        Ok(())
    }
}
