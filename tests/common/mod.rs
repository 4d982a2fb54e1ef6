//! Fakes and fixtures shared by the integration tests.
#![allow(dead_code)]

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
};

use cilpatch::prelude::*;
use cilpatch::module::TypeAttributes;

/// public hidebysig
pub const PUBLIC_INSTANCE: u32 = 0x0086;
/// public static hidebysig
pub const PUBLIC_STATIC: u32 = 0x0096;
/// public abstract virtual hidebysig newslot
pub const PUBLIC_ABSTRACT: u32 = 0x05C6;

/// Module store keeping assemblies in memory.
///
/// Game binaries are registered by path. Compiled patches are looked up by file stem among the
/// registered patch assemblies. Writing stores the assembly and replaces the file content with
/// a marker so tests can see whether the file was touched.
#[derive(Default)]
pub struct MemoryStore {
    binaries: Mutex<HashMap<PathBuf, CilAssembly>>,
    patches: Mutex<HashMap<String, CilAssembly>>,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn add_binary(&self, path: &Path, assembly: CilAssembly) {
        self.binaries
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), assembly);
    }

    pub fn add_patch(&self, assembly: CilAssembly) {
        self.patches
            .lock()
            .unwrap()
            .insert(assembly.name.clone(), assembly);
    }

    pub fn binary(&self, path: &Path) -> CilAssembly {
        self.binaries.lock().unwrap()[path].clone()
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl ModuleStore for MemoryStore {
    fn load(&self, path: &Path, _options: &LoadOptions) -> Result<CilAssembly> {
        if let Some(assembly) = self.binaries.lock().unwrap().get(path) {
            return Ok(assembly.clone());
        }

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.patches
            .lock()
            .unwrap()
            .get(&stem)
            .cloned()
            .ok_or_else(|| Error::Error(format!("not an assembly: {}", path.display())))
    }

    fn write(&self, assembly: &CilAssembly, path: &Path) -> Result<()> {
        fs::write(path, format!("patched {}", assembly.name))?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.add_binary(path, assembly.clone());
        Ok(())
    }
}

/// Compiler that echoes the source and counts invocations
#[derive(Default)]
pub struct EchoCompiler {
    calls: AtomicUsize,
    names: Mutex<Vec<String>>,
}

impl EchoCompiler {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn compiled_names(&self) -> Vec<String> {
        self.names.lock().unwrap().clone()
    }
}

impl PatchCompiler for EchoCompiler {
    fn compile(&self, request: &CompileRequest) -> Result<CompileOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.names.lock().unwrap().push(request.assembly_name.clone());
        if request.source.contains("#error") {
            return Ok(CompileOutput::Diagnostics(vec![
                "Broken.cs(9,1): error CS1029: #error".to_string(),
            ]));
        }
        Ok(CompileOutput::Binary(request.source.clone().into_bytes()))
    }
}

pub fn method(row: u32, name: &str, flags: u32, body: Option<MethodBody>) -> MethodDef {
    MethodDef {
        token: Token::new(0x0600_0000 + row),
        name: name.to_string(),
        flags,
        signature: if flags & 0x10 == 0 {
            vec![0x20, 0x00, 0x01]
        } else {
            vec![0x00, 0x00, 0x01]
        },
        body,
    }
}

pub fn public_type(row: u32, name: &str, methods: Vec<MethodDef>) -> TypeDef {
    TypeDef {
        token: Token::new(0x0200_0000 + row),
        namespace: String::new(),
        name: name.to_string(),
        flags: TypeAttributes::PUBLIC,
        methods,
    }
}

/// `if (godMode) return; health -= amount; return;`
pub fn take_damage() -> MethodBody {
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

/// `Assembly-CSharp` with `Player.TakeDamage`, `Player.Update` and the body-less `Player.Serialize`
pub fn game_assembly() -> CilAssembly {
    let mut assembly = CilAssembly::new("Assembly-CSharp");
    assembly.modules[0].types.push(public_type(
        1,
        "Player",
        vec![
            method(1, "TakeDamage", PUBLIC_INSTANCE, Some(take_damage())),
            method(
                2,
                "Update",
                PUBLIC_INSTANCE,
                Some(MethodBody::new(vec![
                    Instruction::new(OpCode::Nop),
                    Instruction::new(OpCode::Ret),
                ])),
            ),
            method(3, "Serialize", PUBLIC_ABSTRACT, None),
        ],
    ));
    assembly
}

/// Compiled patch `name` exposing `public static void P.M()`
pub fn patch_assembly(name: &str) -> CilAssembly {
    let mut assembly = CilAssembly::new(name);
    assembly.modules[0].types.push(public_type(
        1,
        "P",
        vec![method(
            1,
            "M",
            PUBLIC_STATIC,
            Some(MethodBody::new(vec![Instruction::new(OpCode::Ret)])),
        )],
    ));
    assembly
}

/// Patch source with the given name and target
pub fn patch_source(name: &str, method: &str, location: &str, extra: &str) -> String {
    format!(
        "/*\n @Name={name}\n @TargetClass=Player\n @TargetMethod={method}\n \
         @TargetLocation={location}\n @PatchClass=P\n @PatchMethod=M\n{extra}*/\n\
         using System;\n\npublic class P\n{{\n    public static void M() {{ }}\n}}\n"
    )
}

/// Number of calls to the member reference `P::M` in `method` of `Player`
pub fn patch_calls(assembly: &CilAssembly, method: &str) -> usize {
    let module = &assembly.modules[0];
    let Some(member) = module.member_refs.iter().find(|m| m.name == "M") else {
        return 0;
    };
    let handle = module.resolve("", "Player", method).unwrap();
    module
        .method(handle)
        .and_then(|m| m.body.as_ref())
        .map(|body| {
            body.instructions
                .iter()
                .filter(|i| i.is_call_to(member.token))
                .count()
        })
        .unwrap_or(0)
}

/// A game folder with `Demo.exe`, an engine executable and `Demo_Data/Managed/Assembly-CSharp.dll`
pub struct Game {
    pub dir: tempfile::TempDir,
    pub store: MemoryStore,
    pub compiler: EchoCompiler,
}

impl Game {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("UnityCrashHandler64.exe"), b"").unwrap();
        fs::write(dir.path().join("Demo.exe"), b"").unwrap();
        let managed = dir.path().join("Demo_Data").join("Managed");
        fs::create_dir_all(&managed).unwrap();
        fs::write(managed.join("Assembly-CSharp.dll"), b"pristine").unwrap();
        fs::create_dir_all(dir.path().join("Patches")).unwrap();

        let store = MemoryStore::default();
        store.add_binary(&managed.join("Assembly-CSharp.dll"), game_assembly());

        Game {
            dir,
            store,
            compiler: EchoCompiler::default(),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn managed(&self) -> PathBuf {
        self.dir.path().join("Demo_Data").join("Managed")
    }

    pub fn primary(&self) -> PathBuf {
        self.managed().join("Assembly-CSharp.dll")
    }

    pub fn backups(&self) -> PathBuf {
        self.dir.path().join("Backups")
    }

    pub fn config(&self) -> PatcherConfig {
        PatcherConfig::default().with_backup_dir(self.backups())
    }

    pub fn add_source(&self, file_name: &str, content: &str) {
        fs::write(self.dir.path().join("Patches").join(file_name), content).unwrap();
    }

    pub fn session(&self) -> PatchSession<'_> {
        PatchSession::new(self.config(), &self.store, &self.compiler)
    }
}
