use std::path::PathBuf;

use thiserror::Error;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Every failure of a patching run lands in one of the categories below. The orchestrator uses
/// the category to decide how far a failure reaches: descriptor, compile, resolution,
/// unpatchable and missing-exit-point errors only cost the offending patch, integrity errors
/// cost one binary's write, and I/O errors surface with the path that caused them.
///
/// # Error Categories
///
/// ## Bytecode Errors
/// - [`Error::Malformed`] - Corrupted or invalid method body / instruction stream
/// - [`Error::OutOfBounds`] - Attempted to read beyond the end of a buffer
/// - [`Error::UnknownOpcode`] - Byte sequence that is not a CIL opcode
/// - [`Error::BranchOutOfRange`] - Short branch whose target no longer fits a signed byte
///
/// ## Descriptor Errors
/// - [`Error::MissingHeaderField`] - Required `@Key=` line absent or empty
/// - [`Error::InvalidInjectionLocation`] - `@TargetLocation=` is neither `Prefix` nor `Postfix`
///
/// ## Compile Errors
/// - [`Error::Compilation`] - Aggregated compiler diagnostics for one source file
/// - [`Error::EmptySource`] - Patch source contained no code
///
/// ## Resolution Errors
/// - [`Error::ModuleNotFound`], [`Error::TypeNotFound`], [`Error::MethodNotFound`]
///
/// ## Injection Errors
/// - [`Error::NotPatchable`] - Target method has no body
/// - [`Error::PatchMethodNotCallable`] - Patch method is not `public static void M()`
/// - [`Error::InstructionNotFound`] - Postfix requested on a body without `ret`
///
/// ## Integrity Errors
/// - [`Error::ModuleIntegrity`] - Mutated assembly has no types left and must not be written
///
/// ## I/O Errors
/// - [`Error::Io`] - Filesystem failure with the offending path
/// - [`Error::FileError`] - Filesystem failure without path context
/// - [`Error::MissingDirectory`] - Expected working directory is gone
/// - [`Error::GameLayout`] - Game folder does not look like a supported installation
///
/// # Examples
///
/// ```rust,no_run
/// use cilpatch::{Error, patch::parse_descriptor};
/// use std::path::Path;
///
/// match parse_descriptor(Path::new("Patches/GodMode.cs"), &Default::default()) {
///     Ok(descriptor) => println!("parsed {}", descriptor.name()),
///     Err(Error::MissingHeaderField(key)) => eprintln!("header is missing @{key}="),
///     Err(e) => eprintln!("other error: {e}"),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    // Bytecode errors
    /// The method body or instruction stream is damaged and could not be processed.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while reading a buffer.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,

    /// The byte (or `0xFE`-prefixed byte pair) does not encode a known CIL opcode.
    #[error("Unknown opcode: 0x{0:04X}")]
    UnknownOpcode(u16),

    /// A short-form branch cannot encode the distance to its target.
    ///
    /// Raised by the encoder when a body still holds a short branch whose offset no longer
    /// fits in a signed byte. Bodies should be re-optimized rather than encoded as-is.
    #[error("Branch at instruction {index} needs offset {offset}, which exceeds the short form")]
    BranchOutOfRange {
        /// Index of the offending branch instruction
        index: usize,
        /// Offset the branch would need
        offset: i64,
    },

    // Descriptor errors
    /// A required header key is missing or has an empty value.
    #[error("Argument \"@{0}\" in patch was empty.")]
    MissingHeaderField(&'static str),

    /// The `@TargetLocation=` value is not a known injection location.
    #[error("{value} is a invalid target injection location. Valid inputs: {valid}.")]
    InvalidInjectionLocation {
        /// The value found in the header
        value: String,
        /// Comma separated list of accepted values
        valid: String,
    },

    // Compile errors
    /// The compiler service rejected the patch source.
    #[error("There was an error compiling the file: \"{}\".\nError message: {diagnostics}", .file.display())]
    Compilation {
        /// Source file that failed to compile
        file: PathBuf,
        /// All compiler diagnostics, one per line
        diagnostics: String,
    },

    /// The patch source file exists but holds no code.
    #[error("Patch file was found, but it was empty: {}", .0.display())]
    EmptySource(PathBuf),

    /// Two patch sources compile to the same artifact.
    #[error("Patch name \"{name}\" is already used by {}", .first.display())]
    DuplicatePatchName {
        /// Artifact name both sources map to
        name: String,
        /// Source that claimed the name first
        first: PathBuf,
    },

    // Resolution errors
    /// No module with the requested name exists in the target assembly.
    #[error("Module '{0}' not found")]
    ModuleNotFound(String),

    /// The requested type does not exist in the module.
    #[error("Type '{namespace}.{name}' not found")]
    TypeNotFound {
        /// Namespace that was searched (may be empty)
        namespace: String,
        /// Simple type name
        name: String,
    },

    /// The requested method does not exist on the type.
    #[error("Method '{method}' not found on type '{type_name}'")]
    MethodNotFound {
        /// Full name of the searched type
        type_name: String,
        /// Method name that was requested
        method: String,
    },

    // Injection errors
    /// The target method has no body (abstract, extern, runtime-provided).
    #[error("Target method doesn't have a body. Method: {0}")]
    NotPatchable(String),

    /// The patch method cannot be called without arguments from arbitrary code.
    ///
    /// Injected calls take no arguments and leave nothing on the stack, so patch methods must
    /// be public, static, parameterless and return `void`, on a public type.
    #[error("Patch method {method} cannot be injected: {reason}")]
    PatchMethodNotCallable {
        /// Full name of the patch method
        method: String,
        /// What disqualifies it
        reason: String,
    },

    /// The body lacks an instruction the injection needs.
    #[error("No '{opcode}' instruction found in method {method}")]
    InstructionNotFound {
        /// Full name of the method
        method: String,
        /// Mnemonic of the instruction that was searched for
        opcode: &'static str,
    },

    // Integrity errors
    /// The mutated assembly no longer contains any type and was not written.
    #[error("{0} state is invalid. Aborting the write operation.")]
    ModuleIntegrity(String),

    // I/O errors
    /// Filesystem failure on a known path.
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        /// The path that was being accessed
        path: PathBuf,
        /// The underlying error
        #[source]
        source: std::io::Error,
    },

    /// Filesystem failure without path context.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// A working directory that should exist is missing.
    #[error("{} folder should exist, but it does not. Was it deleted externally?", .0.display())]
    MissingDirectory(PathBuf),

    /// The game folder does not match the expected installation layout.
    #[error("Invalid game layout: {0}")]
    GameLayout(String),

    /// Generic error for miscellaneous cases.
    #[error("{0}")]
    Error(String),
}

impl Error {
    /// Wraps an [`std::io::Error`] together with the path it occurred on.
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}
